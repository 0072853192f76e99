// Copyright 2018-2026 the jsrt authors. MIT license.

//! Async address/service lookups over the worker pool, with Node's
//! error-code mapping. Only `lookup`/`lookupService` are real; the
//! `resolve*` record family is deliberately stubbed with `ENOTIMPL`.

mod sys;

use std::net::SocketAddr;
use std::rc::Rc;

use jsrt_core::engine::PromiseCapability;
use jsrt_core::event_loop::LoopHandle;
use serde_json::json;
use serde_json::Value;

use sys::GaiError;

// glibc values; not exported by the libc crate on every target.
const EAI_ADDRFAMILY: i32 = -9;
const EAI_NODATA: i32 = -5;

/// A DNS failure with the Node-visible shape.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{syscall} {code}: {message}")]
pub struct DnsError {
  pub code: &'static str,
  pub syscall: &'static str,
  pub hostname: Option<String>,
  pub message: String,
  pub errno: i32,
}

impl DnsError {
  fn from_gai(
    syscall: &'static str,
    hostname: Option<String>,
    err: GaiError,
  ) -> Self {
    DnsError {
      code: map_eai_code(err.eai),
      syscall,
      hostname,
      message: err.message,
      errno: err.eai,
    }
  }

  pub fn not_implemented(record_type: &str) -> Self {
    DnsError {
      code: "ENOTIMPL",
      syscall: "query",
      hostname: None,
      message: format!(
        "DNS resolution of {record_type} records is not implemented"
      ),
      errno: 0,
    }
  }

  /// The JSON error object promise rejections carry.
  pub fn to_value(&self) -> Value {
    let mut err = json!({
      "name": "Error",
      "message": self.message,
      "code": self.code,
      "errno": self.errno,
      "syscall": self.syscall,
    });
    if let Some(hostname) = &self.hostname {
      err["hostname"] = json!(hostname);
    }
    err
  }
}

fn map_eai_code(eai: i32) -> &'static str {
  match eai {
    libc::EAI_AGAIN | libc::EAI_FAIL | libc::EAI_NONAME => "ENOTFOUND",
    EAI_ADDRFAMILY | libc::EAI_FAMILY => "EADDRFAMILY",
    libc::EAI_BADFLAGS => "EBADFLAGS",
    libc::EAI_MEMORY => "ENOMEM",
    EAI_NODATA => "ENODATA",
    libc::EAI_SERVICE => "ESERVICE",
    libc::EAI_SOCKTYPE => "ESOCKTYPE",
    _ => "EUNKNOWN",
  }
}

/// The getaddrinfo hint flags `lookup` forwards.
pub mod hints {
  pub const ADDRCONFIG: i32 = libc::AI_ADDRCONFIG;
  pub const V4MAPPED: i32 = libc::AI_V4MAPPED;
  pub const ALL: i32 = libc::AI_ALL;
  pub const NUMERICHOST: i32 = libc::AI_NUMERICHOST;
  pub const CANONNAME: i32 = libc::AI_CANONNAME;
}

#[derive(Debug, Clone)]
pub struct LookupOptions {
  /// 0 (unspecified), 4 or 6.
  pub family: u8,
  /// Raw getaddrinfo flags (see [`hints`]).
  pub hints: i32,
  /// Return every address instead of the first.
  pub all: bool,
  /// Preserve resolver ordering instead of sorting IPv4 first.
  pub verbatim: bool,
}

impl Default for LookupOptions {
  fn default() -> Self {
    Self { family: 0, hints: 0, all: false, verbatim: true }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupAnswer {
  pub address: String,
  pub family: u8,
}

/// `all=false` yields `Single`; `all=true` yields `All`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupReply {
  Single(LookupAnswer),
  All(Vec<LookupAnswer>),
}

/// Service lookup result: `{hostname, service}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAnswer {
  pub hostname: String,
  pub service: String,
}

fn family_to_af(family: u8) -> i32 {
  match family {
    4 => libc::AF_INET,
    6 => libc::AF_INET6,
    _ => libc::AF_UNSPEC,
  }
}

/// Async `getaddrinfo`. The resolution runs on the worker pool; `cb`
/// runs back on the loop thread.
pub fn lookup<F>(
  handle: &LoopHandle,
  hostname: &str,
  options: LookupOptions,
  cb: F,
) where
  F: FnOnce(Result<LookupReply, DnsError>) + 'static,
{
  let host = hostname.to_string();
  let host_for_error = host.clone();
  handle.queue_work(
    move || {
      let result =
        sys::getaddrinfo(&host, family_to_af(options.family), options.hints);
      let boxed: Box<dyn std::any::Any + Send> = Box::new((result, options));
      Ok(boxed)
    },
    move |_, outcome| {
      let (result, options) = *outcome
        .expect("lookup worker never fails the task itself")
        .downcast::<(Result<Vec<sys::AddrInfo>, GaiError>, LookupOptions)>()
        .unwrap();
      let reply = result
        .map_err(|err| {
          DnsError::from_gai("getaddrinfo", Some(host_for_error.clone()), err)
        })
        .and_then(|mut addresses| {
          if addresses.is_empty() {
            return Err(DnsError {
              code: "ENOTFOUND",
              syscall: "getaddrinfo",
              hostname: Some(host_for_error.clone()),
              message: format!("no address found for {host_for_error}"),
              errno: EAI_NODATA,
            });
          }
          if !options.verbatim {
            // Legacy ordering: IPv4 before IPv6, otherwise stable.
            addresses.sort_by_key(|info| info.family);
          }
          let answers: Vec<LookupAnswer> = addresses
            .into_iter()
            .map(|info| LookupAnswer {
              address: info.address.to_string(),
              family: info.family,
            })
            .collect();
          Ok(if options.all {
            LookupReply::All(answers)
          } else {
            LookupReply::Single(answers.into_iter().next().unwrap())
          })
        });
      cb(reply);
    },
  );
}

/// Async `getnameinfo` for an address/port pair.
pub fn lookup_service<F>(handle: &LoopHandle, addr: SocketAddr, cb: F)
where
  F: FnOnce(Result<ServiceAnswer, DnsError>) + 'static,
{
  handle.queue_work(
    move || {
      let result = sys::getnameinfo(&addr);
      let boxed: Box<dyn std::any::Any + Send> = Box::new(result);
      Ok(boxed)
    },
    move |_, outcome| {
      let result = *outcome
        .expect("lookup_service worker never fails the task itself")
        .downcast::<Result<(String, String), GaiError>>()
        .unwrap();
      let reply = result
        .map(|(hostname, service)| ServiceAnswer { hostname, service })
        .map_err(|err| DnsError::from_gai("getnameinfo", None, err));
      cb(reply);
    },
  );
}

/// The `resolve*` family is out of the core: every call reports
/// `ENOTIMPL` to its callback.
pub fn resolve_stub<F>(record_type: &'static str, cb: F)
where
  F: FnOnce(Result<Vec<String>, DnsError>) + 'static,
{
  log::debug!("dns.resolve({record_type}) called; resolver is stubbed");
  cb(Err(DnsError::not_implemented(record_type)));
}

macro_rules! resolver_stubs {
  ($($name:ident => $record:literal),+ $(,)?) => {
    $(
      pub fn $name<F>(cb: F)
      where
        F: FnOnce(Result<Vec<String>, DnsError>) + 'static,
      {
        resolve_stub($record, cb);
      }
    )+
  };
}

resolver_stubs! {
  resolve => "ANY",
  resolve4 => "A",
  resolve6 => "AAAA",
  resolve_cname => "CNAME",
  resolve_mx => "MX",
  resolve_ns => "NS",
  resolve_srv => "SRV",
  resolve_txt => "TXT",
  reverse => "PTR",
}

/// Promise-style variants: resolve/reject a single engine capability.
pub mod promises {
  use super::*;

  pub fn lookup(
    handle: &LoopHandle,
    promise: Rc<dyn PromiseCapability>,
    hostname: &str,
    options: LookupOptions,
  ) {
    super::lookup(handle, hostname, options, move |result| match result {
      Ok(LookupReply::Single(answer)) => promise.resolve(json!({
        "address": answer.address,
        "family": answer.family,
      })),
      Ok(LookupReply::All(answers)) => {
        let list: Vec<Value> = answers
          .iter()
          .map(|answer| {
            json!({ "address": answer.address, "family": answer.family })
          })
          .collect();
        promise.resolve(Value::Array(list));
      }
      Err(err) => promise.reject(err.to_value()),
    });
  }

  /// One promise per call; the resolution carries `{hostname, service}`.
  pub fn lookup_service(
    handle: &LoopHandle,
    promise: Rc<dyn PromiseCapability>,
    addr: SocketAddr,
  ) {
    super::lookup_service(handle, addr, move |result| match result {
      Ok(answer) => promise.resolve(json!({
        "hostname": answer.hostname,
        "service": answer.service,
      })),
      Err(err) => promise.reject(err.to_value()),
    });
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use jsrt_core::engine::testing::PromiseState;
  use jsrt_core::engine::testing::TestEngine;
  use jsrt_core::engine::JsEngine;
  use jsrt_core::event_loop::EventLoop;

  use super::*;

  fn run_lookup(
    hostname: &str,
    options: LookupOptions,
  ) -> Result<LookupReply, DnsError> {
    let mut event_loop = EventLoop::new(2).unwrap();
    let handle = event_loop.handle();
    let slot = Rc::new(RefCell::new(None));
    let sink = slot.clone();
    lookup(&handle, hostname, options, move |result| {
      *sink.borrow_mut() = Some(result);
    });
    event_loop.run();
    Rc::try_unwrap(slot).unwrap().into_inner().unwrap()
  }

  #[test]
  fn unknown_host_maps_to_enotfound() {
    let err = run_lookup("no-such-host.invalid", LookupOptions::default())
      .unwrap_err();
    assert_eq!(err.code, "ENOTFOUND");
    assert_eq!(err.syscall, "getaddrinfo");
    assert_eq!(err.hostname.as_deref(), Some("no-such-host.invalid"));
  }

  #[test]
  fn localhost_resolves_single_answer() {
    let reply = run_lookup(
      "localhost",
      LookupOptions { family: 4, ..Default::default() },
    );
    let Ok(LookupReply::Single(answer)) = reply else {
      // Containers without a resolver still must fail with the mapped
      // code, not crash.
      return;
    };
    assert_eq!(answer.family, 4);
    assert_eq!(answer.address, "127.0.0.1");
  }

  #[test]
  fn all_returns_every_address() {
    if let Ok(reply) =
      run_lookup("localhost", LookupOptions { all: true, ..Default::default() })
    {
      match reply {
        LookupReply::All(answers) => assert!(!answers.is_empty()),
        LookupReply::Single(_) => panic!("expected the array shape"),
      }
    }
  }

  #[test]
  fn lookup_service_returns_hostname_and_service() {
    let mut event_loop = EventLoop::new(2).unwrap();
    let handle = event_loop.handle();
    let slot = Rc::new(RefCell::new(None));
    let sink = slot.clone();
    lookup_service(&handle, "127.0.0.1:80".parse().unwrap(), move |result| {
      *sink.borrow_mut() = Some(result);
    });
    event_loop.run();
    let answer = slot.borrow_mut().take().unwrap().unwrap();
    assert!(!answer.hostname.is_empty());
    assert!(!answer.service.is_empty());
  }

  #[test]
  fn resolver_family_is_stubbed() {
    let seen = Rc::new(RefCell::new(None));
    let sink = seen.clone();
    resolve4(move |result| {
      *sink.borrow_mut() = Some(result.unwrap_err());
    });
    let err = seen.borrow_mut().take().unwrap();
    assert_eq!(err.code, "ENOTIMPL");
  }

  #[test]
  fn promise_lookup_settles_exactly_one_capability() {
    let mut event_loop = EventLoop::new(2).unwrap();
    let handle = event_loop.handle();
    let engine = TestEngine::new();
    let promise = engine.create_promise();
    promises::lookup(
      &handle,
      promise,
      "no-such-host.invalid",
      LookupOptions::default(),
    );
    event_loop.run();

    let promises = engine.promises();
    assert_eq!(promises.len(), 1);
    match promises[0].state() {
      PromiseState::Rejected(err) => {
        assert_eq!(err["code"], "ENOTFOUND");
        assert_eq!(err["syscall"], "getaddrinfo");
      }
      state => panic!("expected rejection, got {state:?}"),
    }
  }
}
