// Copyright 2018-2026 the jsrt authors. MIT license.

//! TCP socket lifecycle:
//! `NEW -> CONNECTING -> CONNECTED -> (HALF_CLOSED | DESTROYED) -> CLOSED`.
//!
//! Teardown discipline: a socket may own up to two loop handles (the
//! TCP handle and a lazily allocated timeout timer). `close_count` is
//! set to the number of handles being closed; each close callback
//! decrements it; the `close` event fires — and the state becomes
//! droppable — only when it reaches zero.

use std::cell::RefCell;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::net::ToSocketAddrs;
use std::rc::Rc;
use std::rc::Weak;

use bytes::Bytes;
use jsrt_core::error::SystemError;
use jsrt_core::event_loop::Index;
use jsrt_core::event_loop::LoopHandle;
use jsrt_core::event_loop::TcpSocketInfo;
use jsrt_events::EventEmitter;
use jsrt_events::EventValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
  Opening,
  Open,
  ReadOnly,
  WriteOnly,
  Closed,
}

impl ReadyState {
  pub fn as_str(&self) -> &'static str {
    match self {
      ReadyState::Opening => "opening",
      ReadyState::Open => "open",
      ReadyState::ReadOnly => "readOnly",
      ReadyState::WriteOnly => "writeOnly",
      ReadyState::Closed => "closed",
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
  pub allow_half_open: bool,
}

pub(crate) struct SocketState {
  pub tcp: Option<Index>,
  pub timeout_timer: Option<Index>,
  pub host: Option<String>,
  pub port: u16,
  pub local: Option<SocketAddr>,
  pub remote: Option<SocketAddr>,
  pub connecting: bool,
  pub connected: bool,
  pub destroyed: bool,
  pub paused: bool,
  pub had_error: bool,
  pub allow_half_open: bool,
  pub encoding: Option<String>,
  pub timeout_ms: u64,
  pub bytes_read: u64,
  pub bytes_written: u64,
  pub pending_writes: usize,
  pub close_count: u32,
  pub eof_seen: bool,
  pub write_ended: bool,
}

impl SocketState {
  fn new(allow_half_open: bool) -> Self {
    Self {
      tcp: None,
      timeout_timer: None,
      host: None,
      port: 0,
      local: None,
      remote: None,
      connecting: false,
      connected: false,
      destroyed: false,
      paused: false,
      had_error: false,
      allow_half_open,
      encoding: None,
      timeout_ms: 0,
      bytes_read: 0,
      bytes_written: 0,
      pending_writes: 0,
      close_count: 0,
      eof_seen: false,
      write_ended: false,
    }
  }
}

pub(crate) struct SocketInner {
  weak_self: Weak<SocketInner>,
  pub handle: LoopHandle,
  pub emitter: EventEmitter,
  pub state: RefCell<SocketState>,
}

#[derive(Clone)]
pub struct Socket {
  pub(crate) inner: Rc<SocketInner>,
}

impl Socket {
  pub fn new(handle: &LoopHandle, options: SocketOptions) -> Self {
    Socket {
      inner: Rc::new_cyclic(|weak_self| SocketInner {
        weak_self: weak_self.clone(),
        handle: handle.clone(),
        emitter: EventEmitter::new(),
        state: RefCell::new(SocketState::new(options.allow_half_open)),
      }),
    }
  }

  /// Wraps a freshly accepted connection: already CONNECTED, reading
  /// begins immediately.
  pub(crate) fn from_accepted(
    handle: &LoopHandle,
    info: &TcpSocketInfo,
  ) -> Self {
    let socket = Socket::new(handle, SocketOptions::default());
    {
      let mut state = socket.inner.state.borrow_mut();
      state.tcp = Some(info.index);
      state.connected = true;
      state.local = Some(info.local);
      state.remote = Some(info.remote);
      state.port = info.remote.port();
    }
    socket.inner.start_reading();
    socket
  }

  pub fn emitter(&self) -> &EventEmitter {
    &self.inner.emitter
  }

  /// Opens the connection. Literal IPs connect directly; hostnames
  /// resolve on the worker pool first. Failures surface as `error`
  /// events.
  pub fn connect(&self, port: u16, host: &str) {
    let inner = &self.inner;
    {
      let mut state = inner.state.borrow_mut();
      if state.destroyed || state.connecting || state.connected {
        drop(state);
        inner.emit_error(SystemError::new(
          "connect",
          "EISCONN",
          "socket is already connected or connecting",
        ));
        return;
      }
      state.connecting = true;
      state.host = Some(host.to_string());
      state.port = port;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
      inner.start_connect(SocketAddr::new(ip, port));
      return;
    }

    // Hostname: resolve off-loop, exactly like the DNS subsystem does.
    let weak = Rc::downgrade(inner);
    let lookup_host = host.to_string();
    let failure_host = lookup_host.clone();
    inner.handle.queue_work(
      move || {
        let mut addrs = (lookup_host.as_str(), port)
          .to_socket_addrs()
          .map_err(|err| SystemError {
            code: "ENOTFOUND",
            syscall: "getaddrinfo",
            message: err.to_string(),
            errno: 0,
          })?;
        match addrs.next() {
          Some(addr) => Ok(Box::new(addr) as Box<dyn std::any::Any + Send>),
          None => Err(SystemError {
            code: "ENOTFOUND",
            syscall: "getaddrinfo",
            message: format!("no address found for {failure_host}"),
            errno: 0,
          }),
        }
      },
      move |_, outcome| {
        let Some(inner) = weak.upgrade() else {
          return;
        };
        if inner.state.borrow().destroyed {
          return;
        }
        match outcome {
          Ok(addr) => {
            let addr = *addr.downcast::<SocketAddr>().unwrap();
            inner.start_connect(addr);
          }
          Err(err) => {
            inner.state.borrow_mut().connecting = false;
            inner.emit_error(err);
            inner.destroy_with_error_flag();
          }
        }
      },
    );
  }

  /// Queues bytes for the connection. Returns `false` when writes are
  /// stacking up behind the kernel; `drain` fires when the queue
  /// empties.
  pub fn write(&self, data: &[u8]) -> Result<bool, SystemError> {
    let inner = &self.inner;
    let tcp = {
      let mut state = inner.state.borrow_mut();
      if state.destroyed {
        return Err(SystemError::bad_handle("write"));
      }
      if state.write_ended {
        return Err(SystemError::shutting_down("write"));
      }
      let Some(tcp) = state.tcp else {
        return Err(SystemError::new("write", "ENOTCONN", "socket is not connected"));
      };
      state.pending_writes += 1;
      tcp
    };

    // The loop owns a copy of the bytes for the async lifetime.
    let weak = Rc::downgrade(inner);
    inner.handle.tcp_write(tcp, data.to_vec(), move |_, _, result| {
      let Some(inner) = weak.upgrade() else {
        return;
      };
      let drained = {
        let mut state = inner.state.borrow_mut();
        state.pending_writes -= 1;
        match &result {
          Ok(n) => state.bytes_written += *n as u64,
          Err(_) => {}
        }
        state.pending_writes == 0 && !state.destroyed
      };
      match result {
        Ok(_) => {
          inner.reset_timeout();
          if drained {
            inner.emitter.emit("drain", &[]);
          }
        }
        Err(err) => {
          inner.emit_error(err);
          inner.destroy_with_error_flag();
        }
      }
    });

    Ok(inner.state.borrow().pending_writes == 1)
  }

  /// Half-closes the write side (FIN after pending writes drain).
  pub fn end(&self) {
    let inner = &self.inner;
    let tcp = {
      let mut state = inner.state.borrow_mut();
      if state.destroyed || state.write_ended {
        return;
      }
      state.write_ended = true;
      state.tcp
    };
    if let Some(tcp) = tcp {
      inner.handle.tcp_shutdown(tcp);
    }
    let fully_closed = inner.state.borrow().eof_seen;
    if fully_closed {
      inner.destroy(None);
    }
  }

  pub fn destroy(&self) {
    self.inner.destroy(None);
  }

  pub fn pause(&self) {
    let mut state = self.inner.state.borrow_mut();
    state.paused = true;
    if let Some(tcp) = state.tcp {
      self.inner.handle.tcp_read_stop(tcp);
    }
  }

  pub fn resume(&self) {
    let tcp = {
      let mut state = self.inner.state.borrow_mut();
      if !state.paused {
        return;
      }
      state.paused = false;
      state.tcp
    };
    if tcp.is_some() {
      self.inner.start_reading();
    }
  }

  /// Arms (or, with 0, disarms) the inactivity timer. Firing emits
  /// `timeout`; closing the socket is the listener's call.
  pub fn set_timeout(&self, ms: u64) {
    let inner = &self.inner;
    let old = {
      let mut state = inner.state.borrow_mut();
      state.timeout_ms = ms;
      state.timeout_timer.take()
    };
    if let Some(timer) = old {
      inner.handle.timer_stop(timer);
    }
    if ms > 0 {
      inner.arm_timeout();
    }
  }

  pub fn set_encoding(&self, encoding: &str) -> Result<(), SystemError> {
    match encoding {
      "utf8" | "utf-8" => {
        self.inner.state.borrow_mut().encoding = Some("utf8".to_string());
        Ok(())
      }
      other => Err(SystemError::new(
        "setEncoding",
        "EINVAL",
        format!("unknown encoding: {other}"),
      )),
    }
  }

  pub fn set_no_delay(&self, enable: bool) {
    if let Some(tcp) = self.inner.state.borrow().tcp {
      self.inner.handle.tcp_set_no_delay(tcp, enable);
    }
  }

  pub fn set_keep_alive(&self, enable: bool, initial_delay_ms: u64) {
    if let Some(tcp) = self.inner.state.borrow().tcp {
      self.inner.handle.tcp_set_keep_alive(tcp, enable, initial_delay_ms);
    }
  }

  pub fn ref_socket(&self) {
    if let Some(tcp) = self.inner.state.borrow().tcp {
      self.inner.handle.ref_handle(tcp, true);
    }
  }

  pub fn unref(&self) {
    if let Some(tcp) = self.inner.state.borrow().tcp {
      self.inner.handle.ref_handle(tcp, false);
    }
  }

  // Inspection surface.

  pub fn local_address(&self) -> Option<SocketAddr> {
    self.inner.state.borrow().local
  }

  pub fn remote_address(&self) -> Option<SocketAddr> {
    self.inner.state.borrow().remote
  }

  pub fn local_family(&self) -> Option<&'static str> {
    self.inner.state.borrow().local.map(address_family)
  }

  pub fn remote_family(&self) -> Option<&'static str> {
    self.inner.state.borrow().remote.map(address_family)
  }

  pub fn address(&self) -> Option<SocketAddr> {
    self.local_address()
  }

  pub fn bytes_read(&self) -> u64 {
    self.inner.state.borrow().bytes_read
  }

  pub fn bytes_written(&self) -> u64 {
    self.inner.state.borrow().bytes_written
  }

  pub fn connecting(&self) -> bool {
    self.inner.state.borrow().connecting
  }

  pub fn destroyed(&self) -> bool {
    self.inner.state.borrow().destroyed
  }

  pub fn pending(&self) -> bool {
    let state = self.inner.state.borrow();
    !state.connected && !state.destroyed
  }

  pub fn ready_state(&self) -> ReadyState {
    let state = self.inner.state.borrow();
    if state.destroyed {
      ReadyState::Closed
    } else if state.connecting {
      ReadyState::Opening
    } else if !state.connected {
      ReadyState::Opening
    } else {
      match (state.eof_seen, state.write_ended) {
        (false, false) => ReadyState::Open,
        (false, true) => ReadyState::ReadOnly,
        (true, false) => ReadyState::WriteOnly,
        (true, true) => ReadyState::Closed,
      }
    }
  }

  /// Loop handles still waiting on a close callback; the state is
  /// reclaimable only at zero.
  pub fn close_count(&self) -> u32 {
    self.inner.state.borrow().close_count
  }
}

impl SocketInner {
  fn start_connect(&self, addr: SocketAddr) {
    let weak = self.weak_self.clone();
    let result = self.handle.tcp_connect(addr, move |_, _, outcome| {
      let Some(inner) = weak.upgrade() else {
        return;
      };
      if inner.state.borrow().destroyed {
        return;
      }
      match outcome {
        Ok(info) => {
          {
            let mut state = inner.state.borrow_mut();
            state.connecting = false;
            state.connected = true;
            state.local = Some(info.local);
            state.remote = Some(info.remote);
          }
          inner.emitter.emit("connect", &[]);
          inner.emitter.emit("ready", &[]);
          inner.start_reading();
        }
        Err(err) => {
          inner.state.borrow_mut().connecting = false;
          inner.emit_error(err);
          inner.destroy_with_error_flag();
        }
      }
    });

    match result {
      Ok(index) => {
        self.state.borrow_mut().tcp = Some(index);
      }
      Err(err) => {
        self.state.borrow_mut().connecting = false;
        self.emit_error(err);
        self.destroy_with_error_flag();
      }
    }
  }

  pub(crate) fn start_reading(&self) {
    let tcp = {
      let state = self.state.borrow();
      if state.paused || state.destroyed {
        return;
      }
      state.tcp
    };
    let Some(tcp) = tcp else {
      return;
    };
    let weak = self.weak_self.clone();
    self.handle.tcp_read_start(tcp, move |_, _, result| {
      let Some(inner) = weak.upgrade() else {
        return;
      };
      if inner.state.borrow().destroyed {
        return;
      }
      match result {
        Ok(data) if data.is_empty() => inner.on_eof(),
        Ok(data) => inner.on_data(data),
        Err(err) => {
          inner.emit_error(err);
          inner.destroy_with_error_flag();
        }
      }
    });
  }

  fn on_data(&self, data: Vec<u8>) {
    let encoding = {
      let mut state = self.state.borrow_mut();
      state.bytes_read += data.len() as u64;
      state.encoding.clone()
    };
    self.reset_timeout();
    let payload = match encoding {
      Some(_) => EventValue::Str(String::from_utf8_lossy(&data).into_owned()),
      None => EventValue::Bytes(Bytes::from(data)),
    };
    self.emitter.emit("data", &[payload]);
  }

  fn on_eof(&self) {
    let (write_ended, allow_half_open, tcp) = {
      let mut state = self.state.borrow_mut();
      if state.eof_seen {
        return;
      }
      state.eof_seen = true;
      (state.write_ended, state.allow_half_open, state.tcp)
    };
    self.emitter.emit("end", &[]);

    if write_ended {
      self.destroy(None);
    } else if !allow_half_open {
      // Mirror the FIN: shut our side down too, then tear down.
      if let Some(tcp) = tcp {
        self.state.borrow_mut().write_ended = true;
        self.handle.tcp_shutdown(tcp);
      }
      self.destroy(None);
    }
  }

  fn arm_timeout(&self) {
    let ms = self.state.borrow().timeout_ms;
    if ms == 0 {
      return;
    }
    let weak = self.weak_self.clone();
    let timer = self.handle.timer_start(ms, 0, move |_| {
      if let Some(inner) = weak.upgrade() {
        inner.state.borrow_mut().timeout_timer = None;
        inner.emitter.emit("timeout", &[]);
      }
    });
    self.state.borrow_mut().timeout_timer = Some(timer);
  }

  /// Any I/O re-arms the inactivity timer.
  pub(crate) fn reset_timeout(&self) {
    let old = {
      let mut state = self.state.borrow_mut();
      if state.timeout_ms == 0 || state.destroyed {
        return;
      }
      state.timeout_timer.take()
    };
    if let Some(timer) = old {
      self.handle.timer_stop(timer);
    }
    self.arm_timeout();
  }

  pub(crate) fn emit_error(&self, err: SystemError) {
    self.state.borrow_mut().had_error = true;
    self
      .emitter
      .emit("error", &[EventValue::Error(Rc::new(err))]);
  }

  fn destroy_with_error_flag(&self) {
    self.destroy(None);
  }

  /// Tears the socket down. Every live loop handle is closed
  /// asynchronously; `close` is emitted after the last close callback.
  pub(crate) fn destroy(&self, err: Option<SystemError>) {
    let handles = {
      let mut state = self.state.borrow_mut();
      if state.destroyed {
        return;
      }
      state.destroyed = true;
      state.connecting = false;
      state.connected = false;
      let mut handles = Vec::new();
      if let Some(tcp) = state.tcp.take() {
        handles.push(tcp);
      }
      if let Some(timer) = state.timeout_timer.take() {
        handles.push(timer);
      }
      state.close_count = handles.len() as u32;
      handles
    };

    if let Some(err) = err {
      self.emit_error(err);
    }

    if handles.is_empty() {
      self.emit_close();
      return;
    }
    for index in handles {
      let weak = self.weak_self.clone();
      self.handle.handle_close(index, move |_| {
        let Some(inner) = weak.upgrade() else {
          return;
        };
        let remaining = {
          let mut state = inner.state.borrow_mut();
          state.close_count -= 1;
          state.close_count
        };
        if remaining == 0 {
          inner.emit_close();
        }
      });
    }
  }

  fn emit_close(&self) {
    let had_error = self.state.borrow().had_error;
    self.emitter.emit("close", &[EventValue::Bool(had_error)]);
  }
}

fn address_family(addr: SocketAddr) -> &'static str {
  match addr {
    SocketAddr::V4(_) => "IPv4",
    SocketAddr::V6(_) => "IPv6",
  }
}

impl Drop for SocketInner {
  fn drop(&mut self) {
    // The wrapper went away without destroy(): close what is left so
    // the loop never touches freed state.
    let state = self.state.get_mut();
    if let Some(tcp) = state.tcp.take() {
      self.handle.handle_close(tcp, |_| {});
    }
    if let Some(timer) = state.timeout_timer.take() {
      self.handle.timer_stop(timer);
    }
  }
}
