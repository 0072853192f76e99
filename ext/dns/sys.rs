// Copyright 2018-2026 the jsrt authors. MIT license.

//! Thin wrappers over the libc resolver calls. These run on the worker
//! pool only; nothing here touches loop or engine state.

use std::ffi::CStr;
use std::ffi::CString;
use std::mem;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::net::SocketAddr;
use std::ptr;

/// A raw getaddrinfo/getnameinfo failure; `eai` is the (negative) EAI_*
/// status.
#[derive(Debug, Clone)]
pub struct GaiError {
  pub eai: i32,
  pub message: String,
}

fn gai_error(eai: i32) -> GaiError {
  let message = unsafe {
    CStr::from_ptr(libc::gai_strerror(eai)).to_string_lossy().into_owned()
  };
  GaiError { eai, message }
}

#[derive(Debug, Clone)]
pub struct AddrInfo {
  pub address: IpAddr,
  pub family: u8,
}

/// `getaddrinfo(3)` restricted to the shapes the lookup API needs:
/// `family` is `AF_UNSPEC`/`AF_INET`/`AF_INET6`, `flags` go to
/// `ai_flags` verbatim.
pub fn getaddrinfo(
  host: &str,
  family: i32,
  flags: i32,
) -> Result<Vec<AddrInfo>, GaiError> {
  let host = CString::new(host).map_err(|_| GaiError {
    eai: libc::EAI_NONAME,
    message: "hostname contains an interior NUL".to_string(),
  })?;

  let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
  hints.ai_family = family;
  hints.ai_socktype = libc::SOCK_STREAM;
  hints.ai_flags = flags;

  let mut list: *mut libc::addrinfo = ptr::null_mut();
  let status = unsafe {
    libc::getaddrinfo(host.as_ptr(), ptr::null(), &hints, &mut list)
  };
  if status != 0 {
    return Err(gai_error(status));
  }

  let mut results = Vec::new();
  let mut cursor = list;
  while !cursor.is_null() {
    let entry = unsafe { &*cursor };
    match entry.ai_family {
      libc::AF_INET => {
        let sockaddr = unsafe { &*(entry.ai_addr as *const libc::sockaddr_in) };
        let octets = sockaddr.sin_addr.s_addr.to_ne_bytes();
        results.push(AddrInfo {
          address: IpAddr::V4(Ipv4Addr::from(octets)),
          family: 4,
        });
      }
      libc::AF_INET6 => {
        let sockaddr =
          unsafe { &*(entry.ai_addr as *const libc::sockaddr_in6) };
        results.push(AddrInfo {
          address: IpAddr::V6(Ipv6Addr::from(sockaddr.sin6_addr.s6_addr)),
          family: 6,
        });
      }
      _ => {}
    }
    cursor = entry.ai_next;
  }
  unsafe { libc::freeaddrinfo(list) };

  // getaddrinfo can repeat an address per socktype; one is enough.
  results.dedup_by(|a, b| a.address == b.address);
  Ok(results)
}

/// `getnameinfo(3)`: resolves an address/port pair to `(hostname,
/// service)`.
pub fn getnameinfo(addr: &SocketAddr) -> Result<(String, String), GaiError> {
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
  let len = match addr {
    SocketAddr::V4(v4) => {
      let sockaddr = &mut storage as *mut _ as *mut libc::sockaddr_in;
      unsafe {
        (*sockaddr).sin_family = libc::AF_INET as libc::sa_family_t;
        (*sockaddr).sin_port = v4.port().to_be();
        (*sockaddr).sin_addr.s_addr =
          u32::from_ne_bytes(v4.ip().octets());
      }
      mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
    }
    SocketAddr::V6(v6) => {
      let sockaddr = &mut storage as *mut _ as *mut libc::sockaddr_in6;
      unsafe {
        (*sockaddr).sin6_family = libc::AF_INET6 as libc::sa_family_t;
        (*sockaddr).sin6_port = v6.port().to_be();
        (*sockaddr).sin6_addr.s6_addr = v6.ip().octets();
      }
      mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
    }
  };

  let mut host = [0 as libc::c_char; 1025];
  let mut service = [0 as libc::c_char; 32];
  let status = unsafe {
    libc::getnameinfo(
      &storage as *const _ as *const libc::sockaddr,
      len,
      host.as_mut_ptr(),
      host.len() as libc::socklen_t,
      service.as_mut_ptr(),
      service.len() as libc::socklen_t,
      0,
    )
  };
  if status != 0 {
    return Err(gai_error(status));
  }

  let host =
    unsafe { CStr::from_ptr(host.as_ptr()) }.to_string_lossy().into_owned();
  let service = unsafe { CStr::from_ptr(service.as_ptr()) }
    .to_string_lossy()
    .into_owned();
  Ok((host, service))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn loopback_resolves_to_v4() {
    let results = getaddrinfo("localhost", libc::AF_INET, 0);
    if let Ok(results) = results {
      assert!(results
        .iter()
        .all(|info| matches!(info.address, IpAddr::V4(_))));
    }
  }

  #[test]
  fn nameinfo_returns_some_hostname() {
    let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
    let (host, service) = getnameinfo(&addr).unwrap();
    assert!(!host.is_empty());
    assert!(!service.is_empty());
  }
}
