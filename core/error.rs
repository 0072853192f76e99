// Copyright 2018-2026 the jsrt authors. MIT license.

//! The shared error taxonomy. Subsystem crates define their own
//! `thiserror` enums and convert into [`CoreError`] at the runtime
//! boundary; loop-level failures are always [`SystemError`]s carrying the
//! Node-style `{code, syscall, message, errno}` quadruple.

use std::io;

/// A loop-level failure: bind, listen, connect, read, write, lookup.
///
/// `errno` is negative, matching the sign convention of loop status
/// codes; `code` is the Node-style string (`ECONNREFUSED`, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{syscall} {code}: {message}")]
pub struct SystemError {
  pub code: &'static str,
  pub syscall: &'static str,
  pub message: String,
  pub errno: i32,
}

impl SystemError {
  pub fn new(
    syscall: &'static str,
    code: &'static str,
    message: impl Into<String>,
  ) -> Self {
    Self {
      code,
      syscall,
      message: message.into(),
      errno: 0,
    }
  }

  /// Translates an `io::Error` produced by `syscall`.
  pub fn from_io(syscall: &'static str, err: &io::Error) -> Self {
    let errno = -err.raw_os_error().unwrap_or(0);
    Self {
      code: code_for_io(err),
      syscall,
      message: err.to_string(),
      errno,
    }
  }

  /// The "handle already torn down" error shared by write paths.
  pub fn shutting_down(syscall: &'static str) -> Self {
    Self {
      code: "EPIPE",
      syscall,
      message: "stream shutting down".to_string(),
      errno: -libc::EPIPE,
    }
  }

  pub fn bad_handle(syscall: &'static str) -> Self {
    Self {
      code: "EBADF",
      syscall,
      message: "bad handle".to_string(),
      errno: -libc::EBADF,
    }
  }
}

fn code_for_io(err: &io::Error) -> &'static str {
  use io::ErrorKind::*;
  match err.kind() {
    NotFound => "ENOENT",
    PermissionDenied => "EACCES",
    ConnectionRefused => "ECONNREFUSED",
    ConnectionReset => "ECONNRESET",
    ConnectionAborted => "ECONNABORTED",
    NotConnected => "ENOTCONN",
    AddrInUse => "EADDRINUSE",
    AddrNotAvailable => "EADDRNOTAVAIL",
    BrokenPipe => "EPIPE",
    AlreadyExists => "EEXIST",
    WouldBlock => "EAGAIN",
    InvalidInput => "EINVAL",
    InvalidData => "EINVAL",
    TimedOut => "ETIMEDOUT",
    Interrupted => "EINTR",
    UnexpectedEof => "EOF",
    _ => "EUNKNOWN",
  }
}

/// Cross-crate error kinds, the shape every subsystem error maps into.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
  #[error("{0}")]
  TypeMismatch(String),
  #[error("{0}")]
  Range(String),
  #[error("{0}")]
  Reference(String),
  #[error(transparent)]
  System(#[from] SystemError),
  #[error("{0} is not implemented")]
  NotImplemented(String),
}

impl CoreError {
  pub fn type_mismatch(msg: impl Into<String>) -> Self {
    Self::TypeMismatch(msg.into())
  }

  pub fn range(msg: impl Into<String>) -> Self {
    Self::Range(msg.into())
  }

  pub fn not_implemented(what: impl Into<String>) -> Self {
    Self::NotImplemented(what.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn io_error_maps_to_node_code() {
    let err =
      io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
    let sys = SystemError::from_io("connect", &err);
    assert_eq!(sys.code, "ECONNREFUSED");
    assert_eq!(sys.syscall, "connect");
  }

  #[test]
  fn errno_is_negative() {
    let err = io::Error::from_raw_os_error(libc::ECONNRESET);
    let sys = SystemError::from_io("read", &err);
    assert_eq!(sys.errno, -libc::ECONNRESET);
    assert_eq!(sys.code, "ECONNRESET");
  }

  #[test]
  fn shutting_down_message() {
    let sys = SystemError::shutting_down("write");
    assert_eq!(sys.message, "stream shutting down");
    assert_eq!(sys.code, "EPIPE");
  }
}
