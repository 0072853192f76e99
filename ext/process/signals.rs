// Copyright 2018-2026 the jsrt authors. MIT license.

//! Signal name <-> number mapping and delivery.

use jsrt_core::error::SystemError;

/// Every name `process.on`/`process.kill` accept. SIGKILL and SIGSTOP
/// are listed for number lookup even though they cannot be observed.
pub const SIGNALS: &[(&str, i32)] = &[
  ("SIGHUP", libc::SIGHUP),
  ("SIGINT", libc::SIGINT),
  ("SIGQUIT", libc::SIGQUIT),
  ("SIGILL", libc::SIGILL),
  ("SIGTRAP", libc::SIGTRAP),
  ("SIGABRT", libc::SIGABRT),
  ("SIGBUS", libc::SIGBUS),
  ("SIGFPE", libc::SIGFPE),
  ("SIGKILL", libc::SIGKILL),
  ("SIGUSR1", libc::SIGUSR1),
  ("SIGUSR2", libc::SIGUSR2),
  ("SIGSEGV", libc::SIGSEGV),
  ("SIGPIPE", libc::SIGPIPE),
  ("SIGALRM", libc::SIGALRM),
  ("SIGTERM", libc::SIGTERM),
  ("SIGCHLD", libc::SIGCHLD),
  ("SIGCONT", libc::SIGCONT),
  ("SIGSTOP", libc::SIGSTOP),
  ("SIGTSTP", libc::SIGTSTP),
  ("SIGTTIN", libc::SIGTTIN),
  ("SIGTTOU", libc::SIGTTOU),
  ("SIGURG", libc::SIGURG),
  ("SIGXCPU", libc::SIGXCPU),
  ("SIGXFSZ", libc::SIGXFSZ),
  ("SIGVTALRM", libc::SIGVTALRM),
  ("SIGPROF", libc::SIGPROF),
  ("SIGWINCH", libc::SIGWINCH),
  ("SIGIO", libc::SIGIO),
  ("SIGSYS", libc::SIGSYS),
];

pub fn signal_number(name: &str) -> Option<i32> {
  SIGNALS
    .iter()
    .find(|(signal, _)| *signal == name)
    .map(|&(_, number)| number)
}

pub fn signal_name(number: i32) -> Option<&'static str> {
  SIGNALS
    .iter()
    .find(|&&(_, signal)| signal == number)
    .map(|&(name, _)| name)
}

pub fn is_signal_name(name: &str) -> bool {
  signal_number(name).is_some()
}

/// `process.kill(pid, sig)`; `sig` is a name ("SIGTERM") or a decimal
/// number.
pub fn kill(pid: i32, signal: &str) -> Result<(), SystemError> {
  let number = match signal.parse::<i32>() {
    Ok(number) => number,
    Err(_) => signal_number(signal).ok_or_else(|| {
      SystemError::new("kill", "EINVAL", format!("unknown signal: {signal}"))
    })?,
  };
  kill_raw(pid, number)
}

pub fn kill_raw(pid: i32, signum: i32) -> Result<(), SystemError> {
  use nix::sys::signal::Signal;
  use nix::unistd::Pid;

  // Signal 0 is the existence probe.
  let signal = if signum == 0 {
    None
  } else {
    Some(Signal::try_from(signum).map_err(|_| {
      SystemError::new("kill", "EINVAL", format!("unknown signal: {signum}"))
    })?)
  };
  nix::sys::signal::kill(Pid::from_raw(pid), signal).map_err(|errno| {
    let code = match errno {
      nix::errno::Errno::ESRCH => "ESRCH",
      nix::errno::Errno::EPERM => "EPERM",
      _ => "EUNKNOWN",
    };
    SystemError {
      code,
      syscall: "kill",
      message: errno.desc().to_string(),
      errno: -(errno as i32),
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn names_map_to_numbers_and_back() {
    assert_eq!(signal_number("SIGTERM"), Some(libc::SIGTERM));
    assert_eq!(signal_number("SIGWINCH"), Some(libc::SIGWINCH));
    assert_eq!(signal_name(libc::SIGINT), Some("SIGINT"));
    assert_eq!(signal_number("SIGNOPE"), None);
    assert!(is_signal_name("SIGUSR1"));
    assert!(!is_signal_name("exit"));
  }

  #[test]
  fn kill_rejects_unknown_signals() {
    let err = kill(std::process::id() as i32, "SIGNOPE").unwrap_err();
    assert_eq!(err.code, "EINVAL");
  }

  #[test]
  fn kill_zero_probes_the_process() {
    // Signal 0: existence probe, delivers nothing.
    kill(std::process::id() as i32, "0").unwrap();
  }

  #[test]
  fn kill_reports_esrch_for_dead_pids() {
    // A pid from the far end of the range is almost surely unused.
    let err = kill_raw(0x3FFF_FF00, libc::SIGTERM).unwrap_err();
    assert_eq!(err.code, "ESRCH");
  }
}
