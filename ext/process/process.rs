// Copyright 2018-2026 the jsrt authors. MIT license.

//! The process object: an EventEmitter routing signals, IPC messages,
//! warnings, uncaught exceptions and rejections, plus the static
//! process facts (pid, platform, timers).

use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error;
use std::io::Write;
use std::rc::Rc;
use std::time::Instant;

use jsrt_core::error::SystemError;
use jsrt_core::event_loop::Index;
use jsrt_core::event_loop::LoopHandle;
use jsrt_events::EventEmitter;
use jsrt_events::EventValue;
use jsrt_events::ListenerId;
use jsrt_events::ListenerResult;
use serde_json::json;
use serde_json::Value;

use crate::ipc::has_ipc_channel;
use crate::ipc::ProcessIpc;
use crate::ipc::IPC_FD;
use crate::signals;

type CaptureCallback = Box<dyn Fn(Rc<dyn Error>)>;

struct ProcessState {
  exit_code: i32,
  exiting: bool,
  capture: Option<CaptureCallback>,
  signal_watchers: HashMap<i32, Index>,
  started_at: Instant,
}

pub struct ProcessInner {
  handle: LoopHandle,
  emitter: Rc<EventEmitter>,
  state: RefCell<ProcessState>,
  ipc: RefCell<Option<ProcessIpc>>,
}

#[derive(Clone)]
pub struct Process {
  inner: Rc<ProcessInner>,
}

impl Process {
  /// Builds the process surface. When fd 3 is open at startup it
  /// becomes the IPC channel to the parent.
  pub fn new(handle: &LoopHandle) -> Self {
    let process = Self::without_ipc(handle);
    if has_ipc_channel() {
      match ProcessIpc::start_with_fd(
        handle,
        process.inner.emitter.clone(),
        IPC_FD,
      ) {
        Ok(ipc) => *process.inner.ipc.borrow_mut() = Some(ipc),
        Err(err) => log::debug!("IPC channel setup failed: {err}"),
      }
    }
    process
  }

  pub fn without_ipc(handle: &LoopHandle) -> Self {
    Process {
      inner: Rc::new(ProcessInner {
        handle: handle.clone(),
        emitter: Rc::new(EventEmitter::new()),
        state: RefCell::new(ProcessState {
          exit_code: 0,
          exiting: false,
          capture: None,
          signal_watchers: HashMap::new(),
          started_at: Instant::now(),
        }),
        ipc: RefCell::new(None),
      }),
    }
  }

  pub fn emitter(&self) -> &EventEmitter {
    &self.inner.emitter
  }

  /// `process.on`: signal names additionally arm a loop signal watcher
  /// the first time they are listened for.
  pub fn on<F>(&self, event: &str, f: F) -> Result<ListenerId, SystemError>
  where
    F: FnMut(&[EventValue]) -> ListenerResult + 'static,
  {
    if event == "uncaughtException"
      && self.inner.state.borrow().capture.is_some()
    {
      return Err(SystemError::new(
        "on",
        "ERR_CAPTURE_ALREADY_SET",
        "an uncaught exception capture callback is already installed",
      ));
    }
    if let Some(signum) = signals::signal_number(event) {
      self.ensure_signal_watcher(event, signum)?;
    }
    Ok(self.inner.emitter.on(event, f))
  }

  pub fn off(&self, event: &str, id: ListenerId) {
    self.inner.emitter.off(event, id);
    if let Some(signum) = signals::signal_number(event) {
      if self.inner.emitter.listener_count(event) == 0 {
        self.stop_signal_watcher(signum);
      }
    }
  }

  fn ensure_signal_watcher(
    &self,
    event: &str,
    signum: i32,
  ) -> Result<(), SystemError> {
    if self.inner.state.borrow().signal_watchers.contains_key(&signum) {
      return Ok(());
    }
    let emitter = self.inner.emitter.clone();
    let name = event.to_string();
    let watcher = self.inner.handle.signal_start(signum, move |_, _| {
      emitter.emit(&name, &[EventValue::Str(name.clone())]);
    })?;
    self
      .inner
      .state
      .borrow_mut()
      .signal_watchers
      .insert(signum, watcher);
    Ok(())
  }

  fn stop_signal_watcher(&self, signum: i32) {
    let watcher =
      self.inner.state.borrow_mut().signal_watchers.remove(&signum);
    if let Some(watcher) = watcher {
      self.inner.handle.signal_stop(watcher);
    }
  }

  pub fn kill(&self, pid: i32, signal: &str) -> Result<(), SystemError> {
    signals::kill(pid, signal)
  }

  // IPC surface.

  pub fn connected(&self) -> bool {
    self
      .inner
      .ipc
      .borrow()
      .as_ref()
      .map(|ipc| ipc.connected())
      .unwrap_or(false)
  }

  pub fn send(&self, value: &Value) -> Result<(), SystemError> {
    match self.inner.ipc.borrow().as_ref() {
      Some(ipc) => ipc.send(value),
      None => Err(SystemError::new(
        "write",
        "ERR_IPC_CHANNEL_CLOSED",
        "Channel closed",
      )),
    }
  }

  pub fn disconnect(&self) {
    if let Some(ipc) = self.inner.ipc.borrow().as_ref() {
      ipc.disconnect();
    }
  }

  #[doc(hidden)]
  pub fn adopt_ipc_fd(&self, fd: i32) -> Result<(), SystemError> {
    let ipc = ProcessIpc::start_with_fd(
      &self.inner.handle,
      self.inner.emitter.clone(),
      fd,
    )?;
    *self.inner.ipc.borrow_mut() = Some(ipc);
    Ok(())
  }

  // Event routing.

  /// `process.emitWarning`. With no `warning` listener the formatted
  /// text goes to stderr.
  pub fn emit_warning(
    &self,
    message: &str,
    warning_type: Option<&str>,
    code: Option<&str>,
  ) {
    let mut warning = json!({
      "name": warning_type.unwrap_or("Warning"),
      "message": message,
    });
    if let Some(code) = code {
      warning["code"] = json!(code);
    }
    if self.inner.emitter.listener_count("warning") > 0 {
      self.inner.emitter.emit("warning", &[EventValue::Json(warning)]);
    } else {
      let _ = writeln!(std::io::stderr(), "(node) Warning: {message}");
    }
  }

  /// Installs (or clears) the capture callback that bypasses the
  /// `uncaughtException` event path. Installing one while event
  /// listeners exist is an error.
  pub fn set_uncaught_exception_capture_callback(
    &self,
    callback: Option<CaptureCallback>,
  ) -> Result<(), SystemError> {
    if callback.is_some()
      && self.inner.emitter.listener_count("uncaughtException") > 0
    {
      return Err(SystemError::new(
        "setUncaughtExceptionCaptureCallback",
        "ERR_CAPTURE_ALREADY_SET",
        "uncaughtException listeners are already installed",
      ));
    }
    self.inner.state.borrow_mut().capture = callback;
    Ok(())
  }

  pub fn has_uncaught_exception_capture_callback(&self) -> bool {
    self.inner.state.borrow().capture.is_some()
  }

  /// Routes an uncaught exception: the monitor always sees it first;
  /// then the capture callback or the event path consumes it. With no
  /// consumer the error prints and the process is flagged to terminate
  /// non-zero.
  pub fn handle_uncaught_exception(&self, err: Rc<dyn Error>) {
    self.inner.emitter.emit(
      "uncaughtExceptionMonitor",
      &[EventValue::Error(err.clone())],
    );

    let captured = {
      let state = self.inner.state.borrow();
      if let Some(capture) = &state.capture {
        capture(err.clone());
        true
      } else {
        false
      }
    };
    if captured {
      return;
    }

    let handled = self
      .inner
      .emitter
      .emit("uncaughtException", &[EventValue::Error(err.clone())]);
    if !handled {
      let _ = writeln!(std::io::stderr(), "Uncaught {err}");
      let mut state = self.inner.state.borrow_mut();
      state.exit_code = 1;
      state.exiting = true;
    }
  }

  /// Routes an unhandled promise rejection; with no listener a warning
  /// is printed.
  pub fn handle_unhandled_rejection(&self, reason: Value, promise_id: u64) {
    let handled = self.inner.emitter.emit(
      "unhandledRejection",
      &[EventValue::Json(reason.clone()), EventValue::Int(promise_id as i64)],
    );
    if !handled {
      let _ = writeln!(
        std::io::stderr(),
        "(node) UnhandledPromiseRejectionWarning: {reason}"
      );
    }
  }

  pub fn handle_rejection_handled(&self, promise_id: u64) {
    self
      .inner
      .emitter
      .emit("rejectionHandled", &[EventValue::Int(promise_id as i64)]);
  }

  /// Fires `beforeExit` with the pending code; returns whether any
  /// listener ran (which may have scheduled more work).
  pub fn emit_before_exit(&self) -> bool {
    let code = self.exit_code();
    self.inner.emitter.emit("beforeExit", &[EventValue::Int(code as i64)])
  }

  /// Fires `exit` during shutdown.
  pub fn emit_exit(&self) {
    let code = {
      let mut state = self.inner.state.borrow_mut();
      state.exiting = true;
      state.exit_code
    };
    self.inner.emitter.emit("exit", &[EventValue::Int(code as i64)]);
  }

  // Process facts.

  pub fn exit_code(&self) -> i32 {
    self.inner.state.borrow().exit_code
  }

  pub fn set_exit_code(&self, code: i32) {
    self.inner.state.borrow_mut().exit_code = code;
  }

  pub fn exiting(&self) -> bool {
    self.inner.state.borrow().exiting
  }

  /// `process.exit(code)`: flags the runtime to stop after the current
  /// turn. `beforeExit` is skipped on an explicit exit.
  pub fn exit(&self, code: i32) {
    let mut state = self.inner.state.borrow_mut();
    state.exit_code = code;
    state.exiting = true;
  }

  pub fn pid(&self) -> i32 {
    std::process::id() as i32
  }

  pub fn ppid(&self) -> i32 {
    unsafe { libc::getppid() }
  }

  pub fn platform(&self) -> &'static str {
    if cfg!(target_os = "macos") {
      "darwin"
    } else if cfg!(target_os = "windows") {
      "win32"
    } else {
      "linux"
    }
  }

  pub fn arch(&self) -> &'static str {
    if cfg!(target_arch = "aarch64") {
      "arm64"
    } else if cfg!(target_arch = "x86_64") {
      "x64"
    } else {
      std::env::consts::ARCH
    }
  }

  /// Monotonic nanoseconds since process start.
  pub fn hrtime(&self) -> u64 {
    self.inner.state.borrow().started_at.elapsed().as_nanos() as u64
  }

  /// Seconds the process has been running.
  pub fn uptime(&self) -> f64 {
    self.inner.state.borrow().started_at.elapsed().as_secs_f64()
  }
}
