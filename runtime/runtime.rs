// Copyright 2018-2026 the jsrt authors. MIT license.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use jsrt_core::engine::JsEngine;
use jsrt_core::engine::ModuleId;
use jsrt_core::error::CoreError;
use jsrt_core::error::SystemError;
use jsrt_core::event_loop::EventLoop;
use jsrt_core::event_loop::LoopHandle;
use jsrt_events::EventEmitter;
use jsrt_http_loader::HttpCache;
use jsrt_http_loader::HttpConfig;
use jsrt_http_loader::LoaderError;
use jsrt_http_loader::SecurityError;
use jsrt_process::Process;
use jsrt_streams::StreamError;
use jsrt_zlib::CodecError;
use serde_json::Value;

use crate::timers::Timers;

/// The size of the worker pool backing `queue_work` (async zlib, DNS).
const WORKER_POOL_THREADS: usize = 4;

/// The cross-subsystem error shape, the runtime-boundary union of the
/// per-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  #[error(transparent)]
  Core(#[from] CoreError),
  #[error(transparent)]
  System(#[from] SystemError),
  #[error(transparent)]
  Security(#[from] SecurityError),
  #[error(transparent)]
  Loader(#[from] LoaderError),
  #[error(transparent)]
  Stream(#[from] StreamError),
  #[error(transparent)]
  Codec(#[from] CodecError),
}

pub struct Runtime {
  event_loop: EventLoop,
  handle: LoopHandle,
  engine: Rc<dyn JsEngine>,
  process: Process,
  timers: Timers,
  http_config: HttpConfig,
  http_cache: RefCell<HttpCache>,
}

impl Runtime {
  /// Builds a runtime with configuration read from the environment.
  pub fn new(engine: Rc<dyn JsEngine>) -> io::Result<Self> {
    Self::with_config(engine, HttpConfig::from_env())
  }

  pub fn with_config(
    engine: Rc<dyn JsEngine>,
    http_config: HttpConfig,
  ) -> io::Result<Self> {
    let event_loop = EventLoop::new(WORKER_POOL_THREADS)?;
    let handle = event_loop.handle();
    let process = Process::new(&handle);
    let timers = Timers::new(&handle);
    let http_cache = RefCell::new(HttpCache::new(
      http_config.cache_size,
      http_config.cache_ttl,
    ));
    Ok(Runtime {
      event_loop,
      handle,
      engine,
      process,
      timers,
      http_config,
      http_cache,
    })
  }

  pub fn handle(&self) -> LoopHandle {
    self.handle.clone()
  }

  pub fn engine(&self) -> &Rc<dyn JsEngine> {
    &self.engine
  }

  pub fn process(&self) -> &Process {
    &self.process
  }

  pub fn timers(&self) -> &Timers {
    &self.timers
  }

  pub fn http_config(&self) -> &HttpConfig {
    &self.http_config
  }

  pub fn cache_stats(&self) -> jsrt_http_loader::CacheStats {
    self.http_cache.borrow().stats()
  }

  /// Loads a URL as an ES module through the gate/cache/fetch pipeline.
  pub fn load_module(&self, url: &str) -> Result<ModuleId, RuntimeError> {
    let mut cache = self.http_cache.borrow_mut();
    Ok(jsrt_http_loader::load_http_module(
      self.engine.as_ref(),
      &self.http_config,
      &mut cache,
      url,
    )?)
  }

  /// Loads a URL as a CommonJS module (wrapped and evaluated).
  pub fn require_module(&self, url: &str) -> Result<Value, RuntimeError> {
    let mut cache = self.http_cache.borrow_mut();
    Ok(jsrt_http_loader::require_http_module(
      self.engine.as_ref(),
      &self.http_config,
      &mut cache,
      url,
    )?)
  }

  pub fn resolve_import(
    &self,
    base_url: &str,
    specifier: &str,
  ) -> Result<String, RuntimeError> {
    Ok(jsrt_http_loader::resolve_relative_import(base_url, specifier)?)
  }

  /// Routes an emitter's unhandled errors (stream errors, listener
  /// failures) into the process uncaught-exception path.
  pub fn install_uncaught_hook(&self, emitter: &EventEmitter) {
    let process = self.process.clone();
    emitter.set_uncaught_hook(Rc::new(move |err| {
      process.handle_uncaught_exception(err);
    }));
  }

  /// Drives the loop to quiescence, firing `beforeExit` (which may
  /// revive the loop) and finally `exit`. Returns the exit code.
  pub fn run(&mut self) -> i32 {
    loop {
      self.event_loop.run();
      if self.process.exiting() {
        break;
      }
      let had_listeners = self.process.emit_before_exit();
      if !had_listeners || !self.event_loop.has_pending_events() {
        break;
      }
    }
    self.process.emit_exit();
    self.process.exit_code()
  }

  /// One cooperative tick, for embedders that interleave their own
  /// work with the loop.
  pub fn tick(&mut self) {
    self.event_loop.tick();
  }

  pub fn has_pending_events(&self) -> bool {
    self.event_loop.has_pending_events()
  }
}
