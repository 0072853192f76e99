// Copyright 2018-2026 the jsrt authors. MIT license.

//! The runtime: one per process, owning the event loop, the JS engine
//! handle, the process surface and the HTTP module loader state. Every
//! piece of configuration lives here explicitly — nothing in the
//! subsystems reads process-wide mutable state.

mod runtime;
mod timers;

pub use runtime::Runtime;
pub use runtime::RuntimeError;
pub use timers::TimerId;
pub use timers::Timers;

pub use jsrt_core::engine::JsEngine;
pub use jsrt_core::engine::PromiseCapability;
pub use jsrt_core::event_loop::LoopHandle;

// The subsystem crates, re-exported under their module names.
pub use jsrt_dns as dns;
pub use jsrt_events as events;
pub use jsrt_http_loader as http_loader;
pub use jsrt_net as net;
pub use jsrt_process as process;
pub use jsrt_streams as streams;
pub use jsrt_tty as tty;
pub use jsrt_zlib as zlib;
