// Copyright 2018-2026 the jsrt authors. MIT license.

//! The substrate every jsrt subsystem builds on: the event loop and its
//! handle model, the engine contract, the shared error taxonomy, and the
//! tiered buffer pool.

pub mod buffer;
pub mod engine;
pub mod error;
pub mod event_loop;

pub use buffer::BufferPool;
pub use engine::JsEngine;
pub use engine::PromiseCapability;
pub use error::CoreError;
pub use error::SystemError;
pub use event_loop::EventLoop;
pub use event_loop::Index;
pub use event_loop::LoopHandle;
pub use event_loop::TaskResult;
pub use event_loop::TcpSocketInfo;
