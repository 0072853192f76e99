// Copyright 2018-2026 the jsrt authors. MIT license.

//! Node-style streams: the Readable/Writable state machine, Duplex
//! composition, Transform/PassThrough, piping with backpressure, and
//! the `finished`/`pipeline` helpers.

mod error;
mod options;
pub mod promises;
mod stream;
mod transform;
mod util;


pub use error::StreamError;
pub use options::StreamOptions;
pub use options::DEFAULT_HIGH_WATER_MARK;
pub use options::OBJECT_MODE_HIGH_WATER_MARK;
pub use stream::Chunk;
pub use stream::NullSink;
pub use stream::Stream;
pub use stream::WriteCompletion;
pub use stream::WriteSink;
pub use transform::pass_through;
pub use transform::transform;
pub use transform::IdentityHooks;
pub use transform::TransformHooks;
pub use util::finished;
pub use util::pipeline;
