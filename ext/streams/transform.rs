// Copyright 2018-2026 the jsrt authors. MIT license.

//! Transform and PassThrough: a duplex whose readable output is a
//! function of its writable input, via the `transform`/`flush` hooks.

use std::rc::Rc;

use crate::error::StreamError;
use crate::options::StreamOptions;
use crate::stream::Chunk;
use crate::stream::Stream;
use crate::stream::WriteSink;

/// The `_transform`/`_flush` pair. `transform` runs per accepted chunk
/// and may push zero or more output chunks through `out`; `flush` runs
/// once after the writable side ends and may push the tail.
pub trait TransformHooks {
  fn transform(
    &mut self,
    chunk: &Chunk,
    out: &mut dyn FnMut(Chunk),
  ) -> Result<(), StreamError>;

  fn flush(&mut self, _out: &mut dyn FnMut(Chunk)) -> Result<(), StreamError> {
    Ok(())
  }
}

/// Identity hooks; what PassThrough runs on.
pub struct IdentityHooks;

impl TransformHooks for IdentityHooks {
  fn transform(
    &mut self,
    chunk: &Chunk,
    out: &mut dyn FnMut(Chunk),
  ) -> Result<(), StreamError> {
    out(chunk.clone());
    Ok(())
  }
}

struct TransformSink {
  hooks: Box<dyn TransformHooks>,
}

impl WriteSink for TransformSink {
  fn write(
    &mut self,
    stream: &Stream,
    chunk: &Chunk,
  ) -> Result<(), StreamError> {
    let mut push = |out: Chunk| {
      stream.push(Some(out));
    };
    self.hooks.transform(chunk, &mut push)
  }

  fn finish(&mut self, stream: &Stream) -> Result<(), StreamError> {
    let mut push = |out: Chunk| {
      stream.push(Some(out));
    };
    self.hooks.flush(&mut push)?;
    // The readable side ends once the flushed tail is out.
    stream.push(None);
    Ok(())
  }
}

/// Builds a Transform stream from a hook implementation.
pub fn transform(
  options: StreamOptions,
  hooks: Box<dyn TransformHooks>,
) -> Rc<Stream> {
  let stream = Stream::duplex_without_sink(options);
  stream.install_sink(Box::new(TransformSink { hooks }));
  stream
}

/// A Transform with the identity hook.
pub fn pass_through(options: StreamOptions) -> Rc<Stream> {
  transform(options, Box::new(IdentityHooks))
}
