// Copyright 2018-2026 the jsrt authors. MIT license.

//! Async variants over the worker pool. The input is copied up front —
//! the caller's buffer is never pinned for the worker's lifetime — and
//! the worker builds its own pooled context.

use jsrt_core::event_loop::LoopHandle;

use crate::error::CodecError;
use crate::options::Format;
use crate::options::ZlibOptions;
use crate::sync::deflate_sync;
use crate::sync::inflate_sync;

type CodecResult = Result<Vec<u8>, CodecError>;

fn queue_codec_work<F, W>(handle: &LoopHandle, worker: W, cb: F)
where
  W: FnOnce() -> CodecResult + Send + 'static,
  F: FnOnce(CodecResult) + 'static,
{
  handle.queue_work(
    move || {
      let result = worker();
      Ok(Box::new(result) as Box<dyn std::any::Any + Send>)
    },
    move |_, outcome| {
      let result = *outcome
        .expect("codec worker reports failures through its own result")
        .downcast::<CodecResult>()
        .unwrap();
      cb(result);
    },
  );
}

/// Async deflate; the completion callback runs on the loop thread with
/// `(err, output)` semantics.
pub fn deflate<F>(
  handle: &LoopHandle,
  input: &[u8],
  options: &ZlibOptions,
  format: Format,
  cb: F,
) where
  F: FnOnce(CodecResult) + 'static,
{
  let input = input.to_vec();
  let options = options.clone();
  queue_codec_work(handle, move || deflate_sync(&input, &options, format), cb);
}

/// Async inflate.
pub fn inflate<F>(
  handle: &LoopHandle,
  input: &[u8],
  options: &ZlibOptions,
  format: Format,
  cb: F,
) where
  F: FnOnce(CodecResult) + 'static,
{
  let input = input.to_vec();
  let options = options.clone();
  queue_codec_work(handle, move || inflate_sync(&input, &options, format), cb);
}
