// Copyright 2018-2026 the jsrt authors. MIT license.

/// Stream misuse and sink failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
  #[error("write after end")]
  WriteAfterEnd,
  #[error("stream destroyed")]
  Destroyed,
  #[error("stream is not readable")]
  NotReadable,
  #[error("stream is not writable")]
  NotWritable,
  #[error("unknown encoding: {0}")]
  InvalidEncoding(String),
  #[error("{0}")]
  Sink(String),
}
