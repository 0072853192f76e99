// Copyright 2018-2026 the jsrt authors. MIT license.

/// A codec failure carrying the zlib-style code name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CodecError {
  pub code: &'static str,
  pub message: String,
}

impl CodecError {
  pub fn data(message: impl Into<String>) -> Self {
    Self { code: "Z_DATA_ERROR", message: message.into() }
  }

  pub fn stream(message: impl Into<String>) -> Self {
    Self { code: "Z_STREAM_ERROR", message: message.into() }
  }

  pub fn buf(message: impl Into<String>) -> Self {
    Self { code: "Z_BUF_ERROR", message: message.into() }
  }

  pub fn range(message: impl Into<String>) -> Self {
    Self { code: "ERR_OUT_OF_RANGE", message: message.into() }
  }
}

impl From<flate2::CompressError> for CodecError {
  fn from(err: flate2::CompressError) -> Self {
    CodecError::stream(err.to_string())
  }
}

impl From<flate2::DecompressError> for CodecError {
  fn from(err: flate2::DecompressError) -> Self {
    CodecError::data(err.to_string())
  }
}
