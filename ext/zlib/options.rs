// Copyright 2018-2026 the jsrt authors. MIT license.

use crate::constants;
use crate::error::CodecError;

/// Compression format selector. `AutoDetect` (inflate only) sniffs the
/// gzip magic and falls back to the zlib wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
  Deflate,
  Gzip,
  Raw,
  AutoDetect,
}

#[derive(Debug, Clone)]
pub struct ZlibOptions {
  /// -1 (engine default) through 9.
  pub level: i32,
  /// 8..=15; the format adjusts it on the wire (gzip +16, raw negated).
  pub window_bits: i32,
  /// 1..=9. Accepted and validated; the backend keeps its own tuning.
  pub mem_level: i32,
  pub strategy: i32,
  /// Output granularity for streaming and the inflate growth start.
  pub chunk_size: usize,
  pub flush: i32,
  pub finish_flush: i32,
  pub dictionary: Option<Vec<u8>>,
}

impl Default for ZlibOptions {
  fn default() -> Self {
    Self {
      level: constants::Z_DEFAULT_COMPRESSION,
      window_bits: constants::Z_DEFAULT_WINDOWBITS,
      mem_level: constants::Z_DEFAULT_MEMLEVEL,
      strategy: constants::Z_DEFAULT_STRATEGY,
      chunk_size: constants::Z_DEFAULT_CHUNK,
      flush: constants::Z_NO_FLUSH,
      finish_flush: constants::Z_FINISH,
      dictionary: None,
    }
  }
}

impl ZlibOptions {
  pub fn with_level(level: i32) -> Self {
    Self { level, ..Self::default() }
  }

  pub fn validate(&self) -> Result<(), CodecError> {
    if self.level < -1 || self.level > 9 {
      return Err(CodecError::range("level must be between -1 and 9"));
    }
    if self.window_bits.abs() < 8 || self.window_bits.abs() > 15 {
      return Err(CodecError::range("windowBits must be between 8 and 15"));
    }
    if self.mem_level < 1 || self.mem_level > 9 {
      return Err(CodecError::range("memLevel must be between 1 and 9"));
    }
    if !matches!(
      self.strategy,
      constants::Z_DEFAULT_STRATEGY
        | constants::Z_FILTERED
        | constants::Z_HUFFMAN_ONLY
        | constants::Z_RLE
        | constants::Z_FIXED
    ) {
      return Err(CodecError::range("invalid strategy"));
    }
    if self.chunk_size == 0 {
      return Err(CodecError::range("chunkSize must be positive"));
    }
    for flush in [self.flush, self.finish_flush] {
      if !(constants::Z_NO_FLUSH..=constants::Z_TREES).contains(&flush) {
        return Err(CodecError::range("invalid flush mode"));
      }
    }
    Ok(())
  }

  pub(crate) fn compression(&self) -> flate2::Compression {
    match self.level {
      constants::Z_DEFAULT_COMPRESSION => flate2::Compression::default(),
      level => flate2::Compression::new(level as u32),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_validate() {
    assert!(ZlibOptions::default().validate().is_ok());
  }

  #[test]
  fn out_of_range_level_is_rejected() {
    let err = ZlibOptions::with_level(10).validate().unwrap_err();
    assert_eq!(err.code, "ERR_OUT_OF_RANGE");
  }

  #[test]
  fn out_of_range_window_bits_is_rejected() {
    let options = ZlibOptions { window_bits: 7, ..Default::default() };
    assert!(options.validate().is_err());
    let options = ZlibOptions { window_bits: 16, ..Default::default() };
    assert!(options.validate().is_err());
  }

  #[test]
  fn zero_chunk_size_is_rejected() {
    let options = ZlibOptions { chunk_size: 0, ..Default::default() };
    assert!(options.validate().is_err());
  }
}
