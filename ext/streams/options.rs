// Copyright 2018-2026 the jsrt authors. MIT license.

/// Construction-time stream options.
#[derive(Debug, Clone)]
pub struct StreamOptions {
  /// Buffered length at which `write`/`push` start reporting pressure.
  /// Bytes in byte mode, chunk count in object mode.
  pub high_water_mark: usize,
  pub object_mode: bool,
  /// When set, `data` events carry decoded strings instead of bytes.
  pub encoding: Option<String>,
  pub default_encoding: String,
  pub emit_close: bool,
  pub auto_destroy: bool,
  /// Duplex only: keep the writable side open after the readable side
  /// ends.
  pub allow_half_open: bool,
}

pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;
pub const OBJECT_MODE_HIGH_WATER_MARK: usize = 16;

impl Default for StreamOptions {
  fn default() -> Self {
    Self {
      high_water_mark: DEFAULT_HIGH_WATER_MARK,
      object_mode: false,
      encoding: None,
      default_encoding: "utf8".to_string(),
      emit_close: true,
      auto_destroy: false,
      allow_half_open: true,
    }
  }
}

impl StreamOptions {
  pub fn object_mode() -> Self {
    Self {
      high_water_mark: OBJECT_MODE_HIGH_WATER_MARK,
      object_mode: true,
      ..Self::default()
    }
  }

  pub fn with_high_water_mark(high_water_mark: usize) -> Self {
    Self { high_water_mark, ..Self::default() }
  }
}
