// Copyright 2018-2026 the jsrt authors. MIT license.

//! Codec state and the context pool. A context owns one flate2 stream
//! configured for a concrete format; the pump loop drives it with
//! scratch buffers from the shared tiered pool.

use flate2::Compress;
use flate2::Decompress;
use flate2::FlushCompress;
use flate2::FlushDecompress;
use flate2::Status;
use jsrt_core::buffer::BufferPool;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::CodecError;
use crate::options::Format;
use crate::options::ZlibOptions;

const CONTEXT_POOL_CAPACITY: usize = 8;

static CONTEXT_POOL: Lazy<Mutex<Vec<ZlibContext>>> =
  Lazy::new(|| Mutex::new(Vec::new()));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
  Deflate,
  Inflate,
}

enum Codec {
  Deflate(Compress),
  Inflate(Decompress),
}

pub(crate) struct ZlibContext {
  codec: Codec,
  options: ZlibOptions,
}

fn make_codec(
  mode: Mode,
  options: &ZlibOptions,
  format: Format,
) -> Result<Codec, CodecError> {
  options.validate()?;
  // zlib bumps a deflate window of 8 to 9 itself; do it explicitly.
  let window_bits = options.window_bits.max(9) as u8;

  let mut codec = match (mode, format) {
    (Mode::Deflate, Format::Gzip) => {
      Codec::Deflate(Compress::new_gzip(options.compression(), window_bits))
    }
    (Mode::Deflate, Format::Deflate) => Codec::Deflate(
      Compress::new_with_window_bits(options.compression(), true, window_bits),
    ),
    (Mode::Deflate, Format::Raw) => Codec::Deflate(
      Compress::new_with_window_bits(options.compression(), false, window_bits),
    ),
    (Mode::Deflate, Format::AutoDetect) => {
      return Err(CodecError::stream("deflate cannot auto-detect a format"));
    }
    (Mode::Inflate, Format::Gzip) => {
      Codec::Inflate(Decompress::new_gzip(window_bits))
    }
    (Mode::Inflate, Format::Deflate) => {
      Codec::Inflate(Decompress::new_with_window_bits(true, window_bits))
    }
    (Mode::Inflate, Format::Raw) => {
      Codec::Inflate(Decompress::new_with_window_bits(false, window_bits))
    }
    (Mode::Inflate, Format::AutoDetect) => {
      return Err(CodecError::stream(
        "auto-detect must be resolved before initialization",
      ));
    }
  };

  if let Some(dictionary) = &options.dictionary {
    match (&mut codec, format) {
      (Codec::Deflate(compress), _) => {
        compress.set_dictionary(dictionary)?;
      }
      // Raw inflate takes the dictionary up front; the wrapped formats
      // would need the NEED_DICT handshake, which nothing here uses.
      (Codec::Inflate(decompress), Format::Raw) => {
        decompress.set_dictionary(dictionary)?;
      }
      (Codec::Inflate(_), _) => {
        return Err(CodecError::stream(
          "inflate dictionaries require a raw stream",
        ));
      }
    }
  }

  Ok(codec)
}

/// Resolves `AutoDetect` against the first bytes of the payload: the
/// gzip magic selects the gzip wrapper, anything else the zlib one.
pub(crate) fn resolve_auto(format: Format, prefix: &[u8]) -> Format {
  if format != Format::AutoDetect {
    return format;
  }
  if prefix.len() >= 2 && prefix[0] == 0x1F && prefix[1] == 0x8B {
    Format::Gzip
  } else {
    Format::Deflate
  }
}

impl ZlibContext {
  /// Pool-aware constructor; a pooled context is fully re-initialized
  /// for the new parameters.
  pub(crate) fn acquire(
    mode: Mode,
    options: ZlibOptions,
    format: Format,
  ) -> Result<Self, CodecError> {
    let recycled = CONTEXT_POOL.lock().pop();
    match recycled {
      Some(mut ctx) => {
        log::trace!("reusing pooled codec context for {format:?}");
        ctx.codec = make_codec(mode, &options, format)?;
        ctx.options = options;
        Ok(ctx)
      }
      None => {
        let codec = make_codec(mode, &options, format)?;
        Ok(ZlibContext { codec, options })
      }
    }
  }

  /// Hands the context back to the pool (bounded).
  pub(crate) fn release(self) {
    let mut pool = CONTEXT_POOL.lock();
    if pool.len() < CONTEXT_POOL_CAPACITY {
      pool.push(self);
    }
  }

  /// Drives the codec over `input`. With `finish` false this is the
  /// incremental step using the configured `flush` mode; with `finish`
  /// true the configured `finish_flush` runs the stream out. Output
  /// lands in `out` in `chunk_size` pieces. Returns whether the stream
  /// ended.
  ///
  /// `Z_BUF_ERROR` is recoverable mid-stream (more output space fixes
  /// it); a buf error with no progress on a finishing inflate means the
  /// input was truncated.
  pub(crate) fn pump(
    &mut self,
    input: &[u8],
    finish: bool,
    out: &mut dyn FnMut(&[u8]),
  ) -> Result<bool, CodecError> {
    let chunk_size = self.options.chunk_size;
    let flush_code = if finish {
      self.options.finish_flush
    } else {
      self.options.flush
    };
    let finishing = flush_code == crate::constants::Z_FINISH;
    let mut scratch = BufferPool::global().acquire(chunk_size);
    let mut consumed = 0usize;

    let result = loop {
      scratch.clear();
      let step = match &mut self.codec {
        Codec::Deflate(compress) => {
          let flush = compress_flush(flush_code);
          let before_in = compress.total_in();
          let before_out = compress.total_out();
          match compress.compress_vec(&input[consumed..], &mut scratch, flush)
          {
            Ok(status) => Ok((
              status,
              (compress.total_in() - before_in) as usize,
              (compress.total_out() - before_out) as usize,
            )),
            Err(err) => Err(CodecError::from(err)),
          }
        }
        Codec::Inflate(decompress) => {
          let flush = decompress_flush(flush_code);
          let before_in = decompress.total_in();
          let before_out = decompress.total_out();
          match decompress.decompress_vec(
            &input[consumed..],
            &mut scratch,
            flush,
          ) {
            Ok(status) => Ok((
              status,
              (decompress.total_in() - before_in) as usize,
              (decompress.total_out() - before_out) as usize,
            )),
            Err(err) => Err(CodecError::from(err)),
          }
        }
      };

      let (status, used_in, used_out) = match step {
        Ok(step) => step,
        Err(err) => break Err(err),
      };
      consumed += used_in;
      if used_out > 0 {
        out(&scratch[..used_out]);
      }

      match status {
        Status::StreamEnd => break Ok(true),
        Status::Ok | Status::BufError => {
          if used_in == 0 && used_out == 0 {
            if finishing {
              break Err(CodecError::buf("unexpected end of input"));
            }
            break Ok(false);
          }
        }
      }
    };

    BufferPool::global().release(scratch);
    result
  }
}

fn compress_flush(code: i32) -> FlushCompress {
  match code {
    crate::constants::Z_PARTIAL_FLUSH => FlushCompress::Partial,
    crate::constants::Z_SYNC_FLUSH => FlushCompress::Sync,
    crate::constants::Z_FULL_FLUSH => FlushCompress::Full,
    crate::constants::Z_FINISH => FlushCompress::Finish,
    _ => FlushCompress::None,
  }
}

fn decompress_flush(code: i32) -> FlushDecompress {
  match code {
    crate::constants::Z_SYNC_FLUSH => FlushDecompress::Sync,
    crate::constants::Z_FINISH => FlushDecompress::Finish,
    _ => FlushDecompress::None,
  }
}

/// An upper bound for one-shot deflate output, in the shape of zlib's
/// `deflateBound`.
pub(crate) fn deflate_bound(input_len: usize) -> usize {
  input_len + (input_len >> 12) + (input_len >> 14) + (input_len >> 25) + 13 + 32
}

#[cfg(test)]
pub(crate) fn pooled_contexts() -> usize {
  CONTEXT_POOL.lock().len()
}
