// Copyright 2018-2026 the jsrt authors. MIT license.

//! Streaming codecs: Transform adapters over the context pump.
//! `_transform` is the NO_FLUSH incremental step; `_flush` finishes the
//! stream and pushes the tail.

use std::rc::Rc;

use bytes::Bytes;
use jsrt_streams::transform;
use jsrt_streams::Chunk;
use jsrt_streams::Stream;
use jsrt_streams::StreamError;
use jsrt_streams::StreamOptions;
use jsrt_streams::TransformHooks;

use crate::context::resolve_auto;
use crate::context::Mode;
use crate::context::ZlibContext;
use crate::error::CodecError;
use crate::options::Format;
use crate::options::ZlibOptions;

fn codec_stream_error(err: CodecError) -> StreamError {
  StreamError::Sink(err.to_string())
}

struct CodecTransform {
  mode: Mode,
  format: Format,
  options: ZlibOptions,
  ctx: Option<ZlibContext>,
  /// AutoDetect only: bytes held until the container is identifiable.
  sniff: Vec<u8>,
  /// The codec reached stream end (inflate can hit it mid-transform).
  ended: bool,
}

impl CodecTransform {
  fn new(
    mode: Mode,
    format: Format,
    options: ZlibOptions,
  ) -> Result<Self, CodecError> {
    options.validate()?;
    let ctx = if format == Format::AutoDetect {
      None
    } else {
      Some(ZlibContext::acquire(mode, options.clone(), format)?)
    };
    Ok(Self { mode, format, options, ctx, sniff: Vec::new(), ended: false })
  }

  fn ensure_ctx(&mut self, prefix: &[u8]) -> Result<(), CodecError> {
    if self.ctx.is_none() {
      let format = resolve_auto(self.format, prefix);
      self.ctx =
        Some(ZlibContext::acquire(self.mode, self.options.clone(), format)?);
    }
    Ok(())
  }

  fn run(
    &mut self,
    data: &[u8],
    finish: bool,
    out: &mut dyn FnMut(Chunk),
  ) -> Result<(), CodecError> {
    self.ensure_ctx(data)?;
    let ctx = self.ctx.as_mut().unwrap();
    let ended = ctx.pump(data, finish, &mut |piece| {
      out(Chunk::Bytes(Bytes::copy_from_slice(piece)));
    })?;
    self.ended = ended;
    Ok(())
  }
}

impl TransformHooks for CodecTransform {
  fn transform(
    &mut self,
    chunk: &Chunk,
    out: &mut dyn FnMut(Chunk),
  ) -> Result<(), StreamError> {
    let bytes = chunk
      .as_bytes()
      .ok_or_else(|| StreamError::Sink("expected a byte chunk".to_string()))?;
    if self.ended {
      // Trailing bytes after stream end are dropped.
      return Ok(());
    }

    // AutoDetect needs two bytes before the container is known.
    if self.ctx.is_none() {
      self.sniff.extend_from_slice(bytes);
      if self.sniff.len() < 2 {
        return Ok(());
      }
      let held = std::mem::take(&mut self.sniff);
      return self.run(&held, false, out).map_err(codec_stream_error);
    }

    self.run(bytes, false, out).map_err(codec_stream_error)
  }

  fn flush(&mut self, out: &mut dyn FnMut(Chunk)) -> Result<(), StreamError> {
    let result = if self.ended {
      Ok(())
    } else {
      let held = std::mem::take(&mut self.sniff);
      self.run(&held, true, out).map_err(codec_stream_error)
    };
    if let Some(ctx) = self.ctx.take() {
      ctx.release();
    }
    result
  }
}

fn codec_stream(
  mode: Mode,
  format: Format,
  options: ZlibOptions,
) -> Result<Rc<Stream>, CodecError> {
  let hooks = CodecTransform::new(mode, format, options.clone())?;
  let stream_options = StreamOptions::with_high_water_mark(options.chunk_size);
  Ok(transform(stream_options, Box::new(hooks)))
}

pub fn create_gzip(options: ZlibOptions) -> Result<Rc<Stream>, CodecError> {
  codec_stream(Mode::Deflate, Format::Gzip, options)
}

pub fn create_gunzip(options: ZlibOptions) -> Result<Rc<Stream>, CodecError> {
  codec_stream(Mode::Inflate, Format::Gzip, options)
}

pub fn create_deflate(options: ZlibOptions) -> Result<Rc<Stream>, CodecError> {
  codec_stream(Mode::Deflate, Format::Deflate, options)
}

pub fn create_inflate(options: ZlibOptions) -> Result<Rc<Stream>, CodecError> {
  codec_stream(Mode::Inflate, Format::Deflate, options)
}

pub fn create_deflate_raw(
  options: ZlibOptions,
) -> Result<Rc<Stream>, CodecError> {
  codec_stream(Mode::Deflate, Format::Raw, options)
}

pub fn create_inflate_raw(
  options: ZlibOptions,
) -> Result<Rc<Stream>, CodecError> {
  codec_stream(Mode::Inflate, Format::Raw, options)
}

/// Inflate with container sniffing.
pub fn create_unzip(options: ZlibOptions) -> Result<Rc<Stream>, CodecError> {
  codec_stream(Mode::Inflate, Format::AutoDetect, options)
}
