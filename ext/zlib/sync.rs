// Copyright 2018-2026 the jsrt authors. MIT license.

//! One-shot compression/decompression.

use crate::context::deflate_bound;
use crate::context::resolve_auto;
use crate::context::Mode;
use crate::context::ZlibContext;
use crate::error::CodecError;
use crate::options::Format;
use crate::options::ZlibOptions;

/// Compresses `input` in one call. Output is sized by a deflate bound
/// up front and grown by the pump if the bound was optimistic.
pub fn deflate_sync(
  input: &[u8],
  options: &ZlibOptions,
  format: Format,
) -> Result<Vec<u8>, CodecError> {
  let mut ctx = ZlibContext::acquire(Mode::Deflate, options.clone(), format)?;
  let mut output = Vec::with_capacity(deflate_bound(input.len()));
  let result =
    ctx.pump(input, true, &mut |piece| output.extend_from_slice(piece));
  ctx.release();
  result?;
  Ok(output)
}

/// Decompresses `input` in one call, growing the output from
/// `chunk_size` as needed. Truncated input is a buf error.
pub fn inflate_sync(
  input: &[u8],
  options: &ZlibOptions,
  format: Format,
) -> Result<Vec<u8>, CodecError> {
  let format = resolve_auto(format, input);
  let mut ctx = ZlibContext::acquire(Mode::Inflate, options.clone(), format)?;
  let mut output = Vec::with_capacity(options.chunk_size);
  let result =
    ctx.pump(input, true, &mut |piece| output.extend_from_slice(piece));
  ctx.release();
  result?;
  Ok(output)
}

pub fn gzip_sync(
  input: &[u8],
  options: &ZlibOptions,
) -> Result<Vec<u8>, CodecError> {
  deflate_sync(input, options, Format::Gzip)
}

pub fn gunzip_sync(
  input: &[u8],
  options: &ZlibOptions,
) -> Result<Vec<u8>, CodecError> {
  inflate_sync(input, options, Format::Gzip)
}

pub fn deflate_raw_sync(
  input: &[u8],
  options: &ZlibOptions,
) -> Result<Vec<u8>, CodecError> {
  deflate_sync(input, options, Format::Raw)
}

pub fn inflate_raw_sync(
  input: &[u8],
  options: &ZlibOptions,
) -> Result<Vec<u8>, CodecError> {
  inflate_sync(input, options, Format::Raw)
}

/// Inflate with container sniffing (gzip or zlib).
pub fn unzip_sync(
  input: &[u8],
  options: &ZlibOptions,
) -> Result<Vec<u8>, CodecError> {
  inflate_sync(input, options, Format::AutoDetect)
}
