// Copyright 2018-2026 the jsrt authors. MIT license.

//! The zlib subsystem: synchronous one-shot calls, async variants over
//! the worker pool, streaming Transforms, context/buffer pooling,
//! constants and checksums.

mod async_ops;
mod checksum;
pub mod constants;
mod context;
mod error;
mod options;
mod stream;
mod sync;


pub use async_ops::deflate;
pub use async_ops::inflate;
pub use checksum::adler32;
pub use checksum::crc32;
pub use error::CodecError;
pub use options::Format;
pub use options::ZlibOptions;
pub use stream::create_deflate;
pub use stream::create_deflate_raw;
pub use stream::create_gunzip;
pub use stream::create_gzip;
pub use stream::create_inflate;
pub use stream::create_inflate_raw;
pub use stream::create_unzip;
pub use sync::deflate_raw_sync;
pub use sync::deflate_sync;
pub use sync::gunzip_sync;
pub use sync::gzip_sync;
pub use sync::inflate_raw_sync;
pub use sync::inflate_sync;
pub use sync::unzip_sync;
