// Copyright 2018-2026 the jsrt authors. MIT license.

//! Promise-style variants of `finished` and `pipeline`: each call
//! settles exactly one engine promise capability.

use std::rc::Rc;

use jsrt_core::engine::PromiseCapability;
use serde_json::json;
use serde_json::Value;

use crate::stream::Stream;
use crate::util;

fn error_value(err: &Rc<dyn std::error::Error>) -> Value {
  json!({ "name": "Error", "message": err.to_string() })
}

/// Resolves when the stream reaches end-of-life, rejects with the
/// stream's error.
pub fn finished(stream: &Rc<Stream>, promise: Rc<dyn PromiseCapability>) {
  util::finished(stream, move |err| match err {
    None => promise.resolve(Value::Null),
    Some(err) => promise.reject(error_value(&err)),
  });
}

/// Pipes `streams` head-to-tail; the promise settles with the pipeline.
pub fn pipeline(
  streams: &[Rc<Stream>],
  promise: Rc<dyn PromiseCapability>,
) -> Option<Rc<Stream>> {
  util::pipeline(streams, move |err| match err {
    None => promise.resolve(Value::Null),
    Some(err) => promise.reject(error_value(&err)),
  })
}
