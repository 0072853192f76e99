// Copyright 2018-2026 the jsrt authors. MIT license.

//! The module loader: security gate -> cache probe -> fetch -> content
//! validation -> cache put -> engine compile. `load_http_module`
//! compiles ESM; `require_http_module` evaluates through the CommonJS
//! wrapper.

use jsrt_core::engine::EngineError;
use jsrt_core::engine::JsEngine;
use jsrt_core::engine::ModuleId;
use serde_json::Value;

use crate::cache::HttpCache;
use crate::config::HttpConfig;
use crate::fetch::fetch_module;
use crate::fetch::FetchError;
use crate::security::validate_response;
use crate::security::validate_url;
use crate::security::SecurityError;

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
  #[error("failed to load module from {url}: {source}")]
  Security {
    url: String,
    #[source]
    source: SecurityError,
  },
  #[error("failed to load module from {url}: HTTP {status}")]
  HttpStatus { url: String, status: u16 },
  #[error(transparent)]
  Fetch(#[from] FetchError),
  #[error(transparent)]
  Engine(#[from] EngineError),
}

/// The literal CommonJS preamble wrapped around fetched sources.
pub fn wrap_commonjs_module(source: &str) -> String {
  format!(
    "const module = {{ exports: {{}} }};\n\
     const exports = module.exports;\n\
     const require = globalThis.require;\n\
     \n{source}\n\
     export default module.exports;\n"
  )
}

fn security_gate(
  config: &HttpConfig,
  url: &str,
) -> Result<url::Url, LoaderError> {
  validate_url(config, url).map_err(|source| LoaderError::Security {
    url: url.to_string(),
    source,
  })
}

/// Runs the gate/cache/fetch pipeline and returns the module source.
fn module_source(
  config: &HttpConfig,
  cache: &mut HttpCache,
  url: &str,
) -> Result<String, LoaderError> {
  let parsed = security_gate(config, url)?;

  if let Some(entry) = cache.get(url) {
    log::debug!("module cache hit for {url}");
    return Ok(String::from_utf8_lossy(&entry.body).into_owned());
  }

  let response = fetch_module(config, &parsed)?;
  if response.status != 200 {
    return Err(LoaderError::HttpStatus {
      url: url.to_string(),
      status: response.status,
    });
  }
  validate_response(config, response.content_type.as_deref(), response.body.len())
    .map_err(|source| LoaderError::Security { url: url.to_string(), source })?;

  let source = String::from_utf8_lossy(&response.body).into_owned();
  cache.put(url, response.body, response.etag, response.last_modified);
  Ok(source)
}

/// Loads `url` as an ES module and hands it to the engine to compile.
pub fn load_http_module(
  engine: &dyn JsEngine,
  config: &HttpConfig,
  cache: &mut HttpCache,
  url: &str,
) -> Result<ModuleId, LoaderError> {
  let source = module_source(config, cache, url)?;
  Ok(engine.compile_module(url, &source)?)
}

/// Loads `url` as a CommonJS module: the fetched source is wrapped in
/// the module/exports/require preamble and evaluated.
pub fn require_http_module(
  engine: &dyn JsEngine,
  config: &HttpConfig,
  cache: &mut HttpCache,
  url: &str,
) -> Result<Value, LoaderError> {
  let source = module_source(config, cache, url)?;
  let wrapped = wrap_commonjs_module(&source);
  Ok(engine.eval_module(url, &wrapped)?)
}
