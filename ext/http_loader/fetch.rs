// Copyright 2018-2026 the jsrt authors. MIT license.

//! The single synchronous GET the module loader performs. Modules are
//! fetched once and cached, which is why this — alone in the runtime —
//! is allowed to block the loop thread.

use url::Url;

use crate::config::HttpConfig;

#[derive(Debug)]
pub struct FetchedModule {
  pub status: u16,
  pub body: Vec<u8>,
  pub content_type: Option<String>,
  pub etag: Option<String>,
  pub last_modified: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("request to {url} failed: {message}")]
pub struct FetchError {
  pub url: String,
  pub message: String,
}

fn header_string(
  response: &reqwest::blocking::Response,
  name: &str,
) -> Option<String> {
  response
    .headers()
    .get(name)
    .and_then(|value| value.to_str().ok())
    .map(str::to_string)
}

/// Blocking HTTP/1.1 GET with the configured user agent and timeout.
pub fn fetch_module(
  config: &HttpConfig,
  url: &Url,
) -> Result<FetchedModule, FetchError> {
  let fetch_error = |message: String| FetchError {
    url: url.to_string(),
    message,
  };

  let client = reqwest::blocking::Client::builder()
    .timeout(config.timeout)
    .user_agent(config.user_agent.clone())
    .build()
    .map_err(|err| fetch_error(err.to_string()))?;

  log::debug!("fetching module from {url}");
  let response = client
    .get(url.clone())
    .send()
    .map_err(|err| fetch_error(err.to_string()))?;

  let status = response.status().as_u16();
  let content_type = header_string(&response, "content-type");
  let etag = header_string(&response, "etag");
  let last_modified = header_string(&response, "last-modified");

  // An over-limit Content-Length fails before the body transfers.
  if let Some(length) = response.content_length() {
    if length as usize > config.max_module_size {
      return Err(fetch_error(format!(
        "content length {length} exceeds the module size limit"
      )));
    }
  }

  let body = response
    .bytes()
    .map_err(|err| fetch_error(err.to_string()))?
    .to_vec();

  Ok(FetchedModule { status, body, content_type, etag, last_modified })
}
