// Copyright 2018-2026 the jsrt authors. MIT license.

//! HTTP-module configuration, read once from the environment into an
//! explicit struct that is passed around (no process-wide mutable
//! state). Every string field is owned.

use std::time::Duration;

pub const DEFAULT_ALLOWED_DOMAINS: [&str; 5] = [
  "esm.run",
  "esm.sh",
  "cdn.skypack.dev",
  "cdn.jsdelivr.net",
  "unpkg.com",
];

pub const DEFAULT_MAX_MODULE_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_USER_AGENT: &str = "jsrt/1.0";
pub const DEFAULT_CACHE_SIZE: usize = 100;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct HttpConfig {
  pub enabled: bool,
  pub https_only: bool,
  pub allowed_domains: Vec<String>,
  pub max_module_size: usize,
  pub timeout: Duration,
  pub user_agent: String,
  pub cache_size: usize,
  pub cache_ttl: Duration,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      https_only: true,
      allowed_domains: DEFAULT_ALLOWED_DOMAINS
        .iter()
        .map(|domain| domain.to_string())
        .collect(),
      max_module_size: DEFAULT_MAX_MODULE_SIZE,
      timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
      user_agent: DEFAULT_USER_AGENT.to_string(),
      cache_size: DEFAULT_CACHE_SIZE,
      cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
    }
  }
}

impl HttpConfig {
  pub fn from_env() -> Self {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Environment-independent constructor, used by `from_env` and the
  /// tests.
  pub fn from_lookup<F>(lookup: F) -> Self
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();

    if let Some(enabled) = lookup("JSRT_HTTP_MODULES_ENABLED") {
      match enabled.as_str() {
        "1" | "true" => config.enabled = true,
        "0" | "false" => config.enabled = false,
        _ => {}
      }
    }
    if let Some(https_only) = lookup("JSRT_HTTP_MODULES_HTTPS_ONLY") {
      if https_only == "0" || https_only == "false" {
        config.https_only = false;
      }
    }
    if let Some(allowed) = lookup("JSRT_HTTP_MODULES_ALLOWED") {
      config.allowed_domains = parse_domain_list(&allowed);
    }
    if let Some(max_size) = lookup("JSRT_HTTP_MODULES_MAX_SIZE") {
      if let Ok(max_size) = max_size.parse() {
        config.max_module_size = max_size;
      }
    }
    if let Some(timeout) = lookup("JSRT_HTTP_MODULES_TIMEOUT") {
      if let Ok(secs) = timeout.parse() {
        config.timeout = Duration::from_secs(secs);
      }
    }
    if let Some(user_agent) = lookup("JSRT_HTTP_MODULES_USER_AGENT") {
      config.user_agent = user_agent;
    }
    if let Some(cache_size) = lookup("JSRT_HTTP_MODULES_CACHE_SIZE") {
      match cache_size.parse() {
        Ok(0) | Err(_) => {}
        Ok(size) => config.cache_size = size,
      }
    }
    if let Some(ttl) = lookup("JSRT_HTTP_MODULES_CACHE_TTL") {
      if let Ok(secs) = ttl.parse() {
        config.cache_ttl = Duration::from_secs(secs);
      }
    }
    config
  }
}

fn parse_domain_list(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|domain| !domain.is_empty())
    .map(str::to_string)
    .collect()
}
