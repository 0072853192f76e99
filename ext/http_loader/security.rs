// Copyright 2018-2026 the jsrt authors. MIT license.

//! The security gate in front of the module loader: protocol policy,
//! domain allowlist, and response validation. All checks are pure; no
//! request is issued for a URL that fails here.

use url::Url;

use crate::config::HttpConfig;

const ALLOWED_CONTENT_TYPES: [&str; 5] = [
  "application/javascript",
  "text/javascript",
  "application/ecmascript",
  "text/ecmascript",
  "text/plain",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
  #[error("HTTP module loading is disabled or protocol not allowed")]
  ProtocolForbidden,
  #[error("domain not allowed: {0}")]
  DomainNotAllowed(String),
  #[error("invalid URL format: {0}")]
  InvalidUrl(String),
  #[error("module too large: {size} bytes (limit {limit})")]
  SizeTooLarge { size: usize, limit: usize },
  #[error("invalid content type: {0}")]
  InvalidContentType(String),
}

pub fn is_http_url(url: &str) -> bool {
  url.starts_with("http://") || url.starts_with("https://")
}

/// Validates a module URL against the policy. Returns the parsed URL so
/// callers never re-parse.
pub fn validate_url(
  config: &HttpConfig,
  url: &str,
) -> Result<Url, SecurityError> {
  if !is_http_url(url) {
    return Err(SecurityError::InvalidUrl(url.to_string()));
  }
  if !config.enabled {
    return Err(SecurityError::ProtocolForbidden);
  }
  if config.https_only && !url.starts_with("https://") {
    return Err(SecurityError::ProtocolForbidden);
  }

  let parsed =
    Url::parse(url).map_err(|_| SecurityError::InvalidUrl(url.to_string()))?;
  let domain = parsed
    .host_str()
    .ok_or_else(|| SecurityError::InvalidUrl(url.to_string()))?;

  if !config.allowed_domains.iter().any(|allowed| allowed == domain) {
    return Err(SecurityError::DomainNotAllowed(domain.to_string()));
  }
  Ok(parsed)
}

/// Validates a fetched response: body size against the limit, and the
/// content type against the JavaScript types. A missing content type is
/// permitted — plenty of CDNs omit it.
pub fn validate_response(
  config: &HttpConfig,
  content_type: Option<&str>,
  size: usize,
) -> Result<(), SecurityError> {
  if size > config.max_module_size {
    return Err(SecurityError::SizeTooLarge {
      size,
      limit: config.max_module_size,
    });
  }
  let Some(content_type) = content_type else {
    return Ok(());
  };
  if ALLOWED_CONTENT_TYPES.iter().any(|allowed| content_type.contains(allowed))
  {
    Ok(())
  } else {
    Err(SecurityError::InvalidContentType(content_type.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn test_config() -> HttpConfig {
    HttpConfig::default()
  }

  #[test]
  fn default_cdns_pass() {
    let config = test_config();
    for domain in crate::config::DEFAULT_ALLOWED_DOMAINS {
      assert!(validate_url(&config, &format!("https://{domain}/mod.js")).is_ok());
    }
  }

  #[test]
  fn unlisted_domain_is_rejected_without_any_request() {
    let config = HttpConfig {
      allowed_domains: vec!["esm.sh".to_string()],
      ..test_config()
    };
    let err = validate_url(&config, "https://evil.test/m.js").unwrap_err();
    assert_eq!(err, SecurityError::DomainNotAllowed("evil.test".to_string()));
  }

  #[test]
  fn https_only_rejects_plain_http() {
    let config = test_config();
    let err = validate_url(&config, "http://esm.sh/mod.js").unwrap_err();
    assert_eq!(err, SecurityError::ProtocolForbidden);

    let relaxed = HttpConfig { https_only: false, ..test_config() };
    assert!(validate_url(&relaxed, "http://esm.sh/mod.js").is_ok());
  }

  #[test]
  fn disabled_loader_rejects_everything() {
    let config = HttpConfig { enabled: false, ..test_config() };
    let err = validate_url(&config, "https://esm.sh/mod.js").unwrap_err();
    assert_eq!(err, SecurityError::ProtocolForbidden);
  }

  #[test]
  fn non_http_schemes_are_invalid() {
    let config = test_config();
    assert!(matches!(
      validate_url(&config, "file:///etc/passwd"),
      Err(SecurityError::InvalidUrl(_))
    ));
    assert!(matches!(
      validate_url(&config, "not a url"),
      Err(SecurityError::InvalidUrl(_))
    ));
  }

  #[test]
  fn content_type_gate() {
    let config = test_config();
    for ok in [
      Some("application/javascript"),
      Some("text/javascript; charset=utf-8"),
      Some("text/plain"),
      None,
    ] {
      assert!(validate_response(&config, ok, 10).is_ok(), "{ok:?}");
    }
    let err =
      validate_response(&config, Some("text/html"), 10).unwrap_err();
    assert_eq!(
      err,
      SecurityError::InvalidContentType("text/html".to_string())
    );
  }

  #[test]
  fn oversized_body_is_rejected() {
    let config = HttpConfig { max_module_size: 16, ..test_config() };
    let err = validate_response(&config, None, 17).unwrap_err();
    assert_eq!(err, SecurityError::SizeTooLarge { size: 17, limit: 16 });
  }
}
