// Copyright 2018-2026 the jsrt authors. MIT license.

//! HTTP module loading: environment-driven config, a security gate, a
//! TTL-bounded LRU cache, a one-shot blocking fetch, the ESM/CommonJS
//! loader, and relative-import resolution.

mod cache;
mod config;
mod fetch;
mod loader;
mod resolve;
mod security;

pub use cache::CacheStats;
pub use cache::HttpCache;
pub use cache::HttpCacheEntry;
pub use config::HttpConfig;
pub use config::DEFAULT_ALLOWED_DOMAINS;
pub use fetch::FetchError;
pub use fetch::FetchedModule;
pub use loader::load_http_module;
pub use loader::require_http_module;
pub use loader::wrap_commonjs_module;
pub use loader::LoaderError;
pub use resolve::resolve_relative_import;
pub use security::validate_response;
pub use security::validate_url;
pub use security::SecurityError;

#[cfg(test)]
mod tests {
  use std::io::Read;
  use std::io::Write;
  use std::net::TcpListener;
  use std::time::Duration;

  use jsrt_core::engine::testing::TestEngine;

  use super::*;

  fn test_config() -> HttpConfig {
    HttpConfig::default()
  }

  fn test_cache() -> HttpCache {
    HttpCache::new(16, Duration::from_secs(3600))
  }

  #[test]
  fn blocked_domain_never_reaches_the_network() {
    let engine = TestEngine::new();
    let config = HttpConfig {
      allowed_domains: vec!["esm.sh".to_string()],
      ..test_config()
    };
    let mut cache = test_cache();
    let err = load_http_module(
      &engine,
      &config,
      &mut cache,
      "https://evil.test/m.js",
    )
    .unwrap_err();
    match err {
      LoaderError::Security { source, .. } => {
        assert_eq!(
          source,
          SecurityError::DomainNotAllowed("evil.test".to_string())
        );
      }
      other => panic!("expected a security error, got {other}"),
    }
    // Nothing compiled, nothing cached, and (with no server anywhere)
    // nothing fetched.
    assert!(engine.compiled_modules().is_empty());
    assert_eq!(cache.stats().entries, 0);
  }

  #[test]
  fn cache_hit_compiles_without_fetching() {
    let engine = TestEngine::new();
    let config = test_config();
    let mut cache = test_cache();
    let url = "https://esm.sh/cached.js";
    cache.put(url, b"export const cached = true;".to_vec(), None, None);

    load_http_module(&engine, &config, &mut cache, url).unwrap();
    let compiled = engine.compiled_modules();
    assert_eq!(compiled.len(), 1);
    assert_eq!(compiled[0].1, "export const cached = true;");
    assert_eq!(cache.stats().hits, 1);
  }

  #[test]
  fn require_wraps_the_cached_source_as_commonjs() {
    let engine = TestEngine::new();
    let config = test_config();
    let mut cache = test_cache();
    let url = "https://esm.sh/legacy.js";
    cache.put(url, b"module.exports = 42;".to_vec(), None, None);

    require_http_module(&engine, &config, &mut cache, url).unwrap();
    let compiled = engine.compiled_modules();
    assert_eq!(compiled.len(), 1);
    let wrapped = &compiled[0].1;
    assert!(wrapped.starts_with("const module = { exports: {} };\n"));
    assert!(wrapped.contains("const exports = module.exports;"));
    assert!(wrapped.contains("const require = globalThis.require;"));
    assert!(wrapped.contains("module.exports = 42;"));
    assert!(wrapped.trim_end().ends_with("export default module.exports;"));
  }

  /// One canned HTTP/1.1 exchange on a loopback listener.
  fn serve_once(body: &'static str, content_type: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
      let (mut stream, _) = listener.accept().unwrap();
      let mut request = [0u8; 2048];
      let _ = stream.read(&mut request);
      let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: {content_type}\r\n\
         content-length: {}\r\netag: \"v1\"\r\nconnection: close\r\n\r\n{body}",
        body.len()
      );
      stream.write_all(response.as_bytes()).unwrap();
    });
    port
  }

  #[test]
  fn fetches_validates_and_caches_a_module() {
    let port = serve_once("export default 'fetched';", "text/javascript");
    let engine = TestEngine::new();
    let config = HttpConfig {
      https_only: false,
      allowed_domains: vec!["127.0.0.1".to_string()],
      ..test_config()
    };
    let mut cache = test_cache();
    let url = format!("http://127.0.0.1:{port}/mod.js");

    load_http_module(&engine, &config, &mut cache, &url).unwrap();
    assert_eq!(engine.compiled_modules().len(), 1);

    let entry = cache.get(&url).unwrap();
    assert_eq!(entry.body, b"export default 'fetched';");
    assert_eq!(entry.etag.as_deref(), Some("\"v1\""));

    // Second load is served from the cache; the listener is gone.
    load_http_module(&engine, &config, &mut cache, &url).unwrap();
    assert_eq!(engine.compiled_modules().len(), 2);
  }

  #[test]
  fn html_content_type_is_rejected() {
    let port = serve_once("<html>not js</html>", "text/html");
    let engine = TestEngine::new();
    let config = HttpConfig {
      https_only: false,
      allowed_domains: vec!["127.0.0.1".to_string()],
      ..test_config()
    };
    let mut cache = test_cache();
    let url = format!("http://127.0.0.1:{port}/mod.js");

    let err =
      load_http_module(&engine, &config, &mut cache, &url).unwrap_err();
    assert!(matches!(
      err,
      LoaderError::Security {
        source: SecurityError::InvalidContentType(_),
        ..
      }
    ));
    assert_eq!(cache.stats().entries, 0);
  }

  #[test]
  fn non_200_status_is_a_loader_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
      let (mut stream, _) = listener.accept().unwrap();
      let mut request = [0u8; 2048];
      let _ = stream.read(&mut request);
      stream
        .write_all(
          b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\
            connection: close\r\n\r\n",
        )
        .unwrap();
    });

    let engine = TestEngine::new();
    let config = HttpConfig {
      https_only: false,
      allowed_domains: vec!["127.0.0.1".to_string()],
      ..test_config()
    };
    let mut cache = test_cache();
    let url = format!("http://127.0.0.1:{port}/missing.js");

    let err =
      load_http_module(&engine, &config, &mut cache, &url).unwrap_err();
    match err {
      LoaderError::HttpStatus { status, .. } => assert_eq!(status, 404),
      other => panic!("expected an HTTP status error, got {other}"),
    }
  }
}
