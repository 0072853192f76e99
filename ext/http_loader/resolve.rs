// Copyright 2018-2026 the jsrt authors. MIT license.

//! Relative-import resolution for HTTP modules. `./` and `../`
//! specifiers resolve against the base URL's directory with full
//! multi-level `../` normalisation; walking past the origin root is
//! refused rather than clamped.

use url::Url;

use crate::security::is_http_url;
use crate::security::SecurityError;

/// Resolves `specifier` against `base_url`. Absolute http(s) URLs pass
/// through untouched; bare specifiers are returned as-is for other
/// resolvers to handle.
pub fn resolve_relative_import(
  base_url: &str,
  specifier: &str,
) -> Result<String, SecurityError> {
  if is_http_url(specifier) {
    return Ok(specifier.to_string());
  }
  if !specifier.starts_with("./") && !specifier.starts_with("../") {
    return Ok(specifier.to_string());
  }

  let base = Url::parse(base_url)
    .map_err(|_| SecurityError::InvalidUrl(base_url.to_string()))?;

  // Depth accounting: a `..` beyond the base directory would escape the
  // origin root.
  let base_depth = base
    .path_segments()
    .map(|segments| {
      let segments: Vec<&str> =
        segments.filter(|segment| !segment.is_empty()).collect();
      segments.len().saturating_sub(1)
    })
    .unwrap_or(0);
  let mut depth = base_depth as i64;
  for segment in specifier.split('/') {
    match segment {
      "" | "." => {}
      ".." => {
        depth -= 1;
        if depth < 0 {
          return Err(SecurityError::InvalidUrl(format!(
            "{specifier} escapes the origin root of {base_url}"
          )));
        }
      }
      _ => depth += 1,
    }
  }

  let resolved = base
    .join(specifier)
    .map_err(|_| SecurityError::InvalidUrl(specifier.to_string()))?;
  Ok(resolved.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  const BASE: &str = "https://esm.sh/pkg/v1/lib/mod.js";

  #[test]
  fn absolute_urls_pass_through() {
    let resolved =
      resolve_relative_import(BASE, "https://unpkg.com/other.js").unwrap();
    assert_eq!(resolved, "https://unpkg.com/other.js");
  }

  #[test]
  fn sibling_import_joins_the_directory() {
    let resolved = resolve_relative_import(BASE, "./util.js").unwrap();
    assert_eq!(resolved, "https://esm.sh/pkg/v1/lib/util.js");
  }

  #[test]
  fn single_parent_traversal() {
    let resolved = resolve_relative_import(BASE, "../shared.js").unwrap();
    assert_eq!(resolved, "https://esm.sh/pkg/v1/shared.js");
  }

  #[test]
  fn multi_level_parent_traversal() {
    let resolved = resolve_relative_import(BASE, "../../core/index.js").unwrap();
    assert_eq!(resolved, "https://esm.sh/pkg/core/index.js");
  }

  #[test]
  fn interior_dotdot_segments_normalise() {
    let resolved =
      resolve_relative_import(BASE, "./a/../b/./c.js").unwrap();
    assert_eq!(resolved, "https://esm.sh/pkg/v1/lib/b/c.js");
  }

  #[test]
  fn escaping_the_origin_root_is_refused() {
    let err =
      resolve_relative_import(BASE, "../../../../etc.js").unwrap_err();
    assert!(matches!(err, SecurityError::InvalidUrl(_)));
  }

  #[test]
  fn bare_specifiers_are_left_alone() {
    let resolved = resolve_relative_import(BASE, "lodash").unwrap();
    assert_eq!(resolved, "lodash");
  }
}
