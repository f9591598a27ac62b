//! Classifies requests into resource classes and picks a caching strategy.

use color_eyre::Result;
use serde::Deserialize;
use std::fmt;
use url::Url;

use crate::config::AgentConfig;
use crate::http::{Method, Request, RequestMode};
use crate::identity::normalize_url;

/// One predicate of the dynamic-content pattern list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DynamicPattern {
  /// Host name, including its subdomains
  Host(String),
  /// URL starts with the given prefix
  Prefix(String),
  /// URL contains the given text
  Contains(String),
  /// Path ends with one of the extensions (without the dot)
  Extension(Vec<String>),
}

impl DynamicPattern {
  fn matches(&self, url: &Url) -> bool {
    match self {
      DynamicPattern::Host(host) => url.host_str().is_some_and(|h| {
        let h = h.to_ascii_lowercase();
        let host = host.to_ascii_lowercase();
        h == host || h.ends_with(&format!(".{}", host))
      }),
      DynamicPattern::Prefix(prefix) => url.as_str().starts_with(prefix.as_str()),
      DynamicPattern::Contains(needle) => url.as_str().contains(needle.as_str()),
      DynamicPattern::Extension(extensions) => {
        let path = url.path().to_ascii_lowercase();
        extensions.iter().any(|ext| {
          let ext = ext.trim_start_matches('.').to_ascii_lowercase();
          path.ends_with(&format!(".{}", ext))
        })
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  Navigation,
  Static,
  Dynamic,
  Api,
  Default,
}

impl fmt::Display for ResourceClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ResourceClass::Navigation => "navigation",
      ResourceClass::Static => "static",
      ResourceClass::Dynamic => "dynamic",
      ResourceClass::Api => "api",
      ResourceClass::Default => "default",
    };
    f.write_str(name)
  }
}

/// The strategy a request is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Static assets
  CacheFirst,
  /// Navigations: network, exact cache match, offline document
  NetworkFirstDocument,
  /// Dynamic content: network, cache, 404 marker
  NetworkFirstContent,
  /// API reads: network, cache, 503
  NetworkFirstApi,
  /// Non-GET: network, queue mutations on failure
  NetworkOrQueue,
  /// Unclassified GETs
  PassThrough,
}

pub struct Router {
  /// Normalized absolute manifest URLs
  manifest_urls: Vec<String>,
  /// Manifest entries as written, for substring matching
  manifest_entries: Vec<String>,
  dynamic_patterns: Vec<DynamicPattern>,
  api_segment: String,
}

impl Router {
  pub fn new(config: &AgentConfig) -> Result<Self> {
    Ok(Self {
      manifest_urls: config.precache_urls()?,
      manifest_entries: config.precache.clone(),
      dynamic_patterns: config.dynamic_patterns.clone(),
      api_segment: config.api_segment.clone(),
    })
  }

  /// Resource class of a request, judged by mode and URL alone.
  pub fn classify(&self, request: &Request) -> ResourceClass {
    if request.mode == RequestMode::Navigate {
      return ResourceClass::Navigation;
    }

    let Ok(normalized) = normalize_url(&request.url) else {
      return ResourceClass::Default;
    };

    if self.is_static(&normalized) {
      return ResourceClass::Static;
    }

    if let Ok(url) = Url::parse(&normalized) {
      if self.dynamic_patterns.iter().any(|p| p.matches(&url)) {
        return ResourceClass::Dynamic;
      }
    }

    if !self.api_segment.is_empty() && normalized.contains(&self.api_segment) {
      return ResourceClass::Api;
    }

    ResourceClass::Default
  }

  /// Pick the strategy. Only GET is eligible for cache reads.
  pub fn route(&self, request: &Request) -> (ResourceClass, Strategy) {
    let class = self.classify(request);
    if request.method != Method::Get {
      return (class, Strategy::NetworkOrQueue);
    }

    let strategy = match class {
      ResourceClass::Navigation => Strategy::NetworkFirstDocument,
      ResourceClass::Static => Strategy::CacheFirst,
      ResourceClass::Dynamic => Strategy::NetworkFirstContent,
      ResourceClass::Api => Strategy::NetworkFirstApi,
      ResourceClass::Default => Strategy::PassThrough,
    };
    (class, strategy)
  }

  fn is_static(&self, normalized: &str) -> bool {
    if self.manifest_urls.iter().any(|u| u == normalized) {
      return true;
    }
    // "/" would match everything as a substring
    self
      .manifest_entries
      .iter()
      .filter(|entry| entry.as_str() != "/" && !entry.is_empty())
      .any(|entry| normalized.contains(entry.as_str()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn router() -> Router {
    let config = AgentConfig {
      origin: "https://app.test/".to_string(),
      precache: vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "/assets/app.js".to_string(),
        "/fonts/inter.woff2".to_string(),
      ],
      dynamic_patterns: vec![
        DynamicPattern::Host("fonts.gstatic.com".to_string()),
        DynamicPattern::Prefix("https://api.app.test/".to_string()),
        DynamicPattern::Extension(vec!["png".to_string(), "jpg".to_string()]),
      ],
      ..AgentConfig::default()
    };
    Router::new(&config).unwrap()
  }

  #[test]
  fn test_navigation_wins_over_everything() {
    let request = Request::navigate("https://app.test/assets/app.js");
    assert_eq!(router().classify(&request), ResourceClass::Navigation);
  }

  #[test]
  fn test_static_exact_and_substring() {
    let router = router();
    assert_eq!(
      router.classify(&Request::get("https://app.test/")),
      ResourceClass::Static
    );
    assert_eq!(
      router.classify(&Request::get("https://app.test/assets/app.js")),
      ResourceClass::Static
    );
    assert_eq!(
      router.classify(&Request::get("https://cdn.app.test/fonts/inter.woff2")),
      ResourceClass::Static
    );
  }

  #[test]
  fn test_root_entry_is_not_a_substring_match() {
    assert_eq!(
      router().classify(&Request::get("https://app.test/about")),
      ResourceClass::Default
    );
  }

  #[test]
  fn test_dynamic_patterns() {
    let router = router();
    assert_eq!(
      router.classify(&Request::get("https://fonts.gstatic.com/s/inter.woff")),
      ResourceClass::Dynamic
    );
    assert_eq!(
      router.classify(&Request::get("https://cdn.fonts.gstatic.com/x")),
      ResourceClass::Dynamic
    );
    assert_eq!(
      router.classify(&Request::get("https://app.test/img/avatar.PNG")),
      ResourceClass::Dynamic
    );
  }

  #[test]
  fn test_dynamic_beats_api() {
    // API host prefix is a dynamic pattern, so it never reaches the api class
    assert_eq!(
      router().classify(&Request::get("https://api.app.test/api/users")),
      ResourceClass::Dynamic
    );
  }

  #[test]
  fn test_api_segment() {
    assert_eq!(
      router().classify(&Request::get("https://app.test/api/resumes/1")),
      ResourceClass::Api
    );
  }

  #[test]
  fn test_non_get_always_goes_to_queue_path() {
    let router = router();
    let post = Request::new(Method::Post, "https://app.test/assets/app.js");
    assert_eq!(router.route(&post).1, Strategy::NetworkOrQueue);

    let delete = Request::new(Method::Delete, "https://app.test/api/resumes/1");
    assert_eq!(router.route(&delete), (ResourceClass::Api, Strategy::NetworkOrQueue));
  }

  #[test]
  fn test_get_routes() {
    let router = router();
    assert_eq!(
      router.route(&Request::navigate("https://app.test/editor")).1,
      Strategy::NetworkFirstDocument
    );
    assert_eq!(
      router.route(&Request::get("https://app.test/assets/app.js")).1,
      Strategy::CacheFirst
    );
    assert_eq!(
      router.route(&Request::get("https://app.test/img/a.jpg")).1,
      Strategy::NetworkFirstContent
    );
    assert_eq!(
      router.route(&Request::get("https://app.test/api/x")).1,
      Strategy::NetworkFirstApi
    );
    assert_eq!(
      router.route(&Request::get("https://elsewhere.test/page")).1,
      Strategy::PassThrough
    );
  }

  #[test]
  fn test_unparseable_url_is_default() {
    assert_eq!(
      router().classify(&Request::get("::nope::")),
      ResourceClass::Default
    );
  }
}
