//! Caching strategies that sit between the host application and the network.

use color_eyre::Result;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::ResponseSource;
use crate::config::AgentConfig;
use crate::http::{Request, Response};
use crate::identity::RequestIdentity;
use crate::network::{fetch_with_timeout, NetworkError};
use crate::router::Strategy;
use crate::state::AgentState;
use crate::sync::OfflineQueue;

const STATIC_MISS_BODY: &str = "Resource not available offline";
const DYNAMIC_MISS_BODY: &str = "Content not available offline";
const OFFLINE_PAGE_BODY: &str = "<!doctype html><title>Offline</title><h1>You are offline</h1>";

/// Executes the caching strategy chosen for a request.
///
/// Cache writes only happen after a fetch has fully completed, so dropping
/// the future returned by [`CacheLayer::handle`] never leaves a partial entry.
#[derive(Clone)]
pub struct CacheLayer {
  config: Arc<AgentConfig>,
  state: Arc<AgentState>,
  queue: OfflineQueue,
}

impl CacheLayer {
  pub fn new(config: Arc<AgentConfig>, state: Arc<AgentState>) -> Self {
    let queue = OfflineQueue::new(state.clone());
    Self {
      config,
      state,
      queue,
    }
  }

  /// Run `strategy` for `request`.
  ///
  /// Network failures and cache misses resolve to a response; only storage
  /// failures surface as errors.
  pub async fn handle(&self, request: &Request, strategy: Strategy) -> Result<Response> {
    if strategy == Strategy::NetworkOrQueue {
      return self.network_or_queue(request).await;
    }

    let identity = match RequestIdentity::of(request, &self.config.vary_headers) {
      Ok(identity) => identity,
      Err(e) => {
        warn!("Rejecting request: {}", e);
        return Ok(Response::synthesized(400, "text/plain", e.to_string()));
      }
    };

    match strategy {
      Strategy::CacheFirst => self.cache_first(request, &identity).await,
      Strategy::NetworkFirstDocument => self.network_first_document(request, &identity).await,
      Strategy::NetworkFirstContent => {
        self
          .network_first(request, &identity, || {
            Response::synthesized(404, "text/plain", DYNAMIC_MISS_BODY)
          })
          .await
      }
      Strategy::NetworkFirstApi => {
        self
          .network_first(request, &identity, || {
            let body = json!({"error": "offline", "message": DYNAMIC_MISS_BODY});
            Response::synthesized(503, "application/json", body.to_string())
          })
          .await
      }
      Strategy::PassThrough => self.pass_through(request, &identity).await,
      Strategy::NetworkOrQueue => self.network_or_queue(request).await,
    }
  }

  async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetworkError> {
    fetch_with_timeout(
      self.state.network.as_ref(),
      request,
      self.config.network_timeout(),
    )
    .await
  }

  fn cache_match(&self, identity: &RequestIdentity) -> Result<Option<Response>> {
    let names = self.state.active()?.names();
    Ok(
      self
        .state
        .caches
        .match_any(&names, identity)?
        .map(|entry| entry.to_response()),
    )
  }

  /// Store in the dynamic cache when the response is a 200 of known, bounded size.
  fn store_dynamic(&self, identity: &RequestIdentity, response: &Response) -> Result<()> {
    if response.status != 200 {
      return Ok(());
    }

    match response.content_length() {
      Some(length) if length <= self.config.max_dynamic_bytes => {
        let cache_name = self.state.active()?.dynamic_cache;
        self.state.caches.put(&cache_name, identity, response)
      }
      Some(length) => {
        debug!(url = %identity.url(), length, "response too large to cache");
        Ok(())
      }
      None => {
        debug!(url = %identity.url(), "response size unknown, not caching");
        Ok(())
      }
    }
  }

  /// Static assets: serve from cache without touching the network.
  ///
  /// Precached entries carry no variant, so they answer every variant of
  /// their URL.
  async fn cache_first(&self, request: &Request, identity: &RequestIdentity) -> Result<Response> {
    if let Some(cached) = self.cache_match(identity)? {
      debug!(url = %request.url, "cache hit");
      return Ok(cached);
    }
    let plain = RequestIdentity::of(request, &[])?;
    if plain != *identity {
      if let Some(cached) = self.cache_match(&plain)? {
        debug!(url = %request.url, "cache hit (unvaried)");
        return Ok(cached);
      }
    }

    match self.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          let cache_name = self.state.active()?.static_cache;
          self.state.caches.put(&cache_name, identity, &response)?;
        }
        Ok(response)
      }
      Err(e) => {
        debug!(url = %request.url, "static asset unavailable: {}", e);
        Ok(Response::synthesized(404, "text/plain", STATIC_MISS_BODY))
      }
    }
  }

  /// Navigations: network, then exact cache match, then the offline document.
  async fn network_first_document(
    &self,
    request: &Request,
    identity: &RequestIdentity,
  ) -> Result<Response> {
    let network_response = match self.fetch(request).await {
      Ok(response) if response.status == 200 => {
        let cache_name = self.state.active()?.dynamic_cache;
        self.state.caches.put(&cache_name, identity, &response)?;
        return Ok(response);
      }
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "navigation failed upstream");
        Some(response)
      }
      Err(e) => {
        debug!(url = %request.url, "navigation offline: {}", e);
        None
      }
    };

    if let Some(cached) = self.cache_match(identity)? {
      return Ok(cached);
    }

    let fallback_url = self.config.resolve(&self.config.offline_fallback)?;
    let fallback = RequestIdentity::of(&Request::get(fallback_url), &self.config.vary_headers)?;
    if let Some(page) = self.cache_match(&fallback)? {
      return Ok(page.with_source(ResponseSource::OfflineFallback));
    }

    // Only reachable before the static generation is installed
    warn!("offline fallback document is not cached");
    Ok(network_response
      .unwrap_or_else(|| Response::synthesized(503, "text/html", OFFLINE_PAGE_BODY)))
  }

  /// Dynamic content and API reads: network, then cache, then `on_miss`.
  async fn network_first<F>(
    &self,
    request: &Request,
    identity: &RequestIdentity,
    on_miss: F,
  ) -> Result<Response>
  where
    F: FnOnce() -> Response,
  {
    match self.fetch(request).await {
      Ok(response) if response.is_ok() => {
        self.store_dynamic(identity, &response)?;
        Ok(response)
      }
      Ok(response) => Ok(self.cache_match(identity)?.unwrap_or(response)),
      Err(e) => {
        debug!(url = %request.url, "falling back to cache: {}", e);
        Ok(self.cache_match(identity)?.unwrap_or_else(on_miss))
      }
    }
  }

  /// Unclassified GETs: network, cache on failure, else 503.
  async fn pass_through(&self, request: &Request, identity: &RequestIdentity) -> Result<Response> {
    match self.fetch(request).await {
      Ok(response) => Ok(response),
      Err(e) => {
        debug!(url = %request.url, "pass-through offline: {}", e);
        Ok(self.cache_match(identity)?.unwrap_or_else(|| {
          Response::synthesized(503, "text/plain", "Service unavailable offline")
        }))
      }
    }
  }

  /// Non-GET requests: never read from cache; queue mutations that cannot be sent.
  async fn network_or_queue(&self, request: &Request) -> Result<Response> {
    let error = match self.fetch(request).await {
      Ok(response) => return Ok(response),
      Err(e) => e,
    };

    if !request.method.is_mutating() {
      debug!(url = %request.url, method = %request.method, "offline: {}", error);
      return Ok(Response::synthesized(
        503,
        "text/plain",
        "Service unavailable offline",
      ));
    }

    let queued = self.queue.enqueue(request)?;
    let body = json!({
      "success": false,
      "queued": true,
      "id": queued.id,
      "message": "Request queued until the network is back",
    });
    Ok(
      Response::synthesized(202, "application/json", body.to_string())
        .with_source(ResponseSource::Queued),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::http::{Headers, Method};
  use crate::lifecycle::Lifecycle;
  use crate::network::stub::StubNetwork;
  use crate::router::Router;

  struct Fixture {
    config: Arc<AgentConfig>,
    network: Arc<StubNetwork>,
    state: Arc<AgentState>,
    layer: CacheLayer,
    router: Router,
  }

  impl Fixture {
    async fn get(&self, request: Request) -> Response {
      let (_, strategy) = self.router.route(&request);
      self.layer.handle(&request, strategy).await.unwrap()
    }

    async fn install(&self) {
      Lifecycle::new(&self.config, &self.state)
        .install()
        .await
        .unwrap();
    }
  }

  fn fixture() -> Fixture {
    fixture_with(Vec::new())
  }

  fn fixture_with(vary_headers: Vec<String>) -> Fixture {
    let config = Arc::new(AgentConfig {
      vary_headers,
      origin: "https://app.test/".to_string(),
      precache: vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "/app.js".to_string(),
      ],
      dynamic_patterns: vec![crate::router::DynamicPattern::Extension(vec![
        "png".to_string(),
      ])],
      max_dynamic_bytes: 100,
      ..AgentConfig::default()
    });
    let network = Arc::new(StubNetwork::new());
    network.respond("https://app.test/", 200, "<html>shell</html>");
    network.respond("https://app.test/offline.html", 200, "<html>offline</html>");
    network.respond("https://app.test/app.js", 200, "app()");

    let state = Arc::new(
      AgentState::new(&config, Database::open_in_memory().unwrap(), network.clone()).unwrap(),
    );
    Fixture {
      layer: CacheLayer::new(config.clone(), state.clone()),
      router: Router::new(&config).unwrap(),
      config,
      network,
      state,
    }
  }

  fn sized(body: &str) -> Response {
    Response::new(
      200,
      Headers::new().with("content-length", body.len().to_string()),
      body,
    )
  }

  #[tokio::test]
  async fn test_cache_first_hits_network_once() {
    let f = fixture();
    let url = "https://app.test/assets/app.js";
    f.network.respond(url, 200, "app()");

    for _ in 0..3 {
      let response = f.get(Request::get(url)).await;
      assert_eq!(response.body, b"app()");
    }
    assert_eq!(f.network.call_count(url), 1);
  }

  #[tokio::test]
  async fn test_cache_first_miss_offline_is_404_marker() {
    let f = fixture();
    f.network.set_online(false);

    let response = f.get(Request::get("https://app.test/app.js")).await;
    assert_eq!(response.status, 404);
    assert_eq!(response.text(), STATIC_MISS_BODY);
  }

  #[tokio::test]
  async fn test_cache_first_serves_precached_shell_offline() {
    let f = fixture();
    f.install().await;
    f.network.set_online(false);

    let response = f.get(Request::get("https://app.test/app.js")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_precached_shell_survives_vary_headers() {
    let f = fixture_with(vec!["accept-language".to_string()]);
    f.install().await;
    f.network.set_online(false);

    let bare = f.get(Request::get("https://app.test/app.js")).await;
    assert_eq!(bare.status, 200);
    assert_eq!(bare.source, ResponseSource::Cache);

    let localized = f
      .get(Request::get("https://app.test/app.js").with_header("accept-language", "fr"))
      .await;
    assert_eq!(localized.source, ResponseSource::Cache);
    assert_eq!(localized.text(), "app()");

    let page = f
      .get(Request::navigate("https://app.test/never-seen").with_header("accept-language", "fr"))
      .await;
    assert_eq!(page.source, ResponseSource::OfflineFallback);
    assert_eq!(page.text(), "<html>offline</html>");
  }

  #[tokio::test]
  async fn test_navigation_prefers_network_and_caches() {
    let f = fixture();
    f.install().await;
    let url = "https://app.test/editor";
    f.network.respond(url, 200, "<html>editor</html>");

    let response = f.get(Request::navigate(url)).await;
    assert_eq!(response.source, ResponseSource::Network);

    let identity = RequestIdentity::for_get(url).unwrap();
    assert!(f.state.caches.get("dynamic-v1", &identity).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_navigation_offline_uses_exact_cached_page() {
    let f = fixture();
    f.install().await;
    let url = "https://app.test/editor";
    f.network.respond(url, 200, "<html>editor</html>");
    f.get(Request::navigate(url)).await;

    f.network.set_online(false);
    let response = f.get(Request::navigate(url)).await;
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.text(), "<html>editor</html>");
  }

  #[tokio::test]
  async fn test_navigation_offline_falls_back_to_offline_document() {
    let f = fixture();
    f.install().await;
    f.network.set_online(false);

    let response = f.get(Request::navigate("https://app.test/never-seen")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.source, ResponseSource::OfflineFallback);
    assert_eq!(response.text(), "<html>offline</html>");
  }

  #[tokio::test]
  async fn test_navigation_server_error_falls_back() {
    let f = fixture();
    f.install().await;
    f.network.respond("https://app.test/broken", 500, "oops");

    let response = f.get(Request::navigate("https://app.test/broken")).await;
    assert_eq!(response.source, ResponseSource::OfflineFallback);
  }

  #[tokio::test]
  async fn test_dynamic_size_guard() {
    let f = fixture();
    let small = "https://app.test/small.png";
    let large = "https://app.test/large.png";
    f.network.respond_with(small, sized("tiny"));
    f.network.respond_with(large, sized(&"x".repeat(101)));

    let response = f.get(Request::get(large)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body.len(), 101);
    f.get(Request::get(small)).await;

    let caches = &f.state.caches;
    assert!(caches
      .get("dynamic-v1", &RequestIdentity::for_get(large).unwrap())
      .unwrap()
      .is_none());
    assert!(caches
      .get("dynamic-v1", &RequestIdentity::for_get(small).unwrap())
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_dynamic_without_content_length_is_not_cached() {
    let f = fixture();
    let url = "https://app.test/chunked.png";
    f.network.respond(url, 200, "data");

    f.get(Request::get(url)).await;
    let identity = RequestIdentity::for_get(url).unwrap();
    assert!(f.state.caches.get("dynamic-v1", &identity).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_dynamic_offline_serves_cache_then_404() {
    let f = fixture();
    let url = "https://app.test/avatar.png";
    f.network.respond_with(url, sized("png"));
    f.get(Request::get(url)).await;

    f.network.set_online(false);
    let cached = f.get(Request::get(url)).await;
    assert_eq!(cached.source, ResponseSource::Cache);

    let missing = f.get(Request::get("https://app.test/other.png")).await;
    assert_eq!(missing.status, 404);
    assert_eq!(missing.text(), DYNAMIC_MISS_BODY);
  }

  #[tokio::test]
  async fn test_api_get_offline_miss_is_503() {
    let f = fixture();
    f.network.set_online(false);

    let response = f.get(Request::get("https://app.test/api/resumes")).await;
    assert_eq!(response.status, 503);
  }

  #[tokio::test]
  async fn test_api_get_non_ok_without_cache_returns_real_response() {
    let f = fixture();
    f.network.respond("https://app.test/api/missing", 404, "not found");

    let response = f.get(Request::get("https://app.test/api/missing")).await;
    assert_eq!(response.status, 404);
    assert_eq!(response.source, ResponseSource::Network);
  }

  #[tokio::test]
  async fn test_offline_mutation_is_queued_with_202() {
    let f = fixture();
    f.network.set_online(false);

    let request = Request::new(Method::Post, "https://app.test/api/resumes")
      .with_header("content-type", "application/json")
      .with_body(r#"{"title":"CV"}"#);
    let response = f.get(request).await;

    assert_eq!(response.status, 202);
    assert_eq!(response.source, ResponseSource::Queued);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["queued"], json!(true));

    let queued = f.state.queue.list().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].body.as_deref(), Some(&br#"{"title":"CV"}"#[..]));
  }

  #[tokio::test]
  async fn test_online_mutation_returns_server_response_even_on_error() {
    let f = fixture();
    f.network.respond("https://app.test/api/resumes", 500, "boom");

    let response = f
      .get(Request::new(Method::Post, "https://app.test/api/resumes"))
      .await;
    assert_eq!(response.status, 500);
    assert!(f.state.queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_mutation_is_never_served_from_cache() {
    let f = fixture();
    f.install().await;
    f.network.set_online(false);

    // app.js is cached, but a PUT to it must not be answered from cache
    let response = f
      .get(Request::new(Method::Put, "https://app.test/app.js").with_body("x"))
      .await;
    assert_eq!(response.status, 202);
  }

  #[tokio::test]
  async fn test_default_class_passes_through() {
    let f = fixture();
    f.network.respond("https://other.test/page", 200, "remote");

    let response = f.get(Request::get("https://other.test/page")).await;
    assert_eq!(response.text(), "remote");

    f.network.set_online(false);
    let response = f.get(Request::get("https://other.test/page")).await;
    assert_eq!(response.status, 503);
  }

  #[tokio::test]
  async fn test_invalid_url_is_rejected_not_raised() {
    let f = fixture();
    let response = f.get(Request::get("::nope::")).await;
    assert_eq!(response.status, 400);
  }
}
