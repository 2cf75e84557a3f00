//! Cache strategy engine: decides, per request, whether the cache or the
//! network answers first.

use futures::stream::{self, StreamExt};
use reqwest::Method;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::{Fetch, Request, Response};
use crate::config::CacheConfig;

use super::fallback::offline_response;
use super::key::RequestKey;
use super::storage::Store;
use super::traits::{CachedResponse, ResourceClass, ResponseSource};
use color_eyre::Result;

/// File extensions served cache-first.
const STATIC_EXTENSIONS: &[&str] = &[
  "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "webp", "ico", "woff", "woff2", "ttf",
  "otf", "eot",
];

const API_PREFIX: &str = "/api/";

/// Install fetches in flight at once.
const SEED_CONCURRENCY: usize = 4;

/// Classify a URL into the resource class that picks its strategy.
pub fn classify(url: &Url) -> ResourceClass {
  let path = url.path();
  if path.starts_with(API_PREFIX) {
    return ResourceClass::Api;
  }

  let extension = path
    .rsplit('/')
    .next()
    .and_then(|segment| segment.rsplit_once('.'))
    .map(|(_, ext)| ext.to_ascii_lowercase());

  match extension {
    Some(ext) if STATIC_EXTENSIONS.contains(&ext.as_str()) => ResourceClass::StaticAsset,
    _ => ResourceClass::Page,
  }
}

/// Namespace names for one cache version.
#[derive(Debug, Clone)]
pub struct CacheNames {
  prefix: String,
  version: String,
}

impl CacheNames {
  pub fn new(prefix: &str, version: &str) -> Self {
    Self {
      prefix: prefix.to_string(),
      version: version.to_string(),
    }
  }

  pub fn static_assets(&self) -> String {
    format!("{}-static-{}", self.prefix, self.version)
  }

  pub fn dynamic(&self) -> String {
    format!("{}-dynamic-{}", self.prefix, self.version)
  }

  /// Whether the engine created this namespace (for any version).
  pub fn is_owned(&self, namespace: &str) -> bool {
    namespace.starts_with(&format!("{}-static-", self.prefix))
      || namespace.starts_with(&format!("{}-dynamic-", self.prefix))
  }

  pub fn is_current(&self, namespace: &str) -> bool {
    namespace == self.static_assets() || namespace == self.dynamic()
  }
}

/// Install/activation state of the current cache version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
  Installing,
  /// Installed, but namespaces from another version are still present
  Waiting,
  Active,
}

/// Outcome of seeding the current version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub pinned: usize,
  pub pinned_failed: usize,
  pub prewarmed: usize,
  pub prewarm_failed: usize,
}

/// Cache engine that manages caching strategy and network fetching.
///
/// This sits between the application and the backend client, providing
/// transparent caching with offline support.
pub struct CacheEngine {
  store: Arc<dyn Store>,
  network: Arc<dyn Fetch>,
  origin: Url,
  names: CacheNames,
  static_assets: Vec<String>,
  prewarm: Vec<String>,
  lifecycle: Mutex<Lifecycle>,
}

impl CacheEngine {
  pub fn new(
    store: Arc<dyn Store>,
    network: Arc<dyn Fetch>,
    origin: Url,
    config: &CacheConfig,
  ) -> Self {
    Self {
      store,
      network,
      origin,
      names: CacheNames::new(&config.name, &config.version),
      static_assets: config.static_assets.clone(),
      prewarm: config.prewarm.clone(),
      lifecycle: Mutex::new(Lifecycle::Installing),
    }
  }

  pub fn names(&self) -> &CacheNames {
    &self.names
  }

  pub fn lifecycle(&self) -> Lifecycle {
    *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Whether this engine handles the request at all.
  ///
  /// Only same-origin GETs are intercepted; everything else passes through.
  /// The method is compared case-insensitively, as `RequestKey` does.
  pub fn intercepts(&self, request: &Request) -> bool {
    request
      .method
      .as_str()
      .eq_ignore_ascii_case(Method::GET.as_str())
      && request.url.origin() == self.origin.origin()
  }

  /// Answer a request.
  ///
  /// Intercepted requests always get a response (live, cached or fallback).
  /// Pass-through requests surface network errors to the caller unchanged.
  pub async fn handle(&self, request: &Request) -> Result<Response> {
    if !self.intercepts(request) {
      let response = self.network.fetch(request).await?;
      return Ok(response.with_source(ResponseSource::PassThrough));
    }

    let response = match classify(&request.url) {
      ResourceClass::StaticAsset => self.cache_first(request).await,
      class => self.network_first(request, class).await,
    };
    Ok(response)
  }

  /// Cache-first strategy for static assets.
  ///
  /// 1. Hit - return immediately, no network
  /// 2. Miss - fetch, store on 2xx
  /// 3. Network failure - offline fallback
  async fn cache_first(&self, request: &Request) -> Response {
    let key = RequestKey::for_request(request);
    let namespace = self.names.static_assets();

    if let Some(cached) = self.lookup(&namespace, &key) {
      debug!(key = %key.description(), "static cache hit");
      return cached.into_response();
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.remember(&namespace, &key, &response);
        }
        response.with_source(ResponseSource::Network)
      }
      Err(e) => {
        debug!(key = %key.description(), error = %e, "static asset unavailable");
        offline_response(request, ResourceClass::StaticAsset)
      }
    }
  }

  /// Network-first strategy for API reads and pages.
  ///
  /// 1. Network success - refresh the cached copy and return live data
  /// 2. Network failure - any cached copy (offline mode)
  /// 3. Nothing cached - offline fallback
  async fn network_first(&self, request: &Request, class: ResourceClass) -> Response {
    let key = RequestKey::for_request(request);

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.remember(&self.names.dynamic(), &key, &response);
        }
        response.with_source(ResponseSource::Network)
      }
      Err(e) => {
        // Pinned pages live in the static namespace, so search both.
        let cached = [self.names.dynamic(), self.names.static_assets()]
          .iter()
          .find_map(|namespace| self.lookup(namespace, &key));

        match cached {
          Some(cached) => {
            debug!(key = %key.description(), error = %e, "network failed, serving cached copy");
            cached.into_response()
          }
          None => {
            debug!(key = %key.description(), error = %e, "network failed, nothing cached");
            offline_response(request, class)
          }
        }
      }
    }
  }

  /// Seed the current version: pin static assets and pre-warm API reads.
  ///
  /// Individual failures are logged and counted; install itself never fails.
  pub async fn install(&self) -> InstallReport {
    let mut report = InstallReport::default();

    let static_namespace = self.names.static_assets();
    for (asset, ok) in self.seed_all(&static_namespace, &self.static_assets).await {
      if ok {
        report.pinned += 1;
      } else {
        warn!(asset = %asset, "failed to pin static asset");
        report.pinned_failed += 1;
      }
    }

    let dynamic_namespace = self.names.dynamic();
    for (endpoint, ok) in self.seed_all(&dynamic_namespace, &self.prewarm).await {
      if ok {
        report.prewarmed += 1;
      } else {
        debug!(endpoint = %endpoint, "pre-warm skipped");
        report.prewarm_failed += 1;
      }
    }

    let next = if self.stale_namespaces().is_empty() {
      Lifecycle::Active
    } else {
      Lifecycle::Waiting
    };
    *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = next;

    info!(
      pinned = report.pinned,
      pinned_failed = report.pinned_failed,
      prewarmed = report.prewarmed,
      prewarm_failed = report.prewarm_failed,
      lifecycle = ?next,
      "cache installed"
    );
    report
  }

  /// Delete every namespace this engine owns that belongs to another version.
  ///
  /// Returns the number of namespaces removed.
  pub fn activate(&self) -> usize {
    let mut removed = 0;
    for namespace in self.stale_namespaces() {
      match self.store.drop_namespace(&namespace) {
        Ok(entries) => {
          info!(namespace = %namespace, entries, "deleted outdated cache");
          removed += 1;
        }
        Err(e) => warn!(namespace = %namespace, error = %e, "failed to delete outdated cache"),
      }
    }
    *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = Lifecycle::Active;
    removed
  }

  /// Activate a waiting version immediately. Returns whether anything changed.
  pub fn skip_waiting(&self) -> bool {
    if self.lifecycle() != Lifecycle::Waiting {
      return false;
    }
    self.activate();
    true
  }

  /// Drop every namespace this engine owns, current version included.
  pub fn clear(&self) -> Result<usize> {
    let mut removed = 0;
    for namespace in self.store.namespaces()? {
      if self.names.is_owned(&namespace) {
        self.store.drop_namespace(&namespace)?;
        removed += 1;
      }
    }
    Ok(removed)
  }

  fn stale_namespaces(&self) -> Vec<String> {
    match self.store.namespaces() {
      Ok(namespaces) => namespaces
        .into_iter()
        .filter(|n| self.names.is_owned(n) && !self.names.is_current(n))
        .collect(),
      Err(e) => {
        warn!(error = %e, "failed to list cache namespaces");
        Vec::new()
      }
    }
  }

  async fn seed_all<'a>(&self, namespace: &str, paths: &'a [String]) -> Vec<(&'a str, bool)> {
    stream::iter(paths)
      .map(|path| async move { (path.as_str(), self.seed(namespace, path).await) })
      .buffered(SEED_CONCURRENCY)
      .collect()
      .await
  }

  async fn seed(&self, namespace: &str, path: &str) -> bool {
    let url = match self.origin.join(path) {
      Ok(url) => url,
      Err(e) => {
        warn!(path = %path, error = %e, "invalid cache path");
        return false;
      }
    };
    let request = Request::get(url);

    match self.network.fetch(&request).await {
      Ok(response) if response.is_success() => {
        self.remember(namespace, &RequestKey::for_request(&request), &response)
      }
      _ => false,
    }
  }

  fn lookup(&self, namespace: &str, key: &RequestKey) -> Option<CachedResponse> {
    let bytes = match self.store.get(namespace, &key.cache_hash()) {
      Ok(bytes) => bytes?,
      Err(e) => {
        warn!(namespace = %namespace, error = %e, "cache read failed");
        return None;
      }
    };

    match CachedResponse::decode(&bytes) {
      Ok(cached) => Some(cached),
      Err(e) => {
        warn!(namespace = %namespace, key = %key.description(), error = %e, "discarding unreadable cache entry");
        None
      }
    }
  }

  fn remember(&self, namespace: &str, key: &RequestKey, response: &Response) -> bool {
    let stored = CachedResponse::capture(response)
      .encode()
      .and_then(|bytes| self.store.put(namespace, &key.cache_hash(), &bytes));

    match stored {
      Ok(()) => true,
      Err(e) => {
        warn!(namespace = %namespace, key = %key.description(), error = %e, "cache write failed");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{MemoryStore, NoopStore};
  use async_trait::async_trait;
  use color_eyre::eyre::eyre;
  use std::collections::HashMap;

  /// Network stub answering from a path → body table; unknown paths fail.
  #[derive(Default)]
  struct FakeNetwork {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    calls: Mutex<Vec<String>>,
  }

  impl FakeNetwork {
    fn route(&self, path: &str, status: u16, body: &[u8]) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(path.to_string(), (status, body.to_vec()));
    }

    fn go_offline(&self) {
      self.routes.lock().unwrap().clear();
    }

    fn calls(&self) -> Vec<String> {
      self.calls.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl Fetch for FakeNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      let path = request.url.path().to_string();
      self.calls.lock().unwrap().push(path.clone());
      match self.routes.lock().unwrap().get(&path) {
        Some((status, body)) => Ok(Response {
          status: *status,
          headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
          body: body.clone(),
          source: ResponseSource::Network,
        }),
        None => Err(eyre!("connection refused")),
      }
    }
  }

  fn origin() -> Url {
    Url::parse("https://pos.example.com").unwrap()
  }

  fn get(path: &str) -> Request {
    Request::get(origin().join(path).unwrap())
  }

  fn engine_with(store: Arc<dyn Store>, network: Arc<FakeNetwork>, version: &str) -> CacheEngine {
    let config = CacheConfig {
      version: version.to_string(),
      static_assets: vec!["/".to_string(), "/static/js/main.js".to_string()],
      prewarm: vec!["/api/products".to_string(), "/api/categories".to_string()],
      ..CacheConfig::default()
    };
    CacheEngine::new(store, network, origin(), &config)
  }

  fn engine() -> (CacheEngine, Arc<MemoryStore>, Arc<FakeNetwork>) {
    let store = Arc::new(MemoryStore::new());
    let network = Arc::new(FakeNetwork::default());
    (engine_with(store.clone(), network.clone(), "v1"), store, network)
  }

  #[test]
  fn test_classify() {
    let url = |p: &str| origin().join(p).unwrap();
    assert_eq!(classify(&url("/static/js/main.js")), ResourceClass::StaticAsset);
    assert_eq!(classify(&url("/logo.PNG")), ResourceClass::StaticAsset);
    assert_eq!(classify(&url("/fonts/a.woff2?v=3")), ResourceClass::StaticAsset);
    assert_eq!(classify(&url("/api/products")), ResourceClass::Api);
    assert_eq!(classify(&url("/api/assets/logo.png")), ResourceClass::Api);
    assert_eq!(classify(&url("/checkout")), ResourceClass::Page);
    assert_eq!(classify(&url("/manifest.json")), ResourceClass::Page);
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network_and_is_byte_exact() {
    let (engine, store, network) = engine();
    let request = get("/static/img/logo.png");
    let body: Vec<u8> = (0u8..=255).collect();
    let cached = CachedResponse {
      status: 200,
      headers: vec![("Content-Type".to_string(), "image/png".to_string())],
      body: body.clone(),
      captured_at: chrono::Utc::now(),
    };
    store
      .put(
        &engine.names().static_assets(),
        &RequestKey::for_request(&request).cache_hash(),
        &cached.encode().unwrap(),
      )
      .unwrap();

    let response = engine.handle(&request).await.unwrap();

    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.body, body);
    assert_eq!(response.header("content-type"), Some("image/png"));
    assert!(network.calls().is_empty());
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_success() {
    let (engine, _store, network) = engine();
    network.route("/static/css/main.css", 200, b"body{}");

    let first = engine.handle(&get("/static/css/main.css")).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);

    network.go_offline();
    let second = engine.handle(&get("/static/css/main.css")).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.body, b"body{}");
    assert_eq!(network.calls().len(), 1);
  }

  #[tokio::test]
  async fn test_lowercase_get_is_intercepted() {
    let (engine, _store, network) = engine();
    network.route("/static/css/main.css", 200, b"body{}");
    let method = Method::from_bytes(b"get").unwrap();
    let lowercase = Request::new(method, origin().join("/static/css/main.css").unwrap());

    assert!(engine.intercepts(&lowercase));
    let first = engine.handle(&lowercase).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);

    network.go_offline();
    let second = engine.handle(&get("/static/css/main.css")).await.unwrap();
    assert_eq!(second.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_cache_first_does_not_store_errors() {
    let (engine, store, network) = engine();
    network.route("/static/js/missing.js", 404, b"nope");

    let response = engine.handle(&get("/static/js/missing.js")).await.unwrap();
    assert_eq!(response.status, 404);
    assert!(store
      .list(&engine.names().static_assets(), "")
      .unwrap()
      .is_empty());
  }

  #[tokio::test]
  async fn test_cache_first_failure_returns_fallback() {
    let (engine, _store, _network) = engine();
    let response = engine.handle(&get("/static/js/app.js")).await.unwrap();
    assert_eq!(response.source, ResponseSource::Fallback);
    assert_eq!(response.status, 503);
  }

  #[tokio::test]
  async fn test_network_first_overwrites_stale_entry() {
    let (engine, store, network) = engine();
    let request = get("/api/products");
    let stale = CachedResponse {
      status: 200,
      headers: Vec::new(),
      body: b"stale".to_vec(),
      captured_at: chrono::Utc::now(),
    };
    let hash = RequestKey::for_request(&request).cache_hash();
    store
      .put(&engine.names().dynamic(), &hash, &stale.encode().unwrap())
      .unwrap();
    network.route("/api/products", 200, b"fresh");

    let response = engine.handle(&request).await.unwrap();
    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(response.body, b"fresh");

    let stored = store.get(&engine.names().dynamic(), &hash).unwrap().unwrap();
    assert_eq!(CachedResponse::decode(&stored).unwrap().body, b"fresh");
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache_then_offline_payload() {
    let (engine, _store, network) = engine();
    network.route("/api/products", 200, b"[1,2,3]");
    engine.handle(&get("/api/products")).await.unwrap();

    network.go_offline();
    let cached = engine.handle(&get("/api/products")).await.unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.body, b"[1,2,3]");

    let missing = engine.handle(&get("/api/customers")).await.unwrap();
    assert_eq!(missing.source, ResponseSource::Fallback);
    assert_eq!(missing.status, 503);
    let body: serde_json::Value = missing.json().unwrap();
    assert_eq!(body["error"], "Offline");
  }

  #[tokio::test]
  async fn test_offline_navigation_uses_pinned_page() {
    let (engine, _store, network) = engine();
    network.route("/", 200, b"<html>till</html>");
    engine.install().await;

    network.go_offline();
    let request = get("/").with_header("Accept", "text/html");
    let response = engine.handle(&request).await.unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(response.body, b"<html>till</html>");
  }

  #[tokio::test]
  async fn test_non_get_and_cross_origin_pass_through() {
    let (engine, store, network) = engine();
    network.route("/api/sales", 201, b"{}");

    let post = Request::new(Method::POST, origin().join("/api/sales").unwrap());
    let response = engine.handle(&post).await.unwrap();
    assert_eq!(response.source, ResponseSource::PassThrough);
    assert_eq!(response.status, 201);

    let foreign = Request::get(Url::parse("https://cdn.example.net/lib.js").unwrap());
    assert!(engine.handle(&foreign).await.is_err());
    assert!(store.namespaces().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_tolerates_prewarm_failures() {
    let (engine, _store, network) = engine();
    network.route("/", 200, b"home");
    network.route("/static/js/main.js", 200, b"js");
    network.route("/api/products", 200, b"[]");

    let report = engine.install().await;
    assert_eq!(
      report,
      InstallReport {
        pinned: 2,
        pinned_failed: 0,
        prewarmed: 1,
        prewarm_failed: 1,
      }
    );
    assert_eq!(engine.lifecycle(), Lifecycle::Active);
  }

  #[tokio::test]
  async fn test_new_version_waits_then_skip_waiting_deletes_old() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let network = Arc::new(FakeNetwork::default());
    network.route("/", 200, b"home");

    let old = engine_with(store.clone(), network.clone(), "v1");
    old.install().await;
    store.put("sales-offline", "a", b"{}").unwrap();

    let new = engine_with(store.clone(), network.clone(), "v2");
    new.install().await;
    assert_eq!(new.lifecycle(), Lifecycle::Waiting);

    assert!(new.skip_waiting());
    assert_eq!(new.lifecycle(), Lifecycle::Active);
    let namespaces = store.namespaces().unwrap();
    assert!(namespaces.contains(&"till-static-v2".to_string()));
    assert!(!namespaces.contains(&"till-static-v1".to_string()));
    assert!(namespaces.contains(&"sales-offline".to_string()));
    assert!(!new.skip_waiting());
  }

  #[tokio::test]
  async fn test_noop_store_degrades_to_pass_through() {
    let network = Arc::new(FakeNetwork::default());
    network.route("/api/products", 200, b"[]");
    let engine = engine_with(Arc::new(NoopStore), network.clone(), "v1");

    let live = engine.handle(&get("/api/products")).await.unwrap();
    assert_eq!(live.source, ResponseSource::Network);

    network.go_offline();
    let offline = engine.handle(&get("/api/products")).await.unwrap();
    assert_eq!(offline.source, ResponseSource::Fallback);
  }
}
