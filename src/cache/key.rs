//! Cache keys for intercepted requests.

use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

use crate::backend::Request;

/// Normalized (method, URL) pair identifying a cached response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestKey {
  method: Method,
  url: Url,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let method = Method::from_bytes(method.as_str().to_ascii_uppercase().as_bytes())
      .unwrap_or_else(|_| method.clone());
    let mut url = url.clone();
    url.set_fragment(None);
    Self { method, url }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(&request.method, &request.url)
  }

  /// Stable, fixed-length storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.description().as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_fragment_is_ignored() {
    let a = RequestKey::new(&Method::GET, &url("https://shop.test/api/products#top"));
    let b = RequestKey::new(&Method::GET, &url("https://shop.test/api/products"));
    assert_eq!(a.cache_hash(), b.cache_hash());
  }

  #[test]
  fn test_method_is_case_normalized() {
    let lower = Method::from_bytes(b"get").unwrap();
    let a = RequestKey::new(&lower, &url("https://shop.test/"));
    let b = RequestKey::new(&Method::GET, &url("https://shop.test/"));
    assert_eq!(a, b);
  }

  #[test]
  fn test_query_is_significant() {
    let a = RequestKey::new(&Method::GET, &url("https://shop.test/api/products?page=1"));
    let b = RequestKey::new(&Method::GET, &url("https://shop.test/api/products?page=2"));
    assert_ne!(a.cache_hash(), b.cache_hash());
    assert_eq!(a.cache_hash().len(), 64);
  }
}
