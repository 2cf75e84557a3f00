//! Core types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use crate::backend::Response;

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Served from a cache namespace
  Cache,
  /// Network unavailable and nothing cached; synthesized offline response
  Fallback,
  /// Not intercepted (non-GET or cross-origin), forwarded as-is
  PassThrough,
}

/// Resource classes used to pick a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// Scripts, styles, images, fonts: cache-first
  StaticAsset,
  /// Reads under the `/api/` prefix: network-first
  Api,
  /// Everything else, mostly page navigations: network-first
  Page,
}

/// A response as persisted in a cache namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  #[serde(with = "hex::serde")]
  pub body: Vec<u8>,
  /// When the response was captured
  pub captured_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn capture(response: &Response) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      captured_at: Utc::now(),
    }
  }

  pub fn into_response(self) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
      source: ResponseSource::Cache,
    }
  }

  pub fn encode(&self) -> Result<Vec<u8>> {
    serde_json::to_vec(self).map_err(|e| eyre!("Failed to serialize cached response: {}", e))
  }

  pub fn decode(bytes: &[u8]) -> Result<Self> {
    serde_json::from_slice(bytes).map_err(|e| eyre!("Failed to deserialize cached response: {}", e))
  }
}
