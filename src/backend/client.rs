use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

use crate::cache::ResponseSource;
use crate::config::{Config, EndpointConfig};
use crate::offline::{MutationSink, PendingMutation, Probe, Rejected};

use super::types::{Fetch, Request, Response};

/// Header carrying the mutation id so the backend can drop replays it has
/// already applied.
pub const MUTATION_ID_HEADER: &str = "X-Mutation-Id";

/// HTTP client for the backend origin.
#[derive(Clone)]
pub struct BackendClient {
  http: reqwest::Client,
  origin: Url,
  token: Option<String>,
  endpoints: HashMap<String, EndpointConfig>,
  probe_path: String,
}

impl BackendClient {
  pub fn new(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", config.origin, e))?;

    let http = reqwest::Client::builder()
      .timeout(config.request_timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      origin,
      token: Config::api_token(),
      endpoints: config.queue.endpoints.clone(),
      probe_path: config.connectivity.probe_path.clone(),
    })
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  /// Resolve a path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  /// Build the replay request for a queued mutation.
  pub fn mutation_request(&self, mutation: &PendingMutation) -> Result<Request> {
    let (method, path) = match self.endpoints.get(&mutation.entity_type) {
      Some(endpoint) => (
        Method::from_bytes(endpoint.method.to_ascii_uppercase().as_bytes())
          .map_err(|e| eyre!("Invalid method '{}': {}", endpoint.method, e))?,
        endpoint.path.replace(
          "{id}",
          &mutation.entity_id().unwrap_or_else(|| mutation.id.clone()),
        ),
      ),
      None => (Method::POST, format!("/api/{}", mutation.entity_type)),
    };

    let body = serde_json::to_vec(&mutation.payload)
      .map_err(|e| eyre!("Failed to serialize mutation {}: {}", mutation.id, e))?;

    Ok(
      Request::new(method, self.resolve(&path)?)
        .with_header("Content-Type", "application/json")
        .with_header(MUTATION_ID_HEADER, &mutation.id)
        .with_body(body),
    )
  }

  async fn send(&self, request: &Request) -> Result<Response> {
    let mut builder = self.http.request(request.method.clone(), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(token) = &self.token {
      if request.header("authorization").is_none() && self.is_same_origin(&request.url) {
        builder = builder.bearer_auth(token);
      }
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?
      .to_vec();

    debug!(method = %request.method, url = %request.url, status, "backend response");

    Ok(Response {
      status,
      headers,
      body,
      source: ResponseSource::Network,
    })
  }

  fn is_same_origin(&self, url: &Url) -> bool {
    url.origin() == self.origin.origin()
  }
}

#[async_trait]
impl Fetch for BackendClient {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.send(request).await
  }
}

#[async_trait]
impl MutationSink for BackendClient {
  async fn submit(&self, mutation: &PendingMutation) -> Result<()> {
    let request = self.mutation_request(mutation)?;
    let response = self.send(&request).await?;

    if response.is_success() {
      Ok(())
    } else {
      Err(
        Rejected {
          entity_type: mutation.entity_type.clone(),
          id: mutation.id.clone(),
          status: response.status,
        }
        .into(),
      )
    }
  }
}

#[async_trait]
impl Probe for BackendClient {
  async fn probe(&self) -> bool {
    // Any HTTP answer, even an error status, means the origin is reachable.
    match self.resolve(&self.probe_path) {
      Ok(url) => self.send(&Request::new(Method::HEAD, url)).await.is_ok(),
      Err(_) => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use serde_json::json;

  fn client(yaml: &str) -> BackendClient {
    BackendClient::new(&Config::from_yaml(yaml).unwrap()).unwrap()
  }

  fn mutation(entity_type: &str, id: &str) -> PendingMutation {
    PendingMutation {
      id: id.to_string(),
      entity_type: entity_type.to_string(),
      payload: json!({ "id": "COKE-330", "quantity": 2 }),
      created_at: Utc::now(),
    }
  }

  #[test]
  fn test_default_mutation_endpoint() {
    let client = client("origin: https://pos.example.com\n");
    let request = client.mutation_request(&mutation("sales", "abc")).unwrap();

    assert_eq!(request.method, Method::POST);
    assert_eq!(request.url.as_str(), "https://pos.example.com/api/sales");
    assert_eq!(request.header("x-mutation-id"), Some("abc"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
    assert_eq!(body["quantity"], 2);
  }

  #[test]
  fn test_endpoint_override_substitutes_id() {
    let client = client(
      r#"
origin: https://pos.example.com
queue:
  endpoints:
    inventory:
      method: put
      path: /api/inventory/{id}
"#,
    );
    let request = client
      .mutation_request(&mutation("inventory", "7f3a"))
      .unwrap();

    assert_eq!(request.method, Method::PUT);
    assert_eq!(
      request.url.as_str(),
      "https://pos.example.com/api/inventory/COKE-330"
    );
    assert_eq!(request.header("x-mutation-id"), Some("7f3a"));
  }
}
