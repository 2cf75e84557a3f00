//! Deterministic responses for when neither the network nor the cache can
//! answer.

use serde_json::json;

use crate::backend::{Request, Response};

use super::traits::{ResourceClass, ResponseSource};

pub const OFFLINE_STATUS: u16 = 503;

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>Offline</title>
</head>
<body>
  <main>
    <h1>You are offline</h1>
    <p>This page has not been saved for offline use. Sales and stock changes you make are kept and will sync when the connection returns.</p>
    <button onclick="window.location.reload()">Retry</button>
  </main>
</body>
</html>
"#;

/// Build the offline response for a request that got no answer.
pub fn offline_response(request: &Request, class: ResourceClass) -> Response {
  match class {
    ResourceClass::Api => json_response(json!({
      "error": "Offline",
      "message": "You are offline and this data has not been cached yet.",
      "offline": true,
      "cached": false,
    })),
    ResourceClass::Page if request.is_navigation() => Response {
      status: OFFLINE_STATUS,
      headers: vec![(
        "Content-Type".to_string(),
        "text/html; charset=utf-8".to_string(),
      )],
      body: OFFLINE_PAGE.as_bytes().to_vec(),
      source: ResponseSource::Fallback,
    },
    _ => json_response(json!({
      "error": "Network unavailable",
      "message": format!("{} could not be fetched while offline.", request.url.path()),
      "offline": true,
    })),
  }
}

fn json_response(body: serde_json::Value) -> Response {
  Response {
    status: OFFLINE_STATUS,
    headers: vec![(
      "Content-Type".to_string(),
      "application/json".to_string(),
    )],
    body: body.to_string().into_bytes(),
    source: ResponseSource::Fallback,
  }
}
