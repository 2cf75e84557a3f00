//! Wire format of the realtime channel.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Kind of a realtime message.
///
/// Kinds the client does not know about are carried as `Other` so they can
/// still be subscribed to by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
  StockUpdate,
  SaleCompleted,
  LowStockAlert,
  SystemNotice,
  Ping,
  Pong,
  Auth,
  Other(String),
}

impl MessageKind {
  pub fn as_str(&self) -> &str {
    match self {
      MessageKind::StockUpdate => "stock_update",
      MessageKind::SaleCompleted => "sale_completed",
      MessageKind::LowStockAlert => "low_stock_alert",
      MessageKind::SystemNotice => "system_notice",
      MessageKind::Ping => "ping",
      MessageKind::Pong => "pong",
      MessageKind::Auth => "auth",
      MessageKind::Other(name) => name,
    }
  }

  /// Kinds handled by the channel itself and never forwarded.
  pub fn is_control(&self) -> bool {
    matches!(self, MessageKind::Ping | MessageKind::Pong | MessageKind::Auth)
  }
}

impl From<String> for MessageKind {
  fn from(s: String) -> Self {
    match s.as_str() {
      "stock_update" => MessageKind::StockUpdate,
      "sale_completed" => MessageKind::SaleCompleted,
      "low_stock_alert" => MessageKind::LowStockAlert,
      "system_notice" => MessageKind::SystemNotice,
      "ping" => MessageKind::Ping,
      "pong" => MessageKind::Pong,
      "auth" => MessageKind::Auth,
      _ => MessageKind::Other(s),
    }
  }
}

impl From<&str> for MessageKind {
  fn from(s: &str) -> Self {
    MessageKind::from(s.to_string())
  }
}

impl From<MessageKind> for String {
  fn from(kind: MessageKind) -> Self {
    kind.as_str().to_string()
  }
}

impl fmt::Display for MessageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One message on the channel: `{ type, data, timestamp, id? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
  #[serde(rename = "type")]
  pub kind: MessageKind,
  #[serde(default)]
  pub data: Value,
  /// Milliseconds since the Unix epoch
  #[serde(default)]
  pub timestamp: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
}

impl Envelope {
  /// New outbound envelope stamped with the current time.
  pub fn new(kind: MessageKind, data: Value) -> Self {
    Self {
      kind,
      data,
      timestamp: Utc::now().timestamp_millis(),
      id: None,
    }
  }

  pub fn encode(&self) -> Result<String> {
    serde_json::to_string(self).map_err(|e| eyre!("Failed to encode {} message: {}", self.kind, e))
  }

  pub fn decode(line: &str) -> Result<Self> {
    serde_json::from_str(line).map_err(|e| eyre!("Malformed realtime message: {}", e))
  }
}
