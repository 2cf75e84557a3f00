//! User-facing notifications.
//!
//! This module provides:
//! - `Notice` and the `NoticeSink` port other components raise notices on
//! - `ActivityFeed`, a bounded buffer of recent toasts with a live stream
//! - `NotificationDispatcher`, which turns realtime events into toasts

use chrono::{DateTime, Local, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::realtime::{ChannelManager, Envelope, MessageKind, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Info,
  Success,
  Warning,
  Error,
}

impl NoticeLevel {
  pub fn as_str(self) -> &'static str {
    match self {
      NoticeLevel::Info => "info",
      NoticeLevel::Success => "success",
      NoticeLevel::Warning => "warning",
      NoticeLevel::Error => "error",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    match s {
      "info" => Some(NoticeLevel::Info),
      "success" => Some(NoticeLevel::Success),
      "warning" | "warn" => Some(NoticeLevel::Warning),
      "error" => Some(NoticeLevel::Error),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
  pub level: NoticeLevel,
  pub title: String,
  pub message: String,
}

impl Notice {
  pub fn new(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      level,
      title: title.into(),
      message: message.into(),
    }
  }

  pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(NoticeLevel::Info, title, message)
  }

  pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
    Self::new(NoticeLevel::Warning, title, message)
  }
}

/// Anything that can show a notice to the user.
pub trait NoticeSink: Send + Sync {
  fn notify(&self, notice: Notice);
}

/// A notice as shown, with when it arrived and what raised it.
#[derive(Debug, Clone)]
pub struct Toast {
  pub notice: Notice,
  pub at: DateTime<Utc>,
  pub source: Option<MessageKind>,
}

impl fmt::Display for Toast {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[{}] {:<7} {}: {}",
      self.at.with_timezone(&Local).format("%H:%M:%S"),
      self.notice.level.as_str(),
      self.notice.title,
      self.notice.message
    )
  }
}

/// Recent toasts, oldest first, capped at `capacity`.
pub struct ActivityFeed {
  capacity: usize,
  recent: Mutex<VecDeque<Toast>>,
  live: broadcast::Sender<Toast>,
}

impl ActivityFeed {
  pub fn new(capacity: usize) -> Self {
    let (live, _rx) = broadcast::channel(capacity.max(1));
    Self {
      capacity,
      recent: Mutex::new(VecDeque::with_capacity(capacity)),
      live,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn push(&self, notice: Notice, source: Option<MessageKind>) {
    let toast = Toast {
      notice,
      at: Utc::now(),
      source,
    };

    match toast.notice.level {
      NoticeLevel::Error => error!(title = %toast.notice.title, "{}", toast.notice.message),
      NoticeLevel::Warning => warn!(title = %toast.notice.title, "{}", toast.notice.message),
      _ => info!(title = %toast.notice.title, "{}", toast.notice.message),
    }

    if self.capacity > 0 {
      let mut recent = self.recent.lock().unwrap_or_else(|p| p.into_inner());
      while recent.len() >= self.capacity {
        recent.pop_front();
      }
      recent.push_back(toast.clone());
    }
    // No live listeners is fine.
    let _ = self.live.send(toast);
  }

  pub fn recent(&self) -> Vec<Toast> {
    self
      .recent
      .lock()
      .map(|recent| recent.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Stream of toasts pushed from now on.
  pub fn watch(&self) -> broadcast::Receiver<Toast> {
    self.live.subscribe()
  }
}

impl NoticeSink for ActivityFeed {
  fn notify(&self, notice: Notice) {
    self.push(notice, None);
  }
}

/// Kinds rendered as toasts.
pub const NOTIFIED_KINDS: [MessageKind; 4] = [
  MessageKind::StockUpdate,
  MessageKind::SaleCompleted,
  MessageKind::LowStockAlert,
  MessageKind::SystemNotice,
];

/// Holds the channel subscriptions that feed the activity feed.
pub struct NotificationDispatcher {
  feed: Arc<ActivityFeed>,
  subscriptions: Vec<Subscription>,
}

impl NotificationDispatcher {
  pub fn attach(channel: &ChannelManager, feed: Arc<ActivityFeed>) -> Self {
    let subscriptions = NOTIFIED_KINDS
      .iter()
      .map(|kind| {
        let feed = Arc::clone(&feed);
        channel.subscribe(
          kind.clone(),
          Arc::new(move |envelope: &Envelope| {
            if let Some(notice) = render(envelope) {
              feed.push(notice, Some(envelope.kind.clone()));
            }
          }),
        )
      })
      .collect();

    Self {
      feed,
      subscriptions,
    }
  }

  pub fn recent(&self) -> Vec<Toast> {
    self.feed.recent()
  }

  pub fn detach(&mut self) {
    for subscription in self.subscriptions.drain(..) {
      subscription.unsubscribe();
    }
  }
}

fn text(data: &Value, keys: &[&str]) -> Option<String> {
  keys.iter().find_map(|key| match data.get(*key)? {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  })
}

/// Turn a realtime event into a notice. Kinds without a rendering are
/// skipped.
pub fn render(envelope: &Envelope) -> Option<Notice> {
  let data = &envelope.data;
  let product = text(data, &["product_name", "name"]).unwrap_or_else(|| "A product".to_string());

  let notice = match &envelope.kind {
    MessageKind::StockUpdate => {
      let message = match text(data, &["stock", "quantity"]) {
        Some(stock) => format!("{} now has {} in stock", product, stock),
        None => format!("{} stock changed", product),
      };
      Notice::info("Stock updated", message)
    }
    MessageKind::SaleCompleted => {
      let sale = text(data, &["sale_id", "id"]).unwrap_or_else(|| "A sale".to_string());
      let message = match text(data, &["total"]) {
        Some(total) => format!("{} completed, total {}", sale, total),
        None => format!("{} completed", sale),
      };
      Notice::new(NoticeLevel::Success, "Sale completed", message)
    }
    MessageKind::LowStockAlert => {
      let message = match text(data, &["stock", "quantity"]) {
        Some(stock) => format!("{} is running low ({} left)", product, stock),
        None => format!("{} is running low", product),
      };
      Notice::warning("Low stock", message)
    }
    MessageKind::SystemNotice => {
      let level = text(data, &["level"])
        .and_then(|l| NoticeLevel::parse(&l))
        .unwrap_or(NoticeLevel::Info);
      let message = text(data, &["message"]).unwrap_or_default();
      Notice::new(level, "System", message)
    }
    _ => return None,
  };
  Some(notice)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_feed_keeps_most_recent() {
    let feed = ActivityFeed::new(3);
    for i in 0..5 {
      feed.push(Notice::info("n", format!("{}", i)), None);
    }
    let messages: Vec<_> = feed.recent().into_iter().map(|t| t.notice.message).collect();
    assert_eq!(messages, vec!["2", "3", "4"]);
  }

  #[tokio::test]
  async fn test_feed_streams_live_toasts() {
    let feed = ActivityFeed::new(20);
    let mut rx = feed.watch();
    feed.notify(Notice::warning("Live updates unavailable", "reconnect later"));
    let toast = rx.recv().await.unwrap();
    assert_eq!(toast.notice.level, NoticeLevel::Warning);
    assert!(toast.source.is_none());
    assert!(toast.to_string().contains("Live updates unavailable"));
  }

  #[test]
  fn test_render_stock_and_sale() {
    let stock = render(&Envelope::new(
      MessageKind::LowStockAlert,
      json!({ "product_name": "Cola 330ml", "stock": 2 }),
    ))
    .unwrap();
    assert_eq!(stock.level, NoticeLevel::Warning);
    assert_eq!(stock.message, "Cola 330ml is running low (2 left)");

    let sale = render(&Envelope::new(
      MessageKind::SaleCompleted,
      json!({ "sale_id": "S-1001", "total": 12.5 }),
    ))
    .unwrap();
    assert_eq!(sale.level, NoticeLevel::Success);
    assert_eq!(sale.message, "S-1001 completed, total 12.5");
  }

  #[test]
  fn test_render_system_notice_level() {
    let notice = render(&Envelope::new(
      MessageKind::SystemNotice,
      json!({ "level": "error", "message": "Card terminal offline" }),
    ))
    .unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.message, "Card terminal offline");
  }

  /// Connector whose server sends a fixed script and then hangs up.
  struct Scripted(Vec<String>);

  #[async_trait::async_trait]
  impl crate::realtime::Connector for Scripted {
    async fn open(&self, _endpoint: &str) -> color_eyre::Result<crate::realtime::Duplex> {
      let (outbound, _server_rx) = tokio::sync::mpsc::unbounded_channel();
      let (server_tx, inbound) = tokio::sync::mpsc::unbounded_channel();
      for line in &self.0 {
        let _ = server_tx.send(line.clone());
      }
      Ok(crate::realtime::Duplex { outbound, inbound })
    }
  }

  fn channel(script: &[&str], feed: &Arc<ActivityFeed>) -> ChannelManager {
    let settings = crate::realtime::ChannelSettings {
      enabled: true,
      endpoint: Some("pos.example.com:9000".to_string()),
      heartbeat: std::time::Duration::from_secs(30),
      reconnect_interval: std::time::Duration::from_secs(3),
      max_reconnect_attempts: 5,
      auto_reconnect: false,
    };
    ChannelManager::new(
      settings,
      Arc::new(Scripted(script.iter().map(|s| s.to_string()).collect())),
      None,
      feed.clone(),
    )
  }

  #[tokio::test]
  async fn test_dispatcher_turns_events_into_toasts() {
    let feed = Arc::new(ActivityFeed::new(20));
    let manager = channel(
      &[
        r#"{"type":"stock_update","data":{"name":"Milk 1L","quantity":14}}"#,
        r#"{"type":"price_change","data":{}}"#,
        r#"{"type":"system_notice","data":{"message":"Closing in 10 minutes"}}"#,
      ],
      &feed,
    );
    let dispatcher = NotificationDispatcher::attach(&manager, feed.clone());
    let mut rx = feed.watch();

    manager.connect().await;
    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();

    assert_eq!(first.source, Some(MessageKind::StockUpdate));
    assert_eq!(first.notice.message, "Milk 1L now has 14 in stock");
    assert_eq!(second.source, Some(MessageKind::SystemNotice));
    assert_eq!(dispatcher.recent().len(), 2);
  }

  #[tokio::test]
  async fn test_detached_dispatcher_stops_listening() {
    let feed = Arc::new(ActivityFeed::new(20));
    let manager = channel(
      &[r#"{"type":"sale_completed","data":{"id":"S-7"}}"#],
      &feed,
    );
    let mut dispatcher = NotificationDispatcher::attach(&manager, feed.clone());
    dispatcher.detach();

    let mut states = manager.subscribe_state();
    manager.connect().await;
    // The scripted server hangs up after its last line.
    while *states.borrow_and_update() != crate::realtime::ChannelState::Disconnected {
      states.changed().await.unwrap();
    }
    assert!(feed.recent().is_empty());
  }

  #[test]
  fn test_other_kinds_are_not_rendered() {
    assert!(render(&Envelope::new(MessageKind::from("price_change"), json!({}))).is_none());
  }
}
