//! Per-kind subscriber lists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

use super::envelope::{Envelope, MessageKind};

pub type Callback = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Default)]
struct Slots {
  next_id: u64,
  by_kind: HashMap<MessageKind, Vec<(u64, Callback)>>,
}

#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
  inner: Arc<Mutex<Slots>>,
}

/// Handle returned by `subscribe`.
///
/// Dropping it leaves the callback registered; call `unsubscribe` to remove
/// it.
#[derive(Debug)]
pub struct Subscription {
  registry: Weak<Mutex<Slots>>,
  kind: MessageKind,
  id: u64,
}

impl Subscription {
  pub fn kind(&self) -> &MessageKind {
    &self.kind
  }

  /// Remove the callback. Calling this more than once is harmless.
  pub fn unsubscribe(&self) {
    let Some(inner) = self.registry.upgrade() else {
      return;
    };
    let Ok(mut slots) = inner.lock() else {
      return;
    };
    if let Some(list) = slots.by_kind.get_mut(&self.kind) {
      list.retain(|(id, _)| *id != self.id);
      if list.is_empty() {
        slots.by_kind.remove(&self.kind);
      }
    }
  }
}

impl SubscriptionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn subscribe(&self, kind: MessageKind, callback: Callback) -> Subscription {
    let id = match self.inner.lock() {
      Ok(mut slots) => {
        slots.next_id += 1;
        let id = slots.next_id;
        slots.by_kind.entry(kind.clone()).or_default().push((id, callback));
        id
      }
      Err(_) => {
        warn!(kind = %kind, "subscription registry poisoned, callback not registered");
        0
      }
    };
    Subscription {
      registry: Arc::downgrade(&self.inner),
      kind,
      id,
    }
  }

  /// Invoke every callback registered for the envelope's kind, in
  /// registration order. Returns how many ran.
  pub fn dispatch(&self, envelope: &Envelope) -> usize {
    // Callbacks run outside the lock so they may subscribe or unsubscribe.
    let callbacks: Vec<Callback> = match self.inner.lock() {
      Ok(slots) => slots
        .by_kind
        .get(&envelope.kind)
        .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
        .unwrap_or_default(),
      Err(_) => return 0,
    };

    for callback in &callbacks {
      callback(envelope);
    }
    callbacks.len()
  }

  pub fn subscriber_count(&self, kind: &MessageKind) -> usize {
    self
      .inner
      .lock()
      .map(|slots| slots.by_kind.get(kind).map_or(0, Vec::len))
      .unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Callback {
    let log = Arc::clone(log);
    let tag = tag.to_string();
    Arc::new(move |env: &Envelope| {
      log.lock().unwrap().push(format!("{}:{}", tag, env.kind));
    })
  }

  #[test]
  fn test_dispatch_in_registration_order() {
    let registry = SubscriptionRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry.subscribe(MessageKind::StockUpdate, recorder(&log, "a"));
    registry.subscribe(MessageKind::StockUpdate, recorder(&log, "b"));
    registry.subscribe(MessageKind::SaleCompleted, recorder(&log, "c"));

    let ran = registry.dispatch(&Envelope::new(MessageKind::StockUpdate, json!({})));

    assert_eq!(ran, 2);
    assert_eq!(*log.lock().unwrap(), vec!["a:stock_update", "b:stock_update"]);
  }

  #[test]
  fn test_unsubscribe_removes_only_that_callback() {
    let registry = SubscriptionRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let first = registry.subscribe(MessageKind::StockUpdate, recorder(&log, "a"));
    registry.subscribe(MessageKind::StockUpdate, recorder(&log, "b"));

    first.unsubscribe();
    first.unsubscribe();
    registry.dispatch(&Envelope::new(MessageKind::StockUpdate, json!({})));

    assert_eq!(*log.lock().unwrap(), vec!["b:stock_update"]);
    assert_eq!(registry.subscriber_count(&MessageKind::StockUpdate), 1);
  }

  #[test]
  fn test_empty_kind_entry_is_removed() {
    let registry = SubscriptionRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let sub = registry.subscribe(MessageKind::SystemNotice, recorder(&log, "a"));
    sub.unsubscribe();
    assert!(registry.inner.lock().unwrap().by_kind.is_empty());
  }

  #[test]
  fn test_unknown_kind_reaches_nobody() {
    let registry = SubscriptionRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    registry.subscribe(MessageKind::StockUpdate, recorder(&log, "a"));
    let ran = registry.dispatch(&Envelope::new(MessageKind::from("price_change"), json!({})));
    assert_eq!(ran, 0);
    assert!(log.lock().unwrap().is_empty());
  }

  #[test]
  fn test_callback_may_unsubscribe_itself() {
    let registry = SubscriptionRegistry::new();
    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let hits = Arc::new(Mutex::new(0));

    let cb: Callback = {
      let slot = Arc::clone(&slot);
      let hits = Arc::clone(&hits);
      Arc::new(move |_env: &Envelope| {
        *hits.lock().unwrap() += 1;
        if let Some(sub) = slot.lock().unwrap().as_ref() {
          sub.unsubscribe();
        }
      })
    };
    *slot.lock().unwrap() = Some(registry.subscribe(MessageKind::LowStockAlert, cb));

    let env = Envelope::new(MessageKind::LowStockAlert, json!({}));
    registry.dispatch(&env);
    registry.dispatch(&env);
    assert_eq!(*hits.lock().unwrap(), 1);
  }
}
