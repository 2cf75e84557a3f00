//! Drains every offline queue when connectivity comes back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use super::queue::{DrainReport, MutationSink, OfflineQueue};

pub struct SyncTrigger {
  queue: OfflineQueue,
  sink: Arc<dyn MutationSink>,
  entity_types: Vec<String>,
  running: AtomicBool,
}

/// Clears the running flag however the pass ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

impl SyncTrigger {
  pub fn new(queue: OfflineQueue, sink: Arc<dyn MutationSink>, entity_types: Vec<String>) -> Self {
    Self {
      queue,
      sink,
      entity_types,
      running: AtomicBool::new(false),
    }
  }

  pub fn entity_types(&self) -> &[String] {
    &self.entity_types
  }

  /// Drain each entity type in turn.
  ///
  /// A type that cannot be drained is logged and skipped; the others still
  /// run. If a pass is already in progress this one is skipped.
  pub async fn on_connectivity_restored(&self) -> Vec<DrainReport> {
    if self.running.swap(true, Ordering::SeqCst) {
      info!("sync already in progress, skipping");
      return Vec::new();
    }
    let _guard = PassGuard(&self.running);

    let mut reports = Vec::with_capacity(self.entity_types.len());
    for entity_type in &self.entity_types {
      match self.queue.drain(entity_type, self.sink.as_ref()).await {
        Ok(report) => reports.push(report),
        Err(e) => error!(entity_type = %entity_type, error = %e, "could not drain offline queue"),
      }
    }
    reports
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, Store, StoredEntry};
  use crate::offline::queue::tests::RecordingSink;
  use crate::offline::queue::{queue_namespace, PendingMutation};
  use async_trait::async_trait;
  use color_eyre::{eyre::eyre, Result};
  use serde_json::json;
  use tokio::sync::Notify;

  /// Store that refuses to list one namespace.
  struct BrokenNamespace {
    inner: MemoryStore,
    broken: String,
  }

  impl Store for BrokenNamespace {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
      self.inner.get(namespace, key)
    }
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<()> {
      self.inner.put(namespace, key, value)
    }
    fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
      self.inner.delete(namespace, key)
    }
    fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<StoredEntry>> {
      if namespace == self.broken {
        return Err(eyre!("database is locked"));
      }
      self.inner.list(namespace, prefix)
    }
    fn namespaces(&self) -> Result<Vec<String>> {
      self.inner.namespaces()
    }
    fn drop_namespace(&self, namespace: &str) -> Result<usize> {
      self.inner.drop_namespace(namespace)
    }
  }

  #[tokio::test]
  async fn test_one_broken_type_does_not_block_others() {
    let store = Arc::new(BrokenNamespace {
      inner: MemoryStore::new(),
      broken: queue_namespace("sales"),
    });
    let queue = OfflineQueue::new(store);
    queue.enqueue_with_id("sales", "s1", json!({})).unwrap();
    queue.enqueue_with_id("inventory", "i1", json!({})).unwrap();
    let sink = Arc::new(RecordingSink::default());

    let trigger = SyncTrigger::new(
      queue.clone(),
      sink.clone(),
      vec!["sales".to_string(), "inventory".to_string()],
    );
    let reports = trigger.on_connectivity_restored().await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].entity_type, "inventory");
    assert_eq!(sink.calls(), vec!["i1"]);
  }

  /// Sink that parks until released, to hold a pass open.
  struct GatedSink {
    entered: Notify,
    release: Notify,
  }

  #[async_trait]
  impl MutationSink for GatedSink {
    async fn submit(&self, _mutation: &PendingMutation) -> Result<()> {
      self.entered.notify_one();
      self.release.notified().await;
      Ok(())
    }
  }

  #[tokio::test]
  async fn test_overlapping_trigger_is_skipped() {
    let queue = OfflineQueue::new(Arc::new(MemoryStore::new()));
    queue.enqueue_with_id("sales", "s1", json!({})).unwrap();
    let sink = Arc::new(GatedSink {
      entered: Notify::new(),
      release: Notify::new(),
    });
    let trigger = Arc::new(SyncTrigger::new(
      queue.clone(),
      sink.clone(),
      vec!["sales".to_string()],
    ));

    let first = tokio::spawn({
      let trigger = Arc::clone(&trigger);
      async move { trigger.on_connectivity_restored().await }
    });
    sink.entered.notified().await;

    assert!(trigger.on_connectivity_restored().await.is_empty());

    sink.release.notify_one();
    let reports = first.await.unwrap();
    assert_eq!(reports[0].succeeded, 1);
    assert_eq!(queue.pending_count("sales").unwrap(), 0);
  }
}
