//! Durable per-entity-type queue of writes made while offline.
//!
//! Each record lives in the `"{entity_type}-offline"` namespace under its own
//! id, so enqueue and removal are single-key operations. Record ids are
//! unique per write: two writes naming the same entity are two records. Replay is
//! at-least-once: a record acknowledged by the backend whose local deletion
//! then fails is submitted again on the next drain. The mutation id travels
//! with every submission so an idempotent backend can ignore the repeat.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::Store;

pub const OFFLINE_SUFFIX: &str = "-offline";

/// Namespace holding the queue for one entity type.
pub fn queue_namespace(entity_type: &str) -> String {
  format!("{}{}", entity_type, OFFLINE_SUFFIX)
}

/// A write waiting for the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
  /// Queue key, unique per write
  pub id: String,
  pub entity_type: String,
  pub payload: Value,
  pub created_at: DateTime<Utc>,
}

impl PendingMutation {
  /// The entity the payload names through its own `"id"` field, if any.
  pub fn entity_id(&self) -> Option<String> {
    match self.payload.get("id")? {
      Value::String(s) if !s.is_empty() => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    }
  }
}

/// Where drained mutations are sent.
#[async_trait]
pub trait MutationSink: Send + Sync {
  /// Apply one mutation on the backend. `Ok` means acknowledged.
  async fn submit(&self, mutation: &PendingMutation) -> Result<()>;
}

/// The backend answered but refused the mutation.
///
/// Sinks return this (inside the report) for an error status so callers can
/// tell a refusal from an unreachable backend with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
  pub entity_type: String,
  pub id: String,
  pub status: u16,
}

impl fmt::Display for Rejected {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Backend rejected {} mutation {} with status {}",
      self.entity_type, self.id, self.status
    )
  }
}

impl std::error::Error for Rejected {}

/// Outcome of one drain pass over one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub entity_type: String,
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: usize,
  /// Acknowledged by the backend but still queued locally
  pub stuck: usize,
}

impl DrainReport {
  /// Records still queued after the pass.
  pub fn remaining(&self) -> usize {
    self.failed + self.stuck
  }
}

#[derive(Clone)]
pub struct OfflineQueue {
  store: Arc<dyn Store>,
}

impl OfflineQueue {
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self { store }
  }

  /// Whether queued writes are kept at all.
  pub fn is_durable(&self) -> bool {
    self.store.is_persistent()
  }

  /// Persist a mutation and return its id.
  ///
  /// The id is derived from a process-wide sequence, the enqueue time and the
  /// payload, so repeated writes to one entity never share a record.
  pub fn enqueue(&self, entity_type: &str, payload: Value) -> Result<String> {
    self.persist(Self::stage(entity_type, payload))
  }

  /// Build a mutation without queueing it, assigning its id the same way
  /// `enqueue` does.
  pub fn stage(entity_type: &str, payload: Value) -> PendingMutation {
    let created_at = Utc::now();
    PendingMutation {
      id: derive_id(&payload, created_at),
      entity_type: entity_type.to_string(),
      payload,
      created_at,
    }
  }

  /// Persist a mutation under a caller-supplied id.
  ///
  /// Fails if a record with that id is already queued.
  pub fn enqueue_with_id(&self, entity_type: &str, id: &str, payload: Value) -> Result<String> {
    self.persist(PendingMutation {
      id: id.to_string(),
      entity_type: entity_type.to_string(),
      payload,
      created_at: Utc::now(),
    })
  }

  /// Queue an already staged mutation.
  pub fn persist(&self, mutation: PendingMutation) -> Result<String> {
    if mutation.entity_type.is_empty() {
      return Err(eyre!("Entity type must not be empty"));
    }

    let namespace = queue_namespace(&mutation.entity_type);
    if self.store.get(&namespace, &mutation.id)?.is_some() {
      return Err(eyre!(
        "Mutation {} is already queued for {}",
        mutation.id,
        mutation.entity_type
      ));
    }

    let bytes = serde_json::to_vec(&mutation)
      .map_err(|e| eyre!("Failed to serialize mutation {}: {}", mutation.id, e))?;
    self.store.put(&namespace, &mutation.id, &bytes)?;

    info!(
      entity_type = %mutation.entity_type,
      id = %mutation.id,
      "queued offline mutation"
    );
    Ok(mutation.id)
  }

  /// Pending records for one entity type, in insertion order.
  ///
  /// Unreadable records are skipped with a warning.
  pub fn pending(&self, entity_type: &str) -> Result<Vec<PendingMutation>> {
    let namespace = queue_namespace(entity_type);
    let entries = self.store.list(&namespace, "")?;

    Ok(
      entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_slice(&entry.value) {
          Ok(mutation) => Some(mutation),
          Err(e) => {
            warn!(namespace = %namespace, key = %entry.key, error = %e, "skipping unreadable mutation");
            None
          }
        })
        .collect(),
    )
  }

  pub fn pending_count(&self, entity_type: &str) -> Result<usize> {
    Ok(self.store.list(&queue_namespace(entity_type), "")?.len())
  }

  /// Pending counts per entity type, for "N changes pending sync".
  pub fn pending_summary(&self, entity_types: &[String]) -> Result<Vec<(String, usize)>> {
    entity_types
      .iter()
      .map(|t| Ok((t.clone(), self.pending_count(t)?)))
      .collect()
  }

  /// Replay every pending record of one entity type, oldest first.
  ///
  /// Acknowledged records are removed. A failed record stays queued and the
  /// pass moves on; it is not retried until the next drain.
  pub async fn drain(&self, entity_type: &str, sink: &dyn MutationSink) -> Result<DrainReport> {
    let namespace = queue_namespace(entity_type);
    let pending = self.pending(entity_type)?;
    let mut report = DrainReport {
      entity_type: entity_type.to_string(),
      ..DrainReport::default()
    };

    for mutation in pending {
      report.attempted += 1;

      if let Err(e) = sink.submit(&mutation).await {
        warn!(entity_type, id = %mutation.id, error = %e, "replay failed, keeping mutation");
        report.failed += 1;
        continue;
      }

      match self.store.delete(&namespace, &mutation.id) {
        Ok(_) => {
          debug!(entity_type, id = %mutation.id, "replayed mutation");
          report.succeeded += 1;
        }
        Err(e) => {
          error!(
            entity_type,
            id = %mutation.id,
            error = %e,
            "mutation was applied but could not be removed; it will be replayed again"
          );
          report.stuck += 1;
        }
      }
    }

    if report.attempted > 0 {
      info!(
        entity_type,
        attempted = report.attempted,
        succeeded = report.succeeded,
        failed = report.failed,
        stuck = report.stuck,
        "drain finished"
      );
    }
    Ok(report)
  }
}

fn derive_id(payload: &Value, created_at: DateTime<Utc>) -> String {
  // Separates identical payloads enqueued within the same clock tick.
  static SEQUENCE: AtomicU64 = AtomicU64::new(0);

  let mut hasher = Sha256::new();
  hasher.update(SEQUENCE.fetch_add(1, Ordering::Relaxed).to_le_bytes());
  hasher.update(created_at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true).as_bytes());
  hasher.update(payload.to_string().as_bytes());
  hex::encode(&hasher.finalize()[..16])
}
