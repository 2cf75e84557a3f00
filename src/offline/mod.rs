//! Offline write support.
//!
//! This module provides:
//! - A durable queue of writes per entity type
//! - Replay of queued writes when connectivity returns
//! - Connectivity tracking driven by a periodic probe

mod connectivity;
mod queue;
mod trigger;

pub use connectivity::{Connectivity, ConnectivityMonitor, Probe};
pub use queue::{
  queue_namespace, DrainReport, MutationSink, OfflineQueue, PendingMutation, Rejected,
};
pub use trigger::SyncTrigger;
