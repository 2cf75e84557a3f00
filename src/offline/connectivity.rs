//! Online/offline tracking.
//!
//! The monitor polls a cheap probe on an interval and publishes the result
//! on a watch channel. The offline to online edge starts a sync pass.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::timer::ScheduledTask;

use super::trigger::SyncTrigger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Offline,
}

impl Connectivity {
  pub fn is_online(self) -> bool {
    self == Connectivity::Online
  }
}

/// Reachability check against the backend.
#[async_trait]
pub trait Probe: Send + Sync {
  async fn probe(&self) -> bool;
}

pub struct ConnectivityMonitor {
  tx: watch::Sender<Connectivity>,
}

impl ConnectivityMonitor {
  pub fn new(initial: Connectivity) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self { tx }
  }

  pub fn current(&self) -> Connectivity {
    *self.tx.borrow()
  }

  pub fn is_online(&self) -> bool {
    self.current().is_online()
  }

  pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
    self.tx.subscribe()
  }

  /// Record a new observation. Returns true when it moves us from offline
  /// to online.
  pub fn observe(&self, status: Connectivity) -> bool {
    let previous = self.tx.send_replace(status);
    if previous == status {
      return false;
    }
    match status {
      Connectivity::Online => info!("connection restored"),
      Connectivity::Offline => warn!("connection lost, working offline"),
    }
    previous == Connectivity::Offline && status == Connectivity::Online
  }

  /// Probe every `every` and feed the results to `observe`. Each restore
  /// edge runs a sync pass on `trigger` in its own task so slow replays do
  /// not hold up probing.
  pub fn spawn(
    self: Arc<Self>,
    probe: Arc<dyn Probe>,
    every: Duration,
    trigger: Arc<SyncTrigger>,
  ) -> ScheduledTask {
    ScheduledTask::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let status = if probe.probe().await {
          Connectivity::Online
        } else {
          Connectivity::Offline
        };
        if self.observe(status) {
          let trigger = Arc::clone(&trigger);
          tokio::spawn(async move {
            trigger.on_connectivity_restored().await;
          });
        }
      }
    })
  }
}
