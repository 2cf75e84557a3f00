//! Scheduled background work with an explicit cancellation handle.
//!
//! Every timer in the crate (heartbeats, reconnect backoff, connectivity probes)
//! is a `ScheduledTask`. They run on tokio time, so tests can drive them with a
//! paused clock instead of waiting on the wall clock.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handle to a spawned task.
///
/// Dropping the handle detaches the task; only `cancel` stops it.
#[derive(Debug)]
pub struct ScheduledTask {
  handle: JoinHandle<()>,
}

impl ScheduledTask {
  /// Spawn `future` on the current runtime.
  pub fn spawn<F>(future: F) -> Self
  where
    F: Future<Output = ()> + Send + 'static,
  {
    Self {
      handle: tokio::spawn(future),
    }
  }

  /// Run `future` once `delay` has elapsed.
  pub fn after<F>(delay: Duration, future: F) -> Self
  where
    F: Future<Output = ()> + Send + 'static,
  {
    Self::spawn(async move {
      tokio::time::sleep(delay).await;
      future.await;
    })
  }

  /// Stop the task at its next suspension point.
  pub fn cancel(self) {
    self.handle.abort();
  }

  pub fn is_finished(&self) -> bool {
    self.handle.is_finished()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;

  #[tokio::test(start_paused = true)]
  async fn test_after_fires_once_delay_elapses() {
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let task = ScheduledTask::after(Duration::from_secs(5), async move {
      flag.store(true, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!fired.load(Ordering::SeqCst));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(fired.load(Ordering::SeqCst));
    assert!(task.is_finished());
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_prevents_firing() {
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let task = ScheduledTask::after(Duration::from_secs(5), async move {
      flag.store(true, Ordering::SeqCst);
    });

    task.cancel();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!fired.load(Ordering::SeqCst));
  }
}
