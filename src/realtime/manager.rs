//! Connection lifecycle for the realtime channel.
//!
//! State machine:
//! - `Disconnected -> Connecting` on `connect`, a scheduled retry or a
//!   visibility change
//! - `Connecting -> Connected` when the transport opens
//! - any close or failed open `-> Disconnected`, then a retry after
//!   `interval * attempts` while attempts remain
//! - attempts exhausted `-> Error`, left only through `reconnect`
//!
//! Every timer is a `ScheduledTask`. Each connection attempt carries a
//! generation number and callbacks from an older generation are ignored,
//! so a forced close never races with the connection it replaced.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::RealtimeConfig;
use crate::notify::{Notice, NoticeSink};
use crate::timer::ScheduledTask;

use super::envelope::{Envelope, MessageKind};
use super::registry::{Callback, Subscription, SubscriptionRegistry};
use super::transport::{Connector, Duplex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
  Disconnected,
  Connecting,
  Connected,
  Error,
}

impl ChannelState {
  pub fn as_str(self) -> &'static str {
    match self {
      ChannelState::Disconnected => "disconnected",
      ChannelState::Connecting => "connecting",
      ChannelState::Connected => "connected",
      ChannelState::Error => "error",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
  Visible,
  Hidden,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
  pub enabled: bool,
  pub endpoint: Option<String>,
  pub heartbeat: Duration,
  pub reconnect_interval: Duration,
  pub max_reconnect_attempts: u32,
  pub auto_reconnect: bool,
}

impl ChannelSettings {
  pub fn from_config(config: &RealtimeConfig) -> Self {
    Self {
      enabled: config.enabled,
      endpoint: config.url.clone(),
      heartbeat: config.heartbeat(),
      reconnect_interval: config.reconnect_interval(),
      max_reconnect_attempts: config.max_reconnect_attempts,
      auto_reconnect: config.auto_reconnect,
    }
  }

  /// Endpoint to dial, if the channel is usable at all.
  fn target(&self) -> Option<&str> {
    if self.enabled {
      self.endpoint.as_deref()
    } else {
      None
    }
  }
}

struct Link {
  outbound: mpsc::UnboundedSender<String>,
  reader: ScheduledTask,
}

struct Core {
  state: ChannelState,
  attempts: u32,
  generation: u64,
  link: Option<Link>,
  heartbeat: Option<ScheduledTask>,
  retry: Option<ScheduledTask>,
  visible: bool,
  degraded_notified: bool,
  /// Set by `disconnect`; blocks visibility-driven reconnects
  parked: bool,
  shut_down: bool,
}

struct Shared {
  settings: ChannelSettings,
  connector: Arc<dyn Connector>,
  credential: Option<String>,
  registry: SubscriptionRegistry,
  notices: Arc<dyn NoticeSink>,
  core: Mutex<Core>,
  state_tx: watch::Sender<ChannelState>,
}

/// Owns the realtime connection. Cheap to clone; clones share one channel.
///
/// No method returns an error: transport failures are logged and fed into
/// the retry schedule.
#[derive(Clone)]
pub struct ChannelManager {
  shared: Arc<Shared>,
}

impl ChannelManager {
  pub fn new(
    settings: ChannelSettings,
    connector: Arc<dyn Connector>,
    credential: Option<String>,
    notices: Arc<dyn NoticeSink>,
  ) -> Self {
    let (state_tx, _rx) = watch::channel(ChannelState::Disconnected);
    Self {
      shared: Arc::new(Shared {
        settings,
        connector,
        credential,
        registry: SubscriptionRegistry::new(),
        notices,
        core: Mutex::new(Core {
          state: ChannelState::Disconnected,
          attempts: 0,
          generation: 0,
          link: None,
          heartbeat: None,
          retry: None,
          visible: true,
          degraded_notified: false,
          parked: false,
          shut_down: false,
        }),
        state_tx,
      }),
    }
  }

  fn from_weak(weak: &Weak<Shared>) -> Option<Self> {
    weak.upgrade().map(|shared| Self { shared })
  }

  fn core(&self) -> MutexGuard<'_, Core> {
    self
      .shared
      .core
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn set_state(&self, core: &mut Core, state: ChannelState) {
    if core.state != state {
      debug!(from = core.state.as_str(), to = state.as_str(), "realtime state change");
    }
    core.state = state;
    self.shared.state_tx.send_replace(state);
  }

  pub fn is_enabled(&self) -> bool {
    self.shared.settings.target().is_some()
  }

  pub fn state(&self) -> ChannelState {
    self.core().state
  }

  pub fn attempts(&self) -> u32 {
    self.core().attempts
  }

  pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
    self.shared.state_tx.subscribe()
  }

  pub fn subscribe(&self, kind: MessageKind, callback: Callback) -> Subscription {
    self.shared.registry.subscribe(kind, callback)
  }

  /// Open the channel if it is disconnected.
  pub async fn connect(&self) {
    {
      let mut core = self.core();
      core.parked = false;
    }
    self.open().await;
  }

  async fn open(&self) {
    let Some(endpoint) = self.shared.settings.target().map(str::to_string) else {
      debug!("realtime channel disabled or unconfigured");
      return;
    };

    let generation = {
      let mut core = self.core();
      if core.shut_down || core.state != ChannelState::Disconnected {
        return;
      }
      if let Some(retry) = core.retry.take() {
        retry.cancel();
      }
      core.generation += 1;
      self.set_state(&mut core, ChannelState::Connecting);
      core.generation
    };

    info!(endpoint = %endpoint, "connecting realtime channel");
    match self.shared.connector.open(&endpoint).await {
      Ok(duplex) => self.on_open(generation, duplex),
      Err(e) => {
        warn!(endpoint = %endpoint, error = %e, "realtime connection failed");
        self.on_close(generation);
      }
    }
  }

  fn on_open(&self, generation: u64, duplex: Duplex) {
    let Duplex {
      outbound,
      mut inbound,
    } = duplex;

    let mut core = self.core();
    if core.generation != generation || core.state != ChannelState::Connecting {
      debug!("discarding stale realtime connection");
      return;
    }
    core.attempts = 0;
    core.degraded_notified = false;

    let weak = Arc::downgrade(&self.shared);
    let reader = ScheduledTask::spawn(async move {
      while let Some(line) = inbound.recv().await {
        match ChannelManager::from_weak(&weak) {
          Some(manager) => manager.handle_line(&line),
          None => return,
        }
      }
      if let Some(manager) = ChannelManager::from_weak(&weak) {
        manager.on_close(generation);
      }
    });

    core.link = Some(Link { outbound, reader });
    self.set_state(&mut core, ChannelState::Connected);
    if core.visible {
      core.heartbeat = Some(self.start_heartbeat(generation));
    }

    match &self.shared.credential {
      Some(token) => {
        let auth = Envelope::new(MessageKind::Auth, json!({ "token": token }));
        Self::write(&core, &auth);
      }
      None => debug!("no credential configured, skipping realtime auth"),
    }
    info!("realtime channel connected");
  }

  fn handle_line(&self, line: &str) {
    let envelope = match Envelope::decode(line) {
      Ok(envelope) => envelope,
      Err(e) => {
        warn!(error = %e, "dropping realtime message");
        return;
      }
    };

    match envelope.kind {
      MessageKind::Pong => trace!("pong"),
      MessageKind::Ping => {
        let core = self.core();
        if core.state == ChannelState::Connected {
          Self::write(&core, &Envelope::new(MessageKind::Pong, Value::Null));
        }
      }
      MessageKind::Auth => debug!("realtime auth acknowledged"),
      _ => {
        let delivered = self.shared.registry.dispatch(&envelope);
        trace!(kind = %envelope.kind, delivered, "dispatched realtime message");
      }
    }
  }

  fn write(core: &Core, envelope: &Envelope) -> bool {
    let Some(link) = &core.link else {
      return false;
    };
    match envelope.encode() {
      Ok(line) => link.outbound.send(line).is_ok(),
      Err(e) => {
        warn!(error = %e, "could not encode realtime message");
        false
      }
    }
  }

  /// Send a message. Dropped with a warning unless connected.
  pub fn send(&self, kind: MessageKind, data: Value) -> bool {
    let core = self.core();
    if core.state != ChannelState::Connected {
      warn!(kind = %kind, state = core.state.as_str(), "realtime channel not connected, dropping message");
      return false;
    }
    Self::write(&core, &Envelope::new(kind, data))
  }

  fn start_heartbeat(&self, generation: u64) -> ScheduledTask {
    let weak = Arc::downgrade(&self.shared);
    // interval_at panics on a zero period.
    let period = self.shared.settings.heartbeat.max(Duration::from_millis(1));
    ScheduledTask::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let Some(manager) = ChannelManager::from_weak(&weak) else {
          return;
        };
        if !manager.ping(generation) {
          return;
        }
      }
    })
  }

  fn ping(&self, generation: u64) -> bool {
    let core = self.core();
    if core.generation != generation || core.state != ChannelState::Connected {
      return false;
    }
    trace!("ping");
    Self::write(&core, &Envelope::new(MessageKind::Ping, Value::Null))
  }

  fn on_close(&self, generation: u64) {
    let notice = {
      let mut core = self.core();
      if core.generation != generation
        || matches!(core.state, ChannelState::Disconnected | ChannelState::Error)
      {
        return;
      }

      // The reader may be the caller, so it is detached rather than aborted.
      drop(core.link.take());
      if let Some(heartbeat) = core.heartbeat.take() {
        heartbeat.cancel();
      }
      if let Some(retry) = core.retry.take() {
        retry.cancel();
      }
      self.set_state(&mut core, ChannelState::Disconnected);

      let settings = &self.shared.settings;
      if !settings.auto_reconnect || core.shut_down {
        info!("realtime channel closed");
        None
      } else if core.attempts < settings.max_reconnect_attempts {
        core.attempts += 1;
        let delay = settings.reconnect_interval.saturating_mul(core.attempts);
        info!(
          attempt = core.attempts,
          max = settings.max_reconnect_attempts,
          delay_ms = delay.as_millis() as u64,
          "realtime channel closed, retrying"
        );
        core.retry = Some(self.schedule_retry(delay));
        None
      } else {
        warn!(
          attempts = core.attempts,
          "realtime reconnect attempts exhausted"
        );
        self.set_state(&mut core, ChannelState::Error);
        if core.degraded_notified {
          None
        } else {
          core.degraded_notified = true;
          Some(Notice::warning(
            "Live updates unavailable",
            "Lost connection to the live update service. Stock levels may be out of date until you reconnect.",
          ))
        }
      }
    };

    if let Some(notice) = notice {
      self.shared.notices.notify(notice);
    }
  }

  fn schedule_retry(&self, delay: Duration) -> ScheduledTask {
    let weak = Arc::downgrade(&self.shared);
    ScheduledTask::after(delay, async move {
      let Some(manager) = ChannelManager::from_weak(&weak) else {
        return;
      };
      drop(manager.core().retry.take());
      manager.open().await;
    })
  }

  fn force_close(core: &mut Core) {
    core.generation += 1;
    if let Some(link) = core.link.take() {
      link.reader.cancel();
    }
    if let Some(heartbeat) = core.heartbeat.take() {
      heartbeat.cancel();
    }
    if let Some(retry) = core.retry.take() {
      retry.cancel();
    }
  }

  /// Drop any live connection, reset the attempt counter and connect again.
  /// This is the only way out of `Error`.
  pub async fn reconnect(&self) {
    {
      let mut core = self.core();
      Self::force_close(&mut core);
      core.attempts = 0;
      core.parked = false;
      self.set_state(&mut core, ChannelState::Disconnected);
    }
    info!("manual realtime reconnect");
    self.open().await;
  }

  /// Close without scheduling a retry.
  pub fn disconnect(&self) {
    let mut core = self.core();
    Self::force_close(&mut core);
    core.parked = true;
    self.set_state(&mut core, ChannelState::Disconnected);
    info!("realtime channel disconnected");
  }

  /// Stop every task. Later calls to `connect` do nothing.
  pub fn shutdown(&self) {
    let mut core = self.core();
    Self::force_close(&mut core);
    core.shut_down = true;
    self.set_state(&mut core, ChannelState::Disconnected);
  }

  pub async fn set_visibility(&self, visibility: Visibility) {
    let reconnect = {
      let mut core = self.core();
      core.visible = visibility == Visibility::Visible;
      match visibility {
        Visibility::Hidden => {
          if let Some(heartbeat) = core.heartbeat.take() {
            heartbeat.cancel();
            debug!("heartbeat suspended");
          }
          false
        }
        Visibility::Visible => match core.state {
          ChannelState::Connected => {
            if core.heartbeat.is_none() {
              let generation = core.generation;
              core.heartbeat = Some(self.start_heartbeat(generation));
              debug!("heartbeat resumed");
            }
            false
          }
          ChannelState::Disconnected => self.shared.settings.auto_reconnect && !core.parked,
          _ => false,
        },
      }
    };

    if reconnect {
      self.open().await;
    }
  }
}
