use crate::backend::{BackendClient, Fetch, Request, Response};
use crate::cache::{CacheEngine, NoopStore, SqliteStore, Store};
use crate::commands::{self, Action, COMMANDS};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::notify::{ActivityFeed, NotificationDispatcher};
use crate::offline::{
  Connectivity, ConnectivityMonitor, DrainReport, MutationSink, OfflineQueue, Probe, Rejected,
  SyncTrigger,
};
use crate::realtime::{ChannelManager, ChannelSettings, Connector, TcpConnector, Visibility};
use crate::timer::ScheduledTask;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use url::Url;

/// Result of an offline-capable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
  /// Applied by the backend
  Delivered,
  /// Stored locally under this id, to be replayed on reconnect
  Queued(String),
}

/// External collaborators the app is assembled from.
pub struct Parts {
  pub store: Arc<dyn Store>,
  pub network: Arc<dyn Fetch>,
  pub sink: Arc<dyn MutationSink>,
  pub probe: Arc<dyn Probe>,
  pub connector: Arc<dyn Connector>,
}

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  cache: Arc<CacheEngine>,
  queue: OfflineQueue,
  sink: Arc<dyn MutationSink>,
  probe: Arc<dyn Probe>,
  sync: Arc<SyncTrigger>,
  connectivity: Arc<ConnectivityMonitor>,
  channel: ChannelManager,
  feed: Arc<ActivityFeed>,
  dispatcher: NotificationDispatcher,

  /// Background tasks cancelled at shutdown
  tasks: Vec<ScheduledTask>,

  /// Whether to quit
  should_quit: bool,
}

/// Open the persistent store, or fall back to a pass-through one.
pub fn open_store(config: &Config) -> Arc<dyn Store> {
  if config.cache.disabled {
    info!("cache disabled, running as a purely online client");
    return Arc::new(NoopStore);
  }
  match SqliteStore::open_default() {
    Ok(store) => Arc::new(store),
    Err(e) => {
      warn!(error = %e, "could not open local store, offline support disabled");
      Arc::new(NoopStore)
    }
  }
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let backend = Arc::new(BackendClient::new(&config)?);
    let store = open_store(&config);
    Self::with_parts(
      config,
      Parts {
        store,
        network: backend.clone(),
        sink: backend.clone(),
        probe: backend,
        connector: Arc::new(TcpConnector),
      },
    )
  }

  pub fn with_parts(config: Config, parts: Parts) -> Result<Self> {
    let origin = Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", config.origin, e))?;

    let cache = Arc::new(CacheEngine::new(
      parts.store.clone(),
      parts.network,
      origin,
      &config.cache,
    ));
    let queue = OfflineQueue::new(parts.store);
    let sync = Arc::new(SyncTrigger::new(
      queue.clone(),
      parts.sink.clone(),
      config.queue.entity_types.clone(),
    ));

    let feed = Arc::new(ActivityFeed::new(config.notifications.capacity));
    let channel = ChannelManager::new(
      ChannelSettings::from_config(&config.realtime),
      parts.connector,
      Config::api_token(),
      feed.clone(),
    );
    let dispatcher = NotificationDispatcher::attach(&channel, feed.clone());

    Ok(Self {
      config,
      cache,
      queue,
      sink: parts.sink,
      probe: parts.probe,
      sync,
      connectivity: Arc::new(ConnectivityMonitor::new(Connectivity::Online)),
      channel,
      feed,
      dispatcher,
      tasks: Vec::new(),
      should_quit: false,
    })
  }

  pub fn cache(&self) -> &CacheEngine {
    &self.cache
  }

  pub fn queue(&self) -> &OfflineQueue {
    &self.queue
  }

  pub fn channel(&self) -> &ChannelManager {
    &self.channel
  }

  pub fn connectivity(&self) -> &ConnectivityMonitor {
    &self.connectivity
  }

  /// Install the cache, start probing connectivity and open the channel.
  pub async fn start(&mut self) {
    self.cache.install().await;
    // Nothing from an older version is still running at process start.
    self.cache.activate();

    // Probe once up front so the first edge is real.
    let status = if self.probe.probe().await {
      Connectivity::Online
    } else {
      Connectivity::Offline
    };
    self.connectivity.observe(status);

    let every = Duration::from_secs(self.config.connectivity.probe_interval_secs.max(1));
    self.tasks.push(Arc::clone(&self.connectivity).spawn(
      self.probe.clone(),
      every,
      self.sync.clone(),
    ));

    if status.is_online() {
      self.sync_now().await;
    }
    self.channel.connect().await;
  }

  /// Run the console loop until `quit`, end of input or Ctrl-C.
  pub async fn run(&mut self) -> Result<()> {
    self.start().await;

    let mut events = EventHandler::new();
    let mut toasts = self.feed.watch();
    let mut status = self.connectivity.subscribe();

    println!("till ready, connected to {} (type 'help' for commands)", self.config.origin);

    while !self.should_quit {
      tokio::select! {
        event = events.next() => match event {
          Some(Event::Command(line)) => self.execute_command(&line).await,
          Some(Event::InputClosed) | None => self.should_quit = true,
        },
        toast = toasts.recv() => match toast {
          Ok(toast) => println!("{}", toast),
          Err(RecvError::Lagged(skipped)) => warn!(skipped, "toast stream lagged"),
          Err(RecvError::Closed) => {}
        },
        changed = status.changed() => {
          if changed.is_ok() {
            match *status.borrow_and_update() {
              Connectivity::Online => println!("back online, syncing queued changes"),
              Connectivity::Offline => println!("offline, changes will be queued"),
            }
          }
        },
        _ = tokio::signal::ctrl_c() => self.should_quit = true,
      }
    }

    self.shutdown();
    Ok(())
  }

  async fn execute_command(&mut self, line: &str) {
    let Some((cmd, args)) = commands::parse(line) else {
      println!("unknown command: {} (try 'help')", line.trim());
      return;
    };

    match cmd.action {
      Action::Status => self.print_status(),
      Action::Pending => match self.pending_summary() {
        Ok(summary) => print_pending(&summary),
        Err(e) => println!("could not read queue: {}", e),
      },
      Action::Sync => {
        let reports = self.sync_now().await;
        print_reports(&reports);
      }
      Action::Activity => {
        let recent = self.dispatcher.recent();
        if recent.is_empty() {
          println!("no recent activity");
        }
        for toast in recent {
          println!("{}", toast);
        }
      }
      Action::Reconnect => self.channel.reconnect().await,
      Action::Hide => self.channel.set_visibility(Visibility::Hidden).await,
      Action::Show => self.channel.set_visibility(Visibility::Visible).await,
      Action::SkipWaiting => {
        if self.cache.skip_waiting() {
          println!("switched to cache version {}", self.config.cache.version);
        } else {
          println!("no cache version waiting");
        }
      }
      Action::Submit => {
        let (entity_type, payload) = args.split_once(char::is_whitespace).unwrap_or((args, "{}"));
        match serde_json::from_str::<Value>(payload) {
          Ok(payload) => match self.submit(entity_type, payload).await {
            Ok(SubmitOutcome::Delivered) => println!("{} saved", entity_type),
            Ok(SubmitOutcome::Queued(id)) => println!("{} queued offline as {}", entity_type, id),
            Err(e) => println!("submit failed: {}", e),
          },
          Err(e) => println!("invalid JSON payload: {}", e),
        }
      }
      Action::Help => {
        for cmd in COMMANDS {
          println!("  {:<13} {}", cmd.name, cmd.description);
        }
      }
      Action::Quit => self.should_quit = true,
    }
  }

  fn print_status(&self) {
    println!(
      "network: {:?}  channel: {} (attempts {})  cache: {:?}",
      self.connectivity.current(),
      self.channel.state().as_str(),
      self.channel.attempts(),
      self.cache.lifecycle()
    );
  }

  /// Read a same-origin path through the cache engine.
  pub async fn fetch(&self, path: &str) -> Result<Response> {
    let url = Url::parse(&self.config.origin)
      .and_then(|origin| origin.join(path))
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))?;
    self.cache.handle(&Request::get(url)).await
  }

  /// Write an entity, queueing it when the backend cannot be reached.
  ///
  /// A backend that answers with an error status is reported as an error,
  /// not queued.
  pub async fn submit(&self, entity_type: &str, payload: Value) -> Result<SubmitOutcome> {
    let mutation = OfflineQueue::stage(entity_type, payload);

    if self.connectivity.is_online() {
      match self.sink.submit(&mutation).await {
        Ok(()) => return Ok(SubmitOutcome::Delivered),
        Err(e) if e.downcast_ref::<Rejected>().is_some() => return Err(e),
        Err(e) => {
          warn!(entity_type, error = %e, "backend unreachable, queueing write");
          self.connectivity.observe(Connectivity::Offline);
        }
      }
    }

    if !self.queue.is_durable() {
      return Err(eyre!(
        "Offline and no local store is available; {} was not saved",
        entity_type
      ));
    }
    let id = self.queue.persist(mutation)?;
    Ok(SubmitOutcome::Queued(id))
  }

  /// Drain every configured queue now.
  pub async fn sync_now(&self) -> Vec<DrainReport> {
    self.sync.on_connectivity_restored().await
  }

  pub fn pending_summary(&self) -> Result<Vec<(String, usize)>> {
    self.queue.pending_summary(self.sync.entity_types())
  }

  /// Stop background work.
  pub fn shutdown(&mut self) {
    self.dispatcher.detach();
    self.channel.shutdown();
    for task in self.tasks.drain(..) {
      task.cancel();
    }
    info!("till stopped");
  }
}

pub fn print_pending(summary: &[(String, usize)]) {
  let total: usize = summary.iter().map(|(_, n)| n).sum();
  if total == 0 {
    println!("nothing pending");
    return;
  }
  println!("{} change(s) pending sync", total);
  for (entity_type, count) in summary {
    println!("  {:<12} {}", entity_type, count);
  }
}

pub fn print_reports(reports: &[DrainReport]) {
  if reports.is_empty() {
    println!("sync skipped");
  }
  for report in reports {
    println!(
      "  {:<12} attempted {}, synced {}, failed {}, stuck {}",
      report.entity_type, report.attempted, report.succeeded, report.failed, report.stuck
    );
  }
}
