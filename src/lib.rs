//! Offline-first resilience layer for a retail point-of-sale client.
//!
//! - `cache`: cache-first and network-first serving of reads with an
//!   offline fallback
//! - `offline`: durable queue of writes made offline, replayed on reconnect
//! - `realtime`: push channel with heartbeat and reconnect backoff
//! - `notify`: toasts and recent activity from realtime events
//! - `app`: the context object that wires them together

pub mod app;
pub mod backend;
pub mod cache;
pub mod commands;
pub mod config;
pub mod event;
pub mod logging;
pub mod notify;
pub mod offline;
pub mod realtime;
pub mod timer;
