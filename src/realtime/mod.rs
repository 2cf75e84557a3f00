//! Realtime push channel.
//!
//! This module provides:
//! - The JSON envelope spoken on the channel
//! - A per-kind subscription registry
//! - A connection manager with heartbeat and linear reconnect backoff
//! - A newline-delimited TCP transport

mod envelope;
mod manager;
mod registry;
mod transport;

pub use envelope::{Envelope, MessageKind};
pub use manager::{ChannelManager, ChannelSettings, ChannelState, Visibility};
pub use registry::{Callback, Subscription, SubscriptionRegistry};
pub use transport::{Connector, Duplex, TcpConnector};
