//! Line-oriented duplex transport for the realtime channel.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

/// An open connection: one text frame per channel item.
///
/// The inbound receiver yields `None` once the peer has closed.
pub struct Duplex {
  pub outbound: mpsc::UnboundedSender<String>,
  pub inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync {
  async fn open(&self, endpoint: &str) -> Result<Duplex>;
}

/// Newline-delimited frames over plain TCP.
#[derive(Debug, Default, Clone)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
  async fn open(&self, endpoint: &str) -> Result<Duplex> {
    let addr = endpoint.strip_prefix("tcp://").unwrap_or(endpoint);
    let stream = TcpStream::connect(addr)
      .await
      .map_err(|e| eyre!("Failed to connect to {}: {}", addr, e))?;
    let (reader, mut writer) = stream.into_split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
      while let Some(line) = out_rx.recv().await {
        if writer.write_all(line.as_bytes()).await.is_err() {
          break;
        }
        if writer.write_all(b"\n").await.is_err() {
          break;
        }
      }
      let _ = writer.shutdown().await;
    });

    let peer = addr.to_string();
    tokio::spawn(async move {
      let mut lines = BufReader::new(reader).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if in_tx.send(line).is_err() {
              break;
            }
          }
          Ok(None) => {
            debug!(peer = %peer, "realtime peer closed connection");
            break;
          }
          Err(e) => {
            debug!(peer = %peer, error = %e, "realtime read error");
            break;
          }
        }
      }
    });

    Ok(Duplex {
      outbound: out_tx,
      inbound: in_rx,
    })
  }
}
