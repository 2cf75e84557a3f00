use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

/// Console events
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
  /// One line typed at the console
  Command(String),
  /// Stdin reached end of file
  InputClosed,
}

/// Event handler that turns console input lines into events
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  /// Read lines from stdin
  pub fn new() -> Self {
    Self::from_reader(tokio::io::stdin())
  }

  /// Read lines from any async reader
  pub fn from_reader<R>(reader: R) -> Self
  where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut lines = BufReader::new(reader).lines();
      loop {
        match lines.next_line().await {
          Ok(Some(line)) => {
            if line.trim().is_empty() {
              continue;
            }
            if tx.send(Event::Command(line)).is_err() {
              break;
            }
          }
          Ok(None) => {
            let _ = tx.send(Event::InputClosed);
            break;
          }
          Err(e) => {
            debug!(error = %e, "console read error");
            let _ = tx.send(Event::InputClosed);
            break;
          }
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}
