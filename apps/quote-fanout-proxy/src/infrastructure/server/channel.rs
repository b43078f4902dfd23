//! Queued client channel.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::application::ports::{ClientChannel, DeliveryError};

/// [`ClientChannel`] backed by a bounded queue drained by the socket writer.
///
/// Sends never wait: a full queue drops the payload.
#[derive(Debug, Clone)]
pub struct QueuedChannel {
    tx: mpsc::Sender<String>,
    peer: String,
}

impl QueuedChannel {
    /// Wrap the sending half of a connection's outbound queue.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<String>, peer: String) -> Self {
        Self { tx, peer }
    }
}

#[async_trait]
impl ClientChannel for QueuedChannel {
    async fn send(&self, payload: String) -> Result<(), DeliveryError> {
        self.tx.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::ChannelClosed,
        })
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queues_until_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let channel = QueuedChannel::new(tx, "127.0.0.1:5000".to_string());

        channel.send("a".to_string()).await.unwrap();
        let overflow = channel.send("b".to_string()).await;

        assert!(matches!(overflow, Err(DeliveryError::QueueFull)));
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn closed_receiver_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let channel = QueuedChannel::new(tx, "peer".to_string());

        let result = channel.send("a".to_string()).await;

        assert!(matches!(result, Err(DeliveryError::ChannelClosed)));
        assert_eq!(channel.peer(), "peer");
    }
}
