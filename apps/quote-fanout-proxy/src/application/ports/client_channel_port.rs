//! Client Channel Port (Driven Port)
//!
//! Outbound half of one client's message channel.

use async_trait::async_trait;

/// Payload delivery error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// The client's channel is closed.
    #[error("client channel closed")]
    ChannelClosed,

    /// The client's outbound queue is full; the payload was dropped.
    #[error("client queue full")]
    QueueFull,
}

/// Port for sending text payloads to one connected client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClientChannel: Send + Sync {
    /// Queue a text payload for delivery.
    async fn send(&self, payload: String) -> Result<(), DeliveryError>;

    /// Peer description for logging.
    fn peer(&self) -> String;
}
