//! Fan-out Dispatcher
//!
//! Consumes upstream session events. On every tick batch it builds one
//! payload per client from a copy of the session table and hands each
//! delivery to its own task, so a slow client never holds up the next batch
//! or other clients.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::sessions::{ClientId, ClientSessionTable};
use crate::application::dto::{OptionQuote, QuotePayload, UNDERLYING_LEG};
use crate::application::ports::{ClientChannel, SessionEvent};
use crate::domain::pricing::{self, LegKind};
use crate::domain::subscription::StreamHandle;
use crate::infrastructure::metrics;

/// Build a client payload from its leg bindings.
///
/// Legs without a resolvable price are left out.
#[must_use]
pub fn build_payload(legs: &[(String, Arc<StreamHandle>)]) -> QuotePayload {
    let mut payload = QuotePayload::default();

    for (leg_id, handle) in legs {
        let snapshot = handle.snapshot();
        if leg_id == UNDERLYING_LEG {
            payload.underlying_price = pricing::underlying_price(&snapshot);
        } else if let Some(quote) = pricing::resolve(&snapshot, LegKind::Derivative) {
            payload.options.insert(
                leg_id.clone(),
                OptionQuote {
                    mark: quote.price,
                    iv: quote.iv,
                },
            );
        }
    }

    payload
}

/// Pushes per-client snapshots on every tick batch.
pub struct FanoutDispatcher {
    sessions: Arc<ClientSessionTable>,
}

impl FanoutDispatcher {
    /// Create a dispatcher over the session table.
    #[must_use]
    pub const fn new(sessions: Arc<ClientSessionTable>) -> Self {
        Self { sessions }
    }

    /// Run until the event channel closes or `cancel` fires.
    pub async fn run(self, mut events: mpsc::Receiver<SessionEvent>, cancel: CancellationToken) {
        tracing::info!("Fan-out dispatcher started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Fan-out dispatcher cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(SessionEvent::TickBatch(con_ids)) => {
                        metrics::record_tick_batch();
                        let sent = self.dispatch();
                        tracing::trace!(streams = con_ids.len(), payloads = sent, "Tick batch dispatched");
                    }
                    Some(SessionEvent::Disconnected) => {
                        tracing::warn!("Upstream session disconnected");
                    }
                    None => {
                        tracing::info!("Upstream event channel closed");
                        break;
                    }
                },
            }
        }
    }

    /// Build and queue payloads for every subscribed client.
    ///
    /// Must be called from within a Tokio runtime. Returns the number of
    /// deliveries spawned; each is counted as sent only once it succeeds.
    pub fn dispatch(&self) -> usize {
        let started = Instant::now();
        let mut spawned = 0usize;

        for client in self.sessions.snapshot_bindings() {
            let payload = build_payload(&client.legs);
            if payload.is_empty() {
                continue;
            }

            let json = match payload.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(client_id = client.client_id, error = %e, "Failed to serialize payload");
                    continue;
                }
            };

            tokio::spawn(deliver(client.client_id, client.channel, json));
            spawned += 1;
        }

        metrics::record_dispatch_duration(started.elapsed());
        spawned
    }
}

/// Send one payload, counting it only once the channel accepted it.
async fn deliver(client_id: ClientId, channel: Arc<dyn ClientChannel>, json: String) -> bool {
    match channel.send(json).await {
        Ok(()) => {
            metrics::record_payloads_sent(1);
            true
        }
        Err(e) => {
            metrics::record_delivery_failure();
            tracing::debug!(client_id, error = %e, "Payload not delivered");
            false
        }
    }
}
