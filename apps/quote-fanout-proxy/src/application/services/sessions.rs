//! Client Session Table
//!
//! Per-client leg bindings onto shared upstream streams. Every binding holds
//! exactly one watcher on its stream; bindings are released exactly once,
//! either when replaced by a new `subscribe` or on disconnect.
//!
//! The table lock is never held across an await point: qualification happens
//! first, bookkeeping after.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::application::dto::{OptionLegRequest, QuotePayload, UNDERLYING_LEG};
use crate::application::ports::{ClientChannel, MarketDataSession, QualificationError};
use crate::domain::instrument::{ContractSpec, ExtraTicks};
use crate::domain::pricing;
use crate::domain::subscription::{StreamHandle, StreamRegistry};
use crate::infrastructure::metrics;

/// Identifier assigned to each connected client.
pub type ClientId = u64;

/// Default wait for the first snapshot in `sync_underlying`.
pub const DEFAULT_SYNC_GRACE: Duration = Duration::from_millis(500);

// =============================================================================
// Errors / Reports
// =============================================================================

/// Errors from client subscription requests.
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    /// The underlying could not be qualified; prior subscriptions are kept.
    #[error("underlying {symbol} could not be qualified: {source}")]
    Underlying {
        /// Requested symbol.
        symbol: String,
        /// Qualification failure.
        #[source]
        source: QualificationError,
    },

    /// The client is not (or no longer) connected.
    #[error("unknown client {0}")]
    UnknownClient(ClientId),
}

/// Outcome of a successful `subscribe`.
#[derive(Debug, Default)]
pub struct SubscribeReport {
    /// Option legs that were bound.
    pub bound_legs: Vec<String>,
    /// Option legs that were skipped, with the reason.
    pub failed_legs: Vec<(String, QualificationError)>,
}

/// One client's current bindings, copied out for the dispatcher.
#[derive(Clone)]
pub struct ClientBindings {
    /// Client id.
    pub client_id: ClientId,
    /// Outbound channel.
    pub channel: Arc<dyn ClientChannel>,
    /// Leg id to stream handle.
    pub legs: Vec<(String, Arc<StreamHandle>)>,
}

// =============================================================================
// Session Table
// =============================================================================

struct ClientSession {
    channel: Arc<dyn ClientChannel>,
    peer: String,
    legs: HashMap<String, Arc<StreamHandle>>,
}

enum Bind {
    Bound,
    Replaced(Arc<StreamHandle>),
    Gone,
}

/// Table of connected clients and their subscriptions.
pub struct ClientSessionTable {
    session: Arc<dyn MarketDataSession>,
    registry: Arc<StreamRegistry>,
    clients: RwLock<HashMap<ClientId, ClientSession>>,
    sync_grace: Duration,
}

impl ClientSessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new(
        session: Arc<dyn MarketDataSession>,
        registry: Arc<StreamRegistry>,
        sync_grace: Duration,
    ) -> Self {
        Self {
            session,
            registry,
            clients: RwLock::new(HashMap::new()),
            sync_grace,
        }
    }

    /// Register a newly connected client with an empty subscription set.
    pub fn on_connect(&self, channel: Arc<dyn ClientChannel>) -> ClientId {
        let client_id = Uuid::new_v4().as_u64_pair().0;
        let peer = channel.peer();

        let count = {
            let mut clients = self.clients.write();
            clients.insert(
                client_id,
                ClientSession {
                    channel,
                    peer: peer.clone(),
                    legs: HashMap::new(),
                },
            );
            clients.len()
        };

        metrics::set_clients(count);
        tracing::info!(client_id, peer = %peer, clients = count, "Client connected");
        client_id
    }

    /// Replace a client's subscriptions with `underlying` plus `legs`.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError::Underlying`] when the underlying does not
    /// qualify (existing subscriptions are left untouched) and
    /// [`SubscribeError::UnknownClient`] when the client is not connected.
    /// Individual option legs that fail are reported in the
    /// [`SubscribeReport`] and skipped.
    pub async fn subscribe(
        &self,
        client_id: ClientId,
        underlying: &str,
        legs: &[OptionLegRequest],
    ) -> Result<SubscribeReport, SubscribeError> {
        if !self.is_connected(client_id) {
            return Err(SubscribeError::UnknownClient(client_id));
        }

        let instrument = self
            .session
            .qualify(ContractSpec::stock(underlying))
            .await
            .map_err(|source| {
                metrics::record_qualification_failure(source.kind());
                tracing::warn!(client_id, symbol = underlying, error = %source, "Underlying qualification failed");
                SubscribeError::Underlying {
                    symbol: underlying.to_string(),
                    source,
                }
            })?;

        let previous = {
            let mut clients = self.clients.write();
            let Some(client) = clients.get_mut(&client_id) else {
                return Err(SubscribeError::UnknownClient(client_id));
            };
            mem::take(&mut client.legs)
        };
        for handle in previous.values() {
            self.registry.release(handle);
        }

        let handle = self.registry.acquire(&instrument, ExtraTicks::None);
        if matches!(self.bind(client_id, UNDERLYING_LEG, handle), Bind::Gone) {
            self.publish_stream_count();
            return Err(SubscribeError::UnknownClient(client_id));
        }

        let mut report = SubscribeReport::default();
        for leg in legs {
            match self.subscribe_leg(client_id, underlying, leg).await {
                Ok(Bind::Gone) => {
                    self.publish_stream_count();
                    return Err(SubscribeError::UnknownClient(client_id));
                }
                Ok(_) => report.bound_legs.push(leg.id.clone()),
                Err(error) => {
                    metrics::record_qualification_failure(error.kind());
                    tracing::warn!(client_id, leg_id = %leg.id, error = %error, "Option leg skipped");
                    report.failed_legs.push((leg.id.clone(), error));
                }
            }
        }

        self.publish_stream_count();
        tracing::info!(
            client_id,
            symbol = underlying,
            legs = report.bound_legs.len(),
            failed = report.failed_legs.len(),
            "Client subscribed"
        );
        Ok(report)
    }

    async fn subscribe_leg(
        &self,
        client_id: ClientId,
        underlying: &str,
        leg: &OptionLegRequest,
    ) -> Result<Bind, QualificationError> {
        if leg.id == UNDERLYING_LEG {
            return Err(QualificationError::InvalidLeg {
                leg_id: leg.id.clone(),
                reason: format!("'{UNDERLYING_LEG}' is reserved"),
            });
        }

        let contract = leg.contract(underlying)?;
        let instrument = self.session.qualify(contract).await?;
        let handle = self.registry.acquire(&instrument, ExtraTicks::OptionGreeks);

        let bind = self.bind(client_id, &leg.id, handle);
        if let Bind::Replaced(previous) = &bind {
            tracing::debug!(client_id, leg_id = %leg.id, "Duplicate leg id replaced");
            self.registry.release(previous);
        }
        Ok(bind)
    }

    /// Record a binding, releasing the handle again if the client is gone.
    fn bind(&self, client_id: ClientId, leg_id: &str, handle: Arc<StreamHandle>) -> Bind {
        let inserted = self
            .clients
            .write()
            .get_mut(&client_id)
            .map(|client| client.legs.insert(leg_id.to_string(), Arc::clone(&handle)));

        match inserted {
            Some(Some(previous)) => Bind::Replaced(previous),
            Some(None) => Bind::Bound,
            None => {
                tracing::debug!(client_id, leg_id, "Client left during subscribe");
                self.registry.release(&handle);
                Bind::Gone
            }
        }
    }

    /// Send a one-shot underlying price to the client.
    ///
    /// Opens (or reuses) the stream, waits the grace period for a first
    /// snapshot, sends `{"underlyingPrice":p,"options":{}}` if a price
    /// resolved, then releases the stream. Returns whether a payload was sent.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError`] when the client is unknown or the symbol
    /// does not qualify.
    pub async fn sync_underlying(
        &self,
        client_id: ClientId,
        symbol: &str,
    ) -> Result<bool, SubscribeError> {
        let Some(channel) = self.channel(client_id) else {
            return Err(SubscribeError::UnknownClient(client_id));
        };

        let instrument = self
            .session
            .qualify(ContractSpec::stock(symbol))
            .await
            .map_err(|source| {
                metrics::record_qualification_failure(source.kind());
                tracing::warn!(client_id, symbol, error = %source, "Sync qualification failed");
                SubscribeError::Underlying {
                    symbol: symbol.to_string(),
                    source,
                }
            })?;

        let handle = self.registry.acquire(&instrument, ExtraTicks::None);
        self.publish_stream_count();

        tokio::time::sleep(self.sync_grace).await;
        let price = pricing::underlying_price(&handle.snapshot());

        self.registry.release(&handle);
        self.publish_stream_count();

        let Some(price) = price else {
            tracing::debug!(client_id, symbol, "No underlying price within grace period");
            return Ok(false);
        };

        let payload = match QuotePayload::underlying_only(price).to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(client_id, error = %e, "Failed to serialize sync payload");
                return Ok(false);
            }
        };

        match channel.send(payload).await {
            Ok(()) => {
                metrics::record_payloads_sent(1);
                Ok(true)
            }
            Err(e) => {
                metrics::record_delivery_failure();
                tracing::debug!(client_id, error = %e, "Sync payload not delivered");
                Ok(false)
            }
        }
    }

    /// Remove a client and release all of its bindings.
    ///
    /// Returns the number of bindings released. Calling this for an unknown
    /// client is a no-op.
    pub fn on_disconnect(&self, client_id: ClientId) -> usize {
        let (removed, remaining) = {
            let mut clients = self.clients.write();
            let removed = clients.remove(&client_id);
            (removed, clients.len())
        };

        let Some(client) = removed else {
            return 0;
        };

        for handle in client.legs.values() {
            self.registry.release(handle);
        }

        metrics::set_clients(remaining);
        self.publish_stream_count();
        tracing::info!(
            client_id,
            peer = %client.peer,
            released = client.legs.len(),
            clients = remaining,
            "Client disconnected"
        );
        client.legs.len()
    }

    /// Copy out the bindings of every client with a non-empty set.
    #[must_use]
    pub fn snapshot_bindings(&self) -> Vec<ClientBindings> {
        self.clients
            .read()
            .iter()
            .filter(|(_, client)| !client.legs.is_empty())
            .map(|(&client_id, client)| ClientBindings {
                client_id,
                channel: Arc::clone(&client.channel),
                legs: client
                    .legs
                    .iter()
                    .map(|(leg, handle)| (leg.clone(), Arc::clone(handle)))
                    .collect(),
            })
            .collect()
    }

    /// Sorted leg ids bound for a client.
    #[must_use]
    pub fn legs(&self, client_id: ClientId) -> Vec<String> {
        let mut legs: Vec<String> = self
            .clients
            .read()
            .get(&client_id)
            .map(|c| c.legs.keys().cloned().collect())
            .unwrap_or_default();
        legs.sort();
        legs
    }

    /// Whether the client is registered.
    #[must_use]
    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.clients.read().contains_key(&client_id)
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// The shared stream registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    fn channel(&self, client_id: ClientId) -> Option<Arc<dyn ClientChannel>> {
        self.clients
            .read()
            .get(&client_id)
            .map(|c| Arc::clone(&c.channel))
    }

    fn publish_stream_count(&self) {
        metrics::set_upstream_streams(self.registry.stats().stream_count);
    }
}
