//! Session Connector
//!
//! Establishes the single upstream session.
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!                    │   ▲
//!                    └───┘  identity conflict: new identity, short delay
//!                           other failure: retry delay
//! ```
//!
//! Retries are unbounded. `Connected` is terminal; `shutdown` closes the
//! session at most once no matter how many shutdown paths call it.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{MarketDataSession, MarketDataType, SessionError};
use crate::infrastructure::metrics::{self, ConnectOutcome};

/// Connector state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    /// No session and no attempt in progress.
    Disconnected,
    /// Handshake attempts in progress.
    Connecting,
    /// Session established.
    Connected,
}

impl ConnectorState {
    /// Lowercase name for health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Connector errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Connecting was cancelled by shutdown.
    #[error("connect cancelled")]
    Cancelled,
}

/// Retry and identity settings.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// Identity token for the first attempt.
    pub initial_identity: i32,
    /// Range for randomized identities after a conflict.
    pub identity_range: RangeInclusive<i32>,
    /// Delay after a non-conflict failure.
    pub retry_delay: Duration,
    /// Delay after an identity conflict.
    pub conflict_delay: Duration,
    /// Market data mode requested once connected.
    pub market_data_type: MarketDataType,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            initial_identity: 999,
            identity_range: 1000..=9999,
            retry_delay: Duration::from_secs(5),
            conflict_delay: Duration::from_millis(100),
            market_data_type: MarketDataType::Delayed,
        }
    }
}

/// Pick a random identity in `range` that differs from `current`.
#[must_use]
pub fn next_identity(current: i32, range: &RangeInclusive<i32>) -> i32 {
    if range.start() >= range.end() {
        return *range.start();
    }

    let mut rng = rand::rng();
    loop {
        let candidate = rng.random_range(range.clone());
        if candidate != current {
            return candidate;
        }
    }
}

/// Drives the upstream session to `Connected`.
pub struct SessionConnector {
    session: Arc<dyn MarketDataSession>,
    settings: ConnectorSettings,
    state: RwLock<ConnectorState>,
    identity: RwLock<i32>,
    closed: AtomicBool,
}

impl SessionConnector {
    /// Create a connector in the `Disconnected` state.
    #[must_use]
    pub fn new(session: Arc<dyn MarketDataSession>, settings: ConnectorSettings) -> Self {
        let identity = settings.initial_identity;
        Self {
            session,
            settings,
            state: RwLock::new(ConnectorState::Disconnected),
            identity: RwLock::new(identity),
            closed: AtomicBool::new(false),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectorState {
        *self.state.read()
    }

    /// Identity used by the latest attempt.
    #[must_use]
    pub fn identity(&self) -> i32 {
        *self.identity.read()
    }

    /// Connect, retrying until success or cancellation.
    ///
    /// Returns the identity that succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Cancelled`] if `cancel` fires first.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<i32, ConnectorError> {
        *self.state.write() = ConnectorState::Connecting;
        let mut attempt: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                *self.state.write() = ConnectorState::Disconnected;
                return Err(ConnectorError::Cancelled);
            }

            attempt += 1;
            let identity = self.identity();
            tracing::info!(identity, attempt, "Connecting to upstream session");

            let outcome = tokio::select! {
                () = cancel.cancelled() => None,
                result = self.session.connect(identity) => Some(result),
            };

            let delay = match outcome {
                None => continue,
                Some(Ok(())) => {
                    metrics::record_connect_attempt(ConnectOutcome::Connected);
                    self.session
                        .request_market_data_type(self.settings.market_data_type)
                        .await;
                    *self.state.write() = ConnectorState::Connected;
                    tracing::info!(
                        identity,
                        attempt,
                        market_data_type = %self.settings.market_data_type,
                        "Upstream session connected"
                    );
                    return Ok(identity);
                }
                Some(Err(SessionError::IdentityConflict { .. })) => {
                    metrics::record_connect_attempt(ConnectOutcome::IdentityConflict);
                    let next = next_identity(identity, &self.settings.identity_range);
                    *self.identity.write() = next;
                    tracing::warn!(identity, next_identity = next, attempt, "Identity in use, retrying");
                    self.settings.conflict_delay
                }
                Some(Err(error)) => {
                    metrics::record_connect_attempt(ConnectOutcome::Failed);
                    tracing::warn!(
                        identity,
                        attempt,
                        error = %error,
                        retry_in_ms = self.settings.retry_delay.as_millis(),
                        "Upstream connect failed"
                    );
                    self.settings.retry_delay
                }
            };

            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Close the upstream session.
    ///
    /// Only the first call disconnects; later calls return `false`.
    pub async fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Upstream session already closed");
            return false;
        }

        tracing::info!(identity = self.identity(), "Closing upstream session");
        self.session.disconnect().await;
        *self.state.write() = ConnectorState::Disconnected;
        true
    }
}
