//! Gateway Session
//!
//! [`MarketDataSession`] over the gateway's JSON WebSocket protocol.
//!
//! # Tasks
//!
//! After the handshake the socket is split:
//! - a writer task drains an unbounded request queue, so stream requests and
//!   cancellations never block their (synchronous) callers
//! - a reader task resolves pending qualifications, applies tick updates to
//!   the live tickers and emits [`SessionEvent::TickBatch`]
//!
//! When the socket drops, pending qualifications fail with
//! [`QualificationError::SessionClosed`] and [`SessionEvent::Disconnected`] is
//! emitted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::messages::{
    CODE_IDENTITY_IN_USE, CODE_NO_SECURITY_DEFINITION, GatewayMessage, GatewayRequest,
};
use crate::application::ports::{
    MarketDataSession, MarketDataType, QualificationError, SessionError, SessionEvent,
};
use crate::domain::instrument::{ContractId, ContractSpec, ExtraTicks, Instrument};
use crate::domain::quote::LiveTicker;
use crate::domain::subscription::StreamSource;

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised while establishing the gateway connection.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Request encoding failed.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The gateway refused the identity token.
    #[error("identity {0} already in use")]
    IdentityInUse(i32),

    /// The gateway rejected the handshake.
    #[error("handshake rejected ({code}): {message}")]
    Rejected {
        /// Gateway error code.
        code: i32,
        /// Gateway message.
        message: String,
    },

    /// No `ready` within the handshake timeout.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Socket closed during the handshake.
    #[error("connection closed")]
    Closed,
}

impl From<GatewayError> for SessionError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::IdentityInUse(identity) => Self::IdentityConflict { identity },
            other => Self::Connection(other.to_string()),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Bound on connect plus `hello`/`ready`.
    pub handshake_timeout: Duration,
}

impl GatewayConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(url: String, handshake_timeout: Duration) -> Self {
        Self {
            url,
            handshake_timeout,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

struct PendingQualify {
    contract: String,
    reply: oneshot::Sender<Result<Instrument, QualificationError>>,
}

#[derive(Default)]
struct Shared {
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<HashMap<u64, PendingQualify>>,
    tickers: RwLock<HashMap<ContractId, Arc<LiveTicker>>>,
    connection: Mutex<Option<CancellationToken>>,
    next_req_id: AtomicU64,
    connected: AtomicBool,
}

impl Shared {
    fn send(&self, request: &GatewayRequest) -> bool {
        let json = match request.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode gateway request");
                return false;
            }
        };

        self.writer
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Message::Text(json.into())).is_ok())
    }

    fn fail_pending(&self) {
        let pending: Vec<PendingQualify> = self.pending.lock().drain().map(|(_, p)| p).collect();
        for entry in pending {
            let _ = entry.reply.send(Err(QualificationError::SessionClosed));
        }
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.writer.lock().take();
        self.fail_pending();
    }
}

/// Market data session backed by the gateway bridge.
pub struct GatewaySession {
    config: GatewayConfig,
    events: mpsc::Sender<SessionEvent>,
    shared: Arc<Shared>,
}

impl GatewaySession {
    /// Create a disconnected session that reports events on `events`.
    #[must_use]
    pub fn new(config: GatewayConfig, events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            config,
            events,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Number of live tickers.
    #[must_use]
    pub fn ticker_count(&self) -> usize {
        self.shared.tickers.read().len()
    }

    async fn handshake(
        &self,
        identity: i32,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        GatewayError,
    > {
        tracing::info!(url = %self.config.url, identity, "Connecting to gateway");

        let (mut ws, _response) = tokio_tungstenite::connect_async(self.config.url.as_str()).await?;
        let hello = GatewayRequest::Hello {
            client_id: identity,
        }
        .to_json()?;
        ws.send(Message::Text(hello.into())).await?;
        await_ready(&mut ws, identity).await?;
        Ok(ws)
    }
}

/// Wait for `ready`, mapping handshake errors.
async fn await_ready<S>(read: &mut S, identity: i32) -> Result<(), GatewayError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => return Err(GatewayError::Closed),
            _ => continue,
        };

        match GatewayMessage::from_json(&text) {
            Ok(GatewayMessage::Ready { server_version }) => {
                tracing::debug!(identity, server_version, "Gateway handshake complete");
                return Ok(());
            }
            Ok(GatewayMessage::Error { code, .. }) if code == CODE_IDENTITY_IN_USE => {
                return Err(GatewayError::IdentityInUse(identity));
            }
            Ok(GatewayMessage::Error { code, message, .. }) => {
                return Err(GatewayError::Rejected { code, message });
            }
            Ok(other) => tracing::debug!(?other, "Ignoring frame before handshake"),
            Err(e) => tracing::warn!(error = %e, "Unparseable gateway frame during handshake"),
        }
    }
    Err(GatewayError::Closed)
}

/// Map a qualification reply to a single instrument.
fn qualification_result(
    contract: String,
    mut contracts: Vec<Instrument>,
) -> Result<Instrument, QualificationError> {
    match contracts.len() {
        0 => Err(QualificationError::NotFound { contract }),
        1 => Ok(contracts.remove(0)),
        _ => Err(QualificationError::Ambiguous { contract }),
    }
}

/// Map a gateway error tied to a qualification request.
fn qualification_error(contract: String, code: i32, message: String) -> QualificationError {
    if code == CODE_NO_SECURITY_DEFINITION {
        QualificationError::NotFound { contract }
    } else {
        QualificationError::Rejected { contract, message }
    }
}

// =============================================================================
// Connection Tasks
// =============================================================================

async fn write_loop<W>(
    mut write: W,
    mut rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) where
    W: SinkExt<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            message = rx.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = write.send(message).await {
                    tracing::warn!(error = %e, "Gateway write failed");
                    break;
                }
            }
        }
    }
}

async fn read_loop<R>(
    mut read: R,
    shared: Arc<Shared>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return,
            frame = read.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => handle_frame(&text, &shared, &events),
            Some(Ok(Message::Ping(data))) => {
                if let Some(tx) = shared.writer.lock().as_ref() {
                    let _ = tx.send(Message::Pong(data));
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                tracing::warn!("Gateway closed the connection");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Gateway read failed");
                break;
            }
        }
    }

    shared.mark_closed();
    cancel.cancel();
    let _ = events.send(SessionEvent::Disconnected).await;
}

fn handle_frame(text: &str, shared: &Shared, events: &mpsc::Sender<SessionEvent>) {
    let message = match GatewayMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable gateway frame");
            return;
        }
    };

    match message {
        GatewayMessage::Ticks { updates } => {
            let mut touched = Vec::with_capacity(updates.len());
            {
                let tickers = shared.tickers.read();
                for update in &updates {
                    if let Some(ticker) = tickers.get(&update.con_id) {
                        ticker.apply(update);
                        touched.push(update.con_id);
                    }
                }
            }
            if touched.is_empty() {
                return;
            }
            touched.sort_unstable();
            touched.dedup();
            if let Err(mpsc::error::TrySendError::Full(_)) =
                events.try_send(SessionEvent::TickBatch(touched))
            {
                tracing::trace!("Event channel full, tick batch coalesced");
            }
        }
        GatewayMessage::Qualified { req_id, contracts } => {
            if let Some(pending) = shared.pending.lock().remove(&req_id) {
                let _ = pending
                    .reply
                    .send(qualification_result(pending.contract, contracts));
            }
        }
        GatewayMessage::Error {
            req_id: Some(req_id),
            code,
            message,
        } => {
            let pending = shared.pending.lock().remove(&req_id);
            match pending {
                Some(pending) => {
                    let _ = pending
                        .reply
                        .send(Err(qualification_error(pending.contract, code, message)));
                }
                None => tracing::warn!(req_id, code, message = %message, "Gateway error"),
            }
        }
        GatewayMessage::Error {
            req_id: None,
            code,
            message,
        } => {
            tracing::warn!(code, message = %message, "Gateway error");
        }
        GatewayMessage::Ready { .. } => {}
    }
}

// =============================================================================
// Port Implementations
// =============================================================================

impl StreamSource for GatewaySession {
    fn request_stream(&self, instrument: &Instrument, extra: ExtraTicks) -> Arc<LiveTicker> {
        let ticker = Arc::new(LiveTicker::new(instrument.clone()));
        self.shared
            .tickers
            .write()
            .insert(instrument.con_id, Arc::clone(&ticker));

        let queued = self.shared.send(&GatewayRequest::ReqMktData {
            con_id: instrument.con_id,
            contract: instrument.spec.clone(),
            generic_ticks: extra.generic_tick_list().to_string(),
        });
        if !queued {
            tracing::warn!(con_id = instrument.con_id, "Stream requested while gateway is down");
        }
        ticker
    }

    fn cancel_stream(&self, instrument: &Instrument) {
        self.shared.tickers.write().remove(&instrument.con_id);
        self.shared.send(&GatewayRequest::CancelMktData {
            con_id: instrument.con_id,
        });
    }
}

#[async_trait]
impl MarketDataSession for GatewaySession {
    async fn connect(&self, identity: i32) -> Result<(), SessionError> {
        let ws = tokio::time::timeout(self.config.handshake_timeout, self.handshake(identity))
            .await
            .map_err(|_| GatewayError::HandshakeTimeout(self.config.handshake_timeout))??;

        let (write, read) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        *self.shared.writer.lock() = Some(tx);
        if let Some(previous) = self.shared.connection.lock().replace(cancel.clone()) {
            previous.cancel();
        }
        self.shared.connected.store(true, Ordering::SeqCst);

        tokio::spawn(write_loop(write, rx, cancel.clone()));
        tokio::spawn(read_loop(
            read,
            Arc::clone(&self.shared),
            self.events.clone(),
            cancel,
        ));

        tracing::info!(identity, "Gateway session established");
        Ok(())
    }

    async fn qualify(&self, spec: ContractSpec) -> Result<Instrument, QualificationError> {
        if !self.is_connected() {
            return Err(QualificationError::SessionClosed);
        }

        let req_id = self.shared.next_req_id.fetch_add(1, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        self.shared.pending.lock().insert(
            req_id,
            PendingQualify {
                contract: spec.to_string(),
                reply,
            },
        );

        if !self.shared.send(&GatewayRequest::Qualify {
            req_id,
            contract: spec,
        }) {
            self.shared.pending.lock().remove(&req_id);
            return Err(QualificationError::SessionClosed);
        }

        rx.await.unwrap_or(Err(QualificationError::SessionClosed))
    }

    async fn request_market_data_type(&self, kind: MarketDataType) {
        tracing::info!(market_data_type = %kind, "Requesting market data type");
        self.shared
            .send(&GatewayRequest::MarketDataType { kind: kind.code() });
    }

    async fn disconnect(&self) {
        let connection = self.shared.connection.lock().take();
        if let Some(cancel) = connection {
            cancel.cancel();
        }
        self.shared.mark_closed();
        tracing::info!("Gateway session closed");
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}
