//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use quote_fanout_proxy::application::ports::{
    ClientChannel, DeliveryError, MarketDataSession, MarketDataType, QualificationError,
    SessionError,
};
use quote_fanout_proxy::domain::quote::TickUpdate;
use quote_fanout_proxy::{
    ClientSessionTable, ContractId, ContractSpec, ExtraTicks, Instrument, LiveTicker,
    StreamRegistry, StreamSource,
};

// =============================================================================
// Recording Session
// =============================================================================

/// Market data session that qualifies every contract not explicitly rejected
/// and records stream requests and cancellations.
pub struct RecordingSession {
    next_con_id: AtomicI64,
    con_ids: Mutex<HashMap<String, ContractId>>,
    rejected: Mutex<HashSet<String>>,
    requested: Mutex<Vec<ContractId>>,
    cancelled: Mutex<Vec<ContractId>>,
    tickers: Mutex<HashMap<ContractId, Arc<LiveTicker>>>,
    connected: AtomicBool,
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self {
            next_con_id: AtomicI64::new(100),
            con_ids: Mutex::default(),
            rejected: Mutex::default(),
            requested: Mutex::default(),
            cancelled: Mutex::default(),
            tickers: Mutex::default(),
            connected: AtomicBool::new(true),
        }
    }
}

impl RecordingSession {
    pub fn reject(&self, contract: &str) {
        self.rejected.lock().insert(contract.to_string());
    }

    pub fn con_id_of(&self, contract: &str) -> ContractId {
        self.con_ids
            .lock()
            .get(contract)
            .copied()
            .unwrap_or_else(|| panic!("{contract} was never qualified"))
    }

    pub fn requested(&self) -> Vec<ContractId> {
        self.requested.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<ContractId> {
        self.cancelled.lock().clone()
    }

    /// Apply a tick update to the live ticker for `contract`.
    pub fn tick(&self, contract: &str, update: TickUpdate) {
        let con_id = self.con_id_of(contract);
        let ticker = self
            .tickers
            .lock()
            .get(&con_id)
            .cloned()
            .unwrap_or_else(|| panic!("{contract} is not streaming"));
        ticker.apply(&TickUpdate { con_id, ..update });
    }
}

impl StreamSource for RecordingSession {
    fn request_stream(&self, instrument: &Instrument, _extra: ExtraTicks) -> Arc<LiveTicker> {
        let ticker = Arc::new(LiveTicker::new(instrument.clone()));
        self.requested.lock().push(instrument.con_id);
        self.tickers
            .lock()
            .insert(instrument.con_id, Arc::clone(&ticker));
        ticker
    }

    fn cancel_stream(&self, instrument: &Instrument) {
        self.cancelled.lock().push(instrument.con_id);
        self.tickers.lock().remove(&instrument.con_id);
    }
}

#[async_trait]
impl MarketDataSession for RecordingSession {
    async fn connect(&self, _identity: i32) -> Result<(), SessionError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn qualify(&self, spec: ContractSpec) -> Result<Instrument, QualificationError> {
        let key = spec.to_string();
        if self.rejected.lock().contains(&key) {
            return Err(QualificationError::NotFound { contract: key });
        }
        let con_id = *self
            .con_ids
            .lock()
            .entry(key)
            .or_insert_with(|| self.next_con_id.fetch_add(1, Ordering::SeqCst));
        Ok(Instrument::new(con_id, spec))
    }

    async fn request_market_data_type(&self, _kind: MarketDataType) {}

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Recording Channel
// =============================================================================

/// Client channel that forwards every payload to a test receiver.
pub struct RecordingChannel {
    tx: mpsc::UnboundedSender<String>,
    peer: String,
}

impl RecordingChannel {
    pub fn new(peer: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx,
                peer: peer.to_string(),
            }),
            rx,
        )
    }
}

#[async_trait]
impl ClientChannel for RecordingChannel {
    async fn send(&self, payload: String) -> Result<(), DeliveryError> {
        self.tx
            .send(payload)
            .map_err(|_| DeliveryError::ChannelClosed)
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// Session, registry and table wired together.
pub fn session_table(sync_grace: Duration) -> (Arc<RecordingSession>, Arc<ClientSessionTable>) {
    let session = Arc::new(RecordingSession::default());
    let registry = Arc::new(StreamRegistry::new(session.clone()));
    let table = Arc::new(ClientSessionTable::new(
        session.clone(),
        registry,
        sync_grace,
    ));
    (session, table)
}

/// Wait for the next payload and parse it.
pub async fn next_payload(rx: &mut mpsc::UnboundedReceiver<String>) -> serde_json::Value {
    let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("payload within timeout")
        .expect("channel open");
    serde_json::from_str(&raw).expect("payload is JSON")
}
