//! In-memory market data session for service tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{
    MarketDataSession, MarketDataType, QualificationError, SessionError,
};
use crate::domain::instrument::{ContractId, ContractSpec, ExtraTicks, Instrument};
use crate::domain::quote::LiveTicker;
use crate::domain::subscription::StreamSource;

type RequestHook = Box<dyn Fn(&LiveTicker) + Send + Sync>;

/// Records every upstream call; contracts qualify unless rejected.
pub struct FakeSession {
    next_con_id: AtomicI64,
    con_ids: Mutex<HashMap<String, ContractId>>,
    rejected: Mutex<HashSet<String>>,
    requested: Mutex<Vec<ContractId>>,
    cancelled: Mutex<Vec<ContractId>>,
    tickers: Mutex<HashMap<ContractId, Arc<LiveTicker>>>,
    on_request: Mutex<Option<RequestHook>>,
    connect_script: Mutex<VecDeque<Result<(), SessionError>>>,
    identities: Mutex<Vec<i32>>,
    data_types: Mutex<Vec<MarketDataType>>,
    disconnects: AtomicUsize,
    connected: AtomicBool,
}

impl Default for FakeSession {
    fn default() -> Self {
        Self {
            next_con_id: AtomicI64::new(1000),
            con_ids: Mutex::default(),
            rejected: Mutex::default(),
            requested: Mutex::default(),
            cancelled: Mutex::default(),
            tickers: Mutex::default(),
            on_request: Mutex::default(),
            connect_script: Mutex::default(),
            identities: Mutex::default(),
            data_types: Mutex::default(),
            disconnects: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
        }
    }
}

impl FakeSession {
    /// Make qualification of the contract with this display form fail.
    pub fn reject(&self, contract: &str) {
        self.rejected.lock().insert(contract.to_string());
    }

    /// Run `hook` on every newly requested ticker.
    pub fn on_request(&self, hook: impl Fn(&LiveTicker) + Send + Sync + 'static) {
        *self.on_request.lock() = Some(Box::new(hook));
    }

    /// Queue outcomes for successive `connect` calls; later calls succeed.
    pub fn script_connect(&self, outcomes: Vec<Result<(), SessionError>>) {
        self.connect_script.lock().extend(outcomes);
    }

    pub fn con_id_of(&self, contract: &str) -> Option<ContractId> {
        self.con_ids.lock().get(contract).copied()
    }

    pub fn ticker(&self, con_id: ContractId) -> Option<Arc<LiveTicker>> {
        self.tickers.lock().get(&con_id).cloned()
    }

    pub fn requested(&self) -> Vec<ContractId> {
        self.requested.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<ContractId> {
        self.cancelled.lock().clone()
    }

    pub fn identities(&self) -> Vec<i32> {
        self.identities.lock().clone()
    }

    pub fn data_types(&self) -> Vec<MarketDataType> {
        self.data_types.lock().clone()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl StreamSource for FakeSession {
    fn request_stream(&self, instrument: &Instrument, _extra: ExtraTicks) -> Arc<LiveTicker> {
        let ticker = Arc::new(LiveTicker::new(instrument.clone()));
        if let Some(hook) = self.on_request.lock().as_ref() {
            hook(&ticker);
        }
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
impl MarketDataSession for FakeSession {
    async fn connect(&self, identity: i32) -> Result<(), SessionError> {
        self.identities.lock().push(identity);
        let outcome = self.connect_script.lock().pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.connected.store(true, Ordering::SeqCst);
        }
        outcome
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

    async fn request_market_data_type(&self, kind: MarketDataType) {
        self.data_types.lock().push(kind);
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
