//! Stream Registry
//!
//! Maps qualified instruments onto shared upstream quote streams.
//!
//! # Design
//!
//! The registry tracks:
//! - One [`StreamHandle`] per upstream contract id
//! - A watcher count per handle (one per client/leg binding)
//!
//! Multiple clients subscribing to the same instrument share a single
//! upstream stream. The stream is cancelled exactly once, when the last
//! watcher releases it. Upstream open/cancel calls are issued while the
//! registry lock is held so they reach the session in the same order as the
//! bookkeeping changes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::instrument::{ContractId, ExtraTicks, Instrument};
use super::quote::{LiveTicker, TickSnapshot};

// =============================================================================
// Stream Source
// =============================================================================

/// Upstream side of the registry: opens and cancels quote streams.
///
/// Both calls must be non-blocking; they are invoked with the registry lock
/// held.
pub trait StreamSource: Send + Sync {
    /// Request a quote stream and return its live ticker.
    fn request_stream(&self, instrument: &Instrument, extra: ExtraTicks) -> Arc<LiveTicker>;

    /// Cancel a previously opened quote stream.
    fn cancel_stream(&self, instrument: &Instrument);
}

// =============================================================================
// Stream Handle
// =============================================================================

/// One active upstream quote stream, shared by all of its watchers.
#[derive(Debug)]
pub struct StreamHandle {
    ticker: Arc<LiveTicker>,
    extra: ExtraTicks,
}

impl StreamHandle {
    /// The streamed instrument.
    #[must_use]
    pub fn instrument(&self) -> &Instrument {
        self.ticker.instrument()
    }

    /// Upstream contract id.
    #[must_use]
    pub fn con_id(&self) -> ContractId {
        self.ticker.instrument().con_id
    }

    /// Extra ticks requested when the stream was opened.
    #[must_use]
    pub const fn extra_ticks(&self) -> ExtraTicks {
        self.extra
    }

    /// Copy of the latest raw tick state.
    #[must_use]
    pub fn snapshot(&self) -> TickSnapshot {
        self.ticker.snapshot()
    }
}

/// Result of releasing a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Other watchers remain; the stream stays open.
    Retained {
        /// Remaining watcher count.
        watchers: usize,
    },
    /// That was the last watcher; the upstream stream was cancelled.
    Cancelled,
    /// The handle is no longer registered; nothing changed.
    Unknown,
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug)]
struct StreamEntry {
    handle: Arc<StreamHandle>,
    watchers: usize,
}

/// Shared upstream stream registry.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use quote_fanout_proxy::domain::instrument::{ContractSpec, ExtraTicks, Instrument};
/// use quote_fanout_proxy::domain::quote::LiveTicker;
/// use quote_fanout_proxy::domain::subscription::{ReleaseOutcome, StreamRegistry, StreamSource};
///
/// struct Noop;
/// impl StreamSource for Noop {
///     fn request_stream(&self, instrument: &Instrument, _: ExtraTicks) -> Arc<LiveTicker> {
///         Arc::new(LiveTicker::new(instrument.clone()))
///     }
///     fn cancel_stream(&self, _: &Instrument) {}
/// }
///
/// let registry = StreamRegistry::new(Arc::new(Noop));
/// let aapl = Instrument::new(265_598, ContractSpec::stock("AAPL"));
///
/// let first = registry.acquire(&aapl, ExtraTicks::None);
/// let second = registry.acquire(&aapl, ExtraTicks::None);
/// assert!(Arc::ptr_eq(&first, &second));
/// assert_eq!(registry.watcher_count(265_598), 2);
///
/// assert_eq!(registry.release(&first), ReleaseOutcome::Retained { watchers: 1 });
/// assert_eq!(registry.release(&second), ReleaseOutcome::Cancelled);
/// ```
pub struct StreamRegistry {
    source: Arc<dyn StreamSource>,
    entries: Mutex<HashMap<ContractId, StreamEntry>>,
}

impl StreamRegistry {
    /// Create an empty registry backed by the given stream source.
    #[must_use]
    pub fn new(source: Arc<dyn StreamSource>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a watcher on the stream for `instrument`.
    ///
    /// Reuses the existing handle for the same contract id, otherwise opens a
    /// new upstream stream with `extra` ticks.
    pub fn acquire(&self, instrument: &Instrument, extra: ExtraTicks) -> Arc<StreamHandle> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&instrument.con_id) {
            entry.watchers += 1;
            if entry.handle.extra != extra {
                tracing::debug!(
                    con_id = instrument.con_id,
                    existing = ?entry.handle.extra,
                    requested = ?extra,
                    "Reusing stream opened with different extra ticks"
                );
            }
            tracing::debug!(con_id = instrument.con_id, watchers = entry.watchers, "Stream reused");
            return Arc::clone(&entry.handle);
        }

        let ticker = self.source.request_stream(instrument, extra);
        let handle = Arc::new(StreamHandle { ticker, extra });
        entries.insert(
            instrument.con_id,
            StreamEntry {
                handle: Arc::clone(&handle),
                watchers: 1,
            },
        );

        tracing::info!(con_id = instrument.con_id, contract = %instrument.spec, "Upstream stream opened");
        handle
    }

    /// Release one watcher of `handle`.
    ///
    /// Cancels the upstream stream when the last watcher is released. A handle
    /// that is no longer registered (already cancelled, or superseded by a
    /// newer stream for the same contract) is ignored.
    pub fn release(&self, handle: &Arc<StreamHandle>) -> ReleaseOutcome {
        let con_id = handle.con_id();
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get_mut(&con_id) else {
            tracing::warn!(con_id, "Release of unknown stream ignored");
            return ReleaseOutcome::Unknown;
        };

        if !Arc::ptr_eq(&entry.handle, handle) {
            tracing::warn!(con_id, "Release of stale stream handle ignored");
            return ReleaseOutcome::Unknown;
        }

        entry.watchers = entry.watchers.saturating_sub(1);
        if entry.watchers > 0 {
            return ReleaseOutcome::Retained {
                watchers: entry.watchers,
            };
        }

        if let Some(entry) = entries.remove(&con_id) {
            self.source.cancel_stream(entry.handle.instrument());
        }
        drop(entries);

        tracing::info!(con_id, "Upstream stream cancelled");
        ReleaseOutcome::Cancelled
    }

    /// Current watcher count for a contract (0 if no stream is open).
    #[must_use]
    pub fn watcher_count(&self, con_id: ContractId) -> usize {
        self.entries.lock().get(&con_id).map_or(0, |e| e.watchers)
    }

    /// Registered handle for a contract, if any.
    #[must_use]
    pub fn handle(&self, con_id: ContractId) -> Option<Arc<StreamHandle>> {
        self.entries.lock().get(&con_id).map(|e| Arc::clone(&e.handle))
    }

    /// Contract ids with an open upstream stream.
    #[must_use]
    pub fn active_streams(&self) -> Vec<ContractId> {
        self.entries.lock().keys().copied().collect()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.lock();
        RegistryStats {
            stream_count: entries.len(),
            watcher_count: entries.values().map(|e| e.watchers).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of open upstream streams.
    pub stream_count: usize,
    /// Total watchers across all streams.
    pub watcher_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::domain::instrument::ContractSpec;

    #[derive(Default)]
    struct RecordingSource {
        opened: Mutex<Vec<(ContractId, ExtraTicks)>>,
        closed: Mutex<Vec<ContractId>>,
    }

    impl StreamSource for RecordingSource {
        fn request_stream(&self, instrument: &Instrument, extra: ExtraTicks) -> Arc<LiveTicker> {
            self.opened.lock().push((instrument.con_id, extra));
            Arc::new(LiveTicker::new(instrument.clone()))
        }

        fn cancel_stream(&self, instrument: &Instrument) {
            self.closed.lock().push(instrument.con_id);
        }
    }

    fn setup() -> (Arc<RecordingSource>, StreamRegistry) {
        let source = Arc::new(RecordingSource::default());
        let registry = StreamRegistry::new(Arc::clone(&source) as Arc<dyn StreamSource>);
        (source, registry)
    }

    fn stock(con_id: ContractId, symbol: &str) -> Instrument {
        Instrument::new(con_id, ContractSpec::stock(symbol))
    }

    #[test]
    fn acquire_new_instrument_opens_stream() {
        let (source, registry) = setup();

        let handle = registry.acquire(&stock(1, "AAPL"), ExtraTicks::None);

        assert_eq!(handle.con_id(), 1);
        assert_eq!(source.opened.lock().as_slice(), &[(1, ExtraTicks::None)]);
        assert_eq!(registry.watcher_count(1), 1);
    }

    #[test]
    fn two_watchers_share_one_upstream_stream() {
        let (source, registry) = setup();
        let aapl = stock(1, "AAPL");

        let a = registry.acquire(&aapl, ExtraTicks::None);
        let b = registry.acquire(&aapl, ExtraTicks::None);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.opened.lock().len(), 1);
        assert_eq!(registry.watcher_count(1), 2);
    }

    #[test]
    fn releasing_one_of_two_watchers_keeps_stream() {
        let (source, registry) = setup();
        let aapl = stock(1, "AAPL");
        let a = registry.acquire(&aapl, ExtraTicks::None);
        let _b = registry.acquire(&aapl, ExtraTicks::None);

        let outcome = registry.release(&a);

        assert_eq!(outcome, ReleaseOutcome::Retained { watchers: 1 });
        assert!(source.closed.lock().is_empty());
        assert_eq!(registry.active_streams(), vec![1]);
    }

    #[test]
    fn releasing_last_watcher_cancels_once() {
        let (source, registry) = setup();
        let aapl = stock(1, "AAPL");
        let a = registry.acquire(&aapl, ExtraTicks::None);
        let b = registry.acquire(&aapl, ExtraTicks::None);

        registry.release(&a);
        let outcome = registry.release(&b);

        assert_eq!(outcome, ReleaseOutcome::Cancelled);
        assert_eq!(source.closed.lock().as_slice(), &[1]);
        assert_eq!(registry.watcher_count(1), 0);
        assert!(registry.handle(1).is_none());
    }

    #[test]
    fn extra_release_after_cancel_is_ignored() {
        let (source, registry) = setup();
        let a = registry.acquire(&stock(1, "AAPL"), ExtraTicks::None);

        registry.release(&a);
        let outcome = registry.release(&a);

        assert_eq!(outcome, ReleaseOutcome::Unknown);
        assert_eq!(source.closed.lock().len(), 1);
    }

    #[test]
    fn stale_handle_does_not_touch_newer_stream() {
        let (source, registry) = setup();
        let aapl = stock(1, "AAPL");

        let old = registry.acquire(&aapl, ExtraTicks::None);
        registry.release(&old);
        let _new = registry.acquire(&aapl, ExtraTicks::None);

        assert_eq!(registry.release(&old), ReleaseOutcome::Unknown);
        assert_eq!(registry.watcher_count(1), 1);
        assert_eq!(source.opened.lock().len(), 2);
        assert_eq!(source.closed.lock().len(), 1);
    }

    #[test]
    fn option_streams_request_greeks() {
        let (source, registry) = setup();
        let expiry = chrono::NaiveDate::from_ymd_opt(2025, 6, 20).unwrap();
        let option = Instrument::new(
            77,
            ContractSpec::option("AAPL", expiry, 200.0, crate::domain::instrument::Right::Call),
        );

        let handle = registry.acquire(&option, ExtraTicks::OptionGreeks);

        assert_eq!(handle.extra_ticks(), ExtraTicks::OptionGreeks);
        assert_eq!(source.opened.lock()[0].1, ExtraTicks::OptionGreeks);
    }

    #[test]
    fn stats_are_accurate() {
        let (_source, registry) = setup();

        registry.acquire(&stock(1, "AAPL"), ExtraTicks::None);
        registry.acquire(&stock(1, "AAPL"), ExtraTicks::None);
        registry.acquire(&stock(2, "MSFT"), ExtraTicks::None);

        let stats = registry.stats();
        assert_eq!(stats.stream_count, 2);
        assert_eq!(stats.watcher_count, 3);
    }

    #[test]
    fn thread_safety_concurrent_acquire_same_instrument() {
        let (source, registry) = setup();
        let registry = Arc::new(registry);
        let mut handles = vec![];

        for _ in 0..16 {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.acquire(&stock(1, "SHARED"), ExtraTicks::None);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(source.opened.lock().len(), 1);
        assert_eq!(registry.watcher_count(1), 16);
    }

    #[test]
    fn thread_safety_concurrent_release() {
        let (source, registry) = setup();
        let registry = Arc::new(registry);
        let shared: Vec<_> = (0..16)
            .map(|_| registry.acquire(&stock(1, "SHARED"), ExtraTicks::None))
            .collect();

        let mut handles = vec![];
        for handle in shared {
            let r = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                r.release(&handle);
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(source.closed.lock().as_slice(), &[1]);
        assert_eq!(registry.stats(), RegistryStats::default());
    }
}
