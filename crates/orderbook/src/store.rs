//! Per-symbol level-2 books built from snapshots and chained updates.
//!
//! # Overview
//!
//! Every update names the sequence id it follows (`prev_seq_id`). The store
//! applies an update only when that id equals the book's current sequence
//! id; anything else is a desync. A desynced symbol buffers later updates
//! until [`OrderbookStore::complete_resync`] installs a fresh snapshot and
//! replays the buffered updates that follow it.
//!
//! The store is owned by a single task. Readers receive immutable
//! [`OrderbookView`] values instead of sharing the store.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use rust_decimal_macros::dec;
//! use skew_arb_core::{DepthUpdate, OrderbookLevel};
//! use skew_arb_orderbook::OrderbookStore;
//!
//! let mut store = OrderbookStore::new(["BTC-USDT-SWAP"]);
//! let now = Utc::now();
//! store
//!     .apply_snapshot(
//!         "BTC-USDT-SWAP",
//!         1,
//!         vec![OrderbookLevel::new(dec!(100), dec!(2))],
//!         vec![OrderbookLevel::new(dec!(101), dec!(3))],
//!         now,
//!     )
//!     .unwrap();
//!
//! let update = DepthUpdate {
//!     symbol: "BTC-USDT-SWAP".to_string(),
//!     prev_seq_id: 1,
//!     seq_id: 2,
//!     bids: vec![OrderbookLevel::new(dec!(100), dec!(0))],
//!     asks: vec![],
//!     timestamp: now,
//! };
//! store.apply_delta(update).unwrap();
//! assert!(store.get_book("BTC-USDT-SWAP").unwrap().bids.is_empty());
//! ```

use crate::error::{OrderbookError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use skew_arb_core::{Book, DepthUpdate, OrderbookLevel};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Updates buffered per symbol while a resync is pending. Older entries are
/// dropped first; the snapshot that ends the resync is newer than them.
pub const MAX_BUFFERED_UPDATES: usize = 10_000;

/// Outcome of [`OrderbookStore::apply_delta`] when no desync occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Update merged into the book.
    Applied,
    /// Symbol is resyncing; update held for replay.
    Buffered,
}

// ============================================================================
// Level storage
// ============================================================================

#[derive(Debug, Clone)]
struct LevelBook {
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    seq_id: i64,
    timestamp: DateTime<Utc>,
}

impl LevelBook {
    fn from_book(book: &Book) -> Self {
        let mut levels = Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            seq_id: book.seq_id,
            timestamp: book.timestamp,
        };
        levels.upsert(&book.bids, &book.asks);
        levels
    }

    fn upsert(&mut self, bids: &[OrderbookLevel], asks: &[OrderbookLevel]) {
        for level in bids {
            if level.quantity.is_zero() {
                self.bids.remove(&Reverse(level.price));
            } else {
                self.bids.insert(Reverse(level.price), level.quantity);
            }
        }
        for level in asks {
            if level.quantity.is_zero() {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.quantity);
            }
        }
    }

    fn merge(&mut self, update: &DepthUpdate) {
        self.upsert(&update.bids, &update.asks);
        self.seq_id = update.seq_id;
        self.timestamp = update.timestamp;
    }

    fn to_book(&self, symbol: &str) -> Book {
        Book {
            symbol: symbol.to_string(),
            bids: self
                .bids
                .iter()
                .map(|(Reverse(p), q)| OrderbookLevel::new(*p, *q))
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(p, q)| OrderbookLevel::new(*p, *q))
                .collect(),
            seq_id: self.seq_id,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug)]
enum SyncState {
    Synced,
    Resyncing {
        since: DateTime<Utc>,
        buffer: VecDeque<DepthUpdate>,
    },
}

#[derive(Debug)]
struct SymbolState {
    levels: Option<LevelBook>,
    sync: SyncState,
    published: Option<Arc<Book>>,
}

impl SymbolState {
    const fn new() -> Self {
        Self {
            levels: None,
            sync: SyncState::Synced,
            published: None,
        }
    }

    fn install(&mut self, symbol: &str, levels: LevelBook) {
        self.published = Some(Arc::new(levels.to_book(symbol)));
        self.levels = Some(levels);
        self.sync = SyncState::Synced;
    }

    fn is_ready(&self) -> bool {
        self.levels.is_some() && matches!(self.sync, SyncState::Synced)
    }
}

// ============================================================================
// Store
// ============================================================================

/// Sequence-checked books for a fixed set of symbols.
#[derive(Debug)]
pub struct OrderbookStore {
    symbols: HashMap<String, SymbolState>,
    unavailable_until: Option<DateTime<Utc>>,
}

impl OrderbookStore {
    /// Creates a store tracking `symbols`. Each starts unavailable until its
    /// first snapshot.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| (s.into(), SymbolState::new()))
                .collect(),
            unavailable_until: None,
        }
    }

    fn state_mut(&mut self, symbol: &str) -> Result<&mut SymbolState> {
        self.symbols
            .get_mut(symbol)
            .ok_or_else(|| OrderbookError::UnknownSymbol(symbol.to_string()))
    }

    /// Replaces the book for `symbol` and ends any resync in progress.
    ///
    /// # Errors
    ///
    /// Returns [`OrderbookError::UnknownSymbol`] for untracked symbols.
    pub fn apply_snapshot(
        &mut self,
        symbol: &str,
        seq_id: i64,
        bids: Vec<OrderbookLevel>,
        asks: Vec<OrderbookLevel>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.apply_book(Book::from_levels(symbol, seq_id, bids, asks, timestamp))
    }

    /// [`apply_snapshot`](Self::apply_snapshot) for an already assembled book.
    ///
    /// # Errors
    ///
    /// Returns [`OrderbookError::UnknownSymbol`] for untracked symbols.
    pub fn apply_book(&mut self, book: Book) -> Result<()> {
        let state = self.state_mut(&book.symbol)?;
        debug!(symbol = %book.symbol, seq_id = book.seq_id, "Applying snapshot");
        state.install(&book.symbol, LevelBook::from_book(&book));
        Ok(())
    }

    /// Merges `update` if it chains onto the current sequence id.
    ///
    /// While the symbol is resyncing the update is buffered instead.
    ///
    /// # Errors
    ///
    /// Returns [`OrderbookError::Desync`] when `prev_seq_id` does not match;
    /// the update is not applied and the symbol enters resync. Returns
    /// [`OrderbookError::UnknownSymbol`] for untracked symbols.
    pub fn apply_delta(&mut self, update: DepthUpdate) -> Result<DeltaOutcome> {
        let symbol = update.symbol.clone();
        let state = self.state_mut(&symbol)?;

        if let SyncState::Resyncing { buffer, .. } = &mut state.sync {
            if buffer.len() >= MAX_BUFFERED_UPDATES {
                buffer.pop_front();
            }
            buffer.push_back(update);
            return Ok(DeltaOutcome::Buffered);
        }

        let expected = state.levels.as_ref().map(|l| l.seq_id);
        match state.levels.as_mut() {
            Some(levels) if levels.seq_id == update.prev_seq_id => {
                levels.merge(&update);
                state.published = Some(Arc::new(levels.to_book(&symbol)));
                Ok(DeltaOutcome::Applied)
            }
            _ => {
                let received = update.prev_seq_id;
                warn!(symbol = %symbol, ?expected, received, "Order book sequence gap, entering resync");
                state.sync = SyncState::Resyncing {
                    since: update.timestamp,
                    buffer: VecDeque::from([update]),
                };
                Err(OrderbookError::desync(symbol, expected, received))
            }
        }
    }

    /// Ends a resync with a freshly fetched `snapshot`.
    ///
    /// Buffered updates at or below the snapshot id are discarded. The first
    /// remaining update must bracket the snapshot id
    /// (`prev_seq_id <= snapshot < seq_id`); the rest are replayed in order.
    /// A snapshot for a symbol that is not resyncing is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`OrderbookError::ResyncGap`] when the buffer does not line up
    /// with the snapshot; the symbol stays resyncing and a newer snapshot is
    /// needed.
    pub fn complete_resync(&mut self, snapshot: Book) -> Result<()> {
        let symbol = snapshot.symbol.clone();
        let state = self.state_mut(&symbol)?;

        let (since, buffer) = match &mut state.sync {
            SyncState::Resyncing { since, buffer } => (*since, std::mem::take(buffer)),
            SyncState::Synced => {
                debug!(symbol = %symbol, "Snapshot arrived while synced, ignoring");
                return Ok(());
            }
        };

        let mut pending: VecDeque<DepthUpdate> = buffer
            .into_iter()
            .filter(|u| u.seq_id > snapshot.seq_id)
            .collect();

        if let Some(first) = pending.front() {
            if !(first.prev_seq_id <= snapshot.seq_id && snapshot.seq_id < first.seq_id) {
                let err = OrderbookError::ResyncGap {
                    symbol,
                    snapshot_seq_id: snapshot.seq_id,
                    first_prev_seq_id: first.prev_seq_id,
                    first_seq_id: first.seq_id,
                };
                state.sync = SyncState::Resyncing {
                    since,
                    buffer: pending,
                };
                return Err(err);
            }
        }

        let mut levels = LevelBook::from_book(&snapshot);
        if let Some(first) = pending.pop_front() {
            levels.merge(&first);
        }
        while let Some(update) = pending.front() {
            if update.prev_seq_id != levels.seq_id {
                let err = OrderbookError::ResyncGap {
                    symbol,
                    snapshot_seq_id: levels.seq_id,
                    first_prev_seq_id: update.prev_seq_id,
                    first_seq_id: update.seq_id,
                };
                state.sync = SyncState::Resyncing {
                    since,
                    buffer: pending,
                };
                return Err(err);
            }
            levels.merge(update);
            pending.pop_front();
        }

        info!(symbol = %symbol, seq_id = levels.seq_id, "Order book resynced");
        state.install(&symbol, levels);
        Ok(())
    }

    /// Current sorted book, including a stale one kept during resync.
    #[must_use]
    pub fn get_book(&self, symbol: &str) -> Option<Book> {
        self.symbols
            .get(symbol)
            .and_then(|s| s.published.as_deref())
            .cloned()
    }

    #[must_use]
    pub fn sequence_id(&self, symbol: &str) -> Option<i64> {
        self.symbols
            .get(symbol)
            .and_then(|s| s.levels.as_ref())
            .map(|l| l.seq_id)
    }

    #[must_use]
    pub fn is_resyncing(&self, symbol: &str) -> bool {
        self.resync_started_at(symbol).is_some()
    }

    /// When the current resync for `symbol` began.
    #[must_use]
    pub fn resync_started_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        match self.symbols.get(symbol).map(|s| &s.sync) {
            Some(SyncState::Resyncing { since, .. }) => Some(*since),
            _ => None,
        }
    }

    /// Reports every symbol unavailable until `until`.
    pub fn mark_unavailable_until(&mut self, until: DateTime<Utc>) {
        self.unavailable_until = Some(until);
    }

    fn in_grace(&self, now: DateTime<Utc>) -> bool {
        self.unavailable_until.is_some_and(|until| now < until)
    }

    /// True when `symbol` has a synced book and no restart grace is active.
    #[must_use]
    pub fn is_symbol_available(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        !self.in_grace(now) && self.symbols.get(symbol).is_some_and(SymbolState::is_ready)
    }

    /// True when every tracked symbol is available.
    #[must_use]
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        !self.in_grace(now) && self.symbols.values().all(SymbolState::is_ready)
    }

    /// Immutable snapshot of the store for readers.
    #[must_use]
    pub fn view(&self) -> OrderbookView {
        OrderbookView {
            books: self
                .symbols
                .iter()
                .filter_map(|(symbol, s)| s.published.clone().map(|b| (symbol.clone(), b)))
                .collect(),
            unavailable: self
                .symbols
                .iter()
                .filter(|(_, s)| !s.is_ready())
                .map(|(symbol, _)| symbol.clone())
                .collect(),
            unavailable_until: self.unavailable_until,
        }
    }
}

// ============================================================================
// Published view
// ============================================================================

/// Read-only copy of the store published to other tasks.
#[derive(Debug, Clone, Default)]
pub struct OrderbookView {
    books: HashMap<String, Arc<Book>>,
    unavailable: HashSet<String>,
    unavailable_until: Option<DateTime<Utc>>,
}

impl OrderbookView {
    #[must_use]
    pub fn get_book(&self, symbol: &str) -> Option<Arc<Book>> {
        self.books.get(symbol).cloned()
    }

    /// False while a stream restart grace period is active.
    #[must_use]
    pub fn is_stream_ready(&self, now: DateTime<Utc>) -> bool {
        self.unavailable_until.map_or(true, |until| now >= until)
    }

    #[must_use]
    pub fn is_symbol_available(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.is_stream_ready(now)
            && self.books.contains_key(symbol)
            && !self.unavailable.contains(symbol)
    }

    /// True when no tracked symbol is resyncing or missing its snapshot.
    #[must_use]
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.is_stream_ready(now) && self.unavailable.is_empty()
    }

    #[must_use]
    pub fn unavailable_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.unavailable.iter().cloned().collect();
        symbols.sort();
        symbols
    }
}
