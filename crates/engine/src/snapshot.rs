//! Validated per-symbol inputs for one tick.

use crate::error::{EngineError, Result};
use crate::fetch::SymbolFetch;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use skew_arb_core::{Book, FundingRate, InstrumentSpec, MarketStatus, OpenOrder, Position, SymbolParams};
use skew_arb_orderbook::OrderbookView;
use std::sync::Arc;
use tracing::warn;

/// Everything the decision pipeline reads for one symbol. Only built by
/// [`MarketSnapshot::assemble`], so every field is present and fresh.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub params: SymbolParams,
    pub book: Arc<Book>,
    /// Exchange mid price, always positive.
    pub mid: Decimal,
    pub instrument: InstrumentSpec,
    /// Signed exchange position in base units.
    pub venue_position: Decimal,
    pub protocol_position: Option<Position>,
    pub funding: FundingRate,
    pub index_price: Decimal,
    pub status: MarketStatus,
    pub open_orders: Vec<OpenOrder>,
}

fn required<T>(symbol: &str, field: &str, value: anyhow::Result<T>) -> Result<T> {
    value.map_err(|e| {
        warn!(symbol, field, error = %e, "Fetch failed");
        EngineError::validation(symbol, field)
    })
}

impl MarketSnapshot {
    /// Validates one symbol's reads against the book view.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DataValidation`] naming the first field that is
    /// missing, failed to fetch, failed to decode, or is older than `ttl`.
    pub fn assemble(
        params: &SymbolParams,
        fetch: SymbolFetch,
        view: &OrderbookView,
        instrument: Option<&InstrumentSpec>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self> {
        let symbol = params.base.as_str();

        let book = view
            .get_book(&params.venue_symbol)
            .filter(|_| view.is_symbol_available(&params.venue_symbol, now))
            .ok_or_else(|| EngineError::validation(symbol, "orderbook"))?;
        if book.is_stale(now, ttl) {
            return Err(EngineError::validation(symbol, "orderbook age"));
        }
        let mid = book
            .mid_price()
            .filter(|m| *m > Decimal::ZERO)
            .ok_or_else(|| EngineError::validation(symbol, "mid_price"))?;
        let instrument = instrument
            .cloned()
            .ok_or_else(|| EngineError::validation(symbol, "instrument"))?;

        let venue_position = required(symbol, "venue_position", fetch.venue_position)?
            .map_or(Decimal::ZERO, |p| p.size);
        let funding = required(symbol, "funding_rate", fetch.funding)?;
        let open_orders = required(symbol, "open_orders", fetch.open_orders)?;
        let index_price = required(symbol, "index_price", fetch.index_price)?;
        if index_price <= Decimal::ZERO {
            return Err(EngineError::validation(symbol, "index_price"));
        }
        let raw_status = required(symbol, "market_status", fetch.market_status)?;
        let status = MarketStatus::decode(&raw_status)
            .map_err(|e| EngineError::validation(symbol, format!("market_status: {e}")))?;
        let protocol_position = required(symbol, "protocol_position", fetch.protocol_position)?;

        Ok(Self {
            params: params.clone(),
            book,
            mid,
            instrument,
            venue_position,
            protocol_position,
            funding,
            index_price,
            status,
            open_orders,
        })
    }

    /// Signed protocol position, zero when flat.
    #[must_use]
    pub fn protocol_size(&self) -> Decimal {
        self.protocol_position.as_ref().map_or(Decimal::ZERO, |p| p.size)
    }

    /// Protocol mark price in collateral units.
    #[must_use]
    pub fn mark_price(&self) -> Decimal {
        self.status.mark_price(self.index_price)
    }

    /// Unrealized protocol PnL in collateral units.
    #[must_use]
    pub fn protocol_pnl(&self) -> Decimal {
        self.protocol_position
            .as_ref()
            .map_or(Decimal::ZERO, |p| p.unrealized_pnl(self.mark_price()))
    }
}
