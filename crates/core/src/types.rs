//! Domain types shared by every engine component.
//!
//! Snapshots in this module are plain values: fetch cycles replace them
//! wholesale and strategy code never mutates them in place.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Venue and Side
// ============================================================================

/// The two venues the engine trades across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    /// Venue A: centralized order-book exchange.
    Exchange,
    /// Venue B: on-chain perpetual protocol with a skew/depth mark price.
    #[default]
    Protocol,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exchange => write!(f, "exchange"),
            Self::Protocol => write!(f, "protocol"),
        }
    }
}

/// Trade direction expressed from the protocol's point of view.
///
/// `Long` buys on the protocol and sells on the exchange (walks exchange bids).
/// `Short` sells on the protocol and buys on the exchange (walks exchange asks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for `Long`, -1 for `Short`.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => Decimal::NEGATIVE_ONE,
        }
    }

    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// Side implied by a signed protocol size, `None` for zero.
    #[must_use]
    pub fn from_size(size: Decimal) -> Option<Self> {
        if size > Decimal::ZERO {
            Some(Self::Long)
        } else if size < Decimal::ZERO {
            Some(Self::Short)
        } else {
            None
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

// ============================================================================
// Order Book
// ============================================================================

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl OrderbookLevel {
    #[must_use]
    pub const fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Level-2 book for one symbol.
///
/// Bids are strictly descending and asks strictly ascending by price. No two
/// levels on a side share a price and no level carries a zero quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub symbol: String,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
    /// Exchange sequence id of the last applied message.
    pub seq_id: i64,
    pub timestamp: DateTime<Utc>,
}

impl Book {
    /// Builds a book from unordered levels, enforcing the ordering invariants.
    ///
    /// Duplicate prices keep the last quantity seen; non-positive quantities
    /// are dropped.
    #[must_use]
    pub fn from_levels(
        symbol: impl Into<String>,
        seq_id: i64,
        bids: impl IntoIterator<Item = OrderbookLevel>,
        asks: impl IntoIterator<Item = OrderbookLevel>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut bid_map: BTreeMap<Reverse<Decimal>, Decimal> = BTreeMap::new();
        for level in bids {
            bid_map.insert(Reverse(level.price), level.quantity);
        }
        let mut ask_map: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for level in asks {
            ask_map.insert(level.price, level.quantity);
        }

        Self {
            symbol: symbol.into(),
            bids: bid_map
                .into_iter()
                .filter(|(_, q)| *q > Decimal::ZERO)
                .map(|(Reverse(p), q)| OrderbookLevel::new(p, q))
                .collect(),
            asks: ask_map
                .into_iter()
                .filter(|(_, q)| *q > Decimal::ZERO)
                .map(|(p, q)| OrderbookLevel::new(p, q))
                .collect(),
            seq_id,
            timestamp,
        }
    }

    #[must_use]
    pub fn best_bid(&self) -> Option<&OrderbookLevel> {
        self.bids.first()
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<&OrderbookLevel> {
        self.asks.first()
    }

    /// Midpoint of the touch, `None` when either side is empty.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.price;
        let ask = self.best_ask()?.price;
        Some((bid + ask) / Decimal::TWO)
    }

    /// True when the book is older than `ttl` at `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.timestamp > ttl
    }
}

/// Incremental change set from the exchange depth stream.
///
/// Each level is an absolute quantity; zero removes the level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthUpdate {
    pub symbol: String,
    pub prev_seq_id: i64,
    pub seq_id: i64,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
    pub timestamp: DateTime<Utc>,
}

/// Messages emitted by the exchange depth stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepthEvent {
    /// Full book sent by the stream on subscribe.
    Snapshot(Book),
    /// Incremental update chained by sequence id.
    Update(DepthUpdate),
}

// ============================================================================
// Account State
// ============================================================================

/// Signed position on one venue, in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub size: Decimal,
    pub entry_price: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    #[must_use]
    pub fn flat(symbol: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            size: Decimal::ZERO,
            entry_price: None,
            timestamp,
        }
    }

    /// Unrealized PnL against `mark`; zero without an entry price.
    #[must_use]
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        self.entry_price
            .map_or(Decimal::ZERO, |entry| self.size * (mark - entry))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub total: Decimal,
    pub available: Decimal,
    /// Collateral haircut applied by the venue, if any.
    pub weight: Option<Decimal>,
}

impl Balance {
    #[must_use]
    pub fn new(currency: impl Into<String>, total: Decimal) -> Self {
        Self {
            currency: currency.into(),
            total,
            available: total,
            weight: None,
        }
    }

    /// Total after the collateral haircut.
    #[must_use]
    pub fn weighted_total(&self) -> Decimal {
        self.weight.map_or(self.total, |w| self.total * w)
    }
}

/// Sum of the totals for `currency` in a balance list.
#[must_use]
pub fn total_of(balances: &[Balance], currency: &str) -> Decimal {
    balances
        .iter()
        .filter(|b| b.currency == currency)
        .map(|b| b.total)
        .sum()
}

/// Exchange funding schedule for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    pub rate: Decimal,
    pub next_funding_time: DateTime<Utc>,
}

/// Resting order on the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub price: Decimal,
    /// Signed size, positive for buys.
    pub size: Decimal,
}

/// Exchange contract metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,
    /// Base units per contract.
    pub contract_size: Decimal,
    /// Minimum quantity increment, in contracts.
    pub lot_size: Decimal,
}

impl InstrumentSpec {
    /// Quantity step expressed in base units.
    #[must_use]
    pub fn base_step(&self) -> Decimal {
        self.contract_size * self.lot_size
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Order variant carried by an [`ActionParam`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderVariant {
    /// Signed base-unit size, positive for buys.
    Market { size: Decimal },
    Limit { price: Decimal, size: Decimal },
    Cancel { order_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Market,
    Limit,
    Cancel,
}

/// Unit of work handed to the execution layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParam {
    pub symbol: String,
    pub order: OrderVariant,
}

impl ActionParam {
    #[must_use]
    pub fn market(symbol: impl Into<String>, size: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            order: OrderVariant::Market { size },
        }
    }

    #[must_use]
    pub fn limit(symbol: impl Into<String>, price: Decimal, size: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            order: OrderVariant::Limit { price, size },
        }
    }

    #[must_use]
    pub fn cancel(symbol: impl Into<String>, order_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            order: OrderVariant::Cancel {
                order_id: order_id.into(),
            },
        }
    }

    /// Type tag derived from the order variant.
    #[must_use]
    pub const fn action_type(&self) -> ActionType {
        match self.order {
            OrderVariant::Market { .. } => ActionType::Market,
            OrderVariant::Limit { .. } => ActionType::Limit,
            OrderVariant::Cancel { .. } => ActionType::Cancel,
        }
    }

    /// Signed size for market and limit orders.
    #[must_use]
    pub const fn size(&self) -> Option<Decimal> {
        match self.order {
            OrderVariant::Market { size } | OrderVariant::Limit { size, .. } => Some(size),
            OrderVariant::Cancel { .. } => None,
        }
    }
}

/// Acknowledgement returned by a venue for an accepted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub venue: Venue,
    pub order_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(p: Decimal, q: Decimal) -> OrderbookLevel {
        OrderbookLevel::new(p, q)
    }

    #[test]
    fn test_book_from_levels_sorts_and_dedupes() {
        let book = Book::from_levels(
            "BTC-USDT-SWAP",
            7,
            vec![level(dec!(99), dec!(1)), level(dec!(101), dec!(2)), level(dec!(99), dec!(3))],
            vec![level(dec!(105), dec!(1)), level(dec!(103), dec!(0)), level(dec!(102), dec!(4))],
            Utc::now(),
        );

        assert_eq!(book.bids, vec![level(dec!(101), dec!(2)), level(dec!(99), dec!(3))]);
        assert_eq!(book.asks, vec![level(dec!(102), dec!(4)), level(dec!(105), dec!(1))]);
        assert_eq!(book.mid_price(), Some(dec!(101.5)));
    }

    #[test]
    fn test_book_staleness() {
        let now = Utc::now();
        let book = Book::from_levels("X", 1, vec![], vec![], now - Duration::seconds(11));
        assert!(book.is_stale(now, Duration::seconds(10)));
        assert!(!book.is_stale(now, Duration::seconds(12)));
        assert_eq!(book.mid_price(), None);
    }

    #[test]
    fn test_action_param_type_tag() {
        assert_eq!(ActionParam::market("X", dec!(1)).action_type(), ActionType::Market);
        assert_eq!(
            ActionParam::limit("X", dec!(10), dec!(-1)).size(),
            Some(dec!(-1))
        );
        let cancel = ActionParam::cancel("X", "abc");
        assert_eq!(cancel.action_type(), ActionType::Cancel);
        assert_eq!(cancel.size(), None);
    }

    #[test]
    fn test_side_sign_and_from_size() {
        assert_eq!(Side::Long.sign(), dec!(1));
        assert_eq!(Side::Short.sign(), dec!(-1));
        assert_eq!(Side::from_size(dec!(-0.1)), Some(Side::Short));
        assert_eq!(Side::from_size(Decimal::ZERO), None);
        assert_eq!(Side::Long.opposite(), Side::Short);
    }

    #[test]
    fn test_position_unrealized_pnl() {
        let mut pos = Position::flat("BTC_USDC", Utc::now());
        assert_eq!(pos.unrealized_pnl(dec!(100)), Decimal::ZERO);
        pos.size = dec!(-2);
        pos.entry_price = Some(dec!(110));
        assert_eq!(pos.unrealized_pnl(dec!(100)), dec!(20));
    }
}
