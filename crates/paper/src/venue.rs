//! Simulated exchange (Venue A).
//!
//! # Safety
//!
//! This client makes **zero API calls**. Market orders fill immediately at
//! the touch of the configured book plus slippage; the book itself does not
//! move, so a dislocation persists until the scenario changes it.

use crate::fill::apply_fill;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use skew_arb_core::{
    ActionParam, Balance, Book, DepthEvent, DepthUpdate, FundingRate, InstrumentSpec, OpenOrder,
    OrderAck, OrderVariant, Position, Venue, VenueClient,
};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct VenueState {
    books: HashMap<String, Book>,
    instruments: HashMap<String, InstrumentSpec>,
    funding: HashMap<String, FundingRate>,
    positions: HashMap<String, Position>,
    open_orders: HashMap<String, Vec<OpenOrder>>,
    balances: HashMap<String, Decimal>,
    submitted: Vec<ActionParam>,
    reject_orders: bool,
    unreadable_positions: HashSet<String>,
}

/// In-memory exchange with settable market state.
#[derive(Debug)]
pub struct PaperVenue {
    state: Mutex<VenueState>,
    quote_currency: String,
    commission_rate: Decimal,
    slippage_bps: Decimal,
    withdrawal_fee: Decimal,
    latency: Mutex<Duration>,
    heartbeat: Duration,
}

impl PaperVenue {
    /// Creates an empty venue settling in `quote_currency`.
    ///
    /// # Arguments
    ///
    /// * `commission_rate` - taker fee as a fraction of notional (0.0005 = 5 bps)
    /// * `slippage_bps` - adverse price shift applied to market fills
    #[must_use]
    pub fn new(quote_currency: impl Into<String>, commission_rate: Decimal, slippage_bps: Decimal) -> Self {
        Self {
            state: Mutex::new(VenueState::default()),
            quote_currency: quote_currency.into(),
            commission_rate,
            slippage_bps,
            withdrawal_fee: Decimal::ZERO,
            latency: Mutex::new(Duration::ZERO),
            heartbeat: Duration::from_secs(1),
        }
    }

    /// Flat fee deducted from every withdrawal.
    #[must_use]
    pub fn with_withdrawal_fee(mut self, fee: Decimal) -> Self {
        self.withdrawal_fee = fee;
        self
    }

    /// Interval of the empty keep-alive updates on the depth stream.
    /// Zero disables them.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn set_book(&self, book: Book) {
        self.state.lock().books.insert(book.symbol.clone(), book);
    }

    pub fn set_instrument(&self, spec: InstrumentSpec) {
        self.state.lock().instruments.insert(spec.symbol.clone(), spec);
    }

    pub fn set_funding(&self, funding: FundingRate) {
        self.state.lock().funding.insert(funding.symbol.clone(), funding);
    }

    pub fn set_balance(&self, currency: &str, total: Decimal) {
        self.state.lock().balances.insert(currency.to_string(), total);
    }

    #[must_use]
    pub fn balance(&self, currency: &str) -> Decimal {
        self.state.lock().balances.get(currency).copied().unwrap_or_default()
    }

    /// Overwrites the position for `symbol`.
    pub fn set_position(&self, symbol: &str, size: Decimal, entry_price: Option<Decimal>) {
        let position = Position {
            symbol: symbol.to_string(),
            size,
            entry_price,
            timestamp: Utc::now(),
        };
        self.state.lock().positions.insert(symbol.to_string(), position);
    }

    #[must_use]
    pub fn position(&self, symbol: &str) -> Decimal {
        self.state.lock().positions.get(symbol).map_or(Decimal::ZERO, |p| p.size)
    }

    /// Delay added to every read call.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Makes every order call fail until cleared.
    pub fn set_reject_orders(&self, reject: bool) {
        self.state.lock().reject_orders = reject;
    }

    /// Makes position reads for `symbol` fail until cleared.
    pub fn set_position_unreadable(&self, symbol: &str, unreadable: bool) {
        let mut state = self.state.lock();
        if unreadable {
            state.unreadable_positions.insert(symbol.to_string());
        } else {
            state.unreadable_positions.remove(symbol);
        }
    }

    /// Every accepted action, in submission order.
    #[must_use]
    pub fn submitted(&self) -> Vec<ActionParam> {
        self.state.lock().submitted.clone()
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn fill_price(book: &Book, size: Decimal, slippage_bps: Decimal) -> Result<Decimal> {
        let level = if size > Decimal::ZERO {
            book.best_ask()
        } else {
            book.best_bid()
        };
        let touch = level
            .ok_or_else(|| anyhow!("{} has no liquidity to fill {size}", book.symbol))?
            .price;
        let slippage = touch * slippage_bps / Decimal::from(10_000);
        Ok(if size > Decimal::ZERO {
            touch + slippage
        } else {
            touch - slippage
        })
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    async fn fetch_order_book(&self, symbol: &str) -> Result<Book> {
        self.simulate_latency().await;
        self.state
            .lock()
            .books
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("unknown symbol {symbol}"))
    }

    async fn fetch_position(&self, symbol: &str) -> Result<Option<Position>> {
        self.simulate_latency().await;
        let state = self.state.lock();
        if state.unreadable_positions.contains(symbol) {
            bail!("position endpoint unavailable for {symbol}");
        }
        Ok(state.positions.get(symbol).cloned())
    }

    async fn fetch_balances(&self) -> Result<Vec<Balance>> {
        self.simulate_latency().await;
        let state = self.state.lock();
        let mut balances: Vec<Balance> = state
            .balances
            .iter()
            .map(|(currency, total)| Balance::new(currency.clone(), *total))
            .collect();
        balances.sort_by(|a, b| a.currency.cmp(&b.currency));
        Ok(balances)
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Result<FundingRate> {
        self.simulate_latency().await;
        self.state
            .lock()
            .funding
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("no funding schedule for {symbol}"))
    }

    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        self.simulate_latency().await;
        Ok(self.state.lock().open_orders.get(symbol).cloned().unwrap_or_default())
    }

    async fn fetch_instrument(&self, symbol: &str) -> Result<InstrumentSpec> {
        self.state
            .lock()
            .instruments
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow!("unknown instrument {symbol}"))
    }

    async fn create_market_order(&self, action: &ActionParam) -> Result<OrderAck> {
        let OrderVariant::Market { size } = action.order else {
            bail!("expected a market order, got {:?}", action.action_type());
        };
        let mut state = self.state.lock();
        if state.reject_orders {
            bail!("order rejected by paper venue");
        }
        let book = state
            .books
            .get(&action.symbol)
            .ok_or_else(|| anyhow!("unknown symbol {}", action.symbol))?;
        let price = Self::fill_price(book, size, self.slippage_bps)?;
        let commission = (price * size).abs() * self.commission_rate;

        let now = Utc::now();
        let position = state
            .positions
            .entry(action.symbol.clone())
            .or_insert_with(|| Position::flat(action.symbol.clone(), now));
        let realized = apply_fill(position, size, price);
        position.timestamp = now;

        *state.balances.entry(self.quote_currency.clone()).or_default() += realized - commission;
        state.submitted.push(action.clone());
        info!(symbol = %action.symbol, %size, %price, %commission, "Paper market fill");

        Ok(OrderAck {
            venue: Venue::Exchange,
            order_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    async fn create_limit_order(&self, action: &ActionParam) -> Result<OrderAck> {
        let OrderVariant::Limit { price, size } = action.order else {
            bail!("expected a limit order, got {:?}", action.action_type());
        };
        let mut state = self.state.lock();
        if state.reject_orders {
            bail!("order rejected by paper venue");
        }
        let order_id = uuid::Uuid::new_v4().to_string();
        state
            .open_orders
            .entry(action.symbol.clone())
            .or_default()
            .push(OpenOrder {
                order_id: order_id.clone(),
                symbol: action.symbol.clone(),
                price,
                size,
            });
        state.submitted.push(action.clone());
        debug!(symbol = %action.symbol, %price, %size, "Paper limit order resting");
        Ok(OrderAck {
            venue: Venue::Exchange,
            order_id,
        })
    }

    async fn cancel_order(&self, action: &ActionParam) -> Result<OrderAck> {
        let OrderVariant::Cancel { order_id } = &action.order else {
            bail!("expected a cancel, got {:?}", action.action_type());
        };
        let mut state = self.state.lock();
        let orders = state.open_orders.entry(action.symbol.clone()).or_default();
        let before = orders.len();
        orders.retain(|o| &o.order_id != order_id);
        if orders.len() == before {
            bail!("unknown order {order_id} on {}", action.symbol);
        }
        state.submitted.push(action.clone());
        Ok(OrderAck {
            venue: Venue::Exchange,
            order_id: order_id.clone(),
        })
    }

    async fn depth_updates(
        &self,
        symbols: &[String],
    ) -> Result<BoxStream<'static, Result<DepthEvent>>> {
        let now = Utc::now();
        let snapshots: Vec<Book> = {
            let state = self.state.lock();
            symbols
                .iter()
                .map(|symbol| {
                    state
                        .books
                        .get(symbol)
                        .map(|book| Book {
                            timestamp: now,
                            ..book.clone()
                        })
                        .ok_or_else(|| anyhow!("unknown symbol {symbol}"))
                })
                .collect::<Result<_>>()?
        };

        let cursor: Vec<(String, i64)> = snapshots.iter().map(|b| (b.symbol.clone(), b.seq_id)).collect();
        let initial = stream::iter(snapshots.into_iter().map(|b| Ok(DepthEvent::Snapshot(b))));

        if self.heartbeat.is_zero() {
            return Ok(initial.chain(stream::pending()).boxed());
        }

        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let heartbeats = stream::unfold((cursor, ticker), |(mut cursor, mut ticker)| async move {
            ticker.tick().await;
            let timestamp = Utc::now();
            let batch: Vec<Result<DepthEvent>> = cursor
                .iter_mut()
                .map(|(symbol, seq)| {
                    let update = DepthUpdate {
                        symbol: symbol.clone(),
                        prev_seq_id: *seq,
                        seq_id: *seq + 1,
                        bids: Vec::new(),
                        asks: Vec::new(),
                        timestamp,
                    };
                    *seq += 1;
                    Ok(DepthEvent::Update(update))
                })
                .collect();
            Some((stream::iter(batch), (cursor, ticker)))
        })
        .flatten();

        Ok(initial.chain(heartbeats).boxed())
    }

    async fn withdraw(&self, currency: &str, amount: Decimal) -> Result<Decimal> {
        let mut state = self.state.lock();
        let balance = state.balances.entry(currency.to_string()).or_default();
        if *balance < amount {
            bail!("insufficient {currency}: {balance} < {amount}");
        }
        *balance -= amount;
        Ok((amount - self.withdrawal_fee).max(Decimal::ZERO))
    }

    async fn deposit(&self, currency: &str, amount: Decimal) -> Result<()> {
        *self.state.lock().balances.entry(currency.to_string()).or_default() += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use skew_arb_core::OrderbookLevel;

    fn venue() -> PaperVenue {
        let venue = PaperVenue::new("USDT", dec!(0.001), Decimal::ZERO).with_heartbeat(Duration::ZERO);
        venue.set_book(Book::from_levels(
            "BTC-USDT-SWAP",
            1,
            vec![OrderbookLevel::new(dec!(101), dec!(10))],
            vec![OrderbookLevel::new(dec!(102), dec!(10))],
            Utc::now(),
        ));
        venue.set_balance("USDT", dec!(5000));
        venue
    }

    #[tokio::test]
    async fn test_market_sell_fills_at_bid_and_charges_commission() {
        let venue = venue();
        venue
            .create_market_order(&ActionParam::market("BTC-USDT-SWAP", dec!(-10)))
            .await
            .unwrap();

        assert_eq!(venue.position("BTC-USDT-SWAP"), dec!(-10));
        // 1010 notional * 0.001
        assert_eq!(venue.balance("USDT"), dec!(4998.99));
        assert_eq!(venue.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_slippage_moves_fill_price() {
        let venue = PaperVenue::new("USDT", Decimal::ZERO, dec!(100)).with_heartbeat(Duration::ZERO);
        venue.set_book(Book::from_levels(
            "X",
            1,
            vec![OrderbookLevel::new(dec!(100), dec!(1))],
            vec![OrderbookLevel::new(dec!(100), dec!(1))],
            Utc::now(),
        ));
        venue.create_market_order(&ActionParam::market("X", dec!(1))).await.unwrap();
        // Closing at bid minus 1% realizes -2 on a 101 entry
        venue.create_market_order(&ActionParam::market("X", dec!(-1))).await.unwrap();
        assert_eq!(venue.balance("USDT"), dec!(-2));
    }

    #[tokio::test]
    async fn test_cancel_unknown_order_fails() {
        let venue = venue();
        let ack = venue
            .create_limit_order(&ActionParam::limit("BTC-USDT-SWAP", dec!(90), dec!(1)))
            .await
            .unwrap();
        assert_eq!(venue.fetch_open_orders("BTC-USDT-SWAP").await.unwrap().len(), 1);

        venue
            .cancel_order(&ActionParam::cancel("BTC-USDT-SWAP", ack.order_id.clone()))
            .await
            .unwrap();
        assert!(venue.fetch_open_orders("BTC-USDT-SWAP").await.unwrap().is_empty());
        assert!(venue
            .cancel_order(&ActionParam::cancel("BTC-USDT-SWAP", ack.order_id))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_rejecting_orders() {
        let venue = venue();
        venue.set_reject_orders(true);
        assert!(venue
            .create_market_order(&ActionParam::market("BTC-USDT-SWAP", dec!(1)))
            .await
            .is_err());
        assert_eq!(venue.position("BTC-USDT-SWAP"), Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_depth_stream_snapshots_then_chained_heartbeats() {
        let venue = venue().with_heartbeat(Duration::from_millis(500));
        let mut stream = venue.depth_updates(&["BTC-USDT-SWAP".to_string()]).await.unwrap();

        let Some(Ok(DepthEvent::Snapshot(book))) = stream.next().await else {
            panic!("expected snapshot");
        };
        assert_eq!(book.seq_id, 1);

        for expected in [2, 3] {
            let Some(Ok(DepthEvent::Update(update))) = stream.next().await else {
                panic!("expected update");
            };
            assert_eq!(update.prev_seq_id, expected - 1);
            assert_eq!(update.seq_id, expected);
        }
    }

    #[tokio::test]
    async fn test_withdraw_deducts_fee() {
        let venue = venue().with_withdrawal_fee(dec!(1));
        assert_eq!(venue.withdraw("USDT", dec!(100)).await.unwrap(), dec!(99));
        assert_eq!(venue.balance("USDT"), dec!(4900));
        assert!(venue.withdraw("USDT", dec!(10000)).await.is_err());
    }
}
