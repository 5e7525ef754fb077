//! Simulated skew-priced perpetual protocol (Venue B).
//!
//! Each market keeps an index price and a net skew. Orders fill at the
//! average mark across the skew they move, then shift the skew, exactly as
//! the on-chain curve would price them. Makes **zero API calls**.

use crate::fill::apply_fill;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use skew_arb_core::{Balance, OrderAck, Position, ProtocolClient, Venue};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

/// One simulated protocol market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperMarket {
    pub symbol: String,
    pub market_id: u32,
    pub index_price: Decimal,
    pub skewness: Decimal,
    pub depth_factor: Decimal,
    pub funding_price_24h: Decimal,
    pub oi_soft_cap: Decimal,
    pub oi_hard_cap: Decimal,
    pub target_leverage: Decimal,
    pub funding_coefficient: Decimal,
}

impl PaperMarket {
    #[must_use]
    pub fn new(symbol: impl Into<String>, market_id: u32, index_price: Decimal, depth_factor: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            market_id,
            index_price,
            skewness: Decimal::ZERO,
            depth_factor,
            funding_price_24h: Decimal::ZERO,
            oi_soft_cap: Decimal::from(1_000_000),
            oi_hard_cap: Decimal::from(2_000_000),
            target_leverage: Decimal::from(5),
            funding_coefficient: Decimal::ZERO,
        }
    }

    fn mark_at(&self, skewness: Decimal) -> Decimal {
        self.index_price * (Decimal::ONE + skewness / self.depth_factor / Decimal::ONE_HUNDRED)
    }

    /// Payload in the protocol's wire format.
    fn status_json(&self) -> Value {
        json!({
            "skewness": self.skewness.to_string(),
            "depthFactor": self.depth_factor.to_string(),
            "oiSoftCap": self.oi_soft_cap.to_string(),
            "oiHardCap": self.oi_hard_cap.to_string(),
            "fundingRatePrice24h": self.funding_price_24h.to_string(),
            "targetLeverage": self.target_leverage.to_string(),
            "coefficient": self.funding_coefficient.to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct ProtocolState {
    markets: HashMap<String, PaperMarket>,
    positions: HashMap<String, Position>,
    collateral: Decimal,
    lp_pool_value: Decimal,
    orders: Vec<(u32, Decimal)>,
    reject_orders: bool,
}

impl ProtocolState {
    fn market_by_id(&mut self, market_id: u32) -> Result<&mut PaperMarket> {
        self.markets
            .values_mut()
            .find(|m| m.market_id == market_id)
            .ok_or_else(|| anyhow!("unknown market id {market_id}"))
    }

    fn market(&self, symbol: &str) -> Result<&PaperMarket> {
        self.markets
            .get(symbol)
            .ok_or_else(|| anyhow!("unknown market {symbol}"))
    }
}

#[derive(Debug)]
pub struct PaperProtocol {
    state: Mutex<ProtocolState>,
    collateral_currency: String,
    fee_rate: Decimal,
    latency: Mutex<Duration>,
}

impl PaperProtocol {
    #[must_use]
    pub fn new(collateral_currency: impl Into<String>, fee_rate: Decimal) -> Self {
        Self {
            state: Mutex::new(ProtocolState::default()),
            collateral_currency: collateral_currency.into(),
            fee_rate,
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn add_market(&self, market: PaperMarket) {
        self.state.lock().markets.insert(market.symbol.clone(), market);
    }

    #[must_use]
    pub fn market(&self, symbol: &str) -> Option<PaperMarket> {
        self.state.lock().markets.get(symbol).cloned()
    }

    pub fn set_index_price(&self, symbol: &str, price: Decimal) {
        if let Some(market) = self.state.lock().markets.get_mut(symbol) {
            market.index_price = price;
        }
    }

    pub fn set_skewness(&self, symbol: &str, skewness: Decimal) {
        if let Some(market) = self.state.lock().markets.get_mut(symbol) {
            market.skewness = skewness;
        }
    }

    pub fn set_collateral(&self, amount: Decimal) {
        self.state.lock().collateral = amount;
    }

    #[must_use]
    pub fn collateral(&self) -> Decimal {
        self.state.lock().collateral
    }

    pub fn set_lp_pool_value(&self, value: Decimal) {
        self.state.lock().lp_pool_value = value;
    }

    /// Overwrites the position for `symbol` without touching skew.
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

    /// Submitted orders as `(market_id, signed size)`.
    #[must_use]
    pub fn orders(&self) -> Vec<(u32, Decimal)> {
        self.state.lock().orders.clone()
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn set_reject_orders(&self, reject: bool) {
        self.state.lock().reject_orders = reject;
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ProtocolClient for PaperProtocol {
    async fn get_index_price(&self, symbol: &str) -> Result<Decimal> {
        self.simulate_latency().await;
        Ok(self.state.lock().market(symbol)?.index_price)
    }

    async fn get_market_status(&self, symbol: &str) -> Result<Value> {
        self.simulate_latency().await;
        Ok(self.state.lock().market(symbol)?.status_json())
    }

    async fn get_user_position(&self, symbol: &str) -> Result<Option<Position>> {
        self.simulate_latency().await;
        Ok(self.state.lock().positions.get(symbol).cloned())
    }

    async fn get_lp_pool_value(&self) -> Result<Decimal> {
        self.simulate_latency().await;
        Ok(self.state.lock().lp_pool_value)
    }

    async fn get_collateral_balances(&self) -> Result<Vec<Balance>> {
        self.simulate_latency().await;
        let collateral = self.state.lock().collateral;
        Ok(vec![Balance::new(self.collateral_currency.clone(), collateral)])
    }

    async fn submit_order(&self, size: Decimal, market_id: u32, is_long: bool) -> Result<OrderAck> {
        if size <= Decimal::ZERO {
            bail!("order size must be positive, got {size}");
        }
        let signed = if is_long { size } else { -size };

        let mut state = self.state.lock();
        if state.reject_orders {
            bail!("order rejected by paper protocol");
        }
        let market = state.market_by_id(market_id)?;
        let before = market.skewness;
        let price = (market.mark_at(before) + market.mark_at(before + signed)) / Decimal::TWO;
        market.skewness += signed;
        let symbol = market.symbol.clone();
        let fee = price * size * self.fee_rate;

        let now = Utc::now();
        let position = state
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::flat(symbol.clone(), now));
        let realized = apply_fill(position, signed, price);
        position.timestamp = now;
        state.collateral += realized - fee;
        state.orders.push((market_id, signed));
        info!(symbol = %symbol, size = %signed, %price, "Paper protocol fill");

        Ok(OrderAck {
            venue: Venue::Protocol,
            order_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    async fn deposit_collateral(&self, amount: Decimal) -> Result<()> {
        self.state.lock().collateral += amount;
        Ok(())
    }

    async fn withdraw_collateral(&self, amount: Decimal) -> Result<Decimal> {
        let mut state = self.state.lock();
        if state.collateral < amount {
            bail!("insufficient collateral: {} < {amount}", state.collateral);
        }
        state.collateral -= amount;
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use skew_arb_core::MarketStatus;

    fn protocol() -> PaperProtocol {
        let protocol = PaperProtocol::new("USDC", Decimal::ZERO);
        protocol.add_market(PaperMarket::new("BTC_USDC", 0, dec!(100), dec!(500)));
        protocol
    }

    #[tokio::test]
    async fn test_status_decodes_through_boundary() {
        let protocol = protocol();
        protocol.set_skewness("BTC_USDC", dec!(50));
        let raw = protocol.get_market_status("BTC_USDC").await.unwrap();
        let status = MarketStatus::decode(&raw).unwrap();
        assert_eq!(status.skewness, dec!(50));
        assert_eq!(status.mark_price(dec!(100)), dec!(100.1));
    }

    #[tokio::test]
    async fn test_order_moves_skew_and_fills_at_average_mark() {
        let protocol = protocol();
        protocol.submit_order(dec!(10), 0, true).await.unwrap();

        let market = protocol.market("BTC_USDC").unwrap();
        assert_eq!(market.skewness, dec!(10));
        let position = protocol.get_user_position("BTC_USDC").await.unwrap().unwrap();
        assert_eq!(position.size, dec!(10));
        // marks 100 and 100.02
        assert_eq!(position.entry_price, Some(dec!(100.01)));

        protocol.submit_order(dec!(10), 0, false).await.unwrap();
        assert_eq!(protocol.position("BTC_USDC"), Decimal::ZERO);
        assert_eq!(protocol.orders(), vec![(0, dec!(10)), (0, dec!(-10))]);
    }

    #[tokio::test]
    async fn test_unknown_market_and_bad_size_fail() {
        let protocol = protocol();
        assert!(protocol.submit_order(dec!(1), 9, true).await.is_err());
        assert!(protocol.submit_order(Decimal::ZERO, 0, true).await.is_err());
        assert!(protocol.get_index_price("ETH_USDC").await.is_err());
    }

    #[tokio::test]
    async fn test_collateral_transfers() {
        let protocol = protocol();
        protocol.deposit_collateral(dec!(500)).await.unwrap();
        assert_eq!(protocol.withdraw_collateral(dec!(200)).await.unwrap(), dec!(200));
        assert_eq!(protocol.collateral(), dec!(300));
        assert!(protocol.withdraw_collateral(dec!(301)).await.is_err());
    }
}
