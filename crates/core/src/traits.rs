//! Collaborator seams consumed by the engine.
//!
//! Concrete exchange, protocol and swap connectivity lives outside this
//! workspace; the paper crate provides in-memory implementations.

use crate::types::{
    ActionParam, Balance, Book, DepthEvent, FundingRate, InstrumentSpec, OpenOrder, OrderAck,
    Position,
};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;
use serde_json::Value;

/// Venue A trading and market-data client.
#[async_trait]
pub trait VenueClient: Send + Sync {
    async fn fetch_order_book(&self, symbol: &str) -> Result<Book>;
    async fn fetch_position(&self, symbol: &str) -> Result<Option<Position>>;
    async fn fetch_balances(&self) -> Result<Vec<Balance>>;
    async fn fetch_funding_rate(&self, symbol: &str) -> Result<FundingRate>;
    async fn fetch_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>>;
    async fn fetch_instrument(&self, symbol: &str) -> Result<InstrumentSpec>;

    /// Places a market order. Size is signed and in base units.
    async fn create_market_order(&self, action: &ActionParam) -> Result<OrderAck>;
    async fn create_limit_order(&self, action: &ActionParam) -> Result<OrderAck>;
    async fn cancel_order(&self, action: &ActionParam) -> Result<OrderAck>;

    /// Opens the incremental depth stream for `symbols`.
    ///
    /// The stream yields a snapshot per symbol first, then chained updates.
    /// It ends or errors when the connection drops.
    async fn depth_updates(
        &self,
        symbols: &[String],
    ) -> Result<BoxStream<'static, Result<DepthEvent>>>;

    /// Withdraws `amount` of `currency` to the operator wallet, returning the
    /// amount received after fees.
    async fn withdraw(&self, currency: &str, amount: Decimal) -> Result<Decimal>;

    /// Sends `amount` of `currency` from the operator wallet to the venue.
    async fn deposit(&self, currency: &str, amount: Decimal) -> Result<()>;
}

/// Venue B on-chain protocol client.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn get_index_price(&self, symbol: &str) -> Result<Decimal>;

    /// Raw market status; decode with [`crate::MarketStatus::decode`].
    async fn get_market_status(&self, symbol: &str) -> Result<Value>;
    async fn get_user_position(&self, symbol: &str) -> Result<Option<Position>>;
    async fn get_lp_pool_value(&self) -> Result<Decimal>;
    async fn get_collateral_balances(&self) -> Result<Vec<Balance>>;

    /// Submits a market order of unsigned `size` on `market_id`.
    async fn submit_order(&self, size: Decimal, market_id: u32, is_long: bool) -> Result<OrderAck>;

    async fn deposit_collateral(&self, amount: Decimal) -> Result<()>;

    /// Withdraws collateral to the operator wallet, returning the amount received.
    async fn withdraw_collateral(&self, amount: Decimal) -> Result<Decimal>;
}

/// Decentralized-exchange swap utility.
#[async_trait]
pub trait SwapClient: Send + Sync {
    /// Swaps `amount` of `from_asset` and returns the amount of `to_asset` received.
    async fn swap(&self, from_asset: &str, to_asset: &str, amount: Decimal) -> Result<Decimal>;
}

