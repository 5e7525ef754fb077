//! Concurrent fan-out of every per-tick read.
//!
//! Individual call failures are kept as values; the tick decides whether a
//! failure skips one symbol or aborts the tick. The budget is applied by the
//! caller around [`fetch_all`].

use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde_json::Value;
use skew_arb_core::{
    Balance, FundingRate, OpenOrder, Position, ProtocolClient, SymbolParams, VenueClient,
};

/// Raw reads for one symbol.
#[derive(Debug)]
pub struct SymbolFetch {
    pub venue_position: anyhow::Result<Option<Position>>,
    pub funding: anyhow::Result<FundingRate>,
    pub open_orders: anyhow::Result<Vec<OpenOrder>>,
    pub index_price: anyhow::Result<Decimal>,
    pub market_status: anyhow::Result<Value>,
    pub protocol_position: anyhow::Result<Option<Position>>,
}

/// Everything read in one tick. `symbols` follows the order of the
/// parameters passed to [`fetch_all`].
#[derive(Debug)]
pub struct FetchedData {
    pub symbols: Vec<SymbolFetch>,
    pub venue_balances: anyhow::Result<Vec<Balance>>,
    pub lp_pool_value: anyhow::Result<Decimal>,
    pub collateral: anyhow::Result<Vec<Balance>>,
}

async fn fetch_symbol(
    venue: &dyn VenueClient,
    protocol: &dyn ProtocolClient,
    params: &SymbolParams,
) -> SymbolFetch {
    let (venue_position, funding, open_orders, index_price, market_status, protocol_position) = tokio::join!(
        venue.fetch_position(&params.venue_symbol),
        venue.fetch_funding_rate(&params.venue_symbol),
        venue.fetch_open_orders(&params.venue_symbol),
        protocol.get_index_price(&params.protocol_symbol),
        protocol.get_market_status(&params.protocol_symbol),
        protocol.get_user_position(&params.protocol_symbol),
    );
    SymbolFetch {
        venue_position,
        funding,
        open_orders,
        index_price,
        market_status,
        protocol_position,
    }
}

/// Issues all reads at once and waits for every one of them.
pub async fn fetch_all(
    venue: &dyn VenueClient,
    protocol: &dyn ProtocolClient,
    params: &[SymbolParams],
) -> FetchedData {
    let per_symbol = join_all(params.iter().map(|p| fetch_symbol(venue, protocol, p)));
    let (symbols, venue_balances, lp_pool_value, collateral) = tokio::join!(
        per_symbol,
        venue.fetch_balances(),
        protocol.get_lp_pool_value(),
        protocol.get_collateral_balances(),
    );
    FetchedData {
        symbols,
        venue_balances,
        lp_pool_value,
        collateral,
    }
}
