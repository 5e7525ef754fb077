//! Serde description of a paper market, loadable from JSON.

use crate::protocol::{PaperMarket, PaperProtocol};
use crate::swap::PaperSwap;
use crate::venue::PaperVenue;
use crate::PaperWorld;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skew_arb_core::{Book, FundingRate, InstrumentSpec, OrderbookLevel};
use std::path::Path;
use std::sync::Arc;

/// Depth kept on each side of the quote-conversion book.
const QUOTE_BOOK_DEPTH: i64 = 10_000_000;

pub const DEMO_WARMUP_STEPS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub venue_quote_currency: String,
    pub protocol_collateral_currency: String,
    pub venue_balance: Decimal,
    pub protocol_balance: Decimal,
    pub lp_pool_value: Decimal,
    /// Exchange book quoting the collateral in the exchange quote currency.
    pub quote_symbol: String,
    pub quote_rate: Decimal,
    pub commission_rate: Decimal,
    pub slippage_bps: Decimal,
    pub protocol_fee_rate: Decimal,
    pub swap_fee_rate: Decimal,
    pub withdrawal_fee: Decimal,
    pub markets: Vec<MarketScenario>,
}

/// One base asset listed on both venues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketScenario {
    pub base: String,
    /// Defaults to `{BASE}-{QUOTE}-SWAP`.
    pub venue_symbol: Option<String>,
    /// Defaults to the market's position in the list.
    pub market_id: Option<u32>,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
    pub index_price: Decimal,
    /// Protocol index per simulation step; the last value holds afterwards.
    pub index_path: Vec<Decimal>,
    pub skewness: Decimal,
    pub depth_factor: Decimal,
    pub funding_price_24h: Decimal,
    pub funding_rate: Decimal,
    pub hours_to_funding: i64,
    pub contract_size: Decimal,
    pub lot_size: Decimal,
    pub venue_position: Decimal,
    pub protocol_position: Decimal,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            venue_quote_currency: "USDT".to_string(),
            protocol_collateral_currency: "USDC".to_string(),
            venue_balance: Decimal::from(5_000),
            protocol_balance: Decimal::from(5_000),
            lp_pool_value: Decimal::from(1_000_000),
            quote_symbol: "USDC-USDT".to_string(),
            quote_rate: Decimal::ONE,
            commission_rate: Decimal::new(5, 4),
            slippage_bps: Decimal::ZERO,
            protocol_fee_rate: Decimal::new(5, 4),
            swap_fee_rate: Decimal::new(1, 4),
            withdrawal_fee: Decimal::ONE,
            markets: Vec::new(),
        }
    }
}

impl Default for MarketScenario {
    fn default() -> Self {
        Self {
            base: String::new(),
            venue_symbol: None,
            market_id: None,
            bids: Vec::new(),
            asks: Vec::new(),
            index_price: Decimal::ZERO,
            index_path: Vec::new(),
            skewness: Decimal::ZERO,
            depth_factor: Decimal::from(500),
            funding_price_24h: Decimal::ZERO,
            funding_rate: Decimal::ZERO,
            hours_to_funding: 4,
            contract_size: Decimal::ONE,
            lot_size: Decimal::new(1, 3),
            venue_position: Decimal::ZERO,
            protocol_position: Decimal::ZERO,
        }
    }
}

impl MarketScenario {
    #[must_use]
    pub fn venue_symbol(&self, quote_currency: &str) -> String {
        self.venue_symbol
            .clone()
            .unwrap_or_else(|| format!("{}-{quote_currency}-SWAP", self.base))
    }

    #[must_use]
    pub fn protocol_symbol(&self, collateral_currency: &str) -> String {
        format!("{}_{collateral_currency}", self.base)
    }

    /// Protocol market id for the market listed at `index`.
    #[must_use]
    pub fn resolved_market_id(&self, index: usize) -> u32 {
        self.market_id
            .unwrap_or_else(|| u32::try_from(index).unwrap_or(u32::MAX))
    }

    /// Index price at simulation `step`.
    #[must_use]
    pub fn index_at(&self, step: usize) -> Decimal {
        self.index_path
            .get(step)
            .or_else(|| self.index_path.last())
            .copied()
            .unwrap_or(self.index_price)
    }
}

impl Scenario {
    /// Reads a scenario from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid scenario {}", path.display()))
    }

    /// The sizing example: a BTC book with 10 units at 101 against an
    /// unskewed protocol index of 100.
    ///
    /// When stepped, the index sits at the exchange mid for the first
    /// [`DEMO_WARMUP_STEPS`] steps and then drops to 100.
    #[must_use]
    pub fn demo() -> Self {
        Self {
            markets: vec![MarketScenario {
                base: "BTC".to_string(),
                bids: vec![
                    OrderbookLevel::new(Decimal::from(101), Decimal::from(10)),
                    OrderbookLevel::new(Decimal::from(100), Decimal::from(1_000)),
                ],
                asks: vec![OrderbookLevel::new(Decimal::from(102), Decimal::from(10))],
                index_price: Decimal::from(100),
                index_path: std::iter::repeat(Decimal::new(1015, 1))
                    .take(DEMO_WARMUP_STEPS)
                    .chain([Decimal::from(100)])
                    .collect(),
                ..MarketScenario::default()
            }],
            ..Self::default()
        }
    }

    /// Base assets in listing order.
    #[must_use]
    pub fn bases(&self) -> Vec<String> {
        self.markets.iter().map(|m| m.base.clone()).collect()
    }

    /// Number of distinct simulation steps described by the index paths.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.markets.iter().map(|m| m.index_path.len()).max().unwrap_or(0)
    }

    /// Moves every protocol index to its value at `step`.
    pub fn apply_step(&self, world: &PaperWorld, step: usize) {
        for market in &self.markets {
            let symbol = market.protocol_symbol(&self.protocol_collateral_currency);
            world.protocol.set_index_price(&symbol, market.index_at(step));
        }
    }

    /// Builds the three paper collaborators seeded with this scenario.
    #[must_use]
    pub fn build(&self) -> PaperWorld {
        let now = Utc::now();
        let venue = PaperVenue::new(&self.venue_quote_currency, self.commission_rate, self.slippage_bps)
            .with_withdrawal_fee(self.withdrawal_fee);
        let protocol = PaperProtocol::new(&self.protocol_collateral_currency, self.protocol_fee_rate);

        venue.set_balance(&self.venue_quote_currency, self.venue_balance);
        protocol.set_collateral(self.protocol_balance);
        protocol.set_lp_pool_value(self.lp_pool_value);

        let spread = Decimal::new(1, 4);
        let depth = Decimal::from(QUOTE_BOOK_DEPTH);
        venue.set_book(Book::from_levels(
            &self.quote_symbol,
            1,
            vec![OrderbookLevel::new(self.quote_rate - spread, depth)],
            vec![OrderbookLevel::new(self.quote_rate + spread, depth)],
            now,
        ));

        for (index, market) in self.markets.iter().enumerate() {
            let venue_symbol = market.venue_symbol(&self.venue_quote_currency);
            let protocol_symbol = market.protocol_symbol(&self.protocol_collateral_currency);

            venue.set_book(Book::from_levels(
                &venue_symbol,
                1,
                market.bids.clone(),
                market.asks.clone(),
                now,
            ));
            venue.set_instrument(InstrumentSpec {
                symbol: venue_symbol.clone(),
                contract_size: market.contract_size,
                lot_size: market.lot_size,
            });
            venue.set_funding(FundingRate {
                symbol: venue_symbol.clone(),
                rate: market.funding_rate,
                next_funding_time: now + Duration::hours(market.hours_to_funding),
            });
            if !market.venue_position.is_zero() {
                venue.set_position(&venue_symbol, market.venue_position, market.bids.first().map(|l| l.price));
            }

            let market_id = market.resolved_market_id(index);
            let mut paper = PaperMarket::new(&protocol_symbol, market_id, market.index_price, market.depth_factor);
            paper.skewness = market.skewness;
            paper.funding_price_24h = market.funding_price_24h;
            protocol.add_market(paper);
            if !market.protocol_position.is_zero() {
                protocol.set_position(&protocol_symbol, market.protocol_position, Some(market.index_price));
            }
        }

        PaperWorld {
            venue: Arc::new(venue),
            protocol: Arc::new(protocol),
            swap: Arc::new(PaperSwap::new(
                &self.protocol_collateral_currency,
                self.quote_rate,
                self.swap_fee_rate,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use skew_arb_core::{ProtocolClient, VenueClient};
    use std::io::Write;

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "venue_balance": "2500",
                "markets": [
                    {{
                        "base": "ETH",
                        "index_price": "2000",
                        "bids": [{{"price": "2001", "quantity": "3"}}],
                        "asks": [{{"price": "2002", "quantity": "3"}}]
                    }}
                ]
            }}"#
        )
        .unwrap();

        let scenario = Scenario::from_file(file.path()).unwrap();
        assert_eq!(scenario.venue_balance, dec!(2500));
        assert_eq!(scenario.protocol_balance, dec!(5000));
        assert_eq!(scenario.markets[0].depth_factor, dec!(500));
        assert_eq!(scenario.markets[0].venue_symbol("USDT"), "ETH-USDT-SWAP");
        assert_eq!(scenario.bases(), vec!["ETH".to_string()]);
    }

    #[test]
    fn test_from_file_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Scenario::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid scenario"));
    }

    #[tokio::test]
    async fn test_build_seeds_both_venues() {
        let world = Scenario::demo().build();

        let book = world.venue.fetch_order_book("BTC-USDT-SWAP").await.unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec!(101));
        let quote = world.venue.fetch_order_book("USDC-USDT").await.unwrap();
        assert_eq!(quote.mid_price(), Some(dec!(1)));

        assert_eq!(world.protocol.get_index_price("BTC_USDC").await.unwrap(), dec!(100));
        assert_eq!(world.protocol.market("BTC_USDC").unwrap().market_id, 0);
        assert_eq!(world.venue.fetch_instrument("BTC-USDT-SWAP").await.unwrap().base_step(), dec!(0.001));
    }

    #[tokio::test]
    async fn test_apply_step_follows_index_path() {
        let scenario = Scenario::demo();
        let world = scenario.build();
        assert_eq!(scenario.steps(), DEMO_WARMUP_STEPS + 1);

        scenario.apply_step(&world, 0);
        assert_eq!(world.protocol.get_index_price("BTC_USDC").await.unwrap(), dec!(101.5));
        scenario.apply_step(&world, DEMO_WARMUP_STEPS);
        assert_eq!(world.protocol.get_index_price("BTC_USDC").await.unwrap(), dec!(100));
        scenario.apply_step(&world, 500);
        assert_eq!(world.protocol.get_index_price("BTC_USDC").await.unwrap(), dec!(100));
    }

    #[test]
    fn test_index_at_without_path_uses_index_price() {
        let market = MarketScenario {
            index_price: dec!(42),
            ..MarketScenario::default()
        };
        assert_eq!(market.index_at(3), dec!(42));
    }
}
