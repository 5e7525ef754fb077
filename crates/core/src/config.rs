//! Engine configuration.
//!
//! Every field has a default so a partial file (or environment only) is a
//! valid configuration. Per-symbol behavior differences live in
//! `market_params`, keyed by base asset.

use crate::types::Venue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("target_symbol_list is empty")]
    EmptySymbolList,

    #[error("ema_window must be at least 1")]
    InvalidWindow,

    #[error("balance ratios must sum to 1, got {venue_a} + {venue_b}")]
    RatioSum { venue_a: Decimal, venue_b: Decimal },

    #[error("{field} must not be negative")]
    Negative { field: &'static str },

    #[error("{field} must be positive")]
    NonPositive { field: &'static str },

    #[error("duplicate symbol in target_symbol_list: {0}")]
    DuplicateSymbol(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base assets traded, in priority order.
    pub target_symbol_list: Vec<String>,

    // Thresholds
    /// Base premium margin required to enter.
    pub price_diff_threshold: Decimal,
    /// Floor applied to the entry margin.
    pub min_threshold: Decimal,
    /// Premium EMA window, in samples.
    pub ema_window: u32,
    /// Multiplier on the protocol's 24h funding rate.
    pub funding_multiplier: Decimal,

    // Risk limits (USDT notional)
    pub max_position_usdt: Decimal,
    pub unhedged_threshold_usdt: Decimal,
    pub max_order_usdt: Decimal,
    pub min_order_usdt: Decimal,
    pub max_market_skewness_usdt: Decimal,
    pub max_total_position_usdt: Decimal,
    pub max_leverage: Decimal,

    // Execution pacing
    pub min_order_interval_ms: u64,
    pub hedge_cooldown_ms: u64,
    /// Venue that receives unhedged-exposure corrections.
    pub hedge_venue: Venue,

    // Balances and rebalancing
    pub initial_balance_usdt: Decimal,
    pub balance_ratio_venue_a: Decimal,
    pub balance_ratio_venue_b: Decimal,
    pub balance_ratio_diff_threshold: Decimal,
    /// Total equity below `initial - loss_threshold` raises an alert.
    pub loss_threshold_usdt: Decimal,
    pub min_rebalance_usdt: Decimal,
    pub rebalance_settle_delay_ms: u64,
    /// Period of the balance summary post. Zero disables it.
    pub balance_report_interval_ms: u64,

    // Tick
    pub data_fetch_time_threshold_ms: u64,
    pub snapshot_ttl_ms: u64,
    pub tick_interval_ms: u64,

    // Currencies
    /// Exchange book pricing the protocol collateral in exchange quote units.
    /// `None` treats the two currencies as at par.
    pub quote_conversion_symbol: Option<String>,
    pub venue_quote_currency: String,
    pub protocol_collateral_currency: String,

    pub orderbook: OrderbookFeedConfig,
    pub alerts: AlertConfig,

    /// Per-symbol overrides keyed by base asset.
    pub market_params: HashMap<String, MarketParams>,
}

/// Settings for the streaming order-book task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderbookFeedConfig {
    pub resync_retry_delay_ms: u64,
    /// Resync failing for longer than this raises an urgent alert.
    pub resync_escalation_ms: u64,
    /// The stream is torn down and reopened after this long.
    pub stream_rotation_ms: u64,
    /// Books are reported unavailable for this long after a rotation.
    pub stream_restart_grace_ms: u64,
    /// Supervisor delay before restarting a failed stream.
    pub restart_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub slack_webhook_url: Option<String>,
    pub manager_slack_id: Option<String>,
}

/// Optional per-symbol overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketParams {
    pub min_order_usdt: Option<Decimal>,
    pub max_position_usdt: Option<Decimal>,
    pub max_market_skewness_usdt: Option<Decimal>,
    /// Walks stop at levels beyond `best * (1 -/+ slippage)`.
    pub max_orderbook_slippage: Option<Decimal>,
    pub protocol_market_id: Option<u32>,
    /// Protocol quantity increment in base units.
    pub protocol_qty_step: Option<Decimal>,
    /// Exchange instrument name, defaults to `{BASE}-USDT-SWAP`.
    pub venue_symbol: Option<String>,
}

/// Fully resolved parameters for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolParams {
    pub base: String,
    pub venue_symbol: String,
    pub protocol_symbol: String,
    pub protocol_market_id: u32,
    pub min_order_usdt: Decimal,
    pub max_position_usdt: Decimal,
    pub max_market_skewness_usdt: Decimal,
    pub max_orderbook_slippage: Option<Decimal>,
    pub protocol_qty_step: Decimal,
}

fn dec(num: i64, scale: u32) -> Decimal {
    Decimal::new(num, scale)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_symbol_list: vec!["BTC".to_string(), "ETH".to_string()],
            price_diff_threshold: dec(2, 3),
            min_threshold: dec(5, 4),
            ema_window: 300,
            funding_multiplier: Decimal::ONE,
            max_position_usdt: Decimal::from(10_000),
            unhedged_threshold_usdt: Decimal::from(200),
            max_order_usdt: Decimal::from(1_000),
            min_order_usdt: Decimal::from(20),
            max_market_skewness_usdt: Decimal::from(50_000),
            max_total_position_usdt: Decimal::from(30_000),
            max_leverage: Decimal::from(3),
            min_order_interval_ms: 10_000,
            hedge_cooldown_ms: 20_000,
            hedge_venue: Venue::Protocol,
            initial_balance_usdt: Decimal::from(10_000),
            balance_ratio_venue_a: dec(5, 1),
            balance_ratio_venue_b: dec(5, 1),
            balance_ratio_diff_threshold: dec(2, 1),
            loss_threshold_usdt: Decimal::from(1_000),
            min_rebalance_usdt: Decimal::from(100),
            rebalance_settle_delay_ms: 30_000,
            balance_report_interval_ms: 3_600_000,
            data_fetch_time_threshold_ms: 3_000,
            snapshot_ttl_ms: 10_000,
            tick_interval_ms: 5_000,
            quote_conversion_symbol: Some("USDC-USDT".to_string()),
            venue_quote_currency: "USDT".to_string(),
            protocol_collateral_currency: "USDC".to_string(),
            orderbook: OrderbookFeedConfig::default(),
            alerts: AlertConfig::default(),
            market_params: HashMap::new(),
        }
    }
}

impl Default for OrderbookFeedConfig {
    fn default() -> Self {
        Self {
            resync_retry_delay_ms: 1_000,
            resync_escalation_ms: 60_000,
            stream_rotation_ms: 1_800_000,
            stream_restart_grace_ms: 10_000,
            restart_delay_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Conservative preset: small orders, tight exposure, slower pacing.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            price_diff_threshold: dec(3, 3),
            min_threshold: dec(1, 3),
            max_position_usdt: Decimal::from(2_000),
            unhedged_threshold_usdt: Decimal::from(50),
            max_order_usdt: Decimal::from(200),
            max_total_position_usdt: Decimal::from(5_000),
            max_leverage: Decimal::from(2),
            min_order_interval_ms: 30_000,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_symbol_list = symbols.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_market_params(mut self, base: impl Into<String>, params: MarketParams) -> Self {
        self.market_params.insert(base.into(), params);
        self
    }

    #[must_use]
    pub fn with_price_diff_threshold(mut self, threshold: Decimal) -> Self {
        self.price_diff_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_min_order_interval_ms(mut self, interval_ms: u64) -> Self {
        self.min_order_interval_ms = interval_ms;
        self
    }

    /// Resolves overrides and naming for `base`.
    #[must_use]
    pub fn symbol_params(&self, base: &str) -> SymbolParams {
        let overrides = self.market_params.get(base).cloned().unwrap_or_default();
        let default_market_id = self
            .target_symbol_list
            .iter()
            .position(|s| s == base)
            .and_then(|i| u32::try_from(i).ok())
            .unwrap_or(0);

        SymbolParams {
            base: base.to_string(),
            venue_symbol: overrides
                .venue_symbol
                .unwrap_or_else(|| format!("{base}-{}-SWAP", self.venue_quote_currency)),
            protocol_symbol: format!("{base}_{}", self.protocol_collateral_currency),
            protocol_market_id: overrides.protocol_market_id.unwrap_or(default_market_id),
            min_order_usdt: overrides.min_order_usdt.unwrap_or(self.min_order_usdt),
            max_position_usdt: overrides.max_position_usdt.unwrap_or(self.max_position_usdt),
            max_market_skewness_usdt: overrides
                .max_market_skewness_usdt
                .unwrap_or(self.max_market_skewness_usdt),
            max_orderbook_slippage: overrides.max_orderbook_slippage,
            protocol_qty_step: overrides.protocol_qty_step.unwrap_or_else(|| dec(1, 4)),
        }
    }

    #[must_use]
    pub fn min_order_interval(&self) -> Duration {
        Duration::from_millis(self.min_order_interval_ms)
    }

    #[must_use]
    pub fn data_fetch_budget(&self) -> Duration {
        Duration::from_millis(self.data_fetch_time_threshold_ms)
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_symbol_list.is_empty() {
            return Err(ConfigError::EmptySymbolList);
        }
        for (i, symbol) in self.target_symbol_list.iter().enumerate() {
            if self.target_symbol_list[..i].contains(symbol) {
                return Err(ConfigError::DuplicateSymbol(symbol.clone()));
            }
        }
        if self.ema_window < 1 {
            return Err(ConfigError::InvalidWindow);
        }
        if self.balance_ratio_venue_a + self.balance_ratio_venue_b != Decimal::ONE {
            return Err(ConfigError::RatioSum {
                venue_a: self.balance_ratio_venue_a,
                venue_b: self.balance_ratio_venue_b,
            });
        }

        let non_negative = [
            ("price_diff_threshold", self.price_diff_threshold),
            ("min_threshold", self.min_threshold),
            ("min_order_usdt", self.min_order_usdt),
            ("unhedged_threshold_usdt", self.unhedged_threshold_usdt),
            ("max_market_skewness_usdt", self.max_market_skewness_usdt),
            ("balance_ratio_venue_a", self.balance_ratio_venue_a),
            ("balance_ratio_venue_b", self.balance_ratio_venue_b),
            ("balance_ratio_diff_threshold", self.balance_ratio_diff_threshold),
            ("loss_threshold_usdt", self.loss_threshold_usdt),
        ];
        if let Some((field, _)) = non_negative.iter().find(|(_, v)| *v < Decimal::ZERO) {
            return Err(ConfigError::Negative { field: *field });
        }

        let positive = [
            ("max_order_usdt", self.max_order_usdt),
            ("max_position_usdt", self.max_position_usdt),
            ("max_total_position_usdt", self.max_total_position_usdt),
            ("max_leverage", self.max_leverage),
            ("initial_balance_usdt", self.initial_balance_usdt),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v <= Decimal::ZERO) {
            return Err(ConfigError::NonPositive { field: *field });
        }
        if self.data_fetch_time_threshold_ms == 0 {
            return Err(ConfigError::NonPositive {
                field: "data_fetch_time_threshold_ms",
            });
        }

        Ok(())
    }
}
