use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use skew_arb_execution::{Decision, ExecutionOutcome, OutcomeSummary};
use skew_arb_rebalance::BalanceSnapshot;
use skew_arb_strategy::SideThresholds;

/// What the pipeline concluded for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolReport {
    pub symbol: String,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium_ema: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<SideThresholds>,
    /// Sizer output before risk clamping.
    pub raw_size: Decimal,
    /// Reason the symbol was not evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl SymbolReport {
    #[must_use]
    pub fn skipped(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            decision: Decision::Hold,
            premium_ema: None,
            thresholds: None,
            raw_size: Decimal::ZERO,
            skipped: Some(reason.into()),
        }
    }
}

/// Result of one completed tick.
#[derive(Debug, Serialize)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    pub quote_rate: Decimal,
    /// In configured priority order.
    pub symbols: Vec<SymbolReport>,
    pub execution: OutcomeSummary,
    #[serde(skip)]
    pub outcome: ExecutionOutcome,
    pub balances: BalanceSnapshot,
    pub balance_alerts: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lp_pool_value: Option<Decimal>,
}

impl TickReport {
    #[must_use]
    pub fn symbol(&self, base: &str) -> Option<&SymbolReport> {
        self.symbols.iter().find(|s| s.symbol == base)
    }
}
