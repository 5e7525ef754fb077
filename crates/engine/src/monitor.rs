//! Per-tick equity checks across both venues.

use rust_decimal::Decimal;
use serde_json::json;
use skew_arb_core::{Alert, AlertSink, EngineConfig};
use skew_arb_rebalance::BalanceSnapshot;
use std::time::Duration;
use tracing::{info, warn};

pub const TOTAL_BALANCE_TOO_LOW: &str = "TOTAL BALANCE TOO LOW";
pub const BALANCE_OUT_OF_RANGE: &str = "BALANCE OUT OF RANGE";
pub const BALANCE_INFO: &str = "BALANCE INFO";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMonitor {
    initial_balance: Decimal,
    ratio_venue: Decimal,
    ratio_protocol: Decimal,
    diff_threshold: Decimal,
    loss_threshold: Decimal,
}

impl BalanceMonitor {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            initial_balance: config.initial_balance_usdt,
            ratio_venue: config.balance_ratio_venue_a,
            ratio_protocol: config.balance_ratio_venue_b,
            diff_threshold: config.balance_ratio_diff_threshold,
            loss_threshold: config.loss_threshold_usdt,
        }
    }

    /// Topics breached by `snapshot`, without sending anything.
    #[must_use]
    pub fn breaches(&self, snapshot: &BalanceSnapshot) -> Vec<&'static str> {
        let mut topics = Vec::new();
        if snapshot.total() < self.initial_balance - self.loss_threshold {
            topics.push(TOTAL_BALANCE_TOO_LOW);
        }
        let band = self.initial_balance * self.diff_threshold;
        let venue_off = (snapshot.exchange - self.initial_balance * self.ratio_venue).abs() > band;
        let protocol_off = (snapshot.protocol - self.initial_balance * self.ratio_protocol).abs() > band;
        if venue_off || protocol_off {
            topics.push(BALANCE_OUT_OF_RANGE);
        }
        topics
    }

    /// Alerts every breach and returns their topics.
    pub async fn check(&self, alerts: &dyn AlertSink, snapshot: &BalanceSnapshot) -> Vec<&'static str> {
        let topics = self.breaches(snapshot);
        for &topic in &topics {
            let text = format!(
                "exchange {} + protocol {} = {} (initial {})",
                snapshot.exchange.round_dp(2),
                snapshot.protocol.round_dp(2),
                snapshot.total().round_dp(2),
                self.initial_balance
            );
            warn!(topic, exchange = %snapshot.exchange, protocol = %snapshot.protocol, "Balance check failed");
            let alert = Alert::new(topic, text);
            let alert = if topic == TOTAL_BALANCE_TOO_LOW {
                alert.mention().urgent()
            } else {
                alert
            };
            alerts.notify(alert).await;
        }
        topics
    }

    /// Posts the equity summary of `snapshot`.
    pub async fn report(&self, alerts: &dyn AlertSink, snapshot: &BalanceSnapshot) {
        info!(exchange = %snapshot.exchange, protocol = %snapshot.protocol, "Balance summary");
        let text = json!({
            "exchange": snapshot.exchange.round_dp(2),
            "protocol": snapshot.protocol.round_dp(2),
            "quote_rate": snapshot.quote_rate.round_dp(6),
            "total": snapshot.total().round_dp(2),
        });
        alerts
            .notify(Alert::new(BALANCE_INFO, text.to_string()).dedupe(Duration::ZERO))
            .await;
    }
}
