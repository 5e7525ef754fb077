use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use skew_arb_core::SwapClient;
use tracing::info;

/// Stablecoin swap at a fixed rate minus a fee.
#[derive(Debug)]
pub struct PaperSwap {
    /// Units of the collateral currency per unit of the exchange quote currency.
    collateral_per_quote: Decimal,
    collateral: String,
    fee_rate: Decimal,
    swaps: Mutex<Vec<(String, String, Decimal)>>,
}

impl PaperSwap {
    /// `quote_rate` is the collateral price in exchange quote units.
    #[must_use]
    pub fn new(collateral: impl Into<String>, quote_rate: Decimal, fee_rate: Decimal) -> Self {
        let collateral_per_quote = if quote_rate.is_zero() {
            Decimal::ONE
        } else {
            Decimal::ONE / quote_rate
        };
        Self {
            collateral_per_quote,
            collateral: collateral.into(),
            fee_rate,
            swaps: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn swaps(&self) -> Vec<(String, String, Decimal)> {
        self.swaps.lock().clone()
    }
}

#[async_trait]
impl SwapClient for PaperSwap {
    async fn swap(&self, from_asset: &str, to_asset: &str, amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            bail!("swap amount must be positive, got {amount}");
        }
        let rate = if to_asset == self.collateral {
            self.collateral_per_quote
        } else if from_asset == self.collateral {
            Decimal::ONE / self.collateral_per_quote
        } else {
            bail!("no pool for {from_asset} -> {to_asset}");
        };
        let received = amount * rate * (Decimal::ONE - self.fee_rate);
        self.swaps
            .lock()
            .push((from_asset.to_string(), to_asset.to_string(), amount));
        info!(from = from_asset, to = to_asset, %amount, %received, "Paper swap");
        Ok(received)
    }
}
