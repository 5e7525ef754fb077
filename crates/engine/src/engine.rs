//! The periodic decision loop.
//!
//! # Overview
//!
//! Every tick reads the published order book view, fans out all venue reads
//! under the latency budget, validates a [`MarketSnapshot`] per symbol and
//! runs the decision pipeline on each: premium EMA, thresholds, hedge check,
//! then sizing and clamping. The coordinator submits at most one decision.
//! Finally equity on both venues is checked and published to the rebalance
//! actor, with a summary posted every `balance_report_interval_ms`.
//!
//! The engine is the only writer of the EMA, the cooldowns and the
//! instrument cache; ticks run one at a time on `&mut self`.

use crate::error::{EngineError, Result};
use crate::fetch::{fetch_all, SymbolFetch};
use crate::monitor::BalanceMonitor;
use crate::report::{SymbolReport, TickReport};
use crate::snapshot::MarketSnapshot;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use skew_arb_core::{
    total_of, Alert, AlertSink, EngineConfig, InstrumentSpec, ProtocolClient, Side, SymbolParams,
    VenueClient,
};
use skew_arb_execution::{Decision, ExecutionCoordinator, OutcomeSummary, SymbolDecision};
use skew_arb_orderbook::OrderbookView;
use skew_arb_rebalance::{BalanceSnapshot, RebalanceHandle, RebalanceSettings};
use skew_arb_strategy::{
    coarse_step, ArbitrageSizer, ClampRequest, PremiumTracker, RiskController, SizerInputs,
    ThresholdInputs, ThresholdModel,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const ENGINE_START: &str = "ENGINE START";

fn millis(ms: u64) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

pub struct Engine {
    config: EngineConfig,
    params: Vec<SymbolParams>,
    venue: Arc<dyn VenueClient>,
    protocol: Arc<dyn ProtocolClient>,
    alerts: Arc<dyn AlertSink>,
    books: watch::Receiver<OrderbookView>,
    balances: watch::Sender<Option<BalanceSnapshot>>,
    config_updates: Option<watch::Receiver<EngineConfig>>,
    rebalance: Option<RebalanceHandle>,
    premium: PremiumTracker,
    thresholds: ThresholdModel,
    risk: RiskController,
    monitor: BalanceMonitor,
    coordinator: ExecutionCoordinator,
    instruments: HashMap<String, InstrumentSpec>,
    /// Last exchange mid per venue symbol, prices exposure of skipped symbols.
    last_mids: HashMap<String, Decimal>,
    last_balance_report: Option<DateTime<Utc>>,
}

impl Engine {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        venue: Arc<dyn VenueClient>,
        protocol: Arc<dyn ProtocolClient>,
        alerts: Arc<dyn AlertSink>,
        books: watch::Receiver<OrderbookView>,
    ) -> Self {
        let (balances, _) = watch::channel(None);
        Self {
            params: symbol_params(&config),
            premium: PremiumTracker::new(config.ema_window),
            thresholds: ThresholdModel::from_config(&config),
            risk: RiskController::from_config(&config),
            monitor: BalanceMonitor::from_config(&config),
            coordinator: ExecutionCoordinator::new(venue.clone(), protocol.clone(), alerts.clone(), &config),
            config,
            venue,
            protocol,
            alerts,
            books,
            balances,
            config_updates: None,
            rebalance: None,
            instruments: HashMap::new(),
            last_mids: HashMap::new(),
            last_balance_report: None,
        }
    }

    /// Applies configs received on `updates` between ticks.
    #[must_use]
    pub fn with_config_updates(mut self, updates: watch::Receiver<EngineConfig>) -> Self {
        self.config_updates = Some(updates);
        self
    }

    /// Forwards rebalance settings to the actor on config changes.
    #[must_use]
    pub fn with_rebalance(mut self, handle: RebalanceHandle) -> Self {
        self.rebalance = Some(handle);
        self
    }

    /// Receiver of the balance snapshot published after every tick.
    #[must_use]
    pub fn balance_updates(&self) -> watch::Receiver<Option<BalanceSnapshot>> {
        self.balances.subscribe()
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn coordinator(&self) -> &ExecutionCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub const fn premium(&self) -> &PremiumTracker {
        &self.premium
    }

    /// Replaces the configuration. EMA state, cooldowns and cached
    /// instruments are kept.
    pub async fn update_config(&mut self, config: EngineConfig) {
        info!(symbols = ?config.target_symbol_list, "Applying configuration update");
        self.params = symbol_params(&config);
        self.premium.set_window(config.ema_window);
        self.thresholds = ThresholdModel::from_config(&config);
        self.risk = RiskController::from_config(&config);
        self.monitor = BalanceMonitor::from_config(&config);
        self.coordinator.update_config(&config);
        if let Some(handle) = &self.rebalance {
            if let Err(e) = handle.update_settings(RebalanceSettings::from_config(&config)).await {
                warn!(error = %e, "Failed to forward rebalance settings");
            }
        }
        self.config = config;
    }

    /// Pulls a pending config update, if any. Returns true when one was applied.
    pub async fn apply_config_update(&mut self) -> bool {
        let Some(updates) = self.config_updates.as_mut() else {
            return false;
        };
        if !updates.has_changed().unwrap_or(false) {
            return false;
        }
        let config = updates.borrow_and_update().clone();
        self.update_config(config).await;
        true
    }

    async fn load_instruments(&mut self) {
        for params in &self.params {
            if self.instruments.contains_key(&params.venue_symbol) {
                continue;
            }
            match self.venue.fetch_instrument(&params.venue_symbol).await {
                Ok(spec) => {
                    debug!(symbol = %params.venue_symbol, base_step = %spec.base_step(), "Loaded instrument");
                    self.instruments.insert(params.venue_symbol.clone(), spec);
                }
                Err(e) => warn!(symbol = %params.venue_symbol, error = %e, "Failed to load instrument"),
            }
        }
    }

    /// `|position| * mid` for one symbol, read before validation so a skipped
    /// symbol still counts. `None` when the position is unknown, or when a
    /// non-flat position has no price.
    fn exposure(&mut self, params: &SymbolParams, fetch: &SymbolFetch, view: &OrderbookView) -> Option<Decimal> {
        let mid = view
            .get_book(&params.venue_symbol)
            .and_then(|book| book.mid_price())
            .filter(|mid| *mid > Decimal::ZERO);
        if let Some(mid) = mid {
            self.last_mids.insert(params.venue_symbol.clone(), mid);
        }

        let size = match &fetch.venue_position {
            Ok(position) => position.as_ref().map_or(Decimal::ZERO, |p| p.size),
            Err(_) => return None,
        };
        if size.is_zero() {
            return Some(Decimal::ZERO);
        }
        let mid = mid.or_else(|| self.last_mids.get(&params.venue_symbol).copied())?;
        Some(size.abs() * mid)
    }

    fn quote_rate(&self, view: &OrderbookView, now: DateTime<Utc>) -> Result<Decimal> {
        let Some(symbol) = &self.config.quote_conversion_symbol else {
            return Ok(Decimal::ONE);
        };
        let book = view
            .get_book(symbol)
            .filter(|_| view.is_symbol_available(symbol, now))
            .ok_or_else(|| EngineError::reference(symbol, "book unavailable"))?;
        if book.is_stale(now, millis(self.config.snapshot_ttl_ms)) {
            return Err(EngineError::reference(symbol, "book stale"));
        }
        book.mid_price()
            .filter(|mid| *mid > Decimal::ZERO)
            .ok_or_else(|| EngineError::reference(symbol, "book empty"))
    }

    /// Runs one full tick at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::OrderbookUnavailable`] during a stream restart,
    /// [`EngineError::FetchTimeout`] when the reads exceed the budget and
    /// [`EngineError::ReferencePrice`] when balances or the quote rate are
    /// missing. Per-symbol validation failures skip that symbol only.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        let view = self.books.borrow().clone();
        if !view.is_stream_ready(now) {
            return Err(EngineError::OrderbookUnavailable);
        }
        self.load_instruments().await;

        let budget_ms = self.config.data_fetch_time_threshold_ms;
        let data = timeout(
            self.config.data_fetch_budget(),
            fetch_all(self.venue.as_ref(), self.protocol.as_ref(), &self.params),
        )
        .await
        .map_err(|_| EngineError::FetchTimeout { budget_ms })?;

        let quote_rate = self.quote_rate(&view, now)?;
        let venue_balances = data
            .venue_balances
            .map_err(|e| EngineError::reference("exchange balances", e))?;
        let collateral = data
            .collateral
            .map_err(|e| EngineError::reference("protocol collateral", e))?;
        let lp_pool_value = data
            .lp_pool_value
            .map_err(|e| debug!(error = %e, "LP pool value unavailable"))
            .ok();

        let ttl = millis(self.config.snapshot_ttl_ms);
        let params = self.params.clone();
        let mut snapshots = Vec::with_capacity(params.len());
        let mut gross_exposure = Decimal::ZERO;
        let mut unknown_exposure = Vec::new();
        for (p, fetch) in params.iter().zip(data.symbols) {
            match self.exposure(p, &fetch, &view) {
                Some(exposure) => gross_exposure += exposure,
                None => unknown_exposure.push(p.base.clone()),
            }
            let instrument = self.instruments.get(&p.venue_symbol);
            let snapshot = MarketSnapshot::assemble(p, fetch, &view, instrument, now, ttl);
            if let Err(e) = &snapshot {
                warn!(symbol = %p.base, error = %e, "Skipping symbol");
                self.alerts
                    .notify(Alert::new("DATA VALIDATION", e.to_string()))
                    .await;
            }
            snapshots.push(snapshot);
        }

        let exchange_balance = total_of(&venue_balances, &self.config.venue_quote_currency);
        let protocol_collateral: Decimal = collateral
            .iter()
            .filter(|b| b.currency == self.config.protocol_collateral_currency)
            .map(|b| b.weighted_total())
            .sum();
        let capacity = if unknown_exposure.is_empty() {
            self.risk
                .leverage_capacity(exchange_balance, protocol_collateral, quote_rate, gross_exposure)
        } else {
            // Only exposure-reducing trades fit in zero capacity.
            warn!(symbols = ?unknown_exposure, "Exchange exposure unknown, no new exposure this tick");
            Decimal::ZERO
        };
        debug!(%exchange_balance, %protocol_collateral, %gross_exposure, %capacity, "Leverage capacity");

        let mut reports = Vec::with_capacity(snapshots.len());
        let mut decisions = Vec::new();
        for (p, snapshot) in params.iter().zip(&snapshots) {
            match snapshot {
                Ok(snapshot) => {
                    let report = self.decide(snapshot, quote_rate, capacity, now).await;
                    decisions.push(SymbolDecision {
                        params: snapshot.params.clone(),
                        decision: report.decision,
                        open_orders: snapshot.open_orders.clone(),
                    });
                    reports.push(report);
                }
                Err(e) => reports.push(SymbolReport::skipped(&p.base, e.to_string())),
            }
        }

        let outcome = self.coordinator.execute(&decisions, now).await;

        let unrealized: Decimal = snapshots.iter().flatten().map(MarketSnapshot::protocol_pnl).sum();
        let balances = BalanceSnapshot {
            exchange: exchange_balance,
            protocol: (protocol_collateral + unrealized) * quote_rate,
            quote_rate,
            timestamp: now,
        };
        let balance_alerts = self.monitor.check(self.alerts.as_ref(), &balances).await;
        if self.balance_report_due(now) {
            self.monitor.report(self.alerts.as_ref(), &balances).await;
            self.last_balance_report = Some(now);
        }
        self.balances.send_replace(Some(balances.clone()));

        Ok(TickReport {
            timestamp: now,
            quote_rate,
            symbols: reports,
            execution: OutcomeSummary::from(&outcome),
            outcome,
            balances,
            balance_alerts,
            lp_pool_value,
        })
    }

    fn balance_report_due(&self, now: DateTime<Utc>) -> bool {
        let interval = self.config.balance_report_interval_ms;
        interval > 0
            && self
                .last_balance_report
                .map_or(true, |last| now - last >= millis(interval))
    }

    async fn decide(
        &mut self,
        snapshot: &MarketSnapshot,
        quote_rate: Decimal,
        capacity_usdt: Decimal,
        now: DateTime<Utc>,
    ) -> SymbolReport {
        let base = snapshot.params.base.as_str();
        let mark_equivalent = snapshot.mark_price() * quote_rate;
        let ema = match self.premium.update(base, snapshot.mid, mark_equivalent) {
            Ok(ema) => ema,
            Err(e) => return SymbolReport::skipped(base, e.to_string()),
        };

        let protocol_position = snapshot.protocol_size();
        let inputs = ThresholdInputs {
            ema,
            funding_rate: snapshot.funding.rate,
            next_funding_time: snapshot.funding.next_funding_time,
            funding_price_24h: snapshot.status.funding_price_24h,
            index_price: snapshot.index_price,
            now,
        };
        let thresholds = self.thresholds.side_thresholds(&inputs, protocol_position);
        let step = coarse_step(snapshot.instrument.base_step(), snapshot.params.protocol_qty_step);

        let mut report = SymbolReport {
            symbol: base.to_string(),
            decision: Decision::Hold,
            premium_ema: Some(ema),
            thresholds: Some(thresholds),
            raw_size: Decimal::ZERO,
            skipped: None,
        };

        if let Some(size) =
            self.risk
                .hedge_check(snapshot.venue_position, protocol_position, snapshot.mid, step)
        {
            let venue = self.config.hedge_venue;
            warn!(
                symbol = base,
                exchange = %snapshot.venue_position,
                protocol = %protocol_position,
                correction = %size,
                %venue,
                "Unhedged position"
            );
            self.alerts
                .notify(
                    Alert::new(
                        "UNHEDGED POSITION",
                        format!(
                            "({base}) exchange {} protocol {}, correcting {size} on {venue}",
                            snapshot.venue_position, protocol_position
                        ),
                    )
                    .mention(),
                )
                .await;
            report.decision = Decision::Hedge { venue, size };
            return report;
        }

        let sizer_inputs = SizerInputs {
            book: &snapshot.book,
            index_price: snapshot.index_price,
            skewness: snapshot.status.skewness,
            depth_factor: snapshot.status.depth_factor,
            thresholds,
            quote_rate,
            contract_size: snapshot.instrument.contract_size,
            max_slippage: snapshot.params.max_orderbook_slippage,
        };
        let raw = ArbitrageSizer::size(&sizer_inputs);
        let size = self.risk.clamp(&ClampRequest {
            params: &snapshot.params,
            size: raw,
            mid: snapshot.mid,
            position: protocol_position,
            skewness: snapshot.status.skewness,
            capacity_usdt,
            step,
        });
        report.raw_size = raw;

        if let Some(side) = Side::from_size(size) {
            info!(symbol = base, %side, %size, %raw, %ema, "Arbitrage opportunity");
            report.decision = Decision::Trade { size };
        } else if !raw.is_zero() {
            debug!(symbol = base, %raw, "Opportunity clamped to zero");
        }
        report
    }

    /// Runs one tick, logging and alerting a failure instead of returning it.
    pub async fn run_once(&mut self, now: DateTime<Utc>) -> Option<TickReport> {
        match self.tick(now).await {
            Ok(report) => {
                debug!(
                    outcome = report.execution.outcome,
                    symbol = ?report.execution.symbol,
                    "Tick complete"
                );
                Some(report)
            }
            Err(e) => {
                match e.alert_topic() {
                    Some(topic) => {
                        warn!(error = %e, retryable = e.is_retryable(), "Tick aborted");
                        self.alerts.notify(Alert::new(topic, e.to_string())).await;
                    }
                    None => debug!(error = %e, "Tick skipped"),
                }
                None
            }
        }
    }

    /// Ticks every `tick_interval_ms` until `shutdown` resolves.
    ///
    /// Config updates are applied between ticks; a changed interval takes
    /// effect from the next tick.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut period = self.config.tick_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            symbols = ?self.config.target_symbol_list,
            interval_ms = self.config.tick_interval_ms,
            "Engine started"
        );
        self.alerts
            .notify(
                Alert::new(ENGINE_START, format!("{:?}", self.config.target_symbol_list))
                    .dedupe(std::time::Duration::ZERO)
                    .mention(),
            )
            .await;

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping engine");
                    return;
                }
                _ = ticker.tick() => {
                    if self.apply_config_update().await && self.config.tick_interval() != period {
                        period = self.config.tick_interval();
                        ticker = interval(period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        ticker.reset();
                    }
                    self.run_once(Utc::now()).await;
                }
            }
        }
    }
}

fn symbol_params(config: &EngineConfig) -> Vec<SymbolParams> {
    config
        .target_symbol_list
        .iter()
        .map(|base| config.symbol_params(base))
        .collect()
}
