//! End-to-end ticks against the paper venues.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skew_arb_core::alert::MemoryTransport;
use skew_arb_core::{
    AlertSink, Book, Deduplicated, EngineConfig, OrderbookLevel, ProtocolClient, SwapClient, Venue,
    VenueClient,
};
use skew_arb_engine::{
    feed_symbols, orderbook_feed, spawn_background, Engine, EngineError, BALANCE_INFO,
};
use skew_arb_execution::{Decision, ExecutionOutcome, TRADE_TOPIC};
use skew_arb_orderbook::{OrderbookStore, OrderbookView};
use skew_arb_paper::{MarketScenario, PaperWorld, Scenario};
use skew_arb_rebalance::RebalanceState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const BTC: &str = "BTC-USDT-SWAP";
const ETH: &str = "ETH-USDT-SWAP";
const WARMUP_TICKS: usize = 9;

fn level(price: Decimal, quantity: Decimal) -> OrderbookLevel {
    OrderbookLevel::new(price, quantity)
}

fn market(base: &str, index: Decimal) -> MarketScenario {
    MarketScenario {
        base: base.to_string(),
        index_price: index,
        bids: vec![level(index, dec!(1000))],
        asks: vec![level(index * dec!(1.0002), dec!(1000))],
        ..MarketScenario::default()
    }
}

fn scenario(markets: Vec<MarketScenario>) -> Scenario {
    Scenario {
        markets,
        ..Scenario::default()
    }
}

fn config(symbols: &[&str]) -> EngineConfig {
    let mut config = EngineConfig::default().with_symbols(symbols.iter().copied());
    config.max_order_usdt = dec!(2000);
    config
}

/// Exchange book 1% above an unskewed protocol index of 100.
fn dislocated_btc() -> Book {
    Book::from_levels(
        BTC,
        2,
        vec![level(dec!(101), dec!(10)), level(dec!(100), dec!(1000))],
        vec![level(dec!(102), dec!(10))],
        Utc::now(),
    )
}

struct Harness {
    world: PaperWorld,
    engine: Engine,
    books: watch::Sender<OrderbookView>,
    alerts: MemoryTransport,
    symbols: Vec<String>,
}

impl Harness {
    fn new(scenario: &Scenario, config: EngineConfig) -> Self {
        let world = scenario.build();
        let alerts = MemoryTransport::default();
        let sink: Arc<dyn AlertSink> = Arc::new(Deduplicated::new(alerts.clone()));
        let symbols = feed_symbols(&config);
        let (books, books_rx) = watch::channel(OrderbookView::default());
        let engine = Engine::new(config, world.venue.clone(), world.protocol.clone(), sink, books_rx);
        Self {
            world,
            engine,
            books,
            alerts,
            symbols,
        }
    }

    /// Publishes the paper venue's current books as seen at `at`.
    async fn publish(&self, at: DateTime<Utc>) {
        self.publish_aged(at, None).await;
    }

    /// Like [`Self::publish`], with one symbol's book stamped `age` earlier.
    async fn publish_aged(&self, at: DateTime<Utc>, aged: Option<(&str, ChronoDuration)>) {
        let mut store = OrderbookStore::new(self.symbols.iter().cloned());
        for symbol in &self.symbols {
            let mut book = self.world.venue.fetch_order_book(symbol).await.unwrap();
            book.timestamp = match aged {
                Some((aged_symbol, age)) if aged_symbol == symbol.as_str() => at - age,
                _ => at,
            };
            store.apply_book(book).unwrap();
        }
        self.books.send_replace(store.view());
    }

    async fn tick(&mut self, at: DateTime<Utc>) -> skew_arb_engine::TickReport {
        self.publish(at).await;
        self.engine.tick(at).await.unwrap()
    }

    async fn warm_up(&mut self, at: DateTime<Utc>) {
        for _ in 0..WARMUP_TICKS {
            let report = self.tick(at).await;
            assert!(report.outcome.is_idle(), "warm-up traded: {:?}", report.execution);
        }
    }
}

#[tokio::test]
async fn test_single_dislocation_submits_one_two_leg_set() {
    let markets = vec![market("BTC", dec!(100)), market("ETH", dec!(2000))];
    let mut h = Harness::new(&scenario(markets), config(&["BTC", "ETH"]));
    let now = Utc::now();
    h.warm_up(now).await;

    // Both symbols dislocate; BTC has priority.
    h.world.venue.set_book(dislocated_btc());
    h.world.venue.set_book(Book::from_levels(
        ETH,
        2,
        vec![level(dec!(2020), dec!(1))],
        vec![level(dec!(2040), dec!(1))],
        now,
    ));
    let report = h.tick(now).await;

    assert_eq!(report.symbol("BTC").unwrap().decision, Decision::Trade { size: dec!(10) });
    assert!(matches!(report.symbol("ETH").unwrap().decision, Decision::Trade { .. }));
    match &report.outcome {
        ExecutionOutcome::Submitted { symbol, acks, .. } => {
            assert_eq!(symbol, "BTC");
            assert_eq!(acks.len(), 2);
        }
        other => panic!("expected submission, got {other:?}"),
    }

    let exchange_orders = h.world.venue.submitted();
    assert_eq!(exchange_orders.len(), 1);
    assert_eq!(exchange_orders[0].symbol, BTC);
    assert_eq!(exchange_orders[0].size(), Some(dec!(-10)));
    assert_eq!(h.world.protocol.orders(), vec![(0, dec!(10))]);

    assert_eq!(h.world.venue.position(BTC), dec!(-10));
    assert_eq!(h.world.protocol.position("BTC_USDC"), dec!(10));
    assert_eq!(h.world.protocol.position("ETH_USDC"), Decimal::ZERO);

    let notices: Vec<_> = h
        .alerts
        .delivered()
        .into_iter()
        .filter(|a| a.topic == TRADE_TOPIC)
        .collect();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].text.starts_with("(BTC)"));
    assert!(notices[0].text.contains(BTC));
}

#[tokio::test]
async fn test_balance_summary_posts_once_per_interval() {
    let mut h = Harness::new(&scenario(vec![market("BTC", dec!(100))]), config(&["BTC"]));
    let start = Utc::now();
    let posts = |h: &Harness| h.alerts.topics().iter().filter(|t| t.as_str() == BALANCE_INFO).count();

    h.tick(start).await;
    assert_eq!(posts(&h), 1);

    h.tick(start + ChronoDuration::minutes(30)).await;
    assert_eq!(posts(&h), 1);

    h.tick(start + ChronoDuration::hours(1)).await;
    assert_eq!(posts(&h), 2);
}

#[tokio::test]
async fn test_cooldown_blocks_repeat_until_interval_elapses() {
    let mut h = Harness::new(&scenario(vec![market("BTC", dec!(100))]), config(&["BTC"]));
    let start = Utc::now();
    h.warm_up(start).await;
    h.world.venue.set_book(dislocated_btc());

    let first = h.tick(start).await;
    assert_eq!(first.execution.outcome, "submitted");

    // Still dislocated, but inside min_order_interval_ms (10s).
    let blocked = h.tick(start + ChronoDuration::seconds(1)).await;
    assert!(matches!(blocked.symbol("BTC").unwrap().decision, Decision::Trade { .. }));
    assert!(blocked.outcome.is_idle());
    assert_eq!(h.world.protocol.orders().len(), 1);
    assert_eq!(h.engine.coordinator().cooldowns().last_order("BTC"), Some(start));

    let later = start + ChronoDuration::seconds(11);
    let repeated = h.tick(later).await;
    assert_eq!(repeated.execution.outcome, "submitted");
    assert_eq!(h.world.protocol.orders().len(), 2);
    assert_eq!(h.engine.coordinator().cooldowns().last_order("BTC"), Some(later));
}

/// BTC and ETH against a 5000 USDT total cap, with 2.45 ETH hedged on both
/// venues: 2.45 * 2000.2 = 4900.49 USDT of exchange exposure.
async fn capped_with_hedged_eth() -> Harness {
    let markets = vec![market("BTC", dec!(100)), market("ETH", dec!(2000))];
    let mut config = config(&["BTC", "ETH"]);
    config.max_total_position_usdt = dec!(5000);
    let mut h = Harness::new(&scenario(markets), config);
    h.world.venue.set_position(ETH, dec!(-2.45), Some(dec!(2000)));
    h.world.protocol.set_position("ETH_USDC", dec!(2.45), Some(dec!(2000)));
    h.warm_up(Utc::now()).await;
    h.world.venue.set_book(dislocated_btc());
    h
}

#[tokio::test]
async fn test_total_exposure_cap_includes_hedged_symbols() {
    let mut h = capped_with_hedged_eth().await;

    let report = h.tick(Utc::now()).await;

    // 99.51 USDT of room at mid 101.5, floored to the 0.001 lot.
    assert_eq!(report.symbol("BTC").unwrap().decision, Decision::Trade { size: dec!(0.980) });
    assert_eq!(h.world.protocol.orders(), vec![(0, dec!(0.980))]);
}

#[tokio::test]
async fn test_skipped_symbol_still_counts_toward_total_exposure() {
    let mut h = capped_with_hedged_eth().await;
    let now = Utc::now();

    h.publish_aged(now, Some((ETH, ChronoDuration::seconds(60)))).await;
    let report = h.engine.tick(now).await.unwrap();

    assert!(report.symbol("ETH").unwrap().skipped.is_some());
    assert_eq!(report.symbol("BTC").unwrap().decision, Decision::Trade { size: dec!(0.980) });

    let btc = h.world.venue.position(BTC).abs() * dec!(101.5);
    let eth = h.world.venue.position(ETH).abs() * dec!(2000.2);
    assert!(btc + eth <= dec!(5000), "total exposure {}", btc + eth);
}

#[tokio::test]
async fn test_unknown_position_blocks_new_exposure() {
    let mut h = capped_with_hedged_eth().await;
    h.world.venue.set_position_unreadable(ETH, true);

    let report = h.tick(Utc::now()).await;

    assert!(report.symbol("ETH").unwrap().skipped.is_some());
    let btc = report.symbol("BTC").unwrap();
    assert_eq!(btc.raw_size, dec!(10));
    assert_eq!(btc.decision, Decision::Hold);
    assert!(report.outcome.is_idle());
    assert!(h.world.protocol.orders().is_empty());
}

#[tokio::test]
async fn test_unhedged_exchange_position_is_corrected_on_protocol() {
    let mut h = Harness::new(&scenario(vec![market("BTC", dec!(100))]), config(&["BTC"]));
    // Short 5 on the exchange with nothing on the protocol: 500 USDT unhedged.
    h.world.venue.set_position(BTC, dec!(-5), Some(dec!(100)));

    let report = h.tick(Utc::now()).await;

    assert_eq!(
        report.symbol("BTC").unwrap().decision,
        Decision::Hedge {
            venue: Venue::Protocol,
            size: dec!(5)
        }
    );
    assert_eq!(h.world.protocol.orders(), vec![(0, dec!(5))]);
    assert!(h.world.venue.submitted().is_empty());
    assert!(h.alerts.topics().contains(&"UNHEDGED POSITION".to_string()));
}

#[tokio::test]
async fn test_hedge_can_target_the_exchange() {
    let mut config = config(&["BTC"]);
    config.hedge_venue = Venue::Exchange;
    let mut h = Harness::new(&scenario(vec![market("BTC", dec!(100))]), config);
    h.world.protocol.set_position("BTC_USDC", dec!(4), Some(dec!(100)));

    h.tick(Utc::now()).await;

    assert!(h.world.protocol.orders().is_empty());
    let orders = h.world.venue.submitted();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].size(), Some(dec!(-4)));
    assert_eq!(h.world.venue.position(BTC), dec!(-4));
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_aborts_without_trading() {
    let mut config = config(&["BTC"]);
    config.data_fetch_time_threshold_ms = 50;
    let mut h = Harness::new(&scenario(vec![market("BTC", dec!(100))]), config);
    h.world.venue.set_book(dislocated_btc());
    h.world.protocol.set_latency(Duration::from_millis(200));

    let now = Utc::now();
    h.publish(now).await;
    let err = h.engine.tick(now).await.unwrap_err();
    assert!(matches!(err, EngineError::FetchTimeout { budget_ms: 50 }));
    assert!(err.is_retryable());

    assert!(h.engine.run_once(now).await.is_none());
    assert!(h.world.protocol.orders().is_empty());
    assert!(h.world.venue.submitted().is_empty());
    assert!(h.alerts.topics().contains(&"DATA FETCH TIMEOUT".to_string()));
}

#[tokio::test]
async fn test_rotation_grace_skips_tick() {
    let mut h = Harness::new(&scenario(vec![market("BTC", dec!(100))]), config(&["BTC"]));
    let now = Utc::now();
    let mut store = OrderbookStore::new(h.symbols.iter().cloned());
    store.mark_unavailable_until(now + ChronoDuration::seconds(5));
    h.books.send_replace(store.view());

    assert!(matches!(h.engine.tick(now).await, Err(EngineError::OrderbookUnavailable)));
    assert!(h.engine.run_once(now).await.is_none());
    assert!(h.alerts.topics().is_empty());
}

#[tokio::test]
async fn test_balance_drift_alerts_and_triggers_rebalance() {
    let mut scenario = scenario(vec![market("BTC", dec!(100))]);
    scenario.venue_balance = dec!(8000);
    scenario.protocol_balance = dec!(2000);
    let mut config = config(&["BTC"]);
    config.rebalance_settle_delay_ms = 0;
    config.orderbook.restart_delay_ms = 50;

    let world = scenario.build();
    let alerts = MemoryTransport::default();
    let sink: Arc<dyn AlertSink> = Arc::new(Deduplicated::new(alerts.clone()));
    let venue: Arc<dyn VenueClient> = world.venue.clone();
    let protocol: Arc<dyn ProtocolClient> = world.protocol.clone();
    let swap: Arc<dyn SwapClient> = world.swap.clone();

    let (feed, books) = orderbook_feed(&config, venue.clone(), sink.clone());
    let mut ready = feed.subscribe();
    let engine = Engine::new(config.clone(), venue.clone(), protocol.clone(), sink.clone(), books);
    let background = spawn_background(&config, feed, (venue, protocol, swap), sink, engine.balance_updates());
    let mut engine = engine.with_rebalance(background.rebalance().clone());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !ready.borrow_and_update().is_available(Utc::now()) {
            ready.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    let report = engine.run_once(Utc::now()).await.unwrap();
    assert_eq!(report.balances.exchange, dec!(8000));
    assert_eq!(report.balances.protocol, dec!(2000));
    assert_eq!(report.balance_alerts, vec![skew_arb_engine::BALANCE_OUT_OF_RANGE]);

    // 3000 USDT leaves the exchange, 1 USDT withdrawal fee, 0.01% swap fee.
    tokio::time::timeout(Duration::from_secs(5), async {
        while world.protocol.collateral() == dec!(2000) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(world.venue.balance("USDT"), dec!(5000));
    assert_eq!(world.protocol.collateral(), dec!(2000) + dec!(2998.7001));

    let status = background.rebalance().get_state().await.unwrap();
    assert_eq!(status.state, RebalanceState::None);
    assert!(background.is_running());
    assert!(alerts.topics().contains(&"REBALANCE COMPLETE".to_string()));
}
