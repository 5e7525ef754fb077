//! Tick loop wiring the order book, strategy, execution and rebalance
//! crates together.
//!
//! A typical deployment builds the feed with [`orderbook_feed`], creates the
//! [`Engine`] from the feed's view receiver, hands the engine's balance
//! receiver to [`spawn_background`], and then awaits [`Engine::run`].

pub mod background;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod monitor;
pub mod report;
pub mod snapshot;

pub use background::{feed_symbols, orderbook_feed, spawn_background, Background};
pub use engine::{Engine, ENGINE_START};
pub use error::{EngineError, Result};
pub use fetch::{fetch_all, FetchedData, SymbolFetch};
pub use monitor::{BalanceMonitor, BALANCE_INFO, BALANCE_OUT_OF_RANGE, TOTAL_BALANCE_TOO_LOW};
pub use report::{SymbolReport, TickReport};
pub use snapshot::MarketSnapshot;
