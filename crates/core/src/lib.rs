pub mod alert;
pub mod config;
pub mod config_loader;
pub mod config_watcher;
pub mod market_status;
pub mod supervisor;
pub mod traits;
pub mod types;

pub use alert::{Alert, AlertSink, Deduplicated, LogAlertSink, MemoryAlertSink, SlackAlertSink};
pub use config::{ConfigError, EngineConfig, MarketParams, OrderbookFeedConfig, SymbolParams};
pub use config_loader::ConfigLoader;
pub use config_watcher::ConfigWatcher;
pub use market_status::{DecodeError, MarketStatus};
pub use supervisor::{supervise, supervise_with};
pub use traits::{ProtocolClient, SwapClient, VenueClient};
pub use types::{
    total_of, ActionParam, ActionType, Balance, Book, DepthEvent, DepthUpdate, FundingRate,
    InstrumentSpec, OpenOrder, OrderAck, OrderVariant, OrderbookLevel, Position, Side, Venue,
};
