//! Level-2 order book maintenance for Venue A.
//!
//! [`OrderbookStore`] applies snapshots and sequence-chained deltas.
//! [`OrderbookFeed`] owns the store, drives it from the venue stream, and
//! publishes an [`OrderbookView`] that readers observe through a
//! `tokio::sync::watch` channel.

pub mod error;
pub mod feed;
pub mod store;

pub use error::{OrderbookError, Result};
pub use feed::OrderbookFeed;
pub use store::{DeltaOutcome, OrderbookStore, OrderbookView};
