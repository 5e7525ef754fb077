//! Streaming ingestion task that owns the [`OrderbookStore`].
//!
//! One session consumes the venue's depth stream until the stream fails or
//! the rotation interval elapses. Desynced symbols are resynced with REST
//! snapshots fetched concurrently with stream consumption, so updates keep
//! being buffered while a fetch is in flight. Sessions are restarted by
//! [`skew_arb_core::supervise_with`].

use crate::error::OrderbookError;
use crate::store::{DeltaOutcome, OrderbookStore, OrderbookView};
use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::StreamExt;
use skew_arb_core::{Alert, AlertSink, Book, DepthEvent, OrderbookFeedConfig, VenueClient};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

type SnapshotFetch = (String, Result<Book>);

/// Owner of the order book store for one venue.
pub struct OrderbookFeed<C: ?Sized> {
    client: Arc<C>,
    symbols: Vec<String>,
    config: OrderbookFeedConfig,
    alerts: Arc<dyn AlertSink>,
    store: OrderbookStore,
    view_tx: watch::Sender<OrderbookView>,
    pending_fetches: HashSet<String>,
}

impl<C> OrderbookFeed<C>
where
    C: VenueClient + ?Sized + 'static,
{
    /// Creates the feed and the receiver readers use to observe books.
    #[must_use]
    pub fn new(
        client: Arc<C>,
        symbols: Vec<String>,
        config: OrderbookFeedConfig,
        alerts: Arc<dyn AlertSink>,
    ) -> (Self, watch::Receiver<OrderbookView>) {
        let store = OrderbookStore::new(symbols.iter().cloned());
        let (view_tx, view_rx) = watch::channel(store.view());
        (
            Self {
                client,
                symbols,
                config,
                alerts,
                store,
                view_tx,
                pending_fetches: HashSet::new(),
            },
            view_rx,
        )
    }

    /// Additional receiver for the published view.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<OrderbookView> {
        self.view_tx.subscribe()
    }

    #[must_use]
    pub const fn store(&self) -> &OrderbookStore {
        &self.store
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.store.view());
    }

    /// Runs one stream session.
    ///
    /// Returns `Ok(())` when the session rotates out and an error when the
    /// stream fails or ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened, yields an error, or closes.
    pub async fn run_session(&mut self) -> Result<()> {
        info!(symbols = ?self.symbols, "Initializing order book stream");
        self.alerts
            .notify(Alert::new(
                "INITIALIZE ORDERBOOK STREAM",
                format!("symbols: {}", self.symbols.join(", ")),
            ))
            .await;

        let mut stream = self
            .client
            .depth_updates(&self.symbols)
            .await
            .context("Failed to open depth stream")?;
        let mut fetches: JoinSet<SnapshotFetch> = JoinSet::new();
        self.pending_fetches.clear();

        let rotation = sleep(Duration::from_millis(self.config.stream_rotation_ms));
        tokio::pin!(rotation);

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(event)) => self.handle_event(event, &mut fetches).await,
                    Some(Err(e)) => return Err(e.context("Depth stream error")),
                    None => anyhow::bail!("Depth stream ended"),
                },
                Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                    match joined {
                        Ok((symbol, result)) => self.handle_snapshot(symbol, result, &mut fetches).await,
                        Err(e) => {
                            error!(error = %e, "Snapshot fetch task failed");
                            self.pending_fetches.clear();
                            for symbol in self.symbols.clone() {
                                if self.store.is_resyncing(&symbol) {
                                    let delay = self.retry_delay();
                                    self.spawn_fetch(&mut fetches, symbol, delay);
                                }
                            }
                        }
                    }
                }
                () = &mut rotation => {
                    let grace = chrono::Duration::milliseconds(
                        i64::try_from(self.config.stream_restart_grace_ms).unwrap_or(i64::MAX),
                    );
                    self.store.mark_unavailable_until(Utc::now() + grace);
                    self.publish();
                    info!(grace_ms = self.config.stream_restart_grace_ms, "Rotating order book stream");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_event(&mut self, event: DepthEvent, fetches: &mut JoinSet<SnapshotFetch>) {
        match event {
            DepthEvent::Snapshot(book) => {
                if let Err(e) = self.store.apply_book(book) {
                    warn!(error = %e, "Ignoring snapshot");
                    return;
                }
                self.publish();
            }
            DepthEvent::Update(update) => match self.store.apply_delta(update) {
                Ok(DeltaOutcome::Applied) => self.publish(),
                Ok(DeltaOutcome::Buffered) => {}
                Err(OrderbookError::Desync {
                    symbol,
                    expected,
                    received,
                }) => {
                    self.publish();
                    self.alerts
                        .notify(
                            Alert::new(
                                "ORDERBOOK DESYNC",
                                format!("({symbol}) sequence skipped: book {expected:?}, update {received}"),
                            )
                            .dedupe(Duration::from_secs(10))
                            .mention()
                            .urgent(),
                        )
                        .await;
                    self.spawn_fetch(fetches, symbol, Duration::ZERO);
                }
                Err(e) => warn!(error = %e, "Ignoring update"),
            },
        }
    }

    async fn handle_snapshot(
        &mut self,
        symbol: String,
        result: Result<Book>,
        fetches: &mut JoinSet<SnapshotFetch>,
    ) {
        self.pending_fetches.remove(&symbol);

        let failure = match result {
            Ok(book) => match self.store.complete_resync(book) {
                Ok(()) => {
                    self.publish();
                    return;
                }
                Err(e) => e.to_string(),
            },
            Err(e) => format!("snapshot fetch failed: {e:#}"),
        };

        // Another message may have resolved the resync meanwhile.
        let Some(since) = self.store.resync_started_at(&symbol) else {
            return;
        };
        warn!(symbol = %symbol, reason = %failure, "Resync attempt failed, retrying");

        let stalled_ms = (Utc::now() - since).num_milliseconds();
        if u64::try_from(stalled_ms).unwrap_or(0) >= self.config.resync_escalation_ms {
            self.alerts
                .notify(
                    Alert::new(
                        "ORDERBOOK RESYNC STALLED",
                        format!("({symbol}) unavailable for {stalled_ms}ms: {failure}"),
                    )
                    .mention()
                    .urgent(),
                )
                .await;
        }
        let delay = self.retry_delay();
        self.spawn_fetch(fetches, symbol, delay);
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.config.resync_retry_delay_ms)
    }

    fn spawn_fetch(&mut self, fetches: &mut JoinSet<SnapshotFetch>, symbol: String, delay: Duration) {
        if !self.pending_fetches.insert(symbol.clone()) {
            debug!(symbol = %symbol, "Snapshot fetch already pending");
            return;
        }
        let client = Arc::clone(&self.client);
        fetches.spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let result = client.fetch_order_book(&symbol).await;
            (symbol, result)
        });
    }
}
