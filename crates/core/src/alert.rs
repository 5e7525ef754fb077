//! Alerting sink with per-topic deduplication.
//!
//! # Overview
//!
//! Components receive an `Arc<dyn AlertSink>` at construction. An alert
//! carries a topic, free text, a dedupe window, and two escalation flags
//! (`mention` tags the on-call manager, `urgent` marks it page-worthy).
//! [`Deduplicated`] drops any alert whose topic was delivered inside its
//! window, so hot paths can raise alerts every tick without flooding.
//!
//! # Example
//!
//! ```
//! use skew_arb_core::alert::{Alert, AlertSink, LogAlertSink};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let sink = LogAlertSink::default();
//! sink.notify(Alert::new("ORDERBOOK DESYNC", "BTC gap").dedupe(Duration::from_secs(10)).urgent())
//!     .await;
//! # }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default dedupe window for alerts.
pub const DEFAULT_DEDUPE: Duration = Duration::from_secs(60);

/// Timeout for webhook delivery.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub topic: String,
    pub text: String,
    /// Repeats of `topic` inside this window are suppressed.
    pub dedupe: Duration,
    /// Tag the on-call manager.
    pub mention: bool,
    /// Escalate beyond the channel.
    pub urgent: bool,
}

impl Alert {
    #[must_use]
    pub fn new(topic: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            text: text.into(),
            dedupe: DEFAULT_DEDUPE,
            mention: false,
            urgent: false,
        }
    }

    #[must_use]
    pub fn dedupe(mut self, window: Duration) -> Self {
        self.dedupe = window;
        self
    }

    #[must_use]
    pub fn mention(mut self) -> Self {
        self.mention = true;
        self
    }

    #[must_use]
    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }
}

/// Destination for engine alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Delivers `alert`. Delivery failures are logged, never propagated.
    async fn notify(&self, alert: Alert);
}

/// Raw delivery channel wrapped by [`Deduplicated`].
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<()>;
}

// ============================================================================
// Deduplication
// ============================================================================

/// Suppresses repeated topics inside each alert's dedupe window.
///
/// A topic is recorded only after a successful send, so a failed delivery is
/// retried on the next alert.
pub struct Deduplicated<T> {
    transport: T,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl<T: AlertTransport> Deduplicated<T> {
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    fn sent_recently(&self, topic: &str, window: Duration, now: Instant) -> bool {
        self.last_sent
            .lock()
            .get(topic)
            .is_some_and(|last| now.duration_since(*last) < window)
    }
}

#[async_trait]
impl<T: AlertTransport> AlertSink for Deduplicated<T> {
    async fn notify(&self, alert: Alert) {
        let now = Instant::now();
        if self.sent_recently(&alert.topic, alert.dedupe, now) {
            debug!(topic = %alert.topic, "Alert suppressed by dedupe window");
            return;
        }

        match self.transport.send(&alert).await {
            Ok(()) => {
                self.last_sent.lock().insert(alert.topic.clone(), now);
            }
            Err(e) => {
                warn!(topic = %alert.topic, error = %e, "Failed to deliver alert");
            }
        }
    }
}

// ============================================================================
// Transports
// ============================================================================

/// Writes alerts to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl AlertTransport for LogTransport {
    async fn send(&self, alert: &Alert) -> Result<()> {
        if alert.urgent {
            error!(topic = %alert.topic, mention = alert.mention, "{}", alert.text);
        } else {
            warn!(topic = %alert.topic, mention = alert.mention, "{}", alert.text);
        }
        Ok(())
    }
}

/// Keeps delivered alerts in memory. Used by simulations to report alerts.
#[derive(Debug, Default, Clone)]
pub struct MemoryTransport {
    delivered: Arc<Mutex<Vec<Alert>>>,
}

impl MemoryTransport {
    #[must_use]
    pub fn delivered(&self) -> Vec<Alert> {
        self.delivered.lock().clone()
    }

    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.delivered.lock().iter().map(|a| a.topic.clone()).collect()
    }
}

#[async_trait]
impl AlertTransport for MemoryTransport {
    async fn send(&self, alert: &Alert) -> Result<()> {
        self.delivered.lock().push(alert.clone());
        Ok(())
    }
}

/// Posts alerts to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackTransport {
    client: reqwest::Client,
    webhook_url: String,
    manager_id: Option<String>,
}

impl SlackTransport {
    /// Creates a transport posting to `webhook_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(webhook_url: impl Into<String>, manager_id: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            manager_id,
        })
    }

    /// Message body in the channel format: optional mention, timestamp, topic, text.
    #[must_use]
    pub fn format(&self, alert: &Alert) -> String {
        let mention = match (&self.manager_id, alert.mention) {
            (Some(id), true) => format!("<@{id}> "),
            _ => String::new(),
        };
        format!(
            "{mention}*{}*\n[{}]\n{}",
            Utc::now().to_rfc3339(),
            alert.topic,
            alert.text
        )
    }
}

#[async_trait]
impl AlertTransport for SlackTransport {
    async fn send(&self, alert: &Alert) -> Result<()> {
        if alert.urgent {
            error!(topic = %alert.topic, "{}", alert.text);
        }
        self.client
            .post(&self.webhook_url)
            .json(&json!({ "text": self.format(alert) }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub type LogAlertSink = Deduplicated<LogTransport>;
pub type MemoryAlertSink = Deduplicated<MemoryTransport>;
pub type SlackAlertSink = Deduplicated<SlackTransport>;

impl Default for LogAlertSink {
    fn default() -> Self {
        Self::new(LogTransport)
    }
}

impl Default for MemoryAlertSink {
    fn default() -> Self {
        Self::new(MemoryTransport::default())
    }
}
