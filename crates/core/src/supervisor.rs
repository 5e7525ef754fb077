//! Restart loop for long-lived background tasks.

use crate::alert::{Alert, AlertSink};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

/// Runs `task` forever.
///
/// A task that returns `Ok` is restarted immediately (it exited on purpose,
/// e.g. a stream rotation). A task that fails is logged, alerted, and
/// restarted after `restart_delay`.
pub async fn supervise<F, Fut>(
    name: &str,
    restart_delay: Duration,
    alerts: Arc<dyn AlertSink>,
    mut task: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut restarts: u64 = 0;
    loop {
        let result = task().await;
        after_exit(name, restarts, result, alerts.as_ref(), restart_delay).await;
        restarts += 1;
    }
}

/// Like [`supervise`], for tasks that keep their state across restarts.
///
/// `state` is owned by the supervising task and lent to each run, so a
/// restarted feed keeps its books and a restarted actor keeps its state.
pub async fn supervise_with<S, F>(
    name: &str,
    restart_delay: Duration,
    alerts: Arc<dyn AlertSink>,
    mut state: S,
    mut task: F,
) where
    F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, anyhow::Result<()>>,
{
    let mut restarts: u64 = 0;
    loop {
        let result = task(&mut state).await;
        after_exit(name, restarts, result, alerts.as_ref(), restart_delay).await;
        restarts += 1;
    }
}

async fn after_exit(
    name: &str,
    restarts: u64,
    result: anyhow::Result<()>,
    alerts: &dyn AlertSink,
    restart_delay: Duration,
) {
    match result {
        Ok(()) => {
            info!(task = name, restarts, "Task exited, restarting");
        }
        Err(e) => {
            error!(task = name, restarts, error = %e, "Task failed");
            alerts
                .notify(Alert::new(format!("{} FAILED", name.to_uppercase()), format!("{e:#}")))
                .await;
            info!(task = name, delay = ?restart_delay, "Waiting before restart");
            sleep(restart_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemoryTransport;
    use crate::Deduplicated;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_supervise_restarts_failed_task() {
        let transport = MemoryTransport::default();
        let alerts: Arc<dyn AlertSink> = Arc::new(Deduplicated::new(transport.clone()));
        let runs = Arc::new(AtomicU32::new(0));

        let counter = runs.clone();
        let supervised = supervise("feed", Duration::from_millis(1), alerts, move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n % 2 == 0 {
                    anyhow::bail!("stream dropped");
                }
                Ok(())
            }
        });

        let _ = tokio::time::timeout(Duration::from_millis(100), supervised).await;

        assert!(runs.load(Ordering::SeqCst) >= 3);
        // Repeated failures collapse into one alert inside the dedupe window.
        assert_eq!(transport.topics(), vec!["FEED FAILED".to_string()]);
    }

    #[tokio::test]
    async fn test_supervise_with_keeps_state_across_restarts() {
        use futures_util::FutureExt;

        let alerts: Arc<dyn AlertSink> = Arc::new(Deduplicated::new(MemoryTransport::default()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let supervised = supervise_with(
            "actor",
            Duration::from_millis(1),
            alerts,
            0_u32,
            move |runs: &mut u32| {
                let tx = tx.clone();
                async move {
                    *runs += 1;
                    let _ = tx.send(*runs);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    anyhow::bail!("run {runs} failed")
                }
                .boxed()
            },
        );
        let _ = tokio::time::timeout(Duration::from_millis(100), supervised).await;

        let mut seen = Vec::new();
        while let Ok(n) = rx.try_recv() {
            seen.push(n);
        }
        assert!(seen.len() >= 3);
        assert_eq!(&seen[..3], &[1, 2, 3]);
    }
}
