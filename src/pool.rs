// src/pool.rs

//! Bounded worker pool for package sync
//!
//! Drains a FIFO queue of project names with fixed parallelism. Each
//! project appears in the queue at most once per run, which is what
//! guarantees at-most-one active pipeline per project. Cancellation (user
//! interrupt or `stop-on-error`) stops dispatch immediately and tears
//! down in-flight work at its next suspension point; partial writes stay
//! behind as temp files for later reclamation.

use crate::error::{Error, Result};
use crate::package::SyncOutcome;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Completion notice sent to the controller while draining
#[derive(Debug, Clone)]
pub struct Completion {
    pub name: String,
    pub success: bool,
}

/// Aggregated result of a drain
#[derive(Debug, Default)]
pub struct DrainReport {
    pub outcomes: Vec<(String, SyncOutcome)>,
    pub errors: Vec<(String, Error)>,
    pub cancelled: bool,
}

impl DrainReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

/// Fixed-size pool of cooperative workers
pub struct WorkerPool {
    workers: usize,
    stop_on_error: bool,
    global_timeout: Duration,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        workers: usize,
        stop_on_error: bool,
        global_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            workers: workers.clamp(1, 10),
            stop_on_error,
            global_timeout,
            cancel,
        }
    }

    /// Drain the queue, running `work` for each entry with bounded
    /// fan-out.
    ///
    /// Every finished project is reported through `completions` as it
    /// completes, so the controller can checkpoint the todo file
    /// incrementally. The per-worker global timeout bounds each task's
    /// lifetime.
    pub async fn drain<F, Fut>(
        &self,
        queue: Vec<(String, u64)>,
        completions: Option<mpsc::UnboundedSender<Completion>>,
        work: F,
    ) -> DrainReport
    where
        F: Fn(String, u64) -> Fut,
        Fut: Future<Output = Result<SyncOutcome>>,
    {
        info!("{} package(s) to sync", queue.len());
        let work = &work;
        let cancel = &self.cancel;
        let global_timeout = self.global_timeout;

        let mut results = stream::iter(queue)
            .map(|(name, serial)| async move {
                if cancel.is_cancelled() {
                    return (name, Err(Error::Cancelled));
                }
                let task = work(name.clone(), serial);
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    outcome = tokio::time::timeout(global_timeout, task) => match outcome {
                        Ok(result) => result,
                        Err(_) => Err(Error::DownloadError(format!(
                            "worker for {name} exceeded the global timeout"
                        ))),
                    },
                };
                (name, result)
            })
            .buffer_unordered(self.workers);

        let mut report = DrainReport::default();
        while let Some((name, result)) = results.next().await {
            let success = result.is_ok();
            if let Some(tx) = &completions {
                let _ = tx.send(Completion {
                    name: name.clone(),
                    success,
                });
            }
            match result {
                Ok(outcome) => report.outcomes.push((name, outcome)),
                Err(Error::Cancelled) => {
                    report.cancelled = true;
                }
                Err(e) => {
                    error!("Error syncing package {}: {}", name, e);
                    report.errors.push((name, e));
                    if self.stop_on_error && !self.cancel.is_cancelled() {
                        warn!("Stopping early after error (stop-on-error)");
                        self.cancel.cancel();
                        report.cancelled = true;
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pool(workers: usize, stop_on_error: bool) -> WorkerPool {
        WorkerPool::new(
            workers,
            stop_on_error,
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }

    fn queue(names: &[&str]) -> Vec<(String, u64)> {
        names.iter().map(|n| (n.to_string(), 1)).collect()
    }

    #[tokio::test]
    async fn test_drain_success() {
        let report = pool(3, false)
            .drain(queue(&["a", "b", "c"]), None, |_, _| async {
                Ok(SyncOutcome::default())
            })
            .await;
        assert!(report.is_success());
        assert_eq!(report.outcomes.len(), 3);
    }

    #[tokio::test]
    async fn test_errors_are_collected_without_stop_on_error() {
        let report = pool(2, false)
            .drain(queue(&["ok", "bad", "ok2"]), None, |name, _| async move {
                if name == "bad" {
                    Err(Error::DownloadError("boom".into()))
                } else {
                    Ok(SyncOutcome::default())
                }
            })
            .await;
        assert!(!report.is_success());
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "bad");
        assert!(!report.cancelled || report.errors.len() == 1);
    }

    #[tokio::test]
    async fn test_stop_on_error_cancels_queued_work() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        // Single worker: strictly sequential, so the failure of the first
        // item must prevent dispatch of the rest.
        let report = pool(1, true)
            .drain(queue(&["bad", "q1", "q2", "q3"]), None, move |name, _| {
                let ran = ran_clone.clone();
                async move {
                    if name == "bad" {
                        Err(Error::DownloadError("boom".into()))
                    } else {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(SyncOutcome::default())
                    }
                }
            })
            .await;
        assert!(report.cancelled);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_completions_reported_in_order_of_finish() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = pool(2, false)
            .drain(queue(&["a", "b"]), Some(tx), |_, _| async {
                Ok(SyncOutcome::default())
            })
            .await;
        assert!(report.is_success());

        let mut seen = Vec::new();
        while let Ok(completion) = rx.try_recv() {
            assert!(completion.success);
            seen.push(completion.name);
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_global_timeout_fails_the_project() {
        let pool = WorkerPool::new(
            1,
            false,
            Duration::from_millis(20),
            CancellationToken::new(),
        );
        let report = pool
            .drain(queue(&["slow"]), None, |_, _| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(SyncOutcome::default())
            })
            .await;
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].1.to_string().contains("global timeout"));
    }
}
