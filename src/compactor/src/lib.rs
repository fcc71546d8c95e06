//! Archivist compaction trigger
//!
//! Runs [`Compactor::compact`] on a fixed interval. Each tick is independent:
//! a failed or contended run is logged and the next tick tries again.

use anyhow::Result;
use staging::{CompactionReport, Compactor, Error};
use std::future::Future;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

/// What one triggered run amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Compacted(CompactionReport),
    /// Another process holds the compaction lease
    Contended { holder: String },
}

#[derive(Debug, Clone)]
pub struct CompactionService {
    compactor: Compactor,
    tick_interval: Duration,
}

impl CompactionService {
    pub fn new(compactor: Compactor, tick_interval: Duration) -> Self {
        Self {
            compactor,
            tick_interval,
        }
    }

    pub fn compactor(&self) -> &Compactor {
        &self.compactor
    }

    /// Run one compaction. A held lease is not an error here.
    pub async fn run_once(&self) -> Result<RunOutcome> {
        match self.compactor.compact().await {
            Ok(report) => {
                if report.is_idle() {
                    tracing::debug!("No pending articles in this cycle");
                } else {
                    tracing::info!(
                        merged = report.merged,
                        skipped = report.skipped.len(),
                        discard_failures = report.discard_failures,
                        total = report.total,
                        "Compaction cycle committed"
                    );
                }
                Ok(RunOutcome::Compacted(report))
            }
            Err(Error::LeaseHeld { holder, expires_at }) => {
                tracing::info!(%holder, %expires_at, "Compaction lease held elsewhere, skipping cycle");
                Ok(RunOutcome::Contended { holder })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Tick until `shutdown` resolves. The first run happens immediately.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            holder = self.compactor.holder(),
            "Compaction service running with tick interval: {:?}",
            self.tick_interval
        );

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(RunOutcome::Compacted(report)) if !report.is_idle() => {
                            self.compactor.metrics().summary().log();
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Compaction cycle failed: {e:#}"),
                    }
                }
            }
        }

        tracing::info!("Compaction service stopped");
        self.compactor.metrics().summary().log();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use staging::testing::FaultyBackend;
    use staging::{Article, CompactionLease, DEFAULT_LEASE_TTL, StagingLayout, StoreOperation};
    use std::sync::Arc;

    fn service(backend: Arc<FaultyBackend>) -> CompactionService {
        let compactor = Compactor::new(backend, StagingLayout::default());
        CompactionService::new(compactor, Duration::from_millis(10))
    }

    async fn stage(service: &CompactionService, url: &str) {
        let article = Article::new(url, "title", "excerpt", vec![]).unwrap();
        service.compactor().pending().stage(&article).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_once_compacts() {
        let service = service(Arc::new(FaultyBackend::in_memory()));
        stage(&service, "https://a").await;

        match service.run_once().await.unwrap() {
            RunOutcome::Compacted(report) => assert_eq!(report.counts(), (1, 1)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_once_reports_contention() {
        let backend = Arc::new(FaultyBackend::in_memory());
        let service = service(backend.clone());
        stage(&service, "https://a").await;

        let lease = CompactionLease::new(backend, "locks/compaction.lock", DEFAULT_LEASE_TTL);
        let _guard = lease.acquire("elsewhere").await.unwrap();

        let outcome = service.run_once().await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Contended {
                holder: "elsewhere".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_run_once_surfaces_store_failures() {
        let backend = Arc::new(FaultyBackend::in_memory());
        backend.fail(StoreOperation::List, "pending-articles");
        let service = service(backend);

        assert!(service.run_once().await.is_err());
    }

    #[tokio::test]
    async fn test_run_keeps_going_after_failures_and_stops_on_shutdown() {
        let backend = Arc::new(FaultyBackend::in_memory());
        let service = service(backend.clone());
        stage(&service, "https://a").await;
        backend.fail(StoreOperation::Put, "articles.json");

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let running = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .run(async {
                        let _ = rx.await;
                    })
                    .await
            })
        };

        // Let a few cycles fail, then let the store recover
        tokio::time::sleep(Duration::from_millis(50)).await;
        backend.clear();
        tokio::time::sleep(Duration::from_millis(100)).await;

        tx.send(()).unwrap();
        running.await.unwrap();

        let metrics = service.compactor().metrics();
        assert!(metrics.runs_failed() >= 1);
        assert_eq!(metrics.runs_committed(), 1);
        assert!(service.compactor().pending().list().await.unwrap().is_empty());
    }
}
