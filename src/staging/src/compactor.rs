//! Folds pending entries into the canonical object.
//!
//! One run moves through: list pending keys, take the lease, load the
//! canonical set, merge every readable entry, confirm the lease is still ours,
//! save (the commit point), then discard the merged entries. Nothing is discarded unless the save succeeded,
//! so an aborted run leaves every submission staged for the next one.
//! Re-merging an entry that is already canonical changes nothing.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::ObjectStoreAdapter;
use crate::canonical::{CanonicalStore, Upsert};
use crate::error::{Error, Result};
use crate::layout::StagingLayout;
use crate::lease::{CompactionLease, DEFAULT_LEASE_TTL, LeaseGuard};
use crate::metrics::CompactionMetrics;
use crate::pending::PendingArea;

/// Outcome of one compaction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Pending keys listed at the start of the run
    pub pending_found: usize,
    /// Entries read and folded into the canonical set
    pub merged: usize,
    pub inserted: usize,
    pub replaced: usize,
    /// Unreadable entries, left staged
    pub skipped: Vec<String>,
    pub discarded: usize,
    pub discard_failures: usize,
    /// Canonical set size after the merge
    pub total: usize,
}

impl CompactionReport {
    /// `(processed, total)`: merged entries and canonical size.
    pub fn counts(&self) -> (usize, usize) {
        (self.merged, self.total)
    }

    pub fn is_idle(&self) -> bool {
        self.pending_found == 0
    }
}

#[derive(Debug, Clone)]
pub struct Compactor {
    canonical: CanonicalStore,
    pending: PendingArea,
    lease: Option<CompactionLease>,
    holder: String,
    metrics: CompactionMetrics,
}

impl Compactor {
    /// A compactor guarded by a lease with the default TTL.
    pub fn new(backend: Arc<dyn ObjectStoreAdapter>, layout: StagingLayout) -> Self {
        let lease = CompactionLease::new(backend.clone(), layout.lease_key(), DEFAULT_LEASE_TTL);

        Self {
            canonical: CanonicalStore::new(backend.clone(), layout.canonical_key()),
            pending: PendingArea::new(backend, layout),
            lease: Some(lease),
            holder: format!("compactor-{}", Uuid::new_v4()),
            metrics: CompactionMetrics::new(),
        }
    }

    /// Change the lease TTL. Has no effect after [`Compactor::without_lease`].
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        if self.lease.is_some() {
            self.lease = Some(CompactionLease::new(
                self.pending.backend().clone(),
                self.pending.layout().lease_key(),
                ttl,
            ));
        }
        self
    }

    /// Run without the lease. Callers must then guarantee a single compactor.
    pub fn without_lease(mut self) -> Self {
        self.lease = None;
        self
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn with_metrics(mut self, metrics: CompactionMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn canonical(&self) -> &CanonicalStore {
        &self.canonical
    }

    pub fn pending(&self) -> &PendingArea {
        &self.pending
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn metrics(&self) -> &CompactionMetrics {
        &self.metrics
    }

    /// Merge everything staged into the canonical object.
    ///
    /// Returns an idle report without touching the canonical object when
    /// nothing is staged. Store failures on list, load or save abort the run
    /// before any entry is discarded. Unreadable entries are skipped and left
    /// in place. Failed discards are logged and counted only.
    pub async fn compact(&self) -> Result<CompactionReport> {
        self.metrics.record_run_start();
        let started = Instant::now();

        match self.run().await {
            Ok(report) => {
                if report.is_idle() {
                    self.metrics.record_idle();
                } else {
                    self.metrics.record_commit(&report, started.elapsed());
                }
                Ok(report)
            }
            Err(e) => {
                if matches!(e, Error::LeaseHeld { .. }) {
                    self.metrics.record_lease_contended();
                } else {
                    self.metrics.record_failure();
                }
                Err(e)
            }
        }
    }

    async fn run(&self) -> Result<CompactionReport> {
        let keys = self.pending.list().await?;
        if keys.is_empty() {
            debug!("No pending articles to compact");
            return Ok(CompactionReport::default());
        }

        info!(pending = keys.len(), "Found pending articles");

        let Some(lease) = &self.lease else {
            return self.merge(keys, None).await;
        };

        let guard = lease.acquire(&self.holder).await?;

        // Another holder may have drained the area before we got the lease
        let result: Result<CompactionReport> = async {
            let keys = self.pending.list().await?;
            if keys.is_empty() {
                debug!("Pending articles were compacted by another holder");
                return Ok(CompactionReport::default());
            }
            self.merge(keys, Some(&guard)).await
        }
        .await;

        if let Err(e) = guard.release().await {
            error!(holder = %self.holder, "Failed to release compaction lease: {e}");
        }

        result
    }

    async fn merge(
        &self,
        keys: Vec<String>,
        guard: Option<&LeaseGuard>,
    ) -> Result<CompactionReport> {
        let mut set = self.canonical.load().await?;
        let mut report = CompactionReport {
            pending_found: keys.len(),
            ..Default::default()
        };
        let mut merged_keys = Vec::with_capacity(keys.len());

        for key in keys {
            match self.pending.fetch(&key).await {
                Ok(Some(article)) => {
                    match set.upsert(article) {
                        Upsert::Inserted => report.inserted += 1,
                        Upsert::Replaced => report.replaced += 1,
                    }
                    merged_keys.push(key);
                }
                Ok(None) => {
                    debug!(key = %key, "Pending entry disappeared before it was read");
                }
                Err(e) => {
                    warn!(key = %key, "Skipping pending entry: {e}");
                    report.skipped.push(key);
                }
            }
        }

        report.merged = merged_keys.len();
        report.total = set.len();

        if merged_keys.is_empty() {
            warn!(
                skipped = report.skipped.len(),
                "No pending entry could be merged, canonical object left untouched"
            );
            return Ok(report);
        }

        // A holder that overran its lease must not overwrite a newer merge
        if let Some(guard) = guard {
            guard.verify().await?;
        }

        self.canonical.save(&set).await?;
        info!(
            merged = report.merged,
            inserted = report.inserted,
            replaced = report.replaced,
            total = report.total,
            "Committed canonical set"
        );

        for key in &merged_keys {
            match self.pending.discard(key).await {
                Ok(()) => report.discarded += 1,
                Err(e) => {
                    error!(key = %key, "Failed to discard merged pending entry: {e}");
                    report.discard_failures += 1;
                }
            }
        }

        info!(
            "Processed {} pending articles, total articles: {}",
            report.merged, report.total
        );

        Ok(report)
    }
}
