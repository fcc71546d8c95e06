//! Compaction metrics tracking
//!
//! Thread-safe counters accumulated across compaction runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

use crate::compactor::CompactionReport;

#[derive(Debug, Clone)]
pub struct CompactionMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    runs_started: AtomicUsize,
    runs_committed: AtomicUsize,
    idle_runs: AtomicUsize,
    runs_failed: AtomicUsize,
    lease_contended: AtomicUsize,
    entries_merged: AtomicUsize,
    entries_skipped: AtomicUsize,
    discard_failures: AtomicUsize,
    canonical_size: AtomicUsize,
    total_duration_ms: AtomicU64,
}

impl Default for CompactionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CompactionMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                runs_started: AtomicUsize::new(0),
                runs_committed: AtomicUsize::new(0),
                idle_runs: AtomicUsize::new(0),
                runs_failed: AtomicUsize::new(0),
                lease_contended: AtomicUsize::new(0),
                entries_merged: AtomicUsize::new(0),
                entries_skipped: AtomicUsize::new(0),
                discard_failures: AtomicUsize::new(0),
                canonical_size: AtomicUsize::new(0),
                total_duration_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_run_start(&self) {
        self.inner.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// A run that found nothing staged.
    pub fn record_idle(&self) {
        self.inner.idle_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// A run that committed a new canonical object.
    pub fn record_commit(&self, report: &CompactionReport, duration: Duration) {
        self.inner.runs_committed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .entries_merged
            .fetch_add(report.merged, Ordering::Relaxed);
        self.inner
            .entries_skipped
            .fetch_add(report.skipped.len(), Ordering::Relaxed);
        self.inner
            .discard_failures
            .fetch_add(report.discard_failures, Ordering::Relaxed);
        self.inner
            .canonical_size
            .store(report.total, Ordering::Relaxed);
        self.inner
            .total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.inner.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Another holder had the compaction lease.
    pub fn record_lease_contended(&self) {
        self.inner.lease_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn runs_started(&self) -> usize {
        self.inner.runs_started.load(Ordering::Relaxed)
    }

    pub fn runs_committed(&self) -> usize {
        self.inner.runs_committed.load(Ordering::Relaxed)
    }

    pub fn idle_runs(&self) -> usize {
        self.inner.idle_runs.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> usize {
        self.inner.runs_failed.load(Ordering::Relaxed)
    }

    pub fn lease_contended(&self) -> usize {
        self.inner.lease_contended.load(Ordering::Relaxed)
    }

    pub fn entries_merged(&self) -> usize {
        self.inner.entries_merged.load(Ordering::Relaxed)
    }

    pub fn entries_skipped(&self) -> usize {
        self.inner.entries_skipped.load(Ordering::Relaxed)
    }

    pub fn discard_failures(&self) -> usize {
        self.inner.discard_failures.load(Ordering::Relaxed)
    }

    /// Canonical set size after the most recent commit.
    pub fn canonical_size(&self) -> usize {
        self.inner.canonical_size.load(Ordering::Relaxed)
    }

    /// Average duration of committed runs
    pub fn avg_duration_ms(&self) -> f64 {
        let total_ms = self.inner.total_duration_ms.load(Ordering::Relaxed) as f64;
        let runs = self.runs_committed() as f64;

        if runs > 0.0 { total_ms / runs } else { 0.0 }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            runs_started: self.runs_started(),
            runs_committed: self.runs_committed(),
            idle_runs: self.idle_runs(),
            runs_failed: self.runs_failed(),
            lease_contended: self.lease_contended(),
            entries_merged: self.entries_merged(),
            entries_skipped: self.entries_skipped(),
            discard_failures: self.discard_failures(),
            canonical_size: self.canonical_size(),
            avg_duration_ms: self.avg_duration_ms(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    pub runs_started: usize,
    pub runs_committed: usize,
    pub idle_runs: usize,
    pub runs_failed: usize,
    pub lease_contended: usize,
    pub entries_merged: usize,
    pub entries_skipped: usize,
    pub discard_failures: usize,
    pub canonical_size: usize,
    pub avg_duration_ms: f64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!("=== Compaction Metrics Summary ===");
        info!(
            "Runs: {} started, {} committed, {} idle, {} failed, {} lease contended",
            self.runs_started,
            self.runs_committed,
            self.idle_runs,
            self.runs_failed,
            self.lease_contended
        );
        info!(
            "Entries: {} merged, {} skipped, {} discard failures",
            self.entries_merged, self.entries_skipped, self.discard_failures
        );
        info!("Canonical set size: {}", self.canonical_size);
        info!("Average run duration: {:.2}ms", self.avg_duration_ms);
    }
}
