//! In-process counters for DML execution behavior.
//!
//! These metrics are intentionally lightweight and lock-free so workers can
//! update them on hot submission paths without noticeable overhead.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated counters for mutation execution.
#[derive(Debug, Default)]
pub struct DmlMetrics {
    /// Number of single operations submitted.
    ops_submitted: AtomicU64,
    /// Number of composite batch requests submitted.
    batches_submitted: AtomicU64,
    /// Number of records confirmed completed.
    records_completed: AtomicU64,
    /// Number of runs that ended in partial success.
    partial_failures: AtomicU64,
    /// Number of runs stopped by cooperative cancellation.
    cancellations: AtomicU64,
    /// Number of delete nodes folded into bulk-delete jobs.
    bulk_job_rewrites: AtomicU64,
    /// Number of progress callbacks delivered.
    progress_reports: AtomicU64,
}

impl DmlMetrics {
    pub fn record_op_submitted(&self) {
        self.ops_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_submitted(&self) {
        self.batches_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_records_completed(&self, count: u64) {
        self.records_completed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_partial_failure(&self) {
        self.partial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bulk_job_rewrite(&self) {
        self.bulk_job_rewrites.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_progress_report(&self) {
        self.progress_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DmlMetricsSnapshot {
        DmlMetricsSnapshot {
            ops_submitted: self.ops_submitted.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            records_completed: self.records_completed.load(Ordering::Relaxed),
            partial_failures: self.partial_failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            bulk_job_rewrites: self.bulk_job_rewrites.load(Ordering::Relaxed),
            progress_reports: self.progress_reports.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot view of [`DmlMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmlMetricsSnapshot {
    pub ops_submitted: u64,
    pub batches_submitted: u64,
    pub records_completed: u64,
    pub partial_failures: u64,
    pub cancellations: u64,
    pub bulk_job_rewrites: u64,
    pub progress_reports: u64,
}
