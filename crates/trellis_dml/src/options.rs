//! Execution options and runtime configuration for DML statements.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::metadata::TypeMetadata;
use crate::metrics::DmlMetrics;

/// Default worker count for parallel fan-out.
const DEFAULT_MAX_PARALLELISM: usize = 10;
/// Default records per composite batch request; 1 means per-record requests.
const DEFAULT_BATCH_SIZE: usize = 1;
/// Record count below which connection affinity stays enabled.
const DEFAULT_AFFINITY_ROW_THRESHOLD: usize = 100;

/// How naive source timestamps are reinterpreted for the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimezoneMode {
    /// Treat naive timestamps as UTC wall-clock.
    Utc,
    /// Treat naive timestamps as local wall-clock and convert to UTC.
    Local,
}

/// Tunable limits for the mutation engine, with env-var overrides.
#[derive(Debug, Clone, Copy)]
pub struct DmlRuntimeConfig {
    pub max_parallelism: usize,
    pub batch_size: usize,
    pub affinity_row_threshold: usize,
}

impl Default for DmlRuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallelism: configured_max_parallelism(),
            batch_size: configured_batch_size(),
            affinity_row_threshold: configured_affinity_row_threshold(),
        }
    }
}

fn configured_max_parallelism() -> usize {
    std::env::var("TRELLIS_DML_MAX_PARALLELISM")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MAX_PARALLELISM)
}

fn configured_batch_size() -> usize {
    std::env::var("TRELLIS_DML_BATCH_SIZE")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_BATCH_SIZE)
}

fn configured_affinity_row_threshold() -> usize {
    std::env::var("TRELLIS_DML_AFFINITY_ROW_THRESHOLD")
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(DEFAULT_AFFINITY_ROW_THRESHOLD)
}

/// Caller-supplied veto gate checked before any remote call is issued.
pub type ConfirmFn = dyn Fn(usize, &TypeMetadata) -> bool + Send + Sync;
/// Best-effort progress callback: completed fraction plus a message.
pub type ProgressFn = dyn Fn(f64, &str) + Send + Sync;

/// Per-statement execution surface consumed by every mutation node.
pub struct ExecutionOptions {
    pub max_parallelism: usize,
    pub batch_size: usize,
    pub affinity_row_threshold: usize,
    /// Gate for the bulk-delete fold rewrite; off by default.
    pub use_bulk_delete: bool,
    /// Skip server-side custom logic on every submitted operation.
    pub bypass_side_effects: bool,
    pub timezone_mode: TimezoneMode,
    pub metrics: Arc<DmlMetrics>,
    cancelled: Arc<AtomicBool>,
    confirm_insert: Option<Box<ConfirmFn>>,
    confirm_update: Option<Box<ConfirmFn>>,
    confirm_delete: Option<Box<ConfirmFn>>,
    progress: Option<Box<ProgressFn>>,
}

impl ExecutionOptions {
    pub fn from_config(config: DmlRuntimeConfig) -> Self {
        Self {
            max_parallelism: config.max_parallelism,
            batch_size: config.batch_size,
            affinity_row_threshold: config.affinity_row_threshold,
            use_bulk_delete: false,
            bypass_side_effects: false,
            timezone_mode: TimezoneMode::Local,
            metrics: Arc::new(DmlMetrics::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            confirm_insert: None,
            confirm_update: None,
            confirm_delete: None,
            progress: None,
        }
    }

    pub fn with_confirm_insert(
        mut self,
        confirm: impl Fn(usize, &TypeMetadata) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm_insert = Some(Box::new(confirm));
        self
    }

    pub fn with_confirm_update(
        mut self,
        confirm: impl Fn(usize, &TypeMetadata) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm_update = Some(Box::new(confirm));
        self
    }

    pub fn with_confirm_delete(
        mut self,
        confirm: impl Fn(usize, &TypeMetadata) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.confirm_delete = Some(Box::new(confirm));
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(f64, &str) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Shared cancel flag, polled cooperatively at the start of each unit of
    /// work. Setting it from another thread requests a clean stop; calls
    /// already issued are never rolled back.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn confirm_insert(&self, count: usize, meta: &TypeMetadata) -> bool {
        self.confirm_insert.as_ref().map_or(true, |f| f(count, meta))
    }

    pub fn confirm_update(&self, count: usize, meta: &TypeMetadata) -> bool {
        self.confirm_update.as_ref().map_or(true, |f| f(count, meta))
    }

    pub fn confirm_delete(&self, count: usize, meta: &TypeMetadata) -> bool {
        self.confirm_delete.as_ref().map_or(true, |f| f(count, meta))
    }

    pub(crate) fn report_progress(&self, fraction: f64, message: &str) {
        if let Some(progress) = &self.progress {
            progress(fraction, message);
            self.metrics.record_progress_report();
        }
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::from_config(DmlRuntimeConfig::default())
    }
}
