//! Batched, parallel fan-out of record operations.
//!
//! The executor walks a pre-materialized record slice with a pool of blocking
//! workers. Workers claim records through a shared atomic cursor, accumulate
//! them into per-worker batches, and flush each batch as one composite
//! request. Completion counting survives faults: a faulted batch still counts
//! the sub-operations that finished before the fault.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use tracing::{debug, warn};
use trellis_client::{BatchSettings, Record, RecordClient, RecordOperation};

use crate::error::DmlError;
use crate::metadata::TypeMetadata;
use crate::options::ExecutionOptions;

/// Message vocabulary for one statement kind.
pub struct OperationNames {
    /// Statement keyword, used in cancellation errors ("DELETE").
    pub statement: &'static str,
    /// Capitalized progress verb ("Deleting").
    pub in_progress: &'static str,
    /// Past-tense completion verb ("deleted").
    pub completed: &'static str,
}

pub const INSERT_NAMES: OperationNames = OperationNames {
    statement: "INSERT",
    in_progress: "Inserting",
    completed: "inserted",
};

pub const UPDATE_NAMES: OperationNames = OperationNames {
    statement: "UPDATE",
    in_progress: "Updating",
    completed: "updated",
};

pub const DELETE_NAMES: OperationNames = OperationNames {
    statement: "DELETE",
    in_progress: "Deleting",
    completed: "deleted",
};

/// Per-request converter from a source record to the operation submitted for
/// it. Runs on worker threads.
pub type BuildRequest<'a> = &'a (dyn Fn(&Record) -> Result<RecordOperation, DmlError> + Sync);

struct RunState<'a> {
    records: &'a [Record],
    cursor: AtomicUsize,
    /// Records claimed by a worker but not yet confirmed by the store.
    in_flight: AtomicU64,
    completed: AtomicU64,
    failed: AtomicBool,
    first_error: Mutex<Option<DmlError>>,
    options: &'a ExecutionOptions,
    build_request: BuildRequest<'a>,
    names: &'a OperationNames,
    collection: &'a str,
}

impl RunState<'_> {
    fn record_failure(&self, error: DmlError) {
        self.failed.store(true, Ordering::SeqCst);
        let mut guard = match self.first_error.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_none() {
            *guard = Some(error);
        }
    }

    fn stop_requested(&self) -> bool {
        self.failed.load(Ordering::SeqCst) || self.options.cancelled()
    }
}

/// Runs `build_request` over every record and submits the results through
/// `client`, fanning out across cloned handles up to the configured
/// parallelism. Returns the completion summary ("250 accounts deleted").
///
/// A cancel flag observed before the first claim fails the run with
/// `Cancelled`; observed mid-run it stops the workers, drops their unsent
/// batches and reports the records already confirmed as a normal completion.
pub fn execute_mutation(
    client: &dyn RecordClient,
    options: &ExecutionOptions,
    records: &[Record],
    meta: &TypeMetadata,
    build_request: BuildRequest<'_>,
    names: &OperationNames,
) -> Result<String, DmlError> {
    if options.cancelled() {
        options.metrics.record_cancellation();
        return Err(DmlError::Cancelled {
            operation: names.statement,
        });
    }

    let total = records.len();
    if total == 0 {
        return Ok(summary(0, meta, names));
    }

    let requested = options.max_parallelism.min(total).max(1);
    let mut clones = Vec::new();
    if requested > 1 {
        for _ in 1..requested {
            match client.try_clone() {
                Some(clone) => clones.push(clone),
                // Handle cannot be cloned; run everything on the primary.
                None => {
                    clones.clear();
                    break;
                }
            }
        }
    }
    let workers = clones.len() + 1;

    if workers > 1 && total >= options.affinity_row_threshold {
        for clone in &clones {
            clone.set_affinity(false);
        }
    }

    debug!(
        total,
        workers,
        batch_size = options.batch_size,
        collection = meta.display_collection_name.as_str(),
        "starting mutation fan-out"
    );

    let state = RunState {
        records,
        cursor: AtomicUsize::new(0),
        in_flight: AtomicU64::new(0),
        completed: AtomicU64::new(0),
        failed: AtomicBool::new(false),
        first_error: Mutex::new(None),
        options,
        build_request,
        names,
        collection: meta.display_name_for_count(total as u64),
    };

    let _tuning = client.tune_for_parallel_run();

    thread::scope(|scope| {
        for clone in &clones {
            let state = &state;
            scope.spawn(move || run_worker(state, clone.as_ref()));
        }
        run_worker(&state, client);
    });

    let completed = state.completed.load(Ordering::SeqCst);
    options.metrics.record_records_completed(completed);

    if state.failed.load(Ordering::SeqCst) {
        let cause = match state.first_error.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
        .unwrap_or_else(|| DmlError::remote(anyhow::anyhow!("mutation worker failed")));

        if completed == 0 {
            return Err(cause);
        }

        options.metrics.record_partial_failure();
        let message = summary(completed, meta, names);
        warn!(completed, %message, "mutation ended in partial success");
        return Err(DmlError::PartialSuccess {
            completed,
            message,
            source: anyhow::Error::new(cause),
        });
    }

    if options.cancelled() {
        options.metrics.record_cancellation();
        debug!(completed, "mutation stopped by cancellation");
    }

    Ok(summary(completed, meta, names))
}

fn summary(completed: u64, meta: &TypeMetadata, names: &OperationNames) -> String {
    format!(
        "{} {} {}",
        completed,
        meta.display_name_for_count(completed),
        names.completed
    )
}

fn run_worker(state: &RunState<'_>, client: &dyn RecordClient) {
    let total = state.records.len();
    let batch_size = state.options.batch_size;
    let mut batch: Vec<RecordOperation> = Vec::with_capacity(batch_size);
    // One-based position of the first record in the current batch.
    let mut batch_first = 0usize;

    loop {
        if state.stop_requested() {
            // Unsent work is dropped, never submitted after a stop request.
            abandon_batch(state, &mut batch);
            return;
        }

        let index = state.cursor.fetch_add(1, Ordering::SeqCst);
        if index >= total {
            break;
        }

        let position = index + 1;
        if batch_size <= 1 {
            let percent = (index as f64 / total as f64 * 100.0).floor();
            state.options.report_progress(
                index as f64 / total as f64,
                &format!(
                    "{} {} of {} {} ({}%)...",
                    state.names.in_progress, position, total, state.collection, percent
                ),
            );
        }

        let op = match (state.build_request)(&state.records[index]) {
            Ok(op) => op,
            Err(error) => {
                state.record_failure(error);
                abandon_batch(state, &mut batch);
                return;
            }
        };
        state.in_flight.fetch_add(1, Ordering::SeqCst);

        if batch_size <= 1 {
            if let Err(error) = submit_single(state, client, op) {
                state.record_failure(error);
                return;
            }
            continue;
        }

        if batch.is_empty() {
            batch_first = position;
        }
        batch.push(op);
        if batch.len() >= batch_size {
            let last = position;
            if let Err(error) = flush_batch(state, client, &mut batch, batch_first, last) {
                state.record_failure(error);
                return;
            }
        }
    }

    if !batch.is_empty() {
        let last = batch_first + batch.len() - 1;
        if let Err(error) = flush_batch(state, client, &mut batch, batch_first, last) {
            state.record_failure(error);
        }
    }
}

fn abandon_batch(state: &RunState<'_>, batch: &mut Vec<RecordOperation>) {
    state
        .in_flight
        .fetch_sub(batch.len() as u64, Ordering::SeqCst);
    batch.clear();
}

fn submit_single(
    state: &RunState<'_>,
    client: &dyn RecordClient,
    op: RecordOperation,
) -> Result<(), DmlError> {
    state.options.metrics.record_op_submitted();
    let result = client.execute(op);
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    match result {
        Ok(()) => {
            state.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        Err(source) => Err(DmlError::remote(source)),
    }
}

fn flush_batch(
    state: &RunState<'_>,
    client: &dyn RecordClient,
    batch: &mut Vec<RecordOperation>,
    first: usize,
    last: usize,
) -> Result<(), DmlError> {
    if state.stop_requested() {
        abandon_batch(state, batch);
        return Ok(());
    }

    let total = state.records.len();
    state.options.report_progress(
        (first - 1) as f64 / total as f64,
        &format!(
            "{} {} {} - {} of {}...",
            state.names.in_progress, state.collection, first, last, total
        ),
    );

    let ops: Vec<RecordOperation> = batch.drain(..).collect();
    let count = ops.len() as u64;
    state.options.metrics.record_batch_submitted();
    let outcome = client.execute_batch(
        ops,
        BatchSettings {
            continue_on_error: false,
            return_responses: false,
        },
    );
    state.in_flight.fetch_sub(count, Ordering::SeqCst);

    match outcome {
        Ok(outcome) => match outcome.faulted {
            None => {
                state.completed.fetch_add(count, Ordering::SeqCst);
                Ok(())
            }
            Some(fault) => {
                // Sub-operations strictly before the faulted index finished.
                state
                    .completed
                    .fetch_add(fault.index as u64, Ordering::SeqCst);
                Err(DmlError::remote(anyhow::anyhow!(fault.message)))
            }
        },
        Err(source) => Err(DmlError::remote(source)),
    }
}
