//! Shared fakes for the integration suites.

// Each suite uses a different subset of this harness.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trellis_client::{
    BatchFault, BatchOutcome, BatchSettings, Record, RecordClient, RecordOperation,
};
use trellis_dml::{
    AttributeMetadata, AttributeType, DataSource, DataSourceMap, DmlError, ExecutionOptions,
    FullScanInfo, MetadataProvider, NodeOrigin, RowSchema, RowSource, TypeMetadata,
};

/// Shared state observed by a client and all of its clones.
#[derive(Default)]
pub struct ClientState {
    pub ops: Mutex<Vec<RecordOperation>>,
    pub singles: AtomicUsize,
    pub batches: AtomicUsize,
    active: AtomicUsize,
    pub high_water: AtomicUsize,
    pub affinity_disabled: AtomicUsize,
    /// Fault injected into the n-th batch (zero-based) at the given
    /// sub-operation index.
    pub fault: Mutex<Option<(usize, usize)>>,
    /// Flag raised after the configured number of single submissions.
    pub cancel_after: Mutex<Option<(usize, Arc<AtomicBool>)>>,
    /// Per-call delay, to force worker overlap.
    pub delay: Mutex<Option<Duration>>,
}

impl ClientState {
    fn enter(&self) {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(running, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Configurable in-memory store client.
pub struct FakeClient {
    pub state: Arc<ClientState>,
    pub cloneable: bool,
}

impl FakeClient {
    pub fn new(cloneable: bool) -> Self {
        init_tracing();
        Self {
            state: Arc::new(ClientState::default()),
            cloneable,
        }
    }
}

static TRACING: std::sync::Once = std::sync::Once::new();

/// Honors `RUST_LOG` when inspecting a failing run.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

impl RecordClient for FakeClient {
    fn execute(&self, op: RecordOperation) -> anyhow::Result<()> {
        self.state.enter();
        self.state.ops.lock().unwrap().push(op);
        let submitted = self.state.singles.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, flag)) = self.state.cancel_after.lock().unwrap().as_ref() {
            if submitted == *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        self.state.exit();
        Ok(())
    }

    fn execute_batch(
        &self,
        ops: Vec<RecordOperation>,
        _settings: BatchSettings,
    ) -> anyhow::Result<BatchOutcome> {
        self.state.enter();
        let batch_no = self.state.batches.fetch_add(1, Ordering::SeqCst);
        let fault = *self.state.fault.lock().unwrap();
        let outcome = match fault {
            Some((faulted_batch, index)) if faulted_batch == batch_no => {
                self.state
                    .ops
                    .lock()
                    .unwrap()
                    .extend(ops.into_iter().take(index));
                BatchOutcome {
                    faulted: Some(BatchFault {
                        index,
                        message: "injected batch fault".to_string(),
                    }),
                }
            }
            _ => {
                self.state.ops.lock().unwrap().extend(ops);
                BatchOutcome::success()
            }
        };
        self.state.exit();
        Ok(outcome)
    }

    fn try_clone(&self) -> Option<Box<dyn RecordClient>> {
        if self.cloneable {
            Some(Box::new(FakeClient {
                state: Arc::clone(&self.state),
                cloneable: self.cloneable,
            }))
        } else {
            None
        }
    }

    fn set_affinity(&self, enabled: bool) {
        if !enabled {
            self.state.affinity_disabled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn reset_caller(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct StaticMetadata {
    types: HashMap<String, Arc<TypeMetadata>>,
}

impl MetadataProvider for StaticMetadata {
    fn type_metadata(
        &self,
        logical_name: &str,
        origin: &NodeOrigin,
    ) -> Result<Arc<TypeMetadata>, DmlError> {
        self.types
            .get(logical_name)
            .cloned()
            .ok_or_else(|| DmlError::UnknownType {
                logical_name: logical_name.to_string(),
                origin: origin.to_string(),
            })
    }
}

/// Source producing a fixed row set, optionally advertising a full scan.
pub struct StaticSource {
    schema: RowSchema,
    rows: Vec<Record>,
    scan: Option<FullScanInfo>,
}

impl StaticSource {
    pub fn new(schema: RowSchema, rows: Vec<Record>) -> Self {
        Self {
            schema,
            rows,
            scan: None,
        }
    }

    pub fn with_scan(mut self, scan: FullScanInfo) -> Self {
        self.scan = Some(scan);
        self
    }
}

impl RowSource for StaticSource {
    fn schema(&self) -> Result<RowSchema, DmlError> {
        Ok(self.schema.clone())
    }

    fn execute(
        &mut self,
        _data_sources: &DataSourceMap,
        _options: &ExecutionOptions,
    ) -> Result<Vec<Record>, DmlError> {
        Ok(self.rows.clone())
    }

    fn add_required_columns(&mut self, _columns: &[String]) {}

    fn fold(
        self: Box<Self>,
        _data_sources: &DataSourceMap,
        _options: &ExecutionOptions,
    ) -> Result<Box<dyn RowSource>, DmlError> {
        Ok(self)
    }

    fn full_scan(&self) -> Option<FullScanInfo> {
        self.scan.clone()
    }
}

pub fn account_meta() -> TypeMetadata {
    TypeMetadata {
        logical_name: "account".to_string(),
        display_name: "account".to_string(),
        display_collection_name: "accounts".to_string(),
        primary_id_attribute: "accountid".to_string(),
        is_relationship: false,
        relationships: Vec::new(),
        attributes: vec![
            AttributeMetadata::new("accountid", AttributeType::Uuid),
            AttributeMetadata::new("name", AttributeType::String),
            AttributeMetadata::new(
                "ownerid",
                AttributeType::Reference {
                    targets: vec!["systemuser".to_string(), "team".to_string()],
                },
            ),
            AttributeMetadata::new("lastcontacted", AttributeType::Timestamp),
        ],
    }
}

/// One data source named "store" backed by the given client.
pub fn store(client: &FakeClient, types: Vec<TypeMetadata>) -> DataSourceMap {
    let provider = StaticMetadata {
        types: types
            .into_iter()
            .map(|meta| (meta.logical_name.clone(), Arc::new(meta)))
            .collect(),
    };
    let mut map = DataSourceMap::new();
    map.insert(
        "store".to_string(),
        DataSource {
            name: "store".to_string(),
            client: Arc::new(FakeClient {
                state: Arc::clone(&client.state),
                cloneable: client.cloneable,
            }),
            metadata: Arc::new(provider),
            row_count_hint: None,
        },
    );
    map
}
