//! Client surface for the remote multi-tenant record store.
//!
//! This crate owns the record/value model, the operation vocabulary that the
//! DML engine submits, and the `RecordClient` trait implemented by concrete
//! backends. All calls are blocking from the caller's point of view;
//! parallelism is achieved by running independent workers over cloned
//! handles, never by cooperative yielding inside one call.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

/// Typed reference to one record in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordRef {
    /// Logical name of the referenced type.
    pub target: String,
    /// Primary identifier of the referenced record.
    pub id: Uuid,
}

impl RecordRef {
    pub fn new(target: impl Into<String>, id: Uuid) -> Self {
        Self {
            target: target.into(),
            id,
        }
    }
}

/// One attribute value.
///
/// Source rows carry naive `Timestamp` values as produced by the SQL layer;
/// after column-mapping compilation every value matches the destination's
/// semantic type (`TimestampTz` for absolute instants, `Reference`, `Choice`,
/// `Money` wrappers, and so on).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Uuid(Uuid),
    /// Naive wall-clock timestamp, timezone not yet decided.
    Timestamp(NaiveDateTime),
    /// Absolute instant.
    TimestampTz(DateTime<Utc>),
    /// Typed reference to a record of `target` type.
    Reference(RecordRef),
    /// Choice-list code wrapper.
    Choice(i32),
    /// Currency amount wrapper.
    Money(f64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short kind tag used in conversion error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Uuid(_) => "uuid",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Reference(_) => "reference",
            Value::Choice(_) => "choice",
            Value::Money(_) => "money",
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(id) => Some(*id),
            Value::Reference(reference) => Some(reference.id),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&RecordRef> {
        match self {
            Value::Reference(reference) => Some(reference),
            _ => None,
        }
    }
}

/// One unit of mutation: a named-attribute value bag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    attributes: BTreeMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }
}

/// The request vocabulary the DML engine submits to the store.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationKind {
    /// Create one record of `target` type.
    Create {
        target: String,
        attributes: BTreeMap<String, Value>,
    },
    /// Update the attributes of one existing record.
    Update {
        target: RecordRef,
        attributes: BTreeMap<String, Value>,
    },
    /// Delete one record.
    Delete { target: RecordRef },
    /// Create a many-to-many association between two records.
    Associate {
        target: RecordRef,
        related: RecordRef,
        relationship: String,
    },
    /// Remove a many-to-many association between two records.
    Disassociate {
        target: RecordRef,
        related: RecordRef,
        relationship: String,
    },
    /// Dedicated membership-removal call used by legacy list types.
    RemoveListMember { list_id: Uuid, member_id: Uuid },
    /// Start an asynchronous server-side delete-by-filter job. The filter is
    /// an opaque payload in the store's own query language.
    StartBulkDelete { target: String, filter: String },
}

/// One operation plus its per-request execution flags.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordOperation {
    pub kind: OperationKind,
    /// Skip server-side custom logic (plugins/workflows) for this request.
    pub bypass_side_effects: bool,
}

impl RecordOperation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            bypass_side_effects: false,
        }
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass_side_effects = bypass;
        self
    }
}

/// Settings for one composite batch request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchSettings {
    /// Continue executing sub-operations after the first fault.
    pub continue_on_error: bool,
    /// Return a per-operation response body for successful sub-operations.
    pub return_responses: bool,
}

/// First faulted sub-operation of a batch, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchFault {
    /// Zero-based submission position of the faulted sub-operation.
    pub index: usize,
    pub message: String,
}

/// Outcome of one composite batch request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub faulted: Option<BatchFault>,
}

impl BatchOutcome {
    pub fn success() -> Self {
        Self { faulted: None }
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.is_some()
    }
}

/// Scoped connection/process tuning for a parallel run.
///
/// Acquired before fan-out begins and restored when dropped, on every exit
/// path. Backends that widen connection limits or disable write coalescing
/// for high-parallelism runs put the restore logic in their `Drop` impl.
pub trait ParallelTuning: Send {}

/// No-op tuning guard for backends with nothing to adjust.
pub struct NoopTuning;

impl ParallelTuning for NoopTuning {}

/// Blocking client handle for the remote record store.
///
/// Each call blocks the calling worker until the store responds. A handle is
/// not required to be cloneable; `try_clone` returning `None` tells the
/// executor to collapse to a single worker reusing the primary handle.
pub trait RecordClient: Send + Sync {
    /// Submits one operation.
    fn execute(&self, op: RecordOperation) -> Result<()>;

    /// Submits a composite batch. Sub-operations run in submission order; the
    /// outcome reports the first fault when `continue_on_error` is off.
    fn execute_batch(&self, ops: Vec<RecordOperation>, settings: BatchSettings)
        -> Result<BatchOutcome>;

    /// Independent handle sharing authentication state, or `None` when this
    /// connection type cannot be cloned.
    fn try_clone(&self) -> Option<Box<dyn RecordClient>>;

    /// Connection-affinity toggle; disabled to spread parallel workers across
    /// backend nodes.
    fn set_affinity(&self, enabled: bool);

    /// Resets any caller impersonation on this connection. Idempotent.
    fn reset_caller(&self) -> Result<()>;

    /// Acquires scoped tuning for a parallel run; restored on drop.
    fn tune_for_parallel_run(&self) -> Box<dyn ParallelTuning> {
        Box::new(NoopTuning)
    }
}
