//! Error taxonomy for the mutation engine.
//!
//! Configuration and planning-invariant errors carry the origin text of the
//! node that raised them. `Cancelled` never wraps a cause and is not treated
//! as a failure by callers. A remote fault that happens after at least one
//! completed record is rewrapped as `PartialSuccess` carrying the aggregate
//! completed count; with zero completions the raw cause propagates unwrapped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DmlError {
    /// Unknown data-source name: a fatal configuration error.
    #[error("unknown data source '{name}' ({origin})")]
    UnknownDataSource { name: String, origin: String },

    /// No metadata for the destination logical type.
    #[error("unknown type '{logical_name}' ({origin})")]
    UnknownType { logical_name: String, origin: String },

    /// A required source column was missing at execute time. Always fatal:
    /// the upstream planner should have demanded it via required columns.
    #[error("missing source column '{column}' ({origin})")]
    MissingSourceColumn { column: String, origin: String },

    /// Cancel flag observed or a confirmation predicate rejected the run
    /// before any remote call was issued.
    #[error("{operation} cancelled by user")]
    Cancelled { operation: &'static str },

    /// A discriminator column held a value that is not an allowed target
    /// type. Never written silently as a wrong-type reference.
    #[error("unsupported value '{value}' in discriminator column '{column}', expected one of {expected:?}")]
    InvalidDiscriminator {
        column: String,
        value: String,
        expected: Vec<String>,
    },

    /// A source value cannot be coerced to the destination semantic type.
    #[error("cannot convert {from} value to {to} for attribute '{attribute}'")]
    TypeMismatch {
        attribute: String,
        from: &'static str,
        to: &'static str,
    },

    /// The node cannot consume the shape of its source.
    #[error("unsupported source shape: {reason} ({origin})")]
    UnsupportedShape { reason: String, origin: String },

    /// A single or batched remote sub-operation failed before any record
    /// completed.
    #[error("remote operation failed: {source}")]
    Remote {
        #[source]
        source: anyhow::Error,
    },

    /// A remote failure after one or more completed records. The message is
    /// the completion summary for the records that did finish; completed
    /// mutations are reported, never undone.
    #[error("{message}")]
    PartialSuccess {
        completed: u64,
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl DmlError {
    pub fn remote(source: anyhow::Error) -> Self {
        DmlError::Remote { source }
    }

    /// Number of records that completed before the failure, if any did.
    pub fn completed(&self) -> u64 {
        match self {
            DmlError::PartialSuccess { completed, .. } => *completed,
            _ => 0,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, DmlError::Cancelled { .. })
    }
}
