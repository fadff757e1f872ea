//! Mutation subsystem of the SQL execution-plan engine.
//!
//! Plan nodes produced by the SQL planner come through here for the write
//! path: INSERT, UPDATE and DELETE nodes consume a row-producing source,
//! compile per-attribute conversion closures against the destination type's
//! metadata, and fan the resulting operations out across parallel batched
//! workers. A fold pass runs once before first execution and may replace an
//! eligible whole-table DELETE with a server-side bulk-delete job.

pub mod error;
pub mod executor;
pub mod mapping;
pub mod metadata;
pub mod metrics;
pub mod node;
pub mod nodes;
pub mod options;

pub use error::DmlError;
pub use executor::{execute_mutation, OperationNames, DELETE_NAMES, INSERT_NAMES, UPDATE_NAMES};
pub use mapping::{compile_column_mappings, ColumnAccessor, ColumnAccessors};
pub use metadata::{
    membership_removal_keys, AttributeMetadata, AttributeType, MetadataProvider,
    RelationshipMetadata, TypeMetadata,
};
pub use metrics::{DmlMetrics, DmlMetricsSnapshot};
pub use node::{
    lookup_data_source, ColumnType, DataSource, DataSourceMap, FullScanInfo, NodeOrigin,
    NodeStats, PlanNode, RowSchema, RowSource, StatTimer,
};
pub use nodes::{BulkDeleteJobNode, DeleteNode, InsertNode, RevertCallerNode, UpdateNode};
pub use options::{DmlRuntimeConfig, ExecutionOptions, TimezoneMode};
