//! Execution-plan node contract.
//!
//! A plan tree is built once by the planner, folded exactly once before its
//! first execution, and then executed zero or more times. Folding may
//! replace a node with a cheaper equivalent; a folded node never shares its
//! source with the replacement, so the plan stays a tree.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use trellis_client::{Record, RecordClient};

use crate::error::DmlError;
use crate::metadata::MetadataProvider;
use crate::options::ExecutionOptions;

/// One configured connection to a remote store instance.
pub struct DataSource {
    pub name: String,
    pub client: Arc<dyn RecordClient>,
    pub metadata: Arc<dyn MetadataProvider>,
    /// Approximate row count, a planning heuristic only.
    pub row_count_hint: Option<u64>,
}

pub type DataSourceMap = HashMap<String, DataSource>;

/// Resolves a data source by name; unknown names are a fatal config error.
pub fn lookup_data_source<'a>(
    data_sources: &'a DataSourceMap,
    name: &str,
    origin: &NodeOrigin,
) -> Result<&'a DataSource, DmlError> {
    data_sources
        .get(name)
        .ok_or_else(|| DmlError::UnknownDataSource {
            name: name.to_string(),
            origin: origin.to_string(),
        })
}

/// Diagnostic origin of a node: the statement text it was planned from and
/// its position within the overall query text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeOrigin {
    pub sql: String,
    pub index: usize,
    pub length: usize,
}

impl NodeOrigin {
    pub fn new(sql: impl Into<String>, index: usize, length: usize) -> Self {
        Self {
            sql: sql.into(),
            index,
            length,
        }
    }
}

impl fmt::Display for NodeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sql.is_empty() {
            write!(f, "at offset {}", self.index)
        } else {
            write!(f, "in \"{}\" at offset {}", self.sql, self.index)
        }
    }
}

/// Execution-count and cumulative-duration bookkeeping for one node.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeStats {
    pub execution_count: u64,
    pub total_duration: Duration,
}

impl NodeStats {
    pub fn begin_execution(&mut self) -> StatTimer {
        self.execution_count += 1;
        StatTimer {
            started: Instant::now(),
        }
    }
}

/// Accumulates elapsed wall time into [`NodeStats`]. Pauses are expressed by
/// finishing one timer and beginning another, so UI interaction (e.g. a
/// confirmation prompt) is not counted as execution time.
pub struct StatTimer {
    started: Instant,
}

impl StatTimer {
    pub fn resume() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn finish(self, stats: &mut NodeStats) {
        stats.total_duration += self.started.elapsed();
    }
}

/// Type of one source column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    String,
    Uuid,
    Timestamp,
    Reference,
    Choice,
    Money,
    /// Column produced by a null literal; its values are always null.
    Null,
}

/// Schema of the rows a source produces.
#[derive(Debug, Clone, Default)]
pub struct RowSchema {
    columns: HashMap<String, ColumnType>,
}

impl RowSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.insert(name.into(), column_type);
        self
    }

    /// Resolves a column name to its canonical spelling and type. Exact
    /// matches win; otherwise a single case-insensitive match is accepted.
    pub fn resolve(&self, name: &str) -> Option<(&str, ColumnType)> {
        if let Some((canonical, column_type)) = self.columns.get_key_value(name) {
            return Some((canonical.as_str(), *column_type));
        }

        let mut found = None;
        for (canonical, column_type) in &self.columns {
            if canonical.eq_ignore_ascii_case(name) {
                if found.is_some() {
                    return None;
                }
                found = Some((canonical.as_str(), *column_type));
            }
        }
        found
    }
}

/// Shape advertised by a source that is itself an unmodified full scan.
///
/// Wrapping nodes (filters, projections, joins) must not forward their
/// child's scan info; a `Some` here means the scan output reaches the
/// consumer unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullScanInfo {
    /// Logical type being scanned.
    pub entity: String,
    /// Alias the scan's output columns are qualified with.
    pub alias: String,
    /// The scan's own filter, an opaque payload in the store's query
    /// language, carried verbatim into a bulk-job rewrite.
    pub filter: String,
}

/// Row-producing upstream node, owned by the external read-path engine.
pub trait RowSource: Send {
    fn schema(&self) -> Result<RowSchema, DmlError>;

    /// Produces the finite, ordered record sequence. DML pulls all rows
    /// eagerly before fan-out begins, so memory scales with the row count.
    fn execute(
        &mut self,
        data_sources: &DataSourceMap,
        options: &ExecutionOptions,
    ) -> Result<Vec<Record>, DmlError>;

    /// Pushes column demands upstream before planning completes. Idempotent.
    fn add_required_columns(&mut self, columns: &[String]);

    fn fold(
        self: Box<Self>,
        data_sources: &DataSourceMap,
        options: &ExecutionOptions,
    ) -> Result<Box<dyn RowSource>, DmlError>;

    fn full_scan(&self) -> Option<FullScanInfo> {
        None
    }
}

/// Base contract for executable plan nodes.
pub trait PlanNode: Send {
    fn origin(&self) -> &NodeOrigin;

    fn stats(&self) -> &NodeStats;

    /// Pushes this node's column demands into its source. Idempotent; the
    /// only side effect is appending into the source's required set.
    fn add_required_columns(&mut self, data_sources: &DataSourceMap) -> Result<(), DmlError>;

    /// Folds the source bottom-up, then returns self or a cheaper
    /// replacement. Runs exactly once, before the first `execute`.
    fn fold(
        self: Box<Self>,
        data_sources: &DataSourceMap,
        options: &ExecutionOptions,
    ) -> Result<Box<dyn PlanNode>, DmlError>;

    /// Runs the node and returns its completion message.
    fn execute(
        &mut self,
        data_sources: &DataSourceMap,
        options: &ExecutionOptions,
    ) -> Result<String, DmlError>;
}
