//! Bulk-delete job node, produced by folding an eligible DELETE.

use trellis_client::{OperationKind, RecordOperation};

use crate::error::DmlError;
use crate::executor::DELETE_NAMES;
use crate::node::{lookup_data_source, DataSourceMap, NodeOrigin, NodeStats, PlanNode};
use crate::options::ExecutionOptions;

/// Submits one asynchronous delete-by-filter job instead of enumerating and
/// deleting records one by one. The job runs server-side; this node returns
/// as soon as the job is accepted.
pub struct BulkDeleteJobNode {
    pub data_source: String,
    pub logical_name: String,
    pub origin: NodeOrigin,
    /// Filter payload in the store's query language, carried verbatim from
    /// the scan this node replaced.
    pub filter: String,
    stats: NodeStats,
}

impl BulkDeleteJobNode {
    pub fn new(
        data_source: impl Into<String>,
        logical_name: impl Into<String>,
        origin: NodeOrigin,
        filter: impl Into<String>,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            logical_name: logical_name.into(),
            origin,
            filter: filter.into(),
            stats: NodeStats::default(),
        }
    }
}

impl PlanNode for BulkDeleteJobNode {
    fn origin(&self) -> &NodeOrigin {
        &self.origin
    }

    fn stats(&self) -> &NodeStats {
        &self.stats
    }

    fn add_required_columns(&mut self, _data_sources: &DataSourceMap) -> Result<(), DmlError> {
        Ok(())
    }

    fn fold(
        self: Box<Self>,
        _data_sources: &DataSourceMap,
        _options: &ExecutionOptions,
    ) -> Result<Box<dyn PlanNode>, DmlError> {
        Ok(self)
    }

    fn execute(
        &mut self,
        data_sources: &DataSourceMap,
        options: &ExecutionOptions,
    ) -> Result<String, DmlError> {
        if options.cancelled() {
            options.metrics.record_cancellation();
            return Err(DmlError::Cancelled {
                operation: DELETE_NAMES.statement,
            });
        }

        let data_source = lookup_data_source(data_sources, &self.data_source, &self.origin)?;
        let timer = self.stats.begin_execution();

        options.metrics.record_op_submitted();
        data_source
            .client
            .execute(RecordOperation::new(OperationKind::StartBulkDelete {
                target: self.logical_name.clone(),
                filter: self.filter.clone(),
            }))
            .map_err(DmlError::remote)?;

        timer.finish(&mut self.stats);
        Ok("Bulk delete job started".to_string())
    }
}
