//! Control node reverting caller impersonation on a connection.

use crate::error::DmlError;
use crate::node::{lookup_data_source, DataSourceMap, NodeOrigin, NodeStats, PlanNode};
use crate::options::ExecutionOptions;

/// Clears any impersonated caller on the named connection. Consumes no rows
/// and mutates no records; idempotent.
pub struct RevertCallerNode {
    pub data_source: String,
    pub origin: NodeOrigin,
    stats: NodeStats,
}

impl RevertCallerNode {
    pub fn new(data_source: impl Into<String>, origin: NodeOrigin) -> Self {
        Self {
            data_source: data_source.into(),
            origin,
            stats: NodeStats::default(),
        }
    }
}

impl PlanNode for RevertCallerNode {
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
        _options: &ExecutionOptions,
    ) -> Result<String, DmlError> {
        let data_source = lookup_data_source(data_sources, &self.data_source, &self.origin)?;
        let timer = self.stats.begin_execution();
        data_source.client.reset_caller().map_err(DmlError::remote)?;
        timer.finish(&mut self.stats);
        Ok("Reverted impersonation".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{account_meta, data_sources, RecordingClient};
    use std::sync::Arc;

    #[test]
    fn resets_the_caller_on_the_named_connection() {
        let client = Arc::new(RecordingClient::default());
        let sources = data_sources(Arc::clone(&client), vec![account_meta()]);
        let mut node = RevertCallerNode::new("store", NodeOrigin::default());

        let message = node
            .execute(&sources, &ExecutionOptions::default())
            .unwrap();

        assert_eq!(message, "Reverted impersonation");
        assert_eq!(*client.caller_resets.lock().unwrap(), 1);
    }

    #[test]
    fn unknown_data_source_is_a_configuration_error() {
        let client = Arc::new(RecordingClient::default());
        let sources = data_sources(client, vec![account_meta()]);
        let mut node = RevertCallerNode::new("missing", NodeOrigin::default());

        let err = node
            .execute(&sources, &ExecutionOptions::default())
            .unwrap_err();

        assert!(matches!(err, DmlError::UnknownDataSource { name, .. } if name == "missing"));
    }
}
