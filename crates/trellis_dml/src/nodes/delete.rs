//! DELETE node: removes records, disassociates relationship rows, and folds
//! whole-table deletes into server-side bulk jobs.

use std::collections::BTreeMap;

use tracing::debug;
use trellis_client::{OperationKind, Record, RecordOperation, RecordRef};

use crate::error::DmlError;
use crate::executor::{execute_mutation, DELETE_NAMES};
use crate::mapping::compile_column_mappings;
use crate::metadata::membership_removal_keys;
use crate::node::{
    lookup_data_source, DataSourceMap, NodeOrigin, NodeStats, PlanNode, RowSource, StatTimer,
};
use crate::nodes::{require_id, BulkDeleteJobNode};
use crate::options::ExecutionOptions;

pub struct DeleteNode {
    pub data_source: String,
    pub logical_name: String,
    pub origin: NodeOrigin,
    /// Source column providing each record's primary identifier.
    pub primary_id_source: String,
    /// Second identifier column, present only for relationship types.
    pub secondary_id_source: Option<String>,
    pub source: Box<dyn RowSource>,
    stats: NodeStats,
}

impl DeleteNode {
    pub fn new(
        data_source: impl Into<String>,
        logical_name: impl Into<String>,
        origin: NodeOrigin,
        primary_id_source: impl Into<String>,
        source: Box<dyn RowSource>,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            logical_name: logical_name.into(),
            origin,
            primary_id_source: primary_id_source.into(),
            secondary_id_source: None,
            source,
            stats: NodeStats::default(),
        }
    }

    pub fn with_secondary_id_source(mut self, column: impl Into<String>) -> Self {
        self.secondary_id_source = Some(column.into());
        self
    }

    fn secondary_id_source(&self) -> Result<&str, DmlError> {
        self.secondary_id_source
            .as_deref()
            .ok_or_else(|| DmlError::UnsupportedShape {
                reason: format!(
                    "delete from relationship type '{}' needs both identifier columns",
                    self.logical_name
                ),
                origin: self.origin.to_string(),
            })
    }
}

impl PlanNode for DeleteNode {
    fn origin(&self) -> &NodeOrigin {
        &self.origin
    }

    fn stats(&self) -> &NodeStats {
        &self.stats
    }

    fn add_required_columns(&mut self, _data_sources: &DataSourceMap) -> Result<(), DmlError> {
        let mut columns = vec![self.primary_id_source.clone()];
        if let Some(secondary) = &self.secondary_id_source {
            columns.push(secondary.clone());
        }
        self.source.add_required_columns(&columns);
        Ok(())
    }

    /// Folds the source, then rewrites an unfiltered-projection delete over a
    /// full scan of the same type into a server-side bulk-delete job. The
    /// rewrite is opt-in and never applies to relationship deletes.
    fn fold(
        self: Box<Self>,
        data_sources: &DataSourceMap,
        options: &ExecutionOptions,
    ) -> Result<Box<dyn PlanNode>, DmlError> {
        let mut node = *self;
        node.source = node.source.fold(data_sources, options)?;

        if !options.use_bulk_delete || node.secondary_id_source.is_some() {
            return Ok(Box::new(node));
        }
        let Some(scan) = node.source.full_scan() else {
            return Ok(Box::new(node));
        };
        if scan.entity != node.logical_name {
            return Ok(Box::new(node));
        }

        let data_source = lookup_data_source(data_sources, &node.data_source, &node.origin)?;
        let meta = data_source
            .metadata
            .type_metadata(&node.logical_name, &node.origin)?;
        if node.primary_id_source != format!("{}.{}", scan.alias, meta.primary_id_attribute) {
            return Ok(Box::new(node));
        }

        options.metrics.record_bulk_job_rewrite();
        debug!(
            entity = node.logical_name.as_str(),
            "rewriting delete into a bulk-delete job"
        );
        Ok(Box::new(BulkDeleteJobNode::new(
            node.data_source,
            node.logical_name,
            node.origin,
            scan.filter,
        )))
    }

    fn execute(
        &mut self,
        data_sources: &DataSourceMap,
        options: &ExecutionOptions,
    ) -> Result<String, DmlError> {
        let data_source = lookup_data_source(data_sources, &self.data_source, &self.origin)?;
        let meta = data_source
            .metadata
            .type_metadata(&self.logical_name, &self.origin)?;
        meta.validate()?;

        let timer = self.stats.begin_execution();
        let schema = self.source.schema()?;
        let rows = self.source.execute(data_sources, options)?;
        timer.finish(&mut self.stats);

        if !options.confirm_delete(rows.len(), &meta) {
            return Err(DmlError::Cancelled {
                operation: DELETE_NAMES.statement,
            });
        }
        let timer = StatTimer::resume();

        let bypass = options.bypass_side_effects;
        let message = if let Some((primary_key, secondary_key)) =
            membership_removal_keys(&self.logical_name)
        {
            let id_mapping: BTreeMap<String, String> = [
                (primary_key.to_string(), self.primary_id_source.clone()),
                (
                    secondary_key.to_string(),
                    self.secondary_id_source()?.to_string(),
                ),
            ]
            .into();
            let accessors = compile_column_mappings(
                &meta,
                &id_mapping,
                &schema,
                options.timezone_mode,
                &self.origin,
            )?;
            let list = accessors.require(primary_key, &self.origin)?;
            let member = accessors.require(secondary_key, &self.origin)?;
            let build = |record: &Record| -> Result<RecordOperation, DmlError> {
                Ok(RecordOperation::new(OperationKind::RemoveListMember {
                    list_id: require_id(list(record)?, primary_key)?,
                    member_id: require_id(member(record)?, secondary_key)?,
                })
                .with_bypass(bypass))
            };
            execute_mutation(
                data_source.client.as_ref(),
                options,
                &rows,
                &meta,
                &build,
                &DELETE_NAMES,
            )?
        } else if meta.is_relationship {
            let relationship = meta.many_to_many(&self.origin)?;
            let id_mapping: BTreeMap<String, String> = [
                (
                    relationship.first_attribute.clone(),
                    self.primary_id_source.clone(),
                ),
                (
                    relationship.second_attribute.clone(),
                    self.secondary_id_source()?.to_string(),
                ),
            ]
            .into();
            let accessors = compile_column_mappings(
                &meta,
                &id_mapping,
                &schema,
                options.timezone_mode,
                &self.origin,
            )?;
            let first = accessors.require(&relationship.first_attribute, &self.origin)?;
            let second = accessors.require(&relationship.second_attribute, &self.origin)?;
            let build = |record: &Record| -> Result<RecordOperation, DmlError> {
                let first_id = require_id(first(record)?, &relationship.first_attribute)?;
                let second_id = require_id(second(record)?, &relationship.second_attribute)?;
                Ok(RecordOperation::new(OperationKind::Disassociate {
                    target: RecordRef::new(relationship.first_entity.clone(), first_id),
                    related: RecordRef::new(relationship.second_entity.clone(), second_id),
                    relationship: relationship.schema_name.clone(),
                })
                .with_bypass(bypass))
            };
            execute_mutation(
                data_source.client.as_ref(),
                options,
                &rows,
                &meta,
                &build,
                &DELETE_NAMES,
            )?
        } else {
            let id_mapping: BTreeMap<String, String> = [(
                meta.primary_id_attribute.clone(),
                self.primary_id_source.clone(),
            )]
            .into();
            let accessors = compile_column_mappings(
                &meta,
                &id_mapping,
                &schema,
                options.timezone_mode,
                &self.origin,
            )?;
            let id_accessor = accessors.require(&meta.primary_id_attribute, &self.origin)?;
            let target = self.logical_name.clone();
            let build = |record: &Record| -> Result<RecordOperation, DmlError> {
                let id = require_id(id_accessor(record)?, &meta.primary_id_attribute)?;
                Ok(RecordOperation::new(OperationKind::Delete {
                    target: RecordRef::new(target.clone(), id),
                })
                .with_bypass(bypass))
            };
            execute_mutation(
                data_source.client.as_ref(),
                options,
                &rows,
                &meta,
                &build,
                &DELETE_NAMES,
            )?
        };

        timer.finish(&mut self.stats);
        Ok(message)
    }
}
