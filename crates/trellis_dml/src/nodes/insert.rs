//! INSERT node: creates records, or associations for relationship types.

use std::collections::BTreeMap;

use trellis_client::{OperationKind, Record, RecordOperation, RecordRef};

use crate::error::DmlError;
use crate::executor::{execute_mutation, INSERT_NAMES};
use crate::mapping::compile_column_mappings;
use crate::node::{
    lookup_data_source, DataSourceMap, NodeOrigin, NodeStats, PlanNode, RowSource, StatTimer,
};
use crate::nodes::require_id;
use crate::options::ExecutionOptions;

pub struct InsertNode {
    pub data_source: String,
    /// Logical name of the destination type.
    pub logical_name: String,
    pub origin: NodeOrigin,
    /// Destination attribute to source column, discriminator companions
    /// included under the `<attribute>type` convention.
    pub column_mappings: BTreeMap<String, String>,
    pub source: Box<dyn RowSource>,
    stats: NodeStats,
}

impl InsertNode {
    pub fn new(
        data_source: impl Into<String>,
        logical_name: impl Into<String>,
        origin: NodeOrigin,
        column_mappings: BTreeMap<String, String>,
        source: Box<dyn RowSource>,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            logical_name: logical_name.into(),
            origin,
            column_mappings,
            source,
            stats: NodeStats::default(),
        }
    }
}

impl PlanNode for InsertNode {
    fn origin(&self) -> &NodeOrigin {
        &self.origin
    }

    fn stats(&self) -> &NodeStats {
        &self.stats
    }

    fn add_required_columns(&mut self, _data_sources: &DataSourceMap) -> Result<(), DmlError> {
        let columns: Vec<String> = self.column_mappings.values().cloned().collect();
        self.source.add_required_columns(&columns);
        Ok(())
    }

    fn fold(
        self: Box<Self>,
        data_sources: &DataSourceMap,
        options: &ExecutionOptions,
    ) -> Result<Box<dyn PlanNode>, DmlError> {
        let mut node = *self;
        node.source = node.source.fold(data_sources, options)?;
        Ok(Box::new(node))
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

        // Prompt time is not execution time.
        if !options.confirm_insert(rows.len(), &meta) {
            return Err(DmlError::Cancelled {
                operation: INSERT_NAMES.statement,
            });
        }
        let timer = StatTimer::resume();

        let accessors = compile_column_mappings(
            &meta,
            &self.column_mappings,
            &schema,
            options.timezone_mode,
            &self.origin,
        )?;
        let bypass = options.bypass_side_effects;

        let message = if meta.is_relationship {
            let relationship = meta.many_to_many(&self.origin)?;
            let first = accessors.require(&relationship.first_attribute, &self.origin)?;
            let second = accessors.require(&relationship.second_attribute, &self.origin)?;
            let build = |record: &Record| -> Result<RecordOperation, DmlError> {
                let first_id = require_id(first(record)?, &relationship.first_attribute)?;
                let second_id = require_id(second(record)?, &relationship.second_attribute)?;
                Ok(RecordOperation::new(OperationKind::Associate {
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
                &INSERT_NAMES,
            )?
        } else {
            let target = self.logical_name.clone();
            let build = |record: &Record| -> Result<RecordOperation, DmlError> {
                let mut attributes = BTreeMap::new();
                for (attribute, accessor) in accessors.iter() {
                    attributes.insert(attribute.to_string(), accessor(record)?);
                }
                Ok(RecordOperation::new(OperationKind::Create {
                    target: target.clone(),
                    attributes,
                })
                .with_bypass(bypass))
            };
            execute_mutation(
                data_source.client.as_ref(),
                options,
                &rows,
                &meta,
                &build,
                &INSERT_NAMES,
            )?
        };

        timer.finish(&mut self.stats);
        Ok(message)
    }
}
