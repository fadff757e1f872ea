//! UPDATE node: rewrites attributes of existing records by primary id.

use std::collections::BTreeMap;

use trellis_client::{OperationKind, Record, RecordOperation, RecordRef};

use crate::error::DmlError;
use crate::executor::{execute_mutation, UPDATE_NAMES};
use crate::mapping::compile_column_mappings;
use crate::node::{
    lookup_data_source, DataSourceMap, NodeOrigin, NodeStats, PlanNode, RowSource, StatTimer,
};
use crate::nodes::require_id;
use crate::options::ExecutionOptions;

pub struct UpdateNode {
    pub data_source: String,
    pub logical_name: String,
    pub origin: NodeOrigin,
    /// Source column providing the primary identifier of each record.
    pub primary_id_source: String,
    /// New attribute values, destination attribute to source column.
    pub column_mappings: BTreeMap<String, String>,
    pub source: Box<dyn RowSource>,
    stats: NodeStats,
}

impl UpdateNode {
    pub fn new(
        data_source: impl Into<String>,
        logical_name: impl Into<String>,
        origin: NodeOrigin,
        primary_id_source: impl Into<String>,
        column_mappings: BTreeMap<String, String>,
        source: Box<dyn RowSource>,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            logical_name: logical_name.into(),
            origin,
            primary_id_source: primary_id_source.into(),
            column_mappings,
            source,
            stats: NodeStats::default(),
        }
    }
}

impl PlanNode for UpdateNode {
    fn origin(&self) -> &NodeOrigin {
        &self.origin
    }

    fn stats(&self) -> &NodeStats {
        &self.stats
    }

    fn add_required_columns(&mut self, _data_sources: &DataSourceMap) -> Result<(), DmlError> {
        let mut columns: Vec<String> = self.column_mappings.values().cloned().collect();
        columns.push(self.primary_id_source.clone());
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

        if !options.confirm_update(rows.len(), &meta) {
            return Err(DmlError::Cancelled {
                operation: UPDATE_NAMES.statement,
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
        let id_mapping: BTreeMap<String, String> = [(
            meta.primary_id_attribute.clone(),
            self.primary_id_source.clone(),
        )]
        .into();
        let id_accessors = compile_column_mappings(
            &meta,
            &id_mapping,
            &schema,
            options.timezone_mode,
            &self.origin,
        )?;
        let id_accessor = id_accessors.require(&meta.primary_id_attribute, &self.origin)?;

        let target = self.logical_name.clone();
        let bypass = options.bypass_side_effects;
        let build = |record: &Record| -> Result<RecordOperation, DmlError> {
            let id = require_id(id_accessor(record)?, &meta.primary_id_attribute)?;
            let mut attributes = BTreeMap::new();
            for (attribute, accessor) in accessors.iter() {
                attributes.insert(attribute.to_string(), accessor(record)?);
            }
            Ok(RecordOperation::new(OperationKind::Update {
                target: RecordRef::new(target.clone(), id),
                attributes,
            })
            .with_bypass(bypass))
        };

        let message = execute_mutation(
            data_source.client.as_ref(),
            options,
            &rows,
            &meta,
            &build,
            &UPDATE_NAMES,
        )?;

        timer.finish(&mut self.stats);
        Ok(message)
    }
}
