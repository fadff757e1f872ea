//! Executable mutation nodes and the control node.

mod bulk_delete;
mod control;
mod delete;
mod insert;
mod update;

pub use bulk_delete::BulkDeleteJobNode;
pub use control::RevertCallerNode;
pub use delete::DeleteNode;
pub use insert::InsertNode;
pub use update::UpdateNode;

use trellis_client::Value;
use uuid::Uuid;

use crate::error::DmlError;

/// Extracts the record identifier a compiled accessor produced.
pub(crate) fn require_id(value: Value, attribute: &str) -> Result<Uuid, DmlError> {
    let kind = value.kind();
    value.as_uuid().ok_or_else(|| DmlError::TypeMismatch {
        attribute: attribute.to_string(),
        from: kind,
        to: "uuid",
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use trellis_client::{
        BatchOutcome, BatchSettings, Record, RecordClient, RecordOperation,
    };

    use crate::error::DmlError;
    use crate::metadata::{
        AttributeMetadata, AttributeType, MetadataProvider, RelationshipMetadata, TypeMetadata,
    };
    use crate::node::{
        DataSource, DataSourceMap, FullScanInfo, NodeOrigin, RowSchema, RowSource,
    };
    use crate::options::ExecutionOptions;

    /// Source producing a fixed row set, optionally advertising a full scan.
    pub struct StaticSource {
        pub schema: RowSchema,
        pub rows: Vec<Record>,
        pub scan: Option<FullScanInfo>,
        pub required: Vec<String>,
    }

    impl StaticSource {
        pub fn new(schema: RowSchema, rows: Vec<Record>) -> Self {
            Self {
                schema,
                rows,
                scan: None,
                required: Vec::new(),
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

        fn add_required_columns(&mut self, columns: &[String]) {
            for column in columns {
                if !self.required.contains(column) {
                    self.required.push(column.clone());
                }
            }
        }

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

    /// Client recording every submitted operation.
    #[derive(Default)]
    pub struct RecordingClient {
        pub ops: Mutex<Vec<RecordOperation>>,
        pub caller_resets: Mutex<usize>,
    }

    impl RecordingClient {
        pub fn submitted(&self) -> Vec<RecordOperation> {
            self.ops.lock().unwrap().clone()
        }
    }

    impl RecordClient for RecordingClient {
        fn execute(&self, op: RecordOperation) -> anyhow::Result<()> {
            self.ops.lock().unwrap().push(op);
            Ok(())
        }

        fn execute_batch(
            &self,
            ops: Vec<RecordOperation>,
            _settings: BatchSettings,
        ) -> anyhow::Result<BatchOutcome> {
            self.ops.lock().unwrap().extend(ops);
            Ok(BatchOutcome::success())
        }

        fn try_clone(&self) -> Option<Box<dyn RecordClient>> {
            None
        }

        fn set_affinity(&self, _enabled: bool) {}

        fn reset_caller(&self) -> anyhow::Result<()> {
            *self.caller_resets.lock().unwrap() += 1;
            Ok(())
        }
    }

    pub struct StaticMetadata {
        pub types: HashMap<String, Arc<TypeMetadata>>,
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
                AttributeMetadata::new("revenue", AttributeType::Money),
            ],
        }
    }

    pub fn listmember_meta() -> TypeMetadata {
        TypeMetadata {
            logical_name: "listmember".to_string(),
            display_name: "list member".to_string(),
            display_collection_name: "list members".to_string(),
            primary_id_attribute: "listmemberid".to_string(),
            is_relationship: true,
            relationships: Vec::new(),
            attributes: vec![
                AttributeMetadata::new("listmemberid", AttributeType::Uuid),
                AttributeMetadata::new("listid", AttributeType::Uuid),
                AttributeMetadata::new("entityid", AttributeType::Uuid),
            ],
        }
    }

    pub fn teammembership_meta() -> TypeMetadata {
        TypeMetadata {
            logical_name: "teammembership".to_string(),
            display_name: "team membership".to_string(),
            display_collection_name: "team memberships".to_string(),
            primary_id_attribute: "teammembershipid".to_string(),
            is_relationship: true,
            relationships: vec![RelationshipMetadata {
                schema_name: "teammembership_association".to_string(),
                first_entity: "team".to_string(),
                first_attribute: "teamid".to_string(),
                second_entity: "systemuser".to_string(),
                second_attribute: "systemuserid".to_string(),
            }],
            attributes: vec![
                AttributeMetadata::new("teammembershipid", AttributeType::Uuid),
                AttributeMetadata::new("teamid", AttributeType::Uuid),
                AttributeMetadata::new("systemuserid", AttributeType::Uuid),
            ],
        }
    }

    /// Single data source named "store" wired to the given fakes.
    pub fn data_sources(
        client: Arc<RecordingClient>,
        types: Vec<TypeMetadata>,
    ) -> DataSourceMap {
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
                client,
                metadata: Arc::new(provider),
                row_count_hint: None,
            },
        );
        map
    }
}
