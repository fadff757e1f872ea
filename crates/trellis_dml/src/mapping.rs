//! Column-mapping compiler.
//!
//! For each destination attribute the compiler builds, once per execution, a
//! converter from the source row to the destination's semantic type. Every
//! converter checks the null representation of its source first and returns
//! genuine null rather than a converted default; reinterpreting a null
//! sentinel under a timezone conversion is the canonical latent bug this
//! ordering guards against.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{LocalResult, TimeZone, Utc};
use trellis_client::{Record, RecordRef, Value};
use uuid::Uuid;

use crate::error::DmlError;
use crate::metadata::{AttributeType, TypeMetadata};
use crate::node::{ColumnType, NodeOrigin, RowSchema};
use crate::options::TimezoneMode;

/// Compiled converter for one destination attribute.
pub type ColumnAccessor = Arc<dyn Fn(&Record) -> Result<Value, DmlError> + Send + Sync>;

/// Static accessor table built once per execution, immutable thereafter.
pub struct ColumnAccessors {
    accessors: HashMap<String, ColumnAccessor>,
}

impl std::fmt::Debug for ColumnAccessors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnAccessors")
            .field("attributes", &self.accessors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ColumnAccessors {
    pub fn get(&self, attribute: &str) -> Option<ColumnAccessor> {
        self.accessors.get(attribute).cloned()
    }

    /// Accessor that must exist for the node to make sense; absence means
    /// the planner wired a mapping the metadata does not support.
    pub fn require(&self, attribute: &str, origin: &NodeOrigin) -> Result<ColumnAccessor, DmlError> {
        self.get(attribute).ok_or_else(|| DmlError::UnsupportedShape {
            reason: format!("no compiled accessor for attribute '{attribute}'"),
            origin: origin.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnAccessor)> {
        self.accessors
            .iter()
            .map(|(name, accessor)| (name.as_str(), accessor))
    }
}

/// How the target type of a multi-target reference is decided per record.
enum TargetResolver {
    Fixed(String),
    /// Read the companion discriminator column (canonical source name).
    Column {
        source_column: String,
        allowed: Vec<String>,
    },
}

/// Builds a converter per destination attribute from the source row schema
/// and the destination attribute catalog.
///
/// Shadow attributes (companions of another attribute) are skipped: they are
/// consumed by the reference rule below, never set directly. Mappings naming
/// attributes absent from the catalog are skipped for the same reason; the
/// `<attribute>type` discriminator companions were validated upstream.
pub fn compile_column_mappings(
    meta: &TypeMetadata,
    mappings: &BTreeMap<String, String>,
    schema: &RowSchema,
    timezone_mode: TimezoneMode,
    origin: &NodeOrigin,
) -> Result<ColumnAccessors, DmlError> {
    let mut accessors = HashMap::new();

    for (dest_attribute, source_column) in mappings {
        let (canonical, source_type) =
            schema
                .resolve(source_column)
                .ok_or_else(|| DmlError::MissingSourceColumn {
                    column: source_column.clone(),
                    origin: origin.to_string(),
                })?;
        let canonical = canonical.to_string();

        let attr = match meta.attribute(dest_attribute) {
            Some(attr) if attr.attribute_of.is_none() => attr,
            _ => continue,
        };

        if source_type == ColumnType::Null {
            accessors.insert(
                dest_attribute.clone(),
                Arc::new(|_: &Record| Ok(Value::Null)) as ColumnAccessor,
            );
            continue;
        }

        let accessor: ColumnAccessor = match &attr.attribute_type {
            AttributeType::Reference { targets } if !meta.is_relationship => {
                if source_type == ColumnType::Reference {
                    reference_passthrough_accessor(canonical, dest_attribute.clone())
                } else {
                    let resolver = build_target_resolver(
                        dest_attribute,
                        targets,
                        mappings,
                        schema,
                        origin,
                    )?;
                    reference_accessor(canonical, dest_attribute.clone(), resolver)
                }
            }
            // Relationship ("intersect") identifier attributes are bare ids.
            AttributeType::Reference { .. } | AttributeType::Uuid => {
                scalar_accessor(canonical, dest_attribute.clone(), |value, attribute| {
                    coerce_uuid(value, attribute).map(Value::Uuid)
                })
            }
            AttributeType::Choice => {
                scalar_accessor(canonical, dest_attribute.clone(), |value, attribute| {
                    let code = coerce_i64(value, attribute)?;
                    let code = i32::try_from(code).map_err(|_| DmlError::TypeMismatch {
                        attribute: attribute.to_string(),
                        from: value.kind(),
                        to: "choice",
                    })?;
                    Ok(Value::Choice(code))
                })
            }
            AttributeType::Money => {
                scalar_accessor(canonical, dest_attribute.clone(), |value, attribute| {
                    coerce_f64(value, attribute).map(Value::Money)
                })
            }
            AttributeType::Timestamp => timestamp_accessor(canonical, dest_attribute.clone(), timezone_mode),
            AttributeType::Int => {
                scalar_accessor(canonical, dest_attribute.clone(), |value, attribute| {
                    coerce_i64(value, attribute).map(Value::Int)
                })
            }
            AttributeType::Float => {
                scalar_accessor(canonical, dest_attribute.clone(), |value, attribute| {
                    coerce_f64(value, attribute).map(Value::Float)
                })
            }
            AttributeType::Bool => {
                scalar_accessor(canonical, dest_attribute.clone(), |value, attribute| {
                    coerce_bool(value, attribute).map(Value::Bool)
                })
            }
            AttributeType::String => {
                scalar_accessor(canonical, dest_attribute.clone(), |value, attribute| {
                    coerce_string(value, attribute).map(Value::String)
                })
            }
        };

        accessors.insert(dest_attribute.clone(), accessor);
    }

    Ok(ColumnAccessors { accessors })
}

fn build_target_resolver(
    dest_attribute: &str,
    targets: &[String],
    mappings: &BTreeMap<String, String>,
    schema: &RowSchema,
    origin: &NodeOrigin,
) -> Result<TargetResolver, DmlError> {
    if let [single] = targets {
        return Ok(TargetResolver::Fixed(single.clone()));
    }

    // Companion discriminator column by the `<attribute>type` convention.
    let discriminator = format!("{dest_attribute}type");
    let source_column =
        mappings
            .get(&discriminator)
            .ok_or_else(|| DmlError::MissingSourceColumn {
                column: discriminator.clone(),
                origin: origin.to_string(),
            })?;
    let (canonical, _) = schema
        .resolve(source_column)
        .ok_or_else(|| DmlError::MissingSourceColumn {
            column: source_column.clone(),
            origin: origin.to_string(),
        })?;

    Ok(TargetResolver::Column {
        source_column: canonical.to_string(),
        allowed: targets.to_vec(),
    })
}

fn source_value(record: &Record, column: &str) -> Value {
    record.get(column).cloned().unwrap_or(Value::Null)
}

fn scalar_accessor(
    source_column: String,
    attribute: String,
    convert: impl Fn(&Value, &str) -> Result<Value, DmlError> + Send + Sync + 'static,
) -> ColumnAccessor {
    Arc::new(move |record: &Record| {
        let value = source_value(record, &source_column);
        if value.is_null() {
            return Ok(Value::Null);
        }
        convert(&value, &attribute)
    })
}

fn reference_passthrough_accessor(source_column: String, attribute: String) -> ColumnAccessor {
    Arc::new(move |record: &Record| {
        let value = source_value(record, &source_column);
        match value {
            Value::Null => Ok(Value::Null),
            Value::Reference(reference) => Ok(Value::Reference(reference)),
            other => Err(DmlError::TypeMismatch {
                attribute: attribute.clone(),
                from: other.kind(),
                to: "reference",
            }),
        }
    })
}

fn reference_accessor(
    source_column: String,
    attribute: String,
    resolver: TargetResolver,
) -> ColumnAccessor {
    Arc::new(move |record: &Record| {
        let value = source_value(record, &source_column);
        if value.is_null() {
            return Ok(Value::Null);
        }
        let id = coerce_uuid(&value, &attribute)?;

        let target = match &resolver {
            TargetResolver::Fixed(target) => target.clone(),
            TargetResolver::Column {
                source_column,
                allowed,
            } => {
                let raw = source_value(record, source_column);
                let label = match &raw {
                    Value::Null => String::new(),
                    other => coerce_string(other, &attribute)?,
                };
                if !allowed.iter().any(|t| *t == label) {
                    return Err(DmlError::InvalidDiscriminator {
                        column: source_column.clone(),
                        value: label,
                        expected: allowed.clone(),
                    });
                }
                label
            }
        };

        Ok(Value::Reference(RecordRef::new(target, id)))
    })
}

fn timestamp_accessor(
    source_column: String,
    attribute: String,
    timezone_mode: TimezoneMode,
) -> ColumnAccessor {
    Arc::new(move |record: &Record| {
        let value = source_value(record, &source_column);
        // Null check before any timezone reinterpretation.
        if value.is_null() {
            return Ok(Value::Null);
        }
        match value {
            Value::TimestampTz(instant) => Ok(Value::TimestampTz(instant)),
            Value::Timestamp(naive) => {
                let instant = match timezone_mode {
                    TimezoneMode::Utc => Utc.from_utc_datetime(&naive),
                    TimezoneMode::Local => match chrono::Local.from_local_datetime(&naive) {
                        LocalResult::Single(local) => local.with_timezone(&Utc),
                        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
                        LocalResult::None => {
                            return Err(DmlError::TypeMismatch {
                                attribute: attribute.clone(),
                                from: "timestamp",
                                to: "timestamptz",
                            })
                        }
                    },
                };
                Ok(Value::TimestampTz(instant))
            }
            other => Err(DmlError::TypeMismatch {
                attribute: attribute.clone(),
                from: other.kind(),
                to: "timestamptz",
            }),
        }
    })
}

fn coerce_uuid(value: &Value, attribute: &str) -> Result<Uuid, DmlError> {
    match value {
        Value::Uuid(id) => Ok(*id),
        Value::Reference(reference) => Ok(reference.id),
        Value::String(raw) => Uuid::parse_str(raw).map_err(|_| DmlError::TypeMismatch {
            attribute: attribute.to_string(),
            from: "string",
            to: "uuid",
        }),
        other => Err(DmlError::TypeMismatch {
            attribute: attribute.to_string(),
            from: other.kind(),
            to: "uuid",
        }),
    }
}

fn coerce_i64(value: &Value, attribute: &str) -> Result<i64, DmlError> {
    match value {
        Value::Int(v) => Ok(*v),
        Value::Choice(code) => Ok(i64::from(*code)),
        Value::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
        other => Err(DmlError::TypeMismatch {
            attribute: attribute.to_string(),
            from: other.kind(),
            to: "int",
        }),
    }
}

fn coerce_f64(value: &Value, attribute: &str) -> Result<f64, DmlError> {
    match value {
        Value::Float(v) => Ok(*v),
        Value::Int(v) => Ok(*v as f64),
        Value::Money(v) => Ok(*v),
        other => Err(DmlError::TypeMismatch {
            attribute: attribute.to_string(),
            from: other.kind(),
            to: "float",
        }),
    }
}

fn coerce_bool(value: &Value, attribute: &str) -> Result<bool, DmlError> {
    match value {
        Value::Bool(v) => Ok(*v),
        Value::Int(0) => Ok(false),
        Value::Int(1) => Ok(true),
        other => Err(DmlError::TypeMismatch {
            attribute: attribute.to_string(),
            from: other.kind(),
            to: "bool",
        }),
    }
}

fn coerce_string(value: &Value, attribute: &str) -> Result<String, DmlError> {
    match value {
        Value::String(v) => Ok(v.clone()),
        Value::Int(v) => Ok(v.to_string()),
        Value::Float(v) => Ok(v.to_string()),
        Value::Bool(v) => Ok(v.to_string()),
        Value::Uuid(v) => Ok(v.to_string()),
        other => Err(DmlError::TypeMismatch {
            attribute: attribute.to_string(),
            from: other.kind(),
            to: "string",
        }),
    }
}
