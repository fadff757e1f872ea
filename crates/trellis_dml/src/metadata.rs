//! Destination-type catalog consumed by the mutation engine.
//!
//! Metadata records describe the logical types of the remote store: their
//! attributes and semantic types, the primary-identifier attribute, and the
//! relationship definitions used by relationship ("join-table") mutations.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DmlError;
use crate::node::NodeOrigin;

/// Semantic type of one destination attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    Bool,
    Int,
    Float,
    String,
    Uuid,
    Timestamp,
    /// Typed reference; `targets` lists the logical types it may point at.
    Reference { targets: Vec<String> },
    Choice,
    Money,
}

/// One destination attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMetadata {
    pub logical_name: String,
    pub attribute_type: AttributeType,
    /// Set when this attribute is a shadow companion of another attribute
    /// (e.g. the label or type-discriminator column tied to a reference).
    /// Shadow attributes are consumed by the reference rule, never written.
    #[serde(default)]
    pub attribute_of: Option<String>,
}

impl AttributeMetadata {
    pub fn new(logical_name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            logical_name: logical_name.into(),
            attribute_type,
            attribute_of: None,
        }
    }

    pub fn shadow_of(mut self, owner: impl Into<String>) -> Self {
        self.attribute_of = Some(owner.into());
        self
    }
}

/// Many-to-many relationship definition for a relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipMetadata {
    pub schema_name: String,
    pub first_entity: String,
    pub first_attribute: String,
    pub second_entity: String,
    pub second_attribute: String,
}

/// Metadata for one logical type of the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMetadata {
    pub logical_name: String,
    pub display_name: String,
    pub display_collection_name: String,
    pub primary_id_attribute: String,
    /// Relationship ("intersect") types carry two identifiers per record and
    /// translate deletes into disassociations.
    #[serde(default)]
    pub is_relationship: bool,
    #[serde(default)]
    pub relationships: Vec<RelationshipMetadata>,
    pub attributes: Vec<AttributeMetadata>,
}

impl TypeMetadata {
    pub fn attribute(&self, logical_name: &str) -> Option<&AttributeMetadata> {
        self.attributes
            .iter()
            .find(|attr| attr.logical_name == logical_name)
    }

    /// Singular or plural display name, for completion and progress messages.
    pub fn display_name_for_count(&self, count: u64) -> &str {
        if count == 1 {
            &self.display_name
        } else {
            &self.display_collection_name
        }
    }

    /// The single many-to-many relationship backing a relationship type.
    pub fn many_to_many(&self, origin: &NodeOrigin) -> Result<&RelationshipMetadata, DmlError> {
        match self.relationships.as_slice() {
            [relationship] => Ok(relationship),
            _ => Err(DmlError::UnsupportedShape {
                reason: format!(
                    "relationship type '{}' must define exactly one many-to-many relationship, found {}",
                    self.logical_name,
                    self.relationships.len()
                ),
                origin: origin.to_string(),
            }),
        }
    }

    /// Validates required metadata fields before use.
    pub fn validate(&self) -> Result<(), DmlError> {
        if self.logical_name.trim().is_empty() {
            return Err(DmlError::UnsupportedShape {
                reason: "type metadata has empty logical_name".to_string(),
                origin: String::new(),
            });
        }
        if self.primary_id_attribute.trim().is_empty() {
            return Err(DmlError::UnsupportedShape {
                reason: format!(
                    "type metadata for '{}' has empty primary_id_attribute",
                    self.logical_name
                ),
                origin: String::new(),
            });
        }
        Ok(())
    }
}

/// Identifier attributes for relationship types whose deletes use a
/// dedicated membership-removal call instead of generic disassociation.
///
/// Seeded only from observed backend cases; deliberately not generalized.
const MEMBERSHIP_REMOVAL_TYPES: &[(&str, (&str, &str))] =
    &[("listmember", ("listid", "entityid"))];

/// Returns the `(primary, secondary)` key attributes when `logical_name` is a
/// membership-removal special case.
pub fn membership_removal_keys(logical_name: &str) -> Option<(&'static str, &'static str)> {
    MEMBERSHIP_REMOVAL_TYPES
        .iter()
        .find(|(name, _)| *name == logical_name)
        .map(|(_, keys)| *keys)
}

/// Metadata accessor for the remote store's schema cache.
pub trait MetadataProvider: Send + Sync {
    fn type_metadata(
        &self,
        logical_name: &str,
        origin: &NodeOrigin,
    ) -> Result<Arc<TypeMetadata>, DmlError>;
}
