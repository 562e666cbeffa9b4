//! Persistence codec: schema pieces <-> stored record shapes.
//!
//! Attribute and relationship-property maps are stored as an embedded JSON
//! blob on their owning record, so the store never has to model the nested
//! schema natively. Two blob shapes exist in the wild:
//!
//! - canonical: `{"age": {"type": "integer", ...}}`
//! - legacy:    `[{"name": "age", "type": "integer", ...}]`
//!
//! Both decode through [`PropertyMap`], the single normalizing entry point.

use crate::document::{Attribute, RelationshipProperty, SchemaDocument};
use crate::store::{Params, StoreError, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed property blob: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// A named map as found on disk or in the store, in either of its two shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PropertyMap<T> {
    Canonical(BTreeMap<String, T>),
    Legacy(Vec<NamedEntry<T>>),
}

/// One element of the legacy list shape: `{name, ...fields}`.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedEntry<T> {
    pub name: String,
    #[serde(flatten)]
    pub value: T,
}

impl<T> PropertyMap<T> {
    /// Normalize to the canonical map. Legacy lists are rekeyed by `name`;
    /// list order is dropped and a later duplicate name wins.
    pub fn into_map(self) -> BTreeMap<String, T> {
        match self {
            PropertyMap::Canonical(map) => map,
            PropertyMap::Legacy(entries) => {
                let mut map = BTreeMap::new();
                for entry in entries {
                    if entry.name.trim().is_empty() {
                        warn!("Dropping legacy entry with an empty name");
                        continue;
                    }
                    map.insert(entry.name, entry.value);
                }
                map
            }
        }
    }
}

/// Decode a blob in either shape. An empty blob decodes to an empty map.
pub fn decode_blob<T: DeserializeOwned>(blob: &str) -> Result<BTreeMap<String, T>> {
    if blob.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let parsed: Option<PropertyMap<T>> = serde_json::from_str(blob)?;
    Ok(parsed.map(PropertyMap::into_map).unwrap_or_default())
}

/// Decode, substituting an empty map on failure so one corrupt element never
/// blocks the rest of a load. Returns the error alongside for reporting.
pub fn decode_blob_or_empty<T: DeserializeOwned>(
    element: &str,
    blob: &str,
) -> (BTreeMap<String, T>, Option<DecodeError>) {
    match decode_blob(blob) {
        Ok(map) => (map, None),
        Err(e) => {
            warn!("Failed to decode properties for {}: {}; using empty map", element, e);
            (BTreeMap::new(), Some(e))
        }
    }
}

/// Encode a map in the canonical shape.
pub fn encode_blob<T: Serialize>(map: &BTreeMap<String, T>) -> String {
    serde_json::to_string(map).expect("property map serialization should not fail")
}

pub fn encode_attributes(attributes: &BTreeMap<String, Attribute>) -> String {
    encode_blob(attributes)
}

pub fn encode_relationship_properties(properties: &BTreeMap<String, RelationshipProperty>) -> String {
    encode_blob(properties)
}

fn required_str(map: &BTreeMap<String, Value>, key: &str) -> std::result::Result<String, StoreError> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Shape(format!("record is missing string field '{}'", key)))
}

fn optional_str(map: &BTreeMap<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn required_version(map: &BTreeMap<String, Value>) -> std::result::Result<u64, StoreError> {
    map.get("schemaVersion")
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::Shape("record is missing 'schemaVersion'".into()))
}

/// Stored shape of one node type.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub original_label: String,
    pub description: String,
    /// Attribute blob (JSON text).
    pub properties: String,
    pub version: u64,
    pub timestamp: String,
}

impl NodeRecord {
    pub fn write_params(&self, params: &mut Params) {
        params.insert("originalLabel".into(), self.original_label.as_str().into());
        params.insert("description".into(), self.description.as_str().into());
        params.insert("properties".into(), self.properties.as_str().into());
        params.insert("schemaVersion".into(), self.version.into());
        params.insert("timestamp".into(), self.timestamp.as_str().into());
    }

    pub fn from_map(map: &BTreeMap<String, Value>) -> std::result::Result<Self, StoreError> {
        Ok(Self {
            original_label: required_str(map, "originalLabel")?,
            description: optional_str(map, "description"),
            properties: optional_str(map, "properties"),
            version: required_version(map)?,
            timestamp: optional_str(map, "timestamp"),
        })
    }

    /// Decoded attributes, with the decode failure if the blob was corrupt.
    pub fn attributes(&self) -> (BTreeMap<String, Attribute>, Option<DecodeError>) {
        decode_blob_or_empty(&self.original_label, &self.properties)
    }
}

/// Stored shape of one declared relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRecord {
    pub original_type: String,
    pub description: String,
    /// Relationship-property blob (JSON text).
    pub properties: String,
    pub version: u64,
    pub timestamp: String,
}

impl RelationshipRecord {
    pub fn write_params(&self, params: &mut Params) {
        params.insert("originalType".into(), self.original_type.as_str().into());
        params.insert("description".into(), self.description.as_str().into());
        params.insert("properties".into(), self.properties.as_str().into());
        params.insert("schemaVersion".into(), self.version.into());
        params.insert("timestamp".into(), self.timestamp.as_str().into());
    }

    pub fn from_map(map: &BTreeMap<String, Value>) -> std::result::Result<Self, StoreError> {
        Ok(Self {
            original_type: required_str(map, "originalType")?,
            description: optional_str(map, "description"),
            properties: optional_str(map, "properties"),
            version: required_version(map)?,
            timestamp: optional_str(map, "timestamp"),
        })
    }

    pub fn properties(&self) -> (BTreeMap<String, RelationshipProperty>, Option<DecodeError>) {
        decode_blob_or_empty(&self.original_type, &self.properties)
    }
}

/// Stored shape of the per-version metadata record.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub version: u64,
    pub timestamp: String,
    pub total_nodes: usize,
    pub total_relationships: usize,
    /// Full serialization of the document, for exact reload.
    pub document: String,
}

impl MetadataRecord {
    pub fn for_document(doc: &SchemaDocument, total_nodes: usize, total_relationships: usize) -> Self {
        Self {
            version: doc.version,
            timestamp: doc.timestamp.clone(),
            total_nodes,
            total_relationships,
            document: encode_document(doc),
        }
    }

    pub fn write_params(&self, params: &mut Params) {
        params.insert("schemaVersion".into(), self.version.into());
        params.insert("timestamp".into(), self.timestamp.as_str().into());
        params.insert("totalNodes".into(), self.total_nodes.into());
        params.insert("totalRelationships".into(), self.total_relationships.into());
        params.insert("document".into(), self.document.as_str().into());
    }

    pub fn from_map(map: &BTreeMap<String, Value>) -> std::result::Result<Self, StoreError> {
        let count = |key: &str| {
            map.get(key)
                .and_then(Value::as_u64)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(0)
        };
        Ok(Self {
            version: required_version(map)?,
            timestamp: optional_str(map, "timestamp"),
            total_nodes: count("totalNodes"),
            total_relationships: count("totalRelationships"),
            document: optional_str(map, "document"),
        })
    }

    /// The embedded document, if present and readable.
    pub fn embedded_document(&self) -> Option<SchemaDocument> {
        if self.document.trim().is_empty() {
            return None;
        }
        match SchemaDocument::from_json(&self.document) {
            Ok(parsed) => Some(parsed.document),
            Err(e) => {
                warn!("Embedded document for version {} is unreadable: {}", self.version, e);
                None
            }
        }
    }
}

pub fn encode_document(doc: &SchemaDocument) -> String {
    serde_json::to_string(doc).expect("SchemaDocument serialization should not fail")
}
