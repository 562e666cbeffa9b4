//! SchemaDocument: the human-editable description of a graph's structure.
//!
//! A document holds an ordered list of node types. Each node type carries:
//! - `attributes`: name -> [`Attribute`] (typed, optionally indexed/unique)
//! - `relationships`: name -> [`Relationship`] (one per name, toward a target label)
//!
//! Every field is fully populated on read. Missing or `null` fields fall back to
//! their defaults during deserialization, and attribute/relationship maps are
//! accepted in both the canonical map shape and the legacy `[{name, ...}]` list
//! shape (see [`crate::codec::PropertyMap`]).

use crate::codec::PropertyMap;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document shape itself is wrong (e.g. `node_types` missing).
    #[error("Invalid schema structure: {0}")]
    Structure(String),

    /// An edit or document violates an invariant. Nothing was mutated.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No schema document loaded")]
    NoDocument,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchemaError>;

/// Current time as an ISO-8601 string (UTC, millisecond precision).
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The fixed attribute type vocabulary. Unknown names read as `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum AttributeType {
    #[default]
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Datetime,
}

impl AttributeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeType::String => "string",
            AttributeType::Integer => "integer",
            AttributeType::Float => "float",
            AttributeType::Boolean => "boolean",
            AttributeType::Array => "array",
            AttributeType::Datetime => "datetime",
        }
    }
}

impl Display for AttributeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "integer" => AttributeType::Integer,
            "float" => AttributeType::Float,
            "boolean" => AttributeType::Boolean,
            "array" => AttributeType::Array,
            "datetime" => AttributeType::Datetime,
            _ => AttributeType::String,
        })
    }
}

impl From<String> for AttributeType {
    fn from(s: String) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// A typed property declared on a node type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawAttribute")]
pub struct Attribute {
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    pub indexed: bool,
    pub unique: bool,
    pub description: String,
}

impl Attribute {
    pub fn new(attr_type: AttributeType) -> Self {
        Self {
            attr_type,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAttribute {
    #[serde(rename = "type")]
    attr_type: Option<String>,
    indexed: Option<bool>,
    unique: Option<bool>,
    description: Option<String>,
}

impl From<RawAttribute> for Attribute {
    fn from(raw: RawAttribute) -> Self {
        Self {
            attr_type: raw.attr_type.map(AttributeType::from).unwrap_or_default(),
            indexed: raw.indexed.unwrap_or(false),
            unique: raw.unique.unwrap_or(false),
            description: raw.description.unwrap_or_default(),
        }
    }
}

/// A property carried by a relationship. Its type is free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawRelationshipProperty")]
pub struct RelationshipProperty {
    #[serde(rename = "type")]
    pub prop_type: String,
    pub description: String,
}

impl RelationshipProperty {
    pub fn new(prop_type: impl Into<String>) -> Self {
        Self {
            prop_type: prop_type.into(),
            description: String::new(),
        }
    }
}

impl Default for RelationshipProperty {
    fn default() -> Self {
        Self::new(AttributeType::String.as_str())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRelationshipProperty {
    #[serde(rename = "type")]
    prop_type: Option<String>,
    description: Option<String>,
}

impl From<RawRelationshipProperty> for RelationshipProperty {
    fn from(raw: RawRelationshipProperty) -> Self {
        Self {
            prop_type: raw
                .prop_type
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| AttributeType::String.as_str().to_string()),
            description: raw.description.unwrap_or_default(),
        }
    }
}

/// A typed, directed relationship declared on a node type.
///
/// `target` need not name a node type in the same document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawRelationship")]
pub struct Relationship {
    pub target: String,
    pub description: String,
    pub properties: BTreeMap<String, RelationshipProperty>,
}

impl Relationship {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRelationship {
    #[serde(alias = "target_node")]
    target: Option<String>,
    description: Option<String>,
    properties: Option<PropertyMap<RelationshipProperty>>,
}

impl From<RawRelationship> for Relationship {
    fn from(raw: RawRelationship) -> Self {
        Self {
            target: raw.target.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            properties: raw.properties.map(PropertyMap::into_map).unwrap_or_default(),
        }
    }
}

/// A node type (label) with its attributes and outgoing relationships.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawNodeType")]
pub struct NodeType {
    pub label: String,
    pub description: String,
    pub attributes: BTreeMap<String, Attribute>,
    pub relationships: BTreeMap<String, Relationship>,
}

impl NodeType {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNodeType {
    label: Option<String>,
    description: Option<String>,
    attributes: Option<PropertyMap<Attribute>>,
    relationships: Option<PropertyMap<Relationship>>,
}

impl From<RawNodeType> for NodeType {
    fn from(raw: RawNodeType) -> Self {
        Self {
            label: raw.label.unwrap_or_default(),
            description: raw.description.unwrap_or_default(),
            attributes: raw.attributes.map(PropertyMap::into_map).unwrap_or_default(),
            relationships: raw
                .relationships
                .map(PropertyMap::into_map)
                .unwrap_or_default(),
        }
    }
}

/// The versioned schema document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaDocument {
    pub version: u64,
    pub timestamp: String,
    pub description: String,
    pub node_types: Vec<NodeType>,
}

/// Result of reading a document from structured text.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub document: SchemaDocument,
    /// True when `version` or `timestamp` were missing and had to be defaulted.
    pub defaulted: bool,
}

/// Check the outer document shape: `node_types` must be present and a sequence.
pub fn validate(value: &serde_json::Value) -> Result<()> {
    match value.get("node_types") {
        Some(serde_json::Value::Array(_)) => Ok(()),
        Some(_) => Err(SchemaError::Structure("node_types is not a sequence".into())),
        None => Err(SchemaError::Structure("missing node_types".into())),
    }
}

impl SchemaDocument {
    /// Create an empty document at version 1.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            version: 1,
            timestamp: now_timestamp(),
            description: description.into(),
            node_types: Vec::new(),
        }
    }

    /// Parse a document from a JSON value.
    ///
    /// Fails with [`SchemaError::Structure`] if `node_types` is missing or not a
    /// sequence. A missing/non-positive `version` becomes 1 and a missing
    /// `timestamp` becomes now; either default sets `defaulted`.
    pub fn from_value(value: &serde_json::Value) -> Result<ParsedDocument> {
        validate(value)?;

        let mut defaulted = false;
        let version = match value.get("version").and_then(serde_json::Value::as_u64) {
            Some(v) if v > 0 => v,
            _ => {
                defaulted = true;
                1
            }
        };
        let timestamp = match value.get("timestamp").and_then(serde_json::Value::as_str) {
            Some(ts) => ts.to_string(),
            None => {
                defaulted = true;
                now_timestamp()
            }
        };
        let description = value
            .get("description")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();

        let node_types: Vec<NodeType> = serde_json::from_value(value["node_types"].clone())?;

        Ok(ParsedDocument {
            document: Self {
                version,
                timestamp,
                description,
                node_types,
            },
            defaulted,
        })
    }

    /// Parse a document from JSON text.
    pub fn from_json(text: &str) -> Result<ParsedDocument> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).expect("SchemaDocument serialization should not fail")
    }

    /// Check label/name invariants.
    pub fn check_invariants(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.node_types {
            if node.label.trim().is_empty() {
                return Err(SchemaError::Validation("node type with empty label".into()));
            }
            if !seen.insert(node.label.as_str()) {
                return Err(SchemaError::Validation(format!(
                    "duplicate node type label '{}'",
                    node.label
                )));
            }
            if node.attributes.keys().any(|name| name.trim().is_empty()) {
                return Err(SchemaError::Validation(format!(
                    "node type '{}' has an attribute with an empty name",
                    node.label
                )));
            }
            for (name, rel) in &node.relationships {
                if name.trim().is_empty() {
                    return Err(SchemaError::Validation(format!(
                        "node type '{}' has a relationship with an empty name",
                        node.label
                    )));
                }
                if rel.properties.keys().any(|p| p.trim().is_empty()) {
                    return Err(SchemaError::Validation(format!(
                        "relationship '{}' on '{}' has a property with an empty name",
                        name, node.label
                    )));
                }
                if rel.target.trim().is_empty() {
                    warn!("Relationship {} on {} has no target", name, node.label);
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, label: &str) -> Option<&NodeType> {
        self.node_types.iter().find(|n| n.label == label)
    }

    pub fn node_mut(&mut self, label: &str) -> Option<&mut NodeType> {
        self.node_types.iter_mut().find(|n| n.label == label)
    }

    /// Total declared relationships across all node types.
    pub fn relationship_count(&self) -> usize {
        self.node_types.iter().map(|n| n.relationships.len()).sum()
    }

    /// Total declared attributes across all node types.
    pub fn attribute_count(&self) -> usize {
        self.node_types.iter().map(|n| n.attributes.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_requires_node_types() {
        assert!(matches!(
            validate(&json!({"version": 1})),
            Err(SchemaError::Structure(_))
        ));
        assert!(matches!(
            validate(&json!({"node_types": {"a": 1}})),
            Err(SchemaError::Structure(_))
        ));
        assert!(validate(&json!({"node_types": []})).is_ok());
    }

    #[test]
    fn test_attribute_defaults_are_applied() {
        let parsed = SchemaDocument::from_value(&json!({
            "version": 2,
            "timestamp": "2024-01-01T00:00:00.000Z",
            "node_types": [{
                "label": "Person",
                "attributes": {
                    "name": {},
                    "age": {"type": "integer", "indexed": null},
                    "mood": {"type": "vibes"}
                }
            }]
        }))
        .unwrap();

        assert!(!parsed.defaulted);
        let person = parsed.document.node("Person").unwrap();
        assert_eq!(person.description, "");
        assert_eq!(person.attributes["name"], Attribute::default());
        assert_eq!(person.attributes["age"].attr_type, AttributeType::Integer);
        assert!(!person.attributes["age"].indexed);
        assert_eq!(person.attributes["mood"].attr_type, AttributeType::String);
    }

    #[test]
    fn test_missing_version_and_timestamp_are_defaulted() {
        let parsed = SchemaDocument::from_json(r#"{"node_types": []}"#).unwrap();
        assert!(parsed.defaulted);
        assert_eq!(parsed.document.version, 1);
        assert!(!parsed.document.timestamp.is_empty());
    }

    #[test]
    fn test_legacy_list_shapes_are_accepted() {
        let parsed = SchemaDocument::from_value(&json!({
            "version": 1,
            "timestamp": "t",
            "node_types": [{
                "label": "Person",
                "attributes": [{"name": "email", "unique": true}],
                "relationships": [{"name": "KNOWS", "target_node": "Person"}]
            }]
        }))
        .unwrap();

        let person = parsed.document.node("Person").unwrap();
        assert!(person.attributes["email"].unique);
        assert_eq!(person.relationships["KNOWS"].target, "Person");
    }

    #[test]
    fn test_check_invariants_rejects_duplicate_labels() {
        let mut doc = SchemaDocument::new("test");
        doc.node_types.push(NodeType::new("Person"));
        doc.node_types.push(NodeType::new("Person"));

        assert!(matches!(
            doc.check_invariants(),
            Err(SchemaError::Validation(_))
        ));
    }

    #[test]
    fn test_null_label_is_an_invariant_violation() {
        let parsed = SchemaDocument::from_value(&json!({
            "version": 1,
            "timestamp": "t",
            "node_types": [{"label": null, "description": "unnamed"}, {"description": "no label"}]
        }))
        .unwrap();

        assert_eq!(parsed.document.node_types.len(), 2);
        assert_eq!(parsed.document.node_types[0].label, "");
        assert!(matches!(
            parsed.document.check_invariants(),
            Err(SchemaError::Validation(_))
        ));
    }

    #[test]
    fn test_dangling_relationship_target_is_tolerated() {
        let mut doc = SchemaDocument::new("test");
        let mut person = NodeType::new("Person");
        person
            .relationships
            .insert("WORKS_AT".into(), Relationship::new("Company"));
        doc.node_types.push(person);

        assert!(doc.check_invariants().is_ok());
        assert_eq!(doc.relationship_count(), 1);
    }

    #[test]
    fn test_serialized_shape_uses_type_key() {
        let attr = Attribute::new(AttributeType::Datetime);
        let json = serde_json::to_value(&attr).unwrap();
        assert_eq!(json["type"], "datetime");
        assert_eq!(json["indexed"], false);
    }
}
