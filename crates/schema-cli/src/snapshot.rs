//! Live data snapshots.
//!
//! A snapshot is a JSON file describing sample graph data. It is loaded into an
//! [`InMemoryGraphStore`] so the file commands run introspection and generation
//! through the same protocol a database-backed client would.
//!
//! ```json
//! {
//!   "nodes": [{"label": "Person", "properties": {"name": "Alice", "age": 41}}],
//!   "relationships": [{"type": "KNOWS", "source": 0, "target": 0, "properties": {}}],
//!   "indexes": [{"label": "Person", "property": "name"}],
//!   "constraints": [{"label": "Person", "property": "email"}]
//! }
//! ```

use schema_core::{InMemoryGraphStore, Value};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Failed to read snapshot {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Relationship {index} refers to node {node}, but only {count} nodes exist")]
    UnknownNode {
        index: usize,
        node: usize,
        count: usize,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotNode {
    pub label: String,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotRelationship {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub source: usize,
    pub target: usize,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotIndex {
    pub label: String,
    pub property: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub nodes: Vec<SnapshotNode>,
    #[serde(default)]
    pub relationships: Vec<SnapshotRelationship>,
    #[serde(default)]
    pub indexes: Vec<SnapshotIndex>,
    /// Unique constraints.
    #[serde(default)]
    pub constraints: Vec<SnapshotIndex>,
}

/// Convert a JSON value to a store value. Whole numbers become `Int`.
pub fn store_value(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(store_value).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), store_value(v)))
                .collect(),
        ),
    }
}

impl Snapshot {
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn read(path: &Path) -> Result<Self, SnapshotError> {
        let text = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Populate a fresh in-memory store with this data.
    pub fn into_store(self) -> Result<InMemoryGraphStore, SnapshotError> {
        let store = InMemoryGraphStore::new();
        let count = self.nodes.len();

        let ids: Vec<usize> = self
            .nodes
            .iter()
            .map(|node| {
                store.add_data_node(
                    &node.label,
                    node.properties
                        .iter()
                        .map(|(k, v)| (k.clone(), store_value(v))),
                )
            })
            .collect();

        for (index, rel) in self.relationships.iter().enumerate() {
            let endpoint = |node: usize| {
                ids.get(node)
                    .copied()
                    .ok_or(SnapshotError::UnknownNode { index, node, count })
            };
            store.add_data_relationship(
                &rel.rel_type,
                endpoint(rel.source)?,
                endpoint(rel.target)?,
                rel.properties
                    .iter()
                    .map(|(k, v)| (k.clone(), store_value(v))),
            );
        }

        for index in &self.indexes {
            store.add_index(&index.label, &index.property);
        }
        for constraint in &self.constraints {
            store.add_unique_constraint(&constraint.label, &constraint.property);
        }
        Ok(store)
    }
}
