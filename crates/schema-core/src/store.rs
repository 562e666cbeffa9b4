//! GraphStoreClient trait: the seam between the synchronization protocol and
//! whatever actually talks to the graph database.
//!
//! Implementations:
//! - `InMemoryGraphStore` - For testing (see [`crate::memory_store`])
//! - A driver-backed client, outside this crate, that runs [`Statement::text`]
//!   with [`Statement::params`]
//!
//! Statements are a closed set of typed queries rather than free-form text so
//! that every query shape has a matching row decoder.

use crate::codec::{MetadataRecord, NodeRecord, RelationshipRecord};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Label carried by every record this tool stores.
pub const SCHEMA_LABEL: &str = "_SchemaRegistry";
/// Relationship type linking stored node records.
pub const SCHEMA_RELATIONSHIP: &str = "_SCHEMA_RELATIONSHIP";

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Transport unreachable or authentication refused.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Query failed: {0}")]
    Query(String),

    /// A returned record did not have the columns/types the statement promises.
    #[error("Unexpected record shape: {0}")]
    Shape(String),
}

impl StoreError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A value as returned by the store: scalars, lists, or nested property maps.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(DateTime<FixedOffset>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view. Floats without a fractional part count as integers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|n| u64::try_from(n).ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// JSON view for reports. Datetimes become RFC 3339 strings and
    /// non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => serde_json::Value::String(dt.to_rfc3339()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// List of strings, skipping non-string items.
    pub fn string_list(&self) -> Vec<String> {
        self.as_list()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// One returned row: column name -> value.
pub type Record = BTreeMap<String, Value>;

/// Named statement parameters.
pub type Params = BTreeMap<String, Value>;

/// Fetch a required column from a record.
pub fn column<'a>(record: &'a Record, name: &str) -> Result<&'a Value> {
    record
        .get(name)
        .ok_or_else(|| StoreError::Shape(format!("missing column '{}'", name)))
}

/// Fetch a required map-valued column (a node or relationship's properties).
pub fn map_column<'a>(record: &'a Record, name: &str) -> Result<&'a BTreeMap<String, Value>> {
    column(record, name)?
        .as_map()
        .ok_or_else(|| StoreError::Shape(format!("column '{}' is not a property map", name)))
}

/// Every query the protocol issues, one variant per query shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Columns: `nodeCount`, `maxVersion`.
    SchemaSummary,
    /// Column `meta` (map); at most one row, the highest stored version.
    LatestMetadata,
    /// Removes every stored schema record.
    ClearSchema,
    /// Column `nodeId`.
    CreateNodeRecord(NodeRecord),
    CreateRelationshipRecord {
        source_id: i64,
        target_id: i64,
        record: RelationshipRecord,
    },
    CreateMetadataRecord(MetadataRecord),
    /// Column `n` (map), ordered by `originalLabel`.
    NodeRecords { version: u64 },
    /// Columns `source`, `target`, `r` (maps).
    RelationshipRecords { version: u64 },
    /// Column `updated` (count of records touched).
    PatchNodeRecord {
        version: u64,
        label: String,
        description: String,
        properties: String,
        timestamp: String,
    },
    /// Column `updated`.
    PatchRelationshipRecord {
        version: u64,
        source: String,
        rel_type: String,
        target: String,
        description: String,
        properties: String,
        timestamp: String,
    },
    /// Column `updated`.
    PatchMetadataDocument { version: u64, document: String },
    /// Column `labels` (list).
    Labels,
    /// Column `types` (list).
    RelationshipTypes,
    /// Rows with column `key`: every key used on any node with the label.
    NodePropertyKeys { label: String },
    /// At most one row with column `value`.
    NodePropertySample { label: String, key: String },
    /// Rows with columns `sourceLabel`, `targetLabel`.
    RelationshipEndpoints { rel_type: String },
    /// Rows with column `key`: every key used on any relationship of the type.
    RelationshipPropertyKeys { rel_type: String },
    /// At most one row with column `value`.
    RelationshipPropertySample { rel_type: String, key: String },
    /// Column `n` (map): properties of up to `limit` nodes with the label.
    SampleNodes { label: String, limit: usize },
    /// Column `value`: up to `limit` distinct non-null values of one property.
    SampleAttributeValues {
        label: String,
        key: String,
        limit: usize,
    },
    /// Columns `sourceName`, `relType`, `targetName`, `targetLabel` for up to
    /// `limit` relationships. `target` narrows the far end to one label.
    SampleRelationships {
        source: String,
        rel_type: String,
        target: Option<String>,
        limit: usize,
    },
    /// Rows with columns `labelsOrTypes`, `properties`, `type`.
    Indexes,
    /// Rows with columns `labelsOrTypes`, `properties`, `type`.
    Constraints,
}

/// Quote an identifier for interpolation into query text.
fn quote(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

impl Statement {
    /// Short name used in logs and error context.
    pub fn name(&self) -> &'static str {
        match self {
            Statement::SchemaSummary => "schema_summary",
            Statement::LatestMetadata => "latest_metadata",
            Statement::ClearSchema => "clear_schema",
            Statement::CreateNodeRecord(_) => "create_node_record",
            Statement::CreateRelationshipRecord { .. } => "create_relationship_record",
            Statement::CreateMetadataRecord(_) => "create_metadata_record",
            Statement::NodeRecords { .. } => "node_records",
            Statement::RelationshipRecords { .. } => "relationship_records",
            Statement::PatchNodeRecord { .. } => "patch_node_record",
            Statement::PatchRelationshipRecord { .. } => "patch_relationship_record",
            Statement::PatchMetadataDocument { .. } => "patch_metadata_document",
            Statement::Labels => "labels",
            Statement::RelationshipTypes => "relationship_types",
            Statement::NodePropertyKeys { .. } => "node_property_keys",
            Statement::NodePropertySample { .. } => "node_property_sample",
            Statement::RelationshipEndpoints { .. } => "relationship_endpoints",
            Statement::RelationshipPropertyKeys { .. } => "relationship_property_keys",
            Statement::RelationshipPropertySample { .. } => "relationship_property_sample",
            Statement::SampleNodes { .. } => "sample_nodes",
            Statement::SampleAttributeValues { .. } => "sample_attribute_values",
            Statement::SampleRelationships { .. } => "sample_relationships",
            Statement::Indexes => "indexes",
            Statement::Constraints => "constraints",
        }
    }

    /// Whether running this statement changes stored state.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Statement::ClearSchema
                | Statement::CreateNodeRecord(_)
                | Statement::CreateRelationshipRecord { .. }
                | Statement::CreateMetadataRecord(_)
                | Statement::PatchNodeRecord { .. }
                | Statement::PatchRelationshipRecord { .. }
                | Statement::PatchMetadataDocument { .. }
        )
    }

    /// Cypher text for driver-backed clients.
    pub fn text(&self) -> String {
        let schema = quote(SCHEMA_LABEL);
        let link = quote(SCHEMA_RELATIONSHIP);
        match self {
            Statement::SchemaSummary => format!(
                "MATCH (n:{schema}) RETURN count(n) AS nodeCount, max(n.schemaVersion) AS maxVersion"
            ),
            Statement::LatestMetadata => format!(
                "MATCH (meta:{schema} {{nodeType: 'metadata'}}) \
                 RETURN meta ORDER BY meta.schemaVersion DESC LIMIT 1"
            ),
            Statement::ClearSchema => format!("MATCH (n:{schema}) DETACH DELETE n"),
            Statement::CreateNodeRecord(_) => format!(
                "CREATE (n:{schema} {{originalLabel: $originalLabel, nodeType: 'node', \
                 description: $description, properties: $properties, createdAt: $timestamp, \
                 schemaVersion: $schemaVersion, timestamp: $timestamp}}) RETURN id(n) AS nodeId"
            ),
            Statement::CreateRelationshipRecord { .. } => format!(
                "MATCH (source:{schema}), (target:{schema}) \
                 WHERE id(source) = $sourceId AND id(target) = $targetId \
                 CREATE (source)-[r:{link} {{originalType: $originalType, properties: $properties, \
                 description: $description, createdAt: $timestamp, schemaVersion: $schemaVersion, \
                 timestamp: $timestamp}}]->(target)"
            ),
            Statement::CreateMetadataRecord(_) => format!(
                "CREATE (meta:{schema} {{nodeType: 'metadata', schemaVersion: $schemaVersion, \
                 timestamp: $timestamp, totalNodes: $totalNodes, \
                 totalRelationships: $totalRelationships, document: $document}})"
            ),
            Statement::NodeRecords { .. } => format!(
                "MATCH (n:{schema} {{nodeType: 'node'}}) WHERE n.schemaVersion = $version \
                 RETURN n ORDER BY n.originalLabel"
            ),
            Statement::RelationshipRecords { .. } => format!(
                "MATCH (source:{schema} {{nodeType: 'node'}})-[r:{link}]->(target:{schema} {{nodeType: 'node'}}) \
                 WHERE r.schemaVersion = $version RETURN source, target, r"
            ),
            Statement::PatchNodeRecord { .. } => format!(
                "MATCH (n:{schema} {{nodeType: 'node', originalLabel: $label}}) \
                 WHERE n.schemaVersion = $version \
                 SET n.description = $description, n.properties = $properties, n.updatedAt = $timestamp \
                 RETURN count(n) AS updated"
            ),
            Statement::PatchRelationshipRecord { .. } => format!(
                "MATCH (source:{schema} {{nodeType: 'node', originalLabel: $source}})\
                 -[r:{link} {{originalType: $relType}}]->\
                 (target:{schema} {{nodeType: 'node', originalLabel: $target}}) \
                 WHERE r.schemaVersion = $version \
                 SET r.description = $description, r.properties = $properties, r.updatedAt = $timestamp \
                 RETURN count(r) AS updated"
            ),
            Statement::PatchMetadataDocument { .. } => format!(
                "MATCH (meta:{schema} {{nodeType: 'metadata'}}) WHERE meta.schemaVersion = $version \
                 SET meta.document = $document RETURN count(meta) AS updated"
            ),
            Statement::Labels => "CALL db.labels() YIELD label RETURN collect(label) AS labels".into(),
            Statement::RelationshipTypes => "CALL db.relationshipTypes() YIELD relationshipType \
                 RETURN collect(relationshipType) AS types"
                .into(),
            Statement::NodePropertyKeys { label } => format!(
                "MATCH (n:{}) UNWIND keys(n) AS key RETURN DISTINCT key ORDER BY key",
                quote(label)
            ),
            Statement::NodePropertySample { label, .. } => format!(
                "MATCH (n:{}) WHERE n[$key] IS NOT NULL RETURN n[$key] AS value LIMIT 1",
                quote(label)
            ),
            Statement::RelationshipEndpoints { rel_type } => format!(
                "MATCH (a)-[r:{}]->(b) \
                 RETURN DISTINCT labels(a)[0] AS sourceLabel, labels(b)[0] AS targetLabel",
                quote(rel_type)
            ),
            Statement::RelationshipPropertyKeys { rel_type } => format!(
                "MATCH ()-[r:{}]->() UNWIND keys(r) AS key RETURN DISTINCT key ORDER BY key",
                quote(rel_type)
            ),
            Statement::RelationshipPropertySample { rel_type, .. } => format!(
                "MATCH ()-[r:{}]->() WHERE r[$key] IS NOT NULL RETURN r[$key] AS value LIMIT 1",
                quote(rel_type)
            ),
            Statement::SampleNodes { label, .. } => format!(
                "MATCH (n:{}) RETURN properties(n) AS n LIMIT $limit",
                quote(label)
            ),
            Statement::SampleAttributeValues { label, .. } => format!(
                "MATCH (n:{}) WHERE n[$key] IS NOT NULL RETURN DISTINCT n[$key] AS value LIMIT $limit",
                quote(label)
            ),
            Statement::SampleRelationships {
                source,
                rel_type,
                target,
                ..
            } => {
                let far = match target {
                    Some(target) => format!("(b:{})", quote(target)),
                    None => "(b)".to_string(),
                };
                format!(
                    "MATCH (a:{})-[r:{}]->{} \
                     RETURN a.name AS sourceName, type(r) AS relType, b.name AS targetName, \
                     labels(b)[0] AS targetLabel LIMIT $limit",
                    quote(source),
                    quote(rel_type),
                    far
                )
            }
            Statement::Indexes => {
                "SHOW INDEXES YIELD labelsOrTypes, properties, type RETURN labelsOrTypes, properties, type"
                    .into()
            }
            Statement::Constraints => {
                "SHOW CONSTRAINTS YIELD labelsOrTypes, properties, type RETURN labelsOrTypes, properties, type"
                    .into()
            }
        }
    }

    /// Parameters bound to [`Statement::text`].
    pub fn params(&self) -> Params {
        let mut params = Params::new();
        match self {
            Statement::CreateNodeRecord(record) => record.write_params(&mut params),
            Statement::CreateRelationshipRecord {
                source_id,
                target_id,
                record,
            } => {
                params.insert("sourceId".into(), Value::Int(*source_id));
                params.insert("targetId".into(), Value::Int(*target_id));
                record.write_params(&mut params);
            }
            Statement::CreateMetadataRecord(record) => record.write_params(&mut params),
            Statement::NodeRecords { version } | Statement::RelationshipRecords { version } => {
                params.insert("version".into(), (*version).into());
            }
            Statement::PatchNodeRecord {
                version,
                label,
                description,
                properties,
                timestamp,
            } => {
                params.insert("version".into(), (*version).into());
                params.insert("label".into(), label.as_str().into());
                params.insert("description".into(), description.as_str().into());
                params.insert("properties".into(), properties.as_str().into());
                params.insert("timestamp".into(), timestamp.as_str().into());
            }
            Statement::PatchRelationshipRecord {
                version,
                source,
                rel_type,
                target,
                description,
                properties,
                timestamp,
            } => {
                params.insert("version".into(), (*version).into());
                params.insert("source".into(), source.as_str().into());
                params.insert("relType".into(), rel_type.as_str().into());
                params.insert("target".into(), target.as_str().into());
                params.insert("description".into(), description.as_str().into());
                params.insert("properties".into(), properties.as_str().into());
                params.insert("timestamp".into(), timestamp.as_str().into());
            }
            Statement::PatchMetadataDocument { version, document } => {
                params.insert("version".into(), (*version).into());
                params.insert("document".into(), document.as_str().into());
            }
            Statement::NodePropertySample { key, .. }
            | Statement::RelationshipPropertySample { key, .. } => {
                params.insert("key".into(), key.as_str().into());
            }
            Statement::SampleNodes { limit, .. } | Statement::SampleRelationships { limit, .. } => {
                params.insert("limit".into(), (*limit).into());
            }
            Statement::SampleAttributeValues { key, limit, .. } => {
                params.insert("key".into(), key.as_str().into());
                params.insert("limit".into(), (*limit).into());
            }
            Statement::SchemaSummary
            | Statement::LatestMetadata
            | Statement::ClearSchema
            | Statement::Labels
            | Statement::RelationshipTypes
            | Statement::NodePropertyKeys { .. }
            | Statement::RelationshipEndpoints { .. }
            | Statement::RelationshipPropertyKeys { .. }
            | Statement::Indexes
            | Statement::Constraints => {}
        }
        params
    }
}

/// Capability to run statements against the graph store.
///
/// Statements are issued strictly one at a time; later statements often
/// depend on identifiers returned by earlier ones.
#[async_trait]
pub trait GraphStoreClient: Send + Sync {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Record>>;
}

#[async_trait]
impl<T: GraphStoreClient + ?Sized> GraphStoreClient for Arc<T> {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Record>> {
        (**self).execute(statement).await
    }
}
