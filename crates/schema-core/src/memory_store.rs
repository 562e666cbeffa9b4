//! In-memory graph store for testing.
//!
//! Holds two independent worlds:
//! - stored schema records (what [`Statement::CreateNodeRecord`] and friends write)
//! - a fixture of live data nodes and relationships that introspection reads
//!
//! Every executed statement is logged, and failures can be injected per
//! statement name or for the whole store.

use crate::store::{
    GraphStoreClient, Params, Record, Result, Statement, StoreError, Value, SCHEMA_LABEL,
    SCHEMA_RELATIONSHIP,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::Duration;

type Props = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
struct StoredRelationship {
    source: i64,
    target: i64,
    props: Props,
}

#[derive(Debug, Clone)]
struct DataNode {
    labels: Vec<String>,
    props: Props,
}

#[derive(Debug, Clone)]
struct DataRelationship {
    rel_type: String,
    source: usize,
    target: usize,
    props: Props,
}

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    /// Stored schema records by id, nodes and metadata alike.
    records: BTreeMap<i64, Props>,
    links: Vec<StoredRelationship>,
    data_nodes: Vec<DataNode>,
    data_relationships: Vec<DataRelationship>,
    indexes: Vec<Record>,
    constraints: Vec<Record>,
    log: Vec<&'static str>,
    failures: HashMap<&'static str, StoreError>,
    unavailable: bool,
    delay: Option<Duration>,
}

/// In-memory [`GraphStoreClient`] for tests.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<State>,
}

fn props_of(params: Params, extra: &[(&str, Value)]) -> Props {
    let mut props = params;
    for (key, value) in extra {
        props.insert((*key).to_string(), value.clone());
    }
    props
}

fn str_prop<'a>(props: &'a Props, key: &str) -> Option<&'a str> {
    props.get(key).and_then(Value::as_str)
}

fn version_of(props: &Props) -> Option<u64> {
    props.get("schemaVersion").and_then(Value::as_u64)
}

fn row(columns: impl IntoIterator<Item = (&'static str, Value)>) -> Record {
    columns
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- live data fixture ---

    /// Add a live data node; returns its index for [`Self::add_data_relationship`].
    pub fn add_data_node<I, K>(&self, label: &str, props: I) -> usize
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut state = self.state.write().unwrap();
        state.data_nodes.push(DataNode {
            labels: vec![label.to_string()],
            props: props.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        });
        state.data_nodes.len() - 1
    }

    pub fn add_data_relationship<I, K>(&self, rel_type: &str, source: usize, target: usize, props: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut state = self.state.write().unwrap();
        state.data_relationships.push(DataRelationship {
            rel_type: rel_type.to_string(),
            source,
            target,
            props: props.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        });
    }

    pub fn add_index(&self, label: &str, property: &str) {
        self.add_composite_index(label, &[property]);
    }

    pub fn add_composite_index(&self, label: &str, properties: &[&str]) {
        let mut state = self.state.write().unwrap();
        state.indexes.push(row([
            ("labelsOrTypes", Value::from(vec![label])),
            ("properties", Value::from(properties.to_vec())),
            ("type", Value::from("RANGE")),
        ]));
    }

    pub fn add_unique_constraint(&self, label: &str, property: &str) {
        self.add_constraint(label, &[property], "UNIQUENESS");
    }

    /// Add a constraint of any kind, e.g. `UNIQUENESS` or `NODE_PROPERTY_EXISTENCE`.
    pub fn add_constraint(&self, label: &str, properties: &[&str], kind: &str) {
        let mut state = self.state.write().unwrap();
        state.constraints.push(row([
            ("labelsOrTypes", Value::from(vec![label])),
            ("properties", Value::from(properties.to_vec())),
            ("type", Value::from(kind)),
        ]));
    }

    // --- failure injection ---

    /// Fail every execution of the named statement (see [`Statement::name`]).
    pub fn fail_on(&self, statement: &'static str, error: StoreError) {
        self.state
            .write()
            .unwrap()
            .failures
            .insert(statement, error);
    }

    pub fn clear_failures(&self) {
        self.state.write().unwrap().failures.clear();
    }

    /// Refuse every statement as if the transport were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unwrap().unavailable = unavailable;
    }

    /// Delay every statement, for timeout tests.
    pub fn set_delay(&self, delay: Duration) {
        self.state.write().unwrap().delay = Some(delay);
    }

    // --- inspection ---

    /// Names of all statements executed so far, in order.
    pub fn statements(&self) -> Vec<&'static str> {
        self.state.read().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.write().unwrap().log.clear();
    }

    /// Number of write statements executed so far.
    pub fn write_count(&self) -> usize {
        self.statements()
            .iter()
            .filter(|name| {
                name.starts_with("create_") || name.starts_with("patch_") || **name == "clear_schema"
            })
            .count()
    }

    pub fn max_version(&self) -> Option<u64> {
        self.state
            .read()
            .unwrap()
            .records
            .values()
            .filter_map(version_of)
            .max()
    }

    /// Stored node records (not metadata).
    pub fn node_record_count(&self) -> usize {
        self.state
            .read()
            .unwrap()
            .records
            .values()
            .filter(|p| str_prop(p, "nodeType") == Some("node"))
            .count()
    }

    pub fn relationship_record_count(&self) -> usize {
        self.state.read().unwrap().links.len()
    }

    /// Properties of the stored node record for `label`, if any.
    pub fn node_record(&self, label: &str) -> Option<Props> {
        self.state
            .read()
            .unwrap()
            .records
            .values()
            .find(|p| str_prop(p, "nodeType") == Some("node") && str_prop(p, "originalLabel") == Some(label))
            .cloned()
    }

    /// Overwrite one property on the stored node record for `label`.
    pub fn set_node_record_property(&self, label: &str, key: &str, value: Value) {
        let mut state = self.state.write().unwrap();
        if let Some(props) = state
            .records
            .values_mut()
            .find(|p| str_prop(p, "nodeType") == Some("node") && str_prop(p, "originalLabel") == Some(label))
        {
            props.insert(key.to_string(), value);
        }
    }

    /// Properties of the newest metadata record.
    pub fn latest_metadata(&self) -> Option<Props> {
        let state = self.state.read().unwrap();
        Self::latest_metadata_in(&state).cloned()
    }

    fn latest_metadata_in(state: &State) -> Option<&Props> {
        state
            .records
            .values()
            .filter(|p| str_prop(p, "nodeType") == Some("metadata"))
            .max_by_key(|p| version_of(p).unwrap_or(0))
    }

    fn insert_record(state: &mut State, props: Props) -> i64 {
        state.next_id += 1;
        let id = state.next_id;
        state.records.insert(id, props);
        id
    }

    fn record_value(state: &State, id: i64) -> Value {
        state
            .records
            .get(&id)
            .map(|p| Value::Map(p.clone()))
            .unwrap_or(Value::Null)
    }

    fn data_nodes_with<'a>(state: &'a State, label: &'a str) -> impl Iterator<Item = &'a DataNode> {
        state
            .data_nodes
            .iter()
            .filter(move |n| n.labels.iter().any(|l| l == label))
    }

    fn data_relationships_of<'a>(
        state: &'a State,
        rel_type: &'a str,
    ) -> impl Iterator<Item = &'a DataRelationship> {
        state
            .data_relationships
            .iter()
            .filter(move |r| r.rel_type == rel_type)
    }

    fn sorted_keys<'a>(props: impl Iterator<Item = &'a Props>) -> Vec<Record> {
        let keys: BTreeSet<&String> = props.flat_map(|p| p.keys()).collect();
        keys.into_iter()
            .map(|k| row([("key", Value::from(k.as_str()))]))
            .collect()
    }

    fn first_value<'a>(mut props: impl Iterator<Item = &'a Props>, key: &str) -> Vec<Record> {
        props
            .find_map(|p| p.get(key).filter(|v| !v.is_null()))
            .map(|v| vec![row([("value", v.clone())])])
            .unwrap_or_default()
    }

    fn run(state: &mut State, statement: &Statement) -> Result<Vec<Record>> {
        let rows = match statement {
            Statement::SchemaSummary => {
                let max = state.records.values().filter_map(version_of).max();
                vec![row([
                    ("nodeCount", Value::from(state.records.len())),
                    ("maxVersion", max.map(Value::from).unwrap_or(Value::Null)),
                ])]
            }
            Statement::LatestMetadata => Self::latest_metadata_in(state)
                .map(|p| vec![row([("meta", Value::Map(p.clone()))])])
                .unwrap_or_default(),
            Statement::ClearSchema => {
                state.records.clear();
                state.links.clear();
                Vec::new()
            }
            Statement::CreateNodeRecord(record) => {
                let timestamp = Value::from(record.timestamp.as_str());
                let props = props_of(
                    statement.params(),
                    &[("nodeType", Value::from("node")), ("createdAt", timestamp)],
                );
                let id = Self::insert_record(state, props);
                vec![row([("nodeId", Value::Int(id))])]
            }
            Statement::CreateRelationshipRecord {
                source_id,
                target_id,
                record,
            } => {
                if state.records.contains_key(source_id) && state.records.contains_key(target_id) {
                    let mut props = statement.params();
                    props.remove("sourceId");
                    props.remove("targetId");
                    props.insert("createdAt".into(), Value::from(record.timestamp.as_str()));
                    state.links.push(StoredRelationship {
                        source: *source_id,
                        target: *target_id,
                        props,
                    });
                }
                Vec::new()
            }
            Statement::CreateMetadataRecord(_) => {
                let props = props_of(statement.params(), &[("nodeType", Value::from("metadata"))]);
                Self::insert_record(state, props);
                Vec::new()
            }
            Statement::NodeRecords { version } => {
                let mut nodes: Vec<&Props> = state
                    .records
                    .values()
                    .filter(|p| str_prop(p, "nodeType") == Some("node") && version_of(p) == Some(*version))
                    .collect();
                nodes.sort_by_key(|p| str_prop(p, "originalLabel").unwrap_or_default().to_string());
                nodes
                    .into_iter()
                    .map(|p| row([("n", Value::Map(p.clone()))]))
                    .collect()
            }
            Statement::RelationshipRecords { version } => {
                let state: &State = state;
                state
                .links
                .iter()
                .filter(|l| version_of(&l.props) == Some(*version))
                .map(|l| {
                    row([
                        ("source", Self::record_value(state, l.source)),
                        ("target", Self::record_value(state, l.target)),
                        ("r", Value::Map(l.props.clone())),
                    ])
                })
                .collect()
            }
            Statement::PatchNodeRecord {
                version,
                label,
                description,
                properties,
                timestamp,
            } => {
                let mut updated = 0usize;
                for props in state.records.values_mut() {
                    if str_prop(props, "nodeType") == Some("node")
                        && str_prop(props, "originalLabel") == Some(label.as_str())
                        && version_of(props) == Some(*version)
                    {
                        props.insert("description".into(), Value::from(description.as_str()));
                        props.insert("properties".into(), Value::from(properties.as_str()));
                        props.insert("updatedAt".into(), Value::from(timestamp.as_str()));
                        updated += 1;
                    }
                }
                vec![row([("updated", Value::from(updated))])]
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
                let records = &state.records;
                let label_is = |id: i64, label: &str| {
                    records
                        .get(&id)
                        .and_then(|p| str_prop(p, "originalLabel"))
                        == Some(label)
                };
                let mut updated = 0usize;
                for link in state.links.iter_mut() {
                    if label_is(link.source, source)
                        && label_is(link.target, target)
                        && str_prop(&link.props, "originalType") == Some(rel_type.as_str())
                        && version_of(&link.props) == Some(*version)
                    {
                        link.props
                            .insert("description".into(), Value::from(description.as_str()));
                        link.props
                            .insert("properties".into(), Value::from(properties.as_str()));
                        link.props
                            .insert("updatedAt".into(), Value::from(timestamp.as_str()));
                        updated += 1;
                    }
                }
                vec![row([("updated", Value::from(updated))])]
            }
            Statement::PatchMetadataDocument { version, document } => {
                let mut updated = 0usize;
                for props in state.records.values_mut() {
                    if str_prop(props, "nodeType") == Some("metadata") && version_of(props) == Some(*version) {
                        props.insert("document".into(), Value::from(document.as_str()));
                        updated += 1;
                    }
                }
                vec![row([("updated", Value::from(updated))])]
            }
            Statement::Labels => {
                let mut labels: Vec<String> = Vec::new();
                for node in &state.data_nodes {
                    for label in &node.labels {
                        if !labels.contains(label) {
                            labels.push(label.clone());
                        }
                    }
                }
                if !state.records.is_empty() {
                    labels.push(SCHEMA_LABEL.to_string());
                }
                vec![row([("labels", Value::from(labels))])]
            }
            Statement::RelationshipTypes => {
                let mut types: Vec<String> = Vec::new();
                for rel in &state.data_relationships {
                    if !types.contains(&rel.rel_type) {
                        types.push(rel.rel_type.clone());
                    }
                }
                if !state.links.is_empty() {
                    types.push(SCHEMA_RELATIONSHIP.to_string());
                }
                vec![row([("types", Value::from(types))])]
            }
            Statement::NodePropertyKeys { label } => {
                Self::sorted_keys(Self::data_nodes_with(state, label).map(|n| &n.props))
            }
            Statement::NodePropertySample { label, key } => {
                Self::first_value(Self::data_nodes_with(state, label).map(|n| &n.props), key)
            }
            Statement::RelationshipEndpoints { rel_type } => {
                let state: &State = state;
                let mut pairs: Vec<(String, String)> = Vec::new();
                for rel in Self::data_relationships_of(state, rel_type) {
                    let first_label = |index: usize| {
                        state
                            .data_nodes
                            .get(index)
                            .and_then(|n| n.labels.first())
                            .cloned()
                    };
                    if let (Some(source), Some(target)) = (first_label(rel.source), first_label(rel.target)) {
                        if !pairs.contains(&(source.clone(), target.clone())) {
                            pairs.push((source, target));
                        }
                    }
                }
                pairs
                    .into_iter()
                    .map(|(s, t)| row([("sourceLabel", Value::from(s)), ("targetLabel", Value::from(t))]))
                    .collect()
            }
            Statement::RelationshipPropertyKeys { rel_type } => {
                Self::sorted_keys(Self::data_relationships_of(state, rel_type).map(|r| &r.props))
            }
            Statement::RelationshipPropertySample { rel_type, key } => Self::first_value(
                Self::data_relationships_of(state, rel_type).map(|r| &r.props),
                key,
            ),
            Statement::SampleNodes { label, limit } => Self::data_nodes_with(state, label)
                .take(*limit)
                .map(|n| row([("n", Value::Map(n.props.clone()))]))
                .collect(),
            Statement::SampleAttributeValues { label, key, limit } => {
                let mut values: Vec<Value> = Vec::new();
                for node in Self::data_nodes_with(state, label) {
                    if values.len() >= *limit {
                        break;
                    }
                    if let Some(value) = node.props.get(key).filter(|v| !v.is_null()) {
                        if !values.contains(value) {
                            values.push(value.clone());
                        }
                    }
                }
                values
                    .into_iter()
                    .map(|v| row([("value", v)]))
                    .collect()
            }
            Statement::SampleRelationships {
                source,
                rel_type,
                target,
                limit,
            } => {
                let state: &State = state;
                let has_label = |node: &DataNode, label: &str| node.labels.iter().any(|l| l == label);
                Self::data_relationships_of(state, rel_type)
                    .filter_map(|rel| {
                        let from = state.data_nodes.get(rel.source)?;
                        let to = state.data_nodes.get(rel.target)?;
                        let matches = has_label(from, source)
                            && target.as_deref().is_none_or(|t| has_label(to, t));
                        matches.then_some((from, to))
                    })
                    .take(*limit)
                    .map(|(from, to)| {
                        let name = |node: &DataNode| node.props.get("name").cloned().unwrap_or(Value::Null);
                        row([
                            ("sourceName", name(from)),
                            ("relType", Value::from(rel_type.as_str())),
                            ("targetName", name(to)),
                            (
                                "targetLabel",
                                to.labels.first().cloned().map(Value::from).unwrap_or(Value::Null),
                            ),
                        ])
                    })
                    .collect()
            }
            Statement::Indexes => state.indexes.clone(),
            Statement::Constraints => state.constraints.clone(),
        };
        Ok(rows)
    }
}

#[async_trait]
impl GraphStoreClient for InMemoryGraphStore {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Record>> {
        let delay = self.state.read().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        state.log.push(statement.name());
        if state.unavailable {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        if let Some(error) = state.failures.get(statement.name()) {
            return Err(error.clone());
        }
        Self::run(&mut state, statement)
    }
}
