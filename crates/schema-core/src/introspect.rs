//! Live database introspection.
//!
//! Reads labels, relationship types, property keys (typed from one sample
//! value each) and the index/constraint catalog into a [`LiveStructure`].
//! The tool's own records and reserved prefixes are skipped.

use crate::config::SyncConfig;
use crate::document::{Attribute, AttributeType, Relationship, RelationshipProperty};
use crate::live::{LiveNode, LiveStructure};
use crate::store::{column, GraphStoreClient, Statement, Value};
use crate::sync_engine::{Result, Runner, SyncError};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Infer an attribute type from a sampled value.
///
/// Numbers are integers unless they carry a fractional part.
pub fn infer_type(value: &Value) -> AttributeType {
    match value {
        Value::Int(_) => AttributeType::Integer,
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => AttributeType::Integer,
        Value::Float(_) => AttributeType::Float,
        Value::Bool(_) => AttributeType::Boolean,
        Value::List(_) => AttributeType::Array,
        Value::DateTime(_) => AttributeType::Datetime,
        Value::Null | Value::String(_) | Value::Map(_) => AttributeType::String,
    }
}

pub(crate) async fn introspect_live<C: GraphStoreClient + ?Sized>(
    runner: &mut Runner<'_, C>,
    config: &SyncConfig,
) -> Result<LiveStructure> {
    runner.progress("Reading labels");
    let labels = list_column(runner, &Statement::Labels, "labels").await?;
    let mut live = LiveStructure::default();
    for label in labels.into_iter().filter(|l| !config.is_reserved(l)) {
        let mut node = LiveNode::new(&label);
        node.properties = node_properties(runner, &label).await?;
        live.nodes.push(node);
    }
    debug!("Introspected {} labels", live.nodes.len());

    runner.progress("Reading relationship types");
    let rel_types = list_column(runner, &Statement::RelationshipTypes, "types").await?;
    for rel_type in rel_types.into_iter().filter(|t| !config.is_reserved(t)) {
        add_relationship_type(runner, config, &mut live, &rel_type).await?;
    }

    runner.progress("Reading indexes");
    apply_catalog(runner, &mut live, Statement::Indexes).await?;
    runner.progress("Reading constraints");
    apply_catalog(runner, &mut live, Statement::Constraints).await?;

    Ok(live)
}

async fn list_column<C: GraphStoreClient + ?Sized>(
    runner: &Runner<'_, C>,
    statement: &Statement,
    name: &str,
) -> Result<Vec<String>> {
    let rows = runner.execute(statement).await?;
    match rows.first() {
        Some(row) => Ok(column(row, name)
            .map_err(|e| runner.store_error(statement.name(), e))?
            .string_list()),
        None => Ok(Vec::new()),
    }
}

async fn keys<C: GraphStoreClient + ?Sized>(
    runner: &Runner<'_, C>,
    statement: &Statement,
) -> Result<Vec<String>> {
    let rows = runner.execute(statement).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("key").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}

/// Type of one sampled value. A failed sample read falls back to `String`.
async fn sample_type<C: GraphStoreClient + ?Sized>(
    runner: &Runner<'_, C>,
    statement: &Statement,
) -> Result<AttributeType> {
    match runner.execute(statement).await {
        Ok(rows) => Ok(rows
            .first()
            .and_then(|row| row.get("value"))
            .map(infer_type)
            .unwrap_or_default()),
        Err(SyncError::Store { source, .. }) => {
            warn!("Could not sample value ({}): {}", statement.name(), source);
            Ok(AttributeType::String)
        }
        Err(e) => Err(e),
    }
}

async fn node_properties<C: GraphStoreClient + ?Sized>(
    runner: &Runner<'_, C>,
    label: &str,
) -> Result<BTreeMap<String, Attribute>> {
    let mut properties = BTreeMap::new();
    let statement = Statement::NodePropertyKeys {
        label: label.to_string(),
    };
    for key in keys(runner, &statement).await? {
        let sample = Statement::NodePropertySample {
            label: label.to_string(),
            key: key.clone(),
        };
        let attr_type = sample_type(runner, &sample).await?;
        properties.insert(key, Attribute::new(attr_type));
    }
    Ok(properties)
}

async fn relationship_properties<C: GraphStoreClient + ?Sized>(
    runner: &Runner<'_, C>,
    rel_type: &str,
) -> Result<BTreeMap<String, RelationshipProperty>> {
    let mut properties = BTreeMap::new();
    let statement = Statement::RelationshipPropertyKeys {
        rel_type: rel_type.to_string(),
    };
    for key in keys(runner, &statement).await? {
        let sample = Statement::RelationshipPropertySample {
            rel_type: rel_type.to_string(),
            key: key.clone(),
        };
        let prop_type = sample_type(runner, &sample).await?;
        properties.insert(key, RelationshipProperty::new(prop_type.as_str()));
    }
    Ok(properties)
}

/// Attach a relationship type to every live source label it starts from.
///
/// A node type holds one relationship per name, so when a type connects one
/// source to several targets the last observed target wins.
async fn add_relationship_type<C: GraphStoreClient + ?Sized>(
    runner: &Runner<'_, C>,
    config: &SyncConfig,
    live: &mut LiveStructure,
    rel_type: &str,
) -> Result<()> {
    let statement = Statement::RelationshipEndpoints {
        rel_type: rel_type.to_string(),
    };
    let rows = runner.execute(&statement).await?;
    let pairs: Vec<(String, String)> = rows
        .iter()
        .filter_map(|row| {
            let source = row.get("sourceLabel").and_then(Value::as_str)?;
            let target = row.get("targetLabel").and_then(Value::as_str)?;
            Some((source.to_string(), target.to_string()))
        })
        .filter(|(source, target)| !config.is_reserved(source) && !config.is_reserved(target))
        .collect();
    if pairs.is_empty() {
        return Ok(());
    }

    let properties = relationship_properties(runner, rel_type).await?;
    for (source, target) in pairs {
        let Some(node) = live.node_mut(&source) else {
            continue;
        };
        if let Some(previous) = node.relationships.get(rel_type) {
            debug!(
                "{} -[{}]-> {} replaces target {}",
                source, rel_type, target, previous.target
            );
        }
        let mut relationship = Relationship::new(target);
        relationship.properties = properties.clone();
        node.relationships.insert(rel_type.to_string(), relationship);
    }
    Ok(())
}

/// Mark indexed/unique attributes from the index or constraint catalog.
///
/// Every label and property a catalog entry names is marked, so composite
/// entries cover all their properties. Indexes set `indexed`; only
/// uniqueness constraints set `unique`. Catalog read failures are logged and
/// ignored.
async fn apply_catalog<C: GraphStoreClient + ?Sized>(
    runner: &Runner<'_, C>,
    live: &mut LiveStructure,
    statement: Statement,
) -> Result<()> {
    let is_constraints = matches!(statement, Statement::Constraints);
    let rows = match runner.execute(&statement).await {
        Ok(rows) => rows,
        Err(e @ SyncError::Connectivity { .. }) => return Err(e),
        Err(e) => {
            warn!("Could not read {}: {}", statement.name(), e);
            return Ok(());
        }
    };

    for row in rows {
        if is_constraints {
            let unique = row
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t.to_ascii_lowercase().contains("unique"));
            if !unique {
                continue;
            }
        }
        let labels = row.get("labelsOrTypes").map(Value::string_list).unwrap_or_default();
        let properties = row.get("properties").map(Value::string_list).unwrap_or_default();

        for label in &labels {
            let Some(node) = live.node_mut(label) else {
                continue;
            };
            for property in &properties {
                let Some(attr) = node.properties.get_mut(property) else {
                    continue;
                };
                if is_constraints {
                    attr.unique = true;
                } else {
                    attr.indexed = true;
                }
            }
        }
    }
    Ok(())
}
