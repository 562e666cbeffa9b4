//! Diff engine: structural comparison between two schema documents.
//!
//! Differences are emitted in passes. The node pass lists additions (in the
//! order of the second document), then removals (in the order of the first),
//! then description changes of shared nodes. The attribute pass and then the
//! relationship pass follow, each walking the shared nodes in that same order.
//!
//! Relationships are matched by `name-target`, so a retargeted or renamed
//! relationship shows up as a removal plus an addition.

use crate::document::{validate, Attribute, NodeType, Relationship, SchemaDocument};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DifferenceKind {
    Addition,
    Removal,
    Modification,
    Error,
}

impl DifferenceKind {
    fn marker(&self) -> &'static str {
        match self {
            DifferenceKind::Addition => "+",
            DifferenceKind::Removal => "-",
            DifferenceKind::Modification => "~",
            DifferenceKind::Error => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DifferenceCategory {
    Node,
    Attribute,
    Relationship,
    /// The input itself could not be compared.
    Structure,
}

/// Payload of a difference, one shape per kind of change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DifferenceDetails {
    #[serde(rename_all = "camelCase")]
    Node { node_label: String, node: NodeType },

    #[serde(rename_all = "camelCase")]
    NodeField {
        node_label: String,
        field: String,
        old_value: Value,
        new_value: Value,
    },

    #[serde(rename_all = "camelCase")]
    Attribute {
        node_label: String,
        attribute_name: String,
        attribute: Attribute,
    },

    #[serde(rename_all = "camelCase")]
    AttributeField {
        node_label: String,
        attribute_name: String,
        field: String,
        old_value: Value,
        new_value: Value,
    },

    #[serde(rename_all = "camelCase")]
    Relationship {
        node_label: String,
        relationship_name: String,
        relationship: Relationship,
    },

    #[serde(rename_all = "camelCase")]
    RelationshipField {
        node_label: String,
        relationship_name: String,
        target: String,
        field: String,
        old_value: Value,
        new_value: Value,
    },

    Invalid { reason: String },
}

impl DifferenceDetails {
    pub fn node_label(&self) -> Option<&str> {
        match self {
            DifferenceDetails::Node { node_label, .. }
            | DifferenceDetails::NodeField { node_label, .. }
            | DifferenceDetails::Attribute { node_label, .. }
            | DifferenceDetails::AttributeField { node_label, .. }
            | DifferenceDetails::Relationship { node_label, .. }
            | DifferenceDetails::RelationshipField { node_label, .. } => Some(node_label),
            DifferenceDetails::Invalid { .. } => None,
        }
    }

    /// The changed field, for modifications.
    pub fn field(&self) -> Option<&str> {
        match self {
            DifferenceDetails::NodeField { field, .. }
            | DifferenceDetails::AttributeField { field, .. }
            | DifferenceDetails::RelationshipField { field, .. } => Some(field),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Difference {
    #[serde(rename = "type")]
    pub kind: DifferenceKind,
    pub category: DifferenceCategory,
    pub message: String,
    pub details: DifferenceDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub total_differences: usize,
    pub node_changes: usize,
    pub attribute_changes: usize,
    pub relationship_changes: usize,
}

/// Identification of one side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SideInfo {
    pub name: String,
    pub version: Option<u64>,
    pub timestamp: Option<String>,
    pub node_count: usize,
}

impl SideInfo {
    fn of(name: &str, doc: &SchemaDocument) -> Self {
        Self {
            name: name.to_string(),
            version: Some(doc.version),
            timestamp: Some(doc.timestamp.clone()),
            node_count: doc.node_types.len(),
        }
    }

    fn of_value(name: &str, value: &Value) -> Self {
        Self {
            name: name.to_string(),
            version: value.get("version").and_then(Value::as_u64),
            timestamp: value
                .get("timestamp")
                .and_then(Value::as_str)
                .map(str::to_string),
            node_count: value
                .get("node_types")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub schema1: SideInfo,
    pub schema2: SideInfo,
    pub compared_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub identical: bool,
    pub differences: Vec<Difference>,
    pub summary: DiffSummary,
    pub metadata: ReportMetadata,
}

impl ComparisonReport {
    fn build(differences: Vec<Difference>, schema1: SideInfo, schema2: SideInfo) -> Self {
        let count = |category| differences.iter().filter(|d| d.category == category).count();
        let summary = DiffSummary {
            node_changes: count(DifferenceCategory::Node),
            attribute_changes: count(DifferenceCategory::Attribute),
            relationship_changes: count(DifferenceCategory::Relationship),
            total_differences: differences
                .iter()
                .filter(|d| d.category != DifferenceCategory::Structure)
                .count(),
        };
        Self {
            identical: differences.is_empty(),
            differences,
            summary,
            metadata: ReportMetadata {
                schema1,
                schema2,
                compared_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            },
        }
    }

    pub fn by_category(&self, category: DifferenceCategory) -> impl Iterator<Item = &Difference> {
        self.differences.iter().filter(move |d| d.category == category)
    }

    pub fn is_error(&self) -> bool {
        self.differences
            .iter()
            .any(|d| d.kind == DifferenceKind::Error)
    }
}

impl Display for ComparisonReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let side = |info: &SideInfo| match info.version {
            Some(v) => format!("{} (v{})", info.name, v),
            None => info.name.clone(),
        };
        writeln!(
            f,
            "Schema comparison: {} vs {}",
            side(&self.metadata.schema1),
            side(&self.metadata.schema2)
        )?;

        if self.identical {
            return writeln!(f, "Schemas are identical.");
        }

        writeln!(
            f,
            "{} differences: {} node, {} attribute, {} relationship",
            self.summary.total_differences,
            self.summary.node_changes,
            self.summary.attribute_changes,
            self.summary.relationship_changes
        )?;
        for diff in &self.differences {
            writeln!(f, "  [{}] {}", diff.kind.marker(), diff.message)?;
        }
        Ok(())
    }
}

/// Compare two documents. The report describes how to get from `a` to `b`.
pub fn compare(a: &SchemaDocument, b: &SchemaDocument) -> ComparisonReport {
    compare_labeled(a, "Schema 1", b, "Schema 2")
}

/// [`compare`] with caller-supplied names for the report metadata.
pub fn compare_labeled(
    a: &SchemaDocument,
    name_a: &str,
    b: &SchemaDocument,
    name_b: &str,
) -> ComparisonReport {
    let differences = Comparator::new(a, b).run();
    ComparisonReport::build(differences, SideInfo::of(name_a, a), SideInfo::of(name_b, b))
}

/// Compare two raw JSON documents.
///
/// If either side is not a schema document the report holds exactly one
/// `Error` difference and is not identical. This never fails.
pub fn compare_values(a: &Value, name_a: &str, b: &Value, name_b: &str) -> ComparisonReport {
    let parsed = validate(a)
        .and_then(|_| validate(b))
        .and_then(|_| Ok((SchemaDocument::from_value(a)?, SchemaDocument::from_value(b)?)));

    match parsed {
        Ok((a, b)) => compare_labeled(&a.document, name_a, &b.document, name_b),
        Err(e) => {
            let error = Difference {
                kind: DifferenceKind::Error,
                category: DifferenceCategory::Structure,
                message: format!("Invalid schema structure: {}", e),
                details: DifferenceDetails::Invalid {
                    reason: e.to_string(),
                },
            };
            let mut report = ComparisonReport::build(
                vec![error],
                SideInfo::of_value(name_a, a),
                SideInfo::of_value(name_b, b),
            );
            report.identical = false;
            report
        }
    }
}

struct Comparator<'a> {
    a: &'a SchemaDocument,
    b: &'a SchemaDocument,
    a_nodes: HashMap<&'a str, &'a NodeType>,
    b_nodes: HashMap<&'a str, &'a NodeType>,
    differences: Vec<Difference>,
}

impl<'a> Comparator<'a> {
    fn new(a: &'a SchemaDocument, b: &'a SchemaDocument) -> Self {
        let index = |doc: &'a SchemaDocument| {
            doc.node_types
                .iter()
                .map(|n| (n.label.as_str(), n))
                .collect::<HashMap<_, _>>()
        };
        Self {
            a,
            b,
            a_nodes: index(a),
            b_nodes: index(b),
            differences: Vec::new(),
        }
    }

    /// Node pairs present on both sides, in first-document order.
    fn shared(&self) -> Vec<(&'a NodeType, &'a NodeType)> {
        self.a
            .node_types
            .iter()
            .filter_map(|old| self.b_nodes.get(old.label.as_str()).map(|new| (old, *new)))
            .collect()
    }

    fn push(
        &mut self,
        kind: DifferenceKind,
        category: DifferenceCategory,
        message: String,
        details: DifferenceDetails,
    ) {
        self.differences.push(Difference {
            kind,
            category,
            message,
            details,
        });
    }

    fn run(mut self) -> Vec<Difference> {
        self.node_pass();
        let shared = self.shared();
        for (old, new) in &shared {
            self.attribute_pass(old, new);
        }
        for (old, new) in &shared {
            self.relationship_pass(old, new);
        }
        self.differences
    }

    fn node_pass(&mut self) {
        for node in &self.b.node_types {
            if !self.a_nodes.contains_key(node.label.as_str()) {
                self.push(
                    DifferenceKind::Addition,
                    DifferenceCategory::Node,
                    format!("Node type '{}' was added", node.label),
                    DifferenceDetails::Node {
                        node_label: node.label.clone(),
                        node: node.clone(),
                    },
                );
            }
        }

        for node in &self.a.node_types {
            if !self.b_nodes.contains_key(node.label.as_str()) {
                self.push(
                    DifferenceKind::Removal,
                    DifferenceCategory::Node,
                    format!("Node type '{}' was removed", node.label),
                    DifferenceDetails::Node {
                        node_label: node.label.clone(),
                        node: node.clone(),
                    },
                );
            }
        }

        for (old, new) in self.shared() {
            if old.description != new.description {
                self.push(
                    DifferenceKind::Modification,
                    DifferenceCategory::Node,
                    format!("Node '{}' description changed", old.label),
                    DifferenceDetails::NodeField {
                        node_label: old.label.clone(),
                        field: "description".into(),
                        old_value: json!(old.description),
                        new_value: json!(new.description),
                    },
                );
            }
        }
    }

    fn attribute_pass(&mut self, old: &NodeType, new: &NodeType) {
        let label = &old.label;

        for (name, attribute) in &new.attributes {
            if !old.attributes.contains_key(name) {
                self.push(
                    DifferenceKind::Addition,
                    DifferenceCategory::Attribute,
                    format!("Attribute '{}' was added to node '{}'", name, label),
                    DifferenceDetails::Attribute {
                        node_label: label.clone(),
                        attribute_name: name.clone(),
                        attribute: attribute.clone(),
                    },
                );
            }
        }

        for (name, attribute) in &old.attributes {
            if !new.attributes.contains_key(name) {
                self.push(
                    DifferenceKind::Removal,
                    DifferenceCategory::Attribute,
                    format!("Attribute '{}' was removed from node '{}'", name, label),
                    DifferenceDetails::Attribute {
                        node_label: label.clone(),
                        attribute_name: name.clone(),
                        attribute: attribute.clone(),
                    },
                );
            }
        }

        for (name, before) in &old.attributes {
            let Some(after) = new.attributes.get(name) else {
                continue;
            };
            for (field, old_value, new_value) in attribute_field_changes(before, after) {
                self.push(
                    DifferenceKind::Modification,
                    DifferenceCategory::Attribute,
                    format!("Attribute '{}' in node '{}': {} changed", name, label, field),
                    DifferenceDetails::AttributeField {
                        node_label: label.clone(),
                        attribute_name: name.clone(),
                        field: field.to_string(),
                        old_value,
                        new_value,
                    },
                );
            }
        }
    }

    fn relationship_pass(&mut self, old: &NodeType, new: &NodeType) {
        let label = &old.label;
        let old_rels = keyed_relationships(old);
        let new_rels = keyed_relationships(new);

        for (key, (name, rel)) in &new_rels {
            if !old_rels.contains_key(key) {
                self.push(
                    DifferenceKind::Addition,
                    DifferenceCategory::Relationship,
                    format!(
                        "Relationship '{}' to '{}' was added to node '{}'",
                        name, rel.target, label
                    ),
                    DifferenceDetails::Relationship {
                        node_label: label.clone(),
                        relationship_name: name.to_string(),
                        relationship: (*rel).clone(),
                    },
                );
            }
        }

        for (key, (name, rel)) in &old_rels {
            if !new_rels.contains_key(key) {
                self.push(
                    DifferenceKind::Removal,
                    DifferenceCategory::Relationship,
                    format!(
                        "Relationship '{}' to '{}' was removed from node '{}'",
                        name, rel.target, label
                    ),
                    DifferenceDetails::Relationship {
                        node_label: label.clone(),
                        relationship_name: name.to_string(),
                        relationship: (*rel).clone(),
                    },
                );
            }
        }

        for (key, (name, before)) in &old_rels {
            let Some((_, after)) = new_rels.get(key) else {
                continue;
            };
            if before.description != after.description {
                self.push(
                    DifferenceKind::Modification,
                    DifferenceCategory::Relationship,
                    format!(
                        "Relationship '{}' to '{}' in node '{}': description changed",
                        name, before.target, label
                    ),
                    DifferenceDetails::RelationshipField {
                        node_label: label.clone(),
                        relationship_name: name.to_string(),
                        target: before.target.clone(),
                        field: "description".into(),
                        old_value: json!(before.description),
                        new_value: json!(after.description),
                    },
                );
            }
        }
    }
}

fn keyed_relationships(node: &NodeType) -> BTreeMap<String, (&str, &Relationship)> {
    node.relationships
        .iter()
        .map(|(name, rel)| (format!("{}-{}", name, rel.target), (name.as_str(), rel)))
        .collect()
}

fn attribute_field_changes(before: &Attribute, after: &Attribute) -> Vec<(&'static str, Value, Value)> {
    let mut changes = Vec::new();
    if before.attr_type != after.attr_type {
        changes.push((
            "type",
            json!(before.attr_type.as_str()),
            json!(after.attr_type.as_str()),
        ));
    }
    if before.indexed != after.indexed {
        changes.push(("indexed", json!(before.indexed), json!(after.indexed)));
    }
    if before.unique != after.unique {
        changes.push(("unique", json!(before.unique), json!(after.unique)));
    }
    if before.description != after.description {
        changes.push((
            "description",
            json!(before.description),
            json!(after.description),
        ));
    }
    changes
}
