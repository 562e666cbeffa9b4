//! Live structure: what the database actually contains, and how a schema
//! document compares against it.
//!
//! The live side decides what exists; the document decides what things mean.
//! A live comparison therefore only ever reports elements missing on one side,
//! never removals.

use crate::document::{Attribute, AttributeType, NodeType, Relationship, SchemaDocument};
use serde::Serialize;
use std::collections::BTreeMap;

/// Description given to elements merged in from the live database.
pub const AUTO_DISCOVERED: &str = "Auto-discovered from database";

/// One label as observed in live data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveNode {
    pub label: String,
    /// Property name -> inferred type plus index/constraint flags.
    pub properties: BTreeMap<String, Attribute>,
    /// Relationship type -> observed target and property types.
    pub relationships: BTreeMap<String, Relationship>,
}

impl LiveNode {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }
}

/// Introspected structure of the live database.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveStructure {
    pub nodes: Vec<LiveNode>,
}

impl LiveStructure {
    pub fn node(&self, label: &str) -> Option<&LiveNode> {
        self.nodes.iter().find(|n| n.label == label)
    }

    pub fn node_mut(&mut self, label: &str) -> Option<&mut LiveNode> {
        self.nodes.iter_mut().find(|n| n.label == label)
    }

    /// Assemble a fresh document at version 1 with generated descriptions.
    pub fn to_document(&self) -> SchemaDocument {
        let mut doc = SchemaDocument::new("Complete schema generated from database");
        for live in &self.nodes {
            let mut node = NodeType::new(&live.label);
            node.description = format!(
                "Node type for label {} - Generated from database schema",
                live.label
            );
            for (name, attr) in &live.properties {
                let mut attribute = attr.clone();
                attribute.description = property_description(name, attr);
                node.attributes.insert(name.clone(), attribute);
            }
            for (name, rel) in &live.relationships {
                let mut relationship = rel.clone();
                relationship.description = format!("Relationship {} to {}", name, rel.target);
                for (key, prop) in relationship.properties.iter_mut() {
                    prop.description =
                        format!("Relationship property {} of type {}", key, prop.prop_type);
                }
                node.relationships.insert(name.clone(), relationship);
            }
            doc.node_types.push(node);
        }
        doc
    }
}

fn property_description(name: &str, attr: &Attribute) -> String {
    let mut description = format!("Property {} of type {}", name, attr.attr_type);
    if attr.indexed {
        description.push_str(" (indexed)");
    }
    if attr.unique {
        description.push_str(" (unique)");
    }
    description
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingNode {
    pub label: String,
    pub properties: Vec<String>,
    pub relationships: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingProperty {
    pub node: String,
    pub property: String,
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingRelationship {
    pub source: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MissingInSchema {
    pub nodes: Vec<MissingNode>,
    pub properties: Vec<MissingProperty>,
    pub relationships: Vec<MissingRelationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingInDbNode {
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MissingInDb {
    pub nodes: Vec<MissingInDbNode>,
}

/// Result of comparing a document against the live database.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveComparison {
    pub missing_in_schema: MissingInSchema,
    pub missing_in_db: MissingInDb,
}

impl LiveComparison {
    pub fn total(&self) -> usize {
        self.missing_in_schema.nodes.len()
            + self.missing_in_schema.properties.len()
            + self.missing_in_schema.relationships.len()
            + self.missing_in_db.nodes.len()
    }

    pub fn in_sync(&self) -> bool {
        self.total() == 0
    }

    /// Whether [`apply_additions`] would change anything.
    pub fn has_additions(&self) -> bool {
        !self.missing_in_schema.nodes.is_empty()
            || !self.missing_in_schema.properties.is_empty()
            || !self.missing_in_schema.relationships.is_empty()
    }
}

/// Compare a document against the live structure.
pub fn compare_with_actual(schema: &SchemaDocument, live: &LiveStructure) -> LiveComparison {
    let mut result = LiveComparison::default();

    for live_node in &live.nodes {
        let Some(schema_node) = schema.node(&live_node.label) else {
            result.missing_in_schema.nodes.push(MissingNode {
                label: live_node.label.clone(),
                properties: live_node.properties.keys().cloned().collect(),
                relationships: live_node.relationships.keys().cloned().collect(),
            });
            continue;
        };

        for (name, attr) in &live_node.properties {
            if !schema_node.attributes.contains_key(name) {
                result.missing_in_schema.properties.push(MissingProperty {
                    node: live_node.label.clone(),
                    property: name.clone(),
                    attr_type: attr.attr_type,
                });
            }
        }

        for (name, rel) in &live_node.relationships {
            if !schema_node.relationships.contains_key(name) {
                result.missing_in_schema.relationships.push(MissingRelationship {
                    source: live_node.label.clone(),
                    rel_type: name.clone(),
                    target: rel.target.clone(),
                });
            }
        }
    }

    for node in &schema.node_types {
        if live.node(&node.label).is_none() {
            result.missing_in_db.nodes.push(MissingInDbNode {
                label: node.label.clone(),
            });
        }
    }

    result
}

/// Merge the live elements a comparison found missing into the document.
///
/// Nothing is removed and existing elements are left untouched. Returns the
/// number of elements added.
pub fn apply_additions(
    schema: &mut SchemaDocument,
    live: &LiveStructure,
    comparison: &LiveComparison,
) -> usize {
    let mut added = 0;

    for missing in &comparison.missing_in_schema.nodes {
        let Some(live_node) = live.node(&missing.label) else {
            continue;
        };
        if schema.node(&missing.label).is_some() {
            continue;
        }
        let mut node = NodeType::new(&live_node.label);
        node.description = AUTO_DISCOVERED.to_string();
        node.attributes = live_node.properties.clone();
        node.relationships = live_node.relationships.clone();
        schema.node_types.push(node);
        added += 1;
    }

    for missing in &comparison.missing_in_schema.properties {
        let Some(node) = schema.node_mut(&missing.node) else {
            continue;
        };
        if node.attributes.contains_key(&missing.property) {
            continue;
        }
        let mut attribute = Attribute::new(missing.attr_type);
        attribute.description = AUTO_DISCOVERED.to_string();
        node.attributes.insert(missing.property.clone(), attribute);
        added += 1;
    }

    for missing in &comparison.missing_in_schema.relationships {
        let Some(rel) = live
            .node(&missing.source)
            .and_then(|n| n.relationships.get(&missing.rel_type))
        else {
            continue;
        };
        let Some(node) = schema.node_mut(&missing.source) else {
            continue;
        };
        if node.relationships.contains_key(&missing.rel_type) {
            continue;
        }
        node.relationships
            .insert(missing.rel_type.clone(), rel.clone());
        added += 1;
    }

    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::RelationshipProperty;

    fn live() -> LiveStructure {
        let mut person = LiveNode::new("Person");
        person
            .properties
            .insert("name".into(), Attribute::new(AttributeType::String));
        let mut email = Attribute::new(AttributeType::String);
        email.indexed = true;
        email.unique = true;
        person.properties.insert("email".into(), email);
        let mut knows = Relationship::new("Person");
        knows
            .properties
            .insert("since".into(), RelationshipProperty::new("integer"));
        person.relationships.insert("KNOWS".into(), knows);

        let mut city = LiveNode::new("City");
        city.properties
            .insert("population".into(), Attribute::new(AttributeType::Integer));

        LiveStructure {
            nodes: vec![person, city],
        }
    }

    fn schema() -> SchemaDocument {
        let mut doc = SchemaDocument::new("test");
        let mut person = NodeType::new("Person");
        person.description = "A human".into();
        person
            .attributes
            .insert("name".into(), Attribute::new(AttributeType::String));
        doc.node_types.push(person);
        doc.node_types.push(NodeType::new("Legacy"));
        doc
    }

    #[test]
    fn test_compare_with_actual_buckets() {
        let result = compare_with_actual(&schema(), &live());

        assert_eq!(result.missing_in_schema.nodes.len(), 1);
        assert_eq!(result.missing_in_schema.nodes[0].label, "City");
        assert_eq!(result.missing_in_schema.nodes[0].properties, vec!["population"]);

        assert_eq!(result.missing_in_schema.properties.len(), 1);
        assert_eq!(result.missing_in_schema.properties[0].property, "email");

        assert_eq!(result.missing_in_schema.relationships.len(), 1);
        assert_eq!(result.missing_in_schema.relationships[0].target, "Person");

        assert_eq!(result.missing_in_db.nodes, vec![MissingInDbNode { label: "Legacy".into() }]);
        assert_eq!(result.total(), 4);
    }

    #[test]
    fn test_live_diff_never_removes_schema_elements() {
        let mut doc = schema();
        let live = live();
        let comparison = compare_with_actual(&doc, &live);

        let added = apply_additions(&mut doc, &live, &comparison);
        assert_eq!(added, 3);

        // Schema-only node survives, schema description wins for shared nodes.
        assert!(doc.node("Legacy").is_some());
        let person = doc.node("Person").unwrap();
        assert_eq!(person.description, "A human");
        assert_eq!(person.attributes["email"].description, AUTO_DISCOVERED);
        assert!(person.relationships.contains_key("KNOWS"));
        assert_eq!(doc.node("City").unwrap().description, AUTO_DISCOVERED);

        let again = compare_with_actual(&doc, &live);
        assert!(!again.has_additions());
        assert_eq!(again.missing_in_db.nodes.len(), 1);
    }

    #[test]
    fn test_to_document_generates_descriptions() {
        let doc = live().to_document();

        assert_eq!(doc.version, 1);
        let person = doc.node("Person").unwrap();
        assert_eq!(
            person.description,
            "Node type for label Person - Generated from database schema"
        );
        assert_eq!(
            person.attributes["email"].description,
            "Property email of type string (indexed) (unique)"
        );
        assert_eq!(person.relationships["KNOWS"].description, "Relationship KNOWS to Person");
        assert_eq!(
            person.relationships["KNOWS"].properties["since"].description,
            "Relationship property since of type integer"
        );
    }

    #[test]
    fn test_serialized_buckets_are_camel_case() {
        let json = serde_json::to_value(compare_with_actual(&schema(), &live())).unwrap();
        assert!(json["missingInSchema"]["nodes"].is_array());
        assert_eq!(json["missingInSchema"]["properties"][0]["type"], "string");
        assert_eq!(json["missingInDb"]["nodes"][0]["label"], "Legacy");
    }
}
