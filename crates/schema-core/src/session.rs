//! EditorSession: one schema document, its change ledger, and what is known
//! about the store it synchronizes with.
//!
//! Edits validate first and mutate second, so a rejected edit leaves the
//! document untouched. Every accepted edit refreshes the document timestamp,
//! marks the session modified and records the field change in the ledger.
//! Edits that add or remove stored records (node types, relationships) also
//! mark the structure as changed, which forces the next save to be a full one.

use crate::config::SyncConfig;
use crate::diff::{compare_labeled, ComparisonReport};
use crate::document::{
    now_timestamp, Attribute, AttributeType, NodeType, ParsedDocument, Relationship,
    RelationshipProperty, Result, SchemaDocument, SchemaError,
};
use crate::events::{EventBus, SessionEvent};
use crate::file::{export_document, ExportedFile};
use crate::ledger::{ChangeEntry, ChangeLedger, ChangeScope, RelationshipKey};
use crate::live::{apply_additions, compare_with_actual, LiveComparison, LiveStructure};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
pub struct EditorSession {
    pub(crate) document: Option<SchemaDocument>,
    pub(crate) ledger: ChangeLedger,
    pub(crate) last_known_remote_version: Option<u64>,
    pub(crate) modified: bool,
    pub(crate) structure_changed: bool,
    pub(crate) config: SyncConfig,
    pub(crate) events: Arc<EventBus>,
    next_operation_id: u64,
}

impl Default for EditorSession {
    fn default() -> Self {
        Self::new()
    }
}

fn require_name(kind: &str, name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SchemaError::Validation(format!("{} name must not be empty", kind)));
    }
    Ok(name.to_string())
}

impl EditorSession {
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            document: None,
            ledger: ChangeLedger::new(),
            last_known_remote_version: None,
            modified: false,
            structure_changed: false,
            config,
            events: Arc::new(EventBus::new()),
            next_operation_id: 0,
        }
    }

    pub fn document(&self) -> Option<&SchemaDocument> {
        self.document.as_ref()
    }

    pub fn ledger(&self) -> &ChangeLedger {
        &self.ledger
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SyncConfig) {
        self.config = config;
    }

    /// Version of the store as of the last successful save or load.
    pub fn last_known_remote_version(&self) -> Option<u64> {
        self.last_known_remote_version
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether an edit since the last sync added or removed stored elements.
    pub fn has_structural_changes(&self) -> bool {
        self.structure_changed
    }

    pub(crate) fn next_operation_id(&mut self) -> u64 {
        self.next_operation_id += 1;
        self.next_operation_id
    }

    /// Replace the document with one of unknown relation to the store.
    ///
    /// The ledger is dropped; the next save is a full structural save.
    pub fn replace_document(&mut self, doc: SchemaDocument) {
        self.document = Some(doc);
        self.ledger.clear();
        self.modified = false;
        self.structure_changed = true;
    }

    /// Replace the document with one that matches the store.
    pub(crate) fn replace_synced(&mut self, doc: SchemaDocument) {
        self.last_known_remote_version = Some(doc.version);
        self.document = Some(doc);
        self.ledger.clear();
        self.modified = false;
        self.structure_changed = false;
    }

    /// Load a document from JSON text.
    ///
    /// Defaulted `version`/`timestamp` count as a modification.
    pub fn import_json(&mut self, text: &str) -> Result<ParsedDocument> {
        let parsed = SchemaDocument::from_json(text)?;
        parsed.document.check_invariants()?;
        self.replace_document(parsed.document.clone());
        self.modified = parsed.defaulted;
        debug!(
            "Imported schema version {} ({} node types)",
            parsed.document.version,
            parsed.document.node_types.len()
        );
        Ok(parsed)
    }

    /// Write the document out as a new file version.
    ///
    /// The version bump is local; the store still holds its own version.
    pub fn export_json(&mut self, base: Option<&str>) -> Result<ExportedFile> {
        let file = export_document(self.doc_mut()?, base);
        debug!("Exported {} (version {})", file.file_name, file.version);
        Ok(file)
    }

    fn doc(&self) -> Result<&SchemaDocument> {
        self.document.as_ref().ok_or(SchemaError::NoDocument)
    }

    fn doc_mut(&mut self) -> Result<&mut SchemaDocument> {
        self.document.as_mut().ok_or(SchemaError::NoDocument)
    }

    fn node(&self, label: &str) -> Result<&NodeType> {
        self.doc()?
            .node(label)
            .ok_or_else(|| SchemaError::NotFound(format!("node type '{}'", label)))
    }

    fn node_mut(&mut self, label: &str) -> Result<&mut NodeType> {
        self.doc_mut()?
            .node_mut(label)
            .ok_or_else(|| SchemaError::NotFound(format!("node type '{}'", label)))
    }

    fn relationship(&self, label: &str, name: &str) -> Result<&Relationship> {
        self.node(label)?.relationships.get(name).ok_or_else(|| {
            SchemaError::NotFound(format!("relationship '{}' on '{}'", name, label))
        })
    }

    fn relationship_mut(&mut self, label: &str, name: &str) -> Result<&mut Relationship> {
        self.node_mut(label)?
            .relationships
            .get_mut(name)
            .ok_or_else(|| SchemaError::NotFound(format!("relationship '{}' on '{}'", name, label)))
    }

    fn touched(&mut self, scope: ChangeScope, key: &str, path: &str, old: Value, new: Value) {
        if let Some(doc) = self.document.as_mut() {
            doc.timestamp = now_timestamp();
        }
        self.modified = true;
        self.ledger.track(scope, key, path, old, new);
        self.events.emit(SessionEvent::EditTracked {
            element_key: key.to_string(),
            property_path: path.to_string(),
        });
    }

    fn structural(&mut self, scope: ChangeScope, key: &str, path: &str, old: Value, new: Value) {
        self.structure_changed = true;
        self.touched(scope, key, path, old, new);
    }

    pub fn update_node_description(&mut self, label: &str, description: &str) -> Result<()> {
        let node = self.node_mut(label)?;
        if node.description == description {
            return Ok(());
        }
        let old = std::mem::replace(&mut node.description, description.to_string());
        self.touched(ChangeScope::Node, label, "description", json!(old), json!(description));
        Ok(())
    }

    pub fn update_attribute_description(
        &mut self,
        label: &str,
        attribute: &str,
        description: &str,
    ) -> Result<()> {
        let attr = self
            .node_mut(label)?
            .attributes
            .get_mut(attribute)
            .ok_or_else(|| {
                SchemaError::NotFound(format!("attribute '{}' on '{}'", attribute, label))
            })?;
        if attr.description == description {
            return Ok(());
        }
        let old = std::mem::replace(&mut attr.description, description.to_string());
        self.touched(
            ChangeScope::Node,
            label,
            &format!("attributes.{}.description", attribute),
            json!(old),
            json!(description),
        );
        Ok(())
    }

    pub fn update_relationship_description(
        &mut self,
        label: &str,
        name: &str,
        description: &str,
    ) -> Result<()> {
        let rel = self.relationship_mut(label, name)?;
        if rel.description == description {
            return Ok(());
        }
        let key = RelationshipKey::new(label, name, &rel.target);
        let old = std::mem::replace(&mut rel.description, description.to_string());
        self.touched(
            ChangeScope::Relationship,
            &key.to_string(),
            "description",
            json!(old),
            json!(description),
        );
        Ok(())
    }

    pub fn update_relationship_property_description(
        &mut self,
        label: &str,
        name: &str,
        property: &str,
        description: &str,
    ) -> Result<()> {
        let rel = self.relationship_mut(label, name)?;
        let key = RelationshipKey::new(label, name, &rel.target);
        let prop = rel.properties.get_mut(property).ok_or_else(|| {
            SchemaError::NotFound(format!("property '{}' on relationship '{}'", property, name))
        })?;
        if prop.description == description {
            return Ok(());
        }
        let old = std::mem::replace(&mut prop.description, description.to_string());
        self.touched(
            ChangeScope::Relationship,
            &key.to_string(),
            &format!("properties.{}.description", property),
            json!(old),
            json!(description),
        );
        Ok(())
    }

    /// Add a property to a relationship. Rejects empty and duplicate names.
    pub fn add_relationship_property(
        &mut self,
        label: &str,
        name: &str,
        property: &str,
        prop_type: &str,
    ) -> Result<()> {
        let property = require_name("Property", property)?;
        let rel = self.relationship(label, name)?;
        if rel.properties.contains_key(&property) {
            return Err(SchemaError::Validation(format!(
                "property '{}' already exists on relationship '{}'",
                property, name
            )));
        }
        let prop_type = match prop_type.trim() {
            "" => AttributeType::String.as_str().to_string(),
            t => t.to_string(),
        };

        let rel = self.relationship_mut(label, name)?;
        let key = RelationshipKey::new(label, name, &rel.target);
        let prop = RelationshipProperty::new(prop_type);
        let new = serde_json::to_value(&prop)?;
        rel.properties.insert(property.clone(), prop);
        self.touched(
            ChangeScope::Relationship,
            &key.to_string(),
            &format!("properties.{}", property),
            Value::Null,
            new,
        );
        Ok(())
    }

    /// Add an attribute to a node type. Rejects empty and duplicate names.
    pub fn add_attribute(
        &mut self,
        label: &str,
        name: &str,
        attr_type: AttributeType,
        description: &str,
    ) -> Result<()> {
        let name = require_name("Attribute", name)?;
        if self.node(label)?.attributes.contains_key(&name) {
            return Err(SchemaError::Validation(format!(
                "attribute '{}' already exists on '{}'",
                name, label
            )));
        }

        let mut attribute = Attribute::new(attr_type);
        attribute.description = description.to_string();
        let new = serde_json::to_value(&attribute)?;
        self.node_mut(label)?.attributes.insert(name.clone(), attribute);
        self.touched(
            ChangeScope::Node,
            label,
            &format!("attributes.{}", name),
            Value::Null,
            new,
        );
        Ok(())
    }

    pub fn add_node_type(&mut self, label: &str, description: &str) -> Result<()> {
        let label = require_name("Node type", label)?;
        if self.doc()?.node(&label).is_some() {
            return Err(SchemaError::Validation(format!(
                "node type '{}' already exists",
                label
            )));
        }
        let mut node = NodeType::new(&label);
        node.description = description.to_string();
        self.doc_mut()?.node_types.push(node);
        self.structural(ChangeScope::Node, &label, "node", Value::Null, json!(label));
        Ok(())
    }

    pub fn remove_node_type(&mut self, label: &str) -> Result<NodeType> {
        let doc = self.doc_mut()?;
        let index = doc
            .node_types
            .iter()
            .position(|n| n.label == label)
            .ok_or_else(|| SchemaError::NotFound(format!("node type '{}'", label)))?;
        let removed = doc.node_types.remove(index);
        self.ledger.remove_element(ChangeScope::Node, label);
        self.structural(ChangeScope::Node, label, "node", json!(label), Value::Null);
        Ok(removed)
    }

    /// Declare a relationship. A node type holds one relationship per name.
    pub fn add_relationship(
        &mut self,
        label: &str,
        name: &str,
        target: &str,
        description: &str,
    ) -> Result<()> {
        let name = require_name("Relationship", name)?;
        let target = require_name("Target", target)?;
        if self.node(label)?.relationships.contains_key(&name) {
            return Err(SchemaError::Validation(format!(
                "relationship '{}' already exists on '{}'",
                name, label
            )));
        }

        let mut rel = Relationship::new(&target);
        rel.description = description.to_string();
        self.node_mut(label)?.relationships.insert(name.clone(), rel);
        let key = RelationshipKey::new(label, &name, &target);
        self.structural(
            ChangeScope::Relationship,
            &key.to_string(),
            "relationship",
            Value::Null,
            json!(target),
        );
        Ok(())
    }

    pub fn remove_relationship(&mut self, label: &str, name: &str) -> Result<Relationship> {
        let removed = self
            .node_mut(label)?
            .relationships
            .remove(name)
            .ok_or_else(|| SchemaError::NotFound(format!("relationship '{}' on '{}'", name, label)))?;
        let key = RelationshipKey::new(label, name, &removed.target).to_string();
        self.ledger.remove_element(ChangeScope::Relationship, &key);
        self.structural(
            ChangeScope::Relationship,
            &key,
            "relationship",
            json!(removed.target),
            Value::Null,
        );
        Ok(removed)
    }

    /// Structural diff of the session document (left) against another.
    pub fn compare_with(&self, other: &SchemaDocument) -> Result<ComparisonReport> {
        Ok(compare_labeled(self.doc()?, "current", other, "other"))
    }

    /// Compare the session document against a live structure.
    pub fn compare_with_live(&self, live: &LiveStructure) -> Result<LiveComparison> {
        Ok(compare_with_actual(self.doc()?, live))
    }

    /// Merge everything the live database has and the document lacks.
    /// Returns the number of elements added.
    pub fn apply_live_additions(&mut self, live: &LiveStructure) -> Result<usize> {
        let comparison = compare_with_actual(self.doc()?, live);
        let added = apply_additions(self.doc_mut()?, live, &comparison);
        if added > 0 {
            self.structural(
                ChangeScope::Node,
                "*",
                "live_additions",
                Value::Null,
                json!(added),
            );
        }
        Ok(added)
    }

    /// Undo every tracked field edit using the pinned original values.
    ///
    /// Structural edits cannot be undone this way; reload from the store or
    /// the file instead.
    pub fn discard_changes(&mut self) -> Result<usize> {
        if self.structure_changed {
            return Err(SchemaError::Validation(
                "structural edits cannot be discarded; reload the schema instead".into(),
            ));
        }
        let entries: Vec<ChangeEntry> = self.ledger.entries().into_iter().cloned().collect();
        let doc = self.doc_mut()?;
        for entry in &entries {
            revert(doc, entry)?;
        }
        self.ledger.clear();
        self.modified = false;
        Ok(entries.len())
    }
}

fn description_of(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}

/// Put the pinned `old` value of one ledger entry back into the document.
pub(crate) fn revert(doc: &mut SchemaDocument, entry: &ChangeEntry) -> Result<()> {
    let parts: Vec<&str> = entry.property_path.split('.').collect();
    match entry.scope {
        ChangeScope::Node => {
            let node = doc
                .node_mut(&entry.element_key)
                .ok_or_else(|| SchemaError::NotFound(entry.element_key.clone()))?;
            match parts.as_slice() {
                ["description"] => node.description = description_of(&entry.old_value),
                ["attributes", name] => {
                    node.attributes.remove(*name);
                }
                ["attributes", name, "description"] => {
                    if let Some(attr) = node.attributes.get_mut(*name) {
                        attr.description = description_of(&entry.old_value);
                    }
                }
                _ => debug!("Not reverting {}", entry.property_path),
            }
        }
        ChangeScope::Relationship => {
            let key: RelationshipKey = entry
                .element_key
                .parse()
                .map_err(|e: crate::ledger::KeyError| SchemaError::Validation(e.to_string()))?;
            let rel = doc
                .node_mut(&key.source)
                .and_then(|n| n.relationships.get_mut(&key.name))
                .ok_or_else(|| SchemaError::NotFound(entry.element_key.clone()))?;
            match parts.as_slice() {
                ["description"] => rel.description = description_of(&entry.old_value),
                ["properties", name] => {
                    rel.properties.remove(*name);
                }
                ["properties", name, "description"] => {
                    if let Some(prop) = rel.properties.get_mut(*name) {
                        prop.description = description_of(&entry.old_value);
                    }
                }
                _ => debug!("Not reverting {}", entry.property_path),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> EditorSession {
        let mut session = EditorSession::new();
        session
            .import_json(
                r#"{
                    "version": 3,
                    "timestamp": "2024-01-01T00:00:00.000Z",
                    "description": "test",
                    "node_types": [{
                        "label": "Person",
                        "description": "A human",
                        "attributes": {"name": {"type": "string"}},
                        "relationships": {
                            "WORKS_AT": {"target": "Company", "properties": {"since": {"type": "integer"}}}
                        }
                    }, {
                        "label": "Company"
                    }]
                }"#,
            )
            .unwrap();
        session
    }

    #[test]
    fn test_import_defaults_mark_modified() {
        let mut session = EditorSession::new();
        let parsed = session.import_json(r#"{"node_types": []}"#).unwrap();
        assert!(parsed.defaulted);
        assert!(session.is_modified());

        let session = self::session();
        assert!(!session.is_modified());
        assert_eq!(session.document().unwrap().version, 3);
    }

    #[test]
    fn test_import_rejects_structure_errors() {
        let mut session = EditorSession::new();
        let err = session.import_json(r#"{"version": 1}"#).unwrap_err();
        assert!(matches!(err, SchemaError::Structure(_)));
        assert!(session.document().is_none());
    }

    #[test]
    fn test_description_edit_is_tracked() {
        let mut session = session();
        let before = session.document().unwrap().timestamp.clone();

        session.update_node_description("Person", "Someone").unwrap();

        assert!(session.is_modified());
        assert_eq!(session.ledger().count(), 1);
        assert_ne!(session.document().unwrap().timestamp, before);
        let entry = session
            .ledger()
            .get(ChangeScope::Node, "Person", "description")
            .unwrap();
        assert_eq!(entry.old_value, json!("A human"));
    }

    #[test]
    fn test_relationship_edits_use_composite_key() {
        let mut session = session();
        session
            .update_relationship_description("Person", "WORKS_AT", "Employment")
            .unwrap();
        session
            .update_relationship_property_description("Person", "WORKS_AT", "since", "Start year")
            .unwrap();

        let snapshot = session.ledger().for_sync();
        assert_eq!(snapshot.relationships.len(), 1);
        assert_eq!(
            snapshot.relationships[0].key,
            RelationshipKey::new("Person", "WORKS_AT", "Company")
        );
        assert_eq!(snapshot.relationships[0].changes.len(), 2);
        assert!(snapshot.nodes.is_empty());
    }

    #[test]
    fn test_add_rejects_duplicates_before_mutating() {
        let mut session = session();
        let before = session.document().unwrap().clone();

        let err = session
            .add_attribute("Person", "name", AttributeType::Integer, "")
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
        let err = session
            .add_relationship_property("Person", "WORKS_AT", "since", "string")
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));
        let err = session
            .add_attribute("Person", "  ", AttributeType::String, "")
            .unwrap_err();
        assert!(matches!(err, SchemaError::Validation(_)));

        assert_eq!(session.document().unwrap(), &before);
        assert!(session.ledger().is_empty());
    }

    #[test]
    fn test_add_relationship_property_tracks_null_old_value() {
        let mut session = session();
        session
            .add_relationship_property("Person", "WORKS_AT", "role", "")
            .unwrap();

        let rel = &session.document().unwrap().node("Person").unwrap().relationships["WORKS_AT"];
        assert_eq!(rel.properties["role"].prop_type, "string");
        let entry = session
            .ledger()
            .get(
                ChangeScope::Relationship,
                "Person|WORKS_AT|Company",
                "properties.role",
            )
            .unwrap();
        assert_eq!(entry.old_value, Value::Null);
    }

    #[test]
    fn test_unknown_elements_are_not_found() {
        let mut session = session();
        assert!(matches!(
            session.update_node_description("Ghost", "x"),
            Err(SchemaError::NotFound(_))
        ));
        assert!(matches!(
            session.update_attribute_description("Person", "ghost", "x"),
            Err(SchemaError::NotFound(_))
        ));
    }

    #[test]
    fn test_structural_edits_are_flagged() {
        let mut session = session();
        session.replace_synced(session.document().unwrap().clone());
        assert!(!session.has_structural_changes());

        session.add_node_type("City", "").unwrap();
        assert!(session.has_structural_changes());
        assert!(matches!(
            session.add_node_type("City", ""),
            Err(SchemaError::Validation(_))
        ));
    }

    #[test]
    fn test_discard_restores_pinned_values() {
        let mut session = session();
        session.replace_synced(session.document().unwrap().clone());
        let original = session.document().unwrap().node_types.clone();

        session.update_node_description("Person", "first").unwrap();
        session.update_node_description("Person", "second").unwrap();
        session
            .add_attribute("Person", "age", AttributeType::Integer, "Years")
            .unwrap();
        session
            .update_relationship_property_description("Person", "WORKS_AT", "since", "Start")
            .unwrap();

        assert_eq!(session.discard_changes().unwrap(), 3);
        assert_eq!(session.document().unwrap().node_types, original);
        assert!(!session.is_modified());
    }

    #[test]
    fn test_export_bumps_local_version_only() {
        let mut session = session();
        session.replace_synced(session.document().unwrap().clone());

        let file = session.export_json(Some("people.json")).unwrap();

        assert_eq!(file.file_name, "people_v4.json");
        assert_eq!(session.document().unwrap().version, 4);
        assert_eq!(session.last_known_remote_version(), Some(3));
    }

    #[test]
    fn test_compare_with_reports_description_change() {
        let session = session();
        let mut other = session.document().unwrap().clone();
        other.node_mut("Person").unwrap().description = "Changed".into();

        let report = session.compare_with(&other).unwrap();
        assert!(!report.identical);
        assert_eq!(report.differences.len(), 1);
    }

    #[test]
    fn test_apply_live_additions_is_structural() {
        let mut session = session();
        session.replace_synced(session.document().unwrap().clone());

        let mut live = LiveStructure::default();
        let mut city = crate::live::LiveNode::new("City");
        city.properties
            .insert("name".into(), Attribute::new(AttributeType::String));
        live.nodes.push(city);

        assert_eq!(session.apply_live_additions(&live).unwrap(), 1);
        assert!(session.has_structural_changes());
        assert!(session.document().unwrap().node("City").is_some());
    }
}
