//! Change ledger: field-level record of edits made since the last sync.
//!
//! Entries are keyed by `(scope, element key, property path)`. Editing the
//! same field twice keeps the first-seen `old` value and replaces `new`, so an
//! entry always describes "original stored value -> current value".

use crate::document::now_timestamp;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Invalid relationship key '{0}': expected source|name|target")]
    InvalidFormat(String),
}

/// Whether a change touches a node type or one of its relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeScope {
    Node,
    Relationship,
}

/// Composite key of a declared relationship: `source|name|target`.
///
/// # Examples
/// ```
/// use schema_core::RelationshipKey;
///
/// let key = RelationshipKey::new("Person", "KNOWS", "Person");
/// assert_eq!(key.to_string(), "Person|KNOWS|Person");
///
/// let parsed: RelationshipKey = "Person|WORKS_AT|Company".parse().unwrap();
/// assert_eq!(parsed.target, "Company");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RelationshipKey {
    pub source: String,
    pub name: String,
    pub target: String,
}

impl RelationshipKey {
    pub fn new(source: impl Into<String>, name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            name: name.into(),
            target: target.into(),
        }
    }
}

impl Display for RelationshipKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.source, self.name, self.target)
    }
}

impl FromStr for RelationshipKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(source), Some(name), Some(target)) if !source.is_empty() && !name.is_empty() => {
                Ok(Self::new(source, name, target))
            }
            _ => Err(KeyError::InvalidFormat(s.to_string())),
        }
    }
}

/// One tracked field edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub scope: ChangeScope,
    pub element_key: String,
    pub property_path: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub timestamp: String,
}

/// A single field change as handed to the protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub property_path: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeChanges {
    pub label: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipChanges {
    pub key: RelationshipKey,
    pub changes: Vec<FieldChange>,
}

/// Ledger contents grouped by element.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSnapshot {
    pub nodes: Vec<NodeChanges>,
    pub relationships: Vec<RelationshipChanges>,
}

impl SyncSnapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

type ElementId = (ChangeScope, String);

/// Ordered record of field-level edits since the last synchronization.
#[derive(Debug, Clone, Default)]
pub struct ChangeLedger {
    elements: BTreeMap<ElementId, BTreeMap<String, ChangeEntry>>,
}

impl ChangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an edit. A repeat edit of the same field keeps the pinned `old`.
    pub fn track(
        &mut self,
        scope: ChangeScope,
        element_key: &str,
        property_path: &str,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) {
        let fields = self
            .elements
            .entry((scope, element_key.to_string()))
            .or_default();
        let timestamp = now_timestamp();

        match fields.get_mut(property_path) {
            Some(existing) => {
                existing.new_value = new_value;
                existing.timestamp = timestamp;
            }
            None => {
                fields.insert(
                    property_path.to_string(),
                    ChangeEntry {
                        scope,
                        element_key: element_key.to_string(),
                        property_path: property_path.to_string(),
                        old_value,
                        new_value,
                        timestamp,
                    },
                );
            }
        }
    }

    pub fn track_node(
        &mut self,
        label: &str,
        property_path: &str,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) {
        self.track(ChangeScope::Node, label, property_path, old_value, new_value);
    }

    pub fn track_relationship(
        &mut self,
        key: &RelationshipKey,
        property_path: &str,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) {
        self.track(
            ChangeScope::Relationship,
            &key.to_string(),
            property_path,
            old_value,
            new_value,
        );
    }

    /// Total tracked fields across all elements.
    pub fn count(&self) -> usize {
        self.elements.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn get(&self, scope: ChangeScope, element_key: &str, property_path: &str) -> Option<&ChangeEntry> {
        self.elements
            .get(&(scope, element_key.to_string()))
            .and_then(|fields| fields.get(property_path))
    }

    /// Entries of one element, ordered by property path.
    pub fn element_entries(&self, scope: ChangeScope, element_key: &str) -> Vec<&ChangeEntry> {
        self.elements
            .get(&(scope, element_key.to_string()))
            .map(|fields| fields.values().collect())
            .unwrap_or_default()
    }

    /// All entries, most recent first.
    pub fn entries(&self) -> Vec<&ChangeEntry> {
        let mut entries: Vec<&ChangeEntry> = self.elements.values().flat_map(BTreeMap::values).collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    /// Snapshot grouped by element for the synchronization protocol.
    ///
    /// Relationship entries whose key cannot be parsed are skipped.
    pub fn for_sync(&self) -> SyncSnapshot {
        let mut snapshot = SyncSnapshot::default();
        for ((scope, key), fields) in &self.elements {
            let changes: Vec<FieldChange> = fields
                .values()
                .map(|e| FieldChange {
                    property_path: e.property_path.clone(),
                    old_value: e.old_value.clone(),
                    new_value: e.new_value.clone(),
                    timestamp: e.timestamp.clone(),
                })
                .collect();
            match scope {
                ChangeScope::Node => snapshot.nodes.push(NodeChanges {
                    label: key.clone(),
                    changes,
                }),
                ChangeScope::Relationship => match key.parse() {
                    Ok(key) => snapshot
                        .relationships
                        .push(RelationshipChanges { key, changes }),
                    Err(e) => tracing::warn!("Skipping ledger element: {}", e),
                },
            }
        }
        snapshot
    }

    /// Drop every entry of one element (after it was persisted).
    pub fn remove_element(&mut self, scope: ChangeScope, element_key: &str) {
        self.elements.remove(&(scope, element_key.to_string()));
    }

    /// Empty the ledger. Only call once the changes are persisted or discarded.
    pub fn clear(&mut self) {
        self.elements.clear();
    }
}
