//! Read-only samples of live data: example nodes, attribute values and
//! relationships for a schema element, plus a connection check.
//!
//! None of these touch the session document, the ledger or stored records.

use crate::document::SchemaError;
use crate::session::EditorSession;
use crate::store::{column, map_column, GraphStoreClient, Record, Statement, StoreError, Value};
use crate::sync_engine::{Operation, Result, SyncPhase};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use tracing::{debug, info};

/// Examples fetched per request when the caller has no preference.
pub const DEFAULT_SAMPLE_LIMIT: usize = 10;

/// Properties of one example node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSample {
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// One example relationship, identified by the `name` of its endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipSample {
    pub source_name: Option<String>,
    pub rel_type: String,
    pub target_name: Option<String>,
    pub target_label: Option<String>,
}

impl Display for RelationshipSample {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let target = self
            .target_name
            .as_deref()
            .or(self.target_label.as_deref())
            .unwrap_or("N/A");
        write!(
            f,
            "{} -[{}]-> {}",
            self.source_name.as_deref().unwrap_or("N/A"),
            self.rel_type,
            target
        )
    }
}

/// Result of a successful connection check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Schema records currently stored, metadata included.
    pub stored_records: u64,
    pub stored_version: Option<u64>,
}

impl Display for ConnectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.stored_version {
            Some(version) => writeln!(
                f,
                "Connected. Stored schema version {} ({} records)",
                version, self.stored_records
            ),
            None => writeln!(f, "Connected. No schema stored."),
        }
    }
}

/// Text form of a sampled scalar: strings as-is, anything else as JSON.
fn display_name(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_json().to_string()),
    }
}

fn check_limit(limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(SchemaError::Validation("sample limit must be at least 1".into()).into());
    }
    Ok(())
}

impl EditorSession {
    /// Run one read-only statement and decode every returned row.
    async fn read_rows<C, T, F>(&mut self, client: &C, statement: Statement, decode: F) -> Result<Vec<T>>
    where
        C: GraphStoreClient + ?Sized,
        F: Fn(&Record) -> std::result::Result<T, StoreError>,
    {
        let events = self.events().clone();
        let mut runner = self.runner(client, &events, Operation::Sample, 1);
        runner.enter(SyncPhase::Reading);

        let result = match runner.execute(&statement).await {
            Ok(rows) => rows
                .iter()
                .map(&decode)
                .collect::<std::result::Result<Vec<T>, StoreError>>()
                .map_err(|e| runner.store_error(statement.name(), e)),
            Err(e) => Err(e),
        };
        match result {
            Ok(items) => {
                debug!("{} returned {} rows", statement.name(), items.len());
                runner.enter(SyncPhase::Idle);
                Ok(items)
            }
            Err(e) => {
                runner.failed(&e);
                Err(e)
            }
        }
    }

    /// Up to `limit` example nodes carrying `label`.
    pub async fn sample_nodes<C>(&mut self, client: &C, label: &str, limit: usize) -> Result<Vec<NodeSample>>
    where
        C: GraphStoreClient + ?Sized,
    {
        check_limit(limit)?;
        let statement = Statement::SampleNodes {
            label: label.to_string(),
            limit,
        };
        self.read_rows(client, statement, |row| {
            let properties = map_column(row, "n")?
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            Ok(NodeSample { properties })
        })
        .await
    }

    /// Up to `limit` distinct non-null values of one attribute.
    pub async fn sample_attribute_values<C>(
        &mut self,
        client: &C,
        label: &str,
        attribute: &str,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>>
    where
        C: GraphStoreClient + ?Sized,
    {
        check_limit(limit)?;
        let statement = Statement::SampleAttributeValues {
            label: label.to_string(),
            key: attribute.to_string(),
            limit,
        };
        self.read_rows(client, statement, |row| Ok(column(row, "value")?.to_json()))
            .await
    }

    /// Up to `limit` example relationships of `rel_type` leaving `source`.
    /// With a `target`, only relationships ending at that label are sampled.
    pub async fn sample_relationships<C>(
        &mut self,
        client: &C,
        source: &str,
        rel_type: &str,
        target: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RelationshipSample>>
    where
        C: GraphStoreClient + ?Sized,
    {
        check_limit(limit)?;
        let statement = Statement::SampleRelationships {
            source: source.to_string(),
            rel_type: rel_type.to_string(),
            target: target.map(str::to_string),
            limit,
        };
        let fallback_type = rel_type.to_string();
        self.read_rows(client, statement, |row| {
            Ok(RelationshipSample {
                source_name: display_name(row.get("sourceName")),
                rel_type: row
                    .get("relType")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| fallback_type.clone()),
                target_name: display_name(row.get("targetName")),
                target_label: display_name(row.get("targetLabel")),
            })
        })
        .await
    }

    /// Verify the store answers, and report what schema it holds.
    pub async fn check_connection<C>(&mut self, client: &C) -> Result<ConnectionStatus>
    where
        C: GraphStoreClient + ?Sized,
    {
        let events = self.events().clone();
        let mut runner = self.runner(client, &events, Operation::ConnectionCheck, 1);
        runner.enter(SyncPhase::Reading);

        let statement = Statement::SchemaSummary;
        match runner.execute(&statement).await {
            Ok(rows) => {
                let row = rows.first();
                let status = ConnectionStatus {
                    stored_records: row
                        .and_then(|r| r.get("nodeCount"))
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                    stored_version: row.and_then(|r| r.get("maxVersion")).and_then(Value::as_u64),
                };
                info!("Store reachable; stored version {:?}", status.stored_version);
                runner.enter(SyncPhase::Idle);
                Ok(status)
            }
            Err(e) => {
                runner.failed(&e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryGraphStore;
    use crate::sync_engine::{AlwaysOverwrite, SyncError};

    fn store() -> InMemoryGraphStore {
        let store = InMemoryGraphStore::new();
        let alice = store.add_data_node(
            "Person",
            [("name", Value::from("Alice")), ("age", Value::Int(41))],
        );
        let bob = store.add_data_node(
            "Person",
            [("name", Value::from("Bob")), ("age", Value::Int(41))],
        );
        store.add_data_node("Person", [("name", Value::from("Carol"))]);
        let acme = store.add_data_node("Company", [("name", Value::from("Acme"))]);
        let paris = store.add_data_node("City", [("code", Value::from("PAR"))]);
        store.add_data_relationship("WORKS_AT", alice, acme, Vec::<(String, Value)>::new());
        store.add_data_relationship("WORKS_AT", bob, acme, Vec::<(String, Value)>::new());
        store.add_data_relationship("LIVES_IN", alice, paris, Vec::<(String, Value)>::new());
        store
    }

    #[tokio::test]
    async fn test_sample_nodes_respects_limit() {
        let store = store();
        let mut session = EditorSession::new();

        let samples = session.sample_nodes(&store, "Person", 2).await.unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].properties["name"], "Alice");
        assert_eq!(samples[0].properties["age"], 41);
        assert!(session.document().is_none());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_sample_attribute_values_are_distinct() {
        let store = store();
        let mut session = EditorSession::new();

        let ages = session
            .sample_attribute_values(&store, "Person", "age", DEFAULT_SAMPLE_LIMIT)
            .await
            .unwrap();
        assert_eq!(ages, vec![serde_json::json!(41)]);

        let missing = session
            .sample_attribute_values(&store, "Person", "email", DEFAULT_SAMPLE_LIMIT)
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_sample_relationships_with_and_without_target() {
        let store = store();
        let mut session = EditorSession::new();

        let employers = session
            .sample_relationships(&store, "Person", "WORKS_AT", Some("Company"), 10)
            .await
            .unwrap();
        assert_eq!(employers.len(), 2);
        assert_eq!(employers[0].to_string(), "Alice -[WORKS_AT]-> Acme");

        let elsewhere = session
            .sample_relationships(&store, "Person", "WORKS_AT", Some("City"), 10)
            .await
            .unwrap();
        assert!(elsewhere.is_empty());

        // The city has no name, so its label stands in.
        let homes = session
            .sample_relationships(&store, "Person", "LIVES_IN", None, 10)
            .await
            .unwrap();
        assert_eq!(homes.len(), 1);
        assert_eq!(homes[0].target_name, None);
        assert_eq!(homes[0].target_label.as_deref(), Some("City"));
        assert_eq!(homes[0].to_string(), "Alice -[LIVES_IN]-> City");
    }

    #[tokio::test]
    async fn test_zero_limit_is_rejected_without_io() {
        let store = store();
        let mut session = EditorSession::new();

        let err = session.sample_nodes(&store, "Person", 0).await.unwrap_err();

        assert!(matches!(err, SyncError::Schema(SchemaError::Validation(_))));
        assert!(store.statements().is_empty());
    }

    #[tokio::test]
    async fn test_sample_failure_carries_context() {
        let store = store();
        store.fail_on("sample_nodes", StoreError::Query("syntax error".into()));
        let mut session = EditorSession::new();

        let err = session.sample_nodes(&store, "Person", 5).await.unwrap_err();

        assert!(!err.is_connectivity());
        assert_eq!(err.phase(), Some(SyncPhase::Reading));
        assert!(err.to_string().contains("sample_nodes"));
    }

    #[tokio::test]
    async fn test_check_connection() {
        let store = InMemoryGraphStore::new();
        let mut session = EditorSession::new();

        let empty = session.check_connection(&store).await.unwrap();
        assert_eq!(empty.stored_version, None);
        assert_eq!(empty.to_string(), "Connected. No schema stored.\n");

        session
            .import_json(r#"{"version": 4, "timestamp": "t", "node_types": [{"label": "Person"}]}"#)
            .unwrap();
        session.save(&store, &AlwaysOverwrite).await.unwrap();
        let stored = session.check_connection(&store).await.unwrap();
        assert_eq!(stored.stored_version, Some(5));
        assert_eq!(stored.stored_records, 2);

        store.set_unavailable(true);
        let err = session.check_connection(&store).await.unwrap_err();
        assert!(err.is_connectivity());
    }
}
