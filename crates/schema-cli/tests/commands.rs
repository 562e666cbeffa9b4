//! Tests for the file-level commands against real files in a temp directory.

use std::path::{Path, PathBuf};

use schema_cli::commands::{self, CommandError, SampleQuery, SampleReport};
use schema_core::{DifferenceCategory, DifferenceKind, SchemaDocument, SyncConfig};
use tempfile::TempDir;

const PEOPLE: &str = r#"{
    "version": 4,
    "timestamp": "2024-03-01T09:00:00.000Z",
    "description": "People",
    "node_types": [
        {
            "label": "Person",
            "description": "A human",
            "attributes": {
                "name": {"type": "string", "description": "Full name"}
            },
            "relationships": {
                "WORKS_AT": {"target": "Company", "description": "Employer"}
            }
        },
        {"label": "Company", "description": "It's a business"}
    ]
}"#;

const SNAPSHOT: &str = r#"{
    "nodes": [
        {"label": "Person", "properties": {"name": "Alice", "age": 41}},
        {"label": "Company", "properties": {"name": "Acme"}},
        {"label": "City", "properties": {"name": "Paris"}},
        {"label": "_Audit", "properties": {"at": "2024-01-01"}}
    ],
    "relationships": [
        {"type": "WORKS_AT", "source": 0, "target": 1, "properties": {"since": 2019}},
        {"type": "LIVES_IN", "source": 0, "target": 2}
    ],
    "indexes": [{"label": "Person", "property": "name"}],
    "constraints": [{"label": "Company", "property": "name"}]
}"#;

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn read_doc(path: &Path) -> SchemaDocument {
    SchemaDocument::from_json(&std::fs::read_to_string(path).unwrap())
        .unwrap()
        .document
}

#[test]
fn test_validate_reports_counts() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "people.json", PEOPLE);

    let summary = commands::validate(&path).unwrap();

    assert_eq!(summary.version, 4);
    assert_eq!(summary.node_types, 2);
    assert_eq!(summary.attributes, 1);
    assert_eq!(summary.relationships, 1);
    assert!(!summary.defaulted);
}

#[test]
fn test_validate_rejects_missing_node_types() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "broken.json", r#"{"version": 1, "nodes": []}"#);

    let err = commands::validate(&path).unwrap_err();
    assert!(matches!(err, CommandError::Schema { .. }));
    assert!(err.to_string().contains("broken.json"));
}

#[test]
fn test_diff_files() {
    let dir = TempDir::new().unwrap();
    let left = write(&dir, "left.json", PEOPLE);
    let right = write(
        &dir,
        "right.json",
        &PEOPLE.replace("\"Full name\"", "\"Legal name\""),
    );

    let same = commands::diff(&left, &left).unwrap();
    assert!(same.identical);

    let report = commands::diff(&left, &right).unwrap();
    assert_eq!(report.differences.len(), 1);
    let diff = &report.differences[0];
    assert_eq!(diff.kind, DifferenceKind::Modification);
    assert_eq!(diff.category, DifferenceCategory::Attribute);
    assert_eq!(diff.details.field(), Some("description"));
    assert!(report.to_string().contains("left.json (v4) vs right.json (v4)"));
}

#[test]
fn test_diff_invalid_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let left = write(&dir, "left.json", PEOPLE);
    let right = write(&dir, "right.json", r#"{"version": 2}"#);

    let report = commands::diff(&left, &right).unwrap();
    assert!(report.is_error());
    assert!(!report.identical);
    assert_eq!(report.summary.total_differences, 0);
}

#[test]
fn test_normalize_writes_next_version() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "people.json", PEOPLE);

    let written = commands::normalize(&path, None, &SyncConfig::default()).unwrap();

    assert_eq!(written.version, 5);
    assert_eq!(written.path, dir.path().join("people_v5.json"));
    let doc = read_doc(&written.path);
    assert_eq!(doc.version, 5);
    assert_eq!(doc.node_types.len(), 2);
}

#[test]
fn test_cypher_escapes_and_writes_into_directory() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "people.json", PEOPLE);

    let printed = commands::cypher(&path, None, &SyncConfig::default()).unwrap();
    assert!(printed.written.is_none());
    assert!(printed.script.contains("It\\'s a business"));
    assert!(printed.script.contains("// Version: 4"));

    let out = TempDir::new().unwrap();
    let written = commands::cypher(&path, Some(out.path()), &SyncConfig::default()).unwrap();
    let file = written.written.unwrap();
    assert_eq!(file.path, out.path().join("schema_properties_update_v4.cypher"));
    assert!(std::fs::read_to_string(file.path).unwrap().contains("SET rel.description = 'Employer'"));
}

#[tokio::test]
async fn test_generate_from_snapshot() {
    let dir = TempDir::new().unwrap();
    let snapshot = write(&dir, "live.json", SNAPSHOT);

    let written = commands::generate(&snapshot, dir.path(), &SyncConfig::default())
        .await
        .unwrap();

    assert_eq!(written.path, dir.path().join("generated_schema_v1.json"));
    let doc = read_doc(&written.path);
    assert_eq!(doc.version, 1);
    assert_eq!(doc.node_types.len(), 3);
    assert!(doc.node("_Audit").is_none());
    let person = doc.node("Person").unwrap();
    assert!(person.attributes["name"].indexed);
    assert_eq!(person.relationships["LIVES_IN"].target, "City");
    assert!(doc.node("Company").unwrap().attributes["name"].unique);
}

#[tokio::test]
async fn test_generate_honors_reserved_prefixes() {
    let dir = TempDir::new().unwrap();
    let snapshot = write(&dir, "live.json", SNAPSHOT);
    let config = SyncConfig::default().with_reserved_prefixes(["_", "Ci"]);

    let written = commands::generate(&snapshot, dir.path(), &config).await.unwrap();

    let doc = read_doc(&written.path);
    assert!(doc.node("City").is_none());
    assert!(!doc.node("Person").unwrap().relationships.contains_key("LIVES_IN"));
}

#[tokio::test]
async fn test_live_diff_and_apply() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "people.json", PEOPLE);
    let snapshot = write(&dir, "live.json", SNAPSHOT);

    let report = commands::live_diff(&schema, &snapshot, None, &SyncConfig::default())
        .await
        .unwrap();
    assert!(report.applied.is_none());
    let missing = &report.comparison.missing_in_schema;
    assert_eq!(missing.nodes.len(), 1);
    assert_eq!(missing.nodes[0].label, "City");
    assert!(missing.properties.iter().any(|p| p.property == "age"));
    assert!(missing.relationships.iter().any(|r| r.rel_type == "LIVES_IN"));
    assert!(report.comparison.missing_in_db.nodes.is_empty());

    let out = TempDir::new().unwrap();
    let applied = commands::live_diff(&schema, &snapshot, Some(out.path()), &SyncConfig::default())
        .await
        .unwrap();
    let written = applied.applied.clone().unwrap();
    assert_eq!(written.path, out.path().join("people_v5.json"));
    assert_eq!(applied.added, report.comparison.total());

    let doc = read_doc(&written.path);
    assert_eq!(doc.node("Person").unwrap().description, "A human");
    assert!(doc.node("City").is_some());
    assert!(doc.node("Person").unwrap().attributes.contains_key("age"));
}

#[tokio::test]
async fn test_sample_nodes_values_and_relationships() {
    let dir = TempDir::new().unwrap();
    let snapshot = write(&dir, "live.json", SNAPSHOT);
    let config = SyncConfig::default();

    let nodes = commands::sample(&snapshot, "Person", &SampleQuery::Nodes, 10, &config)
        .await
        .unwrap();
    let SampleReport::Nodes { samples, .. } = &nodes else {
        panic!("expected node samples");
    };
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].properties["age"], 41);
    assert!(nodes.to_string().contains("name: Alice"));

    let values = commands::sample(
        &snapshot,
        "Company",
        &SampleQuery::Attribute("name".into()),
        10,
        &config,
    )
    .await
    .unwrap();
    assert_eq!(values.to_string(), "Company.name: Acme\n");

    let query = SampleQuery::Relationship {
        name: "LIVES_IN".into(),
        target: Some("City".into()),
    };
    let homes = commands::sample(&snapshot, "Person", &query, 10, &config)
        .await
        .unwrap();
    assert_eq!(homes.to_string(), "Alice -[LIVES_IN]-> Paris\n");

    let json = serde_json::to_value(&homes).unwrap();
    assert_eq!(json["kind"], "relationships");
    assert_eq!(json["relType"], "LIVES_IN");
    assert_eq!(json["samples"][0]["targetLabel"], "City");
}

#[tokio::test]
async fn test_sample_reports_empty_results() {
    let dir = TempDir::new().unwrap();
    let snapshot = write(&dir, "live.json", SNAPSHOT);

    let report = commands::sample(
        &snapshot,
        "Person",
        &SampleQuery::Attribute("email".into()),
        10,
        &SyncConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.to_string(), "No example values found for Person.email\n");
}

#[tokio::test]
async fn test_check_reports_connection() {
    let dir = TempDir::new().unwrap();
    let snapshot = write(&dir, "live.json", SNAPSHOT);

    let status = commands::check(&snapshot, &SyncConfig::default()).await.unwrap();

    assert_eq!(status.stored_version, None);
    assert!(status.to_string().starts_with("Connected."));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = commands::validate(&dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, CommandError::Io { .. }));
}
