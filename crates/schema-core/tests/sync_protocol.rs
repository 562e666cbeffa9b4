//! End-to-end tests for the schema synchronization protocol.
//!
//! Drives an `EditorSession` against the in-memory graph store: full saves,
//! property patches, conflicts, loads and live-data generation.

use std::sync::{Arc, Mutex};

use schema_core::{
    AlwaysOverwrite, AttributeType, EditorSession, InMemoryGraphStore, LoadOutcome,
    NeverOverwrite, SaveOutcome, SchemaDocument, SessionEvent, StoreError, SyncError, SyncPhase,
    Value, VersionConflict,
};

const SCHEMA: &str = r#"{
    "version": 2,
    "timestamp": "2024-03-01T09:00:00.000Z",
    "description": "People and where they work",
    "node_types": [
        {
            "label": "Person",
            "description": "A human",
            "attributes": {
                "name": {"type": "string", "indexed": true, "description": "Full name"},
                "email": {"type": "string", "unique": true}
            },
            "relationships": {
                "WORKS_AT": {
                    "target": "Company",
                    "description": "Employment",
                    "properties": {"since": {"type": "integer", "description": "Start year"}}
                },
                "LIVES_IN": {"target": "City", "description": "Home town"}
            }
        },
        {
            "label": "Company",
            "description": "An employer",
            "attributes": {"name": {"type": "string"}}
        }
    ]
}"#;

fn session_with_schema() -> EditorSession {
    let mut session = EditorSession::new();
    session.import_json(SCHEMA).unwrap();
    session
}

/// Store holding SCHEMA at version 3, and a session in sync with it.
async fn synced() -> (InMemoryGraphStore, EditorSession) {
    let store = InMemoryGraphStore::new();
    let mut session = session_with_schema();
    let outcome = session.save(&store, &AlwaysOverwrite).await.unwrap();
    assert_eq!(outcome.version(), 3);
    (store, session)
}

fn record_events(session: &EditorSession) -> (Arc<Mutex<Vec<SessionEvent>>>, schema_core::Subscription) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let subscription = session
        .events()
        .subscribe(move |event| sink.lock().unwrap().push(event));
    (events, subscription)
}

#[tokio::test]
async fn test_save_then_load_round_trip() {
    let (store, saved) = synced().await;

    assert_eq!(store.node_record_count(), 2);
    // LIVES_IN points at a label with no node record.
    assert_eq!(store.relationship_record_count(), 1);

    let mut loaded = EditorSession::new();
    let outcome = loaded.load(&store).await.unwrap();
    let LoadOutcome::Loaded(report) = outcome else {
        panic!("expected a stored schema");
    };
    assert_eq!(report.version, 3);
    assert!(report.recovered.is_empty());

    let doc = loaded.document().unwrap();
    let report = schema_core::compare(saved.document().unwrap(), doc);
    assert!(report.identical, "round trip changed the schema:\n{}", report);
    assert_eq!(doc.description, "People and where they work");
    assert_eq!(
        doc.node("Person").unwrap().relationships["LIVES_IN"].target,
        "City"
    );
    assert_eq!(loaded.last_known_remote_version(), Some(3));
    assert!(!loaded.is_modified());
}

#[tokio::test]
async fn test_conflict_prompts_before_any_write() {
    let (store, mut stale) = synced().await;

    // Another editor moves the store ahead to version 10.
    let mut other = EditorSession::new();
    other.import_json(&SCHEMA.replace("\"version\": 2", "\"version\": 9")).unwrap();
    other.save(&store, &AlwaysOverwrite).await.unwrap();
    assert_eq!(store.max_version(), Some(10));

    stale.add_node_type("City", "A place").unwrap();
    store.clear_log();

    let err = stale.save(&store, &NeverOverwrite).await.unwrap_err();
    match err {
        SyncError::Conflict {
            local_version,
            remote_version,
            ..
        } => {
            assert_eq!(local_version, 4);
            assert_eq!(remote_version, 10);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(store.write_count(), 0);
    assert_eq!(store.statements(), vec!["schema_summary"]);
    assert_eq!(store.max_version(), Some(10));
    assert_eq!(stale.document().unwrap().version, 3);
    assert!(stale.has_structural_changes());

    // Accepting the prompt overwrites.
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    let prompt = move |conflict: &VersionConflict| {
        *sink.lock().unwrap() = Some(*conflict);
        true
    };
    let outcome = stale.save(&store, &prompt).await.unwrap();
    let SaveOutcome::Saved { version, overwrote, .. } = outcome else {
        panic!("expected a full save");
    };
    assert_eq!(version, 4);
    assert_eq!(
        overwrote,
        Some(VersionConflict {
            local_version: 4,
            remote_version: 10
        })
    );
    assert_eq!(*seen.lock().unwrap(), overwrote);
}

#[tokio::test]
async fn test_property_edit_on_synced_session_patches_in_place() {
    let (store, mut session) = synced().await;
    session
        .update_node_description("Person", "Someone we know")
        .unwrap();
    assert_eq!(session.ledger().count(), 1);
    store.clear_log();

    let outcome = session.save(&store, &AlwaysOverwrite).await.unwrap();

    let SaveOutcome::Patched(report) = outcome else {
        panic!("expected a property patch, got {outcome:?}");
    };
    assert!(report.is_complete());
    assert_eq!(report.version, 3);
    assert_eq!(report.nodes_updated, 1);
    assert_eq!(store.max_version(), Some(3));
    assert!(!store.statements().contains(&"clear_schema"));
    assert!(store.statements().contains(&"patch_node_record"));
    assert!(session.ledger().is_empty());
    assert!(!session.is_modified());

    let mut reloaded = EditorSession::new();
    reloaded.load(&store).await.unwrap();
    assert_eq!(
        reloaded.document().unwrap().node("Person").unwrap().description,
        "Someone we know"
    );
}

#[tokio::test]
async fn test_relationship_property_patch() {
    let (store, mut session) = synced().await;
    session
        .add_relationship_property("Person", "WORKS_AT", "role", "string")
        .unwrap();

    let outcome = session.save(&store, &AlwaysOverwrite).await.unwrap();
    let SaveOutcome::Patched(report) = outcome else {
        panic!("expected a property patch");
    };
    assert_eq!(report.relationships_updated, 1);

    let mut reloaded = EditorSession::new();
    reloaded.load(&store).await.unwrap();
    let rel = &reloaded.document().unwrap().node("Person").unwrap().relationships["WORKS_AT"];
    assert!(rel.properties.contains_key("role"));
    assert!(rel.properties.contains_key("since"));
}

#[tokio::test]
async fn test_failed_metadata_patch_keeps_dangling_edit() {
    let (store, mut session) = synced().await;
    session
        .update_relationship_description("Person", "LIVES_IN", "Birthplace")
        .unwrap();
    store.fail_on(
        "patch_metadata_document",
        StoreError::Query("lock timeout".into()),
    );

    let err = session.save(&store, &AlwaysOverwrite).await.unwrap_err();
    assert_eq!(err.phase(), Some(SyncPhase::Writing));
    assert_eq!(session.ledger().count(), 1);
    assert!(session.is_modified());

    store.clear_failures();
    let outcome = session.save(&store, &AlwaysOverwrite).await.unwrap();
    let SaveOutcome::Patched(report) = outcome else {
        panic!("expected a property patch, got {outcome:?}");
    };
    assert_eq!(report.version, 3);
    assert!(report.is_complete());
    assert!(session.ledger().is_empty());
    assert_eq!(store.max_version(), Some(3));

    let mut reloaded = EditorSession::new();
    reloaded.load(&store).await.unwrap();
    let person = reloaded.document().unwrap().node("Person").unwrap().clone();
    assert_eq!(person.relationships["LIVES_IN"].description, "Birthplace");
}

#[tokio::test]
async fn test_partly_failed_patch_keeps_records_and_document_in_step() {
    let (store, mut session) = synced().await;
    session
        .update_node_description("Person", "Someone we know")
        .unwrap();
    session
        .update_relationship_description("Person", "WORKS_AT", "Current job")
        .unwrap();
    store.fail_on(
        "patch_relationship_record",
        StoreError::Query("constraint violated".into()),
    );

    let outcome = session.save(&store, &AlwaysOverwrite).await.unwrap();
    let SaveOutcome::Patched(report) = outcome else {
        panic!("expected a property patch, got {outcome:?}");
    };
    assert_eq!(report.nodes_updated, 1);
    assert_eq!(report.relationships_updated, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(!report.is_complete());

    // Only the failed relationship edit is still pending.
    assert_eq!(session.ledger().count(), 1);
    assert!(session
        .ledger()
        .get(schema_core::ChangeScope::Relationship, "Person|WORKS_AT|Company", "description")
        .is_some());
    assert_eq!(
        session.document().unwrap().node("Person").unwrap().relationships["WORKS_AT"].description,
        "Current job"
    );

    let metadata = store.latest_metadata().unwrap();
    let embedded = SchemaDocument::from_json(metadata["document"].as_str().unwrap())
        .unwrap()
        .document;
    let person = embedded.node("Person").unwrap();
    assert_eq!(person.description, "Someone we know");
    assert_eq!(person.relationships["WORKS_AT"].description, "Employment");

    store.clear_failures();
    let outcome = session.save(&store, &AlwaysOverwrite).await.unwrap();
    let SaveOutcome::Patched(report) = outcome else {
        panic!("expected a property patch, got {outcome:?}");
    };
    assert!(report.is_complete());
    assert!(session.ledger().is_empty());

    let mut reloaded = EditorSession::new();
    reloaded.load(&store).await.unwrap();
    let person = reloaded.document().unwrap().node("Person").unwrap().clone();
    assert_eq!(person.description, "Someone we know");
    assert_eq!(person.relationships["WORKS_AT"].description, "Current job");
}

#[tokio::test]
async fn test_up_to_date_save_writes_nothing() {
    let (store, mut session) = synced().await;
    store.clear_log();

    let outcome = session.save(&store, &AlwaysOverwrite).await.unwrap();

    assert_eq!(outcome, SaveOutcome::UpToDate { version: 3 });
    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn test_failed_save_rolls_back_version() {
    let store = InMemoryGraphStore::new();
    let mut session = session_with_schema();
    session.update_node_description("Company", "Employer").unwrap();
    let edited_at = session.document().unwrap().timestamp.clone();
    store.fail_on(
        "create_relationship_record",
        StoreError::Query("constraint violated".into()),
    );

    let err = session.save(&store, &AlwaysOverwrite).await.unwrap_err();

    assert!(!err.is_connectivity());
    assert_eq!(err.phase(), Some(SyncPhase::Writing));
    let doc = session.document().unwrap();
    assert_eq!(doc.version, 2);
    assert_eq!(doc.timestamp, edited_at);
    assert_eq!(session.ledger().count(), 1);
    assert!(session.is_modified());

    store.clear_failures();
    let outcome = session.save(&store, &AlwaysOverwrite).await.unwrap();
    assert_eq!(outcome.version(), 3);
}

#[tokio::test]
async fn test_unavailable_store_surfaces_connectivity() {
    let store = InMemoryGraphStore::new();
    store.set_unavailable(true);
    let mut session = session_with_schema();

    let err = session.load(&store).await.unwrap_err();
    assert!(err.is_connectivity());
    assert_eq!(session.document().unwrap().version, 2);
}

#[tokio::test]
async fn test_legacy_blob_is_decoded_on_load() {
    let (store, _) = synced().await;
    store.set_node_record_property(
        "Person",
        "properties",
        Value::from(
            r#"[{"name": "name", "type": "string", "description": "Legacy name"},
                {"name": "age", "type": "integer"}]"#,
        ),
    );

    let mut session = EditorSession::new();
    let LoadOutcome::Loaded(report) = session.load(&store).await.unwrap() else {
        panic!("expected a stored schema");
    };

    assert!(report.recovered.is_empty());
    let person = session.document().unwrap().node("Person").unwrap();
    assert_eq!(person.attributes.len(), 2);
    assert_eq!(person.attributes["name"].description, "Legacy name");
    assert_eq!(person.attributes["age"].attr_type, AttributeType::Integer);
}

#[tokio::test]
async fn test_corrupt_blob_is_recovered_empty() {
    let (store, _) = synced().await;
    store.set_node_record_property("Person", "properties", Value::from("{not json"));

    let mut session = EditorSession::new();
    let (events, _subscription) = record_events(&session);
    let LoadOutcome::Loaded(report) = session.load(&store).await.unwrap() else {
        panic!("expected a stored schema");
    };

    assert_eq!(report.recovered, vec!["Person".to_string()]);
    let doc = session.document().unwrap();
    assert!(doc.node("Person").unwrap().attributes.is_empty());
    assert_eq!(doc.node("Company").unwrap().attributes.len(), 1);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, SessionEvent::ElementRecovered { element, .. } if element == "Person")));
}

#[tokio::test]
async fn test_load_from_empty_store_keeps_session() {
    let store = InMemoryGraphStore::new();
    let mut session = session_with_schema();

    let outcome = session.load(&store).await.unwrap();

    assert_eq!(outcome, LoadOutcome::Empty);
    assert_eq!(session.document().unwrap().version, 2);
}

fn live_store() -> InMemoryGraphStore {
    let store = InMemoryGraphStore::new();
    let alice = store.add_data_node(
        "Person",
        [
            ("name", Value::from("Alice")),
            ("email", Value::from("alice@example.com")),
            ("age", Value::Int(41)),
        ],
    );
    let acme = store.add_data_node("Company", [("name", Value::from("Acme"))]);
    let paris = store.add_data_node(
        "City",
        [("name", Value::from("Paris")), ("area", Value::Float(105.4))],
    );
    store.add_data_node("_Internal", [("secret", Value::Bool(true))]);
    store.add_data_relationship("WORKS_AT", alice, acme, [("since", Value::Int(2019))]);
    store.add_data_relationship("LIVES_IN", alice, paris, Vec::<(String, Value)>::new());
    store.add_index("Person", "name");
    store.add_unique_constraint("Person", "email");
    store
}

#[tokio::test]
async fn test_generate_from_live_data() {
    let store = live_store();
    let mut session = EditorSession::new();
    let (events, _subscription) = record_events(&session);

    let report = session.generate_from_live(&store).await.unwrap();

    assert_eq!(report.version, 1);
    assert_eq!(report.nodes, 3);
    assert_eq!(report.relationships, 2);
    assert_eq!(store.node_record_count(), 3);
    assert_eq!(store.relationship_record_count(), 2);

    let doc = session.document().unwrap();
    assert!(doc.node("_Internal").is_none());
    let person = doc.node("Person").unwrap();
    assert_eq!(person.attributes["age"].attr_type, AttributeType::Integer);
    assert!(person.attributes["name"].indexed);
    assert!(person.attributes["email"].unique);
    assert_eq!(
        person.relationships["WORKS_AT"].properties["since"].prop_type,
        "integer"
    );
    assert_eq!(
        doc.node("City").unwrap().attributes["area"].attr_type,
        AttributeType::Float
    );
    assert_eq!(session.last_known_remote_version(), Some(1));
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, SessionEvent::Committed { version: 1, .. })));
}

#[tokio::test]
async fn test_live_diff_only_adds() {
    let store = live_store();
    let mut session = session_with_schema();
    session.add_node_type("Legacy", "Kept from an old import").unwrap();

    let live = session.introspect(&store).await.unwrap();
    let comparison = session.compare_with_live(&live).unwrap();

    assert_eq!(comparison.missing_in_schema.nodes.len(), 1);
    assert_eq!(comparison.missing_in_schema.nodes[0].label, "City");
    assert!(comparison
        .missing_in_schema
        .properties
        .iter()
        .any(|p| p.node == "Person" && p.property == "age"));
    assert_eq!(comparison.missing_in_db.nodes.len(), 1);
    assert_eq!(comparison.missing_in_db.nodes[0].label, "Legacy");

    let added = session.apply_live_additions(&live).unwrap();
    assert!(added >= 2);

    let doc = session.document().unwrap();
    assert!(doc.node("Legacy").is_some());
    assert_eq!(doc.node("Person").unwrap().description, "A human");
    assert!(doc.node("City").is_some());
    assert!(!session.compare_with_live(&live).unwrap().has_additions());
    // Introspection reads only.
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_introspection_reads_keys_from_every_node() {
    let store = InMemoryGraphStore::new();
    for i in 0..150 {
        store.add_data_node("Person", [("name", Value::from(format!("p{i}")))]);
    }
    store.add_data_node(
        "Person",
        [("name", Value::from("late")), ("nickname", Value::from("L"))],
    );
    let mut session = EditorSession::new();

    let live = session.introspect(&store).await.unwrap();

    let person = live.node("Person").unwrap();
    assert!(person.properties.contains_key("nickname"));
}

#[tokio::test]
async fn test_composite_catalog_entries_mark_every_property() {
    let store = InMemoryGraphStore::new();
    store.add_data_node(
        "Order",
        [
            ("id", Value::Int(1)),
            ("region", Value::from("EU")),
            ("total", Value::Float(9.5)),
            ("note", Value::from("gift")),
        ],
    );
    store.add_composite_index("Order", &["region", "total"]);
    store.add_constraint("Order", &["id", "region"], "UNIQUENESS");
    store.add_constraint("Order", &["note"], "NODE_PROPERTY_EXISTENCE");
    let mut session = EditorSession::new();

    let live = session.introspect(&store).await.unwrap();

    let order = live.node("Order").unwrap();
    let region = &order.properties["region"];
    assert!(region.indexed && region.unique);
    let total = &order.properties["total"];
    assert!(total.indexed && !total.unique);
    // A uniqueness constraint does not imply an index entry.
    let id = &order.properties["id"];
    assert!(id.unique && !id.indexed);
    let note = &order.properties["note"];
    assert!(!note.unique && !note.indexed);
}
