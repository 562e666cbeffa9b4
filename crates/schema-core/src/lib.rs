//! schema-core: graph schema documents and their reconciliation with a graph
//! database.
//!
//! This crate provides the core functionality for:
//! - The schema document model (node types, attributes, relationships)
//! - Structural diffs between two documents, and against the live database
//! - A change ledger of unsaved field edits
//! - Versioned save/load of the document as registry records in the store
//! - Read-only example sampling of live data and a connection check
//! - The `GraphStoreClient` trait abstraction plus an in-memory implementation

pub mod codec;
pub mod config;
pub mod cypher;
pub mod diff;
pub mod document;
pub mod events;
pub mod file;
pub mod introspect;
pub mod ledger;
pub mod live;
pub mod memory_store;
pub mod samples;
pub mod session;
pub mod store;
pub mod sync_engine;

pub use codec::{DecodeError, PropertyMap};
pub use config::SyncConfig;
pub use diff::{compare, compare_values, ComparisonReport, Difference, DifferenceCategory, DifferenceKind};
pub use document::{
    Attribute, AttributeType, NodeType, Relationship, RelationshipProperty, SchemaDocument,
    SchemaError,
};
pub use events::{EventBus, SessionEvent, Subscription};
pub use ledger::{ChangeEntry, ChangeLedger, ChangeScope, RelationshipKey};
pub use live::{compare_with_actual, LiveComparison, LiveNode, LiveStructure};
pub use memory_store::InMemoryGraphStore;
pub use samples::{ConnectionStatus, NodeSample, RelationshipSample, DEFAULT_SAMPLE_LIMIT};
pub use session::EditorSession;
pub use store::{GraphStoreClient, Statement, StoreError, Value};
pub use sync_engine::{
    AlwaysOverwrite, LoadOutcome, NeverOverwrite, SaveOutcome, SavePrompt, SyncError, SyncPhase,
    VersionConflict,
};
