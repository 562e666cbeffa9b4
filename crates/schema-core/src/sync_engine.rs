//! Synchronization protocol between an editor session and the graph store.
//!
//! Each attempt walks a small state machine:
//!
//! ```text
//! Idle -> CheckingRemoteVersion -> [ConflictPrompt] -> Writing -> Committed
//!                                                             \-> Failed
//! ```
//!
//! Save picks one of three paths:
//!
//! 1. Nothing changed since the last sync: `UpToDate`, no I/O.
//! 2. Only descriptive fields changed and the store is still at our version:
//!    a property patch rewrites the touched records in place, version unchanged.
//! 3. Otherwise a full structural save: bump the version, check the remote
//!    max version (asking before overwriting newer state), then clear and
//!    recreate node records, relationship records and the metadata record.
//!
//! A failed or declined save restores the document's version and timestamp
//! and keeps the change ledger. The multi-step write is not transactional:
//! records written before a failing step stay in the store.

use crate::codec::{
    encode_attributes, encode_document, encode_relationship_properties, MetadataRecord,
    NodeRecord, RelationshipRecord,
};
use crate::document::{now_timestamp, NodeType, Relationship, SchemaDocument, SchemaError};
use crate::events::{EventBus, SessionEvent};
use crate::introspect::introspect_live;
use crate::ledger::{ChangeScope, SyncSnapshot};
use crate::live::LiveStructure;
use crate::session::{revert, EditorSession};
use crate::store::{map_column, GraphStoreClient, Record, Statement, StoreError, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Phase of a synchronization attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Idle,
    CheckingRemoteVersion,
    ConflictPrompt,
    Writing,
    /// Reading stored records or live data (load, introspection).
    Reading,
    Committed,
    Failed,
}

impl Display for SyncPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::CheckingRemoteVersion => "checking remote version",
            SyncPhase::ConflictPrompt => "conflict prompt",
            SyncPhase::Writing => "writing",
            SyncPhase::Reading => "reading",
            SyncPhase::Committed => "committed",
            SyncPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Save,
    PropertyPatch,
    Load,
    Generate,
    Introspect,
    Sample,
    ConnectionCheck,
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Save => "save",
            Operation::PropertyPatch => "property patch",
            Operation::Load => "load",
            Operation::Generate => "generate",
            Operation::Introspect => "introspect",
            Operation::Sample => "sample",
            Operation::ConnectionCheck => "connection check",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{operation} #{operation_id} failed while {phase}: store unreachable: {source}")]
    Connectivity {
        operation: Operation,
        operation_id: u64,
        phase: SyncPhase,
        source: StoreError,
    },

    #[error("{operation} #{operation_id} failed while {phase} ({statement}): {source}")]
    Store {
        operation: Operation,
        operation_id: u64,
        phase: SyncPhase,
        statement: &'static str,
        source: StoreError,
    },

    #[error("{operation} #{operation_id} timed out after {after:?} while {phase} ({statement})")]
    Timeout {
        operation: Operation,
        operation_id: u64,
        phase: SyncPhase,
        statement: &'static str,
        after: Duration,
    },

    #[error(
        "save #{operation_id} aborted: store holds version {remote_version}, newer than local version {local_version}"
    )]
    Conflict {
        operation_id: u64,
        local_version: u64,
        remote_version: u64,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl SyncError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SyncError::Connectivity { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict { .. })
    }

    pub fn phase(&self) -> Option<SyncPhase> {
        match self {
            SyncError::Connectivity { phase, .. }
            | SyncError::Store { phase, .. }
            | SyncError::Timeout { phase, .. } => Some(*phase),
            SyncError::Conflict { .. } => Some(SyncPhase::ConflictPrompt),
            SyncError::Schema(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// The store holds a newer version than the one about to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionConflict {
    pub local_version: u64,
    pub remote_version: u64,
}

/// Caller decisions requested during a save.
pub trait SavePrompt: Send + Sync {
    /// Overwrite a newer stored version? Declining aborts the save.
    fn confirm_overwrite(&self, conflict: &VersionConflict) -> bool;

    /// Take the property-only patch path? Declining falls back to a full save.
    fn confirm_property_patch(&self, _changes: &SyncSnapshot) -> bool {
        true
    }
}

impl<F> SavePrompt for F
where
    F: Fn(&VersionConflict) -> bool + Send + Sync,
{
    fn confirm_overwrite(&self, conflict: &VersionConflict) -> bool {
        self(conflict)
    }
}

/// Always overwrites newer stored state.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOverwrite;

impl SavePrompt for AlwaysOverwrite {
    fn confirm_overwrite(&self, _conflict: &VersionConflict) -> bool {
        true
    }
}

/// Never overwrites newer stored state.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverOverwrite;

impl SavePrompt for NeverOverwrite {
    fn confirm_overwrite(&self, _conflict: &VersionConflict) -> bool {
        false
    }
}

/// Per-element result of a property patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchReport {
    pub version: u64,
    pub nodes_updated: usize,
    pub relationships_updated: usize,
    /// Elements without a stored record at this version; their edits stay tracked.
    pub missing: Vec<String>,
    /// Elements whose patch statement failed; their edits stay tracked.
    pub errors: Vec<String>,
}

impl PatchReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SaveOutcome {
    UpToDate { version: u64 },
    Patched(PatchReport),
    Saved {
        version: u64,
        nodes: usize,
        relationships: usize,
        /// Relationships whose target has no node record; kept only in the embedded document.
        dangling: usize,
        overwrote: Option<VersionConflict>,
    },
}

impl SaveOutcome {
    pub fn version(&self) -> u64 {
        match self {
            SaveOutcome::UpToDate { version } | SaveOutcome::Saved { version, .. } => *version,
            SaveOutcome::Patched(report) => report.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub version: u64,
    pub nodes: usize,
    pub relationships: usize,
    /// Elements whose stored properties could not be decoded and were loaded empty.
    pub recovered: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum LoadOutcome {
    /// The store holds no schema. The session is left untouched.
    Empty,
    Loaded(LoadReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReport {
    pub version: u64,
    pub nodes: usize,
    pub relationships: usize,
}

/// Executes statements for one operation: per-step timeout, error context,
/// phase and progress events.
pub(crate) struct Runner<'a, C: ?Sized> {
    client: &'a C,
    events: &'a EventBus,
    timeout: Duration,
    operation: Operation,
    operation_id: u64,
    phase: SyncPhase,
    total_steps: usize,
    step: usize,
}

impl<'a, C: GraphStoreClient + ?Sized> Runner<'a, C> {
    fn new(
        client: &'a C,
        events: &'a EventBus,
        timeout: Duration,
        operation: Operation,
        operation_id: u64,
        total_steps: usize,
    ) -> Self {
        Self {
            client,
            events,
            timeout,
            operation,
            operation_id,
            phase: SyncPhase::Idle,
            total_steps,
            step: 0,
        }
    }

    pub(crate) fn enter(&mut self, phase: SyncPhase) {
        debug!(
            operation = %self.operation,
            operation_id = self.operation_id,
            "{} -> {}",
            self.phase,
            phase
        );
        self.phase = phase;
        self.events.emit(SessionEvent::PhaseChanged {
            operation_id: self.operation_id,
            operation: self.operation.to_string(),
            phase,
        });
    }

    pub(crate) fn progress(&mut self, message: impl Into<String>) {
        self.step += 1;
        self.events.emit(SessionEvent::Progress {
            operation_id: self.operation_id,
            step: self.step,
            total: self.total_steps.max(self.step),
            message: message.into(),
        });
    }

    pub(crate) fn recovered(&self, element: &str, error: &dyn std::error::Error) {
        self.events.emit(SessionEvent::ElementRecovered {
            element: element.to_string(),
            error: error.to_string(),
        });
    }

    pub(crate) async fn execute(&self, statement: &Statement) -> Result<Vec<Record>> {
        match tokio::time::timeout(self.timeout, self.client.execute(statement)).await {
            Err(_) => Err(SyncError::Timeout {
                operation: self.operation,
                operation_id: self.operation_id,
                phase: self.phase,
                statement: statement.name(),
                after: self.timeout,
            }),
            Ok(Err(source)) => Err(self.store_error(statement.name(), source)),
            Ok(Ok(rows)) => Ok(rows),
        }
    }

    pub(crate) fn store_error(&self, statement: &'static str, source: StoreError) -> SyncError {
        if source.is_connectivity() {
            SyncError::Connectivity {
                operation: self.operation,
                operation_id: self.operation_id,
                phase: self.phase,
                source,
            }
        } else {
            SyncError::Store {
                operation: self.operation,
                operation_id: self.operation_id,
                phase: self.phase,
                statement,
                source,
            }
        }
    }

    fn committed(&mut self, version: u64) {
        self.enter(SyncPhase::Committed);
        self.events.emit(SessionEvent::Committed {
            operation_id: self.operation_id,
            operation: self.operation.to_string(),
            version,
        });
    }

    pub(crate) fn failed(&mut self, error: &SyncError) {
        warn!(
            operation = %self.operation,
            operation_id = self.operation_id,
            "Synchronization failed: {}",
            error
        );
        self.enter(SyncPhase::Failed);
    }

    /// Highest stored schema version, if any records exist.
    async fn remote_max_version(&self) -> Result<Option<u64>> {
        let statement = Statement::SchemaSummary;
        let rows = self.execute(&statement).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("maxVersion"))
            .and_then(Value::as_u64))
    }

    /// Replace every stored record with the structure of `doc`.
    ///
    /// Node records go first so relationship records can link their ids.
    async fn write_structure(&mut self, doc: &SchemaDocument) -> Result<WriteStats> {
        self.progress("Clearing stored schema");
        self.execute(&Statement::ClearSchema).await?;

        self.progress(format!("Creating {} node records", doc.node_types.len()));
        let mut ids: HashMap<&str, i64> = HashMap::new();
        for node in &doc.node_types {
            let statement = Statement::CreateNodeRecord(NodeRecord {
                original_label: node.label.clone(),
                description: node.description.clone(),
                properties: encode_attributes(&node.attributes),
                version: doc.version,
                timestamp: doc.timestamp.clone(),
            });
            let rows = self.execute(&statement).await?;
            let id = rows
                .first()
                .and_then(|row| row.get("nodeId"))
                .and_then(Value::as_i64)
                .ok_or_else(|| {
                    self.store_error(
                        statement.name(),
                        StoreError::Shape(format!("no nodeId returned for {}", node.label)),
                    )
                })?;
            ids.insert(node.label.as_str(), id);
        }

        self.progress(format!(
            "Creating {} relationship records",
            doc.relationship_count()
        ));
        let mut stats = WriteStats {
            nodes: ids.len(),
            ..WriteStats::default()
        };
        for node in &doc.node_types {
            let Some(&source_id) = ids.get(node.label.as_str()) else {
                continue;
            };
            for (name, rel) in &node.relationships {
                let Some(&target_id) = ids.get(rel.target.as_str()) else {
                    debug!("Relationship {}|{}|{} has no target record", node.label, name, rel.target);
                    stats.dangling += 1;
                    continue;
                };
                let statement = Statement::CreateRelationshipRecord {
                    source_id,
                    target_id,
                    record: RelationshipRecord {
                        original_type: name.clone(),
                        description: rel.description.clone(),
                        properties: encode_relationship_properties(&rel.properties),
                        version: doc.version,
                        timestamp: doc.timestamp.clone(),
                    },
                };
                self.execute(&statement).await?;
                stats.relationships += 1;
            }
        }

        self.progress("Writing schema metadata");
        let metadata =
            MetadataRecord::for_document(doc, doc.node_types.len(), doc.relationship_count());
        self.execute(&Statement::CreateMetadataRecord(metadata))
            .await?;

        Ok(stats)
    }
}

#[derive(Debug, Default)]
struct WriteStats {
    nodes: usize,
    relationships: usize,
    dangling: usize,
}

impl EditorSession {
    pub(crate) fn runner<'a, C: GraphStoreClient + ?Sized>(
        &mut self,
        client: &'a C,
        events: &'a EventBus,
        operation: Operation,
        total_steps: usize,
    ) -> Runner<'a, C> {
        let operation_id = self.next_operation_id();
        Runner::new(
            client,
            events,
            self.config.step_timeout,
            operation,
            operation_id,
            total_steps,
        )
    }

    /// Save the session document to the store.
    pub async fn save<C, P>(&mut self, client: &C, prompt: &P) -> Result<SaveOutcome>
    where
        C: GraphStoreClient + ?Sized,
        P: SavePrompt + ?Sized,
    {
        let doc = self.document.as_ref().ok_or(SchemaError::NoDocument)?;
        let version = doc.version;
        let synced = self.last_known_remote_version == Some(version);

        if synced && self.ledger.is_empty() && !self.modified && !self.structure_changed {
            debug!("Session already matches stored version {}", version);
            return Ok(SaveOutcome::UpToDate { version });
        }

        if synced && !self.ledger.is_empty() && !self.structure_changed {
            let snapshot = self.ledger.for_sync();
            if prompt.confirm_property_patch(&snapshot) {
                if let Some(report) = self.property_patch(client, &snapshot).await? {
                    return Ok(SaveOutcome::Patched(report));
                }
            } else {
                debug!("Property patch declined; falling back to a full save");
            }
        }

        self.full_save(client, prompt).await
    }

    /// Write the tracked descriptive changes in place.
    ///
    /// Returns `None` when the store has moved past our version, in which case
    /// nothing was written and the caller should do a full save.
    async fn property_patch<C>(
        &mut self,
        client: &C,
        snapshot: &SyncSnapshot,
    ) -> Result<Option<PatchReport>>
    where
        C: GraphStoreClient + ?Sized,
    {
        let events = self.events.clone();
        let mut runner = self.runner(client, &events, Operation::PropertyPatch, 3);
        let doc = self.document.clone().ok_or(SchemaError::NoDocument)?;
        let version = doc.version;

        runner.enter(SyncPhase::CheckingRemoteVersion);
        let remote = match runner.remote_max_version().await {
            Ok(remote) => remote,
            Err(e) => {
                runner.failed(&e);
                return Err(e);
            }
        };
        if remote != Some(version) {
            info!(
                "Store is at version {:?}, local at {}; property patch not possible",
                remote, version
            );
            runner.enter(SyncPhase::Idle);
            return Ok(None);
        }

        runner.enter(SyncPhase::Writing);
        let timestamp = now_timestamp();
        let mut report = PatchReport {
            version,
            ..PatchReport::default()
        };
        // Elements whose record was patched.
        let mut persisted: Vec<(ChangeScope, String)> = Vec::new();
        // Elements whose record patch failed; the embedded document keeps their old values.
        let mut failed: Vec<(ChangeScope, String)> = Vec::new();
        // Dangling relationships, stored only in the embedded document.
        let mut embedded_only: Vec<(ChangeScope, String)> = Vec::new();

        runner.progress(format!("Updating {} node records", snapshot.nodes.len()));
        for changes in &snapshot.nodes {
            let Some(node) = doc.node(&changes.label) else {
                report.missing.push(changes.label.clone());
                continue;
            };
            let statement = Statement::PatchNodeRecord {
                version,
                label: node.label.clone(),
                description: node.description.clone(),
                properties: encode_attributes(&node.attributes),
                timestamp: timestamp.clone(),
            };
            match patch_count(&runner, &statement).await {
                Ok(0) => report.missing.push(changes.label.clone()),
                Ok(_) => {
                    report.nodes_updated += 1;
                    persisted.push((ChangeScope::Node, changes.label.clone()));
                }
                Err(e @ SyncError::Store { .. }) => {
                    report.errors.push(format!("{}: {}", changes.label, e));
                    failed.push((ChangeScope::Node, changes.label.clone()));
                }
                Err(e) => {
                    runner.failed(&e);
                    self.forget_persisted(&persisted);
                    return Err(e);
                }
            }
        }

        runner.progress(format!(
            "Updating {} relationship records",
            snapshot.relationships.len()
        ));
        for changes in &snapshot.relationships {
            let key = &changes.key;
            let element = key.to_string();
            let Some(rel) = find_relationship(&doc, &key.source, &key.name, &key.target) else {
                report.missing.push(element);
                continue;
            };
            if doc.node(&key.target).is_none() {
                embedded_only.push((ChangeScope::Relationship, element));
                continue;
            }
            let statement = Statement::PatchRelationshipRecord {
                version,
                source: key.source.clone(),
                rel_type: key.name.clone(),
                target: key.target.clone(),
                description: rel.description.clone(),
                properties: encode_relationship_properties(&rel.properties),
                timestamp: timestamp.clone(),
            };
            match patch_count(&runner, &statement).await {
                Ok(0) => report.missing.push(element),
                Ok(_) => {
                    report.relationships_updated += 1;
                    persisted.push((ChangeScope::Relationship, element));
                }
                Err(e @ SyncError::Store { .. }) => {
                    report.errors.push(format!("{}: {}", element, e));
                    failed.push((ChangeScope::Relationship, element));
                }
                Err(e) => {
                    runner.failed(&e);
                    self.forget_persisted(&persisted);
                    return Err(e);
                }
            }
        }

        runner.progress("Updating embedded document");
        let embedded = self.embedded_without(&doc, &failed);
        let statement = Statement::PatchMetadataDocument {
            version,
            document: encode_document(&embedded),
        };
        if let Err(e) = runner.execute(&statement).await {
            runner.failed(&e);
            self.forget_persisted(&persisted);
            return Err(e);
        }

        persisted.extend(embedded_only);
        self.forget_persisted(&persisted);
        if self.ledger.is_empty() {
            self.modified = false;
        }

        if report.is_complete() {
            info!(
                "Patched {} node and {} relationship records at version {}",
                report.nodes_updated, report.relationships_updated, version
            );
        } else {
            warn!(
                "Property patch at version {} left {} elements unpersisted",
                version,
                report.missing.len() + report.errors.len()
            );
        }
        runner.committed(version);
        Ok(Some(report))
    }

    /// Copy of `doc` with the tracked edits of `failed` elements put back to
    /// their original values, so the embedded document matches the records.
    fn embedded_without(
        &self,
        doc: &SchemaDocument,
        failed: &[(ChangeScope, String)],
    ) -> SchemaDocument {
        let mut embedded = doc.clone();
        for (scope, key) in failed {
            for entry in self.ledger.element_entries(*scope, key) {
                if let Err(e) = revert(&mut embedded, entry) {
                    warn!("Could not revert {} {} in embedded document: {}", key, entry.property_path, e);
                }
            }
        }
        embedded
    }

    fn forget_persisted(&mut self, persisted: &[(ChangeScope, String)]) {
        for (scope, key) in persisted {
            self.ledger.remove_element(*scope, key);
        }
    }

    async fn full_save<C, P>(&mut self, client: &C, prompt: &P) -> Result<SaveOutcome>
    where
        C: GraphStoreClient + ?Sized,
        P: SavePrompt + ?Sized,
    {
        let events = self.events.clone();
        let mut runner = self.runner(client, &events, Operation::Save, 4);

        let doc = self.document.as_mut().ok_or(SchemaError::NoDocument)?;
        let previous = (doc.version, doc.timestamp.clone());
        doc.version += 1;
        doc.timestamp = now_timestamp();
        let snapshot = doc.clone();

        let result = Self::write_full(&mut runner, &snapshot, prompt).await;
        match result {
            Ok((stats, overwrote)) => {
                self.ledger.clear();
                self.modified = false;
                self.structure_changed = false;
                self.last_known_remote_version = Some(snapshot.version);
                info!(
                    "Saved schema version {} ({} nodes, {} relationships)",
                    snapshot.version, stats.nodes, stats.relationships
                );
                runner.committed(snapshot.version);
                Ok(SaveOutcome::Saved {
                    version: snapshot.version,
                    nodes: stats.nodes,
                    relationships: stats.relationships,
                    dangling: stats.dangling,
                    overwrote,
                })
            }
            Err(e) => {
                if let Some(doc) = self.document.as_mut() {
                    doc.version = previous.0;
                    doc.timestamp = previous.1;
                }
                if e.is_conflict() {
                    runner.enter(SyncPhase::Idle);
                } else {
                    runner.failed(&e);
                }
                Err(e)
            }
        }
    }

    async fn write_full<C, P>(
        runner: &mut Runner<'_, C>,
        doc: &SchemaDocument,
        prompt: &P,
    ) -> Result<(WriteStats, Option<VersionConflict>)>
    where
        C: GraphStoreClient + ?Sized,
        P: SavePrompt + ?Sized,
    {
        runner.enter(SyncPhase::CheckingRemoteVersion);
        let mut overwrote = None;
        let remote = runner.remote_max_version().await?;
        if let Some(remote_version) = remote.filter(|v| *v > doc.version) {
            runner.enter(SyncPhase::ConflictPrompt);
            let conflict = VersionConflict {
                local_version: doc.version,
                remote_version,
            };
            if !prompt.confirm_overwrite(&conflict) {
                info!(
                    "Overwrite of stored version {} declined",
                    remote_version
                );
                return Err(SyncError::Conflict {
                    operation_id: runner.operation_id,
                    local_version: conflict.local_version,
                    remote_version,
                });
            }
            warn!(
                "Overwriting stored version {} with version {}",
                remote_version, doc.version
            );
            overwrote = Some(conflict);
        }

        runner.enter(SyncPhase::Writing);
        let stats = runner.write_structure(doc).await?;
        Ok((stats, overwrote))
    }

    /// Replace the session document with the newest stored schema.
    pub async fn load<C>(&mut self, client: &C) -> Result<LoadOutcome>
    where
        C: GraphStoreClient + ?Sized,
    {
        let events = self.events.clone();
        let mut runner = self.runner(client, &events, Operation::Load, 3);
        runner.enter(SyncPhase::Reading);

        match read_stored(&mut runner).await {
            Ok(None) => {
                info!("No schema stored");
                runner.enter(SyncPhase::Idle);
                Ok(LoadOutcome::Empty)
            }
            Ok(Some((doc, recovered))) => {
                let report = LoadReport {
                    version: doc.version,
                    nodes: doc.node_types.len(),
                    relationships: doc.relationship_count(),
                    recovered,
                };
                info!(
                    "Loaded schema version {} ({} nodes, {} relationships)",
                    report.version, report.nodes, report.relationships
                );
                self.replace_synced(doc);
                runner.committed(report.version);
                Ok(LoadOutcome::Loaded(report))
            }
            Err(e) => {
                runner.failed(&e);
                Err(e)
            }
        }
    }

    /// Read the live database structure without touching the session or the store.
    pub async fn introspect<C>(&mut self, client: &C) -> Result<LiveStructure>
    where
        C: GraphStoreClient + ?Sized,
    {
        let events = self.events.clone();
        let config = self.config.clone();
        let mut runner = self.runner(client, &events, Operation::Introspect, 4);
        runner.enter(SyncPhase::Reading);
        match introspect_live(&mut runner, &config).await {
            Ok(live) => {
                runner.enter(SyncPhase::Idle);
                Ok(live)
            }
            Err(e) => {
                runner.failed(&e);
                Err(e)
            }
        }
    }

    /// Build a fresh version-1 document from live data and store it,
    /// replacing whatever was stored. No conflict check is made.
    pub async fn generate_from_live<C>(&mut self, client: &C) -> Result<GenerateReport>
    where
        C: GraphStoreClient + ?Sized,
    {
        let events = self.events.clone();
        let config = self.config.clone();
        let mut runner = self.runner(client, &events, Operation::Generate, 8);

        runner.enter(SyncPhase::Reading);
        let result = async {
            let live = introspect_live(&mut runner, &config).await?;
            let doc = live.to_document();
            runner.enter(SyncPhase::Writing);
            let stats = runner.write_structure(&doc).await?;
            Ok::<_, SyncError>((doc, stats))
        }
        .await;

        match result {
            Ok((doc, stats)) => {
                let report = GenerateReport {
                    version: doc.version,
                    nodes: stats.nodes,
                    relationships: doc.relationship_count(),
                };
                info!(
                    "Generated schema from live data ({} nodes, {} relationships)",
                    report.nodes, report.relationships
                );
                self.replace_synced(doc);
                runner.committed(report.version);
                Ok(report)
            }
            Err(e) => {
                runner.failed(&e);
                Err(e)
            }
        }
    }
}

async fn patch_count<C: GraphStoreClient + ?Sized>(
    runner: &Runner<'_, C>,
    statement: &Statement,
) -> Result<u64> {
    let rows = runner.execute(statement).await?;
    Ok(rows
        .first()
        .and_then(|row| row.get("updated"))
        .and_then(Value::as_u64)
        .unwrap_or(0))
}

fn find_relationship<'d>(
    doc: &'d SchemaDocument,
    source: &str,
    name: &str,
    target: &str,
) -> Option<&'d Relationship> {
    doc.node(source)
        .and_then(|node| node.relationships.get(name))
        .filter(|rel| rel.target == target)
}

/// Read the newest stored schema. `None` when nothing is stored.
async fn read_stored<C: GraphStoreClient + ?Sized>(
    runner: &mut Runner<'_, C>,
) -> Result<Option<(SchemaDocument, Vec<String>)>> {
    runner.progress("Reading schema metadata");
    let statement = Statement::LatestMetadata;
    let rows = runner.execute(&statement).await?;
    let Some(row) = rows.first() else {
        return Ok(None);
    };
    let meta = map_column(row, "meta")
        .and_then(MetadataRecord::from_map)
        .map_err(|e| runner.store_error(statement.name(), e))?;
    let version = meta.version;
    let mut recovered = Vec::new();

    runner.progress("Reading node records");
    let statement = Statement::NodeRecords { version };
    let mut node_types = Vec::new();
    for row in runner.execute(&statement).await? {
        let record = map_column(&row, "n")
            .and_then(NodeRecord::from_map)
            .map_err(|e| runner.store_error(statement.name(), e))?;
        let (attributes, error) = record.attributes();
        if let Some(e) = error {
            runner.recovered(&record.original_label, &e);
            recovered.push(record.original_label.clone());
        }
        node_types.push(NodeType {
            label: record.original_label,
            description: record.description,
            attributes,
            relationships: Default::default(),
        });
    }
    node_types.sort_by(|a, b| a.label.cmp(&b.label));

    runner.progress("Reading relationship records");
    let statement = Statement::RelationshipRecords { version };
    for row in runner.execute(&statement).await? {
        let endpoint = |column: &str| -> std::result::Result<String, StoreError> {
            map_column(&row, column)?
                .get("originalLabel")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| StoreError::Shape(format!("{} has no originalLabel", column)))
        };
        let (source, target, record) = endpoint("source")
            .and_then(|source| Ok((source, endpoint("target")?)))
            .and_then(|(source, target)| {
                Ok((source, target, RelationshipRecord::from_map(map_column(&row, "r")?)?))
            })
            .map_err(|e| runner.store_error(statement.name(), e))?;

        let (properties, error) = record.properties();
        let element = format!("{}|{}|{}", source, record.original_type, target);
        if let Some(e) = error {
            runner.recovered(&element, &e);
            recovered.push(element.clone());
        }
        match node_types.iter_mut().find(|n| n.label == source) {
            Some(node) => {
                node.relationships.insert(
                    record.original_type,
                    Relationship {
                        target,
                        description: record.description,
                        properties,
                    },
                );
            }
            None => warn!("Relationship record {} has no source node record", element),
        }
    }

    let mut doc = SchemaDocument {
        version,
        timestamp: meta.timestamp.clone(),
        description: String::new(),
        node_types,
    };

    if let Some(embedded) = meta.embedded_document() {
        doc.description = embedded.description;
        restore_dangling(&mut doc, &embedded.node_types);
    }

    Ok(Some((doc, recovered)))
}

/// Relationships toward labels without a node record only survive in the
/// embedded document. Put them back.
fn restore_dangling(doc: &mut SchemaDocument, embedded: &[NodeType]) {
    let labels: std::collections::HashSet<String> =
        doc.node_types.iter().map(|n| n.label.clone()).collect();
    for source in embedded {
        let Some(node) = doc.node_mut(&source.label) else {
            continue;
        };
        for (name, rel) in &source.relationships {
            if !labels.contains(&rel.target) && !node.relationships.contains_key(name) {
                node.relationships.insert(name.clone(), rel.clone());
            }
        }
    }
}
