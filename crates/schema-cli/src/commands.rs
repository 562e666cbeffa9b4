//! File-level commands behind the `schema-sync` binary.

use crate::snapshot::{Snapshot, SnapshotError};
use schema_core::cypher::{property_update_script, script_file_name};
use schema_core::file::export_file_name;
use schema_core::{
    compare_values, ComparisonReport, ConnectionStatus, EditorSession, LiveComparison, NodeSample,
    RelationshipSample, SchemaDocument, SchemaError, SyncConfig, SyncError,
};
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Schema { path: String, source: SchemaError },

    #[error("{path}: invalid JSON: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

pub type Result<T> = std::result::Result<T, CommandError>;

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| CommandError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn write(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|source| CommandError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn schema_error(path: &Path) -> impl FnOnce(SchemaError) -> CommandError + '_ {
    move |source| CommandError::Schema {
        path: path.display().to_string(),
        source,
    }
}

/// Open a schema file in a fresh session.
fn open(path: &Path, config: &SyncConfig) -> Result<EditorSession> {
    let mut session = EditorSession::with_config(config.clone());
    let parsed = session
        .import_json(&read(path)?)
        .map_err(schema_error(path))?;
    if parsed.defaulted {
        info!("{} had no valid version/timestamp; defaults applied", path.display());
    }
    Ok(session)
}

fn source_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

fn output_dir(path: &Path, out_dir: Option<&Path>) -> PathBuf {
    match out_dir {
        Some(dir) => dir.to_path_buf(),
        None => path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

/// A file written by a command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrittenFile {
    pub path: PathBuf,
    pub version: u64,
}

impl Display for WrittenFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Wrote {} (version {})", self.path.display(), self.version)
    }
}

// --- validate ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub file: String,
    pub version: u64,
    pub timestamp: String,
    pub description: String,
    pub node_types: usize,
    pub attributes: usize,
    pub relationships: usize,
    /// `version` or `timestamp` was missing and defaulted.
    pub defaulted: bool,
}

impl Display for ValidationSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: valid schema (version {})", self.file, self.version)?;
        if !self.description.is_empty() {
            writeln!(f, "  {}", self.description)?;
        }
        writeln!(
            f,
            "  {} node types, {} attributes, {} relationships",
            self.node_types, self.attributes, self.relationships
        )?;
        if self.defaulted {
            writeln!(f, "  version/timestamp missing; defaults applied")?;
        }
        Ok(())
    }
}

pub fn validate(path: &Path) -> Result<ValidationSummary> {
    let parsed = SchemaDocument::from_json(&read(path)?).map_err(schema_error(path))?;
    let doc = &parsed.document;
    doc.check_invariants().map_err(schema_error(path))?;
    Ok(ValidationSummary {
        file: path.display().to_string(),
        version: doc.version,
        timestamp: doc.timestamp.clone(),
        description: doc.description.clone(),
        node_types: doc.node_types.len(),
        attributes: doc.attribute_count(),
        relationships: doc.relationship_count(),
        defaulted: parsed.defaulted,
    })
}

// --- diff ---

/// Compare two schema files. Structurally invalid input is reported in the
/// returned report rather than as an error.
pub fn diff(left: &Path, right: &Path) -> Result<ComparisonReport> {
    let parse = |path: &Path| -> Result<serde_json::Value> {
        serde_json::from_str(&read(path)?).map_err(|source| CommandError::Json {
            path: path.display().to_string(),
            source,
        })
    };
    let (a, b) = (parse(left)?, parse(right)?);
    let name = |path: &Path| source_name(path).unwrap_or_else(|| path.display().to_string());
    Ok(compare_values(&a, &name(left), &b, &name(right)))
}

// --- live-diff ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveDiffReport {
    #[serde(flatten)]
    pub comparison: LiveComparison,
    /// Written when additions were applied.
    pub applied: Option<WrittenFile>,
    pub added: usize,
}

impl Display for LiveDiffReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let c = &self.comparison;
        if c.in_sync() {
            writeln!(f, "Schema matches live data.")?;
        } else {
            writeln!(f, "{} differences against live data", c.total())?;
        }
        let missing = &c.missing_in_schema;
        if c.has_additions() {
            writeln!(f, "Missing in schema:")?;
            for node in &missing.nodes {
                writeln!(
                    f,
                    "  [+] node {} ({} properties, {} relationships)",
                    node.label,
                    node.properties.len(),
                    node.relationships.len()
                )?;
            }
            for prop in &missing.properties {
                writeln!(f, "  [+] property {}.{} ({})", prop.node, prop.property, prop.attr_type)?;
            }
            for rel in &missing.relationships {
                writeln!(f, "  [+] relationship {}-[{}]->{}", rel.source, rel.rel_type, rel.target)?;
            }
        }
        if !c.missing_in_db.nodes.is_empty() {
            writeln!(f, "Missing in database:")?;
            for node in &c.missing_in_db.nodes {
                writeln!(f, "  [?] node {}", node.label)?;
            }
        }
        if let Some(written) = &self.applied {
            writeln!(f, "Applied {} additions.", self.added)?;
            write!(f, "{}", written)?;
        }
        Ok(())
    }
}

/// Compare a schema file against a live data snapshot, optionally merging the
/// missing elements and writing the result as a new file version.
pub async fn live_diff(
    schema: &Path,
    snapshot: &Path,
    apply_to: Option<&Path>,
    config: &SyncConfig,
) -> Result<LiveDiffReport> {
    let mut session = open(schema, config)?;
    let store = Snapshot::read(snapshot)?.into_store()?;
    let live = session.introspect(&store).await?;
    let comparison = session.compare_with_live(&live).map_err(schema_error(schema))?;
    debug!("Live comparison found {} differences", comparison.total());

    let mut report = LiveDiffReport {
        comparison,
        applied: None,
        added: 0,
    };
    if let Some(dir) = apply_to {
        if report.comparison.has_additions() {
            report.added = session
                .apply_live_additions(&live)
                .map_err(schema_error(schema))?;
            report.applied = Some(export(&mut session, schema, Some(dir))?);
        }
    }
    Ok(report)
}

// --- generate ---

/// Generate a schema from a live data snapshot and write it as
/// `generated_schema_v<version>.json`.
pub async fn generate(snapshot: &Path, out_dir: &Path, config: &SyncConfig) -> Result<WrittenFile> {
    let store = Snapshot::read(snapshot)?.into_store()?;
    let mut session = EditorSession::with_config(config.clone());
    let report = session.generate_from_live(&store).await?;
    info!(
        "Generated {} node types and {} relationships",
        report.nodes, report.relationships
    );

    let doc = session
        .document()
        .ok_or(CommandError::Sync(SyncError::Schema(SchemaError::NoDocument)))?;
    let path = out_dir.join(export_file_name(Some("generated_schema"), doc.version));
    write(&path, &doc.to_json_pretty())?;
    Ok(WrittenFile {
        path,
        version: doc.version,
    })
}

// --- cypher ---

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CypherScript {
    pub version: u64,
    pub script: String,
    pub written: Option<WrittenFile>,
}

impl Display for CypherScript {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.written {
            Some(written) => write!(f, "{}", written),
            None => writeln!(f, "{}", self.script),
        }
    }
}

/// Property-update script for a schema file. Written to `out` when given,
/// where a directory gets the default script file name.
pub fn cypher(schema: &Path, out: Option<&Path>, config: &SyncConfig) -> Result<CypherScript> {
    let session = open(schema, config)?;
    let doc = session
        .document()
        .ok_or_else(|| schema_error(schema)(SchemaError::NoDocument))?;
    let script = property_update_script(doc);
    let written = match out {
        Some(out) => {
            let path = if out.is_dir() {
                out.join(script_file_name(doc.version))
            } else {
                out.to_path_buf()
            };
            write(&path, &script)?;
            Some(WrittenFile {
                path,
                version: doc.version,
            })
        }
        None => None,
    };
    Ok(CypherScript {
        version: doc.version,
        script,
        written,
    })
}

// --- normalize ---

/// Re-export a schema file as the next file version, canonicalizing legacy
/// shapes and pretty-printing.
pub fn normalize(schema: &Path, out_dir: Option<&Path>, config: &SyncConfig) -> Result<WrittenFile> {
    let mut session = open(schema, config)?;
    export(&mut session, schema, out_dir)
}

fn export(session: &mut EditorSession, source: &Path, out_dir: Option<&Path>) -> Result<WrittenFile> {
    let base = source_name(source);
    let file = session
        .export_json(base.as_deref())
        .map_err(schema_error(source))?;
    let path = output_dir(source, out_dir).join(&file.file_name);
    write(&path, &file.contents)?;
    Ok(WrittenFile {
        path,
        version: file.version,
    })
}

// --- sample ---

/// Which examples to fetch for a node label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleQuery {
    Nodes,
    Attribute(String),
    Relationship { name: String, target: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SampleReport {
    Nodes {
        label: String,
        samples: Vec<NodeSample>,
    },
    #[serde(rename_all = "camelCase")]
    Values {
        label: String,
        attribute: String,
        values: Vec<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    Relationships {
        label: String,
        rel_type: String,
        samples: Vec<RelationshipSample>,
    },
}

const MAX_SHOWN_PROPERTIES: usize = 5;
const MAX_VALUE_WIDTH: usize = 50;

fn truncate(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_VALUE_WIDTH {
        let head: String = text.chars().take(MAX_VALUE_WIDTH).collect();
        format!("{}...", head)
    } else {
        text
    }
}

impl Display for SampleReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SampleReport::Nodes { label, samples } => {
                if samples.is_empty() {
                    return writeln!(f, "No example nodes found for {}", label);
                }
                for (index, sample) in samples.iter().enumerate() {
                    writeln!(f, "Node {}:", index + 1)?;
                    for (key, value) in sample.properties.iter().take(MAX_SHOWN_PROPERTIES) {
                        writeln!(f, "  {}: {}", key, truncate(value))?;
                    }
                    if sample.properties.len() > MAX_SHOWN_PROPERTIES {
                        writeln!(f, "  ... and more properties")?;
                    }
                }
                Ok(())
            }
            SampleReport::Values {
                label,
                attribute,
                values,
            } => {
                if values.is_empty() {
                    return writeln!(f, "No example values found for {}.{}", label, attribute);
                }
                let shown: Vec<String> = values.iter().map(truncate).collect();
                writeln!(f, "{}.{}: {}", label, attribute, shown.join(", "))
            }
            SampleReport::Relationships { samples, .. } => {
                if samples.is_empty() {
                    return writeln!(f, "No example relationships found");
                }
                for sample in samples {
                    writeln!(f, "{}", sample)?;
                }
                Ok(())
            }
        }
    }
}

/// Fetch example nodes, attribute values or relationships for `label` from a
/// live data snapshot.
pub async fn sample(
    snapshot: &Path,
    label: &str,
    query: &SampleQuery,
    limit: usize,
    config: &SyncConfig,
) -> Result<SampleReport> {
    let store = Snapshot::read(snapshot)?.into_store()?;
    let mut session = EditorSession::with_config(config.clone());
    let report = match query {
        SampleQuery::Nodes => SampleReport::Nodes {
            label: label.to_string(),
            samples: session.sample_nodes(&store, label, limit).await?,
        },
        SampleQuery::Attribute(attribute) => SampleReport::Values {
            label: label.to_string(),
            attribute: attribute.clone(),
            values: session
                .sample_attribute_values(&store, label, attribute, limit)
                .await?,
        },
        SampleQuery::Relationship { name, target } => SampleReport::Relationships {
            label: label.to_string(),
            rel_type: name.clone(),
            samples: session
                .sample_relationships(&store, label, name, target.as_deref(), limit)
                .await?,
        },
    };
    Ok(report)
}

// --- check ---

/// Check that the store behind a snapshot answers and report its stored schema.
pub async fn check(snapshot: &Path, config: &SyncConfig) -> Result<ConnectionStatus> {
    let store = Snapshot::read(snapshot)?.into_store()?;
    let mut session = EditorSession::with_config(config.clone());
    Ok(session.check_connection(&store).await?)
}
