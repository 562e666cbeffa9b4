//! Local file import/export naming.

use crate::document::{now_timestamp, SchemaDocument};
use serde::Serialize;

/// A document serialized for writing to disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFile {
    pub file_name: String,
    pub version: u64,
    pub timestamp: String,
    pub contents: String,
}

/// `<base>_v<version>.json`, with a trailing `.json` on `base` dropped, or
/// `schema_v<version>.json` without a base.
pub fn export_file_name(base: Option<&str>, version: u64) -> String {
    match base.map(str::trim).filter(|b| !b.is_empty()) {
        Some(base) => format!("{}_v{}.json", strip_json_extension(base), version),
        None => format!("schema_v{}.json", version),
    }
}

fn strip_json_extension(name: &str) -> &str {
    let len = name.len();
    if len >= 5 && name.is_char_boundary(len - 5) && name[len - 5..].eq_ignore_ascii_case(".json") {
        &name[..len - 5]
    } else {
        name
    }
}

/// Bump the version, refresh the timestamp and serialize.
pub fn export_document(doc: &mut SchemaDocument, base: Option<&str>) -> ExportedFile {
    doc.version += 1;
    doc.timestamp = now_timestamp();
    ExportedFile {
        file_name: export_file_name(base, doc.version),
        version: doc.version,
        timestamp: doc.timestamp.clone(),
        contents: doc.to_json_pretty(),
    }
}
