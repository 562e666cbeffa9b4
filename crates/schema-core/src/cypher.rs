//! Property-update Cypher script.
//!
//! The script only `SET`s descriptions and property blobs on existing registry
//! records. It never creates or deletes records, so it is safe to run against a
//! store whose structure already matches the document.

use crate::codec::{encode_attributes, encode_relationship_properties};
use crate::document::{now_timestamp, SchemaDocument};
use crate::store::{SCHEMA_LABEL, SCHEMA_RELATIONSHIP};

/// Default file name for an exported script.
pub fn script_file_name(version: u64) -> String {
    format!("schema_properties_update_v{}.cypher", version)
}

/// Escape text for a single-quoted Cypher string literal.
pub fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn property_update_script(doc: &SchemaDocument) -> String {
    property_update_script_at(doc, &now_timestamp())
}

pub fn property_update_script_at(doc: &SchemaDocument, generated: &str) -> String {
    let mut out = vec![
        "// === Schema Property Updates ===".to_string(),
        format!("// Generated: {}", generated),
        format!("// Version: {}", doc.version),
        "// Only node and relationship properties are updated.".to_string(),
        "// The graph structure is not modified.".to_string(),
    ];

    for node in &doc.node_types {
        if !node.description.is_empty() || !node.attributes.is_empty() {
            out.push(String::new());
            out.push(format!("// Update properties for {} nodes", node.label));
            out.push(format!(
                "MATCH (schema:`{schema}` {{originalLabel: '{label}', nodeType: 'node'}})\n\
                 SET schema.properties = '{props}'\n\
                 SET schema.description = '{description}'\n\
                 SET schema.updatedAt = datetime()\n\
                 RETURN schema.originalLabel AS updated;",
                schema = SCHEMA_LABEL,
                label = escape(&node.label),
                props = escape(&encode_attributes(&node.attributes)),
                description = escape(&node.description),
            ));
        }

        for (name, rel) in &node.relationships {
            if rel.description.is_empty() && rel.properties.is_empty() {
                continue;
            }
            out.push(String::new());
            out.push(format!(
                "// Update {} for {}-[{}]->{}",
                SCHEMA_RELATIONSHIP, node.label, name, rel.target
            ));
            out.push(format!(
                "MATCH (source:`{schema}` {{originalLabel: '{source}', nodeType: 'node'}})\
                 -[rel:`{link}` {{originalType: '{name}'}}]->\
                 (target:`{schema}` {{originalLabel: '{target}', nodeType: 'node'}})\n\
                 SET rel.properties = '{props}'\n\
                 SET rel.description = '{description}'\n\
                 SET rel.updatedAt = datetime()\n\
                 RETURN rel.originalType AS updated;",
                schema = SCHEMA_LABEL,
                link = SCHEMA_RELATIONSHIP,
                source = escape(&node.label),
                name = escape(name),
                target = escape(&rel.target),
                props = escape(&encode_relationship_properties(&rel.properties)),
                description = escape(&rel.description),
            ));
        }
    }

    out.push(String::new());
    out.push("// === Validation Query ===".to_string());
    out.push(format!(
        "MATCH (n:`{}`)\n\
         RETURN n.nodeType AS type, n.originalLabel AS label, n.description AS description\n\
         ORDER BY n.nodeType, n.originalLabel;",
        SCHEMA_LABEL
    ));

    out.join("\n")
}
