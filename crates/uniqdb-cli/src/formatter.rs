//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use serde_json::{json, Map, Value};
use uniqdb_core::{Document, ModelMeta, RebuildReport};

use crate::commands::Output;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON
    Json,
    /// ASCII table format
    Table,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format a command result.
    fn format(&self, output: &Output) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Table => Box::new(TableFormatter),
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format(&self, output: &Output) -> String {
        let value = match output {
            Output::Document(doc) => document_json(doc),
            Output::Documents(docs) => Value::Array(docs.iter().map(document_json).collect()),
            Output::Models(models) => Value::Array(models.iter().map(model_json).collect()),
            Output::Rebuild(report) => rebuild_json(report),
            Output::Message(message) => json!({ "message": message }),
            Output::NotFound => json!({ "found": false }),
        };
        serde_json::to_string_pretty(&value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}

fn document_json(doc: &Document) -> Value {
    json!({
        "kind": doc.kind(),
        "id": doc.id(),
        "fields": Value::Object(doc.fields().clone()),
    })
}

fn model_json(meta: &ModelMeta) -> Value {
    serde_json::to_value(meta).unwrap_or(Value::Null)
}

fn rebuild_json(report: &RebuildReport) -> Value {
    let conflicts: Vec<Value> = report
        .conflicts
        .iter()
        .map(|c| {
            json!({
                "fields": c.fields,
                "values": c.values,
                "kept": c.kept,
                "duplicate": c.duplicate,
            })
        })
        .collect();
    json!({
        "scanned": report.scanned,
        "restored": report.restored,
        "removed": report.removed,
        "conflicts": conflicts,
    })
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format(&self, output: &Output) -> String {
        match output {
            Output::Document(doc) => documents_table(std::slice::from_ref(doc)),
            Output::Documents(docs) if docs.is_empty() => "No results".to_string(),
            Output::Documents(docs) => documents_table(docs),
            Output::Models(models) => {
                let mut table = Table::new();
                table.set_header(vec!["kind", "unique"]);
                for meta in models {
                    let sets: Vec<String> = meta
                        .unique
                        .iter()
                        .map(|set| {
                            if set.nulls_distinct {
                                format!("({}) nulls distinct", set)
                            } else {
                                format!("({})", set)
                            }
                        })
                        .collect();
                    table.add_row(vec![Cell::new(&meta.kind), Cell::new(sets.join("\n"))]);
                }
                table.to_string()
            }
            Output::Rebuild(report) => {
                let mut table = Table::new();
                table.set_header(vec!["scanned", "restored", "removed", "conflicts"]);
                table.add_row(vec![
                    report.scanned.to_string(),
                    report.restored.to_string(),
                    report.removed.to_string(),
                    report.conflicts.len().to_string(),
                ]);
                let mut out = table.to_string();
                for c in &report.conflicts {
                    out.push_str(&format!(
                        "\nconflict on ({}): {} held by {} and {}",
                        c.fields.join(", "),
                        c.values,
                        c.kept,
                        c.duplicate
                    ));
                }
                out
            }
            Output::Message(message) => message.clone(),
            Output::NotFound => "Not found".to_string(),
        }
    }
}

/// One row per document, one column per field seen in any of them.
fn documents_table(docs: &[Document]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for doc in docs {
        for name in doc.fields().keys() {
            if !columns.contains(&name.as_str()) {
                columns.push(name);
            }
        }
    }

    let mut table = Table::new();
    let mut header = vec!["id"];
    header.extend(&columns);
    table.set_header(header);

    for doc in docs {
        let mut row = vec![doc.id().map(|id| id.to_string()).unwrap_or_default()];
        row.extend(columns.iter().map(|name| cell_text(doc.fields(), name)));
        table.add_row(row);
    }

    table.to_string()
}

fn cell_text(fields: &Map<String, Value>, name: &str) -> String {
    match fields.get(name) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uniqdb_core::UniqueConflict;

    #[test]
    fn test_cell_text() {
        let fields = json!({"a": "x", "b": 3, "c": null, "d": [1, 2]})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(cell_text(&fields, "a"), "x");
        assert_eq!(cell_text(&fields, "b"), "3");
        assert_eq!(cell_text(&fields, "c"), "");
        assert_eq!(cell_text(&fields, "d"), "[1,2]");
        assert_eq!(cell_text(&fields, "missing"), "");
    }

    #[test]
    fn test_json_not_found() {
        let out = JsonFormatter.format(&Output::NotFound);
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value, json!({"found": false}));
    }

    #[test]
    fn test_json_rebuild() {
        let report = RebuildReport {
            scanned: 3,
            restored: 2,
            removed: 0,
            conflicts: vec![UniqueConflict {
                fields: vec!["name".to_string()],
                values: "name=\"rust\"".to_string(),
                kept: 1,
                duplicate: 2,
            }],
        };
        let value: Value =
            serde_json::from_str(&JsonFormatter.format(&Output::Rebuild(report))).unwrap();
        assert_eq!(value["restored"], json!(2));
        assert_eq!(value["conflicts"][0]["duplicate"], json!(2));
    }

    #[test]
    fn test_table_lists_all_columns() {
        let docs = vec![
            Document::from_json("User", json!({"email": "a@x"})).unwrap(),
            Document::from_json("User", json!({"email": "b@x", "name": "Bo"})).unwrap(),
        ];
        let out = TableFormatter.format(&Output::Documents(docs));
        assert!(out.contains("email"));
        assert!(out.contains("name"));
        assert!(out.contains("Bo"));
    }

    #[test]
    fn test_table_empty() {
        assert_eq!(TableFormatter.format(&Output::Documents(Vec::new())), "No results");
    }
}
