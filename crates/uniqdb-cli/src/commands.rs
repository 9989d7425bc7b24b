//! Subcommands and their execution against a store.

use clap::Subcommand;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uniqdb_core::{
    Document, EntityKey, ModelMeta, RebuildReport, Store, SuffixFixer, UniqueSet,
};

/// Errors raised while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The store rejected the operation.
    #[error(transparent)]
    Store(#[from] uniqdb_core::Error),

    /// A document argument was not valid JSON.
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    /// A lookup argument was not `field=value`.
    #[error("expected field=value, got '{0}'")]
    InvalidAssignment(String),
}

/// A store operation.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Declare a model kind and its unique field sets
    Register {
        /// Model kind
        kind: String,

        /// Comma-separated fields that must be unique together (repeatable)
        #[arg(short, long = "unique", value_name = "FIELDS")]
        unique: Vec<String>,

        /// Do not constrain combinations containing null values
        #[arg(long)]
        nulls_distinct: bool,
    },

    /// List registered models
    Models,

    /// Create or update an entity from a JSON object
    Put {
        /// Model kind
        kind: String,

        /// Entity fields as a JSON object
        json: String,

        /// Update (or create) the entity with this id
        #[arg(long)]
        id: Option<u64>,

        /// On collision, append -2, -3, ... to this single-field unique set
        #[arg(long, value_name = "FIELD")]
        fix_suffix: Option<String>,
    },

    /// Show an entity
    Get {
        /// Model kind
        kind: String,
        /// Entity id
        id: u64,
    },

    /// Delete an entity and free its unique values
    Delete {
        /// Model kind
        kind: String,
        /// Entity id
        id: u64,
    },

    /// Find the entity holding a unique value combination
    Find {
        /// Model kind
        kind: String,

        /// field=value pairs naming one unique set; values parse as JSON,
        /// falling back to plain strings
        #[arg(required = true, value_name = "FIELD=VALUE")]
        values: Vec<String>,
    },

    /// List every entity of a kind
    Scan {
        /// Model kind
        kind: String,
    },

    /// Recompute a kind's unique markers from its stored entities
    Rebuild {
        /// Model kind
        kind: String,
    },
}

/// Result of a command, ready for formatting.
#[derive(Debug)]
pub enum Output {
    /// A single entity.
    Document(Document),
    /// Several entities.
    Documents(Vec<Document>),
    /// Registered models.
    Models(Vec<ModelMeta>),
    /// Marker rebuild summary.
    Rebuild(RebuildReport),
    /// A status line.
    Message(String),
    /// Nothing matched.
    NotFound,
}

/// Execute a command against the store.
pub fn execute(store: &Store, command: Command) -> Result<Output, CommandError> {
    debug!(?command, "executing");

    match command {
        Command::Register {
            kind,
            unique,
            nulls_distinct,
        } => {
            let meta = unique.iter().fold(ModelMeta::new(&kind), |meta, fields| {
                let set = UniqueSet::new(fields.split(',').map(str::trim))
                    .nulls_distinct(nulls_distinct);
                meta.with_unique_set(set)
            });
            store.register(meta)?;
            Ok(Output::Message(format!("registered {}", kind)))
        }

        Command::Models => {
            let models = store
                .catalog()
                .kinds()
                .iter()
                .filter_map(|kind| store.catalog().get(kind))
                .collect();
            Ok(Output::Models(models))
        }

        Command::Put {
            kind,
            json,
            id,
            fix_suffix,
        } => {
            if let Some(field) = fix_suffix {
                store.register_fixer(&kind, [field.as_str()], SuffixFixer::new(&field))?;
            }

            let mut doc = Document::from_json(&kind, serde_json::from_str(&json)?)?;
            if let Some(id) = id {
                doc = doc.with_id(id);
            }
            store.put(&mut doc)?;
            Ok(Output::Document(doc))
        }

        Command::Get { kind, id } => match store.get(&EntityKey::new(kind, id))? {
            Some(doc) => Ok(Output::Document(doc)),
            None => Ok(Output::NotFound),
        },

        Command::Delete { kind, id } => {
            let key = EntityKey::new(kind, id);
            if store.delete(&key)? {
                Ok(Output::Message(format!("deleted {}", key)))
            } else {
                Ok(Output::NotFound)
            }
        }

        Command::Find { kind, values } => {
            let pairs = values
                .iter()
                .map(String::as_str)
                .map(parse_assignment)
                .collect::<Result<Vec<_>, _>>()?;
            let refs: Vec<(&str, Value)> = pairs
                .iter()
                .map(|(field, value)| (field.as_str(), value.clone()))
                .collect();

            match store.find_by_unique(&kind, &refs)? {
                Some(doc) => Ok(Output::Document(doc)),
                None => Ok(Output::NotFound),
            }
        }

        Command::Scan { kind } => {
            let docs = store.scan(&kind).collect::<Result<Vec<_>, _>>()?;
            Ok(Output::Documents(docs))
        }

        Command::Rebuild { kind } => Ok(Output::Rebuild(store.rebuild_markers(&kind)?)),
    }
}

/// Split `field=value`, parsing the value as JSON or else taking it verbatim.
pub fn parse_assignment(arg: &str) -> Result<(String, Value), CommandError> {
    let (field, raw) = arg
        .split_once('=')
        .filter(|(field, _)| !field.is_empty())
        .ok_or_else(|| CommandError::InvalidAssignment(arg.to_string()))?;

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.to_string(), value))
}
