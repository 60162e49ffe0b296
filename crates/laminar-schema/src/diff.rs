//! Name-based diff between two event schemas.
//!
//! Used to describe what changed when a reader sees a new event descriptor.
//! Names are compared case-insensitively, matching how fields are mapped.

use std::collections::HashMap;
use std::fmt;

use arrow_schema::{DataType, Field, Schema};

/// One difference between an old and a new schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    /// Field present only in the new schema.
    ColumnAdded {
        /// Field name.
        name: String,
        /// Field type.
        data_type: DataType,
    },
    /// Field present only in the old schema.
    ColumnRemoved {
        /// Field name.
        name: String,
    },
    /// Field present in both with a different type.
    TypeChanged {
        /// Field name (as spelled in the new schema).
        name: String,
        /// Type in the old schema.
        old_type: DataType,
        /// Type in the new schema.
        new_type: DataType,
    },
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColumnAdded { name, data_type } => write!(f, "+{name}:{data_type}"),
            Self::ColumnRemoved { name } => write!(f, "-{name}"),
            Self::TypeChanged {
                name,
                old_type,
                new_type,
            } => write!(f, "~{name}:{old_type}->{new_type}"),
        }
    }
}

/// Computes the differences between `old` and `new`.
///
/// Order: removals, additions, type changes.
#[must_use]
pub fn diff_schemas_by_name(old: &Schema, new: &Schema) -> Vec<SchemaChange> {
    let old_fields = index_by_lowercase_name(old);
    let new_fields = index_by_lowercase_name(new);
    let mut changes = Vec::new();

    for field in old.fields() {
        if !new_fields.contains_key(&field.name().to_ascii_lowercase()) {
            changes.push(SchemaChange::ColumnRemoved {
                name: field.name().clone(),
            });
        }
    }

    for field in new.fields() {
        if !old_fields.contains_key(&field.name().to_ascii_lowercase()) {
            changes.push(SchemaChange::ColumnAdded {
                name: field.name().clone(),
                data_type: field.data_type().clone(),
            });
        }
    }

    for field in new.fields() {
        if let Some(old_field) = old_fields.get(&field.name().to_ascii_lowercase()) {
            if old_field.data_type() != field.data_type() {
                changes.push(SchemaChange::TypeChanged {
                    name: field.name().clone(),
                    old_type: old_field.data_type().clone(),
                    new_type: field.data_type().clone(),
                });
            }
        }
    }

    changes
}

/// Renders a change list for log lines, e.g. `-b, +c:Int64`.
#[must_use]
pub fn format_changes(changes: &[SchemaChange]) -> String {
    changes
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn index_by_lowercase_name(schema: &Schema) -> HashMap<String, &Field> {
    // First occurrence wins, same as field mapping.
    let mut index = HashMap::with_capacity(schema.fields().len());
    for field in schema.fields() {
        index
            .entry(field.name().to_ascii_lowercase())
            .or_insert(field.as_ref());
    }
    index
}
