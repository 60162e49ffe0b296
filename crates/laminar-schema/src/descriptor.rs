//! Serializable schema descriptors for stream events.
//!
//! A [`SchemaDescriptor`] pairs an Arrow schema with its packed byte form.
//! The packed bytes are the descriptor's identity: two descriptors are equal
//! exactly when their packed bytes are equal, which lets readers detect a
//! schema change with a `memcmp` before paying for [`unpack`].
//!
//! Attributes Arrow has no slot for travel in field metadata:
//!
//! | Key | Meaning |
//! |-----|---------|
//! | [`TYPE_MODIFIER_KEY`] | type modifier (record type id for anonymous records) |
//! | [`COLLATION_KEY`] | collation name for text fields |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields, Schema, SchemaRef};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};

/// Field metadata key holding the type modifier.
pub const TYPE_MODIFIER_KEY: &str = "laminar.typmod";

/// Field metadata key holding the collation name.
pub const COLLATION_KEY: &str = "laminar.collation";

/// Type modifier of a field that has none.
pub const NO_TYPE_MODIFIER: i32 = -1;

// ── Wire format ────────────────────────────────────────────────────

// Metadata is kept in a `BTreeMap` so that packing the same schema twice
// yields the same bytes.
#[derive(Serialize, Deserialize)]
struct WireField {
    name: String,
    data_type: DataType,
    nullable: bool,
    metadata: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize)]
struct WireSchema {
    fields: Vec<WireField>,
}

/// Serializes a schema into its packed byte form.
///
/// # Errors
///
/// Returns [`SchemaError::Pack`] if encoding fails.
pub fn pack(schema: &Schema) -> SchemaResult<Bytes> {
    let wire = WireSchema {
        fields: schema
            .fields()
            .iter()
            .map(|f| WireField {
                name: f.name().clone(),
                data_type: f.data_type().clone(),
                nullable: f.is_nullable(),
                metadata: f
                    .metadata()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            })
            .collect(),
    };
    bincode::serde::encode_to_vec(&wire, bincode::config::standard())
        .map(Bytes::from)
        .map_err(|e| SchemaError::Pack(e.to_string()))
}

/// Reads a schema back from its packed byte form.
///
/// # Errors
///
/// Returns [`SchemaError::Unpack`] if the bytes are not a packed schema.
pub fn unpack(packed: &[u8]) -> SchemaResult<SchemaRef> {
    let (wire, read): (WireSchema, usize) =
        bincode::serde::decode_from_slice(packed, bincode::config::standard())
            .map_err(|e| SchemaError::Unpack(e.to_string()))?;
    if read != packed.len() {
        return Err(SchemaError::Unpack(format!(
            "{} trailing bytes after descriptor",
            packed.len() - read
        )));
    }
    let fields: Vec<Field> = wire
        .fields
        .into_iter()
        .map(|f| {
            Field::new(f.name, f.data_type, f.nullable)
                .with_metadata(f.metadata.into_iter().collect::<HashMap<_, _>>())
        })
        .collect();
    Ok(Arc::new(Schema::new(fields)))
}

// ── Field helpers ──────────────────────────────────────────────────

/// Returns `field` with its type modifier set.
#[must_use]
pub fn with_type_modifier(field: Field, type_modifier: i32) -> Field {
    let mut metadata = field.metadata().clone();
    metadata.insert(TYPE_MODIFIER_KEY.to_string(), type_modifier.to_string());
    field.with_metadata(metadata)
}

/// Returns `field` with its collation set.
#[must_use]
pub fn with_collation(field: Field, collation: &str) -> Field {
    let mut metadata = field.metadata().clone();
    metadata.insert(COLLATION_KEY.to_string(), collation.to_string());
    field.with_metadata(metadata)
}

/// Creates a nullable anonymous record field whose layout is registered
/// separately under `type_modifier`.
#[must_use]
pub fn record_field(name: &str, type_modifier: i32) -> Field {
    with_type_modifier(
        Field::new(name, DataType::Struct(Fields::empty()), true),
        type_modifier,
    )
}

/// Read-only view of one descriptor field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor<'a> {
    field: &'a Field,
}

impl<'a> FieldDescriptor<'a> {
    /// Wraps an Arrow field.
    #[must_use]
    pub fn new(field: &'a Field) -> Self {
        Self { field }
    }

    /// The underlying Arrow field.
    #[must_use]
    pub fn field(&self) -> &'a Field {
        self.field
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.field.name()
    }

    /// Field type.
    #[must_use]
    pub fn data_type(&self) -> &'a DataType {
        self.field.data_type()
    }

    /// Type modifier, or [`NO_TYPE_MODIFIER`].
    #[must_use]
    pub fn type_modifier(&self) -> i32 {
        self.field
            .metadata()
            .get(TYPE_MODIFIER_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(NO_TYPE_MODIFIER)
    }

    /// Collation name, if any.
    #[must_use]
    pub fn collation(&self) -> Option<&'a str> {
        self.field.metadata().get(COLLATION_KEY).map(String::as_str)
    }

    /// Fixed storage width in bytes; `None` for variable-width types.
    #[must_use]
    pub fn storage_width(&self) -> Option<usize> {
        self.field.data_type().primitive_width()
    }

    /// Whether values fit in a machine word and are passed by value.
    #[must_use]
    pub fn pass_by_value(&self) -> bool {
        self.storage_width().is_some_and(|w| w <= 8)
    }

    /// Whether this is a record field whose layout lives in the record-type cache.
    #[must_use]
    pub fn is_anonymous_record(&self) -> bool {
        matches!(self.field.data_type(), DataType::Struct(f) if f.is_empty())
            && self.type_modifier() != NO_TYPE_MODIFIER
    }
}

// ── SchemaDescriptor ───────────────────────────────────────────────

/// An Arrow schema together with its packed byte identity.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    schema: SchemaRef,
    packed: Bytes,
}

impl SchemaDescriptor {
    /// Creates a descriptor by packing `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Pack`] if the schema cannot be packed.
    pub fn new(schema: SchemaRef) -> SchemaResult<Self> {
        let packed = pack(&schema)?;
        Ok(Self { schema, packed })
    }

    /// Creates a descriptor from packed bytes, keeping the bytes as identity.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Unpack`] if the bytes are not a packed schema.
    pub fn from_packed(packed: Bytes) -> SchemaResult<Self> {
        let schema = unpack(&packed)?;
        Ok(Self { schema, packed })
    }

    /// The Arrow schema.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// The packed byte form.
    #[must_use]
    pub fn packed(&self) -> &Bytes {
        &self.packed
    }

    /// Returns `true` if `packed` is byte-identical to this descriptor.
    #[inline]
    #[must_use]
    pub fn same_identity(&self, packed: &[u8]) -> bool {
        self.packed.len() == packed.len() && self.packed.as_ref() == packed
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schema.fields().len()
    }

    /// Returns `true` if the descriptor has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schema.fields().is_empty()
    }

    /// View of the field at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= len()`.
    #[must_use]
    pub fn field(&self, idx: usize) -> FieldDescriptor<'_> {
        FieldDescriptor::new(self.schema.field(idx))
    }

    /// Iterates over all fields.
    pub fn fields(&self) -> impl Iterator<Item = FieldDescriptor<'_>> {
        self.schema
            .fields()
            .iter()
            .map(|f| FieldDescriptor::new(f.as_ref()))
    }
}

impl PartialEq for SchemaDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.same_identity(&other.packed)
    }
}

impl Eq for SchemaDescriptor {}
