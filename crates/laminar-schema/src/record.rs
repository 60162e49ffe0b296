//! Record-type cache for anonymous record fields.
//!
//! Events carry the descriptors of their anonymous record fields next to the
//! event descriptor. A reader registers them here, keyed by type modifier, so
//! record values can be decoded into Arrow structs without the layout being
//! repeated inside every value. The cache is owned by one projection context
//! and cleared with it.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields, Schema, SchemaRef};
use bytes::Bytes;

use crate::descriptor::{pack, unpack, FieldDescriptor};
use crate::error::{SchemaError, SchemaResult};

/// Packed layout of one anonymous record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDescriptor {
    /// Type modifier the layout is registered under.
    pub type_modifier: i32,
    /// Packed record schema.
    pub packed: Bytes,
}

impl RecordDescriptor {
    /// Packs `schema` as the layout of record type `type_modifier`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Pack`] if the schema cannot be packed.
    pub fn new(type_modifier: i32, schema: &Schema) -> SchemaResult<Self> {
        Ok(Self {
            type_modifier,
            packed: pack(schema)?,
        })
    }
}

/// Record layouts keyed by type modifier.
#[derive(Debug, Default)]
pub struct RecordTypeCache {
    types: HashMap<i32, SchemaRef>,
}

impl RecordTypeCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a layout, returning the one it replaced.
    pub fn register(&mut self, type_modifier: i32, schema: SchemaRef) -> Option<SchemaRef> {
        self.types.insert(type_modifier, schema)
    }

    /// Unpacks and registers a record descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Unpack`] if the descriptor bytes are invalid.
    pub fn register_packed(&mut self, record: &RecordDescriptor) -> SchemaResult<()> {
        let schema = unpack(&record.packed)?;
        self.types.insert(record.type_modifier, schema);
        Ok(())
    }

    /// Looks up a layout.
    #[must_use]
    pub fn get(&self, type_modifier: i32) -> Option<&SchemaRef> {
        self.types.get(&type_modifier)
    }

    /// Number of registered layouts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Drops every registered layout.
    pub fn clear(&mut self) {
        self.types.clear();
    }

    /// Returns `field` with every anonymous record, at any depth, replaced
    /// by a struct of its registered layout.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownRecordType`] if a record layout is missing.
    pub fn resolve_field(&self, field: &Field) -> SchemaResult<Field> {
        let view = FieldDescriptor::new(field);
        let data_type = if view.is_anonymous_record() {
            let typmod = view.type_modifier();
            let layout = self
                .types
                .get(&typmod)
                .ok_or(SchemaError::UnknownRecordType(typmod))?;
            DataType::Struct(self.resolve_fields(layout.fields())?)
        } else if let DataType::Struct(children) = field.data_type() {
            DataType::Struct(self.resolve_fields(children)?)
        } else {
            return Ok(field.clone());
        };
        Ok(field.clone().with_data_type(data_type))
    }

    fn resolve_fields(&self, fields: &Fields) -> SchemaResult<Fields> {
        fields
            .iter()
            .map(|f| self.resolve_field(f).map(Arc::new))
            .collect::<SchemaResult<Vec<_>>>()
            .map(Fields::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::record_field;

    fn point_schema() -> Schema {
        Schema::new(vec![
            Field::new("x", DataType::Float64, true),
            Field::new("y", DataType::Float64, true),
        ])
    }

    #[test]
    fn test_register_packed_and_get() {
        let mut cache = RecordTypeCache::new();
        let desc = RecordDescriptor::new(3, &point_schema()).unwrap();
        cache.register_packed(&desc).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(3).unwrap().fields().len(), 2);
        assert!(cache.get(4).is_none());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_resolve_anonymous_record() {
        let mut cache = RecordTypeCache::new();
        cache.register(3, Arc::new(point_schema()));

        let resolved = cache.resolve_field(&record_field("loc", 3)).unwrap();
        match resolved.data_type() {
            DataType::Struct(fields) => {
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].name(), "x");
            }
            other => panic!("expected struct, got {other}"),
        }
        assert_eq!(resolved.name(), "loc");
    }

    #[test]
    fn test_resolve_nested_record() {
        let mut cache = RecordTypeCache::new();
        cache.register(3, Arc::new(point_schema()));
        cache.register(
            4,
            Arc::new(Schema::new(vec![
                Field::new("label", DataType::Utf8, true),
                record_field("at", 3),
            ])),
        );

        let resolved = cache.resolve_field(&record_field("marker", 4)).unwrap();
        let DataType::Struct(outer) = resolved.data_type() else {
            panic!("expected struct");
        };
        assert!(matches!(outer[1].data_type(), DataType::Struct(inner) if inner.len() == 2));
    }

    #[test]
    fn test_resolve_unknown_record_fails() {
        let cache = RecordTypeCache::new();
        let err = cache.resolve_field(&record_field("loc", 9)).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownRecordType(9)));
    }

    #[test]
    fn test_resolve_plain_field_is_unchanged() {
        let cache = RecordTypeCache::new();
        let field = Field::new("a", DataType::Int32, false);
        assert_eq!(cache.resolve_field(&field).unwrap(), field);
    }
}
