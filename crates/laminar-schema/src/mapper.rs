//! Field mapping from event schemas to a fixed output schema.
//!
//! [`FieldMap`] maps each event field position to an output field position by
//! case-insensitive name. [`SchemaCache`] keeps the map for the most recently
//! seen event descriptor and only rebuilds it when the descriptor's packed
//! bytes change.

use std::sync::Arc;

use arrow_schema::{FieldRef, Schema, SchemaRef};
use bytes::Bytes;

use crate::descriptor::SchemaDescriptor;
use crate::diff::{diff_schemas_by_name, format_changes};
use crate::error::SchemaResult;
use crate::record::{RecordDescriptor, RecordTypeCache};

/// Event field position → output field position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMap {
    positions: Vec<Option<usize>>,
}

impl FieldMap {
    /// Builds the map with a linear scan: for each source field, the first
    /// destination field with the same name, ignoring ASCII case.
    #[must_use]
    pub fn build(source: &Schema, dest: &Schema) -> Self {
        let positions = source
            .fields()
            .iter()
            .map(|src| {
                dest.fields()
                    .iter()
                    .position(|dst| dst.name().eq_ignore_ascii_case(src.name()))
            })
            .collect();
        Self { positions }
    }

    /// Destination position for source field `src`, or `None` if unmapped.
    #[inline]
    #[must_use]
    pub fn get(&self, src: usize) -> Option<usize> {
        self.positions.get(src).copied().flatten()
    }

    /// Number of source fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` if the source schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of source fields that map somewhere.
    #[must_use]
    pub fn mapped_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_some()).count()
    }

    /// Iterates `(source, destination)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Option<usize>)> + '_ {
        self.positions.iter().copied().enumerate()
    }
}

/// Mapping state derived from one event descriptor.
#[derive(Debug)]
pub struct CachedMapping {
    descriptor: SchemaDescriptor,
    map: Arc<FieldMap>,
    source_fields: Arc<[FieldRef]>,
}

impl CachedMapping {
    /// The event descriptor this mapping was built from.
    #[must_use]
    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    /// The field map.
    #[must_use]
    pub fn map(&self) -> &Arc<FieldMap> {
        &self.map
    }

    /// Event fields with anonymous records resolved to structs.
    #[must_use]
    pub fn source_fields(&self) -> &Arc<[FieldRef]> {
        &self.source_fields
    }
}

/// Caches the field map for the last event descriptor seen by a reader.
///
/// The cache, and the record layouts registered with it, are dropped by
/// [`reset`](Self::reset), which readers call at every batch boundary.
#[derive(Debug)]
pub struct SchemaCache {
    dest: SchemaRef,
    cached: Option<CachedMapping>,
    previous: Option<SchemaRef>,
    records: RecordTypeCache,
    rebuilds: u64,
}

impl SchemaCache {
    /// Creates an empty cache mapping into `dest`.
    #[must_use]
    pub fn new(dest: SchemaRef) -> Self {
        Self {
            dest,
            cached: None,
            previous: None,
            records: RecordTypeCache::new(),
            rebuilds: 0,
        }
    }

    /// Returns the mapping for `packed`, rebuilding it only when `packed`
    /// differs from the cached descriptor.
    ///
    /// On a rebuild the event's record descriptors are registered first so
    /// record fields resolve.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor or a record descriptor cannot be
    /// unpacked, or a record field references an unknown layout.
    pub fn ensure_mapping(
        &mut self,
        packed: &Bytes,
        record_descs: &[RecordDescriptor],
    ) -> SchemaResult<&CachedMapping> {
        let mapping = match self.cached.take() {
            Some(cached) if cached.descriptor.same_identity(packed) => cached,
            _ => self.build_mapping(packed, record_descs)?,
        };
        let mapping: &CachedMapping = self.cached.insert(mapping);
        Ok(mapping)
    }

    fn build_mapping(
        &mut self,
        packed: &Bytes,
        record_descs: &[RecordDescriptor],
    ) -> SchemaResult<CachedMapping> {
        for record in record_descs {
            self.records.register_packed(record)?;
        }

        let descriptor = SchemaDescriptor::from_packed(packed.clone())?;
        let source_fields = descriptor
            .schema()
            .fields()
            .iter()
            .map(|f| self.records.resolve_field(f).map(Arc::new))
            .collect::<SchemaResult<Arc<[_]>>>()?;
        let map = FieldMap::build(descriptor.schema(), &self.dest);

        if let Some(prev) = &self.previous {
            let changes = diff_schemas_by_name(prev, descriptor.schema());
            if !changes.is_empty() {
                tracing::debug!(
                    changes = %format_changes(&changes),
                    "Event schema changed"
                );
            }
        }
        tracing::trace!(
            fields = map.len(),
            mapped = map.mapped_count(),
            records = record_descs.len(),
            "Rebuilt field map"
        );

        self.previous = Some(Arc::clone(descriptor.schema()));
        self.rebuilds += 1;
        Ok(CachedMapping {
            descriptor,
            map: Arc::new(map),
            source_fields,
        })
    }

    /// Drops the cached mapping and every registered record layout.
    pub fn reset(&mut self) {
        self.cached = None;
        self.records.clear();
    }

    /// The destination schema.
    #[must_use]
    pub fn destination(&self) -> &SchemaRef {
        &self.dest
    }

    /// The cached mapping, if any.
    #[must_use]
    pub fn cached(&self) -> Option<&CachedMapping> {
        self.cached.as_ref()
    }

    /// The record-type cache.
    #[must_use]
    pub fn records(&self) -> &RecordTypeCache {
        &self.records
    }

    /// How many times the map has been rebuilt.
    #[must_use]
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }
}
