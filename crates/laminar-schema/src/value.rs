//! Row values and the row codec.
//!
//! A stream row is a `Vec<Datum>` positionally aligned with the event
//! descriptor. Rows are encoded with `bincode` and decoded without needing
//! the descriptor; the descriptor is only needed to turn a [`Datum`] into a
//! typed Arrow value ([`datum_to_array`]).

use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{
    Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    TimestampMicrosecondType, TimestampMillisecondType, TimestampNanosecondType,
    TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow_array::{
    new_null_array, Array, ArrayRef, BinaryArray, BooleanArray, Date32Array, Float32Array,
    Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, LargeBinaryArray,
    LargeStringArray, StringArray, StructArray, TimestampMicrosecondArray, UInt16Array,
    UInt32Array, UInt64Array, UInt8Array,
};
use arrow_schema::{DataType, Field, TimeUnit};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, SchemaResult};
use crate::record::RecordTypeCache;

/// A single row value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    /// SQL NULL.
    Null,
    /// Boolean.
    Boolean(bool),
    /// Signed 8-bit integer.
    Int8(i8),
    /// Signed 16-bit integer.
    Int16(i16),
    /// Signed 32-bit integer.
    Int32(i32),
    /// Signed 64-bit integer.
    Int64(i64),
    /// Unsigned 8-bit integer.
    UInt8(u8),
    /// Unsigned 16-bit integer.
    UInt16(u16),
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// Unsigned 64-bit integer.
    UInt64(u64),
    /// 32-bit float.
    Float32(f32),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 text.
    Utf8(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Days since the Unix epoch.
    Date32(i32),
    /// Microseconds since the Unix epoch.
    TimestampMicros(i64),
    /// Record value, positionally aligned with its record layout.
    Record(Vec<Datum>),
}

/// A stream row.
pub type Row = Vec<Datum>;

impl Datum {
    /// Returns `true` for [`Datum::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Self::Utf8(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Self::Utf8(v)
    }
}

impl<T: Into<Datum>> From<Option<T>> for Datum {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ── Row codec ──────────────────────────────────────────────────────

/// Encodes a row.
///
/// # Errors
///
/// Returns [`SchemaError::Pack`] if encoding fails.
pub fn encode_row(row: &[Datum]) -> SchemaResult<Bytes> {
    bincode::serde::encode_to_vec(row, bincode::config::standard())
        .map(Bytes::from)
        .map_err(|e| SchemaError::Pack(format!("row: {e}")))
}

/// Decodes a row produced by [`encode_row`].
///
/// # Errors
///
/// Returns [`SchemaError::Decode`] if the bytes are not an encoded row.
pub fn decode_row(bytes: &[u8]) -> SchemaResult<Row> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(row, _)| row)
        .map_err(|e| SchemaError::Decode(format!("row: {e}")))
}

// ── Datum → Arrow ──────────────────────────────────────────────────

/// Converts a datum into a single-value array typed by `field`.
///
/// Anonymous record fields are resolved through `records`.
///
/// # Errors
///
/// Returns [`SchemaError::Decode`] if the datum does not match the field
/// type, or [`SchemaError::UnknownRecordType`] for an unregistered record.
pub fn datum_to_array(
    datum: &Datum,
    field: &Field,
    records: &RecordTypeCache,
) -> SchemaResult<ArrayRef> {
    let resolved = records.resolve_field(field)?;
    to_array(datum, &resolved)
}

fn to_array(datum: &Datum, field: &Field) -> SchemaResult<ArrayRef> {
    let data_type = field.data_type();
    let array: ArrayRef = match (datum, data_type) {
        (Datum::Null, dt) => new_null_array(dt, 1),
        (Datum::Boolean(v), DataType::Boolean) => Arc::new(BooleanArray::from(vec![*v])),
        (Datum::Int8(v), DataType::Int8) => Arc::new(Int8Array::from(vec![*v])),
        (Datum::Int16(v), DataType::Int16) => Arc::new(Int16Array::from(vec![*v])),
        (Datum::Int32(v), DataType::Int32) => Arc::new(Int32Array::from(vec![*v])),
        (Datum::Int64(v), DataType::Int64) => Arc::new(Int64Array::from(vec![*v])),
        (Datum::UInt8(v), DataType::UInt8) => Arc::new(UInt8Array::from(vec![*v])),
        (Datum::UInt16(v), DataType::UInt16) => Arc::new(UInt16Array::from(vec![*v])),
        (Datum::UInt32(v), DataType::UInt32) => Arc::new(UInt32Array::from(vec![*v])),
        (Datum::UInt64(v), DataType::UInt64) => Arc::new(UInt64Array::from(vec![*v])),
        (Datum::Float32(v), DataType::Float32) => Arc::new(Float32Array::from(vec![*v])),
        (Datum::Float64(v), DataType::Float64) => Arc::new(Float64Array::from(vec![*v])),
        (Datum::Utf8(v), DataType::Utf8) => Arc::new(StringArray::from(vec![v.as_str()])),
        (Datum::Utf8(v), DataType::LargeUtf8) => {
            Arc::new(LargeStringArray::from(vec![v.as_str()]))
        }
        (Datum::Binary(v), DataType::Binary) => Arc::new(BinaryArray::from(vec![v.as_slice()])),
        (Datum::Binary(v), DataType::LargeBinary) => {
            Arc::new(LargeBinaryArray::from(vec![v.as_slice()]))
        }
        (Datum::Date32(v), DataType::Date32) => Arc::new(Date32Array::from(vec![*v])),
        (Datum::TimestampMicros(v), DataType::Timestamp(TimeUnit::Microsecond, tz)) => Arc::new(
            TimestampMicrosecondArray::from(vec![*v]).with_timezone_opt(tz.clone()),
        ),
        (Datum::Record(values), DataType::Struct(fields)) => {
            if values.len() != fields.len() {
                return Err(SchemaError::Decode(format!(
                    "record for field '{}' has {} values, layout has {} fields",
                    field.name(),
                    values.len(),
                    fields.len()
                )));
            }
            let children = values
                .iter()
                .zip(fields.iter())
                .map(|(v, f)| to_array(v, f))
                .collect::<SchemaResult<Vec<_>>>()?;
            let array = StructArray::try_new(fields.clone(), children, None)
                .map_err(|e| SchemaError::Decode(format!("record '{}': {e}", field.name())))?;
            Arc::new(array)
        }
        (datum, dt) => {
            return Err(SchemaError::Decode(format!(
                "value {datum:?} does not match field '{}' of type {dt}",
                field.name()
            )));
        }
    };
    Ok(array)
}

// ── Arrow → Datum ──────────────────────────────────────────────────

/// Reads the value at `idx` of `array` as a datum.
///
/// Timestamps of any unit are normalized to microseconds.
///
/// # Errors
///
/// Returns [`SchemaError::Decode`] for types without a datum representation.
pub fn array_to_datum(array: &dyn Array, idx: usize) -> SchemaResult<Datum> {
    if array.is_null(idx) {
        return Ok(Datum::Null);
    }
    let datum = match array.data_type() {
        DataType::Boolean => Datum::Boolean(array.as_boolean().value(idx)),
        DataType::Int8 => Datum::Int8(array.as_primitive::<Int8Type>().value(idx)),
        DataType::Int16 => Datum::Int16(array.as_primitive::<Int16Type>().value(idx)),
        DataType::Int32 => Datum::Int32(array.as_primitive::<Int32Type>().value(idx)),
        DataType::Int64 => Datum::Int64(array.as_primitive::<Int64Type>().value(idx)),
        DataType::UInt8 => Datum::UInt8(array.as_primitive::<UInt8Type>().value(idx)),
        DataType::UInt16 => Datum::UInt16(array.as_primitive::<UInt16Type>().value(idx)),
        DataType::UInt32 => Datum::UInt32(array.as_primitive::<UInt32Type>().value(idx)),
        DataType::UInt64 => Datum::UInt64(array.as_primitive::<UInt64Type>().value(idx)),
        DataType::Float32 => Datum::Float32(array.as_primitive::<Float32Type>().value(idx)),
        DataType::Float64 => Datum::Float64(array.as_primitive::<Float64Type>().value(idx)),
        DataType::Utf8 => Datum::Utf8(array.as_string::<i32>().value(idx).to_string()),
        DataType::LargeUtf8 => Datum::Utf8(array.as_string::<i64>().value(idx).to_string()),
        DataType::Binary => Datum::Binary(array.as_binary::<i32>().value(idx).to_vec()),
        DataType::LargeBinary => Datum::Binary(array.as_binary::<i64>().value(idx).to_vec()),
        DataType::Date32 => Datum::Date32(array.as_primitive::<Date32Type>().value(idx)),
        DataType::Timestamp(unit, _) => Datum::TimestampMicros(match unit {
            TimeUnit::Second => array
                .as_primitive::<TimestampSecondType>()
                .value(idx)
                .saturating_mul(1_000_000),
            TimeUnit::Millisecond => array
                .as_primitive::<TimestampMillisecondType>()
                .value(idx)
                .saturating_mul(1_000),
            TimeUnit::Microsecond => array.as_primitive::<TimestampMicrosecondType>().value(idx),
            TimeUnit::Nanosecond => {
                array.as_primitive::<TimestampNanosecondType>().value(idx) / 1_000
            }
        }),
        DataType::Struct(_) => Datum::Record(
            array
                .as_struct()
                .columns()
                .iter()
                .map(|child| array_to_datum(child.as_ref(), idx))
                .collect::<SchemaResult<Vec<_>>>()?,
        ),
        other => {
            return Err(SchemaError::Decode(format!(
                "no row value representation for type {other}"
            )));
        }
    };
    Ok(datum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::record_field;
    use arrow_schema::{Fields, Schema};

    #[test]
    fn test_row_codec() {
        let row = vec![
            Datum::Int64(42),
            Datum::Null,
            Datum::from("hello"),
            Datum::Record(vec![Datum::Float64(1.5), Datum::Null]),
        ];
        let bytes = encode_row(&row).unwrap();
        assert_eq!(decode_row(&bytes).unwrap(), row);
    }

    #[test]
    fn test_decode_row_rejects_garbage() {
        assert!(matches!(decode_row(&[0xff; 3]), Err(SchemaError::Decode(_))));
    }

    #[test]
    fn test_datum_to_array_matches_type() {
        let records = RecordTypeCache::new();
        let field = Field::new("n", DataType::Int32, true);
        let arr = datum_to_array(&Datum::Int32(7), &field, &records).unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr.as_primitive::<Int32Type>().value(0), 7);

        let null = datum_to_array(&Datum::Null, &field, &records).unwrap();
        assert!(null.is_null(0));
        assert_eq!(null.data_type(), &DataType::Int32);
    }

    #[test]
    fn test_datum_to_array_type_mismatch() {
        let records = RecordTypeCache::new();
        let field = Field::new("n", DataType::Int32, true);
        let err = datum_to_array(&Datum::from("x"), &field, &records).unwrap_err();
        assert!(matches!(err, SchemaError::Decode(ref m) if m.contains("'n'")));
    }

    #[test]
    fn test_timestamp_keeps_timezone() {
        let records = RecordTypeCache::new();
        let dt = DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()));
        let field = Field::new("ts", dt.clone(), true);
        let arr = datum_to_array(&Datum::TimestampMicros(1_000), &field, &records).unwrap();
        assert_eq!(arr.data_type(), &dt);
        assert_eq!(array_to_datum(arr.as_ref(), 0).unwrap(), Datum::TimestampMicros(1_000));
    }

    #[test]
    fn test_anonymous_record_decodes_through_cache() {
        let mut records = RecordTypeCache::new();
        records.register(
            5,
            Arc::new(Schema::new(vec![
                Field::new("x", DataType::Int64, true),
                Field::new("tag", DataType::Utf8, true),
            ])),
        );
        let value = Datum::Record(vec![Datum::Int64(3), Datum::from("a")]);
        let arr = datum_to_array(&value, &record_field("r", 5), &records).unwrap();
        assert!(matches!(arr.data_type(), DataType::Struct(f) if f.len() == 2));
        assert_eq!(array_to_datum(arr.as_ref(), 0).unwrap(), value);
    }

    #[test]
    fn test_record_arity_mismatch() {
        let records = RecordTypeCache::new();
        let field = Field::new(
            "r",
            DataType::Struct(Fields::from(vec![Field::new("x", DataType::Int64, true)])),
            true,
        );
        let err = datum_to_array(&Datum::Record(vec![]), &field, &records).unwrap_err();
        assert!(matches!(err, SchemaError::Decode(_)));
    }

    #[test]
    fn test_array_to_datum_normalizes_nanoseconds() {
        let arr = arrow_array::TimestampNanosecondArray::from(vec![5_000_i64]);
        assert_eq!(array_to_datum(&arr, 0).unwrap(), Datum::TimestampMicros(5));
    }
}
