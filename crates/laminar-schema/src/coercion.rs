//! Value coercion between event field types and output field types.
//!
//! [`CoercionRegistry::coerce`] picks one path per `(from, to)` pair:
//!
//! 1. a converter registered for exactly that pair;
//! 2. an Arrow cast, when [`can_cast_types`] reports one exists;
//! 3. the fallback converter, by default a text round-trip that renders the
//!    value with the source type's display format and parses the text as the
//!    destination type.
//!
//! A cast that exists but fails on the value does not fall through to the
//! text round-trip; the failure is reported as [`SchemaError::TypeCoercion`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, StringArray};
use arrow_cast::display::{ArrayFormatter, FormatOptions};
use arrow_cast::{can_cast_types, cast_with_options, CastOptions};
use arrow_schema::DataType;

use crate::error::{SchemaError, SchemaResult};

/// Converts an array of one type into an array of another.
pub trait ValueConverter: Send + Sync + fmt::Debug {
    /// Converts every value of `value` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::TypeCoercion`] if a value cannot be represented
    /// in the destination type.
    fn convert(&self, value: &dyn Array, to: &DataType) -> SchemaResult<ArrayRef>;
}

fn coercion_error(from: &DataType, to: &DataType, reason: impl fmt::Display) -> SchemaError {
    SchemaError::TypeCoercion {
        from: from.clone(),
        to: to.clone(),
        reason: reason.to_string(),
    }
}

fn strict_cast_options() -> CastOptions<'static> {
    CastOptions {
        safe: false,
        ..Default::default()
    }
}

/// Arrow cast with overflow and parse failures reported as errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct CastConverter;

impl ValueConverter for CastConverter {
    fn convert(&self, value: &dyn Array, to: &DataType) -> SchemaResult<ArrayRef> {
        cast_with_options(value, to, &strict_cast_options())
            .map_err(|e| coercion_error(value.data_type(), to, e))
    }
}

/// Renders values as text, then parses the text as the destination type.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextRoundTripConverter;

impl ValueConverter for TextRoundTripConverter {
    fn convert(&self, value: &dyn Array, to: &DataType) -> SchemaResult<ArrayRef> {
        let from = value.data_type();
        let text = render_text(value).map_err(|e| coercion_error(from, to, e))?;
        if to == &DataType::Utf8 {
            return Ok(text);
        }
        if !can_cast_types(&DataType::Utf8, to) {
            return Err(coercion_error(from, to, "no text input conversion"));
        }
        cast_with_options(text.as_ref(), to, &strict_cast_options())
            .map_err(|e| coercion_error(from, to, e))
    }
}

/// Renders every value of `value` in its canonical display form.
///
/// Nulls stay null.
///
/// # Errors
///
/// Returns an error if the type has no display format.
pub fn render_text(value: &dyn Array) -> SchemaResult<ArrayRef> {
    let options = FormatOptions::default();
    let formatter = ArrayFormatter::try_new(value, &options)?;
    let text: StringArray = (0..value.len())
        .map(|i| (!value.is_null(i)).then(|| formatter.value(i).to_string()))
        .collect();
    Ok(Arc::new(text))
}

/// How a `(from, to)` pair is coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionPath {
    /// Same type, value passes through.
    Identity,
    /// A converter registered for the pair.
    Registered,
    /// Direct Arrow cast.
    Cast,
    /// Fallback converter.
    TextRoundTrip,
}

/// Converter lookup keyed by `(source type, destination type)`.
#[derive(Debug, Clone)]
pub struct CoercionRegistry {
    converters: HashMap<(DataType, DataType), Arc<dyn ValueConverter>>,
    fallback: Arc<dyn ValueConverter>,
}

impl Default for CoercionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CoercionRegistry {
    /// Creates a registry with no pair converters and the text round-trip
    /// as fallback.
    #[must_use]
    pub fn new() -> Self {
        Self {
            converters: HashMap::new(),
            fallback: Arc::new(TextRoundTripConverter),
        }
    }

    /// Replaces the fallback converter.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn ValueConverter>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Registers `converter` for `from → to`, returning the one it replaced.
    pub fn register(
        &mut self,
        from: DataType,
        to: DataType,
        converter: Arc<dyn ValueConverter>,
    ) -> Option<Arc<dyn ValueConverter>> {
        self.converters.insert((from, to), converter)
    }

    /// Number of registered pair converters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    /// Returns `true` if no pair converter is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// The path [`coerce`](Self::coerce) takes for `from → to`.
    #[must_use]
    pub fn path(&self, from: &DataType, to: &DataType) -> CoercionPath {
        if from == to {
            CoercionPath::Identity
        } else if self.converters.contains_key(&(from.clone(), to.clone())) {
            CoercionPath::Registered
        } else if can_cast_types(from, to) {
            CoercionPath::Cast
        } else {
            CoercionPath::TextRoundTrip
        }
    }

    /// Coerces `value` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::TypeCoercion`] if the chosen path fails.
    pub fn coerce(&self, value: &ArrayRef, to: &DataType) -> SchemaResult<ArrayRef> {
        let from = value.data_type();
        match self.path(from, to) {
            CoercionPath::Identity => Ok(Arc::clone(value)),
            CoercionPath::Registered => match self.converters.get(&(from.clone(), to.clone())) {
                Some(converter) => converter.convert(value.as_ref(), to),
                None => Err(coercion_error(from, to, "converter unregistered")),
            },
            CoercionPath::Cast => CastConverter.convert(value.as_ref(), to),
            CoercionPath::TextRoundTrip => {
                tracing::trace!(%from, %to, "Coercing via text round-trip");
                self.fallback.convert(value.as_ref(), to)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::cast::AsArray;
    use arrow_array::types::{Date32Type, Float64Type, Int64Type};
    use arrow_array::{BooleanArray, Date32Array, Int32Array, Int64Array};

    #[derive(Debug)]
    struct Tagged;

    impl ValueConverter for Tagged {
        fn convert(&self, value: &dyn Array, _to: &DataType) -> SchemaResult<ArrayRef> {
            let ints = value.as_primitive::<arrow_array::types::Int32Type>();
            let out: StringArray = ints.iter().map(|v| v.map(|v| format!("#{v}"))).collect();
            Ok(Arc::new(out))
        }
    }

    #[test]
    fn test_int_to_text_via_cast() {
        let registry = CoercionRegistry::new();
        assert_eq!(
            registry.path(&DataType::Int32, &DataType::Utf8),
            CoercionPath::Cast
        );
        let value: ArrayRef = Arc::new(Int32Array::from(vec![42]));
        let out = registry.coerce(&value, &DataType::Utf8).unwrap();
        assert_eq!(out.as_string::<i32>().value(0), "42");
    }

    #[test]
    fn test_identity_returns_same_array() {
        let registry = CoercionRegistry::new();
        let value: ArrayRef = Arc::new(Int64Array::from(vec![7]));
        let out = registry.coerce(&value, &DataType::Int64).unwrap();
        assert!(Arc::ptr_eq(&value, &out));
    }

    #[test]
    fn test_registered_converter_takes_priority() {
        let mut registry = CoercionRegistry::new();
        registry.register(DataType::Int32, DataType::Utf8, Arc::new(Tagged));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.path(&DataType::Int32, &DataType::Utf8),
            CoercionPath::Registered
        );
        let value: ArrayRef = Arc::new(Int32Array::from(vec![42]));
        let out = registry.coerce(&value, &DataType::Utf8).unwrap();
        assert_eq!(out.as_string::<i32>().value(0), "#42");
    }

    #[test]
    fn test_failed_cast_is_a_coercion_error() {
        let registry = CoercionRegistry::new();
        let value: ArrayRef = Arc::new(StringArray::from(vec!["abc"]));
        let err = registry.coerce(&value, &DataType::Int32).unwrap_err();
        assert!(err.is_coercion());
        assert!(err.to_string().contains("Int32"));
    }

    #[test]
    fn test_overflow_is_not_silently_nulled() {
        let registry = CoercionRegistry::new();
        let value: ArrayRef = Arc::new(Int64Array::from(vec![i64::MAX]));
        assert!(registry.coerce(&value, &DataType::Int32).is_err());
    }

    #[test]
    fn test_text_round_trip_converter() {
        let value = Int32Array::from(vec![Some(42), None]);
        let out = TextRoundTripConverter
            .convert(&value, &DataType::Float64)
            .unwrap();
        let floats = out.as_primitive::<Float64Type>();
        assert!((floats.value(0) - 42.0).abs() < f64::EPSILON);
        assert!(floats.is_null(1));
    }

    #[test]
    fn test_text_round_trip_is_lossless() {
        let original = Int64Array::from(vec![-17, 0, 9_000_000_000]);
        let text = TextRoundTripConverter
            .convert(&original, &DataType::Utf8)
            .unwrap();
        let back = TextRoundTripConverter
            .convert(text.as_ref(), &DataType::Int64)
            .unwrap();
        assert_eq!(back.as_primitive::<Int64Type>(), &original);

        let date = Date32Array::from(vec![19_723]);
        let text = render_text(&date).unwrap();
        assert_eq!(text.as_string::<i32>().value(0), "2024-01-01");
        let back = TextRoundTripConverter
            .convert(text.as_ref(), &DataType::Date32)
            .unwrap();
        assert_eq!(back.as_primitive::<Date32Type>().value(0), 19_723);
    }

    #[test]
    fn test_uncastable_pair_uses_fallback_and_reports_parse_failure() {
        let registry = CoercionRegistry::new();
        assert_eq!(
            registry.path(&DataType::Boolean, &DataType::Date32),
            CoercionPath::TextRoundTrip
        );
        let value: ArrayRef = Arc::new(BooleanArray::from(vec![true]));
        let err = registry.coerce(&value, &DataType::Date32).unwrap_err();
        assert!(err.is_coercion());
    }

    #[test]
    fn test_custom_fallback() {
        #[derive(Debug)]
        struct Refuse;
        impl ValueConverter for Refuse {
            fn convert(&self, value: &dyn Array, to: &DataType) -> SchemaResult<ArrayRef> {
                Err(coercion_error(value.data_type(), to, "refused"))
            }
        }

        let registry = CoercionRegistry::new().with_fallback(Arc::new(Refuse));
        let value: ArrayRef = Arc::new(BooleanArray::from(vec![true]));
        let err = registry.coerce(&value, &DataType::Date32).unwrap_err();
        assert!(err.to_string().contains("refused"));
    }
}
