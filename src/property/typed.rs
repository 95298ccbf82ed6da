//! Conversion between raw payloads and Rust types.

use serde::{Deserialize, Serialize};

use super::{MixedLayout, MixedValue, PropertyConfig, PropertyType, PropertyValue};
use crate::error::ValueError;

/// A payload interpreted according to the property's value type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    String(String),
    Boolean(bool),
    Int32(i32),
    Int32Vec(Vec<i32>),
    Int64(i64),
    Int64Vec(Vec<i64>),
    Float(f32),
    FloatVec(Vec<f32>),
    Bytes(Vec<u8>),
    Mixed(MixedValue),
}

impl PropertyValue {
    /// Interpret the payload using the value type in the property id.
    ///
    /// MIXED properties need their layout; use [`Self::to_typed_with`].
    pub fn to_typed(&self) -> Result<TypedValue, ValueError> {
        let id = self.property_id();
        let Some(kind) = PropertyType::of(id) else {
            return Err(ValueError::UnsupportedType(id));
        };
        Ok(match kind {
            PropertyType::String => TypedValue::String(self.string().to_owned()),
            PropertyType::Boolean => TypedValue::Boolean(self.boolean(0)?),
            PropertyType::Int32 => TypedValue::Int32(self.int32(0)?),
            PropertyType::Int32Vec => TypedValue::Int32Vec(self.int32_values().to_vec()),
            PropertyType::Int64 => TypedValue::Int64(self.int64(0)?),
            PropertyType::Int64Vec => TypedValue::Int64Vec(self.int64_values().to_vec()),
            PropertyType::Float => TypedValue::Float(self.float(0)?),
            PropertyType::FloatVec => TypedValue::FloatVec(self.float_values().to_vec()),
            PropertyType::Bytes => TypedValue::Bytes(self.bytes().to_vec()),
            PropertyType::Mixed => return Err(ValueError::UnsupportedType(id)),
        })
    }

    pub fn to_typed_with(&self, config: &PropertyConfig) -> Result<TypedValue, ValueError> {
        if PropertyType::of(self.property_id()) == Some(PropertyType::Mixed) {
            let layout = MixedLayout::from_config_array(&config.config_array)?;
            return layout.decode(self).map(TypedValue::Mixed);
        }
        self.to_typed()
    }

    /// Inverse of [`Self::to_typed`]. MIXED values are packed with a
    /// layout inferred from the segments present.
    pub fn from_typed(property_id: i32, area_id: i32, typed: TypedValue) -> Self {
        let b = PropertyValue::builder(property_id).area(area_id);
        match typed {
            TypedValue::String(s) => b.string(s),
            TypedValue::Boolean(v) => b.int32s([i32::from(v)]),
            TypedValue::Int32(v) => b.int32s([v]),
            TypedValue::Int32Vec(v) => b.int32s(v),
            TypedValue::Int64(v) => b.int64s([v]),
            TypedValue::Int64Vec(v) => b.int64s(v),
            TypedValue::Float(v) => b.floats([v]),
            TypedValue::FloatVec(v) => b.floats(v),
            TypedValue::Bytes(v) => b.bytes(v),
            TypedValue::Mixed(m) => {
                let layout = MixedLayout {
                    has_string: m.string.is_some(),
                    has_boolean: m.boolean.is_some(),
                    has_int32: m.int32.is_some(),
                    int32_array_len: m.int32s.len(),
                    has_int64: m.int64.is_some(),
                    int64_array_len: m.int64s.len(),
                    has_float: m.float.is_some(),
                    float_array_len: m.floats.len(),
                    byte_array_len: m.bytes.len(),
                };
                match layout.encode(property_id, area_id, &m) {
                    Ok(v) => return v,
                    // The layout was derived from `m`, so encode cannot disagree.
                    Err(_) => b,
                }
            }
        }
        .build()
    }

    /// Read the payload as `T`.
    pub fn get<T: FromPropertyValue>(&self) -> Result<T, ValueError> {
        T::from_value(self)
    }
}

/// Rust types a property payload converts into.
pub trait FromPropertyValue: Sized {
    fn from_value(value: &PropertyValue) -> Result<Self, ValueError>;
}

macro_rules! from_typed_variant {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl FromPropertyValue for $ty {
            fn from_value(value: &PropertyValue) -> Result<Self, ValueError> {
                match value.to_typed()? {
                    TypedValue::$variant(v) => Ok(v),
                    _ => Err(ValueError::TypeMismatch {
                        property_id: value.property_id(),
                        expected: $name,
                    }),
                }
            }
        }
    };
}

from_typed_variant!(String, String, "string");
from_typed_variant!(bool, Boolean, "boolean");
from_typed_variant!(i32, Int32, "int32");
from_typed_variant!(Vec<i32>, Int32Vec, "int32 vec");
from_typed_variant!(i64, Int64, "int64");
from_typed_variant!(Vec<i64>, Int64Vec, "int64 vec");
from_typed_variant!(f32, Float, "float");
from_typed_variant!(Vec<f32>, FloatVec, "float vec");
from_typed_variant!(Vec<u8>, Bytes, "bytes");
