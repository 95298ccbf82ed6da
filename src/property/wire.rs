//! The two wire encodings a transport may speak.
//!
//! ```text
//!  StructuredRecord                     FlatRecord
//!  ┌───────────────────────┐            ┌───────────────────────┐
//!  │ prop, area, timestamp │            │ prop, area, timestamp │
//!  │ status: PropertyStatus│            │ status: i32           │
//!  │ value: RawValues ──┐   │            │ int32_values          │
//!  └────────────────────┼──┘            │ float_values          │
//!                       ▼               │ int64_values          │
//!        int32 / float / int64 /        │ bytes                 │
//!        bytes / string sequences       │ string_value          │
//!                                       └───────────────────────┘
//! ```
//!
//! Both decode into the same [`PropertyValue`]; nothing above the transport
//! adapter sees which encoding was used.

use serde::{Deserialize, Serialize};

use super::{PropertyStatus, PropertyValue, RawValues};
use crate::error::ValueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireEncoding {
    Structured,
    Flat,
}

/// Nested encoding with a typed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    pub prop: i32,
    pub area_id: i32,
    pub timestamp: i64,
    pub status: PropertyStatus,
    pub value: RawValues,
}

/// Flat encoding with an integer status. This is the record shape that
/// gets transmitted or persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub prop: i32,
    pub area_id: i32,
    pub timestamp: i64,
    pub status: i32,
    pub int32_values: Vec<i32>,
    pub float_values: Vec<f32>,
    pub int64_values: Vec<i64>,
    pub bytes: Vec<u8>,
    pub string_value: String,
}

impl FlatRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// A value as carried by one of the two encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Structured(StructuredRecord),
    Flat(FlatRecord),
}

impl WireValue {
    pub fn encoding(&self) -> WireEncoding {
        match self {
            Self::Structured(_) => WireEncoding::Structured,
            Self::Flat(_) => WireEncoding::Flat,
        }
    }

    pub fn property_id(&self) -> i32 {
        match self {
            Self::Structured(r) => r.prop,
            Self::Flat(r) => r.prop,
        }
    }
}

impl TryFrom<WireValue> for PropertyValue {
    type Error = ValueError;

    fn try_from(wire: WireValue) -> Result<Self, ValueError> {
        match wire {
            WireValue::Structured(r) => Ok(decode_structured(r)),
            WireValue::Flat(r) => decode_flat(r),
        }
    }
}

fn decode_structured(r: StructuredRecord) -> PropertyValue {
    PropertyValue::from_parts(r.prop, r.area_id, r.timestamp, r.status, r.value)
}

fn decode_flat(r: FlatRecord) -> Result<PropertyValue, ValueError> {
    let status = PropertyStatus::from_raw(r.status)?;
    Ok(PropertyValue::from_parts(
        r.prop,
        r.area_id,
        r.timestamp,
        status,
        RawValues {
            int32_values: r.int32_values,
            float_values: r.float_values,
            int64_values: r.int64_values,
            bytes: r.bytes,
            string_value: r.string_value,
        },
    ))
}

impl PropertyValue {
    pub fn to_wire(&self, encoding: WireEncoding) -> WireValue {
        let (prop, area_id, timestamp, status) = (
            self.property_id(),
            self.area_id(),
            self.timestamp(),
            self.status(),
        );
        let payload = self.clone().into_payload();
        match encoding {
            WireEncoding::Structured => WireValue::Structured(StructuredRecord {
                prop,
                area_id,
                timestamp,
                status,
                value: payload,
            }),
            WireEncoding::Flat => WireValue::Flat(FlatRecord {
                prop,
                area_id,
                timestamp,
                status: status.raw(),
                int32_values: payload.int32_values,
                float_values: payload.float_values,
                int64_values: payload.int64_values,
                bytes: payload.bytes,
                string_value: payload.string_value,
            }),
        }
    }
}
