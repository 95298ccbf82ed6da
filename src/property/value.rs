//! Immutable property value.
//!
//! Values are built once through [`PropertyValueBuilder`] or a wire decoder
//! and never mutated afterwards. Equality and hashing are structural over
//! every field; floats compare by bit pattern so that `Eq` and `Hash` agree.

use core::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Slot, ValueError};

/// Availability reported alongside a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum PropertyStatus {
    #[default]
    Available = 0,
    Unavailable = 1,
    Error = 2,
}

impl PropertyStatus {
    pub fn from_raw(raw: i32) -> Result<Self, ValueError> {
        match raw {
            0 => Ok(Self::Available),
            1 => Ok(Self::Unavailable),
            2 => Ok(Self::Error),
            other => Err(ValueError::InvalidStatus(other)),
        }
    }

    pub const fn raw(self) -> i32 {
        self as i32
    }
}

/// Payload sequences. Never absent; unused ones are empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawValues {
    pub int32_values: Vec<i32>,
    pub float_values: Vec<f32>,
    pub int64_values: Vec<i64>,
    pub bytes: Vec<u8>,
    pub string_value: String,
}

impl PartialEq for RawValues {
    fn eq(&self, other: &Self) -> bool {
        self.int32_values == other.int32_values
            && self.int64_values == other.int64_values
            && self.bytes == other.bytes
            && self.string_value == other.string_value
            && self.float_values.len() == other.float_values.len()
            && self
                .float_values
                .iter()
                .zip(&other.float_values)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for RawValues {}

impl Hash for RawValues {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.int32_values.hash(state);
        self.float_values.len().hash(state);
        for f in &self.float_values {
            f.to_bits().hash(state);
        }
        self.int64_values.hash(state);
        self.bytes.hash(state);
        self.string_value.hash(state);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyValue {
    property_id: i32,
    area_id: i32,
    timestamp: i64,
    status: PropertyStatus,
    payload: RawValues,
}

impl PropertyValue {
    pub fn builder(property_id: i32) -> PropertyValueBuilder {
        PropertyValueBuilder {
            value: Self {
                property_id,
                area_id: 0,
                timestamp: 0,
                status: PropertyStatus::Available,
                payload: RawValues::default(),
            },
        }
    }

    /// Empty request for `get`, addressed to one area.
    pub fn request(property_id: i32, area_id: i32) -> Self {
        Self::builder(property_id).area(area_id).build()
    }

    pub(crate) fn from_parts(
        property_id: i32,
        area_id: i32,
        timestamp: i64,
        status: PropertyStatus,
        payload: RawValues,
    ) -> Self {
        Self {
            property_id,
            area_id,
            timestamp,
            status,
            payload,
        }
    }

    pub fn property_id(&self) -> i32 {
        self.property_id
    }

    pub fn area_id(&self) -> i32 {
        self.area_id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn status(&self) -> PropertyStatus {
        self.status
    }

    pub fn payload(&self) -> &RawValues {
        &self.payload
    }

    pub(crate) fn into_payload(self) -> RawValues {
        self.payload
    }

    pub fn int32_values(&self) -> &[i32] {
        &self.payload.int32_values
    }

    pub fn float_values(&self) -> &[f32] {
        &self.payload.float_values
    }

    pub fn int64_values(&self) -> &[i64] {
        &self.payload.int64_values
    }

    pub fn bytes(&self) -> &[u8] {
        &self.payload.bytes
    }

    pub fn string(&self) -> &str {
        &self.payload.string_value
    }

    // ── Typed accessors ───────────────────────────────────────

    pub fn int32(&self, index: usize) -> Result<i32, ValueError> {
        slot(&self.payload.int32_values, Slot::Int32, index)
    }

    pub fn int64(&self, index: usize) -> Result<i64, ValueError> {
        slot(&self.payload.int64_values, Slot::Int64, index)
    }

    pub fn float(&self, index: usize) -> Result<f32, ValueError> {
        slot(&self.payload.float_values, Slot::Float, index)
    }

    pub fn byte(&self, index: usize) -> Result<u8, ValueError> {
        slot(&self.payload.bytes, Slot::Bytes, index)
    }

    /// Booleans travel as a non-zero int32.
    pub fn boolean(&self, index: usize) -> Result<bool, ValueError> {
        self.int32(index).map(|v| v != 0)
    }
}

fn slot<T: Copy>(values: &[T], slot: Slot, index: usize) -> Result<T, ValueError> {
    values
        .get(index)
        .copied()
        .ok_or(ValueError::IndexOutOfRange {
            slot,
            index,
            len: values.len(),
        })
}

/// Builder for [`PropertyValue`]; the only way to assemble one by hand.
#[derive(Debug, Clone)]
pub struct PropertyValueBuilder {
    value: PropertyValue,
}

impl PropertyValueBuilder {
    pub fn area(mut self, area_id: i32) -> Self {
        self.value.area_id = area_id;
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.value.timestamp = timestamp;
        self
    }

    pub fn status(mut self, status: PropertyStatus) -> Self {
        self.value.status = status;
        self
    }

    pub fn int32s(mut self, values: impl Into<Vec<i32>>) -> Self {
        self.value.payload.int32_values = values.into();
        self
    }

    pub fn floats(mut self, values: impl Into<Vec<f32>>) -> Self {
        self.value.payload.float_values = values.into();
        self
    }

    pub fn int64s(mut self, values: impl Into<Vec<i64>>) -> Self {
        self.value.payload.int64_values = values.into();
        self
    }

    pub fn bytes(mut self, values: impl Into<Vec<u8>>) -> Self {
        self.value.payload.bytes = values.into();
        self
    }

    pub fn string(mut self, value: impl Into<String>) -> Self {
        self.value.payload.string_value = value.into();
        self
    }

    pub fn payload(mut self, payload: RawValues) -> Self {
        self.value.payload = payload;
        self
    }

    pub fn build(self) -> PropertyValue {
        self.value
    }
}
