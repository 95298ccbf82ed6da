//! Layout of MIXED properties.
//!
//! A MIXED property packs heterogeneous fields into the payload sequences.
//! Which fields exist is described by the first nine entries of the
//! property's config array:
//!
//! ```text
//! [0] has string        [3] int32 array len   [6] has float
//! [1] has boolean       [4] has int64         [7] float array len
//! [2] has int32         [5] int64 array len   [8] byte array len
//! ```
//!
//! Within `int32_values` the boolean comes first, then the int32 scalar,
//! then the int32 array. int64 and float sequences put the scalar before
//! the array.

use serde::{Deserialize, Serialize};

use super::{PropertyValue, RawValues};
use crate::error::ValueError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixedLayout {
    pub has_string: bool,
    pub has_boolean: bool,
    pub has_int32: bool,
    pub int32_array_len: usize,
    pub has_int64: bool,
    pub int64_array_len: usize,
    pub has_float: bool,
    pub float_array_len: usize,
    pub byte_array_len: usize,
}

impl MixedLayout {
    pub const SLOTS: usize = 9;

    pub fn from_config_array(config_array: &[i32]) -> Result<Self, ValueError> {
        let Some(slots) = config_array.get(..Self::SLOTS) else {
            return Err(ValueError::MixedLayout("config array shorter than 9 slots"));
        };
        if slots.iter().any(|s| *s < 0) {
            return Err(ValueError::MixedLayout("negative count in config array"));
        }
        Ok(Self {
            has_string: slots[0] != 0,
            has_boolean: slots[1] != 0,
            has_int32: slots[2] != 0,
            int32_array_len: slots[3] as usize,
            has_int64: slots[4] != 0,
            int64_array_len: slots[5] as usize,
            has_float: slots[6] != 0,
            float_array_len: slots[7] as usize,
            byte_array_len: slots[8] as usize,
        })
    }

    pub fn to_config_array(&self) -> Vec<i32> {
        vec![
            i32::from(self.has_string),
            i32::from(self.has_boolean),
            i32::from(self.has_int32),
            self.int32_array_len as i32,
            i32::from(self.has_int64),
            self.int64_array_len as i32,
            i32::from(self.has_float),
            self.float_array_len as i32,
            self.byte_array_len as i32,
        ]
    }

    pub fn int32_count(&self) -> usize {
        usize::from(self.has_boolean) + usize::from(self.has_int32) + self.int32_array_len
    }

    pub fn int64_count(&self) -> usize {
        usize::from(self.has_int64) + self.int64_array_len
    }

    pub fn float_count(&self) -> usize {
        usize::from(self.has_float) + self.float_array_len
    }

    /// Split a value's payload into its typed segments.
    pub fn decode(&self, value: &PropertyValue) -> Result<MixedValue, ValueError> {
        let p = value.payload();
        if p.int32_values.len() != self.int32_count() {
            return Err(ValueError::MixedLayout("int32 count"));
        }
        if p.int64_values.len() != self.int64_count() {
            return Err(ValueError::MixedLayout("int64 count"));
        }
        if p.float_values.len() != self.float_count() {
            return Err(ValueError::MixedLayout("float count"));
        }
        if p.bytes.len() != self.byte_array_len {
            return Err(ValueError::MixedLayout("byte count"));
        }
        if !self.has_string && !p.string_value.is_empty() {
            return Err(ValueError::MixedLayout("unexpected string"));
        }

        let mut ints = p.int32_values.iter().copied();
        let boolean = self.has_boolean.then(|| ints.next().is_some_and(|b| b != 0));
        let int32 = if self.has_int32 { ints.next() } else { None };
        let int32s: Vec<i32> = ints.collect();

        let (int64, int64s) = split_scalar(self.has_int64, &p.int64_values);
        let (float, floats) = split_scalar(self.has_float, &p.float_values);

        Ok(MixedValue {
            string: self.has_string.then(|| p.string_value.clone()),
            boolean,
            int32,
            int32s,
            int64,
            int64s,
            float,
            floats,
            bytes: p.bytes.clone(),
        })
    }

    /// Pack segments into a fresh value for a set request.
    ///
    /// Only the payload is carried: the result has timestamp 0 and status
    /// `Available`. The boolean segment is written as 0 or 1, so a decoded
    /// value whose boolean slot held some other nonzero integer does not
    /// encode back to the same payload.
    pub fn encode(
        &self,
        property_id: i32,
        area_id: i32,
        mixed: &MixedValue,
    ) -> Result<PropertyValue, ValueError> {
        if mixed.string.is_some() != self.has_string
            || mixed.boolean.is_some() != self.has_boolean
            || mixed.int32.is_some() != self.has_int32
            || mixed.int64.is_some() != self.has_int64
            || mixed.float.is_some() != self.has_float
        {
            return Err(ValueError::MixedLayout("scalar presence"));
        }
        if mixed.int32s.len() != self.int32_array_len
            || mixed.int64s.len() != self.int64_array_len
            || mixed.floats.len() != self.float_array_len
            || mixed.bytes.len() != self.byte_array_len
        {
            return Err(ValueError::MixedLayout("array length"));
        }

        let mut int32_values = Vec::with_capacity(self.int32_count());
        int32_values.extend(mixed.boolean.map(i32::from));
        int32_values.extend(mixed.int32);
        int32_values.extend_from_slice(&mixed.int32s);

        let mut int64_values = Vec::with_capacity(self.int64_count());
        int64_values.extend(mixed.int64);
        int64_values.extend_from_slice(&mixed.int64s);

        let mut float_values = Vec::with_capacity(self.float_count());
        float_values.extend(mixed.float);
        float_values.extend_from_slice(&mixed.floats);

        Ok(PropertyValue::builder(property_id)
            .area(area_id)
            .payload(RawValues {
                int32_values,
                float_values,
                int64_values,
                bytes: mixed.bytes.clone(),
                string_value: mixed.string.clone().unwrap_or_default(),
            })
            .build())
    }
}

fn split_scalar<T: Copy>(has_scalar: bool, values: &[T]) -> (Option<T>, Vec<T>) {
    match values.split_first() {
        Some((first, rest)) if has_scalar => (Some(*first), rest.to_vec()),
        _ => (None, values.to_vec()),
    }
}

/// Decoded segments of a MIXED property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixedValue {
    pub string: Option<String>,
    pub boolean: Option<bool>,
    pub int32: Option<i32>,
    pub int32s: Vec<i32>,
    pub int64: Option<i64>,
    pub int64s: Vec<i64>,
    pub float: Option<f32>,
    pub floats: Vec<f32>,
    pub bytes: Vec<u8>,
}
