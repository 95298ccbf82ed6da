//! OBD-II diagnostic frames.
//!
//! The live and freeze frame properties pack every sensor reading of one
//! sample into a single MIXED value. The layout is fixed by an explicit,
//! versioned schema: a known number of system sensors, followed by the
//! vendor sensors the property's config declares.
//!
//! ```text
//! int32_values  [ system int sensors (32) | vendor int sensors (config[0]) ]
//! float_values  [ system float sensors (71) | vendor float sensors (config[1]) ]
//! bytes         presence bitmap, ints first then floats, LSB first
//! string_value  diagnostic trouble code (freeze frames only)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::property::{PropertyConfig, PropertyValue};

pub const OBD2_LIVE_FRAME: i32 = 0x11e0_0d00;
pub const OBD2_FREEZE_FRAME: i32 = 0x11e0_0d01;

/// Bumped whenever the system sensor counts below change.
pub const SCHEMA_VERSION: u32 = 1;
pub const SYSTEM_INT32_SENSOR_COUNT: usize = 32;
pub const SYSTEM_FLOAT_SENSOR_COUNT: usize = 71;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticLayout {
    pub schema_version: u32,
    pub vendor_int32_sensors: usize,
    pub vendor_float_sensors: usize,
}

impl DiagnosticLayout {
    pub fn from_config(config: &PropertyConfig) -> Result<Self, ValueError> {
        let count = |i: usize| -> Result<usize, ValueError> {
            match config.config_array.get(i).copied().unwrap_or(0) {
                n if n < 0 => Err(ValueError::MixedLayout("negative vendor sensor count")),
                n => Ok(n as usize),
            }
        };
        Ok(Self {
            schema_version: SCHEMA_VERSION,
            vendor_int32_sensors: count(0)?,
            vendor_float_sensors: count(1)?,
        })
    }

    pub fn int32_sensors(&self) -> usize {
        SYSTEM_INT32_SENSOR_COUNT + self.vendor_int32_sensors
    }

    pub fn float_sensors(&self) -> usize {
        SYSTEM_FLOAT_SENSOR_COUNT + self.vendor_float_sensors
    }

    pub fn bitmap_len(&self) -> usize {
        (self.int32_sensors() + self.float_sensors()).div_ceil(8)
    }
}

/// One decoded sample. Absent sensors are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticFrame {
    pub property_id: i32,
    pub timestamp: i64,
    pub int32_sensors: Vec<Option<i32>>,
    pub float_sensors: Vec<Option<f32>>,
    pub dtc: Option<String>,
}

impl DiagnosticFrame {
    pub fn decode(value: &PropertyValue, layout: &DiagnosticLayout) -> Result<Self, ValueError> {
        if value.int32_values().len() != layout.int32_sensors() {
            return Err(ValueError::MixedLayout("int32 sensor count"));
        }
        if value.float_values().len() != layout.float_sensors() {
            return Err(ValueError::MixedLayout("float sensor count"));
        }
        if value.bytes().len() != layout.bitmap_len() {
            return Err(ValueError::MixedLayout("presence bitmap length"));
        }
        let bitmap = value.bytes();
        let present = |bit: usize| bitmap[bit / 8] & (1 << (bit % 8)) != 0;

        let int32_sensors = value
            .int32_values()
            .iter()
            .enumerate()
            .map(|(i, v)| present(i).then_some(*v))
            .collect();
        let offset = layout.int32_sensors();
        let float_sensors = value
            .float_values()
            .iter()
            .enumerate()
            .map(|(i, v)| present(offset + i).then_some(*v))
            .collect();

        Ok(Self {
            property_id: value.property_id(),
            timestamp: value.timestamp(),
            int32_sensors,
            float_sensors,
            dtc: (!value.string().is_empty()).then(|| value.string().to_owned()),
        })
    }

    pub fn present_count(&self) -> usize {
        self.int32_sensors.iter().flatten().count() + self.float_sensors.iter().flatten().count()
    }
}
