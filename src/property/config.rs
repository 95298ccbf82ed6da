//! Static property metadata reported by the transport.

use serde::{Deserialize, Serialize};

use super::{PropertyType, PropertyValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Access {
    #[default]
    None,
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChangeMode {
    #[default]
    Static,
    OnChange,
    Continuous,
}

/// Per-area bounds. A `(0, 0)` pair leaves that type unbounded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AreaConfig {
    pub area_id: i32,
    pub min_int32: i32,
    pub max_int32: i32,
    pub min_int64: i64,
    pub max_int64: i64,
    pub min_float: f32,
    pub max_float: f32,
}

impl AreaConfig {
    pub fn new(area_id: i32) -> Self {
        Self {
            area_id,
            ..Self::default()
        }
    }

    /// Returns the first scalar in `value` that falls outside the bounds.
    pub fn out_of_range(&self, value: &PropertyValue) -> Option<String> {
        match PropertyType::of(value.property_id()) {
            Some(PropertyType::Int32 | PropertyType::Int32Vec) => {
                bounded(self.min_int32, self.max_int32, value.int32_values())
            }
            Some(PropertyType::Int64 | PropertyType::Int64Vec) => {
                bounded(self.min_int64, self.max_int64, value.int64_values())
            }
            Some(PropertyType::Float | PropertyType::FloatVec) => {
                bounded(self.min_float, self.max_float, value.float_values())
            }
            _ => None,
        }
    }
}

fn bounded<T>(min: T, max: T, values: &[T]) -> Option<String>
where
    T: PartialOrd + Default + Copy + core::fmt::Display,
{
    if min == T::default() && max == T::default() {
        return None;
    }
    values
        .iter()
        .find(|v| **v < min || **v > max)
        .map(|v| format!("{v} outside [{min}, {max}]"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub property_id: i32,
    pub access: Access,
    pub change_mode: ChangeMode,
    /// Empty means one implicit global area.
    pub area_configs: Vec<AreaConfig>,
    pub config_array: Vec<i32>,
    pub config_string: String,
    pub min_sample_rate: f32,
    pub max_sample_rate: f32,
}

impl PropertyConfig {
    pub fn new(property_id: i32, access: Access, change_mode: ChangeMode) -> Self {
        Self {
            property_id,
            access,
            change_mode,
            ..Self::default()
        }
    }

    pub fn with_areas(mut self, areas: impl IntoIterator<Item = AreaConfig>) -> Self {
        self.area_configs = areas.into_iter().collect();
        self
    }

    pub fn with_config_array(mut self, config_array: impl Into<Vec<i32>>) -> Self {
        self.config_array = config_array.into();
        self
    }

    pub fn with_sample_rates(mut self, min: f32, max: f32) -> Self {
        self.min_sample_rate = min;
        self.max_sample_rate = max;
        self
    }

    pub fn property_type(&self) -> Option<PropertyType> {
        PropertyType::of(self.property_id)
    }

    pub fn is_global(&self) -> bool {
        self.area_configs.is_empty()
    }

    pub fn area_ids(&self) -> Vec<i32> {
        if self.area_configs.is_empty() {
            vec![0]
        } else {
            self.area_configs.iter().map(|a| a.area_id).collect()
        }
    }

    pub fn area_config(&self, area_id: i32) -> Option<&AreaConfig> {
        self.area_configs.iter().find(|a| a.area_id == area_id)
    }

    pub fn is_readable(&self) -> bool {
        self.access.is_readable()
    }

    pub fn is_writable(&self) -> bool {
        self.access.is_writable()
    }

    /// Readable and not STATIC.
    pub fn is_subscribable(&self) -> bool {
        self.is_readable() && self.change_mode != ChangeMode::Static
    }

    /// Rate the transport should actually use for a subscription.
    ///
    /// Controller-supplied bounds are not trusted: a NaN, infinite or
    /// negative minimum counts as 0, a NaN or infinite maximum as unbounded,
    /// and a NaN request falls back to the minimum.
    pub fn effective_sample_rate(&self, requested: f32) -> f32 {
        match self.change_mode {
            ChangeMode::Continuous => {
                let min = if self.min_sample_rate.is_finite() {
                    self.min_sample_rate.max(0.0)
                } else {
                    0.0
                };
                let max = if self.max_sample_rate.is_finite() {
                    self.max_sample_rate.max(min)
                } else {
                    f32::INFINITY
                };
                if requested.is_nan() {
                    min
                } else {
                    requested.clamp(min, max)
                }
            }
            _ => 0.0,
        }
    }
}
