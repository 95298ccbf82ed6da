//! Subscription records kept by the bus.

use crate::property::PropertyConfig;
use crate::transport::SubscribeOptions;

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub property_id: i32,
    pub sample_rate: f32,
    pub area_ids: Vec<i32>,
}

impl Subscription {
    /// Subscription covering every area of `config` at the effective rate.
    pub fn for_config(config: &PropertyConfig, requested_rate: f32) -> Self {
        Self {
            property_id: config.property_id,
            sample_rate: config.effective_sample_rate(requested_rate),
            area_ids: config.area_ids(),
        }
    }

    pub fn options(&self) -> SubscribeOptions {
        SubscribeOptions {
            property_id: self.property_id,
            area_ids: self.area_ids.clone(),
            sample_rate: self.sample_rate,
        }
    }
}
