//! Log-based adapters.
//!
//! [`LogEventService`] is a passive [`HalService`] that subscribes to a set
//! of properties and writes every value it receives to the log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use log::{info, warn};
use parking_lot::Mutex;

use crate::bus::{HalService, PropertyBus};
use crate::error::Result;
use crate::property::{self, PropertyConfig, PropertyValue};
use crate::transport::SetError;

/// Service that logs every event on the properties it watches.
pub struct LogEventService {
    bus: Weak<PropertyBus>,
    watched: Vec<i32>,
    configs: Mutex<HashMap<i32, PropertyConfig>>,
    seen: AtomicUsize,
}

impl LogEventService {
    pub fn new(bus: &Arc<PropertyBus>, watched: impl Into<Vec<i32>>) -> Arc<Self> {
        Arc::new(Self {
            bus: Arc::downgrade(bus),
            watched: watched.into(),
            configs: Mutex::new(HashMap::new()),
            seen: AtomicUsize::new(0),
        })
    }

    /// Events logged so far.
    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::Relaxed)
    }
}

impl HalService for LogEventService {
    fn name(&self) -> &'static str {
        "LogEventService"
    }

    fn supported_properties(&self) -> Vec<i32> {
        self.watched.clone()
    }

    fn take_configs(&self, configs: Vec<PropertyConfig>) {
        *self.configs.lock() = configs.into_iter().map(|c| (c.property_id, c)).collect();
    }

    fn init(&self) -> Result<()> {
        let Some(bus) = self.bus.upgrade() else {
            return Ok(());
        };
        let configs: Vec<(i32, f32)> = self
            .configs
            .lock()
            .values()
            .filter(|c| c.is_subscribable())
            .map(|c| (c.property_id, c.max_sample_rate))
            .collect();
        for (id, rate) in configs {
            bus.subscribe(self, id, rate)?;
        }
        Ok(())
    }

    fn release(&self) {}

    fn on_hal_events(&self, values: &[PropertyValue]) {
        let configs = self.configs.lock();
        for v in values {
            let typed = match configs.get(&v.property_id()) {
                Some(c) => v.to_typed_with(c),
                None => v.to_typed(),
            };
            match typed {
                Ok(t) => info!(
                    "EVENT | {} area={} t={} {:?} | {:?}",
                    property::hex(v.property_id()),
                    v.area_id(),
                    v.timestamp(),
                    v.status(),
                    t
                ),
                Err(e) => warn!("EVENT | {} undecodable: {}", property::hex(v.property_id()), e),
            }
        }
        self.seen.fetch_add(values.len(), Ordering::Relaxed);
    }

    fn on_property_set_error(&self, errors: &[SetError]) {
        for e in errors {
            warn!(
                "SET_ERROR | {} area={} status={}",
                property::hex(e.property_id),
                e.area_id,
                e.status
            );
        }
    }
}
