//! Central property bus.
//!
//! Owns the property registry, the property → service ownership map, the
//! subscription table and the last-value log, all behind one lock. The lock
//! is never held while calling the transport or a service.
//!
//! ```text
//!            get / set / subscribe                 on_property_event (dispatch thread)
//!  service ─────────────────────▶ PropertyBus ◀──────────────────── TransportAdapter
//!     ▲                              │  sort into per-service batches
//!     └──────── on_hal_events ◀──────┘  (arrival order kept, one call per service)
//! ```

use core::fmt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use log::{debug, info, trace, warn};
use parking_lot::Mutex;

use super::{HalService, Subscription};
use crate::dispatch::DispatchHandle;
use crate::error::{Error, Result};
use crate::property::{self, PropertyConfig, PropertyValue};
use crate::transport::{PropertyEventListener, SetError, TransportAdapter};

#[derive(Default)]
struct BusState {
    initialized: bool,
    services: Vec<Arc<dyn HalService>>,
    configs: BTreeMap<i32, PropertyConfig>,
    /// property id → index into `services`
    owners: HashMap<i32, usize>,
    subscriptions: BTreeMap<i32, Subscription>,
    last_values: HashMap<i32, PropertyValue>,
}

impl BusState {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn check_owner(&self, service: &str, property_id: i32) -> Result<&PropertyConfig> {
        self.ensure_initialized()?;
        let owner = self
            .owners
            .get(&property_id)
            .and_then(|idx| self.services.get(*idx));
        match owner {
            Some(s) if s.name() == service => self
                .configs
                .get(&property_id)
                .ok_or(Error::NotSupported(property_id)),
            _ => Err(Error::invalid(format!(
                "{} does not own {}",
                service,
                property::hex(property_id)
            ))),
        }
    }

    fn config(&self, property_id: i32) -> Result<&PropertyConfig> {
        self.ensure_initialized()?;
        self.configs
            .get(&property_id)
            .ok_or(Error::NotSupported(property_id))
    }
}

pub struct PropertyBus {
    adapter: TransportAdapter,
    state: Mutex<BusState>,
    /// Serialises `init` so configs are fetched once.
    init_lock: Mutex<()>,
}

impl PropertyBus {
    pub fn new(adapter: TransportAdapter) -> Arc<Self> {
        let bus = Arc::new(Self {
            adapter,
            state: Mutex::new(BusState::default()),
            init_lock: Mutex::new(()),
        });
        let weak: Weak<PropertyBus> = Arc::downgrade(&bus);
        let listener: Weak<dyn PropertyEventListener> = weak;
        bus.adapter.attach_listener(listener);
        bus
    }

    pub fn dispatch(&self) -> &DispatchHandle {
        self.adapter.dispatch()
    }

    // ── Lifecycle ─────────────────────────────────────────────

    pub fn register_service(&self, service: Arc<dyn HalService>) -> Result<()> {
        let mut st = self.state.lock();
        if st.initialized {
            return Err(Error::invalid("services must register before init"));
        }
        if st.services.iter().any(|s| s.name() == service.name()) {
            return Err(Error::invalid(format!(
                "service {} already registered",
                service.name()
            )));
        }
        debug!("Bus: registered service {}", service.name());
        st.services.push(service);
        Ok(())
    }

    /// Fetch configs, assign ownership and start every service. Calling it
    /// again after success is a no-op.
    ///
    /// If a service fails to start, the services already started are
    /// released in reverse order, their subscriptions dropped, and the bus
    /// goes back to uninitialised so `init` can be retried.
    pub fn init(&self) -> Result<()> {
        let _guard = self.init_lock.lock();
        let services = {
            let st = self.state.lock();
            if st.initialized {
                return Ok(());
            }
            st.services.clone()
        };

        let configs: BTreeMap<i32, PropertyConfig> = self
            .adapter
            .get_all_configs()?
            .into_iter()
            .map(|c| (c.property_id, c))
            .collect();

        let mut owners: HashMap<i32, usize> = HashMap::new();
        let mut assignments: Vec<Vec<PropertyConfig>> = Vec::with_capacity(services.len());
        for (idx, service) in services.iter().enumerate() {
            let owned = owned_properties(service.as_ref(), &configs);
            for id in &owned {
                if let Some(prev) = owners.insert(*id, idx) {
                    return Err(Error::DuplicateOwner {
                        property_id: *id,
                        first: services[prev].name(),
                        second: service.name(),
                    });
                }
            }
            assignments.push(owned.iter().filter_map(|id| configs.get(id).cloned()).collect());
        }

        info!(
            "Bus: {} properties, {} owned by {} services",
            configs.len(),
            owners.len(),
            services.len()
        );
        {
            let mut st = self.state.lock();
            st.configs = configs;
            st.owners = owners;
            st.initialized = true;
        }

        for (service, configs) in services.iter().zip(assignments) {
            service.take_configs(configs);
        }
        for (started, service) in services.iter().enumerate() {
            if let Err(e) = service.init() {
                warn!("Bus: {} failed to start: {}", service.name(), e);
                self.roll_back_init(&services[..started]);
                return Err(e);
            }
        }
        Ok(())
    }

    fn roll_back_init(&self, started: &[Arc<dyn HalService>]) {
        for service in started.iter().rev() {
            debug!("Bus: releasing {} after failed init", service.name());
            service.release();
        }
        let remaining: Vec<i32> = {
            let mut st = self.state.lock();
            st.initialized = false;
            st.configs.clear();
            st.owners.clear();
            st.last_values.clear();
            core::mem::take(&mut st.subscriptions).into_keys().collect()
        };
        self.drop_subscriptions(remaining);
    }

    fn drop_subscriptions(&self, ids: Vec<i32>) {
        for id in ids {
            if let Err(e) = self.adapter.unsubscribe(id) {
                warn!("Bus: unsubscribe {} failed: {}", property::hex(id), e);
            }
        }
    }

    /// Release services in reverse order, then drop every remaining
    /// subscription. Unsubscribe failures are logged only.
    pub fn release(&self) {
        let services = self.state.lock().services.clone();
        for service in services.iter().rev() {
            debug!("Bus: releasing {}", service.name());
            service.release();
        }

        let remaining: Vec<i32> = {
            let mut st = self.state.lock();
            st.services.clear();
            st.owners.clear();
            core::mem::take(&mut st.subscriptions).into_keys().collect()
        };
        self.drop_subscriptions(remaining);
    }

    // ── Registry queries ──────────────────────────────────────

    pub fn is_property_supported(&self, property_id: i32) -> bool {
        self.state.lock().configs.contains_key(&property_id)
    }

    pub fn config(&self, property_id: i32) -> Option<PropertyConfig> {
        self.state.lock().configs.get(&property_id).cloned()
    }

    pub fn configs(&self) -> Vec<PropertyConfig> {
        self.state.lock().configs.values().cloned().collect()
    }

    pub fn last_value(&self, property_id: i32) -> Option<PropertyValue> {
        self.state.lock().last_values.get(&property_id).cloned()
    }

    pub fn subscription(&self, property_id: i32) -> Option<Subscription> {
        self.state.lock().subscriptions.get(&property_id).cloned()
    }

    // ── Subscriptions ─────────────────────────────────────────

    pub fn subscribe(
        &self,
        service: &dyn HalService,
        property_id: i32,
        sample_rate: f32,
    ) -> Result<()> {
        let (sub, previous) = {
            let mut st = self.state.lock();
            let config = st.check_owner(service.name(), property_id)?;
            if !config.is_subscribable() {
                return Err(Error::invalid(format!(
                    "{} is not subscribable ({:?}, {:?})",
                    property::hex(property_id),
                    config.access,
                    config.change_mode
                )));
            }
            let sub = Subscription::for_config(config, sample_rate);
            let previous = st.subscriptions.insert(property_id, sub.clone());
            (sub, previous)
        };

        if let Err(e) = self.adapter.subscribe(&[sub.options()]) {
            let mut st = self.state.lock();
            match previous {
                Some(p) => st.subscriptions.insert(property_id, p),
                None => st.subscriptions.remove(&property_id),
            };
            return Err(e);
        }
        debug!(
            "Bus: {} subscribed to {} at {} Hz",
            service.name(),
            property::hex(property_id),
            sub.sample_rate
        );
        Ok(())
    }

    pub fn unsubscribe(&self, service: &dyn HalService, property_id: i32) -> Result<()> {
        let removed = {
            let mut st = self.state.lock();
            st.check_owner(service.name(), property_id)?;
            st.subscriptions.remove(&property_id)
        };
        let Some(removed) = removed else {
            return Ok(());
        };
        if let Err(e) = self.adapter.unsubscribe(property_id) {
            self.state.lock().subscriptions.insert(property_id, removed);
            return Err(e);
        }
        debug!(
            "Bus: {} unsubscribed from {}",
            service.name(),
            property::hex(property_id)
        );
        Ok(())
    }

    // ── Transport access ──────────────────────────────────────

    pub fn get(&self, property_id: i32, area_id: i32) -> Result<PropertyValue> {
        self.get_with(&PropertyValue::request(property_id, area_id))
    }

    /// `get` whose request carries a payload (query-style properties).
    pub fn get_with(&self, request: &PropertyValue) -> Result<PropertyValue> {
        {
            let st = self.state.lock();
            check_readable(st.config(request.property_id())?, request.property_id())?;
        }
        self.adapter.get(request)
    }

    /// Validate `value` against its config, then write it through.
    pub fn set(&self, value: &PropertyValue) -> Result<()> {
        {
            let st = self.state.lock();
            let config = st.config(value.property_id())?;
            check_writable(config, value)?;
        }
        self.adapter.set(value)
    }

    // ── Debug ─────────────────────────────────────────────────

    pub fn dump(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let st = self.state.lock();
        writeln!(out, "PropertyBus: {} properties", st.configs.len())?;
        for (id, config) in &st.configs {
            let owner = st
                .owners
                .get(id)
                .and_then(|idx| st.services.get(*idx))
                .map_or("-", |s| s.name());
            writeln!(
                out,
                "  {} owner={} access={:?} mode={:?} areas={:?}",
                property::hex(*id),
                owner,
                config.access,
                config.change_mode,
                config.area_ids()
            )?;
        }
        writeln!(out, "Subscriptions: {}", st.subscriptions.len())?;
        for sub in st.subscriptions.values() {
            writeln!(
                out,
                "  {} rate={} areas={:?}",
                property::hex(sub.property_id),
                sub.sample_rate,
                sub.area_ids
            )?;
        }
        writeln!(out, "Last values: {}", st.last_values.len())?;
        let mut last: Vec<&PropertyValue> = st.last_values.values().collect();
        last.sort_by_key(|v| v.property_id());
        for v in last {
            writeln!(
                out,
                "  {} area={} t={} {:?} {:?}",
                property::hex(v.property_id()),
                v.area_id(),
                v.timestamp(),
                v.status(),
                v.payload()
            )?;
        }
        Ok(())
    }
}

fn owned_properties(service: &dyn HalService, configs: &BTreeMap<i32, PropertyConfig>) -> Vec<i32> {
    let explicit = service.supported_properties();
    if explicit.is_empty() {
        return configs
            .keys()
            .copied()
            .filter(|id| service.is_supported(*id))
            .collect();
    }
    explicit
        .into_iter()
        .filter(|id| {
            let known = configs.contains_key(id);
            if !known {
                warn!(
                    "Bus: {} lists {} but the controller does not report it",
                    service.name(),
                    property::hex(*id)
                );
            }
            known
        })
        .collect()
}

fn check_readable(config: &PropertyConfig, property_id: i32) -> Result<()> {
    if config.is_readable() {
        Ok(())
    } else {
        Err(Error::invalid(format!(
            "{} is not readable",
            property::hex(property_id)
        )))
    }
}

fn check_writable(config: &PropertyConfig, value: &PropertyValue) -> Result<()> {
    let id = value.property_id();
    if !config.is_writable() {
        return Err(Error::invalid(format!("{} is not writable", property::hex(id))));
    }
    let area = value.area_id();
    if config.is_global() {
        if area != 0 {
            return Err(Error::invalid(format!(
                "{} is global, got area {}",
                property::hex(id),
                area
            )));
        }
        return Ok(());
    }
    let Some(area_config) = config.area_config(area) else {
        return Err(Error::invalid(format!(
            "{} has no area {}",
            property::hex(id),
            area
        )));
    };
    match area_config.out_of_range(value) {
        Some(why) => Err(Error::invalid(format!("{}: {}", property::hex(id), why))),
        None => Ok(()),
    }
}

// ── Event fan-out (dispatch thread) ───────────────────────────

impl PropertyEventListener for PropertyBus {
    fn on_property_event(&self, values: Vec<PropertyValue>) {
        let deliveries: Vec<(Arc<dyn HalService>, Vec<PropertyValue>)> = {
            let mut st = self.state.lock();
            let mut batches: Vec<Vec<PropertyValue>> = vec![Vec::new(); st.services.len()];
            for value in values {
                let id = value.property_id();
                let Some(&idx) = st.owners.get(&id) else {
                    warn!("Bus: no owner for event on {}, dropping", property::hex(id));
                    continue;
                };
                trace!("Bus: event {} -> {}", property::hex(id), st.services[idx].name());
                st.last_values.insert(id, value.clone());
                batches[idx].push(value);
            }
            st.services
                .iter()
                .cloned()
                .zip(batches)
                .filter(|(_, batch)| !batch.is_empty())
                .collect()
        };
        for (service, batch) in deliveries {
            service.on_hal_events(&batch);
        }
    }

    fn on_property_set_error(&self, errors: Vec<SetError>) {
        let deliveries: Vec<(Arc<dyn HalService>, Vec<SetError>)> = {
            let st = self.state.lock();
            let mut batches: Vec<Vec<SetError>> = vec![Vec::new(); st.services.len()];
            for error in errors {
                match st.owners.get(&error.property_id) {
                    Some(&idx) => batches[idx].push(error),
                    None => debug!(
                        "Bus: set error for unowned {}, dropping",
                        property::hex(error.property_id)
                    ),
                }
            }
            st.services
                .iter()
                .cloned()
                .zip(batches)
                .filter(|(_, batch)| !batch.is_empty())
                .collect()
        };
        for (service, batch) in deliveries {
            warn!("Bus: {} set errors for {}", batch.len(), service.name());
            service.on_property_set_error(&batch);
        }
    }
}
