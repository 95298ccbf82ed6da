//! In-memory controller.
//!
//! Implements [`PropertyTransport`] over a property table so the bus can run
//! without hardware. Controller-side behaviour (answering a request,
//! computing a dynamic value) is plugged in through [`SimBehavior`]. Fault
//! injection covers TRY_AGAIN storms and failing subscriptions.
//!
//! Notifications are delivered on the thread that triggers them, outside
//! the internal lock, the same way a real controller calls back on its own
//! binder/IPC thread.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::property::{self, PropertyConfig, PropertyValue, WireEncoding, WireValue};
use crate::transport::{
    PropertyTransport, SetError, StatusCode, SubscribeOptions, TransportCallback, TransportError,
};

/// Controller-side reactions.
pub trait SimBehavior: Send + Sync {
    /// Dynamic answer to a `get`; `None` falls back to the stored value.
    fn on_get(&self, _request: &PropertyValue) -> Option<PropertyValue> {
        None
    }

    /// Values to publish after a successful `set`.
    fn on_set(&self, _value: &PropertyValue) -> Vec<PropertyValue> {
        Vec::new()
    }
}

/// Behaviour that only stores values.
pub struct Passive;

impl SimBehavior for Passive {}

#[derive(Default)]
struct SimState {
    configs: HashMap<i32, PropertyConfig>,
    values: HashMap<(i32, i32), PropertyValue>,
    callback: Option<Arc<dyn TransportCallback>>,
    subscriptions: HashMap<i32, SubscribeOptions>,
    sets: Vec<PropertyValue>,
    pending_failures: VecDeque<TransportError>,
    subscribe_failure: Option<TransportError>,
    config_fetches: usize,
    get_calls: usize,
    set_calls: usize,
    answer_empty: bool,
}

pub struct SimTransport {
    encoding: WireEncoding,
    behavior: Arc<dyn SimBehavior>,
    state: Mutex<SimState>,
}

impl SimTransport {
    pub fn new(encoding: WireEncoding, configs: impl IntoIterator<Item = PropertyConfig>) -> Self {
        let state = SimState {
            configs: configs.into_iter().map(|c| (c.property_id, c)).collect(),
            ..SimState::default()
        };
        Self {
            encoding,
            behavior: Arc::new(Passive),
            state: Mutex::new(state),
        }
    }

    pub fn with_behavior(mut self, behavior: Arc<dyn SimBehavior>) -> Self {
        self.behavior = behavior;
        self
    }

    // ── Controller-side controls ──────────────────────────────

    /// Seed or overwrite the stored value without notifying anyone.
    pub fn store(&self, value: PropertyValue) {
        let key = (value.property_id(), value.area_id());
        self.state.lock().values.insert(key, value);
    }

    /// Fail the next `times` get/set calls with `status`.
    pub fn fail_next(&self, status: StatusCode, times: usize) {
        let mut st = self.state.lock();
        for _ in 0..times {
            st.pending_failures
                .push_back(TransportError::new(status, "injected failure"));
        }
    }

    pub fn fail_subscriptions(&self, status: Option<StatusCode>) {
        self.state.lock().subscribe_failure =
            status.map(|s| TransportError::new(s, "subscribe refused"));
    }

    /// Answer OK with no value on every subsequent `get`.
    pub fn answer_empty(&self, empty: bool) {
        self.state.lock().answer_empty = empty;
    }

    /// Publish values as if the controller changed them.
    pub fn emit(&self, values: Vec<PropertyValue>) {
        let callback = {
            let mut st = self.state.lock();
            for v in &values {
                st.values
                    .insert((v.property_id(), v.area_id()), v.clone());
            }
            st.callback.clone()
        };
        if let Some(cb) = callback {
            cb.on_property_event(values.iter().map(|v| v.to_wire(self.encoding)).collect());
        }
    }

    /// Publish raw wire values, bypassing the table.
    pub fn emit_wire(&self, values: Vec<WireValue>) {
        let callback = self.state.lock().callback.clone();
        if let Some(cb) = callback {
            cb.on_property_event(values);
        }
    }

    pub fn emit_set_errors(&self, errors: Vec<SetError>) {
        let callback = self.state.lock().callback.clone();
        if let Some(cb) = callback {
            cb.on_property_set_error(errors);
        }
    }

    // ── Inspection ────────────────────────────────────────────

    pub fn sets(&self) -> Vec<PropertyValue> {
        self.state.lock().sets.clone()
    }

    pub fn subscribed(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.state.lock().subscriptions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn subscription(&self, property_id: i32) -> Option<SubscribeOptions> {
        self.state.lock().subscriptions.get(&property_id).cloned()
    }

    pub fn config_fetches(&self) -> usize {
        self.state.lock().config_fetches
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().get_calls
    }

    pub fn set_calls(&self) -> usize {
        self.state.lock().set_calls
    }

    fn decode(wire: WireValue) -> Result<PropertyValue, TransportError> {
        PropertyValue::try_from(wire)
            .map_err(|e| TransportError::new(StatusCode::InvalidArg, e.to_string()))
    }
}

impl PropertyTransport for SimTransport {
    fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    fn get_all_prop_configs(&self) -> Result<Vec<PropertyConfig>, TransportError> {
        let mut st = self.state.lock();
        st.config_fetches += 1;
        let mut configs: Vec<PropertyConfig> = st.configs.values().cloned().collect();
        configs.sort_by_key(|c| c.property_id);
        Ok(configs)
    }

    fn get(&self, request: WireValue) -> Result<Option<WireValue>, TransportError> {
        let request = Self::decode(request)?;
        let prop = request.property_id();
        let stored = {
            let mut st = self.state.lock();
            st.get_calls += 1;
            if let Some(e) = st.pending_failures.pop_front() {
                return Err(e);
            }
            let Some(config) = st.configs.get(&prop) else {
                return Err(TransportError::new(
                    StatusCode::InvalidArg,
                    format!("unknown property {}", property::hex(prop)),
                ));
            };
            if !config.is_readable() {
                return Err(TransportError::new(StatusCode::AccessDenied, "not readable"));
            }
            if st.answer_empty {
                return Ok(None);
            }
            st.values.get(&(prop, request.area_id())).cloned()
        };
        let value = self.behavior.on_get(&request).or(stored);
        Ok(value.map(|v| v.to_wire(self.encoding)))
    }

    fn set(&self, value: WireValue) -> Result<(), TransportError> {
        let value = Self::decode(value)?;
        let prop = value.property_id();
        {
            let mut st = self.state.lock();
            st.set_calls += 1;
            if let Some(e) = st.pending_failures.pop_front() {
                return Err(e);
            }
            let Some(config) = st.configs.get(&prop) else {
                return Err(TransportError::new(
                    StatusCode::InvalidArg,
                    format!("unknown property {}", property::hex(prop)),
                ));
            };
            if !config.is_writable() {
                return Err(TransportError::new(StatusCode::AccessDenied, "not writable"));
            }
            st.values.insert((prop, value.area_id()), value.clone());
            st.sets.push(value.clone());
        }
        debug!("Sim: set {}", property::hex(prop));
        let replies = self.behavior.on_set(&value);
        if !replies.is_empty() {
            self.emit(replies);
        }
        Ok(())
    }

    fn subscribe(&self, options: &[SubscribeOptions]) -> Result<(), TransportError> {
        let mut st = self.state.lock();
        if let Some(e) = st.subscribe_failure.clone() {
            return Err(e);
        }
        for o in options {
            st.subscriptions.insert(o.property_id, o.clone());
        }
        Ok(())
    }

    fn unsubscribe(&self, property_id: i32) -> Result<(), TransportError> {
        self.state.lock().subscriptions.remove(&property_id);
        Ok(())
    }

    fn register_callback(&self, callback: Arc<dyn TransportCallback>) {
        self.state.lock().callback = Some(callback);
    }
}
