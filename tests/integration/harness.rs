//! Shared rig for integration tests: a simulated controller, a live
//! dispatch thread and a bus wired on top, plus a recording service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use propbus::adapters::sim::{Passive, SimBehavior, SimTransport};
use propbus::bus::{HalService, PropertyBus};
use propbus::dispatch::Dispatcher;
use propbus::property::{
    Access, AreaConfig, ChangeMode, PropertyConfig, PropertyValue, WireEncoding,
};
use propbus::transport::{RetryPolicy, SetError, TransportAdapter};

pub const GEAR: i32 = 0x1140_0400;
pub const SPEED: i32 = 0x1160_0207;
pub const DOOR_LOCK: i32 = 0x1620_0b02;
pub const WINDOW_POS: i32 = 0x1340_0bc0;
pub const INFO_VIN: i32 = 0x1110_0100;

pub struct Rig {
    pub sim: Arc<SimTransport>,
    pub bus: Arc<PropertyBus>,
    // Dropped last so pending jobs drain before the bus goes away.
    pub dispatcher: Dispatcher,
}

#[allow(dead_code)]
impl Rig {
    pub fn new(configs: Vec<PropertyConfig>) -> Self {
        Self::with(WireEncoding::Structured, configs, Arc::new(Passive))
    }

    pub fn with(
        encoding: WireEncoding,
        configs: Vec<PropertyConfig>,
        behavior: Arc<dyn SimBehavior>,
    ) -> Self {
        let dispatcher = Dispatcher::spawn("propbus-test").expect("dispatcher");
        let sim = Arc::new(SimTransport::new(encoding, configs).with_behavior(behavior));
        let adapter = TransportAdapter::new(sim.clone(), fast_retry(), dispatcher.handle());
        let bus = PropertyBus::new(adapter);
        Self {
            sim,
            bus,
            dispatcher,
        }
    }

    /// Block until everything already posted to the dispatch thread ran.
    pub fn settle(&self) {
        self.bus.dispatch().sync().expect("sync");
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(Duration::from_millis(2), Duration::from_millis(60))
}

#[allow(dead_code)]
pub fn vehicle_configs() -> Vec<PropertyConfig> {
    vec![
        PropertyConfig::new(GEAR, Access::Read, ChangeMode::OnChange),
        PropertyConfig::new(SPEED, Access::Read, ChangeMode::Continuous)
            .with_sample_rates(1.0, 10.0),
        PropertyConfig::new(DOOR_LOCK, Access::ReadWrite, ChangeMode::OnChange).with_areas([AreaConfig::new(1), AreaConfig::new(4)]),
        PropertyConfig::new(WINDOW_POS, Access::ReadWrite, ChangeMode::OnChange).with_areas([
            AreaConfig {
                min_int32: 0,
                max_int32: 10,
                ..AreaConfig::new(1)
            },
        ]),
        PropertyConfig::new(INFO_VIN, Access::Read, ChangeMode::Static),
    ]
}

// ── Recording service ─────────────────────────────────────────

/// Shared log of lifecycle calls across several services.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub struct Recorder {
    name: &'static str,
    owns: Vec<i32>,
    journal: Journal,
    pub configs: Mutex<Vec<PropertyConfig>>,
    pub batches: Mutex<Vec<Vec<PropertyValue>>>,
    pub set_errors: Mutex<Vec<Vec<SetError>>>,
    /// When set, `init` fails with `InvalidArgument`.
    pub refuse_init: AtomicBool,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new(name: &'static str, owns: impl Into<Vec<i32>>, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name,
            owns: owns.into(),
            journal: journal.clone(),
            configs: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
            set_errors: Mutex::new(Vec::new()),
            refuse_init: AtomicBool::new(false),
        })
    }

    pub fn events(&self) -> Vec<PropertyValue> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

impl HalService for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supported_properties(&self) -> Vec<i32> {
        self.owns.clone()
    }

    fn take_configs(&self, configs: Vec<PropertyConfig>) {
        self.journal.lock().push(format!("configs:{}", self.name));
        *self.configs.lock() = configs;
    }

    fn init(&self) -> propbus::Result<()> {
        self.journal.lock().push(format!("init:{}", self.name));
        if self.refuse_init.load(Ordering::SeqCst) {
            return Err(propbus::Error::invalid("refused to start"));
        }
        Ok(())
    }

    fn release(&self) {
        self.journal.lock().push(format!("release:{}", self.name));
    }

    fn on_hal_events(&self, values: &[PropertyValue]) {
        self.batches.lock().push(values.to_vec());
    }

    fn on_property_set_error(&self, errors: &[SetError]) {
        self.set_errors.lock().push(errors.to_vec());
    }
}
