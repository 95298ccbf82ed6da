//! Consumer registration contract.

use crate::error::Result;
use crate::property::{PropertyConfig, PropertyValue};
use crate::transport::SetError;

/// A logical service that owns a set of properties on the bus.
///
/// Lifecycle, driven by [`PropertyBus`](super::PropertyBus):
///
/// ```text
///  register ─▶ take_configs ─▶ init ─▶ on_hal_events* / on_property_set_error* ─▶ release
/// ```
///
/// Event callbacks run on the dispatch thread and receive a whole batch at
/// once.
pub trait HalService: Send + Sync {
    /// Unique name, used for ownership checks and logging.
    fn name(&self) -> &'static str;

    /// Properties this service owns. An empty list means "ask
    /// [`is_supported`](Self::is_supported) for every known property".
    fn supported_properties(&self) -> Vec<i32> {
        Vec::new()
    }

    fn is_supported(&self, _property_id: i32) -> bool {
        false
    }

    /// Configs of every property assigned to this service.
    fn take_configs(&self, configs: Vec<PropertyConfig>);

    fn init(&self) -> Result<()>;

    fn release(&self);

    fn on_hal_events(&self, values: &[PropertyValue]);

    fn on_property_set_error(&self, _errors: &[SetError]) {}
}
