//! Property bus: routing, subscriptions and batched fan-out between the
//! transport and the services that own properties.

pub mod property_bus;
pub mod service;
pub mod subscription;

pub use property_bus::PropertyBus;
pub use service::HalService;
pub use subscription::Subscription;
