//! Property bus library.
//!
//! A property-oriented hardware abstraction bus: services own properties,
//! exchange typed values with a controller over a retrying transport, and
//! run correlated request/response protocols on top of it.
//!
//! ```text
//!  HalService … HalService        (user HAL, loggers, consumers)
//!        │  ▲
//!        ▼  │ on_hal_events (batched, dispatch thread)
//!     PropertyBus ── registry · ownership · subscriptions
//!        │  ▲
//!        ▼  │
//!   TransportAdapter ── retry · decode · relay ──▶ Dispatcher thread
//!        │  ▲
//!        ▼  │
//!   PropertyTransport (controller)
//! ```

#![deny(unused_must_use)]

// Links the std time driver that backs the dispatcher's timers.
#[cfg(not(target_os = "espidf"))]
use embassy_time as _;

pub mod adapters;
pub mod bus;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod property;
pub mod protocol;
pub mod transport;

pub use bus::{HalService, PropertyBus};
pub use config::BusConfig;
pub use dispatch::{DispatchHandle, Dispatcher};
pub use error::{Error, Result, ValueError};
pub use property::{PropertyConfig, PropertyValue};
pub use transport::{PropertyTransport, TransportAdapter};
