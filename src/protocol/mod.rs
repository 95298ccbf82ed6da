//! Correlated request/response protocols layered on the bus.
//!
//! | Module        | Contents                                          |
//! |---------------|---------------------------------------------------|
//! | `correlator`  | generic pending table, ids, timeouts              |
//! | `user_types`  | user-management message and enum definitions      |
//! | `user_codec`  | packing of those messages into property values    |
//! | `user_hal`    | `UserHalService`, the `HalService` running it     |

pub mod correlator;
pub mod user_codec;
pub mod user_hal;
pub mod user_types;

pub use correlator::{Correlator, ExchangeCallback, ExchangeStatus, PendingRequest};
pub use user_hal::{UserHalService, VehicleRequestHandler};
