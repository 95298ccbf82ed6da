//! Adapters: concrete implementations of the bus's port traits.
//!
//! | Adapter    | Implements         | Connects to                   |
//! |------------|--------------------|-------------------------------|
//! | `sim`      | PropertyTransport  | in-memory property table      |
//! | `log_sink` | HalService         | `log` output                  |

pub mod log_sink;
pub mod sim;
