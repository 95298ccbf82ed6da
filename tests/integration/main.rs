//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below exercises one layer of the stack against the simulated
//! controller in `propbus::adapters::sim`, with a real dispatch thread.

mod bus_tests;
mod harness;
mod user_hal_tests;
