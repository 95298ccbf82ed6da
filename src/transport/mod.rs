//! Transport layer: the controller port, retry policy and the adapter that
//! ties them to the dispatch thread.

pub mod adapter;
pub mod port;
pub mod retry;

pub use adapter::{PropertyEventListener, TransportAdapter};
pub use port::{
    PropertyTransport, SetError, StatusCode, SubscribeOptions, TransportCallback, TransportError,
};
pub use retry::RetryPolicy;
