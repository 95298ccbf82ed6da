//! Client-side adapter around a [`PropertyTransport`].
//!
//! Owns retry, error normalisation and wire decoding. Notifications coming
//! from the transport on arbitrary threads are decoded and re-posted onto
//! the dispatch thread before anyone above sees them.

use std::sync::{Arc, Weak};

use log::{debug, trace, warn};

use super::{
    PropertyTransport, RetryPolicy, SetError, StatusCode, SubscribeOptions, TransportCallback,
    TransportError,
};
use crate::dispatch::DispatchHandle;
use crate::error::{Error, Result};
use crate::property::{self, PropertyConfig, PropertyValue, WireValue};

/// Receiver of decoded notifications. Always called on the dispatch thread.
pub trait PropertyEventListener: Send + Sync {
    fn on_property_event(&self, values: Vec<PropertyValue>);
    fn on_property_set_error(&self, errors: Vec<SetError>);
}

pub struct TransportAdapter {
    transport: Arc<dyn PropertyTransport>,
    retry: RetryPolicy,
    dispatch: DispatchHandle,
}

impl TransportAdapter {
    pub fn new(
        transport: Arc<dyn PropertyTransport>,
        retry: RetryPolicy,
        dispatch: DispatchHandle,
    ) -> Self {
        Self {
            transport,
            retry,
            dispatch,
        }
    }

    pub fn dispatch(&self) -> &DispatchHandle {
        &self.dispatch
    }

    /// Route transport notifications to `listener`. Only a weak reference is
    /// kept; once the listener is dropped, notifications are discarded.
    pub fn attach_listener(&self, listener: Weak<dyn PropertyEventListener>) {
        self.transport.register_callback(Arc::new(CallbackRelay {
            listener,
            dispatch: self.dispatch.clone(),
        }));
    }

    pub fn get_all_configs(&self) -> Result<Vec<PropertyConfig>> {
        self.transport
            .get_all_prop_configs()
            .map_err(|e| normalise(e, "get_all_prop_configs"))
    }

    pub fn get(&self, request: &PropertyValue) -> Result<PropertyValue> {
        let encoding = self.transport.encoding();
        let what = format!("get {}", property::hex(request.property_id()));
        let raw = self
            .retry
            .run(&what, || self.transport.get(request.to_wire(encoding)))
            .map_err(|e| normalise(e, &what))?;
        let Some(wire) = raw else {
            return Err(Error::Remote {
                status: StatusCode::NotAvailable,
                message: format!("{what}: no value returned"),
            });
        };
        Ok(PropertyValue::try_from(wire)?)
    }

    pub fn set(&self, value: &PropertyValue) -> Result<()> {
        let encoding = self.transport.encoding();
        let what = format!("set {}", property::hex(value.property_id()));
        self.retry
            .run(&what, || self.transport.set(value.to_wire(encoding)))
            .map_err(|e| normalise(e, &what))
    }

    /// Forwarded once; subscription changes are not retried.
    pub fn subscribe(&self, options: &[SubscribeOptions]) -> Result<()> {
        self.transport
            .subscribe(options)
            .map_err(|e| normalise(e, "subscribe"))
    }

    pub fn unsubscribe(&self, property_id: i32) -> Result<()> {
        self.transport
            .unsubscribe(property_id)
            .map_err(|e| normalise(e, "unsubscribe"))
    }
}

fn normalise(e: TransportError, what: &str) -> Error {
    debug!("Transport: {} failed: {}", what, e);
    match e.status {
        StatusCode::InvalidArg => Error::InvalidArgument(e.message),
        status => Error::Remote {
            status,
            message: e.message,
        },
    }
}

// ── Callback relay ────────────────────────────────────────────

struct CallbackRelay {
    listener: Weak<dyn PropertyEventListener>,
    dispatch: DispatchHandle,
}

impl TransportCallback for CallbackRelay {
    fn on_property_event(&self, values: Vec<WireValue>) {
        let decoded: Vec<PropertyValue> = values
            .into_iter()
            .filter_map(|wire| {
                let prop = wire.property_id();
                PropertyValue::try_from(wire)
                    .inspect_err(|e| {
                        warn!("Transport: dropping undecodable {}: {}", property::hex(prop), e);
                    })
                    .ok()
            })
            .collect();
        if decoded.is_empty() {
            return;
        }
        let listener = self.listener.clone();
        let posted = self.dispatch.post(move || match listener.upgrade() {
            Some(l) => l.on_property_event(decoded),
            None => trace!("Transport: listener gone, dropping events"),
        });
        if posted.is_err() {
            warn!("Transport: could not post property events");
        }
    }

    fn on_property_set_error(&self, errors: Vec<SetError>) {
        if errors.is_empty() {
            return;
        }
        let listener = self.listener.clone();
        let posted = self.dispatch.post(move || match listener.upgrade() {
            Some(l) => l.on_property_set_error(errors),
            None => trace!("Transport: listener gone, dropping set errors"),
        });
        if posted.is_err() {
            warn!("Transport: could not post set errors");
        }
    }
}
