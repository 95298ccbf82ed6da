//! Transport port: the boundary between the bus and the controller.
//!
//! ```text
//!   PropertyBus ──▶ TransportAdapter ──▶ PropertyTransport (controller)
//!                         ▲                      │
//!                         └── TransportCallback ◀┘  (any thread)
//! ```
//!
//! A transport speaks one [`WireEncoding`]. It never retries and never
//! interprets payloads; the adapter owns both concerns.

use core::fmt;
use std::sync::Arc;

use crate::property::{PropertyConfig, WireEncoding, WireValue};

// ───────────────────────────────────────────────────────────────
// Status codes
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    /// Transient; the adapter retries.
    TryAgain = 1,
    InvalidArg = 2,
    NotAvailable = 3,
    AccessDenied = 4,
    InternalError = 5,
    NotAvailableDisabled = 6,
    NotAvailableSpeedLow = 7,
    NotAvailableSpeedHigh = 8,
    NotAvailablePoorVisibility = 9,
    NotAvailableSafety = 10,
}

impl StatusCode {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Self::Ok,
            1 => Self::TryAgain,
            2 => Self::InvalidArg,
            3 => Self::NotAvailable,
            4 => Self::AccessDenied,
            5 => Self::InternalError,
            6 => Self::NotAvailableDisabled,
            7 => Self::NotAvailableSpeedLow,
            8 => Self::NotAvailableSpeedHigh,
            9 => Self::NotAvailablePoorVisibility,
            10 => Self::NotAvailableSafety,
            _ => return None,
        })
    }

    pub const fn raw(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::TryAgain => "TRY_AGAIN",
            Self::InvalidArg => "INVALID_ARG",
            Self::NotAvailable => "NOT_AVAILABLE",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::NotAvailableDisabled => "NOT_AVAILABLE_DISABLED",
            Self::NotAvailableSpeedLow => "NOT_AVAILABLE_SPEED_LOW",
            Self::NotAvailableSpeedHigh => "NOT_AVAILABLE_SPEED_HIGH",
            Self::NotAvailablePoorVisibility => "NOT_AVAILABLE_POOR_VISIBILITY",
            Self::NotAvailableSafety => "NOT_AVAILABLE_SAFETY",
        };
        f.write_str(name)
    }
}

/// Non-OK answer from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub status: StatusCode,
    pub message: String,
}

impl TransportError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

// ───────────────────────────────────────────────────────────────
// Requests and notifications
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeOptions {
    pub property_id: i32,
    pub area_ids: Vec<i32>,
    pub sample_rate: f32,
}

/// Asynchronous failure of an earlier `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetError {
    pub property_id: i32,
    pub area_id: i32,
    pub status: StatusCode,
}

/// Notification sink the transport calls from any thread.
pub trait TransportCallback: Send + Sync {
    fn on_property_event(&self, values: Vec<WireValue>);
    fn on_property_set_error(&self, errors: Vec<SetError>);
}

// ───────────────────────────────────────────────────────────────
// Transport trait
// ───────────────────────────────────────────────────────────────

/// Controller connection. Implementations must be callable from any thread.
pub trait PropertyTransport: Send + Sync {
    /// Encoding used for every value crossing this transport.
    fn encoding(&self) -> WireEncoding;

    fn get_all_prop_configs(&self) -> Result<Vec<PropertyConfig>, TransportError>;

    /// `Ok(None)` means the controller answered OK without a value.
    fn get(&self, request: WireValue) -> Result<Option<WireValue>, TransportError>;

    fn set(&self, value: WireValue) -> Result<(), TransportError>;

    fn subscribe(&self, options: &[SubscribeOptions]) -> Result<(), TransportError>;

    fn unsubscribe(&self, property_id: i32) -> Result<(), TransportError>;

    /// Replace the notification sink. Only one is active at a time.
    fn register_callback(&self, callback: Arc<dyn TransportCallback>);
}
