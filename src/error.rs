//! Unified error types for the property bus.
//!
//! A single `Error` enum that every layer converts into. Data-model failures
//! are grouped in [`ValueError`] so the property module stays independent of
//! transport and bus concerns. Outcomes of correlated exchanges are *not*
//! errors; they travel as [`crate::protocol::ExchangeStatus`].

use core::fmt;

use crate::transport::StatusCode;

// ---------------------------------------------------------------------------
// Top-level bus error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A value could not be read, converted or laid out.
    Value(ValueError),
    /// Caller-supplied input was rejected locally. Never retried.
    InvalidArgument(String),
    /// The transport reported a terminal, non-OK status.
    Remote { status: StatusCode, message: String },
    /// The property is not present in the registry.
    NotSupported(i32),
    /// Two services claimed the same property during init.
    DuplicateOwner {
        property_id: i32,
        first: &'static str,
        second: &'static str,
    },
    /// The bus has not fetched its configs yet.
    NotInitialized,
    /// An inbound message could not be decoded.
    Malformed(String),
    /// The dispatch thread is gone or could not be started.
    Dispatch(&'static str),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// Transport status carried by a remote failure, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            Self::InvalidArgument(_) => Some(StatusCode::InvalidArg),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(e) => write!(f, "value: {e}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Remote { status, message } => write!(f, "remote {status}: {message}"),
            Self::NotSupported(prop) => write!(f, "property 0x{prop:08x} not supported"),
            Self::DuplicateOwner {
                property_id,
                first,
                second,
            } => write!(
                f,
                "property 0x{property_id:08x} claimed by both {first} and {second}"
            ),
            Self::NotInitialized => write!(f, "bus not initialized"),
            Self::Malformed(msg) => write!(f, "malformed message: {msg}"),
            Self::Dispatch(msg) => write!(f, "dispatch: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Value errors
// ---------------------------------------------------------------------------

/// Payload sequence a typed accessor reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Int32,
    Int64,
    Float,
    Bytes,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32 => write!(f, "int32"),
            Self::Int64 => write!(f, "int64"),
            Self::Float => write!(f, "float"),
            Self::Bytes => write!(f, "bytes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// Typed accessor asked for a slot past the end of its sequence.
    IndexOutOfRange { slot: Slot, index: usize, len: usize },
    /// No typed representation exists for the property's value type.
    UnsupportedType(i32),
    /// The requested Rust type does not match the property's value type.
    TypeMismatch { property_id: i32, expected: &'static str },
    /// A flat wire record carried a status integer outside the known set.
    InvalidStatus(i32),
    /// Mixed or diagnostic layout disagrees with the value.
    MixedLayout(&'static str),
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IndexOutOfRange { slot, index, len } => {
                write!(f, "{slot} index {index} out of range (len {len})")
            }
            Self::UnsupportedType(prop) => {
                write!(f, "property 0x{prop:08x} has no typed representation")
            }
            Self::TypeMismatch {
                property_id,
                expected,
            } => write!(f, "property 0x{property_id:08x} is not {expected}"),
            Self::InvalidStatus(raw) => write!(f, "unknown property status {raw}"),
            Self::MixedLayout(msg) => write!(f, "layout mismatch: {msg}"),
        }
    }
}

impl std::error::Error for ValueError {}

impl From<ValueError> for Error {
    fn from(e: ValueError) -> Self {
        Self::Value(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
