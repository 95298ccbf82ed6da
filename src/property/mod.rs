//! Property data model.
//!
//! Every exchange on the bus is a [`PropertyValue`] addressed by a 32-bit
//! property id. The id packs three descriptors next to the 16-bit index:
//!
//! ```text
//!  31    28 27    24 23          16 15                   0
//! ┌────────┬────────┬──────────────┬──────────────────────┐
//! │ group  │  area  │  value type  │        index         │
//! └────────┴────────┴──────────────┴──────────────────────┘
//! ```
//!
//! | Module   | Contents                                         |
//! |----------|--------------------------------------------------|
//! | `value`  | immutable `PropertyValue`, builder, accessors    |
//! | `config` | `PropertyConfig`, `AreaConfig`, access modes     |
//! | `typed`  | `TypedValue` and Rust-type conversion            |
//! | `mixed`  | 9-slot layout for MIXED properties               |
//! | `wire`   | the two wire encodings and their decoders        |

pub mod config;
pub mod mixed;
pub mod typed;
pub mod value;
pub mod wire;

pub use config::{Access, AreaConfig, ChangeMode, PropertyConfig};
pub use mixed::{MixedLayout, MixedValue};
pub use typed::{FromPropertyValue, TypedValue};
pub use value::{PropertyStatus, PropertyValue, PropertyValueBuilder, RawValues};
pub use wire::{FlatRecord, StructuredRecord, WireEncoding, WireValue};

// ── Id layout ─────────────────────────────────────────────────

pub const GROUP_MASK: i32 = 0xf000_0000_u32 as i32;
pub const AREA_MASK: i32 = 0x0f00_0000;
pub const TYPE_MASK: i32 = 0x00ff_0000;

pub const GROUP_SYSTEM: i32 = 0x1000_0000;
pub const GROUP_VENDOR: i32 = 0x2000_0000;

/// Area type encoded in bits 24..28 of a property id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaType {
    Global,
    Window,
    Mirror,
    Seat,
    Door,
    Wheel,
}

impl AreaType {
    pub fn of(property_id: i32) -> Option<Self> {
        match property_id & AREA_MASK {
            0x0100_0000 => Some(Self::Global),
            0x0300_0000 => Some(Self::Window),
            0x0400_0000 => Some(Self::Mirror),
            0x0500_0000 => Some(Self::Seat),
            0x0600_0000 => Some(Self::Door),
            0x0700_0000 => Some(Self::Wheel),
            _ => None,
        }
    }
}

/// Value type encoded in bits 16..24 of a property id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    String,
    Boolean,
    Int32,
    Int32Vec,
    Int64,
    Int64Vec,
    Float,
    FloatVec,
    Bytes,
    Mixed,
}

impl PropertyType {
    pub const fn bits(self) -> i32 {
        match self {
            Self::String => 0x0010_0000,
            Self::Boolean => 0x0020_0000,
            Self::Int32 => 0x0040_0000,
            Self::Int32Vec => 0x0041_0000,
            Self::Int64 => 0x0050_0000,
            Self::Int64Vec => 0x0051_0000,
            Self::Float => 0x0060_0000,
            Self::FloatVec => 0x0061_0000,
            Self::Bytes => 0x0070_0000,
            Self::Mixed => 0x00e0_0000,
        }
    }

    /// Decode the value type of `property_id`; unknown bits yield `None`.
    pub fn of(property_id: i32) -> Option<Self> {
        match property_id & TYPE_MASK {
            0x0010_0000 => Some(Self::String),
            0x0020_0000 => Some(Self::Boolean),
            0x0040_0000 => Some(Self::Int32),
            0x0041_0000 => Some(Self::Int32Vec),
            0x0050_0000 => Some(Self::Int64),
            0x0051_0000 => Some(Self::Int64Vec),
            0x0060_0000 => Some(Self::Float),
            0x0061_0000 => Some(Self::FloatVec),
            0x0070_0000 => Some(Self::Bytes),
            0x00e0_0000 => Some(Self::Mixed),
            _ => None,
        }
    }
}

/// Whether the id belongs to the vendor-defined group.
pub const fn is_vendor(property_id: i32) -> bool {
    property_id & GROUP_MASK == GROUP_VENDOR
}

/// Short hex rendering used in log lines.
pub(crate) fn hex(property_id: i32) -> String {
    format!("0x{:08x}", property_id)
}
