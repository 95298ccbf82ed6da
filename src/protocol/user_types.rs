//! User-management protocol vocabulary.
//!
//! Five MIXED global system properties carry the protocol; messages live in
//! `int32_values` with an optional `string_value`.

use heapless::Vec as BoundedVec;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Properties ────────────────────────────────────────────────

pub const INITIAL_USER_INFO: i32 = 0x11e0_0f07;
pub const SWITCH_USER: i32 = 0x11e0_0f08;
pub const CREATE_USER: i32 = 0x11e0_0f09;
pub const REMOVE_USER: i32 = 0x11e0_0f0a;
pub const USER_IDENTIFICATION_ASSOCIATION: i32 = 0x11e0_0f0b;

pub const USER_PROPERTIES: [i32; 5] = [
    INITIAL_USER_INFO,
    SWITCH_USER,
    CREATE_USER,
    REMOVE_USER,
    USER_IDENTIFICATION_ASSOCIATION,
];

/// Association types a single identification request may carry.
pub const MAX_ASSOCIATIONS: usize = 5;

/// Which pending-table slot a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    InitialUserInfo,
    SwitchUser,
    CreateUser,
    UserIdentification,
}

impl ResponseKind {
    pub const fn property_id(self) -> i32 {
        match self {
            Self::InitialUserInfo => INITIAL_USER_INFO,
            Self::SwitchUser => SWITCH_USER,
            Self::CreateUser => CREATE_USER,
            Self::UserIdentification => USER_IDENTIFICATION_ASSOCIATION,
        }
    }
}

// ── Raw enumerations ──────────────────────────────────────────

macro_rules! raw_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(i32)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub fn from_raw(raw: i32) -> Option<Self> {
                match raw {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub const fn raw(self) -> i32 {
                self as i32
            }
        }
    };
}

raw_enum!(
    /// Why the initial user is being requested.
    InitialUserInfoRequestType {
        FirstBoot = 1,
        FirstBootAfterOta = 2,
        ColdBoot = 3,
        Resume = 4,
    }
);

raw_enum!(InitialUserInfoResponseAction {
    Default = 0,
    Switch = 1,
    Create = 2,
});

raw_enum!(SwitchUserMessageType {
    LegacyAndroidSwitch = 1,
    AndroidSwitch = 2,
    VehicleResponse = 3,
    VehicleRequest = 4,
    AndroidPostSwitch = 5,
});

raw_enum!(SwitchUserStatus {
    Success = 1,
    Failure = 2,
});

raw_enum!(CreateUserStatus {
    Success = 1,
    Failure = 2,
});

raw_enum!(UserIdentificationAssociationType {
    KeyFob = 1,
    Custom1 = 101,
    Custom2 = 102,
    Custom3 = 103,
    Custom4 = 104,
});

raw_enum!(UserIdentificationAssociationValue {
    Unknown = 1,
    NotAssociatedAnyUser = 2,
    AssociatedCurrentUser = 3,
    AssociatedAnotherUser = 4,
});

raw_enum!(UserIdentificationAssociationSetValue {
    Invalid = 0,
    AssociateCurrentUser = 1,
    DisassociateCurrentUser = 2,
    DisassociateAllUsers = 3,
});

/// Bits of [`UserInfo::flags`].
pub mod user_flags {
    pub const NONE: i32 = 0;
    pub const SYSTEM: i32 = 1;
    pub const GUEST: i32 = 2;
    pub const EPHEMERAL: i32 = 4;
    pub const ADMIN: i32 = 8;
    pub const DISABLED: i32 = 16;
    pub const PROFILE: i32 = 32;
}

// ── Messages ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: i32,
    pub flags: i32,
}

impl UserInfo {
    pub const fn new(user_id: i32, flags: i32) -> Self {
        Self { user_id, flags }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsersInfo {
    pub current_user: UserInfo,
    pub existing_users: Vec<UserInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialUserInfoResponse {
    pub request_id: i32,
    pub action: InitialUserInfoResponseAction,
    pub user_to_switch_or_create: UserInfo,
    pub user_locales: String,
    pub user_name_to_create: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchUserRequest {
    pub target_user: UserInfo,
    pub users_info: UsersInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchUserResponse {
    pub request_id: i32,
    pub message_type: SwitchUserMessageType,
    pub status: SwitchUserStatus,
    pub error_message: String,
}

/// Switch initiated by the vehicle; pushed on SWITCH_USER with an id ≤ 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchUserVehicleRequest {
    pub request_id: i32,
    pub target_user_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserRequest {
    pub new_user_info: UserInfo,
    pub new_user_name: String,
    pub users_info: UsersInfo,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserResponse {
    pub request_id: i32,
    pub status: CreateUserStatus,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveUserRequest {
    pub removed_user_info: UserInfo,
    pub users_info: UsersInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdentificationAssociation {
    pub association_type: UserIdentificationAssociationType,
    pub value: UserIdentificationAssociationValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserIdentificationSetAssociation {
    pub association_type: UserIdentificationAssociationType,
    pub value: UserIdentificationAssociationSetValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentificationGetRequest {
    pub user_info: UserInfo,
    pub association_types: BoundedVec<UserIdentificationAssociationType, MAX_ASSOCIATIONS>,
}

impl UserIdentificationGetRequest {
    pub fn new(user_info: UserInfo, types: &[UserIdentificationAssociationType]) -> Result<Self> {
        let association_types = BoundedVec::from_slice(types)
            .map_err(|()| Error::invalid("too many association types"))?;
        let request = Self {
            user_info,
            association_types,
        };
        request.validate()?;
        Ok(request)
    }

    /// Non-empty, no duplicates, no INVALID type.
    pub fn validate(&self) -> Result<()> {
        check_types(self.association_types.iter().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentificationSetRequest {
    pub user_info: UserInfo,
    pub associations: BoundedVec<UserIdentificationSetAssociation, MAX_ASSOCIATIONS>,
}

impl UserIdentificationSetRequest {
    pub fn new(user_info: UserInfo, associations: &[UserIdentificationSetAssociation]) -> Result<Self> {
        let associations = BoundedVec::from_slice(associations)
            .map_err(|()| Error::invalid("too many associations"))?;
        let request = Self {
            user_info,
            associations,
        };
        request.validate()?;
        Ok(request)
    }

    /// Same rules as the query, and no INVALID set value.
    pub fn validate(&self) -> Result<()> {
        check_types(self.associations.iter().map(|a| a.association_type))?;
        if self
            .associations
            .iter()
            .any(|a| a.value == UserIdentificationAssociationSetValue::Invalid)
        {
            return Err(Error::invalid("association set value is INVALID"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentificationResponse {
    pub request_id: i32,
    pub associations: BoundedVec<UserIdentificationAssociation, MAX_ASSOCIATIONS>,
    pub error_message: String,
}

impl UserIdentificationResponse {
    pub fn types(&self) -> impl Iterator<Item = UserIdentificationAssociationType> + '_ {
        self.associations.iter().map(|a| a.association_type)
    }
}

/// Non-empty, at most [`MAX_ASSOCIATIONS`], no repeats.
fn check_types(types: impl Iterator<Item = UserIdentificationAssociationType>) -> Result<()> {
    let mut seen: BoundedVec<UserIdentificationAssociationType, MAX_ASSOCIATIONS> =
        BoundedVec::new();
    for t in types {
        if seen.contains(&t) {
            return Err(Error::invalid(format!("duplicate association type {t:?}")));
        }
        seen.push(t)
            .map_err(|_| Error::invalid("too many association types"))?;
    }
    if seen.is_empty() {
        return Err(Error::invalid("no association types"));
    }
    Ok(())
}

/// Decoded response delivered through the correlator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserHalResponse {
    InitialUserInfo(InitialUserInfoResponse),
    SwitchUser(SwitchUserResponse),
    CreateUser(CreateUserResponse),
    UserIdentification(UserIdentificationResponse),
}

impl UserHalResponse {
    pub fn into_initial_user_info(self) -> Option<InitialUserInfoResponse> {
        match self {
            Self::InitialUserInfo(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_switch_user(self) -> Option<SwitchUserResponse> {
        match self {
            Self::SwitchUser(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_create_user(self) -> Option<CreateUserResponse> {
        match self {
            Self::CreateUser(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_user_identification(self) -> Option<UserIdentificationResponse> {
        match self {
            Self::UserIdentification(r) => Some(r),
            _ => None,
        }
    }
}
