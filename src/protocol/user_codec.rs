//! Packing of user-management messages into property values.
//!
//! ```text
//! INITIAL_USER_INFO  req  [id, type, cur.id, cur.flags, n, (id, flags)×n]
//!                    resp [id, action, user.id, user.flags]  str "locales||name"
//! SWITCH_USER        req  [id, msgType, target.id, target.flags, users…]
//!                    resp [id, VEHICLE_RESPONSE, status]     str error
//!                    push [id≤0, VEHICLE_REQUEST, target.id]
//! CREATE_USER        req  [id, new.id, new.flags, users…]    str name
//!                    resp [id, status]                       str error
//! REMOVE_USER        req  [id, removed.id, removed.flags, users…]
//! USER_IDENT_ASSOC   get  [id, user.id, user.flags, n, type×n]
//!                    set  [id, user.id, user.flags, n, (type, setValue)×n]
//!                    resp [id, n, (type, value)×n]           str error
//! ```
//!
//! Decoders never return a partially filled message: any missing slot or
//! unknown enumeration value is an error.

use heapless::Vec as BoundedVec;

use super::user_types::{
    CREATE_USER, CreateUserRequest, CreateUserResponse, CreateUserStatus, INITIAL_USER_INFO,
    InitialUserInfoRequestType, InitialUserInfoResponse, InitialUserInfoResponseAction,
    MAX_ASSOCIATIONS, REMOVE_USER, RemoveUserRequest, SWITCH_USER, SwitchUserMessageType,
    SwitchUserRequest, SwitchUserResponse, SwitchUserStatus, SwitchUserVehicleRequest,
    USER_IDENTIFICATION_ASSOCIATION, UserIdentificationAssociation,
    UserIdentificationAssociationType, UserIdentificationAssociationValue,
    UserIdentificationGetRequest, UserIdentificationResponse, UserIdentificationSetRequest,
    UserInfo, UsersInfo,
};
use crate::error::{Error, Result};
use crate::property::PropertyValue;

/// Separator between locales and user name in the initial-info response.
const STRING_SEPARATOR: &str = "||";

// ── Shared fields ─────────────────────────────────────────────

pub fn request_id(value: &PropertyValue) -> Result<i32> {
    value
        .int32(0)
        .map_err(|_| Error::malformed("missing request id"))
}

pub fn switch_message_type(value: &PropertyValue) -> Result<SwitchUserMessageType> {
    let raw = value
        .int32(1)
        .map_err(|_| Error::malformed("missing message type"))?;
    SwitchUserMessageType::from_raw(raw)
        .ok_or_else(|| Error::malformed(format!("unknown switch message type {raw}")))
}

fn push_users(ints: &mut Vec<i32>, users: &UsersInfo) {
    ints.push(users.current_user.user_id);
    ints.push(users.current_user.flags);
    ints.push(users.existing_users.len() as i32);
    for u in &users.existing_users {
        ints.push(u.user_id);
        ints.push(u.flags);
    }
}

fn slot(value: &PropertyValue, index: usize, what: &str) -> Result<i32> {
    value
        .int32(index)
        .map_err(|_| Error::malformed(format!("missing {what} at slot {index}")))
}

// ── Requests (head unit → vehicle) ────────────────────────────

pub fn initial_user_info_request(
    request_id: i32,
    request_type: InitialUserInfoRequestType,
    users: &UsersInfo,
) -> PropertyValue {
    let mut ints = vec![request_id, request_type.raw()];
    push_users(&mut ints, users);
    PropertyValue::builder(INITIAL_USER_INFO).int32s(ints).build()
}

pub fn switch_user_request(
    request_id: i32,
    message_type: SwitchUserMessageType,
    request: &SwitchUserRequest,
) -> PropertyValue {
    let mut ints = vec![
        request_id,
        message_type.raw(),
        request.target_user.user_id,
        request.target_user.flags,
    ];
    push_users(&mut ints, &request.users_info);
    PropertyValue::builder(SWITCH_USER).int32s(ints).build()
}

pub fn create_user_request(request_id: i32, request: &CreateUserRequest) -> PropertyValue {
    let mut ints = vec![
        request_id,
        request.new_user_info.user_id,
        request.new_user_info.flags,
    ];
    push_users(&mut ints, &request.users_info);
    PropertyValue::builder(CREATE_USER)
        .int32s(ints)
        .string(request.new_user_name.clone())
        .build()
}

pub fn remove_user_request(request_id: i32, request: &RemoveUserRequest) -> PropertyValue {
    let mut ints = vec![
        request_id,
        request.removed_user_info.user_id,
        request.removed_user_info.flags,
    ];
    push_users(&mut ints, &request.users_info);
    PropertyValue::builder(REMOVE_USER).int32s(ints).build()
}

pub fn user_identification_get_request(
    request_id: i32,
    request: &UserIdentificationGetRequest,
) -> PropertyValue {
    let mut ints = vec![
        request_id,
        request.user_info.user_id,
        request.user_info.flags,
        request.association_types.len() as i32,
    ];
    ints.extend(request.association_types.iter().map(|t| t.raw()));
    PropertyValue::builder(USER_IDENTIFICATION_ASSOCIATION)
        .int32s(ints)
        .build()
}

pub fn user_identification_set_request(
    request_id: i32,
    request: &UserIdentificationSetRequest,
) -> PropertyValue {
    let mut ints = vec![
        request_id,
        request.user_info.user_id,
        request.user_info.flags,
        request.associations.len() as i32,
    ];
    for a in &request.associations {
        ints.push(a.association_type.raw());
        ints.push(a.value.raw());
    }
    PropertyValue::builder(USER_IDENTIFICATION_ASSOCIATION)
        .int32s(ints)
        .build()
}

// ── Responses (vehicle → head unit) ───────────────────────────

pub fn decode_initial_user_info_response(value: &PropertyValue) -> Result<InitialUserInfoResponse> {
    let request_id = request_id(value)?;
    let raw_action = slot(value, 1, "action")?;
    let action = InitialUserInfoResponseAction::from_raw(raw_action)
        .ok_or_else(|| Error::malformed(format!("unknown initial user action {raw_action}")))?;
    let user = match action {
        InitialUserInfoResponseAction::Default => UserInfo::default(),
        InitialUserInfoResponseAction::Switch => UserInfo::new(slot(value, 2, "user id")?, 0),
        InitialUserInfoResponseAction::Create => {
            UserInfo::new(slot(value, 2, "user id")?, slot(value, 3, "user flags")?)
        }
    };
    let (locales, name) = match value.string().split_once(STRING_SEPARATOR) {
        Some((locales, name)) => (locales, name),
        None => (value.string(), ""),
    };
    Ok(InitialUserInfoResponse {
        request_id,
        action,
        user_to_switch_or_create: user,
        user_locales: locales.to_owned(),
        user_name_to_create: name.to_owned(),
    })
}

pub fn encode_initial_user_info_response(response: &InitialUserInfoResponse) -> PropertyValue {
    let u = response.user_to_switch_or_create;
    let string = if response.user_name_to_create.is_empty() {
        response.user_locales.clone()
    } else {
        format!(
            "{}{}{}",
            response.user_locales, STRING_SEPARATOR, response.user_name_to_create
        )
    };
    PropertyValue::builder(INITIAL_USER_INFO)
        .int32s([
            response.request_id,
            response.action.raw(),
            u.user_id,
            u.flags,
        ])
        .string(string)
        .build()
}

pub fn decode_switch_user_response(value: &PropertyValue) -> Result<SwitchUserResponse> {
    let request_id = request_id(value)?;
    let message_type = switch_message_type(value)?;
    if message_type != SwitchUserMessageType::VehicleResponse {
        return Err(Error::malformed(format!(
            "switch response has message type {message_type:?}"
        )));
    }
    let raw_status = slot(value, 2, "status")?;
    let status = SwitchUserStatus::from_raw(raw_status)
        .ok_or_else(|| Error::malformed(format!("unknown switch status {raw_status}")))?;
    Ok(SwitchUserResponse {
        request_id,
        message_type,
        status,
        error_message: value.string().to_owned(),
    })
}

pub fn encode_switch_user_response(response: &SwitchUserResponse) -> PropertyValue {
    PropertyValue::builder(SWITCH_USER)
        .int32s([
            response.request_id,
            response.message_type.raw(),
            response.status.raw(),
        ])
        .string(response.error_message.clone())
        .build()
}

pub fn decode_switch_user_vehicle_request(value: &PropertyValue) -> Result<SwitchUserVehicleRequest> {
    let request_id = request_id(value)?;
    if request_id > 0 {
        return Err(Error::malformed(format!(
            "vehicle request with positive id {request_id}"
        )));
    }
    if switch_message_type(value)? != SwitchUserMessageType::VehicleRequest {
        return Err(Error::malformed("not a vehicle request"));
    }
    Ok(SwitchUserVehicleRequest {
        request_id,
        target_user_id: slot(value, 2, "target user")?,
    })
}

pub fn encode_switch_user_vehicle_request(request: &SwitchUserVehicleRequest) -> PropertyValue {
    PropertyValue::builder(SWITCH_USER)
        .int32s([
            request.request_id,
            SwitchUserMessageType::VehicleRequest.raw(),
            request.target_user_id,
        ])
        .build()
}

pub fn decode_create_user_response(value: &PropertyValue) -> Result<CreateUserResponse> {
    let request_id = request_id(value)?;
    let raw_status = slot(value, 1, "status")?;
    let status = CreateUserStatus::from_raw(raw_status)
        .ok_or_else(|| Error::malformed(format!("unknown create status {raw_status}")))?;
    Ok(CreateUserResponse {
        request_id,
        status,
        error_message: value.string().to_owned(),
    })
}

pub fn encode_create_user_response(response: &CreateUserResponse) -> PropertyValue {
    PropertyValue::builder(CREATE_USER)
        .int32s([response.request_id, response.status.raw()])
        .string(response.error_message.clone())
        .build()
}

pub fn decode_user_identification_response(
    value: &PropertyValue,
) -> Result<UserIdentificationResponse> {
    let request_id = request_id(value)?;
    let count = slot(value, 1, "association count")?;
    if count < 0 || count as usize > MAX_ASSOCIATIONS {
        return Err(Error::malformed(format!("association count {count}")));
    }
    let mut associations = BoundedVec::new();
    for i in 0..count as usize {
        let raw_type = slot(value, 2 + 2 * i, "association type")?;
        let raw_value = slot(value, 3 + 2 * i, "association value")?;
        let association_type = UserIdentificationAssociationType::from_raw(raw_type)
            .ok_or_else(|| Error::malformed(format!("unknown association type {raw_type}")))?;
        let value = UserIdentificationAssociationValue::from_raw(raw_value)
            .ok_or_else(|| Error::malformed(format!("unknown association value {raw_value}")))?;
        // Capacity was checked against `count` above.
        let _ = associations.push(UserIdentificationAssociation {
            association_type,
            value,
        });
    }
    Ok(UserIdentificationResponse {
        request_id,
        associations,
        error_message: value.string().to_owned(),
    })
}

pub fn encode_user_identification_response(response: &UserIdentificationResponse) -> PropertyValue {
    let mut ints = vec![response.request_id, response.associations.len() as i32];
    for a in &response.associations {
        ints.push(a.association_type.raw());
        ints.push(a.value.raw());
    }
    PropertyValue::builder(USER_IDENTIFICATION_ASSOCIATION)
        .int32s(ints)
        .string(response.error_message.clone())
        .build()
}

/// Response must answer exactly the association types that were asked, in
/// the same order.
pub fn check_association_shape(
    response: &UserIdentificationResponse,
    requested: impl ExactSizeIterator<Item = UserIdentificationAssociationType>,
) -> Result<()> {
    if response.associations.len() != requested.len() {
        return Err(Error::malformed(format!(
            "expected {} associations, got {}",
            requested.len(),
            response.associations.len()
        )));
    }
    for (i, (got, want)) in response.types().zip(requested).enumerate() {
        if got != want {
            return Err(Error::malformed(format!(
                "association {i}: expected {want:?}, got {got:?}"
            )));
        }
    }
    Ok(())
}
