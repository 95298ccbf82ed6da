//! User-management service.
//!
//! Owns the five user properties and runs the negotiation protocol on top
//! of them. Outgoing requests go through the bus as `set`s and are answered
//! asynchronously on the same property, correlated by request id. The
//! vehicle may also start a switch on its own by pushing a SWITCH_USER value
//! with a non-positive id.
//!
//! ```text
//!   caller ──switch_user──▶ Correlator.begin ──▶ bus.set(SWITCH_USER [id, ANDROID_SWITCH, …])
//!                                                        │
//!   callback ◀── finish ◀── take(id) ◀── on_hal_events ◀─┘ [id, VEHICLE_RESPONSE, status]
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::correlator::{Correlator, ExchangeCallback, ExchangeStatus};
use super::user_codec as codec;
use super::user_types::{
    CREATE_USER, CreateUserRequest, CreateUserResponse, INITIAL_USER_INFO,
    InitialUserInfoRequestType, InitialUserInfoResponse, REMOVE_USER, RemoveUserRequest,
    ResponseKind, SWITCH_USER, SwitchUserMessageType, SwitchUserRequest, SwitchUserResponse,
    SwitchUserVehicleRequest, USER_IDENTIFICATION_ASSOCIATION, USER_PROPERTIES, UserHalResponse,
    UserIdentificationGetRequest, UserIdentificationResponse, UserIdentificationSetRequest,
    UsersInfo,
};
use crate::bus::{HalService, PropertyBus};
use crate::error::{Error, Result};
use crate::property::{self, PropertyConfig, PropertyValue};
use crate::transport::SetError;

/// Receives vehicle-initiated switch requests on the dispatch thread.
pub type VehicleRequestHandler = Arc<dyn Fn(SwitchUserVehicleRequest) + Send + Sync>;

type UserCorrelator = Correlator<UserIdentificationSetRequest, UserHalResponse, ResponseKind>;

pub struct UserHalService {
    bus: Arc<PropertyBus>,
    correlator: Arc<UserCorrelator>,
    configs: Mutex<HashMap<i32, PropertyConfig>>,
    vehicle_handler: Mutex<Option<VehicleRequestHandler>>,
}

fn check_timeout(timeout_ms: i32) -> Result<Duration> {
    if timeout_ms <= 0 {
        return Err(Error::invalid(format!(
            "timeout must be positive, got {timeout_ms}"
        )));
    }
    Ok(Duration::from_millis(timeout_ms as u64))
}

impl UserHalService {
    pub const NAME: &'static str = "UserHalService";

    pub fn new(bus: Arc<PropertyBus>) -> Arc<Self> {
        let correlator = Correlator::new(Self::NAME, bus.dispatch().clone());
        Arc::new(Self {
            bus,
            correlator,
            configs: Mutex::new(HashMap::new()),
            vehicle_handler: Mutex::new(None),
        })
    }

    /// Core user properties are all present.
    pub fn is_supported(&self) -> bool {
        let configs = self.configs.lock();
        [INITIAL_USER_INFO, SWITCH_USER, CREATE_USER, REMOVE_USER]
            .iter()
            .all(|id| configs.contains_key(id))
    }

    pub fn is_user_association_supported(&self) -> bool {
        self.configs
            .lock()
            .contains_key(&USER_IDENTIFICATION_ASSOCIATION)
    }

    pub fn set_vehicle_request_handler(&self, handler: VehicleRequestHandler) {
        *self.vehicle_handler.lock() = Some(handler);
    }

    fn check_supported(&self, property_id: i32) -> Result<()> {
        if self.configs.lock().contains_key(&property_id) {
            Ok(())
        } else {
            Err(Error::NotSupported(property_id))
        }
    }

    // ── Exchanges ─────────────────────────────────────────────

    /// Ask the vehicle which user to boot into.
    pub fn get_initial_user_info(
        &self,
        request_type: InitialUserInfoRequestType,
        timeout_ms: i32,
        users: &UsersInfo,
        callback: impl FnOnce(ExchangeStatus, Option<InitialUserInfoResponse>) + Send + 'static,
    ) -> Result<()> {
        let timeout = check_timeout(timeout_ms)?;
        self.check_supported(INITIAL_USER_INFO)?;
        self.send_request(
            ResponseKind::InitialUserInfo,
            None,
            timeout,
            Box::new(move |status, response| {
                callback(status, response.and_then(UserHalResponse::into_initial_user_info));
            }),
            |id| codec::initial_user_info_request(id, request_type, users),
        );
        Ok(())
    }

    pub fn switch_user(
        &self,
        request: &SwitchUserRequest,
        timeout_ms: i32,
        callback: impl FnOnce(ExchangeStatus, Option<SwitchUserResponse>) + Send + 'static,
    ) -> Result<()> {
        let timeout = check_timeout(timeout_ms)?;
        self.check_supported(SWITCH_USER)?;
        self.send_request(
            ResponseKind::SwitchUser,
            None,
            timeout,
            Box::new(move |status, response| {
                callback(status, response.and_then(UserHalResponse::into_switch_user));
            }),
            |id| codec::switch_user_request(id, SwitchUserMessageType::AndroidSwitch, request),
        );
        Ok(())
    }

    pub fn create_user(
        &self,
        request: &CreateUserRequest,
        timeout_ms: i32,
        callback: impl FnOnce(ExchangeStatus, Option<CreateUserResponse>) + Send + 'static,
    ) -> Result<()> {
        let timeout = check_timeout(timeout_ms)?;
        self.check_supported(CREATE_USER)?;
        self.send_request(
            ResponseKind::CreateUser,
            None,
            timeout,
            Box::new(move |status, response| {
                callback(status, response.and_then(UserHalResponse::into_create_user));
            }),
            |id| codec::create_user_request(id, request),
        );
        Ok(())
    }

    /// Change associations; the response must echo the requested types.
    pub fn set_user_association(
        &self,
        timeout_ms: i32,
        request: &UserIdentificationSetRequest,
        callback: impl FnOnce(ExchangeStatus, Option<UserIdentificationResponse>) + Send + 'static,
    ) -> Result<()> {
        request.validate()?;
        let timeout = check_timeout(timeout_ms)?;
        self.check_supported(USER_IDENTIFICATION_ASSOCIATION)?;
        self.send_request(
            ResponseKind::UserIdentification,
            Some(request.clone()),
            timeout,
            Box::new(move |status, response| {
                callback(
                    status,
                    response.and_then(UserHalResponse::into_user_identification),
                );
            }),
            |id| codec::user_identification_set_request(id, request),
        );
        Ok(())
    }

    fn send_request(
        &self,
        kind: ResponseKind,
        original: Option<UserIdentificationSetRequest>,
        timeout: Duration,
        callback: ExchangeCallback<UserHalResponse>,
        encode: impl FnOnce(i32) -> PropertyValue,
    ) {
        let Some(request_id) = self.correlator.begin(kind, original, timeout, callback) else {
            return;
        };
        let value = encode(request_id);
        if let Err(e) = self.bus.set(&value) {
            warn!(
                "{}: sending {:?} request {} failed: {}",
                Self::NAME,
                kind,
                request_id,
                e
            );
            self.correlator.fail_send(request_id);
        }
    }

    // ── Fire-and-forget ───────────────────────────────────────

    /// Tell the vehicle how a switch it answered actually ended.
    pub fn post_switch_response(&self, request_id: i32, request: &SwitchUserRequest) -> Result<()> {
        self.check_supported(SWITCH_USER)?;
        let value =
            codec::switch_user_request(request_id, SwitchUserMessageType::AndroidPostSwitch, request);
        self.bus.set(&value)
    }

    /// Announce a switch that bypassed the negotiation.
    pub fn legacy_user_switch(&self, request: &SwitchUserRequest) -> Result<()> {
        self.check_supported(SWITCH_USER)?;
        let request_id = self.correlator.next_request_id();
        let value = codec::switch_user_request(
            request_id,
            SwitchUserMessageType::LegacyAndroidSwitch,
            request,
        );
        self.bus.set(&value)
    }

    pub fn remove_user(&self, request: &RemoveUserRequest) -> Result<()> {
        self.check_supported(REMOVE_USER)?;
        let request_id = self.correlator.next_request_id();
        self.bus.set(&codec::remove_user_request(request_id, request))
    }

    // ── Synchronous query ─────────────────────────────────────

    pub fn get_user_association(
        &self,
        request: &UserIdentificationGetRequest,
    ) -> Result<UserIdentificationResponse> {
        request.validate()?;
        self.check_supported(USER_IDENTIFICATION_ASSOCIATION)?;
        let request_id = self.correlator.next_request_id();
        let value = self
            .bus
            .get_with(&codec::user_identification_get_request(request_id, request))?;
        let response = codec::decode_user_identification_response(&value)?;
        if response.request_id != request_id {
            return Err(Error::malformed(format!(
                "association response id {} for request {}",
                response.request_id, request_id
            )));
        }
        codec::check_association_shape(&response, request.association_types.iter().copied())?;
        Ok(response)
    }

    // ── Inbound ───────────────────────────────────────────────

    fn handle_response(&self, kind: ResponseKind, value: &PropertyValue) {
        let request_id = match codec::request_id(value) {
            Ok(id) => id,
            Err(e) => {
                warn!("{}: {:?} response unreadable: {}", Self::NAME, kind, e);
                return;
            }
        };
        let Some(pending) = self.correlator.take(request_id) else {
            warn!(
                "{}: no pending request {} for {:?} response, dropping",
                Self::NAME,
                request_id,
                kind
            );
            return;
        };
        if pending.kind() != kind {
            warn!(
                "{}: request {} was {:?} but response came as {:?}",
                Self::NAME,
                request_id,
                pending.kind(),
                kind
            );
            pending.finish(ExchangeStatus::WrongResponseShape, None);
            return;
        }
        match decode_response(kind, value, pending.original()) {
            Ok(response) => {
                debug!("{}: {:?} request {} answered", Self::NAME, kind, request_id);
                pending.finish(ExchangeStatus::Ok, Some(response));
            }
            Err(e) => {
                warn!("{}: bad {:?} response {}: {}", Self::NAME, kind, request_id, e);
                pending.finish(ExchangeStatus::WrongResponseShape, None);
            }
        }
    }

    fn handle_switch_user(&self, value: &PropertyValue) {
        let message_type = match codec::switch_message_type(value) {
            Ok(t) => t,
            Err(e) => {
                warn!("{}: SWITCH_USER event unreadable: {}", Self::NAME, e);
                return;
            }
        };
        match message_type {
            SwitchUserMessageType::VehicleResponse => {
                self.handle_response(ResponseKind::SwitchUser, value);
            }
            SwitchUserMessageType::VehicleRequest => self.handle_vehicle_request(value),
            other => debug!("{}: ignoring echoed {:?}", Self::NAME, other),
        }
    }

    fn handle_vehicle_request(&self, value: &PropertyValue) {
        let request = match codec::decode_switch_user_vehicle_request(value) {
            Ok(r) => r,
            Err(e) => {
                warn!("{}: dropping vehicle request: {}", Self::NAME, e);
                return;
            }
        };
        let handler = self.vehicle_handler.lock().clone();
        match handler {
            Some(h) => {
                info!(
                    "{}: vehicle requested switch to user {} (id {})",
                    Self::NAME,
                    request.target_user_id,
                    request.request_id
                );
                h(request);
            }
            None => warn!("{}: vehicle request with no handler", Self::NAME),
        }
    }
}

fn decode_response(
    kind: ResponseKind,
    value: &PropertyValue,
    original: Option<&UserIdentificationSetRequest>,
) -> Result<UserHalResponse> {
    Ok(match kind {
        ResponseKind::InitialUserInfo => {
            UserHalResponse::InitialUserInfo(codec::decode_initial_user_info_response(value)?)
        }
        ResponseKind::SwitchUser => {
            UserHalResponse::SwitchUser(codec::decode_switch_user_response(value)?)
        }
        ResponseKind::CreateUser => {
            UserHalResponse::CreateUser(codec::decode_create_user_response(value)?)
        }
        ResponseKind::UserIdentification => {
            let response = codec::decode_user_identification_response(value)?;
            let Some(request) = original else {
                return Err(Error::malformed("association request missing"));
            };
            codec::check_association_shape(
                &response,
                request.associations.iter().map(|a| a.association_type),
            )?;
            UserHalResponse::UserIdentification(response)
        }
    })
}

impl HalService for UserHalService {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn supported_properties(&self) -> Vec<i32> {
        USER_PROPERTIES.to_vec()
    }

    fn take_configs(&self, configs: Vec<PropertyConfig>) {
        let mut map = self.configs.lock();
        map.clear();
        map.extend(configs.into_iter().map(|c| (c.property_id, c)));
    }

    fn init(&self) -> Result<()> {
        let subscribable: Vec<i32> = {
            let configs = self.configs.lock();
            let mut ids: Vec<i32> = configs
                .values()
                .filter(|c| c.is_subscribable())
                .map(|c| c.property_id)
                .collect();
            ids.sort_unstable();
            ids
        };
        for id in subscribable {
            self.bus.subscribe(self, id, 0.0)?;
        }
        info!(
            "{}: ready (supported={}, associations={})",
            Self::NAME,
            self.is_supported(),
            self.is_user_association_supported()
        );
        Ok(())
    }

    fn release(&self) {
        self.correlator.release();
        *self.vehicle_handler.lock() = None;
    }

    fn on_hal_events(&self, values: &[PropertyValue]) {
        for value in values {
            match value.property_id() {
                INITIAL_USER_INFO => self.handle_response(ResponseKind::InitialUserInfo, value),
                SWITCH_USER => self.handle_switch_user(value),
                CREATE_USER => self.handle_response(ResponseKind::CreateUser, value),
                USER_IDENTIFICATION_ASSOCIATION => {
                    self.handle_response(ResponseKind::UserIdentification, value);
                }
                other => warn!(
                    "{}: unexpected event on {}",
                    Self::NAME,
                    property::hex(other)
                ),
            }
        }
    }

    fn on_property_set_error(&self, errors: &[SetError]) {
        for e in errors {
            warn!(
                "{}: controller rejected set of {}: {}",
                Self::NAME,
                property::hex(e.property_id),
                e.status
            );
        }
    }
}
