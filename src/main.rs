//! propbus simulator: wires the bus against an in-memory vehicle.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  UserHalService   LogEventService        (HalService ring)  │
//! │  ───────────────── PropertyBus ───────────────────────────  │
//! │  TransportAdapter (retry, relay) ──▶ Dispatcher thread      │
//! │  ───────────────── PropertyTransport ─────────────────────  │
//! │  SimTransport + SimulatedVehicle     (controller side)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `propbus-sim [config.json]`; `RUST_LOG` sets the log filter.
#![deny(unused_must_use)]

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};

use propbus::adapters::log_sink::LogEventService;
use propbus::adapters::sim::{SimBehavior, SimTransport};
use propbus::bus::{HalService, PropertyBus};
use propbus::config::BusConfig;
use propbus::dispatch::Dispatcher;
use propbus::property::{Access, ChangeMode, PropertyConfig, PropertyValue, WireEncoding};
use propbus::protocol::user_codec as codec;
use propbus::protocol::user_types::{
    CREATE_USER, CreateUserRequest, CreateUserResponse, CreateUserStatus, INITIAL_USER_INFO,
    InitialUserInfoRequestType, InitialUserInfoResponse, InitialUserInfoResponseAction,
    REMOVE_USER, SWITCH_USER, SwitchUserMessageType, SwitchUserRequest, SwitchUserResponse,
    SwitchUserStatus, SwitchUserVehicleRequest, USER_IDENTIFICATION_ASSOCIATION,
    UserIdentificationAssociation, UserIdentificationAssociationSetValue,
    UserIdentificationAssociationType, UserIdentificationAssociationValue,
    UserIdentificationGetRequest, UserIdentificationResponse, UserIdentificationSetAssociation,
    UserIdentificationSetRequest, UserInfo, UsersInfo, user_flags,
};
use propbus::protocol::{ExchangeStatus, UserHalService};
use propbus::transport::TransportAdapter;

const PERF_VEHICLE_SPEED: i32 = 0x1160_0207;
const GEAR_SELECTION: i32 = 0x1140_0400;

// ── Simulated vehicle ─────────────────────────────────────────

/// Controller side of the user-management protocol: accepts everything.
struct SimulatedVehicle;

impl SimulatedVehicle {
    fn answer_initial_info(request: &PropertyValue) -> Option<PropertyValue> {
        let request_id = request.int32(0).ok()?;
        Some(codec::encode_initial_user_info_response(
            &InitialUserInfoResponse {
                request_id,
                action: InitialUserInfoResponseAction::Default,
                user_to_switch_or_create: UserInfo::default(),
                user_locales: "en-US".into(),
                user_name_to_create: String::new(),
            },
        ))
    }

    fn answer_switch(request: &PropertyValue) -> Option<PropertyValue> {
        let request_id = request.int32(0).ok()?;
        let message_type = codec::switch_message_type(request).ok()?;
        (message_type == SwitchUserMessageType::AndroidSwitch).then(|| {
            codec::encode_switch_user_response(&SwitchUserResponse {
                request_id,
                message_type: SwitchUserMessageType::VehicleResponse,
                status: SwitchUserStatus::Success,
                error_message: String::new(),
            })
        })
    }

    fn answer_create(request: &PropertyValue) -> Option<PropertyValue> {
        let request_id = request.int32(0).ok()?;
        Some(codec::encode_create_user_response(&CreateUserResponse {
            request_id,
            status: CreateUserStatus::Success,
            error_message: String::new(),
        }))
    }

    /// `stride` is 1 for a query (types only) and 2 for a set (type, value).
    fn answer_association(request: &PropertyValue, stride: usize) -> Option<PropertyValue> {
        let ints = request.int32_values();
        let request_id = *ints.first()?;
        let count = usize::try_from(*ints.get(3)?).ok()?;
        let mut associations = heapless::Vec::new();
        for i in 0..count {
            let slot = 4 + i * stride;
            let association_type = UserIdentificationAssociationType::from_raw(*ints.get(slot)?)?;
            let value = if stride == 1 {
                UserIdentificationAssociationValue::Unknown
            } else {
                match UserIdentificationAssociationSetValue::from_raw(*ints.get(slot + 1)?)? {
                    UserIdentificationAssociationSetValue::AssociateCurrentUser => {
                        UserIdentificationAssociationValue::AssociatedCurrentUser
                    }
                    _ => UserIdentificationAssociationValue::NotAssociatedAnyUser,
                }
            };
            associations
                .push(UserIdentificationAssociation {
                    association_type,
                    value,
                })
                .ok()?;
        }
        Some(codec::encode_user_identification_response(
            &UserIdentificationResponse {
                request_id,
                associations,
                error_message: String::new(),
            },
        ))
    }
}

impl SimBehavior for SimulatedVehicle {
    fn on_get(&self, request: &PropertyValue) -> Option<PropertyValue> {
        match request.property_id() {
            USER_IDENTIFICATION_ASSOCIATION => Self::answer_association(request, 1),
            _ => None,
        }
    }

    fn on_set(&self, value: &PropertyValue) -> Vec<PropertyValue> {
        let reply = match value.property_id() {
            INITIAL_USER_INFO => Self::answer_initial_info(value),
            SWITCH_USER => Self::answer_switch(value),
            CREATE_USER => Self::answer_create(value),
            USER_IDENTIFICATION_ASSOCIATION => Self::answer_association(value, 2),
            _ => None,
        };
        reply.into_iter().collect()
    }
}

fn vehicle_configs() -> Vec<PropertyConfig> {
    let mixed = [1, 0, 0, 0, 0, 0, 0, 0, 0];
    vec![
        PropertyConfig::new(INITIAL_USER_INFO, Access::ReadWrite, ChangeMode::OnChange)
            .with_config_array(mixed),
        PropertyConfig::new(SWITCH_USER, Access::ReadWrite, ChangeMode::OnChange),
        PropertyConfig::new(CREATE_USER, Access::ReadWrite, ChangeMode::OnChange),
        PropertyConfig::new(REMOVE_USER, Access::Write, ChangeMode::OnChange),
        PropertyConfig::new(
            USER_IDENTIFICATION_ASSOCIATION,
            Access::ReadWrite,
            ChangeMode::OnChange,
        ),
        PropertyConfig::new(PERF_VEHICLE_SPEED, Access::Read, ChangeMode::Continuous)
            .with_sample_rates(1.0, 10.0),
        PropertyConfig::new(GEAR_SELECTION, Access::Read, ChangeMode::OnChange),
    ]
}

// ── Scenario ──────────────────────────────────────────────────

fn load_config() -> Result<BusConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            BusConfig::from_json(&json).with_context(|| format!("parsing {path}"))
        }
        None => Ok(BusConfig::default()),
    }
}

fn wait<T>(rx: &mpsc::Receiver<(ExchangeStatus, Option<T>)>, what: &str) -> Result<T> {
    let (status, response) = rx
        .recv_timeout(Duration::from_secs(10))
        .with_context(|| format!("{what}: no callback"))?;
    match (status, response) {
        (ExchangeStatus::Ok, Some(r)) => Ok(r),
        (status, _) => Err(anyhow!("{what}: {status:?}")),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let config = load_config()?;
    info!("propbus-sim starting: {:?}", config);

    let dispatcher = Dispatcher::spawn(&config.dispatcher_thread_name)?;
    let transport = Arc::new(
        SimTransport::new(WireEncoding::Structured, vehicle_configs())
            .with_behavior(Arc::new(SimulatedVehicle)),
    );
    let adapter = TransportAdapter::new(transport.clone(), config.retry_policy(), dispatcher.handle());
    let bus = PropertyBus::new(adapter);

    let user_hal = UserHalService::new(bus.clone());
    let logger = LogEventService::new(&bus, [PERF_VEHICLE_SPEED, GEAR_SELECTION]);
    bus.register_service(user_hal.clone())?;
    bus.register_service(logger.clone())?;

    let (push_tx, push_rx) = mpsc::channel::<SwitchUserVehicleRequest>();
    user_hal.set_vehicle_request_handler(Arc::new(move |request| {
        let _ = push_tx.send(request);
    }));

    bus.init()?;

    let users = UsersInfo {
        current_user: UserInfo::new(10, user_flags::ADMIN),
        existing_users: vec![
            UserInfo::new(0, user_flags::SYSTEM),
            UserInfo::new(10, user_flags::ADMIN),
        ],
    };
    let timeout = config.default_exchange_timeout_ms;

    // Boot negotiation
    let (tx, rx) = mpsc::channel();
    user_hal.get_initial_user_info(
        InitialUserInfoRequestType::ColdBoot,
        timeout,
        &users,
        move |s, r| {
            let _ = tx.send((s, r));
        },
    )?;
    let initial = wait(&rx, "initial user info")?;
    info!("initial user: {:?} locales={}", initial.action, initial.user_locales);

    // Switch
    let switch = SwitchUserRequest {
        target_user: UserInfo::new(11, user_flags::NONE),
        users_info: users.clone(),
    };
    let (tx, rx) = mpsc::channel();
    user_hal.switch_user(&switch, timeout, move |s, r| {
        let _ = tx.send((s, r));
    })?;
    let switched = wait(&rx, "switch user")?;
    info!("switch {}: {:?}", switched.request_id, switched.status);
    user_hal.post_switch_response(switched.request_id, &switch)?;

    // Create
    let (tx, rx) = mpsc::channel();
    let create = CreateUserRequest {
        new_user_info: UserInfo::new(12, user_flags::GUEST),
        new_user_name: "Guest".into(),
        users_info: users.clone(),
    };
    user_hal.create_user(&create, timeout, move |s, r| {
        let _ = tx.send((s, r));
    })?;
    info!("create: {:?}", wait(&rx, "create user")?.status);

    // Associations
    let user = users.current_user;
    let query = UserIdentificationGetRequest::new(
        user,
        &[
            UserIdentificationAssociationType::KeyFob,
            UserIdentificationAssociationType::Custom1,
        ],
    )?;
    let current = user_hal.get_user_association(&query)?;
    info!("associations: {:?}", current.associations);

    let (tx, rx) = mpsc::channel();
    let set = UserIdentificationSetRequest::new(
        user,
        &[UserIdentificationSetAssociation {
            association_type: UserIdentificationAssociationType::KeyFob,
            value: UserIdentificationAssociationSetValue::AssociateCurrentUser,
        }],
    )?;
    user_hal.set_user_association(timeout, &set, move |s, r| {
        let _ = tx.send((s, r));
    })?;
    info!("associated: {:?}", wait(&rx, "set association")?.associations);

    // Vehicle-initiated traffic
    transport.emit(vec![
        codec::encode_switch_user_vehicle_request(&SwitchUserVehicleRequest {
            request_id: -1,
            target_user_id: 10,
        }),
        PropertyValue::builder(PERF_VEHICLE_SPEED)
            .floats([13.9])
            .build(),
        PropertyValue::builder(GEAR_SELECTION).int32s([4]).build(),
    ]);
    match push_rx.recv_timeout(Duration::from_secs(2)) {
        Ok(push) => info!("vehicle asked for user {}", push.target_user_id),
        Err(_) => warn!("no vehicle push received"),
    }
    bus.dispatch().sync()?;
    info!("logger saw {} events", logger.seen());

    let mut dump = String::new();
    bus.dump(&mut dump)?;
    info!("\n{}", dump);

    bus.release();
    info!(
        "released {}; remaining subscriptions: {:?}",
        user_hal.name(),
        transport.subscribed()
    );
    Ok(())
}
