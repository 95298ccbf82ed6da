//! UserHalService exchanges against a scripted vehicle.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use parking_lot::Mutex;
use propbus::Error;
use propbus::adapters::sim::SimBehavior;
use propbus::dispatch::QUEUE_DEPTH;
use propbus::property::{Access, ChangeMode, PropertyConfig, PropertyValue, WireEncoding};
use propbus::protocol::user_codec as codec;
use propbus::protocol::user_types::{
    CREATE_USER, CreateUserRequest, CreateUserResponse, CreateUserStatus, INITIAL_USER_INFO,
    InitialUserInfoRequestType, InitialUserInfoResponse, InitialUserInfoResponseAction,
    REMOVE_USER, RemoveUserRequest, SWITCH_USER, SwitchUserMessageType, SwitchUserRequest,
    SwitchUserResponse, SwitchUserStatus, SwitchUserVehicleRequest,
    USER_IDENTIFICATION_ASSOCIATION, UserIdentificationAssociation,
    UserIdentificationAssociationSetValue as SetValue, UserIdentificationAssociationType as Assoc,
    UserIdentificationAssociationValue, UserIdentificationGetRequest, UserIdentificationResponse,
    UserIdentificationSetAssociation, UserIdentificationSetRequest, UserInfo, UsersInfo,
    user_flags,
};
use propbus::protocol::{Correlator, ExchangeStatus, UserHalService};

use crate::harness::Rig;

const WAIT: Duration = Duration::from_secs(5);

type Reply = Box<dyn Fn(&PropertyValue) -> Vec<PropertyValue> + Send + Sync>;

/// Vehicle whose answers are swapped in by each test.
#[derive(Default)]
struct Script {
    on_set: Mutex<Option<Reply>>,
    on_get: Mutex<Option<Box<dyn Fn(&PropertyValue) -> PropertyValue + Send + Sync>>>,
}

impl Script {
    fn reply(&self, f: impl Fn(&PropertyValue) -> Vec<PropertyValue> + Send + Sync + 'static) {
        *self.on_set.lock() = Some(Box::new(f));
    }

    fn answer_get(&self, f: impl Fn(&PropertyValue) -> PropertyValue + Send + Sync + 'static) {
        *self.on_get.lock() = Some(Box::new(f));
    }
}

impl SimBehavior for Script {
    fn on_get(&self, request: &PropertyValue) -> Option<PropertyValue> {
        self.on_get.lock().as_ref().map(|f| f(request))
    }

    fn on_set(&self, value: &PropertyValue) -> Vec<PropertyValue> {
        self.on_set
            .lock()
            .as_ref()
            .map(|f| f(value))
            .unwrap_or_default()
    }
}

fn user_configs() -> Vec<PropertyConfig> {
    vec![
        PropertyConfig::new(INITIAL_USER_INFO, Access::ReadWrite, ChangeMode::OnChange),
        PropertyConfig::new(SWITCH_USER, Access::ReadWrite, ChangeMode::OnChange),
        PropertyConfig::new(CREATE_USER, Access::ReadWrite, ChangeMode::OnChange),
        PropertyConfig::new(REMOVE_USER, Access::Write, ChangeMode::OnChange),
        PropertyConfig::new(
            USER_IDENTIFICATION_ASSOCIATION,
            Access::ReadWrite,
            ChangeMode::OnChange,
        ),
    ]
}

struct Hal {
    rig: Rig,
    script: Arc<Script>,
    hal: Arc<UserHalService>,
}

fn hal_with(configs: Vec<PropertyConfig>) -> Hal {
    let script = Arc::new(Script::default());
    let rig = Rig::with(WireEncoding::Flat, configs, script.clone());
    let hal = UserHalService::new(rig.bus.clone());
    rig.bus.register_service(hal.clone()).unwrap();
    rig.bus.init().unwrap();
    Hal { rig, script, hal }
}

fn hal() -> Hal {
    hal_with(user_configs())
}

fn users() -> UsersInfo {
    UsersInfo {
        current_user: UserInfo::new(10, user_flags::ADMIN),
        existing_users: vec![
            UserInfo::new(0, user_flags::SYSTEM),
            UserInfo::new(10, user_flags::ADMIN),
        ],
    }
}

fn switch_request() -> SwitchUserRequest {
    SwitchUserRequest {
        target_user: UserInfo::new(11, user_flags::NONE),
        users_info: users(),
    }
}

type Outcome<R> = Receiver<(ExchangeStatus, Option<R>)>;

fn channel<R: Send + 'static>() -> (
    impl FnOnce(ExchangeStatus, Option<R>) + Send + 'static,
    Outcome<R>,
) {
    let (tx, rx) = mpsc::channel();
    (
        move |status, response| {
            let _ = tx.send((status, response));
        },
        rx,
    )
}

fn switch_success(request: &PropertyValue) -> Vec<PropertyValue> {
    vec![codec::encode_switch_user_response(&SwitchUserResponse {
        request_id: request.int32(0).unwrap(),
        message_type: SwitchUserMessageType::VehicleResponse,
        status: SwitchUserStatus::Success,
        error_message: String::new(),
    })]
}

// ── Happy paths ───────────────────────────────────────────────

#[test]
fn initial_user_info_round_trip() {
    let h = hal();
    h.script.reply(|req| {
        vec![codec::encode_initial_user_info_response(
            &InitialUserInfoResponse {
                request_id: req.int32(0).unwrap(),
                action: InitialUserInfoResponseAction::Create,
                user_to_switch_or_create: UserInfo::new(12, user_flags::GUEST),
                user_locales: "de-DE".into(),
                user_name_to_create: "Gast".into(),
            },
        )]
    });

    let (cb, rx) = channel();
    h.hal
        .get_initial_user_info(InitialUserInfoRequestType::FirstBoot, 1000, &users(), cb)
        .unwrap();
    let (status, response) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(status, ExchangeStatus::Ok);
    let response = response.unwrap();
    assert_eq!(response.request_id, 1);
    assert_eq!(response.user_to_switch_or_create.user_id, 12);
    assert_eq!(response.user_locales, "de-DE");
    assert_eq!(response.user_name_to_create, "Gast");

    let sent = h.rig.sim.sets();
    assert_eq!(
        sent[0].int32_values(),
        &[1, InitialUserInfoRequestType::FirstBoot.raw(), 10, 8, 2, 0, 1, 10, 8]
    );
}

#[test]
fn request_ids_increase_across_exchanges() {
    let h = hal();
    h.script.reply(switch_success);
    for expected in 1..=3 {
        let (cb, rx) = channel();
        h.hal.switch_user(&switch_request(), 1000, cb).unwrap();
        let (status, response) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(status, ExchangeStatus::Ok);
        assert_eq!(response.unwrap().request_id, expected);
    }
    let ids: Vec<i32> = h.rig.sim.sets().iter().map(|v| v.int32(0).unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn create_user_sends_name_and_decodes_status() {
    let h = hal();
    h.script.reply(|req| {
        assert_eq!(req.string(), "Guest");
        vec![codec::encode_create_user_response(&CreateUserResponse {
            request_id: req.int32(0).unwrap(),
            status: CreateUserStatus::Failure,
            error_message: "quota".into(),
        })]
    });
    let (cb, rx) = channel();
    let request = CreateUserRequest {
        new_user_info: UserInfo::new(12, user_flags::GUEST),
        new_user_name: "Guest".into(),
        users_info: users(),
    };
    h.hal.create_user(&request, 1000, cb).unwrap();
    let (status, response) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(status, ExchangeStatus::Ok);
    let response = response.unwrap();
    assert_eq!(response.status, CreateUserStatus::Failure);
    assert_eq!(response.error_message, "quota");
}

#[test]
fn fire_and_forget_messages() {
    let h = hal();
    h.hal.post_switch_response(7, &switch_request()).unwrap();
    h.hal.legacy_user_switch(&switch_request()).unwrap();
    h.hal
        .remove_user(&RemoveUserRequest {
            removed_user_info: UserInfo::new(11, 0),
            users_info: users(),
        })
        .unwrap();

    let sent = h.rig.sim.sets();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].int32(0), Ok(7));
    assert_eq!(
        sent[0].int32(1),
        Ok(SwitchUserMessageType::AndroidPostSwitch.raw())
    );
    assert_eq!(
        sent[1].int32(1),
        Ok(SwitchUserMessageType::LegacyAndroidSwitch.raw())
    );
    assert_eq!(sent[2].property_id(), REMOVE_USER);
    assert!(sent[2].int32(0).unwrap() > 0);
}

// ── Failure paths ─────────────────────────────────────────────

#[test]
fn concurrent_request_of_same_kind_is_rejected() {
    let h = hal();
    let (first, first_rx) = channel();
    h.hal.switch_user(&switch_request(), 5000, first).unwrap();

    let (second, second_rx) = channel();
    h.hal.switch_user(&switch_request(), 5000, second).unwrap();
    assert_eq!(
        second_rx.try_recv().unwrap(),
        (ExchangeStatus::RejectedConcurrent, None)
    );
    assert_eq!(h.rig.sim.sets().len(), 1);

    // Another kind is independent.
    let (create, _create_rx) = channel::<CreateUserResponse>();
    let request = CreateUserRequest {
        new_user_info: UserInfo::new(12, 0),
        new_user_name: String::new(),
        users_info: users(),
    };
    h.hal.create_user(&request, 5000, create).unwrap();
    assert_eq!(h.rig.sim.sets().len(), 2);

    h.rig.sim.emit(switch_success(&h.rig.sim.sets()[0]));
    let (status, _) = first_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(status, ExchangeStatus::Ok);
}

#[test]
fn silent_vehicle_times_out_and_late_answer_is_ignored() {
    let h = hal();
    let (cb, rx) = channel();
    h.hal.switch_user(&switch_request(), 40, cb).unwrap();

    let (status, response) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(status, ExchangeStatus::TimedOut);
    assert!(response.is_none());

    h.rig.sim.emit(switch_success(&h.rig.sim.sets()[0]));
    h.rig.settle();
    assert!(rx.try_recv().is_err(), "callback must fire once");

    // The slot is free again.
    h.script.reply(switch_success);
    let (cb, rx) = channel();
    h.hal.switch_user(&switch_request(), 1000, cb).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().0, ExchangeStatus::Ok);
}

#[test]
fn answer_for_unknown_id_leaves_pending_exchange_alone() {
    let h = hal();
    let (cb, rx) = channel();
    h.hal.switch_user(&switch_request(), 5000, cb).unwrap();
    let sent = h.rig.sim.sets()[0].clone();

    let stray = PropertyValue::builder(SWITCH_USER)
        .int32s([sent.int32(0).unwrap() + 50])
        .build();
    h.rig.sim.emit(switch_success(&stray));
    h.rig.settle();
    assert!(rx.try_recv().is_err(), "stray answer must not resolve anything");

    h.rig.sim.emit(switch_success(&sent));
    let (status, response) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(status, ExchangeStatus::Ok);
    assert_eq!(response.unwrap().request_id, sent.int32(0).unwrap());
}

#[test]
fn timeouts_beyond_queue_depth_all_fire() {
    let h = hal();
    let correlator: Arc<Correlator<(), (), usize>> =
        Correlator::new("many", h.rig.bus.dispatch().clone());
    let (tx, rx) = mpsc::channel();
    let total = QUEUE_DEPTH * 2 + 10;
    for kind in 0..total {
        let tx = tx.clone();
        let id = correlator.begin(
            kind,
            None,
            Duration::from_millis(100),
            Box::new(move |status, _| {
                let _ = tx.send(status);
            }),
        );
        assert!(id.is_some());
    }
    assert_eq!(correlator.pending_count(), total);

    for _ in 0..total {
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), ExchangeStatus::TimedOut);
    }
    assert_eq!(correlator.pending_count(), 0);

    // The dispatch thread keeps serving the bus afterwards.
    h.script.reply(switch_success);
    let (cb, rx) = channel();
    h.hal.switch_user(&switch_request(), 1000, cb).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().0, ExchangeStatus::Ok);
}

#[test]
fn malformed_answer_is_wrong_shape() {
    let h = hal();
    h.script.reply(|req| {
        // Missing the status slot.
        vec![PropertyValue::builder(SWITCH_USER)
            .int32s([req.int32(0).unwrap(), SwitchUserMessageType::VehicleResponse.raw()])
            .build()]
    });
    let (cb, rx) = channel();
    h.hal.switch_user(&switch_request(), 1000, cb).unwrap();
    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (ExchangeStatus::WrongResponseShape, None)
    );
}

#[test]
fn answer_on_other_property_is_wrong_shape() {
    let h = hal();
    h.script.reply(|req| {
        vec![codec::encode_create_user_response(&CreateUserResponse {
            request_id: req.int32(0).unwrap(),
            status: CreateUserStatus::Success,
            error_message: String::new(),
        })]
    });
    let (cb, rx) = channel();
    h.hal
        .get_initial_user_info(InitialUserInfoRequestType::ColdBoot, 1000, &users(), cb)
        .unwrap();
    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (ExchangeStatus::WrongResponseShape, None)
    );
}

#[test]
fn send_failure_is_reported_and_frees_the_slot() {
    let h = hal();
    h.rig
        .sim
        .fail_next(propbus::transport::StatusCode::InternalError, 1);
    let (cb, rx) = channel();
    h.hal.switch_user(&switch_request(), 1000, cb).unwrap();
    assert_eq!(rx.try_recv().unwrap(), (ExchangeStatus::SendFailed, None));

    h.script.reply(switch_success);
    let (cb, rx) = channel();
    h.hal.switch_user(&switch_request(), 1000, cb).unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().0, ExchangeStatus::Ok);
}

#[test]
fn bad_arguments_fail_synchronously() {
    let h = hal();
    let (cb, rx) = channel::<SwitchUserResponse>();
    assert!(matches!(
        h.hal.switch_user(&switch_request(), 0, cb),
        Err(Error::InvalidArgument(_))
    ));
    assert!(rx.try_recv().is_err());
    assert!(h.rig.sim.sets().is_empty());

    let partial = hal_with(user_configs().into_iter().take(2).collect());
    assert!(!partial.hal.is_supported());
    let (cb, _rx) = channel::<CreateUserResponse>();
    let request = CreateUserRequest {
        new_user_info: UserInfo::new(12, 0),
        new_user_name: String::new(),
        users_info: users(),
    };
    assert_eq!(
        partial.hal.create_user(&request, 1000, cb),
        Err(Error::NotSupported(CREATE_USER))
    );
}

#[test]
fn release_resolves_pending_as_timed_out() {
    let h = hal();
    let (cb, rx) = channel();
    h.hal.switch_user(&switch_request(), 60_000, cb).unwrap();
    h.rig.bus.release();
    assert_eq!(rx.try_recv().unwrap(), (ExchangeStatus::TimedOut, None));
}

// ── Vehicle-initiated ─────────────────────────────────────────

#[test]
fn vehicle_push_reaches_handler() {
    let h = hal();
    let (tx, rx) = mpsc::channel();
    let dispatch = h.rig.bus.dispatch().clone();
    h.hal.set_vehicle_request_handler(Arc::new(move |req| {
        let _ = tx.send((req, dispatch.is_dispatch_thread()));
    }));

    h.rig
        .sim
        .emit(vec![codec::encode_switch_user_vehicle_request(
            &SwitchUserVehicleRequest {
                request_id: -4,
                target_user_id: 0,
            },
        )]);
    let (req, on_dispatch) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(req.request_id, -4);
    assert_eq!(req.target_user_id, 0);
    assert!(on_dispatch);
}

#[test]
fn echoed_request_does_not_complete_exchange() {
    let h = hal();
    let (cb, rx) = channel();
    h.hal.switch_user(&switch_request(), 5000, cb).unwrap();

    // Our own request, echoed back by the controller.
    let echoed = h.rig.sim.sets()[0].clone();
    h.rig.sim.emit(vec![echoed.clone()]);
    h.rig.settle();
    assert!(rx.try_recv().is_err());

    h.rig.sim.emit(switch_success(&echoed));
    assert_eq!(rx.recv_timeout(WAIT).unwrap().0, ExchangeStatus::Ok);
}

// ── Associations ──────────────────────────────────────────────

fn association_answer(
    request_id: i32,
    pairs: &[(Assoc, UserIdentificationAssociationValue)],
) -> PropertyValue {
    let mut associations = heapless::Vec::new();
    for (association_type, value) in pairs {
        associations
            .push(UserIdentificationAssociation {
                association_type: *association_type,
                value: *value,
            })
            .unwrap();
    }
    codec::encode_user_identification_response(&UserIdentificationResponse {
        request_id,
        associations,
        error_message: String::new(),
    })
}

#[test]
fn association_requests_are_validated() {
    let user = UserInfo::new(10, 0);
    assert!(UserIdentificationGetRequest::new(user, &[]).is_err());
    assert!(UserIdentificationGetRequest::new(user, &[Assoc::KeyFob, Assoc::KeyFob]).is_err());
    assert!(
        UserIdentificationGetRequest::new(
            user,
            &[
                Assoc::KeyFob,
                Assoc::Custom1,
                Assoc::Custom2,
                Assoc::Custom3,
                Assoc::Custom4,
                Assoc::KeyFob,
            ]
        )
        .is_err()
    );
    let invalid = UserIdentificationSetAssociation {
        association_type: Assoc::KeyFob,
        value: SetValue::Invalid,
    };
    assert!(UserIdentificationSetRequest::new(user, &[invalid]).is_err());
}

#[test]
fn hand_built_association_requests_are_rejected_before_sending() {
    let h = hal();
    let user = UserInfo::new(10, 0);

    let mut duplicate = heapless::Vec::new();
    for _ in 0..2 {
        duplicate
            .push(UserIdentificationSetAssociation {
                association_type: Assoc::KeyFob,
                value: SetValue::AssociateCurrentUser,
            })
            .unwrap();
    }
    let set = UserIdentificationSetRequest {
        user_info: user,
        associations: duplicate,
    };
    let (cb, rx) = channel();
    assert!(matches!(
        h.hal.set_user_association(1000, &set, cb),
        Err(Error::InvalidArgument(_))
    ));
    assert!(rx.try_recv().is_err());

    let empty = UserIdentificationSetRequest {
        user_info: user,
        associations: heapless::Vec::new(),
    };
    let (cb, _rx) = channel();
    assert!(matches!(
        h.hal.set_user_association(1000, &empty, cb),
        Err(Error::InvalidArgument(_))
    ));

    let query = UserIdentificationGetRequest {
        user_info: user,
        association_types: heapless::Vec::new(),
    };
    assert!(matches!(
        h.hal.get_user_association(&query),
        Err(Error::InvalidArgument(_))
    ));

    assert!(h.rig.sim.sets().is_empty());
    assert_eq!(h.rig.sim.get_calls(), 0);
}

#[test]
fn get_association_checks_id_and_shape() {
    let h = hal();
    let query =
        UserIdentificationGetRequest::new(UserInfo::new(10, 0), &[Assoc::KeyFob, Assoc::Custom1])
            .unwrap();

    h.script.answer_get(|req| {
        association_answer(
            req.int32(0).unwrap(),
            &[
                (Assoc::KeyFob, UserIdentificationAssociationValue::Unknown),
                (Assoc::Custom1, UserIdentificationAssociationValue::AssociatedAnotherUser),
            ],
        )
    });
    let response = h.hal.get_user_association(&query).unwrap();
    assert_eq!(response.types().collect::<Vec<_>>(), vec![Assoc::KeyFob, Assoc::Custom1]);

    h.script.answer_get(|req| {
        association_answer(
            req.int32(0).unwrap() + 100,
            &[
                (Assoc::KeyFob, UserIdentificationAssociationValue::Unknown),
                (Assoc::Custom1, UserIdentificationAssociationValue::Unknown),
            ],
        )
    });
    assert!(matches!(
        h.hal.get_user_association(&query),
        Err(Error::Malformed(_))
    ));

    h.script.answer_get(|req| {
        association_answer(
            req.int32(0).unwrap(),
            &[(Assoc::KeyFob, UserIdentificationAssociationValue::Unknown)],
        )
    });
    assert!(matches!(
        h.hal.get_user_association(&query),
        Err(Error::Malformed(_))
    ));
}

#[test]
fn set_association_response_must_echo_types() {
    let h = hal();
    let request = UserIdentificationSetRequest::new(
        UserInfo::new(10, 0),
        &[UserIdentificationSetAssociation {
            association_type: Assoc::KeyFob,
            value: SetValue::AssociateCurrentUser,
        }],
    )
    .unwrap();

    h.script.reply(|req| {
        vec![association_answer(
            req.int32(0).unwrap(),
            &[(Assoc::Custom2, UserIdentificationAssociationValue::AssociatedCurrentUser)],
        )]
    });
    let (cb, rx) = channel();
    h.hal.set_user_association(1000, &request, cb).unwrap();
    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (ExchangeStatus::WrongResponseShape, None)
    );

    h.script.reply(|req| {
        vec![association_answer(
            req.int32(0).unwrap(),
            &[(Assoc::KeyFob, UserIdentificationAssociationValue::AssociatedCurrentUser)],
        )]
    });
    let (cb, rx) = channel();
    h.hal.set_user_association(1000, &request, cb).unwrap();
    let (status, response) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(status, ExchangeStatus::Ok);
    assert_eq!(
        response.unwrap().associations[0].value,
        UserIdentificationAssociationValue::AssociatedCurrentUser
    );
}
