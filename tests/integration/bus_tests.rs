//! PropertyBus lifecycle, ownership, subscriptions and event fan-out.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use propbus::Error;
use propbus::bus::HalService;
use propbus::property::{Access, ChangeMode, PropertyConfig, PropertyValue};
use propbus::transport::{SetError, StatusCode};

use crate::harness::{
    DOOR_LOCK, GEAR, INFO_VIN, Journal, Recorder, Rig, SPEED, WINDOW_POS, vehicle_configs,
};

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Two services splitting the vehicle properties, already initialised.
fn two_services() -> (Rig, Arc<Recorder>, Arc<Recorder>, Journal) {
    let rig = Rig::new(vehicle_configs());
    let j = journal();
    let powertrain = Recorder::new("powertrain", [GEAR, SPEED, INFO_VIN], &j);
    let body = Recorder::new("body", [DOOR_LOCK, WINDOW_POS], &j);
    rig.bus.register_service(powertrain.clone()).unwrap();
    rig.bus.register_service(body.clone()).unwrap();
    rig.bus.init().unwrap();
    (rig, powertrain, body, j)
}

// ── Lifecycle ─────────────────────────────────────────────────

#[test]
fn init_hands_out_configs_then_starts_services_in_order() {
    let (rig, powertrain, body, j) = two_services();

    assert_eq!(
        *j.lock(),
        vec!["configs:powertrain", "configs:body", "init:powertrain", "init:body"]
    );
    let mut owned: Vec<i32> = powertrain
        .configs
        .lock()
        .iter()
        .map(|c| c.property_id)
        .collect();
    owned.sort_unstable();
    assert_eq!(owned, vec![INFO_VIN, GEAR, SPEED]);
    assert_eq!(body.configs.lock().len(), 2);
    assert!(rig.bus.is_property_supported(GEAR));
    assert!(!rig.bus.is_property_supported(0x1140_9999));
}

#[test]
fn init_is_idempotent() {
    let (rig, _, _, j) = two_services();
    rig.bus.init().unwrap();
    assert_eq!(rig.sim.config_fetches(), 1);
    assert_eq!(j.lock().len(), 4);
}

#[test]
fn duplicate_owner_fails_init() {
    let rig = Rig::new(vehicle_configs());
    let j = journal();
    rig.bus
        .register_service(Recorder::new("first", [GEAR], &j))
        .unwrap();
    rig.bus
        .register_service(Recorder::new("second", [SPEED, GEAR], &j))
        .unwrap();

    let err = rig.bus.init().unwrap_err();
    assert_eq!(
        err,
        Error::DuplicateOwner {
            property_id: GEAR,
            first: "first",
            second: "second",
        }
    );
    assert!(j.lock().is_empty(), "no service may start");
}

#[test]
fn failed_service_start_unwinds_and_allows_retry() {
    let rig = Rig::new(vehicle_configs());
    let j = journal();
    let powertrain = Recorder::new("powertrain", [GEAR, SPEED], &j);
    let body = Recorder::new("body", [DOOR_LOCK], &j);
    let trim = Recorder::new("trim", [WINDOW_POS], &j);
    body.refuse_init.store(true, Ordering::SeqCst);
    rig.bus.register_service(powertrain.clone()).unwrap();
    rig.bus.register_service(body.clone()).unwrap();
    rig.bus.register_service(trim).unwrap();

    assert!(matches!(rig.bus.init(), Err(Error::InvalidArgument(_))));
    assert_eq!(
        &j.lock()[3..],
        ["init:powertrain", "init:body", "release:powertrain"]
    );
    assert_eq!(rig.bus.get(GEAR, 0), Err(Error::NotInitialized));
    assert!(!rig.bus.is_property_supported(GEAR));
    assert_eq!(
        rig.bus.subscribe(powertrain.as_ref(), GEAR, 0.0),
        Err(Error::NotInitialized)
    );
    assert!(rig.sim.subscribed().is_empty());

    body.refuse_init.store(false, Ordering::SeqCst);
    rig.bus.init().unwrap();
    assert_eq!(rig.sim.config_fetches(), 2);
    assert!(rig.bus.is_property_supported(GEAR));
    rig.bus.subscribe(powertrain.as_ref(), GEAR, 0.0).unwrap();
}

#[test]
fn registration_rules() {
    let (rig, _, _, j) = two_services();
    let late = Recorder::new("late", Vec::new(), &j);
    assert!(matches!(
        rig.bus.register_service(late),
        Err(Error::InvalidArgument(_))
    ));

    let fresh = Rig::new(vehicle_configs());
    fresh
        .bus
        .register_service(Recorder::new("same", Vec::new(), &j))
        .unwrap();
    assert!(
        fresh
            .bus
            .register_service(Recorder::new("same", Vec::new(), &j))
            .is_err()
    );
}

#[test]
fn unknown_listed_property_is_ignored() {
    let rig = Rig::new(vehicle_configs());
    let j = journal();
    let svc = Recorder::new("svc", [GEAR, 0x1140_9999], &j);
    rig.bus.register_service(svc.clone()).unwrap();
    rig.bus.init().unwrap();
    assert_eq!(svc.configs.lock().len(), 1);
}

#[test]
fn operations_before_init_fail() {
    let rig = Rig::new(vehicle_configs());
    let svc = Recorder::new("svc", [GEAR], &journal());
    rig.bus.register_service(svc.clone()).unwrap();
    assert_eq!(rig.bus.get(GEAR, 0), Err(Error::NotInitialized));
    assert_eq!(
        rig.bus.subscribe(svc.as_ref(), GEAR, 0.0),
        Err(Error::NotInitialized)
    );
}

#[test]
fn release_reverses_order_and_drops_subscriptions() {
    let (rig, powertrain, body, j) = two_services();
    rig.bus.subscribe(powertrain.as_ref(), GEAR, 0.0).unwrap();
    rig.bus.subscribe(body.as_ref(), DOOR_LOCK, 0.0).unwrap();
    assert_eq!(rig.sim.subscribed(), vec![GEAR, DOOR_LOCK]);

    rig.bus.release();

    let log = j.lock();
    assert_eq!(&log[4..], ["release:body", "release:powertrain"]);
    assert!(rig.sim.subscribed().is_empty());
    assert!(rig.bus.subscription(GEAR).is_none());
}

// ── Subscriptions ─────────────────────────────────────────────

#[test]
fn subscribe_records_effective_rate_and_areas() {
    let (rig, powertrain, body, _) = two_services();

    rig.bus.subscribe(powertrain.as_ref(), SPEED, 50.0).unwrap();
    let sub = rig.bus.subscription(SPEED).unwrap();
    assert_eq!(sub.sample_rate, 10.0);
    assert_eq!(sub.area_ids, vec![0]);
    assert_eq!(rig.sim.subscription(SPEED).unwrap().sample_rate, 10.0);

    rig.bus.subscribe(body.as_ref(), DOOR_LOCK, 3.0).unwrap();
    let sub = rig.sim.subscription(DOOR_LOCK).unwrap();
    assert_eq!(sub.sample_rate, 0.0);
    assert_eq!(sub.area_ids, vec![1, 4]);
}

#[test]
fn subscribe_rejects_non_owner_and_static() {
    let (rig, powertrain, body, _) = two_services();

    assert!(matches!(
        rig.bus.subscribe(body.as_ref(), GEAR, 0.0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        rig.bus.subscribe(powertrain.as_ref(), INFO_VIN, 0.0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(rig.sim.subscribed().is_empty());
}

#[test]
fn nan_rate_bound_from_controller_is_tolerated() {
    let rig = Rig::new(vec![
        PropertyConfig::new(SPEED, Access::Read, ChangeMode::Continuous)
            .with_sample_rates(f32::NAN, 10.0),
    ]);
    let svc = Recorder::new("svc", [SPEED], &journal());
    rig.bus.register_service(svc.clone()).unwrap();
    rig.bus.init().unwrap();

    rig.bus.subscribe(svc.as_ref(), SPEED, 50.0).unwrap();
    assert_eq!(rig.bus.subscription(SPEED).unwrap().sample_rate, 10.0);
    assert_eq!(rig.sim.subscription(SPEED).unwrap().sample_rate, 10.0);
}

#[test]
fn failed_subscribe_rolls_back() {
    let (rig, powertrain, _, _) = two_services();
    rig.sim.fail_subscriptions(Some(StatusCode::InternalError));

    let err = rig
        .bus
        .subscribe(powertrain.as_ref(), GEAR, 0.0)
        .unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::InternalError));
    assert!(rig.bus.subscription(GEAR).is_none());
}

#[test]
fn resubscribe_failure_restores_previous_rate() {
    let (rig, powertrain, _, _) = two_services();
    rig.bus.subscribe(powertrain.as_ref(), SPEED, 2.0).unwrap();
    rig.sim.fail_subscriptions(Some(StatusCode::InternalError));

    assert!(rig.bus.subscribe(powertrain.as_ref(), SPEED, 8.0).is_err());
    assert_eq!(rig.bus.subscription(SPEED).unwrap().sample_rate, 2.0);
}

#[test]
fn unsubscribe_is_owner_checked() {
    let (rig, powertrain, body, _) = two_services();
    rig.bus.subscribe(powertrain.as_ref(), GEAR, 0.0).unwrap();

    assert!(rig.bus.unsubscribe(body.as_ref(), GEAR).is_err());
    rig.bus.unsubscribe(powertrain.as_ref(), GEAR).unwrap();
    assert!(rig.sim.subscribed().is_empty());
    // Nothing left to remove.
    rig.bus.unsubscribe(powertrain.as_ref(), GEAR).unwrap();
}

// ── get / set ─────────────────────────────────────────────────

#[test]
fn set_is_validated_against_config() {
    let (rig, _, _, _) = two_services();

    let read_only = PropertyValue::builder(GEAR).int32s([1]).build();
    assert!(matches!(
        rig.bus.set(&read_only),
        Err(Error::InvalidArgument(_))
    ));

    let bad_area = PropertyValue::builder(DOOR_LOCK).area(2).int32s([1]).build();
    assert!(rig.bus.set(&bad_area).is_err());

    let out_of_range = PropertyValue::builder(WINDOW_POS)
        .area(1)
        .int32s([11])
        .build();
    assert!(rig.bus.set(&out_of_range).is_err());

    let unknown = PropertyValue::builder(0x1140_9999).int32s([1]).build();
    assert_eq!(rig.bus.set(&unknown), Err(Error::NotSupported(0x1140_9999)));

    assert_eq!(rig.sim.set_calls(), 0, "nothing reaches the controller");

    let ok = PropertyValue::builder(WINDOW_POS)
        .area(1)
        .int32s([10])
        .build();
    rig.bus.set(&ok).unwrap();
    assert_eq!(rig.sim.sets(), vec![ok]);
}

#[test]
fn get_reads_through() {
    let (rig, _, _, _) = two_services();
    rig.sim
        .store(PropertyValue::builder(INFO_VIN).string("WVWZZZ1KZ").build());
    let v = rig.bus.get(INFO_VIN, 0).unwrap();
    assert_eq!(v.get::<String>().unwrap(), "WVWZZZ1KZ");
}

#[test]
fn get_refuses_write_only_property() {
    const CHIME: i32 = 0x1120_0d10;
    let rig = Rig::new(vec![PropertyConfig::new(
        CHIME,
        Access::Write,
        ChangeMode::OnChange,
    )]);
    let svc = Recorder::new("svc", [CHIME], &journal());
    rig.bus.register_service(svc).unwrap();
    rig.bus.init().unwrap();

    assert!(matches!(
        rig.bus.get(CHIME, 0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        rig.bus.get_with(&PropertyValue::request(CHIME, 0)),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(rig.sim.get_calls(), 0);
}

// ── Fan-out ───────────────────────────────────────────────────

#[test]
fn events_are_batched_per_service_in_arrival_order() {
    let (rig, powertrain, body, _) = two_services();

    rig.sim.emit(vec![
        PropertyValue::builder(GEAR).int32s([1]).build(),
        PropertyValue::builder(DOOR_LOCK).area(1).int32s([1]).build(),
        PropertyValue::builder(SPEED).floats([4.0]).build(),
        PropertyValue::builder(0x1140_9999).int32s([7]).build(),
        PropertyValue::builder(GEAR).int32s([2]).build(),
    ]);
    rig.settle();

    let batches = powertrain.batches.lock();
    assert_eq!(batches.len(), 1, "one call per service per notification");
    let ids: Vec<i32> = batches[0].iter().map(|v| v.property_id()).collect();
    assert_eq!(ids, vec![GEAR, SPEED, GEAR]);
    assert_eq!(body.events().len(), 1);

    assert_eq!(rig.bus.last_value(GEAR).unwrap().int32(0), Ok(2));
    assert!(rig.bus.last_value(0x1140_9999).is_none());
}

#[test]
fn service_without_events_is_not_called() {
    let (rig, powertrain, body, _) = two_services();
    rig.sim
        .emit(vec![PropertyValue::builder(GEAR).int32s([3]).build()]);
    rig.settle();
    assert_eq!(powertrain.batches.lock().len(), 1);
    assert!(body.batches.lock().is_empty());
}

#[test]
fn set_errors_are_grouped_by_owner() {
    let (rig, powertrain, body, _) = two_services();
    let err = |property_id, area_id| SetError {
        property_id,
        area_id,
        status: StatusCode::AccessDenied,
    };
    rig.sim.emit_set_errors(vec![
        err(DOOR_LOCK, 1),
        err(0x1140_9999, 0),
        err(WINDOW_POS, 1),
    ]);
    rig.settle();

    assert!(powertrain.set_errors.lock().is_empty());
    let batches = body.set_errors.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0], vec![err(DOOR_LOCK, 1), err(WINDOW_POS, 1)]);
}

#[test]
fn dump_lists_owners_and_subscriptions() {
    let (rig, powertrain, _, _) = two_services();
    rig.bus.subscribe(powertrain.as_ref(), GEAR, 0.0).unwrap();

    let mut out = String::new();
    rig.bus.dump(&mut out).unwrap();
    assert!(out.contains("owner=powertrain"));
    assert!(out.contains("owner=body"));
    assert!(out.contains("Subscriptions: 1"));
    assert_eq!(powertrain.name(), "powertrain");
}
