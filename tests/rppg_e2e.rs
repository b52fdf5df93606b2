use kyroflow::{
    InstantiationState, Item, ItemId, NewItem, Platform, PlatformConfig, PropertySchema, Timestamp, TypeDef, Value,
};

const RPPG_RULE: &str = r"(defrule rppg_rule
    (rPPG_has_HR (item_id ?s) (HR ?hr) (timestamp ?t))
    (rPPG_has_BR (item_id ?s) (BR ?br) (timestamp ?t))
    (rPPG_has_SpO2 (item_id ?s) (SpO2 ?spo2) (timestamp ?t))
    (Sensor_kit (item_id ?s) (kit ?k))
    (Kit_has_user (item_id ?k) (user ?u))
    =>
    (add_data ?u (create$ HR BR SpO2) (create$ ?hr ?br ?spo2) ?t))";

struct Scenario {
    platform: Platform,
    user1: Item,
    rppg1: Item,
}

fn scenario() -> Scenario {
    let platform = Platform::new(PlatformConfig::default()).unwrap();

    let user = platform
        .create_type(
            TypeDef::new("User")
                .static_property("name", PropertySchema::string())
                .dynamic_property("HR", PropertySchema::integer())
                .dynamic_property("BR", PropertySchema::integer())
                .dynamic_property("SpO2", PropertySchema::integer()),
        )
        .unwrap();
    let kit = platform
        .create_type(TypeDef::new("Kit").dynamic_property("user", PropertySchema::item(user.id)))
        .unwrap();
    let sensor = platform
        .create_type(TypeDef::new("Sensor").static_property("kit", PropertySchema::item(kit.id)))
        .unwrap();
    let rppg = platform
        .create_type(
            TypeDef::new("rPPG")
                .parent(sensor.id)
                .dynamic_property("HR", PropertySchema::integer_range(48, 180))
                .dynamic_property("BR", PropertySchema::integer_range(7, 30))
                .dynamic_property("SpO2", PropertySchema::integer_range(0, 100)),
        )
        .unwrap();

    let user1 = platform
        .create_item(NewItem::new(user.id).name("user1").value("name", "Alice"))
        .unwrap();
    let kit1 = platform.create_item(NewItem::new(kit.id).name("kit1")).unwrap();
    platform
        .write_dynamic(kit1.id, "user", Value::Item(user1.id), Some(Timestamp::from_millis(0)))
        .unwrap();
    let rppg1 = platform
        .create_item(NewItem::new(rppg.id).name("rppg1").value("kit", Value::Item(kit1.id)))
        .unwrap();

    platform.register_rule_text(RPPG_RULE).unwrap();
    Scenario { platform, user1, rppg1 }
}

fn write_vitals(p: &Platform, sensor: ItemId, hr: i64, br: i64, spo2: i64, t: i64) {
    p.write_dynamic_many(
        sensor,
        [
            ("HR".to_string(), Value::Int(hr)),
            ("BR".to_string(), Value::Int(br)),
            ("SpO2".to_string(), Value::Int(spo2)),
        ],
        Some(Timestamp::from_millis(t)),
    )
    .unwrap();
}

fn series(p: &Platform, item: ItemId, property: &str) -> Vec<(Value, i64)> {
    p.get_item(item).unwrap().dynamic_series[property]
        .iter()
        .map(|s| (s.value.clone(), s.timestamp.as_millis()))
        .collect()
}

#[test]
fn synchronized_vitals_propagate_to_the_kit_user() {
    let Scenario { platform, user1, rppg1 } = scenario();

    write_vitals(&platform, rppg1.id, 72, 16, 97, 100);

    assert_eq!(series(&platform, user1.id, "HR"), vec![(Value::Int(72), 100)]);
    assert_eq!(series(&platform, user1.id, "BR"), vec![(Value::Int(16), 100)]);
    assert_eq!(series(&platform, user1.id, "SpO2"), vec![(Value::Int(97), 100)]);
    assert_eq!(platform.stats().unwrap().engine.fired, 1);
    assert_eq!(
        platform
            .instantiation_state("rppg_rule", rppg1.id, Timestamp::from_millis(100))
            .unwrap(),
        Some(InstantiationState::Fired)
    );
}

#[test]
fn duplicate_delivery_does_not_fire_twice() {
    let Scenario { platform, user1, rppg1 } = scenario();

    write_vitals(&platform, rppg1.id, 72, 16, 97, 100);
    write_vitals(&platform, rppg1.id, 72, 16, 97, 100);

    assert_eq!(series(&platform, user1.id, "HR").len(), 1);
    assert_eq!(platform.stats().unwrap().engine.fired, 1);
}

#[test]
fn arrival_order_does_not_matter() {
    let Scenario { platform, user1, rppg1 } = scenario();
    let t = Some(Timestamp::from_millis(300));

    platform.write_dynamic(rppg1.id, "SpO2", 95, t).unwrap();
    platform.write_dynamic(rppg1.id, "HR", 80, t).unwrap();
    assert!(series(&platform, user1.id, "HR").is_empty());
    assert_eq!(
        platform
            .instantiation_state("rppg_rule", rppg1.id, Timestamp::from_millis(300))
            .unwrap(),
        Some(InstantiationState::Pending)
    );

    platform.write_dynamic(rppg1.id, "BR", 14, t).unwrap();
    assert_eq!(series(&platform, user1.id, "BR"), vec![(Value::Int(14), 300)]);
    assert_eq!(platform.stats().unwrap().engine.fired, 1);
}

#[test]
fn partial_matches_expire_without_firing() {
    let Scenario { platform, user1, rppg1 } = scenario();
    let t = Some(Timestamp::from_millis(200));

    platform.write_dynamic(rppg1.id, "HR", 72, t).unwrap();
    platform.write_dynamic(rppg1.id, "BR", 16, t).unwrap();

    let window = i64::try_from(platform.config().rule_engine.retention_window_ms).unwrap();
    let later = Timestamp::from_millis(Timestamp::now().as_millis() + window + 1);
    let report = platform.sweep_at(later).unwrap();
    assert!(report.expired >= 1);
    assert_eq!(
        platform
            .instantiation_state("rppg_rule", rppg1.id, Timestamp::from_millis(200))
            .unwrap(),
        Some(InstantiationState::Expired)
    );

    platform.write_dynamic(rppg1.id, "SpO2", 97, t).unwrap();
    assert!(series(&platform, user1.id, "SpO2").is_empty());
    assert_eq!(platform.stats().unwrap().engine.fired, 0);
}

#[test]
fn different_timestamps_do_not_join() {
    let Scenario { platform, user1, rppg1 } = scenario();

    platform.write_dynamic(rppg1.id, "HR", 72, Some(Timestamp::from_millis(1))).unwrap();
    platform.write_dynamic(rppg1.id, "BR", 16, Some(Timestamp::from_millis(2))).unwrap();
    platform.write_dynamic(rppg1.id, "SpO2", 97, Some(Timestamp::from_millis(3))).unwrap();

    assert!(series(&platform, user1.id, "HR").is_empty());
    assert_eq!(platform.stats().unwrap().engine.fired, 0);
}

#[test]
fn out_of_range_vitals_are_rejected_atomically() {
    let Scenario { platform, user1, rppg1 } = scenario();

    let err = platform
        .write_dynamic_many(
            rppg1.id,
            [
                ("HR".to_string(), Value::Int(72)),
                ("BR".to_string(), Value::Int(16)),
                ("SpO2".to_string(), Value::Int(140)),
            ],
            Some(Timestamp::from_millis(100)),
        )
        .unwrap_err();
    assert!(err.is_validation());
    assert!(series(&platform, rppg1.id, "HR").is_empty());
    assert!(series(&platform, user1.id, "HR").is_empty());
}

#[test]
fn late_kit_user_fires_and_settles_the_instantiation() {
    let Scenario { platform, user1, rppg1 } = scenario();
    let kit1 = platform.find_item_by_name("kit1").unwrap().unwrap();
    let user2 = platform
        .create_item(NewItem::new(user1.item_type).name("user2").value("name", "Bob"))
        .unwrap();
    let kit2 = platform.create_item(NewItem::new(kit1.item_type).name("kit2")).unwrap();
    let rppg2 = platform
        .create_item(NewItem::new(rppg1.item_type).value("kit", Value::Item(kit2.id)))
        .unwrap();

    write_vitals(&platform, rppg2.id, 72, 16, 97, 100);
    assert!(series(&platform, user2.id, "HR").is_empty());
    platform
        .write_dynamic(kit2.id, "user", Value::Item(user2.id), Some(Timestamp::from_millis(0)))
        .unwrap();

    assert_eq!(series(&platform, user2.id, "HR"), vec![(Value::Int(72), 100)]);
    assert_eq!(
        platform
            .instantiation_state("rppg_rule", rppg2.id, Timestamp::from_millis(100))
            .unwrap(),
        Some(InstantiationState::Fired)
    );

    let later = Timestamp::from_millis(Timestamp::now().as_millis() + 20_000);
    assert_eq!(platform.sweep_at(later).unwrap().expired, 0);
    assert_eq!(
        platform
            .instantiation_state("rppg_rule", rppg2.id, Timestamp::from_millis(100))
            .unwrap(),
        Some(InstantiationState::Fired)
    );
    let stats = platform.stats().unwrap().engine;
    assert_eq!(stats.fired, 1);
    assert_eq!(stats.expired, 0);
}

#[test]
fn reassigned_kit_routes_by_last_write() {
    let Scenario { platform, user1, rppg1 } = scenario();
    let kit1 = platform.find_item_by_name("kit1").unwrap().unwrap();
    let user2 = platform
        .create_item(NewItem::new(user1.item_type).name("user2").value("name", "Bob"))
        .unwrap();

    platform
        .write_dynamic(kit1.id, "user", Value::Item(user1.id), Some(Timestamp::from_millis(50)))
        .unwrap();
    platform
        .write_dynamic(kit1.id, "user", Value::Item(user2.id), Some(Timestamp::from_millis(10)))
        .unwrap();
    write_vitals(&platform, rppg1.id, 72, 16, 97, 100);

    assert!(series(&platform, user1.id, "HR").is_empty());
    assert_eq!(series(&platform, user2.id, "HR"), vec![(Value::Int(72), 100)]);
}
