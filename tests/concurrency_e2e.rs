use std::thread;

use kyroflow::{Item, ItemId, NewItem, Platform, PlatformConfig, PropertySchema, Timestamp, TypeDef, TypeId, Value};

const RPPG_RULE: &str = r"(defrule rppg_rule
    (rPPG_has_HR (item_id ?s) (HR ?hr) (timestamp ?t))
    (rPPG_has_BR (item_id ?s) (BR ?br) (timestamp ?t))
    (rPPG_has_SpO2 (item_id ?s) (SpO2 ?spo2) (timestamp ?t))
    (Sensor_kit (item_id ?s) (kit ?k))
    (Kit_has_user (item_id ?k) (user ?u))
    =>
    (add_data ?u (create$ HR BR SpO2) (create$ ?hr ?br ?spo2) ?t))";

struct Types {
    user: TypeId,
    kit: TypeId,
    rppg: TypeId,
}

fn platform() -> (Platform, Types) {
    let platform = Platform::new(PlatformConfig::default()).unwrap();
    let user = platform
        .create_type(
            TypeDef::new("User")
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
    platform.register_rule_text(RPPG_RULE).unwrap();
    (
        platform,
        Types {
            user: user.id,
            kit: kit.id,
            rppg: rppg.id,
        },
    )
}

/// A user wearing a kit with one rPPG sensor. Returns `(user, sensor)`.
fn wire_user(p: &Platform, types: &Types) -> (Item, Item) {
    let user = p.create_item(NewItem::new(types.user)).unwrap();
    let kit = p.create_item(NewItem::new(types.kit)).unwrap();
    p.write_dynamic(kit.id, "user", Value::Item(user.id), Some(Timestamp::from_millis(0)))
        .unwrap();
    let sensor = p
        .create_item(NewItem::new(types.rppg).value("kit", Value::Item(kit.id)))
        .unwrap();
    (user, sensor)
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

fn hr_series(p: &Platform, item: ItemId) -> Vec<(Value, i64)> {
    p.get_item(item).unwrap().dynamic_series["HR"]
        .iter()
        .map(|s| (s.value.clone(), s.timestamp.as_millis()))
        .collect()
}

#[test]
fn parallel_sensors_each_fire_once() {
    let (platform, types) = platform();
    let wired: Vec<(Item, Item)> = (0..8).map(|_| wire_user(&platform, &types)).collect();

    thread::scope(|s| {
        for (i, (_, sensor)) in wired.iter().enumerate() {
            let platform = &platform;
            let hr = 60 + i64::try_from(i).unwrap();
            s.spawn(move || write_vitals(platform, sensor.id, hr, 16, 97, 100));
        }
    });

    for (i, (user, _)) in wired.iter().enumerate() {
        let hr = 60 + i64::try_from(i).unwrap();
        assert_eq!(hr_series(&platform, user.id), vec![(Value::Int(hr), 100)]);
    }
    assert_eq!(platform.stats().unwrap().engine.fired, 8);
}

#[test]
fn concurrent_duplicate_delivery_fires_once() {
    let (platform, types) = platform();
    let (user, sensor) = wire_user(&platform, &types);

    thread::scope(|s| {
        for _ in 0..8 {
            let platform = &platform;
            s.spawn(move || write_vitals(platform, sensor.id, 72, 16, 97, 100));
        }
    });

    assert_eq!(hr_series(&platform, user.id), vec![(Value::Int(72), 100)]);
    assert_eq!(platform.stats().unwrap().engine.fired, 1);
}

#[test]
fn same_item_series_stays_complete_under_concurrent_writers() {
    let (platform, types) = platform();
    let (_, sensor) = wire_user(&platform, &types);

    thread::scope(|s| {
        for writer in 0..4i64 {
            let platform = &platform;
            let sensor = sensor.id;
            s.spawn(move || {
                for i in 0..50i64 {
                    platform
                        .write_dynamic(sensor, "HR", 60 + i, Some(Timestamp::from_millis(writer * 1_000 + i)))
                        .unwrap();
                }
            });
        }
    });

    let series = hr_series(&platform, sensor.id);
    assert_eq!(series.len(), 200);
    assert!(series.windows(2).all(|w| w[0].1 <= w[1].1));
    for writer in 0..4i64 {
        for i in 0..50i64 {
            assert!(series.contains(&(Value::Int(60 + i), writer * 1_000 + i)));
        }
    }
    assert_eq!(platform.stats().unwrap().engine.fired, 0);
}
