use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use kyroflow::{Item, NewItem, Platform, PlatformConfig, PropertySchema, Timestamp, TypeDef, Value};

const RPPG_RULE: &str = "(defrule rppg_rule \
    (rPPG_has_HR (item_id ?s) (HR ?hr) (timestamp ?t)) \
    (rPPG_has_BR (item_id ?s) (BR ?br) (timestamp ?t)) \
    (Sensor_kit (item_id ?s) (kit ?k)) \
    (Kit_has_user (item_id ?k) (user ?u)) \
    => (add_data ?u (create$ HR BR) (create$ ?hr ?br) ?t))";

/// One user, kit and sensor wired together, with the vitals rule installed.
fn make_platform(with_rule: bool) -> (Platform, Item) {
    let platform = Platform::new(PlatformConfig::default()).unwrap();
    let user = platform
        .create_type(
            TypeDef::new("User")
                .dynamic_property("HR", PropertySchema::integer())
                .dynamic_property("BR", PropertySchema::integer()),
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
                .dynamic_property("BR", PropertySchema::integer_range(7, 30)),
        )
        .unwrap();

    let user1 = platform.create_item(NewItem::new(user.id)).unwrap();
    let kit1 = platform.create_item(NewItem::new(kit.id)).unwrap();
    platform
        .write_dynamic(kit1.id, "user", Value::Item(user1.id), Some(Timestamp::from_millis(0)))
        .unwrap();
    let rppg1 = platform
        .create_item(NewItem::new(rppg.id).value("kit", Value::Item(kit1.id)))
        .unwrap();
    if with_rule {
        platform.register_rule_text(RPPG_RULE).unwrap();
    }
    (platform, rppg1)
}

fn bench_write_without_rules(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.throughput(Throughput::Elements(1));
    group.bench_function("write_dynamic/no_rules", |b| {
        b.iter_custom(|iters| {
            let (platform, sensor) = make_platform(false);
            let start = Instant::now();
            for i in 0..iters {
                let t = i64::try_from(i).unwrap_or(i64::MAX);
                platform
                    .write_dynamic(sensor.id, "HR", 72, Some(Timestamp::from_millis(t)))
                    .unwrap();
            }
            start.elapsed()
        });
    });
    group.finish();
}

fn bench_synchronized_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.throughput(Throughput::Elements(2));
    group.bench_function("write_dynamic_many/rppg_join", |b| {
        b.iter_custom(|iters| {
            let (platform, sensor) = make_platform(true);
            let start = Instant::now();
            for i in 0..iters {
                let t = i64::try_from(i).unwrap_or(i64::MAX);
                platform
                    .write_dynamic_many(
                        sensor.id,
                        [("HR".to_string(), Value::Int(72)), ("BR".to_string(), Value::Int(16))],
                        Some(Timestamp::from_millis(t)),
                    )
                    .unwrap();
            }
            start.elapsed()
        });
    });
    group.finish();
}

criterion_group!(ingest, bench_write_without_rules, bench_synchronized_join);
criterion_main!(ingest);
