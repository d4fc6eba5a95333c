use chrono::{Days, NaiveDate};
use criterion::{criterion_group, criterion_main, Criterion};
use itinerary_sync::models::{Activity, ChangeEvent, Itinerary};
use itinerary_sync::services::{bucketize, RecordStore};
use rust_decimal::Decimal;
use std::hint::black_box;

fn fixture(days: u64, per_day: u64) -> (Itinerary, Vec<Activity>) {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
    let trip = Itinerary {
        id: "t1".to_string(),
        user_id: "u1".to_string(),
        title: "Long trip".to_string(),
        description: None,
        start_date: start,
        end_date: start + Days::new(days - 1),
        budget: None,
        created_at: None,
    };

    let activities = (0..days * per_day)
        .map(|i| Activity {
            id: format!("a{:06}", i),
            itinerary_id: "t1".to_string(),
            name: format!("Activity {}", i),
            cost: Decimal::new((i as i64 * 137) % 50_000, 2),
            // Every tenth activity lands after the trip.
            date: start + Days::new(if i % 10 == 0 { days + 1 } else { i % days }),
            created_at: None,
        })
        .collect();

    (trip, activities)
}

fn benchmark_bucketize(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucketize");

    for (days, per_day) in [(7, 5), (90, 20), (365, 50)] {
        let (trip, activities) = fixture(days, per_day);
        group.bench_function(format!("{}_days_x_{}", days, per_day), |b| {
            b.iter(|| bucketize(black_box(&trip), black_box(&activities)))
        });
    }

    group.finish();
}

fn benchmark_apply_change(c: &mut Criterion) {
    let (_, activities) = fixture(365, 20);

    c.bench_function("store_replay_inserts", |b| {
        b.iter(|| {
            let mut store = RecordStore::new();
            for a in &activities {
                store.apply_change(ChangeEvent::Insert(black_box(a.clone())));
            }
            store.len()
        })
    });
}

criterion_group!(benches, benchmark_bucketize, benchmark_apply_change);
criterion_main!(benches);
