//! # RTC-01 Match Engine Benchmarks
//!
//! Claims to validate:
//! - `test` cost grows with the document's fields, not with the number of
//!   registered filters
//! - Re-registering an identical body only bumps a reference count
//!
//! Conditions:
//! - Up to 10,000 registered filters over a shared field vocabulary
//! - Negated clauses that match by absence

use criterion::{black_box, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::{json, Value};
use std::time::Duration;

use rtc_01_filter_engine::{FilterEngine, FilterEngineApi};

const CITIES: [&str; 8] = ["NYC", "LA", "SF", "BOS", "SEA", "CHI", "MIA", "DEN"];

/// Deterministic mix of term, range, negation and disjunction filters.
fn filter_bodies(count: usize, seed: u64) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let city = CITIES[rng.gen_range(0..CITIES.len())];
            let low = rng.gen_range(0..80);
            match i % 4 {
                0 => json!({"term": {"city": city}}),
                1 => json!({"and": [
                    {"term": {"city": city}},
                    {"range": {"age": {"gte": low, "lt": low + 10}}}
                ]}),
                2 => json!({"and": [
                    {"range": {"score": {"gt": rng.gen_range(0..1000)}}},
                    {"not": {"exists": format!("flag_{}", i % 50)}}
                ]}),
                _ => json!({"or": [
                    {"term": {"tag": format!("t{}", i)}},
                    {"term": {"city": city}}
                ]}),
            }
        })
        .collect()
}

fn documents(count: usize, seed: u64) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            json!({
                "city": CITIES[rng.gen_range(0..CITIES.len())],
                "age": rng.gen_range(0..90),
                "score": rng.gen_range(0..1000),
                "tag": format!("t{}", rng.gen_range(0..10_000)),
                format!("flag_{}", i % 50): true,
            })
        })
        .collect()
}

fn engine_with(count: usize) -> FilterEngine {
    let mut engine = FilterEngine::with_defaults();
    for body in filter_bodies(count, 7) {
        // Registration failures would only shrink the filter set.
        let _ = engine.register(&body);
    }
    engine
}

pub fn match_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("rtc-01/match");
    group.measurement_time(Duration::from_secs(10));

    let docs = documents(256, 11);
    for filters in [100, 1_000, 10_000] {
        let engine = engine_with(filters);
        group.throughput(Throughput::Elements(docs.len() as u64));
        group.bench_with_input(BenchmarkId::new("test_document", filters), &engine, |b, engine| {
            b.iter(|| {
                for doc in &docs {
                    black_box(engine.test(doc));
                }
            })
        });
    }
    group.finish();
}

pub fn registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("rtc-01/register");
    group.measurement_time(Duration::from_secs(5));

    let bodies = filter_bodies(1_000, 3);
    group.throughput(Throughput::Elements(bodies.len() as u64));
    group.bench_function("register_fresh", |b| {
        b.iter(|| {
            let mut engine = FilterEngine::with_defaults();
            for body in &bodies {
                black_box(engine.register(body).is_ok());
            }
        })
    });

    let mut engine = engine_with(1_000);
    group.bench_function("register_duplicate", |b| {
        b.iter(|| {
            for body in &bodies {
                if let Ok(registration) = engine.register(body) {
                    engine.release(&registration.filter_id);
                }
            }
        })
    });
    group.finish();
}

pub fn register_benchmarks(c: &mut Criterion) {
    match_throughput(c);
    registration(c);
}
