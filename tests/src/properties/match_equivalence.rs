//! # Match Equivalence
//!
//! For random filter sets and documents, `test_document` must return exactly
//! the rooms whose filter tree, evaluated directly, accepts the document.
//! Checked after subscriptions and again after a random subset of
//! unsubscriptions. Documents carry nulls, arrays, nested objects and points
//! in every accepted encoding, so the term, range, geo-cell and regexp
//! candidate paths are all compared against direct evaluation.

use proptest::prelude::*;
use serde_json::{json, Value};

/// Scalar fields; `n.a` lives inside the nested object `n`.
const FIELDS: [&str; 3] = ["a", "b", "n.a"];
/// Point fields.
const GEO_FIELDS: [&str; 2] = ["p", "n.p"];
/// Fields tested for presence, parents included.
const PRESENCE_FIELDS: [&str; 5] = ["a", "b", "n", "n.a", "p"];
const PATTERNS: [&str; 5] = ["^x", "y$", "^[xy]+$", "^1", "x|1"];

fn field() -> impl Strategy<Value = &'static str> {
    prop::sample::select(FIELDS.to_vec())
}

fn geo_field() -> impl Strategy<Value = &'static str> {
    prop::sample::select(GEO_FIELDS.to_vec())
}

fn presence_field() -> impl Strategy<Value = &'static str> {
    prop::sample::select(PRESENCE_FIELDS.to_vec())
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        (0i64..5).prop_map(|n| json!(n)),
        prop::sample::select(vec!["x", "y", "xy", "1"]).prop_map(|s| json!(s)),
        any::<bool>().prop_map(|b| json!(b)),
    ]
}

/// Degrees in [-10, 10], one decimal.
fn coordinate() -> impl Strategy<Value = f64> {
    (-100i32..=100).prop_map(|tenths| f64::from(tenths) / 10.0)
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        (field(), scalar()).prop_map(|(f, v)| json!({"term": {f: v}})),
        presence_field().prop_map(|f| json!({"exists": f})),
        presence_field().prop_map(|f| json!({"missing": f})),
        (field(), 0i64..5, 1i64..4).prop_map(|(f, lo, width)| json!({"range": {f: {"gte": lo, "lt": lo + width}}})),
        (field(), 0i64..5).prop_map(|(f, bound)| json!({"range": {f: {"gt": bound}}})),
        (field(), prop::collection::vec(scalar(), 1..3)).prop_map(|(f, values)| json!({"in": {f: values}})),
        (field(), prop::sample::select(PATTERNS.to_vec())).prop_map(|(f, pattern)| json!({"regexp": {f: pattern}})),
        (geo_field(), coordinate(), coordinate(), 10u32..1500).prop_map(|(f, lat, lon, km)| {
            json!({"geoDistance": {f: {"lat": lat, "lon": lon}, "distance": format!("{km}km")}})
        }),
        (geo_field(), coordinate(), coordinate(), 1i32..100, 1i32..100).prop_map(|(f, bottom, left, h, w)| {
            let top = bottom + f64::from(h) / 10.0;
            let right = left + f64::from(w) / 10.0;
            json!({"geoBoundingBox": {f: {"top": top, "left": left, "bottom": bottom, "right": right}}})
        }),
    ]
}

/// Random filter bodies up to three levels of `and` / `or` / `not`.
pub fn filter() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 12, 3, |inner| {
        prop_oneof![
            inner.clone().prop_map(|f| json!({"not": f})),
            prop::collection::vec(inner.clone(), 1..3).prop_map(|fs| json!({"and": fs})),
            prop::collection::vec(inner, 1..3).prop_map(|fs| json!({"or": fs})),
        ]
    })
}

/// Scalars, nulls and arrays of scalars.
fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => scalar(),
        1 => Just(Value::Null),
        1 => prop::collection::vec(scalar(), 0..3).prop_map(Value::from),
    ]
}

/// A point in any accepted encoding, several points, or something else.
fn point() -> impl Strategy<Value = Value> {
    let pair = || (coordinate(), coordinate());
    prop_oneof![
        pair().prop_map(|(lat, lon)| json!({"lat": lat, "lon": lon})),
        pair().prop_map(|(lat, lon)| json!([lat, lon])),
        pair().prop_map(|(lat, lon)| json!(format!("{lat},{lon}"))),
        prop::collection::vec(pair().prop_map(|(lat, lon)| json!({"lat": lat, "lon": lon})), 1..3)
            .prop_map(Value::from),
        scalar(),
        Just(Value::Null),
    ]
}

/// Optional entry of a document object.
fn slot<S: Strategy<Value = Value>>(strategy: S) -> impl Strategy<Value = Option<Value>> {
    prop::option::of(strategy)
}

/// Random documents over the same fields, with a nested object `n`.
pub fn document() -> impl Strategy<Value = Value> {
    (
        slot(value()),
        slot(value()),
        slot(point()),
        prop::option::of((slot(value()), slot(point()))),
    )
        .prop_map(|(a, b, p, nested)| {
            fn put(object: &mut serde_json::Map<String, Value>, key: &str, value: Option<Value>) {
                if let Some(value) = value {
                    object.insert(key.to_string(), value);
                }
            }

            let mut document = serde_json::Map::new();
            put(&mut document, "a", a);
            put(&mut document, "b", b);
            put(&mut document, "p", p);
            if let Some((na, np)) = nested {
                let mut inner = serde_json::Map::new();
                put(&mut inner, "a", na);
                put(&mut inner, "p", np);
                document.insert("n".to_string(), Value::Object(inner));
            }
            Value::Object(document)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use rtc_01_filter_engine::FilterExpr;
    use rtc_02_room_registry::{RoomRegistry, RoomRegistryApi};
    use shared_types::{ConnectionId, NodeId, RoomId, Subscriber};

    struct Subscribed {
        room: RoomId,
        expr: FilterExpr,
        subscriber: Subscriber,
    }

    /// Subscribe every compilable body on its own connection.
    fn subscribe_all(registry: &RoomRegistry, bodies: &[Value]) -> Vec<Subscribed> {
        let config = registry.config().clone();
        bodies
            .iter()
            .enumerate()
            .filter_map(|(i, body)| {
                // Bodies over the expansion bound are rejected outright.
                let filter = registry.compile(body).ok()?;
                let expr = FilterExpr::parse(body, &config).ok()?;
                let subscriber = Subscriber::new(NodeId::new("n1"), ConnectionId::new(format!("c{i}")));
                registry.subscribe_normalized(&filter, subscriber.clone());
                Some(Subscribed {
                    room: RoomId::for_filter(&filter.id),
                    expr,
                    subscriber,
                })
            })
            .collect()
    }

    fn brute_force(subscribed: &[Subscribed], document: &Value) -> BTreeSet<RoomId> {
        subscribed
            .iter()
            .filter(|s| s.expr.evaluate(document))
            .map(|s| s.room.clone())
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn test_index_agrees_with_direct_evaluation(
            bodies in prop::collection::vec(filter(), 1..8),
            documents in prop::collection::vec(document(), 1..8),
        ) {
            let registry = RoomRegistry::with_defaults();
            let subscribed = subscribe_all(&registry, &bodies);

            for document in &documents {
                prop_assert_eq!(registry.test_document(document), brute_force(&subscribed, document));
            }
        }

        #[test]
        fn test_normal_form_preserves_meaning(
            body in filter(),
            documents in prop::collection::vec(document(), 1..8),
        ) {
            let registry = RoomRegistry::with_defaults();
            let Ok(filter) = registry.compile(&body) else {
                return Ok(());
            };
            let expr = FilterExpr::parse(&body, registry.config()).unwrap();

            for document in &documents {
                prop_assert_eq!(filter.evaluate(document), expr.evaluate(document));
            }
        }

        #[test]
        fn test_index_agrees_after_unsubscriptions(
            bodies in prop::collection::vec(filter(), 1..8),
            removed in prop::collection::vec(any::<bool>(), 8),
            documents in prop::collection::vec(document(), 1..8),
        ) {
            let registry = RoomRegistry::with_defaults();
            let subscribed = subscribe_all(&registry, &bodies);

            let (gone, kept): (Vec<_>, Vec<_>) = subscribed
                .into_iter()
                .enumerate()
                .partition(|(i, _)| removed[*i]);
            for (_, s) in &gone {
                registry.unsubscribe(&s.room, &s.subscriber);
            }
            let kept: Vec<Subscribed> = kept.into_iter().map(|(_, s)| s).collect();

            for document in &documents {
                prop_assert_eq!(registry.test_document(document), brute_force(&kept, document));
            }
            if kept.is_empty() {
                prop_assert_eq!(registry.condition_count(), 0);
            }
        }
    }
}
