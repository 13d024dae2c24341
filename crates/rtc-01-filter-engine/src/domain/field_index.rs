//! Field Index
//!
//! Maps a field path and a document value to the conditions that value could
//! satisfy. Every live condition sits in exactly one entry of its field:
//!
//! | Operand | Entry |
//! |---------|-------|
//! | term | hash map keyed by the scalar |
//! | exists | one set per field |
//! | range | segment map over interval edges |
//! | geo | grid cell holding the shape's bounding box |
//! | regexp | one set per field, always scanned |
//!
//! Candidates may over-approximate (geo cells); the match engine re-runs the
//! matcher on each of them.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;
use tracing::debug;

use super::expression::Predicate;
use super::geo::{GeoPoint, GridCell};
use super::graph::ConditionId;
use super::operand::{Operand, RangeBounds};
use super::value::{numeric_value, Scalar};

/// A position on the number line between values.
///
/// `after == false` sits just before `value`, `after == true` just after it,
/// which encodes inclusive and exclusive bounds without special cases.
#[derive(Clone, Copy, Debug)]
struct Edge {
    value: f64,
    after: bool,
}

impl Edge {
    fn new(value: f64, after: bool) -> Self {
        Self { value: value + 0.0, after }
    }

    fn interval(bounds: &RangeBounds) -> (Edge, Edge) {
        let start = match bounds.lower {
            Some(b) => Edge::new(b.value, !b.inclusive),
            None => Edge::new(f64::NEG_INFINITY, false),
        };
        let end = match bounds.upper {
            Some(b) => Edge::new(b.value, b.inclusive),
            None => Edge::new(f64::INFINITY, true),
        };
        (start, end)
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Edge {}

impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then(self.after.cmp(&other.after))
    }
}

/// Interval index: each key owns the half-open span up to the next key.
#[derive(Debug, Default)]
pub struct RangeIndex {
    segments: BTreeMap<Edge, BTreeSet<ConditionId>>,
    intervals: HashMap<ConditionId, (Edge, Edge)>,
}

impl RangeIndex {
    /// Add an interval; empty intervals are refused.
    pub fn insert(&mut self, id: ConditionId, bounds: &RangeBounds) -> bool {
        let (start, end) = Edge::interval(bounds);
        if start >= end || self.intervals.contains_key(&id) {
            return false;
        }
        self.split(start);
        self.split(end);
        for (_, ids) in self.segments.range_mut(start..end) {
            ids.insert(id);
        }
        self.intervals.insert(id, (start, end));
        true
    }

    fn split(&mut self, at: Edge) {
        if self.segments.contains_key(&at) {
            return;
        }
        let inherited = self
            .segments
            .range(..at)
            .next_back()
            .map(|(_, ids)| ids.clone())
            .unwrap_or_default();
        self.segments.insert(at, inherited);
    }

    pub fn remove(&mut self, id: ConditionId) -> bool {
        let Some((start, end)) = self.intervals.remove(&id) else {
            return false;
        };
        for (_, ids) in self.segments.range_mut(start..end) {
            ids.remove(&id);
        }

        // Merge keys that no longer separate distinct sets.
        let keys: Vec<Edge> = self.segments.range(start..=end).map(|(k, _)| *k).collect();
        for key in keys {
            let redundant = {
                let current = &self.segments[&key];
                match self.segments.range(..key).next_back() {
                    Some((_, previous)) => previous == current,
                    None => current.is_empty(),
                }
            };
            if redundant {
                self.segments.remove(&key);
            }
        }
        true
    }

    /// Conditions whose interval contains `value`.
    pub fn lookup(&self, value: f64) -> Option<&BTreeSet<ConditionId>> {
        self.segments
            .range(..=Edge::new(value, false))
            .next_back()
            .map(|(_, ids)| ids)
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Number of segment boundaries currently stored.
    pub fn boundaries(&self) -> usize {
        self.segments.len()
    }
}

/// Entries of one field
#[derive(Debug, Default)]
struct FieldEntries {
    terms: HashMap<Scalar, BTreeSet<ConditionId>>,
    exists: BTreeSet<ConditionId>,
    ranges: RangeIndex,
    geo: HashMap<GridCell, BTreeSet<ConditionId>>,
    regexps: BTreeSet<ConditionId>,
}

impl FieldEntries {
    fn is_empty(&self) -> bool {
        self.terms.is_empty()
            && self.exists.is_empty()
            && self.ranges.is_empty()
            && self.geo.is_empty()
            && self.regexps.is_empty()
    }
}

/// The per-field index
#[derive(Debug)]
pub struct FieldIndex {
    fields: HashMap<String, FieldEntries>,
    geo_precision: u8,
}

impl FieldIndex {
    pub fn new(geo_precision: u8) -> Self {
        Self {
            fields: HashMap::new(),
            geo_precision,
        }
    }

    /// Add a condition under its field.
    pub fn index(&mut self, id: ConditionId, predicate: &Predicate) {
        let precision = self.geo_precision;
        let entries = self.fields.entry(predicate.field.clone()).or_default();
        match &predicate.operand {
            Operand::Term(scalar) => {
                entries.terms.entry(scalar.clone()).or_default().insert(id);
            }
            Operand::Exists => {
                entries.exists.insert(id);
            }
            Operand::Range(bounds) => {
                entries.ranges.insert(id, bounds);
            }
            Operand::Regexp(_) => {
                entries.regexps.insert(id);
            }
            geo => {
                if let Some(bbox) = geo.geo_bounds() {
                    let cell = GridCell::covering(&bbox, precision);
                    entries.geo.entry(cell).or_default().insert(id);
                }
            }
        }
        debug!(condition = id.0, field = %predicate.field, kind = ?predicate.operand.kind(), "Condition indexed");
    }

    /// Remove a condition; empty entries are pruned.
    pub fn unindex(&mut self, id: ConditionId, predicate: &Predicate) {
        let precision = self.geo_precision;
        let Some(entries) = self.fields.get_mut(&predicate.field) else {
            return;
        };
        match &predicate.operand {
            Operand::Term(scalar) => prune(&mut entries.terms, scalar, id),
            Operand::Exists => {
                entries.exists.remove(&id);
            }
            Operand::Range(_) => {
                entries.ranges.remove(id);
            }
            Operand::Regexp(_) => {
                entries.regexps.remove(&id);
            }
            geo => {
                if let Some(bbox) = geo.geo_bounds() {
                    prune(&mut entries.geo, &GridCell::covering(&bbox, precision), id);
                }
            }
        }
        if entries.is_empty() {
            self.fields.remove(&predicate.field);
        }
        debug!(condition = id.0, field = %predicate.field, "Condition unindexed");
    }

    /// Collect the conditions of `field` that `value` could satisfy.
    pub fn candidates(&self, field: &str, value: &Value, out: &mut Vec<ConditionId>) {
        let Some(entries) = self.fields.get(field) else {
            return;
        };

        if !entries.terms.is_empty() {
            for_each_scalar(value, |item| {
                if let Some(ids) = Scalar::from_json(item).and_then(|s| entries.terms.get(&s)) {
                    out.extend(ids);
                }
            });
        }

        if !value.is_null() {
            out.extend(&entries.exists);
        }

        if !entries.ranges.is_empty() {
            for_each_scalar(value, |item| {
                if let Some(ids) = numeric_value(item).and_then(|n| entries.ranges.lookup(n)) {
                    out.extend(ids);
                }
            });
        }

        if !entries.geo.is_empty() {
            let mut visit = |point: &GeoPoint| {
                for level in 0..=self.geo_precision {
                    if let Some(ids) = entries.geo.get(&GridCell::containing(point, level)) {
                        out.extend(ids);
                    }
                }
            };
            match GeoPoint::from_json(value) {
                Some(point) => visit(&point),
                None => {
                    if let Value::Array(items) = value {
                        items.iter().filter_map(GeoPoint::from_json).for_each(|p| visit(&p));
                    }
                }
            }
        }

        if matches!(value, Value::String(_) | Value::Array(_)) {
            out.extend(&entries.regexps);
        }
    }

    /// Number of indexed fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn prune<K: std::hash::Hash + Eq>(map: &mut HashMap<K, BTreeSet<ConditionId>>, key: &K, id: ConditionId) {
    if let Some(ids) = map.get_mut(key) {
        ids.remove(&id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}

fn for_each_scalar(value: &Value, mut f: impl FnMut(&Value)) {
    match value {
        Value::Array(items) => items.iter().for_each(f),
        other => f(other),
    }
}
