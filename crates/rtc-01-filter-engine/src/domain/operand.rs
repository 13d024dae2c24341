//! Operand matchers
//!
//! One primitive condition evaluated against one field value. Operands are a
//! closed enum; `OperandKind::matcher` is the dispatch table, so adding a kind
//! without a matcher fails to compile.
//!
//! RULES:
//! - Matchers are pure and never fail
//! - Missing or incompatible values yield `false`

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::geo::{polygon_contains, BoundingBox, GeoPoint};
use super::value::{any_element, numeric_value, Scalar};
use crate::error::FilterError;

/// Operand discriminant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperandKind {
    Term,
    Exists,
    Range,
    GeoBoundingBox,
    GeoDistance,
    GeoDistanceRange,
    GeoPolygon,
    Regexp,
}

/// Signature shared by every matcher in the dispatch table
pub type MatcherFn = fn(&Operand, &Value) -> bool;

impl OperandKind {
    /// Matcher for this kind
    pub fn matcher(self) -> MatcherFn {
        match self {
            Self::Term => match_term,
            Self::Exists => match_exists,
            Self::Range => match_range,
            Self::GeoBoundingBox => match_geo_bounding_box,
            Self::GeoDistance => match_geo_distance,
            Self::GeoDistanceRange => match_geo_distance_range,
            Self::GeoPolygon => match_geo_polygon,
            Self::Regexp => match_regexp,
        }
    }

    /// Whether matching requires a geo point
    pub fn is_geo(self) -> bool {
        matches!(
            self,
            Self::GeoBoundingBox | Self::GeoDistance | Self::GeoDistanceRange | Self::GeoPolygon
        )
    }
}

/// One side of a range
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeBound {
    pub value: f64,
    pub inclusive: bool,
}

/// Numeric/date interval; `None` means unbounded on that side
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RangeBounds {
    pub lower: Option<RangeBound>,
    pub upper: Option<RangeBound>,
}

impl RangeBounds {
    /// Whether `v` falls inside the interval
    pub fn contains(&self, v: f64) -> bool {
        let above = match self.lower {
            Some(b) if b.inclusive => v >= b.value,
            Some(b) => v > b.value,
            None => true,
        };
        let below = match self.upper {
            Some(b) if b.inclusive => v <= b.value,
            Some(b) => v < b.value,
            None => true,
        };
        above && below
    }

    /// Whether no value can satisfy both bounds
    pub fn is_empty(&self) -> bool {
        match (self.lower, self.upper) {
            (Some(lo), Some(hi)) => {
                lo.value > hi.value || (lo.value == hi.value && !(lo.inclusive && hi.inclusive))
            }
            _ => false,
        }
    }
}

/// Compiled regular expression with its source kept for canonical output
#[derive(Clone, Debug)]
pub struct RegexOperand {
    pub pattern: String,
    pub flags: String,
    regex: Regex,
}

impl RegexOperand {
    /// Compile a pattern; supported flags are `i`, `m`, `s` and `x`.
    pub fn compile(pattern: &str, flags: &str) -> Result<Self, FilterError> {
        let mut builder = RegexBuilder::new(pattern);
        let mut normalized: Vec<char> = flags.chars().collect();
        normalized.sort_unstable();
        normalized.dedup();
        for flag in &normalized {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                other => {
                    return Err(FilterError::malformed(format!(
                        "regexp: unsupported flag '{other}'"
                    )))
                }
            };
        }
        let regex = builder
            .build()
            .map_err(|e| FilterError::malformed(format!("regexp: {e}")))?;
        Ok(Self {
            pattern: pattern.to_string(),
            flags: normalized.into_iter().collect(),
            regex,
        })
    }

    /// Test a string
    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

impl PartialEq for RegexOperand {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.flags == other.flags
    }
}

/// A primitive condition's parameters
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Term(Scalar),
    Exists,
    Range(RangeBounds),
    GeoBoundingBox(BoundingBox),
    GeoDistance { center: GeoPoint, distance: f64 },
    GeoDistanceRange { center: GeoPoint, from: f64, to: f64 },
    GeoPolygon(Vec<GeoPoint>),
    Regexp(RegexOperand),
}

impl Operand {
    /// Discriminant
    pub fn kind(&self) -> OperandKind {
        match self {
            Self::Term(_) => OperandKind::Term,
            Self::Exists => OperandKind::Exists,
            Self::Range(_) => OperandKind::Range,
            Self::GeoBoundingBox(_) => OperandKind::GeoBoundingBox,
            Self::GeoDistance { .. } => OperandKind::GeoDistance,
            Self::GeoDistanceRange { .. } => OperandKind::GeoDistanceRange,
            Self::GeoPolygon(_) => OperandKind::GeoPolygon,
            Self::Regexp(_) => OperandKind::Regexp,
        }
    }

    /// Evaluate against a field value; an absent field never matches.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match value {
            Some(value) => (self.kind().matcher())(self, value),
            None => false,
        }
    }

    /// Bounding box of a geo shape
    pub fn geo_bounds(&self) -> Option<BoundingBox> {
        match self {
            Self::GeoBoundingBox(bbox) => Some(*bbox),
            Self::GeoDistance { center, distance } => Some(BoundingBox::around(center, *distance)),
            Self::GeoDistanceRange { center, to, .. } => Some(BoundingBox::around(center, *to)),
            Self::GeoPolygon(points) => Some(BoundingBox::enclosing(points)),
            _ => None,
        }
    }

    /// Canonical DSL clause for `field`
    pub fn to_dsl(&self, field: &str) -> Value {
        match self {
            Self::Term(scalar) => json!({"term": {field: scalar.to_json()}}),
            Self::Exists => json!({"exists": field}),
            Self::Range(bounds) => {
                let mut spec = serde_json::Map::new();
                if let Some(b) = bounds.lower {
                    spec.insert(if b.inclusive { "gte" } else { "gt" }.into(), json!(b.value));
                }
                if let Some(b) = bounds.upper {
                    spec.insert(if b.inclusive { "lte" } else { "lt" }.into(), json!(b.value));
                }
                json!({"range": {field: spec}})
            }
            Self::GeoBoundingBox(b) => json!({"geoBoundingBox": {field: {
                "top": b.top, "left": b.left, "bottom": b.bottom, "right": b.right
            }}}),
            Self::GeoDistance { center, distance } => {
                json!({"geoDistance": {field: center.to_json(), "distance": distance}})
            }
            Self::GeoDistanceRange { center, from, to } => {
                json!({"geoDistanceRange": {field: center.to_json(), "from": from, "to": to}})
            }
            Self::GeoPolygon(points) => {
                let points: Vec<Value> = points.iter().map(GeoPoint::to_json).collect();
                json!({"geoPolygon": {field: {"points": points}}})
            }
            Self::Regexp(re) => json!({"regexp": {field: {"value": re.pattern, "flags": re.flags}}}),
        }
    }
}

fn match_term(operand: &Operand, value: &Value) -> bool {
    let Operand::Term(expected) = operand else {
        return false;
    };
    any_element(value, |v| expected.matches(v))
}

fn match_exists(_operand: &Operand, value: &Value) -> bool {
    !value.is_null()
}

fn match_range(operand: &Operand, value: &Value) -> bool {
    let Operand::Range(bounds) = operand else {
        return false;
    };
    any_element(value, |v| numeric_value(v).is_some_and(|n| bounds.contains(n)))
}

/// Points carried by a field: the value itself, else each array element.
fn with_points(value: &Value, test: impl Fn(&GeoPoint) -> bool) -> bool {
    if let Some(point) = GeoPoint::from_json(value) {
        return test(&point);
    }
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(GeoPoint::from_json)
            .any(|p| test(&p)),
        _ => false,
    }
}

fn match_geo_bounding_box(operand: &Operand, value: &Value) -> bool {
    let Operand::GeoBoundingBox(bbox) = operand else {
        return false;
    };
    with_points(value, |p| bbox.contains(p))
}

fn match_geo_distance(operand: &Operand, value: &Value) -> bool {
    let Operand::GeoDistance { center, distance } = operand else {
        return false;
    };
    with_points(value, |p| center.distance_m(p) <= *distance)
}

fn match_geo_distance_range(operand: &Operand, value: &Value) -> bool {
    let Operand::GeoDistanceRange { center, from, to } = operand else {
        return false;
    };
    with_points(value, |p| {
        let d = center.distance_m(p);
        d >= *from && d < *to
    })
}

fn match_geo_polygon(operand: &Operand, value: &Value) -> bool {
    let Operand::GeoPolygon(vertices) = operand else {
        return false;
    };
    with_points(value, |p| polygon_contains(vertices, p))
}

fn match_regexp(operand: &Operand, value: &Value) -> bool {
    let Operand::Regexp(re) = operand else {
        return false;
    };
    any_element(value, |v| v.as_str().is_some_and(|s| re.is_match(s)))
}
