//! Filter expressions
//!
//! Parses a JSON filter body into a `FilterExpr` tree and evaluates that tree
//! directly against a document. Direct evaluation is the reference semantics
//! the indexed match engine must agree with.

use serde_json::Value;

use super::config::EngineConfig;
use super::geo::{parse_distance, BoundingBox, GeoPoint};
use super::operand::{Operand, RangeBound, RangeBounds, RegexOperand};
use super::value::{lookup, numeric_value, Scalar};
use crate::error::FilterError;

/// Deepest accepted nesting of composite clauses.
pub const MAX_NESTING: usize = 64;

/// One condition: an operand applied to a field path.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub operand: Operand,
}

impl Predicate {
    pub fn new(field: impl Into<String>, operand: Operand) -> Self {
        Self {
            field: field.into(),
            operand,
        }
    }

    /// Structural identity: the canonical DSL clause serialized with sorted keys.
    pub fn key(&self) -> String {
        self.to_dsl().to_string()
    }

    /// Canonical DSL clause.
    pub fn to_dsl(&self) -> Value {
        self.operand.to_dsl(&self.field)
    }

    /// Evaluate against a whole document.
    pub fn evaluate(&self, document: &Value) -> bool {
        self.operand.matches(lookup(document, &self.field))
    }
}

/// Parsed boolean filter tree
#[derive(Clone, Debug, PartialEq)]
pub enum FilterExpr {
    /// `{}`: matches every document
    MatchAll,
    Predicate(Predicate),
    Not(Box<FilterExpr>),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    /// Parse a filter body.
    pub fn parse(body: &Value, config: &EngineConfig) -> Result<Self, FilterError> {
        Parser { config }.clause(body, 0)
    }

    /// Evaluate the tree directly against a document.
    pub fn evaluate(&self, document: &Value) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Predicate(p) => p.evaluate(document),
            Self::Not(inner) => !inner.evaluate(document),
            Self::And(items) => items.iter().all(|e| e.evaluate(document)),
            Self::Or(items) => items.iter().any(|e| e.evaluate(document)),
        }
    }

    fn predicate(field: String, operand: Operand) -> Self {
        Self::Predicate(Predicate { field, operand })
    }
}

struct Parser<'a> {
    config: &'a EngineConfig,
}

impl Parser<'_> {
    fn clause(&self, body: &Value, depth: usize) -> Result<FilterExpr, FilterError> {
        if depth > MAX_NESTING {
            return Err(FilterError::malformed(format!(
                "filter nested deeper than {MAX_NESTING} levels"
            )));
        }
        let object = body
            .as_object()
            .ok_or_else(|| FilterError::malformed("a filter clause must be an object"))?;

        let mut entries = object.iter();
        let (name, args) = match (entries.next(), entries.next()) {
            (None, _) => return Ok(FilterExpr::MatchAll),
            (Some(entry), None) => entry,
            (Some(_), Some(_)) => {
                return Err(FilterError::malformed(
                    "a filter clause must have exactly one keyword",
                ))
            }
        };

        match name.as_str() {
            "and" => Ok(FilterExpr::And(self.clause_list(name, args, depth)?)),
            "or" => Ok(FilterExpr::Or(self.clause_list(name, args, depth)?)),
            "not" => Ok(FilterExpr::Not(Box::new(self.clause(args, depth + 1)?))),
            "bool" => self.bool_clause(args, depth),
            "term" | "equals" => {
                let (field, value) = single_field(name, args)?;
                let scalar = Scalar::from_json(value).ok_or_else(|| {
                    FilterError::malformed(format!("{name}: value must be a string, number or boolean"))
                })?;
                Ok(FilterExpr::predicate(field, Operand::Term(scalar)))
            }
            "in" => {
                let (field, value) = single_field(name, args)?;
                let values = value
                    .as_array()
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| FilterError::malformed("in: expected a non-empty array"))?;
                let terms = values
                    .iter()
                    .map(|v| {
                        Scalar::from_json(v)
                            .map(|s| FilterExpr::predicate(field.clone(), Operand::Term(s)))
                            .ok_or_else(|| FilterError::malformed("in: values must be scalars"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FilterExpr::Or(terms))
            }
            "exists" => Ok(FilterExpr::predicate(exists_field(name, args)?, Operand::Exists)),
            "missing" => Ok(FilterExpr::Not(Box::new(FilterExpr::predicate(
                exists_field(name, args)?,
                Operand::Exists,
            )))),
            "range" => {
                let (field, value) = single_field(name, args)?;
                Ok(FilterExpr::predicate(field, Operand::Range(range_bounds(value)?)))
            }
            "geoBoundingBox" => {
                let (field, value) = single_field(name, args)?;
                Ok(FilterExpr::predicate(field, Operand::GeoBoundingBox(bounding_box(value)?)))
            }
            "geoDistance" => {
                let mut params = named_params(name, args, &["distance"])?;
                let distance = params
                    .remove("distance")
                    .and_then(parse_distance)
                    .ok_or_else(|| FilterError::malformed("geoDistance: invalid distance"))?;
                let (field, center) = params.into_point(name)?;
                Ok(FilterExpr::predicate(field, Operand::GeoDistance { center, distance }))
            }
            "geoDistanceRange" => {
                let mut params = named_params(name, args, &["from", "to"])?;
                let from = params.remove("from").and_then(parse_distance);
                let to = params.remove("to").and_then(parse_distance);
                let (Some(from), Some(to)) = (from, to) else {
                    return Err(FilterError::malformed(
                        "geoDistanceRange: 'from' and 'to' must be distances",
                    ));
                };
                if from >= to {
                    return Err(FilterError::malformed(
                        "geoDistanceRange: 'from' must be lower than 'to'",
                    ));
                }
                let (field, center) = params.into_point(name)?;
                Ok(FilterExpr::predicate(field, Operand::GeoDistanceRange { center, from, to }))
            }
            "geoPolygon" => {
                let (field, value) = single_field(name, args)?;
                let points = value
                    .get("points")
                    .and_then(Value::as_array)
                    .ok_or_else(|| FilterError::malformed("geoPolygon: expected 'points' array"))?;
                let points = points
                    .iter()
                    .map(|p| {
                        GeoPoint::from_json(p)
                            .ok_or_else(|| FilterError::malformed("geoPolygon: invalid point"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if points.len() < 3 {
                    return Err(FilterError::malformed(
                        "geoPolygon: at least 3 points are required",
                    ));
                }
                Ok(FilterExpr::predicate(field, Operand::GeoPolygon(points)))
            }
            "regexp" => {
                let (field, value) = single_field(name, args)?;
                let (pattern, flags) = match value {
                    Value::String(p) => (p.as_str(), ""),
                    Value::Object(spec) => {
                        let pattern = spec
                            .get("value")
                            .and_then(Value::as_str)
                            .ok_or_else(|| FilterError::malformed("regexp: missing 'value'"))?;
                        let flags = match spec.get("flags") {
                            None => "",
                            Some(Value::String(f)) => f.as_str(),
                            Some(_) => return Err(FilterError::malformed("regexp: 'flags' must be a string")),
                        };
                        (pattern, flags)
                    }
                    _ => return Err(FilterError::malformed("regexp: expected a pattern")),
                };
                if pattern.len() > self.config.max_regex_len {
                    return Err(FilterError::malformed(format!(
                        "regexp: pattern longer than {} bytes",
                        self.config.max_regex_len
                    )));
                }
                Ok(FilterExpr::predicate(field, Operand::Regexp(RegexOperand::compile(pattern, flags)?)))
            }
            other => Err(FilterError::malformed(format!("unknown keyword '{other}'"))),
        }
    }

    fn clause_list(&self, name: &str, args: &Value, depth: usize) -> Result<Vec<FilterExpr>, FilterError> {
        let items = args
            .as_array()
            .filter(|items| !items.is_empty())
            .ok_or_else(|| FilterError::malformed(format!("{name}: expected a non-empty array")))?;
        items.iter().map(|item| self.clause(item, depth + 1)).collect()
    }

    fn bool_clause(&self, args: &Value, depth: usize) -> Result<FilterExpr, FilterError> {
        let object = args
            .as_object()
            .ok_or_else(|| FilterError::malformed("bool: expected an object"))?;

        let mut must = Vec::new();
        let mut should = Vec::new();
        for (occurrence, value) in object {
            let clauses = match value {
                Value::Array(items) => items
                    .iter()
                    .map(|item| self.clause(item, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?,
                Value::Object(_) => vec![self.clause(value, depth + 1)?],
                _ => return Err(FilterError::malformed(format!("bool.{occurrence}: expected clauses"))),
            };
            match occurrence.as_str() {
                "must" => must.extend(clauses),
                "must_not" => must.extend(clauses.into_iter().map(|c| FilterExpr::Not(Box::new(c)))),
                "should" => should.extend(clauses),
                "should_not" => should.extend(clauses.into_iter().map(|c| FilterExpr::Not(Box::new(c)))),
                other => return Err(FilterError::malformed(format!("bool: unknown occurrence '{other}'"))),
            }
        }

        if !should.is_empty() {
            must.push(FilterExpr::Or(should));
        }
        Ok(match must.len() {
            0 => FilterExpr::MatchAll,
            _ => FilterExpr::And(must),
        })
    }
}

/// `{"<field>": value}` with exactly one entry.
fn single_field<'v>(name: &str, args: &'v Value) -> Result<(String, &'v Value), FilterError> {
    let object = args
        .as_object()
        .ok_or_else(|| FilterError::malformed(format!("{name}: expected an object")))?;
    let mut entries = object.iter();
    match (entries.next(), entries.next()) {
        (Some((field, value)), None) => Ok((checked_field(name, field)?, value)),
        _ => Err(FilterError::malformed(format!("{name}: expected exactly one field"))),
    }
}

fn exists_field(name: &str, args: &Value) -> Result<String, FilterError> {
    match args {
        Value::String(field) => checked_field(name, field),
        Value::Object(object) => match object.get("field") {
            Some(Value::String(field)) if object.len() == 1 => checked_field(name, field),
            _ => Err(FilterError::malformed(format!("{name}: expected {{\"field\": <name>}}"))),
        },
        _ => Err(FilterError::malformed(format!("{name}: expected a field name"))),
    }
}

fn checked_field(name: &str, field: &str) -> Result<String, FilterError> {
    if field.is_empty() {
        return Err(FilterError::malformed(format!("{name}: empty field name")));
    }
    Ok(field.to_string())
}

fn named_params<'v>(name: &str, args: &'v Value, keys: &[&str]) -> Result<Params<'v>, FilterError> {
    let object = args
        .as_object()
        .ok_or_else(|| FilterError::malformed(format!("{name}: expected an object")))?;
    let mut named = Vec::new();
    let mut fields = Vec::new();
    for (key, value) in object {
        if keys.contains(&key.as_str()) {
            named.push((key.as_str(), value));
        } else {
            fields.push((key.as_str(), value));
        }
    }
    Ok(Params { named, fields })
}

/// Clause arguments holding named parameters plus exactly one field entry.
struct Params<'v> {
    named: Vec<(&'v str, &'v Value)>,
    fields: Vec<(&'v str, &'v Value)>,
}

impl<'v> Params<'v> {
    fn remove(&mut self, key: &str) -> Option<&'v Value> {
        let pos = self.named.iter().position(|(k, _)| *k == key)?;
        Some(self.named.swap_remove(pos).1)
    }

    fn into_point(self, name: &str) -> Result<(String, GeoPoint), FilterError> {
        match self.fields.as_slice() {
            [(field, value)] => {
                let point = GeoPoint::from_json(value)
                    .ok_or_else(|| FilterError::malformed(format!("{name}: invalid point")))?;
                Ok((checked_field(name, field)?, point))
            }
            _ => Err(FilterError::malformed(format!("{name}: expected exactly one field"))),
        }
    }
}

fn range_bounds(spec: &Value) -> Result<RangeBounds, FilterError> {
    let object = spec
        .as_object()
        .filter(|o| !o.is_empty())
        .ok_or_else(|| FilterError::malformed("range: expected at least one bound"))?;

    let mut bounds = RangeBounds { lower: None, upper: None };
    for (key, raw) in object {
        let value = numeric_value(raw).ok_or_else(|| {
            FilterError::malformed(format!("range.{key}: expected a number or an RFC 3339 date"))
        })?;
        let (slot, inclusive) = match key.as_str() {
            "gte" | "from" => (&mut bounds.lower, true),
            "gt" => (&mut bounds.lower, false),
            "lte" => (&mut bounds.upper, true),
            "lt" | "to" => (&mut bounds.upper, false),
            other => return Err(FilterError::malformed(format!("range: unknown bound '{other}'"))),
        };
        if slot.is_some() {
            return Err(FilterError::malformed(format!("range: conflicting bound '{key}'")));
        }
        *slot = Some(RangeBound { value: value + 0.0, inclusive });
    }

    if bounds.is_empty() {
        return Err(FilterError::malformed("range: lower bound is not below upper bound"));
    }
    Ok(bounds)
}

fn bounding_box(spec: &Value) -> Result<BoundingBox, FilterError> {
    let object = spec
        .as_object()
        .ok_or_else(|| FilterError::malformed("geoBoundingBox: expected an object"))?;

    let corners = (
        object.get("topLeft").or_else(|| object.get("top_left")),
        object.get("bottomRight").or_else(|| object.get("bottom_right")),
    );
    let bbox = match corners {
        (Some(tl), Some(br)) => {
            let (Some(tl), Some(br)) = (GeoPoint::from_json(tl), GeoPoint::from_json(br)) else {
                return Err(FilterError::malformed("geoBoundingBox: invalid corner"));
            };
            BoundingBox { top: tl.lat, left: tl.lon, bottom: br.lat, right: br.lon }
        }
        _ => {
            let side = |key: &str| {
                object
                    .get(key)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| FilterError::malformed(format!("geoBoundingBox: missing '{key}'")))
            };
            BoundingBox {
                top: side("top")?,
                left: side("left")?,
                bottom: side("bottom")?,
                right: side("right")?,
            }
        }
    };

    let corners_valid = GeoPoint::new(bbox.top, bbox.left).is_some()
        && GeoPoint::new(bbox.bottom, bbox.right).is_some();
    if !corners_valid || bbox.top < bbox.bottom {
        return Err(FilterError::malformed("geoBoundingBox: invalid coordinates"));
    }
    Ok(bbox)
}
