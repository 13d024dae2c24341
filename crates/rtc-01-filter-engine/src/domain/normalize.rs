//! Normalization
//!
//! Turns a `FilterExpr` into a canonical disjunctive normal form:
//!
//! 1. Negations are pushed down to the predicates (De Morgan); double
//!    negations cancel.
//! 2. The tree is expanded into an OR of AND-clauses, bounded by
//!    `max_expansion`.
//! 3. Literals are sorted and deduplicated per clause, contradictory clauses
//!    (`x AND NOT x`) are dropped, and clauses are sorted and deduplicated.
//!
//! The canonical JSON rendering of the result identifies the filter: its
//! SHA-256 prefix is the `FilterId`, so identical filters compiled on
//! different nodes share one id.

use std::cmp::Ordering;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use shared_types::FilterId;

use super::config::EngineConfig;
use super::expression::{FilterExpr, Predicate};
use crate::error::FilterError;

/// Canonical rendering of the filter that matches everything.
pub const MATCH_ALL: &str = "{}";

/// Canonical rendering of the filter that matches nothing.
pub const MATCH_NONE: &str = r#"{"not":{}}"#;

/// Number of digest bytes kept in a `FilterId`.
const FILTER_ID_BYTES: usize = 16;

/// A predicate, possibly negated
#[derive(Clone, Debug)]
pub struct Literal {
    pub key: String,
    pub predicate: Predicate,
    pub negated: bool,
}

impl Literal {
    fn new(predicate: Predicate, negated: bool) -> Self {
        Self {
            key: predicate.key(),
            predicate,
            negated,
        }
    }

    fn to_dsl(&self) -> Value {
        let clause = self.predicate.to_dsl();
        if self.negated {
            json!({ "not": clause })
        } else {
            clause
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Literal {}

impl PartialOrd for Literal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Literal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then(self.negated.cmp(&other.negated))
    }
}

/// Filter in canonical DNF
#[derive(Clone, Debug)]
pub struct NormalizedFilter {
    pub id: FilterId,
    pub canonical: String,
    /// OR of AND-clauses; empty means never-match, one empty clause means match-all.
    pub clauses: Vec<Vec<Literal>>,
}

impl NormalizedFilter {
    /// Whether the filter matches every document.
    pub fn is_match_all(&self) -> bool {
        self.clauses.iter().any(Vec::is_empty)
    }

    /// Direct evaluation of the DNF.
    pub fn evaluate(&self, document: &Value) -> bool {
        self.clauses.iter().any(|clause| {
            clause
                .iter()
                .all(|lit| lit.predicate.evaluate(document) != lit.negated)
        })
    }
}

/// Content-addressed id of a canonical rendering.
pub fn filter_id(canonical: &str) -> FilterId {
    let digest = Sha256::digest(canonical.as_bytes());
    FilterId::new(hex::encode(&digest[..FILTER_ID_BYTES]))
}

/// Normalize an expression.
pub fn normalize(expr: &FilterExpr, config: &EngineConfig) -> Result<NormalizedFilter, FilterError> {
    let nnf = push_negations(expr, false);
    let clauses = canonical_clauses(expand(nnf, config.max_expansion)?);
    let canonical = render(&clauses);
    Ok(NormalizedFilter {
        id: filter_id(&canonical),
        canonical,
        clauses,
    })
}

/// Negation normal form
enum Nnf {
    True,
    False,
    Literal(Literal),
    And(Vec<Nnf>),
    Or(Vec<Nnf>),
}

fn push_negations(expr: &FilterExpr, negated: bool) -> Nnf {
    match expr {
        FilterExpr::MatchAll if negated => Nnf::False,
        FilterExpr::MatchAll => Nnf::True,
        FilterExpr::Predicate(p) => Nnf::Literal(Literal::new(p.clone(), negated)),
        FilterExpr::Not(inner) => push_negations(inner, !negated),
        FilterExpr::And(items) => {
            let items = items.iter().map(|e| push_negations(e, negated)).collect();
            if negated { Nnf::Or(items) } else { Nnf::And(items) }
        }
        FilterExpr::Or(items) => {
            let items = items.iter().map(|e| push_negations(e, negated)).collect();
            if negated { Nnf::And(items) } else { Nnf::Or(items) }
        }
    }
}

fn too_complex(clauses: usize, max: usize) -> FilterError {
    FilterError::FilterTooComplex { clauses, max }
}

fn expand(nnf: Nnf, max: usize) -> Result<Vec<Vec<Literal>>, FilterError> {
    match nnf {
        Nnf::True => Ok(vec![Vec::new()]),
        Nnf::False => Ok(Vec::new()),
        Nnf::Literal(lit) => Ok(vec![vec![lit]]),
        Nnf::Or(items) => {
            let mut clauses = Vec::new();
            for item in items {
                clauses.extend(expand(item, max)?);
                if clauses.len() > max {
                    return Err(too_complex(clauses.len(), max));
                }
            }
            Ok(clauses)
        }
        Nnf::And(items) => {
            let mut acc: Vec<Vec<Literal>> = vec![Vec::new()];
            for item in items {
                let rhs = expand(item, max)?;
                let product = acc.len().saturating_mul(rhs.len());
                if product > max {
                    return Err(too_complex(product, max));
                }
                let mut next = Vec::with_capacity(product);
                for left in &acc {
                    for right in &rhs {
                        if left.len() + right.len() > max {
                            return Err(too_complex(product, max));
                        }
                        let mut clause = left.clone();
                        clause.extend(right.iter().cloned());
                        next.push(clause);
                    }
                }
                acc = next;
            }
            Ok(acc)
        }
    }
}

fn canonical_clauses(clauses: Vec<Vec<Literal>>) -> Vec<Vec<Literal>> {
    let mut out: Vec<Vec<Literal>> = Vec::with_capacity(clauses.len());
    for mut clause in clauses {
        clause.sort();
        clause.dedup();
        let contradictory = clause.windows(2).any(|pair| pair[0].key == pair[1].key);
        if contradictory {
            continue;
        }
        if clause.is_empty() {
            return vec![Vec::new()];
        }
        out.push(clause);
    }
    out.sort();
    out.dedup();
    out
}

fn render(clauses: &[Vec<Literal>]) -> String {
    match clauses {
        [] => MATCH_NONE.to_string(),
        [only] if only.is_empty() => MATCH_ALL.to_string(),
        _ => {
            let ors: Vec<Value> = clauses
                .iter()
                .map(|clause| json!({ "and": clause.iter().map(Literal::to_dsl).collect::<Vec<_>>() }))
                .collect();
            json!({ "or": ors }).to_string()
        }
    }
}
