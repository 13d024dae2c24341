//! Condition / Subfilter / Filter graph
//!
//! Arena storage for compiled filters. Conditions and subfilters live in
//! maps keyed by generated ids; cross-references are plain ids.
//!
//! - A **condition** is one positive predicate, shared by every subfilter
//!   using it (negated or not).
//! - A **subfilter** is one AND-clause: a sorted list of `(condition, negated)`
//!   literals, shared by every filter whose DNF contains the same clause.
//! - A **filter** is an OR of subfilters with a reference count.

use std::collections::{BTreeSet, HashMap};

use shared_types::FilterId;

use super::expression::Predicate;
use super::normalize::NormalizedFilter;

/// Arena id of a condition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionId(pub u64);

/// Arena id of a subfilter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubfilterId(pub u64);

/// A deduplicated positive predicate
#[derive(Clone, Debug)]
pub struct Condition {
    pub id: ConditionId,
    pub key: String,
    pub predicate: Predicate,
    /// Subfilters referencing this condition, with the literal's polarity
    pub refs: BTreeSet<(SubfilterId, bool)>,
}

/// An AND-clause
#[derive(Clone, Debug)]
pub struct Subfilter {
    pub id: SubfilterId,
    pub literals: Vec<(ConditionId, bool)>,
    /// Number of non-negated literals; the match counter must reach it
    pub positive_count: usize,
    pub filters: BTreeSet<FilterId>,
}

/// A registered filter
#[derive(Clone, Debug)]
pub struct FilterEntry {
    pub id: FilterId,
    pub canonical: String,
    pub subfilters: Vec<SubfilterId>,
    pub refcount: usize,
}

/// Result of inserting a filter
#[derive(Debug, Default)]
pub struct Inserted {
    /// False when the filter already existed and only its refcount moved
    pub created: bool,
    /// Conditions that need a field index entry
    pub new_conditions: Vec<ConditionId>,
}

/// Result of releasing a filter
#[derive(Debug, Default)]
pub struct Released {
    /// True when the refcount reached zero and the filter was torn down
    pub removed: bool,
    /// Conditions no longer referenced; their index entries must go
    pub removed_conditions: Vec<Condition>,
}

/// The arena
#[derive(Debug, Default)]
pub struct FilterGraph {
    conditions: HashMap<ConditionId, Condition>,
    condition_keys: HashMap<String, ConditionId>,
    subfilters: HashMap<SubfilterId, Subfilter>,
    subfilter_keys: HashMap<Vec<(ConditionId, bool)>, SubfilterId>,
    filters: HashMap<FilterId, FilterEntry>,
    /// Subfilters without a positive literal, candidates on every pass
    unconditional: BTreeSet<SubfilterId>,
    next_id: u64,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Insert a filter, or bump its refcount if already present.
    pub fn insert(&mut self, filter: &NormalizedFilter) -> Inserted {
        if let Some(entry) = self.filters.get_mut(&filter.id) {
            entry.refcount += 1;
            return Inserted::default();
        }

        let mut new_conditions = Vec::new();
        let mut subfilters = Vec::with_capacity(filter.clauses.len());
        for clause in &filter.clauses {
            let literals: Vec<(ConditionId, bool)> = clause
                .iter()
                .map(|lit| {
                    let (id, created) = self.intern_condition(&lit.key, &lit.predicate);
                    if created {
                        new_conditions.push(id);
                    }
                    (id, lit.negated)
                })
                .collect();

            let sf = self.intern_subfilter(literals);
            if let Some(subfilter) = self.subfilters.get_mut(&sf) {
                subfilter.filters.insert(filter.id.clone());
            }
            subfilters.push(sf);
        }

        self.filters.insert(
            filter.id.clone(),
            FilterEntry {
                id: filter.id.clone(),
                canonical: filter.canonical.clone(),
                subfilters,
                refcount: 1,
            },
        );
        Inserted {
            created: true,
            new_conditions,
        }
    }

    fn intern_condition(&mut self, key: &str, predicate: &Predicate) -> (ConditionId, bool) {
        if let Some(id) = self.condition_keys.get(key) {
            return (*id, false);
        }
        let id = ConditionId(self.next_id());
        self.condition_keys.insert(key.to_string(), id);
        self.conditions.insert(
            id,
            Condition {
                id,
                key: key.to_string(),
                predicate: predicate.clone(),
                refs: BTreeSet::new(),
            },
        );
        (id, true)
    }

    fn intern_subfilter(&mut self, literals: Vec<(ConditionId, bool)>) -> SubfilterId {
        if let Some(id) = self.subfilter_keys.get(&literals) {
            return *id;
        }
        let id = SubfilterId(self.next_id());
        for (condition, negated) in &literals {
            if let Some(c) = self.conditions.get_mut(condition) {
                c.refs.insert((id, *negated));
            }
        }
        let positive_count = literals.iter().filter(|(_, negated)| !negated).count();
        if positive_count == 0 {
            self.unconditional.insert(id);
        }
        self.subfilter_keys.insert(literals.clone(), id);
        self.subfilters.insert(
            id,
            Subfilter {
                id,
                literals,
                positive_count,
                filters: BTreeSet::new(),
            },
        );
        id
    }

    /// Drop one reference; at zero the filter and every subfilter and
    /// condition it alone used are removed. `None` for an unknown filter.
    pub fn release(&mut self, filter_id: &FilterId) -> Option<Released> {
        let entry = self.filters.get_mut(filter_id)?;
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.refcount > 0 {
            return Some(Released::default());
        }
        let entry = self.filters.remove(filter_id)?;

        let mut removed_conditions = Vec::new();
        for sf in entry.subfilters {
            let orphaned = match self.subfilters.get_mut(&sf) {
                Some(subfilter) => {
                    subfilter.filters.remove(filter_id);
                    subfilter.filters.is_empty()
                }
                None => false,
            };
            if !orphaned {
                continue;
            }
            let Some(subfilter) = self.subfilters.remove(&sf) else {
                continue;
            };
            self.subfilter_keys.remove(&subfilter.literals);
            self.unconditional.remove(&sf);

            for (condition_id, negated) in &subfilter.literals {
                let unused = match self.conditions.get_mut(condition_id) {
                    Some(condition) => {
                        condition.refs.remove(&(sf, *negated));
                        condition.refs.is_empty()
                    }
                    None => false,
                };
                if unused {
                    if let Some(condition) = self.conditions.remove(condition_id) {
                        self.condition_keys.remove(&condition.key);
                        removed_conditions.push(condition);
                    }
                }
            }
        }

        Some(Released {
            removed: true,
            removed_conditions,
        })
    }

    pub fn condition(&self, id: ConditionId) -> Option<&Condition> {
        self.conditions.get(&id)
    }

    pub fn subfilter(&self, id: SubfilterId) -> Option<&Subfilter> {
        self.subfilters.get(&id)
    }

    pub fn filter(&self, id: &FilterId) -> Option<&FilterEntry> {
        self.filters.get(id)
    }

    pub fn unconditional(&self) -> &BTreeSet<SubfilterId> {
        &self.unconditional
    }

    pub fn filter_ids(&self) -> impl Iterator<Item = &FilterId> {
        self.filters.keys()
    }

    pub fn condition_count(&self) -> usize {
        self.conditions.len()
    }

    pub fn subfilter_count(&self) -> usize {
        self.subfilters.len()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }
}
