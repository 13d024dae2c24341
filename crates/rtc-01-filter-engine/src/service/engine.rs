//! Filter Engine
//!
//! Owns the compiled filter graph and the field index, and runs matching
//! passes.
//!
//! ## Matching pass
//!
//! 1. Flatten the document into `(path, value)` pairs.
//! 2. Collect candidate conditions from the field index for each pair.
//! 3. Evaluate each candidate once against the document.
//! 4. A matching condition increments the counter of every subfilter that
//!    references it positively, and vetoes every subfilter that references
//!    it negatively.
//! 5. A subfilter is satisfied when its counter equals its positive literal
//!    count and it was not vetoed; subfilters without positive literals are
//!    checked on every pass.
//!
//! Counters live on the stack of the pass, so concurrent passes never share
//! state.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use shared_types::{Document, FilterId};
use tracing::{debug, info};

use crate::domain::{
    flatten, normalize, ConditionId, EngineConfig, FieldIndex, FilterExpr, FilterGraph,
    NormalizedFilter, SubfilterId,
};
use crate::error::FilterError;
use crate::metrics::EngineMetrics;
use crate::ports::{FilterEngineApi, Registration};

/// The filter engine
#[derive(Debug)]
pub struct FilterEngine {
    config: EngineConfig,
    graph: FilterGraph,
    index: FieldIndex,
    metrics: Arc<EngineMetrics>,
}

impl FilterEngine {
    /// Create an engine with a validated configuration
    pub fn new(config: EngineConfig) -> Result<Self, FilterError> {
        config.validate()?;
        Ok(Self {
            index: FieldIndex::new(config.geo_precision),
            graph: FilterGraph::new(),
            metrics: Arc::new(EngineMetrics::new()),
            config,
        })
    }

    /// Create an engine with default configuration
    pub fn with_defaults() -> Self {
        let config = EngineConfig::default();
        Self {
            index: FieldIndex::new(config.geo_precision),
            graph: FilterGraph::new(),
            metrics: Arc::new(EngineMetrics::new()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn contains(&self, filter_id: &FilterId) -> bool {
        self.graph.filter(filter_id).is_some()
    }

    pub fn refcount(&self, filter_id: &FilterId) -> usize {
        self.graph.filter(filter_id).map_or(0, |f| f.refcount)
    }

    pub fn filter_ids(&self) -> impl Iterator<Item = &FilterId> {
        self.graph.filter_ids()
    }

    pub fn filter_count(&self) -> usize {
        self.graph.filter_count()
    }

    pub fn subfilter_count(&self) -> usize {
        self.graph.subfilter_count()
    }

    pub fn condition_count(&self) -> usize {
        self.graph.condition_count()
    }

    /// Number of fields with at least one index entry.
    pub fn indexed_field_count(&self) -> usize {
        self.index.field_count()
    }

    fn collect_candidates(&self, document: &Document) -> Vec<ConditionId> {
        let mut candidates = Vec::new();
        for (path, value) in flatten(document) {
            self.index.candidates(&path, value, &mut candidates);
        }
        candidates.sort_unstable();
        candidates.dedup();
        candidates
    }
}

impl FilterEngineApi for FilterEngine {
    fn compile(&self, body: &Document) -> Result<NormalizedFilter, FilterError> {
        let expr = FilterExpr::parse(body, &self.config)?;
        normalize(&expr, &self.config)
    }

    fn register(&mut self, body: &Document) -> Result<Registration, FilterError> {
        let filter = self.compile(body)?;
        Ok(self.register_normalized(&filter))
    }

    fn register_normalized(&mut self, filter: &NormalizedFilter) -> Registration {
        let inserted = self.graph.insert(filter);
        for id in &inserted.new_conditions {
            if let Some(condition) = self.graph.condition(*id) {
                self.index.index(*id, &condition.predicate);
            }
        }

        if inserted.created {
            self.metrics.record_registered();
            info!(
                filter_id = %filter.id,
                subfilters = filter.clauses.len(),
                new_conditions = inserted.new_conditions.len(),
                "Filter registered"
            );
        } else {
            debug!(filter_id = %filter.id, refcount = self.refcount(&filter.id), "Filter reference added");
        }

        Registration {
            filter_id: filter.id.clone(),
            created: inserted.created,
        }
    }

    fn release(&mut self, filter_id: &FilterId) -> Option<bool> {
        let released = self.graph.release(filter_id)?;
        for condition in &released.removed_conditions {
            self.index.unindex(condition.id, &condition.predicate);
        }
        if released.removed {
            self.metrics.record_removed();
            info!(
                filter_id = %filter_id,
                removed_conditions = released.removed_conditions.len(),
                "Filter removed"
            );
        }
        Some(released.removed)
    }

    fn test(&self, document: &Document) -> BTreeSet<FilterId> {
        let started = Instant::now();
        let candidates = self.collect_candidates(document);

        let mut hits: HashMap<SubfilterId, usize> = HashMap::new();
        let mut vetoed: HashSet<SubfilterId> = HashSet::new();
        for id in &candidates {
            let Some(condition) = self.graph.condition(*id) else {
                continue;
            };
            if !condition.predicate.evaluate(document) {
                continue;
            }
            for (subfilter, negated) in &condition.refs {
                if *negated {
                    vetoed.insert(*subfilter);
                } else {
                    *hits.entry(*subfilter).or_default() += 1;
                }
            }
        }

        let mut matched = BTreeSet::new();
        let satisfied = hits
            .iter()
            .filter_map(|(id, count)| {
                let subfilter = self.graph.subfilter(*id)?;
                (*count == subfilter.positive_count).then_some(subfilter)
            })
            .chain(
                self.graph
                    .unconditional()
                    .iter()
                    .filter_map(|id| self.graph.subfilter(*id)),
            );
        for subfilter in satisfied {
            if !vetoed.contains(&subfilter.id) {
                matched.extend(subfilter.filters.iter().cloned());
            }
        }

        self.metrics
            .record_test(started.elapsed(), candidates.len(), matched.len());
        matched
    }

    fn canonical(&self, filter_id: &FilterId) -> Option<&str> {
        self.graph.filter(filter_id).map(|f| f.canonical.as_str())
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}
