//! Split-property-set backoff
//!
//! Splits a large input into sub-groups, recommends for each group in
//! parallel (never offering items of the other groups) and merges the
//! per-group results.

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use tracing::warn;

use super::SubProblem;
use crate::pool::{shared_pool, WorkerPool};
use crate::tree::{ItemId, ItemList, RankedCandidate, Recommendations, Recommender};

/// How the rank-sorted input is divided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Splitter {
    /// Alternate items between two groups, mixing high and low support.
    EverySecondItem,
    /// Low-support half and high-support half.
    TwoSupportRanges,
}

impl Splitter {
    /// Split a rank-sorted list.
    pub fn split(&self, properties: &ItemList) -> Vec<ItemList> {
        match self {
            Splitter::EverySecondItem => {
                let (even, odd): (Vec<_>, Vec<_>) = properties
                    .iter()
                    .cloned()
                    .enumerate()
                    .partition(|(i, _)| i % 2 == 0);
                vec![
                    even.into_iter().map(|(_, item)| item).collect(),
                    odd.into_iter().map(|(_, item)| item).collect(),
                ]
            }
            Splitter::TwoSupportRanges => {
                let (high, low) = properties.split_at(properties.len() / 2);
                vec![low.to_vec().into(), high.to_vec().into()]
            }
        }
    }
}

/// How the per-group results are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merger {
    /// The first group's result.
    First,
    /// Highest probability per item.
    Max,
    /// Sum of probabilities per item divided by the number of groups, so an
    /// item seen by one group only is weighted down.
    Average,
}

impl Merger {
    pub fn merge(&self, results: Vec<Recommendations>) -> Recommendations {
        let groups = results.len();
        let mut merged: Recommendations = match self {
            Merger::First => return results.into_iter().next().unwrap_or_default(),
            Merger::Max => {
                let mut best: HashMap<ItemId, RankedCandidate> = HashMap::new();
                for candidate in results.into_iter().flatten() {
                    best.entry(candidate.item.id())
                        .and_modify(|current| {
                            if current.probability < candidate.probability {
                                current.probability = candidate.probability;
                            }
                        })
                        .or_insert(candidate);
                }
                best.into_values().collect()
            }
            Merger::Average => results
                .into_iter()
                .flatten()
                .into_group_map_by(|candidate| candidate.item.id())
                .into_values()
                .filter_map(|candidates| {
                    let sum: f64 = candidates.iter().map(|c| c.probability).sum();
                    let item = Arc::clone(&candidates.first()?.item);
                    Some(RankedCandidate {
                        item,
                        probability: sum / groups as f64,
                    })
                })
                .collect(),
        };
        merged.sort_descending();
        merged
    }
}

pub struct SplitPropertySet {
    recommender: Arc<dyn Recommender>,
    pool: Arc<WorkerPool>,
    splitter: Splitter,
    merger: Merger,
}

impl SplitPropertySet {
    pub fn new(recommender: Arc<dyn Recommender>, splitter: Splitter, merger: Merger) -> Self {
        SplitPropertySet {
            recommender,
            pool: shared_pool(),
            splitter,
            merger,
        }
    }

    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = pool;
        self
    }

    /// One sub-problem per group; the items of every other group are its
    /// removal filter.
    pub fn split(&self, properties: &ItemList) -> Vec<SubProblem> {
        let groups = self.splitter.split(&properties.normalized());
        (0..groups.len())
            .map(|k| {
                let mut removed = ItemList::new();
                for (i, group) in groups.iter().enumerate() {
                    if i != k {
                        removed.extend_from(group);
                    }
                }
                SubProblem::new(groups[k].clone(), removed)
            })
            .collect()
    }

    pub fn recommend(&self, properties: &ItemList) -> Recommendations {
        let handles: Vec<_> = self
            .split(properties)
            .into_iter()
            .map(|sub| {
                let recommender = Arc::clone(&self.recommender);
                self.pool.spawn(move || sub.solve(recommender.as_ref()))
            })
            .collect();

        let results = handles
            .into_iter()
            .map(|handle| {
                handle.recv().unwrap_or_else(|e| {
                    warn!(target: "schematree::backoff", error = %e, "split group produced no result");
                    Recommendations::new()
                })
            })
            .collect();

        self.merger.merge(results)
    }
}

impl Recommender for SplitPropertySet {
    fn recommend(&self, properties: &ItemList) -> Recommendations {
        SplitPropertySet::recommend(self, properties)
    }
}

impl std::fmt::Debug for SplitPropertySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitPropertySet")
            .field("splitter", &self.splitter)
            .field("merger", &self.merger)
            .finish()
    }
}
