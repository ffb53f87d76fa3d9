//! Delete-low-frequency backoff
//!
//! Recomputes the recommendation on progressively shorter prefixes of the
//! rank-sorted input, dropping the rarest items first. All reductions run in
//! parallel; the first one (fewest items removed) whose result satisfies the
//! [`ResultCondition`] wins, and the most reduced one is the fallback.

use std::sync::Arc;

use crossbeam_channel::bounded;
use tracing::{debug, warn};

use super::SubProblem;
use crate::pool::{shared_pool, WorkerPool};
use crate::tree::{ItemList, Recommendations, Recommender};

/// `(list size, iteration 1..=P, P) -> number of items to remove`
pub type StepSizeFn = fn(usize, usize, usize) -> usize;

/// How many items the `i`-th reduction removes.
#[derive(Debug, Clone, Copy)]
pub enum StepSize {
    /// Remove `i` items, but never the whole list.
    Linear,
    /// Remove `round(0.4 * i / P * size)` items.
    Proportional,
    Custom(StepSizeFn),
}

impl StepSize {
    pub fn items_to_remove(&self, size: usize, iteration: usize, parallel: usize) -> usize {
        match self {
            StepSize::Linear => {
                if iteration < size {
                    iteration
                } else {
                    size.saturating_sub(1)
                }
            }
            StepSize::Proportional => {
                let parallel = parallel.max(1) as f64;
                (0.4 * iteration as f64 / parallel * size as f64).round() as usize
            }
            StepSize::Custom(f) => f(size, iteration, parallel),
        }
    }
}

/// Acceptance test for the result of one reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultCondition {
    /// More than `n` candidates.
    MoreThan(usize),
    /// Average probability of the top ten candidates above the threshold.
    Top10AvgAbove(f32),
}

impl ResultCondition {
    pub fn holds(&self, recommendations: &Recommendations) -> bool {
        match *self {
            ResultCondition::MoreThan(n) => recommendations.len() > n,
            ResultCondition::Top10AvgAbove(t) => recommendations.top10_avg_probability() > t,
        }
    }
}

/// Attempt to remove more items than a list holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManipulationError {
    pub requested: usize,
    pub available: usize,
}

impl std::fmt::Display for ManipulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cannot remove {} items from a property list of {}",
            self.requested, self.available
        )
    }
}

impl std::error::Error for ManipulationError {}

/// Split off the last `count` items of a sorted list.
pub fn manipulate(properties: &ItemList, count: usize) -> Result<SubProblem, ManipulationError> {
    let available = properties.len();
    if count > available {
        return Err(ManipulationError {
            requested: count,
            available,
        });
    }
    let (kept, removed) = properties.split_at(available - count);
    Ok(SubProblem::new(kept.to_vec().into(), removed.to_vec().into()))
}

pub struct DeleteLowFrequency {
    recommender: Arc<dyn Recommender>,
    pool: Arc<WorkerPool>,
    parallel_executions: usize,
    step_size: StepSize,
    condition: ResultCondition,
}

impl DeleteLowFrequency {
    pub fn new(
        recommender: Arc<dyn Recommender>,
        parallel_executions: usize,
        step_size: StepSize,
        condition: ResultCondition,
    ) -> Self {
        DeleteLowFrequency {
            recommender,
            pool: shared_pool(),
            parallel_executions,
            step_size,
            condition,
        }
    }

    /// Run sub-calls on `pool` instead of the shared pool.
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn parallel_executions(&self) -> usize {
        self.parallel_executions
    }

    /// Build up to `parallel_executions` reductions in step order. Steps that
    /// would remove more items than the list holds are skipped.
    pub fn split(&self, properties: &ItemList) -> Vec<SubProblem> {
        let properties = properties.normalized();
        let size = properties.len();

        (1..=self.parallel_executions)
            .filter_map(|i| {
                let count = self.step_size.items_to_remove(size, i, self.parallel_executions);
                match manipulate(&properties, count) {
                    Ok(sub) => Some(sub),
                    Err(e) => {
                        debug!(target: "schematree::backoff", step = i, error = %e, "skipping reduction");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn recommend(&self, properties: &ItemList) -> Recommendations {
        let subproblems = self.split(properties);
        self.recommend_in_parallel(subproblems)
    }

    fn recommend_in_parallel(&self, subproblems: Vec<SubProblem>) -> Recommendations {
        let n = subproblems.len();
        if n == 0 {
            return Recommendations::new();
        }

        let (tx, rx) = bounded::<(usize, Recommendations)>(n);
        for (index, sub) in subproblems.into_iter().enumerate() {
            let tx = tx.clone();
            let recommender = Arc::clone(&self.recommender);
            self.pool.execute(move || {
                let _ = tx.send((index, sub.solve(recommender.as_ref())));
            });
        }
        drop(tx);

        // Results are judged strictly in step order; early arrivals wait here.
        let mut arrived: Vec<Option<Recommendations>> = (0..n).map(|_| None).collect();
        let mut next = 0;
        while let Ok((index, recs)) = rx.recv() {
            arrived[index] = Some(recs);
            while let Some(recs) = arrived.get_mut(next).and_then(Option::take) {
                if next == n - 1 || self.condition.holds(&recs) {
                    return recs;
                }
                next += 1;
            }
        }

        warn!(target: "schematree::backoff", "reduction task ended without a result");
        arrived.into_iter().rev().flatten().next().unwrap_or_default()
    }
}

impl Recommender for DeleteLowFrequency {
    fn recommend(&self, properties: &ItemList) -> Recommendations {
        DeleteLowFrequency::recommend(self, properties)
    }
}

impl std::fmt::Debug for DeleteLowFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeleteLowFrequency")
            .field("parallel_executions", &self.parallel_executions)
            .field("step_size", &self.step_size)
            .field("condition", &self.condition)
            .finish()
    }
}
