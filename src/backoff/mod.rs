//! Backoff strategies
//!
//! When a direct recommendation is judged unhelpful, these strategies
//! recompute it on modified inputs in parallel and combine the results.
//! Both split the input into sub-problems; a sub-problem never recommends
//! an item that was taken out of its input.

pub mod delete_low_frequency;
pub mod split_property_set;

pub use delete_low_frequency::{DeleteLowFrequency, ManipulationError, ResultCondition, StepSize};
pub use split_property_set::{Merger, SplitPropertySet, Splitter};

use crate::tree::{ItemList, Recommendations, Recommender};

/// One reduced input together with the items taken out of it.
#[derive(Debug, Clone, Default)]
pub struct SubProblem {
    pub kept: ItemList,
    pub removed: ItemList,
}

impl SubProblem {
    pub fn new(kept: ItemList, removed: ItemList) -> Self {
        SubProblem { kept, removed }
    }

    /// Recommend for `kept`, then drop every candidate listed in `removed`.
    pub fn solve(&self, recommender: &dyn Recommender) -> Recommendations {
        recommender.recommend(&self.kept).without(&self.removed.id_set())
    }
}
