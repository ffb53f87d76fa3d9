//! Strategy workflows
//!
//! A workflow is an ordered list of layers, each a [`Condition`] paired with
//! a [`Procedure`]. Layers are evaluated top to bottom and the first whose
//! condition holds produces the result. When no layer matches the result is
//! empty, which callers treat as "no recommendation available".

pub mod assessment;
pub mod config;

pub use assessment::Assessment;
pub use config::{ConfigError, LayerConfig, WorkflowConfig};

use std::sync::Arc;

use tracing::debug;

use crate::backoff::{DeleteLowFrequency, Merger, ResultCondition, SplitPropertySet, Splitter, StepSize};
use crate::tree::{Recommendations, Recommender};

/// Decides whether a layer runs for an assessment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    Always,
    /// More than `n` input items.
    AboveThreshold(usize),
    /// Fewer than `n` input items.
    BelowThreshold(usize),
    /// The direct recommendation has more than `n` candidates.
    TooManyRecommendations(usize),
    /// The direct recommendation has fewer than `n` candidates.
    TooFewRecommendations(usize),
    /// The direct recommendation's top-10 average probability is below `t`.
    TooUnlikelyRecommendations(f32),
}

impl Condition {
    pub fn holds(&self, asm: &Assessment) -> bool {
        match *self {
            Condition::Always => true,
            Condition::AboveThreshold(n) => asm.property_count() > n,
            Condition::BelowThreshold(n) => asm.property_count() < n,
            Condition::TooManyRecommendations(n) => asm.recommendations().len() > n,
            Condition::TooFewRecommendations(n) => asm.recommendations().len() < n,
            Condition::TooUnlikelyRecommendations(t) => asm.recommendations().top10_avg_probability() < t,
        }
    }
}

/// What a layer runs once its condition holds.
pub enum Procedure {
    /// The assessment's direct recommendation (cache-aware).
    Direct,
    DeleteLowFrequency(DeleteLowFrequency),
    SplitPropertySet(SplitPropertySet),
}

impl Procedure {
    pub fn run(&self, asm: &Assessment) -> Recommendations {
        if asm.is_unresolved() {
            return Recommendations::new();
        }
        match self {
            Procedure::Direct => asm.recommendations().into_owned(),
            Procedure::DeleteLowFrequency(backoff) => backoff.recommend(asm.properties()),
            Procedure::SplitPropertySet(backoff) => backoff.recommend(asm.properties()),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Procedure::Direct => "direct",
            Procedure::DeleteLowFrequency(_) => "deleteLowFrequency",
            Procedure::SplitPropertySet(_) => "splitProperty",
        }
    }
}

impl std::fmt::Debug for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Procedure::Direct => write!(f, "Direct"),
            Procedure::DeleteLowFrequency(b) => std::fmt::Debug::fmt(b, f),
            Procedure::SplitPropertySet(b) => std::fmt::Debug::fmt(b, f),
        }
    }
}

#[derive(Debug)]
pub struct Layer {
    pub condition: Condition,
    pub procedure: Procedure,
    pub description: String,
}

#[derive(Debug, Default)]
pub struct Workflow {
    layers: Vec<Layer>,
}

impl Workflow {
    pub fn new() -> Self {
        Workflow { layers: Vec::new() }
    }

    /// Append a layer with lower priority than every existing one.
    pub fn push(&mut self, condition: Condition, procedure: Procedure, description: impl Into<String>) {
        self.layers.push(Layer {
            condition,
            procedure,
            description: description.into(),
        });
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run the first layer whose condition holds.
    pub fn recommend(&self, asm: &Assessment) -> Recommendations {
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.condition.holds(asm) {
                debug!(
                    target: "schematree::strategy",
                    layer = index,
                    procedure = layer.procedure.name(),
                    description = %layer.description,
                    "run"
                );
                return layer.procedure.run(asm);
            }
            debug!(target: "schematree::strategy", layer = index, description = %layer.description, "skip");
        }
        debug!(target: "schematree::strategy", layers = self.layers.len(), "no layer matched");
        Recommendations::new()
    }

    /// Names accepted by [`Workflow::preset`].
    pub const PRESETS: &'static [&'static str] =
        &["direct", "best", "deletelowfrequency", "splitproperty", "toofewrecommendations"];

    /// Build one of the hard-coded workflows.
    pub fn preset(name: &str, recommender: Arc<dyn Recommender>) -> Result<Workflow, ConfigError> {
        let mut wf = Workflow::new();
        match name {
            "direct" => {
                wf.push(Condition::Always, Procedure::Direct, "always run direct algorithm");
            }
            "best" => {
                wf.push(
                    Condition::TooFewRecommendations(1),
                    Procedure::DeleteLowFrequency(DeleteLowFrequency::new(
                        recommender,
                        4,
                        StepSize::Linear,
                        ResultCondition::MoreThan(4),
                    )),
                    "run deletelowfrequency with 4 parallel executions",
                );
                wf.push(Condition::Always, Procedure::Direct, "always run direct algorithm");
            }
            "deletelowfrequency" => {
                wf.push(
                    Condition::Always,
                    Procedure::DeleteLowFrequency(DeleteLowFrequency::new(
                        recommender,
                        4,
                        StepSize::Proportional,
                        ResultCondition::MoreThan(10),
                    )),
                    "always run deletelowfrequency with 4 parallel executions",
                );
            }
            "splitproperty" => {
                wf.push(
                    Condition::AboveThreshold(2),
                    Procedure::SplitPropertySet(SplitPropertySet::new(
                        recommender,
                        Splitter::EverySecondItem,
                        Merger::Max,
                    )),
                    "with 3 or more properties run splitproperty",
                );
                wf.push(Condition::Always, Procedure::Direct, "default to running direct algorithm");
            }
            "toofewrecommendations" => {
                wf.push(
                    Condition::TooFewRecommendations(10),
                    Procedure::DeleteLowFrequency(DeleteLowFrequency::new(
                        recommender,
                        4,
                        StepSize::Proportional,
                        ResultCondition::MoreThan(10),
                    )),
                    "if less than 10 recommendations are generated, run deletelowfrequency",
                );
                wf.push(Condition::Always, Procedure::Direct, "default to direct algorithm");
            }
            other => return Err(ConfigError::UnknownPreset(other.to_string())),
        }
        Ok(wf)
    }
}
