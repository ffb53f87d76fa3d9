//! Workflow configuration files
//!
//! ## Format
//!
//! ```toml
//! [[layers]]
//! condition = "tooFewRecommendations"
//! threshold = 3
//! backoff = "deleteLowFrequency"
//! stepsize = "stepsizeLinear"
//! parallel_executions = 4
//!
//! [[layers]]
//! condition = "always"
//! backoff = "direct"
//! ```
//!
//! The whole file is validated before any layer is built; one bad field
//! rejects the file and the error names the layer index and field.

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use super::{Condition, Procedure, Workflow};
use crate::backoff::{DeleteLowFrequency, Merger, ResultCondition, SplitPropertySet, Splitter, StepSize};
use crate::tree::Recommender;

/// Errors raised while reading or validating a workflow configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    NoLayers,
    UnknownPreset(String),
    InvalidField {
        layer: usize,
        field: &'static str,
        message: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read workflow configuration: {}", e),
            ConfigError::Parse(msg) => write!(f, "failed to parse workflow configuration: {}", msg),
            ConfigError::NoLayers => write!(f, "workflow configuration has no layers"),
            ConfigError::UnknownPreset(name) => write!(
                f,
                "unknown workflow preset '{}' (expected one of: {})",
                name,
                Workflow::PRESETS.join(", ")
            ),
            ConfigError::InvalidField { layer, field, message } => {
                write!(f, "layer {}: invalid '{}': {}", layer, field, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// The `[[layers]]` list of a configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
}

/// One `[[layers]]` table. Which fields are required depends on `condition`
/// and `backoff`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayerConfig {
    pub condition: Option<String>,
    pub threshold: Option<usize>,
    pub threshold_float: Option<f32>,
    pub backoff: Option<String>,
    pub stepsize: Option<String>,
    pub parallel_executions: Option<usize>,
    pub splitter: Option<String>,
    pub merger: Option<String>,
    pub result_condition: Option<String>,
    pub description: Option<String>,
}

/// A validated procedure, not yet bound to a recommender.
#[derive(Debug, Clone, Copy)]
enum ProcedureSpec {
    Direct,
    DeleteLowFrequency {
        parallel_executions: usize,
        step_size: StepSize,
        condition: ResultCondition,
    },
    SplitPropertySet {
        splitter: Splitter,
        merger: Merger,
    },
}

struct LayerPlan {
    condition: Condition,
    procedure: ProcedureSpec,
    description: String,
}

impl WorkflowConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Check every layer without building anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plan().map(|_| ())
    }

    /// Build the workflow; all backoff procedures use `recommender`.
    pub fn build(&self, recommender: Arc<dyn Recommender>) -> Result<Workflow, ConfigError> {
        let plans = self.plan()?;

        let mut workflow = Workflow::new();
        for plan in plans {
            let procedure = match plan.procedure {
                ProcedureSpec::Direct => Procedure::Direct,
                ProcedureSpec::DeleteLowFrequency {
                    parallel_executions,
                    step_size,
                    condition,
                } => Procedure::DeleteLowFrequency(DeleteLowFrequency::new(
                    Arc::clone(&recommender),
                    parallel_executions,
                    step_size,
                    condition,
                )),
                ProcedureSpec::SplitPropertySet { splitter, merger } => Procedure::SplitPropertySet(
                    SplitPropertySet::new(Arc::clone(&recommender), splitter, merger),
                ),
            };
            workflow.push(plan.condition, procedure, plan.description);
        }
        Ok(workflow)
    }

    fn plan(&self) -> Result<Vec<LayerPlan>, ConfigError> {
        if self.layers.is_empty() {
            return Err(ConfigError::NoLayers);
        }
        self.layers
            .iter()
            .enumerate()
            .map(|(index, layer)| layer.plan(index))
            .collect()
    }
}

impl LayerConfig {
    fn plan(&self, index: usize) -> Result<LayerPlan, ConfigError> {
        let invalid = |field: &'static str, message: String| ConfigError::InvalidField {
            layer: index,
            field,
            message,
        };
        let threshold = || self.threshold.ok_or_else(|| invalid("threshold", "required by this layer".into()));
        let threshold_float = || {
            self.threshold_float
                .ok_or_else(|| invalid("threshold_float", "required by this layer".into()))
        };

        let condition = match required(&self.condition, "condition", index)? {
            "always" => Condition::Always,
            "aboveThreshold" => Condition::AboveThreshold(threshold()?),
            "belowThreshold" => Condition::BelowThreshold(threshold()?),
            "tooManyRecommendations" => Condition::TooManyRecommendations(threshold()?),
            "tooFewRecommendations" => Condition::TooFewRecommendations(threshold()?),
            "tooUnlikelyRecommendations" | "tooUnlikelyRecommendationsCondition" => {
                Condition::TooUnlikelyRecommendations(threshold_float()?)
            }
            other => return Err(invalid("condition", format!("unknown condition '{}'", other))),
        };

        let procedure = match required(&self.backoff, "backoff", index)? {
            "direct" | "standard" => ProcedureSpec::Direct,
            "deleteLowFrequency" => {
                let step_size = match required(&self.stepsize, "stepsize", index)? {
                    "stepsizeLinear" => StepSize::Linear,
                    "stepsizeProportional" => StepSize::Proportional,
                    other => return Err(invalid("stepsize", format!("unknown step size '{}'", other))),
                };
                let parallel_executions = match self.parallel_executions {
                    Some(n) if n > 0 => n,
                    Some(_) => return Err(invalid("parallel_executions", "must be at least 1".into())),
                    None => return Err(invalid("parallel_executions", "required by deleteLowFrequency".into())),
                };
                let condition = match self.result_condition.as_deref().unwrap_or("moreThan") {
                    "moreThan" => ResultCondition::MoreThan(threshold()?),
                    "top10AvgAbove" => ResultCondition::Top10AvgAbove(threshold_float()?),
                    other => {
                        return Err(invalid(
                            "result_condition",
                            format!("unknown result condition '{}'", other),
                        ))
                    }
                };
                ProcedureSpec::DeleteLowFrequency {
                    parallel_executions,
                    step_size,
                    condition,
                }
            }
            "splitProperty" => {
                let splitter = match required(&self.splitter, "splitter", index)? {
                    "everySecondItem" => Splitter::EverySecondItem,
                    "twoSupportRanges" => Splitter::TwoSupportRanges,
                    other => return Err(invalid("splitter", format!("unknown splitter '{}'", other))),
                };
                let merger = match required(&self.merger, "merger", index)? {
                    "first" => Merger::First,
                    "max" => Merger::Max,
                    "avg" => Merger::Average,
                    other => return Err(invalid("merger", format!("unknown merger '{}'", other))),
                };
                ProcedureSpec::SplitPropertySet { splitter, merger }
            }
            other => return Err(invalid("backoff", format!("unknown backoff '{}'", other))),
        };

        Ok(LayerPlan {
            condition,
            procedure,
            description: self
                .description
                .clone()
                .unwrap_or_else(|| format!("layer {}", index)),
        })
    }
}

fn required<'a>(value: &'a Option<String>, field: &'static str, layer: usize) -> Result<&'a str, ConfigError> {
    value.as_deref().ok_or_else(|| ConfigError::InvalidField {
        layer,
        field,
        message: "missing".to_string(),
    })
}
