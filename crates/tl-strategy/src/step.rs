//! Generation steps: the fixed-length, backward-compatible form of a node.
//!
//! A step sequence like "5 uniform trials, then surrogate forever" compiles
//! into standard nodes at strategy construction: each step becomes a node
//! named `GenerationStep_<i>` with an auto-wired trial-count criterion
//! pointing at step *i + 1*.

use tl_types::{CoreResult, GenerationError};

use crate::criteria::TransitionCriterion;
use crate::model_spec::ModelSpec;
use crate::node::{GenerationNode, StepMeta};

/// One fixed-length phase of a step-based generation strategy.
#[derive(Debug, Clone)]
pub struct GenerationStep {
    pub model_spec: ModelSpec,
    /// Trials to generate in this step; -1 means unlimited.
    pub num_trials: i64,
    /// Cap on concurrently running trials while this step is active.
    pub max_parallelism: Option<usize>,
    /// Extra criteria that must also hold for the step to complete.
    pub completion_criteria: Vec<TransitionCriterion>,
}

impl GenerationStep {
    pub fn new(model_spec: ModelSpec, num_trials: i64) -> Self {
        Self {
            model_spec,
            num_trials,
            max_parallelism: None,
            completion_criteria: Vec::new(),
        }
    }

    pub fn with_max_parallelism(mut self, limit: usize) -> Self {
        self.max_parallelism = Some(limit);
        self
    }

    pub fn with_completion_criteria(mut self, criteria: Vec<TransitionCriterion>) -> Self {
        self.completion_criteria = criteria;
        self
    }

    pub fn node_name_for_index(index: usize) -> String {
        format!("GenerationStep_{index}")
    }

    /// Validate this step and compile it into a generation node, wiring the
    /// transition criteria toward the following step.
    pub(crate) fn into_node(self, index: usize, is_last: bool) -> CoreResult<GenerationNode> {
        if self.num_trials == -1 && self.completion_criteria.is_empty() {
            if !is_last {
                return Err(GenerationError::UserInput {
                    message: "Only the last step in a generation strategy can have num_trials \
                              set to -1, indicating unlimited trial generation, unless \
                              completion criteria are present."
                        .to_string(),
                }
                .into());
            }
        } else if self.num_trials != -1 && self.num_trials < 1 {
            return Err(GenerationError::UserInput {
                message: format!(
                    "num_trials must be positive or -1 (indicating unlimited) for all \
                     generation steps; got {} for step {}",
                    self.num_trials, index
                ),
            }
            .into());
        }
        if self.max_parallelism == Some(0) {
            return Err(GenerationError::UserInput {
                message: format!(
                    "max_parallelism must be unset (no limit) or positive; got 0 for step {index}"
                ),
            }
            .into());
        }

        let next = if is_last {
            None
        } else {
            Some(Self::node_name_for_index(index + 1))
        };

        let mut criteria = Vec::new();
        for mut tc in self.completion_criteria {
            if !tc.is_parallelism() && tc.transition_to().is_none() {
                tc.set_transition_to(next.clone());
            }
            criteria.push(tc);
        }
        if self.num_trials != -1 {
            criteria.push(TransitionCriterion::min_trials(
                self.num_trials as usize,
                next,
            ));
        }
        if let Some(limit) = self.max_parallelism {
            criteria.push(TransitionCriterion::max_parallelism(limit));
        }

        Ok(
            GenerationNode::new(Self::node_name_for_index(index), self.model_spec)
                .with_transition_criteria(criteria)
                .with_step_meta(StepMeta {
                    index,
                    num_trials: self.num_trials,
                    max_parallelism: self.max_parallelism,
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_adapter::ModelKind;

    fn uniform_spec() -> ModelSpec {
        ModelSpec::registered(ModelKind::Uniform { seed: 0 })
    }

    #[test]
    fn compiles_to_node_with_wired_criteria() {
        let step = GenerationStep::new(uniform_spec(), 5).with_max_parallelism(2);
        let node = step.into_node(0, false).unwrap();

        assert_eq!(node.node_name(), "GenerationStep_0");
        let meta = node.step().unwrap();
        assert_eq!(meta.index, 0);
        assert_eq!(meta.num_trials, 5);
        assert_eq!(meta.max_parallelism, Some(2));

        let criteria = node.transition_criteria();
        assert_eq!(criteria.len(), 2);
        assert_eq!(criteria[0].transition_to(), Some("GenerationStep_1"));
        assert!(criteria[0].is_trial_budget());
        assert!(criteria[1].is_parallelism());
    }

    #[test]
    fn last_step_gets_no_transition_target() {
        let node = GenerationStep::new(uniform_spec(), 5)
            .into_node(2, true)
            .unwrap();
        assert_eq!(node.transition_criteria()[0].transition_to(), None);
    }

    #[test]
    fn unlimited_last_step_has_no_budget_criterion() {
        let node = GenerationStep::new(uniform_spec(), -1)
            .into_node(1, true)
            .unwrap();
        assert!(node.transition_criteria().is_empty());
    }

    #[test]
    fn sentinel_on_non_final_step_fails() {
        let err = GenerationStep::new(uniform_spec(), -1)
            .into_node(0, false)
            .unwrap_err();
        assert!(err.to_string().contains("Only the last step"));
    }

    #[test]
    fn sentinel_allowed_with_completion_criteria() {
        let step = GenerationStep::new(uniform_spec(), -1).with_completion_criteria(vec![
            TransitionCriterion::min_observed_data(3, None),
        ]);
        let node = step.into_node(0, false).unwrap();
        // The completion criterion got wired to the following step.
        assert_eq!(
            node.transition_criteria()[0].transition_to(),
            Some("GenerationStep_1")
        );
    }

    #[test]
    fn invalid_counts_fail() {
        assert!(GenerationStep::new(uniform_spec(), 0)
            .into_node(0, false)
            .is_err());
        assert!(GenerationStep::new(uniform_spec(), -7)
            .into_node(0, true)
            .is_err());
        assert!(GenerationStep::new(uniform_spec(), 3)
            .with_max_parallelism(0)
            .into_node(0, true)
            .is_err());
    }
}
