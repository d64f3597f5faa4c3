//! Transition criteria: the edges of the generation strategy graph.
//!
//! Each criterion answers, against live experiment state, whether the node it
//! is attached to is complete for generation purposes, and if so where the
//! strategy should move next. Criteria that share a `transition_to` target
//! form one transition edge; the edge fires only when every criterion on it
//! is met.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use tl_types::{Experiment, GeneratorRun, TrialStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransitionCriterion {
    /// Met once enough trials exist in the given statuses. By default only
    /// trials generated from the node this criterion sits on are counted.
    MinTrials {
        threshold: usize,
        only_in_statuses: Option<Vec<TrialStatus>>,
        not_in_statuses: Option<Vec<TrialStatus>>,
        use_all_trials_in_exp: bool,
        transition_to: Option<String>,
        block_gen_if_unmet: bool,
        continue_trial_generation: bool,
    },
    /// Met once enough arms have observed data for the objective metric.
    /// While unmet and blocking, generation surfaces the data-required
    /// condition instead of an ordinary "not yet".
    MinObservedData {
        min_observations: usize,
        transition_to: Option<String>,
        block_gen_if_unmet: bool,
        continue_trial_generation: bool,
    },
    /// Pauses generation while the experiment has `threshold` or more trials
    /// running. Never advances the current-node pointer on its own, so it is
    /// the only variant allowed to omit a transition target.
    MaxGenerationParallelism { threshold: usize },
    /// Met once the node it is attached to produced the most recent generator
    /// run. This is the edge used to chain several nodes into one batch
    /// trial.
    AutoTransitionAfterGen {
        transition_to: Option<String>,
        continue_trial_generation: bool,
    },
}

impl TransitionCriterion {
    /// Trial-count criterion with the default status filter: everything that
    /// was not failed or abandoned counts.
    pub fn min_trials(threshold: usize, transition_to: Option<String>) -> Self {
        Self::MinTrials {
            threshold,
            only_in_statuses: None,
            not_in_statuses: Some(vec![TrialStatus::Failed, TrialStatus::Abandoned]),
            use_all_trials_in_exp: false,
            transition_to,
            block_gen_if_unmet: false,
            continue_trial_generation: false,
        }
    }

    pub fn min_observed_data(min_observations: usize, transition_to: Option<String>) -> Self {
        Self::MinObservedData {
            min_observations,
            transition_to,
            block_gen_if_unmet: true,
            continue_trial_generation: false,
        }
    }

    pub fn max_parallelism(threshold: usize) -> Self {
        Self::MaxGenerationParallelism { threshold }
    }

    pub fn auto_transition(transition_to: impl Into<String>) -> Self {
        Self::AutoTransitionAfterGen {
            transition_to: Some(transition_to.into()),
            continue_trial_generation: true,
        }
    }

    pub fn with_continue_trial_generation(mut self, value: bool) -> Self {
        match &mut self {
            Self::MinTrials {
                continue_trial_generation,
                ..
            }
            | Self::MinObservedData {
                continue_trial_generation,
                ..
            }
            | Self::AutoTransitionAfterGen {
                continue_trial_generation,
                ..
            } => *continue_trial_generation = value,
            Self::MaxGenerationParallelism { .. } => {}
        }
        self
    }

    pub fn with_block_gen_if_unmet(mut self, value: bool) -> Self {
        match &mut self {
            Self::MinTrials {
                block_gen_if_unmet, ..
            }
            | Self::MinObservedData {
                block_gen_if_unmet, ..
            } => *block_gen_if_unmet = value,
            _ => {}
        }
        self
    }

    pub fn with_only_in_statuses(mut self, statuses: Vec<TrialStatus>) -> Self {
        if let Self::MinTrials {
            only_in_statuses, ..
        } = &mut self
        {
            *only_in_statuses = Some(statuses);
        }
        self
    }

    pub fn with_use_all_trials_in_exp(mut self, value: bool) -> Self {
        if let Self::MinTrials {
            use_all_trials_in_exp,
            ..
        } = &mut self
        {
            *use_all_trials_in_exp = value;
        }
        self
    }

    /// Short name used in error and log messages.
    pub fn criterion_key(&self) -> &'static str {
        match self {
            Self::MinTrials { .. } => "MinTrials",
            Self::MinObservedData { .. } => "MinObservedData",
            Self::MaxGenerationParallelism { .. } => "MaxGenerationParallelism",
            Self::AutoTransitionAfterGen { .. } => "AutoTransitionAfterGen",
        }
    }

    pub fn transition_to(&self) -> Option<&str> {
        match self {
            Self::MinTrials { transition_to, .. }
            | Self::MinObservedData { transition_to, .. }
            | Self::AutoTransitionAfterGen { transition_to, .. } => transition_to.as_deref(),
            Self::MaxGenerationParallelism { .. } => None,
        }
    }

    pub(crate) fn set_transition_to(&mut self, target: Option<String>) {
        match self {
            Self::MinTrials { transition_to, .. }
            | Self::MinObservedData { transition_to, .. }
            | Self::AutoTransitionAfterGen { transition_to, .. } => *transition_to = target,
            Self::MaxGenerationParallelism { .. } => {}
        }
    }

    /// Whether, after transitioning along this criterion's edge, generation
    /// should keep filling the same trial from the next node.
    pub fn continue_trial_generation(&self) -> bool {
        match self {
            Self::MinTrials {
                continue_trial_generation,
                ..
            }
            | Self::MinObservedData {
                continue_trial_generation,
                ..
            }
            | Self::AutoTransitionAfterGen {
                continue_trial_generation,
                ..
            } => *continue_trial_generation,
            Self::MaxGenerationParallelism { .. } => false,
        }
    }

    pub fn blocks_gen_if_unmet(&self) -> bool {
        match self {
            Self::MinTrials {
                block_gen_if_unmet, ..
            }
            | Self::MinObservedData {
                block_gen_if_unmet, ..
            } => *block_gen_if_unmet,
            _ => false,
        }
    }

    pub fn is_parallelism(&self) -> bool {
        matches!(self, Self::MaxGenerationParallelism { .. })
    }

    /// Whether this criterion carries a trial budget for the node, i.e.
    /// whether meeting it marks the node as completed.
    pub fn is_trial_budget(&self) -> bool {
        matches!(self, Self::MinTrials { .. })
    }

    /// Evaluate this criterion against the experiment, on behalf of the named
    /// node. Read-only: repeated evaluation never changes the outcome absent
    /// new experiment state.
    pub fn is_met(
        &self,
        experiment: &Experiment,
        node_name: &str,
        generator_runs: &[GeneratorRun],
    ) -> bool {
        match self {
            Self::MinTrials {
                threshold,
                only_in_statuses,
                not_in_statuses,
                use_all_trials_in_exp,
                ..
            } => {
                let count = experiment
                    .trials
                    .values()
                    .filter(|trial| {
                        let from_node =
                            *use_all_trials_in_exp || trial.has_generator_run_from(node_name);
                        let included = only_in_statuses
                            .as_ref()
                            .map_or(true, |only| only.contains(&trial.status));
                        let not_excluded = not_in_statuses
                            .as_ref()
                            .map_or(true, |not_in| !not_in.contains(&trial.status));
                        from_node && included && not_excluded
                    })
                    .count();
                count >= *threshold
            }
            Self::MinObservedData {
                min_observations, ..
            } => {
                let data = experiment.lookup_data();
                let observed = match &experiment.optimization_config {
                    Some(config) => data.arms_with_data(&config.objective_metric).len(),
                    None => data
                        .rows
                        .iter()
                        .map(|row| row.arm_name.as_str())
                        .collect::<BTreeSet<_>>()
                        .len(),
                };
                observed >= *min_observations
            }
            Self::MaxGenerationParallelism { threshold } => {
                experiment.num_running_trials() >= *threshold
            }
            Self::AutoTransitionAfterGen { .. } => generator_runs
                .last()
                .is_some_and(|gr| gr.generation_node_name.as_deref() == Some(node_name)),
        }
    }

    /// Remaining trial budget before a trial-count criterion is met; `None`
    /// for criteria that carry no budget.
    pub fn remaining_trials(&self, experiment: &Experiment, node_name: &str) -> Option<usize> {
        match self {
            Self::MinTrials { threshold, .. } => {
                Some(threshold.saturating_sub(self.count_matching(experiment, node_name)))
            }
            _ => None,
        }
    }

    fn count_matching(&self, experiment: &Experiment, node_name: &str) -> usize {
        let Self::MinTrials {
            only_in_statuses,
            not_in_statuses,
            use_all_trials_in_exp,
            ..
        } = self
        else {
            return 0;
        };
        experiment
            .trials
            .values()
            .filter(|trial| {
                let from_node = *use_all_trials_in_exp || trial.has_generator_run_from(node_name);
                let included = only_in_statuses
                    .as_ref()
                    .map_or(true, |only| only.contains(&trial.status));
                let not_excluded = not_in_statuses
                    .as_ref()
                    .map_or(true, |not_in| !not_in.contains(&trial.status));
                from_node && included && not_excluded
            })
            .count()
    }
}
