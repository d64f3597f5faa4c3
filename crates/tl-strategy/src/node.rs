//! Generation nodes: one model-fitting phase of a strategy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use tracing::debug;

use tl_adapter::{Adapter, GenRequest};
use tl_types::{
    CoreError, CoreResult, Data, Experiment, GenerationError, GeneratorRun, ObservationFeatures,
    PendingObservations,
};

use crate::criteria::TransitionCriterion;
use crate::model_spec::ModelSpec;
use crate::strategy::DEFAULT_N;

/// Fixed-length step metadata carried by nodes compiled from
/// [`crate::GenerationStep`]s. Nodes built directly for a graph carry none,
/// and the step-only accessors fail on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMeta {
    /// Position in the original step sequence.
    pub index: usize,
    /// Trials to generate before moving on; -1 means unlimited.
    pub num_trials: i64,
    pub max_parallelism: Option<usize>,
}

/// One node of a generation strategy: an ordered list of model specs, the
/// transition criteria that decide when to leave it, and per-generation
/// bookkeeping (previous node, skip flag, cached fitted adapter).
pub struct GenerationNode {
    node_name: String,
    model_specs: Vec<ModelSpec>,
    transition_criteria: Vec<TransitionCriterion>,
    /// Node-declared arm count, overriding the caller's `n` when set.
    arms_per_trial: Option<usize>,
    /// Name of the node the strategy pointer left to arrive here. Set during
    /// traversal.
    pub(crate) previous_node_name: Option<String>,
    /// Ephemeral: set when this node deliberately produced nothing in the
    /// current generation attempt, reset on every new attempt.
    pub(crate) should_skip: bool,
    /// Cached fitted adapter; cleared when the strategy transitions away from
    /// this node, so model state never leaks across node boundaries.
    pub(crate) fitted: Option<Box<dyn Adapter>>,
    pub(crate) step: Option<StepMeta>,
}

impl GenerationNode {
    pub fn new(node_name: impl Into<String>, model_spec: ModelSpec) -> Self {
        Self::with_model_specs(node_name, vec![model_spec])
    }

    pub fn with_model_specs(node_name: impl Into<String>, model_specs: Vec<ModelSpec>) -> Self {
        Self {
            node_name: node_name.into(),
            model_specs,
            transition_criteria: Vec::new(),
            arms_per_trial: None,
            previous_node_name: None,
            should_skip: false,
            fitted: None,
            step: None,
        }
    }

    pub fn with_transition_criteria(mut self, criteria: Vec<TransitionCriterion>) -> Self {
        self.transition_criteria = criteria;
        self
    }

    pub fn with_arms_per_trial(mut self, arms: usize) -> Self {
        self.arms_per_trial = Some(arms);
        self
    }

    pub(crate) fn with_step_meta(mut self, meta: StepMeta) -> Self {
        self.step = Some(meta);
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn model_specs(&self) -> &[ModelSpec] {
        &self.model_specs
    }

    /// The spec generation currently draws from (the first of the list).
    pub fn model_spec_to_gen_from(&self) -> &ModelSpec {
        &self.model_specs[0]
    }

    pub fn transition_criteria(&self) -> &[TransitionCriterion] {
        &self.transition_criteria
    }

    pub fn previous_node_name(&self) -> Option<&str> {
        self.previous_node_name.as_deref()
    }

    pub fn step(&self) -> Option<&StepMeta> {
        self.step.as_ref()
    }

    /// The currently cached fitted adapter, if a generation has happened and
    /// the strategy has not transitioned away since.
    pub fn fitted_model(&self) -> Option<&dyn Adapter> {
        self.fitted.as_deref()
    }

    pub(crate) fn clear_fitted(&mut self) {
        self.fitted = None;
    }

    /// Criteria grouped into transition edges by target, in declaration
    /// order. Parallelism criteria land on the `None` edge.
    pub fn transition_edges(&self) -> Vec<(Option<String>, Vec<&TransitionCriterion>)> {
        let mut edges: Vec<(Option<String>, Vec<&TransitionCriterion>)> = Vec::new();
        for tc in &self.transition_criteria {
            let target = tc.transition_to().map(str::to_string);
            match edges.iter_mut().find(|(t, _)| *t == target) {
                Some((_, tcs)) => tcs.push(tc),
                None => edges.push((target, vec![tc])),
            }
        }
        edges
    }

    /// Evaluate all attached criteria and report whether the strategy should
    /// move on, plus the resolved target node if one is named.
    ///
    /// An edge fires when every non-parallelism criterion on it is met;
    /// parallelism criteria never advance the pointer. When no edge fires but
    /// an unmet criterion blocks generation (it needs data that is not there
    /// yet), the distinguished data-required condition is either raised or
    /// folded into an ordinary `false`, per `raise_data_required_error`.
    ///
    /// Read-only: repeated calls without an intervening `gen` are free of
    /// side effects.
    pub fn should_transition_to_next_node(
        &self,
        experiment: &Experiment,
        generator_runs: &[GeneratorRun],
        raise_data_required_error: bool,
    ) -> CoreResult<(bool, Option<String>)> {
        let edges = self.transition_edges();

        for (target, tcs) in &edges {
            let gating: Vec<&&TransitionCriterion> =
                tcs.iter().filter(|tc| !tc.is_parallelism()).collect();
            if gating.is_empty() {
                continue;
            }
            if gating
                .iter()
                .all(|tc| tc.is_met(experiment, &self.node_name, generator_runs))
            {
                return Ok((true, target.clone()));
            }
        }

        if raise_data_required_error {
            for (_, tcs) in &edges {
                for tc in tcs {
                    if tc.blocks_gen_if_unmet()
                        && !tc.is_met(experiment, &self.node_name, generator_runs)
                    {
                        return Err(GenerationError::DataRequired {
                            message: format!(
                                "criterion {} on node '{}' is not yet satisfied",
                                tc.criterion_key(),
                                self.node_name
                            ),
                        }
                        .into());
                    }
                }
            }
        }

        Ok((false, None))
    }

    /// Whether this node is done generating: it carries at least one trial
    /// budget and every budget criterion is met. Budget-less nodes (unlimited
    /// phases) never report completion.
    pub fn is_completed(&self, experiment: &Experiment, generator_runs: &[GeneratorRun]) -> bool {
        let budget: Vec<&TransitionCriterion> = self
            .transition_criteria
            .iter()
            .filter(|tc| tc.is_trial_budget())
            .collect();
        !budget.is_empty()
            && budget
                .iter()
                .all(|tc| tc.is_met(experiment, &self.node_name, generator_runs))
    }

    /// Remaining trial budget before this node must transition: -1 when
    /// unlimited, otherwise the minimum remaining count over all trial-budget
    /// criteria. With `raise_generation_errors`, a hit parallelism gate
    /// surfaces as an error instead of being ignored.
    pub fn new_trial_limit(
        &self,
        experiment: &Experiment,
        raise_generation_errors: bool,
    ) -> CoreResult<i64> {
        if raise_generation_errors {
            self.check_parallelism_gate(experiment)?;
        }
        let mut limit: Option<usize> = None;
        for tc in &self.transition_criteria {
            if let Some(remaining) = tc.remaining_trials(experiment, &self.node_name) {
                limit = Some(limit.map_or(remaining, |current| current.min(remaining)));
            }
        }
        Ok(limit.map_or(-1, |l| l as i64))
    }

    fn check_parallelism_gate(&self, experiment: &Experiment) -> CoreResult<()> {
        for tc in &self.transition_criteria {
            if let TransitionCriterion::MaxGenerationParallelism { threshold } = tc {
                let running = experiment.num_running_trials();
                if running >= *threshold {
                    return Err(GenerationError::MaxParallelismReached {
                        message: format!(
                            "node '{}' allows {} running trials, experiment has {}",
                            self.node_name, threshold, running
                        ),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Fit this node's adapter (unless a cached fit from earlier in the same
    /// multi-node trial is still valid) and produce a generator run.
    ///
    /// Arm count resolution order: the caller's `arms_per_node` override,
    /// then the node-declared count, then the caller's `n`, then the
    /// strategy-wide default. A resolved count of zero marks the node as
    /// skipped and yields `Ok(None)`.
    #[allow(clippy::too_many_arguments)]
    pub fn gen(
        &mut self,
        experiment: &Experiment,
        data: Option<&Data>,
        n: Option<usize>,
        pending_observations: &PendingObservations,
        skip_fit: bool,
        fixed_features: Option<&ObservationFeatures>,
        arms_per_node: Option<&BTreeMap<String, usize>>,
    ) -> CoreResult<Option<GeneratorRun>> {
        self.check_parallelism_gate(experiment)?;

        let resolved_n = arms_per_node
            .and_then(|map| map.get(&self.node_name).copied())
            .or(self.arms_per_trial)
            .or(n)
            .unwrap_or(DEFAULT_N);
        if resolved_n == 0 {
            debug!(node = %self.node_name, "node resolved to zero arms, skipping generation");
            self.should_skip = true;
            return Ok(None);
        }
        self.should_skip = false;

        if !(skip_fit && self.fitted.is_some()) {
            let mut adapter = self.model_spec_to_gen_from().build();
            let merged;
            let data_ref = match data {
                Some(d) => d,
                None => {
                    merged = experiment.lookup_data();
                    &merged
                }
            };
            adapter.fit(experiment, data_ref)?;
            self.fitted = Some(adapter);
        }

        let adapter = self
            .fitted
            .as_mut()
            .ok_or_else(|| CoreError::Internal("generation node lost its fitted adapter".into()))?;
        let mut generator_run = adapter.gen(GenRequest {
            n: resolved_n,
            search_space: &experiment.search_space,
            pending_observations,
            fixed_features,
        })?;
        generator_run.generation_node_name = Some(self.node_name.clone());
        Ok(Some(generator_run))
    }

    /// A copy of this node's configuration with all traversal state cleared:
    /// no previous node, no skip flag, no cached fitted adapter.
    pub fn clone_reset(&self) -> Self {
        Self {
            node_name: self.node_name.clone(),
            model_specs: self.model_specs.clone(),
            transition_criteria: self.transition_criteria.clone(),
            arms_per_trial: self.arms_per_trial,
            previous_node_name: None,
            should_skip: false,
            fitted: None,
            step: self.step.clone(),
        }
    }
}

impl fmt::Debug for GenerationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationNode")
            .field("node_name", &self.node_name)
            .field(
                "model_specs",
                &self
                    .model_specs
                    .iter()
                    .map(ModelSpec::model_key)
                    .collect::<Vec<_>>(),
            )
            .field("transition_criteria", &self.transition_criteria.len())
            .field("previous_node_name", &self.previous_node_name)
            .field("should_skip", &self.should_skip)
            .field("fitted", &self.fitted.is_some())
            .field("step", &self.step)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_adapter::ModelKind;
    use tl_types::{ObjectiveDirection, OptimizationConfig, SearchSpace};

    fn uniform_spec(seed: u64) -> ModelSpec {
        ModelSpec::registered(ModelKind::Uniform { seed })
    }

    fn sample_experiment() -> Experiment {
        Experiment::new("node_test", SearchSpace::new().add_int("x", 0, 1000))
            .with_optimization_config(OptimizationConfig::new(
                "loss",
                ObjectiveDirection::Minimize,
            ))
    }

    fn sample_node() -> GenerationNode {
        GenerationNode::new("init", uniform_spec(0)).with_transition_criteria(vec![
            TransitionCriterion::min_trials(2, Some("bayes".into())),
            TransitionCriterion::max_parallelism(3),
        ])
    }

    #[test]
    fn transition_edges_group_by_target() {
        let node = GenerationNode::new("init", uniform_spec(0)).with_transition_criteria(vec![
            TransitionCriterion::min_trials(2, Some("bayes".into())),
            TransitionCriterion::min_observed_data(1, Some("bayes".into())),
            TransitionCriterion::max_parallelism(3),
        ]);
        let edges = node.transition_edges();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].0.as_deref(), Some("bayes"));
        assert_eq!(edges[0].1.len(), 2);
        assert_eq!(edges[1].0, None);
        assert_eq!(edges[1].1.len(), 1);
    }

    #[test]
    fn gen_stamps_node_provenance() {
        let mut node = sample_node();
        let experiment = sample_experiment();
        let pending = PendingObservations::new();
        let run = node
            .gen(&experiment, None, Some(2), &pending, false, None, None)
            .unwrap()
            .unwrap();
        assert_eq!(run.generation_node_name.as_deref(), Some("init"));
        assert_eq!(run.arms.len(), 2);
        assert!(node.fitted_model().is_some());
    }

    #[test]
    fn arm_count_resolution_precedence() {
        let experiment = sample_experiment();
        let pending = PendingObservations::new();

        // Node-declared count beats the caller's n.
        let mut node = GenerationNode::new("init", uniform_spec(0)).with_arms_per_trial(3);
        let run = node
            .gen(&experiment, None, Some(7), &pending, false, None, None)
            .unwrap()
            .unwrap();
        assert_eq!(run.arms.len(), 3);

        // arms_per_node beats both.
        let mut override_map = BTreeMap::new();
        override_map.insert("init".to_string(), 5usize);
        let run = node
            .gen(
                &experiment,
                None,
                Some(7),
                &pending,
                false,
                None,
                Some(&override_map),
            )
            .unwrap()
            .unwrap();
        assert_eq!(run.arms.len(), 5);
    }

    #[test]
    fn zero_arms_skips_and_flags() {
        let mut node = sample_node();
        let experiment = sample_experiment();
        let pending = PendingObservations::new();
        let mut override_map = BTreeMap::new();
        override_map.insert("init".to_string(), 0usize);

        let result = node
            .gen(
                &experiment,
                None,
                Some(1),
                &pending,
                false,
                None,
                Some(&override_map),
            )
            .unwrap();
        assert!(result.is_none());
        assert!(node.should_skip);

        // A later attempt with a real count resets the flag.
        let result = node
            .gen(&experiment, None, Some(1), &pending, false, None, None)
            .unwrap();
        assert!(result.is_some());
        assert!(!node.should_skip);
    }

    #[test]
    fn new_trial_limit_reflects_budget() {
        let node = sample_node();
        let mut experiment = sample_experiment();
        assert_eq!(node.new_trial_limit(&experiment, false).unwrap(), 2);

        let pending = PendingObservations::new();
        let mut gen_node = sample_node();
        let run = gen_node
            .gen(&experiment, None, Some(1), &pending, false, None, None)
            .unwrap()
            .unwrap();
        experiment.attach_generator_run(run);
        assert_eq!(node.new_trial_limit(&experiment, false).unwrap(), 1);

        let unlimited = GenerationNode::new("bayes", uniform_spec(1));
        assert_eq!(unlimited.new_trial_limit(&experiment, false).unwrap(), -1);
    }

    #[test]
    fn parallelism_gate_blocks_generation() {
        let mut node = GenerationNode::new("init", uniform_spec(0))
            .with_transition_criteria(vec![TransitionCriterion::max_parallelism(1)]);
        let mut experiment = sample_experiment();
        let pending = PendingObservations::new();

        let run = node
            .gen(&experiment, None, Some(1), &pending, false, None, None)
            .unwrap()
            .unwrap();
        let trial = experiment.attach_generator_run(run);
        experiment.trial_mut(trial).unwrap().mark_running();

        let err = node
            .gen(&experiment, None, Some(1), &pending, false, None, None)
            .unwrap_err();
        assert!(err.is_recoverable_generation_condition());
        assert!(node.new_trial_limit(&experiment, true).is_err());
        assert_eq!(node.new_trial_limit(&experiment, false).unwrap(), -1);

        experiment.trial_mut(trial).unwrap().mark_completed();
        assert!(node
            .gen(&experiment, None, Some(1), &pending, false, None, None)
            .is_ok());
    }

    #[test]
    fn blocking_criterion_surfaces_data_required() {
        let node = GenerationNode::new("init", uniform_spec(0)).with_transition_criteria(vec![
            TransitionCriterion::min_observed_data(1, Some("bayes".into())),
        ]);
        let experiment = sample_experiment();

        // Without the raise flag the unmet criterion reads as "not yet".
        let (should, target) = node
            .should_transition_to_next_node(&experiment, &[], false)
            .unwrap();
        assert!(!should);
        assert!(target.is_none());

        // With it, the distinguished data-required condition comes through.
        let err = node
            .should_transition_to_next_node(&experiment, &[], true)
            .unwrap_err();
        match err {
            CoreError::Generation(GenerationError::DataRequired { message }) => {
                assert!(message.contains("MinObservedData"));
                assert!(message.contains("init"));
            }
            other => panic!("expected DataRequired, got {other}"),
        }
    }

    #[test]
    fn completion_requires_budget_criteria() {
        let experiment = sample_experiment();
        let budget_less = GenerationNode::new("bayes", uniform_spec(1));
        assert!(!budget_less.is_completed(&experiment, &[]));

        let node = sample_node();
        assert!(!node.is_completed(&experiment, &[]));
    }

    #[test]
    fn clone_reset_clears_traversal_state() {
        let mut node = sample_node();
        let experiment = sample_experiment();
        let pending = PendingObservations::new();
        node.gen(&experiment, None, Some(1), &pending, false, None, None)
            .unwrap();
        node.previous_node_name = Some("other".into());

        let fresh = node.clone_reset();
        assert_eq!(fresh.node_name(), "init");
        assert_eq!(
            fresh.transition_criteria().len(),
            node.transition_criteria().len()
        );
        assert!(fresh.previous_node_name().is_none());
        assert!(fresh.fitted_model().is_none());
        assert!(!fresh.should_skip);
    }
}
