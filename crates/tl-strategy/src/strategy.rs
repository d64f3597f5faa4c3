//! The generation strategy: the state machine driving model selection and
//! candidate generation across an optimization.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info, warn};

use tl_adapter::Adapter;
use tl_types::{
    extend_pending_observations, extract_pending_observations, CoreError, CoreResult, Data,
    Experiment, GenerationError, GeneratorRun, ObservationFeatures, PendingObservations,
};

use crate::node::GenerationNode;
use crate::step::GenerationStep;

/// Arms requested per generator run when the caller does not say otherwise.
pub const DEFAULT_N: usize = 1;

/// Upper bound on inner-loop iterations of one generation call. Only reached
/// when transition criteria form a cycle that keeps continuing the same
/// trial, which is a configuration mistake rather than a workload.
const MAX_GEN_LOOP_ITERATIONS: usize = 64;

/// Orchestrates which model generates new points for which trials.
///
/// A strategy owns an ordered list of [`GenerationNode`]s and a pointer to
/// the current one. On every generation call it evaluates the current node's
/// transition criteria against live experiment state, advances the pointer
/// when an edge fires, and drives the resolved node's adapter to produce a
/// [`GeneratorRun`]. All produced runs are kept in an append-only history so
/// the strategy can be persisted and resumed deterministically.
#[derive(Debug)]
pub struct GenerationStrategy {
    name: String,
    nodes: Vec<GenerationNode>,
    node_names: Vec<String>,
    curr_index: usize,
    /// Name of the experiment this strategy generates for; set on first use
    /// and immutable afterwards.
    experiment_name: Option<String>,
    generator_runs: Vec<GeneratorRun>,
    uses_registered_models: bool,
    is_node_based: bool,
}

impl GenerationStrategy {
    /// Build a strategy from an explicit node graph.
    ///
    /// Validates that node names are unique, that every `transition_to`
    /// target names a node in this strategy, that all criteria on one
    /// transition edge agree on `continue_trial_generation`, and that only
    /// parallelism criteria omit a target.
    pub fn from_nodes(name: Option<String>, nodes: Vec<GenerationNode>) -> CoreResult<Self> {
        let node_names = Self::validate_nodes(&nodes)?;
        Self::validate_node_graph(&nodes, &node_names)?;
        let name = name.unwrap_or_else(|| node_names.join("+"));
        Ok(Self::assemble(name, nodes, node_names, true))
    }

    /// Build a strategy from a fixed step sequence, compiling each step into
    /// a node with auto-wired transition criteria.
    pub fn from_steps(name: Option<String>, steps: Vec<GenerationStep>) -> CoreResult<Self> {
        if steps.is_empty() {
            return Err(misconfigured(
                "a generation strategy must contain at least one step",
            ));
        }
        let default_name = steps
            .iter()
            .map(|s| s.model_spec.model_key().to_string())
            .collect::<Vec<_>>()
            .join("+");
        let total = steps.len();
        let nodes = steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| step.into_node(i, i + 1 == total))
            .collect::<CoreResult<Vec<_>>>()?;
        let node_names = Self::validate_nodes(&nodes)?;
        Ok(Self::assemble(
            name.unwrap_or(default_name),
            nodes,
            node_names,
            false,
        ))
    }

    fn assemble(
        name: String,
        nodes: Vec<GenerationNode>,
        node_names: Vec<String>,
        is_node_based: bool,
    ) -> Self {
        let uses_registered_models = nodes
            .iter()
            .flat_map(|n| n.model_specs())
            .all(|spec| spec.is_registered());
        if !uses_registered_models {
            warn!(
                strategy = %name,
                "using a factory-built model; optimization will not be resumable if interrupted"
            );
        }
        Self {
            name,
            nodes,
            node_names,
            curr_index: 0,
            experiment_name: None,
            generator_runs: Vec::new(),
            uses_registered_models,
            is_node_based,
        }
    }

    fn validate_nodes(nodes: &[GenerationNode]) -> CoreResult<Vec<String>> {
        if nodes.is_empty() {
            return Err(misconfigured(
                "a generation strategy must contain at least one node",
            ));
        }
        let mut names: Vec<String> = Vec::with_capacity(nodes.len());
        for node in nodes {
            if node.model_specs().is_empty() {
                return Err(misconfigured(&format!(
                    "node '{}' must declare at least one model spec",
                    node.node_name()
                )));
            }
            if names.iter().any(|n| n == node.node_name()) {
                return Err(misconfigured(
                    "all node names in a generation strategy must be unique",
                ));
            }
            names.push(node.node_name().to_string());
        }
        Ok(names)
    }

    fn validate_node_graph(nodes: &[GenerationNode], node_names: &[String]) -> CoreResult<()> {
        let mut has_transition_edge = false;
        for node in nodes {
            for (target, tcs) in node.transition_edges() {
                match target {
                    None => {
                        // Parallelism criteria legitimately carry no target;
                        // anything else on a target-less edge is malformed.
                        for tc in tcs {
                            if !tc.is_parallelism() {
                                return Err(misconfigured(&format!(
                                    "only MaxGenerationParallelism criteria can omit a \
                                     transition_to target, but {} on node '{}' does not \
                                     define one",
                                    tc.criterion_key(),
                                    node.node_name()
                                )));
                            }
                        }
                    }
                    Some(target) => {
                        has_transition_edge = true;
                        if !node_names.contains(&target) {
                            return Err(misconfigured(&format!(
                                "transition_to target '{}' on node '{}' does not correspond \
                                 to any node in this generation strategy",
                                target,
                                node.node_name()
                            )));
                        }
                        let continue_flags: Vec<bool> = tcs
                            .iter()
                            .filter(|tc| !tc.is_parallelism())
                            .map(|tc| tc.continue_trial_generation())
                            .collect();
                        if continue_flags.windows(2).any(|w| w[0] != w[1]) {
                            return Err(misconfigured(&format!(
                                "all transition criteria on the edge from node '{}' to node \
                                 '{}' must agree on continue_trial_generation",
                                node.node_name(),
                                target
                            )));
                        }
                    }
                }
            }
        }
        if nodes.len() > 1 && !has_transition_edge {
            warn!(
                "no node in this generation strategy declares a transition_to target; \
                 the strategy will never move past its first node"
            );
        }
        Ok(())
    }

    // ---- accessors ----

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Whether this strategy was built from a node graph rather than a step
    /// sequence.
    pub fn is_node_based(&self) -> bool {
        self.is_node_based
    }

    pub fn nodes(&self) -> &[GenerationNode] {
        &self.nodes
    }

    pub fn node_by_name(&self, name: &str) -> Option<&GenerationNode> {
        self.nodes.iter().find(|n| n.node_name() == name)
    }

    pub fn current_node(&self) -> &GenerationNode {
        &self.nodes[self.curr_index]
    }

    pub fn current_node_name(&self) -> &str {
        self.nodes[self.curr_index].node_name()
    }

    /// Index of the current generation step. Kept for backward compatibility
    /// with step-based strategies; fails on node-graph strategies, which
    /// identify position by node name instead.
    pub fn current_step_index(&self) -> CoreResult<usize> {
        if self.is_node_based {
            return Err(unsupported(
                "current_step_index is not supported for node-based generation strategies; \
                 use current_node_name",
            ));
        }
        Ok(self.curr_index)
    }

    /// \[DEPRECATED\] Trial indices where the strategy moved from one model to
    /// another. Permanently disabled; read the `model_key` field on generator
    /// runs for equivalent information.
    pub fn model_transitions(&self) -> CoreResult<Vec<u64>> {
        if self.is_node_based {
            return Err(unsupported(
                "model_transitions is not supported for node-based generation strategies",
            ));
        }
        Err(unsupported(
            "model_transitions is no longer supported; refer to the model_key field on \
             generator runs for similar information",
        ))
    }

    /// The current node's fitted adapter, if any generation has happened
    /// since the strategy last transitioned.
    pub fn model(&self) -> Option<&dyn Adapter> {
        self.current_node().fitted_model()
    }

    /// Name of the experiment this strategy is bound to, once `gen` has been
    /// called.
    pub fn experiment_name(&self) -> Option<&str> {
        self.experiment_name.as_deref()
    }

    /// All generator runs created through this strategy, in chronological
    /// order.
    pub fn generator_runs(&self) -> &[GeneratorRun] {
        &self.generator_runs
    }

    pub fn last_generator_run(&self) -> Option<&GeneratorRun> {
        self.generator_runs.last()
    }

    /// Whether this strategy involves models that are not registered and
    /// therefore cannot be restored from storage.
    pub fn uses_non_registered_models(&self) -> bool {
        !self.uses_registered_models
    }

    /// True iff every node reports itself completed: no more generation is
    /// possible anywhere in the graph.
    pub fn optimization_complete(&self, experiment: &Experiment) -> bool {
        self.nodes
            .iter()
            .all(|node| node.is_completed(experiment, &self.generator_runs))
    }

    // ---- generation ----

    /// Produce the next generator run for what must become a single trial.
    ///
    /// The experiment binds the strategy on first use; passing a different
    /// experiment later fails. If the underlying multi-node loop yields more
    /// than one run (a batch trial spanning nodes), this entry point fails —
    /// use [`GenerationStrategy::gen_for_multiple_trials`] for those.
    pub fn gen(
        &mut self,
        experiment: &Experiment,
        data: Option<&Data>,
        pending_observations: Option<&PendingObservations>,
        n: usize,
    ) -> CoreResult<GeneratorRun> {
        self.gen_with_fixed_features(experiment, data, pending_observations, n, None)
    }

    /// Like [`GenerationStrategy::gen`], pinning the given features on every
    /// produced arm.
    pub fn gen_with_fixed_features(
        &mut self,
        experiment: &Experiment,
        data: Option<&Data>,
        pending_observations: Option<&PendingObservations>,
        n: usize,
        fixed_features: Option<&ObservationFeatures>,
    ) -> CoreResult<GeneratorRun> {
        self.bind_experiment(experiment)?;
        // The caller's pending map is copied, never mutated in place.
        let mut pending = pending_observations.cloned().unwrap_or_default();
        let mut runs = self.gen_with_multiple_nodes(
            experiment,
            data,
            Some(n),
            &mut pending,
            fixed_features,
            None,
            true,
        )?;
        if runs.len() > 1 {
            return Err(unsupported(&format!(
                "GenerationStrategy::gen produces a single trial with one generator run, but \
                 the strategy produced {} generator runs for this trial; use \
                 gen_for_multiple_trials for batch trials spanning several nodes",
                runs.len()
            )));
        }
        runs.pop().ok_or_else(|| {
            CoreError::Internal(
                "generation produced no generator runs; every visited node was skipped".into(),
            )
        })
    }

    /// Produce generator runs for several trials at once, allowing multiple
    /// nodes (and therefore models) to contribute runs to each trial.
    ///
    /// The requested `num_trials` is clamped to the current node's remaining
    /// trial budget when that budget is finite. The pending-observations map
    /// is copied from the caller (or extracted from the experiment) once and
    /// then evolves across trials, so arms proposed for trial *k* are not
    /// re-proposed for trial *k + 1*.
    ///
    /// Returns one inner list of generator runs per suggested trial.
    #[allow(clippy::too_many_arguments)]
    pub fn gen_for_multiple_trials(
        &mut self,
        experiment: &Experiment,
        data: Option<&Data>,
        pending_observations: Option<&PendingObservations>,
        n: Option<usize>,
        fixed_features: Option<&ObservationFeatures>,
        num_trials: usize,
        arms_per_node: Option<&BTreeMap<String, usize>>,
    ) -> CoreResult<Vec<Vec<GeneratorRun>>> {
        self.bind_experiment(experiment)?;
        let mut pending = match pending_observations {
            Some(p) => p.clone(),
            None => extract_pending_observations(experiment),
        };

        let limit = self.nodes[self.curr_index].new_trial_limit(experiment, false)?;
        let num_trials = if limit < 0 {
            num_trials.max(1)
        } else {
            num_trials.min(limit as usize).max(1)
        };

        let mut trials: Vec<Vec<GeneratorRun>> = Vec::with_capacity(num_trials);
        for _ in 0..num_trials {
            let first_generation_in_multi = trials.is_empty();
            match self.gen_with_multiple_nodes(
                experiment,
                data,
                n,
                &mut pending,
                fixed_features,
                arms_per_node,
                first_generation_in_multi,
            ) {
                Ok(runs) => trials.push(runs),
                Err(err) if err.is_recoverable_generation_condition() => {
                    // Partial progress across trials is valid output.
                    if trials.is_empty() {
                        return Err(err);
                    }
                    debug!(error = %err, "stopping multi-trial generation early");
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(trials)
    }

    /// How many more generator runs can be produced right now, assuming each
    /// becomes its own trial, and whether the strategy is exhausted.
    ///
    /// Safe to call between generations: it may eagerly advance the pointer
    /// to the next node (the next `gen` would do the same), but performs no
    /// generation. A -1 count means unlimited.
    pub fn current_generator_run_limit(
        &mut self,
        experiment: &Experiment,
    ) -> CoreResult<(i64, bool)> {
        match self.maybe_transition_to_next_node(experiment, false) {
            Ok(_) => {}
            Err(CoreError::Generation(GenerationError::Completed { .. })) => {
                return Ok((0, true));
            }
            Err(err) => return Err(err),
        }
        let limit = self.nodes[self.curr_index].new_trial_limit(experiment, false)?;
        Ok((limit, false))
    }

    /// A copy of this strategy without any of its state: same node
    /// configuration, empty history, no experiment bound, pointer back at
    /// the first node. The clone shares no mutable state with the original.
    pub fn clone_reset(&self) -> Self {
        Self {
            name: self.name.clone(),
            nodes: self.nodes.iter().map(GenerationNode::clone_reset).collect(),
            node_names: self.node_names.clone(),
            curr_index: 0,
            experiment_name: None,
            generator_runs: Vec::new(),
            uses_registered_models: self.uses_registered_models,
            is_node_based: self.is_node_based,
        }
    }

    // ---- candidate generation internals ----

    /// Produce the generator runs for ONE trial, looping across nodes while
    /// the fired transition edges mark `continue_trial_generation`.
    #[allow(clippy::too_many_arguments)]
    fn gen_with_multiple_nodes(
        &mut self,
        experiment: &Experiment,
        data: Option<&Data>,
        n: Option<usize>,
        pending: &mut PendingObservations,
        fixed_features: Option<&ObservationFeatures>,
        arms_per_node: Option<&BTreeMap<String, usize>>,
        first_generation_in_multi: bool,
    ) -> CoreResult<Vec<GeneratorRun>> {
        self.bind_experiment(experiment)?;
        if self.optimization_complete(experiment) {
            return Err(self.completed_error());
        }
        self.validate_arms_per_node(arms_per_node)?;

        let mut runs_this_gen: Vec<GeneratorRun> = Vec::new();
        for iteration in 0.. {
            if iteration >= MAX_GEN_LOOP_ITERATIONS {
                return Err(CoreError::Internal(format!(
                    "generation loop exceeded {MAX_GEN_LOOP_ITERATIONS} iterations for one \
                     trial; transition criteria likely form a cycle that always continues \
                     trial generation"
                )));
            }
            match self.gen_once(
                experiment,
                data,
                n,
                pending,
                fixed_features,
                arms_per_node,
                first_generation_in_multi && iteration == 0,
            ) {
                Ok(Some(run)) => {
                    // Arms proposed by this node must be invisible to the
                    // next one in the same loop.
                    extend_pending_observations(experiment, pending, &run);
                    self.generator_runs.push(run.clone());
                    runs_this_gen.push(run);
                }
                Ok(None) => {
                    // Node was visited but deliberately produced nothing.
                }
                Err(err) if err.is_recoverable_generation_condition() => {
                    // Partial progress within a trial is valid output; with
                    // nothing produced the condition belongs to the caller.
                    if runs_this_gen.is_empty() {
                        return Err(err);
                    }
                    debug!(error = %err, "model could not contribute further runs to this trial");
                    break;
                }
                Err(err) => return Err(err),
            }
            if !self.should_continue_gen_for_trial(experiment)? {
                break;
            }
        }
        Ok(runs_this_gen)
    }

    /// One iteration of the multi-node loop: transition if warranted, then
    /// generate from whichever node the pointer resolved to.
    ///
    /// The transition check runs against the pre-transition current node;
    /// generation runs on the post-transition one. A fitted adapter is
    /// reused only when neither "this is the first generation of the call"
    /// nor "the pointer just moved" forces a refit.
    #[allow(clippy::too_many_arguments)]
    fn gen_once(
        &mut self,
        experiment: &Experiment,
        data: Option<&Data>,
        n: Option<usize>,
        pending: &PendingObservations,
        fixed_features: Option<&ObservationFeatures>,
        arms_per_node: Option<&BTreeMap<String, usize>>,
        first_generation: bool,
    ) -> CoreResult<Option<GeneratorRun>> {
        let transitioned = self.maybe_transition_to_next_node(experiment, true)?;
        let skip_fit = !(first_generation || transitioned);
        let node = &mut self.nodes[self.curr_index];
        node.gen(
            experiment,
            data,
            n,
            pending,
            skip_fit,
            fixed_features,
            arms_per_node,
        )
    }

    /// Whether another node should contribute runs to the SAME trial: true
    /// only when the current node would transition and every criterion on
    /// the fired edge marks `continue_trial_generation`.
    fn should_continue_gen_for_trial(&self, experiment: &Experiment) -> CoreResult<bool> {
        let node = &self.nodes[self.curr_index];
        let (should_transition, next) =
            node.should_transition_to_next_node(experiment, &self.generator_runs, false)?;
        if !should_transition {
            return Ok(false);
        }
        // Positional-fallback edges carry no named target; they always end
        // generation for the current trial.
        let Some(next) = next else {
            return Ok(false);
        };
        for (target, tcs) in node.transition_edges() {
            if target.as_deref() == Some(next.as_str()) {
                return Ok(tcs
                    .iter()
                    .filter(|tc| !tc.is_parallelism())
                    .all(|tc| tc.continue_trial_generation()));
            }
        }
        Ok(false)
    }

    /// Move to the next node if the current one is completed for generation
    /// purposes. Raises the completed condition when the whole strategy is
    /// exhausted, or when the final node wants to move on without naming a
    /// successor.
    fn maybe_transition_to_next_node(
        &mut self,
        experiment: &Experiment,
        raise_data_required_error: bool,
    ) -> CoreResult<bool> {
        let (move_on, target) = self.nodes[self.curr_index].should_transition_to_next_node(
            experiment,
            &self.generator_runs,
            raise_data_required_error,
        )?;
        if !move_on {
            return Ok(false);
        }
        if self.optimization_complete(experiment) {
            return Err(self.completed_error());
        }
        let next_name = match target {
            Some(name) => name,
            None => {
                // No criterion named a successor: fall back to declaration
                // order, treating the end of the list as exhaustion.
                if self.curr_index + 1 >= self.nodes.len() {
                    return Err(self.completed_error());
                }
                self.node_names[self.curr_index + 1].clone()
            }
        };
        let next_index = self
            .node_names
            .iter()
            .position(|name| *name == next_name)
            .ok_or_else(|| {
                CoreError::Internal(format!(
                    "resolved transition target '{next_name}' is not a node of this strategy"
                ))
            })?;
        if next_index != self.curr_index {
            let previous = self.node_names[self.curr_index].clone();
            // Model state never carries across node boundaries.
            self.nodes[self.curr_index].clear_fitted();
            self.curr_index = next_index;
            let node = &mut self.nodes[next_index];
            node.previous_node_name = Some(previous.clone());
            node.should_skip = false;
            info!(from = %previous, to = %next_name, "generation strategy transitioned");
        }
        Ok(true)
    }

    fn bind_experiment(&mut self, experiment: &Experiment) -> CoreResult<()> {
        match &self.experiment_name {
            None => {
                self.experiment_name = Some(experiment.name.clone());
                Ok(())
            }
            Some(bound) if *bound == experiment.name => Ok(()),
            Some(bound) => Err(unsupported(&format!(
                "this generation strategy has generated trials for experiment '{bound}' and \
                 cannot be rebound to '{}'; create a new generation strategy for a new \
                 optimization",
                experiment.name
            ))),
        }
    }

    fn validate_arms_per_node(
        &self,
        arms_per_node: Option<&BTreeMap<String, usize>>,
    ) -> CoreResult<()> {
        let Some(map) = arms_per_node else {
            return Ok(());
        };
        let missing: Vec<&str> = self
            .node_names
            .iter()
            .filter(|name| !map.contains_key(*name))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(GenerationError::UserInput {
                message: format!(
                    "arms_per_node must define an arm count for every node in the generation \
                     strategy; missing: {}",
                    missing.join(", ")
                ),
            }
            .into())
        }
    }

    fn completed_error(&self) -> CoreError {
        GenerationError::Completed {
            message: format!(
                "generation strategy '{}' generated all the trials specified in its nodes",
                self.name
            ),
        }
        .into()
    }
}

impl fmt::Display for GenerationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_node_based {
            return write!(
                f,
                "GenerationStrategy(name='{}', nodes=[{}])",
                self.name,
                self.node_names.join(", ")
            );
        }
        write!(f, "GenerationStrategy(name='{}', steps=[", self.name)?;
        let mut first = true;
        for node in &self.nodes {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            let trials = match node.step().map(|meta| meta.num_trials) {
                Some(-1) | None => {
                    if self.nodes.len() > 1 {
                        "subsequent".to_string()
                    } else {
                        "all".to_string()
                    }
                }
                Some(count) => count.to_string(),
            };
            write!(
                f,
                "{} for {} trials",
                node.model_spec_to_gen_from().model_key(),
                trials
            )?;
        }
        write!(f, "])")
    }
}

fn misconfigured(message: &str) -> CoreError {
    GenerationError::Misconfigured {
        message: message.to_string(),
    }
    .into()
}

fn unsupported(message: &str) -> CoreError {
    GenerationError::Unsupported {
        message: message.to_string(),
    }
    .into()
}
