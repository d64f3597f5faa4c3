//! Experiment state: search space, optimization config, trials and data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::arm::Arm;
use crate::data::Data;
use crate::errors::{CoreResult, ExperimentError};
use crate::generator_run::GeneratorRun;
use crate::search::SearchSpace;
use crate::trial::{Trial, TrialStatus};

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

/// What the experiment is optimizing, and which extra metrics it tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub objective_metric: String,
    pub direction: ObjectiveDirection,
    /// Metrics observed but not optimized.
    pub tracking_metrics: Vec<String>,
}

impl OptimizationConfig {
    pub fn new(objective_metric: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            objective_metric: objective_metric.into(),
            direction,
            tracking_metrics: Vec::new(),
        }
    }

    pub fn with_tracking_metrics(mut self, metrics: Vec<String>) -> Self {
        self.tracking_metrics = metrics;
        self
    }
}

/// The experiment a generation strategy produces trials for.
///
/// Owned by the caller; the strategy only ever reads it, except that callers
/// turn returned generator runs into trials via [`Experiment::attach_generator_run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub search_space: SearchSpace,
    pub optimization_config: Option<OptimizationConfig>,
    /// Baseline arm against which candidates are compared, if any.
    pub status_quo: Option<Arm>,
    pub trials: BTreeMap<u64, Trial>,
    data_by_trial: BTreeMap<u64, Data>,
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    pub fn new(name: impl Into<String>, search_space: SearchSpace) -> Self {
        Self {
            name: name.into(),
            search_space,
            optimization_config: None,
            status_quo: None,
            trials: BTreeMap::new(),
            data_by_trial: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_optimization_config(mut self, config: OptimizationConfig) -> Self {
        self.optimization_config = Some(config);
        self
    }

    pub fn with_status_quo(mut self, arm: Arm) -> Self {
        self.status_quo = Some(arm);
        self
    }

    /// Objective plus tracking metric names, in declaration order.
    pub fn metric_names(&self) -> Vec<String> {
        match &self.optimization_config {
            Some(config) => {
                let mut names = vec![config.objective_metric.clone()];
                names.extend(config.tracking_metrics.iter().cloned());
                names
            }
            None => Vec::new(),
        }
    }

    /// Create a new candidate trial from a generator run, naming its arms
    /// `<trial>_<position>`. Returns the new trial's index.
    pub fn attach_generator_run(&mut self, generator_run: GeneratorRun) -> u64 {
        let index = self
            .trials
            .keys()
            .next_back()
            .map(|last| last + 1)
            .unwrap_or(0);
        let mut trial = Trial::new(index);
        Self::append_run_to_trial(&mut trial, generator_run);
        self.trials.insert(index, trial);
        index
    }

    /// Append a further generator run's arms to an existing trial (batch
    /// trials spanning several generation nodes).
    pub fn attach_generator_run_to_trial(
        &mut self,
        trial_index: u64,
        generator_run: GeneratorRun,
    ) -> CoreResult<()> {
        let trial = self
            .trials
            .get_mut(&trial_index)
            .ok_or(ExperimentError::TrialNotFound { trial_index })?;
        Self::append_run_to_trial(trial, generator_run);
        Ok(())
    }

    fn append_run_to_trial(trial: &mut Trial, generator_run: GeneratorRun) {
        let offset = trial.arms.len();
        for (i, arm) in generator_run.arms.iter().enumerate() {
            let named = Arm::with_name(
                arm.parameters.clone(),
                format!("{}_{}", trial.index, offset + i),
            );
            trial.arms.push(named);
        }
        trial.generator_runs.push(generator_run);
    }

    pub fn trial(&self, trial_index: u64) -> CoreResult<&Trial> {
        self.trials
            .get(&trial_index)
            .ok_or_else(|| ExperimentError::TrialNotFound { trial_index }.into())
    }

    pub fn trial_mut(&mut self, trial_index: u64) -> CoreResult<&mut Trial> {
        self.trials
            .get_mut(&trial_index)
            .ok_or_else(|| ExperimentError::TrialNotFound { trial_index }.into())
    }

    /// Attach observed data for a trial, extending any data already present.
    pub fn attach_data(&mut self, trial_index: u64, data: Data) -> CoreResult<()> {
        if !self.trials.contains_key(&trial_index) {
            return Err(ExperimentError::TrialNotFound { trial_index }.into());
        }
        self.data_by_trial
            .entry(trial_index)
            .or_default()
            .merge(&data);
        Ok(())
    }

    /// All attached data merged into a single set, in trial order.
    pub fn lookup_data(&self) -> Data {
        let mut merged = Data::default();
        for data in self.data_by_trial.values() {
            merged.merge(data);
        }
        merged
    }

    pub fn num_trials(&self) -> usize {
        self.trials.len()
    }

    pub fn num_trials_in(&self, statuses: &[TrialStatus]) -> usize {
        self.trials
            .values()
            .filter(|t| statuses.contains(&t.status))
            .count()
    }

    /// Trials currently counting against a parallelism limit.
    pub fn num_running_trials(&self) -> usize {
        self.trials
            .values()
            .filter(|t| t.status.is_running())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ObservationRow;
    use crate::search::{ParameterValue, Parameters, SearchSpace};

    fn run_with_arms(xs: &[i64]) -> GeneratorRun {
        let arms = xs
            .iter()
            .map(|x| {
                let mut p = Parameters::new();
                p.insert("x".into(), ParameterValue::Int(*x));
                Arm::new(p)
            })
            .collect();
        GeneratorRun::new(arms, "uniform")
    }

    fn sample_experiment() -> Experiment {
        Experiment::new("exp", SearchSpace::new().add_int("x", 0, 100))
    }

    #[test]
    fn attach_names_arms_by_trial_and_position() {
        let mut experiment = sample_experiment();
        let t0 = experiment.attach_generator_run(run_with_arms(&[1, 2]));
        assert_eq!(t0, 0);

        let trial = experiment.trial(t0).unwrap();
        assert_eq!(trial.arms[0].name.as_deref(), Some("0_0"));
        assert_eq!(trial.arms[1].name.as_deref(), Some("0_1"));
        assert_eq!(trial.generator_runs.len(), 1);
    }

    #[test]
    fn attach_to_existing_trial_offsets_names() {
        let mut experiment = sample_experiment();
        let t0 = experiment.attach_generator_run(run_with_arms(&[1]));
        experiment
            .attach_generator_run_to_trial(t0, run_with_arms(&[2]))
            .unwrap();

        let trial = experiment.trial(t0).unwrap();
        assert_eq!(trial.arms.len(), 2);
        assert_eq!(trial.arms[1].name.as_deref(), Some("0_1"));
        assert_eq!(trial.generator_runs.len(), 2);
    }

    #[test]
    fn attach_data_requires_known_trial() {
        let mut experiment = sample_experiment();
        let err = experiment.attach_data(7, Data::default()).unwrap_err();
        assert!(err.to_string().contains("Trial not found"));
    }

    #[test]
    fn lookup_data_merges_across_trials() {
        let mut experiment = sample_experiment();
        let t0 = experiment.attach_generator_run(run_with_arms(&[1]));
        let t1 = experiment.attach_generator_run(run_with_arms(&[2]));

        for (trial, mean) in [(t0, 1.0), (t1, 2.0)] {
            experiment
                .attach_data(
                    trial,
                    Data::new(vec![ObservationRow {
                        arm_name: format!("{trial}_0"),
                        metric_name: "loss".into(),
                        trial_index: Some(trial),
                        mean,
                        sem: None,
                    }]),
                )
                .unwrap();
        }

        let merged = experiment.lookup_data();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.arms_with_data("loss").len(), 2);
    }

    #[test]
    fn running_trial_count_tracks_statuses() {
        let mut experiment = sample_experiment();
        let t0 = experiment.attach_generator_run(run_with_arms(&[1]));
        let t1 = experiment.attach_generator_run(run_with_arms(&[2]));
        assert_eq!(experiment.num_running_trials(), 0);

        experiment.trial_mut(t0).unwrap().mark_running();
        experiment.trial_mut(t1).unwrap().mark_staged();
        assert_eq!(experiment.num_running_trials(), 2);

        experiment.trial_mut(t0).unwrap().mark_completed();
        assert_eq!(experiment.num_running_trials(), 1);
        assert_eq!(
            experiment.num_trials_in(&[TrialStatus::Completed]),
            1
        );
    }
}
