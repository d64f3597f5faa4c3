//! Observation features and pending-observation bookkeeping.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::arm::Arm;
use crate::experiment::Experiment;
use crate::generator_run::GeneratorRun;
use crate::search::{parameter_signature, Parameters};

/// The feature view of one arm: its parameter assignment plus optional trial
/// provenance. This is what adapters consume for prediction and pending-point
/// exclusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationFeatures {
    pub parameters: Parameters,
    pub trial_index: Option<u64>,
}

impl ObservationFeatures {
    pub fn new(parameters: Parameters) -> Self {
        Self {
            parameters,
            trial_index: None,
        }
    }

    pub fn from_arm(arm: &Arm, trial_index: Option<u64>) -> Self {
        Self {
            parameters: arm.parameters.clone(),
            trial_index,
        }
    }

    pub fn signature(&self) -> String {
        parameter_signature(&self.parameters)
    }
}

/// Map from metric name to arms awaiting evaluation for that metric, used by
/// adapters to avoid re-suggesting points that are already in flight.
pub type PendingObservations = BTreeMap<String, Vec<ObservationFeatures>>;

/// Collect pending observations from an experiment: the arms of every
/// non-terminal trial, listed under each of the experiment's metrics.
pub fn extract_pending_observations(experiment: &Experiment) -> PendingObservations {
    let metrics = experiment.metric_names();
    let mut pending = PendingObservations::new();
    if metrics.is_empty() {
        return pending;
    }
    for trial in experiment.trials.values() {
        if trial.status.is_terminal() {
            continue;
        }
        for arm in &trial.arms {
            let features = ObservationFeatures::from_arm(arm, Some(trial.index));
            for metric in &metrics {
                push_if_absent(pending.entry(metric.clone()).or_default(), &features);
            }
        }
    }
    pending
}

/// Extend a pending-observations map with the arms of a freshly produced
/// generator run, deduplicating by parameter signature.
pub fn extend_pending_observations(
    experiment: &Experiment,
    pending: &mut PendingObservations,
    generator_run: &GeneratorRun,
) {
    let metrics = experiment.metric_names();
    for arm in &generator_run.arms {
        let features = ObservationFeatures::from_arm(arm, None);
        for metric in &metrics {
            push_if_absent(pending.entry(metric.clone()).or_default(), &features);
        }
    }
}

fn push_if_absent(entries: &mut Vec<ObservationFeatures>, features: &ObservationFeatures) {
    let seen: BTreeSet<String> = entries.iter().map(ObservationFeatures::signature).collect();
    if !seen.contains(&features.signature()) {
        entries.push(features.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{Experiment, ObjectiveDirection, OptimizationConfig};
    use crate::search::{ParameterValue, SearchSpace};

    fn sample_experiment() -> Experiment {
        let space = SearchSpace::new().add_int("x", 0, 10);
        Experiment::new("pending_test", space).with_optimization_config(
            OptimizationConfig::new("loss", ObjectiveDirection::Minimize),
        )
    }

    fn run_with_arm(x: i64) -> GeneratorRun {
        let mut params = Parameters::new();
        params.insert("x".into(), ParameterValue::Int(x));
        GeneratorRun::new(vec![Arm::new(params)], "uniform")
    }

    #[test]
    fn extract_skips_terminal_trials() {
        let mut experiment = sample_experiment();
        let t0 = experiment.attach_generator_run(run_with_arm(1));
        let t1 = experiment.attach_generator_run(run_with_arm(2));
        experiment
            .trial_mut(t0)
            .unwrap()
            .mark_completed();
        let _ = t1;

        let pending = extract_pending_observations(&experiment);
        let for_loss = pending.get("loss").unwrap();
        assert_eq!(for_loss.len(), 1);
        assert_eq!(
            for_loss[0].parameters.get("x"),
            Some(&ParameterValue::Int(2))
        );
    }

    #[test]
    fn extend_deduplicates_by_signature() {
        let experiment = sample_experiment();
        let mut pending = PendingObservations::new();

        let gr = run_with_arm(5);
        extend_pending_observations(&experiment, &mut pending, &gr);
        extend_pending_observations(&experiment, &mut pending, &gr);

        assert_eq!(pending.get("loss").unwrap().len(), 1);
    }

    #[test]
    fn extend_covers_tracking_metrics() {
        let space = SearchSpace::new().add_int("x", 0, 10);
        let config = OptimizationConfig::new("loss", ObjectiveDirection::Minimize)
            .with_tracking_metrics(vec!["latency".into()]);
        let experiment = Experiment::new("tracked", space).with_optimization_config(config);

        let mut pending = PendingObservations::new();
        extend_pending_observations(&experiment, &mut pending, &run_with_arm(3));
        assert!(pending.contains_key("loss"));
        assert!(pending.contains_key("latency"));
    }
}
