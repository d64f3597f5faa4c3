//! Perturbation surrogate adapter for adaptive optimization phases.
//!
//! Tracks observed (parameters, objective) pairs and biases future sampling
//! toward the incumbent best. A full Gaussian-process backend can be slotted
//! in behind the same [`Adapter`] trait; this implementation uses a
//! weighted-random heuristic.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use tl_types::{
    AdapterError, Arm, CoreResult, Data, Experiment, GenerationError, GeneratorRun,
    ObjectiveDirection, ObservationFeatures, ParameterKind, ParameterValue, Parameters,
    PendingObservations,
};

use crate::adapter::{Adapter, GenRequest, Prediction};
use crate::uniform::{apply_fixed_features, pending_signatures, sample_parameter};

const MAX_DRAW_ATTEMPTS: usize = 64;

/// Surrogate model over observed arms.
///
/// Requires at least `min_observations` observed arms for the objective
/// metric before it can fit; until then `fit` returns the data-required
/// condition so the orchestration layer can decide whether to wait or fail.
pub struct SurrogateAdapter {
    rng: ChaCha8Rng,
    min_observations: usize,
    /// Probability of a pure exploration sample once observations exist.
    exploration_weight: f64,
    observations: Vec<(Parameters, f64)>,
    direction: ObjectiveDirection,
    objective_metric: Option<String>,
    fitted: bool,
}

impl SurrogateAdapter {
    pub fn new(seed: u64, min_observations: usize, exploration_weight: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            min_observations,
            exploration_weight,
            observations: Vec::new(),
            direction: ObjectiveDirection::default(),
            objective_metric: None,
            fitted: false,
        }
    }

    fn best_observation(&self) -> Option<&(Parameters, f64)> {
        let cmp = |a: &&(Parameters, f64), b: &&(Parameters, f64)| {
            a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)
        };
        match self.direction {
            ObjectiveDirection::Maximize => self.observations.iter().max_by(cmp),
            ObjectiveDirection::Minimize => self.observations.iter().min_by(cmp),
        }
    }

    /// Exploitation: perturb the best-known point within its search bounds.
    fn exploit(&mut self, request: &GenRequest<'_>) -> Parameters {
        let base = match self.best_observation() {
            Some((params, _)) => params.clone(),
            None => return self.explore(request),
        };

        let mut perturbed = Parameters::new();
        for def in &request.search_space.parameters {
            let base_val = base.get(&def.name);
            let value = match (&def.kind, base_val) {
                (ParameterKind::FloatRange { low, high }, Some(ParameterValue::Float(v))) => {
                    let range = high - low;
                    let noise = self.rng.gen_range(-0.1..0.1) * range;
                    ParameterValue::Float((v + noise).clamp(*low, *high))
                }
                (ParameterKind::IntRange { low, high }, Some(ParameterValue::Int(v))) => {
                    let delta: i64 = self.rng.gen_range(-2..=2);
                    ParameterValue::Int((v + delta).clamp(*low, *high))
                }
                (ParameterKind::LogUniform { low, high }, Some(ParameterValue::Float(v))) => {
                    let log_range = high.ln() - low.ln();
                    let noise = self.rng.gen_range(-0.1..0.1) * log_range;
                    ParameterValue::Float((v.ln() + noise).exp().clamp(*low, *high))
                }
                // Choices and missing base values fall back to a fresh draw.
                _ => sample_parameter(def, &mut self.rng),
            };
            perturbed.insert(def.name.clone(), value);
        }
        perturbed
    }

    /// Pure exploration sample.
    fn explore(&mut self, request: &GenRequest<'_>) -> Parameters {
        request
            .search_space
            .parameters
            .iter()
            .map(|def| (def.name.clone(), sample_parameter(def, &mut self.rng)))
            .collect()
    }

    /// One candidate: an exploration-weight coin flip between a fresh sample
    /// and a perturbation of the incumbent, with fixed features pinned.
    fn draw_candidate(&mut self, request: &GenRequest<'_>) -> Parameters {
        let explore =
            self.observations.is_empty() || self.rng.gen::<f64>() < self.exploration_weight;
        let mut candidate = if explore {
            self.explore(request)
        } else {
            self.exploit(request)
        };
        apply_fixed_features(&mut candidate, request.fixed_features);
        candidate
    }
}

impl Adapter for SurrogateAdapter {
    fn model_key(&self) -> &str {
        "surrogate"
    }

    fn fit(&mut self, experiment: &Experiment, data: &Data) -> CoreResult<()> {
        let config = experiment.optimization_config.as_ref().ok_or_else(|| {
            tl_types::ExperimentError::MissingOptimizationConfig {
                experiment: experiment.name.clone(),
            }
        })?;
        self.direction = config.direction;
        let metric = config.objective_metric.clone();

        let mut observations = Vec::new();
        for trial in experiment.trials.values() {
            for arm in &trial.arms {
                let Some(name) = arm.name.as_deref() else {
                    continue;
                };
                if let Some(mean) = data.mean_for(name, &metric) {
                    observations.push((arm.parameters.clone(), mean));
                }
            }
        }

        if observations.len() < self.min_observations {
            return Err(GenerationError::DataRequired {
                message: format!(
                    "surrogate requires {} observed arms for metric '{}', found {}",
                    self.min_observations,
                    metric,
                    observations.len()
                ),
            }
            .into());
        }

        debug!(
            observations = observations.len(),
            metric = %metric,
            "fitted surrogate"
        );
        self.observations = observations;
        self.objective_metric = Some(metric);
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, features: &[ObservationFeatures]) -> CoreResult<Vec<Prediction>> {
        if !self.fitted {
            return Err(AdapterError::NotFitted.into());
        }
        let metric = self
            .objective_metric
            .clone()
            .ok_or(AdapterError::NotFitted)?;
        let global_mean = self.observations.iter().map(|(_, v)| v).sum::<f64>()
            / self.observations.len().max(1) as f64;

        let predictions = features
            .iter()
            .map(|f| {
                let sig = f.signature();
                let mean = self
                    .observations
                    .iter()
                    .find(|(params, _)| tl_types::parameter_signature(params) == sig)
                    .map(|(_, v)| *v)
                    .unwrap_or(global_mean);
                let mut means = std::collections::BTreeMap::new();
                means.insert(metric.clone(), mean);
                let mut covariances = std::collections::BTreeMap::new();
                covariances.insert(metric.clone(), 0.0);
                Prediction { means, covariances }
            })
            .collect();
        Ok(predictions)
    }

    fn gen(&mut self, request: GenRequest<'_>) -> CoreResult<GeneratorRun> {
        if !self.fitted {
            return Err(AdapterError::NotFitted.into());
        }
        let mut taken = pending_signatures(request.pending_observations);
        let mut arms = Vec::with_capacity(request.n);

        for _ in 0..request.n {
            let mut candidate = self.draw_candidate(&request);
            let mut attempts = 1;
            while attempts < MAX_DRAW_ATTEMPTS
                && taken.contains(&tl_types::parameter_signature(&candidate))
            {
                candidate = self.draw_candidate(&request);
                attempts += 1;
            }
            taken.insert(tl_types::parameter_signature(&candidate));
            arms.push(Arm::new(candidate));
        }

        Ok(GeneratorRun::new(arms, self.model_key()))
    }
}
