//! Seeded uniform sampling adapter, used for initialization phases.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;

use tl_types::{
    AdapterError, Arm, CoreResult, Data, Experiment, GeneratorRun, ObservationFeatures,
    ParameterDef, ParameterKind, ParameterValue, Parameters, PendingObservations,
};

use crate::adapter::{Adapter, GenRequest, Prediction};

/// How many redraws to attempt before accepting a duplicate of a pending arm.
const MAX_DRAW_ATTEMPTS: usize = 64;

/// Uniform sampling over the search space with a fixed seed, so the produced
/// sequence is reproducible across process restarts.
pub struct UniformAdapter {
    rng: ChaCha8Rng,
    fitted: bool,
}

impl UniformAdapter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            fitted: false,
        }
    }

    fn draw_candidate(&mut self, request: &GenRequest<'_>) -> Parameters {
        let mut candidate: Parameters = request
            .search_space
            .parameters
            .iter()
            .map(|def| (def.name.clone(), sample_parameter(def, &mut self.rng)))
            .collect();
        apply_fixed_features(&mut candidate, request.fixed_features);
        candidate
    }
}

/// Draw one value for a parameter definition.
pub(crate) fn sample_parameter(def: &ParameterDef, rng: &mut impl Rng) -> ParameterValue {
    match &def.kind {
        ParameterKind::FloatRange { low, high } => ParameterValue::Float(rng.gen_range(*low..=*high)),
        ParameterKind::IntRange { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
        ParameterKind::LogUniform { low, high } => {
            let log_low = low.ln();
            let log_high = high.ln();
            let log_val: f64 = rng.gen_range(log_low..=log_high);
            ParameterValue::Float(log_val.exp())
        }
        ParameterKind::Choice { values } => {
            let idx = rng.gen_range(0..values.len());
            ParameterValue::Json(values[idx].clone())
        }
    }
}

/// Signatures of every arm currently pending, across all metrics.
pub(crate) fn pending_signatures(pending: &PendingObservations) -> BTreeSet<String> {
    pending
        .values()
        .flat_map(|features| features.iter().map(ObservationFeatures::signature))
        .collect()
}

/// Overlay fixed features onto a sampled assignment.
pub(crate) fn apply_fixed_features(
    parameters: &mut Parameters,
    fixed_features: Option<&ObservationFeatures>,
) {
    if let Some(fixed) = fixed_features {
        for (name, value) in &fixed.parameters {
            parameters.insert(name.clone(), value.clone());
        }
    }
}

impl Adapter for UniformAdapter {
    fn model_key(&self) -> &str {
        "uniform"
    }

    fn fit(&mut self, _experiment: &Experiment, _data: &Data) -> CoreResult<()> {
        // Uniform sampling has nothing to learn from data.
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, _features: &[ObservationFeatures]) -> CoreResult<Vec<Prediction>> {
        Err(AdapterError::PredictUnsupported {
            model_key: self.model_key().to_string(),
        }
        .into())
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

#[cfg(test)]
mod tests {
    use super::*;
    use tl_types::SearchSpace;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("layers", 1, 8)
            .add_float("dropout", 0.0, 0.5)
            .add_log_uniform("lr", 1e-5, 1e-1)
    }

    fn sample_experiment() -> Experiment {
        Experiment::new("uniform_test", sample_space())
    }

    fn gen_arms(adapter: &mut UniformAdapter, n: usize) -> GeneratorRun {
        let experiment = sample_experiment();
        adapter.fit(&experiment, &Data::default()).unwrap();
        let space = sample_space();
        let pending = PendingObservations::new();
        adapter
            .gen(GenRequest {
                n,
                search_space: &space,
                pending_observations: &pending,
                fixed_features: None,
            })
            .unwrap()
    }

    #[test]
    fn same_seed_reproduces_sequence() {
        let run_a = gen_arms(&mut UniformAdapter::new(17), 5);
        let run_b = gen_arms(&mut UniformAdapter::new(17), 5);
        let sigs_a: Vec<String> = run_a.arms.iter().map(Arm::signature).collect();
        let sigs_b: Vec<String> = run_b.arms.iter().map(Arm::signature).collect();
        assert_eq!(sigs_a, sigs_b);
    }

    #[test]
    fn samples_stay_in_bounds() {
        let run = gen_arms(&mut UniformAdapter::new(3), 50);
        let space = sample_space();
        for arm in &run.arms {
            assert!(space.contains(&arm.parameters), "out of bounds: {arm:?}");
        }
    }

    #[test]
    fn gen_before_fit_fails() {
        let mut adapter = UniformAdapter::new(1);
        let space = sample_space();
        let pending = PendingObservations::new();
        let err = adapter
            .gen(GenRequest {
                n: 1,
                search_space: &space,
                pending_observations: &pending,
                fixed_features: None,
            })
            .unwrap_err();
        assert!(err.to_string().contains("not been fitted"));
    }

    #[test]
    fn avoids_pending_points_in_small_space() {
        let space = SearchSpace::new().add_int("x", 0, 1);
        let experiment = Experiment::new("tiny", space.clone());
        let mut adapter = UniformAdapter::new(5);
        adapter.fit(&experiment, &Data::default()).unwrap();

        let mut zero = Parameters::new();
        zero.insert("x".into(), ParameterValue::Int(0));
        let mut pending = PendingObservations::new();
        pending.insert("loss".into(), vec![ObservationFeatures::new(zero)]);

        let run = adapter
            .gen(GenRequest {
                n: 1,
                search_space: &space,
                pending_observations: &pending,
                fixed_features: None,
            })
            .unwrap();
        assert_eq!(
            run.arms[0].parameters.get("x"),
            Some(&ParameterValue::Int(1))
        );
    }

    #[test]
    fn fixed_features_pin_values() {
        let space = sample_space();
        let experiment = sample_experiment();
        let mut adapter = UniformAdapter::new(11);
        adapter.fit(&experiment, &Data::default()).unwrap();

        let mut fixed = Parameters::new();
        fixed.insert("layers".into(), ParameterValue::Int(4));
        let fixed_features = ObservationFeatures::new(fixed);
        let pending = PendingObservations::new();

        let run = adapter
            .gen(GenRequest {
                n: 10,
                search_space: &space,
                pending_observations: &pending,
                fixed_features: Some(&fixed_features),
            })
            .unwrap();
        for arm in &run.arms {
            assert_eq!(arm.parameters.get("layers"), Some(&ParameterValue::Int(4)));
        }
    }

    #[test]
    fn predict_is_unsupported() {
        let adapter = UniformAdapter::new(1);
        assert!(adapter.predict(&[]).is_err());
    }
}
