//! The adapter capability: the opaque model interface generation nodes drive.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tl_types::{
    CoreResult, Data, Experiment, GeneratorRun, ObservationFeatures, PendingObservations,
    SearchSpace,
};

use crate::surrogate::SurrogateAdapter;
use crate::uniform::UniformAdapter;

/// Arguments to one generation call against an adapter.
pub struct GenRequest<'a> {
    /// How many arms to produce. Adapters may return fewer when the space is
    /// exhausted.
    pub n: usize,
    pub search_space: &'a SearchSpace,
    /// Arms already in flight; adapters avoid re-suggesting these.
    pub pending_observations: &'a PendingObservations,
    /// Parameter values to pin on every produced arm, overriding whatever the
    /// model samples for them.
    pub fixed_features: Option<&'a ObservationFeatures>,
}

/// Point prediction for one set of observation features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub means: BTreeMap<String, f64>,
    pub covariances: BTreeMap<String, f64>,
}

/// The opaque model capability a generation node drives.
///
/// The orchestration layer never inspects model internals beyond
/// [`Adapter::is_registered`], which only affects a resumability warning.
pub trait Adapter: Send {
    /// Stable key identifying the model that produced a generator run.
    fn model_key(&self) -> &str;

    /// Whether this adapter was built from the model registry. Factory-built
    /// adapters cannot be reconstructed from serialized state, which makes an
    /// interrupted optimization non-resumable.
    fn is_registered(&self) -> bool {
        true
    }

    /// Fit the model to the experiment's observed data. Adapters that need
    /// observations return `GenerationError::DataRequired` until enough data
    /// is attached.
    fn fit(&mut self, experiment: &Experiment, data: &Data) -> CoreResult<()>;

    /// Predict metric means and variances for the given features.
    fn predict(&self, features: &[ObservationFeatures]) -> CoreResult<Vec<Prediction>>;

    /// Produce a batch of candidate arms.
    fn gen(&mut self, request: GenRequest<'_>) -> CoreResult<GeneratorRun>;
}

/// Registry of adapters that can be reconstructed from serialized
/// configuration, keyed by their construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelKind {
    /// Seeded uniform sampling over the search space; needs no data.
    Uniform { seed: u64 },
    /// Perturbation surrogate: requires observed data, then balances
    /// exploration against exploitation of the incumbent best.
    Surrogate {
        seed: u64,
        min_observations: usize,
        exploration_weight: f64,
    },
}

impl ModelKind {
    pub fn model_key(&self) -> &'static str {
        match self {
            Self::Uniform { .. } => "uniform",
            Self::Surrogate { .. } => "surrogate",
        }
    }

    /// Construct a fresh, unfitted adapter instance.
    pub fn build(&self) -> Box<dyn Adapter> {
        match self {
            Self::Uniform { seed } => Box::new(UniformAdapter::new(*seed)),
            Self::Surrogate {
                seed,
                min_observations,
                exploration_weight,
            } => Box::new(SurrogateAdapter::new(
                *seed,
                *min_observations,
                *exploration_weight,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_kind_builds_matching_adapter() {
        let uniform = ModelKind::Uniform { seed: 7 };
        assert_eq!(uniform.model_key(), "uniform");
        assert_eq!(uniform.build().model_key(), "uniform");

        let surrogate = ModelKind::Surrogate {
            seed: 7,
            min_observations: 3,
            exploration_weight: 0.2,
        };
        assert_eq!(surrogate.build().model_key(), "surrogate");
    }

    #[test]
    fn model_kind_serializes() {
        let kind = ModelKind::Surrogate {
            seed: 42,
            min_observations: 5,
            exploration_weight: 0.3,
        };
        let json = serde_json::to_string(&kind).unwrap();
        let back: ModelKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, back);
    }
}
