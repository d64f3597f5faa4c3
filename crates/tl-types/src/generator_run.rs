//! Generator runs: batches of proposed arms with provenance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::arm::Arm;

/// A batch of proposed arms plus provenance, the output of one generation
/// call.
///
/// Generator runs are treated as immutable records once appended to a
/// strategy's history: provenance fields are stamped at creation time and
/// never rewritten afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorRun {
    pub id: Uuid,
    pub arms: Vec<Arm>,
    /// Key of the model that produced these arms (e.g. "uniform").
    pub model_key: String,
    /// Name of the generation node that produced this run, stamped by the
    /// strategy before the run is recorded.
    pub generation_node_name: Option<String>,
    pub time_created: DateTime<Utc>,
}

impl GeneratorRun {
    pub fn new(arms: Vec<Arm>, model_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            arms,
            model_key: model_key.into(),
            generation_node_name: None,
            time_created: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{ParameterValue, Parameters};

    #[test]
    fn round_trips_through_json() {
        let mut params = Parameters::new();
        params.insert("lr".into(), ParameterValue::Float(0.01));
        let mut gr = GeneratorRun::new(vec![Arm::new(params)], "uniform");
        gr.generation_node_name = Some("GenerationStep_0".into());

        let json = serde_json::to_string(&gr).unwrap();
        let back: GeneratorRun = serde_json::from_str(&json).unwrap();
        assert_eq!(gr, back);
    }
}
