//! Arms: concrete parameter configurations proposed for evaluation.

use serde::{Deserialize, Serialize};

use crate::search::{parameter_signature, Parameters};

/// One concrete parameter configuration to be evaluated.
///
/// Arms start out unnamed; they receive a `<trial>_<position>` name when
/// attached to an experiment trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub name: Option<String>,
    pub parameters: Parameters,
}

impl Arm {
    pub fn new(parameters: Parameters) -> Self {
        Self {
            name: None,
            parameters,
        }
    }

    pub fn with_name(parameters: Parameters, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            parameters,
        }
    }

    /// Canonical signature of this arm's parameters. Arms with identical
    /// parameter assignments share a signature regardless of naming.
    pub fn signature(&self) -> String {
        parameter_signature(&self.parameters)
    }
}
