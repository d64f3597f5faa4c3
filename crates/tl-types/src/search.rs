//! Search space definitions: parameter dimensions and sampled values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Human-readable parameter name (e.g. "learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
}

/// A concrete parameter value produced by a generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    Json(serde_json::Value),
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// An assignment of values to parameter names.
///
/// `BTreeMap` keeps the keys sorted, so two assignments with the same content
/// always serialize to the same signature string.
pub type Parameters = BTreeMap<String, ParameterValue>;

/// Canonical string form of a parameter assignment, used to deduplicate arms
/// and pending observations.
pub fn parameter_signature(parameters: &Parameters) -> String {
    serde_json::to_string(parameters).unwrap_or_default()
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    /// Total number of grid points (returns `None` if any parameter is
    /// continuous without a natural grid).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntRange { low, high } => (high - low + 1) as usize,
                ParameterKind::Choice { values } => values.len(),
                // Continuous dimensions need explicit step count — not grid-able by default.
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }

    /// Whether an assignment covers every dimension and each value lies within
    /// its declared range or choice set. Extra keys fail the check.
    pub fn contains(&self, parameters: &Parameters) -> bool {
        if parameters.len() != self.parameters.len() {
            return false;
        }
        for param in &self.parameters {
            let Some(value) = parameters.get(&param.name) else {
                return false;
            };
            let ok = match (&param.kind, value) {
                (ParameterKind::FloatRange { low, high }, ParameterValue::Float(v)) => {
                    *v >= *low && *v <= *high
                }
                (ParameterKind::IntRange { low, high }, ParameterValue::Int(v)) => {
                    *v >= *low && *v <= *high
                }
                (ParameterKind::LogUniform { low, high }, ParameterValue::Float(v)) => {
                    *v >= *low && *v <= *high
                }
                (ParameterKind::Choice { values }, ParameterValue::Json(v)) => values.contains(v),
                _ => false,
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}
