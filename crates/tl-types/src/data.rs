//! Observed evaluation data attached to an experiment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single observed measurement: one metric reading for one arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub arm_name: String,
    pub metric_name: String,
    pub trial_index: Option<u64>,
    pub mean: f64,
    /// Standard error of the mean; `None` when unknown.
    pub sem: Option<f64>,
}

/// Row-oriented observation set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub rows: Vec<ObservationRow>,
}

impl Data {
    pub fn new(rows: Vec<ObservationRow>) -> Self {
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Append all rows of `other` to this data set.
    pub fn merge(&mut self, other: &Data) {
        self.rows.extend(other.rows.iter().cloned());
    }

    /// Names of arms that have at least one observation for `metric_name`.
    pub fn arms_with_data(&self, metric_name: &str) -> BTreeSet<&str> {
        self.rows
            .iter()
            .filter(|row| row.metric_name == metric_name)
            .map(|row| row.arm_name.as_str())
            .collect()
    }

    /// Mean observed value for an (arm, metric) pair, averaging repeated
    /// measurements.
    pub fn mean_for(&self, arm_name: &str, metric_name: &str) -> Option<f64> {
        let values: Vec<f64> = self
            .rows
            .iter()
            .filter(|row| row.arm_name == arm_name && row.metric_name == metric_name)
            .map(|row| row.mean)
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
