//! Trial tracking: lifecycle of one evaluated unit of arms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arm::Arm;
use crate::generator_run::GeneratorRun;

/// Lifecycle state of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    /// Proposed but not yet deployed.
    Candidate,
    /// Deployed to the evaluation backend, not yet running.
    Staged,
    Running,
    Completed,
    Failed,
    /// Deliberately removed from consideration by the user.
    Abandoned,
    /// Stopped before natural completion; partial data may exist.
    EarlyStopped,
}

impl TrialStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Abandoned | Self::EarlyStopped
        )
    }

    /// Statuses that count against a running-trial parallelism limit.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Staged | Self::Running)
    }
}

/// One or more arms evaluated together as a unit in the experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub index: u64,
    pub arms: Vec<Arm>,
    pub status: TrialStatus,
    /// Generator runs this trial was created from, in attachment order.
    /// A batch trial spanning multiple generation nodes holds several.
    pub generator_runs: Vec<GeneratorRun>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            arms: Vec::new(),
            status: TrialStatus::Candidate,
            generator_runs: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Whether any of this trial's generator runs came from the named
    /// generation node.
    pub fn has_generator_run_from(&self, node_name: &str) -> bool {
        self.generator_runs
            .iter()
            .any(|gr| gr.generation_node_name.as_deref() == Some(node_name))
    }

    pub fn mark_staged(&mut self) {
        self.status = TrialStatus::Staged;
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn mark_abandoned(&mut self) {
        self.status = TrialStatus::Abandoned;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_early_stopped(&mut self) {
        self.status = TrialStatus::EarlyStopped;
        self.finished_at = Some(Utc::now());
    }
}
