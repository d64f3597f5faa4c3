use thiserror::Error;

/// Main error type for the Treeline system
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Experiment error: {0}")]
    Experiment(#[from] ExperimentError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Experiment-related errors
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("Trial not found: {trial_index}")]
    TrialNotFound { trial_index: u64 },

    #[error("No optimization config set on experiment {experiment}")]
    MissingOptimizationConfig { experiment: String },

    #[error("Invalid experiment state: {message}")]
    InvalidState { message: String },
}

/// Errors raised while orchestrating candidate generation.
///
/// Callers are expected to branch on the variant: `Misconfigured`,
/// `Unsupported` and `UserInput` are fatal misuse, while `DataRequired`,
/// `MaxParallelismReached` and `Completed` are structured conditions the
/// surrounding optimization loop handles.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation strategy misconfigured: {message}")]
    Misconfigured { message: String },

    #[error("Data required before generation can proceed: {message}")]
    DataRequired { message: String },

    #[error("Generation strategy completed: {message}")]
    Completed { message: String },

    #[error("Maximum parallelism reached: {message}")]
    MaxParallelismReached { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error("Invalid user input: {message}")]
    UserInput { message: String },
}

/// Errors surfaced by model adapters.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Adapter has not been fitted yet")]
    NotFitted,

    #[error("Adapter fit failed: {message}")]
    FitFailed { message: String },

    #[error("Adapter generation failed: {message}")]
    GenFailed { message: String },

    #[error("Model '{model_key}' does not support prediction")]
    PredictUnsupported { model_key: String },
}

/// Result type alias for Treeline operations
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Whether this error is a recoverable generation condition (more data or
    /// freed-up parallelism will clear it) rather than a hard failure.
    pub fn is_recoverable_generation_condition(&self) -> bool {
        matches!(
            self,
            CoreError::Generation(
                GenerationError::DataRequired { .. }
                    | GenerationError::MaxParallelismReached { .. }
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = GenerationError::DataRequired {
            message: "surrogate needs 5 observations, has 2".to_string(),
        };
        assert!(err.to_string().contains("Data required"));
        assert!(err.to_string().contains("has 2"));
    }

    #[test]
    fn error_conversion() {
        let gen_err = GenerationError::Completed {
            message: "all nodes exhausted".to_string(),
        };
        let core: CoreError = gen_err.into();
        match core {
            CoreError::Generation(GenerationError::Completed { .. }) => (),
            other => panic!("expected Completed, got {other}"),
        }
    }

    #[test]
    fn recoverable_classification() {
        let recoverable: CoreError = GenerationError::DataRequired {
            message: "m".into(),
        }
        .into();
        let fatal: CoreError = GenerationError::Misconfigured { message: "m".into() }.into();
        assert!(recoverable.is_recoverable_generation_condition());
        assert!(!fatal.is_recoverable_generation_condition());
    }
}
