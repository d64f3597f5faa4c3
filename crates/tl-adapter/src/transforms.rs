//! Reversible transform chain applied around model fitting and generation.
//!
//! The orchestration layer never touches transforms directly; adapters that
//! model in a warped space apply the chain forward on observed features and
//! invert it on generated candidates.

use tl_types::{CoreError, CoreResult, ObservationFeatures, ParameterValue};

/// One reversible feature transform.
pub trait Transform: Send {
    fn name(&self) -> &str;

    /// Apply the transform in the model-facing direction.
    fn transform_features(&self, features: &mut ObservationFeatures) -> CoreResult<()>;

    /// Undo the transform on model output.
    fn untransform_features(&self, features: &mut ObservationFeatures) -> CoreResult<()>;
}

/// An ordered chain of transforms: applied first-to-last going into the
/// model, inverted last-to-first coming out.
#[derive(Default)]
pub struct TransformChain {
    transforms: Vec<Box<dyn Transform>>,
}

impl TransformChain {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self { transforms }
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn transform(&self, features: &mut ObservationFeatures) -> CoreResult<()> {
        for t in &self.transforms {
            t.transform_features(features)?;
        }
        Ok(())
    }

    pub fn untransform(&self, features: &mut ObservationFeatures) -> CoreResult<()> {
        for t in self.transforms.iter().rev() {
            t.untransform_features(features)?;
        }
        Ok(())
    }
}

/// Natural-log transform for strictly positive float parameters, typically
/// the log-uniform dimensions of the search space.
pub struct LogTransform {
    parameter_names: Vec<String>,
}

impl LogTransform {
    pub fn new(parameter_names: Vec<String>) -> Self {
        Self { parameter_names }
    }
}

impl Transform for LogTransform {
    fn name(&self) -> &str {
        "log"
    }

    fn transform_features(&self, features: &mut ObservationFeatures) -> CoreResult<()> {
        for name in &self.parameter_names {
            if let Some(ParameterValue::Float(v)) = features.parameters.get_mut(name) {
                if *v <= 0.0 {
                    return Err(CoreError::Validation(format!(
                        "log transform requires positive values, got {v} for '{name}'"
                    )));
                }
                *v = v.ln();
            }
        }
        Ok(())
    }

    fn untransform_features(&self, features: &mut ObservationFeatures) -> CoreResult<()> {
        for name in &self.parameter_names {
            if let Some(ParameterValue::Float(v)) = features.parameters.get_mut(name) {
                *v = v.exp();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_types::Parameters;

    fn features_with_lr(lr: f64) -> ObservationFeatures {
        let mut params = Parameters::new();
        params.insert("lr".into(), ParameterValue::Float(lr));
        ObservationFeatures::new(params)
    }

    #[test]
    fn log_round_trips() {
        let chain = TransformChain::new(vec![Box::new(LogTransform::new(vec!["lr".into()]))]);
        let mut features = features_with_lr(0.01);
        chain.transform(&mut features).unwrap();
        match features.parameters.get("lr") {
            Some(ParameterValue::Float(v)) => assert!((v - 0.01f64.ln()).abs() < 1e-12),
            other => panic!("unexpected value: {other:?}"),
        }
        chain.untransform(&mut features).unwrap();
        match features.parameters.get("lr") {
            Some(ParameterValue::Float(v)) => assert!((v - 0.01).abs() < 1e-12),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn log_rejects_non_positive() {
        let chain = TransformChain::new(vec![Box::new(LogTransform::new(vec!["lr".into()]))]);
        let mut features = features_with_lr(0.0);
        assert!(chain.transform(&mut features).is_err());
    }

    #[test]
    fn untouched_parameters_pass_through() {
        let chain = TransformChain::new(vec![Box::new(LogTransform::new(vec!["lr".into()]))]);
        let mut params = Parameters::new();
        params.insert("layers".into(), ParameterValue::Int(3));
        let mut features = ObservationFeatures::new(params.clone());
        chain.transform(&mut features).unwrap();
        assert_eq!(features.parameters, params);
    }

    #[test]
    fn empty_chain_is_identity() {
        let chain = TransformChain::default();
        assert!(chain.is_empty());
        let mut features = features_with_lr(0.5);
        let before = features.clone();
        chain.transform(&mut features).unwrap();
        chain.untransform(&mut features).unwrap();
        assert_eq!(features, before);
    }
}
