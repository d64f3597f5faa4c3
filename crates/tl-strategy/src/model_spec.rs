//! Model specs: how a generation node obtains its adapter instance.

use std::fmt;
use std::sync::Arc;

use tl_adapter::{Adapter, ModelKind};

/// Where a node's adapter comes from.
#[derive(Clone)]
enum ModelSource {
    /// A registry entry: reconstructable from serialized configuration, so an
    /// interrupted optimization can be resumed.
    Registered(ModelKind),
    /// A caller-supplied factory closure. Works like any other adapter but
    /// cannot be reconstructed from storage.
    Factory {
        model_key: String,
        build: Arc<dyn Fn() -> Box<dyn Adapter> + Send + Sync>,
    },
}

/// Specification of one model a generation node can generate from.
#[derive(Clone)]
pub struct ModelSpec {
    source: ModelSource,
}

impl ModelSpec {
    pub fn registered(kind: ModelKind) -> Self {
        Self {
            source: ModelSource::Registered(kind),
        }
    }

    pub fn factory<F>(model_key: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Box<dyn Adapter> + Send + Sync + 'static,
    {
        Self {
            source: ModelSource::Factory {
                model_key: model_key.into(),
                build: Arc::new(build),
            },
        }
    }

    pub fn model_key(&self) -> &str {
        match &self.source {
            ModelSource::Registered(kind) => kind.model_key(),
            ModelSource::Factory { model_key, .. } => model_key,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.source, ModelSource::Registered(_))
    }

    /// Construct a fresh, unfitted adapter.
    pub fn build(&self) -> Box<dyn Adapter> {
        match &self.source {
            ModelSource::Registered(kind) => kind.build(),
            ModelSource::Factory { build, .. } => build(),
        }
    }
}

impl fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelSpec({})", self.model_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tl_adapter::UniformAdapter;

    #[test]
    fn registered_spec_exposes_registry_key() {
        let spec = ModelSpec::registered(ModelKind::Uniform { seed: 3 });
        assert_eq!(spec.model_key(), "uniform");
        assert!(spec.is_registered());
        assert_eq!(spec.build().model_key(), "uniform");
    }

    #[test]
    fn factory_spec_is_not_registered() {
        let spec = ModelSpec::factory("custom_sampler", || Box::new(UniformAdapter::new(0)));
        assert_eq!(spec.model_key(), "custom_sampler");
        assert!(!spec.is_registered());
        // The built adapter reports its own key, not the spec's.
        assert_eq!(spec.build().model_key(), "uniform");
    }

    #[test]
    fn clone_shares_factory() {
        let spec = ModelSpec::factory("custom", || Box::new(UniformAdapter::new(0)));
        let cloned = spec.clone();
        assert_eq!(cloned.model_key(), "custom");
        assert_eq!(format!("{cloned:?}"), "ModelSpec(custom)");
    }
}
