//! # tl-adapter
//!
//! The model boundary for Treeline: the [`Adapter`] capability consumed by
//! generation nodes (`fit` / `predict` / `gen`), the reversible [`Transform`]
//! chain interface, and two reference adapters — seeded uniform sampling for
//! initialization and a perturbation surrogate for adaptive phases.

mod adapter;
mod surrogate;
mod transforms;
mod uniform;

pub use adapter::{Adapter, GenRequest, ModelKind, Prediction};
pub use surrogate::SurrogateAdapter;
pub use transforms::{LogTransform, Transform, TransformChain};
pub use uniform::UniformAdapter;
