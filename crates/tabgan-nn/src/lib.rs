//! # tabgan-nn
//!
//! candle modules for the tabgan synthesizer.
//!
//! ## Key Components
//!
//! - [`generator::Generator`]: residual MLP, noise (+ cond) → transformed row
//! - [`discriminator::Discriminator`]: packed critic with gradient penalty
//! - [`prior::Prior`]: noise distribution with optionally learnable parameters
//! - [`flow::FlowModel`] / [`flow::RealNvp`]: likelihood track model
//! - [`activation::apply_activate`]: optional per-span output shaping
//! - [`snapshot::ParamSnapshot`]: deep-copied best parameter state
//!
//! ## Architecture Rules
//!
//! - All candle code lives here and in `tabgan-train`.
//! - Randomness comes from a caller-owned `StdRng`; never from candle's RNG.
//! - Feature-gated accelerators: `cuda` and `metal` forward to candle.

pub mod activation;
pub mod discriminator;
pub mod flow;
pub mod generator;
pub mod init;
pub mod prior;
pub mod snapshot;

pub use activation::apply_activate;
pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use flow::{FlowConfig, FlowModel, FlowOutput, RealNvp};
pub use generator::{Generator, GeneratorConfig};
pub use prior::{Prior, PriorFamily};
pub use snapshot::{BestTracker, ParamSnapshot};
