//! # tabgan-train
//!
//! Training and sampling for the tabgan synthesizer.
//!
//! ## Key Components
//!
//! - [`Synthesizer`]: configure, `fit`, `sample`, `set_device`
//! - [`config::SynthesizerConfig`]: every constructor option, JSON-loadable
//! - [`model::TrainableModel`]: capability shared by [`model::GanModel`] and
//!   [`model::FlowTrainer`]
//! - [`trainer::fit_model`]: the epoch/step loop with best-state restore
//! - [`transformer::TableTransformer`] / [`sampler::DataSampler`]: encoding
//!   and conditional vectors for conditional training
//!
//! ## Architecture Rules
//!
//! - Single-threaded and synchronous; one fit runs to completion or errors.
//! - One seeded `StdRng` per fit drives every random draw.
//! - Logging through `tracing`; the library never installs a subscriber.

pub mod config;
pub mod data;
pub mod loss;
pub mod model;
pub mod sampler;
pub mod synthesizer;
pub mod trainer;
pub mod transformer;

pub use config::{DeviceSelection, FlowLoss, SynthesizerConfig, TrainingTrack};
pub use synthesizer::{Condition, Synthesizer};
pub use trainer::FitReport;
