//! # tabgan
//!
//! Synthetic tabular data from a conditional WGAN-GP or a normalizing flow.
//!
//! This crate re-exports the workspace:
//!
//! - [`core`]: tables, column identifiers, span metadata, [`TabError`]
//! - [`nn`]: generator, packed discriminator, priors, flows
//! - [`train`]: configuration, training loop, [`Synthesizer`]

pub use tabgan_core as core;
pub use tabgan_nn as nn;
pub use tabgan_train as train;

pub use tabgan_core::{ColumnId, TabError, Table};
pub use tabgan_train::{
    Condition, DeviceSelection, FlowLoss, Synthesizer, SynthesizerConfig, TrainingTrack,
};
