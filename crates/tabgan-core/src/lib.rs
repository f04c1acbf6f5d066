//! # tabgan-core
//!
//! Shared vocabulary for the tabgan workspace.
//!
//! ## Key Types
//!
//! - [`Table`]: dense training data, labeled or raw matrix
//! - [`ColumnId`]: discrete column identifier (name or index)
//! - [`SpanInfo`] / [`ColumnInfo`]: layout of the transformed feature space
//! - [`TabError`]: the error type used across all crates
//!
//! ## Architecture Rules
//!
//! - No tensor code here; `tabgan-nn` owns everything candle.
//! - No logging; callers decide what is worth reporting.

pub mod error;
pub mod span;
pub mod table;
pub mod validation;

pub use error::TabError;
pub use span::{is_discrete, output_dim, ActivationFn, ColumnInfo, SpanInfo};
pub use table::{ColumnId, Table};
pub use validation::validate_discrete_columns;

/// Default packing factor for the discriminator.
pub const DEFAULT_PAC: usize = 10;

/// Default gradient penalty coefficient.
pub const DEFAULT_GP_LAMBDA: f64 = 10.0;

/// Initial value of the running loss minimum; any finite loss beats it.
pub const INITIAL_MIN_LOSS: f64 = f64::INFINITY;
