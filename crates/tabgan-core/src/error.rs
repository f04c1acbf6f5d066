//! Error type shared by every tabgan crate.

use thiserror::Error;

/// Errors produced while configuring, fitting or sampling a synthesizer.
///
/// # Example
///
/// ```
/// use tabgan_core::TabError;
///
/// let err = TabError::PackMismatch { batch: 15, pac: 10 };
/// assert!(err.to_string().contains("15"));
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TabError {
    /// A constructor option is out of range (odd batch size, zero pac, ...).
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The discriminator received a batch that does not split into whole packs.
    #[error("batch of {batch} rows is not divisible by pac={pac}")]
    PackMismatch { batch: usize, pac: usize },

    /// The training data is not a recognized table container.
    #[error("unsupported table: {message}")]
    UnsupportedTable { message: String },

    /// One or more discrete column identifiers do not exist in the table.
    #[error("invalid columns found: {columns:?}")]
    InvalidColumns { columns: Vec<String> },

    /// A conditioning column/value pair does not name a known category.
    #[error("unknown category: {message}")]
    UnknownCategory { message: String },

    /// A stochastic activation kept producing NaN after its retry budget.
    #[error("numerical instability: {message}")]
    NumericalInstability { message: String },

    /// `sample` was called before `fit`.
    #[error("synthesizer has not been fitted")]
    NotFitted,

    /// Tensor backend or other internal failure.
    #[error("internal error: {message}")]
    Internal { message: String },
}
