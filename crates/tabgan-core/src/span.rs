//! Output span metadata describing the transformed feature space.
//!
//! Each source column maps to one or more spans of the transformed row. A
//! continuous column produces a `Tanh` span, a discrete column produces a
//! single one-hot `Softmax` span.

use serde::{Deserialize, Serialize};

/// Activation applied to a span of generator output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationFn {
    /// Bounded continuous value.
    Tanh,
    /// One-hot category block.
    Softmax,
}

/// A contiguous block of transformed columns.
///
/// # Example
///
/// ```
/// use tabgan_core::{ActivationFn, SpanInfo};
///
/// let span = SpanInfo::new(3, ActivationFn::Softmax);
/// assert_eq!(span.dim, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanInfo {
    /// Width of the span.
    pub dim: usize,
    /// Activation used by the output hook.
    pub activation: ActivationFn,
}

impl SpanInfo {
    /// Creates a span of `dim` columns.
    pub fn new(dim: usize, activation: ActivationFn) -> Self {
        Self { dim, activation }
    }
}

/// Spans belonging to one source column.
pub type ColumnInfo = Vec<SpanInfo>;

/// Total width of the transformed representation.
///
/// # Example
///
/// ```
/// use tabgan_core::{output_dim, ActivationFn, SpanInfo};
///
/// let info = vec![
///     vec![SpanInfo::new(1, ActivationFn::Tanh)],
///     vec![SpanInfo::new(4, ActivationFn::Softmax)],
/// ];
/// assert_eq!(output_dim(&info), 5);
/// ```
pub fn output_dim(info: &[ColumnInfo]) -> usize {
    info.iter().flatten().map(|s| s.dim).sum()
}

/// Returns `true` if the column is a single one-hot span.
pub fn is_discrete(column: &[SpanInfo]) -> bool {
    column.len() == 1 && column[0].activation == ActivationFn::Softmax
}
