//! Minibatch source over the training rows.

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::index;
use tabgan_core::{TabError, Table};

/// Optimization steps per epoch: `max(rows / batch, 1)`.
///
/// # Example
///
/// ```
/// use tabgan_train::data::steps_per_epoch;
///
/// assert_eq!(steps_per_epoch(1000, 300), 3);
/// assert_eq!(steps_per_epoch(10, 300), 1);
/// ```
pub fn steps_per_epoch(rows: usize, batch: usize) -> usize {
    (rows / batch.max(1)).max(1)
}

/// Draws fresh random minibatches; keeps no cursor between draws.
#[derive(Debug, Clone)]
pub struct BatchSource {
    values: Vec<f32>,
    n_rows: usize,
    width: usize,
    batch_size: usize,
    device: Device,
}

impl BatchSource {
    /// Wraps a table's rows.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::UnsupportedTable`] if the table has no rows.
    pub fn new(table: &Table, batch_size: usize, device: &Device) -> Result<Self, TabError> {
        if table.n_rows() == 0 {
            return Err(TabError::UnsupportedTable {
                message: "training table has no rows".to_string(),
            });
        }
        Ok(Self {
            values: table.values().to_vec(),
            n_rows: table.n_rows(),
            width: table.n_cols(),
            batch_size,
            device: device.clone(),
        })
    }

    /// Rows in one draw: `min(batch_size, rows)`.
    pub fn draw_size(&self) -> usize {
        self.batch_size.min(self.n_rows)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Draws `draw_size()` distinct rows in random order.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if tensor creation fails.
    pub fn draw(&self, rng: &mut StdRng) -> Result<Tensor, TabError> {
        let n = self.draw_size();
        let mut out = Vec::with_capacity(n * self.width);
        for i in index::sample(rng, self.n_rows, n) {
            out.extend_from_slice(&self.values[i * self.width..(i + 1) * self.width]);
        }
        Tensor::from_vec(out, (n, self.width), &self.device).map_err(|e| TabError::Internal {
            message: format!("BatchSource draw: {e}"),
        })
    }
}
