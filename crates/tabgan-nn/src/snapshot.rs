//! Best-state snapshots.
//!
//! A [`ParamSnapshot`] is a deep copy of the variable values in one or more
//! [`VarMap`]s. Later optimizer steps mutate the live variables in place and
//! never touch the copy. [`BestTracker`] holds the running loss minimum that
//! decides when a new snapshot is due.

use std::collections::BTreeMap;

use candle_core::Tensor;
use candle_nn::VarMap;
use tabgan_core::{TabError, INITIAL_MIN_LOSS};

use crate::init::lock_vars;

/// Deep copy of parameter values, one table per captured [`VarMap`].
#[derive(Debug, Clone, Default)]
pub struct ParamSnapshot {
    maps: Vec<BTreeMap<String, Tensor>>,
}

impl ParamSnapshot {
    /// Copies every variable of every map.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if a lock is poisoned or a copy fails.
    pub fn capture(var_maps: &[&VarMap]) -> Result<Self, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("ParamSnapshot capture: {e}"),
        };

        let mut maps = Vec::with_capacity(var_maps.len());
        for var_map in var_maps {
            let vars = lock_vars(var_map)?;
            let mut copy = BTreeMap::new();
            for (name, var) in vars.iter() {
                let value = var.as_tensor().detach().copy().map_err(map_err)?;
                copy.insert(name.clone(), value);
            }
            maps.push(copy);
        }
        Ok(Self { maps })
    }

    /// Writes the captured values back into `var_maps`.
    ///
    /// The maps must be passed in capture order.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if the map count differs, a variable is
    /// missing, or a shape changed since capture.
    pub fn restore(&self, var_maps: &[&VarMap]) -> Result<(), TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("ParamSnapshot restore: {e}"),
        };

        if var_maps.len() != self.maps.len() {
            return Err(TabError::Internal {
                message: format!(
                    "snapshot holds {} maps, {} given",
                    self.maps.len(),
                    var_maps.len()
                ),
            });
        }
        for (var_map, saved) in var_maps.iter().zip(&self.maps) {
            let vars = lock_vars(var_map)?;
            for (name, value) in saved {
                let var = vars.get(name).ok_or_else(|| TabError::Internal {
                    message: format!("snapshot restore: variable {name} missing"),
                })?;
                let value = value.to_device(var.device()).map_err(map_err)?;
                var.set(&value).map_err(map_err)?;
            }
        }
        Ok(())
    }

    /// Number of captured variables.
    pub fn len(&self) -> usize {
        self.maps.iter().map(BTreeMap::len).sum()
    }

    /// Returns `true` if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks a captured value up by variable name.
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.maps.iter().find_map(|m| m.get(name))
    }
}

/// Running minimum of a loss sequence.
///
/// # Example
///
/// ```
/// use tabgan_nn::snapshot::BestTracker;
///
/// let mut best = BestTracker::new();
/// assert!(best.offer(0, 2.0));
/// assert!(!best.offer(1, 3.0));
/// assert!(best.offer(2, 1.5));
/// assert_eq!(best.best_step(), Some(2));
/// ```
#[derive(Debug, Clone)]
pub struct BestTracker {
    min: f64,
    best_step: Option<usize>,
}

impl Default for BestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BestTracker {
    pub fn new() -> Self {
        Self {
            min: INITIAL_MIN_LOSS,
            best_step: None,
        }
    }

    /// Records `loss` for `step`; returns `true` if it is a strict new minimum.
    ///
    /// NaN never wins.
    pub fn offer(&mut self, step: usize, loss: f64) -> bool {
        if loss < self.min {
            self.min = loss;
            self.best_step = Some(step);
            true
        } else {
            false
        }
    }

    /// Current minimum, or `INITIAL_MIN_LOSS` before any offer.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Step that produced the current minimum.
    pub fn best_step(&self) -> Option<usize> {
        self.best_step
    }
}
