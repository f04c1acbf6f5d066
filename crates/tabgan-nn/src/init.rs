//! Seeded parameter creation and host-side random draws.
//!
//! candle's own initializers draw from a process-global RNG, so weights are
//! generated here from a caller-owned [`StdRng`] and inserted into the
//! [`VarMap`] before the layers fetch them by name. Two models built from the
//! same seed are bit-identical.

use std::collections::HashMap;
use std::sync::MutexGuard;

use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use tabgan_core::TabError;

/// Locks the variable table of a [`VarMap`].
///
/// # Errors
///
/// Returns [`TabError::Internal`] if the lock is poisoned.
pub fn lock_vars(var_map: &VarMap) -> Result<MutexGuard<'_, HashMap<String, Var>>, TabError> {
    var_map.data().lock().map_err(|_| TabError::Internal {
        message: "var map lock poisoned".to_string(),
    })
}

/// Draws `len` values uniformly from `[low, high)`.
pub fn uniform_vec(rng: &mut StdRng, len: usize, low: f32, high: f32) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(low..high)).collect()
}

/// Draws `len` standard normal values.
pub fn normal_vec(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| StandardNormal.sample(rng)).collect()
}

/// Inserts a tensor into `var_map` as a trainable variable and returns it.
///
/// # Errors
///
/// Returns [`TabError::Internal`] if the name is taken or var creation fails.
pub fn insert_var(var_map: &VarMap, name: &str, value: Tensor) -> Result<Tensor, TabError> {
    let var = Var::from_tensor(&value).map_err(|e| TabError::Internal {
        message: format!("insert_var {name}: {e}"),
    })?;
    let tensor = var.as_tensor().clone();
    let mut vars = lock_vars(var_map)?;
    if vars.contains_key(name) {
        return Err(TabError::Internal {
            message: format!("insert_var: duplicate parameter {name}"),
        });
    }
    vars.insert(name.to_string(), var);
    Ok(tensor)
}

/// Registers `{prefix}.weight` and `{prefix}.bias` for a linear layer.
///
/// Both are drawn from `U(-1/sqrt(in_dim), 1/sqrt(in_dim))`. Build the layer
/// afterwards with `candle_nn::linear(in_dim, out_dim, vb.pp(prefix))`, which
/// picks the seeded tensors up from the map.
///
/// # Errors
///
/// Returns [`TabError::Internal`] if tensor creation fails.
pub fn seed_linear(
    var_map: &VarMap,
    prefix: &str,
    in_dim: usize,
    out_dim: usize,
    rng: &mut StdRng,
    device: &Device,
) -> Result<(), TabError> {
    let map_err = |e: candle_core::Error| TabError::Internal {
        message: format!("seed_linear {prefix}: {e}"),
    };

    let bound = 1.0 / (in_dim.max(1) as f32).sqrt();
    let w = uniform_vec(rng, out_dim * in_dim, -bound, bound);
    let b = uniform_vec(rng, out_dim, -bound, bound);
    let w = Tensor::from_vec(w, (out_dim, in_dim), device).map_err(map_err)?;
    let b = Tensor::from_vec(b, out_dim, device).map_err(map_err)?;

    insert_var(var_map, &format!("{prefix}.weight"), w)?;
    insert_var(var_map, &format!("{prefix}.bias"), b)?;
    Ok(())
}

/// Copies every variable of `var_map` onto `device` into a fresh map.
///
/// Layers rebuilt from the returned map through a `VarBuilder` share its
/// variables, so optimizers and snapshots keep working after the move.
///
/// # Errors
///
/// Returns [`TabError::Internal`] if a transfer fails.
pub fn move_var_map(var_map: &VarMap, device: &Device) -> Result<VarMap, TabError> {
    let map_err = |e: candle_core::Error| TabError::Internal {
        message: format!("move_var_map: {e}"),
    };

    let moved = VarMap::new();
    {
        let src = lock_vars(var_map)?;
        let mut dst = lock_vars(&moved)?;
        for (name, var) in src.iter() {
            let tensor = var.as_tensor().detach().to_device(device).map_err(map_err)?;
            dst.insert(name.clone(), Var::from_tensor(&tensor).map_err(map_err)?);
        }
    }
    Ok(moved)
}

/// Counts the scalar parameters held by `var_map`.
pub fn param_count(var_map: &VarMap) -> usize {
    var_map.all_vars().iter().map(|v| v.elem_count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn seeded_linear_is_deterministic() {
        let device = Device::Cpu;
        let a = VarMap::new();
        let b = VarMap::new();
        seed_linear(&a, "fc", 4, 3, &mut StdRng::seed_from_u64(7), &device).unwrap();
        seed_linear(&b, "fc", 4, 3, &mut StdRng::seed_from_u64(7), &device).unwrap();

        let wa = lock_vars(&a).unwrap()["fc.weight"].as_tensor().to_vec2::<f32>().unwrap();
        let wb = lock_vars(&b).unwrap()["fc.weight"].as_tensor().to_vec2::<f32>().unwrap();
        assert_eq!(wa, wb);
        assert_eq!(param_count(&a), 4 * 3 + 3);
    }

    #[test]
    fn seeded_weights_within_bound() {
        let var_map = VarMap::new();
        seed_linear(&var_map, "fc", 16, 8, &mut StdRng::seed_from_u64(1), &Device::Cpu).unwrap();
        let w = lock_vars(&var_map).unwrap()["fc.weight"]
            .as_tensor()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!(w.iter().all(|x| x.abs() <= 0.25));
    }

    #[test]
    fn duplicate_names_rejected() {
        let var_map = VarMap::new();
        let mut rng = StdRng::seed_from_u64(0);
        seed_linear(&var_map, "fc", 2, 2, &mut rng, &Device::Cpu).unwrap();
        assert!(seed_linear(&var_map, "fc", 2, 2, &mut rng, &Device::Cpu).is_err());
    }

    #[test]
    fn move_var_map_preserves_values() {
        let var_map = VarMap::new();
        seed_linear(&var_map, "fc", 3, 2, &mut StdRng::seed_from_u64(3), &Device::Cpu).unwrap();
        let moved = move_var_map(&var_map, &Device::Cpu).unwrap();
        let before = lock_vars(&var_map).unwrap()["fc.bias"].as_tensor().to_vec1::<f32>().unwrap();
        let after = lock_vars(&moved).unwrap()["fc.bias"].as_tensor().to_vec1::<f32>().unwrap();
        assert_eq!(before, after);
    }
}
