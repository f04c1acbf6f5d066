//! Noise priors with optionally learnable parameters.
//!
//! A [`Prior`] draws latent noise for the generator and serves as the base
//! density of flow models. Every family has up to three parameters
//! `p1, p2, p3`. When the prior is *variable* they are registered as
//! trainable vars (`prior.dist_p1` ...) in the prior's own [`VarMap`], and
//! [`Prior::rsample`] draws through them so the optimizer can move them
//! jointly with the generator.
//!
//! Draws are reparameterized: a parameter-free base sample is generated on
//! the host from the caller's RNG and then shifted/scaled by tensor ops.

use std::f64::consts::PI;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tabgan_core::TabError;

use crate::init::{insert_var, lock_vars, move_var_map, normal_vec};

/// Smallest uniform draw; keeps logarithms finite.
const UNIT_EPS: f64 = 1e-7;

/// Distribution family of a [`Prior`].
///
/// | Family | p1 | p2 | p3 |
/// |---|---|---|---|
/// | `Normal` | loc (0) | scale (1) | unused |
/// | `Uniform` | low (-1) | high (1) | unused |
/// | `Laplace` | loc (0) | scale (1) | unused |
/// | `Gumbel` | loc (0) | scale (1) | unused |
/// | `SinhArcsinh` | loc (0) | scale (1) | skew (0) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PriorFamily {
    #[default]
    Normal,
    Uniform,
    Laplace,
    Gumbel,
    SinhArcsinh,
}

impl PriorFamily {
    /// Default `[p1, p2, p3]`.
    pub fn default_params(&self) -> [f64; 3] {
        match self {
            Self::Uniform => [-1.0, 1.0, 0.0],
            Self::SinhArcsinh | Self::Normal | Self::Laplace | Self::Gumbel => [0.0, 1.0, 0.0],
        }
    }

    /// Number of parameters the family actually uses.
    pub fn arity(&self) -> usize {
        match self {
            Self::SinhArcsinh => 3,
            _ => 2,
        }
    }
}

/// Latent noise distribution.
///
/// # Example
///
/// ```
/// use candle_core::Device;
/// use rand::{rngs::StdRng, SeedableRng};
/// use tabgan_nn::prior::{Prior, PriorFamily};
///
/// let prior = Prior::new(PriorFamily::Normal, [None, Some(2.0), None], false, &Device::Cpu).unwrap();
/// let z = prior.sample((4, 8), &mut StdRng::seed_from_u64(0)).unwrap();
/// assert_eq!(z.dims(), &[4, 8]);
/// assert_eq!(prior.params().unwrap(), [0.0, 2.0, 0.0]);
/// ```
pub struct Prior {
    family: PriorFamily,
    params: [Tensor; 3],
    var_map: VarMap,
    variable: bool,
    device: Device,
}

impl std::fmt::Debug for Prior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Prior({:?}, variable={})", self.family, self.variable)
    }
}

impl Prior {
    /// Creates a prior, overriding family defaults with any given parameter.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if tensor creation fails.
    pub fn new(
        family: PriorFamily,
        overrides: [Option<f64>; 3],
        variable: bool,
        device: &Device,
    ) -> Result<Self, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Prior new: {e}"),
        };

        let defaults = family.default_params();
        let var_map = VarMap::new();
        let mut params = Vec::with_capacity(3);
        for (i, (given, default)) in overrides.iter().zip(defaults).enumerate() {
            let value = Tensor::new(&[given.unwrap_or(default) as f32], device).map_err(map_err)?;
            let value = if variable {
                insert_var(&var_map, &format!("prior.dist_p{}", i + 1), value)?
            } else {
                value
            };
            params.push(value);
        }
        let [p1, p2, p3]: [Tensor; 3] = params.try_into().map_err(|_| TabError::Internal {
            message: "Prior new: expected three parameters".to_string(),
        })?;

        Ok(Self {
            family,
            params: [p1, p2, p3],
            var_map,
            variable,
            device: device.clone(),
        })
    }

    /// Reparameterized draw; differentiable w.r.t. variable parameters.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if tensor operations fail.
    pub fn rsample(&self, shape: (usize, usize), rng: &mut StdRng) -> Result<Tensor, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Prior rsample: {e}"),
        };

        let len = shape.0 * shape.1;
        let [p1, p2, p3] = &self.params;
        let out = match self.family {
            PriorFamily::Normal => {
                let eps = self.host_tensor(normal_vec(rng, len), shape)?;
                self.loc_scale(&eps, p1, p2)
            }
            PriorFamily::Laplace => {
                let eps = (0..len)
                    .map(|_| {
                        let u = rng.gen_range(-0.5 + UNIT_EPS..0.5);
                        -u.signum() * (1.0 - 2.0 * u.abs()).ln()
                    })
                    .map(|x| x as f32)
                    .collect();
                let eps = self.host_tensor(eps, shape)?;
                self.loc_scale(&eps, p1, p2)
            }
            PriorFamily::Gumbel => {
                let eps = (0..len)
                    .map(|_| -(-rng.gen_range(UNIT_EPS..1.0).ln()).ln() as f32)
                    .collect();
                let eps = self.host_tensor(eps, shape)?;
                self.loc_scale(&eps, p1, p2)
            }
            PriorFamily::Uniform => {
                let u = (0..len).map(|_| rng.gen::<f32>()).collect();
                let u = self.host_tensor(u, shape)?;
                (|| -> candle_core::Result<Tensor> {
                    let width = (p2 - p1)?;
                    u.broadcast_mul(&width)?.broadcast_add(p1)
                })()
            }
            PriorFamily::SinhArcsinh => {
                let asinh: Vec<f32> = normal_vec(rng, len).into_iter().map(f32::asinh).collect();
                let a = self.host_tensor(asinh, shape)?;
                (|| -> candle_core::Result<Tensor> {
                    let shifted = a.broadcast_add(p3)?;
                    let sinh = ((shifted.exp()? - shifted.neg()?.exp()?)? * 0.5)?;
                    self.loc_scale(&sinh, p1, p2)
                })()
            }
        };
        out.map_err(map_err)
    }

    /// Plain draw, detached from the parameter graph.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if tensor operations fail.
    pub fn sample(&self, shape: (usize, usize), rng: &mut StdRng) -> Result<Tensor, TabError> {
        Ok(self.rsample(shape, rng)?.detach())
    }

    /// Elementwise log density of `x`.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if tensor operations fail.
    pub fn log_prob(&self, x: &Tensor) -> Result<Tensor, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Prior log_prob: {e}"),
        };

        self.density(x).map_err(map_err)
    }

    /// Current `[p1, p2, p3]`.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if the values cannot be read back.
    pub fn params(&self) -> Result<[f64; 3], TabError> {
        let mut out = [0.0; 3];
        for (slot, p) in out.iter_mut().zip(&self.params) {
            let v = p.to_vec1::<f32>().map_err(|e| TabError::Internal {
                message: format!("Prior params: {e}"),
            })?;
            *slot = f64::from(v[0]);
        }
        Ok(out)
    }

    /// Trainable parameters; empty for a fixed prior.
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    /// Returns `true` if the parameters are learned.
    pub fn is_variable(&self) -> bool {
        self.variable
    }

    /// Returns the distribution family.
    pub fn family(&self) -> PriorFamily {
        self.family
    }

    /// Moves the parameters to `device`, keeping them trainable.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if the transfer fails.
    pub fn to_device(&self, device: &Device) -> Result<Self, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Prior to_device: {e}"),
        };

        let var_map = move_var_map(&self.var_map, device)?;
        let mut params = self.params.clone();
        if self.variable {
            let vars = lock_vars(&var_map)?;
            for (i, slot) in params.iter_mut().enumerate() {
                let name = format!("prior.dist_p{}", i + 1);
                *slot = vars
                    .get(&name)
                    .ok_or_else(|| TabError::Internal {
                        message: format!("Prior to_device: missing {name}"),
                    })?
                    .as_tensor()
                    .clone();
            }
        } else {
            for slot in params.iter_mut() {
                *slot = slot.to_device(device).map_err(map_err)?;
            }
        }

        Ok(Self {
            family: self.family,
            params,
            var_map,
            variable: self.variable,
            device: device.clone(),
        })
    }

    fn density(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let [p1, p2, p3] = &self.params;
        match self.family {
            PriorFamily::Normal => {
                let scale = p2.abs()?;
                let z = x.broadcast_sub(p1)?.broadcast_div(&scale)?;
                let quad = (z.sqr()? * -0.5)?;
                quad.broadcast_sub(&scale.log()?)? - 0.5 * (2.0 * PI).ln()
            }
            PriorFamily::Laplace => {
                let scale = p2.abs()?;
                let z = x.broadcast_sub(p1)?.abs()?.broadcast_div(&scale)?;
                z.neg()?.broadcast_sub(&(scale * 2.0)?.log()?)
            }
            PriorFamily::Gumbel => {
                let scale = p2.abs()?;
                let z = x.broadcast_sub(p1)?.broadcast_div(&scale)?;
                let inner = (&z + z.neg()?.exp()?)?;
                inner.neg()?.broadcast_sub(&scale.log()?)
            }
            PriorFamily::Uniform => {
                let width = (p2 - p1)?;
                let inside = x.broadcast_ge(p1)?.mul(&x.broadcast_lt(p2)?)?;
                let density = width.log()?.neg()?.broadcast_as(x.shape())?;
                let outside = Tensor::full(f32::NEG_INFINITY, x.shape(), x.device())?;
                inside.where_cond(&density, &outside)
            }
            PriorFamily::SinhArcsinh => {
                // e = sinh(asinh(y) - skew), y = (x - loc) / scale
                let scale = p2.abs()?;
                let y = x.broadcast_sub(p1)?.broadcast_div(&scale)?;
                let root = (y.sqr()? + 1.0)?.sqrt()?;
                let asinh = (&y + &root)?.log()?;
                let shifted = asinh.broadcast_sub(p3)?;
                let eps = ((shifted.exp()? - shifted.neg()?.exp()?)? * 0.5)?;
                let cosh = ((shifted.exp()? + shifted.neg()?.exp()?)? * 0.5)?;
                let base = ((eps.sqr()? * -0.5)? - 0.5 * (2.0 * PI).ln())?;
                let jacobian = (cosh.log()? - root.log()?)?.broadcast_sub(&scale.log()?)?;
                base + jacobian
            }
        }
    }

    fn host_tensor(&self, values: Vec<f32>, shape: (usize, usize)) -> Result<Tensor, TabError> {
        Tensor::from_vec(values, shape, &self.device).map_err(|e| TabError::Internal {
            message: format!("Prior host_tensor: {e}"),
        })
    }

    fn loc_scale(&self, eps: &Tensor, loc: &Tensor, scale: &Tensor) -> Result<Tensor, candle_core::Error> {
        eps.broadcast_mul(&scale.abs()?)?.broadcast_add(loc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    const ALL: [PriorFamily; 5] = [
        PriorFamily::Normal,
        PriorFamily::Uniform,
        PriorFamily::Laplace,
        PriorFamily::Gumbel,
        PriorFamily::SinhArcsinh,
    ];

    fn mean(t: &Tensor) -> f32 {
        t.mean_all().unwrap().to_scalar::<f32>().unwrap()
    }

    #[test]
    fn every_family_samples_finite_values() {
        let mut rng = StdRng::seed_from_u64(0);
        for family in ALL {
            let prior = Prior::new(family, [None; 3], false, &Device::Cpu).unwrap();
            let z = prior.sample((64, 4), &mut rng).unwrap();
            let flat = z.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert!(flat.iter().all(|x| x.is_finite()), "{family:?}");
        }
    }

    #[test]
    fn normal_loc_shifts_samples() {
        let prior = Prior::new(PriorFamily::Normal, [Some(5.0), Some(0.1), None], false, &Device::Cpu).unwrap();
        let z = prior.sample((200, 5), &mut StdRng::seed_from_u64(1)).unwrap();
        assert!((mean(&z) - 5.0).abs() < 0.05);
    }

    #[test]
    fn uniform_samples_stay_in_support() {
        let prior = Prior::new(PriorFamily::Uniform, [Some(2.0), Some(3.0), None], false, &Device::Cpu).unwrap();
        let z = prior.sample((50, 4), &mut StdRng::seed_from_u64(2)).unwrap();
        let flat = z.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(flat.iter().all(|x| (2.0..3.0).contains(x)));
    }

    #[test]
    fn normal_log_prob_matches_closed_form() {
        let prior = Prior::new(PriorFamily::Normal, [None; 3], false, &Device::Cpu).unwrap();
        let x = Tensor::new(&[[0.0f32, 1.0]], &Device::Cpu).unwrap();
        let lp = prior.log_prob(&x).unwrap().to_vec2::<f32>().unwrap();
        let c = -0.5 * (2.0 * std::f32::consts::PI).ln();
        assert!((lp[0][0] - c).abs() < 1e-5);
        assert!((lp[0][1] - (c - 0.5)).abs() < 1e-5);
    }

    #[test]
    fn uniform_log_prob_outside_support_is_neg_infinity() {
        let prior = Prior::new(PriorFamily::Uniform, [Some(0.0), Some(2.0), None], false, &Device::Cpu).unwrap();
        let x = Tensor::new(&[[1.0f32, 3.0]], &Device::Cpu).unwrap();
        let lp = prior.log_prob(&x).unwrap().to_vec2::<f32>().unwrap();
        assert!((lp[0][0] + 2.0f32.ln()).abs() < 1e-6);
        assert_eq!(lp[0][1], f32::NEG_INFINITY);
    }

    #[test]
    fn sinh_arcsinh_without_skew_is_normal() {
        let sas = Prior::new(PriorFamily::SinhArcsinh, [None; 3], false, &Device::Cpu).unwrap();
        let normal = Prior::new(PriorFamily::Normal, [None; 3], false, &Device::Cpu).unwrap();
        let x = Tensor::new(&[[-1.5f32, 0.3, 2.0]], &Device::Cpu).unwrap();
        let a = sas.log_prob(&x).unwrap().to_vec2::<f32>().unwrap();
        let b = normal.log_prob(&x).unwrap().to_vec2::<f32>().unwrap();
        for (x, y) in a[0].iter().zip(&b[0]) {
            assert!((x - y).abs() < 1e-4);
        }
    }

    #[test]
    fn variable_prior_registers_three_vars() {
        let fixed = Prior::new(PriorFamily::Normal, [None; 3], false, &Device::Cpu).unwrap();
        assert!(fixed.var_map().all_vars().is_empty());

        let learned = Prior::new(PriorFamily::Normal, [None; 3], true, &Device::Cpu).unwrap();
        assert_eq!(learned.var_map().all_vars().len(), 3);
        assert!(learned.is_variable());
    }

    #[test]
    fn rsample_propagates_gradient_to_params() {
        let prior = Prior::new(PriorFamily::Laplace, [None; 3], true, &Device::Cpu).unwrap();
        let z = prior.rsample((16, 2), &mut StdRng::seed_from_u64(3)).unwrap();
        let grads = z.sum_all().unwrap().backward().unwrap();
        let loc = &prior.params[0];
        let g = grads.get(loc).unwrap().to_vec1::<f32>().unwrap();
        // d(sum z)/d(loc) = number of elements
        assert!((g[0] - 32.0).abs() < 1e-4);
    }

    #[test]
    fn sample_is_detached() {
        let prior = Prior::new(PriorFamily::Normal, [None; 3], true, &Device::Cpu).unwrap();
        let z = prior.sample((4, 2), &mut StdRng::seed_from_u64(3)).unwrap();
        let grads = z.sum_all().unwrap().backward().unwrap();
        assert!(grads.get(&prior.params[0]).is_none());
    }

    #[test]
    fn same_seed_same_draws() {
        let prior = Prior::new(PriorFamily::Gumbel, [None; 3], false, &Device::Cpu).unwrap();
        let a = prior.sample((3, 3), &mut StdRng::seed_from_u64(4)).unwrap();
        let b = prior.sample((3, 3), &mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(a.to_vec2::<f32>().unwrap(), b.to_vec2::<f32>().unwrap());
    }
}
