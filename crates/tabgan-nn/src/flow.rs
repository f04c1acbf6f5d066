//! Normalizing flow models.
//!
//! [`FlowModel`] is the contract the flow training track consumes: an
//! invertible map from data to a latent space with tractable log-determinant,
//! a base prior, and a sampler. [`RealNvp`] is the default implementation,
//! used when the caller does not plug in a model of its own.
//!
//! ## RealNVP coupling
//!
//! Each layer keeps the masked half `x₁ = x ⊙ m` fixed and transforms the
//! other half:
//!
//! `z = x₁ + (1 − m) ⊙ (x ⊙ exp(s(x₁)) + t(x₁))`, `log|det J| = Σ s(x₁)`
//!
//! Masks alternate between even and odd feature positions.

use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tabgan_core::TabError;

use crate::init::{move_var_map, param_count, seed_linear};
use crate::prior::Prior;

/// Result of a data → latent pass.
#[derive(Debug, Clone)]
pub struct FlowOutput {
    /// Latent codes, `[N, D]`.
    pub latent: Tensor,
    /// Log density of the latent codes under the base prior; `[N, D]` or `[N]`.
    pub prior_log_prob: Tensor,
    /// Log-determinant of the data → latent Jacobian, `[N]`.
    pub log_det: Tensor,
}

/// Invertible generative model trained by the flow track.
pub trait FlowModel {
    /// Maps data to latent space.
    fn forward(&self, x: &Tensor) -> Result<FlowOutput, TabError>;

    /// Log density of `x` under the flow, `[N]`.
    fn log_prob(&self, x: &Tensor) -> Result<Tensor, TabError>;

    /// Log density of `x` under the base prior, `[N, D]` or `[N]`.
    fn prior_log_prob(&self, x: &Tensor) -> Result<Tensor, TabError>;

    /// Draws `n` rows in data space.
    fn sample(&self, n: usize, rng: &mut StdRng) -> Result<Tensor, TabError>;

    /// Every variable the optimizer should update.
    fn trainable_vars(&self) -> Vec<Var>;

    /// Variable tables covered by best-state snapshots.
    fn var_maps(&self) -> Vec<&VarMap>;

    /// Moves the model to `device`.
    fn set_device(&mut self, device: &Device) -> Result<(), TabError>;

    /// Data dimensionality.
    fn dim(&self) -> usize;
}

/// RealNVP layer sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Number of coupling layers (default: 4).
    pub n_layers: usize,
    /// Hidden width of each coupling network (default: 64).
    pub hidden_dim: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            n_layers: 4,
            hidden_dim: 64,
        }
    }
}

struct Coupling {
    l1: Linear,
    l2: Linear,
    mask: Tensor,
    inv_mask: Tensor,
}

impl Coupling {
    /// Returns `(s, t)`, both zero on the masked positions.
    fn scale_shift(&self, x: &Tensor, dim: usize) -> Result<(Tensor, Tensor), candle_core::Error> {
        let x1 = x.broadcast_mul(&self.mask)?;
        let h = self.l1.forward(&x1)?.tanh()?;
        let st = self.l2.forward(&h)?;
        let s = st.narrow(1, 0, dim)?.tanh()?.broadcast_mul(&self.inv_mask)?;
        let t = st.narrow(1, dim, dim)?.broadcast_mul(&self.inv_mask)?;
        Ok((s, t))
    }
}

/// Affine-coupling normalizing flow.
///
/// # Example
///
/// ```
/// use candle_core::Device;
/// use rand::{rngs::StdRng, SeedableRng};
/// use tabgan_nn::flow::{FlowConfig, FlowModel, RealNvp};
/// use tabgan_nn::prior::{Prior, PriorFamily};
///
/// let mut rng = StdRng::seed_from_u64(0);
/// let prior = Prior::new(PriorFamily::Normal, [None; 3], false, &Device::Cpu).unwrap();
/// let flow = RealNvp::new(3, &FlowConfig::default(), prior, &mut rng, &Device::Cpu).unwrap();
/// let x = flow.sample(5, &mut rng).unwrap();
/// assert_eq!(x.dims(), &[5, 3]);
/// ```
pub struct RealNvp {
    layers: Vec<Coupling>,
    prior: Prior,
    var_map: VarMap,
    config: FlowConfig,
    dim: usize,
    device: Device,
}

impl std::fmt::Debug for RealNvp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RealNvp(dim={}, layers={}, hidden={}, {} params, {:?})",
            self.dim,
            self.config.n_layers,
            self.config.hidden_dim,
            param_count(&self.var_map),
            self.prior
        )
    }
}

impl RealNvp {
    /// Creates a flow over `dim` features with seeded coupling networks.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidConfig`] for a zero dimension, or
    /// [`TabError::Internal`] if parameter creation fails.
    pub fn new(
        dim: usize,
        config: &FlowConfig,
        prior: Prior,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self, TabError> {
        if dim == 0 {
            return Err(TabError::InvalidConfig {
                message: "flow dimension must be positive".to_string(),
            });
        }
        let var_map = VarMap::new();
        for i in 0..config.n_layers {
            seed_linear(&var_map, &format!("flow.coupling_{i}.l1"), dim, config.hidden_dim, rng, device)?;
            seed_linear(&var_map, &format!("flow.coupling_{i}.l2"), config.hidden_dim, 2 * dim, rng, device)?;
        }
        Self::from_parts(var_map, prior, config, dim, device)
    }

    fn from_parts(
        var_map: VarMap,
        prior: Prior,
        config: &FlowConfig,
        dim: usize,
        device: &Device,
    ) -> Result<Self, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("RealNvp from_parts: {e}"),
        };

        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let mut layers = Vec::with_capacity(config.n_layers);
        for i in 0..config.n_layers {
            let prefix = format!("flow.coupling_{i}");
            let l1 = linear(dim, config.hidden_dim, vb.pp(format!("{prefix}.l1"))).map_err(map_err)?;
            let l2 = linear(config.hidden_dim, 2 * dim, vb.pp(format!("{prefix}.l2"))).map_err(map_err)?;
            let mask: Vec<f32> = (0..dim)
                .map(|j| if j % 2 == i % 2 { 1.0 } else { 0.0 })
                .collect();
            let mask = Tensor::from_vec(mask, (1, dim), device).map_err(map_err)?;
            let inv_mask = mask.affine(-1.0, 1.0).map_err(map_err)?;
            layers.push(Coupling { l1, l2, mask, inv_mask });
        }

        Ok(Self {
            layers,
            prior,
            var_map,
            config: config.clone(),
            dim,
            device: device.clone(),
        })
    }

    /// The base distribution.
    pub fn prior(&self) -> &Prior {
        &self.prior
    }

    /// Latent → data.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if tensor operations fail.
    pub fn inverse(&self, z: &Tensor) -> Result<Tensor, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("RealNvp inverse: {e}"),
        };

        let mut x = z.clone();
        for layer in self.layers.iter().rev() {
            let (s, t) = layer.scale_shift(&x, self.dim).map_err(map_err)?;
            let x1 = x.broadcast_mul(&layer.mask).map_err(map_err)?;
            let moved = (&x - &t)
                .and_then(|d| d * s.neg()?.exp()?)
                .and_then(|v| v.broadcast_mul(&layer.inv_mask))
                .map_err(map_err)?;
            x = (x1 + moved).map_err(map_err)?;
        }
        Ok(x)
    }
}

impl FlowModel for RealNvp {
    fn forward(&self, x: &Tensor) -> Result<FlowOutput, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("RealNvp forward: {e}"),
        };

        let rows = x.dim(0).map_err(map_err)?;
        let mut z = x.clone();
        let mut log_det = Tensor::zeros(rows, DType::F32, &self.device).map_err(map_err)?;
        for layer in &self.layers {
            let (s, t) = layer.scale_shift(&z, self.dim).map_err(map_err)?;
            let x1 = z.broadcast_mul(&layer.mask).map_err(map_err)?;
            let moved = (&z * s.exp().map_err(map_err)?)
                .and_then(|v| v + &t)
                .and_then(|v| v.broadcast_mul(&layer.inv_mask))
                .map_err(map_err)?;
            z = (x1 + moved).map_err(map_err)?;
            log_det = (log_det + s.sum(D::Minus1).map_err(map_err)?).map_err(map_err)?;
        }
        let prior_log_prob = self.prior.log_prob(&z)?;

        Ok(FlowOutput {
            latent: z,
            prior_log_prob,
            log_det,
        })
    }

    fn log_prob(&self, x: &Tensor) -> Result<Tensor, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("RealNvp log_prob: {e}"),
        };

        let out = self.forward(x)?;
        let prior = out.prior_log_prob.mean(D::Minus1).map_err(map_err)?;
        (prior + out.log_det).map_err(map_err)
    }

    fn prior_log_prob(&self, x: &Tensor) -> Result<Tensor, TabError> {
        self.prior.log_prob(x)
    }

    fn sample(&self, n: usize, rng: &mut StdRng) -> Result<Tensor, TabError> {
        let z = self.prior.sample((n, self.dim), rng)?;
        Ok(self.inverse(&z)?.detach())
    }

    fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = self.var_map.all_vars();
        vars.extend(self.prior.var_map().all_vars());
        vars
    }

    fn var_maps(&self) -> Vec<&VarMap> {
        vec![&self.var_map, self.prior.var_map()]
    }

    fn set_device(&mut self, device: &Device) -> Result<(), TabError> {
        let var_map = move_var_map(&self.var_map, device)?;
        let prior = self.prior.to_device(device)?;
        *self = Self::from_parts(var_map, prior, &self.config, self.dim, device)?;
        Ok(())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
