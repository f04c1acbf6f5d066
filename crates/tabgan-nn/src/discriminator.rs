//! Packed critic network with Wasserstein gradient penalty.
//!
//! Rows are grouped into packs of `pac` and each pack is flattened into one
//! wide input, so the critic scores groups jointly:
//!
//! `[N, d] → [N/pac, d·pac] → [Linear → LeakyReLU(0.2) → Dropout(0.5)]* → Linear(→1)`
//!
//! ## Gradient penalty
//!
//! The penalty needs `∂D(x̂)/∂x̂` as a differentiable function of the critic
//! weights. LeakyReLU has a piecewise-constant slope and dropout a fixed mask,
//! so the input gradient is the chain product of `W_i` and per-unit gates
//! recorded during the forward pass. Building it from ordinary tensor ops
//! lets a single backward pass carry the penalty into every weight.

use candle_core::{DType, Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::Rng;
use tabgan_core::TabError;

use crate::init::{param_count, seed_linear, uniform_vec};

/// Negative slope of the hidden activations.
pub const LEAKY_SLOPE: f64 = 0.2;

/// Dropout probability of the hidden layers.
pub const DROPOUT: f64 = 0.5;

/// Critic layer widths.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscriminatorConfig {
    /// Width of one (possibly conditioned) row.
    pub input_dim: usize,
    /// Hidden layer widths.
    pub hidden_dims: Vec<usize>,
    /// Rows per pack.
    pub pac: usize,
}

impl DiscriminatorConfig {
    /// Width of one packed critic input.
    pub fn packed_dim(&self) -> usize {
        self.input_dim * self.pac
    }
}

/// Packed Wasserstein critic.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use rand::{rngs::StdRng, SeedableRng};
/// use tabgan_nn::discriminator::{Discriminator, DiscriminatorConfig};
///
/// let mut rng = StdRng::seed_from_u64(0);
/// let config = DiscriminatorConfig { input_dim: 3, hidden_dims: vec![8], pac: 2 };
/// let critic = Discriminator::new(&config, &mut rng, &Device::Cpu).unwrap();
///
/// let batch = Tensor::zeros((4, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
/// let scores = critic.forward(&batch, &mut rng).unwrap();
/// assert_eq!(scores.dims(), &[2, 1]);
/// ```
pub struct Discriminator {
    hidden: Vec<Linear>,
    head: Linear,
    var_map: VarMap,
    config: DiscriminatorConfig,
    device: Device,
}

impl std::fmt::Debug for Discriminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Discriminator({}×{}→{:?}→1, {} params)",
            self.config.input_dim,
            self.config.pac,
            self.config.hidden_dims,
            param_count(&self.var_map)
        )
    }
}

/// Scores plus the per-layer gates needed for the input gradient.
struct PackedPass {
    scores: Tensor,
    gates: Vec<Tensor>,
}

impl Discriminator {
    /// Creates a critic with seeded weights.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidConfig`] if `pac` is zero, or
    /// [`TabError::Internal`] if parameter creation fails.
    pub fn new(config: &DiscriminatorConfig, rng: &mut StdRng, device: &Device) -> Result<Self, TabError> {
        if config.pac == 0 {
            return Err(TabError::InvalidConfig {
                message: "pac must be at least 1".to_string(),
            });
        }
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Discriminator new: {e}"),
        };

        let var_map = VarMap::new();
        let mut dim = config.packed_dim();
        for (i, &width) in config.hidden_dims.iter().enumerate() {
            seed_linear(&var_map, &format!("disc.hidden_{i}"), dim, width, rng, device)?;
            dim = width;
        }
        seed_linear(&var_map, "disc.head", dim, 1, rng, device)?;

        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let mut hidden = Vec::with_capacity(config.hidden_dims.len());
        let mut dim = config.packed_dim();
        for (i, &width) in config.hidden_dims.iter().enumerate() {
            hidden.push(linear(dim, width, vb.pp(format!("disc.hidden_{i}"))).map_err(map_err)?);
            dim = width;
        }
        let head = linear(dim, 1, vb.pp("disc.head")).map_err(map_err)?;

        Ok(Self {
            hidden,
            head,
            var_map,
            config: config.clone(),
            device: device.clone(),
        })
    }

    /// Scores a batch of rows, one score per pack.
    ///
    /// Input shape: `[N, input_dim]` with `N % pac == 0`. Output: `[N/pac, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::PackMismatch`] if `N` is not a multiple of `pac`.
    pub fn forward(&self, input: &Tensor, rng: &mut StdRng) -> Result<Tensor, TabError> {
        let packed = self.pack(input)?;
        Ok(self.forward_packed(&packed, rng)?.scores)
    }

    /// Gradient penalty `λ · mean((‖∇D(x̂)‖₂ − 1)²)` on real/fake interpolates.
    ///
    /// One interpolation coefficient is drawn per pack and shared by all rows
    /// of that pack. The gradient norm is taken over the packed row.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::PackMismatch`] if the batch does not split into
    /// whole packs, or [`TabError::Internal`] on shape mismatch.
    pub fn gradient_penalty(
        &self,
        real: &Tensor,
        fake: &Tensor,
        lambda: f64,
        rng: &mut StdRng,
    ) -> Result<Tensor, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Discriminator gradient_penalty: {e}"),
        };

        let rows = real.dim(0).map_err(map_err)?;
        self.check_pack(rows)?;
        let n_packs = rows / self.config.pac;

        let alpha: Vec<f32> = uniform_vec(rng, n_packs, 0.0, 1.0)
            .into_iter()
            .flat_map(|a| std::iter::repeat(a).take(self.config.pac))
            .collect();
        let alpha = Tensor::from_vec(alpha, (rows, 1), &self.device).map_err(map_err)?;
        let one_minus = alpha.affine(-1.0, 1.0).map_err(map_err)?;

        let interpolates = (real.broadcast_mul(&alpha).map_err(map_err)?
            + fake.broadcast_mul(&one_minus).map_err(map_err)?)
        .map_err(map_err)?;

        let packed = self.pack(&interpolates)?;
        let pass = self.forward_packed(&packed, rng)?;
        let grad = self.input_gradient(&pass.gates, n_packs).map_err(map_err)?;

        let norm = grad.sqr().map_err(map_err)?.sum(1).map_err(map_err)?.sqrt().map_err(map_err)?;
        let dev = (norm - 1.0).map_err(map_err)?.sqr().map_err(map_err)?;
        (dev.mean_all().map_err(map_err)? * lambda).map_err(map_err)
    }

    fn check_pack(&self, rows: usize) -> Result<(), TabError> {
        if rows % self.config.pac != 0 {
            return Err(TabError::PackMismatch {
                batch: rows,
                pac: self.config.pac,
            });
        }
        Ok(())
    }

    fn pack(&self, input: &Tensor) -> Result<Tensor, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Discriminator pack: {e}"),
        };

        let (rows, cols) = input.dims2().map_err(map_err)?;
        self.check_pack(rows)?;
        if cols != self.config.input_dim {
            return Err(TabError::Internal {
                message: format!(
                    "Discriminator pack: expected width {}, got {cols}",
                    self.config.input_dim
                ),
            });
        }
        input
            .reshape((rows / self.config.pac, self.config.packed_dim()))
            .map_err(map_err)
    }

    fn forward_packed(&self, packed: &Tensor, rng: &mut StdRng) -> Result<PackedPass, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Discriminator forward_packed: {e}"),
        };

        let mut h = packed.clone();
        let mut gates = Vec::with_capacity(self.hidden.len());
        for layer in &self.hidden {
            let z = layer.forward(&h).map_err(map_err)?;
            let gate = self.gate(&z, rng).map_err(map_err)?;
            h = (&z * &gate).map_err(map_err)?;
            gates.push(gate);
        }
        let scores = self.head.forward(&h).map_err(map_err)?;
        Ok(PackedPass { scores, gates })
    }

    /// Per-unit multiplier folding LeakyReLU slope and inverted dropout.
    fn gate(&self, z: &Tensor, rng: &mut StdRng) -> Result<Tensor, candle_core::Error> {
        let z = z.detach();
        let positive = z.gt(&z.zeros_like()?)?.to_dtype(DType::F32)?;
        let slope = positive.affine(1.0 - LEAKY_SLOPE, LEAKY_SLOPE)?;

        let keep = 1.0 / (1.0 - DROPOUT) as f32;
        let mask: Vec<f32> = (0..z.elem_count())
            .map(|_| if rng.gen::<f64>() < DROPOUT { 0.0 } else { keep })
            .collect();
        let mask = Tensor::from_vec(mask, z.dims().to_vec(), &self.device)?;
        slope * mask
    }

    /// `∂score/∂input` for every pack, shape `[n_packs, packed_dim]`.
    fn input_gradient(&self, gates: &[Tensor], n_packs: usize) -> Result<Tensor, candle_core::Error> {
        let mut grad = self.head.weight().clone();
        for (layer, gate) in self.hidden.iter().zip(gates).rev() {
            grad = grad.broadcast_mul(gate)?.matmul(layer.weight())?;
        }
        grad.broadcast_as((n_packs, self.config.packed_dim()))?.contiguous()
    }

    /// Parameters owned by this critic.
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    /// Returns the layer widths.
    pub fn config(&self) -> &DiscriminatorConfig {
        &self.config
    }
}
