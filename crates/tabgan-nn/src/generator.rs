//! Residual generator network.
//!
//! Architecture: `[Residual(dim → h_i), width += h_i]* → Linear(dim → data_dim)`
//!
//! Each residual block is `Linear → BatchNorm1d → ReLU` whose output is
//! concatenated with the block input, so the width grows block by block. The
//! raw projection is returned unshaped; per-span activation lives in
//! [`crate::activation`] and is applied only when the caller asks for it.

use candle_core::{DType, Device, Tensor};
use candle_nn::{batch_norm, linear, BatchNorm, BatchNormConfig, Linear, Module, ModuleT, VarBuilder, VarMap};
use rand::rngs::StdRng;
use tabgan_core::TabError;

use crate::init::{move_var_map, param_count, seed_linear};

/// Generator layer widths.
///
/// # Example
///
/// ```
/// use tabgan_nn::generator::GeneratorConfig;
///
/// let config = GeneratorConfig { input_dim: 8, residual_dims: vec![16, 16], output_dim: 4 };
/// assert_eq!(config.final_width(), 8 + 16 + 16);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Noise width plus conditioning width.
    pub input_dim: usize,
    /// Output width of each residual block.
    pub residual_dims: Vec<usize>,
    /// Width of the transformed data row.
    pub output_dim: usize,
}

impl GeneratorConfig {
    /// Width entering the final projection.
    pub fn final_width(&self) -> usize {
        self.input_dim + self.residual_dims.iter().sum::<usize>()
    }
}

struct Residual {
    fc: Linear,
    bn: BatchNorm,
}

impl Residual {
    fn forward(&self, input: &Tensor) -> Result<Tensor, candle_core::Error> {
        let out = self.fc.forward(input)?;
        let out = self.bn.forward_t(&out, true)?;
        let out = out.relu()?;
        Tensor::cat(&[&out, input], 1)
    }
}

/// Maps noise (plus optional conditioning) to a transformed data row.
pub struct Generator {
    blocks: Vec<Residual>,
    head: Linear,
    var_map: VarMap,
    config: GeneratorConfig,
    device: Device,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Generator({}→{:?}→{}, {} params, device={:?})",
            self.config.input_dim,
            self.config.residual_dims,
            self.config.output_dim,
            param_count(&self.var_map),
            self.device
        )
    }
}

impl Generator {
    /// Creates a generator with seeded weights in a fresh [`VarMap`].
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if parameter creation fails.
    pub fn new(config: &GeneratorConfig, rng: &mut StdRng, device: &Device) -> Result<Self, TabError> {
        let var_map = VarMap::new();
        let mut dim = config.input_dim;
        for (i, &width) in config.residual_dims.iter().enumerate() {
            seed_linear(&var_map, &format!("gen.res_{i}.fc"), dim, width, rng, device)?;
            dim += width;
        }
        seed_linear(&var_map, "gen.head", dim, config.output_dim, rng, device)?;

        Self::from_var_map(var_map, config, device)
    }

    /// Builds a generator around an existing, fully populated [`VarMap`].
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if a parameter is missing or misshapen.
    pub fn from_var_map(
        var_map: VarMap,
        config: &GeneratorConfig,
        device: &Device,
    ) -> Result<Self, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Generator from_var_map: {e}"),
        };

        let vb = VarBuilder::from_varmap(&var_map, DType::F32, device);
        let mut blocks = Vec::with_capacity(config.residual_dims.len());
        let mut dim = config.input_dim;
        for (i, &width) in config.residual_dims.iter().enumerate() {
            let prefix = format!("gen.res_{i}");
            let fc = linear(dim, width, vb.pp(format!("{prefix}.fc"))).map_err(map_err)?;
            let bn = batch_norm(width, BatchNormConfig::default(), vb.pp(format!("{prefix}.bn")))
                .map_err(map_err)?;
            blocks.push(Residual { fc, bn });
            dim += width;
        }
        let head = linear(dim, config.output_dim, vb.pp("gen.head")).map_err(map_err)?;

        Ok(Self {
            blocks,
            head,
            var_map,
            config: config.clone(),
            device: device.clone(),
        })
    }

    /// Batched forward pass.
    ///
    /// Input shape: `[N, input_dim]`. Output shape: `[N, output_dim]`.
    /// Batch norm runs on batch statistics, so `N` must be at least 2.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if tensor operations fail.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Generator forward: {e}"),
        };

        let mut h = input.clone();
        for block in &self.blocks {
            h = block.forward(&h).map_err(map_err)?;
        }
        self.head.forward(&h).map_err(map_err)
    }

    /// Moves every parameter to `device` and rebuilds the layers there.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::Internal`] if the transfer fails.
    pub fn to_device(&self, device: &Device) -> Result<Self, TabError> {
        let moved = move_var_map(&self.var_map, device)?;
        Self::from_var_map(moved, &self.config, device)
    }

    /// Parameters owned by this generator (weights and batch-norm statistics).
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    /// Returns the layer widths.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Returns the device the parameters live on.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::normal_vec;
    use rand::SeedableRng;

    fn small_config() -> GeneratorConfig {
        GeneratorConfig {
            input_dim: 6,
            residual_dims: vec![8, 8],
            output_dim: 3,
        }
    }

    fn noise(rng: &mut StdRng, rows: usize, cols: usize) -> Tensor {
        Tensor::from_vec(normal_vec(rng, rows * cols), (rows, cols), &Device::Cpu).unwrap()
    }

    #[test]
    fn forward_produces_target_width() {
        let mut rng = StdRng::seed_from_u64(42);
        let gen = Generator::new(&small_config(), &mut rng, &Device::Cpu).unwrap();
        let out = gen.forward(&noise(&mut rng, 10, 6)).unwrap();
        assert_eq!(out.dims(), &[10, 3]);
    }

    #[test]
    fn no_residual_blocks_is_a_linear_map() {
        let config = GeneratorConfig {
            input_dim: 4,
            residual_dims: vec![],
            output_dim: 2,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let gen = Generator::new(&config, &mut rng, &Device::Cpu).unwrap();
        let out = gen.forward(&noise(&mut rng, 5, 4)).unwrap();
        assert_eq!(out.dims(), &[5, 2]);
    }

    #[test]
    fn same_seed_same_output() {
        let config = small_config();
        let a = Generator::new(&config, &mut StdRng::seed_from_u64(9), &Device::Cpu).unwrap();
        let b = Generator::new(&config, &mut StdRng::seed_from_u64(9), &Device::Cpu).unwrap();
        let z = noise(&mut StdRng::seed_from_u64(3), 4, 6);
        let ya = a.forward(&z).unwrap().to_vec2::<f32>().unwrap();
        let yb = b.forward(&z).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(ya, yb);
    }

    #[test]
    fn var_map_holds_linear_and_batch_norm_params() {
        let gen = Generator::new(&small_config(), &mut StdRng::seed_from_u64(0), &Device::Cpu).unwrap();
        let names: Vec<String> = gen.var_map().data().lock().unwrap().keys().cloned().collect();
        assert!(names.iter().any(|n| n == "gen.res_0.fc.weight"));
        assert!(names.iter().any(|n| n == "gen.res_1.bn.running_mean"));
        assert!(names.iter().any(|n| n == "gen.head.bias"));
    }

    #[test]
    fn to_device_keeps_outputs() {
        let mut rng = StdRng::seed_from_u64(5);
        let gen = Generator::new(&small_config(), &mut rng, &Device::Cpu).unwrap();
        let moved = gen.to_device(&Device::Cpu).unwrap();
        let z = noise(&mut rng, 4, 6);
        assert_eq!(
            gen.forward(&z).unwrap().to_vec2::<f32>().unwrap(),
            moved.forward(&z).unwrap().to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn debug_format_readable() {
        let gen = Generator::new(&small_config(), &mut StdRng::seed_from_u64(0), &Device::Cpu).unwrap();
        assert!(format!("{gen:?}").contains("Generator(6→[8, 8]→3"));
    }
}
