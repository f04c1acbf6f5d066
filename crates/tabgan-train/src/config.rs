//! Synthesizer configuration.
//!
//! [`SynthesizerConfig`] carries every constructor option. It deserializes
//! from JSON with missing fields taking their defaults, and
//! [`SynthesizerConfig::validate`] rejects combinations that cannot train.

use std::fmt;

use candle_core::Device;
use serde::{Deserialize, Serialize};
use tabgan_core::{TabError, DEFAULT_GP_LAMBDA, DEFAULT_PAC};
use tabgan_nn::{FlowConfig, PriorFamily};

/// Which model the orchestrator trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrainingTrack {
    /// Conditional WGAN-GP with packed discriminator.
    #[default]
    Gan,
    /// Normalizing flow.
    Nf,
}

/// Objective used on the flow track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlowLoss {
    /// Negative mean log-likelihood.
    #[default]
    Ml,
    /// Tail-adaptive reweighted divergence.
    Ta,
}

/// Compute device request.
///
/// Serialized as a plain string: `"auto"`, `"cpu"`, `"cuda"`, `"cuda:1"`,
/// `"metal"`, ...
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceSelection {
    /// Host CPU.
    Cpu,
    /// First CUDA device if one is usable, otherwise CPU.
    #[default]
    Auto,
    /// Explicit backend name, optionally with an ordinal.
    Named(String),
}

impl From<String> for DeviceSelection {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Self::Cpu,
            "auto" => Self::Auto,
            _ => Self::Named(s),
        }
    }
}

impl From<&str> for DeviceSelection {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<DeviceSelection> for String {
    fn from(d: DeviceSelection) -> Self {
        d.to_string()
    }
}

impl fmt::Display for DeviceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Auto => write!(f, "auto"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

impl DeviceSelection {
    /// Opens the requested device.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidConfig`] for an unknown backend or a bad
    /// ordinal, and [`TabError::Internal`] if the backend fails to open
    /// (for example when the crate was built without that feature).
    ///
    /// # Example
    ///
    /// ```
    /// use tabgan_train::config::DeviceSelection;
    ///
    /// let device = DeviceSelection::Cpu.resolve().unwrap();
    /// assert!(device.is_cpu());
    /// ```
    pub fn resolve(&self) -> Result<Device, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("DeviceSelection resolve: {e}"),
        };

        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Auto => Device::cuda_if_available(0).map_err(map_err),
            Self::Named(name) => {
                let lower = name.to_ascii_lowercase();
                let (backend, ordinal) = match lower.split_once(':') {
                    Some((b, o)) => {
                        let o = o.parse::<usize>().map_err(|_| TabError::InvalidConfig {
                            message: format!("bad device ordinal in {name:?}"),
                        })?;
                        (b.to_string(), o)
                    }
                    None => (lower.clone(), 0),
                };
                match backend.as_str() {
                    "cpu" => Ok(Device::Cpu),
                    "cuda" => Device::new_cuda(ordinal).map_err(map_err),
                    "metal" => Device::new_metal(ordinal).map_err(map_err),
                    _ => Err(TabError::InvalidConfig {
                        message: format!("unknown device {name:?}"),
                    }),
                }
            }
        }
    }
}

/// Constructor options for [`crate::Synthesizer`].
///
/// # Example
///
/// ```
/// use tabgan_train::config::{SynthesizerConfig, TrainingTrack};
///
/// let config = SynthesizerConfig::from_json_str(r#"{"batch_size": 20, "pac": 5}"#).unwrap();
/// assert_eq!(config.batch_size, 20);
/// assert_eq!(config.embedding_dim, 128);
/// assert_eq!(config.training_track, TrainingTrack::Gan);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    /// Noise width fed to the generator (default: 128).
    pub embedding_dim: usize,

    /// Residual block widths of the generator (default: [256, 256]).
    pub generator_dims: Vec<usize>,

    /// Hidden widths of the discriminator (default: [256, 256]).
    pub discriminator_dims: Vec<usize>,

    /// Generator AdamW learning rate (default: 2e-4).
    pub generator_lr: f64,

    /// Generator AdamW weight decay (default: 1e-6).
    pub generator_decay: f64,

    /// Discriminator AdamW learning rate (default: 2e-4).
    pub discriminator_lr: f64,

    /// Discriminator AdamW weight decay (default: 1e-6).
    pub discriminator_decay: f64,

    /// Rows per minibatch; must be even and divisible by `pac` (default: 500).
    pub batch_size: usize,

    /// Critic updates per generator update (default: 1).
    pub discriminator_steps: usize,

    /// Sample conditioning categories by log frequency (default: true).
    pub log_frequency: bool,

    /// Log losses at the end of every epoch (default: false).
    pub verbose: bool,

    /// Training epochs (default: 300).
    pub epochs: usize,

    /// Rows per discriminator pack (default: 10).
    pub pac: usize,

    /// Compute device (default: auto).
    pub device: DeviceSelection,

    /// GAN or NF (default: GAN).
    pub training_track: TrainingTrack,

    /// Flow objective, ML or TA (default: ML).
    pub flow_loss: FlowLoss,

    /// Learn the prior's parameters jointly with the generator (default: false).
    pub variable_prior: bool,

    /// Noise prior family (default: normal).
    pub prior: PriorFamily,

    /// Initial first prior parameter; family default when unset.
    pub dist_p1: Option<f64>,

    /// Initial second prior parameter; family default when unset.
    pub dist_p2: Option<f64>,

    /// Initial third prior parameter; family default when unset.
    pub dist_p3: Option<f64>,

    /// Encode the table and train with conditional vectors (default: false).
    pub conditional: bool,

    /// Shape generator output per span during training and sampling
    /// (default: false).
    pub apply_output_activation: bool,

    /// Gradient penalty coefficient (default: 10).
    pub gradient_penalty_lambda: f64,

    /// Exponent applied to the tail-adaptive survival fraction (default: -1).
    pub tail_adaptive_beta: f64,

    /// Flow AdamW learning rate (default: 1e-4).
    pub flow_lr: f64,

    /// Layer sizes of the built-in flow model.
    pub flow: FlowConfig,

    /// Seed for every random draw (default: 42).
    pub seed: u64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 128,
            generator_dims: vec![256, 256],
            discriminator_dims: vec![256, 256],
            generator_lr: 2e-4,
            generator_decay: 1e-6,
            discriminator_lr: 2e-4,
            discriminator_decay: 1e-6,
            batch_size: 500,
            discriminator_steps: 1,
            log_frequency: true,
            verbose: false,
            epochs: 300,
            pac: DEFAULT_PAC,
            device: DeviceSelection::Auto,
            training_track: TrainingTrack::Gan,
            flow_loss: FlowLoss::Ml,
            variable_prior: false,
            prior: PriorFamily::Normal,
            dist_p1: None,
            dist_p2: None,
            dist_p3: None,
            conditional: false,
            apply_output_activation: false,
            gradient_penalty_lambda: DEFAULT_GP_LAMBDA,
            tail_adaptive_beta: -1.0,
            flow_lr: 1e-4,
            flow: FlowConfig::default(),
            seed: 42,
        }
    }
}

impl SynthesizerConfig {
    /// Parses a JSON object; absent fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidConfig`] if the JSON does not parse or
    /// fails [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self, TabError> {
        let config: Self = serde_json::from_str(json).map_err(|e| TabError::InvalidConfig {
            message: format!("config JSON: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks option ranges.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidConfig`] naming the first offending option.
    pub fn validate(&self) -> Result<(), TabError> {
        let fail = |message: String| Err(TabError::InvalidConfig { message });

        if self.batch_size == 0 || self.batch_size % 2 != 0 {
            return fail(format!("batch_size must be even and positive, got {}", self.batch_size));
        }
        if self.pac == 0 {
            return fail("pac must be at least 1".to_string());
        }
        if self.batch_size % self.pac != 0 {
            return fail(format!(
                "batch_size {} is not divisible by pac {}",
                self.batch_size, self.pac
            ));
        }
        if self.embedding_dim == 0 {
            return fail("embedding_dim must be positive".to_string());
        }
        if self.epochs == 0 {
            return fail("epochs must be positive".to_string());
        }
        if self.discriminator_steps == 0 {
            return fail("discriminator_steps must be positive".to_string());
        }
        if self.generator_dims.contains(&0) || self.discriminator_dims.contains(&0) {
            return fail("layer widths must be positive".to_string());
        }
        for (name, lr) in [
            ("generator_lr", self.generator_lr),
            ("discriminator_lr", self.discriminator_lr),
            ("flow_lr", self.flow_lr),
        ] {
            if !(lr > 0.0 && lr.is_finite()) {
                return fail(format!("{name} must be positive, got {lr}"));
            }
        }
        if self.gradient_penalty_lambda.is_nan() || self.gradient_penalty_lambda < 0.0 {
            return fail("gradient_penalty_lambda must be non-negative".to_string());
        }
        if self.flow.n_layers == 0 || self.flow.hidden_dim == 0 {
            return fail("flow layers and width must be positive".to_string());
        }
        let given = self.prior_overrides().iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        if given > self.prior.arity() {
            return fail(format!(
                "{:?} prior takes {} parameters, dist_p{given} was set",
                self.prior,
                self.prior.arity()
            ));
        }
        Ok(())
    }

    /// Prior parameter overrides in `p1, p2, p3` order.
    pub fn prior_overrides(&self) -> [Option<f64>; 3] {
        [self.dist_p1, self.dist_p2, self.dist_p3]
    }
}
