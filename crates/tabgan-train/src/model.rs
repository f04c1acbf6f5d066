//! Trainable models driven by the orchestrator.
//!
//! [`TrainableModel`] is the capability the training loop needs: run the
//! inner updates, evaluate the tracked loss, apply the update, snapshot and
//! restore parameters, and generate rows. [`GanModel`] implements it for the
//! adversarial track and [`FlowTrainer`] for the flow track.
//!
//! ## Adversarial step
//!
//! 1. `discriminator_steps` times: noise (+ cond) → fake rows; real rows
//!    (category-matched when conditioning); critic loss and gradient penalty;
//!    summed gradients; discriminator AdamW step.
//! 2. Fresh noise (+ cond) → fake rows → `-mean(D(fake)) + CE` as the tracked
//!    loss; generator AdamW step over generator and prior parameters.

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tabgan_core::{ColumnInfo, TabError};
use tabgan_nn::{
    apply_activate, Discriminator, DiscriminatorConfig, FlowModel, Generator, GeneratorConfig,
    ParamSnapshot, Prior,
};

use crate::config::{FlowLoss, SynthesizerConfig};
use crate::data::BatchSource;
use crate::loss::{
    accumulate_grads, cond_loss, critic_loss, generator_loss, ml_loss, tail_adaptive_loss,
    TailAdaptive,
};
use crate::sampler::DataSampler;

/// Tracked loss of one step, before the update is applied.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Differentiable loss.
    pub loss: Tensor,
    /// Its scalar value.
    pub value: f64,
}

impl Evaluation {
    fn new(loss: Tensor) -> Result<Self, TabError> {
        let value = scalar(&loss)?;
        Ok(Self { loss, value })
    }
}

/// What the orchestrator needs from a model.
pub trait TrainableModel {
    /// Inner updates preceding the tracked step; returns their losses.
    fn prepare_step(&mut self, rng: &mut StdRng) -> Result<Vec<f64>, TabError>;

    /// Computes the tracked loss on the current parameters.
    fn evaluate(&mut self, rng: &mut StdRng) -> Result<Evaluation, TabError>;

    /// Back-propagates `evaluation` and applies one optimizer step.
    fn step(&mut self, evaluation: Evaluation) -> Result<(), TabError>;

    /// Deep copy of the parameters covered by best-state tracking.
    fn snapshot(&self) -> Result<ParamSnapshot, TabError>;

    /// Loads a snapshot taken from this model.
    fn restore(&mut self, snapshot: &ParamSnapshot) -> Result<(), TabError>;

    /// Generates `rows` rows in the training feature space.
    fn sample_chunk(
        &self,
        rows: usize,
        cond: Option<&Tensor>,
        rng: &mut StdRng,
    ) -> Result<Tensor, TabError>;

    /// Moves the sampling path to `device`.
    fn set_device(&mut self, device: &Device) -> Result<(), TabError>;

    /// Current device.
    fn device(&self) -> &Device;
}

fn scalar(t: &Tensor) -> Result<f64, TabError> {
    t.to_dtype(DType::F32)
        .and_then(|t| t.to_vec0::<f32>())
        .map(f64::from)
        .map_err(|e| TabError::Internal {
            message: format!("loss scalar: {e}"),
        })
}

fn adamw(vars: Vec<Var>, lr: f64, weight_decay: f64) -> Result<AdamW, TabError> {
    AdamW::new(
        vars,
        ParamsAdamW {
            lr,
            beta1: 0.5,
            beta2: 0.9,
            weight_decay,
            ..Default::default()
        },
    )
    .map_err(|e| TabError::Internal {
        message: format!("AdamW new: {e}"),
    })
}

/// Options of the adversarial track copied out of the synthesizer config.
#[derive(Debug, Clone, PartialEq)]
pub struct GanSettings {
    pub embedding_dim: usize,
    pub batch_size: usize,
    pub discriminator_steps: usize,
    pub gradient_penalty_lambda: f64,
    pub apply_output_activation: bool,
}

impl From<&SynthesizerConfig> for GanSettings {
    fn from(config: &SynthesizerConfig) -> Self {
        Self {
            embedding_dim: config.embedding_dim,
            batch_size: config.batch_size,
            discriminator_steps: config.discriminator_steps,
            gradient_penalty_lambda: config.gradient_penalty_lambda,
            apply_output_activation: config.apply_output_activation,
        }
    }
}

/// Conditioning vectors of one batch on the device.
struct BatchCondition {
    cond: Tensor,
    mask: Tensor,
    columns: Vec<usize>,
    options: Vec<usize>,
}

/// Generator, packed critic and noise prior with their optimizers.
pub struct GanModel {
    generator: Generator,
    discriminator: Discriminator,
    prior: Prior,
    gen_opt: AdamW,
    disc_opt: AdamW,
    disc_vars: Vec<Var>,
    source: BatchSource,
    sampler: Option<DataSampler>,
    output_info: Vec<ColumnInfo>,
    settings: GanSettings,
    device: Device,
}

impl std::fmt::Debug for GanModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GanModel")
            .field("generator", &self.generator)
            .field("discriminator", &self.discriminator)
            .field("prior", &self.prior)
            .field("conditional", &self.sampler.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl GanModel {
    /// Builds the networks for `source`'s feature width.
    ///
    /// `sampler` enables conditioning when it has at least one discrete
    /// column. `output_info` must describe `source`'s columns.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidConfig`] for an unusable configuration or
    /// [`TabError::Internal`] if parameter creation fails.
    pub fn new(
        config: &SynthesizerConfig,
        source: BatchSource,
        sampler: Option<DataSampler>,
        output_info: Vec<ColumnInfo>,
        rng: &mut StdRng,
        device: &Device,
    ) -> Result<Self, TabError> {
        let sampler = sampler.filter(|s| s.n_discrete_columns() > 0);
        let cond_dim = sampler.as_ref().map_or(0, DataSampler::dim_cond_vec);
        let data_dim = source.width();

        let generator = Generator::new(
            &GeneratorConfig {
                input_dim: config.embedding_dim + cond_dim,
                residual_dims: config.generator_dims.clone(),
                output_dim: data_dim,
            },
            rng,
            device,
        )?;
        let discriminator = Discriminator::new(
            &DiscriminatorConfig {
                input_dim: data_dim + cond_dim,
                hidden_dims: config.discriminator_dims.clone(),
                pac: config.pac,
            },
            rng,
            device,
        )?;
        let prior = Prior::new(
            config.prior,
            config.prior_overrides(),
            config.variable_prior,
            device,
        )?;

        let mut gen_vars = generator.var_map().all_vars();
        gen_vars.extend(prior.var_map().all_vars());
        let gen_opt = adamw(gen_vars, config.generator_lr, config.generator_decay)?;
        let disc_vars = discriminator.var_map().all_vars();
        let disc_opt = adamw(disc_vars.clone(), config.discriminator_lr, config.discriminator_decay)?;

        Ok(Self {
            generator,
            discriminator,
            prior,
            gen_opt,
            disc_opt,
            disc_vars,
            source,
            sampler,
            output_info,
            settings: GanSettings::from(config),
            device: device.clone(),
        })
    }

    /// The generator.
    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    /// The noise prior.
    pub fn prior(&self) -> &Prior {
        &self.prior
    }

    /// The conditional sampler, when conditioning is active.
    pub fn sampler(&self) -> Option<&DataSampler> {
        self.sampler.as_ref()
    }

    /// Reparameterized noise for a variable prior, plain draws otherwise.
    fn noise(&self, rows: usize, rng: &mut StdRng) -> Result<Tensor, TabError> {
        let shape = (rows, self.settings.embedding_dim);
        if self.prior.is_variable() {
            self.prior.rsample(shape, rng)
        } else {
            self.prior.sample(shape, rng)
        }
    }

    fn condition(&self, rows: usize, rng: &mut StdRng) -> Result<Option<BatchCondition>, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("GanModel condition: {e}"),
        };

        let Some(cv) = self.sampler.as_ref().and_then(|s| s.sample_condvec(rows, rng)) else {
            return Ok(None);
        };
        let n_disc = cv.mask.len() / rows.max(1);
        let cond_dim = cv.cond.len() / rows.max(1);
        Ok(Some(BatchCondition {
            cond: Tensor::from_vec(cv.cond, (rows, cond_dim), &self.device).map_err(map_err)?,
            mask: Tensor::from_vec(cv.mask, (rows, n_disc), &self.device).map_err(map_err)?,
            columns: cv.columns,
            options: cv.options,
        }))
    }

    fn activate(&self, fake: &Tensor, rng: &mut StdRng) -> Result<Tensor, TabError> {
        if self.settings.apply_output_activation {
            apply_activate(fake, &self.output_info, rng)
        } else {
            Ok(fake.clone())
        }
    }

    /// One discriminator update; returns the critic loss.
    fn critic_step(&mut self, rng: &mut StdRng) -> Result<f64, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("GanModel critic_step: {e}"),
        };

        let batch = self.settings.batch_size;
        let (fake_in, real_cat, cond) = match self.condition(batch, rng)? {
            None => {
                let real = self.source.draw(rng)?;
                let rows = real.dim(0).map_err(map_err)?;
                (self.noise(rows, rng)?.detach(), real, None)
            }
            Some(c) => {
                let z = self.noise(batch, rng)?.detach();
                let z = Tensor::cat(&[&z, &c.cond], 1).map_err(map_err)?;

                let mut perm: Vec<usize> = (0..batch).collect();
                perm.shuffle(rng);
                let columns: Vec<usize> = perm.iter().map(|&i| c.columns[i]).collect();
                let options: Vec<usize> = perm.iter().map(|&i| c.options[i]).collect();

                let sampler = self.sampler.as_ref().ok_or_else(|| TabError::Internal {
                    message: "GanModel critic_step: condition without sampler".to_string(),
                })?;
                let real = sampler.sample_data(batch, Some((columns.as_slice(), options.as_slice())), rng);
                let real = Tensor::from_vec(real, (batch, sampler.width()), &self.device)
                    .map_err(map_err)?;

                let index: Vec<u32> = perm.iter().map(|&i| i as u32).collect();
                let index = Tensor::from_vec(index, batch, &self.device).map_err(map_err)?;
                let c2 = c.cond.index_select(&index, 0).map_err(map_err)?;
                let real_cat = Tensor::cat(&[&real, &c2], 1).map_err(map_err)?;
                (z, real_cat, Some(c.cond))
            }
        };

        let fake = self.generator.forward(&fake_in)?;
        let fake = self.activate(&fake, rng)?.detach();
        let fake_cat = match &cond {
            Some(c) => Tensor::cat(&[&fake, c], 1).map_err(map_err)?,
            None => fake,
        };

        let y_fake = self.discriminator.forward(&fake_cat, rng)?;
        let y_real = self.discriminator.forward(&real_cat, rng)?;
        let pen = self.discriminator.gradient_penalty(
            &real_cat,
            &fake_cat,
            self.settings.gradient_penalty_lambda,
            rng,
        )?;
        let loss_d = critic_loss(&y_real, &y_fake)?;

        let pen_grads = pen.backward().map_err(map_err)?;
        let loss_grads = loss_d.backward().map_err(map_err)?;
        let grads = accumulate_grads(pen_grads, &loss_grads, &self.disc_vars)?;
        self.disc_opt.step(&grads).map_err(map_err)?;

        scalar(&loss_d)
    }
}

impl TrainableModel for GanModel {
    fn prepare_step(&mut self, rng: &mut StdRng) -> Result<Vec<f64>, TabError> {
        (0..self.settings.discriminator_steps)
            .map(|_| self.critic_step(rng))
            .collect()
    }

    fn evaluate(&mut self, rng: &mut StdRng) -> Result<Evaluation, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("GanModel evaluate: {e}"),
        };

        let batch = self.settings.batch_size;
        let z = self.noise(batch, rng)?;
        let cond = self.condition(batch, rng)?;
        let z = match &cond {
            Some(c) => Tensor::cat(&[&z, &c.cond], 1).map_err(map_err)?,
            None => z,
        };

        let fake = self.generator.forward(&z)?;
        let fakeact = self.activate(&fake, rng)?;
        let y_fake = match &cond {
            Some(c) => {
                let input = Tensor::cat(&[&fakeact, &c.cond], 1).map_err(map_err)?;
                self.discriminator.forward(&input, rng)?
            }
            None => self.discriminator.forward(&fakeact, rng)?,
        };

        let cross_entropy = match &cond {
            Some(c) => Some(cond_loss(&fake, &c.cond, &c.mask, &self.output_info)?),
            None => None,
        };
        Evaluation::new(generator_loss(&y_fake, cross_entropy.as_ref())?)
    }

    fn step(&mut self, evaluation: Evaluation) -> Result<(), TabError> {
        self.gen_opt
            .backward_step(&evaluation.loss)
            .map_err(|e| TabError::Internal {
                message: format!("GanModel step: {e}"),
            })
    }

    fn snapshot(&self) -> Result<ParamSnapshot, TabError> {
        ParamSnapshot::capture(&[self.generator.var_map(), self.prior.var_map()])
    }

    fn restore(&mut self, snapshot: &ParamSnapshot) -> Result<(), TabError> {
        snapshot.restore(&[self.generator.var_map(), self.prior.var_map()])
    }

    fn sample_chunk(
        &self,
        rows: usize,
        cond: Option<&Tensor>,
        rng: &mut StdRng,
    ) -> Result<Tensor, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("GanModel sample_chunk: {e}"),
        };

        let z = self.prior.sample((rows, self.settings.embedding_dim), rng)?;
        let z = match cond {
            Some(c) => Tensor::cat(&[&z, c], 1).map_err(map_err)?,
            None => z,
        };
        let fake = self.generator.forward(&z)?;
        Ok(self.activate(&fake, rng)?.detach())
    }

    fn set_device(&mut self, device: &Device) -> Result<(), TabError> {
        self.generator = self.generator.to_device(device)?;
        self.prior = self.prior.to_device(device)?;
        self.device = device.clone();
        Ok(())
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// A flow model with its optimizer and objective.
pub struct FlowTrainer {
    flow: Box<dyn FlowModel>,
    optimizer: AdamW,
    source: BatchSource,
    loss: FlowLoss,
    tail: TailAdaptive,
    device: Device,
}

impl std::fmt::Debug for FlowTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowTrainer")
            .field("dim", &self.flow.dim())
            .field("loss", &self.loss)
            .field("tail", &self.tail)
            .finish()
    }
}

impl FlowTrainer {
    /// Wraps `flow` with an AdamW optimizer over all of its variables.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidConfig`] if the flow's width differs from
    /// the data, or [`TabError::Internal`] if optimizer creation fails.
    pub fn new(
        flow: Box<dyn FlowModel>,
        config: &SynthesizerConfig,
        source: BatchSource,
        device: &Device,
    ) -> Result<Self, TabError> {
        if flow.dim() != source.width() {
            return Err(TabError::InvalidConfig {
                message: format!(
                    "flow model expects {} features, data has {}",
                    flow.dim(),
                    source.width()
                ),
            });
        }
        let optimizer = AdamW::new(
            flow.trainable_vars(),
            ParamsAdamW {
                lr: config.flow_lr,
                ..Default::default()
            },
        )
        .map_err(|e| TabError::Internal {
            message: format!("FlowTrainer optimizer: {e}"),
        })?;

        Ok(Self {
            flow,
            optimizer,
            source,
            loss: config.flow_loss,
            tail: TailAdaptive {
                beta: config.tail_adaptive_beta,
                normalizer: config.batch_size as f64,
            },
            device: device.clone(),
        })
    }

    /// The trained flow.
    pub fn flow(&self) -> &dyn FlowModel {
        self.flow.as_ref()
    }

    /// Gives the flow back, dropping optimizer state.
    pub fn into_flow(self) -> Box<dyn FlowModel> {
        self.flow
    }
}

impl TrainableModel for FlowTrainer {
    fn prepare_step(&mut self, _rng: &mut StdRng) -> Result<Vec<f64>, TabError> {
        Ok(Vec::new())
    }

    fn evaluate(&mut self, rng: &mut StdRng) -> Result<Evaluation, TabError> {
        let real = self.source.draw(rng)?;
        let loss = match self.loss {
            FlowLoss::Ml => {
                let out = self.flow.forward(&real)?;
                ml_loss(&out.prior_log_prob, &out.log_det)?.0
            }
            FlowLoss::Ta => {
                let logp = self.flow.prior_log_prob(&real)?;
                let logq = self.flow.log_prob(&real)?;
                tail_adaptive_loss(&logp, &logq, self.tail)?
            }
        };
        Evaluation::new(loss)
    }

    fn step(&mut self, evaluation: Evaluation) -> Result<(), TabError> {
        self.optimizer
            .backward_step(&evaluation.loss)
            .map_err(|e| TabError::Internal {
                message: format!("FlowTrainer step: {e}"),
            })
    }

    fn snapshot(&self) -> Result<ParamSnapshot, TabError> {
        ParamSnapshot::capture(&self.flow.var_maps())
    }

    fn restore(&mut self, snapshot: &ParamSnapshot) -> Result<(), TabError> {
        snapshot.restore(&self.flow.var_maps())
    }

    fn sample_chunk(
        &self,
        rows: usize,
        _cond: Option<&Tensor>,
        rng: &mut StdRng,
    ) -> Result<Tensor, TabError> {
        self.flow.sample(rows, rng)
    }

    fn set_device(&mut self, device: &Device) -> Result<(), TabError> {
        self.flow.set_device(device)?;
        self.device = device.clone();
        Ok(())
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
