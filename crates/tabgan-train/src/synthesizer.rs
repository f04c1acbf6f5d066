//! The user-facing synthesizer: configure, fit, sample.

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use tabgan_core::{
    validate_discrete_columns, ActivationFn, ColumnId, ColumnInfo, SpanInfo, TabError, Table,
};
use tabgan_nn::{FlowModel, Prior, RealNvp};

use crate::config::{DeviceSelection, SynthesizerConfig, TrainingTrack};
use crate::data::{steps_per_epoch, BatchSource};
use crate::model::{FlowTrainer, GanModel, TrainableModel};
use crate::sampler::DataSampler;
use crate::trainer::{fit_model, FitReport, Schedule};
use crate::transformer::TableTransformer;

/// Bias sampling toward one category of a discrete column.
///
/// Column and value travel together, so a condition is either fully given
/// or absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: ColumnId,
    pub value: f32,
}

impl Condition {
    pub fn new(column: impl Into<ColumnId>, value: f32) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }
}

/// The trained model of either track.
enum Fitted {
    Gan(GanModel),
    Flow(FlowTrainer),
}

impl Fitted {
    fn model(&self) -> &dyn TrainableModel {
        match self {
            Self::Gan(m) => m,
            Self::Flow(m) => m,
        }
    }

    fn model_mut(&mut self) -> &mut dyn TrainableModel {
        match self {
            Self::Gan(m) => m,
            Self::Flow(m) => m,
        }
    }
}

/// Tabular synthesizer with an adversarial and a flow training track.
///
/// # Example
///
/// ```no_run
/// use tabgan_core::Table;
/// use tabgan_train::{Synthesizer, SynthesizerConfig};
///
/// let table = Table::matrix(2, (0..200).map(|v| v as f32 / 200.0).collect()).unwrap();
/// let config = SynthesizerConfig { batch_size: 20, epochs: 2, ..Default::default() };
/// let mut synth = Synthesizer::new(config).unwrap();
/// synth.fit(&table, &[], None).unwrap();
/// let rows = synth.sample(25, None).unwrap();
/// assert_eq!(rows.n_rows(), 25);
/// ```
pub struct Synthesizer {
    config: SynthesizerConfig,
    device: Device,
    rng: StdRng,
    flow_model: Option<Box<dyn FlowModel>>,
    user_flow: bool,
    fitted: Option<Fitted>,
    transformer: Option<TableTransformer>,
    column_names: Option<Vec<String>>,
    report: Option<FitReport>,
}

impl std::fmt::Debug for Synthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synthesizer")
            .field("config", &self.config)
            .field("device", &self.device)
            .field("fitted", &self.fitted.is_some())
            .field("conditional", &self.transformer.is_some())
            .finish()
    }
}

impl Synthesizer {
    /// Validates `config` and opens its device.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidConfig`] for invalid options (odd batch
    /// size, batch not divisible by `pac`, ...) or an unknown device.
    pub fn new(config: SynthesizerConfig) -> Result<Self, TabError> {
        config.validate()?;
        let device = config.device.resolve()?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            device,
            flow_model: None,
            user_flow: false,
            fitted: None,
            transformer: None,
            column_names: None,
            report: None,
        })
    }

    /// Trains `flow` on the flow track instead of the built-in RealNVP.
    pub fn with_flow_model(mut self, flow: Box<dyn FlowModel>) -> Self {
        self.flow_model = Some(flow);
        self.user_flow = true;
        self
    }

    /// Fits on a JSON table (array of rows, array of records, or
    /// `{"columns": [...], "data": [[...]]}`).
    ///
    /// # Errors
    ///
    /// Returns [`TabError::UnsupportedTable`] for any other JSON shape, plus
    /// everything [`fit`](Self::fit) returns.
    pub fn fit_json(
        &mut self,
        data: &Value,
        discrete_columns: &[ColumnId],
        epochs: Option<usize>,
    ) -> Result<(), TabError> {
        let table = Table::from_json(data)?;
        self.fit(&table, discrete_columns, epochs)
    }

    /// Trains on `table` and loads the best state seen.
    ///
    /// `epochs` overrides the configured epoch count; this is deprecated and
    /// logs a warning.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidColumns`] naming every unknown discrete
    /// column, [`TabError::InvalidConfig`] for a zero epoch override or a
    /// flow model of the wrong width, [`TabError::PackMismatch`] when the
    /// real batch does not split into packs, and any training failure.
    pub fn fit(
        &mut self,
        table: &Table,
        discrete_columns: &[ColumnId],
        epochs: Option<usize>,
    ) -> Result<(), TabError> {
        validate_discrete_columns(table, discrete_columns)?;

        let epochs = match epochs {
            None => self.config.epochs,
            Some(e) => {
                tracing::warn!(
                    "`epochs` argument in `fit` is deprecated and will be removed; \
                     set `epochs` in the synthesizer configuration instead"
                );
                e
            }
        };
        if epochs == 0 {
            return Err(TabError::InvalidConfig {
                message: "epochs must be positive".to_string(),
            });
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        if let Some(Fitted::Flow(trainer)) = self.fitted.take() {
            if self.user_flow {
                self.flow_model = Some(trainer.into_flow());
            }
        }
        self.report = None;

        let (encoded, output_info) = if self.config.conditional {
            let transformer = TableTransformer::fit(table, discrete_columns)?;
            let encoded = transformer.transform(table)?;
            let info = transformer.output_info().to_vec();
            self.transformer = Some(transformer);
            (encoded, info)
        } else {
            self.transformer = None;
            let info: Vec<ColumnInfo> = vec![vec![SpanInfo::new(1, ActivationFn::Tanh)]; table.n_cols()];
            (table.clone(), info)
        };
        self.column_names = table.column_names().map(<[String]>::to_vec);

        let source = BatchSource::new(&encoded, self.config.batch_size, &self.device)?;
        let schedule = Schedule {
            epochs,
            steps_per_epoch: steps_per_epoch(encoded.n_rows(), self.config.batch_size),
            verbose: self.config.verbose,
        };

        let (fitted, report) = match self.config.training_track {
            TrainingTrack::Gan => {
                let sampler = if self.config.conditional {
                    Some(DataSampler::new(
                        encoded.values().to_vec(),
                        encoded.n_cols(),
                        &output_info,
                        self.config.log_frequency,
                    )?)
                } else {
                    None
                };
                let mut model = GanModel::new(
                    &self.config,
                    source,
                    sampler,
                    output_info,
                    &mut rng,
                    &self.device,
                )?;
                let report = fit_model(&mut model, &schedule, &mut rng)?;
                (Fitted::Gan(model), report)
            }
            TrainingTrack::Nf => {
                let flow = self.take_flow(encoded.n_cols(), &mut rng)?;
                let mut trainer = FlowTrainer::new(flow, &self.config, source, &self.device)?;
                match fit_model(&mut trainer, &schedule, &mut rng) {
                    Ok(report) => (Fitted::Flow(trainer), report),
                    Err(e) => {
                        if self.user_flow {
                            self.flow_model = Some(trainer.into_flow());
                        }
                        return Err(e);
                    }
                }
            }
        };

        self.fitted = Some(fitted);
        self.report = Some(report);
        self.rng = rng;
        Ok(())
    }

    /// The user's flow if one was supplied, else a fresh RealNVP over `dim`
    /// features. A user flow of the wrong width stays in place.
    fn take_flow(&mut self, dim: usize, rng: &mut StdRng) -> Result<Box<dyn FlowModel>, TabError> {
        if let Some(flow) = &self.flow_model {
            if flow.dim() != dim {
                return Err(TabError::InvalidConfig {
                    message: format!("flow model expects {} features, data has {dim}", flow.dim()),
                });
            }
        }
        if let Some(mut flow) = self.flow_model.take() {
            if let Err(e) = flow.set_device(&self.device) {
                self.flow_model = Some(flow);
                return Err(e);
            }
            return Ok(flow);
        }
        let prior = Prior::new(
            self.config.prior,
            self.config.prior_overrides(),
            self.config.variable_prior,
            &self.device,
        )?;
        Ok(Box::new(RealNvp::new(dim, &self.config.flow, prior, rng, &self.device)?))
    }

    /// Generates exactly `n` rows.
    ///
    /// Rows are produced in chunks of `batch_size` and truncated. With a
    /// `condition`, one conditional vector selecting that category is built
    /// and reused for every chunk; without one, conditional models draw
    /// conditions by category frequency per chunk.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::NotFitted`] before `fit`,
    /// [`TabError::InvalidConfig`] for a condition on a model trained
    /// without conditioning, or [`TabError::UnknownCategory`] for an unknown
    /// column or value.
    pub fn sample(&mut self, n: usize, condition: Option<&Condition>) -> Result<Table, TabError> {
        let map_err = |e: candle_core::Error| TabError::Internal {
            message: format!("Synthesizer sample: {e}"),
        };

        let fitted = self.fitted.as_ref().ok_or(TabError::NotFitted)?;
        let batch = self.config.batch_size;
        let sampler = match fitted {
            Fitted::Gan(model) => model.sampler(),
            Fitted::Flow(_) => None,
        };

        let global = match condition {
            None => None,
            Some(c) => {
                let (Some(transformer), Some(sampler)) = (&self.transformer, sampler) else {
                    return Err(TabError::InvalidConfig {
                        message: "conditional sampling needs a GAN fitted with `conditional` \
                                  and at least one discrete column"
                            .to_string(),
                    });
                };
                let info = transformer.convert_column_name_value_to_id(&c.column, c.value)?;
                let cond = sampler.generate_cond_from_condition_column_info(&info, batch);
                Some(
                    Tensor::from_vec(cond, (batch, sampler.dim_cond_vec()), fitted.model().device())
                        .map_err(map_err)?,
                )
            }
        };

        let steps = n / batch + 1;
        let mut values = Vec::new();
        let mut width = 0;
        for _ in 0..steps {
            let cond = match (&global, sampler) {
                (Some(g), _) => Some(g.clone()),
                (None, Some(s)) => match s.sample_original_condvec(batch, &mut self.rng) {
                    Some(c) => Some(
                        Tensor::from_vec(c, (batch, s.dim_cond_vec()), fitted.model().device())
                            .map_err(map_err)?,
                    ),
                    None => None,
                },
                (None, None) => None,
            };
            let chunk = fitted.model().sample_chunk(batch, cond.as_ref(), &mut self.rng)?;
            width = chunk.dim(1).map_err(map_err)?;
            let chunk = chunk
                .to_device(&Device::Cpu)
                .and_then(|c| c.flatten_all())
                .and_then(|c| c.to_vec1::<f32>())
                .map_err(map_err)?;
            values.extend(chunk);
        }
        values.truncate(n * width);

        match (&self.transformer, &self.column_names) {
            (Some(transformer), _) => transformer.inverse_transform(&values),
            (None, Some(names)) => Table::labeled(names.clone(), values),
            (None, None) => Table::matrix(width, values),
        }
    }

    /// Moves the trained model to another device; later fits use it too.
    ///
    /// # Errors
    ///
    /// Returns [`TabError::InvalidConfig`] or [`TabError::Internal`] if the
    /// device cannot be opened or the transfer fails.
    pub fn set_device(&mut self, device: DeviceSelection) -> Result<(), TabError> {
        let resolved = device.resolve()?;
        if let Some(fitted) = self.fitted.as_mut() {
            fitted.model_mut().set_device(&resolved)?;
        }
        self.device = resolved;
        self.config.device = device;
        Ok(())
    }

    /// Tracked losses of the last fit (generator or flow), one per step.
    pub fn generator_losses(&self) -> &[f64] {
        self.report.as_ref().map_or(&[], |r| &r.generator_losses)
    }

    /// Critic losses of the last fit, one per discriminator update.
    pub fn discriminator_losses(&self) -> &[f64] {
        self.report.as_ref().map_or(&[], |r| &r.discriminator_losses)
    }

    /// Smallest tracked loss of the last fit.
    pub fn min_loss(&self) -> Option<f64> {
        self.report.as_ref().map(|r| r.min_loss)
    }

    /// Full report of the last fit.
    pub fn report(&self) -> Option<&FitReport> {
        self.report.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &SynthesizerConfig {
        &self.config
    }

    /// The encoder, when fitted with conditioning.
    pub fn transformer(&self) -> Option<&TableTransformer> {
        self.transformer.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlowLoss;

    fn config() -> SynthesizerConfig {
        SynthesizerConfig {
            embedding_dim: 8,
            generator_dims: vec![16],
            discriminator_dims: vec![16],
            batch_size: 10,
            pac: 5,
            epochs: 2,
            device: DeviceSelection::Cpu,
            ..Default::default()
        }
    }

    fn table() -> Table {
        let values: Vec<f32> = (0..30).flat_map(|r| [r as f32 / 30.0, (r % 3) as f32]).collect();
        Table::labeled(vec!["x".into(), "k".into()], values).unwrap()
    }

    #[test]
    fn odd_batch_size_rejected_at_construction() {
        let err = Synthesizer::new(SynthesizerConfig { batch_size: 11, pac: 1, ..config() });
        assert!(matches!(err, Err(TabError::InvalidConfig { .. })));
    }

    #[test]
    fn sample_before_fit_fails() {
        let mut s = Synthesizer::new(config()).unwrap();
        assert_eq!(s.sample(3, None).unwrap_err(), TabError::NotFitted);
    }

    #[test]
    fn invalid_discrete_columns_named() {
        let mut s = Synthesizer::new(config()).unwrap();
        let err = s.fit(&table(), &["k".into(), "zip".into(), 1.into()], None);
        assert_eq!(
            err,
            Err(TabError::InvalidColumns { columns: vec!["zip".into(), "1".into()] })
        );
    }

    #[test]
    fn epochs_override_is_used() {
        let mut s = Synthesizer::new(config()).unwrap();
        s.fit(&table(), &[], Some(1)).unwrap();
        // 30 rows / batch 10 = 3 steps per epoch
        assert_eq!(s.generator_losses().len(), 3);
        assert!(s.fit(&table(), &[], Some(0)).is_err());
    }

    #[test]
    fn labeled_output_keeps_names() {
        let mut s = Synthesizer::new(config()).unwrap();
        s.fit(&table(), &[], None).unwrap();
        let out = s.sample(4, None).unwrap();
        assert_eq!(out.column_names().unwrap(), &["x".to_string(), "k".to_string()]);
        assert_eq!(out.n_rows(), 4);
    }

    #[test]
    fn conditional_sampling_hits_category() {
        let cfg = SynthesizerConfig { conditional: true, ..config() };
        let mut s = Synthesizer::new(cfg).unwrap();
        s.fit(&table(), &["k".into()], None).unwrap();
        let out = s.sample(13, Some(&Condition::new("k", 2.0))).unwrap();
        assert_eq!(out.n_rows(), 13);
        assert!(out.column(1).iter().all(|v| [0.0, 1.0, 2.0].contains(v)));

        let err = s.sample(1, Some(&Condition::new("k", 7.0)));
        assert!(matches!(err, Err(TabError::UnknownCategory { .. })));
    }

    #[test]
    fn condition_without_conditioning_rejected() {
        let mut s = Synthesizer::new(config()).unwrap();
        s.fit(&table(), &["k".into()], None).unwrap();
        let err = s.sample(1, Some(&Condition::new("k", 1.0)));
        assert!(matches!(err, Err(TabError::InvalidConfig { .. })));
    }

    #[test]
    fn flow_track_fits_and_samples() {
        let cfg = SynthesizerConfig {
            training_track: TrainingTrack::Nf,
            flow_loss: FlowLoss::Ta,
            ..config()
        };
        let mut s = Synthesizer::new(cfg).unwrap();
        s.fit(&table(), &[], None).unwrap();
        assert_eq!(s.generator_losses().len(), 2 * 3);
        assert!(s.discriminator_losses().is_empty());
        assert_eq!(s.sample(11, None).unwrap().n_rows(), 11);
    }

    /// RealNVP that counts how often it is evaluated.
    struct CountingFlow {
        inner: RealNvp,
        calls: std::rc::Rc<std::cell::Cell<usize>>,
    }

    impl FlowModel for CountingFlow {
        fn forward(&self, x: &candle_core::Tensor) -> Result<tabgan_nn::FlowOutput, TabError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.forward(x)
        }

        fn log_prob(&self, x: &candle_core::Tensor) -> Result<candle_core::Tensor, TabError> {
            self.calls.set(self.calls.get() + 1);
            self.inner.log_prob(x)
        }

        fn prior_log_prob(&self, x: &candle_core::Tensor) -> Result<candle_core::Tensor, TabError> {
            self.inner.prior_log_prob(x)
        }

        fn sample(&self, n: usize, rng: &mut StdRng) -> Result<candle_core::Tensor, TabError> {
            self.inner.sample(n, rng)
        }

        fn trainable_vars(&self) -> Vec<candle_core::Var> {
            self.inner.trainable_vars()
        }

        fn var_maps(&self) -> Vec<&candle_nn::VarMap> {
            self.inner.var_maps()
        }

        fn set_device(&mut self, device: &Device) -> Result<(), TabError> {
            self.inner.set_device(device)
        }

        fn dim(&self) -> usize {
            self.inner.dim()
        }
    }

    #[test]
    fn user_flow_survives_width_mismatch() {
        let device = Device::Cpu;
        let calls = std::rc::Rc::new(std::cell::Cell::new(0));
        let prior = Prior::new(tabgan_nn::PriorFamily::Normal, [None; 3], false, &device).unwrap();
        let inner = RealNvp::new(3, &tabgan_nn::FlowConfig::default(), prior, &mut StdRng::seed_from_u64(1), &device)
            .unwrap();
        let flow = CountingFlow { inner, calls: calls.clone() };

        let cfg = SynthesizerConfig { training_track: TrainingTrack::Nf, ..config() };
        let mut s = Synthesizer::new(cfg).unwrap().with_flow_model(Box::new(flow));

        // two columns against a three-wide flow
        let err = s.fit(&table(), &[], None);
        assert!(matches!(err, Err(TabError::InvalidConfig { .. })));
        assert_eq!(calls.get(), 0);

        let wide: Vec<f32> = (0..30).flat_map(|r| [r as f32 / 30.0, (r % 3) as f32, 0.5]).collect();
        s.fit(&Table::matrix(3, wide).unwrap(), &[], None).unwrap();
        assert!(calls.get() > 0);
    }

    #[test]
    fn set_device_before_and_after_fit() {
        let mut s = Synthesizer::new(config()).unwrap();
        s.set_device(DeviceSelection::Cpu).unwrap();
        s.fit(&table(), &[], Some(1)).unwrap();
        s.set_device("cpu".into()).unwrap();
        assert!(s.device().is_cpu());
        assert_eq!(s.sample(2, None).unwrap().n_rows(), 2);
    }

    #[test]
    fn fit_json_rejects_unknown_container() {
        let mut s = Synthesizer::new(config()).unwrap();
        let err = s.fit_json(&serde_json::json!("not a table"), &[], None);
        assert!(matches!(err, Err(TabError::UnsupportedTable { .. })));
    }
}
