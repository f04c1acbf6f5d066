//! Training objectives for both tracks.
//!
//! | Function | Formula |
//! |---|---|
//! | [`critic_loss`] | `-(mean(D(real)) - mean(D(fake)))` |
//! | [`generator_loss`] | `-mean(D(fake)) + ce` |
//! | [`cond_loss`] | `Σ mask ⊙ CE(logits_col, target_col) / N` |
//! | [`ml_loss`] | `-mean(prior_log_prob + log_det)` |
//! | [`tail_adaptive_loss`] | `-Σ γᵢ (log p − log q)ᵢ` |

use candle_core::{Tensor, Var, D};
use candle_nn::ops::log_softmax;
use tabgan_core::{is_discrete, ColumnInfo, TabError};

/// Wasserstein critic loss.
///
/// # Errors
///
/// Returns [`TabError::Internal`] if tensor operations fail.
pub fn critic_loss(y_real: &Tensor, y_fake: &Tensor) -> Result<Tensor, TabError> {
    let map_err = |e: candle_core::Error| TabError::Internal {
        message: format!("critic_loss: {e}"),
    };
    let real = y_real.mean_all().map_err(map_err)?;
    let fake = y_fake.mean_all().map_err(map_err)?;
    (real - fake).and_then(|d| d.neg()).map_err(map_err)
}

/// Generator loss with an optional conditioning cross entropy.
///
/// # Errors
///
/// Returns [`TabError::Internal`] if tensor operations fail.
pub fn generator_loss(y_fake: &Tensor, cross_entropy: Option<&Tensor>) -> Result<Tensor, TabError> {
    let map_err = |e: candle_core::Error| TabError::Internal {
        message: format!("generator_loss: {e}"),
    };
    let adv = y_fake.mean_all().and_then(|m| m.neg()).map_err(map_err)?;
    match cross_entropy {
        Some(ce) => (adv + ce).map_err(map_err),
        None => Ok(adv),
    }
}

/// Cross entropy between each discrete span of `data` and the category
/// selected in `cond`, kept only where `mask` marks the conditioned column,
/// summed and divided by the batch size.
///
/// `data` is `[N, output_dim]`, `cond` is `[N, dim_cond_vec]`, `mask` is
/// `[N, n_discrete_columns]`.
///
/// # Errors
///
/// Returns [`TabError::InvalidConfig`] if there are no discrete spans, or
/// [`TabError::Internal`] if tensor operations fail.
pub fn cond_loss(
    data: &Tensor,
    cond: &Tensor,
    mask: &Tensor,
    output_info: &[ColumnInfo],
) -> Result<Tensor, TabError> {
    let map_err = |e: candle_core::Error| TabError::Internal {
        message: format!("cond_loss: {e}"),
    };

    let rows = data.dim(0).map_err(map_err)?;
    let mut per_column = Vec::new();
    let mut st = 0;
    let mut st_c = 0;
    for column in output_info {
        let dim: usize = column.iter().map(|s| s.dim).sum();
        if is_discrete(column) {
            let logits = data.narrow(1, st, dim).map_err(map_err)?;
            let target = cond.narrow(1, st_c, dim).map_err(map_err)?;
            let ce = log_softmax(&logits, D::Minus1)
                .and_then(|lp| lp * target)
                .and_then(|v| v.sum(1))
                .and_then(|v| v.neg())
                .map_err(map_err)?;
            per_column.push(ce);
            st_c += dim;
        }
        st += dim;
    }
    if per_column.is_empty() {
        return Err(TabError::InvalidConfig {
            message: "conditioning requires at least one discrete column".to_string(),
        });
    }

    let loss = Tensor::stack(&per_column, 1).map_err(map_err)?;
    (loss * mask)
        .and_then(|v| v.sum_all())
        .and_then(|v| v / rows as f64)
        .map_err(map_err)
}

/// Negative mean log-likelihood, returned together with the per-row
/// log-likelihood.
///
/// A `prior_log_prob` of rank > 1 is averaged over its non-batch dimension
/// first.
///
/// # Errors
///
/// Returns [`TabError::Internal`] if tensor operations fail.
pub fn ml_loss(prior_log_prob: &Tensor, log_det: &Tensor) -> Result<(Tensor, Tensor), TabError> {
    let map_err = |e: candle_core::Error| TabError::Internal {
        message: format!("ml_loss: {e}"),
    };
    let prior = reduce_rows(prior_log_prob).map_err(map_err)?;
    let log_prob = (prior + log_det).map_err(map_err)?;
    let loss = log_prob.mean_all().and_then(|m| m.neg()).map_err(map_err)?;
    Ok((loss, log_prob))
}

/// Fixed constants of the tail-adaptive objective.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TailAdaptive {
    /// Exponent applied to the survival fraction.
    pub beta: f64,
    /// Divisor of the dominance count.
    pub normalizer: f64,
}

/// Tail-adaptive loss over one batch.
///
/// With `diff = logp - logq` and `wᵢ = exp(diffᵢ - max diff)`, the survival
/// fraction of row `i` is `Fᵢ = 1 - #{j : wᵢ > wⱼ} / normalizer`. The tilt
/// `γᵢ = Fᵢ^beta` is normalized to sum to one and held constant; the loss is
/// `-Σ γᵢ diffᵢ`.
///
/// # Errors
///
/// Returns [`TabError::Internal`] if tensor operations fail.
pub fn tail_adaptive_loss(logp: &Tensor, logq: &Tensor, params: TailAdaptive) -> Result<Tensor, TabError> {
    let map_err = |e: candle_core::Error| TabError::Internal {
        message: format!("tail_adaptive_loss: {e}"),
    };

    let logp = reduce_rows(logp).map_err(map_err)?;
    let diff = (logp - logq).map_err(map_err)?;
    let host: Vec<f32> = diff.detach().to_vec1::<f32>().map_err(map_err)?;

    let max = host.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let weights: Vec<f64> = host.iter().map(|&d| f64::from(d - max).exp()).collect();
    let gammas: Vec<f64> = weights
        .iter()
        .map(|wi| {
            let dominated = weights.iter().filter(|&wj| wi > wj).count() as f64;
            (1.0 - dominated / params.normalizer).powf(params.beta)
        })
        .collect();
    let total: f64 = gammas.iter().sum();
    let gammas: Vec<f32> = gammas.iter().map(|g| (g / total) as f32).collect();
    let gammas = Tensor::from_vec(gammas, host.len(), diff.device()).map_err(map_err)?;

    (gammas * diff)
        .and_then(|v| v.sum_all())
        .and_then(|v| v.neg())
        .map_err(map_err)
}

/// Sums two gradient stores over `vars` into `into`.
///
/// # Errors
///
/// Returns [`TabError::Internal`] if an addition fails.
pub fn accumulate_grads(
    mut into: candle_core::backprop::GradStore,
    from: &candle_core::backprop::GradStore,
    vars: &[Var],
) -> Result<candle_core::backprop::GradStore, TabError> {
    let map_err = |e: candle_core::Error| TabError::Internal {
        message: format!("accumulate_grads: {e}"),
    };
    for var in vars {
        let t = var.as_tensor();
        let sum = match (into.get(t), from.get(t)) {
            (Some(a), Some(b)) => Some((a + b).map_err(map_err)?),
            (None, Some(b)) => Some(b.clone()),
            _ => None,
        };
        if let Some(sum) = sum {
            into.insert(t, sum);
        }
    }
    Ok(into)
}

/// Averages over dim 1 when `t` has rank > 1.
fn reduce_rows(t: &Tensor) -> candle_core::Result<Tensor> {
    if t.rank() > 1 {
        t.mean(1)
    } else {
        Ok(t.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use tabgan_core::{ActivationFn, SpanInfo};

    fn scalar(t: &Tensor) -> f32 {
        t.to_vec0::<f32>().unwrap()
    }

    #[test]
    fn critic_and_generator_losses() {
        let real = Tensor::new(&[[2.0f32], [4.0]], &Device::Cpu).unwrap();
        let fake = Tensor::new(&[[1.0f32], [0.0]], &Device::Cpu).unwrap();
        assert_eq!(scalar(&critic_loss(&real, &fake).unwrap()), -(3.0 - 0.5));
        assert_eq!(scalar(&generator_loss(&fake, None).unwrap()), -0.5);
        let ce = Tensor::new(0.25f32, &Device::Cpu).unwrap();
        assert_eq!(scalar(&generator_loss(&fake, Some(&ce)).unwrap()), -0.25);
    }

    #[test]
    fn cond_loss_masks_unconditioned_columns() {
        let info = vec![
            vec![SpanInfo::new(1, ActivationFn::Tanh)],
            vec![SpanInfo::new(2, ActivationFn::Softmax)],
            vec![SpanInfo::new(2, ActivationFn::Softmax)],
        ];
        // equal logits: CE = ln 2 per conditioned row
        let data = Tensor::zeros((2, 5), candle_core::DType::F32, &Device::Cpu).unwrap();
        let cond = Tensor::new(&[[1.0f32, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1.0f32, 0.0], [0.0, 1.0]], &Device::Cpu).unwrap();
        let loss = scalar(&cond_loss(&data, &cond, &mask, &info).unwrap());
        assert!((loss - 2.0f32.ln()).abs() < 1e-5);

        let half = Tensor::new(&[[1.0f32, 0.0], [0.0, 0.0]], &Device::Cpu).unwrap();
        let loss = scalar(&cond_loss(&data, &cond, &half, &info).unwrap());
        assert!((loss - 2.0f32.ln() / 2.0).abs() < 1e-5);
    }

    #[test]
    fn cond_loss_without_discrete_spans_is_rejected() {
        let info = vec![vec![SpanInfo::new(1, ActivationFn::Tanh)]];
        let t = Tensor::zeros((2, 1), candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(cond_loss(&t, &t, &t, &info).is_err());
    }

    #[test]
    fn ml_loss_reduces_multidimensional_prior() {
        let prior = Tensor::new(&[[-1.0f32, -3.0], [-2.0, -2.0]], &Device::Cpu).unwrap();
        let log_det = Tensor::new(&[0.5f32, 1.0], &Device::Cpu).unwrap();
        let (loss, log_prob) = ml_loss(&prior, &log_det).unwrap();
        assert_eq!(log_prob.to_vec1::<f32>().unwrap(), vec![-1.5, -1.0]);
        assert_eq!(scalar(&loss), 1.25);
    }

    #[test]
    fn tail_adaptive_weights_tail_rows() {
        let logp = Tensor::new(&[0.0f32, 0.0, 0.0], &Device::Cpu).unwrap();
        let logq = Tensor::new(&[0.0f32, -1.0, -2.0], &Device::Cpu).unwrap();
        let params = TailAdaptive { beta: -1.0, normalizer: 3.0 };
        // diff = [0, 1, 2]; dominance counts [0, 1, 2]; F = [1, 2/3, 1/3];
        // gamma ∝ [1, 1.5, 3] / 5.5
        let loss = scalar(&tail_adaptive_loss(&logp, &logq, params).unwrap());
        let expected = -(1.5 * 1.0 + 3.0 * 2.0) / 5.5;
        assert!((loss - expected as f32).abs() < 1e-5, "{loss}");
    }

    #[test]
    fn tail_adaptive_ties_share_weight() {
        let logp = Tensor::new(&[-1.0f32, -1.0], &Device::Cpu).unwrap();
        let logq = Tensor::new(&[-2.0f32, -2.0], &Device::Cpu).unwrap();
        let params = TailAdaptive { beta: -1.0, normalizer: 2.0 };
        assert!((scalar(&tail_adaptive_loss(&logp, &logq, params).unwrap()) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn accumulated_grads_are_summed() {
        let w = Var::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        let a = (w.as_tensor() * 3.0).unwrap().sum_all().unwrap().backward().unwrap();
        let b = w.as_tensor().sqr().unwrap().sum_all().unwrap().backward().unwrap();
        let sum = accumulate_grads(a, &b, &[w.clone()]).unwrap();
        assert_eq!(sum.get(w.as_tensor()).unwrap().to_vec1::<f32>().unwrap(), vec![5.0, 7.0]);
    }
}
