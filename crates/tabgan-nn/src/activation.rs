//! Per-span output shaping for generator rows.
//!
//! Continuous spans are squashed with `tanh`, categorical spans are relaxed
//! with Gumbel-softmax. The training and sampling paths call this only when
//! output activation is switched on.

use candle_core::{Device, Tensor, D};
use rand::rngs::StdRng;
use tabgan_core::{ActivationFn, ColumnInfo, TabError};

use crate::init::uniform_vec;

/// Gumbel-softmax temperature used for categorical spans.
pub const GUMBEL_TAU: f64 = 0.2;

/// Attempts made before a NaN relaxation is reported.
pub const GUMBEL_MAX_RETRIES: usize = 10;

const GUMBEL_EPS: f32 = 1e-10;

/// Shapes each span of `data` according to `output_info`.
///
/// # Errors
///
/// Returns [`TabError::InvalidConfig`] if the spans do not cover `data`'s
/// width, [`TabError::NumericalInstability`] if a categorical span keeps
/// producing NaN, or [`TabError::Internal`] if tensor operations fail.
pub fn apply_activate(
    data: &Tensor,
    output_info: &[ColumnInfo],
    rng: &mut StdRng,
) -> Result<Tensor, TabError> {
    let map_err = |e: candle_core::Error| TabError::Internal {
        message: format!("apply_activate: {e}"),
    };

    let width = data.dim(1).map_err(map_err)?;
    let expected = tabgan_core::output_dim(output_info);
    if width != expected {
        return Err(TabError::InvalidConfig {
            message: format!("output spans cover {expected} features, data has {width}"),
        });
    }

    let mut parts = Vec::new();
    let mut st = 0;
    for span in output_info.iter().flatten() {
        let slice = data.narrow(1, st, span.dim).map_err(map_err)?;
        let shaped = match span.activation {
            ActivationFn::Tanh => slice.tanh().map_err(map_err)?,
            ActivationFn::Softmax => gumbel_softmax(&slice, GUMBEL_TAU, rng)?,
        };
        parts.push(shaped);
        st += span.dim;
    }
    if parts.is_empty() {
        return Ok(data.clone());
    }
    Tensor::cat(&parts, 1).map_err(map_err)
}

/// Draws a relaxed one-hot sample over the last dimension of `logits`.
///
/// Retries up to [`GUMBEL_MAX_RETRIES`] times if the result contains NaN.
///
/// # Errors
///
/// Returns [`TabError::NumericalInstability`] when every attempt produced NaN.
pub fn gumbel_softmax(logits: &Tensor, tau: f64, rng: &mut StdRng) -> Result<Tensor, TabError> {
    let map_err = |e: candle_core::Error| TabError::Internal {
        message: format!("gumbel_softmax: {e}"),
    };

    for attempt in 0..GUMBEL_MAX_RETRIES {
        let noise = gumbel_noise(logits.dims(), logits.device(), rng).map_err(map_err)?;
        let y = logits
            .broadcast_add(&noise)
            .and_then(|v| v.affine(1.0 / tau, 0.0))
            .and_then(|v| candle_nn::ops::softmax(&v, D::Minus1))
            .map_err(map_err)?;
        let total = y
            .sum_all()
            .and_then(|s| s.to_dtype(candle_core::DType::F32))
            .and_then(|s| s.to_scalar::<f32>())
            .map_err(map_err)?;
        if !total.is_nan() {
            return Ok(y);
        }
        tracing::debug!(attempt, "gumbel_softmax produced NaN, retrying");
    }
    Err(TabError::NumericalInstability {
        message: format!("gumbel_softmax returned NaN {GUMBEL_MAX_RETRIES} times"),
    })
}

/// `-ln(-ln(u + eps) + eps)` with `u ~ U[0, 1)`.
fn gumbel_noise(dims: &[usize], device: &Device, rng: &mut StdRng) -> candle_core::Result<Tensor> {
    let len = dims.iter().product();
    let g: Vec<f32> = uniform_vec(rng, len, 0.0, 1.0)
        .into_iter()
        .map(|u| -(-(u + GUMBEL_EPS).ln() + GUMBEL_EPS).ln())
        .collect();
    Tensor::from_vec(g, dims.to_vec(), device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tabgan_core::SpanInfo;

    fn info() -> Vec<ColumnInfo> {
        vec![
            vec![SpanInfo::new(1, ActivationFn::Tanh)],
            vec![SpanInfo::new(3, ActivationFn::Softmax)],
        ]
    }

    #[test]
    fn tanh_and_softmax_spans() {
        let mut rng = StdRng::seed_from_u64(0);
        let data = Tensor::new(&[[5.0f32, 1.0, 2.0, 3.0], [-5.0, 0.0, 0.0, 9.0]], &Device::Cpu).unwrap();
        let out = apply_activate(&data, &info(), &mut rng).unwrap().to_vec2::<f32>().unwrap();
        for row in &out {
            assert!(row[0].abs() < 1.0);
            let s: f32 = row[1..].iter().sum();
            assert!((s - 1.0).abs() < 1e-5);
        }
        assert!(out[0][0] > 0.99 && out[1][0] < -0.99);
    }

    #[test]
    fn width_mismatch_rejected() {
        let data = Tensor::zeros((2, 3), candle_core::DType::F32, &Device::Cpu).unwrap();
        let err = apply_activate(&data, &info(), &mut StdRng::seed_from_u64(0));
        assert!(matches!(err, Err(TabError::InvalidConfig { .. })));
    }

    #[test]
    fn nan_logits_exhaust_retries() {
        let logits = Tensor::new(&[[f32::NAN, 0.0]], &Device::Cpu).unwrap();
        let err = gumbel_softmax(&logits, GUMBEL_TAU, &mut StdRng::seed_from_u64(0));
        assert!(matches!(err, Err(TabError::NumericalInstability { .. })));
    }

    #[test]
    fn low_temperature_is_nearly_one_hot() {
        let logits = Tensor::new(&[[0.0f32, 20.0, 0.0]], &Device::Cpu).unwrap();
        let y = gumbel_softmax(&logits, GUMBEL_TAU, &mut StdRng::seed_from_u64(4))
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert!(y[0][1] > 0.99);
    }
}
