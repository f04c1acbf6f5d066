//! Epoch/step loop shared by both training tracks.
//!
//! ## Algorithm
//!
//! For `epochs × steps_per_epoch` steps:
//! 1. Run the model's inner updates and record their losses.
//! 2. Evaluate the tracked loss on the current parameters.
//! 3. If it is a new minimum, snapshot the parameters that produced it.
//! 4. Apply the update and record the tracked loss.
//!
//! After the loop the best snapshot is loaded back. A snapshot of the initial
//! parameters is taken up front so a fit whose losses are all NaN still ends
//! on a well-defined state.

use rand::rngs::StdRng;
use tabgan_core::TabError;
use tabgan_nn::BestTracker;

use crate::model::TrainableModel;

/// Loop lengths and logging switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub epochs: usize,
    pub steps_per_epoch: usize,
    /// Log both losses at the end of every epoch.
    pub verbose: bool,
}

/// Loss histories and best-state bookkeeping of one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    /// One entry per tracked step (generator or flow loss).
    pub generator_losses: Vec<f64>,
    /// One entry per inner update (critic loss); empty on the flow track.
    pub discriminator_losses: Vec<f64>,
    /// Smallest tracked loss.
    pub min_loss: f64,
    /// Step index (0-based) of `min_loss`, if any step produced a finite loss.
    pub best_step: Option<usize>,
}

/// Trains `model` and restores its best state.
///
/// # Errors
///
/// Propagates the first error raised by the model; the model is then left
/// in whatever state that step reached.
pub fn fit_model<M: TrainableModel + ?Sized>(
    model: &mut M,
    schedule: &Schedule,
    rng: &mut StdRng,
) -> Result<FitReport, TabError> {
    let total = schedule.epochs * schedule.steps_per_epoch;
    let mut generator_losses = Vec::with_capacity(total);
    let mut discriminator_losses = Vec::new();
    let mut tracker = BestTracker::new();
    let mut best = model.snapshot()?;

    let mut step = 0;
    for epoch in 0..schedule.epochs {
        for _ in 0..schedule.steps_per_epoch {
            discriminator_losses.extend(model.prepare_step(rng)?);

            let evaluation = model.evaluate(rng)?;
            let loss = evaluation.value;
            if tracker.offer(step, loss) {
                best = model.snapshot()?;
                tracing::debug!(step, loss, "new best state");
            }
            model.step(evaluation)?;

            generator_losses.push(loss);
            step += 1;
        }

        if schedule.verbose {
            tracing::info!(
                epoch = epoch + 1,
                loss_g = generator_losses.last().copied().unwrap_or(f64::NAN),
                loss_d = discriminator_losses.last().copied().unwrap_or(0.0),
                "epoch complete"
            );
        }
    }

    model.restore(&best)?;

    Ok(FitReport {
        generator_losses,
        discriminator_losses,
        min_loss: tracker.min(),
        best_step: tracker.best_step(),
    })
}
