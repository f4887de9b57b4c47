//! Fits the 21 FSRS parameters to a review history by mini-batch gradient
//! descent over [`crate::replay`] (§4.5).
//!
//! The loss is binary cross-entropy between each step's predicted
//! retrievability and whether recall was actually observed, differentiated
//! through [`crate::scheduler::kernel`]'s formulas via [`Var`] instead of
//! `f64`. Everything downstream of a mini-batch's accumulated loss — the
//! gradient step, the learning-rate schedule, elementwise clamping — runs in
//! plain `f64`; only the forward pass needs a tape.

mod adam;

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::numeric::{Numeric, Tape, Var};
use crate::replay;
use crate::scheduler::kernel;
use crate::scheduler::{DEFAULT_PARAMETERS, PARAMETER_LOWER_BOUNDS, PARAMETER_UPPER_BOUNDS};
use crate::types::ReviewLog;
use adam::Adam;

/// Training is skipped (defaults returned) below this many eligible steps.
pub const MINI_BATCH_SIZE: usize = 512;
/// Full passes over the (shuffled) set of cards.
pub const NUM_EPOCHS: usize = 5;
/// Adam's base learning rate, before cosine annealing.
pub const LEARNING_RATE: f64 = 4e-2;
/// Predicted probabilities are clamped into `[EPSILON, 1 - EPSILON]` before
/// entering the loss, so a perfectly confident (wrong) prediction doesn't
/// produce an infinite gradient.
const BCE_EPSILON: f64 = 1e-7;

/// Fit FSRS parameters to `logs`.
///
/// Falls back to [`DEFAULT_PARAMETERS`] with a `warn!` when fewer than
/// [`MINI_BATCH_SIZE`] training-eligible steps (§4.4) are available — there
/// isn't enough signal for even one gradient step.
pub fn compute_optimal_parameters(logs: &[ReviewLog]) -> [f64; 21] {
    let eligible_count = count_eligible_steps(logs);
    if eligible_count < MINI_BATCH_SIZE {
        warn!(
            eligible_count,
            required = MINI_BATCH_SIZE,
            "too few training-eligible reviews, returning default parameters"
        );
        return DEFAULT_PARAMETERS;
    }

    let mut logs_by_card: std::collections::BTreeMap<i64, Vec<ReviewLog>> = std::collections::BTreeMap::new();
    for log in logs {
        logs_by_card.entry(log.card_id).or_default().push(log.clone());
    }
    let card_ids: Vec<i64> = logs_by_card.keys().copied().collect();

    let batches_per_epoch = (eligible_count as f64 / MINI_BATCH_SIZE as f64).ceil() as usize;
    let t_max = (batches_per_epoch * NUM_EPOCHS).max(1);
    info!(
        eligible_count,
        num_cards = card_ids.len(),
        num_epochs = NUM_EPOCHS,
        t_max,
        "starting parameter optimization"
    );

    let mut current_parameters = DEFAULT_PARAMETERS;
    let mut best_parameters = DEFAULT_PARAMETERS;
    let mut best_loss = f64::INFINITY;
    let mut adam = Adam::new();
    let mut completed_steps = 0usize;

    for epoch in 0..NUM_EPOCHS {
        let mut rng = StdRng::seed_from_u64(42 + epoch as u64);
        let mut order = card_ids.clone();
        order.shuffle(&mut rng);

        let mut tape = Tape::new();
        let mut parameters: [Var; 21] = std::array::from_fn(|i| tape.var(current_parameters[i]));
        let mut batch: Vec<Var> = Vec::new();

        for &card_id in &order {
            let decay = -parameters[20].clone();
            let factor = kernel::factor_from_decay(decay.clone());
            let card_logs = &logs_by_card[&card_id];
            let steps = replay::replay(card_logs, &parameters, decay, factor);

            for step in steps.into_iter().filter(replay::is_training_eligible) {
                let p = clamp_probability(step.predicted_retrievability);
                batch.push(binary_cross_entropy(p, step.observed_recall));
            }

            if batch.len() >= MINI_BATCH_SIZE {
                apply_gradient_step(
                    &mut adam,
                    &mut current_parameters,
                    &parameters,
                    std::mem::take(&mut batch),
                    completed_steps,
                    t_max,
                );
                completed_steps += 1;
                tape = Tape::new();
                parameters = std::array::from_fn(|i| tape.var(current_parameters[i]));
            }
        }

        if !batch.is_empty() {
            apply_gradient_step(
                &mut adam,
                &mut current_parameters,
                &parameters,
                batch,
                completed_steps,
                t_max,
            );
            completed_steps += 1;
        }

        let epoch_loss = evaluate_full_batch_loss(logs, &current_parameters);
        info!(epoch, epoch_loss, "epoch complete");
        if epoch_loss < best_loss {
            best_loss = epoch_loss;
            best_parameters = current_parameters;
        }
    }

    info!(best_loss, "finished parameter optimization");
    best_parameters
}

fn count_eligible_steps(logs: &[ReviewLog]) -> usize {
    let decay = -DEFAULT_PARAMETERS[20];
    let factor = kernel::factor_from_decay(decay);
    replay::replay(logs, &DEFAULT_PARAMETERS, decay, factor)
        .iter()
        .filter(|step| replay::is_training_eligible(step))
        .count()
}

fn evaluate_full_batch_loss(logs: &[ReviewLog], parameters: &[f64; 21]) -> f64 {
    let decay = -parameters[20];
    let factor = kernel::factor_from_decay(decay);
    let steps = replay::replay(logs, parameters, decay, factor);
    let mut total = 0.0;
    let mut count = 0usize;
    for step in steps.into_iter().filter(replay::is_training_eligible) {
        let p = clamp_probability(step.predicted_retrievability);
        total += binary_cross_entropy(p, step.observed_recall);
        count += 1;
    }
    if count == 0 {
        f64::INFINITY
    } else {
        total / count as f64
    }
}

fn apply_gradient_step(
    adam: &mut Adam,
    current_parameters: &mut [f64; 21],
    parameter_vars: &[Var; 21],
    batch: Vec<Var>,
    step_index: usize,
    t_max: usize,
) {
    let batch_size = batch.len();
    let loss = sum_loss(batch);
    let grads = loss.backward();
    let mut gradients = [0.0; 21];
    for (i, grad) in gradients.iter_mut().enumerate() {
        *grad = grads[parameter_vars[i].index()];
    }
    let learning_rate = cosine_lr(step_index, t_max, LEARNING_RATE);
    adam.step(current_parameters, &gradients, learning_rate);
    for i in 0..21 {
        current_parameters[i] = current_parameters[i].clamp(PARAMETER_LOWER_BOUNDS[i], PARAMETER_UPPER_BOUNDS[i]);
    }
    tracing::debug!(step_index, batch_size, learning_rate, "applied gradient step");
}

/// Sum (not mean) of the mini-batch's step losses, matching the reference
/// optimizer: the per-step gradient contribution scales with batch size,
/// which is what lets one fixed learning rate suit every mini-batch.
fn sum_loss(batch: Vec<Var>) -> Var {
    let mut iter = batch.into_iter();
    let first = iter.next().expect("mini-batch must be non-empty");
    iter.fold(first, |acc, loss| acc + loss)
}

/// Cosine-annealed learning rate from `base_lr` down toward `0` over
/// `t_max` total optimizer steps.
fn cosine_lr(step_index: usize, t_max: usize, base_lr: f64) -> f64 {
    let t_max = t_max.max(1) as f64;
    let t = (step_index as f64).min(t_max);
    0.5 * base_lr * (1.0 + (PI * t / t_max).cos())
}

fn clamp_probability<N: Numeric>(p: N) -> N {
    let lower = p.clone().constant_like(BCE_EPSILON);
    let upper = p.clone().constant_like(1.0 - BCE_EPSILON);
    p.max(lower).min(upper)
}

/// `-[y * ln(p) + (1 - y) * ln(1 - p)]`.
fn binary_cross_entropy<N: Numeric>(p: N, observed_recall: f64) -> N {
    let one = p.clone().constant_like(1.0);
    let y = p.clone().constant_like(observed_recall);
    let one_minus_y = one.clone().constant_like(1.0 - observed_recall);
    let log_p = p.clone().ln();
    let log_one_minus_p = (one - p).ln();
    -(y * log_p + one_minus_y * log_one_minus_p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Card, Rating};
    use chrono::{Duration, TimeZone, Utc};

    fn synthetic_logs(num_cards: usize, reviews_per_card: usize) -> Vec<ReviewLog> {
        let scheduler = crate::scheduler::Scheduler::default().with_fuzzing(false);
        let mut fuzz = crate::scheduler::FixedFuzzSource(0.0);
        let mut logs = Vec::new();
        let start = Utc.with_ymd_and_hms(2023, 1, 1, 12, 0, 0).unwrap();

        for card_index in 0..num_cards {
            let mut card = Card::with_id(Some(card_index as i64));
            let mut review_time = start;
            for review_index in 0..reviews_per_card {
                let rating = if review_index % 5 == 0 {
                    Rating::Again
                } else {
                    Rating::Good
                };
                let (next, log) = scheduler.review_card(&card, rating, Some(review_time), Some(1000), &mut fuzz);
                logs.push(log);
                card = next;
                review_time += Duration::days(1);
            }
        }
        logs
    }

    #[test]
    fn returns_defaults_when_training_data_is_scarce() {
        let logs = synthetic_logs(2, 3);
        let parameters = compute_optimal_parameters(&logs);
        assert_eq!(parameters, DEFAULT_PARAMETERS);
    }

    #[test]
    fn optimized_parameters_stay_within_clamp_bounds() {
        let logs = synthetic_logs(40, 20);
        let parameters = compute_optimal_parameters(&logs);
        for i in 0..21 {
            assert!(
                parameters[i] >= PARAMETER_LOWER_BOUNDS[i] && parameters[i] <= PARAMETER_UPPER_BOUNDS[i],
                "parameter {i} = {} out of bounds",
                parameters[i]
            );
        }
    }

    #[test]
    fn optimization_is_deterministic_for_the_same_logs() {
        let logs = synthetic_logs(40, 20);
        let first = compute_optimal_parameters(&logs);
        let second = compute_optimal_parameters(&logs);
        assert_eq!(first, second);
    }

    #[test]
    fn cosine_lr_anneals_from_base_to_near_zero() {
        assert!((cosine_lr(0, 100, LEARNING_RATE) - LEARNING_RATE).abs() < 1e-9);
        assert!(cosine_lr(100, 100, LEARNING_RATE) < 1e-9);
    }
}
