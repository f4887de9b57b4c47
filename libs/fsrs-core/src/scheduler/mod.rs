//! The FSRS state machine: `(Card, Rating, review_time) -> (Card', ReviewLog)`.

pub mod kernel;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::ThreadRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FsrsError, Result};
use crate::numeric::Numeric;
use crate::types::{Card, Rating, ReviewLog, State};

/// Default FSRS parameters (§6), fit against a large public review corpus.
pub const DEFAULT_PARAMETERS: [f64; 21] = [
    0.2172, 1.1771, 3.2602, 16.1507, 7.0114, 0.57, 2.0966, 0.0069, 1.5261, 0.112, 1.0178, 1.849,
    0.1133, 0.3127, 2.2934, 0.2191, 3.0004, 0.7536, 0.3332, 0.1437, 0.2,
];

/// Lower clamp bounds for each parameter, applied elementwise after every
/// optimizer step (§6).
pub const PARAMETER_LOWER_BOUNDS: [f64; 21] = [
    0.001, 0.001, 0.001, 0.001, 1.0, 0.1, 0.1, 0.0, 0.0, 0.0, 0.01, 0.1, 0.01, 0.01, 0.01, 0.0,
    1.0, 0.0, 0.0, 0.0, 0.1,
];

/// Upper clamp bounds for each parameter (§6).
pub const PARAMETER_UPPER_BOUNDS: [f64; 21] = [
    100.0, 100.0, 100.0, 100.0, 10.0, 4.0, 4.0, 0.75, 4.5, 0.8, 3.5, 5.0, 0.25, 0.9, 4.0, 1.0, 6.0,
    2.0, 2.0, 0.8, 0.8,
];

/// A uniform `[0, 1)` random sample source, substitutable in tests so fuzz
/// behavior stays deterministic without disabling fuzzing entirely.
pub trait FuzzSource {
    fn sample(&mut self) -> f64;
}

/// Production fuzz source: a process-local, non-reproducible `ThreadRng`.
#[derive(Debug, Default)]
pub struct ThreadRngFuzzSource(ThreadRng);

impl FuzzSource for ThreadRngFuzzSource {
    fn sample(&mut self) -> f64 {
        self.0.gen_range(0.0..1.0)
    }
}

/// Returns the same sample every time; handy for scenario tests that need a
/// specific fuzz draw without disabling fuzzing.
#[derive(Debug, Clone, Copy)]
pub struct FixedFuzzSource(pub f64);

impl FuzzSource for FixedFuzzSource {
    fn sample(&mut self) -> f64 {
        self.0
    }
}

/// Immutable scheduler configuration (§3). Every `review_card` call borrows
/// `&self`; nothing here is mutated by scheduling a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scheduler {
    pub parameters: [f64; 21],
    pub desired_retention: f64,
    pub learning_steps: Vec<i64>,
    pub relearning_steps: Vec<i64>,
    pub maximum_interval: i64,
    pub enable_fuzzing: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            parameters: DEFAULT_PARAMETERS,
            desired_retention: 0.9,
            learning_steps: vec![60, 600],
            relearning_steps: vec![600],
            maximum_interval: 36500,
            enable_fuzzing: true,
        }
    }
}

impl Scheduler {
    /// Construct a scheduler from an arbitrary-length parameter vector,
    /// failing if it isn't exactly 21 values long (§7,
    /// `FsrsError::OptimizerUnavailable`).
    pub fn new(parameters: Vec<f64>) -> Result<Self> {
        let count = parameters.len();
        let parameters: [f64; 21] = parameters.try_into().map_err(|_| {
            FsrsError::OptimizerUnavailable {
                reason: format!("expected 21 parameters, got {count}"),
            }
        })?;
        Ok(Self {
            parameters,
            ..Default::default()
        })
    }

    pub fn with_parameters(mut self, parameters: [f64; 21]) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_desired_retention(mut self, desired_retention: f64) -> Self {
        self.desired_retention = desired_retention;
        self
    }

    pub fn with_fuzzing(mut self, enable_fuzzing: bool) -> Self {
        self.enable_fuzzing = enable_fuzzing;
        self
    }

    /// `DECAY = -parameters[20]`.
    pub fn decay(&self) -> f64 {
        -self.parameters[20]
    }

    /// `FACTOR = 0.9^(1/DECAY) - 1`.
    pub fn factor(&self) -> f64 {
        kernel::factor_from_decay(self.decay())
    }

    /// Predicted probability of recall right now, per §4.1. Zero when the
    /// card has never been reviewed, regardless of whether `stability` is
    /// set (§9 open question: preserved, not routed around).
    pub fn retrievability(&self, card: &Card, now: DateTime<Utc>) -> f64 {
        match (card.stability, card.last_review) {
            (Some(stability), Some(last_review)) => {
                let elapsed = kernel::floor_days(now, last_review) as f64;
                kernel::retrievability(elapsed, stability, self.decay(), self.factor())
            }
            _ => 0.0,
        }
    }

    fn next_interval_days(&self, stability: f64) -> i64 {
        kernel::next_interval(
            stability,
            self.desired_retention,
            self.decay(),
            self.factor(),
            self.maximum_interval,
        )
    }

    fn fuzzed_or_plain_days(&self, stability: f64, fuzz_source: &mut dyn FuzzSource) -> i64 {
        let days = self.next_interval_days(stability);
        if self.enable_fuzzing {
            kernel::fuzzed_interval(days as f64, self.maximum_interval, fuzz_source.sample())
        } else {
            days
        }
    }

    fn learning_ladder_interval(
        &self,
        steps: &[i64],
        step: Option<u32>,
        rating: Rating,
        stability: f64,
        next: &mut Card,
        fuzz_source: &mut dyn FuzzSource,
    ) -> Duration {
        let current_step = step.unwrap_or(0) as usize;
        let graduates_on_threshold = steps.is_empty()
            || (current_step >= steps.len()
                && matches!(rating, Rating::Hard | Rating::Good | Rating::Easy));
        if graduates_on_threshold {
            next.state = State::Review;
            next.step = None;
            return Duration::days(self.fuzzed_or_plain_days(stability, fuzz_source));
        }
        match rating {
            Rating::Again => {
                next.step = Some(0);
                Duration::seconds(steps[0])
            }
            Rating::Hard => {
                let seconds = if current_step == 0 && steps.len() == 1 {
                    (steps[0] as f64 * 1.5).round() as i64
                } else if current_step == 0 && steps.len() >= 2 {
                    (steps[0] + steps[1]) / 2
                } else {
                    steps[current_step]
                };
                Duration::seconds(seconds)
            }
            Rating::Good => {
                if current_step + 1 >= steps.len() {
                    next.state = State::Review;
                    next.step = None;
                    Duration::days(self.fuzzed_or_plain_days(stability, fuzz_source))
                } else {
                    next.step = Some((current_step + 1) as u32);
                    Duration::seconds(steps[current_step + 1])
                }
            }
            Rating::Easy => {
                next.state = State::Review;
                next.step = None;
                Duration::days(self.fuzzed_or_plain_days(stability, fuzz_source))
            }
        }
    }

    fn review_interval(
        &self,
        rating: Rating,
        stability: f64,
        next: &mut Card,
        fuzz_source: &mut dyn FuzzSource,
    ) -> Duration {
        if rating == Rating::Again && !self.relearning_steps.is_empty() {
            next.state = State::Relearning;
            next.step = Some(0);
            return Duration::seconds(self.relearning_steps[0]);
        }
        Duration::days(self.fuzzed_or_plain_days(stability, fuzz_source))
    }

    /// Schedule one review, producing the next card state and its log entry.
    /// Never mutates `card` (§9 "Card immutability"); `review_time` defaults
    /// to now, `fuzz_source` supplies the uniform draw used when fuzzing is
    /// enabled and the resulting state is `Review`.
    pub fn review_card(
        &self,
        card: &Card,
        rating: Rating,
        review_time: Option<DateTime<Utc>>,
        review_duration: Option<i64>,
        fuzz_source: &mut dyn FuzzSource,
    ) -> (Card, ReviewLog) {
        let review_time = review_time.unwrap_or_else(Utc::now);
        let same_day = card
            .last_review
            .map(|last| kernel::floor_days(review_time, last) == 0)
            .unwrap_or(false);
        let predicted_r = self.retrievability(card, review_time);
        let (new_stability, new_difficulty) = update_memory(
            card.stability,
            card.difficulty,
            rating,
            same_day,
            predicted_r,
            &self.parameters,
        );

        let mut next = card.clone();
        next.stability = Some(new_stability);
        next.difficulty = Some(new_difficulty);

        let interval = match card.state {
            State::Learning => self.learning_ladder_interval(
                &self.learning_steps,
                card.step,
                rating,
                new_stability,
                &mut next,
                fuzz_source,
            ),
            State::Relearning => self.learning_ladder_interval(
                &self.relearning_steps,
                card.step,
                rating,
                new_stability,
                &mut next,
                fuzz_source,
            ),
            State::Review => self.review_interval(rating, new_stability, &mut next, fuzz_source),
        };

        next.due = review_time + interval;
        next.last_review = Some(review_time);

        debug!(
            card_id = next.card_id,
            state = ?next.state,
            rating = rating.to_value(),
            interval_seconds = interval.num_seconds(),
            "review_card"
        );

        let log = ReviewLog {
            card_id: card.card_id,
            rating,
            review_datetime: review_time,
            review_duration,
        };
        (next, log)
    }
}

/// Update stability and difficulty for one review, generic over [`Numeric`]
/// so it serves both [`Scheduler::review_card`] (`N = f64`) and the
/// optimizer's replay over training sequences (`N = Var`).
///
/// `retrievability` is the predicted recall probability *before* this
/// update; callers compute it once and reuse it both here and as the
/// optimizer's training signal, rather than recomputing it twice.
pub(crate) fn update_memory<N: Numeric>(
    stability: Option<N>,
    difficulty: Option<N>,
    rating: Rating,
    same_day: bool,
    retrievability: N,
    parameters: &[N; 21],
) -> (N, N) {
    let rating_value = rating.to_value() as f64;
    match (stability, difficulty) {
        (Some(s), Some(d)) if same_day => {
            let new_s = kernel::short_term_stability(
                s,
                rating_value,
                parameters[17].clone(),
                parameters[18].clone(),
                parameters[19].clone(),
            );
            (new_s, d)
        }
        (Some(s), Some(d)) => {
            let new_d = kernel::next_difficulty(
                d.clone(),
                rating_value,
                parameters[4].clone(),
                parameters[5].clone(),
                parameters[6].clone(),
                parameters[7].clone(),
            );
            let new_s = if rating == Rating::Again {
                kernel::next_stability_forget(
                    s,
                    d,
                    retrievability,
                    parameters[11].clone(),
                    parameters[12].clone(),
                    parameters[13].clone(),
                    parameters[14].clone(),
                    parameters[17].clone(),
                    parameters[18].clone(),
                )
            } else {
                let h = if rating == Rating::Hard {
                    parameters[15].clone()
                } else {
                    parameters[15].clone().constant_like(1.0)
                };
                let e = if rating == Rating::Easy {
                    parameters[16].clone()
                } else {
                    parameters[16].clone().constant_like(1.0)
                };
                kernel::next_stability_recall(
                    s,
                    d,
                    retrievability,
                    parameters[8].clone(),
                    parameters[9].clone(),
                    parameters[10].clone(),
                    h,
                    e,
                )
            };
            (new_s, new_d)
        }
        _ => {
            let index = (rating.to_value() - 1) as usize;
            let s0 = parameters[index].clone().clamp_s();
            let d0 = kernel::initial_difficulty(
                parameters[4].clone(),
                parameters[5].clone(),
                rating_value,
            );
            (s0, d0)
        }
    }
}
