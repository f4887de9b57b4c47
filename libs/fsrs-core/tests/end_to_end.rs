//! Integration coverage for the replay engine and optimizer end to end,
//! exercised through `fsrs-core`'s public API rather than its internals.

use chrono::{TimeZone, Utc};
use fsrs_core::optimizer::compute_optimal_parameters;
use fsrs_core::retention::compute_optimal_retention;
use fsrs_core::scheduler::{DEFAULT_PARAMETERS, PARAMETER_LOWER_BOUNDS, PARAMETER_UPPER_BOUNDS};
use fsrs_core::{Card, FsrsError, FuzzSource, Rating, Scheduler};

fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() < epsilon
}

struct FixedFuzz(f64);
impl FuzzSource for FixedFuzz {
    fn sample(&mut self) -> f64 {
        self.0
    }
}

/// Simulates `num_cards` independent review histories by actually driving
/// `Scheduler::review_card`, so the resulting logs are internally
/// consistent (same invariants a real caller's history would satisfy).
fn simulate_review_history(num_cards: usize, reviews_per_card: usize) -> Vec<fsrs_core::ReviewLog> {
    let scheduler = Scheduler::default().with_fuzzing(false);
    let mut fuzz = FixedFuzz(0.0);
    let start = Utc.with_ymd_and_hms(2023, 6, 1, 9, 0, 0).unwrap();
    let mut logs = Vec::new();

    for card_index in 0..num_cards {
        let mut card = Card::with_id(Some(card_index as i64));
        let mut now = start;
        for review_index in 0..reviews_per_card {
            let rating = match (card_index + review_index) % 4 {
                0 => Rating::Again,
                1 => Rating::Hard,
                2 => Rating::Good,
                _ => Rating::Easy,
            };
            let (next, log) = scheduler.review_card(&card, rating, Some(now), Some(1500 + review_index as i64 * 10), &mut fuzz);
            logs.push(log);
            now = next.due;
            card = next;
        }
    }
    logs
}

#[test]
fn replay_then_optimize_stays_within_parameter_bounds() {
    let logs = simulate_review_history(60, 20);
    let parameters = compute_optimal_parameters(&logs);
    for i in 0..21 {
        assert!(
            parameters[i] >= PARAMETER_LOWER_BOUNDS[i] && parameters[i] <= PARAMETER_UPPER_BOUNDS[i],
            "parameter {i} = {} escaped its clamp bounds",
            parameters[i]
        );
    }
}

#[test]
fn short_history_falls_back_to_defaults() {
    let logs = simulate_review_history(2, 3);
    let parameters = compute_optimal_parameters(&logs);
    assert_eq!(parameters, DEFAULT_PARAMETERS);
}

#[test]
fn a_freshly_optimized_scheduler_still_produces_valid_cards() {
    let logs = simulate_review_history(60, 20);
    let parameters = compute_optimal_parameters(&logs);
    let scheduler = Scheduler::new(parameters.to_vec())
        .expect("21 parameters should always construct a Scheduler")
        .with_fuzzing(false);

    let mut fuzz = FixedFuzz(0.5);
    let card = Card::new();
    let (next, log) = scheduler.review_card(&card, Rating::Good, None, Some(1000), &mut fuzz);
    assert!(next.invariants_hold());
    assert_eq!(log.rating, Rating::Good);
}

#[test]
fn retention_optimization_picks_from_the_documented_grid() {
    let logs = simulate_review_history(60, 10);
    let retention = compute_optimal_retention(DEFAULT_PARAMETERS, &logs).expect("enough logs with durations");
    assert!([0.70, 0.75, 0.80, 0.85, 0.90, 0.95]
        .iter()
        .any(|&r| approx_eq(r, retention, 1e-9)));
}

#[test]
fn retention_optimization_rejects_missing_durations() {
    let mut logs = simulate_review_history(60, 10);
    logs[0].review_duration = None;
    let err = compute_optimal_retention(DEFAULT_PARAMETERS, &logs).unwrap_err();
    assert!(matches!(err, FsrsError::MissingDuration { .. }));
}

#[test]
fn retention_optimization_rejects_short_histories() {
    let logs = simulate_review_history(1, 2);
    let err = compute_optimal_retention(DEFAULT_PARAMETERS, &logs).unwrap_err();
    assert!(matches!(err, FsrsError::InsufficientReviewLogs { .. }));
}
