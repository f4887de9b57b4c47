//! Reconstructs per-card memory state from a sorted review history.
//!
//! Unlike [`crate::scheduler::Scheduler::review_card`], replay never
//! computes an interval or a due date: the next review time for each step
//! comes from the historical log itself, not from a prediction. Only the
//! stability/difficulty state and the retrievability prediction leading up
//! to each review matter here, which is why this module never touches
//! `Card`'s `state`/`step`/`due` fields at all.

use std::collections::BTreeMap;

use crate::numeric::Numeric;
use crate::scheduler::{kernel, update_memory};
use crate::types::{Rating, ReviewLog};

/// Training sequences are truncated to this many reviews per card (§4.4).
pub const MAX_SEQ_LEN: usize = 64;

/// One replayed review: the model's recall prediction just before this
/// rating was applied, whether recall was actually observed, and whether
/// this review landed on the same calendar day as the previous one.
#[derive(Debug, Clone)]
pub struct ReplayStep<N> {
    pub card_id: i64,
    pub predicted_retrievability: N,
    pub observed_recall: f64,
    pub same_day: bool,
    pub has_last_review: bool,
}

/// A step is usable as an optimizer training signal only if the card had
/// already been reviewed before, and this isn't a same-day repeat (§4.4).
pub fn is_training_eligible<N>(step: &ReplayStep<N>) -> bool {
    step.has_last_review && !step.same_day
}

/// Group `logs` by `card_id`, sort each group by time, truncate to
/// [`MAX_SEQ_LEN`], and replay the DSR update through each group in order.
///
/// `decay` and `factor` are passed in (rather than derived from
/// `parameters[20]` here) so callers building a `Var`-typed replay for
/// training can hand in `Var` versions of the same two derived constants.
pub fn replay<N: Numeric>(
    logs: &[ReviewLog],
    parameters: &[N; 21],
    decay: N,
    factor: N,
) -> Vec<ReplayStep<N>> {
    let mut by_card: BTreeMap<i64, Vec<&ReviewLog>> = BTreeMap::new();
    for log in logs {
        by_card.entry(log.card_id).or_default().push(log);
    }

    let mut steps = Vec::new();
    for (card_id, mut group) in by_card {
        group.sort_by_key(|log| log.review_datetime);
        group.truncate(MAX_SEQ_LEN);

        let mut stability: Option<N> = None;
        let mut difficulty: Option<N> = None;
        let mut last_review = None;

        for log in group {
            let days_since_last =
                last_review.map(|last| kernel::floor_days(log.review_datetime, last));
            let same_day = days_since_last == Some(0);

            let predicted_r = match (&stability, days_since_last) {
                (Some(s), Some(elapsed)) => {
                    kernel::retrievability(elapsed as f64, s.clone(), decay.clone(), factor.clone())
                }
                _ => decay.clone().constant_like(0.0),
            };

            steps.push(ReplayStep {
                card_id,
                predicted_retrievability: predicted_r.clone(),
                observed_recall: if log.rating == Rating::Again { 0.0 } else { 1.0 },
                same_day,
                has_last_review: last_review.is_some(),
            });

            let (new_stability, new_difficulty) = update_memory(
                stability,
                difficulty,
                log.rating,
                same_day,
                predicted_r,
                parameters,
            );
            stability = Some(new_stability);
            difficulty = Some(new_difficulty);
            last_review = Some(log.review_datetime);
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn log(card_id: i64, day: u32, rating: Rating) -> ReviewLog {
        ReviewLog {
            card_id,
            rating,
            review_datetime: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            review_duration: Some(1000),
        }
    }

    #[test]
    fn first_review_is_not_training_eligible() {
        let logs = vec![log(1, 1, Rating::Good)];
        let parameters = crate::scheduler::DEFAULT_PARAMETERS;
        let decay = -parameters[20];
        let factor = 0.9_f64.powf(1.0 / decay) - 1.0;
        let steps = replay(&logs, &parameters, decay, factor);
        assert_eq!(steps.len(), 1);
        assert!(!is_training_eligible(&steps[0]));
    }

    #[test]
    fn subsequent_review_is_training_eligible() {
        let logs = vec![log(1, 1, Rating::Good), log(1, 10, Rating::Good)];
        let parameters = crate::scheduler::DEFAULT_PARAMETERS;
        let decay = -parameters[20];
        let factor = 0.9_f64.powf(1.0 / decay) - 1.0;
        let steps = replay(&logs, &parameters, decay, factor);
        assert_eq!(steps.len(), 2);
        assert!(!is_training_eligible(&steps[0]));
        assert!(is_training_eligible(&steps[1]));
        assert!(steps[1].predicted_retrievability < 1.0);
        assert!(steps[1].predicted_retrievability > 0.0);
    }

    #[test]
    fn groups_are_independent_across_cards() {
        let logs = vec![log(1, 1, Rating::Again), log(2, 1, Rating::Easy)];
        let parameters = crate::scheduler::DEFAULT_PARAMETERS;
        let decay = -parameters[20];
        let factor = 0.9_f64.powf(1.0 / decay) - 1.0;
        let steps = replay(&logs, &parameters, decay, factor);
        assert_eq!(steps.iter().filter(|s| s.card_id == 1).count(), 1);
        assert_eq!(steps.iter().filter(|s| s.card_id == 2).count(), 1);
    }

    #[test]
    fn truncates_to_max_sequence_length() {
        let logs: Vec<ReviewLog> = (0..100)
            .map(|i| log(1, (i % 27) + 1, Rating::Good))
            .collect();
        let parameters = crate::scheduler::DEFAULT_PARAMETERS;
        let decay = -parameters[20];
        let factor = 0.9_f64.powf(1.0 / decay) - 1.0;
        let steps = replay(&logs, &parameters, decay, factor);
        assert_eq!(steps.len(), MAX_SEQ_LEN);
    }
}
