//! Pure DSR (difficulty/stability/retrievability) math.
//!
//! Every function that participates in the optimizer's loss is generic over
//! [`Numeric`], so the exact same formula serves [`super::Scheduler`] at
//! serving time (`N = f64`) and the optimizer while it trains (`N = Var`).
//! Functions that only ever run at serving time (interval rounding, fuzz,
//! calendar arithmetic) stay `f64`-only: due dates never participate in the
//! optimizer's loss, so there is nothing to differentiate there.

use chrono::{DateTime, Utc};

use crate::numeric::Numeric;

/// Whole calendar days between two UTC instants, floored, never negative.
/// Calendar-day subtraction, not a `Duration / 86400` division — the two
/// disagree near midnight UTC.
pub fn floor_days(later: DateTime<Utc>, earlier: DateTime<Utc>) -> i64 {
    (later.date_naive() - earlier.date_naive())
        .num_days()
        .max(0)
}

/// `R(t) = (1 + FACTOR * elapsed / stability) ^ DECAY`. Callers are
/// responsible for the `last_review = None -> R = 0` case, since that's a
/// branch on card state rather than arithmetic.
pub fn retrievability<N: Numeric>(elapsed_days: f64, stability: N, decay: N, factor: N) -> N {
    let delta = stability.clone().constant_like(elapsed_days.max(0.0));
    let one = stability.clone().constant_like(1.0);
    (one + factor * delta / stability).powv(decay)
}

/// `S0(rating) = clamp_S(parameters[rating - 1])`. Left to call sites: this
/// is plain indexing, not arithmetic worth a kernel function.
///
/// `D0(rating) = clamp_D(w4 - exp(w5 * (rating - 1)) + 1)`.
pub fn initial_difficulty<N: Numeric>(w4: N, w5: N, rating_value: f64) -> N {
    let shift = w5.clone().constant_like(rating_value - 1.0);
    let exponent = w5 * shift;
    let one = w4.clone().constant_like(1.0);
    (w4 - exponent.exp() + one).clamp_d()
}

/// Same-day (short-term) stability update: `s' = clamp_S(s * g)`, where
/// `g = exp(w17 * (rating - 3 + w18)) * s^(-w19)`, floored at `1` when
/// `rating` is Good or Easy before the multiply.
pub fn short_term_stability<N: Numeric>(
    stability: N,
    rating_value: f64,
    w17: N,
    w18: N,
    w19: N,
) -> N {
    let shift = w17.clone().constant_like(rating_value - 3.0) + w18;
    let g = (w17 * shift).exp() * stability.clone().powv(-w19);
    let g = if rating_value >= 3.0 {
        let floor = g.clone().constant_like(1.0);
        g.max(floor)
    } else {
        g
    };
    (stability * g).clamp_s()
}

/// Long-term difficulty update via linear damping then mean reversion
/// toward `D0(Easy)`.
pub fn next_difficulty<N: Numeric>(
    difficulty: N,
    rating_value: f64,
    w4: N,
    w5: N,
    w6: N,
    w7: N,
) -> N {
    let shift = w6.clone().constant_like(rating_value - 3.0);
    let delta = -(w6 * shift);
    let ten = difficulty.clone().constant_like(10.0);
    let nine = difficulty.clone().constant_like(9.0);
    let addend = difficulty.clone();
    let d_linear = addend + (ten - difficulty) * delta / nine;
    let d_target = initial_difficulty(w4, w5, 4.0);
    let one = w7.clone().constant_like(1.0);
    (w7.clone() * d_target + (one - w7) * d_linear).clamp_d()
}

/// Long-term stability update after a lapse (`rating = Again`).
#[allow(clippy::too_many_arguments)]
pub fn next_stability_forget<N: Numeric>(
    stability: N,
    difficulty: N,
    retrievability: N,
    w11: N,
    w12: N,
    w13: N,
    w14: N,
    w17: N,
    w18: N,
) -> N {
    let one_base = stability.clone().constant_like(1.0);
    let one_sub = stability.clone().constant_like(1.0);
    let growth_base = (stability.clone() + one_base).powv(w13) - one_sub;
    let one_r = retrievability.clone().constant_like(1.0);
    let recall_factor = ((one_r - retrievability) * w14).exp();
    let s_forget = w11 * difficulty.powv(-w12) * growth_base * recall_factor;
    let cap = stability / (w17 * w18).exp();
    s_forget.min(cap).clamp_s()
}

/// Long-term stability update after a successful recall (`rating != Again`).
/// `h` is `w15` when `rating = Hard`, else `1`; `e` is `w16` when
/// `rating = Easy`, else `1` — callers select these since it's a categorical
/// branch on `rating`, not arithmetic.
#[allow(clippy::too_many_arguments)]
pub fn next_stability_recall<N: Numeric>(
    stability: N,
    difficulty: N,
    retrievability: N,
    w8: N,
    w9: N,
    w10: N,
    h: N,
    e: N,
) -> N {
    let eleven = difficulty.clone().constant_like(11.0);
    let one_r = retrievability.clone().constant_like(1.0);
    let one_factor = stability.clone().constant_like(1.0);
    let recall_factor = ((one_r - retrievability) * w10).exp() - one_factor;
    let one_growth = stability.clone().constant_like(1.0);
    let growth =
        w8.exp() * (eleven - difficulty) * stability.clone().powv(-w9) * recall_factor * h * e;
    (stability * (one_growth + growth)).clamp_s()
}

/// `FACTOR = 0.9^(1/DECAY) - 1`, generic so the optimizer can derive it from
/// a differentiable `decay` while training, the same way
/// [`super::Scheduler::factor`] derives it from a plain `f64` at serving
/// time.
pub fn factor_from_decay<N: Numeric>(decay: N) -> N {
    let one = decay.clone().constant_like(1.0);
    let base = decay.clone().constant_like(0.9);
    let exponent = one.clone() / decay;
    base.powv(exponent) - one
}

/// `round((s / FACTOR) * (desired_retention^(1/DECAY) - 1))`, clamped to
/// `[1, maximum_interval]` days. Not generic: rounding to a whole day is not
/// a differentiable operation and intervals never feed the optimizer's loss.
pub fn next_interval(stability: f64, desired_retention: f64, decay: f64, factor: f64, maximum_interval: i64) -> i64 {
    let interval = (stability / factor) * (desired_retention.powf(1.0 / decay) - 1.0);
    (interval.round() as i64).clamp(1, maximum_interval)
}

/// Piecewise fuzz half-width for a given interval in days (§4.3 bands).
fn fuzz_delta(days: f64) -> f64 {
    const BANDS: [(f64, f64, f64); 3] = [
        (2.5, 7.0, 0.15),
        (7.0, 20.0, 0.10),
        (20.0, f64::INFINITY, 0.05),
    ];
    let mut delta = 1.0;
    for (start, end, factor) in BANDS {
        delta += factor * (days.min(end) - start).max(0.0);
    }
    delta
}

/// Fuzz an interval in whole days given a uniform sample in `[0, 1)`.
/// Intervals under `2.5` days are returned unchanged.
pub fn fuzzed_interval(days: f64, maximum_interval: i64, sample: f64) -> i64 {
    if days < 2.5 {
        return days.round() as i64;
    }
    let delta = fuzz_delta(days);
    let min_ivl = (days - delta).round().max(2.0);
    let max_ivl = (days + delta).round().min(maximum_interval as f64);
    let min_ivl = min_ivl.min(max_ivl);
    let span = max_ivl - min_ivl + 1.0;
    let fuzzed = (sample * span + min_ivl).round();
    (fuzzed as i64).min(maximum_interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn floor_days_is_calendar_based_not_24h() {
        let late_evening = Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap();
        let next_morning = Utc.with_ymd_and_hms(2024, 1, 2, 1, 0, 0).unwrap();
        // Only 2 wall-clock hours apart, but crosses a calendar boundary.
        assert_eq!(floor_days(next_morning, late_evening), 1);
    }

    #[test]
    fn floor_days_never_negative() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        assert_eq!(floor_days(a, b), 0);
    }

    #[test]
    fn retrievability_is_one_at_zero_elapsed() {
        let r = retrievability(0.0, 10.0_f64, -0.2_f64, 1.0_f64);
        assert!((r - 1.0).abs() < 1e-9);
    }

    #[test]
    fn retrievability_decreases_with_elapsed_time() {
        let decay = -0.2_f64;
        let factor = 0.9_f64.powf(1.0 / decay) - 1.0;
        let r1 = retrievability(1.0, 10.0_f64, decay, factor);
        let r10 = retrievability(10.0, 10.0_f64, decay, factor);
        assert!(r10 < r1);
    }

    #[test]
    fn next_interval_is_exact_for_round_number_days() {
        let decay = -0.2_f64;
        let factor = 0.9_f64.powf(1.0 / decay) - 1.0;
        let interval = next_interval(250.0, 0.9, decay, factor, 36500);
        assert_eq!(interval, 250);
    }

    #[test]
    fn fuzz_below_threshold_is_identity() {
        assert_eq!(fuzzed_interval(2.0, 36500, 0.5), 2);
    }

    #[test]
    fn fuzz_stays_within_maximum_interval() {
        let fuzzed = fuzzed_interval(36499.0, 36500, 0.999);
        assert!(fuzzed <= 36500);
    }

    #[test]
    fn short_term_stability_floors_growth_for_good_and_easy() {
        let s = short_term_stability(5.0_f64, 3.0, 0.1_f64, 0.0_f64, 0.2_f64);
        assert!(s >= 5.0 * 0.999);
    }

    #[test]
    fn clamp_d_keeps_difficulty_in_range() {
        let d = initial_difficulty(20.0_f64, 5.0_f64, 0.0);
        assert!((1.0..=10.0).contains(&d));
    }
}
