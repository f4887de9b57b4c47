//! FSRS (Free Spaced Repetition Scheduler) scheduling, replay, and parameter
//! optimization.
//!
//! [`scheduler::Scheduler`] is the serving-time entry point
//! (`review_card`); [`optimizer::compute_optimal_parameters`] and
//! [`retention::compute_optimal_retention`] fit a `Scheduler`'s tunables to
//! a review history. [`numeric`] is what lets the same DSR arithmetic serve
//! both: a `Scheduler` runs it over `f64`, the optimizer runs it over the
//! differentiable [`numeric::Var`].

pub mod error;
pub mod numeric;
pub mod optimizer;
pub mod replay;
pub mod retention;
pub mod scheduler;
pub mod types;

pub use error::{FsrsError, Result};
pub use scheduler::{FuzzSource, Scheduler};
pub use types::{Card, Rating, ReviewLog, State};
