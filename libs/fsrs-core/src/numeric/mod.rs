//! Generic numeric abstraction so the scheduler math kernel
//! ([`crate::scheduler::kernel`]) runs unchanged against plain `f64` at
//! serving time and against a differentiable tape scalar ([`Var`]) while
//! the optimizer trains (§9 of SPEC_FULL.md).
//!
//! The reference implementation branches at runtime on whether a value is a
//! tensor; here that becomes a trait plus two instantiations, with no
//! runtime type check anywhere in this crate.

mod var;

pub use var::{Tape, Var};

/// Floor under which stability is clamped.
pub const S_MIN: f64 = 0.001;
/// Difficulty range floor.
pub const D_MIN: f64 = 1.0;
/// Difficulty range ceiling.
pub const D_MAX: f64 = 10.0;

/// A scalar type the scheduler math kernel can run its arithmetic over.
///
/// Every method that needs a bare constant (e.g. the `0.001` floor in
/// [`Numeric::clamp_s`]) takes it via [`Numeric::constant_like`] rather than
/// a free-standing constructor, so `Var` can stamp the constant onto the
/// same tape as `self` without a tape argument threading through every call
/// site in the math kernel.
///
/// Not `Copy`: `Var` owns a handle onto a shared tape, so every method here
/// takes `self` by value and implementations that need a value twice must
/// `clone()` it explicitly. For `f64` that clone is a no-op; for `Var` it's
/// cheap (an `Rc` bump plus two `f64`/`usize` copies).
pub trait Numeric:
    Clone
    + std::fmt::Debug
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<Output = Self>
    + std::ops::Div<Output = Self>
    + std::ops::Neg<Output = Self>
{
    /// Read out the plain value, discarding any gradient history.
    fn value(self) -> f64;

    /// A constant that shares `self`'s evaluation context (for `f64` this is
    /// just `value`; for `Var` it is a fresh untracked leaf on `self`'s tape).
    fn constant_like(self, value: f64) -> Self;

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn max(self, other: Self) -> Self;
    fn min(self, other: Self) -> Self;

    /// `self^exponent` for a variable base *and* variable exponent, built
    /// from `exp`/`ln`/`mul` alone so the chain rule for `Var` falls out of
    /// those primitives' own derivative rules — no dedicated pow gradient
    /// needed.
    fn powv(self, exponent: Self) -> Self {
        (exponent * self.clone().ln()).exp()
    }

    /// `max(x, 0.001)` — the stability floor (§4.1).
    fn clamp_s(self) -> Self {
        let floor = self.clone().constant_like(S_MIN);
        self.max(floor)
    }

    /// `clip(x, 1.0, 10.0)` — the difficulty range (§4.1).
    fn clamp_d(self) -> Self {
        let lower = self.clone().constant_like(D_MIN);
        let upper = self.clone().constant_like(D_MAX);
        self.max(lower).min(upper)
    }
}

impl Numeric for f64 {
    fn value(self) -> f64 {
        self
    }

    fn constant_like(self, value: f64) -> Self {
        value
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn ln(self) -> Self {
        f64::ln(self)
    }

    fn max(self, other: Self) -> Self {
        f64::max(self, other)
    }

    fn min(self, other: Self) -> Self {
        f64::min(self, other)
    }
}
