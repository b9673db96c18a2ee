//! Checked fixed-point decimal arithmetic for AMM reserve math.
//!
//! All monetary quantities in the workspace are `rust_decimal::Decimal` values
//! held at [`SCALE`] fractional digits. Every operation here fails with a typed
//! [`MathError`] instead of wrapping or silently truncating, and quotients are
//! floored to the working scale so rounding always favours the pool side of a
//! calculation. Reserve and share arithmetic in the engine routes every
//! multiply/divide through [`mul_div`].

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Fractional digits carried by all monetary quantities.
pub const SCALE: u32 = 18;

/// Newton iteration bound for [`sqrt`]. Convergence is quadratic, so this is
/// far more than enough for any representable `Decimal`.
const MAX_SQRT_ITERATIONS: u32 = 64;

/// Errors that can occur during fixed-point arithmetic operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MathError {
    /// Result exceeds the maximum representable value.
    #[error("overflow in fixed-point arithmetic")]
    Overflow,

    /// Result of a balance-style subtraction would be negative.
    #[error("underflow: result would be negative")]
    Underflow,

    /// Division by zero.
    #[error("division by zero in fixed-point arithmetic")]
    DivisionByZero,
}

/// Floor a value to the working scale.
pub fn quantize(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SCALE, RoundingStrategy::ToZero)
}

pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

/// Subtraction for balances and reserves: a negative result is an underflow,
/// not a representable quantity.
pub fn checked_sub(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    let result = a.checked_sub(b).ok_or(MathError::Overflow)?;
    if result < Decimal::ZERO {
        return Err(MathError::Underflow);
    }
    Ok(result)
}

pub fn checked_mul(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    a.checked_mul(b).ok_or(MathError::Overflow)
}

pub fn checked_div(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    if b.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    a.checked_div(b).ok_or(MathError::Overflow)
}

/// Multiply-then-divide keeping the full intermediate product.
///
/// Computes `a * b / c` floored to [`SCALE`] fractional digits. When the
/// intermediate product cannot be represented, the expression is reassociated
/// as `(a / c) * b` before giving up with `Overflow`. Flooring the quotient is
/// what keeps the constant-product invariant non-decreasing under rounding.
pub fn mul_div(a: Decimal, b: Decimal, c: Decimal) -> Result<Decimal, MathError> {
    if c.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    if let Some(product) = a.checked_mul(b) {
        let quotient = product.checked_div(c).ok_or(MathError::Overflow)?;
        return Ok(quantize(quotient));
    }
    // Intermediate overflow: divide first, losing at most the precision the
    // final quantize would discard anyway.
    let partial = a.checked_div(c).ok_or(MathError::Overflow)?;
    let quotient = partial.checked_mul(b).ok_or(MathError::Overflow)?;
    Ok(quantize(quotient))
}

/// Square root via Newton's method with a deterministic iteration bound.
///
/// Used for initial liquidity-share minting. Returns the converged iterate, or
/// the best approximation after [`MAX_SQRT_ITERATIONS`] rounds.
pub fn sqrt(value: Decimal) -> Result<Decimal, MathError> {
    if value < Decimal::ZERO {
        return Err(MathError::Underflow);
    }
    if value.is_zero() {
        return Ok(Decimal::ZERO);
    }

    let epsilon = Decimal::new(1, SCALE);
    let mut x = if value >= Decimal::ONE {
        value
    } else {
        Decimal::ONE
    };
    for _ in 0..MAX_SQRT_ITERATIONS {
        let next = checked_div(checked_add(x, checked_div(value, x)?)?, Decimal::TWO)?;
        let step = (next - x).abs();
        x = next;
        if step <= epsilon {
            break;
        }
    }
    Ok(quantize(x))
}
