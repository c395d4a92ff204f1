//! Integer amount arithmetic across token precisions.
//!
//! Balances are fixed-precision integers, so everything here works on `U256`
//! minor units. Only the final slippage ratio is expressed as a `Decimal`.

use alloy::primitives::U256;
use rust_decimal::Decimal;
use thiserror::Error;

/// Precision every token amount is normalised to before summing across tokens.
pub const BASE_DECIMALS: u8 = 6;

/// Precision used when comparing amounts of two different tokens.
pub const COMPARISON_DECIMALS: u8 = 18;

const BPS_DENOMINATOR: u64 = 10_000;

/// Caps the magnitude of a negative slippage so it stays representable.
const MAX_INVERSION_SCALED: u128 = 1_000_000_000_000_000_000_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
	#[error("Amount in must be greater than zero")]
	ZeroAmountIn,
	#[error("Arithmetic overflow")]
	Overflow,
}

/// Converts `amount` from `from` decimals to `to` decimals, truncating when
/// precision is lost.
pub fn normalize(amount: U256, from: u8, to: u8) -> U256 {
	if from == to {
		return amount;
	}
	let factor = pow10(from.abs_diff(to));
	if to > from {
		amount.saturating_mul(factor)
	} else {
		amount / factor
	}
}

/// Applies a basis-point multiplier: `amount * bps / 10000`.
pub fn apply_bps(amount: U256, bps: u64) -> U256 {
	amount.saturating_mul(U256::from(bps)) / U256::from(BPS_DENOMINATOR)
}

/// Computes `1 - amount_out_min / amount_in` after bringing both amounts to a
/// common precision.
///
/// The result is never clamped: an output larger than the input yields a
/// negative value which callers must treat as an inverted (invalid) price.
pub fn compute_slippage(
	amount_in: U256,
	decimals_in: u8,
	amount_out_min: U256,
	decimals_out: u8,
) -> Result<Decimal, AmountError> {
	let amount_in = normalize(amount_in, decimals_in, COMPARISON_DECIMALS);
	let amount_out = normalize(amount_out_min, decimals_out, COMPARISON_DECIMALS);

	if amount_in.is_zero() {
		return Err(AmountError::ZeroAmountIn);
	}

	let scale = pow10(COMPARISON_DECIMALS);
	let (diff, negative) = if amount_out <= amount_in {
		(amount_in - amount_out, false)
	} else {
		(amount_out - amount_in, true)
	};

	let scaled = diff.checked_mul(scale).ok_or(AmountError::Overflow)? / amount_in;
	let scaled = scaled.min(U256::from(MAX_INVERSION_SCALED)).saturating_to::<u128>() as i128;

	let value = if negative { -scaled } else { scaled };
	Ok(Decimal::from_i128_with_scale(value, COMPARISON_DECIMALS as u32).normalize())
}

fn pow10(exp: u8) -> U256 {
	U256::from(10u64).pow(U256::from(exp))
}
