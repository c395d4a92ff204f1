//! Fee model: `flat_fee + amount * scalar_bps / 10000` in integer minor units.
//!
//! Parameters are validated when configuration loads, so these functions
//! never fail.

use solver_config::FeeLeg;
use solver_types::{apply_bps, U256};

const BPS_DENOMINATOR: u64 = 10_000;

/// Fee charged on `amount`.
pub fn compute_fee(amount: U256, leg: &FeeLeg) -> U256 {
	leg.flat_fee.saturating_add(apply_bps(amount, leg.scalar_bps))
}

/// Largest `base` such that `base + compute_fee(base) <= total`.
pub fn reverse_fee(total: U256, leg: &FeeLeg) -> U256 {
	let Some(available) = total.checked_sub(leg.flat_fee) else {
		return U256::ZERO;
	};

	let fits = |base: U256| {
		base.checked_add(apply_bps(base, leg.scalar_bps))
			.is_some_and(|sum| sum <= available)
	};

	let mut base = available.saturating_mul(U256::from(BPS_DENOMINATOR))
		/ U256::from(BPS_DENOMINATOR + leg.scalar_bps);
	// Truncation in the bps term can leave room for a few more units.
	while base < available && fits(base + U256::from(1u64)) {
		base += U256::from(1u64);
	}
	base
}

#[cfg(test)]
mod tests {
	use super::*;

	fn leg(flat: u64, bps: u64) -> FeeLeg {
		FeeLeg::new(U256::from(flat), bps).unwrap()
	}

	#[test]
	fn test_flat_plus_scalar() {
		assert_eq!(compute_fee(U256::from(1000u64), &leg(0, 30)), U256::from(3u64));
		assert_eq!(
			compute_fee(U256::from(1_000_000_000u64), &leg(20_000, 30)),
			U256::from(3_020_000u64)
		);
		assert_eq!(compute_fee(U256::ZERO, &leg(7, 30)), U256::from(7u64));
	}

	#[test]
	fn test_fee_is_monotonic() {
		let leg = leg(5, 123);
		let mut previous = U256::ZERO;
		for amount in (0u64..50_000).step_by(37) {
			let fee = compute_fee(U256::from(amount), &leg);
			assert!(fee >= previous, "fee decreased at {}", amount);
			previous = fee;
		}
	}

	#[test]
	fn test_reverse_fee_is_tight() {
		for (flat, bps) in [(0, 0), (0, 30), (10, 30), (1_000, 9_999), (3, 10_000)] {
			let leg = leg(flat, bps);
			for total in [0u64, 1, 9, 10, 11, 1003, 999_999, 1_003_000_000] {
				let total = U256::from(total);
				let base = reverse_fee(total, &leg);
				if base > U256::ZERO || total >= leg.flat_fee {
					assert!(base + compute_fee(base, &leg) <= total);
				}
				let next = base + U256::from(1u64);
				assert!(
					next + compute_fee(next, &leg) > total,
					"base {} not maximal for total {} ({}, {})",
					base,
					total,
					flat,
					bps
				);
			}
		}
	}

	#[test]
	fn test_reverse_of_quoted_amount() {
		let bps_only = leg(0, 30);
		assert_eq!(reverse_fee(U256::from(1003u64), &bps_only), U256::from(1000u64));
		assert_eq!(reverse_fee(U256::from(5u64), &leg(10, 0)), U256::ZERO);
	}
}
