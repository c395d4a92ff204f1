//! Escrow vault funding status as reported by the portal contract.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Funding status of an intent's reward vault.
///
/// Discriminants match the portal's `getRewardStatus` return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum VaultStatus {
	Empty = 0,
	PartiallyFunded = 1,
	FullyFunded = 2,
	Claimed = 3,
	Refunded = 4,
}

impl VaultStatus {
	/// A stale vault can no longer be fulfilled against.
	pub fn is_stale(&self) -> bool {
		matches!(self, VaultStatus::Claimed | VaultStatus::Refunded)
	}

	/// Whether the vault holds any reward.
	pub fn has_funds(&self) -> bool {
		matches!(self, VaultStatus::PartiallyFunded | VaultStatus::FullyFunded)
	}
}

impl TryFrom<u8> for VaultStatus {
	type Error = u8;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(VaultStatus::Empty),
			1 => Ok(VaultStatus::PartiallyFunded),
			2 => Ok(VaultStatus::FullyFunded),
			3 => Ok(VaultStatus::Claimed),
			4 => Ok(VaultStatus::Refunded),
			other => Err(other),
		}
	}
}

impl fmt::Display for VaultStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			VaultStatus::Empty => "empty",
			VaultStatus::PartiallyFunded => "partially_funded",
			VaultStatus::FullyFunded => "fully_funded",
			VaultStatus::Claimed => "claimed",
			VaultStatus::Refunded => "refunded",
		};
		f.write_str(name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_decodes_every_portal_value() {
		for raw in 0u8..=4 {
			let status = VaultStatus::try_from(raw).unwrap();
			assert_eq!(status as u8, raw);
		}
		assert_eq!(VaultStatus::try_from(5), Err(5));
	}

	#[test]
	fn test_stale_and_funded_classification() {
		assert!(VaultStatus::Claimed.is_stale());
		assert!(VaultStatus::Refunded.is_stale());
		assert!(!VaultStatus::PartiallyFunded.is_stale());
		assert!(VaultStatus::PartiallyFunded.has_funds());
		assert!(!VaultStatus::Empty.has_funds());
	}
}
