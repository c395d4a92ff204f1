//! Reward vault funding checks against the source chain portal.

use solver_delivery::{DeliveryError, DeliveryService};
use solver_types::contracts::IPortal;
use solver_types::{truncate_id, Address, VaultStatus, B256};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
	#[error("Chain read failure: {0}")]
	ChainReadFailure(String),
}

impl From<DeliveryError> for VaultError {
	fn from(err: DeliveryError) -> Self {
		VaultError::ChainReadFailure(err.to_string())
	}
}

/// Reads vault state. Failures never default to funded.
pub struct VaultValidator {
	delivery: Arc<DeliveryService>,
}

impl VaultValidator {
	pub fn new(delivery: Arc<DeliveryService>) -> Self {
		Self { delivery }
	}

	/// Current vault status for `intent_hash` as reported by the portal at
	/// `intent_source` on `chain_id`.
	pub async fn get_vault_status(
		&self,
		chain_id: u64,
		intent_source: Address,
		intent_hash: B256,
	) -> Result<VaultStatus, VaultError> {
		let raw = self
			.delivery
			.contract_call(
				chain_id,
				intent_source,
				&IPortal::getRewardStatusCall {
					intentHash: intent_hash,
				},
			)
			.await?;

		let status = VaultStatus::try_from(raw).map_err(|value| {
			VaultError::ChainReadFailure(format!(
				"Unknown vault status {} for intent {}",
				value,
				truncate_id(&intent_hash.to_string())
			))
		})?;

		tracing::debug!(
			chain_id,
			intent_hash = %truncate_id(&intent_hash.to_string()),
			%status,
			"Read vault status"
		);
		Ok(status)
	}

	/// Whether the vault holds reward for the intent.
	///
	/// With `prevent_redundant_funding` a fully funded vault counts as not
	/// fundable, so callers do not add to it again.
	pub async fn is_vault_funded(
		&self,
		chain_id: u64,
		intent_source: Address,
		intent_hash: B256,
		prevent_redundant_funding: bool,
	) -> Result<bool, VaultError> {
		let status = self
			.get_vault_status(chain_id, intent_source, intent_hash)
			.await?;
		Ok(match status {
			VaultStatus::PartiallyFunded => true,
			VaultStatus::FullyFunded => !prevent_redundant_funding,
			_ => false,
		})
	}

	pub fn is_vault_stale(status: VaultStatus) -> bool {
		status.is_stale()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;
	use solver_delivery::testing::MockChain;
	use solver_delivery::DeliveryInterface;
	use std::collections::HashMap;
	use std::sync::atomic::{AtomicU8, Ordering};

	const CHAIN: u64 = 42161;
	const PORTAL: Address = address!("0x0000000000000000000000000000000000000a0a");

	fn validator(chain: Arc<MockChain>) -> VaultValidator {
		let mut implementations: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
		implementations.insert(CHAIN, chain);
		VaultValidator::new(Arc::new(DeliveryService::new(implementations)))
	}

	fn chain_with_status(status: u8) -> Arc<MockChain> {
		let chain = Arc::new(MockChain::new(CHAIN, Address::ZERO));
		chain.on_call::<IPortal::getRewardStatusCall, _>(PORTAL, move |_| status);
		chain
	}

	#[tokio::test]
	async fn test_status_read_is_idempotent() {
		let validator = validator(chain_with_status(2));
		let hash = B256::repeat_byte(0x42);

		let first = validator.get_vault_status(CHAIN, PORTAL, hash).await.unwrap();
		let second = validator.get_vault_status(CHAIN, PORTAL, hash).await.unwrap();

		assert_eq!(first, VaultStatus::FullyFunded);
		assert_eq!(first, second);
	}

	#[tokio::test]
	async fn test_funded_respects_redundant_funding_flag() {
		let hash = B256::repeat_byte(0x01);

		let partial = validator(chain_with_status(1));
		assert!(partial.is_vault_funded(CHAIN, PORTAL, hash, true).await.unwrap());

		let full = validator(chain_with_status(2));
		assert!(full.is_vault_funded(CHAIN, PORTAL, hash, false).await.unwrap());
		assert!(!full.is_vault_funded(CHAIN, PORTAL, hash, true).await.unwrap());

		let claimed = validator(chain_with_status(3));
		assert!(!claimed.is_vault_funded(CHAIN, PORTAL, hash, false).await.unwrap());
	}

	#[test]
	fn test_stale_statuses() {
		assert!(VaultValidator::is_vault_stale(VaultStatus::Claimed));
		assert!(VaultValidator::is_vault_stale(VaultStatus::Refunded));
		assert!(!VaultValidator::is_vault_stale(VaultStatus::FullyFunded));
		assert!(!VaultValidator::is_vault_stale(VaultStatus::Empty));
	}

	#[tokio::test]
	async fn test_rpc_failure_fails_closed() {
		let chain = chain_with_status(2);
		chain.fail_reads(true);
		let validator = validator(chain);

		let result = validator
			.is_vault_funded(CHAIN, PORTAL, B256::ZERO, false)
			.await;
		assert!(matches!(result, Err(VaultError::ChainReadFailure(_))));
	}

	#[tokio::test]
	async fn test_unknown_status_value_is_a_read_failure() {
		let validator = validator(chain_with_status(9));
		let result = validator.get_vault_status(CHAIN, PORTAL, B256::ZERO).await;
		assert!(matches!(result, Err(VaultError::ChainReadFailure(msg)) if msg.contains('9')));
	}

	#[tokio::test]
	async fn test_status_follows_chain_changes() {
		let chain = Arc::new(MockChain::new(CHAIN, Address::ZERO));
		let status = Arc::new(AtomicU8::new(0));
		let handle = status.clone();
		chain.on_call::<IPortal::getRewardStatusCall, _>(PORTAL, move |_| {
			handle.load(Ordering::SeqCst)
		});
		let validator = validator(chain);

		assert_eq!(
			validator.get_vault_status(CHAIN, PORTAL, B256::ZERO).await.unwrap(),
			VaultStatus::Empty
		);
		status.store(4, Ordering::SeqCst);
		assert_eq!(
			validator.get_vault_status(CHAIN, PORTAL, B256::ZERO).await.unwrap(),
			VaultStatus::Refunded
		);
	}
}
