//! Token EIP-712 domain resolution.
//!
//! Domains are read from the token contract (`name()`, optional `version()`)
//! and cached in storage under `token_domains` with a TTL.

use alloy::sol_types::Eip712Domain;
use serde::{Deserialize, Serialize};
use solver_delivery::{DeliveryError, DeliveryService};
use solver_storage::StorageService;
use solver_types::contracts::IERC20Permit;
use solver_types::{Address, U256};
use std::sync::Arc;
use std::time::Duration;

pub const TOKEN_DOMAINS_NAMESPACE: &str = "token_domains";

const DEFAULT_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDomain {
	pub name: String,
	pub version: String,
}

impl TokenDomain {
	pub fn eip712_domain(&self, chain_id: u64, token: Address) -> Eip712Domain {
		Eip712Domain::new(
			Some(self.name.clone().into()),
			Some(self.version.clone().into()),
			Some(U256::from(chain_id)),
			Some(token),
			None,
		)
	}
}

pub struct TokenDomainResolver {
	delivery: Arc<DeliveryService>,
	storage: Arc<StorageService>,
	ttl: Duration,
}

impl TokenDomainResolver {
	pub fn new(delivery: Arc<DeliveryService>, storage: Arc<StorageService>, ttl: Duration) -> Self {
		Self {
			delivery,
			storage,
			ttl,
		}
	}

	pub async fn resolve(&self, chain_id: u64, token: Address) -> Result<TokenDomain, DeliveryError> {
		let key = format!("{}:{}", chain_id, token);

		match self.storage.find::<TokenDomain>(TOKEN_DOMAINS_NAMESPACE, &key).await {
			Ok(Some(domain)) => return Ok(domain),
			Ok(None) => {},
			Err(e) => tracing::warn!(%key, error = %e, "Token domain cache read failed"),
		}

		let name = self
			.delivery
			.contract_call(chain_id, token, &IERC20Permit::nameCall {})
			.await?;

		// Tokens without `version()` sign with "1".
		let version = match self
			.delivery
			.contract_call(chain_id, token, &IERC20Permit::versionCall {})
			.await
		{
			Ok(version) => version,
			Err(e @ (DeliveryError::Reverted(_) | DeliveryError::Decode(_))) => {
				tracing::debug!(chain_id, %token, error = %e, "Token has no version(), using default");
				DEFAULT_VERSION.to_string()
			},
			Err(e) => return Err(e),
		};

		let domain = TokenDomain { name, version };
		if let Err(e) = self
			.storage
			.store_with_ttl(TOKEN_DOMAINS_NAMESPACE, &key, &domain, Some(self.ttl))
			.await
		{
			tracing::warn!(%key, error = %e, "Failed to cache token domain");
		}

		Ok(domain)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;
	use solver_delivery::testing::MockChain;
	use solver_delivery::DeliveryInterface;
	use solver_storage::implementations::memory::MemoryStorage;
	use std::collections::HashMap;

	const TOKEN: Address = address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85");

	fn resolver(chain: Arc<MockChain>) -> TokenDomainResolver {
		let mut implementations: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
		implementations.insert(10, chain);
		TokenDomainResolver::new(
			Arc::new(DeliveryService::new(implementations)),
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			Duration::from_secs(60),
		)
	}

	#[tokio::test]
	async fn test_missing_version_defaults_to_one() {
		let chain = Arc::new(MockChain::new(10, Address::ZERO));
		chain.on_call::<IERC20Permit::nameCall, _>(TOKEN, |_| "USD Coin".to_string());

		let domain = resolver(chain).resolve(10, TOKEN).await.unwrap();
		assert_eq!(domain.name, "USD Coin");
		assert_eq!(domain.version, "1");
	}

	#[tokio::test]
	async fn test_cache_hit_skips_chain_reads() {
		let chain = Arc::new(MockChain::new(10, Address::ZERO));
		chain.on_call::<IERC20Permit::nameCall, _>(TOKEN, |_| "USD Coin".to_string());
		chain.on_call::<IERC20Permit::versionCall, _>(TOKEN, |_| "2".to_string());
		let resolver = resolver(chain.clone());

		let first = resolver.resolve(10, TOKEN).await.unwrap();
		chain.fail_reads(true);
		let second = resolver.resolve(10, TOKEN).await.unwrap();

		assert_eq!(first, second);
		assert_eq!(second.version, "2");
	}

	#[tokio::test]
	async fn test_unreachable_version_is_not_defaulted() {
		let chain = Arc::new(MockChain::new(10, Address::ZERO));
		chain.on_call::<IERC20Permit::nameCall, _>(TOKEN, |_| "USD Coin".to_string());
		chain.fail_call::<IERC20Permit::versionCall, _>(TOKEN, || {
			DeliveryError::Timeout("version() timed out".to_string())
		});
		let resolver = resolver(chain.clone());

		let err = resolver.resolve(10, TOKEN).await.unwrap_err();
		assert!(err.is_transient());

		chain.on_call::<IERC20Permit::versionCall, _>(TOKEN, |_| "2".to_string());
		let domain = resolver.resolve(10, TOKEN).await.unwrap();
		assert_eq!(domain.version, "2");
	}

	#[tokio::test]
	async fn test_name_failure_propagates() {
		let chain = Arc::new(MockChain::new(10, Address::ZERO));
		chain.fail_reads(true);
		assert!(resolver(chain).resolve(10, TOKEN).await.is_err());
	}
}
