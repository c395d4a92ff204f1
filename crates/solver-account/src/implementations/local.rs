//! Local private key wallet.

use crate::{AccountError, AccountInterface};
use alloy::network::EthereumWallet;
use alloy::primitives::Signature;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use solver_types::{Address, ConfigSchema, Field, Schema, ValidationError, B256};

/// Wallet backed by a private key held in memory.
///
/// Suitable for development and single-operator deployments.
#[derive(Debug, Clone)]
pub struct LocalWallet {
	signer: PrivateKeySigner,
}

impl LocalWallet {
	/// Creates a new LocalWallet from a hex-encoded private key (with or without 0x prefix).
	pub fn new(private_key_hex: &str) -> Result<Self, AccountError> {
		let signer = private_key_hex
			.parse::<PrivateKeySigner>()
			.map_err(|e| AccountError::InvalidKey(format!("Invalid private key: {}", e)))?;

		Ok(Self { signer })
	}

	pub fn from_signer(signer: PrivateKeySigner) -> Self {
		Self { signer }
	}
}

/// Configuration schema for LocalWallet.
pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![Field::private_key("private_key")], vec![]).validate(config)
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(LocalWalletSchema)
	}

	fn address(&self) -> Address {
		self.signer.address()
	}

	async fn sign_hash(&self, hash: &B256) -> Result<Signature, AccountError> {
		self.signer
			.sign_hash(hash)
			.await
			.map_err(|e| AccountError::SigningFailed(format!("Failed to sign hash: {}", e)))
	}

	fn wallet(&self) -> EthereumWallet {
		EthereumWallet::from(self.signer.clone())
	}
}

/// Creates a local wallet from configuration.
///
/// Configuration parameters:
/// - `private_key`: hex-encoded 32-byte key
pub fn create_account(config: &toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::Configuration(e.to_string()))?;

	let private_key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.ok_or_else(|| AccountError::Configuration("private_key is required".to_string()))?;

	Ok(Box::new(LocalWallet::new(private_key)?))
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::keccak256;

	// Well-known anvil account #0.
	const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	#[tokio::test]
	async fn test_signature_recovers_to_wallet_address() {
		let wallet = LocalWallet::new(TEST_KEY).unwrap();
		let digest = keccak256(b"quote");

		let signature = wallet.sign_hash(&digest).await.unwrap();
		let recovered = signature.recover_address_from_prehash(&digest).unwrap();

		assert_eq!(recovered, wallet.address());
		assert_eq!(
			wallet.address(),
			"0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
				.parse::<Address>()
				.unwrap()
		);
	}

	#[test]
	fn test_invalid_key_is_rejected_by_schema() {
		let config: toml::Value = toml::from_str("private_key = \"0x1234\"").unwrap();
		assert!(matches!(
			create_account(&config),
			Err(AccountError::Configuration(_))
		));
	}
}
