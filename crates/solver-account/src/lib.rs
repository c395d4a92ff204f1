//! Account management for the solver.
//!
//! Exposes the solver's identity (its address), hash signing for quotes and
//! a wallet handle that delivery uses to sign outgoing transactions.

use alloy::network::EthereumWallet;
use alloy::primitives::Signature;
use async_trait::async_trait;
use solver_types::{Address, ConfigSchema, B256};
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Interface every account backend implements.
#[async_trait]
pub trait AccountInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// The address funds and quotes are attributed to.
	fn address(&self) -> Address;

	/// Signs a 32-byte digest without any prefixing.
	async fn sign_hash(&self, hash: &B256) -> Result<Signature, AccountError>;

	/// Wallet used by transaction delivery.
	fn wallet(&self) -> EthereumWallet;
}

pub struct AccountService {
	implementation: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(implementation: Box<dyn AccountInterface>) -> Self {
		Self { implementation }
	}

	pub fn address(&self) -> Address {
		self.implementation.address()
	}

	pub async fn sign_hash(&self, hash: &B256) -> Result<Signature, AccountError> {
		self.implementation.sign_hash(hash).await
	}

	pub fn wallet(&self) -> EthereumWallet {
		self.implementation.wallet()
	}
}

/// Creates an account backend by implementation name.
pub fn create_account(
	implementation: &str,
	config: &toml::Value,
) -> Result<Box<dyn AccountInterface>, AccountError> {
	match implementation {
		"local" => implementations::local::create_account(config),
		other => Err(AccountError::Configuration(format!(
			"Unknown account implementation '{}'",
			other
		))),
	}
}
