//! Transaction delivery and chain reads.
//!
//! Every chain the solver works on gets one [`DeliveryInterface`]
//! implementation. [`DeliveryService`] routes by chain id and layers typed
//! contract calls and token balance helpers on top of the raw interface.

use alloy::sol_types::SolCall;
use async_trait::async_trait;
use solver_types::contracts::IERC20;
use solver_types::{
	truncate_id, Address, Bytes, ConfigSchema, Transaction, TransactionHash, TransactionReceipt,
	U256,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[derive(Debug, Error)]
pub enum DeliveryError {
	#[error("Network error: {0}")]
	Network(String),
	#[error("Transaction failed: {0}")]
	TransactionFailed(String),
	#[error("Execution reverted: {0}")]
	Reverted(String),
	#[error("Timeout: {0}")]
	Timeout(String),
	#[error("Decode error: {0}")]
	Decode(String),
	#[error("No delivery implementation for chain {0}")]
	NoImplementationAvailable(u64),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl DeliveryError {
	/// Whether retrying the same request may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, DeliveryError::Network(_) | DeliveryError::Timeout(_))
	}
}

/// Chain access for a single chain.
#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Signs and broadcasts a transaction.
	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError>;

	/// Waits until the transaction has the configured number of confirmations.
	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
	) -> Result<TransactionReceipt, DeliveryError>;

	/// Receipt of a mined transaction, `None` while pending or unknown.
	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;

	/// Executes an `eth_call` against the latest block.
	async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeliveryError>;

	async fn get_native_balance(&self, owner: Address) -> Result<U256, DeliveryError>;

	/// Next nonce for `address`, counting pending transactions.
	async fn get_nonce(&self, address: Address) -> Result<u64, DeliveryError>;
}

/// Routes chain work to the implementation registered for each chain.
#[derive(Clone)]
pub struct DeliveryService {
	implementations: HashMap<u64, Arc<dyn DeliveryInterface>>,
}

impl DeliveryService {
	pub fn new(implementations: HashMap<u64, Arc<dyn DeliveryInterface>>) -> Self {
		Self { implementations }
	}

	fn implementation(&self, chain_id: u64) -> Result<&Arc<dyn DeliveryInterface>, DeliveryError> {
		self.implementations
			.get(&chain_id)
			.ok_or(DeliveryError::NoImplementationAvailable(chain_id))
	}

	pub fn supports(&self, chain_id: u64) -> bool {
		self.implementations.contains_key(&chain_id)
	}

	pub async fn deliver(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let chain_id = tx.chain_id;
		let hash = self.implementation(chain_id)?.submit(tx).await?;
		tracing::info!(chain_id, tx_hash = %hash, "Submitted transaction");
		Ok(hash)
	}

	/// Waits for confirmation and rejects reverted transactions.
	pub async fn confirm(
		&self,
		chain_id: u64,
		hash: &TransactionHash,
	) -> Result<TransactionReceipt, DeliveryError> {
		let receipt = self
			.implementation(chain_id)?
			.wait_for_confirmation(hash)
			.await?;
		if !receipt.success {
			return Err(DeliveryError::TransactionFailed(format!(
				"Transaction {} reverted on chain {}",
				hash, chain_id
			)));
		}
		tracing::debug!(chain_id, tx_hash = %hash, block = receipt.block_number, "Transaction confirmed");
		Ok(receipt)
	}

	pub async fn get_receipt(
		&self,
		chain_id: u64,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.implementation(chain_id)?.get_receipt(hash).await
	}

	pub async fn call(
		&self,
		chain_id: u64,
		to: Address,
		data: Bytes,
	) -> Result<Bytes, DeliveryError> {
		self.implementation(chain_id)?.call(to, data).await
	}

	/// Encodes `call`, executes it and decodes the return value.
	pub async fn contract_call<C>(
		&self,
		chain_id: u64,
		to: Address,
		call: &C,
	) -> Result<C::Return, DeliveryError>
	where
		C: SolCall + Sync,
	{
		let output = self.call(chain_id, to, call.abi_encode().into()).await?;
		C::abi_decode_returns(&output).map_err(|e| {
			DeliveryError::Decode(format!(
				"{} on {} at chain {}: {}",
				C::SIGNATURE,
				truncate_id(&to.to_string()),
				chain_id,
				e
			))
		})
	}

	pub async fn native_balance(&self, chain_id: u64, owner: Address) -> Result<U256, DeliveryError> {
		self.implementation(chain_id)?.get_native_balance(owner).await
	}

	pub async fn token_balance(
		&self,
		chain_id: u64,
		token: Address,
		owner: Address,
	) -> Result<U256, DeliveryError> {
		self.contract_call(chain_id, token, &IERC20::balanceOfCall { owner })
			.await
	}

	pub async fn get_nonce(&self, chain_id: u64, address: Address) -> Result<u64, DeliveryError> {
		self.implementation(chain_id)?.get_nonce(address).await
	}
}
