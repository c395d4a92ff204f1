//! Alloy-based EVM delivery over HTTP JSON-RPC.
//!
//! The provider carries the solver wallet so transactions are signed on
//! submission; nonce, gas and chain id are filled by the recommended fillers
//! unless the transaction pins a nonce.

use crate::{DeliveryError, DeliveryInterface};
use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use async_trait::async_trait;
use solver_types::{
	Address, Bytes, ConfigSchema, Field, FieldType, Log, Schema, Transaction, TransactionHash,
	TransactionReceipt, ValidationError, U256,
};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const SECONDS_PER_CONFIRMATION: u64 = 20;
const MAX_CONFIRMATION_WAIT_SECS: u64 = 600;

pub struct AlloyDelivery {
	provider: DynProvider,
	chain_id: u64,
	confirmations: u64,
}

impl AlloyDelivery {
	pub fn new(
		rpc_url: &str,
		chain_id: u64,
		confirmations: u64,
		wallet: EthereumWallet,
	) -> Result<Self, DeliveryError> {
		let url = rpc_url
			.parse()
			.map_err(|e| DeliveryError::Configuration(format!("Invalid RPC URL: {}", e)))?;

		let provider = ProviderBuilder::new()
			.wallet(wallet)
			.connect_http(url)
			.erased();

		Ok(Self {
			provider,
			chain_id,
			confirmations,
		})
	}

	fn convert_receipt(receipt: alloy::rpc::types::TransactionReceipt) -> TransactionReceipt {
		let logs = receipt
			.inner
			.logs()
			.iter()
			.map(|log| Log {
				address: log.inner.address,
				topics: log.inner.data.topics().to_vec(),
				data: log.inner.data.data.clone(),
			})
			.collect();

		TransactionReceipt {
			hash: TransactionHash(receipt.transaction_hash),
			block_number: receipt.block_number.unwrap_or(0),
			success: receipt.status(),
			logs,
		}
	}
}

/// Configuration schema for Alloy delivery.
pub struct AlloyDeliverySchema;

impl ConfigSchema for AlloyDeliverySchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![
				Field::url("rpc_url"),
				Field::new(
					"chain_id",
					FieldType::Integer {
						min: Some(1),
						max: None,
					},
				),
			],
			vec![Field::new(
				"confirmations",
				FieldType::Integer {
					min: Some(0),
					max: Some(1000),
				},
			)],
		)
		.validate(config)
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(AlloyDeliverySchema)
	}

	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let request: TransactionRequest = tx.into();

		let pending_tx = self
			.provider
			.send_transaction(request)
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to send transaction: {}", e)))?;

		Ok(TransactionHash(*pending_tx.tx_hash()))
	}

	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
	) -> Result<TransactionReceipt, DeliveryError> {
		let timeout_seconds = (self.confirmations * SECONDS_PER_CONFIRMATION)
			.max(SECONDS_PER_CONFIRMATION)
			.min(MAX_CONFIRMATION_WAIT_SECS);
		let max_wait_time = Duration::from_secs(timeout_seconds);
		let start_time = tokio::time::Instant::now();

		tracing::debug!(
			chain_id = self.chain_id,
			tx_hash = %hash,
			confirmations = self.confirmations,
			"Waiting for confirmations (timeout: {}s)",
			timeout_seconds
		);

		loop {
			if start_time.elapsed() > max_wait_time {
				return Err(DeliveryError::Timeout(format!(
					"Timeout waiting for {} confirmations of {} after {} seconds",
					self.confirmations,
					hash,
					max_wait_time.as_secs()
				)));
			}

			let receipt = match self.get_receipt(hash).await? {
				Some(receipt) => receipt,
				None => {
					tokio::time::sleep(POLL_INTERVAL).await;
					continue;
				},
			};

			let current_block = self.provider.get_block_number().await.map_err(|e| {
				DeliveryError::Network(format!("Failed to get block number: {}", e))
			})?;

			if current_block.saturating_sub(receipt.block_number) >= self.confirmations {
				return Ok(receipt);
			}

			tokio::time::sleep(POLL_INTERVAL).await;
		}
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash.0)
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get receipt: {}", e)))?;

		Ok(receipt.map(Self::convert_receipt))
	}

	async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, DeliveryError> {
		let request = TransactionRequest::default()
			.to(to)
			.input(TransactionInput::new(data));

		self.provider
			.call(request)
			.await
			.map_err(|e| match e.as_error_resp() {
				Some(payload) if payload.code == 3 || payload.message.contains("revert") => {
					DeliveryError::Reverted(payload.message.to_string())
				},
				_ => DeliveryError::Network(format!("eth_call failed: {}", e)),
			})
	}

	async fn get_native_balance(&self, owner: Address) -> Result<U256, DeliveryError> {
		self.provider
			.get_balance(owner)
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get balance: {}", e)))
	}

	async fn get_nonce(&self, address: Address) -> Result<u64, DeliveryError> {
		self.provider
			.get_transaction_count(address)
			.pending()
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get nonce: {}", e)))
	}
}

/// Creates an HTTP delivery for one chain.
///
/// Configuration parameters:
/// - `rpc_url`: HTTP RPC endpoint
/// - `chain_id`: chain the endpoint serves
/// - `confirmations`: blocks to wait before a receipt counts (default 1)
pub fn create_http_delivery(
	config: &toml::Value,
	wallet: EthereumWallet,
) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	AlloyDeliverySchema
		.validate(config)
		.map_err(|e| DeliveryError::Configuration(e.to_string()))?;

	let rpc_url = config
		.get("rpc_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| DeliveryError::Configuration("rpc_url is required".to_string()))?;
	let chain_id = config
		.get("chain_id")
		.and_then(|v| v.as_integer())
		.ok_or_else(|| DeliveryError::Configuration("chain_id is required".to_string()))?
		as u64;
	let confirmations = config
		.get("confirmations")
		.and_then(|v| v.as_integer())
		.unwrap_or(1) as u64;

	Ok(Box::new(AlloyDelivery::new(
		rpc_url,
		chain_id,
		confirmations,
		wallet,
	)?))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_schema_requires_chain_id() {
		let config: toml::Value = toml::from_str("rpc_url = \"http://localhost:8545\"").unwrap();
		let wallet = EthereumWallet::from(alloy::signers::local::PrivateKeySigner::random());
		assert!(matches!(
			create_http_delivery(&config, wallet),
			Err(DeliveryError::Configuration(_))
		));
	}

	#[test]
	fn test_schema_rejects_non_http_url() {
		let config: toml::Value =
			toml::from_str("rpc_url = \"ws://localhost:8545\"\nchain_id = 10").unwrap();
		assert!(AlloyDeliverySchema.validate(&config).is_err());
	}
}
