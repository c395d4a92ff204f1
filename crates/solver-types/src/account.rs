//! Transaction types shared by the account, delivery and liquidity crates.
//!
//! A [`Transaction`] is an unsigned request: signing and nonce/gas filling
//! happen in the delivery layer unless the caller pins a nonce explicitly.

use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use serde::{Deserialize, Serialize};

/// Blockchain transaction representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	/// Recipient address.
	pub to: Address,
	/// Transaction calldata.
	pub data: Bytes,
	/// Value to transfer in native currency.
	pub value: U256,
	/// Chain ID for replay protection.
	pub chain_id: u64,
	/// Pinned nonce. `None` lets the provider fill it.
	pub nonce: Option<u64>,
	/// Gas limit, estimated by the provider when absent.
	pub gas_limit: Option<u64>,
}

impl Transaction {
	/// Creates a contract call with zero value on `chain_id`.
	pub fn call(chain_id: u64, to: Address, data: impl Into<Bytes>) -> Self {
		Self {
			to,
			data: data.into(),
			value: U256::ZERO,
			chain_id,
			nonce: None,
			gas_limit: None,
		}
	}

	/// Sets the native value carried by the call.
	pub fn with_value(mut self, value: U256) -> Self {
		self.value = value;
		self
	}

	/// Pins the transaction nonce.
	pub fn with_nonce(mut self, nonce: u64) -> Self {
		self.nonce = Some(nonce);
		self
	}
}

impl From<Transaction> for TransactionRequest {
	fn from(tx: Transaction) -> Self {
		TransactionRequest {
			chain_id: Some(tx.chain_id),
			value: Some(tx.value),
			to: Some(TxKind::Call(tx.to)),
			nonce: tx.nonce,
			gas: tx.gas_limit,
			input: TransactionInput::new(tx.data),
			..Default::default()
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;

	#[test]
	fn test_into_transaction_request_keeps_pinned_nonce() {
		let to = address!("0x000000000022D473030F116dDEE9F6B43aC78BA3");
		let tx = Transaction::call(10, to, vec![0xde, 0xad])
			.with_value(U256::from(7))
			.with_nonce(42);

		let request: TransactionRequest = tx.into();

		assert_eq!(request.nonce, Some(42));
		assert_eq!(request.chain_id, Some(10));
		assert_eq!(request.to, Some(TxKind::Call(to)));
		assert_eq!(request.value, Some(U256::from(7)));
		assert_eq!(
			request.input.input().map(|b| b.to_vec()),
			Some(vec![0xde, 0xad])
		);
	}
}
