//! Transaction delivery types for the solver system.
//!
//! This module defines types related to blockchain transaction submission
//! and monitoring, including transaction hashes, receipts and logs.

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchain transaction hash representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub B256);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", crate::truncate_id(&hex::encode(self.0)))
	}
}

impl From<B256> for TransactionHash {
	fn from(hash: B256) -> Self {
		Self(hash)
	}
}

/// Event log emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
	/// Contract that emitted the log.
	pub address: Address,
	/// Indexed topics, the first one being the event signature.
	pub topics: Vec<B256>,
	/// Non-indexed event data.
	pub data: Bytes,
}

/// Transaction receipt containing execution details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	/// The hash of the transaction.
	pub hash: TransactionHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
	/// Logs emitted during execution.
	pub logs: Vec<Log>,
}

impl TransactionReceipt {
	/// Returns logs emitted by `address` whose first topic is `signature`.
	pub fn logs_matching(&self, address: Address, signature: B256) -> impl Iterator<Item = &Log> {
		self.logs.iter().filter(move |log| {
			log.address == address && log.topics.first() == Some(&signature)
		})
	}
}
