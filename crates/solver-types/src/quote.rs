//! Quotes issued to counterparties and the plans produced on approval.

use crate::{Address, Bytes, TokenAmount, Transaction, B256, U256};
use alloy::primitives::keccak256;
use alloy::sol_types::SolValue;
use serde::{Deserialize, Serialize};

/// How the intent reaches the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
	/// The requester publishes and funds the intent itself.
	SelfPublish,
	/// The solver publishes and funds the vault using permit authorizations.
	Gasless,
}

impl ExecutionType {
	pub fn as_str(&self) -> &'static str {
		match self {
			ExecutionType::SelfPublish => "self_publish",
			ExecutionType::Gasless => "gasless",
		}
	}
}

/// Solver commitment for one intent. Immutable; invalid after `expiry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
	pub id: String,
	pub intent_hash: B256,
	pub execution_type: ExecutionType,
	/// Reward tokens the solver requires, in each reward token's precision.
	pub required_reward: Vec<TokenAmount>,
	/// Native reward the solver requires, in wei.
	pub required_native: U256,
	/// Token fee component, in base precision.
	pub fee: U256,
	/// Native fee component, in wei.
	pub native_fee: U256,
	pub issued_at: u64,
	pub expiry: u64,
	pub solver: Address,
	/// Solver signature over [`Quote::digest`].
	pub signature: Bytes,
}

impl Quote {
	/// Digest the solver signs when issuing the quote.
	pub fn digest(&self) -> B256 {
		let tokens: Vec<(Address, U256)> = self
			.required_reward
			.iter()
			.map(|t| (t.token, t.amount))
			.collect();
		keccak256(
			(
				self.intent_hash,
				U256::from(self.execution_type as u8),
				tokens,
				self.required_native,
				self.expiry,
				self.solver,
			)
				.abi_encode(),
		)
	}

	pub fn is_expired(&self, now: u64) -> bool {
		now >= self.expiry
	}
}

/// Reverse quote: the largest route the solver will serve for a reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseQuote {
	pub intent_hash: B256,
	/// Maximum route token value, in base precision.
	pub max_route_value: U256,
	/// Maximum native route value, in wei.
	pub max_native_value: U256,
	/// Whichever bound was tighter for the token leg.
	pub limited_by: RouteLimit,
	pub expiry: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteLimit {
	Reward,
	Balance,
}

/// Unsigned transactions ready for the fulfillment dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
	pub quote_id: String,
	pub intent_hash: B256,
	pub chain_id: u64,
	/// Job group the transactions must be submitted through.
	pub group_key: String,
	pub transactions: Vec<Transaction>,
}

/// Job group key for work that submits transactions on `chain_id`.
pub fn chain_group_key(chain_id: u64) -> String {
	format!("chain:{}", chain_id)
}
