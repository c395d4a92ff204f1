//! Cross-chain intents and their content-addressed hash.
//!
//! An intent pairs a route (what the solver must do on the destination
//! chain) with a reward (what it is paid on the source chain). The hash
//! commits to both and matches the portal contract's derivation:
//! `keccak256(destination ‖ keccak256(abi.encode(route)) ‖ keccak256(abi.encode(reward)))`.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::SolValue;
use serde::{Deserialize, Serialize};

/// ABI mirrors of the portal structs and entry points.
pub mod abi {
	alloy::sol! {
		#[derive(Debug)]
		struct TokenAmount {
			address token;
			uint256 amount;
		}

		#[derive(Debug)]
		struct Call {
			address target;
			bytes data;
			uint256 value;
		}

		#[derive(Debug)]
		struct Route {
			bytes32 salt;
			uint64 deadline;
			address portal;
			uint256 nativeAmount;
			TokenAmount[] tokens;
			Call[] calls;
		}

		#[derive(Debug)]
		struct Reward {
			uint64 deadline;
			address creator;
			address prover;
			uint256 nativeAmount;
			TokenAmount[] tokens;
		}

		interface IPortal {
			function fulfill(bytes32 intentHash, Route route, bytes32 rewardHash, bytes32 claimant) external payable returns (bytes[] memory);
			function getRewardStatus(bytes32 intentHash) external view returns (uint8 status);
			function batchWithdraw(uint64[] destinations, bytes32[] routeHashes, Reward[] rewards) external;
		}
	}
}

/// Token and amount pair in the token's own minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
	pub token: Address,
	pub amount: U256,
}

impl TokenAmount {
	pub fn new(token: Address, amount: U256) -> Self {
		Self { token, amount }
	}
}

/// A call the solver executes on the destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
	pub target: Address,
	pub data: Bytes,
	pub value: U256,
}

/// Destination-side obligations of an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
	pub salt: B256,
	pub deadline: u64,
	/// Portal contract on the destination chain.
	pub portal: Address,
	pub native_amount: U256,
	pub tokens: Vec<TokenAmount>,
	pub calls: Vec<Call>,
}

impl Route {
	/// Native value the solver must provide: the route amount plus call values.
	pub fn native_obligation(&self) -> U256 {
		self.calls
			.iter()
			.fold(self.native_amount, |acc, call| acc.saturating_add(call.value))
	}

	pub fn hash(&self) -> B256 {
		keccak256(abi::Route::from(self).abi_encode())
	}
}

/// Source-side compensation for the solver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
	pub deadline: u64,
	pub creator: Address,
	pub prover: Address,
	pub native_amount: U256,
	pub tokens: Vec<TokenAmount>,
}

impl Reward {
	pub fn hash(&self) -> B256 {
		keccak256(abi::Reward::from(self).abi_encode())
	}
}

/// Cross-chain value-movement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
	pub source_chain: u64,
	pub destination_chain: u64,
	pub route: Route,
	pub reward: Reward,
	pub hash: B256,
}

impl Intent {
	/// Builds an intent and computes its hash.
	pub fn new(source_chain: u64, destination_chain: u64, route: Route, reward: Reward) -> Self {
		let hash = Self::compute_hash(destination_chain, &route, &reward);
		Self {
			source_chain,
			destination_chain,
			route,
			reward,
			hash,
		}
	}

	pub fn compute_hash(destination_chain: u64, route: &Route, reward: &Reward) -> B256 {
		let mut packed = Vec::with_capacity(8 + 32 + 32);
		packed.extend_from_slice(&destination_chain.to_be_bytes());
		packed.extend_from_slice(route.hash().as_slice());
		packed.extend_from_slice(reward.hash().as_slice());
		keccak256(packed)
	}

	/// True when the carried hash matches the route and reward contents.
	pub fn verify_hash(&self) -> bool {
		Self::compute_hash(self.destination_chain, &self.route, &self.reward) == self.hash
	}
}

/// Lifecycle of an intent from the solver's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
	Proposed,
	Quoted,
	Funded,
	Fulfilled,
	Proven,
	RewardsWithdrawn,
	Rejected,
	Expired,
}

impl IntentStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			IntentStatus::RewardsWithdrawn | IntentStatus::Rejected | IntentStatus::Expired
		)
	}

	/// Whether the lifecycle allows moving from `self` to `next`.
	pub fn can_transition_to(&self, next: IntentStatus) -> bool {
		use IntentStatus::*;
		match (self, next) {
			(Proposed, Quoted) => true,
			(Quoted, Funded) | (Quoted, Fulfilled) => true,
			(Funded, Fulfilled) => true,
			(Fulfilled, Proven) => true,
			(Proven, RewardsWithdrawn) => true,
			(Proposed | Quoted | Funded, Rejected | Expired) => true,
			_ => false,
		}
	}
}

impl From<&TokenAmount> for abi::TokenAmount {
	fn from(value: &TokenAmount) -> Self {
		Self {
			token: value.token,
			amount: value.amount,
		}
	}
}

impl From<&Route> for abi::Route {
	fn from(route: &Route) -> Self {
		Self {
			salt: route.salt,
			deadline: route.deadline,
			portal: route.portal,
			nativeAmount: route.native_amount,
			tokens: route.tokens.iter().map(Into::into).collect(),
			calls: route
				.calls
				.iter()
				.map(|call| abi::Call {
					target: call.target,
					data: call.data.clone(),
					value: call.value,
				})
				.collect(),
		}
	}
}

impl From<&Reward> for abi::Reward {
	fn from(reward: &Reward) -> Self {
		Self {
			deadline: reward.deadline,
			creator: reward.creator,
			prover: reward.prover,
			nativeAmount: reward.native_amount,
			tokens: reward.tokens.iter().map(Into::into).collect(),
		}
	}
}
