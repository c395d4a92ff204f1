//! Off-chain token authorizations carried by gasless quote requests.

use crate::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Canonical Permit2 deployment, identical on every supported chain.
pub const CANONICAL_PERMIT2: Address =
	alloy::primitives::address!("0x000000000022D473030F116dDEE9F6B43aC78BA3");

/// EIP-2612 permit for a single token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitEntry {
	pub token: Address,
	/// Signed value. Defaults to the reward amount for the token when absent.
	#[serde(default)]
	pub amount: Option<U256>,
	pub deadline: u64,
	pub signature: Bytes,
}

/// One token allowance inside a Permit2 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitDetails {
	pub token: Address,
	/// uint160 on chain.
	pub amount: U256,
	/// uint48 on chain; zero means no expiry.
	pub expiration: u64,
	/// uint48 on chain.
	pub nonce: u64,
}

/// Typed data signed for Permit2.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Permit2Data {
	Single {
		details: PermitDetails,
		spender: Address,
		sig_deadline: u64,
	},
	Batch {
		details: Vec<PermitDetails>,
		spender: Address,
		sig_deadline: u64,
	},
}

impl Permit2Data {
	pub fn details(&self) -> Vec<&PermitDetails> {
		match self {
			Permit2Data::Single { details, .. } => vec![details],
			Permit2Data::Batch { details, .. } => details.iter().collect(),
		}
	}

	pub fn spender(&self) -> Address {
		match self {
			Permit2Data::Single { spender, .. } | Permit2Data::Batch { spender, .. } => *spender,
		}
	}

	pub fn sig_deadline(&self) -> u64 {
		match self {
			Permit2Data::Single { sig_deadline, .. } | Permit2Data::Batch { sig_deadline, .. } => {
				*sig_deadline
			}
		}
	}
}

/// Permit2 authorization as supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit2Payload {
	pub permit_contract: Address,
	pub data: Permit2Data,
	pub signature: Bytes,
}

/// Exactly one authorization flavour, once the request has been checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PermitAuthorization {
	Permit(Vec<PermitEntry>),
	Permit2(Permit2Payload),
}
