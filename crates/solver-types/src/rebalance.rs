//! Rebalance quotes returned by liquidity providers.

use crate::{compute_slippage, Address, AmountError, Transaction, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Token on a specific chain, with the metadata needed for amount math.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenData {
	pub chain_id: u64,
	pub address: Address,
	pub decimals: u8,
	pub symbol: String,
}

impl TokenData {
	pub fn is_same_chain(&self, other: &TokenData) -> bool {
		self.chain_id == other.chain_id
	}
}

impl fmt::Display for TokenData {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}@{}", self.symbol, self.chain_id)
	}
}

/// Rebalancing strategy implemented by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
	/// Direct CCTP burn-and-mint.
	Cctp,
	/// CCTP with a swap leg on the source and/or destination chain.
	CctpSwap,
}

impl Strategy {
	pub fn as_str(&self) -> &'static str {
		match self {
			Strategy::Cctp => "cctp",
			Strategy::CctpSwap => "cctp-swap",
		}
	}
}

impl fmt::Display for Strategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegSide {
	Source,
	Destination,
}

/// A swap performed as part of a rebalance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapLeg {
	pub side: LegSide,
	pub from_token: TokenData,
	pub to_token: TokenData,
	pub from_amount: U256,
	pub to_amount: U256,
	pub to_amount_min: U256,
	/// Spender that must be approved for `from_amount` before the swap.
	pub approval_address: Option<Address>,
	/// Swap call as returned by the aggregator, when already known.
	pub transaction: Option<Transaction>,
}

/// Priced route between two tokens, produced by one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceQuote {
	pub provider: String,
	pub strategy: Strategy,
	pub token_in: TokenData,
	pub token_out: TokenData,
	pub amount_in: U256,
	pub amount_out: U256,
	pub amount_out_min: U256,
	/// `1 - amount_out_min / amount_in`, decimals normalised. Negative means
	/// an inverted price and the quote is invalid.
	pub slippage: Decimal,
	/// Provider fee in `token_in` units.
	pub fee: U256,
	#[serde(default)]
	pub legs: Vec<SwapLeg>,
}

impl RebalanceQuote {
	/// Recomputes slippage from the quote's own amounts.
	pub fn derive_slippage(&self) -> Result<Decimal, AmountError> {
		compute_slippage(
			self.amount_in,
			self.token_in.decimals,
			self.amount_out_min,
			self.token_out.decimals,
		)
	}

	pub fn is_inverted(&self) -> bool {
		self.slippage.is_sign_negative() && !self.slippage.is_zero()
	}

	pub fn leg(&self, side: LegSide) -> Option<&SwapLeg> {
		self.legs.iter().find(|leg| leg.side == side)
	}
}
