//! Balance classification against configured bands.

use serde::{Deserialize, Serialize};
use solver_config::RebalanceTokenConfig;
use solver_types::{normalize, RebalanceOperation, TokenData, COMPARISON_DECIMALS, U256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceState {
	Surplus,
	InRange,
	Deficit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAnalysis {
	pub token: TokenData,
	pub min_balance: U256,
	pub target_balance: U256,
	pub max_balance: U256,
	/// Balance read from the chain.
	pub balance: U256,
	/// Balance once pending operations settle.
	pub effective_balance: U256,
	pub state: BalanceState,
}

impl TokenAnalysis {
	pub fn new(token: TokenData, band: &RebalanceTokenConfig, balance: U256, effective: U256) -> Self {
		let state = if effective < band.min_balance {
			BalanceState::Deficit
		} else if effective > band.max_balance {
			BalanceState::Surplus
		} else {
			BalanceState::InRange
		};
		Self {
			token,
			min_balance: band.min_balance,
			target_balance: band.target_balance,
			max_balance: band.max_balance,
			balance,
			effective_balance: effective,
			state,
		}
	}

	/// Amount missing to reach the target, zero unless in deficit.
	pub fn deficit(&self) -> U256 {
		match self.state {
			BalanceState::Deficit => self.target_balance.saturating_sub(self.effective_balance),
			_ => U256::ZERO,
		}
	}

	/// Amount above the target, zero unless in surplus.
	pub fn surplus(&self) -> U256 {
		match self.state {
			BalanceState::Surplus => self.effective_balance.saturating_sub(self.target_balance),
			_ => U256::ZERO,
		}
	}

	/// Deficit at a common precision so tokens with different decimals compare.
	pub fn severity(&self) -> U256 {
		normalize(self.deficit(), self.token.decimals, COMPARISON_DECIMALS)
	}
}

fn same_token(a: &TokenData, b: &TokenData) -> bool {
	a.chain_id == b.chain_id && a.address == b.address
}

/// Balance `token` will hold once `operations` settle.
///
/// Outgoing amounts count as reserved until the first stage of the operation
/// has been broadcast; incoming amounts count at their quoted minimum until
/// the operation completes.
pub fn effective_balance(token: &TokenData, balance: U256, operations: &[RebalanceOperation]) -> U256 {
	operations
		.iter()
		.filter(|op| !op.is_terminal())
		.fold(balance, |acc, op| {
			let mut acc = acc;
			if same_token(&op.quote.token_in, token)
				&& !op.stages.first().is_some_and(|stage| stage.final_call_broadcast())
			{
				acc = acc.saturating_sub(op.quote.amount_in);
			}
			if same_token(&op.quote.token_out, token) {
				acc = acc.saturating_add(op.quote.amount_out_min);
			}
			acc
		})
}

/// Classifies every band, most severe deficit first.
pub fn classify(
	bands: &[(TokenData, RebalanceTokenConfig)],
	balances: &[U256],
	operations: &[RebalanceOperation],
) -> Vec<TokenAnalysis> {
	let mut analyses: Vec<TokenAnalysis> = bands
		.iter()
		.zip(balances)
		.map(|((token, band), balance)| {
			let effective = effective_balance(token, *balance, operations);
			TokenAnalysis::new(token.clone(), band, *balance, effective)
		})
		.collect();
	analyses.sort_by(|a, b| b.severity().cmp(&a.severity()));
	analyses
}
