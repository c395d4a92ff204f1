//! CCTP bridge composed with aggregator swaps on either side.
//!
//! `tokenIn -> USDC` on the source chain, burn and mint, then
//! `USDC -> tokenOut` on the destination chain. Either swap is omitted when
//! that side already is USDC.

use super::cctp::{to_value, CctpProvider, MINTED_AMOUNT};
use crate::clients::swap::SwapClient;
use crate::{
	ExternalStatus, ProviderError, RebalanceProviderInterface, StageAction, StageContext,
};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use solver_types::contracts::IERC20;
use solver_types::{
	Address, LegSide, RebalanceQuote, StageKind, StagePlan, Strategy, SwapLeg, TokenData,
	Transaction, TransactionReceipt, U256,
};
use std::sync::Arc;

/// Amount the burn stage moves, set once the source swap is confirmed.
pub const BRIDGE_AMOUNT: &str = "bridge_amount";

pub struct CctpSwapProvider {
	cctp: Arc<CctpProvider>,
	swap: SwapClient,
	wallet: Address,
}

impl CctpSwapProvider {
	pub const NAME: &'static str = "cctp-swap";

	pub fn new(cctp: Arc<CctpProvider>, swap: SwapClient, wallet: Address) -> Self {
		Self { cctp, swap, wallet }
	}

	fn usdc(&self, chain_id: u64) -> Result<TokenData, ProviderError> {
		self.cctp
			.usdc(chain_id)
			.cloned()
			.ok_or_else(|| ProviderError::RouteUnavailable(format!("chain {} has no CCTP", chain_id)))
	}

	/// Amount burned when no artifact overrides it: the source leg minimum,
	/// or the input itself when there is no source swap.
	fn quoted_bridge_amount(quote: &RebalanceQuote) -> U256 {
		quote
			.leg(LegSide::Source)
			.map(|leg| leg.to_amount_min)
			.unwrap_or(quote.amount_in)
	}

	/// Re-quotes a recorded leg and refuses a worse minimum.
	async fn requote(&self, recorded: &SwapLeg, amount: U256) -> Result<SwapLeg, ProviderError> {
		let fresh = self
			.swap
			.quote(recorded.side, &recorded.from_token, &recorded.to_token, amount, self.wallet)
			.await?;
		if fresh.to_amount_min < recorded.to_amount_min {
			tracing::warn!(
				side = ?recorded.side,
				quoted = %recorded.to_amount_min,
				current = %fresh.to_amount_min,
				"Swap minimum moved below the quoted leg"
			);
			return Err(ProviderError::AdverseSlippage {
				quoted: recorded.to_amount_min,
				current: fresh.to_amount_min,
			});
		}
		Ok(fresh)
	}

	/// Approval (when the aggregator needs one) followed by the swap call.
	fn swap_transactions(leg: &SwapLeg) -> Result<Vec<Transaction>, ProviderError> {
		let swap = leg
			.transaction
			.clone()
			.ok_or_else(|| ProviderError::Api("swap quote has no transaction".to_string()))?;

		let mut transactions = Vec::with_capacity(2);
		if let Some(spender) = leg.approval_address {
			let approve = IERC20::approveCall {
				spender,
				amount: leg.from_amount,
			};
			transactions.push(Transaction::call(
				leg.from_token.chain_id,
				leg.from_token.address,
				approve.abi_encode(),
			));
		}
		transactions.push(swap);
		Ok(transactions)
	}

	fn recorded_leg<'a>(ctx: &'a StageContext<'_>, side: LegSide) -> Result<&'a SwapLeg, ProviderError> {
		ctx.quote
			.leg(side)
			.ok_or_else(|| ProviderError::UnsupportedStage(format!("quote has no {:?} leg", side)))
	}
}

#[async_trait]
impl RebalanceProviderInterface for CctpSwapProvider {
	fn name(&self) -> &str {
		Self::NAME
	}

	fn strategy(&self) -> Strategy {
		Strategy::CctpSwap
	}

	fn is_route_available(&self, token_in: &TokenData, token_out: &TokenData) -> bool {
		self.cctp.connects(token_in.chain_id, token_out.chain_id)
			&& !(self.cctp.is_usdc(token_in) && self.cctp.is_usdc(token_out))
	}

	async fn get_quote(
		&self,
		token_in: &TokenData,
		token_out: &TokenData,
		amount: U256,
	) -> Result<Vec<RebalanceQuote>, ProviderError> {
		if !self.is_route_available(token_in, token_out) {
			return Err(ProviderError::RouteUnavailable(format!(
				"{} -> {}",
				token_in, token_out
			)));
		}
		let source_usdc = self.usdc(token_in.chain_id)?;
		let destination_usdc = self.usdc(token_out.chain_id)?;

		let mut legs = Vec::new();
		let bridged = if self.cctp.is_usdc(token_in) {
			amount
		} else {
			let leg = self
				.swap
				.quote(LegSide::Source, token_in, &source_usdc, amount, self.wallet)
				.await?;
			let bridged = leg.to_amount_min;
			legs.push(leg);
			bridged
		};

		let (amount_out, amount_out_min) = if self.cctp.is_usdc(token_out) {
			(bridged, bridged)
		} else {
			let leg = self
				.swap
				.quote(LegSide::Destination, &destination_usdc, token_out, bridged, self.wallet)
				.await?;
			let out = (leg.to_amount, leg.to_amount_min);
			legs.push(leg);
			out
		};

		let mut quote = RebalanceQuote {
			provider: Self::NAME.to_string(),
			strategy: Strategy::CctpSwap,
			token_in: token_in.clone(),
			token_out: token_out.clone(),
			amount_in: amount,
			amount_out,
			amount_out_min,
			slippage: Decimal::ZERO,
			fee: U256::ZERO,
			legs,
		};
		quote.slippage = quote
			.derive_slippage()
			.map_err(|e| ProviderError::Quote(e.to_string()))?;

		tracing::debug!(
			route = %format!("{} -> {}", token_in, token_out),
			amount_in = %amount,
			amount_out_min = %amount_out_min,
			slippage = %quote.slippage,
			"CCTP swap quote"
		);
		Ok(vec![quote])
	}

	fn plan(&self, quote: &RebalanceQuote) -> Vec<StagePlan> {
		let source = quote.token_in.chain_id;
		let destination = quote.token_out.chain_id;

		let mut plan = Vec::with_capacity(5);
		if quote.leg(LegSide::Source).is_some() {
			plan.push(StagePlan::new(StageKind::SourceSwap, source));
		}
		plan.push(StagePlan::new(StageKind::Burn, source));
		plan.push(StagePlan::new(StageKind::AwaitAttestation, source));
		plan.push(StagePlan::new(StageKind::Mint, destination));
		if quote.leg(LegSide::Destination).is_some() {
			plan.push(StagePlan::new(StageKind::DestinationSwap, destination));
		}
		plan
	}

	async fn build_stage(&self, ctx: &StageContext<'_>) -> Result<StageAction, ProviderError> {
		let source = ctx.quote.token_in.chain_id;
		let destination = ctx.quote.token_out.chain_id;

		match ctx.stage.kind {
			StageKind::SourceSwap => {
				let recorded = Self::recorded_leg(ctx, LegSide::Source)?;
				let leg = self.requote(recorded, ctx.quote.amount_in).await?;
				Ok(StageAction::Submit(Self::swap_transactions(&leg)?))
			},
			StageKind::Burn => {
				let amount = ctx
					.artifact::<U256>(BRIDGE_AMOUNT)
					.unwrap_or_else(|_| Self::quoted_bridge_amount(ctx.quote));
				Ok(StageAction::Submit(self.cctp.burn_transactions(
					source,
					destination,
					amount,
					ctx.wallet,
				)?))
			},
			StageKind::AwaitAttestation => Ok(StageAction::Poll),
			StageKind::Mint => Ok(StageAction::Submit(vec![
				self.cctp.mint_transaction(ctx, destination)?,
			])),
			StageKind::DestinationSwap => {
				let recorded = Self::recorded_leg(ctx, LegSide::Destination)?;
				let minted: U256 = ctx.artifact(MINTED_AMOUNT)?;
				let leg = self.requote(recorded, minted).await?;
				Ok(StageAction::Submit(Self::swap_transactions(&leg)?))
			},
		}
	}

	async fn on_stage_confirmed(
		&self,
		ctx: &StageContext<'_>,
		receipts: &[TransactionReceipt],
	) -> Result<Map<String, Value>, ProviderError> {
		match ctx.stage.kind {
			StageKind::SourceSwap => {
				let mut artifacts = Map::new();
				artifacts.insert(
					BRIDGE_AMOUNT.to_string(),
					to_value(&Self::quoted_bridge_amount(ctx.quote))?,
				);
				Ok(artifacts)
			},
			StageKind::Burn => {
				let amount = ctx
					.artifact::<U256>(BRIDGE_AMOUNT)
					.unwrap_or_else(|_| Self::quoted_bridge_amount(ctx.quote));
				self.cctp.burn_artifacts(ctx.stage.chain_id, amount, receipts)
			},
			_ => Ok(Map::new()),
		}
	}

	async fn poll_stage(&self, ctx: &StageContext<'_>) -> Result<ExternalStatus, ProviderError> {
		match ctx.stage.kind {
			StageKind::AwaitAttestation => self.cctp.poll_attestation(ctx).await,
			other => Err(ProviderError::UnsupportedStage(other.to_string())),
		}
	}
}
