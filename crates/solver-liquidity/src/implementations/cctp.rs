//! Circle CCTP burn-and-mint provider.
//!
//! USDC is burned on the source chain through the `TokenMessenger`, Circle
//! attests the emitted message and the destination `MessageTransmitter`
//! mints the same amount to the wallet.

use crate::clients::attestation::{AttestationClient, AttestationStatus};
use crate::{
	ExternalStatus, ProviderError, RebalanceProviderInterface, StageAction, StageContext,
};
use alloy::primitives::keccak256;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use solver_config::Config;
use solver_types::contracts::{IERC20, IMessageTransmitter, ITokenMessenger};
use solver_types::{
	Address, Bytes, RebalanceQuote, StageKind, StagePlan, Strategy, TokenData, Transaction,
	TransactionReceipt, B256, U256,
};
use std::collections::HashMap;

pub const MESSAGE: &str = "message";
pub const MESSAGE_HASH: &str = "message_hash";
pub const MINTED_AMOUNT: &str = "minted_amount";
pub const ATTESTATION: &str = "attestation";

/// CCTP contracts and the bridged token on one chain.
#[derive(Debug, Clone)]
pub struct CctpChain {
	pub domain: u32,
	pub token_messenger: Address,
	pub message_transmitter: Address,
	pub usdc: TokenData,
}

pub struct CctpProvider {
	chains: HashMap<u64, CctpChain>,
	attestation: AttestationClient,
}

impl CctpProvider {
	pub const NAME: &'static str = "cctp";

	pub fn new(config: &Config, attestation: AttestationClient) -> Result<Self, ProviderError> {
		let cctp = config
			.cctp
			.as_ref()
			.ok_or_else(|| ProviderError::Configuration("cctp section is missing".to_string()))?;

		let mut chains = HashMap::new();
		for (chain_id, chain) in &cctp.chains {
			let usdc = config
				.token_data(*chain_id, &cctp.token_symbol)
				.ok_or_else(|| {
					ProviderError::Configuration(format!(
						"{} is not configured on chain {}",
						cctp.token_symbol, chain_id
					))
				})?;
			chains.insert(
				*chain_id,
				CctpChain {
					domain: chain.domain,
					token_messenger: chain.token_messenger,
					message_transmitter: chain.message_transmitter,
					usdc,
				},
			);
		}

		Ok(Self {
			chains,
			attestation,
		})
	}

	pub fn chain(&self, chain_id: u64) -> Result<&CctpChain, ProviderError> {
		self.chains
			.get(&chain_id)
			.ok_or_else(|| ProviderError::RouteUnavailable(format!("chain {} has no CCTP", chain_id)))
	}

	/// Bridged token on `chain_id`, if the chain is CCTP enabled.
	pub fn usdc(&self, chain_id: u64) -> Option<&TokenData> {
		self.chains.get(&chain_id).map(|c| &c.usdc)
	}

	pub fn is_usdc(&self, token: &TokenData) -> bool {
		self.usdc(token.chain_id)
			.is_some_and(|usdc| usdc.address == token.address)
	}

	/// Whether a transfer between the two chains can be bridged.
	pub fn connects(&self, source_chain: u64, destination_chain: u64) -> bool {
		source_chain != destination_chain
			&& self.chains.contains_key(&source_chain)
			&& self.chains.contains_key(&destination_chain)
	}

	/// `approve` + `depositForBurn` minting to `recipient` on the destination.
	pub fn burn_transactions(
		&self,
		source_chain: u64,
		destination_chain: u64,
		amount: U256,
		recipient: Address,
	) -> Result<Vec<Transaction>, ProviderError> {
		let source = self.chain(source_chain)?;
		let destination = self.chain(destination_chain)?;

		let approve = IERC20::approveCall {
			spender: source.token_messenger,
			amount,
		};
		let burn = ITokenMessenger::depositForBurnCall {
			amount,
			destinationDomain: destination.domain,
			mintRecipient: recipient.into_word(),
			burnToken: source.usdc.address,
		};

		Ok(vec![
			Transaction::call(source_chain, source.usdc.address, approve.abi_encode()),
			Transaction::call(source_chain, source.token_messenger, burn.abi_encode()),
		])
	}

	/// Extracts the burn message from the `MessageSent` log of the source transmitter.
	pub fn burn_artifacts(
		&self,
		source_chain: u64,
		amount: U256,
		receipts: &[TransactionReceipt],
	) -> Result<Map<String, Value>, ProviderError> {
		let transmitter = self.chain(source_chain)?.message_transmitter;
		let log = receipts
			.iter()
			.flat_map(|r| r.logs_matching(transmitter, IMessageTransmitter::MessageSent::SIGNATURE_HASH))
			.next()
			.ok_or_else(|| {
				ProviderError::InvalidReceipt("burn receipt has no MessageSent log".to_string())
			})?;
		let event = IMessageTransmitter::MessageSent::decode_raw_log(log.topics.iter().copied(), &log.data)
			.map_err(|e| ProviderError::InvalidReceipt(format!("MessageSent: {}", e)))?;

		let message_hash = keccak256(&event.message);
		tracing::info!(
			chain_id = source_chain,
			message_hash = %message_hash,
			"Burn confirmed, awaiting attestation"
		);

		let mut artifacts = Map::new();
		artifacts.insert(MESSAGE.to_string(), to_value(&event.message)?);
		artifacts.insert(MESSAGE_HASH.to_string(), to_value(&message_hash)?);
		artifacts.insert(MINTED_AMOUNT.to_string(), to_value(&amount)?);
		Ok(artifacts)
	}

	pub async fn poll_attestation(
		&self,
		ctx: &StageContext<'_>,
	) -> Result<ExternalStatus, ProviderError> {
		let message_hash: B256 = ctx.artifact(MESSAGE_HASH)?;
		match self.attestation.fetch(message_hash).await? {
			AttestationStatus::Pending => {
				tracing::debug!(operation_id = %ctx.operation_id, %message_hash, "Attestation pending");
				Ok(ExternalStatus::Pending)
			},
			AttestationStatus::Complete(attestation) => {
				let mut artifacts = Map::new();
				artifacts.insert(ATTESTATION.to_string(), to_value(&attestation)?);
				Ok(ExternalStatus::Ready(artifacts))
			},
		}
	}

	/// `receiveMessage` on the destination transmitter.
	pub fn mint_transaction(
		&self,
		ctx: &StageContext<'_>,
		destination_chain: u64,
	) -> Result<Transaction, ProviderError> {
		let message: Bytes = ctx.artifact(MESSAGE)?;
		let attestation: Bytes = ctx.artifact(ATTESTATION)?;
		let transmitter = self.chain(destination_chain)?.message_transmitter;
		let call = IMessageTransmitter::receiveMessageCall {
			message,
			attestation,
		};
		Ok(Transaction::call(destination_chain, transmitter, call.abi_encode()))
	}
}

pub(crate) fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ProviderError> {
	serde_json::to_value(value).map_err(|e| ProviderError::Api(format!("artifact encoding: {}", e)))
}

#[async_trait]
impl RebalanceProviderInterface for CctpProvider {
	fn name(&self) -> &str {
		Self::NAME
	}

	fn strategy(&self) -> Strategy {
		Strategy::Cctp
	}

	fn is_route_available(&self, token_in: &TokenData, token_out: &TokenData) -> bool {
		self.connects(token_in.chain_id, token_out.chain_id)
			&& self.is_usdc(token_in)
			&& self.is_usdc(token_out)
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
		Ok(vec![RebalanceQuote {
			provider: Self::NAME.to_string(),
			strategy: Strategy::Cctp,
			token_in: token_in.clone(),
			token_out: token_out.clone(),
			amount_in: amount,
			amount_out: amount,
			amount_out_min: amount,
			slippage: Decimal::ZERO,
			fee: U256::ZERO,
			legs: Vec::new(),
		}])
	}

	fn plan(&self, quote: &RebalanceQuote) -> Vec<StagePlan> {
		vec![
			StagePlan::new(StageKind::Burn, quote.token_in.chain_id),
			StagePlan::new(StageKind::AwaitAttestation, quote.token_in.chain_id),
			StagePlan::new(StageKind::Mint, quote.token_out.chain_id),
		]
	}

	async fn build_stage(&self, ctx: &StageContext<'_>) -> Result<StageAction, ProviderError> {
		match ctx.stage.kind {
			StageKind::Burn => Ok(StageAction::Submit(self.burn_transactions(
				ctx.quote.token_in.chain_id,
				ctx.quote.token_out.chain_id,
				ctx.quote.amount_in,
				ctx.wallet,
			)?)),
			StageKind::AwaitAttestation => Ok(StageAction::Poll),
			StageKind::Mint => Ok(StageAction::Submit(vec![
				self.mint_transaction(ctx, ctx.quote.token_out.chain_id)?,
			])),
			other => Err(ProviderError::UnsupportedStage(other.to_string())),
		}
	}

	async fn on_stage_confirmed(
		&self,
		ctx: &StageContext<'_>,
		receipts: &[TransactionReceipt],
	) -> Result<Map<String, Value>, ProviderError> {
		match ctx.stage.kind {
			StageKind::Burn => self.burn_artifacts(ctx.stage.chain_id, ctx.quote.amount_in, receipts),
			_ => Ok(Map::new()),
		}
	}

	async fn poll_stage(&self, ctx: &StageContext<'_>) -> Result<ExternalStatus, ProviderError> {
		match ctx.stage.kind {
			StageKind::AwaitAttestation => self.poll_attestation(ctx).await,
			other => Err(ProviderError::UnsupportedStage(other.to_string())),
		}
	}
}
