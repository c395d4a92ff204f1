//! Liquidity rebalancing for the solver.
//!
//! Providers price routes between two tokens and describe how to execute
//! them as a sequence of stages. They hold no operation state: the
//! [`orchestrator::RebalanceOrchestrator`] persists every operation, drives
//! one stage at a time and asks the provider for the transactions, receipt
//! artifacts or external status each stage needs.

use async_trait::async_trait;
use serde_json::{Map, Value};
use solver_config::Config;
use solver_delivery::DeliveryError;
use solver_types::{
	Address, RebalanceQuote, Stage, StagePlan, Strategy, TokenData, Transaction,
	TransactionReceipt, U256,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod analysis;
pub mod orchestrator;

pub mod implementations {
	pub mod cctp;
	pub mod cctp_swap;
}

pub mod clients {
	pub mod attestation;
	pub mod swap;
}

#[cfg(test)]
pub(crate) mod test_support;

pub use analysis::{BalanceState, TokenAnalysis};
pub use orchestrator::{OrchestratorError, PollDecision, RebalanceOrchestrator};

#[derive(Debug, Error)]
pub enum ProviderError {
	#[error("Route unavailable: {0}")]
	RouteUnavailable(String),
	#[error("Network error: {0}")]
	Network(String),
	#[error("API error: {0}")]
	Api(String),
	#[error("Quote error: {0}")]
	Quote(String),
	#[error("Missing artifact '{0}'")]
	MissingArtifact(String),
	#[error("Invalid receipt: {0}")]
	InvalidReceipt(String),
	#[error("Adverse slippage: minimum out {current} below quoted {quoted}")]
	AdverseSlippage { quoted: U256, current: U256 },
	#[error("Unsupported stage: {0}")]
	UnsupportedStage(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
	#[error("Delivery error: {0}")]
	Delivery(#[from] DeliveryError),
}

impl ProviderError {
	/// Whether retrying the same step may succeed.
	pub fn is_transient(&self) -> bool {
		match self {
			ProviderError::Network(_) => true,
			ProviderError::Delivery(e) => e.is_transient(),
			_ => false,
		}
	}
}

/// What a stage needs next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAction {
	/// Transactions to submit, in order, from the operation wallet.
	Submit(Vec<Transaction>),
	/// Nothing to send; poll an external service until ready.
	Poll,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExternalStatus {
	Pending,
	Ready(Map<String, Value>),
}

/// Read-only view of an operation handed to providers.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
	pub operation_id: &'a str,
	pub wallet: Address,
	pub quote: &'a RebalanceQuote,
	pub stage_index: usize,
	pub stage: &'a Stage,
	/// Artifacts produced by earlier stages.
	pub artifacts: &'a Map<String, Value>,
}

impl StageContext<'_> {
	pub fn artifact<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, ProviderError> {
		let value = self
			.artifacts
			.get(key)
			.ok_or_else(|| ProviderError::MissingArtifact(key.to_string()))?;
		serde_json::from_value(value.clone())
			.map_err(|e| ProviderError::MissingArtifact(format!("{}: {}", key, e)))
	}
}

/// A rebalancing route implementation.
#[async_trait]
pub trait RebalanceProviderInterface: Send + Sync {
	/// Unique provider name recorded on quotes and operations.
	fn name(&self) -> &str;

	fn strategy(&self) -> Strategy;

	fn is_route_available(&self, token_in: &TokenData, token_out: &TokenData) -> bool;

	/// Prices moving `amount` of `token_in` (in its minor units) to `token_out`.
	async fn get_quote(
		&self,
		token_in: &TokenData,
		token_out: &TokenData,
		amount: U256,
	) -> Result<Vec<RebalanceQuote>, ProviderError>;

	/// Stage layout used to execute `quote`.
	fn plan(&self, quote: &RebalanceQuote) -> Vec<StagePlan>;

	async fn build_stage(&self, ctx: &StageContext<'_>) -> Result<StageAction, ProviderError>;

	/// Extracts artifacts from the confirmed receipts of a submitted stage.
	async fn on_stage_confirmed(
		&self,
		ctx: &StageContext<'_>,
		receipts: &[TransactionReceipt],
	) -> Result<Map<String, Value>, ProviderError>;

	async fn poll_stage(&self, ctx: &StageContext<'_>) -> Result<ExternalStatus, ProviderError>;
}

/// Builds every provider the configuration enables.
///
/// `wallet` is the address swap quotes are requested for.
pub fn create_providers(
	config: &Config,
	wallet: Address,
) -> Result<Vec<Arc<dyn RebalanceProviderInterface>>, ProviderError> {
	let mut providers: Vec<Arc<dyn RebalanceProviderInterface>> = Vec::new();

	let Some(cctp_config) = &config.cctp else {
		return Ok(providers);
	};
	let attestation = clients::attestation::AttestationClient::new(
		&cctp_config.attestation_api_url,
		Duration::from_secs(cctp_config.request_timeout_secs),
	)?;
	let cctp = Arc::new(implementations::cctp::CctpProvider::new(config, attestation)?);
	providers.push(cctp.clone());

	if let Some(swap_config) = &config.swap {
		let swap = clients::swap::SwapClient::new(swap_config)?;
		providers.push(Arc::new(implementations::cctp_swap::CctpSwapProvider::new(
			cctp, swap, wallet,
		)));
	}

	tracing::info!(
		providers = ?providers.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
		"Rebalance providers loaded"
	);
	Ok(providers)
}
