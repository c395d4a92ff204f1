//! Configuration types for the solver.

use crate::serde_helpers::{
	deserialize_chain_id_map, deserialize_u256, serialize_chain_id_map, serialize_u256,
};
use crate::ConfigError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solver_types::{Address, TokenData, U256};
use std::collections::HashMap;

/// Complete solver configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub solver: SolverSettings,
	#[serde(default)]
	pub storage: StorageConfig,
	#[serde(default)]
	pub account: AccountConfig,
	#[serde(
		deserialize_with = "deserialize_chain_id_map",
		serialize_with = "serialize_chain_id_map"
	)]
	pub chains: HashMap<u64, ChainConfig>,
	#[serde(default)]
	pub fees: FeesConfig,
	#[serde(default)]
	pub quote: QuoteSettings,
	#[serde(default)]
	pub permit: PermitSettings,
	#[serde(default)]
	pub rebalance: RebalanceConfig,
	pub cctp: Option<CctpConfig>,
	pub swap: Option<SwapConfig>,
	#[serde(default)]
	pub jobs: JobsConfig,
	#[serde(default)]
	pub withdrawals: WithdrawalsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolverSettings {
	/// Solver identifier used in logs.
	pub id: String,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

fn default_log_level() -> String {
	"info".to_string()
}

/// Storage backend selection. `config` is passed to the backend as is.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	#[serde(default = "default_storage_backend")]
	pub backend: String,
	#[serde(default = "empty_table")]
	pub config: toml::Value,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: default_storage_backend(),
			config: empty_table(),
		}
	}
}

fn default_storage_backend() -> String {
	"file".to_string()
}

fn empty_table() -> toml::Value {
	toml::Value::Table(toml::Table::new())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
	#[serde(default = "default_account_implementation")]
	pub implementation: String,
	#[serde(default = "empty_table")]
	pub config: toml::Value,
}

impl Default for AccountConfig {
	fn default() -> Self {
		Self {
			implementation: default_account_implementation(),
			config: empty_table(),
		}
	}
}

fn default_account_implementation() -> String {
	"local".to_string()
}

/// Chain-specific configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	pub name: String,
	pub rpc_url: String,
	/// Intent portal (inbox and vault factory) on this chain.
	pub portal: Address,
	#[serde(default = "default_confirmations")]
	pub confirmations: u64,
	/// Supported tokens keyed by symbol.
	#[serde(default)]
	pub tokens: HashMap<String, TokenConfig>,
}

fn default_confirmations() -> u64 {
	1
}

impl ChainConfig {
	pub fn token(&self, symbol: &str) -> Option<&TokenConfig> {
		self.tokens.get(symbol)
	}

	/// Looks up a token by address, returning its symbol too.
	pub fn token_by_address(&self, address: Address) -> Option<(&str, &TokenConfig)> {
		self.tokens
			.iter()
			.find(|(_, token)| token.address == address)
			.map(|(symbol, token)| (symbol.as_str(), token))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenConfig {
	pub address: Address,
	pub decimals: u8,
}

/// Fee leg for one asset class: `flat_fee + amount * scalar_bps / 10000`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeeLeg {
	#[serde(
		default,
		deserialize_with = "deserialize_u256",
		serialize_with = "serialize_u256"
	)]
	pub flat_fee: U256,
	#[serde(default)]
	pub scalar_bps: u64,
}

impl FeeLeg {
	pub fn new(flat_fee: U256, scalar_bps: u64) -> Result<Self, ConfigError> {
		let leg = Self {
			flat_fee,
			scalar_bps,
		};
		leg.validate()?;
		Ok(leg)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.scalar_bps > 10_000 {
			return Err(ConfigError::InvalidConfiguration(format!(
				"scalar_bps must be within [0, 10000], got {}",
				self.scalar_bps
			)));
		}
		Ok(())
	}
}

impl Default for FeeLeg {
	fn default() -> Self {
		Self {
			flat_fee: U256::ZERO,
			scalar_bps: 0,
		}
	}
}

/// Fees charged on route tokens (base precision) and native value (wei).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct FeeConfig {
	#[serde(default)]
	pub token: FeeLeg,
	#[serde(default)]
	pub native: FeeLeg,
}

impl FeeConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		self.token.validate()?;
		self.native.validate()
	}
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FeesConfig {
	pub default: Option<FeeConfig>,
	/// Per destination chain overrides.
	#[serde(
		default,
		deserialize_with = "deserialize_chain_id_map",
		serialize_with = "serialize_chain_id_map"
	)]
	pub chains: HashMap<u64, FeeConfig>,
}

impl FeesConfig {
	/// Fee configuration for a destination chain, falling back to the default.
	pub fn for_chain(&self, chain_id: u64) -> Option<&FeeConfig> {
		self.chains.get(&chain_id).or(self.default.as_ref())
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuoteSettings {
	#[serde(default = "default_quote_ttl_secs")]
	pub ttl_secs: u64,
	/// Extra balance required on top of the obligation, in basis points.
	#[serde(default)]
	pub balance_headroom_bps: u64,
	/// Refuse to fulfill intents whose vault is already fully funded by someone else.
	#[serde(default)]
	pub prevent_redundant_funding: bool,
}

impl Default for QuoteSettings {
	fn default() -> Self {
		Self {
			ttl_secs: default_quote_ttl_secs(),
			balance_headroom_bps: 0,
			prevent_redundant_funding: false,
		}
	}
}

fn default_quote_ttl_secs() -> u64 {
	300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PermitSettings {
	/// Permit2 deployments accepted in addition to the canonical one.
	#[serde(default)]
	pub permit2_contracts: Vec<Address>,
	#[serde(default = "default_domain_cache_ttl_secs")]
	pub domain_cache_ttl_secs: u64,
}

impl Default for PermitSettings {
	fn default() -> Self {
		Self {
			permit2_contracts: Vec::new(),
			domain_cache_ttl_secs: default_domain_cache_ttl_secs(),
		}
	}
}

fn default_domain_cache_ttl_secs() -> u64 {
	3600
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RebalanceConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_rebalance_interval_secs")]
	pub interval_secs: u64,
	/// Highest acceptable slippage as a fraction (0.005 = 0.5%).
	#[serde(default = "default_max_slippage")]
	pub max_slippage: Decimal,
	#[serde(default = "default_max_poll_attempts")]
	pub max_poll_attempts: u32,
	#[serde(default = "default_poll_base_delay_secs")]
	pub poll_base_delay_secs: u64,
	#[serde(default = "default_poll_max_delay_secs")]
	pub poll_max_delay_secs: u64,
	#[serde(default)]
	pub tokens: Vec<RebalanceTokenConfig>,
}

impl Default for RebalanceConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			interval_secs: default_rebalance_interval_secs(),
			max_slippage: default_max_slippage(),
			max_poll_attempts: default_max_poll_attempts(),
			poll_base_delay_secs: default_poll_base_delay_secs(),
			poll_max_delay_secs: default_poll_max_delay_secs(),
			tokens: Vec::new(),
		}
	}
}

fn default_rebalance_interval_secs() -> u64 {
	60
}

fn default_max_slippage() -> Decimal {
	Decimal::new(5, 3)
}

fn default_max_poll_attempts() -> u32 {
	30
}

fn default_poll_base_delay_secs() -> u64 {
	10
}

fn default_poll_max_delay_secs() -> u64 {
	300
}

/// Balance band for one token, in the token's minor units.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RebalanceTokenConfig {
	pub chain_id: u64,
	pub symbol: String,
	#[serde(deserialize_with = "deserialize_u256", serialize_with = "serialize_u256")]
	pub min_balance: U256,
	#[serde(deserialize_with = "deserialize_u256", serialize_with = "serialize_u256")]
	pub target_balance: U256,
	#[serde(deserialize_with = "deserialize_u256", serialize_with = "serialize_u256")]
	pub max_balance: U256,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CctpConfig {
	pub attestation_api_url: String,
	#[serde(default = "default_request_timeout_secs")]
	pub request_timeout_secs: u64,
	/// Symbol of the token CCTP burns and mints.
	#[serde(default = "default_cctp_token_symbol")]
	pub token_symbol: String,
	#[serde(
		deserialize_with = "deserialize_chain_id_map",
		serialize_with = "serialize_chain_id_map"
	)]
	pub chains: HashMap<u64, CctpChainConfig>,
}

fn default_request_timeout_secs() -> u64 {
	10
}

fn default_cctp_token_symbol() -> String {
	"USDC".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CctpChainConfig {
	pub domain: u32,
	pub token_messenger: Address,
	pub message_transmitter: Address,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwapConfig {
	pub api_url: String,
	pub api_key: Option<String>,
	pub integrator: Option<String>,
	/// Slippage tolerance requested from the aggregator.
	#[serde(default = "default_max_slippage")]
	pub slippage: Decimal,
	#[serde(default = "default_request_timeout_secs")]
	pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
	#[serde(default = "default_concurrency")]
	pub concurrency: usize,
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	#[serde(default = "default_initial_backoff_ms")]
	pub initial_backoff_ms: u64,
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			concurrency: default_concurrency(),
			max_attempts: default_max_attempts(),
			initial_backoff_ms: default_initial_backoff_ms(),
			max_backoff_ms: default_max_backoff_ms(),
		}
	}
}

fn default_concurrency() -> usize {
	8
}

fn default_max_attempts() -> u32 {
	5
}

fn default_initial_backoff_ms() -> u64 {
	500
}

fn default_max_backoff_ms() -> u64 {
	30_000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WithdrawalsConfig {
	#[serde(default = "default_true")]
	pub enabled: bool,
	#[serde(default = "default_withdrawal_interval_secs")]
	pub interval_secs: u64,
	#[serde(default = "default_chunk_size")]
	pub chunk_size: usize,
}

impl Default for WithdrawalsConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			interval_secs: default_withdrawal_interval_secs(),
			chunk_size: default_chunk_size(),
		}
	}
}

fn default_true() -> bool {
	true
}

fn default_withdrawal_interval_secs() -> u64 {
	300
}

fn default_chunk_size() -> usize {
	20
}

impl Config {
	pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
		self.chains.get(&chain_id)
	}

	/// Resolves a configured token to the metadata used for amount math.
	pub fn token_data(&self, chain_id: u64, symbol: &str) -> Option<TokenData> {
		let token = self.chain(chain_id)?.token(symbol)?;
		Some(TokenData {
			chain_id,
			address: token.address,
			decimals: token.decimals,
			symbol: symbol.to_string(),
		})
	}

	/// Resolves a token by address on a chain.
	pub fn token_data_by_address(&self, chain_id: u64, address: Address) -> Option<TokenData> {
		let (symbol, token) = self.chain(chain_id)?.token_by_address(address)?;
		Some(TokenData {
			chain_id,
			address,
			decimals: token.decimals,
			symbol: symbol.to_string(),
		})
	}

	/// Checks cross-section references and value ranges.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.solver.id.trim().is_empty() {
			return Err(invalid("solver.id must not be empty"));
		}
		if self.chains.is_empty() {
			return Err(invalid("At least one chain must be configured"));
		}
		for (chain_id, chain) in &self.chains {
			if !is_http_url(&chain.rpc_url) {
				return Err(invalid(format!(
					"chains.{}.rpc_url must be an http(s) URL",
					chain_id
				)));
			}
		}

		if let Some(default) = &self.fees.default {
			default.validate()?;
		}
		for (chain_id, fees) in &self.fees.chains {
			self.require_chain(*chain_id, "fees.chains")?;
			fees.validate()?;
		}

		if self.quote.balance_headroom_bps > 10_000 {
			return Err(invalid("quote.balance_headroom_bps must be within [0, 10000]"));
		}
		if self.quote.ttl_secs == 0 {
			return Err(invalid("quote.ttl_secs must be greater than zero"));
		}

		self.validate_rebalance()?;

		if let Some(cctp) = &self.cctp {
			if !is_http_url(&cctp.attestation_api_url) {
				return Err(invalid("cctp.attestation_api_url must be an http(s) URL"));
			}
			for chain_id in cctp.chains.keys() {
				self.require_chain(*chain_id, "cctp.chains")?;
				if self.token_data(*chain_id, &cctp.token_symbol).is_none() {
					return Err(invalid(format!(
						"cctp.chains.{} has no '{}' token configured",
						chain_id, cctp.token_symbol
					)));
				}
			}
		}

		if let Some(swap) = &self.swap {
			if !is_http_url(&swap.api_url) {
				return Err(invalid("swap.api_url must be an http(s) URL"));
			}
			if swap.slippage.is_sign_negative() || swap.slippage >= Decimal::ONE {
				return Err(invalid("swap.slippage must be within [0, 1)"));
			}
		}

		if self.jobs.concurrency == 0 {
			return Err(invalid("jobs.concurrency must be greater than zero"));
		}
		if self.jobs.max_attempts == 0 {
			return Err(invalid("jobs.max_attempts must be greater than zero"));
		}
		if self.withdrawals.chunk_size == 0 {
			return Err(invalid("withdrawals.chunk_size must be greater than zero"));
		}

		Ok(())
	}

	fn validate_rebalance(&self) -> Result<(), ConfigError> {
		let rebalance = &self.rebalance;
		if rebalance.max_slippage.is_sign_negative() || rebalance.max_slippage >= Decimal::ONE {
			return Err(invalid("rebalance.max_slippage must be within [0, 1)"));
		}
		if rebalance.interval_secs == 0 {
			return Err(invalid("rebalance.interval_secs must be greater than zero"));
		}
		for token in &rebalance.tokens {
			self.require_chain(token.chain_id, "rebalance.tokens")?;
			if self.token_data(token.chain_id, &token.symbol).is_none() {
				return Err(invalid(format!(
					"rebalance token {}@{} is not configured on its chain",
					token.symbol, token.chain_id
				)));
			}
			if !(token.min_balance <= token.target_balance
				&& token.target_balance <= token.max_balance)
			{
				return Err(invalid(format!(
					"rebalance token {}@{} must satisfy min <= target <= max",
					token.symbol, token.chain_id
				)));
			}
		}
		Ok(())
	}

	fn require_chain(&self, chain_id: u64, section: &str) -> Result<(), ConfigError> {
		if self.chains.contains_key(&chain_id) {
			Ok(())
		} else {
			Err(invalid(format!(
				"{} references unknown chain {}",
				section, chain_id
			)))
		}
	}
}

fn invalid(message: impl Into<String>) -> ConfigError {
	ConfigError::InvalidConfiguration(message.into())
}

fn is_http_url(url: &str) -> bool {
	url.starts_with("http://") || url.starts_with("https://")
}
