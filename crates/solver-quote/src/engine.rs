//! Forward quotes, reverse quotes and fulfillment approval.
//!
//! Route token obligations are normalised to [`BASE_DECIMALS`] before
//! summing, so the token fee is charged once over the whole route in base
//! precision and then spread back over the reward tokens in their own
//! precision. Native value is priced separately in wei.

use crate::fee::{compute_fee, reverse_fee};
use crate::QuoteError;
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};
use solver_account::AccountService;
use solver_config::{Config, FeeConfig};
use solver_delivery::DeliveryService;
use solver_storage::StorageService;
use solver_types::contracts::{IPortal, IERC20};
use solver_types::intent::abi;
use solver_types::{
	apply_bps, chain_group_key, normalize, truncate_id, Address, Bytes, Clock, EventBus,
	ExecutionPlan, ExecutionType, Intent, Permit2Payload, PermitEntry, Quote, QuoteEvent,
	ReverseQuote, RouteLimit, SolverEvent, TokenAmount, Transaction, VaultStatus, BASE_DECIMALS,
	U256,
};
use solver_validators::{PermitValidationArgs, PermitValidator, VaultValidator};
use std::sync::Arc;
use std::time::Duration;

pub const QUOTES_NAMESPACE: &str = "quotes";
pub const INTENTS_NAMESPACE: &str = "intents";

const FULL_BPS: u64 = 10_000;

/// Incoming quote request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
	pub intent: Intent,
	pub execution_type: ExecutionType,
	/// Account whose permits fund the vault. Defaults to the reward creator.
	#[serde(default)]
	pub funder: Option<Address>,
	/// Vault that pulls the reward; the permit spender for gasless execution.
	#[serde(default)]
	pub vault: Option<Address>,
	#[serde(default)]
	pub permits: Option<Vec<PermitEntry>>,
	#[serde(default)]
	pub permit2: Option<Permit2Payload>,
}

/// Destination token the solver must provide.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TokenObligation {
	token: Address,
	decimals: u8,
	amount: U256,
}

#[derive(Debug, Default)]
struct Obligations {
	tokens: Vec<TokenObligation>,
	/// Sum of token obligations in base precision.
	base_total: U256,
	/// Native value in wei.
	native: U256,
}

pub struct QuoteEngine {
	config: Arc<Config>,
	delivery: Arc<DeliveryService>,
	account: Arc<AccountService>,
	storage: Arc<StorageService>,
	permits: Arc<PermitValidator>,
	vaults: Arc<VaultValidator>,
	clock: Arc<dyn Clock>,
	event_bus: EventBus,
}

impl QuoteEngine {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		config: Arc<Config>,
		delivery: Arc<DeliveryService>,
		account: Arc<AccountService>,
		storage: Arc<StorageService>,
		permits: Arc<PermitValidator>,
		vaults: Arc<VaultValidator>,
		clock: Arc<dyn Clock>,
		event_bus: EventBus,
	) -> Self {
		Self {
			config,
			delivery,
			account,
			storage,
			permits,
			vaults,
			clock,
			event_bus,
		}
	}

	/// Prices an intent and issues a signed quote.
	pub async fn quote(&self, request: QuoteRequest) -> Result<Quote, QuoteError> {
		let intent_hash = request.intent.hash;
		match self.build_quote(&request).await {
			Ok(quote) => {
				tracing::info!(
					quote_id = %quote.id,
					intent_hash = %truncate_id(&intent_hash.to_string()),
					execution_type = quote.execution_type.as_str(),
					"Issued quote"
				);
				self.event_bus.publish(SolverEvent::Quote(QuoteEvent::Issued {
					quote_id: quote.id.clone(),
					intent_hash,
				}));
				Ok(quote)
			},
			Err(e) => {
				tracing::info!(
					intent_hash = %truncate_id(&intent_hash.to_string()),
					code = e.code(),
					"Rejected quote request: {}",
					e
				);
				self.event_bus.publish(SolverEvent::Quote(QuoteEvent::Rejected {
					intent_hash,
					code: e.code().to_string(),
					reason: e.to_string(),
				}));
				Err(e)
			},
		}
	}

	async fn build_quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
		let intent = &request.intent;
		if !intent.verify_hash() {
			return Err(QuoteError::InvalidRequest(
				"intent hash does not match its route and reward".to_string(),
			));
		}

		let obligations = self.route_obligations(intent)?;
		let rewards = self.reward_decimals(intent)?;
		let fees = self.fee_config(intent.destination_chain)?;

		let fee = if obligations.base_total.is_zero() {
			U256::ZERO
		} else {
			compute_fee(obligations.base_total, &fees.token)
		};
		let native_fee = if obligations.native.is_zero() {
			U256::ZERO
		} else {
			compute_fee(obligations.native, &fees.native)
		};
		let required_reward = distribute(obligations.base_total.saturating_add(fee), &rewards)?;
		let required_native = obligations.native.saturating_add(native_fee);

		self.check_balances(intent.destination_chain, &obligations)
			.await?;

		if request.execution_type == ExecutionType::Gasless {
			self.check_gasless(request).await?;
		}

		let now = self.clock.now();
		let ttl = self.config.quote.ttl_secs;
		let mut quote = Quote {
			id: uuid::Uuid::new_v4().to_string(),
			intent_hash: intent.hash,
			execution_type: request.execution_type,
			required_reward,
			required_native,
			fee,
			native_fee,
			issued_at: now,
			expiry: now + ttl,
			solver: self.account.address(),
			signature: Bytes::new(),
		};
		let signature = self.account.sign_hash(&quote.digest()).await?;
		quote.signature = Bytes::from(signature.as_bytes().to_vec());

		// Kept past expiry so late approvals report the expiry itself.
		let retention = Some(Duration::from_secs(ttl.saturating_mul(2)));
		self.storage
			.store_with_ttl(QUOTES_NAMESPACE, &quote.id, &quote, retention)
			.await?;
		self.storage
			.store_with_ttl(INTENTS_NAMESPACE, &intent.hash.to_string(), intent, retention)
			.await?;

		Ok(quote)
	}

	async fn check_gasless(&self, request: &QuoteRequest) -> Result<(), QuoteError> {
		let intent = &request.intent;
		let vault = request.vault.ok_or_else(|| {
			QuoteError::InvalidRequest("gasless execution requires a vault address".to_string())
		})?;

		self.permits
			.validate(PermitValidationArgs {
				chain_id: intent.source_chain,
				owner: request.funder.unwrap_or(intent.reward.creator),
				spender: vault,
				reward: &intent.reward.tokens,
				permits: request.permits.as_deref(),
				permit2: request.permit2.as_ref(),
			})
			.await?;

		let portal = self.portal(intent.source_chain)?;
		let status = self
			.vaults
			.get_vault_status(intent.source_chain, portal, intent.hash)
			.await?;
		if VaultValidator::is_vault_stale(status) {
			return Err(QuoteError::VaultStale);
		}
		if self.config.quote.prevent_redundant_funding && status == VaultStatus::FullyFunded {
			return Err(QuoteError::VaultAlreadyFunded);
		}
		Ok(())
	}

	/// Largest route the solver would serve for the reward the intent offers.
	pub async fn reverse_quote(
		&self,
		intent: &Intent,
		execution_type: ExecutionType,
	) -> Result<ReverseQuote, QuoteError> {
		let obligations = self.route_obligations(intent)?;
		let rewards = self.reward_decimals(intent)?;
		let fees = self.fee_config(intent.destination_chain)?;
		let destination = intent.destination_chain;
		let solver = self.account.address();

		let reward_base = rewards.iter().fold(U256::ZERO, |acc, (reward, decimals)| {
			acc.saturating_add(normalize(reward.amount, *decimals, BASE_DECIMALS))
		});
		let by_reward = reverse_fee(reward_base, &fees.token);

		let capacity_tokens: Vec<(Address, u8)> = if obligations.tokens.is_empty() {
			self.config
				.chain(destination)
				.map(|chain| chain.tokens.values().map(|t| (t.address, t.decimals)).collect())
				.unwrap_or_default()
		} else {
			obligations
				.tokens
				.iter()
				.map(|o| (o.token, o.decimals))
				.collect()
		};
		let mut capacity = U256::ZERO;
		for (token, decimals) in capacity_tokens {
			let balance = self
				.delivery
				.token_balance(destination, token, solver)
				.await?;
			capacity = capacity.saturating_add(normalize(
				self.without_headroom(balance),
				decimals,
				BASE_DECIMALS,
			));
		}

		let (max_route_value, limited_by) = if by_reward <= capacity {
			(by_reward, RouteLimit::Reward)
		} else {
			(capacity, RouteLimit::Balance)
		};

		let native_balance = self.delivery.native_balance(destination, solver).await?;
		let max_native_value = reverse_fee(intent.reward.native_amount, &fees.native)
			.min(self.without_headroom(native_balance));

		tracing::debug!(
			intent_hash = %truncate_id(&intent.hash.to_string()),
			execution_type = execution_type.as_str(),
			%max_route_value,
			?limited_by,
			"Computed reverse quote"
		);

		Ok(ReverseQuote {
			intent_hash: intent.hash,
			max_route_value,
			max_native_value,
			limited_by,
			expiry: self.clock.now() + self.config.quote.ttl_secs,
		})
	}

	/// Turns a recorded quote into the transactions that fulfill `intent`.
	pub async fn approve_fulfillment(
		&self,
		quote_id: &str,
		intent: &Intent,
	) -> Result<ExecutionPlan, QuoteError> {
		let quote: Quote = self
			.storage
			.find(QUOTES_NAMESPACE, quote_id)
			.await?
			.ok_or_else(|| QuoteError::QuoteNotFound(quote_id.to_string()))?;

		if quote.is_expired(self.clock.now()) {
			return Err(QuoteError::QuoteExpired(quote.id));
		}
		if quote.intent_hash != intent.hash || !intent.verify_hash() {
			return Err(QuoteError::IntentMismatch(quote.id));
		}
		check_reward_covers(&quote, intent)?;

		let portal = self.portal(intent.source_chain)?;
		let funded = self
			.vaults
			.is_vault_funded(intent.source_chain, portal, intent.hash, false)
			.await?;
		if !funded {
			let status = self
				.vaults
				.get_vault_status(intent.source_chain, portal, intent.hash)
				.await?;
			return Err(if VaultValidator::is_vault_stale(status) {
				QuoteError::VaultStale
			} else {
				QuoteError::VaultNotFunded
			});
		}

		let obligations = self.route_obligations(intent)?;
		self.check_balances(intent.destination_chain, &obligations)
			.await?;

		let destination = intent.destination_chain;
		let mut transactions: Vec<Transaction> = obligations
			.tokens
			.iter()
			.map(|o| {
				let approve = IERC20::approveCall {
					spender: intent.route.portal,
					amount: o.amount,
				};
				Transaction::call(destination, o.token, approve.abi_encode())
			})
			.collect();

		let fulfill = IPortal::fulfillCall {
			intentHash: intent.hash,
			route: abi::Route::from(&intent.route),
			rewardHash: intent.reward.hash(),
			claimant: self.account.address().into_word(),
		};
		transactions.push(
			Transaction::call(destination, intent.route.portal, fulfill.abi_encode())
				.with_value(intent.route.native_obligation()),
		);

		tracing::info!(
			quote_id = %quote.id,
			intent_hash = %truncate_id(&intent.hash.to_string()),
			chain_id = destination,
			transactions = transactions.len(),
			"Approved fulfillment"
		);
		self.event_bus
			.publish(SolverEvent::Quote(QuoteEvent::FulfillmentApproved {
				quote_id: quote.id.clone(),
				intent_hash: intent.hash,
			}));

		Ok(ExecutionPlan {
			quote_id: quote.id,
			intent_hash: intent.hash,
			chain_id: destination,
			group_key: chain_group_key(destination),
			transactions,
		})
	}

	/// Resolves route tokens on the destination chain and sums them.
	fn route_obligations(&self, intent: &Intent) -> Result<Obligations, QuoteError> {
		if self.config.chain(intent.source_chain).is_none() {
			return Err(QuoteError::UnsupportedRoute(format!(
				"source chain {} is not supported",
				intent.source_chain
			)));
		}
		let destination = self.config.chain(intent.destination_chain).ok_or_else(|| {
			QuoteError::UnsupportedRoute(format!(
				"destination chain {} is not supported",
				intent.destination_chain
			))
		})?;

		let mut obligations = Obligations {
			native: intent.route.native_obligation(),
			..Default::default()
		};
		for route_token in &intent.route.tokens {
			let (_, token) = destination
				.token_by_address(route_token.token)
				.ok_or_else(|| {
					QuoteError::UnsupportedRoute(format!(
						"route token {} is not supported on chain {}",
						route_token.token, intent.destination_chain
					))
				})?;

			obligations.base_total = obligations.base_total.saturating_add(normalize(
				route_token.amount,
				token.decimals,
				BASE_DECIMALS,
			));
			match obligations
				.tokens
				.iter_mut()
				.find(|o| o.token == route_token.token)
			{
				Some(existing) => existing.amount = existing.amount.saturating_add(route_token.amount),
				None => obligations.tokens.push(TokenObligation {
					token: route_token.token,
					decimals: token.decimals,
					amount: route_token.amount,
				}),
			}
		}
		Ok(obligations)
	}

	/// Reward tokens paired with their decimals on the source chain.
	fn reward_decimals(&self, intent: &Intent) -> Result<Vec<(TokenAmount, u8)>, QuoteError> {
		let source = self.config.chain(intent.source_chain).ok_or_else(|| {
			QuoteError::UnsupportedRoute(format!(
				"source chain {} is not supported",
				intent.source_chain
			))
		})?;
		intent
			.reward
			.tokens
			.iter()
			.map(|reward| {
				source
					.token_by_address(reward.token)
					.map(|(_, token)| (reward.clone(), token.decimals))
					.ok_or_else(|| {
						QuoteError::UnsupportedRoute(format!(
							"reward token {} is not supported on chain {}",
							reward.token, intent.source_chain
						))
					})
			})
			.collect()
	}

	fn fee_config(&self, chain_id: u64) -> Result<&FeeConfig, QuoteError> {
		self.config
			.fees
			.for_chain(chain_id)
			.ok_or(QuoteError::FeeConfigurationMissing(chain_id))
	}

	fn portal(&self, chain_id: u64) -> Result<Address, QuoteError> {
		self.config
			.chain(chain_id)
			.map(|chain| chain.portal)
			.ok_or_else(|| QuoteError::UnsupportedRoute(format!("chain {} is not supported", chain_id)))
	}

	fn with_headroom(&self, amount: U256) -> U256 {
		apply_bps(amount, FULL_BPS + self.config.quote.balance_headroom_bps)
	}

	fn without_headroom(&self, balance: U256) -> U256 {
		balance.saturating_mul(U256::from(FULL_BPS))
			/ U256::from(FULL_BPS + self.config.quote.balance_headroom_bps)
	}

	async fn check_balances(&self, chain_id: u64, obligations: &Obligations) -> Result<(), QuoteError> {
		let solver = self.account.address();
		for obligation in &obligations.tokens {
			let required = self.with_headroom(obligation.amount);
			let available = self
				.delivery
				.token_balance(chain_id, obligation.token, solver)
				.await?;
			if available < required {
				return Err(QuoteError::InsufficientBalance {
					token: obligation.token,
					required,
					available,
				});
			}
		}

		if !obligations.native.is_zero() {
			let required = self.with_headroom(obligations.native);
			let available = self.delivery.native_balance(chain_id, solver).await?;
			if available < required {
				return Err(QuoteError::InsufficientBalance {
					token: Address::ZERO,
					required,
					available,
				});
			}
		}
		Ok(())
	}
}

/// Spreads a base-precision requirement over the reward tokens in order.
///
/// Each token covers up to what the intent offers in it; the last one takes
/// whatever remains. Amounts are rounded up into each token's precision.
fn distribute(required: U256, rewards: &[(TokenAmount, u8)]) -> Result<Vec<TokenAmount>, QuoteError> {
	if required.is_zero() {
		return Ok(Vec::new());
	}
	if rewards.is_empty() {
		return Err(QuoteError::UnsupportedRoute(
			"intent offers no reward tokens".to_string(),
		));
	}

	let mut remaining = required;
	let mut distributed = Vec::new();
	for (index, (reward, decimals)) in rewards.iter().enumerate() {
		if remaining.is_zero() {
			break;
		}
		let take = if index + 1 == rewards.len() {
			remaining
		} else {
			remaining.min(normalize(reward.amount, *decimals, BASE_DECIMALS))
		};
		if take.is_zero() {
			continue;
		}
		remaining -= take;
		distributed.push(TokenAmount::new(reward.token, denormalize_ceil(take, *decimals)));
	}
	Ok(distributed)
}

fn denormalize_ceil(amount: U256, decimals: u8) -> U256 {
	if decimals >= BASE_DECIMALS {
		return normalize(amount, BASE_DECIMALS, decimals);
	}
	let factor = U256::from(10u64).pow(U256::from(BASE_DECIMALS - decimals));
	amount.div_ceil(factor)
}

fn check_reward_covers(quote: &Quote, intent: &Intent) -> Result<(), QuoteError> {
	for required in &quote.required_reward {
		let offered = intent
			.reward
			.tokens
			.iter()
			.filter(|t| t.token == required.token)
			.fold(U256::ZERO, |acc, t| acc.saturating_add(t.amount));
		if offered < required.amount {
			return Err(QuoteError::InsufficientReward {
				token: required.token,
				offered,
				required: required.amount,
			});
		}
	}
	if intent.reward.native_amount < quote.required_native {
		return Err(QuoteError::InsufficientReward {
			token: Address::ZERO,
			offered: intent.reward.native_amount,
			required: quote.required_native,
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{address, Signature, B256};
	use alloy::signers::local::PrivateKeySigner;
	use solver_account::implementations::local::LocalWallet;
	use solver_config::ConfigLoader;
	use solver_delivery::testing::MockChain;
	use solver_delivery::DeliveryInterface;
	use solver_storage::implementations::memory::MemoryStorage;
	use solver_types::{ManualClock, Reward, Route};
	use solver_validators::{PermitError, TokenDomainResolver};
	use std::collections::HashMap;

	const SOURCE: u64 = 42161;
	const DEST: u64 = 10;
	const USDC_SRC: Address = address!("0xaf88d065e77c8cC2239327C5EDb3A432268e5831");
	const USDC_DST: Address = address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85");
	const PORTAL_SRC: Address = address!("0x0000000000000000000000000000000000000a0a");
	const PORTAL_DST: Address = address!("0x0000000000000000000000000000000000000b0b");
	const NOW: u64 = 1_700_000_000;

	const CONFIG: &str = r#"
[solver]
id = "quote-test"

[chains.42161]
name = "arbitrum"
rpc_url = "http://localhost:8545"
portal = "0x0000000000000000000000000000000000000a0a"

[chains.42161.tokens.USDC]
address = "0xaf88d065e77c8cC2239327C5EDb3A432268e5831"
decimals = 6

[chains.10]
name = "optimism"
rpc_url = "http://localhost:8546"
portal = "0x0000000000000000000000000000000000000b0b"

[chains.10.tokens.USDC]
address = "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"
decimals = 6

[fees.default.token]
scalar_bps = 30
"#;

	fn usdc(amount: u64) -> U256 {
		U256::from(amount) * U256::from(1_000_000u64)
	}

	struct Fixture {
		engine: QuoteEngine,
		source: Arc<MockChain>,
		dest: Arc<MockChain>,
		clock: Arc<ManualClock>,
		solver: Address,
	}

	fn fixture_with(config: &str) -> Fixture {
		let config = Arc::new(
			ConfigLoader::new()
				.with_env_prefix("SOLVER_QUOTE_TEST_")
				.load_from_str(config)
				.unwrap(),
		);
		let signer = PrivateKeySigner::random();
		let solver = signer.address();
		let account = Arc::new(AccountService::new(Box::new(LocalWallet::from_signer(signer))));

		let source = Arc::new(MockChain::new(SOURCE, solver));
		let dest = Arc::new(MockChain::new(DEST, solver));
		let mut implementations: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
		implementations.insert(SOURCE, source.clone());
		implementations.insert(DEST, dest.clone());
		let delivery = Arc::new(DeliveryService::new(implementations));

		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let clock = Arc::new(ManualClock::new(NOW));
		let domains = Arc::new(TokenDomainResolver::new(
			delivery.clone(),
			storage.clone(),
			Duration::from_secs(60),
		));
		let permits = Arc::new(PermitValidator::new(
			delivery.clone(),
			domains,
			clock.clone(),
			Vec::new(),
		));
		let vaults = Arc::new(VaultValidator::new(delivery.clone()));

		let engine = QuoteEngine::new(
			config,
			delivery,
			account,
			storage,
			permits,
			vaults,
			clock.clone(),
			EventBus::default(),
		);
		Fixture {
			engine,
			source,
			dest,
			clock,
			solver,
		}
	}

	fn fixture() -> Fixture {
		fixture_with(CONFIG)
	}

	fn intent(route_amount: U256, reward_amount: U256) -> Intent {
		let route = Route {
			salt: B256::repeat_byte(0x07),
			deadline: NOW + 3600,
			portal: PORTAL_DST,
			native_amount: U256::ZERO,
			tokens: vec![TokenAmount::new(USDC_DST, route_amount)],
			calls: vec![],
		};
		let reward = Reward {
			deadline: NOW + 7200,
			creator: address!("0x00000000000000000000000000000000000000c1"),
			prover: address!("0x00000000000000000000000000000000000000d1"),
			native_amount: U256::ZERO,
			tokens: vec![TokenAmount::new(USDC_SRC, reward_amount)],
		};
		Intent::new(SOURCE, DEST, route, reward)
	}

	fn request(intent: Intent) -> QuoteRequest {
		QuoteRequest {
			intent,
			execution_type: ExecutionType::SelfPublish,
			funder: None,
			vault: None,
			permits: None,
			permit2: None,
		}
	}

	#[tokio::test]
	async fn test_required_reward_includes_fee() {
		let f = fixture();
		f.dest.set_token_balance(USDC_DST, f.solver, usdc(5000));

		let quote = f
			.engine
			.quote(request(intent(usdc(1000), usdc(1003))))
			.await
			.unwrap();

		assert_eq!(quote.required_reward, vec![TokenAmount::new(USDC_SRC, usdc(1003))]);
		assert_eq!(quote.fee, usdc(3));
		assert_eq!(quote.required_native, U256::ZERO);
		assert_eq!(quote.expiry, NOW + 300);

		let signature = Signature::try_from(quote.signature.as_ref()).unwrap();
		let signer = signature.recover_address_from_prehash(&quote.digest()).unwrap();
		assert_eq!(signer, f.solver);
	}

	#[tokio::test]
	async fn test_insufficient_destination_balance() {
		let f = fixture();
		f.dest.set_token_balance(USDC_DST, f.solver, usdc(500));

		let result = f.engine.quote(request(intent(usdc(1000), usdc(1003)))).await;

		match result {
			Err(QuoteError::InsufficientBalance {
				token,
				required,
				available,
			}) => {
				assert_eq!(token, USDC_DST);
				assert_eq!(required, usdc(1000));
				assert_eq!(available, usdc(500));
			},
			other => panic!("expected InsufficientBalance, got {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_headroom_raises_required_balance() {
		let config = CONFIG.replace("[fees.default.token]", "[quote]\nbalance_headroom_bps = 1000\n\n[fees.default.token]");
		let f = fixture_with(&config);
		f.dest.set_token_balance(USDC_DST, f.solver, usdc(1050));

		let result = f.engine.quote(request(intent(usdc(1000), usdc(1003)))).await;
		assert!(matches!(
			result,
			Err(QuoteError::InsufficientBalance { required, .. }) if required == usdc(1100)
		));
	}

	#[tokio::test]
	async fn test_unsupported_route_token() {
		let f = fixture();
		let mut intent = intent(usdc(1000), usdc(1003));
		intent.route.tokens[0].token = address!("0x00000000000000000000000000000000000000ff");
		let intent = Intent::new(SOURCE, DEST, intent.route, intent.reward);

		let result = f.engine.quote(request(intent)).await;
		assert!(matches!(result, Err(QuoteError::UnsupportedRoute(msg)) if msg.contains("route token")));
	}

	#[tokio::test]
	async fn test_missing_fee_configuration() {
		let config = CONFIG.replace("[fees.default.token]\nscalar_bps = 30\n", "");
		let f = fixture_with(&config);
		f.dest.set_token_balance(USDC_DST, f.solver, usdc(5000));

		let result = f.engine.quote(request(intent(usdc(1000), usdc(1003)))).await;
		assert!(matches!(result, Err(QuoteError::FeeConfigurationMissing(DEST))));
	}

	#[tokio::test]
	async fn test_tampered_intent_hash_rejected() {
		let f = fixture();
		let mut intent = intent(usdc(1000), usdc(1003));
		intent.reward.tokens[0].amount = usdc(2000);

		let result = f.engine.quote(request(intent)).await;
		assert!(matches!(result, Err(QuoteError::InvalidRequest(_))));
	}

	#[tokio::test]
	async fn test_gasless_with_expired_permit() {
		let f = fixture();
		f.dest.set_token_balance(USDC_DST, f.solver, usdc(5000));
		let mut request = request(intent(usdc(1000), usdc(1003)));
		request.execution_type = ExecutionType::Gasless;
		request.vault = Some(address!("0x00000000000000000000000000000000000000f1"));
		request.permits = Some(vec![PermitEntry {
			token: USDC_SRC,
			amount: None,
			deadline: NOW - 10,
			signature: Bytes::from(vec![1u8; 65]),
		}]);

		let result = f.engine.quote(request).await;
		assert!(matches!(
			result,
			Err(QuoteError::InvalidAuthorization(PermitError::PermitExpired { .. }))
		));
	}

	#[tokio::test]
	async fn test_gasless_requires_vault() {
		let f = fixture();
		f.dest.set_token_balance(USDC_DST, f.solver, usdc(5000));
		let mut request = request(intent(usdc(1000), usdc(1003)));
		request.execution_type = ExecutionType::Gasless;

		assert!(matches!(
			f.engine.quote(request).await,
			Err(QuoteError::InvalidRequest(_))
		));
	}

	#[tokio::test]
	async fn test_reverse_quote_limits() {
		let f = fixture();
		f.dest.set_token_balance(USDC_DST, f.solver, usdc(5000));

		let by_reward = f
			.engine
			.reverse_quote(&intent(usdc(1000), usdc(1003)), ExecutionType::SelfPublish)
			.await
			.unwrap();
		assert_eq!(by_reward.max_route_value, usdc(1000));
		assert_eq!(by_reward.limited_by, RouteLimit::Reward);

		let by_balance = f
			.engine
			.reverse_quote(&intent(usdc(1000), usdc(9000)), ExecutionType::SelfPublish)
			.await
			.unwrap();
		assert_eq!(by_balance.max_route_value, usdc(5000));
		assert_eq!(by_balance.limited_by, RouteLimit::Balance);
	}

	#[tokio::test]
	async fn test_approve_fulfillment_builds_plan() {
		let f = fixture();
		f.dest.set_token_balance(USDC_DST, f.solver, usdc(5000));
		f.source
			.on_call::<IPortal::getRewardStatusCall, _>(PORTAL_SRC, |_| VaultStatus::FullyFunded as u8);
		let intent = intent(usdc(1000), usdc(1003));

		let quote = f.engine.quote(request(intent.clone())).await.unwrap();
		let plan = f.engine.approve_fulfillment(&quote.id, &intent).await.unwrap();

		assert_eq!(plan.chain_id, DEST);
		assert_eq!(plan.group_key, "chain:10");
		assert_eq!(plan.transactions.len(), 2);

		let approve = IERC20::approveCall::abi_decode(&plan.transactions[0].data).unwrap();
		assert_eq!(plan.transactions[0].to, USDC_DST);
		assert_eq!(approve.spender, PORTAL_DST);
		assert_eq!(approve.amount, usdc(1000));

		let fulfill = IPortal::fulfillCall::abi_decode(&plan.transactions[1].data).unwrap();
		assert_eq!(plan.transactions[1].to, PORTAL_DST);
		assert_eq!(fulfill.intentHash, intent.hash);
		assert_eq!(fulfill.rewardHash, intent.reward.hash());
		assert_eq!(fulfill.claimant, f.solver.into_word());
	}

	#[tokio::test]
	async fn test_approve_rejects_expired_quote() {
		let f = fixture();
		f.dest.set_token_balance(USDC_DST, f.solver, usdc(5000));
		let intent = intent(usdc(1000), usdc(1003));
		let quote = f.engine.quote(request(intent.clone())).await.unwrap();

		f.clock.advance(301);
		let result = f.engine.approve_fulfillment(&quote.id, &intent).await;
		assert!(matches!(result, Err(QuoteError::QuoteExpired(_))));
	}

	#[tokio::test]
	async fn test_approve_checks_vault() {
		let f = fixture();
		f.dest.set_token_balance(USDC_DST, f.solver, usdc(5000));
		let intent = intent(usdc(1000), usdc(1003));
		let quote = f.engine.quote(request(intent.clone())).await.unwrap();

		f.source
			.on_call::<IPortal::getRewardStatusCall, _>(PORTAL_SRC, |_| VaultStatus::Empty as u8);
		assert!(matches!(
			f.engine.approve_fulfillment(&quote.id, &intent).await,
			Err(QuoteError::VaultNotFunded)
		));

		f.source
			.on_call::<IPortal::getRewardStatusCall, _>(PORTAL_SRC, |_| VaultStatus::Claimed as u8);
		assert!(matches!(
			f.engine.approve_fulfillment(&quote.id, &intent).await,
			Err(QuoteError::VaultStale)
		));

		f.source.fail_reads(true);
		assert!(matches!(
			f.engine.approve_fulfillment(&quote.id, &intent).await,
			Err(QuoteError::ChainRead(_))
		));
	}

	#[tokio::test]
	async fn test_approve_unknown_quote() {
		let f = fixture();
		let result = f
			.engine
			.approve_fulfillment("missing", &intent(usdc(1), usdc(1)))
			.await;
		assert!(matches!(result, Err(QuoteError::QuoteNotFound(id)) if id == "missing"));
	}

	#[test]
	fn test_distribution_fills_in_order() {
		let a = address!("0x00000000000000000000000000000000000000a1");
		let b = address!("0x00000000000000000000000000000000000000b1");
		let rewards = vec![
			(TokenAmount::new(a, U256::from(400u64)), 6),
			(TokenAmount::new(b, U256::from(10u64).pow(U256::from(18))), 18),
		];

		let distributed = distribute(U256::from(1_000u64), &rewards).unwrap();
		assert_eq!(distributed[0], TokenAmount::new(a, U256::from(400u64)));
		assert_eq!(
			distributed[1],
			TokenAmount::new(b, U256::from(600u64) * U256::from(10u64).pow(U256::from(12)))
		);
	}
}
