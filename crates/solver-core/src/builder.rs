//! Assembles a [`SolverEngine`] from configuration and backend factories.

use crate::handlers::{
	AdvanceRebalanceHandler, CheckBalancesHandler, CheckWithdrawalsHandler, FulfillIntentHandler,
	PollRebalanceHandler, SubmitWithdrawalsHandler, ADVANCE_REBALANCE, CHECK_BALANCES,
	CHECK_WITHDRAWALS, FULFILL_INTENT, POLL_REBALANCE, SUBMIT_WITHDRAWALS,
};
use crate::withdrawals::WithdrawalBatcher;
use crate::{SolverEngine, SolverError};
use alloy::network::EthereumWallet;
use solver_account::{AccountError, AccountInterface, AccountService};
use solver_config::Config;
use solver_delivery::{DeliveryError, DeliveryInterface, DeliveryService};
use solver_jobs::{JobQueue, Scheduler};
use solver_liquidity::{ProviderError, RebalanceOrchestrator, RebalanceProviderInterface};
use solver_quote::QuoteEngine;
use solver_storage::{StorageError, StorageInterface, StorageService};
use solver_types::{Address, Clock, EventBus, SystemClock};
use solver_validators::{PermitValidator, TokenDomainResolver, VaultValidator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type StorageFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> + Send>;
type AccountFactory =
	Box<dyn Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> + Send>;
type DeliveryFactory = Box<
	dyn Fn(&toml::Value, EthereumWallet) -> Result<Arc<dyn DeliveryInterface>, DeliveryError>
		+ Send,
>;
type ProviderFactory = Box<
	dyn Fn(&Config, Address) -> Result<Vec<Arc<dyn RebalanceProviderInterface>>, ProviderError>
		+ Send,
>;

pub struct SolverBuilder {
	config: Config,
	storage_factories: HashMap<String, StorageFactory>,
	account_factories: HashMap<String, AccountFactory>,
	delivery_factory: Option<DeliveryFactory>,
	provider_factory: Option<ProviderFactory>,
	clock: Option<Arc<dyn Clock>>,
}

impl SolverBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage_factories: HashMap::new(),
			account_factories: HashMap::new(),
			delivery_factory: None,
			provider_factory: None,
			clock: None,
		}
	}

	pub fn with_storage_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> + Send + 'static,
	{
		self.storage_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	pub fn with_account_factory<F>(mut self, name: &str, factory: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<Box<dyn AccountInterface>, AccountError> + Send + 'static,
	{
		self.account_factories
			.insert(name.to_string(), Box::new(factory));
		self
	}

	/// Factory called once per configured chain with
	/// `{ rpc_url, chain_id, confirmations }` and the solver wallet.
	pub fn with_delivery_factory<F>(mut self, factory: F) -> Self
	where
		F: Fn(&toml::Value, EthereumWallet) -> Result<Arc<dyn DeliveryInterface>, DeliveryError>
			+ Send
			+ 'static,
	{
		self.delivery_factory = Some(Box::new(factory));
		self
	}

	/// Replaces the providers built from the `[cctp]` and `[swap]` sections.
	pub fn with_provider_factory<F>(mut self, factory: F) -> Self
	where
		F: Fn(&Config, Address) -> Result<Vec<Arc<dyn RebalanceProviderInterface>>, ProviderError>
			+ Send
			+ 'static,
	{
		self.provider_factory = Some(Box::new(factory));
		self
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	pub fn build(self) -> Result<SolverEngine, SolverError> {
		let config = Arc::new(self.config);
		let clock = self
			.clock
			.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
		let event_bus = EventBus::new(1000);

		let storage_factory = self
			.storage_factories
			.get(&config.storage.backend)
			.ok_or_else(|| {
				SolverError::Config(format!(
					"No storage factory for backend '{}'",
					config.storage.backend
				))
			})?;
		let storage = Arc::new(StorageService::new(storage_factory(&config.storage.config)?));

		let account_factory = self
			.account_factories
			.get(&config.account.implementation)
			.ok_or_else(|| {
				SolverError::Config(format!(
					"No account factory for implementation '{}'",
					config.account.implementation
				))
			})?;
		let account = Arc::new(AccountService::new(account_factory(&config.account.config)?));
		let wallet = account.address();

		let delivery_factory = self
			.delivery_factory
			.ok_or_else(|| SolverError::Config("Delivery factory not provided".into()))?;
		let mut implementations = HashMap::new();
		for (chain_id, chain) in &config.chains {
			let mut table = toml::Table::new();
			table.insert("rpc_url".into(), toml::Value::String(chain.rpc_url.clone()));
			table.insert("chain_id".into(), toml::Value::Integer(*chain_id as i64));
			table.insert(
				"confirmations".into(),
				toml::Value::Integer(chain.confirmations as i64),
			);
			let implementation = delivery_factory(&toml::Value::Table(table), account.wallet())?;
			implementations.insert(*chain_id, implementation);
		}
		if implementations.is_empty() {
			return Err(SolverError::Config("No chains configured".into()));
		}
		let delivery = Arc::new(DeliveryService::new(implementations));

		let domains = Arc::new(TokenDomainResolver::new(
			delivery.clone(),
			storage.clone(),
			Duration::from_secs(config.permit.domain_cache_ttl_secs),
		));
		let permits = Arc::new(PermitValidator::new(
			delivery.clone(),
			domains,
			clock.clone(),
			config.permit.permit2_contracts.iter().copied(),
		));
		let vaults = Arc::new(VaultValidator::new(delivery.clone()));
		let quotes = Arc::new(QuoteEngine::new(
			config.clone(),
			delivery.clone(),
			account.clone(),
			storage.clone(),
			permits,
			vaults,
			clock.clone(),
			event_bus.clone(),
		));

		let providers = match &self.provider_factory {
			Some(factory) => factory(&config, wallet)?,
			None => solver_liquidity::create_providers(&config, wallet)?,
		};
		let orchestrator = Arc::new(RebalanceOrchestrator::new(
			config.clone(),
			providers,
			delivery.clone(),
			storage.clone(),
			clock.clone(),
			event_bus.clone(),
		));

		let withdrawals = Arc::new(WithdrawalBatcher::new(
			config.clone(),
			delivery.clone(),
			storage.clone(),
			clock,
			event_bus.clone(),
		));

		let queue = JobQueue::new(config.jobs.clone());
		let handle = Arc::downgrade(&queue);
		queue.register(
			CHECK_BALANCES,
			Arc::new(CheckBalancesHandler {
				orchestrator: orchestrator.clone(),
				queue: handle.clone(),
			}),
		);
		queue.register(
			ADVANCE_REBALANCE,
			Arc::new(AdvanceRebalanceHandler {
				orchestrator: orchestrator.clone(),
				queue: handle.clone(),
			}),
		);
		queue.register(
			POLL_REBALANCE,
			Arc::new(PollRebalanceHandler {
				orchestrator: orchestrator.clone(),
				queue: handle.clone(),
			}),
		);
		queue.register(
			FULFILL_INTENT,
			Arc::new(FulfillIntentHandler {
				delivery: delivery.clone(),
				storage: storage.clone(),
				event_bus: event_bus.clone(),
			}),
		);
		queue.register(
			CHECK_WITHDRAWALS,
			Arc::new(CheckWithdrawalsHandler {
				batcher: withdrawals.clone(),
				queue: handle,
			}),
		);
		queue.register(
			SUBMIT_WITHDRAWALS,
			Arc::new(SubmitWithdrawalsHandler {
				batcher: withdrawals.clone(),
			}),
		);
		let scheduler = Scheduler::new(queue.clone());

		tracing::info!(
			solver = %config.solver.id,
			wallet = %wallet,
			storage = %config.storage.backend,
			"Solver engine built"
		);

		Ok(SolverEngine {
			config,
			storage,
			account,
			delivery,
			quotes,
			orchestrator,
			withdrawals,
			queue,
			scheduler,
			event_bus,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::sol_types::SolCall;
	use crate::handlers::{FulfillmentRecord, FULFILLMENTS_NAMESPACE};
	use crate::withdrawals::tests::{intent, CONFIG, PORTAL_SRC, SOURCE};
	use alloy::primitives::address;
	use solver_config::ConfigLoader;
	use solver_delivery::testing::MockChain;
	use solver_jobs::JobHandler;
	use solver_types::contracts::IPortal;
	use solver_types::{ExecutionPlan, ManualClock, Transaction, B256};

	// Well-known anvil account #0.
	const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
	const TEST_ADDRESS: Address = address!("0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266");

	fn config(extra: &str) -> Config {
		let content = format!(
			"{}\n[storage]\nbackend = \"memory\"\n\n[account]\nimplementation = \"local\"\n\n[account.config]\nprivate_key = \"{}\"\n{}",
			CONFIG, TEST_KEY, extra
		);
		ConfigLoader::new()
			.with_env_prefix("SOLVER_CORE_BUILDER_TEST_")
			.load_from_str(&content)
			.unwrap()
	}

	fn builder(config: Config, chains: Vec<Arc<MockChain>>) -> SolverBuilder {
		let chains: HashMap<u64, Arc<MockChain>> = chains
			.into_iter()
			.map(|chain| (chain.chain_id(), chain))
			.collect();
		SolverBuilder::new(config)
			.with_storage_factory("memory", solver_storage::implementations::memory::create_storage)
			.with_account_factory("local", solver_account::implementations::local::create_account)
			.with_delivery_factory(move |config, _wallet| {
				let chain_id = config
					.get("chain_id")
					.and_then(|v| v.as_integer())
					.unwrap_or_default() as u64;
				chains
					.get(&chain_id)
					.cloned()
					.map(|chain| chain as Arc<dyn DeliveryInterface>)
					.ok_or(DeliveryError::NoImplementationAvailable(chain_id))
			})
			.with_clock(Arc::new(ManualClock::new(1_700_000_000)))
	}

	fn chains() -> Vec<Arc<MockChain>> {
		vec![
			Arc::new(MockChain::new(SOURCE, TEST_ADDRESS)),
			Arc::new(MockChain::new(10, TEST_ADDRESS)),
		]
	}

	#[test]
	fn test_missing_storage_factory_is_a_config_error() {
		let result = SolverBuilder::new(config("")).build();
		assert!(matches!(result, Err(SolverError::Config(_))));
	}

	#[tokio::test]
	async fn test_engine_uses_configured_account() {
		let engine = builder(config(""), chains()).build().unwrap();
		assert_eq!(engine.wallet(), TEST_ADDRESS);
		assert!(engine.delivery().supports(SOURCE));
		assert!(engine.delivery().supports(10));
	}

	#[tokio::test]
	async fn test_withdrawal_schedule_submits_batches() {
		let chains = chains();
		let source = chains[0].clone();
		let engine = builder(config(""), chains).build().unwrap();

		engine.record_proven(intent(1)).await.unwrap();
		engine.record_proven(intent(2)).await.unwrap();
		engine.start().await.unwrap();

		tokio::time::sleep(Duration::from_millis(50)).await;
		engine.queue().wait_idle().await;

		let submitted = source.submitted();
		assert_eq!(submitted.len(), 1);
		assert_eq!(submitted[0].to, PORTAL_SRC);
		let call = IPortal::batchWithdrawCall::abi_decode(&submitted[0].data).unwrap();
		assert_eq!(call.rewards.len(), 2);
		assert!(engine.withdrawals().pending().await.unwrap().is_empty());
		engine.shutdown();
	}

	#[tokio::test]
	async fn test_fulfillment_is_not_resubmitted() {
		let chains = chains();
		let dest = chains[1].clone();
		let engine = builder(config(""), chains).build().unwrap();
		let token = address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85");

		let plan = ExecutionPlan {
			quote_id: "quote-1".into(),
			intent_hash: B256::repeat_byte(0x42),
			chain_id: 10,
			group_key: "chain:10".into(),
			transactions: vec![
				Transaction::call(10, token, vec![0x09, 0x5e, 0xa7, 0xb3]),
				Transaction::call(10, address!("0x0000000000000000000000000000000000000b0b"), vec![0x01]),
			],
		};
		let handler = FulfillIntentHandler {
			delivery: engine.delivery().clone(),
			storage: engine.storage().clone(),
			event_bus: engine.event_bus().clone(),
		};
		let job = solver_jobs::Job {
			id: "job-1".into(),
			group_key: plan.group_key.clone(),
			name: FULFILL_INTENT.into(),
			payload: serde_json::to_value(&plan).unwrap(),
			dedup_id: None,
			attempt: 1,
			max_attempts: 5,
		};

		handler.handle(&job).await.unwrap();
		handler.handle(&job).await.unwrap();

		assert_eq!(dest.submitted().len(), 2);
		let record: FulfillmentRecord = engine
			.storage()
			.retrieve(FULFILLMENTS_NAMESPACE, "quote-1")
			.await
			.unwrap();
		assert!(record.confirmed);
		assert_eq!(record.tx_hashes.len(), 2);
	}

	#[tokio::test]
	async fn test_reverted_fulfillment_is_permanent() {
		let chains = chains();
		let dest = chains[1].clone();
		let engine = builder(config(""), chains).build().unwrap();
		let portal = address!("0x0000000000000000000000000000000000000b0b");
		dest.revert_calls_to(portal);

		let plan = ExecutionPlan {
			quote_id: "quote-2".into(),
			intent_hash: B256::repeat_byte(0x43),
			chain_id: 10,
			group_key: "chain:10".into(),
			transactions: vec![Transaction::call(10, portal, vec![0x01])],
		};
		let handler = FulfillIntentHandler {
			delivery: engine.delivery().clone(),
			storage: engine.storage().clone(),
			event_bus: engine.event_bus().clone(),
		};
		let job = solver_jobs::Job {
			id: "job-2".into(),
			group_key: plan.group_key.clone(),
			name: FULFILL_INTENT.into(),
			payload: serde_json::to_value(&plan).unwrap(),
			dedup_id: None,
			attempt: 1,
			max_attempts: 5,
		};

		let err = handler.handle(&job).await.unwrap_err();
		assert!(!err.is_transient());
	}
}
