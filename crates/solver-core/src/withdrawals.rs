//! Batched reward withdrawal for proven intents.
//!
//! Proven intents wait in the `proven_intents` namespace until the recurring
//! withdrawal check picks them up. Each source chain gets one or more
//! `batchWithdraw` calls on its portal, `chunk_size` intents at a time.

use crate::SolverError;
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};
use solver_config::Config;
use solver_delivery::DeliveryService;
use solver_storage::StorageService;
use solver_types::contracts::IPortal;
use solver_types::intent::abi;
use solver_types::{
	truncate_id, Clock, EventBus, Intent, SolverEvent, Transaction, TransactionHash,
	WithdrawalEvent, B256,
};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const PROVEN_NAMESPACE: &str = "proven_intents";
pub const BATCHES_NAMESPACE: &str = "withdrawal_batches";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenIntent {
	pub intent: Intent,
	pub proven_at: u64,
}

/// Submitted batch, kept as the record of which intents it withdrew.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalBatch {
	pub chain_id: u64,
	pub tx_hash: TransactionHash,
	pub intent_hashes: Vec<B256>,
	pub submitted_at: u64,
}

pub struct WithdrawalBatcher {
	config: Arc<Config>,
	delivery: Arc<DeliveryService>,
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
	event_bus: EventBus,
}

impl WithdrawalBatcher {
	pub fn new(
		config: Arc<Config>,
		delivery: Arc<DeliveryService>,
		storage: Arc<StorageService>,
		clock: Arc<dyn Clock>,
		event_bus: EventBus,
	) -> Self {
		Self {
			config,
			delivery,
			storage,
			clock,
			event_bus,
		}
	}

	/// Queues a proven intent for withdrawal on its source chain.
	pub async fn record_proven(&self, intent: Intent) -> Result<(), SolverError> {
		if !intent.verify_hash() {
			return Err(SolverError::InvalidIntent(format!(
				"hash {} does not match intent content",
				intent.hash
			)));
		}
		if self.config.chain(intent.source_chain).is_none() {
			return Err(SolverError::InvalidIntent(format!(
				"source chain {} is not configured",
				intent.source_chain
			)));
		}

		let key = intent.hash.to_string();
		tracing::info!(
			intent_hash = %truncate_id(&key),
			chain_id = intent.source_chain,
			"Recorded proven intent"
		);
		let record = ProvenIntent {
			intent,
			proven_at: self.clock.now(),
		};
		self.storage.store(PROVEN_NAMESPACE, &key, &record).await?;
		Ok(())
	}

	pub async fn pending(&self) -> Result<Vec<ProvenIntent>, SolverError> {
		Ok(self
			.storage
			.retrieve_all::<ProvenIntent>(PROVEN_NAMESPACE)
			.await?
			.into_iter()
			.map(|(_, record)| record)
			.collect())
	}

	/// Source chains with intents waiting for withdrawal.
	pub async fn pending_chains(&self) -> Result<Vec<u64>, SolverError> {
		let chains: BTreeSet<u64> = self
			.pending()
			.await?
			.iter()
			.map(|record| record.intent.source_chain)
			.collect();
		Ok(chains.into_iter().collect())
	}

	/// Withdraws every pending intent of `chain_id`.
	///
	/// A chunk's records are removed once its batch is confirmed and
	/// recorded; a failing chunk stops the run and leaves the remaining
	/// records for the next check.
	pub async fn withdraw(&self, chain_id: u64) -> Result<Vec<TransactionHash>, SolverError> {
		let portal = self
			.config
			.chain(chain_id)
			.map(|chain| chain.portal)
			.ok_or_else(|| SolverError::Config(format!("chain {} is not configured", chain_id)))?;

		let mut records: Vec<ProvenIntent> = self
			.pending()
			.await?
			.into_iter()
			.filter(|record| record.intent.source_chain == chain_id)
			.collect();
		records.sort_by(|a, b| {
			a.proven_at
				.cmp(&b.proven_at)
				.then(a.intent.hash.cmp(&b.intent.hash))
		});

		let mut hashes = Vec::new();
		for chunk in records.chunks(self.config.withdrawals.chunk_size.max(1)) {
			match self.submit_batch(chain_id, portal, chunk).await {
				Ok(hash) => hashes.push(hash),
				Err(e) => {
					tracing::error!(chain_id, intents = chunk.len(), error = %e, "Withdrawal batch failed");
					self.event_bus
						.publish(SolverEvent::Withdrawal(WithdrawalEvent::BatchFailed {
							chain_id,
							error: e.to_string(),
						}));
					return Err(e);
				},
			}
		}
		Ok(hashes)
	}

	async fn submit_batch(
		&self,
		chain_id: u64,
		portal: alloy::primitives::Address,
		chunk: &[ProvenIntent],
	) -> Result<TransactionHash, SolverError> {
		let call = IPortal::batchWithdrawCall {
			destinations: chunk
				.iter()
				.map(|record| record.intent.destination_chain)
				.collect(),
			routeHashes: chunk.iter().map(|record| record.intent.route.hash()).collect(),
			rewards: chunk
				.iter()
				.map(|record| abi::Reward::from(&record.intent.reward))
				.collect(),
		};

		let tx_hash = self
			.delivery
			.deliver(Transaction::call(chain_id, portal, call.abi_encode()))
			.await?;
		self.delivery.confirm(chain_id, &tx_hash).await?;

		let intent_hashes: Vec<B256> = chunk.iter().map(|record| record.intent.hash).collect();
		let batch = WithdrawalBatch {
			chain_id,
			tx_hash,
			intent_hashes: intent_hashes.clone(),
			submitted_at: self.clock.now(),
		};
		self.storage
			.store(BATCHES_NAMESPACE, &tx_hash.0.to_string(), &batch)
			.await?;
		for hash in &intent_hashes {
			self.storage
				.remove(PROVEN_NAMESPACE, &hash.to_string())
				.await?;
		}

		tracing::info!(chain_id, tx_hash = %tx_hash, intents = chunk.len(), "Submitted withdrawal batch");
		self.event_bus
			.publish(SolverEvent::Withdrawal(WithdrawalEvent::BatchSubmitted {
				chain_id,
				tx_hash,
				intent_count: chunk.len(),
			}));
		Ok(tx_hash)
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use alloy::primitives::{address, Address, Bytes, U256};
	use solver_config::ConfigLoader;
	use solver_delivery::testing::MockChain;
	use solver_delivery::DeliveryInterface;
	use solver_storage::implementations::memory::MemoryStorage;
	use solver_types::{ManualClock, Reward, Route, TokenAmount};
	use std::collections::HashMap;

	pub(crate) const SOURCE: u64 = 42161;
	pub(crate) const DEST: u64 = 10;
	pub(crate) const PORTAL_SRC: Address = address!("0x0000000000000000000000000000000000000a0a");
	const SOLVER: Address = address!("0x00000000000000000000000000000000000000aa");

	pub(crate) const CONFIG: &str = r#"
[solver]
id = "core-test"

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

[withdrawals]
chunk_size = 2
"#;

	pub(crate) fn intent(salt: u8) -> Intent {
		let route = Route {
			salt: B256::repeat_byte(salt),
			deadline: 1_700_000_000,
			portal: address!("0x0000000000000000000000000000000000000b0b"),
			native_amount: U256::ZERO,
			tokens: vec![TokenAmount::new(
				address!("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
				U256::from(1000u64),
			)],
			calls: vec![],
		};
		let reward = Reward {
			deadline: 1_700_003_600,
			creator: address!("0x2222222222222222222222222222222222222222"),
			prover: address!("0x3333333333333333333333333333333333333333"),
			native_amount: U256::ZERO,
			tokens: vec![TokenAmount::new(
				address!("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
				U256::from(1003u64),
			)],
		};
		Intent::new(SOURCE, DEST, route, reward)
	}

	fn batcher() -> (WithdrawalBatcher, Arc<MockChain>, Arc<ManualClock>) {
		let config = Arc::new(
			ConfigLoader::new()
				.with_env_prefix("SOLVER_CORE_WITHDRAWAL_TEST_")
				.load_from_str(CONFIG)
				.unwrap(),
		);
		let chain = Arc::new(MockChain::new(SOURCE, SOLVER));
		let mut implementations: HashMap<u64, Arc<dyn DeliveryInterface>> = HashMap::new();
		implementations.insert(SOURCE, chain.clone());
		let clock = Arc::new(ManualClock::new(1_700_000_000));
		let batcher = WithdrawalBatcher::new(
			config,
			Arc::new(DeliveryService::new(implementations)),
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			clock.clone(),
			EventBus::new(16),
		);
		(batcher, chain, clock)
	}

	#[tokio::test]
	async fn test_proven_intents_are_withdrawn_in_chunks() {
		let (batcher, chain, clock) = batcher();
		for salt in 1..=3u8 {
			batcher.record_proven(intent(salt)).await.unwrap();
			clock.advance(1);
		}
		assert_eq!(batcher.pending_chains().await.unwrap(), vec![SOURCE]);

		let hashes = batcher.withdraw(SOURCE).await.unwrap();
		assert_eq!(hashes.len(), 2);

		let submitted = chain.submitted();
		assert_eq!(submitted.len(), 2);
		assert!(submitted.iter().all(|tx| tx.to == PORTAL_SRC));
		let first = IPortal::batchWithdrawCall::abi_decode(&submitted[0].data).unwrap();
		assert_eq!(first.destinations, vec![DEST, DEST]);
		assert_eq!(first.routeHashes[0], intent(1).route.hash());
		assert_eq!(first.routeHashes[1], intent(2).route.hash());
		let second = IPortal::batchWithdrawCall::abi_decode(&submitted[1].data).unwrap();
		assert_eq!(second.rewards.len(), 1);

		assert!(batcher.pending().await.unwrap().is_empty());
		assert!(batcher.pending_chains().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_reverted_batch_keeps_records() {
		let (batcher, chain, _) = batcher();
		batcher.record_proven(intent(1)).await.unwrap();
		chain.revert_calls_to(PORTAL_SRC);

		let result = batcher.withdraw(SOURCE).await;
		assert!(matches!(result, Err(SolverError::Delivery(_))));
		assert_eq!(batcher.pending().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_tampered_intent_is_refused() {
		let (batcher, _, _) = batcher();
		let mut tampered = intent(1);
		tampered.route.calls.push(solver_types::Call {
			target: Address::ZERO,
			data: Bytes::new(),
			value: U256::from(1u64),
		});

		let result = batcher.record_proven(tampered).await;
		assert!(matches!(result, Err(SolverError::InvalidIntent(_))));
	}
}
