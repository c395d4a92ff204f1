//! Solver engine.
//!
//! Wires the quote engine, the rebalance orchestrator and withdrawal
//! batching onto one job queue. Everything that sends transactions runs as
//! a job on its chain's group key, so a signer never has two submissions in
//! flight on the same chain.

use serde_json::json;
use solver_account::{AccountError, AccountService};
use solver_config::Config;
use solver_delivery::{DeliveryError, DeliveryService};
use solver_jobs::{JobError, JobId, JobOptions, JobQueue, Scheduler};
use solver_liquidity::{OrchestratorError, ProviderError, RebalanceOrchestrator};
use solver_quote::{QuoteEngine, QuoteError};
use solver_storage::{StorageError, StorageService};
use solver_types::{Address, EventBus, Intent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod builder;
pub mod handlers;
pub mod withdrawals;

pub use builder::SolverBuilder;
pub use withdrawals::WithdrawalBatcher;

use handlers::{
	balances_group_key, schedule_advance, CHECK_BALANCES, CHECK_WITHDRAWALS, FULFILL_INTENT,
	WITHDRAWALS_GROUP,
};

#[derive(Debug, Error)]
pub enum SolverError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Invalid intent: {0}")]
	InvalidIntent(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("Account error: {0}")]
	Account(#[from] AccountError),
	#[error("Delivery error: {0}")]
	Delivery(#[from] DeliveryError),
	#[error("Provider error: {0}")]
	Provider(#[from] ProviderError),
	#[error("Rebalance error: {0}")]
	Orchestrator(#[from] OrchestratorError),
	#[error("Quote error: {0}")]
	Quote(#[from] QuoteError),
	#[error("Job error: {0}")]
	Job(#[from] JobError),
	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl SolverError {
	pub fn is_transient(&self) -> bool {
		match self {
			SolverError::Storage(e) => matches!(e, StorageError::Backend(_)),
			SolverError::Delivery(e) => e.is_transient(),
			SolverError::Provider(e) => e.is_transient(),
			SolverError::Orchestrator(e) => e.is_transient(),
			SolverError::Job(e) => e.is_transient(),
			_ => false,
		}
	}
}

impl From<SolverError> for JobError {
	fn from(err: SolverError) -> Self {
		if err.is_transient() {
			JobError::Transient(err.to_string())
		} else {
			JobError::Permanent(err.to_string())
		}
	}
}

pub struct SolverEngine {
	config: Arc<Config>,
	storage: Arc<StorageService>,
	account: Arc<AccountService>,
	delivery: Arc<DeliveryService>,
	quotes: Arc<QuoteEngine>,
	orchestrator: Arc<RebalanceOrchestrator>,
	withdrawals: Arc<WithdrawalBatcher>,
	queue: Arc<JobQueue>,
	scheduler: Scheduler,
	event_bus: EventBus,
}

impl SolverEngine {
	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn delivery(&self) -> &Arc<DeliveryService> {
		&self.delivery
	}

	pub fn quotes(&self) -> &Arc<QuoteEngine> {
		&self.quotes
	}

	pub fn orchestrator(&self) -> &Arc<RebalanceOrchestrator> {
		&self.orchestrator
	}

	pub fn withdrawals(&self) -> &Arc<WithdrawalBatcher> {
		&self.withdrawals
	}

	pub fn queue(&self) -> &Arc<JobQueue> {
		&self.queue
	}

	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}

	/// Address the solver signs, rebalances and withdraws with.
	pub fn wallet(&self) -> Address {
		self.account.address()
	}

	/// Approves a recorded quote and queues its execution plan on the
	/// destination chain's lane.
	pub async fn approve_and_fulfill(
		&self,
		quote_id: &str,
		intent: &Intent,
	) -> Result<JobId, SolverError> {
		let plan = self.quotes.approve_fulfillment(quote_id, intent).await?;
		let job_id = self.queue.enqueue_with(
			plan.group_key.clone(),
			FULFILL_INTENT,
			serde_json::to_value(&plan)?,
			JobOptions {
				dedup_id: Some(format!("fulfill:{}", plan.quote_id)),
				..Default::default()
			},
		)?;
		Ok(job_id)
	}

	/// Queues a proven intent for the next withdrawal batch.
	pub async fn record_proven(&self, intent: Intent) -> Result<(), SolverError> {
		self.withdrawals.record_proven(intent).await
	}

	/// Starts the queue, re-schedules unfinished operations and registers
	/// the recurring checks.
	pub async fn start(&self) -> Result<(), SolverError> {
		self.queue.start();

		for id in self.orchestrator.resume().await? {
			if let Some(op) = self.orchestrator.operation(&id).await? {
				schedule_advance(&self.queue, &op)?;
			}
		}

		let wallet = self.wallet();
		if self.config.rebalance.enabled {
			self.scheduler.schedule_recurring(
				&format!("{}-{}", CHECK_BALANCES, wallet),
				Duration::from_secs(self.config.rebalance.interval_secs),
				balances_group_key(wallet),
				CHECK_BALANCES,
				move |tick| json!({ "wallet": wallet, "tick": tick }),
			);
		}
		if self.config.withdrawals.enabled {
			self.scheduler.schedule_recurring(
				CHECK_WITHDRAWALS,
				Duration::from_secs(self.config.withdrawals.interval_secs),
				WITHDRAWALS_GROUP,
				CHECK_WITHDRAWALS,
				|tick| json!({ "tick": tick }),
			);
		}

		tracing::info!(
			solver = %self.config.solver.id,
			wallet = %wallet,
			chains = self.config.chains.len(),
			rebalance = self.config.rebalance.enabled,
			withdrawals = self.config.withdrawals.enabled,
			"Solver started"
		);
		Ok(())
	}

	/// Runs until `shutdown` resolves.
	pub async fn run<F>(&self, shutdown: F) -> Result<(), SolverError>
	where
		F: Future<Output = ()>,
	{
		self.start().await?;
		shutdown.await;
		self.shutdown();
		Ok(())
	}

	/// Stops the schedules and the queue. Running jobs finish on their own.
	pub fn shutdown(&self) {
		self.scheduler.shutdown();
		self.queue.shutdown();
		tracing::info!(solver = %self.config.solver.id, "Solver stopped");
	}
}
