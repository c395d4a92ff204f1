//! Job handlers registered on the solver's queue.
//!
//! | job | group key | work |
//! |---|---|---|
//! | `check-balances` | `balances:{wallet}` | evaluate, quote and persist operations |
//! | `advance-rebalance` | chain of the next submitting stage | drive a new or resumed operation |
//! | `poll-rebalance` | chain of the next submitting stage | drive and re-schedule with backoff |
//! | `fulfill-intent` | `chain:{destination}` | submit an approved execution plan |
//! | `check-withdrawals` | `withdrawals` | fan out per source chain |
//! | `submit-withdrawals` | `chain:{source}` | batch withdraw proven intents |

use crate::withdrawals::WithdrawalBatcher;
use crate::SolverError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use solver_delivery::DeliveryService;
use solver_jobs::{Job, JobError, JobHandler, JobId, JobOptions, JobQueue};
use solver_liquidity::{OrchestratorError, PollDecision, RebalanceOrchestrator};
use solver_storage::StorageService;
use solver_types::{
	chain_group_key, truncate_id, Address, DeliveryEvent, EventBus, ExecutionPlan,
	RebalanceOperation, SolverEvent, TransactionHash, B256,
};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub const CHECK_BALANCES: &str = "check-balances";
pub const ADVANCE_REBALANCE: &str = "advance-rebalance";
pub const POLL_REBALANCE: &str = "poll-rebalance";
pub const FULFILL_INTENT: &str = "fulfill-intent";
pub const CHECK_WITHDRAWALS: &str = "check-withdrawals";
pub const SUBMIT_WITHDRAWALS: &str = "submit-withdrawals";

pub const WITHDRAWALS_GROUP: &str = "withdrawals";
pub const FULFILLMENTS_NAMESPACE: &str = "fulfillments";

pub fn balances_group_key(wallet: Address) -> String {
	format!("balances:{}", wallet)
}

/// Chain of the next stage that sends transactions, so every submission
/// for a chain goes through that chain's lane.
pub fn operation_group_key(op: &RebalanceOperation) -> String {
	let chain_id = op
		.stages
		.iter()
		.skip(op.current_stage_index)
		.find(|stage| stage.kind.submits_transactions())
		.or_else(|| op.current_stage())
		.or_else(|| op.stages.last())
		.map(|stage| stage.chain_id)
		.unwrap_or(op.quote.token_out.chain_id);
	chain_group_key(chain_id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckBalancesPayload {
	pub wallet: Address,
	/// Scheduler tick; doubles as the rebalance request id.
	pub tick: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationPayload {
	pub operation_id: String,
	#[serde(default)]
	pub attempt: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalPayload {
	pub chain_id: u64,
}

/// Submission progress of an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentRecord {
	pub quote_id: String,
	pub intent_hash: B256,
	pub chain_id: u64,
	pub tx_hashes: Vec<TransactionHash>,
	pub confirmed: bool,
}

fn upgrade(queue: &Weak<JobQueue>) -> Result<Arc<JobQueue>, JobError> {
	queue.upgrade().ok_or(JobError::ShutDown)
}

fn orchestrator_error(err: OrchestratorError) -> JobError {
	if err.is_transient() {
		JobError::Transient(err.to_string())
	} else {
		JobError::Permanent(err.to_string())
	}
}

/// Enqueues the next poll of `op` on its chain lane.
pub(crate) fn schedule_poll(
	queue: &JobQueue,
	op: &RebalanceOperation,
	attempt: u32,
	delay: Duration,
) -> Result<JobId, JobError> {
	queue.enqueue_with(
		operation_group_key(op),
		POLL_REBALANCE,
		json!({ "operation_id": op.id, "attempt": attempt }),
		JobOptions {
			delay: Some(delay),
			dedup_id: Some(format!("poll:{}:{}", op.id, attempt)),
			..Default::default()
		},
	)
}

/// Enqueues a resumed operation on its chain lane.
pub(crate) fn schedule_advance(queue: &JobQueue, op: &RebalanceOperation) -> Result<JobId, JobError> {
	queue.enqueue_with(
		operation_group_key(op),
		ADVANCE_REBALANCE,
		json!({ "operation_id": op.id }),
		JobOptions {
			dedup_id: Some(format!("advance:{}", op.id)),
			..Default::default()
		},
	)
}

/// Shared error path of the operation-driving jobs.
///
/// Transient errors are retried while attempts remain. Anything else, or
/// the last attempt, fails the operation with the error as reason.
async fn give_up_or_retry(
	orchestrator: &RebalanceOrchestrator,
	job: &Job,
	operation_id: &str,
	err: OrchestratorError,
) -> JobError {
	if err.is_transient() && job.attempt < job.max_attempts {
		return JobError::Transient(err.to_string());
	}
	if !matches!(err, OrchestratorError::OperationNotFound(_)) {
		if let Err(fail_err) = orchestrator.fail_operation(operation_id, &err.to_string()).await {
			tracing::error!(
				operation_id = %truncate_id(operation_id),
				error = %fail_err,
				"Failed to record operation failure"
			);
		}
	}
	JobError::Permanent(err.to_string())
}

pub struct CheckBalancesHandler {
	pub(crate) orchestrator: Arc<RebalanceOrchestrator>,
	pub(crate) queue: Weak<JobQueue>,
}

#[async_trait]
impl JobHandler for CheckBalancesHandler {
	async fn handle(&self, job: &Job) -> Result<(), JobError> {
		let payload: CheckBalancesPayload = job.payload()?;
		let request_id = payload.tick.to_string();
		let handles = self
			.orchestrator
			.start_rebalancing(payload.wallet, &request_id)
			.await
			.map_err(orchestrator_error)?;

		let queue = upgrade(&self.queue)?;
		for handle in handles.iter().filter(|h| !h.status.is_terminal()) {
			let Some(op) = self
				.orchestrator
				.operation(&handle.id)
				.await
				.map_err(orchestrator_error)?
			else {
				continue;
			};
			schedule_advance(&queue, &op)?;
		}
		if !handles.is_empty() {
			tracing::info!(
				wallet = %payload.wallet,
				tick = payload.tick,
				operations = handles.len(),
				"Rebalancing started"
			);
		}
		Ok(())
	}
}

pub struct AdvanceRebalanceHandler {
	pub(crate) orchestrator: Arc<RebalanceOrchestrator>,
	pub(crate) queue: Weak<JobQueue>,
}

#[async_trait]
impl JobHandler for AdvanceRebalanceHandler {
	async fn handle(&self, job: &Job) -> Result<(), JobError> {
		let payload: OperationPayload = job.payload()?;
		let status = match self.orchestrator.advance(&payload.operation_id).await {
			Ok(status) => status,
			Err(e) => {
				return Err(
					give_up_or_retry(&self.orchestrator, job, &payload.operation_id, e).await,
				)
			},
		};
		if status.is_terminal() {
			return Ok(());
		}

		if let Some(op) = self
			.orchestrator
			.operation(&payload.operation_id)
			.await
			.map_err(orchestrator_error)?
		{
			let queue = upgrade(&self.queue)?;
			schedule_poll(&queue, &op, 0, Duration::ZERO)?;
		}
		Ok(())
	}
}

pub struct PollRebalanceHandler {
	pub(crate) orchestrator: Arc<RebalanceOrchestrator>,
	pub(crate) queue: Weak<JobQueue>,
}

#[async_trait]
impl JobHandler for PollRebalanceHandler {
	async fn handle(&self, job: &Job) -> Result<(), JobError> {
		let payload: OperationPayload = job.payload()?;
		let decision = match self
			.orchestrator
			.poll(&payload.operation_id, payload.attempt)
			.await
		{
			Ok(decision) => decision,
			Err(e) => {
				return Err(
					give_up_or_retry(&self.orchestrator, job, &payload.operation_id, e).await,
				)
			},
		};

		match decision {
			PollDecision::Done(status) => {
				tracing::info!(
					operation_id = %truncate_id(&payload.operation_id),
					status = ?status,
					polls = payload.attempt + 1,
					"Rebalance operation finished"
				);
			},
			PollDecision::RetryAfter(delay) => {
				let op = self
					.orchestrator
					.operation(&payload.operation_id)
					.await
					.map_err(orchestrator_error)?
					.ok_or_else(|| {
						JobError::Permanent(format!("operation {} vanished", payload.operation_id))
					})?;
				let queue = upgrade(&self.queue)?;
				schedule_poll(&queue, &op, payload.attempt + 1, delay)?;
				tracing::debug!(
					operation_id = %truncate_id(&op.id),
					attempt = payload.attempt + 1,
					delay_secs = delay.as_secs(),
					"Rebalance poll scheduled"
				);
			},
		}
		Ok(())
	}
}

/// Submits an approved execution plan in order and waits for confirmation.
///
/// Hashes are recorded after each submission so a retried job continues
/// with the first transaction not yet sent.
pub struct FulfillIntentHandler {
	pub(crate) delivery: Arc<DeliveryService>,
	pub(crate) storage: Arc<StorageService>,
	pub(crate) event_bus: EventBus,
}

impl FulfillIntentHandler {
	async fn fulfill(&self, plan: ExecutionPlan) -> Result<(), SolverError> {
		let mut record = self
			.storage
			.find::<FulfillmentRecord>(FULFILLMENTS_NAMESPACE, &plan.quote_id)
			.await?
			.unwrap_or_else(|| FulfillmentRecord {
				quote_id: plan.quote_id.clone(),
				intent_hash: plan.intent_hash,
				chain_id: plan.chain_id,
				tx_hashes: Vec::new(),
				confirmed: false,
			});
		if record.confirmed {
			tracing::debug!(quote_id = %plan.quote_id, "Fulfillment already confirmed");
			return Ok(());
		}

		for tx in plan.transactions.iter().skip(record.tx_hashes.len()) {
			let tx_hash = self.delivery.deliver(tx.clone()).await?;
			record.tx_hashes.push(tx_hash);
			self.storage
				.store(FULFILLMENTS_NAMESPACE, &record.quote_id, &record)
				.await?;
			self.event_bus
				.publish(SolverEvent::Delivery(DeliveryEvent::TransactionPending {
					chain_id: plan.chain_id,
					tx_hash,
				}));
		}

		let mut last_block = 0;
		for tx_hash in &record.tx_hashes {
			match self.delivery.confirm(plan.chain_id, tx_hash).await {
				Ok(receipt) => last_block = receipt.block_number,
				Err(e) => {
					if !e.is_transient() {
						self.event_bus
							.publish(SolverEvent::Delivery(DeliveryEvent::TransactionFailed {
								chain_id: plan.chain_id,
								tx_hash: *tx_hash,
								error: e.to_string(),
							}));
					}
					return Err(e.into());
				},
			}
		}

		record.confirmed = true;
		self.storage
			.store(FULFILLMENTS_NAMESPACE, &record.quote_id, &record)
			.await?;
		if let Some(tx_hash) = record.tx_hashes.last() {
			self.event_bus
				.publish(SolverEvent::Delivery(DeliveryEvent::TransactionConfirmed {
					chain_id: plan.chain_id,
					tx_hash: *tx_hash,
					block_number: last_block,
				}));
		}
		tracing::info!(
			quote_id = %plan.quote_id,
			intent_hash = %truncate_id(&plan.intent_hash.to_string()),
			chain_id = plan.chain_id,
			transactions = record.tx_hashes.len(),
			"Intent fulfilled"
		);
		Ok(())
	}
}

#[async_trait]
impl JobHandler for FulfillIntentHandler {
	async fn handle(&self, job: &Job) -> Result<(), JobError> {
		let plan: ExecutionPlan = job.payload()?;
		Ok(self.fulfill(plan).await?)
	}
}

pub struct CheckWithdrawalsHandler {
	pub(crate) batcher: Arc<WithdrawalBatcher>,
	pub(crate) queue: Weak<JobQueue>,
}

#[async_trait]
impl JobHandler for CheckWithdrawalsHandler {
	async fn handle(&self, _job: &Job) -> Result<(), JobError> {
		let chains = self.batcher.pending_chains().await?;
		let queue = upgrade(&self.queue)?;
		for chain_id in chains {
			queue.enqueue_with(
				chain_group_key(chain_id),
				SUBMIT_WITHDRAWALS,
				json!({ "chain_id": chain_id }),
				JobOptions {
					dedup_id: Some(format!("withdraw:{}", chain_id)),
					..Default::default()
				},
			)?;
		}
		Ok(())
	}
}

pub struct SubmitWithdrawalsHandler {
	pub(crate) batcher: Arc<WithdrawalBatcher>,
}

#[async_trait]
impl JobHandler for SubmitWithdrawalsHandler {
	async fn handle(&self, job: &Job) -> Result<(), JobError> {
		let payload: WithdrawalPayload = job.payload()?;
		self.batcher.withdraw(payload.chain_id).await?;
		Ok(())
	}
}
