//! Rebalance orchestration.
//!
//! The orchestrator evaluates wallet balances, collects quotes from every
//! provider, selects one and drives the resulting operation stage by stage.
//! Every stage transition is persisted before the side effect it guards, so
//! a restarted solver resumes exactly where it stopped:
//!
//! ```text
//! Pending -> Submitting{nonce} -> Submitted -> Completed
//!         \-> AwaitingExternal ------------/
//! ```
//!
//! A stage found in `Submitting` on resume is resubmitted with the recorded
//! nonce only if the chain nonce has not moved; otherwise the outcome is
//! unknown and the operation fails for reconciliation.

use crate::analysis::{classify, BalanceState, TokenAnalysis};
use crate::{
	ExternalStatus, ProviderError, RebalanceProviderInterface, StageAction, StageContext,
};
use dashmap::DashMap;
use futures::future::{join_all, try_join_all};
use rust_decimal::Decimal;
use solver_config::Config;
use solver_delivery::{DeliveryError, DeliveryService};
use solver_storage::{StorageError, StorageService};
use solver_types::{
	normalize, truncate_id, Address, Clock, EventBus, OperationHandle, OperationStatus,
	RebalanceEvent, RebalanceOperation, RebalancePhase, RebalanceQuote, SolverEvent, StageStatus,
	TokenData, Transaction, U256,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

pub const OPERATIONS_NAMESPACE: &str = "rebalance_operations";
/// Ids of operations that are not terminal yet.
pub const INDEX_NAMESPACE: &str = "operation_index";

#[derive(Debug, Error)]
pub enum OrchestratorError {
	#[error("Provider error: {0}")]
	Provider(#[from] ProviderError),
	#[error("Delivery error: {0}")]
	Delivery(#[from] DeliveryError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("Operation {0} not found")]
	OperationNotFound(String),
	#[error("Unknown provider '{0}'")]
	UnknownProvider(String),
	#[error("Invalid quote: {0}")]
	InvalidQuote(String),
}

impl OrchestratorError {
	/// Whether the job that hit this error should be retried.
	pub fn is_transient(&self) -> bool {
		match self {
			OrchestratorError::Provider(e) => e.is_transient(),
			OrchestratorError::Delivery(e) => e.is_transient(),
			OrchestratorError::Storage(e) => matches!(e, StorageError::Backend(_)),
			_ => false,
		}
	}
}

/// Outcome of a poll of a waiting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
	/// The operation reached a terminal status.
	Done(OperationStatus),
	/// Still waiting; poll again after the delay.
	RetryAfter(Duration),
}

pub struct RebalanceOrchestrator {
	config: Arc<Config>,
	providers: Vec<Arc<dyn RebalanceProviderInterface>>,
	delivery: Arc<DeliveryService>,
	storage: Arc<StorageService>,
	clock: Arc<dyn Clock>,
	event_bus: EventBus,
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RebalanceOrchestrator {
	pub fn new(
		config: Arc<Config>,
		providers: Vec<Arc<dyn RebalanceProviderInterface>>,
		delivery: Arc<DeliveryService>,
		storage: Arc<StorageService>,
		clock: Arc<dyn Clock>,
		event_bus: EventBus,
	) -> Self {
		Self {
			config,
			providers,
			delivery,
			storage,
			clock,
			event_bus,
			locks: DashMap::new(),
		}
	}

	fn provider(&self, name: &str) -> Result<Arc<dyn RebalanceProviderInterface>, OrchestratorError> {
		self.providers
			.iter()
			.find(|p| p.name() == name)
			.cloned()
			.ok_or_else(|| OrchestratorError::UnknownProvider(name.to_string()))
	}

	fn lock_for(&self, operation_id: &str) -> Arc<Mutex<()>> {
		self.locks.entry(operation_id.to_string()).or_default().clone()
	}

	fn publish(&self, event: RebalanceEvent) {
		self.event_bus.publish(SolverEvent::Rebalance(event));
	}

	fn publish_phase(&self, wallet: Address, phase: RebalancePhase) {
		tracing::info!(wallet = %wallet, phase = ?phase, "Rebalance phase");
		self.publish(RebalanceEvent::PhaseChanged {
			wallet: wallet.to_string(),
			phase,
		});
	}

	pub async fn operation(&self, id: &str) -> Result<Option<RebalanceOperation>, OrchestratorError> {
		Ok(self.storage.find(OPERATIONS_NAMESPACE, id).await?)
	}

	async fn load(&self, id: &str) -> Result<RebalanceOperation, OrchestratorError> {
		self.operation(id)
			.await?
			.ok_or_else(|| OrchestratorError::OperationNotFound(id.to_string()))
	}

	async fn save(&self, op: &RebalanceOperation) -> Result<(), OrchestratorError> {
		self.storage.store(OPERATIONS_NAMESPACE, &op.id, op).await?;
		if op.is_terminal() {
			self.storage.remove(INDEX_NAMESPACE, &op.id).await?;
			self.locks.remove(&op.id);
		} else {
			self.storage
				.store(INDEX_NAMESPACE, &op.id, &op.wallet)
				.await?;
		}
		Ok(())
	}

	/// Operations that still need to be driven.
	pub async fn active_operations(&self) -> Result<Vec<RebalanceOperation>, OrchestratorError> {
		let mut operations = Vec::new();
		for id in self.storage.list_ids(INDEX_NAMESPACE).await? {
			match self.operation(&id).await? {
				Some(op) if !op.is_terminal() => operations.push(op),
				_ => self.storage.remove(INDEX_NAMESPACE, &id).await?,
			}
		}
		Ok(operations)
	}

	/// Ids of non-terminal operations to re-schedule after a restart.
	pub async fn resume(&self) -> Result<Vec<String>, OrchestratorError> {
		let ids: Vec<String> = self
			.active_operations()
			.await?
			.into_iter()
			.map(|op| op.id)
			.collect();
		if !ids.is_empty() {
			tracing::info!(count = ids.len(), "Resuming rebalance operations");
		}
		Ok(ids)
	}

	/// Reads every configured rebalance token balance and classifies it.
	pub async fn analyze(&self, wallet: Address) -> Result<Vec<TokenAnalysis>, OrchestratorError> {
		let bands: Vec<_> = self
			.config
			.rebalance
			.tokens
			.iter()
			.filter_map(|band| {
				self.config
					.token_data(band.chain_id, &band.symbol)
					.map(|token| (token, band.clone()))
			})
			.collect();

		let balances = try_join_all(bands.iter().map(|(token, _)| {
			self.delivery
				.token_balance(token.chain_id, token.address, wallet)
		}))
		.await?;

		let pending: Vec<RebalanceOperation> = self
			.active_operations()
			.await?
			.into_iter()
			.filter(|op| op.wallet == wallet)
			.collect();

		let analyses = classify(&bands, &balances, &pending);
		for analysis in &analyses {
			tracing::debug!(
				token = %analysis.token,
				balance = %analysis.balance,
				effective = %analysis.effective_balance,
				state = ?analysis.state,
				"Token balance"
			);
		}
		Ok(analyses)
	}

	/// Collects quotes from every provider serving the route. Provider
	/// failures are logged and skipped.
	pub async fn get_quotes(
		&self,
		token_in: &TokenData,
		token_out: &TokenData,
		amount: U256,
	) -> Vec<RebalanceQuote> {
		let available: Vec<_> = self
			.providers
			.iter()
			.filter(|p| p.is_route_available(token_in, token_out))
			.collect();

		let results = join_all(
			available
				.iter()
				.map(|provider| provider.get_quote(token_in, token_out, amount)),
		)
		.await;

		let mut quotes = Vec::new();
		for (provider, result) in available.iter().zip(results) {
			match result {
				Ok(mut provided) => quotes.append(&mut provided),
				Err(e) => tracing::warn!(
					provider = provider.name(),
					route = %format!("{} -> {}", token_in, token_out),
					error = %e,
					"Provider quote failed"
				),
			}
		}
		quotes
	}

	/// Lowest slippage within `max_slippage`, ties broken by fee.
	///
	/// Slippage is recomputed from each quote's amounts; inverted
	/// (negative) quotes are invalid and dropped.
	pub fn select_best(quotes: Vec<RebalanceQuote>, max_slippage: Decimal) -> Option<RebalanceQuote> {
		quotes
			.into_iter()
			.filter_map(|mut quote| {
				let slippage = match quote.derive_slippage() {
					Ok(slippage) => slippage,
					Err(e) => {
						tracing::debug!(provider = %quote.provider, error = %e, "Unusable quote");
						return None;
					},
				};
				quote.slippage = slippage;
				if quote.is_inverted() {
					tracing::warn!(provider = %quote.provider, slippage = %slippage, "Inverted quote rejected");
					return None;
				}
				if slippage > max_slippage {
					tracing::debug!(provider = %quote.provider, slippage = %slippage, "Quote above max slippage");
					return None;
				}
				Some(quote)
			})
			.min_by(|a, b| a.slippage.cmp(&b.slippage).then(a.fee.cmp(&b.fee)))
	}

	/// Persists a `Pending` operation for `quote` without sending anything.
	///
	/// The operation id is derived from the request and the route, so a
	/// repeated request returns the existing operation untouched.
	pub async fn create_operation(
		&self,
		wallet: Address,
		request_id: &str,
		quote: RebalanceQuote,
	) -> Result<OperationHandle, OrchestratorError> {
		let provider = self.provider(&quote.provider)?;
		let slippage = quote
			.derive_slippage()
			.map_err(|e| OrchestratorError::InvalidQuote(e.to_string()))?;
		if slippage.is_sign_negative() && !slippage.is_zero() {
			return Err(OrchestratorError::InvalidQuote(format!(
				"inverted price, slippage {}",
				slippage
			)));
		}

		let plan = provider.plan(&quote);
		let op = RebalanceOperation::new(wallet, request_id, quote, &plan, self.clock.now());

		let lock = self.lock_for(&op.id);
		let _guard = lock.lock().await;

		if let Some(existing) = self.operation(&op.id).await? {
			tracing::debug!(operation_id = %truncate_id(&op.id), "Operation already exists");
			return Ok(existing.handle(false));
		}

		self.save(&op).await?;
		tracing::info!(
			operation_id = %truncate_id(&op.id),
			provider = %op.provider,
			route = %format!("{} -> {}", op.quote.token_in, op.quote.token_out),
			amount_in = %op.quote.amount_in,
			stages = op.stages.len(),
			"Rebalance operation created"
		);
		self.publish(RebalanceEvent::OperationCreated {
			operation_id: op.id.clone(),
			strategy: op.strategy,
		});
		Ok(op.handle(true))
	}

	/// Persists an operation for `quote` and submits its first stage.
	///
	/// Callers that serialize submissions per chain should use
	/// [`Self::create_operation`] and drive the first stage with
	/// [`Self::advance`] from the chain's lane instead.
	pub async fn execute(
		&self,
		wallet: Address,
		request_id: &str,
		quote: RebalanceQuote,
	) -> Result<OperationHandle, OrchestratorError> {
		let handle = self.create_operation(wallet, request_id, quote).await?;
		if !handle.created {
			return Ok(handle);
		}

		let lock = self.lock_for(&handle.id);
		let _guard = lock.lock().await;
		let mut op = self.load(&handle.id).await?;
		if let Err(e) = self.drive(&mut op, true).await {
			if !e.is_transient() {
				return Err(e);
			}
			tracing::warn!(
				operation_id = %truncate_id(&op.id),
				error = %e,
				"First stage not submitted yet, will retry on advance"
			);
		}
		Ok(op.handle(true))
	}

	/// Drives the operation as far as it can go without waiting.
	pub async fn advance(&self, operation_id: &str) -> Result<OperationStatus, OrchestratorError> {
		let lock = self.lock_for(operation_id);
		let _guard = lock.lock().await;

		let mut op = self.load(operation_id).await?;
		self.drive(&mut op, false).await?;
		Ok(op.status)
	}

	/// Advances a waiting operation and decides when to look again.
	///
	/// `attempt` counts the polls made so far and sets the backoff; a stage
	/// still waiting after `max_poll_attempts` fails the operation.
	pub async fn poll(
		&self,
		operation_id: &str,
		attempt: u32,
	) -> Result<PollDecision, OrchestratorError> {
		let lock = self.lock_for(operation_id);
		let _guard = lock.lock().await;

		let mut op = self.load(operation_id).await?;
		self.drive(&mut op, false).await?;
		if op.is_terminal() {
			return Ok(PollDecision::Done(op.status));
		}

		let settings = &self.config.rebalance;
		let attempts = op.current_stage().map(|s| s.attempts).unwrap_or_default();
		if attempts >= settings.max_poll_attempts {
			let reason = format!(
				"no external confirmation after {} attempts",
				settings.max_poll_attempts
			);
			self.fail(&mut op, reason, false).await?;
			return Ok(PollDecision::Done(op.status));
		}

		let exponent = attempt.min(16);
		let delay = settings
			.poll_base_delay_secs
			.saturating_mul(1u64 << exponent)
			.min(settings.poll_max_delay_secs);
		Ok(PollDecision::RetryAfter(Duration::from_secs(delay)))
	}

	/// Moves a non-terminal operation to `Failed`.
	pub async fn fail_operation(
		&self,
		operation_id: &str,
		reason: &str,
	) -> Result<OperationStatus, OrchestratorError> {
		let lock = self.lock_for(operation_id);
		let _guard = lock.lock().await;

		let mut op = self.load(operation_id).await?;
		if !op.is_terminal() {
			self.fail(&mut op, reason, false).await?;
		}
		Ok(op.status)
	}

	/// One evaluate, quote and select cycle for `wallet`.
	///
	/// Each deficit token (most severe first) is filled from one surplus
	/// token, trying same-chain sources before cross-chain ones. Selected
	/// operations are persisted `Pending`; nothing is submitted here, the
	/// caller advances each one from the lane of its first stage's chain.
	pub async fn start_rebalancing(
		&self,
		wallet: Address,
		request_id: &str,
	) -> Result<Vec<OperationHandle>, OrchestratorError> {
		self.publish_phase(wallet, RebalancePhase::Evaluating);
		let analyses = self.analyze(wallet).await?;

		let deficits: Vec<&TokenAnalysis> = analyses
			.iter()
			.filter(|a| a.state == BalanceState::Deficit)
			.collect();
		if deficits.is_empty() {
			tracing::debug!(wallet = %wallet, "All balances within range");
			return Ok(Vec::new());
		}
		let surpluses: Vec<&TokenAnalysis> = analyses
			.iter()
			.filter(|a| a.state == BalanceState::Surplus)
			.collect();
		let mut remaining: Vec<U256> = surpluses.iter().map(|s| s.surplus()).collect();

		self.publish_phase(wallet, RebalancePhase::Quoting);
		let mut handles = Vec::new();
		for deficit in deficits {
			let mut candidates: Vec<usize> = (0..surpluses.len()).collect();
			candidates.sort_by_key(|&i| surpluses[i].token.chain_id != deficit.token.chain_id);

			for index in candidates {
				let source = &surpluses[index].token;
				let needed = normalize(deficit.deficit(), deficit.token.decimals, source.decimals);
				let amount = needed.min(remaining[index]);
				if amount.is_zero() {
					continue;
				}

				let quotes = self.get_quotes(source, &deficit.token, amount).await;
				let Some(best) = Self::select_best(quotes, self.config.rebalance.max_slippage)
				else {
					tracing::debug!(
						route = %format!("{} -> {}", source, deficit.token),
						"No acceptable quote"
					);
					continue;
				};

				self.publish_phase(wallet, RebalancePhase::Selected);
				tracing::info!(
					provider = %best.provider,
					route = %format!("{} -> {}", source, deficit.token),
					amount_in = %best.amount_in,
					slippage = %best.slippage,
					"Rebalance quote selected"
				);

				let handle = self.create_operation(wallet, request_id, best).await?;
				self.publish_phase(wallet, RebalancePhase::from(handle.status));
				remaining[index] = remaining[index].saturating_sub(amount);
				handles.push(handle);
				break;
			}
		}
		Ok(handles)
	}

	fn context<'a>(op: &'a RebalanceOperation) -> Option<StageContext<'a>> {
		op.current_stage().map(|stage| StageContext {
			operation_id: &op.id,
			wallet: op.wallet,
			quote: &op.quote,
			stage_index: op.current_stage_index,
			stage,
			artifacts: &op.artifacts,
		})
	}

	/// Runs the stage protocol until the operation has to wait.
	///
	/// With `first_submission_only` the loop stops once a stage has been
	/// handed to the chain.
	async fn drive(
		&self,
		op: &mut RebalanceOperation,
		first_submission_only: bool,
	) -> Result<(), OrchestratorError> {
		let provider = self.provider(&op.provider)?;

		loop {
			if op.is_terminal() {
				return Ok(());
			}
			let Some(stage) = op.current_stage().cloned() else {
				return Ok(());
			};

			match stage.status {
				StageStatus::Pending => {
					let action = match Self::context(op) {
						Some(ctx) => provider.build_stage(&ctx).await,
						None => return Ok(()),
					};
					match action {
						Ok(StageAction::Submit(transactions)) => {
							if !self.submit_stage(op, transactions, None).await? {
								return Ok(());
							}
							if first_submission_only {
								return Ok(());
							}
						},
						Ok(StageAction::Poll) => {
							self.set_stage_status(op, StageStatus::AwaitingExternal);
							op.status = OperationStatus::AwaitingExternal;
							self.save(op).await?;
							self.publish_phase(op.wallet, RebalancePhase::AwaitingExternalConfirmation);
							return Ok(());
						},
						Err(e) => return self.provider_failure(op, e).await,
					}
				},
				StageStatus::Submitting { nonce } => {
					let sent = stage.tx_hashes.len();
					let chain_nonce = self.delivery.get_nonce(stage.chain_id, op.wallet).await?;
					if chain_nonce != nonce + sent as u64 {
						let reason = format!(
							"stage {} interrupted during submission: recorded nonce {} with {} sent, chain nonce {}",
							stage.kind, nonce, sent, chain_nonce
						);
						self.fail(op, reason, true).await?;
						return Ok(());
					}

					tracing::info!(
						operation_id = %truncate_id(&op.id),
						stage = %stage.kind,
						nonce,
						sent,
						"Resuming interrupted stage"
					);
					let action = match Self::context(op) {
						Some(ctx) => provider.build_stage(&ctx).await,
						None => return Ok(()),
					};
					match action {
						Ok(StageAction::Submit(transactions)) => {
							if sent > 0 && transactions.len() != stage.tx_count {
								let reason = format!(
									"stage {} rebuilt with {} transactions, {} were planned",
									stage.kind,
									transactions.len(),
									stage.tx_count
								);
								self.fail(op, reason, true).await?;
								return Ok(());
							}
							if !self.submit_stage(op, transactions, Some(nonce)).await? {
								return Ok(());
							}
						},
						Ok(StageAction::Poll) if sent == 0 => {
							self.set_stage_status(op, StageStatus::Pending);
							self.save(op).await?;
						},
						Ok(StageAction::Poll) => {
							let reason = format!("stage {} no longer submits transactions", stage.kind);
							self.fail(op, reason, true).await?;
							return Ok(());
						},
						Err(e) => return self.provider_failure(op, e).await,
					}
				},
				StageStatus::Submitted => {
					let mut receipts = Vec::with_capacity(stage.tx_hashes.len());
					for hash in &stage.tx_hashes {
						match self.delivery.get_receipt(stage.chain_id, hash).await? {
							Some(receipt) => receipts.push(receipt),
							None => {
								self.record_wait(op).await?;
								return Ok(());
							},
						}
					}

					if let Some(reverted) = receipts.iter().find(|r| !r.success) {
						let reason = format!("transaction {} reverted in stage {}", reverted.hash, stage.kind);
						// A reverted stage moved no funds.
						self.set_stage_status(op, StageStatus::Failed {
							reason: reason.clone(),
						});
						self.fail(op, reason, false).await?;
						return Ok(());
					}

					let artifacts = match Self::context(op) {
						Some(ctx) => provider.on_stage_confirmed(&ctx, &receipts).await,
						None => return Ok(()),
					};
					match artifacts {
						Ok(artifacts) => self.complete_stage(op, artifacts).await?,
						Err(e) => return self.provider_failure(op, e).await,
					}
				},
				StageStatus::AwaitingExternal => {
					let status = match Self::context(op) {
						Some(ctx) => provider.poll_stage(&ctx).await,
						None => return Ok(()),
					};
					match status {
						Ok(ExternalStatus::Pending) => {
							self.record_wait(op).await?;
							return Ok(());
						},
						Ok(ExternalStatus::Ready(artifacts)) => self.complete_stage(op, artifacts).await?,
						Err(e) => return self.provider_failure(op, e).await,
					}
				},
				StageStatus::Completed | StageStatus::Failed { .. } => return Ok(()),
			}
		}
	}

	fn set_stage_status(&self, op: &mut RebalanceOperation, status: StageStatus) {
		let now = self.clock.now();
		if let Some(stage) = op.current_stage_mut() {
			stage.status = status;
			stage.updated_at = now;
		}
		op.updated_at = now;
	}

	async fn record_wait(&self, op: &mut RebalanceOperation) -> Result<(), OrchestratorError> {
		if let Some(stage) = op.current_stage_mut() {
			stage.attempts += 1;
		}
		self.save(op).await
	}

	/// Records `Submitting`, broadcasts with consecutive pinned nonces, then
	/// records `Submitted`.
	///
	/// With `resume_nonce` the stage continues after the transactions it
	/// already recorded. Returns false when a permanent delivery error
	/// failed the operation.
	async fn submit_stage(
		&self,
		op: &mut RebalanceOperation,
		transactions: Vec<Transaction>,
		resume_nonce: Option<u64>,
	) -> Result<bool, OrchestratorError> {
		let Some(stage) = op.current_stage().cloned() else {
			return Ok(false);
		};
		let (nonce, sent) = match resume_nonce {
			Some(nonce) => (nonce, stage.tx_hashes.len()),
			None => (self.delivery.get_nonce(stage.chain_id, op.wallet).await?, 0),
		};

		self.set_stage_status(op, StageStatus::Submitting { nonce });
		if let Some(stage) = op.current_stage_mut() {
			stage.nonce = Some(nonce);
			stage.attempts += 1;
			stage.tx_count = transactions.len();
			stage.tx_hashes.truncate(sent);
		}
		op.status = OperationStatus::InProgress;
		self.save(op).await?;

		for (offset, tx) in transactions.into_iter().enumerate().skip(sent) {
			let tx = Transaction {
				chain_id: stage.chain_id,
				..tx
			}
			.with_nonce(nonce + offset as u64);

			match self.delivery.deliver(tx).await {
				Ok(hash) => {
					if let Some(stage) = op.current_stage_mut() {
						stage.tx_hashes.push(hash);
					}
					self.save(op).await?;
				},
				Err(e) if e.is_transient() => return Err(e.into()),
				Err(e) => {
					let broadcast = op.current_stage().is_some_and(|s| !s.tx_hashes.is_empty());
					let reason = format!("stage {} submission failed: {}", stage.kind, e);
					self.fail(op, reason, broadcast).await?;
					return Ok(false);
				},
			}
		}

		self.set_stage_status(op, StageStatus::Submitted);
		self.save(op).await?;

		let tx_hashes = op.current_stage().map(|s| s.tx_hashes.clone()).unwrap_or_default();
		tracing::info!(
			operation_id = %truncate_id(&op.id),
			stage = %stage.kind,
			chain_id = stage.chain_id,
			nonce,
			transactions = tx_hashes.len(),
			"Stage submitted"
		);
		self.publish(RebalanceEvent::StageSubmitted {
			operation_id: op.id.clone(),
			stage_index: op.current_stage_index,
			stage: stage.kind,
			tx_hashes,
		});
		Ok(true)
	}

	async fn complete_stage(
		&self,
		op: &mut RebalanceOperation,
		artifacts: serde_json::Map<String, serde_json::Value>,
	) -> Result<(), OrchestratorError> {
		let index = op.current_stage_index;
		let kind = op.stages[index].kind;

		op.merge_artifacts(artifacts);
		let finished = op.complete_current_stage(self.clock.now());
		self.save(op).await?;

		tracing::info!(operation_id = %truncate_id(&op.id), stage = %kind, "Stage completed");
		self.publish(RebalanceEvent::StageCompleted {
			operation_id: op.id.clone(),
			stage_index: index,
			stage: kind,
		});

		if finished {
			tracing::info!(
				operation_id = %truncate_id(&op.id),
				amount_out_min = %op.quote.amount_out_min,
				"Rebalance operation completed"
			);
			self.publish(RebalanceEvent::Completed {
				operation_id: op.id.clone(),
			});
			self.publish_phase(op.wallet, RebalancePhase::Completed);
		}
		Ok(())
	}

	/// Transient provider errors propagate for retry, anything else fails
	/// the operation.
	async fn provider_failure(
		&self,
		op: &mut RebalanceOperation,
		error: ProviderError,
	) -> Result<(), OrchestratorError> {
		if error.is_transient() {
			return Err(error.into());
		}
		self.fail(op, error.to_string(), false).await
	}

	async fn fail(
		&self,
		op: &mut RebalanceOperation,
		reason: impl Into<String>,
		reconciliation_required: bool,
	) -> Result<(), OrchestratorError> {
		let report = op
			.fail(reason, reconciliation_required, self.clock.now())
			.clone();
		self.save(op).await?;

		if report.stranded {
			tracing::error!(
				operation_id = %op.id,
				stage = %report.stage,
				stage_index = report.stage_index,
				amount_in = %op.quote.amount_in,
				route = %format!("{} -> {}", op.quote.token_in, op.quote.token_out),
				reason = %report.reason,
				"Funds stranded mid-route, manual reconciliation required"
			);
			self.publish(RebalanceEvent::FundsStranded {
				operation_id: op.id.clone(),
				stage_index: report.stage_index,
				reason: report.reason.clone(),
			});
		} else {
			tracing::warn!(
				operation_id = %truncate_id(&op.id),
				stage = %report.stage,
				reconciliation_required = report.reconciliation_required,
				reason = %report.reason,
				"Rebalance operation failed"
			);
		}
		self.publish(RebalanceEvent::Failed {
			operation_id: op.id.clone(),
			stage_index: report.stage_index,
			reason: report.reason,
		});
		self.publish_phase(op.wallet, RebalancePhase::Failed);
		Ok(())
	}
}
