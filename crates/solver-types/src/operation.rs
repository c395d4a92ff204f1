//! Persisted multi-stage rebalance operations.
//!
//! An operation is created once a quote has been selected and is then
//! advanced one stage at a time. Every stage records its own status so a
//! restarted process resumes from the last durable step.

use crate::{Address, RebalanceQuote, Strategy, TokenData, TransactionHash};
use alloy::primitives::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One step of a rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
	SourceSwap,
	Burn,
	AwaitAttestation,
	Mint,
	DestinationSwap,
}

impl StageKind {
	/// Funds cannot be recovered by the solver once this stage lands.
	pub fn is_irreversible(&self) -> bool {
		matches!(self, StageKind::Burn)
	}

	/// Whether the stage sends transactions, as opposed to polling.
	pub fn submits_transactions(&self) -> bool {
		!matches!(self, StageKind::AwaitAttestation)
	}
}

impl fmt::Display for StageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			StageKind::SourceSwap => "source_swap",
			StageKind::Burn => "burn",
			StageKind::AwaitAttestation => "await_attestation",
			StageKind::Mint => "mint",
			StageKind::DestinationSwap => "destination_swap",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageStatus {
	Pending,
	/// Recorded before broadcasting, with the first nonce the stage uses.
	Submitting { nonce: u64 },
	/// Transactions broadcast; waiting for receipts.
	Submitted,
	/// Waiting on an external service (e.g. attestation).
	AwaitingExternal,
	Completed,
	Failed { reason: String },
}

/// Stage layout a provider proposes for a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
	pub kind: StageKind,
	pub chain_id: u64,
}

impl StagePlan {
	pub fn new(kind: StageKind, chain_id: u64) -> Self {
		Self { kind, chain_id }
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
	pub kind: StageKind,
	pub chain_id: u64,
	pub status: StageStatus,
	pub nonce: Option<u64>,
	#[serde(default)]
	pub tx_hashes: Vec<TransactionHash>,
	/// Transactions the stage submits, known once submission starts.
	#[serde(default)]
	pub tx_count: usize,
	/// Submission or poll attempts made so far.
	pub attempts: u32,
	pub updated_at: u64,
}

impl Stage {
	fn from_plan(plan: &StagePlan, now: u64) -> Self {
		Self {
			kind: plan.kind,
			chain_id: plan.chain_id,
			status: StageStatus::Pending,
			nonce: None,
			tx_hashes: Vec::new(),
			tx_count: 0,
			attempts: 0,
			updated_at: now,
		}
	}

	/// Whether the stage's final call may already be on chain.
	///
	/// Providers put the call that moves funds last (approvals go first), so
	/// a stage interrupted after its approval has not moved anything yet.
	pub fn final_call_broadcast(&self) -> bool {
		match self.status {
			StageStatus::Submitted | StageStatus::Completed => true,
			StageStatus::Submitting { .. } => {
				self.tx_count > 0 && self.tx_hashes.len() >= self.tx_count
			},
			_ => false,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
	Pending,
	InProgress,
	AwaitingExternal,
	Completed,
	Failed,
}

impl OperationStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, OperationStatus::Completed | OperationStatus::Failed)
	}
}

/// Orchestrator phase, from balance evaluation to a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalancePhase {
	Evaluating,
	Quoting,
	Selected,
	Executing,
	AwaitingExternalConfirmation,
	Completed,
	Failed,
}

impl From<OperationStatus> for RebalancePhase {
	fn from(status: OperationStatus) -> Self {
		match status {
			OperationStatus::Pending => RebalancePhase::Selected,
			OperationStatus::InProgress => RebalancePhase::Executing,
			OperationStatus::AwaitingExternal => RebalancePhase::AwaitingExternalConfirmation,
			OperationStatus::Completed => RebalancePhase::Completed,
			OperationStatus::Failed => RebalancePhase::Failed,
		}
	}
}

/// Where and why an operation stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
	pub stage_index: usize,
	pub stage: StageKind,
	pub reason: String,
	/// Value left the source chain but never arrived.
	pub stranded: bool,
	/// The on-chain outcome of the stage is unknown and needs an operator.
	pub reconciliation_required: bool,
}

/// Reference returned to callers of `execute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
	pub id: String,
	pub status: OperationStatus,
	/// False when an operation with the same identity already existed.
	pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceOperation {
	pub id: String,
	pub strategy: Strategy,
	pub provider: String,
	pub wallet: Address,
	pub request_id: String,
	pub quote: RebalanceQuote,
	pub stages: Vec<Stage>,
	pub current_stage_index: usize,
	pub status: OperationStatus,
	pub failure: Option<FailureReport>,
	/// Values produced by completed stages (message bytes, attestation, ...).
	#[serde(default)]
	pub artifacts: Map<String, Value>,
	pub created_at: u64,
	pub updated_at: u64,
}

impl RebalanceOperation {
	/// Identity of the source transfer an operation moves.
	pub fn source_ref(request_id: &str, token_in: &TokenData) -> String {
		format!("{}:{}:{}", request_id, token_in.chain_id, token_in.address)
	}

	/// Deterministic id over `(strategy, source ref, destination chain)`.
	pub fn derive_id(strategy: Strategy, source_ref: &str, destination_chain: u64) -> String {
		let preimage = format!("{}|{}|{}", strategy.as_str(), source_ref, destination_chain);
		format!("0x{}", hex::encode(keccak256(preimage.as_bytes())))
	}

	pub fn new(
		wallet: Address,
		request_id: impl Into<String>,
		quote: RebalanceQuote,
		plan: &[StagePlan],
		now: u64,
	) -> Self {
		let request_id = request_id.into();
		let source = Self::source_ref(&request_id, &quote.token_in);
		let id = Self::derive_id(quote.strategy, &source, quote.token_out.chain_id);
		Self {
			id,
			strategy: quote.strategy,
			provider: quote.provider.clone(),
			wallet,
			request_id,
			quote,
			stages: plan.iter().map(|p| Stage::from_plan(p, now)).collect(),
			current_stage_index: 0,
			status: OperationStatus::Pending,
			failure: None,
			artifacts: Map::new(),
			created_at: now,
			updated_at: now,
		}
	}

	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	pub fn current_stage(&self) -> Option<&Stage> {
		self.stages.get(self.current_stage_index)
	}

	pub fn current_stage_mut(&mut self) -> Option<&mut Stage> {
		self.stages.get_mut(self.current_stage_index)
	}

	pub fn handle(&self, created: bool) -> OperationHandle {
		OperationHandle {
			id: self.id.clone(),
			status: self.status,
			created,
		}
	}

	pub fn artifact(&self, key: &str) -> Option<&Value> {
		self.artifacts.get(key)
	}

	pub fn merge_artifacts(&mut self, artifacts: Map<String, Value>) {
		self.artifacts.extend(artifacts);
	}

	/// Marks the current stage completed and moves to the next one.
	///
	/// Returns true when the operation reached `Completed`.
	pub fn complete_current_stage(&mut self, now: u64) -> bool {
		if let Some(stage) = self.current_stage_mut() {
			stage.status = StageStatus::Completed;
			stage.updated_at = now;
		}
		self.current_stage_index += 1;
		self.updated_at = now;
		if self.current_stage_index >= self.stages.len() {
			self.status = OperationStatus::Completed;
			true
		} else {
			self.status = OperationStatus::InProgress;
			false
		}
	}

	/// Whether failing at `index` leaves value stranded mid-route: an
	/// irreversible stage landed and no later mint has delivered the funds.
	pub fn is_stranded_at(&self, index: usize) -> bool {
		let Some(left) = self.stages.iter().enumerate().rposition(|(i, stage)| {
			stage.kind.is_irreversible()
				&& ((i < index && stage.status == StageStatus::Completed)
					|| (i == index && stage.final_call_broadcast()))
		}) else {
			return false;
		};
		!self.stages
			.iter()
			.take(index)
			.skip(left + 1)
			.any(|stage| stage.kind == StageKind::Mint && stage.status == StageStatus::Completed)
	}

	/// Moves the operation to `Failed` at the current stage.
	pub fn fail(
		&mut self,
		reason: impl Into<String>,
		reconciliation_required: bool,
		now: u64,
	) -> &FailureReport {
		let reason = reason.into();
		let index = self.current_stage_index.min(self.stages.len().saturating_sub(1));
		let stranded = self.is_stranded_at(index);
		let kind = self.stages.get(index).map(|s| s.kind).unwrap_or(StageKind::Burn);

		if let Some(stage) = self.stages.get_mut(index) {
			stage.status = StageStatus::Failed {
				reason: reason.clone(),
			};
			stage.updated_at = now;
		}
		self.status = OperationStatus::Failed;
		self.updated_at = now;
		self.failure.insert(FailureReport {
			stage_index: index,
			stage: kind,
			reason,
			stranded,
			reconciliation_required,
		})
	}
}
