//! Solver-wide events published on the [`EventBus`].

use crate::{RebalancePhase, StageKind, Strategy, TransactionHash, B256};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SolverEvent {
	Quote(QuoteEvent),
	Rebalance(RebalanceEvent),
	Delivery(DeliveryEvent),
	Withdrawal(WithdrawalEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QuoteEvent {
	Issued {
		quote_id: String,
		intent_hash: B256,
	},
	Rejected {
		intent_hash: B256,
		code: String,
		reason: String,
	},
	FulfillmentApproved {
		quote_id: String,
		intent_hash: B256,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RebalanceEvent {
	PhaseChanged {
		wallet: String,
		phase: RebalancePhase,
	},
	OperationCreated {
		operation_id: String,
		strategy: Strategy,
	},
	StageSubmitted {
		operation_id: String,
		stage_index: usize,
		stage: StageKind,
		tx_hashes: Vec<TransactionHash>,
	},
	StageCompleted {
		operation_id: String,
		stage_index: usize,
		stage: StageKind,
	},
	Completed {
		operation_id: String,
	},
	Failed {
		operation_id: String,
		stage_index: usize,
		reason: String,
	},
	/// Failure after an irreversible stage; needs reconciliation.
	FundsStranded {
		operation_id: String,
		stage_index: usize,
		reason: String,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
	TransactionPending {
		chain_id: u64,
		tx_hash: TransactionHash,
	},
	TransactionConfirmed {
		chain_id: u64,
		tx_hash: TransactionHash,
		block_number: u64,
	},
	TransactionFailed {
		chain_id: u64,
		tx_hash: TransactionHash,
		error: String,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WithdrawalEvent {
	BatchSubmitted {
		chain_id: u64,
		tx_hash: TransactionHash,
		intent_count: usize,
	},
	BatchFailed {
		chain_id: u64,
		error: String,
	},
}

/// Broadcast channel shared by every component that emits events.
pub struct EventBus {
	sender: broadcast::Sender<SolverEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SolverEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event. Having no subscribers is not an error.
	pub fn publish(&self, event: SolverEvent) {
		let _ = self.sender.send(event);
	}
}

impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1000)
	}
}
