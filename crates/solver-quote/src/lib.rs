//! Feasibility checks and quoting for incoming intents.
//!
//! The [`QuoteEngine`] prices an intent with the fee model, confirms the
//! solver can cover the route from its destination balances, validates
//! gasless authorizations and issues signed quotes. Approved quotes turn
//! into unsigned execution plans for the fulfillment dispatcher.

use serde::Serialize;
use solver_account::AccountError;
use solver_storage::StorageError;
use solver_types::{Address, U256};
use solver_validators::{PermitError, VaultError};
use thiserror::Error;

pub mod engine;
pub mod fee;

pub use engine::{QuoteEngine, QuoteRequest};
pub use fee::{compute_fee, reverse_fee};

/// Reasons a quote or an approval is refused. None of them are retried.
#[derive(Debug, Error)]
pub enum QuoteError {
	#[error("Insufficient balance for {token}: required {required}, available {available}")]
	InsufficientBalance {
		token: Address,
		required: U256,
		available: U256,
	},
	#[error("Invalid authorization: {0}")]
	InvalidAuthorization(#[from] PermitError),
	#[error("Unsupported route: {0}")]
	UnsupportedRoute(String),
	#[error("No fee configuration for chain {0}")]
	FeeConfigurationMissing(u64),
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	#[error("Quote {0} not found")]
	QuoteNotFound(String),
	#[error("Quote {0} expired")]
	QuoteExpired(String),
	#[error("Intent does not match quote {0}")]
	IntentMismatch(String),
	#[error("Reward for {token} is {offered}, quote requires {required}")]
	InsufficientReward {
		token: Address,
		offered: U256,
		required: U256,
	},
	#[error("Vault for intent is not funded")]
	VaultNotFunded,
	#[error("Vault for intent is already fully funded")]
	VaultAlreadyFunded,
	#[error("Vault for intent was already claimed or refunded")]
	VaultStale,
	#[error("Chain read failed: {0}")]
	ChainRead(String),
	#[error("Signing failed: {0}")]
	Signing(#[from] AccountError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

impl From<VaultError> for QuoteError {
	fn from(err: VaultError) -> Self {
		QuoteError::ChainRead(err.to_string())
	}
}

impl From<solver_delivery::DeliveryError> for QuoteError {
	fn from(err: solver_delivery::DeliveryError) -> Self {
		QuoteError::ChainRead(err.to_string())
	}
}

/// Rejection as reported to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
	pub status_code: u16,
	pub message: String,
	pub code: &'static str,
}

impl QuoteError {
	/// Stable machine-readable code.
	pub fn code(&self) -> &'static str {
		match self {
			QuoteError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
			QuoteError::InvalidAuthorization(_) => "INVALID_AUTHORIZATION",
			QuoteError::UnsupportedRoute(_) => "UNSUPPORTED_ROUTE",
			QuoteError::FeeConfigurationMissing(_) => "FEE_CONFIGURATION_MISSING",
			QuoteError::InvalidRequest(_) => "INVALID_REQUEST",
			QuoteError::QuoteNotFound(_) => "QUOTE_NOT_FOUND",
			QuoteError::QuoteExpired(_) => "QUOTE_EXPIRED",
			QuoteError::IntentMismatch(_) => "INTENT_MISMATCH",
			QuoteError::InsufficientReward { .. } => "INSUFFICIENT_REWARD",
			QuoteError::VaultNotFunded => "VAULT_NOT_FUNDED",
			QuoteError::VaultAlreadyFunded => "VAULT_ALREADY_FUNDED",
			QuoteError::VaultStale => "VAULT_STALE",
			QuoteError::ChainRead(_) => "CHAIN_READ_FAILED",
			QuoteError::Signing(_) => "SIGNING_FAILED",
			QuoteError::Storage(_) => "STORAGE_ERROR",
		}
	}

	pub fn status_code(&self) -> u16 {
		match self {
			QuoteError::QuoteNotFound(_) => 404,
			QuoteError::QuoteExpired(_) | QuoteError::VaultStale => 410,
			QuoteError::InsufficientBalance { .. } | QuoteError::VaultAlreadyFunded => 409,
			QuoteError::FeeConfigurationMissing(_)
			| QuoteError::Signing(_)
			| QuoteError::Storage(_) => 500,
			QuoteError::ChainRead(_) => 503,
			_ => 400,
		}
	}

	pub fn rejection(&self) -> Rejection {
		Rejection {
			status_code: self.status_code(),
			message: self.to_string(),
			code: self.code(),
		}
	}
}
