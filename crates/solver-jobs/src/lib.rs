//! Grouped job queue and recurring scheduler.
//!
//! Jobs carry a group key. Jobs sharing a key run strictly one after the
//! other in enqueue order; jobs with different keys run in parallel on a
//! bounded worker pool. Chain work is keyed `chain:{id}` so every
//! transaction a signer sends on a chain goes through a single lane.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod queue;
pub mod scheduler;

pub use queue::{JobOptions, JobQueue};
pub use scheduler::Scheduler;

pub type JobId = String;

#[derive(Debug, Error)]
pub enum JobError {
	/// Infrastructure failure; the job is retried with backoff.
	#[error("Transient failure: {0}")]
	Transient(String),
	/// The job can never succeed and is dropped.
	#[error("Permanent failure: {0}")]
	Permanent(String),
	#[error("Job queue is shut down")]
	ShutDown,
}

impl JobError {
	pub fn is_transient(&self) -> bool {
		matches!(self, JobError::Transient(_))
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
	pub id: JobId,
	pub group_key: String,
	pub name: String,
	pub payload: Value,
	pub dedup_id: Option<String>,
	/// 1-based attempt number of the current run.
	pub attempt: u32,
	pub max_attempts: u32,
}

impl Job {
	/// Deserializes the payload into `T`, failing permanently when it does not fit.
	pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, JobError> {
		serde_json::from_value(self.payload.clone())
			.map_err(|e| JobError::Permanent(format!("Invalid payload for '{}': {}", self.name, e)))
	}
}

/// Processes jobs registered under one name.
#[async_trait]
pub trait JobHandler: Send + Sync {
	async fn handle(&self, job: &Job) -> Result<(), JobError>;
}
