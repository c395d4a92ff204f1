//! Recurring job registration on top of [`JobQueue`].

use crate::queue::{JobOptions, JobQueue};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

struct Schedule {
	interval: Duration,
	task: JoinHandle<()>,
}

/// Enqueues jobs on fixed intervals.
///
/// Every tick carries the dedup id `{name}:{tick}` where `tick` is the
/// wall-clock time divided by the interval, so several schedulers sharing a
/// queue enqueue a given tick at most once.
pub struct Scheduler {
	queue: Arc<JobQueue>,
	schedules: DashMap<String, Schedule>,
}

impl Scheduler {
	pub fn new(queue: Arc<JobQueue>) -> Self {
		Self {
			queue,
			schedules: DashMap::new(),
		}
	}

	/// Registers or updates the schedule `name`.
	///
	/// Returns false when a schedule with the same name and interval already
	/// runs. A different interval replaces the running schedule.
	pub fn schedule_recurring<F>(
		&self,
		name: &str,
		interval: Duration,
		group_key: impl Into<String>,
		job_name: impl Into<String>,
		payload: F,
	) -> bool
	where
		F: Fn(u64) -> Value + Send + Sync + 'static,
	{
		if let Some(existing) = self.schedules.get(name) {
			if existing.interval == interval && !existing.task.is_finished() {
				debug!(schedule = %name, "Schedule unchanged");
				return false;
			}
		}

		let interval = interval.max(Duration::from_millis(1));
		let queue = self.queue.clone();
		let schedule_name = name.to_string();
		let group_key = group_key.into();
		let job_name = job_name.into();

		let task = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
			loop {
				ticker.tick().await;
				let tick = current_tick(interval);
				let options = JobOptions {
					dedup_id: Some(format!("{}:{}", schedule_name, tick)),
					..Default::default()
				};
				if let Err(e) = queue.enqueue_with(group_key.clone(), job_name.clone(), payload(tick), options) {
					warn!(schedule = %schedule_name, error = %e, "Failed to enqueue scheduled job");
					if matches!(e, crate::JobError::ShutDown) {
						return;
					}
				}
			}
		});

		if let Some(previous) = self.schedules.insert(name.to_string(), Schedule { interval, task }) {
			previous.task.abort();
			info!(schedule = %name, interval_secs = interval.as_secs_f64(), "Schedule replaced");
		} else {
			info!(schedule = %name, interval_secs = interval.as_secs_f64(), "Schedule registered");
		}
		true
	}

	pub fn cancel(&self, name: &str) -> bool {
		match self.schedules.remove(name) {
			Some((_, schedule)) => {
				schedule.task.abort();
				true
			},
			None => false,
		}
	}

	pub fn shutdown(&self) {
		for entry in self.schedules.iter() {
			entry.task.abort();
		}
		self.schedules.clear();
	}
}

fn current_tick(interval: Duration) -> u64 {
	let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u128;
	(now_ms / interval.as_millis().max(1)) as u64
}
