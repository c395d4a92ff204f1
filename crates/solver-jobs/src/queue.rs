//! Per-group FIFO queue with a bounded worker pool.

use crate::{Job, JobError, JobHandler, JobId};
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use priority_queue::PriorityQueue;
use serde_json::Value;
use solver_config::JobsConfig;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct JobOptions {
	/// Hold the job back for this long before it joins its group.
	pub delay: Option<Duration>,
	/// Enqueueing while a job with the same id is pending is a no-op.
	pub dedup_id: Option<String>,
	/// Overrides the configured attempt limit.
	pub max_attempts: Option<u32>,
}

#[derive(Default)]
struct State {
	/// Ready jobs per group key, in enqueue order.
	lanes: HashMap<String, VecDeque<Job>>,
	/// Groups with a job in flight.
	running: HashSet<String>,
	/// Groups with ready jobs and nothing in flight.
	ready: VecDeque<String>,
	/// Delayed job ids keyed by release time, earliest first.
	delayed: PriorityQueue<JobId, Reverse<Instant>>,
	delayed_jobs: HashMap<JobId, Job>,
	dedup: HashMap<String, JobId>,
	/// Queued, delayed and running jobs.
	pending: usize,
	shutdown: bool,
}

impl State {
	fn push_ready(&mut self, job: Job) {
		let group = job.group_key.clone();
		let lane = self.lanes.entry(group.clone()).or_default();
		let was_empty = lane.is_empty();
		lane.push_back(job);
		if was_empty && !self.running.contains(&group) {
			self.ready.push_back(group);
		}
	}
}

pub struct JobQueue {
	config: JobsConfig,
	state: Mutex<State>,
	handlers: DashMap<String, Arc<dyn JobHandler>>,
	workers: Arc<Semaphore>,
	wake: Notify,
	timer_wake: Notify,
	idle: Notify,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueue {
	pub fn new(config: JobsConfig) -> Arc<Self> {
		Arc::new(Self {
			workers: Arc::new(Semaphore::new(config.concurrency.max(1))),
			config,
			state: Mutex::new(State::default()),
			handlers: DashMap::new(),
			wake: Notify::new(),
			timer_wake: Notify::new(),
			idle: Notify::new(),
			tasks: Mutex::new(Vec::new()),
		})
	}

	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	/// Spawns the dispatcher and the delayed-job timer.
	pub fn start(self: &Arc<Self>) {
		let dispatcher = tokio::spawn(self.clone().dispatch());
		let timer = tokio::spawn(self.clone().release_delayed());
		self.tasks
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.extend([dispatcher, timer]);
		info!(concurrency = self.config.concurrency, "Job queue started");
	}

	pub fn register(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
		self.handlers.insert(name.into(), handler);
	}

	pub fn enqueue(
		&self,
		group_key: impl Into<String>,
		name: impl Into<String>,
		payload: Value,
	) -> Result<JobId, JobError> {
		self.enqueue_with(group_key, name, payload, JobOptions::default())
	}

	pub fn enqueue_with(
		&self,
		group_key: impl Into<String>,
		name: impl Into<String>,
		payload: Value,
		options: JobOptions,
	) -> Result<JobId, JobError> {
		let mut state = self.state();
		if state.shutdown {
			return Err(JobError::ShutDown);
		}
		if let Some(existing) = options
			.dedup_id
			.as_ref()
			.and_then(|dedup| state.dedup.get(dedup))
		{
			debug!(dedup_id = ?options.dedup_id, "Duplicate job ignored");
			return Ok(existing.clone());
		}

		let job = Job {
			id: Uuid::new_v4().to_string(),
			group_key: group_key.into(),
			name: name.into(),
			payload,
			dedup_id: options.dedup_id,
			attempt: 0,
			max_attempts: options.max_attempts.unwrap_or(self.config.max_attempts).max(1),
		};
		let id = job.id.clone();
		if let Some(dedup) = &job.dedup_id {
			state.dedup.insert(dedup.clone(), id.clone());
		}
		state.pending += 1;
		debug!(job_id = %id, job = %job.name, group = %job.group_key, delay = ?options.delay, "Job enqueued");

		match options.delay.filter(|delay| !delay.is_zero()) {
			Some(delay) => {
				state.delayed.push(id.clone(), Reverse(Instant::now() + delay));
				state.delayed_jobs.insert(id.clone(), job);
				drop(state);
				self.timer_wake.notify_one();
			},
			None => {
				state.push_ready(job);
				drop(state);
				self.wake.notify_one();
			},
		}
		Ok(id)
	}

	/// Jobs queued, delayed or running.
	pub fn pending(&self) -> usize {
		self.state().pending
	}

	/// Resolves once no job is pending.
	pub async fn wait_idle(&self) {
		loop {
			let notified = self.idle.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();
			if self.pending() == 0 {
				return;
			}
			notified.await;
		}
	}

	/// Stops accepting jobs and stops the dispatcher and timer. Jobs already
	/// running finish on their own.
	pub fn shutdown(&self) {
		self.state().shutdown = true;
		self.workers.close();
		self.wake.notify_one();
		self.timer_wake.notify_one();
		for task in self
			.tasks
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.drain(..)
		{
			task.abort();
		}
		info!("Job queue stopped");
	}

	fn next_ready(&self) -> Option<Job> {
		let mut state = self.state();
		while let Some(group) = state.ready.pop_front() {
			if let Some(job) = state.lanes.get_mut(&group).and_then(VecDeque::pop_front) {
				state.running.insert(group);
				return Some(job);
			}
		}
		None
	}

	async fn dispatch(self: Arc<Self>) {
		loop {
			while let Some(job) = self.next_ready() {
				let Ok(permit) = self.workers.clone().acquire_owned().await else {
					return;
				};
				tokio::spawn(self.clone().run(job, permit));
			}
			if self.state().shutdown {
				return;
			}
			self.wake.notified().await;
		}
	}

	async fn release_delayed(self: Arc<Self>) {
		loop {
			let next = {
				let mut state = self.state();
				if state.shutdown {
					return;
				}
				let now = Instant::now();
				let mut released = false;
				while state
					.delayed
					.peek()
					.is_some_and(|(_, Reverse(at))| *at <= now)
				{
					if let Some((id, _)) = state.delayed.pop() {
						if let Some(job) = state.delayed_jobs.remove(&id) {
							state.push_ready(job);
							released = true;
						}
					}
				}
				if released {
					self.wake.notify_one();
				}
				state.delayed.peek().map(|(_, Reverse(at))| *at)
			};

			match next {
				Some(at) => {
					tokio::select! {
						_ = tokio::time::sleep_until(at) => {},
						_ = self.timer_wake.notified() => {},
					}
				},
				None => self.timer_wake.notified().await,
			}
		}
	}

	async fn run(self: Arc<Self>, job: Job, _permit: OwnedSemaphorePermit) {
		let handler = self.handlers.get(&job.name).map(|h| h.value().clone());
		match handler {
			Some(handler) => self.execute(handler, &job).await,
			None => error!(job = %job.name, group = %job.group_key, "No handler registered, dropping job"),
		}
		self.finish(&job);
	}

	/// Runs the handler, retrying transient failures with exponential backoff
	/// until the job's attempt limit.
	async fn execute(&self, handler: Arc<dyn JobHandler>, job: &Job) {
		let policy = ExponentialBackoffBuilder::new()
			.with_initial_interval(Duration::from_millis(self.config.initial_backoff_ms))
			.with_max_interval(Duration::from_millis(self.config.max_backoff_ms))
			.with_max_elapsed_time(None)
			.build();
		let attempts = AtomicU32::new(0);

		let result = backoff::future::retry_notify(
			policy,
			|| {
				let handler = handler.clone();
				let mut job = job.clone();
				let attempts = &attempts;
				async move {
					job.attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
					match handler.handle(&job).await {
						Ok(()) => Ok(()),
						Err(e) if e.is_transient() && job.attempt < job.max_attempts => {
							Err(backoff::Error::transient(e))
						},
						Err(e) => Err(backoff::Error::permanent(e)),
					}
				}
			},
			|e: JobError, delay: Duration| {
				warn!(job = %job.name, group = %job.group_key, error = %e, retry_in = ?delay, "Job failed, retrying");
			},
		)
		.await;

		let attempts = attempts.load(Ordering::SeqCst);
		match result {
			Ok(()) => debug!(job_id = %job.id, job = %job.name, attempts, "Job completed"),
			Err(e) if e.is_transient() => error!(
				job_id = %job.id,
				job = %job.name,
				group = %job.group_key,
				attempts,
				error = %e,
				"Job retries exhausted"
			),
			Err(e) => warn!(job_id = %job.id, job = %job.name, error = %e, "Job failed permanently"),
		}
	}

	fn finish(&self, job: &Job) {
		let mut state = self.state();
		state.running.remove(&job.group_key);
		if let Some(dedup) = &job.dedup_id {
			if state.dedup.get(dedup) == Some(&job.id) {
				state.dedup.remove(dedup);
			}
		}
		if state.lanes.get(&job.group_key).is_some_and(|lane| !lane.is_empty()) {
			state.ready.push_back(job.group_key.clone());
		} else {
			state.lanes.remove(&job.group_key);
		}
		state.pending = state.pending.saturating_sub(1);
		let idle = state.pending == 0;
		drop(state);

		self.wake.notify_one();
		if idle {
			self.idle.notify_waiters();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use serde_json::json;
	use std::sync::atomic::AtomicUsize;

	fn config(concurrency: usize) -> JobsConfig {
		JobsConfig {
			concurrency,
			max_attempts: 3,
			initial_backoff_ms: 1,
			max_backoff_ms: 5,
		}
	}

	#[derive(Default)]
	struct Recorder {
		runs: Mutex<Vec<(String, u64)>>,
		in_flight: Mutex<HashMap<String, usize>>,
		max_in_group: AtomicUsize,
		total: AtomicUsize,
		max_total: AtomicUsize,
	}

	#[async_trait]
	impl JobHandler for Recorder {
		async fn handle(&self, job: &Job) -> Result<(), JobError> {
			{
				let mut in_flight = self.in_flight.lock().unwrap();
				let count = in_flight.entry(job.group_key.clone()).or_default();
				*count += 1;
				self.max_in_group.fetch_max(*count, Ordering::SeqCst);
			}
			let total = self.total.fetch_add(1, Ordering::SeqCst) + 1;
			self.max_total.fetch_max(total, Ordering::SeqCst);

			tokio::time::sleep(Duration::from_millis(10)).await;

			let seq = job.payload["seq"].as_u64().unwrap_or_default();
			self.runs.lock().unwrap().push((job.group_key.clone(), seq));
			self.total.fetch_sub(1, Ordering::SeqCst);
			*self.in_flight.lock().unwrap().get_mut(&job.group_key).unwrap() -= 1;
			Ok(())
		}
	}

	struct Failing {
		attempts: AtomicU32,
		transient: bool,
	}

	#[async_trait]
	impl JobHandler for Failing {
		async fn handle(&self, _job: &Job) -> Result<(), JobError> {
			self.attempts.fetch_add(1, Ordering::SeqCst);
			if self.transient {
				Err(JobError::Transient("rpc unavailable".into()))
			} else {
				Err(JobError::Permanent("invalid payload".into()))
			}
		}
	}

	#[tokio::test]
	async fn test_same_group_runs_in_fifo_order() {
		let queue = JobQueue::new(config(4));
		let recorder = Arc::new(Recorder::default());
		queue.register("record", recorder.clone());
		queue.start();

		for seq in 0..5u64 {
			queue.enqueue("chain:1", "record", json!({ "seq": seq })).unwrap();
			queue.enqueue("chain:2", "record", json!({ "seq": seq })).unwrap();
		}
		queue.wait_idle().await;

		let runs = recorder.runs.lock().unwrap().clone();
		for group in ["chain:1", "chain:2"] {
			let order: Vec<u64> = runs
				.iter()
				.filter(|(g, _)| g == group)
				.map(|(_, seq)| *seq)
				.collect();
			assert_eq!(order, vec![0, 1, 2, 3, 4]);
		}
		assert_eq!(recorder.max_in_group.load(Ordering::SeqCst), 1);
		assert_eq!(recorder.max_total.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_worker_pool_bounds_parallel_groups() {
		let queue = JobQueue::new(config(2));
		let recorder = Arc::new(Recorder::default());
		queue.register("record", recorder.clone());
		queue.start();

		for group in 0..6 {
			queue
				.enqueue(format!("balances:{}", group), "record", json!({ "seq": 0 }))
				.unwrap();
		}
		queue.wait_idle().await;

		assert_eq!(recorder.runs.lock().unwrap().len(), 6);
		assert_eq!(recorder.max_total.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_pending_dedup_id_is_a_noop() {
		let queue = JobQueue::new(config(2));
		let recorder = Arc::new(Recorder::default());
		queue.register("record", recorder.clone());

		let options = JobOptions {
			dedup_id: Some("check-balances:42".into()),
			..Default::default()
		};
		let first = queue
			.enqueue_with("balances:0x1", "record", json!({}), options.clone())
			.unwrap();
		let second = queue
			.enqueue_with("balances:0x1", "record", json!({}), options.clone())
			.unwrap();
		assert_eq!(first, second);
		assert_eq!(queue.pending(), 1);

		queue.start();
		queue.wait_idle().await;
		assert_eq!(recorder.runs.lock().unwrap().len(), 1);

		// Once the job ran the id may be used again.
		let third = queue
			.enqueue_with("balances:0x1", "record", json!({}), options)
			.unwrap();
		assert_ne!(first, third);
		queue.wait_idle().await;
	}

	#[tokio::test]
	async fn test_transient_failures_stop_at_max_attempts() {
		let queue = JobQueue::new(config(1));
		let handler = Arc::new(Failing {
			attempts: AtomicU32::new(0),
			transient: true,
		});
		queue.register("flaky", handler.clone());
		queue.start();

		queue.enqueue("chain:10", "flaky", json!({})).unwrap();
		queue.wait_idle().await;

		assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn test_permanent_failure_is_not_retried() {
		let queue = JobQueue::new(config(1));
		let handler = Arc::new(Failing {
			attempts: AtomicU32::new(0),
			transient: false,
		});
		queue.register("broken", handler.clone());
		queue.start();

		queue.enqueue("chain:10", "broken", json!({})).unwrap();
		queue.wait_idle().await;

		assert_eq!(handler.attempts.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_delayed_job_is_held_back() {
		let queue = JobQueue::new(config(1));
		let recorder = Arc::new(Recorder::default());
		queue.register("record", recorder.clone());
		queue.start();

		let started = Instant::now();
		queue
			.enqueue_with(
				"rebalance:op",
				"record",
				json!({ "seq": 1 }),
				JobOptions {
					delay: Some(Duration::from_millis(50)),
					..Default::default()
				},
			)
			.unwrap();
		assert_eq!(queue.pending(), 1);
		queue.wait_idle().await;

		assert!(started.elapsed() >= Duration::from_millis(50));
		assert_eq!(recorder.runs.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_enqueue_after_shutdown_is_rejected() {
		let queue = JobQueue::new(config(1));
		queue.start();
		queue.shutdown();

		let err = queue.enqueue("chain:1", "anything", json!({})).unwrap_err();
		assert!(matches!(err, JobError::ShutDown));
	}
}
