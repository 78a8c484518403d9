use std::{
	collections::{HashMap, HashSet, VecDeque},
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};

use futures_util::future::join_all;
use tokio::{sync::Notify, task::JoinHandle};

use crate::{QueueKey, Task, TaskHandler};

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
	#[error("Background queue is full.")]
	Backpressure,
	#[error("Executor is shutting down.")]
	ShuttingDown,
}

/// Fixed-size worker pool over per-key FIFO queues. A key is claimed by
/// at most one worker at a time, which serializes a user's vector
/// mutations in submission order while unrelated users proceed in
/// parallel. Submission is bounded; overflow is backpressure, never an
/// unbounded queue.
pub struct Executor {
	inner: Arc<Inner>,
	workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
	state: Mutex<QueueState>,
	notify: Notify,
	queue_capacity: usize,
	accepting: AtomicBool,
}

struct QueueState {
	queues: HashMap<QueueKey, VecDeque<Task>>,
	ready: VecDeque<QueueKey>,
	running: HashSet<QueueKey>,
	total: usize,
}

impl Executor {
	pub fn start(handler: Arc<dyn TaskHandler>, cfg: &loom_config::Executor) -> Arc<Self> {
		let inner = Arc::new(Inner {
			state: Mutex::new(QueueState {
				queues: HashMap::new(),
				ready: VecDeque::new(),
				running: HashSet::new(),
				total: 0,
			}),
			notify: Notify::new(),
			queue_capacity: cfg.queue_capacity,
			accepting: AtomicBool::new(true),
		});
		let executor = Arc::new(Self { inner: inner.clone(), workers: Mutex::new(Vec::new()) });
		let mut workers = Vec::with_capacity(cfg.workers);

		for worker_id in 0..cfg.workers.max(1) {
			let inner = inner.clone();
			let handler = handler.clone();

			workers.push(tokio::spawn(worker_loop(worker_id, inner, handler)));
		}

		*executor.workers.lock().unwrap_or_else(|err| err.into_inner()) = workers;

		executor
	}

	pub fn submit(&self, task: Task) -> Result<(), SubmitError> {
		if !self.inner.accepting.load(Ordering::SeqCst) {
			return Err(SubmitError::ShuttingDown);
		}

		{
			let mut state = self.inner.state.lock().unwrap_or_else(|err| err.into_inner());

			if state.total >= self.inner.queue_capacity {
				return Err(SubmitError::Backpressure);
			}

			let key = task.fifo_key();
			let queue = state.queues.entry(key).or_default();
			let was_empty = queue.is_empty();

			queue.push_back(task);

			state.total += 1;

			if was_empty && !state.running.contains(&key) {
				state.ready.push_back(key);
			}
		}

		self.inner.notify.notify_waiters();

		Ok(())
	}

	/// Tasks queued or running right now.
	pub fn pending_count(&self) -> usize {
		let state = self.inner.state.lock().unwrap_or_else(|err| err.into_inner());

		state.total + state.running.len()
	}

	/// Stops accepting work, then waits up to `drain` for queued and
	/// in-flight tasks to finish. Undrained tasks are logged and
	/// abandoned.
	pub async fn shutdown(&self, drain: Duration) {
		self.inner.accepting.store(false, Ordering::SeqCst);
		self.inner.notify.notify_waiters();

		let workers =
			std::mem::take(&mut *self.workers.lock().unwrap_or_else(|err| err.into_inner()));
		let drained = tokio::time::timeout(drain, join_all(workers)).await;

		if drained.is_err() {
			let state = self.inner.state.lock().unwrap_or_else(|err| err.into_inner());
			let remaining = state.total + state.running.len();

			tracing::warn!(remaining, "Executor drain deadline exceeded; abandoning tasks.");
		}
	}
}

async fn worker_loop(worker_id: usize, inner: Arc<Inner>, handler: Arc<dyn TaskHandler>) {
	loop {
		// Register interest before checking the queue so a notify_waiters
		// that lands in between is not lost.
		let notified = inner.notify.notified();

		tokio::pin!(notified);
		notified.as_mut().enable();

		let next = take_next(&inner);

		match next {
			Some((key, task)) => {
				let kind = task.kind();

				tracing::debug!(worker_id, kind, "Running background task.");

				if let Err(message) = handler.run(task).await {
					tracing::error!(worker_id, kind, error = %message, "Background task failed.");
				}

				finish_key(&inner, key);
				inner.notify.notify_waiters();
			},
			None => {
				if !inner.accepting.load(Ordering::SeqCst) {
					let state = inner.state.lock().unwrap_or_else(|err| err.into_inner());

					if state.total == 0 {
						return;
					}

					// Remaining work is owned by other workers; wait for it.
					drop(state);
				}

				notified.await;
			},
		}
	}
}

fn take_next(inner: &Inner) -> Option<(QueueKey, Task)> {
	let mut state = inner.state.lock().unwrap_or_else(|err| err.into_inner());
	let key = state.ready.pop_front()?;
	let task = {
		let queue = state.queues.get_mut(&key)?;

		queue.pop_front()?
	};

	state.total -= 1;
	state.running.insert(key);

	Some((key, task))
}

fn finish_key(inner: &Inner, key: QueueKey) {
	let mut state = inner.state.lock().unwrap_or_else(|err| err.into_inner());

	state.running.remove(&key);

	let has_more = state.queues.get(&key).is_some_and(|queue| !queue.is_empty());

	if has_more {
		state.ready.push_back(key);
	} else {
		state.queues.remove(&key);
	}
}
