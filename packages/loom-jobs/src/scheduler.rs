use std::{
	collections::HashMap,
	sync::Arc,
	time::Duration,
};

use time::{Date, OffsetDateTime};
use uuid::Uuid;

use loom_domain::states::poll_interval_seconds;

use crate::{
	BoxFuture, SchedulerJob, Task,
	executor::{Executor, SubmitError},
};

pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

/// A source the planner considers pollable right now. `updated_at` moves
/// whenever a poll completes (success or failure), which is how the
/// scheduler detects completion without a callback channel.
#[derive(Clone, Debug)]
pub struct DueSource {
	pub user_id: Uuid,
	pub source_id: Uuid,
	pub cadence_seconds: u64,
	pub consecutive_failures: u32,
	pub last_fetched_at: Option<OffsetDateTime>,
	pub updated_at: OffsetDateTime,
}
impl DueSource {
	/// Due when never fetched, or when the (failure-backoff adjusted)
	/// cadence has elapsed.
	pub fn is_due(&self, now: OffsetDateTime) -> bool {
		let Some(last) = self.last_fetched_at else {
			return true;
		};
		let interval = poll_interval_seconds(self.cadence_seconds, self.consecutive_failures);

		now - last >= time::Duration::seconds(interval as i64)
	}
}

/// Supplies the scheduler with work candidates; implemented by the
/// service layer on top of the metadata store.
pub trait JobPlanner: Send + Sync {
	fn active_rss_sources<'a>(&'a self) -> BoxFuture<'a, Vec<DueSource>>;
	fn active_web_sources<'a>(&'a self) -> BoxFuture<'a, Vec<DueSource>>;
}

struct InflightPoll {
	enqueued_at: OffsetDateTime,
	cadence_seconds: u64,
	warned: bool,
}

/// Single dispatcher task. Every tick it enqueues due RSS polls
/// (coalescing misfires), fires the daily web sweep at the configured
/// hour, and runs the weekly maintenance compaction pass.
pub struct Scheduler {
	cfg: loom_config::Scheduler,
	executor: Arc<Executor>,
	planner: Arc<dyn JobPlanner>,
	inflight: HashMap<Uuid, InflightPoll>,
	last_web_sweep: Option<Date>,
	last_maintenance: Option<Date>,
}
impl Scheduler {
	pub fn new(
		cfg: loom_config::Scheduler,
		executor: Arc<Executor>,
		planner: Arc<dyn JobPlanner>,
	) -> Self {
		Self {
			cfg,
			executor,
			planner,
			inflight: HashMap::new(),
			last_web_sweep: None,
			last_maintenance: None,
		}
	}

	pub async fn run(mut self) {
		let mut ticker = tokio::time::interval(TICK_INTERVAL);

		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			ticker.tick().await;

			let now = OffsetDateTime::now_utc();

			self.tick(now).await;
		}
	}

	pub async fn tick(&mut self, now: OffsetDateTime) {
		self.poll_rss(now).await;
		self.sweep_web(now).await;
		self.run_maintenance(now).await;
	}

	async fn poll_rss(&mut self, now: OffsetDateTime) {
		let sources = self.planner.active_rss_sources().await;

		for source in sources {
			// A completed poll bumps updated_at past the enqueue time.
			if let Some(inflight) = self.inflight.get(&source.source_id)
				&& source.updated_at > inflight.enqueued_at
			{
				self.inflight.remove(&source.source_id);
			}

			if !source.is_due(now) {
				continue;
			}
			if let Some(inflight) = self.inflight.get_mut(&source.source_id) {
				let overrun =
					now - inflight.enqueued_at
						> time::Duration::seconds((inflight.cadence_seconds * 2) as i64);

				if overrun && !inflight.warned {
					inflight.warned = true;

					tracing::warn!(
						source_id = %source.source_id,
						"Poll job is overrunning twice its cadence; skipping this fire."
					);
				}

				// Misfires coalesce: only the in-flight run proceeds.
				continue;
			}

			let task = Task::RunSchedulerJob {
				job: SchedulerJob::PollRssSource {
					user_id: source.user_id,
					source_id: source.source_id,
				},
			};

			if self.submit(task) {
				self.inflight.insert(source.source_id, InflightPoll {
					enqueued_at: now,
					cadence_seconds: source.cadence_seconds.max(1),
					warned: false,
				});
			}
		}
	}

	async fn sweep_web(&mut self, now: OffsetDateTime) {
		if now.hour() != self.cfg.web_sweep_hour {
			return;
		}
		if self.last_web_sweep == Some(now.date()) {
			return;
		}

		self.last_web_sweep = Some(now.date());

		let sources = self.planner.active_web_sources().await;

		tracing::info!(count = sources.len(), "Starting daily web-scraping sweep.");

		for source in sources {
			self.submit(Task::RunSchedulerJob {
				job: SchedulerJob::ScrapeWebSource {
					user_id: source.user_id,
					source_id: source.source_id,
				},
			});
		}
	}

	async fn run_maintenance(&mut self, now: OffsetDateTime) {
		if now.weekday().number_days_from_monday() != self.cfg.maintenance_weekday {
			return;
		}
		if now.hour() != self.cfg.web_sweep_hour {
			return;
		}
		if self.last_maintenance == Some(now.date()) {
			return;
		}

		self.last_maintenance = Some(now.date());

		tracing::info!("Enqueueing weekly index maintenance.");
		self.submit(Task::RunSchedulerJob { job: SchedulerJob::Maintenance });
	}

	fn submit(&self, task: Task) -> bool {
		match self.executor.submit(task) {
			Ok(()) => true,
			Err(SubmitError::Backpressure) => {
				tracing::warn!("Executor queue full; dropping scheduled job until next tick.");

				false
			},
			Err(SubmitError::ShuttingDown) => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use super::*;
	use crate::TaskHandler;

	struct NoopHandler;
	impl TaskHandler for NoopHandler {
		fn run<'a>(&'a self, _task: Task) -> BoxFuture<'a, Result<(), String>> {
			Box::pin(async { Ok(()) })
		}
	}

	struct FixedPlanner {
		rss: Mutex<Vec<DueSource>>,
	}
	impl JobPlanner for FixedPlanner {
		fn active_rss_sources<'a>(&'a self) -> BoxFuture<'a, Vec<DueSource>> {
			Box::pin(async { self.rss.lock().unwrap().clone() })
		}

		fn active_web_sources<'a>(&'a self) -> BoxFuture<'a, Vec<DueSource>> {
			Box::pin(async { Vec::new() })
		}
	}

	fn scheduler_with(rss: Vec<DueSource>) -> (Scheduler, Arc<FixedPlanner>) {
		let cfg = loom_config::Scheduler {
			rss_default_cadence_s: 60,
			web_sweep_hour: 3,
			maintenance_weekday: 0,
		};
		let executor = Executor::start(
			Arc::new(NoopHandler),
			&loom_config::Executor { workers: 1, queue_capacity: 16, drain_timeout_s: 1 },
		);
		let planner = Arc::new(FixedPlanner { rss: Mutex::new(rss) });

		(Scheduler::new(cfg, executor, planner.clone()), planner)
	}

	fn due_source(now: OffsetDateTime) -> DueSource {
		DueSource {
			user_id: Uuid::new_v4(),
			source_id: Uuid::new_v4(),
			cadence_seconds: 60,
			consecutive_failures: 0,
			last_fetched_at: Some(now - time::Duration::seconds(120)),
			updated_at: now - time::Duration::seconds(120),
		}
	}

	#[test]
	fn dueness_honors_cadence_and_backoff() {
		let now = OffsetDateTime::now_utc();
		let mut source = due_source(now);

		assert!(source.is_due(now));

		source.last_fetched_at = Some(now - time::Duration::seconds(30));

		assert!(!source.is_due(now));

		// Three consecutive failures double the interval.
		source.last_fetched_at = Some(now - time::Duration::seconds(90));
		source.consecutive_failures = 3;

		assert!(!source.is_due(now));

		source.last_fetched_at = Some(now - time::Duration::seconds(121));

		assert!(source.is_due(now));
	}

	#[tokio::test]
	async fn misfires_coalesce_while_a_poll_is_in_flight() {
		let now = OffsetDateTime::now_utc();
		let source = due_source(now);
		let (mut scheduler, _planner) = scheduler_with(vec![source.clone()]);

		scheduler.tick(now).await;

		assert!(scheduler.inflight.contains_key(&source.source_id));

		// Still due on the next tick, but the first run has not completed;
		// nothing new is enqueued.
		scheduler.tick(now + time::Duration::seconds(30)).await;

		assert_eq!(scheduler.inflight.len(), 1);
		assert!(!scheduler.inflight[&source.source_id].warned);
	}

	#[tokio::test]
	async fn completed_polls_clear_the_inflight_entry() {
		let now = OffsetDateTime::now_utc();
		let source = due_source(now);
		let (mut scheduler, planner) = scheduler_with(vec![source.clone()]);

		scheduler.tick(now).await;

		// Simulate the poll completing: updated_at moves forward and the
		// source becomes due again later.
		let later = now + time::Duration::seconds(180);
		{
			let mut rss = planner.rss.lock().unwrap();
			let entry = &mut rss[0];

			entry.updated_at = now + time::Duration::seconds(5);
			entry.last_fetched_at = Some(now + time::Duration::seconds(5));
		}

		scheduler.tick(later).await;

		let inflight = &scheduler.inflight[&source.source_id];

		assert_eq!(inflight.enqueued_at, later, "A fresh poll must be enqueued after completion.");
	}

	#[tokio::test]
	async fn overruns_warn_once_and_skip_fires() {
		let now = OffsetDateTime::now_utc();
		let source = due_source(now);
		let (mut scheduler, _planner) = scheduler_with(vec![source.clone()]);

		scheduler.tick(now).await;

		let much_later = now + time::Duration::seconds(200);

		scheduler.tick(much_later).await;

		assert!(scheduler.inflight[&source.source_id].warned);
	}
}
