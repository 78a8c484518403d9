use std::sync::Arc;

use uuid::Uuid;

use loom_jobs::{
	BoxFuture, SchedulerJob, Task, TaskHandler,
	scheduler::{DueSource, JobPlanner},
};
use loom_storage::sources;

use crate::LoomService;

/// Executes background tasks against the service. Task bodies carry only
/// ids; everything else is re-loaded so queued work survives deletes and
/// restarts of the submitting handler.
impl TaskHandler for LoomService {
	fn run<'a>(&'a self, task: Task) -> BoxFuture<'a, Result<(), String>> {
		Box::pin(async move {
			let outcome = match task {
				Task::IndexDocument { user_id, document_id } =>
					self.index_document(user_id, document_id).await,
				Task::EvictDocumentVectors { user_id, document_id } =>
					self.evict_document(user_id, document_id).await,
				Task::CompactUserIndex { user_id } =>
					self.vectors.compact(user_id).await.map_err(crate::Error::from),
				Task::RebuildUserIndex { user_id } =>
					self.rebuild_user_index(user_id).await.map(|_| ()),
				Task::RunSchedulerJob { job } => match job {
					SchedulerJob::PollRssSource { user_id, source_id } =>
						self.poll_rss_source(user_id, source_id).await,
					SchedulerJob::ScrapeWebSource { user_id, source_id } =>
						self.scrape_web_source(user_id, source_id).await,
					SchedulerJob::Maintenance => self.run_maintenance().await,
				},
			};

			outcome.map_err(|err| err.to_string())
		})
	}
}

impl LoomService {
	async fn run_maintenance(&self) -> crate::Result<()> {
		for user_id in self.users_with_compaction_debt().await {
			if let Err(err) = self.vectors.compact(user_id).await {
				tracing::error!(%user_id, error = %err, "Maintenance compaction failed.");
			}
		}

		Ok(())
	}

	async fn users_with_compaction_debt(&self) -> Vec<Uuid> {
		let mut out = Vec::new();

		for user_id in self.vectors.list_user_ids() {
			match self.vectors.has_compaction_debt(user_id).await {
				Ok(true) => out.push(user_id),
				Ok(false) => {},
				Err(err) => {
					tracing::warn!(%user_id, error = %err, "Skipping index during maintenance scan.");
				},
			}
		}

		out
	}
}

/// Feeds the scheduler from the metadata store and the vector root.
pub struct ServicePlanner {
	pub service: Arc<LoomService>,
}
impl JobPlanner for ServicePlanner {
	fn active_rss_sources<'a>(&'a self) -> BoxFuture<'a, Vec<DueSource>> {
		Box::pin(async move { self.load_sources("rss").await })
	}

	fn active_web_sources<'a>(&'a self) -> BoxFuture<'a, Vec<DueSource>> {
		Box::pin(async move { self.load_sources("web").await })
	}
}
impl ServicePlanner {
	async fn load_sources(&self, kind: &str) -> Vec<DueSource> {
		match sources::list_active_sources(&self.service.db.pool, kind).await {
			Ok(rows) => rows
				.into_iter()
				.map(|row| DueSource {
					user_id: row.user_id,
					source_id: row.source_id,
					cadence_seconds: row.cadence_seconds.max(1) as u64,
					consecutive_failures: row.consecutive_failures.max(0) as u32,
					last_fetched_at: row.last_fetched_at,
					updated_at: row.updated_at,
				})
				.collect(),
			Err(err) => {
				tracing::error!(kind, error = %err, "Failed to list active sources.");

				Vec::new()
			},
		}
	}
}
