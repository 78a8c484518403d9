pub mod executor;
pub mod scheduler;

use std::{future::Future, pin::Pin};

use uuid::Uuid;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A self-contained unit of background work. Tasks carry plain data so
/// they survive the handler that submitted them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Task {
	IndexDocument { user_id: Uuid, document_id: Uuid },
	EvictDocumentVectors { user_id: Uuid, document_id: Uuid },
	CompactUserIndex { user_id: Uuid },
	RebuildUserIndex { user_id: Uuid },
	RunSchedulerJob { job: SchedulerJob },
}
impl Task {
	/// Tasks sharing a key run in submission order; tasks with different
	/// keys run in parallel bounded by the pool size.
	pub fn fifo_key(&self) -> QueueKey {
		match self {
			Self::IndexDocument { user_id, .. }
			| Self::EvictDocumentVectors { user_id, .. }
			| Self::CompactUserIndex { user_id }
			| Self::RebuildUserIndex { user_id } => QueueKey::User(*user_id),
			Self::RunSchedulerJob { job } => match job {
				SchedulerJob::PollRssSource { user_id, .. }
				| SchedulerJob::ScrapeWebSource { user_id, .. } => QueueKey::User(*user_id),
				SchedulerJob::Maintenance => QueueKey::Maintenance,
			},
		}
	}

	pub fn kind(&self) -> &'static str {
		match self {
			Self::IndexDocument { .. } => "index_document",
			Self::EvictDocumentVectors { .. } => "evict_document_vectors",
			Self::CompactUserIndex { .. } => "compact_user_index",
			Self::RebuildUserIndex { .. } => "rebuild_user_index",
			Self::RunSchedulerJob { .. } => "run_scheduler_job",
		}
	}
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SchedulerJob {
	PollRssSource { user_id: Uuid, source_id: Uuid },
	ScrapeWebSource { user_id: Uuid, source_id: Uuid },
	Maintenance,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum QueueKey {
	User(Uuid),
	Maintenance,
}

/// Executes tasks pulled off the pool. Implementations must be safe to
/// call concurrently.
pub trait TaskHandler: Send + Sync {
	fn run<'a>(&'a self, task: Task) -> BoxFuture<'a, Result<(), String>>;
}
