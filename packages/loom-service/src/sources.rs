use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use loom_domain::states::{SourceKind, SourceType};
use loom_jobs::{SchedulerJob, Task};
use loom_storage::{models::SourceRow, sources};

use crate::{Error, LoomService, Result, ingest::IngestInput};

#[derive(Clone, Debug, Deserialize)]
pub struct UpsertSourceRequest {
	pub name: String,
	pub url: String,
	pub kind: String,
	pub cadence_seconds: Option<u64>,
	pub active: Option<bool>,
	#[serde(default)]
	pub auto_tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SourceView {
	pub source_id: Uuid,
	pub name: String,
	pub url: String,
	pub kind: String,
	pub cadence_seconds: i64,
	pub active: bool,
	pub auto_tags: Vec<String>,
	#[serde(with = "time::serde::rfc3339::option")]
	pub last_fetched_at: Option<OffsetDateTime>,
	pub last_error: Option<String>,
	pub consecutive_failures: i32,
}

#[derive(Debug, Serialize)]
pub struct PollTriggerResponse {
	pub source_id: Uuid,
	pub enqueued: bool,
}

impl LoomService {
	pub async fn upsert_source(
		&self,
		user_id: Uuid,
		req: UpsertSourceRequest,
	) -> Result<SourceView> {
		let name = req.name.trim();
		let url = req.url.trim();

		if name.is_empty() {
			return Err(Error::validation("name must be non-empty."));
		}
		if url::Url::parse(url).is_err() {
			return Err(Error::validation("url must be a valid URL."));
		}

		let kind = SourceKind::parse(&req.kind)
			.map_err(|_| Error::validation("kind must be rss or web."))?;
		let cadence = req.cadence_seconds.unwrap_or(self.cfg.scheduler.rss_default_cadence_s);

		if cadence == 0 {
			return Err(Error::validation("cadence_seconds must be greater than zero."));
		}

		let row = sources::upsert_source(
			&self.db.pool,
			&sources::UpsertSource {
				user_id,
				name,
				url,
				kind: kind.as_str(),
				cadence_seconds: cadence as i64,
				active: req.active.unwrap_or(true),
				auto_tags: &req.auto_tags,
			},
			OffsetDateTime::now_utc(),
		)
		.await?;

		Ok(source_view(row))
	}

	pub async fn list_sources(&self, user_id: Uuid) -> Result<Vec<SourceView>> {
		let rows = sources::list_sources(&self.db.pool, user_id).await?;

		Ok(rows.into_iter().map(source_view).collect())
	}

	pub async fn set_source_active(
		&self,
		user_id: Uuid,
		source_id: Uuid,
		active: bool,
	) -> Result<SourceView> {
		let row = sources::set_source_active(
			&self.db.pool,
			user_id,
			source_id,
			active,
			OffsetDateTime::now_utc(),
		)
		.await?;

		Ok(source_view(row))
	}

	pub async fn delete_source(&self, user_id: Uuid, source_id: Uuid) -> Result<()> {
		sources::delete_source(&self.db.pool, user_id, source_id).await?;

		Ok(())
	}

	/// Manual poll trigger; runs through the same background task as a
	/// scheduled fire so ordering guarantees hold.
	pub async fn trigger_poll(&self, user_id: Uuid, source_id: Uuid) -> Result<PollTriggerResponse> {
		let row = sources::get_source(&self.db.pool, user_id, source_id).await?;
		let job = match SourceKind::parse(&row.kind) {
			Ok(SourceKind::Rss) => SchedulerJob::PollRssSource { user_id, source_id },
			Ok(SourceKind::Web) => SchedulerJob::ScrapeWebSource { user_id, source_id },
			Err(_) => return Err(Error::Internal { message: "Unknown source kind.".to_string() }),
		};

		self.submit_task(Task::RunSchedulerJob { job })?;

		Ok(PollTriggerResponse { source_id, enqueued: true })
	}

	/// Task body for an RSS poll: fetch the feed, ingest the new
	/// articles, and record the outcome on the source row.
	pub(crate) async fn poll_rss_source(&self, user_id: Uuid, source_id: Uuid) -> Result<()> {
		let source = sources::get_source(&self.db.pool, user_id, source_id).await?;
		let since = source.last_fetched_at;
		let polled = loom_acquire::rss::poll(&self.fetcher, &source.url, since).await;
		let now = OffsetDateTime::now_utc();

		match polled {
			Ok(articles) => {
				let stats = self.ingest_articles(&source, articles, SourceType::Rss).await;

				sources::touch_source(&self.db.pool, source_id, now, None).await?;
				tracing::info!(
					source = %source.name,
					created = stats.created,
					duplicates = stats.duplicates,
					failed = stats.failed,
					"RSS poll finished."
				);

				Ok(())
			},
			Err(err) => {
				sources::touch_source(&self.db.pool, source_id, now, Some(&err.to_string()))
					.await?;

				Err(err.into())
			},
		}
	}

	/// Task body for the daily web sweep: scrape the source page and
	/// ingest it as a single article.
	pub(crate) async fn scrape_web_source(&self, user_id: Uuid, source_id: Uuid) -> Result<()> {
		let source = sources::get_source(&self.db.pool, user_id, source_id).await?;
		let scraped = loom_acquire::scrape::fetch_article(&self.fetcher, &source.url).await;
		let now = OffsetDateTime::now_utc();

		match scraped {
			Ok(Some(article)) => {
				let stats = self.ingest_articles(&source, vec![article], SourceType::Web).await;

				sources::touch_source(&self.db.pool, source_id, now, None).await?;
				tracing::info!(
					source = %source.name,
					created = stats.created,
					duplicates = stats.duplicates,
					"Web scrape finished."
				);

				Ok(())
			},
			Ok(None) => {
				// Extraction found nothing usable; counts as a successful
				// poll with zero articles.
				sources::touch_source(&self.db.pool, source_id, now, None).await?;
				tracing::info!(source = %source.name, "Web scrape extracted no article.");

				Ok(())
			},
			Err(err) => {
				sources::touch_source(&self.db.pool, source_id, now, Some(&err.to_string()))
					.await?;

				Err(err.into())
			},
		}
	}

	async fn ingest_articles(
		&self,
		source: &SourceRow,
		articles: Vec<loom_acquire::Article>,
		source_type: SourceType,
	) -> CrawlStats {
		let mut stats = CrawlStats::default();
		let auto_tags = source.auto_tag_names();

		for article in articles {
			let mut article_tags = auto_tags.clone();

			article_tags.extend(article.tags.iter().cloned());
			article_tags.extend(loom_domain::text::extract_keywords(
				&format!("{} {}", article.title, article.content),
				5,
			));
			article_tags.truncate(10);

			let outcome = self
				.ingest_article(IngestInput {
					user_id: source.user_id,
					title: article.title,
					content: article.content,
					summary: article.summary,
					author: article.author,
					source_url: article.source_url,
					source_type,
					published_at: article.published_at,
					tags: article_tags,
				})
				.await;

			match outcome {
				Ok(crate::ingest::IngestOutcome::Created(_)) => stats.created += 1,
				// Crawl flows skip duplicates silently but keep the count.
				Ok(crate::ingest::IngestOutcome::AlreadyPresent) => stats.duplicates += 1,
				Err(err) => {
					stats.failed += 1;

					tracing::warn!(source = %source.name, error = %err, "Skipping crawled article.");
				},
			}
		}

		stats
	}
}

#[derive(Default)]
struct CrawlStats {
	created: usize,
	duplicates: usize,
	failed: usize,
}

fn source_view(row: SourceRow) -> SourceView {
	let auto_tags = row.auto_tag_names();

	SourceView {
		source_id: row.source_id,
		name: row.name,
		url: row.url,
		kind: row.kind,
		cadence_seconds: row.cadence_seconds,
		active: row.active,
		auto_tags,
		last_fetched_at: row.last_fetched_at,
		last_error: row.last_error,
		consecutive_failures: row.consecutive_failures,
	}
}
