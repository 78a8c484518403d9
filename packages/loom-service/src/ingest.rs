use time::OffsetDateTime;
use uuid::Uuid;

use loom_chunking::ChunkingConfig;
use loom_domain::{
	hashing::{chunk_id, content_hash},
	states::{IndexedState, SourceType},
	text::truncate_chars,
};
use loom_jobs::Task;
use loom_storage::{
	documents::{self, NewDocument},
	models::DocumentRow,
	tags,
	vector::index::NewChunk,
};

use crate::{Error, LoomService, Result};

const CHUNK_PREVIEW_CHARS: usize = 500;

pub struct IngestInput {
	pub user_id: Uuid,
	pub title: String,
	pub content: String,
	pub summary: Option<String>,
	pub author: Option<String>,
	pub source_url: Option<String>,
	pub source_type: SourceType,
	pub published_at: Option<OffsetDateTime>,
	pub tags: Vec<String>,
}

#[derive(Debug)]
pub enum IngestOutcome {
	Created(DocumentRow),
	AlreadyPresent,
}

#[derive(Debug, serde::Serialize)]
pub struct RebuildReport {
	pub user_id: Uuid,
	pub rebuilt_documents: usize,
	pub chunk_count: usize,
	pub failed_documents: usize,
}

impl LoomService {
	/// Single-article ingest: validate, dedup, insert as `pending` with
	/// tags in one transaction, then hand indexing to the background
	/// executor. Backpressure rolls the insert back so a retried request
	/// starts clean.
	pub async fn ingest_article(&self, input: IngestInput) -> Result<IngestOutcome> {
		let title = input.title.trim();
		let content = input.content.trim();

		if title.is_empty() {
			return Err(Error::validation("title must be non-empty."));
		}
		if content.is_empty() {
			return Err(Error::validation("content must be non-empty."));
		}

		let source_url = input.source_url.as_deref().map(str::trim).filter(|url| !url.is_empty());
		let hash = content_hash(content);

		if let Some(url) = source_url
			&& documents::find_by_source_url(&self.db.pool, input.user_id, url).await?.is_some()
		{
			return Ok(IngestOutcome::AlreadyPresent);
		}
		if documents::find_by_content_hash(&self.db.pool, input.user_id, &hash).await?.is_some() {
			return Ok(IngestOutcome::AlreadyPresent);
		}

		let now = OffsetDateTime::now_utc();
		let document_id = Uuid::new_v4();
		let mut tx = self.db.pool.begin().await?;
		let inserted = documents::insert_document(&mut *tx, &NewDocument {
			document_id,
			user_id: input.user_id,
			title,
			content,
			summary: input.summary.as_deref(),
			author: input.author.as_deref(),
			source_url,
			source_type: input.source_type.as_str(),
			published_at: input.published_at,
			content_hash: &hash,
			now,
		})
		.await;
		let row = match inserted {
			Ok(row) => row,
			// Lost a race with a concurrent ingest of the same article.
			Err(loom_storage::Error::DuplicateDocument(_)) => {
				return Ok(IngestOutcome::AlreadyPresent);
			},
			Err(err) => return Err(err.into()),
		};

		if !input.tags.is_empty() {
			let tag_rows = tags::ensure_tags(&mut *tx, &input.tags).await?;

			tags::replace_document_tags(&mut *tx, document_id, &tag_rows).await?;
		}

		tx.commit().await?;

		let submitted =
			self.submit_task(Task::IndexDocument { user_id: input.user_id, document_id });

		if let Err(err) = submitted {
			// No chunks exist yet, so the pending row can simply go away.
			sqlx::query("DELETE FROM documents WHERE document_id = $1")
				.bind(document_id)
				.execute(&self.db.pool)
				.await?;

			return Err(err);
		}

		Ok(IngestOutcome::Created(row))
	}

	/// Background task body: chunk, embed, insert vectors, then flip the
	/// document to `indexed`. Failures flip it to `failed` with the error
	/// recorded.
	pub(crate) async fn index_document(&self, user_id: Uuid, document_id: Uuid) -> Result<()> {
		let Some(row) = documents::load_document(&self.db.pool, document_id).await? else {
			tracing::info!(%document_id, "Document vanished before indexing; nothing to do.");

			return Ok(());
		};

		if row.user_id != user_id || row.indexed_state != IndexedState::Pending.as_str() {
			return Ok(());
		}

		let now = OffsetDateTime::now_utc();

		match self.embed_and_store(&row).await {
			Ok(chunk_count) => {
				documents::mark_indexed(&self.db.pool, document_id, IndexedState::Indexed, None, now)
					.await?;

				tracing::info!(%document_id, chunk_count, "Document indexed.");

				Ok(())
			},
			Err(err) => {
				documents::mark_indexed(
					&self.db.pool,
					document_id,
					IndexedState::Failed,
					Some(&err.to_string()),
					now,
				)
				.await?;

				Err(err)
			},
		}
	}

	async fn embed_and_store(&self, row: &DocumentRow) -> Result<usize> {
		let chunks = loom_chunking::split_text(&row.content, &ChunkingConfig::default());
		let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
		let embeddings = self.providers.embedding.batch_embed(&self.cfg.embedder, &texts).await?;

		if embeddings.len() != chunks.len() {
			return Err(Error::Dependency {
				message: "Embedder returned a mismatched vector count.".to_string(),
			});
		}

		let new_chunks: Vec<NewChunk> = chunks
			.into_iter()
			.zip(embeddings)
			.map(|(chunk, vector)| NewChunk {
				chunk_id: chunk_id(row.document_id, chunk.ordinal),
				document_id: row.document_id,
				ordinal: chunk.ordinal,
				text_preview: truncate_chars(&chunk.text, CHUNK_PREVIEW_CHARS),
				vector,
			})
			.collect();
		let count = new_chunks.len();

		self.vectors.add(row.user_id, new_chunks).await?;

		Ok(count)
	}

	/// Background eviction: drop the document's vectors, then remove the
	/// row that was parked in `evicting`.
	pub(crate) async fn evict_document(&self, user_id: Uuid, document_id: Uuid) -> Result<()> {
		match self.vectors.remove_by_document(user_id, document_id).await {
			Ok(removed) => {
				tracing::info!(%document_id, removed, "Evicted document vectors.");
			},
			Err(loom_storage::Error::IndexCorrupt { .. }) => {
				// The rebuild replays only surviving documents, so the row
				// can still be removed.
				tracing::warn!(%user_id, "Index corrupt during eviction; scheduling rebuild.");

				self.submit_task(Task::RebuildUserIndex { user_id })?;
			},
			Err(err) => return Err(err.into()),
		}

		documents::hard_delete(&self.db.pool, document_id).await?;

		Ok(())
	}

	/// Flips a `failed` document back to `pending` and resubmits the
	/// indexing task.
	pub async fn retry_indexing(&self, user_id: Uuid, document_id: Uuid) -> Result<()> {
		let row = documents::get_document(&self.db.pool, user_id, document_id).await?;

		if row.indexed_state != IndexedState::Failed.as_str() {
			return Err(Error::validation("Only failed documents can be retried."));
		}

		documents::mark_indexed(
			&self.db.pool,
			document_id,
			IndexedState::Pending,
			None,
			OffsetDateTime::now_utc(),
		)
		.await?;
		self.submit_task(Task::IndexDocument { user_id, document_id })?;

		Ok(())
	}

	/// Rebuilds a user's index from the metadata store: reset, then
	/// re-chunk and re-embed every indexed document. Per-document failures
	/// are counted, not fatal.
	pub async fn rebuild_user_index(&self, user_id: Uuid) -> Result<RebuildReport> {
		self.vectors.reset(user_id).await?;

		let rows = documents::list_indexed_documents(&self.db.pool, user_id).await?;
		let mut report = RebuildReport {
			user_id,
			rebuilt_documents: 0,
			chunk_count: 0,
			failed_documents: 0,
		};

		for row in rows {
			match self.embed_and_store(&row).await {
				Ok(count) => {
					report.rebuilt_documents += 1;
					report.chunk_count += count;
				},
				Err(err) => {
					report.failed_documents += 1;

					tracing::error!(document_id = %row.document_id, error = %err, "Rebuild skipped document.");
				},
			}
		}

		tracing::info!(
			%user_id,
			rebuilt = report.rebuilt_documents,
			failed = report.failed_documents,
			"Rebuilt user index."
		);

		Ok(report)
	}
}
