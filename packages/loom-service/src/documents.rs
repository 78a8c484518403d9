use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use loom_domain::states::SourceType;
use loom_jobs::Task;
use loom_storage::{
	documents::{self, DocumentFilter, Page},
	models::DocumentRow,
	tags,
};

use crate::{
	Error, LoomService, Result,
	ingest::{IngestInput, IngestOutcome},
};

pub const MAX_PER_PAGE: i64 = 100;

#[derive(Clone, Debug, Deserialize)]
pub struct CreateDocumentRequest {
	pub title: String,
	pub content: String,
	pub summary: Option<String>,
	pub author: Option<String>,
	pub source_url: Option<String>,
	pub published_at: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
}

/// Only the fields a document keeps mutable after creation: summary and
/// tags, plus the indexing retry flag.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct UpdateDocumentRequest {
	pub summary: Option<String>,
	pub tags: Option<Vec<String>>,
	/// Failed documents can be sent back through the indexing pipeline.
	#[serde(default)]
	pub retry_indexing: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListDocumentsRequest {
	pub page: Option<i64>,
	pub per_page: Option<i64>,
	pub source_type: Option<String>,
	pub date_from: Option<String>,
	pub date_to: Option<String>,
	pub tags: Option<String>,
	pub search: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DocumentView {
	pub document_id: Uuid,
	pub title: String,
	pub summary: Option<String>,
	pub author: Option<String>,
	pub source_url: Option<String>,
	pub source_type: String,
	pub indexed_state: String,
	#[serde(with = "time::serde::rfc3339::option")]
	pub published_at: Option<OffsetDateTime>,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub updated_at: OffsetDateTime,
	pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DocumentDetail {
	#[serde(flatten)]
	pub view: DocumentView,
	pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ListDocumentsResponse {
	pub items: Vec<DocumentView>,
	pub page: i64,
	pub per_page: i64,
	pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct DeleteDocumentResponse {
	pub document_id: Uuid,
	/// True when chunks remain and a background eviction task will
	/// finish the removal.
	pub evicting: bool,
}

impl LoomService {
	pub async fn create_document(
		&self,
		user_id: Uuid,
		req: CreateDocumentRequest,
	) -> Result<DocumentView> {
		let published_at = parse_datetime_field(req.published_at.as_deref(), "published_at")?;
		let outcome = self
			.ingest_article(IngestInput {
				user_id,
				title: req.title,
				content: req.content,
				summary: req.summary,
				author: req.author,
				source_url: req.source_url,
				source_type: SourceType::Manual,
				published_at,
				tags: req.tags,
			})
			.await?;

		match outcome {
			IngestOutcome::Created(row) => {
				let tag_names = tags::document_tag_names(&self.db.pool, row.document_id).await?;

				Ok(document_view(row, tag_names))
			},
			IngestOutcome::AlreadyPresent => Err(Error::Duplicate {
				message: "A document with this URL or content already exists.".to_string(),
			}),
		}
	}

	pub async fn get_document(&self, user_id: Uuid, document_id: Uuid) -> Result<DocumentDetail> {
		let row = documents::get_document(&self.db.pool, user_id, document_id).await?;
		let tag_names = tags::document_tag_names(&self.db.pool, document_id).await?;
		let content = row.content.clone();

		Ok(DocumentDetail { view: document_view(row, tag_names), content })
	}

	pub async fn list_documents(
		&self,
		user_id: Uuid,
		req: ListDocumentsRequest,
	) -> Result<ListDocumentsResponse> {
		let page = req.page.unwrap_or(1);
		let per_page = req.per_page.unwrap_or(20);

		if page < 1 {
			return Err(Error::validation("page must be at least 1."));
		}
		if !(1..=MAX_PER_PAGE).contains(&per_page) {
			return Err(Error::validation("per_page must be in 1-100."));
		}

		let filter = DocumentFilter {
			source_type: req.source_type.filter(|value| !value.is_empty()),
			date_from: parse_datetime_field(req.date_from.as_deref(), "date_from")?,
			date_to: parse_datetime_field(req.date_to.as_deref(), "date_to")?,
			tags_any: req
				.tags
				.map(|raw| {
					raw.split(',')
						.map(|tag| tag.trim().to_lowercase())
						.filter(|tag| !tag.is_empty())
						.collect()
				})
				.unwrap_or_default(),
			text_like: req.search.filter(|value| !value.is_empty()),
		};
		let (rows, total) = documents::list_documents(&self.db.pool, user_id, &filter, Page {
			offset: (page - 1) * per_page,
			limit: per_page,
		})
		.await?;
		let ids: Vec<Uuid> = rows.iter().map(|row| row.document_id).collect();
		let tag_pairs = tags::tags_for_documents(&self.db.pool, &ids).await?;
		let items = rows
			.into_iter()
			.map(|row| {
				let tag_names = tag_pairs
					.iter()
					.filter(|(doc, _)| *doc == row.document_id)
					.map(|(_, name)| name.clone())
					.collect();

				document_view(row, tag_names)
			})
			.collect();

		Ok(ListDocumentsResponse { items, page, per_page, total })
	}

	pub async fn update_document(
		&self,
		user_id: Uuid,
		document_id: Uuid,
		req: UpdateDocumentRequest,
	) -> Result<DocumentView> {
		if req.retry_indexing {
			self.retry_indexing(user_id, document_id).await?;
		}

		let now = OffsetDateTime::now_utc();
		let row = documents::update_document(
			&self.db.pool,
			user_id,
			document_id,
			req.summary.as_deref(),
			now,
		)
		.await?;

		if let Some(new_tags) = req.tags {
			let mut tx = self.db.pool.begin().await?;
			let tag_rows = tags::ensure_tags(&mut *tx, &new_tags).await?;

			tags::replace_document_tags(&mut *tx, document_id, &tag_rows).await?;
			tx.commit().await?;
		}

		let tag_names = tags::document_tag_names(&self.db.pool, document_id).await?;

		Ok(document_view(row, tag_names))
	}

	/// Synchronous metadata delete; vector eviction continues in the
	/// background for indexed documents.
	pub async fn delete_document(
		&self,
		user_id: Uuid,
		document_id: Uuid,
	) -> Result<DeleteDocumentResponse> {
		let now = OffsetDateTime::now_utc();
		let (_, needs_eviction) =
			documents::begin_delete(&self.db.pool, user_id, document_id, now).await?;

		if needs_eviction {
			self.submit_task(Task::EvictDocumentVectors { user_id, document_id })?;
		}

		Ok(DeleteDocumentResponse { document_id, evicting: needs_eviction })
	}
}

pub(crate) fn document_view(row: DocumentRow, tag_names: Vec<String>) -> DocumentView {
	DocumentView {
		document_id: row.document_id,
		title: row.title,
		summary: row.summary,
		author: row.author,
		source_url: row.source_url,
		source_type: row.source_type,
		indexed_state: row.indexed_state,
		published_at: row.published_at,
		created_at: row.created_at,
		updated_at: row.updated_at,
		tags: tag_names,
	}
}

pub(crate) fn parse_datetime_field(
	raw: Option<&str>,
	field: &str,
) -> Result<Option<OffsetDateTime>> {
	let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
		return Ok(None);
	};

	loom_acquire::import::parse_date(raw)
		.map(Some)
		.ok_or_else(|| Error::validation(format!("{field} is not a recognized date.")))
}
