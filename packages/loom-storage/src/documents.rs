use sqlx::{PgExecutor, PgPool, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use loom_domain::states::IndexedState;

use crate::{Error, Result, error::is_unique_violation, models::DocumentRow};

const DOCUMENT_COLUMNS: &str = "\
document_id, user_id, title, content, summary, author, source_url, source_type, published_at, \
created_at, updated_at, content_hash, indexed_state, index_error";

pub struct NewDocument<'a> {
	pub document_id: Uuid,
	pub user_id: Uuid,
	pub title: &'a str,
	pub content: &'a str,
	pub summary: Option<&'a str>,
	pub author: Option<&'a str>,
	pub source_url: Option<&'a str>,
	pub source_type: &'a str,
	pub published_at: Option<OffsetDateTime>,
	pub content_hash: &'a str,
	pub now: OffsetDateTime,
}

#[derive(Clone, Debug, Default)]
pub struct DocumentFilter {
	pub source_type: Option<String>,
	pub date_from: Option<OffsetDateTime>,
	pub date_to: Option<OffsetDateTime>,
	pub tags_any: Vec<String>,
	pub text_like: Option<String>,
}
impl DocumentFilter {
	pub fn is_empty(&self) -> bool {
		self.source_type.is_none()
			&& self.date_from.is_none()
			&& self.date_to.is_none()
			&& self.tags_any.is_empty()
			&& self.text_like.is_none()
	}
}

#[derive(Clone, Copy, Debug)]
pub struct Page {
	pub offset: i64,
	pub limit: i64,
}

pub async fn insert_document<'e, E>(executor: E, doc: &NewDocument<'_>) -> Result<DocumentRow>
where
	E: PgExecutor<'e>,
{
	let result = sqlx::query_as::<_, DocumentRow>(
		"\
INSERT INTO documents (
	document_id, user_id, title, content, summary, author, source_url, source_type,
	published_at, created_at, updated_at, content_hash, indexed_state
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10, $11, 'pending')
RETURNING document_id, user_id, title, content, summary, author, source_url, source_type, \
published_at, created_at, updated_at, content_hash, indexed_state, index_error",
	)
	.bind(doc.document_id)
	.bind(doc.user_id)
	.bind(doc.title)
	.bind(doc.content)
	.bind(doc.summary)
	.bind(doc.author)
	.bind(doc.source_url)
	.bind(doc.source_type)
	.bind(doc.published_at)
	.bind(doc.now)
	.bind(doc.content_hash)
	.fetch_one(executor)
	.await;

	match result {
		Ok(row) => Ok(row),
		Err(err) if is_unique_violation(&err) =>
			Err(Error::DuplicateDocument("A document with this URL or content already exists.".to_string())),
		Err(err) => Err(err.into()),
	}
}

/// Ownership is checked after the lookup so a missing document and a
/// foreign document answer differently: NotFound for the former,
/// Forbidden for the latter.
pub async fn get_document<'e, E>(executor: E, user_id: Uuid, document_id: Uuid) -> Result<DocumentRow>
where
	E: PgExecutor<'e>,
{
	let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_id = $1");
	let row = sqlx::query_as::<_, DocumentRow>(&sql)
		.bind(document_id)
		.fetch_optional(executor)
		.await?
		.ok_or_else(|| Error::NotFound("Document not found.".to_string()))?;

	if row.user_id != user_id {
		return Err(Error::Forbidden("Document belongs to another user.".to_string()));
	}

	Ok(row)
}

/// Lookup for the background tasks; unlike [`get_document`] a missing row
/// is not an error because the document may have been deleted while the
/// task sat in the queue.
pub async fn load_document<'e, E>(executor: E, document_id: Uuid) -> Result<Option<DocumentRow>>
where
	E: PgExecutor<'e>,
{
	let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_id = $1");

	Ok(sqlx::query_as::<_, DocumentRow>(&sql).bind(document_id).fetch_optional(executor).await?)
}

pub async fn find_by_source_url<'e, E>(
	executor: E,
	user_id: Uuid,
	source_url: &str,
) -> Result<Option<DocumentRow>>
where
	E: PgExecutor<'e>,
{
	let sql =
		format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE user_id = $1 AND source_url = $2");

	Ok(sqlx::query_as::<_, DocumentRow>(&sql)
		.bind(user_id)
		.bind(source_url)
		.fetch_optional(executor)
		.await?)
}

pub async fn find_by_content_hash<'e, E>(
	executor: E,
	user_id: Uuid,
	content_hash: &str,
) -> Result<Option<DocumentRow>>
where
	E: PgExecutor<'e>,
{
	let sql =
		format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE user_id = $1 AND content_hash = $2");

	Ok(sqlx::query_as::<_, DocumentRow>(&sql)
		.bind(user_id)
		.bind(content_hash)
		.fetch_optional(executor)
		.await?)
}

pub async fn load_documents_by_ids<'e, E>(
	executor: E,
	user_id: Uuid,
	document_ids: &[Uuid],
) -> Result<Vec<DocumentRow>>
where
	E: PgExecutor<'e>,
{
	if document_ids.is_empty() {
		return Ok(Vec::new());
	}

	let sql = format!(
		"SELECT {DOCUMENT_COLUMNS} FROM documents WHERE user_id = $1 AND document_id = ANY($2)"
	);

	Ok(sqlx::query_as::<_, DocumentRow>(&sql)
		.bind(user_id)
		.bind(document_ids)
		.fetch_all(executor)
		.await?)
}

/// Deterministic listing: `(created_at DESC, document_id DESC)` with
/// offset/limit pagination. Returns the page plus the filtered total.
pub async fn list_documents(
	pool: &PgPool,
	user_id: Uuid,
	filter: &DocumentFilter,
	page: Page,
) -> Result<(Vec<DocumentRow>, i64)> {
	let mut select = QueryBuilder::new(format!(
		"SELECT {DOCUMENT_COLUMNS} FROM documents WHERE user_id = "
	));

	push_filter(&mut select, user_id, filter);
	select.push(" ORDER BY created_at DESC, document_id DESC LIMIT ");
	select.push_bind(page.limit);
	select.push(" OFFSET ");
	select.push_bind(page.offset);

	let rows: Vec<DocumentRow> = select.build_query_as().fetch_all(pool).await?;

	let mut count = QueryBuilder::new("SELECT COUNT(*) FROM documents WHERE user_id = ");

	push_filter(&mut count, user_id, filter);

	let total: (i64,) = count.build_query_as().fetch_one(pool).await?;

	Ok((rows, total.0))
}

fn push_filter(builder: &mut QueryBuilder<'_, sqlx::Postgres>, user_id: Uuid, filter: &DocumentFilter) {
	builder.push_bind(user_id);

	if let Some(source_type) = &filter.source_type {
		builder.push(" AND source_type = ");
		builder.push_bind(source_type.clone());
	}
	if let Some(date_from) = filter.date_from {
		builder.push(" AND created_at >= ");
		builder.push_bind(date_from);
	}
	if let Some(date_to) = filter.date_to {
		builder.push(" AND created_at <= ");
		builder.push_bind(date_to);
	}
	if !filter.tags_any.is_empty() {
		builder.push(
			" AND EXISTS (SELECT 1 FROM document_tags dt JOIN tags t ON t.tag_id = dt.tag_id \
			 WHERE dt.document_id = documents.document_id AND t.name = ANY(",
		);
		builder.push_bind(filter.tags_any.clone());
		builder.push("))");
	}
	if let Some(text) = &filter.text_like {
		let pattern = format!("%{}%", text.replace('%', "\\%").replace('_', "\\_"));

		builder.push(" AND (title ILIKE ");
		builder.push_bind(pattern.clone());
		builder.push(" OR content ILIKE ");
		builder.push_bind(pattern);
		builder.push(")");
	}
}

/// Documents are immutable after creation except `summary`, tags, the
/// indexing state, and `updated_at`; this touches only the first and
/// last of those. Tags are replaced separately.
pub async fn update_document(
	pool: &PgPool,
	user_id: Uuid,
	document_id: Uuid,
	summary: Option<&str>,
	now: OffsetDateTime,
) -> Result<DocumentRow> {
	get_document(pool, user_id, document_id).await?;

	let sql = format!(
		"\
UPDATE documents
SET summary = COALESCE($2, summary), updated_at = $3
WHERE document_id = $1
RETURNING {DOCUMENT_COLUMNS}"
	);

	Ok(sqlx::query_as::<_, DocumentRow>(&sql)
		.bind(document_id)
		.bind(summary)
		.bind(now)
		.fetch_one(pool)
		.await?)
}

/// State transitions run under a row lock so concurrent tasks cannot
/// interleave, and only transitions the document state machine permits
/// are applied.
pub async fn mark_indexed(
	pool: &PgPool,
	document_id: Uuid,
	to: IndexedState,
	index_error: Option<&str>,
	now: OffsetDateTime,
) -> Result<()> {
	let mut tx = pool.begin().await?;
	let current: Option<(String,)> =
		sqlx::query_as("SELECT indexed_state FROM documents WHERE document_id = $1 FOR UPDATE")
			.bind(document_id)
			.fetch_optional(&mut *tx)
			.await?;
	let Some((current,)) = current else {
		// Deleted while the task was queued; nothing to transition.
		tx.commit().await?;

		return Ok(());
	};

	IndexedState::parse(&current)?.transition(to)?;

	sqlx::query(
		"UPDATE documents SET indexed_state = $2, index_error = $3, updated_at = $4 \
		 WHERE document_id = $1",
	)
	.bind(document_id)
	.bind(to.as_str())
	.bind(index_error)
	.bind(now)
	.execute(&mut *tx)
	.await?;

	tx.commit().await?;

	Ok(())
}

/// Synchronous half of the delete flow. Indexed documents move to
/// `evicting` and wait for the background eviction task; documents that
/// never reached the index have no chunks and are removed immediately.
/// Returns the row and whether eviction is still required.
pub async fn begin_delete(
	pool: &PgPool,
	user_id: Uuid,
	document_id: Uuid,
	now: OffsetDateTime,
) -> Result<(DocumentRow, bool)> {
	let mut tx = pool.begin().await?;
	let sql =
		format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE document_id = $1 FOR UPDATE");
	let row: Option<DocumentRow> = sqlx::query_as::<_, DocumentRow>(&sql)
		.bind(document_id)
		.fetch_optional(&mut *tx)
		.await?;
	let Some(row) = row else {
		return Err(Error::NotFound("Document not found.".to_string()));
	};

	if row.user_id != user_id {
		return Err(Error::Forbidden("Document belongs to another user.".to_string()));
	}

	let state = IndexedState::parse(&row.indexed_state)?;
	let needs_eviction = matches!(state, IndexedState::Indexed | IndexedState::Evicting);

	if needs_eviction {
		if state == IndexedState::Indexed {
			sqlx::query(
				"UPDATE documents SET indexed_state = 'evicting', updated_at = $2 \
				 WHERE document_id = $1",
			)
			.bind(document_id)
			.bind(now)
			.execute(&mut *tx)
			.await?;
		}
	} else {
		sqlx::query("DELETE FROM documents WHERE document_id = $1")
			.bind(document_id)
			.execute(&mut *tx)
			.await?;
	}

	tx.commit().await?;

	Ok((row, needs_eviction))
}

/// Final half of the delete flow, run by the eviction task after the
/// user's vectors are gone.
pub async fn hard_delete<'e, E>(executor: E, document_id: Uuid) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("DELETE FROM documents WHERE document_id = $1 AND indexed_state = 'evicting'")
		.bind(document_id)
		.execute(executor)
		.await?;

	Ok(())
}

/// Every indexed document for a user, oldest first; the rebuild path
/// replays these through the chunker and embedder.
pub async fn list_indexed_documents<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<DocumentRow>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT {DOCUMENT_COLUMNS} FROM documents \
		 WHERE user_id = $1 AND indexed_state = 'indexed' ORDER BY created_at ASC"
	);

	Ok(sqlx::query_as::<_, DocumentRow>(&sql).bind(user_id).fetch_all(executor).await?)
}
