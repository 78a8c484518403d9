use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use loom_domain::text::normalize_tag;

use crate::{
	Result,
	models::{TagCountRow, TagRow},
};

/// Inserts any missing tags and returns rows for the whole set. Names are
/// case-folded; duplicates collapse to one tag. Input order is preserved
/// so display order survives.
pub async fn ensure_tags(conn: &mut PgConnection, names: &[String]) -> Result<Vec<TagRow>> {
	let mut normalized: Vec<String> = Vec::new();

	for name in names {
		let name = normalize_tag(name);

		if name.is_empty() || normalized.contains(&name) {
			continue;
		}

		normalized.push(name);
	}

	if normalized.is_empty() {
		return Ok(Vec::new());
	}

	for name in &normalized {
		sqlx::query("INSERT INTO tags (tag_id, name) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING")
			.bind(Uuid::new_v4())
			.bind(name)
			.execute(&mut *conn)
			.await?;
	}

	let rows: Vec<TagRow> =
		sqlx::query_as("SELECT tag_id, name FROM tags WHERE name = ANY($1)")
			.bind(&normalized)
			.fetch_all(&mut *conn)
			.await?;
	let mut ordered = Vec::with_capacity(normalized.len());

	for name in &normalized {
		if let Some(row) = rows.iter().find(|row| &row.name == name) {
			ordered.push(TagRow { tag_id: row.tag_id, name: row.name.clone() });
		}
	}

	Ok(ordered)
}

pub async fn replace_document_tags(
	conn: &mut PgConnection,
	document_id: Uuid,
	tags: &[TagRow],
) -> Result<()> {
	sqlx::query("DELETE FROM document_tags WHERE document_id = $1")
		.bind(document_id)
		.execute(&mut *conn)
		.await?;

	for (position, tag) in tags.iter().enumerate() {
		sqlx::query(
			"INSERT INTO document_tags (document_id, tag_id, position) VALUES ($1, $2, $3) \
			 ON CONFLICT DO NOTHING",
		)
		.bind(document_id)
		.bind(tag.tag_id)
		.bind(position as i32)
		.execute(&mut *conn)
		.await?;
	}

	Ok(())
}

pub async fn document_tag_names<'e, E>(executor: E, document_id: Uuid) -> Result<Vec<String>>
where
	E: PgExecutor<'e>,
{
	let rows: Vec<(String,)> = sqlx::query_as(
		"\
SELECT t.name
FROM document_tags dt
JOIN tags t ON t.tag_id = dt.tag_id
WHERE dt.document_id = $1
ORDER BY dt.position ASC, t.name ASC",
	)
	.bind(document_id)
	.fetch_all(executor)
	.await?;

	Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Tag names for a batch of documents in one round trip.
pub async fn tags_for_documents<'e, E>(
	executor: E,
	document_ids: &[Uuid],
) -> Result<Vec<(Uuid, String)>>
where
	E: PgExecutor<'e>,
{
	if document_ids.is_empty() {
		return Ok(Vec::new());
	}

	let rows: Vec<(Uuid, String)> = sqlx::query_as(
		"\
SELECT dt.document_id, t.name
FROM document_tags dt
JOIN tags t ON t.tag_id = dt.tag_id
WHERE dt.document_id = ANY($1)
ORDER BY dt.document_id, dt.position ASC",
	)
	.bind(document_ids)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}

pub async fn top_tags<'e, E>(executor: E, user_id: Uuid, limit: i64) -> Result<Vec<TagCountRow>>
where
	E: PgExecutor<'e>,
{
	Ok(sqlx::query_as::<_, TagCountRow>(
		"\
SELECT t.name, COUNT(*) AS count
FROM document_tags dt
JOIN tags t ON t.tag_id = dt.tag_id
JOIN documents d ON d.document_id = dt.document_id
WHERE d.user_id = $1
GROUP BY t.name
ORDER BY count DESC, t.name ASC
LIMIT $2",
	)
	.bind(user_id)
	.bind(limit)
	.fetch_all(executor)
	.await?)
}
