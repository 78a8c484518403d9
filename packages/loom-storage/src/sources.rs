use serde_json::Value;
use sqlx::{PgExecutor, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, models::SourceRow};

const SOURCE_COLUMNS: &str = "\
source_id, user_id, name, url, kind, cadence_seconds, active, auto_tags, last_fetched_at, \
last_error, consecutive_failures, created_at, updated_at";

pub struct UpsertSource<'a> {
	pub user_id: Uuid,
	pub name: &'a str,
	pub url: &'a str,
	pub kind: &'a str,
	pub cadence_seconds: i64,
	pub active: bool,
	pub auto_tags: &'a [String],
}

/// Insert-or-update keyed on `(user_id, url)`; polling statistics of an
/// existing source survive the update.
pub async fn upsert_source<'e, E>(
	executor: E,
	source: &UpsertSource<'_>,
	now: OffsetDateTime,
) -> Result<SourceRow>
where
	E: PgExecutor<'e>,
{
	let auto_tags = Value::from(
		source.auto_tags.iter().map(|tag| Value::from(tag.as_str())).collect::<Vec<_>>(),
	);
	let sql = format!(
		"\
INSERT INTO sources (
	source_id, user_id, name, url, kind, cadence_seconds, active, auto_tags, created_at, updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
ON CONFLICT (user_id, url) DO UPDATE
SET name = EXCLUDED.name,
	kind = EXCLUDED.kind,
	cadence_seconds = EXCLUDED.cadence_seconds,
	active = EXCLUDED.active,
	auto_tags = EXCLUDED.auto_tags,
	updated_at = EXCLUDED.updated_at
RETURNING {SOURCE_COLUMNS}"
	);

	Ok(sqlx::query_as::<_, SourceRow>(&sql)
		.bind(Uuid::new_v4())
		.bind(source.user_id)
		.bind(source.name)
		.bind(source.url)
		.bind(source.kind)
		.bind(source.cadence_seconds)
		.bind(source.active)
		.bind(auto_tags)
		.bind(now)
		.fetch_one(executor)
		.await?)
}

/// Looks the source up by id alone, then checks ownership, so missing
/// and foreign sources surface as NotFound and Forbidden respectively.
pub async fn get_source<'e, E>(executor: E, user_id: Uuid, source_id: Uuid) -> Result<SourceRow>
where
	E: PgExecutor<'e>,
{
	let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE source_id = $1");
	let row = sqlx::query_as::<_, SourceRow>(&sql)
		.bind(source_id)
		.fetch_optional(executor)
		.await?
		.ok_or_else(|| Error::NotFound("Source not found.".to_string()))?;

	if row.user_id != user_id {
		return Err(Error::Forbidden("Source belongs to another user.".to_string()));
	}

	Ok(row)
}

pub async fn list_sources<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<SourceRow>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT {SOURCE_COLUMNS} FROM sources WHERE user_id = $1 ORDER BY created_at DESC"
	);

	Ok(sqlx::query_as::<_, SourceRow>(&sql).bind(user_id).fetch_all(executor).await?)
}

pub async fn set_source_active(
	pool: &PgPool,
	user_id: Uuid,
	source_id: Uuid,
	active: bool,
	now: OffsetDateTime,
) -> Result<SourceRow> {
	get_source(pool, user_id, source_id).await?;

	let sql = format!(
		"\
UPDATE sources SET active = $2, updated_at = $3
WHERE source_id = $1
RETURNING {SOURCE_COLUMNS}"
	);

	Ok(sqlx::query_as::<_, SourceRow>(&sql)
		.bind(source_id)
		.bind(active)
		.bind(now)
		.fetch_one(pool)
		.await?)
}

pub async fn delete_source(pool: &PgPool, user_id: Uuid, source_id: Uuid) -> Result<()> {
	get_source(pool, user_id, source_id).await?;

	sqlx::query("DELETE FROM sources WHERE source_id = $1")
		.bind(source_id)
		.execute(pool)
		.await?;

	Ok(())
}

/// Active sources of one kind across all users; the scheduler computes
/// per-source due times from `last_fetched_at`, `cadence_seconds`, and
/// `consecutive_failures`.
pub async fn list_active_sources<'e, E>(executor: E, kind: &str) -> Result<Vec<SourceRow>>
where
	E: PgExecutor<'e>,
{
	let sql = format!(
		"SELECT {SOURCE_COLUMNS} FROM sources WHERE active AND kind = $1 ORDER BY created_at ASC"
	);

	Ok(sqlx::query_as::<_, SourceRow>(&sql).bind(kind).fetch_all(executor).await?)
}

/// Records a poll outcome. `last_fetched_at` is monotonic: an update
/// never moves it backwards even if polls complete out of order.
pub async fn touch_source<'e, E>(
	executor: E,
	source_id: Uuid,
	at: OffsetDateTime,
	error: Option<&str>,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	match error {
		None => {
			sqlx::query(
				"\
UPDATE sources
SET last_fetched_at = GREATEST(COALESCE(last_fetched_at, $2), $2),
	last_error = NULL,
	consecutive_failures = 0,
	updated_at = $2
WHERE source_id = $1",
			)
			.bind(source_id)
			.bind(at)
			.execute(executor)
			.await?;
		},
		Some(message) => {
			sqlx::query(
				"\
UPDATE sources
SET last_error = $3,
	consecutive_failures = consecutive_failures + 1,
	updated_at = $2
WHERE source_id = $1",
			)
			.bind(source_id)
			.bind(at)
			.bind(message)
			.execute(executor)
			.await?;
		},
	}

	Ok(())
}
