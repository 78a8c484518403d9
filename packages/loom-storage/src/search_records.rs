use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Result,
	models::{SearchRecordRow, TrendingQueryRow},
};

/// Inserted at the start of a search with placeholder counters; the
/// pipeline finalizes it once the elapsed time is known.
pub async fn add_search_record<'e, E>(
	executor: E,
	user_id: Uuid,
	query: &str,
	now: OffsetDateTime,
) -> Result<Uuid>
where
	E: PgExecutor<'e>,
{
	let search_id = Uuid::new_v4();

	sqlx::query(
		"\
INSERT INTO search_records (search_id, user_id, query, result_count, elapsed_ms, created_at)
VALUES ($1, $2, $3, 0, 0, $4)",
	)
	.bind(search_id)
	.bind(user_id)
	.bind(query)
	.bind(now)
	.execute(executor)
	.await?;

	Ok(search_id)
}

pub async fn finish_search_record<'e, E>(
	executor: E,
	search_id: Uuid,
	result_count: i32,
	elapsed_ms: i64,
) -> Result<()>
where
	E: PgExecutor<'e>,
{
	sqlx::query("UPDATE search_records SET result_count = $2, elapsed_ms = $3 WHERE search_id = $1")
		.bind(search_id)
		.bind(result_count)
		.bind(elapsed_ms)
		.execute(executor)
		.await?;

	Ok(())
}

pub async fn trending_queries<'e, E>(
	executor: E,
	user_id: Uuid,
	since: OffsetDateTime,
	limit: i64,
) -> Result<Vec<TrendingQueryRow>>
where
	E: PgExecutor<'e>,
{
	Ok(sqlx::query_as::<_, TrendingQueryRow>(
		"\
SELECT query, COUNT(*) AS count, AVG(elapsed_ms)::float8 AS avg_elapsed_ms
FROM search_records
WHERE user_id = $1 AND created_at >= $2
GROUP BY query
ORDER BY count DESC, query ASC
LIMIT $3",
	)
	.bind(user_id)
	.bind(since)
	.bind(limit)
	.fetch_all(executor)
	.await?)
}

pub async fn search_history<'e, E>(
	executor: E,
	user_id: Uuid,
	since: Option<OffsetDateTime>,
	limit: i64,
) -> Result<Vec<SearchRecordRow>>
where
	E: PgExecutor<'e>,
{
	Ok(sqlx::query_as::<_, SearchRecordRow>(
		"\
SELECT search_id, user_id, query, result_count, elapsed_ms, created_at
FROM search_records
WHERE user_id = $1 AND ($2::timestamptz IS NULL OR created_at >= $2)
ORDER BY created_at DESC
LIMIT $3",
	)
	.bind(user_id)
	.bind(since)
	.bind(limit)
	.fetch_all(executor)
	.await?)
}
