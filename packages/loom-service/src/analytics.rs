use serde::Serialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use loom_storage::search_records;

use crate::{Error, LoomService, Result};

pub const DEFAULT_TRENDING_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Serialize)]
pub struct KeywordStat {
	pub name: String,
	pub count: i64,
	pub percentage: f64,
}

#[derive(Debug, Serialize)]
pub struct TrendingQuery {
	pub query: String,
	pub count: i64,
	pub avg_elapsed_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchHistoryEntry {
	pub query: String,
	pub result_count: i32,
	pub elapsed_ms: i64,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

impl LoomService {
	/// Top tags with the share of all tag assignments they account for.
	pub async fn top_keywords(&self, user_id: Uuid, limit: i64) -> Result<Vec<KeywordStat>> {
		let limit = limit.clamp(1, 100);
		let rows = loom_storage::tags::top_tags(&self.db.pool, user_id, limit).await?;
		let total: i64 = rows.iter().map(|row| row.count).sum();

		Ok(rows
			.into_iter()
			.map(|row| KeywordStat {
				percentage: if total > 0 {
					(row.count as f64 / total as f64 * 1000.0).round() / 10.0
				} else {
					0.0
				},
				name: row.name,
				count: row.count,
			})
			.collect())
	}

	pub async fn trending_queries(
		&self,
		user_id: Uuid,
		window: Option<&str>,
		limit: i64,
	) -> Result<Vec<TrendingQuery>> {
		let limit = limit.clamp(1, 100);
		let days = parse_window_days(window)?;
		let since = OffsetDateTime::now_utc() - Duration::days(days);
		let rows =
			search_records::trending_queries(&self.db.pool, user_id, since, limit).await?;

		Ok(rows
			.into_iter()
			.map(|row| TrendingQuery {
				query: row.query,
				count: row.count,
				avg_elapsed_ms: row.avg_elapsed_ms,
			})
			.collect())
	}

	pub async fn search_history(
		&self,
		user_id: Uuid,
		days: Option<i64>,
		limit: i64,
	) -> Result<Vec<SearchHistoryEntry>> {
		let limit = limit.clamp(1, 100);
		let since = days.map(|days| OffsetDateTime::now_utc() - Duration::days(days.max(1)));
		let rows = search_records::search_history(&self.db.pool, user_id, since, limit).await?;

		Ok(rows
			.into_iter()
			.map(|row| SearchHistoryEntry {
				query: row.query,
				result_count: row.result_count,
				elapsed_ms: row.elapsed_ms,
				created_at: row.created_at,
			})
			.collect())
	}
}

/// Accepts windows like "7d" or a bare day count.
fn parse_window_days(window: Option<&str>) -> Result<i64> {
	let Some(raw) = window.map(str::trim).filter(|value| !value.is_empty()) else {
		return Ok(DEFAULT_TRENDING_WINDOW_DAYS);
	};
	let digits = raw.strip_suffix('d').unwrap_or(raw);
	let days: i64 = digits
		.parse()
		.map_err(|_| Error::validation("window must look like \"7d\"."))?;

	if days < 1 {
		return Err(Error::validation("window must be at least one day."));
	}

	Ok(days)
}
