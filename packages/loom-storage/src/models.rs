use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
	pub user_id: Uuid,
	pub handle: String,
	pub display_name: Option<String>,
	pub created_at: OffsetDateTime,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct DocumentRow {
	pub document_id: Uuid,
	pub user_id: Uuid,
	pub title: String,
	pub content: String,
	pub summary: Option<String>,
	pub author: Option<String>,
	pub source_url: Option<String>,
	pub source_type: String,
	pub published_at: Option<OffsetDateTime>,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
	pub content_hash: String,
	pub indexed_state: String,
	pub index_error: Option<String>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct SourceRow {
	pub source_id: Uuid,
	pub user_id: Uuid,
	pub name: String,
	pub url: String,
	pub kind: String,
	pub cadence_seconds: i64,
	pub active: bool,
	pub auto_tags: Value,
	pub last_fetched_at: Option<OffsetDateTime>,
	pub last_error: Option<String>,
	pub consecutive_failures: i32,
	pub created_at: OffsetDateTime,
	pub updated_at: OffsetDateTime,
}
impl SourceRow {
	pub fn auto_tag_names(&self) -> Vec<String> {
		self.auto_tags
			.as_array()
			.map(|tags| {
				tags.iter().filter_map(|tag| tag.as_str()).map(|tag| tag.to_string()).collect()
			})
			.unwrap_or_default()
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct TagRow {
	pub tag_id: Uuid,
	pub name: String,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SearchRecordRow {
	pub search_id: Uuid,
	pub user_id: Uuid,
	pub query: String,
	pub result_count: i32,
	pub elapsed_ms: i64,
	pub created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
pub struct TagCountRow {
	pub name: String,
	pub count: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct TrendingQueryRow {
	pub query: String,
	pub count: i64,
	pub avg_elapsed_ms: f64,
}
