use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error("Duplicate document: {0}")]
	DuplicateDocument(String),
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Forbidden: {0}")]
	Forbidden(String),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Invalid state transition: {0}")]
	InvalidTransition(String),
	#[error("Vector index corrupt for user {user_id}: {message}")]
	IndexCorrupt { user_id: Uuid, message: String },
}
impl From<loom_domain::Error> for Error {
	fn from(err: loom_domain::Error) -> Self {
		Self::InvalidTransition(err.to_string())
	}
}

/// Postgres raises 23505 for unique violations; the dedup indices rely
/// on it.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
	err.as_database_error().and_then(|db| db.code()).is_some_and(|code| code == "23505")
}
