use uuid::Uuid;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	Validation { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Forbidden: {message}")]
	CrossUserForbidden { message: String },
	#[error("Duplicate: {message}")]
	Duplicate { message: String },
	#[error("Dependency error: {message}")]
	Dependency { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Background queue is full.")]
	Backpressure,
	#[error("Vector index corrupt for user {user_id}.")]
	Corrupt { user_id: Uuid },
	#[error("Operation timed out.")]
	Timeout,
	#[error("Request canceled by the client.")]
	Canceled,
	#[error("Internal error: {message}")]
	Internal { message: String },
}
impl Error {
	/// Stable machine-readable code carried in error bodies and terminal
	/// stream events.
	pub fn code(&self) -> &'static str {
		match self {
			Self::Validation { .. } => "validation",
			Self::NotFound { .. } => "not_found",
			Self::CrossUserForbidden { .. } => "cross_user_forbidden",
			Self::Duplicate { .. } => "duplicate",
			Self::Dependency { .. } => "dependency_unavailable",
			Self::Storage { .. } => "storage",
			Self::Backpressure => "backpressure",
			Self::Corrupt { .. } => "index_corrupt",
			Self::Timeout => "timeout",
			Self::Canceled => "canceled",
			Self::Internal { .. } => "internal",
		}
	}

	pub fn validation(message: impl Into<String>) -> Self {
		Self::Validation { message: message.into() }
	}
}

impl From<loom_storage::Error> for Error {
	fn from(err: loom_storage::Error) -> Self {
		match err {
			loom_storage::Error::DuplicateDocument(message) => Self::Duplicate { message },
			loom_storage::Error::NotFound(message) => Self::NotFound { message },
			loom_storage::Error::Forbidden(message) => Self::CrossUserForbidden { message },
			loom_storage::Error::InvalidArgument(message) => Self::Validation { message },
			loom_storage::Error::InvalidTransition(message) => Self::Internal { message },
			loom_storage::Error::IndexCorrupt { user_id, .. } => Self::Corrupt { user_id },
			loom_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			loom_storage::Error::Io(inner) => Self::Storage { message: inner.to_string() },
			loom_storage::Error::SerdeJson(inner) => Self::Storage { message: inner.to_string() },
		}
	}
}

impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<loom_providers::Error> for Error {
	fn from(err: loom_providers::Error) -> Self {
		Self::Dependency { message: err.to_string() }
	}
}

impl From<loom_acquire::Error> for Error {
	fn from(err: loom_acquire::Error) -> Self {
		match err {
			loom_acquire::Error::InvalidInput(message) | loom_acquire::Error::InvalidUrl(message) =>
				Self::Validation { message },
			other => Self::Dependency { message: other.to_string() },
		}
	}
}

impl From<loom_jobs::executor::SubmitError> for Error {
	fn from(err: loom_jobs::executor::SubmitError) -> Self {
		match err {
			loom_jobs::executor::SubmitError::Backpressure => Self::Backpressure,
			loom_jobs::executor::SubmitError::ShuttingDown =>
				Self::Internal { message: "Executor is shutting down.".to_string() },
		}
	}
}
