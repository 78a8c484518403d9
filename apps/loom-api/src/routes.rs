use std::convert::Infallible;

use axum::{
	Json, Router,
	body::Bytes,
	extract::{DefaultBodyLimit, FromRequestParts, Path, Query, State},
	http::{StatusCode, request::Parts},
	response::{
		IntoResponse, Response,
		sse::{Event, KeepAlive, Sse},
	},
	routing::{get, post, put},
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use loom_service::{
	documents::{CreateDocumentRequest, ListDocumentsRequest, UpdateDocumentRequest},
	progress::EventSink,
	search::SearchRequest,
	sources::UpsertSourceRequest,
};

use crate::state::AppState;

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub fn router(state: AppState) -> Router {
	// Leave headroom above the configured cap so the handler can answer
	// oversized uploads with a JSON 413 instead of a bare rejection.
	let body_limit = state.service.cfg.upload.max_bytes.saturating_mul(2);

	Router::new()
		.route("/health", get(health))
		.route("/api/content/documents", post(create_document).get(list_documents))
		.route(
			"/api/content/documents/{id}",
			get(get_document).put(update_document).delete(delete_document),
		)
		.route("/api/content/documents/upload/stream", post(upload_stream))
		.route("/api/search/semantic", post(semantic_search))
		.route("/api/search/semantic/stream", post(semantic_search_stream))
		.route("/api/search/history", get(search_history))
		.route("/api/sources", get(list_sources).post(upsert_source))
		.route("/api/sources/{id}", put(update_source).delete(delete_source))
		.route("/api/sources/{id}/poll", post(trigger_poll))
		.route("/api/analytics/keywords", get(analytics_keywords))
		.route("/api/analytics/trending-queries", get(analytics_trending))
		.layer(DefaultBodyLimit::max(body_limit))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/api/admin/users", post(admin_create_user))
		.route("/api/admin/vector-stats", get(admin_vector_stats))
		.route("/api/admin/rebuild/{user_id}", post(admin_rebuild))
		.with_state(state)
}

/// The authenticated user id, as forwarded by the token-verifying
/// collaborator in front of this service.
pub struct AuthUser(pub Uuid);

impl<S> FromRequestParts<S> for AuthUser
where
	S: Send + Sync,
{
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let value = parts
			.headers
			.get("x-user-id")
			.and_then(|value| value.to_str().ok())
			.ok_or_else(|| {
				ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", "Missing user identity.")
			})?;
		let user_id = Uuid::parse_str(value).map_err(|_| {
			ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid user identity.")
		})?;

		Ok(Self(user_id))
	}
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn create_document(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Json(payload): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<loom_service::documents::DocumentView>), ApiError> {
	let view = state.service.create_document(user_id, payload).await?;

	Ok((StatusCode::CREATED, Json(view)))
}

async fn list_documents(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Query(params): Query<ListDocumentsRequest>,
) -> Result<Json<loom_service::documents::ListDocumentsResponse>, ApiError> {
	Ok(Json(state.service.list_documents(user_id, params).await?))
}

async fn get_document(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Path(document_id): Path<Uuid>,
) -> Result<Json<loom_service::documents::DocumentDetail>, ApiError> {
	Ok(Json(state.service.get_document(user_id, document_id).await?))
}

async fn update_document(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Path(document_id): Path<Uuid>,
	Json(payload): Json<UpdateDocumentRequest>,
) -> Result<Json<loom_service::documents::DocumentView>, ApiError> {
	Ok(Json(state.service.update_document(user_id, document_id, payload).await?))
}

async fn delete_document(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Path(document_id): Path<Uuid>,
) -> Result<Json<loom_service::documents::DeleteDocumentResponse>, ApiError> {
	Ok(Json(state.service.delete_document(user_id, document_id).await?))
}

#[derive(Debug, Deserialize)]
struct UploadParams {
	filename: String,
}

async fn upload_stream(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Query(params): Query<UploadParams>,
	body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
	if body.len() > state.service.cfg.upload.max_bytes {
		return Err(ApiError::new(
			StatusCode::PAYLOAD_TOO_LARGE,
			"payload_too_large",
			"Upload exceeds the 16 MiB limit.",
		));
	}

	let (sink, receiver) = EventSink::channel(EVENT_CHANNEL_CAPACITY);
	let service = state.service.clone();

	tokio::spawn(async move {
		let _ = service.upload_documents(user_id, &params.filename, &body, &sink).await;
	});

	Ok(sse_response(receiver))
}

async fn semantic_search(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Json(payload): Json<SearchRequest>,
) -> Result<Json<loom_service::search::SearchResponse>, ApiError> {
	let response =
		state.service.search_with_events(user_id, payload, &EventSink::discard()).await?;

	Ok(Json(response))
}

async fn semantic_search_stream(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Json(payload): Json<SearchRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let (sink, receiver) = EventSink::channel(EVENT_CHANNEL_CAPACITY);
	let service = state.service.clone();

	tokio::spawn(async move {
		let _ = service.search_with_events(user_id, payload, &sink).await;
	});

	sse_response(receiver)
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
	limit: Option<i64>,
	days: Option<i64>,
}

async fn search_history(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<loom_service::analytics::SearchHistoryEntry>>, ApiError> {
	let history = state
		.service
		.search_history(user_id, params.days, params.limit.unwrap_or(20))
		.await?;

	Ok(Json(history))
}

async fn list_sources(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<loom_service::sources::SourceView>>, ApiError> {
	Ok(Json(state.service.list_sources(user_id).await?))
}

async fn upsert_source(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Json(payload): Json<UpsertSourceRequest>,
) -> Result<(StatusCode, Json<loom_service::sources::SourceView>), ApiError> {
	let view = state.service.upsert_source(user_id, payload).await?;

	Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
struct UpdateSourceParams {
	active: Option<bool>,
}

async fn update_source(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Path(source_id): Path<Uuid>,
	Json(payload): Json<UpdateSourceParams>,
) -> Result<Json<loom_service::sources::SourceView>, ApiError> {
	let Some(active) = payload.active else {
		return Err(ApiError::new(
			StatusCode::BAD_REQUEST,
			"validation",
			"Body must carry an \"active\" flag.",
		));
	};
	let view = state.service.set_source_active(user_id, source_id, active).await?;

	Ok(Json(view))
}

async fn delete_source(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Path(source_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
	state.service.delete_source(user_id, source_id).await?;

	Ok(StatusCode::OK)
}

async fn trigger_poll(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Path(source_id): Path<Uuid>,
) -> Result<(StatusCode, Json<loom_service::sources::PollTriggerResponse>), ApiError> {
	let response = state.service.trigger_poll(user_id, source_id).await?;

	Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
	limit: Option<i64>,
	window: Option<String>,
}

async fn analytics_keywords(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Query(params): Query<LimitParams>,
) -> Result<Json<Vec<loom_service::analytics::KeywordStat>>, ApiError> {
	Ok(Json(state.service.top_keywords(user_id, params.limit.unwrap_or(10)).await?))
}

async fn analytics_trending(
	State(state): State<AppState>,
	AuthUser(user_id): AuthUser,
	Query(params): Query<LimitParams>,
) -> Result<Json<Vec<loom_service::analytics::TrendingQuery>>, ApiError> {
	let trending = state
		.service
		.trending_queries(user_id, params.window.as_deref(), params.limit.unwrap_or(10))
		.await?;

	Ok(Json(trending))
}

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
	handle: String,
	display_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateUserResponse {
	user_id: Uuid,
	handle: String,
}

async fn admin_create_user(
	State(state): State<AppState>,
	Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreateUserResponse>), ApiError> {
	let row = loom_storage::users::create_user(
		&state.service.db.pool,
		payload.handle.trim(),
		payload.display_name.as_deref(),
		time::OffsetDateTime::now_utc(),
	)
	.await
	.map_err(loom_service::Error::from)?;

	Ok((
		StatusCode::CREATED,
		Json(CreateUserResponse { user_id: row.user_id, handle: row.handle }),
	))
}

async fn admin_vector_stats(
	State(state): State<AppState>,
) -> Result<Json<Vec<loom_storage::vector::StoreStats>>, ApiError> {
	let stats =
		state.service.vectors.global_stats().await.map_err(loom_service::Error::from)?;

	Ok(Json(stats))
}

async fn admin_rebuild(
	State(state): State<AppState>,
	Path(user_id): Path<Uuid>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
	state
		.service
		.executor()
		.map_err(ApiError::from)?
		.submit(loom_jobs::Task::RebuildUserIndex { user_id })
		.map_err(loom_service::Error::from)?;

	Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "user_id": user_id, "enqueued": true }))))
}

fn sse_response<T: Serialize + Send + 'static>(
	receiver: tokio::sync::mpsc::Receiver<T>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let stream = ReceiverStream::new(receiver).map(|event| {
		let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());

		Ok(Event::default().data(payload))
	});

	Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	code: String,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	code: String,
	message: String,
	retry_after: Option<u32>,
}
impl ApiError {
	fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, code: code.into(), message: message.into(), retry_after: None }
	}
}

impl From<loom_service::Error> for ApiError {
	fn from(err: loom_service::Error) -> Self {
		use loom_service::Error;

		let message = err.to_string();
		let code = err.code().to_string();
		let (status, retry_after) = match &err {
			Error::Validation { .. } => (StatusCode::BAD_REQUEST, None),
			Error::NotFound { .. } => (StatusCode::NOT_FOUND, None),
			Error::CrossUserForbidden { .. } => (StatusCode::FORBIDDEN, None),
			Error::Duplicate { .. } => (StatusCode::CONFLICT, None),
			Error::Dependency { .. } | Error::Corrupt { .. } =>
				(StatusCode::SERVICE_UNAVAILABLE, None),
			Error::Backpressure => (StatusCode::SERVICE_UNAVAILABLE, Some(5)),
			Error::Timeout => (StatusCode::GATEWAY_TIMEOUT, None),
			Error::Canceled => (StatusCode::BAD_REQUEST, None),
			Error::Storage { .. } | Error::Internal { .. } =>
				(StatusCode::INTERNAL_SERVER_ERROR, None),
		};

		Self { status, code, message, retry_after }
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body =
			ErrorBody { code: self.code, message: self.message, details: None };
		let mut response = (self.status, Json(body)).into_response();

		if let Some(seconds) = self.retry_after
			&& let Ok(value) = seconds.to_string().parse()
		{
			response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
		}

		response
	}
}
