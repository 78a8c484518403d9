use axum::{
	body::{self, Body},
	http::{Request, StatusCode},
};
use tower::util::ServiceExt;

use loom_api::{routes, state::AppState};
use loom_testkit::TestDatabase;

fn test_config(dsn: String, vector_root: String) -> loom_config::Config {
	loom_config::Config {
		service: loom_config::Service {
			http_bind: "127.0.0.1:0".to_string(),
			admin_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
		},
		storage: loom_config::Storage { dsn, pool_max_conns: 2 },
		vector_store: loom_config::VectorStore {
			root: vector_root,
			compact_threshold_ratio: 0.2,
			compact_threshold_count: 1_000,
			lru_capacity: 4,
		},
		embedder: loom_config::Embedder {
			provider: "local-hash".to_string(),
			model_id: "all-MiniLM-L6-v2".to_string(),
			api_base: String::new(),
			api_key: String::new(),
			batch_size: 32,
			timeout_ms: 1_000,
			dimensions: 384,
		},
		reranker: loom_config::Reranker {
			provider: "local".to_string(),
			model_id: "ms-marco-MiniLM-L-6-v2".to_string(),
			api_base: String::new(),
			api_key: String::new(),
			batch_size: 16,
			timeout_ms: 1_000,
			calibration_k: 4.0,
		},
		llm: loom_config::Llm {
			endpoint: "http://127.0.0.1:1".to_string(),
			model_id: "test".to_string(),
			timeout_s: 1,
			temperature: 0.3,
			max_tokens: 64,
		},
		fetcher: loom_config::Fetcher {
			user_agent: "newsloom-bot/test".to_string(),
			per_host_rps: 10,
			timeout_s: 5,
			proxies: Vec::new(),
		},
		scheduler: loom_config::Scheduler {
			rss_default_cadence_s: 1_800,
			web_sweep_hour: 3,
			maintenance_weekday: 0,
		},
		executor: loom_config::Executor { workers: 2, queue_capacity: 32, drain_timeout_s: 5 },
		search: loom_config::Search {
			default_limit: 10,
			external_trigger_threshold: 0.35,
			external_trigger_min_results: 3,
			external_provider: "local".to_string(),
			external_api_base: String::new(),
			external_api_key: String::new(),
			timeout_s: 30,
		},
		upload: loom_config::Upload { max_bytes: 1024 },
	}
}

async fn test_state(test_db: &TestDatabase, vector_root: &tempfile::TempDir) -> AppState {
	let config =
		test_config(test_db.dsn().to_string(), vector_root.path().to_string_lossy().to_string());

	AppState::new(config).await.expect("Failed to initialize app state.")
}

async fn create_user(state: &AppState, handle: &str) -> uuid::Uuid {
	let app = routes::admin_router(state.clone());
	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/api/admin/users")
				.header("content-type", "application/json")
				.body(Body::from(format!("{{\"handle\":\"{handle}\"}}")))
				.expect("Failed to build request."),
		)
		.await
		.expect("Failed to call create user.");

	assert_eq!(response.status(), StatusCode::CREATED);

	let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
	let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json");

	json["user_id"].as_str().and_then(|raw| uuid::Uuid::parse_str(raw).ok()).expect("user id")
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn health_ok() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping health_ok; set LOOM_PG_DSN to run this test.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let vector_root = tempfile::tempdir().expect("tempdir");
	let state = test_state(&test_db, &vector_root).await;
	let app = routes::router(state.clone());
	let response = app
		.oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
		.await
		.expect("Failed to call /health.");

	assert_eq!(response.status(), StatusCode::OK);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn requests_without_identity_are_unauthorized() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping requests_without_identity_are_unauthorized; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let vector_root = tempfile::tempdir().expect("tempdir");
	let state = test_state(&test_db, &vector_root).await;
	let app = routes::router(state.clone());
	let response = app
		.oneshot(
			Request::builder()
				.uri("/api/content/documents")
				.body(Body::empty())
				.expect("request"),
		)
		.await
		.expect("Failed to call list documents.");

	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

	let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
	let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json");

	assert_eq!(json["code"], "unauthorized");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn create_and_list_documents_round_trip() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping create_and_list_documents_round_trip; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let vector_root = tempfile::tempdir().expect("tempdir");
	let state = test_state(&test_db, &vector_root).await;
	let user_id = create_user(&state, "api-user").await;
	let payload = serde_json::json!({
		"title": "Hello",
		"content": "A body long enough to chunk and index without trouble.",
		"tags": ["News", "tech"]
	});
	let response = routes::router(state.clone())
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/api/content/documents")
				.header("x-user-id", user_id.to_string())
				.header("content-type", "application/json")
				.body(Body::from(payload.to_string()))
				.expect("request"),
		)
		.await
		.expect("Failed to create document.");

	assert_eq!(response.status(), StatusCode::CREATED);

	let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
	let created: serde_json::Value = serde_json::from_slice(&bytes).expect("json");

	assert_eq!(created["indexed_state"], "pending");
	assert_eq!(created["tags"][0], "news");

	// A duplicate create is a conflict.
	let response = routes::router(state.clone())
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/api/content/documents")
				.header("x-user-id", user_id.to_string())
				.header("content-type", "application/json")
				.body(Body::from(payload.to_string()))
				.expect("request"),
		)
		.await
		.expect("Failed to call create document.");

	assert_eq!(response.status(), StatusCode::CONFLICT);

	let response = routes::router(state.clone())
		.oneshot(
			Request::builder()
				.uri("/api/content/documents?per_page=10")
				.header("x-user-id", user_id.to_string())
				.body(Body::empty())
				.expect("request"),
		)
		.await
		.expect("Failed to list documents.");

	assert_eq!(response.status(), StatusCode::OK);

	let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
	let listed: serde_json::Value = serde_json::from_slice(&bytes).expect("json");

	assert_eq!(listed["total"], 1);
	assert_eq!(listed["items"][0]["title"], "Hello");

	// Another user's access is forbidden, distinct from a missing id.
	let other = create_user(&state, "other-user").await;
	let response = routes::router(state.clone())
		.oneshot(
			Request::builder()
				.uri(format!(
					"/api/content/documents/{}",
					created["document_id"].as_str().expect("id")
				))
				.header("x-user-id", other.to_string())
				.body(Body::empty())
				.expect("request"),
		)
		.await
		.expect("Failed to get document.");

	assert_eq!(response.status(), StatusCode::FORBIDDEN);

	let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
	let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json");

	assert_eq!(json["code"], "cross_user_forbidden");

	// A document id that does not exist at all stays a 404.
	let response = routes::router(state.clone())
		.oneshot(
			Request::builder()
				.uri(format!("/api/content/documents/{}", uuid::Uuid::new_v4()))
				.header("x-user-id", user_id.to_string())
				.body(Body::empty())
				.expect("request"),
		)
		.await
		.expect("Failed to get document.");

	assert_eq!(response.status(), StatusCode::NOT_FOUND);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn search_validation_rejects_bad_input() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping search_validation_rejects_bad_input; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let vector_root = tempfile::tempdir().expect("tempdir");
	let state = test_state(&test_db, &vector_root).await;
	let user_id = create_user(&state, "searcher").await;

	for payload in [
		serde_json::json!({ "query": "  " }),
		serde_json::json!({ "query": "ok", "limit": 0 }),
		serde_json::json!({ "query": "ok", "limit": 101 }),
	] {
		let response = routes::router(state.clone())
			.oneshot(
				Request::builder()
					.method("POST")
					.uri("/api/search/semantic")
					.header("x-user-id", user_id.to_string())
					.header("content-type", "application/json")
					.body(Body::from(payload.to_string()))
					.expect("request"),
			)
			.await
			.expect("Failed to call search.");

		assert_eq!(response.status(), StatusCode::BAD_REQUEST, "payload: {payload}");

		let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
		let json: serde_json::Value = serde_json::from_slice(&bytes).expect("json");

		assert_eq!(json["code"], "validation");
	}

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn oversized_uploads_are_rejected_with_413() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping oversized_uploads_are_rejected_with_413; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let vector_root = tempfile::tempdir().expect("tempdir");
	// upload.max_bytes is 1,024 in the test config.
	let state = test_state(&test_db, &vector_root).await;
	let user_id = create_user(&state, "uploader").await;
	let oversized = "title,content\n".to_string() + &"a,b\n".repeat(600);
	let response = routes::router(state.clone())
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/api/content/documents/upload/stream?filename=big.csv")
				.header("x-user-id", user_id.to_string())
				.header("content-type", "text/csv")
				.body(Body::from(oversized))
				.expect("request"),
		)
		.await
		.expect("Failed to call upload.");

	assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
