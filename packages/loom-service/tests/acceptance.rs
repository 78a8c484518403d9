use std::{path::Path, sync::Arc, time::Duration};

use time::OffsetDateTime;
use uuid::Uuid;

use loom_jobs::executor::Executor;
use loom_service::{
	LoomService,
	documents::{CreateDocumentRequest, ListDocumentsRequest},
	ingest::{IngestInput, IngestOutcome},
	progress::{EventSink, SearchEvent, UploadEvent},
	search::{SearchFilters, SearchRequest},
	sources::UpsertSourceRequest,
};
use loom_storage::{db::Db, users};
use loom_testkit::TestDatabase;

fn test_config(dsn: &str, vector_root: &Path) -> loom_config::Config {
	loom_config::Config {
		service: loom_config::Service {
			http_bind: "127.0.0.1:0".to_string(),
			admin_bind: "127.0.0.1:0".to_string(),
			log_level: "info".to_string(),
		},
		storage: loom_config::Storage { dsn: dsn.to_string(), pool_max_conns: 4 },
		vector_store: loom_config::VectorStore {
			root: vector_root.to_string_lossy().to_string(),
			compact_threshold_ratio: 0.2,
			compact_threshold_count: 1_000,
			lru_capacity: 8,
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
			model_id: "qwen3:4b".to_string(),
			timeout_s: 1,
			temperature: 0.3,
			max_tokens: 64,
		},
		fetcher: loom_config::Fetcher {
			user_agent: "newsloom-bot/test".to_string(),
			per_host_rps: 50,
			timeout_s: 5,
			proxies: Vec::new(),
		},
		scheduler: loom_config::Scheduler {
			rss_default_cadence_s: 60,
			web_sweep_hour: 3,
			maintenance_weekday: 0,
		},
		executor: loom_config::Executor { workers: 2, queue_capacity: 64, drain_timeout_s: 5 },
		search: loom_config::Search {
			default_limit: 10,
			external_trigger_threshold: 0.35,
			external_trigger_min_results: 3,
			external_provider: "local".to_string(),
			external_api_base: String::new(),
			external_api_key: String::new(),
			timeout_s: 30,
		},
		upload: loom_config::Upload { max_bytes: 16 * 1024 * 1024 },
	}
}

async fn build_service(dsn: &str, vector_root: &Path) -> (Arc<LoomService>, Arc<Executor>) {
	let cfg = test_config(dsn, vector_root);
	let db = Db::connect(&cfg.storage).await.expect("Failed to connect to Postgres.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	let executor_cfg = cfg.executor.clone();
	let service = LoomService::new(cfg, db).expect("Failed to build service.");
	let executor = Executor::start(service.clone(), &executor_cfg);

	service.attach_executor(executor.clone());

	(service, executor)
}

async fn create_user(service: &LoomService, handle: &str) -> Uuid {
	users::create_user(&service.db.pool, handle, None, OffsetDateTime::now_utc())
		.await
		.expect("Failed to create user.")
		.user_id
}

async fn wait_until<F, Fut>(mut check: F, what: &str)
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = bool>,
{
	for _ in 0..100 {
		if check().await {
			return;
		}

		tokio::time::sleep(Duration::from_millis(50)).await;
	}

	panic!("Timed out waiting for {what}.");
}

async fn indexed_count(service: &LoomService, user_id: Uuid) -> i64 {
	sqlx::query_scalar(
		"SELECT COUNT(*) FROM documents WHERE user_id = $1 AND indexed_state = 'indexed'",
	)
	.bind(user_id)
	.fetch_one(&service.db.pool)
	.await
	.expect("Failed to count documents.")
}

fn ingest_input(user_id: Uuid, title: &str, content: &str, url: Option<&str>) -> IngestInput {
	IngestInput {
		user_id,
		title: title.to_string(),
		content: content.to_string(),
		summary: None,
		author: None,
		source_url: url.map(|url| url.to_string()),
		source_type: loom_domain::states::SourceType::Manual,
		published_at: None,
		tags: Vec::new(),
	}
}

fn cat_content(i: usize) -> String {
	format!(
		"The cat number {i} is a feline companion. Cats purr and chase feline toys. \
		 Every cat enjoys napping in sunbeams while feline instincts stay sharp."
	)
}

fn dog_content(i: usize) -> String {
	format!(
		"The dog number {i} is a canine companion. Dogs bark and fetch canine toys. \
		 Every dog enjoys long walks while canine loyalty stays strong."
	)
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn semantic_search_ranks_matching_documents() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping semantic_search_ranks_matching_documents; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("test db");
	let vector_root = tempfile::tempdir().expect("tempdir");
	let (service, executor) = build_service(test_db.dsn(), vector_root.path()).await;
	let user_id = create_user(&service, "searcher").await;
	let mut cat_ids = Vec::new();

	for i in 0..5 {
		let outcome = service
			.ingest_article(ingest_input(user_id, &format!("Cat story {i}"), &cat_content(i), None))
			.await
			.expect("ingest cat");

		if let IngestOutcome::Created(row) = outcome {
			cat_ids.push(row.document_id);
		}
	}
	for i in 0..5 {
		service
			.ingest_article(ingest_input(user_id, &format!("Dog story {i}"), &dog_content(i), None))
			.await
			.expect("ingest dog");
	}

	wait_until(|| async { indexed_count(&service, user_id).await == 10 }, "indexing").await;

	let response = service
		.search_with_events(
			user_id,
			SearchRequest {
				query: "feline cat purr".to_string(),
				limit: Some(3),
				include_external: false,
				filters: SearchFilters::default(),
			},
			&EventSink::discard(),
		)
		.await
		.expect("search");

	assert!(!response.results.is_empty());
	assert!(response.results.len() <= 3);

	for item in &response.results {
		assert!(cat_ids.contains(&item.document_id), "Expected only cat documents.");
		assert!((0.0..=1.0).contains(&item.similarity));
	}
	for pair in response.results.windows(2) {
		assert!(pair[0].similarity >= pair[1].similarity, "Similarities must be non-increasing.");
	}

	assert!(response.external_results.is_empty());

	executor.shutdown(Duration::from_secs(5)).await;
	test_db.cleanup().await.expect("cleanup");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn ingesting_the_same_article_twice_is_a_no_op() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping ingesting_the_same_article_twice_is_a_no_op; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("test db");
	let vector_root = tempfile::tempdir().expect("tempdir");
	let (service, executor) = build_service(test_db.dsn(), vector_root.path()).await;
	let user_id = create_user(&service, "deduper").await;
	let content = cat_content(1);

	let first = service
		.ingest_article(ingest_input(user_id, "Cats", &content, Some("https://x/cats")))
		.await
		.expect("first ingest");

	assert!(matches!(first, IngestOutcome::Created(_)));

	wait_until(|| async { indexed_count(&service, user_id).await == 1 }, "indexing").await;

	// Same URL.
	let second = service
		.ingest_article(ingest_input(user_id, "Cats again", "different body", Some("https://x/cats")))
		.await
		.expect("second ingest");

	assert!(matches!(second, IngestOutcome::AlreadyPresent));

	// Same content, formatted differently, no URL.
	let reformatted = content.to_uppercase();
	let third = service
		.ingest_article(ingest_input(user_id, "Cats once more", &reformatted, None))
		.await
		.expect("third ingest");

	assert!(matches!(third, IngestOutcome::AlreadyPresent));

	let listed = service
		.list_documents(user_id, ListDocumentsRequest::default())
		.await
		.expect("list");

	assert_eq!(listed.total, 1);

	let stats = service.vectors.stats(user_id).await.expect("stats");

	assert_eq!(stats.vector_count, 1, "One short article must produce exactly one chunk.");

	executor.shutdown(Duration::from_secs(5)).await;
	test_db.cleanup().await.expect("cleanup");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn deleting_a_document_evicts_its_vectors() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping deleting_a_document_evicts_its_vectors; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("test db");
	let vector_root = tempfile::tempdir().expect("tempdir");
	let (service, executor) = build_service(test_db.dsn(), vector_root.path()).await;
	let user_id = create_user(&service, "deleter").await;
	let created = service
		.create_document(user_id, CreateDocumentRequest {
			title: "Doomed".to_string(),
			content: cat_content(9),
			summary: None,
			author: None,
			source_url: None,
			published_at: None,
			tags: vec!["doomed".to_string()],
		})
		.await
		.expect("create");
	let document_id = created.document_id;

	wait_until(|| async { indexed_count(&service, user_id).await == 1 }, "indexing").await;

	let before = service
		.search_with_events(
			user_id,
			SearchRequest {
				query: "feline cat".to_string(),
				limit: Some(5),
				include_external: false,
				filters: SearchFilters::default(),
			},
			&EventSink::discard(),
		)
		.await
		.expect("search before delete");

	assert!(before.results.iter().any(|item| item.document_id == document_id));

	let deleted = service.delete_document(user_id, document_id).await.expect("delete");

	assert!(deleted.evicting);

	wait_until(
		|| async {
			loom_storage::documents::load_document(&service.db.pool, document_id)
				.await
				.expect("load")
				.is_none()
		},
		"eviction",
	)
	.await;

	let after = service
		.search_with_events(
			user_id,
			SearchRequest {
				query: "feline cat".to_string(),
				limit: Some(5),
				include_external: false,
				filters: SearchFilters::default(),
			},
			&EventSink::discard(),
		)
		.await
		.expect("search after delete");

	assert!(after.results.iter().all(|item| item.document_id != document_id));

	executor.shutdown(Duration::from_secs(5)).await;
	test_db.cleanup().await.expect("cleanup");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn empty_index_with_external_fallback_reports_external_hits() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!(
			"Skipping empty_index_with_external_fallback_reports_external_hits; set LOOM_PG_DSN to run."
		);

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("test db");
	let vector_root = tempfile::tempdir().expect("tempdir");
	let (service, executor) = build_service(test_db.dsn(), vector_root.path()).await;
	let user_id = create_user(&service, "external").await;
	let (sink, mut receiver) = EventSink::channel(64);
	let request = SearchRequest {
		query: "foo".to_string(),
		limit: Some(10),
		include_external: true,
		filters: SearchFilters::default(),
	};
	let response =
		service.search_with_events(user_id, request, &sink).await.expect("search");

	drop(sink);

	assert_eq!(response.results.len(), 0);
	assert!(response.external_results.len() <= 5);
	assert!(!response.external_results.is_empty(), "Local stub provider must return hits.");

	let mut saw_started = false;
	let mut terminal = None;

	while let Some(event) = receiver.recv().await {
		match &event {
			SearchEvent::Started { .. } => saw_started = true,
			SearchEvent::Completed { results_count, external_results_count, .. } => {
				assert_eq!(*results_count, 0);
				assert!(*external_results_count <= 5);

				terminal = Some(event.clone());
			},
			SearchEvent::Error { .. } => terminal = Some(event.clone()),
			_ => {},
		}
	}

	assert!(saw_started);
	assert!(matches!(terminal, Some(SearchEvent::Completed { .. })));

	executor.shutdown(Duration::from_secs(5)).await;
	test_db.cleanup().await.expect("cleanup");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn upload_stream_reports_each_row() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping upload_stream_reports_each_row; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("test db");
	let vector_root = tempfile::tempdir().expect("tempdir");
	let (service, executor) = build_service(test_db.dsn(), vector_root.path()).await;
	let user_id = create_user(&service, "uploader").await;
	let csv = "\
title,content,tags
Row one,First row body text,news
Row two,,
Row three,Third row body text,analysis
";
	let (sink, mut receiver) = EventSink::channel(64);
	let summary = service
		.upload_documents(user_id, "articles.csv", csv.as_bytes(), &sink)
		.await
		.expect("upload");

	drop(sink);

	assert_eq!(summary.inserted, 2);
	assert_eq!(summary.failed, 1);

	let mut events = Vec::new();

	while let Some(event) = receiver.recv().await {
		events.push(event);
	}

	assert!(matches!(events.first(), Some(UploadEvent::Started { rows: 3, .. })));
	assert!(events.iter().any(|event| matches!(event, UploadEvent::RowOk { row: 1 })));
	assert!(events.iter().any(
		|event| matches!(event, UploadEvent::RowError { row: 2, reason } if reason == "missing content")
	));
	assert!(events.iter().any(|event| matches!(event, UploadEvent::RowOk { row: 3 })));
	assert!(matches!(events.last(), Some(UploadEvent::Completed { inserted: 2, failed: 1 })));

	executor.shutdown(Duration::from_secs(5)).await;
	test_db.cleanup().await.expect("cleanup");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn rss_poll_ingests_new_entries_once() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping rss_poll_ingests_new_entries_once; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("test db");
	let vector_root = tempfile::tempdir().expect("tempdir");
	let (service, executor) = build_service(test_db.dsn(), vector_root.path()).await;
	let user_id = create_user(&service, "poller").await;
	let feed_addr = serve_fixture_feed().await;
	let source = service
		.upsert_source(user_id, UpsertSourceRequest {
			name: "Fixture feed".to_string(),
			url: format!("http://{feed_addr}/feed.xml"),
			kind: "rss".to_string(),
			cadence_seconds: Some(60),
			active: Some(true),
			auto_tags: Vec::new(),
		})
		.await
		.expect("source");

	service.trigger_poll(user_id, source.source_id).await.expect("trigger");

	wait_until(|| async { indexed_count(&service, user_id).await == 2 }, "rss indexing").await;

	// Article A is ~1,200 chars (2 chunks); article B ~400 chars (1 chunk).
	let stats = service.vectors.stats(user_id).await.expect("stats");

	assert_eq!(stats.vector_count, 3);

	// A second poll sees the same entries and adds nothing.
	service.trigger_poll(user_id, source.source_id).await.expect("second trigger");
	tokio::time::sleep(Duration::from_millis(500)).await;

	let listed = service
		.list_documents(user_id, ListDocumentsRequest::default())
		.await
		.expect("list");

	assert_eq!(listed.total, 2);

	let polled = service.list_sources(user_id).await.expect("sources");

	assert!(polled[0].last_fetched_at.is_some());
	assert_eq!(polled[0].consecutive_failures, 0);

	executor.shutdown(Duration::from_secs(5)).await;
	test_db.cleanup().await.expect("cleanup");
}

/// Minimal HTTP server handing out a fixed RSS document, enough for the
/// fetcher to poll against.
async fn serve_fixture_feed() -> std::net::SocketAddr {
	use tokio::io::{AsyncReadExt, AsyncWriteExt};

	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("addr");
	let now = OffsetDateTime::now_utc();
	let format =
		time::format_description::well_known::Rfc2822;
	let one_hour_ago = (now - time::Duration::hours(1)).format(&format).expect("format");
	let half_hour_ago = (now - time::Duration::minutes(30)).format(&format).expect("format");
	let body_a = "alpha beta gamma delta epsilon zeta ".repeat(34);
	let body_b = "one two three four five six seven eight ".repeat(10);
	let feed = format!(
		"\
<rss version=\"2.0\"><channel>
<title>Fixture</title><link>https://example.com</link><description>fixture</description>
<item><title>A</title><link>https://example.com/a</link><description>{body_a}</description><pubDate>{one_hour_ago}</pubDate></item>
<item><title>B</title><link>https://example.com/b</link><description>{body_b}</description><pubDate>{half_hour_ago}</pubDate></item>
</channel></rss>"
	);
	let response = format!(
		"HTTP/1.1 200 OK\r\ncontent-type: application/rss+xml\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
		feed.len(),
		feed
	);

	tokio::spawn(async move {
		loop {
			let Ok((mut socket, _)) = listener.accept().await else {
				return;
			};
			let response = response.clone();

			tokio::spawn(async move {
				let mut buf = [0_u8; 1024];
				let _ = socket.read(&mut buf).await;
				let _ = socket.write_all(response.as_bytes()).await;
				let _ = socket.shutdown().await;
			});
		}
	});

	addr
}
