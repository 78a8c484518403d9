use time::OffsetDateTime;
use uuid::Uuid;

use loom_domain::states::IndexedState;
use loom_storage::{
	db::Db,
	documents::{self, DocumentFilter, NewDocument, Page},
	search_records, sources, tags, users,
};
use loom_testkit::TestDatabase;

fn storage_cfg(dsn: &str) -> loom_config::Storage {
	loom_config::Storage { dsn: dsn.to_string(), pool_max_conns: 2 }
}

fn new_doc<'a>(
	document_id: Uuid,
	user_id: Uuid,
	title: &'a str,
	content: &'a str,
	hash: &'a str,
	source_url: Option<&'a str>,
	now: OffsetDateTime,
) -> NewDocument<'a> {
	NewDocument {
		document_id,
		user_id,
		title,
		content,
		summary: None,
		author: None,
		source_url,
		source_type: "manual",
		published_at: None,
		content_hash: hash,
		now,
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn schema_bootstraps_and_documents_round_trip() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping schema_bootstraps_and_documents_round_trip; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = Db::connect(&storage_cfg(test_db.dsn())).await.expect("Failed to connect.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	let now = OffsetDateTime::now_utc();
	let user = users::create_user(&db.pool, "reader", Some("Reader"), now)
		.await
		.expect("Failed to create user.");
	let document_id = Uuid::new_v4();
	let row = documents::insert_document(
		&db.pool,
		&new_doc(document_id, user.user_id, "Title", "Body text", "hash-a", None, now),
	)
	.await
	.expect("Failed to insert document.");

	assert_eq!(row.indexed_state, "pending");

	let fetched = documents::get_document(&db.pool, user.user_id, document_id)
		.await
		.expect("Failed to fetch document.");

	assert_eq!(fetched.title, "Title");

	// Cross-user reads are forbidden, while unknown ids stay not-found.
	let foreign = documents::get_document(&db.pool, Uuid::new_v4(), document_id).await;

	assert!(matches!(foreign, Err(loom_storage::Error::Forbidden(_))));

	let missing = documents::get_document(&db.pool, user.user_id, Uuid::new_v4()).await;

	assert!(matches!(missing, Err(loom_storage::Error::NotFound(_))));

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn dedup_constraints_reject_duplicates() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping dedup_constraints_reject_duplicates; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = Db::connect(&storage_cfg(test_db.dsn())).await.expect("Failed to connect.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	let now = OffsetDateTime::now_utc();
	let user = users::create_user(&db.pool, "reader", None, now).await.expect("user");

	documents::insert_document(
		&db.pool,
		&new_doc(Uuid::new_v4(), user.user_id, "A", "same body", "hash-1", Some("https://x/a"), now),
	)
	.await
	.expect("first insert");

	// Same source URL, different content.
	let by_url = documents::insert_document(
		&db.pool,
		&new_doc(Uuid::new_v4(), user.user_id, "B", "other body", "hash-2", Some("https://x/a"), now),
	)
	.await;

	assert!(matches!(by_url, Err(loom_storage::Error::DuplicateDocument(_))));

	// Same content hash, no URL.
	let by_hash = documents::insert_document(
		&db.pool,
		&new_doc(Uuid::new_v4(), user.user_id, "C", "same body", "hash-1", None, now),
	)
	.await;

	assert!(matches!(by_hash, Err(loom_storage::Error::DuplicateDocument(_))));

	// A different user may hold the same URL.
	let other = users::create_user(&db.pool, "other", None, now).await.expect("user");

	documents::insert_document(
		&db.pool,
		&new_doc(Uuid::new_v4(), other.user_id, "D", "same body", "hash-1", Some("https://x/a"), now),
	)
	.await
	.expect("other user may reuse url and hash");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn state_machine_is_enforced_in_mark_indexed() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping state_machine_is_enforced_in_mark_indexed; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = Db::connect(&storage_cfg(test_db.dsn())).await.expect("Failed to connect.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	let now = OffsetDateTime::now_utc();
	let user = users::create_user(&db.pool, "reader", None, now).await.expect("user");
	let document_id = Uuid::new_v4();

	documents::insert_document(
		&db.pool,
		&new_doc(document_id, user.user_id, "A", "body", "hash-1", None, now),
	)
	.await
	.expect("insert");

	documents::mark_indexed(&db.pool, document_id, IndexedState::Indexed, None, now)
		.await
		.expect("pending -> indexed");

	let err = documents::mark_indexed(&db.pool, document_id, IndexedState::Pending, None, now).await;

	assert!(matches!(err, Err(loom_storage::Error::InvalidTransition(_))));

	let (_, needs_eviction) = documents::begin_delete(&db.pool, user.user_id, document_id, now)
		.await
		.expect("begin delete");

	assert!(needs_eviction);

	let row = documents::load_document(&db.pool, document_id).await.expect("load").expect("row");

	assert_eq!(row.indexed_state, "evicting");

	documents::hard_delete(&db.pool, document_id).await.expect("hard delete");

	assert!(documents::load_document(&db.pool, document_id).await.expect("load").is_none());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn listing_filters_and_paginates_deterministically() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping listing_filters_and_paginates_deterministically; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = Db::connect(&storage_cfg(test_db.dsn())).await.expect("Failed to connect.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	let now = OffsetDateTime::now_utc();
	let user = users::create_user(&db.pool, "reader", None, now).await.expect("user");

	for i in 0..5 {
		let doc_id = Uuid::new_v4();

		documents::insert_document(
			&db.pool,
			&NewDocument {
				document_id: doc_id,
				user_id: user.user_id,
				title: &format!("doc {i}"),
				content: if i % 2 == 0 { "about cats" } else { "about dogs" },
				summary: None,
				author: None,
				source_url: None,
				source_type: if i % 2 == 0 { "rss" } else { "manual" },
				published_at: None,
				content_hash: &format!("hash-{i}"),
				now: now + time::Duration::seconds(i),
			},
		)
		.await
		.expect("insert");

		if i == 0 {
			let mut conn = db.pool.acquire().await.expect("conn");
			let tag_rows =
				tags::ensure_tags(&mut conn, &["Tech".to_string()]).await.expect("tags");

			tags::replace_document_tags(&mut conn, doc_id, &tag_rows).await.expect("attach");
		}
	}

	let (page, total) = documents::list_documents(
		&db.pool,
		user.user_id,
		&DocumentFilter::default(),
		Page { offset: 0, limit: 2 },
	)
	.await
	.expect("list");

	assert_eq!(total, 5);
	assert_eq!(page.len(), 2);
	assert_eq!(page[0].title, "doc 4");
	assert_eq!(page[1].title, "doc 3");

	let (rss_only, rss_total) = documents::list_documents(
		&db.pool,
		user.user_id,
		&DocumentFilter { source_type: Some("rss".to_string()), ..Default::default() },
		Page { offset: 0, limit: 10 },
	)
	.await
	.expect("list rss");

	assert_eq!(rss_total, 3);
	assert!(rss_only.iter().all(|doc| doc.source_type == "rss"));

	let (tagged, tagged_total) = documents::list_documents(
		&db.pool,
		user.user_id,
		&DocumentFilter { tags_any: vec!["tech".to_string()], ..Default::default() },
		Page { offset: 0, limit: 10 },
	)
	.await
	.expect("list tagged");

	assert_eq!(tagged_total, 1);
	assert_eq!(tagged[0].title, "doc 0");

	let (cats, _) = documents::list_documents(
		&db.pool,
		user.user_id,
		&DocumentFilter { text_like: Some("cats".to_string()), ..Default::default() },
		Page { offset: 0, limit: 10 },
	)
	.await
	.expect("list text");

	assert_eq!(cats.len(), 3);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set LOOM_PG_DSN to run."]
async fn sources_and_search_records_support_analytics() {
	let Some(base_dsn) = loom_testkit::env_dsn() else {
		eprintln!("Skipping sources_and_search_records_support_analytics; set LOOM_PG_DSN to run.");

		return;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let db = Db::connect(&storage_cfg(test_db.dsn())).await.expect("Failed to connect.");

	db.ensure_schema().await.expect("Failed to ensure schema.");

	let now = OffsetDateTime::now_utc();
	let user = users::create_user(&db.pool, "reader", None, now).await.expect("user");
	let source = sources::upsert_source(
		&db.pool,
		&sources::UpsertSource {
			user_id: user.user_id,
			name: "Feed",
			url: "https://feeds.example.com/rss",
			kind: "rss",
			cadence_seconds: 1_800,
			active: true,
			auto_tags: &["news".to_string()],
		},
		now,
	)
	.await
	.expect("upsert");

	// Upsert on the same URL updates in place.
	let updated = sources::upsert_source(
		&db.pool,
		&sources::UpsertSource {
			user_id: user.user_id,
			name: "Feed v2",
			url: "https://feeds.example.com/rss",
			kind: "rss",
			cadence_seconds: 600,
			active: true,
			auto_tags: &[],
		},
		now,
	)
	.await
	.expect("upsert again");

	assert_eq!(updated.source_id, source.source_id);
	assert_eq!(updated.cadence_seconds, 600);

	// last_fetched_at is monotonic.
	let later = now + time::Duration::minutes(10);

	sources::touch_source(&db.pool, source.source_id, later, None).await.expect("touch");
	sources::touch_source(&db.pool, source.source_id, now, None).await.expect("touch earlier");

	let row = sources::get_source(&db.pool, user.user_id, source.source_id).await.expect("get");

	assert_eq!(row.last_fetched_at, Some(later));
	assert_eq!(row.consecutive_failures, 0);

	sources::touch_source(&db.pool, source.source_id, later, Some("boom")).await.expect("fail");

	let row = sources::get_source(&db.pool, user.user_id, source.source_id).await.expect("get");

	assert_eq!(row.consecutive_failures, 1);
	assert_eq!(row.last_error.as_deref(), Some("boom"));

	for (query, elapsed) in [("cats", 10), ("cats", 30), ("dogs", 50)] {
		let id = search_records::add_search_record(&db.pool, user.user_id, query, now)
			.await
			.expect("record");

		search_records::finish_search_record(&db.pool, id, 3, elapsed).await.expect("finish");
	}

	let trending =
		search_records::trending_queries(&db.pool, user.user_id, now - time::Duration::days(7), 10)
			.await
			.expect("trending");

	assert_eq!(trending[0].query, "cats");
	assert_eq!(trending[0].count, 2);
	assert!((trending[0].avg_elapsed_ms - 20.0).abs() < 1e-9);

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
