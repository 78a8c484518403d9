/// Metadata schema. Statements are idempotent so startup can always run
/// the full script under the advisory lock in `db::ensure_schema`.
pub const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS users (
	user_id UUID PRIMARY KEY,
	handle TEXT NOT NULL UNIQUE,
	display_name TEXT,
	created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
	document_id UUID PRIMARY KEY,
	user_id UUID NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
	title TEXT NOT NULL,
	content TEXT NOT NULL,
	summary TEXT,
	author TEXT,
	source_url TEXT,
	source_type TEXT NOT NULL,
	published_at TIMESTAMPTZ,
	created_at TIMESTAMPTZ NOT NULL,
	updated_at TIMESTAMPTZ NOT NULL,
	content_hash TEXT NOT NULL,
	indexed_state TEXT NOT NULL DEFAULT 'pending',
	index_error TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS documents_user_source_url
	ON documents (user_id, source_url) WHERE source_url IS NOT NULL;

CREATE UNIQUE INDEX IF NOT EXISTS documents_user_content_hash
	ON documents (user_id, content_hash);

CREATE INDEX IF NOT EXISTS documents_user_created
	ON documents (user_id, created_at DESC, document_id DESC);

CREATE TABLE IF NOT EXISTS sources (
	source_id UUID PRIMARY KEY,
	user_id UUID NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
	name TEXT NOT NULL,
	url TEXT NOT NULL,
	kind TEXT NOT NULL,
	cadence_seconds BIGINT NOT NULL,
	active BOOLEAN NOT NULL DEFAULT TRUE,
	auto_tags JSONB NOT NULL DEFAULT '[]'::jsonb,
	last_fetched_at TIMESTAMPTZ,
	last_error TEXT,
	consecutive_failures INTEGER NOT NULL DEFAULT 0,
	created_at TIMESTAMPTZ NOT NULL,
	updated_at TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS sources_user_url ON sources (user_id, url);

CREATE TABLE IF NOT EXISTS tags (
	tag_id UUID PRIMARY KEY,
	name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS document_tags (
	document_id UUID NOT NULL REFERENCES documents(document_id) ON DELETE CASCADE,
	tag_id UUID NOT NULL REFERENCES tags(tag_id) ON DELETE CASCADE,
	position INTEGER NOT NULL DEFAULT 0,
	PRIMARY KEY (document_id, tag_id)
);

CREATE INDEX IF NOT EXISTS document_tags_tag ON document_tags (tag_id);

CREATE TABLE IF NOT EXISTS search_records (
	search_id UUID PRIMARY KEY,
	user_id UUID NOT NULL REFERENCES users(user_id) ON DELETE CASCADE,
	query TEXT NOT NULL,
	result_count INTEGER NOT NULL DEFAULT 0,
	elapsed_ms BIGINT NOT NULL DEFAULT 0,
	created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS search_records_user_created
	ON search_records (user_id, created_at DESC);
";
