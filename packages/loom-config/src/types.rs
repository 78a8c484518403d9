use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub vector_store: VectorStore,
	pub embedder: Embedder,
	pub reranker: Reranker,
	pub llm: Llm,
	pub fetcher: Fetcher,
	pub scheduler: Scheduler,
	pub executor: Executor,
	pub search: Search,
	pub upload: Upload,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub dsn: String,
	#[serde(default = "default_pool_max_conns")]
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct VectorStore {
	pub root: String,
	#[serde(default = "default_compact_threshold_ratio")]
	pub compact_threshold_ratio: f32,
	#[serde(default = "default_compact_threshold_count")]
	pub compact_threshold_count: u64,
	#[serde(default = "default_lru_capacity")]
	pub lru_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Embedder {
	/// "local-hash" or an HTTP provider id.
	pub provider: String,
	pub model_id: String,
	#[serde(default)]
	pub api_base: String,
	#[serde(default)]
	pub api_key: String,
	#[serde(default = "default_embed_batch_size")]
	pub batch_size: usize,
	#[serde(default = "default_provider_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_dimensions")]
	pub dimensions: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Reranker {
	/// "local" or an HTTP provider id.
	pub provider: String,
	pub model_id: String,
	#[serde(default)]
	pub api_base: String,
	#[serde(default)]
	pub api_key: String,
	#[serde(default = "default_rerank_batch_size")]
	pub batch_size: usize,
	#[serde(default = "default_provider_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_calibration_k")]
	pub calibration_k: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Llm {
	pub endpoint: String,
	pub model_id: String,
	#[serde(default = "default_llm_timeout_s")]
	pub timeout_s: u64,
	#[serde(default = "default_temperature")]
	pub temperature: f32,
	#[serde(default = "default_max_tokens")]
	pub max_tokens: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Fetcher {
	#[serde(default = "default_user_agent")]
	pub user_agent: String,
	#[serde(default = "default_per_host_rps")]
	pub per_host_rps: u32,
	#[serde(default = "default_fetch_timeout_s")]
	pub timeout_s: u64,
	#[serde(default)]
	pub proxies: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Scheduler {
	#[serde(default = "default_rss_cadence_s")]
	pub rss_default_cadence_s: u64,
	/// Hour of day (UTC) for the web-scraping sweep.
	#[serde(default = "default_web_sweep_hour")]
	pub web_sweep_hour: u8,
	/// Weekday for the maintenance pass, 0 = Monday.
	#[serde(default)]
	pub maintenance_weekday: u8,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Executor {
	#[serde(default = "default_workers")]
	pub workers: usize,
	#[serde(default = "default_queue_capacity")]
	pub queue_capacity: usize,
	#[serde(default = "default_drain_timeout_s")]
	pub drain_timeout_s: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Search {
	#[serde(default = "default_search_limit")]
	pub default_limit: usize,
	#[serde(default = "default_external_trigger_threshold")]
	pub external_trigger_threshold: f32,
	#[serde(default = "default_external_trigger_min_results")]
	pub external_trigger_min_results: usize,
	/// "local" or an HTTP provider id.
	#[serde(default = "default_external_provider")]
	pub external_provider: String,
	#[serde(default)]
	pub external_api_base: String,
	#[serde(default)]
	pub external_api_key: String,
	#[serde(default = "default_search_timeout_s")]
	pub timeout_s: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Upload {
	#[serde(default = "default_upload_max_bytes")]
	pub max_bytes: usize,
}

fn default_pool_max_conns() -> u32 {
	8
}

fn default_compact_threshold_ratio() -> f32 {
	0.2
}

fn default_compact_threshold_count() -> u64 {
	1_000
}

fn default_lru_capacity() -> usize {
	32
}

fn default_embed_batch_size() -> usize {
	32
}

fn default_rerank_batch_size() -> usize {
	16
}

fn default_provider_timeout_ms() -> u64 {
	30_000
}

fn default_dimensions() -> usize {
	384
}

fn default_calibration_k() -> f32 {
	4.0
}

fn default_llm_timeout_s() -> u64 {
	120
}

fn default_temperature() -> f32 {
	0.3
}

fn default_max_tokens() -> u32 {
	512
}

fn default_user_agent() -> String {
	"newsloom-bot/0.3".to_string()
}

fn default_per_host_rps() -> u32 {
	1
}

fn default_fetch_timeout_s() -> u64 {
	30
}

fn default_rss_cadence_s() -> u64 {
	1_800
}

fn default_web_sweep_hour() -> u8 {
	3
}

fn default_workers() -> usize {
	4
}

fn default_queue_capacity() -> usize {
	256
}

fn default_drain_timeout_s() -> u64 {
	30
}

fn default_search_limit() -> usize {
	10
}

fn default_external_trigger_threshold() -> f32 {
	0.35
}

fn default_external_trigger_min_results() -> usize {
	3
}

fn default_external_provider() -> String {
	"local".to_string()
}

fn default_search_timeout_s() -> u64 {
	60
}

fn default_upload_max_bytes() -> usize {
	16 * 1024 * 1024
}
