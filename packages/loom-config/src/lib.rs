mod types;

use std::{fs, path::Path};

use color_eyre::eyre;

pub use types::{
	Config, Embedder, Executor, Fetcher, Llm, Reranker, Scheduler, Search, Service, Storage,
	Upload, VectorStore,
};

pub fn load(path: &Path) -> color_eyre::Result<Config> {
	let raw = fs::read_to_string(path)?;

	let cfg: Config = toml::from_str(&raw)?;

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> color_eyre::Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(eyre::eyre!("service.http_bind must be non-empty."));
	}
	if cfg.service.admin_bind.trim().is_empty() {
		return Err(eyre::eyre!("service.admin_bind must be non-empty."));
	}
	if cfg.storage.dsn.trim().is_empty() {
		return Err(eyre::eyre!("storage.dsn must be non-empty."));
	}
	if cfg.storage.pool_max_conns == 0 {
		return Err(eyre::eyre!("storage.pool_max_conns must be greater than zero."));
	}
	if cfg.vector_store.root.trim().is_empty() {
		return Err(eyre::eyre!("vector_store.root must be non-empty."));
	}
	if !(0.0..=1.0).contains(&cfg.vector_store.compact_threshold_ratio) {
		return Err(eyre::eyre!("vector_store.compact_threshold_ratio must be in 0.0-1.0."));
	}
	if cfg.vector_store.lru_capacity == 0 {
		return Err(eyre::eyre!("vector_store.lru_capacity must be greater than zero."));
	}
	if cfg.embedder.dimensions == 0 {
		return Err(eyre::eyre!("embedder.dimensions must be greater than zero."));
	}
	if cfg.embedder.batch_size == 0 {
		return Err(eyre::eyre!("embedder.batch_size must be greater than zero."));
	}
	if cfg.embedder.provider != "local-hash" && cfg.embedder.api_base.trim().is_empty() {
		return Err(eyre::eyre!("embedder.api_base must be non-empty for HTTP providers."));
	}
	if cfg.reranker.batch_size == 0 {
		return Err(eyre::eyre!("reranker.batch_size must be greater than zero."));
	}
	if cfg.reranker.provider != "local" && cfg.reranker.api_base.trim().is_empty() {
		return Err(eyre::eyre!("reranker.api_base must be non-empty for HTTP providers."));
	}
	if !cfg.reranker.calibration_k.is_finite() || cfg.reranker.calibration_k <= 0.0 {
		return Err(eyre::eyre!("reranker.calibration_k must be a positive finite number."));
	}
	if cfg.llm.endpoint.trim().is_empty() {
		return Err(eyre::eyre!("llm.endpoint must be non-empty."));
	}
	if cfg.fetcher.user_agent.trim().is_empty() {
		return Err(eyre::eyre!("fetcher.user_agent must be non-empty."));
	}
	if cfg.fetcher.per_host_rps == 0 {
		return Err(eyre::eyre!("fetcher.per_host_rps must be greater than zero."));
	}
	if cfg.scheduler.rss_default_cadence_s == 0 {
		return Err(eyre::eyre!("scheduler.rss_default_cadence_s must be greater than zero."));
	}
	if cfg.scheduler.web_sweep_hour > 23 {
		return Err(eyre::eyre!("scheduler.web_sweep_hour must be 0-23."));
	}
	if cfg.scheduler.maintenance_weekday > 6 {
		return Err(eyre::eyre!("scheduler.maintenance_weekday must be 0-6."));
	}
	if cfg.executor.workers == 0 {
		return Err(eyre::eyre!("executor.workers must be greater than zero."));
	}
	if cfg.executor.queue_capacity == 0 {
		return Err(eyre::eyre!("executor.queue_capacity must be greater than zero."));
	}
	if cfg.search.default_limit == 0 || cfg.search.default_limit > 100 {
		return Err(eyre::eyre!("search.default_limit must be in 1-100."));
	}
	if !(0.0..=1.0).contains(&cfg.search.external_trigger_threshold) {
		return Err(eyre::eyre!("search.external_trigger_threshold must be in 0.0-1.0."));
	}
	if cfg.search.external_provider != "local" && cfg.search.external_api_base.trim().is_empty() {
		return Err(eyre::eyre!("search.external_api_base must be non-empty for HTTP providers."));
	}
	if cfg.upload.max_bytes == 0 {
		return Err(eyre::eyre!("upload.max_bytes must be greater than zero."));
	}

	Ok(())
}

/// The identifier stamped into each vector index; a mismatch at load
/// forces a rebuild before the index is served again.
pub fn embedder_version(cfg: &Config) -> String {
	format!("{}:{}:{}", cfg.embedder.provider, cfg.embedder.model_id, cfg.embedder.dimensions)
}
