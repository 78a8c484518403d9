pub mod analytics;
pub mod documents;
pub mod external;
pub mod ingest;
pub mod progress;
pub mod search;
pub mod sources;
pub mod upload;

pub mod jobs;

mod error;

pub use error::{Error, Result};

use std::sync::{Arc, OnceLock};

use futures_util::Stream;

use loom_jobs::{BoxFuture, Task, executor::Executor};
use loom_providers::{external::ExternalHit, llm::GenerateParams};
use loom_storage::{db::Db, vector::VectorStoreManager};

pub trait EmbeddingProvider: Send + Sync {
	fn batch_embed<'a>(
		&'a self,
		cfg: &'a loom_config::Embedder,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

pub trait RerankProvider: Send + Sync {
	fn rerank<'a>(
		&'a self,
		cfg: &'a loom_config::Reranker,
		query: &'a str,
		passages: &'a [String],
	) -> BoxFuture<'a, Result<Vec<f32>>>;
}

pub type TokenStream = std::pin::Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

pub trait LlmProvider: Send + Sync {
	fn generate<'a>(
		&'a self,
		cfg: &'a loom_config::Llm,
		prompt: &'a str,
		params: &'a GenerateParams,
	) -> BoxFuture<'a, Result<String>>;

	fn generate_stream<'a>(
		&'a self,
		cfg: &'a loom_config::Llm,
		prompt: &'a str,
		params: &'a GenerateParams,
	) -> BoxFuture<'a, Result<TokenStream>>;
}

pub trait ExternalSearchProvider: Send + Sync {
	fn search<'a>(
		&'a self,
		cfg: &'a loom_config::Search,
		query: &'a str,
	) -> BoxFuture<'a, Result<Vec<ExternalHit>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub rerank: Arc<dyn RerankProvider>,
	pub llm: Arc<dyn LlmProvider>,
	pub external: Arc<dyn ExternalSearchProvider>,
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self {
			embedding: provider.clone(),
			rerank: provider.clone(),
			llm: provider.clone(),
			external: provider,
		}
	}
}

/// The single-process core: metadata store, per-user vector indices,
/// model providers, and the acquisition fetcher. Background work reaches
/// it back through the `TaskHandler` implementation in `jobs`.
pub struct LoomService {
	pub cfg: loom_config::Config,
	pub db: Db,
	pub vectors: VectorStoreManager,
	pub fetcher: loom_acquire::fetcher::Fetcher,
	pub providers: Providers,
	executor: OnceLock<Arc<Executor>>,
}
impl LoomService {
	pub fn new(cfg: loom_config::Config, db: Db) -> Result<Arc<Self>> {
		Self::with_providers(cfg, db, Providers::default())
	}

	pub fn with_providers(
		cfg: loom_config::Config,
		db: Db,
		providers: Providers,
	) -> Result<Arc<Self>> {
		let embedder_version = loom_config::embedder_version(&cfg);
		let vectors =
			VectorStoreManager::new(&cfg.vector_store, cfg.embedder.dimensions, &embedder_version);
		let fetcher = loom_acquire::fetcher::Fetcher::new(&cfg.fetcher)
			.map_err(|err| Error::Internal { message: err.to_string() })?;

		Ok(Arc::new(Self { cfg, db, vectors, fetcher, providers, executor: OnceLock::new() }))
	}

	/// Wires in the executor after construction; the executor's task
	/// handler is this service, so neither can own the other outright.
	pub fn attach_executor(&self, executor: Arc<Executor>) {
		let _ = self.executor.set(executor);
	}

	pub fn executor(&self) -> Result<&Arc<Executor>> {
		self.executor
			.get()
			.ok_or_else(|| Error::Internal { message: "Executor is not attached.".to_string() })
	}

	pub(crate) fn submit_task(&self, task: Task) -> Result<()> {
		self.executor()?.submit(task)?;

		Ok(())
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn batch_embed<'a>(
		&'a self,
		cfg: &'a loom_config::Embedder,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(loom_providers::embedding::batch_embed(cfg, texts).await?) })
	}
}

impl RerankProvider for DefaultProviders {
	fn rerank<'a>(
		&'a self,
		cfg: &'a loom_config::Reranker,
		query: &'a str,
		passages: &'a [String],
	) -> BoxFuture<'a, Result<Vec<f32>>> {
		Box::pin(async move { Ok(loom_providers::rerank::rerank(cfg, query, passages).await?) })
	}
}

impl LlmProvider for DefaultProviders {
	fn generate<'a>(
		&'a self,
		cfg: &'a loom_config::Llm,
		prompt: &'a str,
		params: &'a GenerateParams,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(loom_providers::llm::generate(cfg, prompt, params).await?) })
	}

	fn generate_stream<'a>(
		&'a self,
		cfg: &'a loom_config::Llm,
		prompt: &'a str,
		params: &'a GenerateParams,
	) -> BoxFuture<'a, Result<TokenStream>> {
		Box::pin(async move {
			use futures_util::StreamExt;

			let stream = loom_providers::llm::generate_stream(cfg, prompt, params).await?;

			Ok(Box::pin(stream.map(|item| item.map_err(Error::from))) as TokenStream)
		})
	}
}

impl ExternalSearchProvider for DefaultProviders {
	fn search<'a>(
		&'a self,
		cfg: &'a loom_config::Search,
		query: &'a str,
	) -> BoxFuture<'a, Result<Vec<ExternalHit>>> {
		Box::pin(async move { Ok(loom_providers::external::search(cfg, query).await?) })
	}
}
