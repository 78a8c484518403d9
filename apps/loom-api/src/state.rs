use std::sync::Arc;

use loom_jobs::executor::Executor;
use loom_service::LoomService;
use loom_storage::db::Db;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<LoomService>,
	pub executor: Arc<Executor>,
}
impl AppState {
	pub async fn new(config: loom_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage).await?;

		db.ensure_schema().await?;

		let executor_cfg = config.executor.clone();
		let service = LoomService::new(config, db)?;
		let executor = Executor::start(service.clone(), &executor_cfg);

		service.attach_executor(executor.clone());

		Ok(Self { service, executor })
	}
}
