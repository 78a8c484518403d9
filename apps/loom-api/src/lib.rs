pub mod routes;
pub mod state;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use loom_jobs::scheduler::Scheduler;
use loom_service::jobs::ServicePlanner;

use crate::state::AppState;

#[derive(Debug, Parser)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = loom_config::load(&args.config)?;

	init_tracing(&config)?;

	let http_addr: SocketAddr = config.service.http_bind.parse()?;
	let admin_addr: SocketAddr = config.service.admin_bind.parse()?;
	let drain = Duration::from_secs(config.executor.drain_timeout_s);
	let scheduler_cfg = config.scheduler.clone();
	let state = AppState::new(config).await?;
	let planner = Arc::new(ServicePlanner { service: state.service.clone() });
	let scheduler = Scheduler::new(scheduler_cfg, state.executor.clone(), planner);
	let scheduler_handle = tokio::spawn(scheduler.run());
	let app = routes::router(state.clone());
	let admin_app = routes::admin_router(state.clone());

	let http_listener = TcpListener::bind(http_addr).await?;

	tracing::info!(%http_addr, "HTTP server listening.");

	let admin_listener = TcpListener::bind(admin_addr).await?;

	tracing::info!(%admin_addr, "Admin server listening.");

	let http_server = axum::serve(http_listener, app).with_graceful_shutdown(shutdown_signal());
	let admin_server =
		axum::serve(admin_listener, admin_app).with_graceful_shutdown(shutdown_signal());

	tokio::try_join!(http_server, admin_server)?;

	tracing::info!("Servers stopped; draining background tasks.");
	scheduler_handle.abort();
	state.executor.shutdown(drain).await;

	Ok(())
}

async fn shutdown_signal() {
	if let Err(err) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %err, "Failed to listen for the shutdown signal.");
	}
}

fn init_tracing(config: &loom_config::Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	Ok(())
}
