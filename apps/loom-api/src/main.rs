use clap::Parser;

use loom_api::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	loom_api::run(args).await
}
