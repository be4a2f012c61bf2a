use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use bookbinder::config::{DEFAULT_CONFIG_PATH, Settings};
use bookbinder::error::Result;
use bookbinder::logging;
use bookbinder::pipeline::Pipeline;
use bookbinder::service::Service;

/// Watches an input directory for audiobooks and merges each one into a single M4B file.
#[derive(Parser, Debug)]
#[command(name = "bookbinder", version, about)]
struct Args {
    /// Path to the YAML configuration. Created with defaults when missing.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Process what is already in the input directory, then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load(&args.config)?;
    logging::init(&settings.logging)?;
    log::info!("Loaded configuration from {:?}", args.config);
    log::debug!("{:?}", settings);

    let settings = Arc::new(settings);
    let pipeline = Pipeline::with_external_tools(Arc::clone(&settings))?;
    let service = Service::new(settings, pipeline).await?;

    if args.once {
        service.run_once().await
    } else {
        service.run().await
    }
}
