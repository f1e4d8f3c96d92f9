mod cli;
mod config;
mod error;

use std::process;

use clap::Parser;
use hlsdl_engine::HlsDownloader;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    filter::{EnvFilter, filter_fn},
    fmt,
    prelude::*,
};

use crate::cli::Args;
use crate::error::{AppError, Result};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    let config = config::build_config(&args)?;
    let downloader = HlsDownloader::new(config)?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling download");
            signal_token.cancel();
        }
    });

    let output = downloader.download(&args.url, &token).await?;
    info!(
        "Saved {} segments ({} bytes) to {}",
        output.segments,
        output.bytes_written,
        output.path.display()
    );
    println!("{}", output.path.display());
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    // Log lines go through the indicatif writer so they print above the bar.
    let indicatif_layer = IndicatifLayer::new();
    let fmt_layer = fmt::layer()
        .with_target(verbose)
        .with_writer(indicatif_layer.get_stderr_writer());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(indicatif_layer.with_filter(filter_fn(|meta| {
            meta.target().starts_with("hlsdl_engine::progress")
        })))
        .try_init()
        .map_err(|e| AppError::Initialization(e.to_string()))
}
