type Result<T> = color_eyre::eyre::Result<T>;

mod cli;
mod config_file;
mod coordinator;
mod environment;
mod export_manager;
mod mesh;
mod policy;
mod signals;
mod socks5_server;
mod state_dir;

use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Config};
use coordinator::Coordinator;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;

    // `-verbose` raises the default filter to `debug`; `RUST_LOG`, when
    // set, still overrides it (spec.md: "verbose mode controls diagnostic
    // output but never changes behaviour").
    let default_level = if config.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();

    tracing::info!("tailproxy starting");
    let exit_code = Coordinator::new(config).run().await?;
    tracing::info!(exit_code, "tailproxy exiting");

    std::process::exit(exit_code);
}
