//! `crewstream` - WebSocket progress streaming for a document Q&A crew
//!
//! `serve` runs the server, `ask` is a small client for it and `config`
//! manages the TOML configuration file.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::cli::{Cli, Commands, ConfigCommand};
use crewstream_core::config::{self, Config};
use crewstream_core::server::{build_collaborators, Server};

mod cli;
mod client;

/// How long shutdown waits for pulls still running on blocking workers
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!(
            "crewstream v{} ({})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_HASH")
        );
        return Ok(());
    }

    init_logging(cli.verbose);

    let runtime = build_runtime()?;
    let result = runtime.block_on(run(cli));
    shut_down(runtime, SHUTDOWN_GRACE);
    result
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Serve {
            bind,
            port,
            path,
            data_dir,
            step_delay_ms,
        }) => {
            let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(path) = path {
                config.server.path = path;
            }
            if let Some(data_dir) = data_dir {
                config.index.data_dir = data_dir;
            }
            if let Some(step_delay_ms) = step_delay_ms {
                config.stream.step_delay_ms = step_delay_ms;
            }
            config.validate()?;
            serve(config).await?;
        }

        Some(Commands::Ask { query, url }) => {
            client::ask(&url, &query).await?;
        }

        Some(Commands::Config { cmd }) => match cmd {
            ConfigCommand::Init { path, force } => init_config(path, force)?,
            ConfigCommand::Show => {
                let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
                print!("{}", toml::to_string_pretty(&config.redacted())?);
            }
        },

        None => {
            let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
            serve(config).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "crewstream=debug,crewstream_core=debug"
    } else {
        "crewstream=info,crewstream_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")
}

/// Stop the runtime. Blocking pulls still running after `grace` are
/// abandoned along with their results.
fn shut_down(runtime: Runtime, grace: Duration) {
    let started = Instant::now();
    tracing::debug!("Waiting up to {:?} for blocking work to finish", grace);
    runtime.shutdown_timeout(grace);
    if started.elapsed() >= grace {
        tracing::warn!("Abandoned blocking work still running after {:?}", grace);
    }
}

async fn serve(config: Config) -> Result<()> {
    let config = Arc::new(config);
    // loading the embedding model blocks
    let setup = config.clone();
    let collaborators = tokio::task::spawn_blocking(move || build_collaborators(&setup))
        .await
        .context("Collaborator setup did not complete")??;
    let server = Server::bind(config, collaborators).await?;

    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
}

fn init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path.or_else(config::default_config_path) {
        Some(path) => path,
        None => bail!("Could not determine a configuration directory; pass a path"),
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    Config::default().save(&path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
