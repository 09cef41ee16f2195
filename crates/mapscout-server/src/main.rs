// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Mapscout server entry point.

use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use mapscout::{ConnectionRegistry, ScraperConfig};
use mapscout_server::{AppState, ServeArgs};

#[derive(Parser)]
#[command(
    name = "mapscout-server",
    about = "Stream map search listings to browser clients over WebSocket",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Server options when no subcommand is given.
    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default).
    Serve(ServeArgs),

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   mapscout-server completions bash > ~/.local/share/bash-completion/completions/mapscout-server
    ///   mapscout-server completions zsh > ~/.zfunc/_mapscout-server
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Commands::Serve(cli.serve)) {
        Commands::Serve(args) => {
            let config = ScraperConfig::from_env();
            let launcher = args.launcher(&config);
            let registry = Arc::new(ConnectionRegistry::new(launcher, config));

            if args.offline {
                tracing::info!("offline mode: serving a scripted results page");
            }
            if let Some(dir) = &args.static_dir {
                tracing::info!("static files: {}", dir.display());
            }

            let listener = tokio::net::TcpListener::bind(args.bind_addr()).await?;
            mapscout_server::run(
                listener,
                AppState { registry },
                args.static_dir.as_deref(),
                shutdown_signal(),
            )
            .await?;
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "mapscout-server", &mut std::io::stdout());
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
