// Copyright 2026 Mapscout Contributors
// SPDX-License-Identifier: Apache-2.0

//! Server command-line configuration.

use std::path::PathBuf;
use std::sync::Arc;

use mapscout::automation::chromium::ChromiumLauncher;
use mapscout::automation::memory::{sample_catalogue, MemoryLauncher};
use mapscout::automation::AutomationLauncher;
use mapscout::{LaunchOptions, ScraperConfig};

/// Listings served by `--offline`.
const OFFLINE_CATALOGUE_SIZE: usize = 40;

/// Options for the `serve` command.
#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Interface to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 8000)]
    pub port: u16,

    /// Directory of a built frontend to serve at `/`.
    #[arg(long, env = "MAPSCOUT_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Chromium executable. Discovered automatically when omitted.
    #[arg(long)]
    pub chrome: Option<PathBuf>,

    /// Serve a scripted results page instead of driving a browser.
    #[arg(long)]
    pub offline: bool,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            static_dir: None,
            chrome: None,
            offline: false,
        }
    }
}

impl ServeArgs {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The automation backend these options select.
    pub fn launcher(&self, config: &ScraperConfig) -> Arc<dyn AutomationLauncher> {
        if self.offline {
            return Arc::new(MemoryLauncher::new(sample_catalogue(OFFLINE_CATALOGUE_SIZE)));
        }
        let options = LaunchOptions {
            executable: self.chrome.clone(),
            ..LaunchOptions::default()
        };
        // Leave part of the session's release budget for killing the process.
        Arc::new(ChromiumLauncher::new(options).with_release_timeout(config.release_timeout / 2))
    }
}
