//! # anyvm Server
//!
//! Exposes a single HTTP API for listing and creating virtual machines on
//! Azure, AWS, GCP, Hyper-V, Proxmox VE, vSphere and Nutanix.
//!
//! ## Usage
//! ```bash
//! anyvm-server --config /etc/anyvm/anyvm.yaml
//! ```

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use anyvm_server::cli::Args;
use anyvm_server::config::{Config, DEFAULT_CONFIG_PATH};
use anyvm_server::server;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    anyvm_common::init_logging(&args.log_level, args.log_format)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting anyvm server");

    // Load configuration
    let config = match &args.config {
        Some(config_path) => match Config::load(config_path) {
            Ok(cfg) => {
                info!(config_path = %config_path, "Configuration loaded");
                cfg
            }
            Err(e) => {
                error!(error = %e, path = %config_path, "Failed to load configuration");
                return Err(e);
            }
        },
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            // A default file that exists but does not parse is still an error
            let cfg = Config::load(DEFAULT_CONFIG_PATH)?;
            info!(config_path = %DEFAULT_CONFIG_PATH, "Configuration loaded from default location");
            cfg
        }
        None => {
            info!("No config file found, using environment and defaults");
            Config::default()
        }
    };
    let config = config.with_env_overrides().with_cli_overrides(&args);
    config.validate()?;

    info!(
        listen = %config.server.listen_address,
        create_timeout_secs = config.dispatch.create_timeout_secs,
        dev = config.dev.mock_enabled,
        "Server configured"
    );

    if let Err(e) = server::run(config).await {
        error!(error = %e, "Server failed");
        return Err(e);
    }

    Ok(())
}
