//! Command-line argument parsing.

use anyvm_common::LogFormat;
use clap::Parser;

/// anyvm - unified VM listing and creation across clouds and hypervisors
#[derive(Parser, Debug, Default)]
#[command(name = "anyvm-server")]
#[command(about = "anyvm - unified VM listing and creation across clouds and hypervisors")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long, env = "ANYVM_CONFIG")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "ANYVM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (pretty, json)
    #[arg(long, env = "ANYVM_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Listen address for the HTTP API, overrides the config file and PORT
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable development mode (register the mock provider)
    #[arg(long)]
    pub dev: bool,

    /// Seconds to wait for a VM creation to finish
    #[arg(long)]
    pub create_timeout_secs: Option<u64>,
}
