use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the tidecache binary.
#[derive(Debug, Parser)]
#[command(
    name = "tidecache",
    version,
    about = "Root cache, session snapshots and refresh coordination"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TIDECACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP surface, the pipeline worker and the periodic sweeper.
    Serve(Box<ServeArgs>),
    /// Run one sweep now and print the report.
    Sweep(MaintenanceArgs),
    /// Enqueue a root-only recompute for one root key.
    Recompute(RecomputeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MaintenanceArgs {
    #[command(flatten)]
    pub backend: BackendOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RecomputeArgs {
    /// Root key to recompute (e.g. `processed_files`).
    #[arg(value_name = "ROOT_KEY")]
    pub root_key: String,

    #[command(flatten)]
    pub backend: BackendOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct BackendOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the backing store (memory|postgres).
    #[arg(long = "store-backend", value_name = "BACKEND")]
    pub store_backend: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub backend: BackendOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the HTTP database pool size.
    #[arg(long = "database-http-max-connections", value_name = "COUNT")]
    pub database_http_max_connections: Option<u32>,

    /// Override the jobs database pool size.
    #[arg(long = "database-jobs-max-connections", value_name = "COUNT")]
    pub database_jobs_max_connections: Option<u32>,

    /// Override the pipeline worker concurrency.
    #[arg(long = "jobs-pipeline-concurrency", value_name = "COUNT")]
    pub jobs_pipeline_concurrency: Option<u32>,

    /// Override the pending uploads directory.
    #[arg(long = "uploads-pending-directory", value_name = "PATH")]
    pub uploads_pending_directory: Option<PathBuf>,

    /// Override the discovery directory.
    #[arg(long = "discovery-directory", value_name = "PATH")]
    pub discovery_directory: Option<PathBuf>,

    /// Override the liveness staleness window.
    #[arg(long = "cache-staleness-window-seconds", value_name = "SECONDS")]
    pub cache_staleness_window_seconds: Option<u64>,

    /// Override the sweep period.
    #[arg(long = "cache-sweep-interval-seconds", value_name = "SECONDS")]
    pub cache_sweep_interval_seconds: Option<u64>,
}
