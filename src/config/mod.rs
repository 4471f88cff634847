//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    BackendOverrides, CliArgs, Command, MaintenanceArgs, RecomputeArgs, ServeArgs, ServeOverrides,
};

use std::{
    collections::BTreeMap, net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::CacheConfig;
use crate::domain::keys::{KeyClass, RootKey};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tidecache";
const ENV_PREFIX: &str = "TIDECACHE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_HTTP_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_JOB_PIPELINE_CONCURRENCY: u32 = 4;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub jobs: JobsSettings,
    pub uploads: UploadSettings,
    pub discovery: DiscoverySettings,
    pub resolver: ResolverSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub http_max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local; views and locks are not shared between processes.
    Memory,
    /// `cache_entries` table shared by every process on the same database.
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" => Ok(Self::Postgres),
            other => Err(format!("unknown backend `{other}` (expected memory|postgres)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
}

/// Lock, marker and liveness timings. Converted into [`CacheConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub lock_retry_ms: u64,
    pub lock_ttl_secs: u64,
    pub checkins_lock_retry_ms: u64,
    pub checkins_lock_ttl_secs: u64,
    pub working_ttl_secs: u64,
    pub staleness_window_secs: u64,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub pipeline_concurrency: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Completed uploads and `.temp.*` artifacts. `None` disables both the pending
    /// listing and artifact sweeping.
    pub pending_directory: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ResolverSettings {
    pub queries: BTreeMap<RootKey, String>,
}

impl Settings {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from(&self.cache)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sweep(args)) => raw.apply_backend_overrides(&args.backend),
        Some(Command::Recompute(args)) => raw.apply_backend_overrides(&args.backend),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
    jobs: RawJobsSettings,
    uploads: RawUploadSettings,
    discovery: RawDiscoverySettings,
    resolver: RawResolverSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_backend_overrides(&overrides.backend);

        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(max) = overrides.database_http_max_connections {
            self.database.http_max_connections = Some(max);
        }
        if let Some(max) = overrides.database_jobs_max_connections {
            self.database.jobs_max_connections = Some(max);
        }
        if let Some(value) = overrides.jobs_pipeline_concurrency {
            self.jobs.pipeline_concurrency = Some(value);
        }
        if let Some(directory) = overrides.uploads_pending_directory.as_ref() {
            self.uploads.pending_directory = Some(directory.clone());
        }
        if let Some(directory) = overrides.discovery_directory.as_ref() {
            self.discovery.directory = Some(directory.clone());
        }
        if let Some(seconds) = overrides.cache_staleness_window_seconds {
            self.cache.staleness_window_secs = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_sweep_interval_seconds {
            self.cache.sweep_interval_secs = Some(seconds);
        }
    }

    fn apply_backend_overrides(&mut self, overrides: &BackendOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(backend) = overrides.store_backend.as_ref() {
            self.store.backend = Some(backend.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            store,
            cache,
            jobs,
            uploads,
            discovery,
            resolver,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let store = build_store_settings(store, &database)?;
        let cache = build_cache_settings(cache)?;
        let jobs = build_jobs_settings(jobs)?;
        let uploads = UploadSettings {
            pending_directory: non_empty_path(uploads.pending_directory),
        };
        let discovery = DiscoverySettings {
            directory: non_empty_path(discovery.directory),
        };
        let resolver = build_resolver_settings(resolver)?;

        Ok(Self {
            server,
            logging,
            database,
            store,
            cache,
            jobs,
            uploads,
            discovery,
            resolver,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let http_value = database
        .http_max_connections
        .unwrap_or(DEFAULT_DB_HTTP_MAX_CONNECTIONS);
    let jobs_value = database
        .jobs_max_connections
        .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        http_max_connections: non_zero_u32(http_value.into(), "database.http_max_connections")?,
        jobs_max_connections: non_zero_u32(jobs_value.into(), "database.jobs_max_connections")?,
    })
}

fn build_store_settings(
    store: RawStoreSettings,
    database: &DatabaseSettings,
) -> Result<StoreSettings, LoadError> {
    let backend = match store.backend.as_deref() {
        Some(value) => StoreBackend::from_str(value)
            .map_err(|reason| LoadError::invalid("store.backend", reason))?,
        None => StoreBackend::Memory,
    };
    if backend == StoreBackend::Postgres && database.url.is_none() {
        return Err(LoadError::invalid(
            "store.backend",
            "the postgres backend requires database.url",
        ));
    }
    Ok(StoreSettings { backend })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();
    let settings = CacheSettings {
        lock_retry_ms: cache.lock_retry_ms.unwrap_or(defaults.lock_retry_ms),
        lock_ttl_secs: cache.lock_ttl_secs.unwrap_or(defaults.lock_ttl_secs),
        checkins_lock_retry_ms: cache
            .checkins_lock_retry_ms
            .unwrap_or(defaults.checkins_lock_retry_ms),
        checkins_lock_ttl_secs: cache
            .checkins_lock_ttl_secs
            .unwrap_or(defaults.checkins_lock_ttl_secs),
        working_ttl_secs: cache.working_ttl_secs.unwrap_or(defaults.working_ttl_secs),
        staleness_window_secs: cache
            .staleness_window_secs
            .unwrap_or(defaults.staleness_window_secs),
        sweep_interval_secs: cache.sweep_interval_secs.or(defaults.sweep_interval_secs),
    };

    for (key, value) in [
        ("cache.lock_retry_ms", settings.lock_retry_ms),
        ("cache.lock_ttl_secs", settings.lock_ttl_secs),
        ("cache.checkins_lock_retry_ms", settings.checkins_lock_retry_ms),
        ("cache.checkins_lock_ttl_secs", settings.checkins_lock_ttl_secs),
        ("cache.working_ttl_secs", settings.working_ttl_secs),
        ("cache.staleness_window_secs", settings.staleness_window_secs),
    ] {
        if value == 0 {
            return Err(LoadError::invalid(key, "must be greater than zero"));
        }
    }
    if settings.sweep_interval_secs == Some(0) {
        return Err(LoadError::invalid(
            "cache.sweep_interval_secs",
            "must be greater than zero",
        ));
    }
    if settings.lock_retry_ms >= settings.lock_ttl_secs.saturating_mul(1000) {
        return Err(LoadError::invalid(
            "cache.lock_retry_ms",
            "retry interval must be shorter than the lock ttl",
        ));
    }

    Ok(settings)
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let pipeline = jobs
        .pipeline_concurrency
        .unwrap_or(DEFAULT_JOB_PIPELINE_CONCURRENCY);
    Ok(JobsSettings {
        pipeline_concurrency: non_zero_u32(pipeline.into(), "jobs.pipeline_concurrency")?,
    })
}

fn build_resolver_settings(resolver: RawResolverSettings) -> Result<ResolverSettings, LoadError> {
    let mut queries = BTreeMap::new();
    for (name, query) in resolver.queries {
        let key = RootKey::from_str(&name)
            .map_err(|err| LoadError::invalid("resolver.queries", err.to_string()))?;
        if key.class() != KeyClass::Dataset {
            return Err(LoadError::invalid(
                "resolver.queries",
                format!("`{key}` is not a dataset key"),
            ));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(LoadError::invalid(
                "resolver.queries",
                format!("query for `{key}` is empty"),
            ));
        }
        queries.insert(key, query.trim_end_matches(';').to_string());
    }
    Ok(ResolverSettings { queries })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    http_max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    backend: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    lock_retry_ms: Option<u64>,
    lock_ttl_secs: Option<u64>,
    checkins_lock_retry_ms: Option<u64>,
    checkins_lock_ttl_secs: Option<u64>,
    working_ttl_secs: Option<u64>,
    staleness_window_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    pipeline_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    pending_directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDiscoverySettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawResolverSettings {
    queries: BTreeMap<String, String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty_path(path: Option<PathBuf>) -> Option<PathBuf> {
    path.filter(|path| !path.as_os_str().is_empty())
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
