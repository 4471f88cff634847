use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_histogram!(
            "tidecache_lock_wait_ms",
            Unit::Milliseconds,
            "Time spent waiting to acquire a key lock."
        );
        describe_counter!(
            "tidecache_lock_lost_total",
            Unit::Count,
            "Locks whose marker expired or changed hands before release."
        );
        describe_histogram!(
            "tidecache_recompute_ms",
            Unit::Milliseconds,
            "Source resolver latency per root recompute."
        );
        describe_counter!(
            "tidecache_recompute_failed_total",
            Unit::Count,
            "Root recomputes whose resolver failed."
        );
        describe_counter!(
            "tidecache_sweep_removed_total",
            Unit::Count,
            "View snapshots and upload artifacts reclaimed by the sweeper."
        );
    });
}
