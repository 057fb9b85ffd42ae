use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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

/// Register metric descriptions with whatever recorder is installed.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tilecast_scene_load_total",
            Unit::Count,
            "Scene opens issued to the engine, labelled by result."
        );
        describe_counter!(
            "tilecast_device_switch_total",
            Unit::Count,
            "Acceleration device switches issued to the engine, labelled by result."
        );
        describe_counter!(
            "tilecast_render_total",
            Unit::Count,
            "Render requests handled by the coordinator, labelled by outcome."
        );
        describe_histogram!(
            "tilecast_render_ms",
            Unit::Milliseconds,
            "Render latency including time queued behind other renders."
        );
        describe_gauge!(
            "tilecast_render_waiting",
            Unit::Count,
            "Render requests currently waiting for the engine."
        );
    });
}
