use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::TelemetryConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. With `telemetry.json` set, log
/// lines are emitted as JSON for log shippers; otherwise in compact form.
pub fn init(config: &TelemetryConfig) {
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,claims_realtime=debug"));

    let json_layer = config
        .json
        .then(|| fmt::layer().json().with_current_span(true));
    let compact_layer = (!config.json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .compact()
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(json_layer)
        .with(compact_layer)
        .init();
}
