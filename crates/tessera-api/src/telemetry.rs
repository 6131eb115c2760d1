use tracing_subscriber::{
    fmt::format::Format, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

const DEFAULT_FILTER: &str = "tessera=debug,tower_http=debug";

/// Install the global tracing subscriber. Compact console output by default, JSON lines when
/// `json` is set. A subscriber installed earlier (tests) is left in place.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer().event_format(
                    Format::default()
                        .compact()
                        .with_target(false)
                        .without_time(),
                ),
            )
            .try_init()
    };

    if result.is_ok() {
        tracing::info!(json, "Tracing initialized");
    }
}
