//! Tracing subscriber initialization
//!
//! `RUST_LOG` wins when set; otherwise the configured level is used as the
//! filter directive.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tributary_domain::LoggingConfig;

/// Filter from `RUST_LOG`, falling back to `config.level`, then to `info`
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Returns `false` when a global subscriber was already installed, which is
/// the normal case in tests and embedding applications.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(build_filter(config));

    let result = if config.json {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().compact().with_target(true)).try_init()
    };

    match result {
        Ok(()) => {
            tracing::debug!(level = %config.level, json = config.json, "tracing initialized");
            true
        }
        Err(_) => false,
    }
}
