//! Tracing subscriber setup

use rxflow_domain::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` when set and valid, otherwise the configured directive
///
/// An invalid configured directive falls back to `info`.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber described by `config`
///
/// Returns `false` when a global subscriber was already installed, in which
/// case the existing one keeps receiving events.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = build_filter(config);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
            .is_ok(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::debug!(format = %config.format, filter = %config.filter, "tracing initialised");
    } else {
        tracing::debug!("global tracing subscriber already set, keeping it");
    }
    installed
}
