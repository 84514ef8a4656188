//! Logging utilities for Lectern.
//!
//! Provides structured logging with trace IDs for observability.
//!
//! # Noise Filtering
//!
//! By default, noisy library modules (hyper, reqwest, h2, rustls, tungstenite)
//! are set to `warn` level so that session activity stays readable.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default noisy modules that should be filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tungstenite",
    "tokio_tungstenite",
];

/// Build the filter directive string with noise suppression.
fn build_directives(log_level: &str) -> String {
    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }
    directives
}

/// Build the default EnvFilter. `RUST_LOG` wins when set.
fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(build_directives(log_level))
}

/// Initialize logging with the given configuration.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - Output format: "json" for structured JSON, "pretty" for human-readable
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(log_level: &str, log_format: &str) {
    let filter = build_filter(log_level);
    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );
}

/// Generate a new trace ID for an inbound event.
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_pin_noisy_modules() {
        let directives = build_directives("debug");
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("tungstenite=warn"));
    }

    #[test]
    fn trace_ids_are_unique() {
        assert_ne!(generate_trace_id(), generate_trace_id());
    }
}
