//! Logging setup.
//!
//! Installs a `tracing` subscriber with either structured JSON or
//! human-readable output.
//!
//! # Noise Filtering
//!
//! Noisy dependency modules are clamped to `warn` so business logs stay
//! readable at `debug`. `RUST_LOG`, when set, overrides everything.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;

/// Dependency modules filtered to warn level.
pub const NOISY_MODULES: &[&str] = &["rusqlite", "tokio", "runtime"];

/// Build the filter directives for a base level plus noise suppression.
fn build_directives(log_level: &str) -> String {
    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{module}=warn"));
    }
    directives
}

fn build_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(build_directives(log_level)))
}

/// Initialize logging.
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - "json" for structured JSON, anything else for pretty output
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(log_level: &str, log_format: &str) {
    let subscriber = tracing_subscriber::registry().with(build_filter(log_level));

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

/// Initialize logging from the observability section of the config.
pub fn init_from_config(config: &ObservabilityConfig) {
    init_logging(&config.log_level, &config.log_format);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noisy_modules_list() {
        assert_eq!(NOISY_MODULES, &["rusqlite", "tokio", "runtime"]);
    }

    #[test]
    fn test_directives_include_noise_suppression() {
        let directives = build_directives("debug");
        assert!(directives.starts_with("debug,"));
        for module in NOISY_MODULES {
            assert!(directives.contains(&format!("{module}=warn")));
        }
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging("info", "pretty");
        init_logging("debug", "json");
        init_from_config(&ObservabilityConfig::default());
    }
}
