//! # v8bridge-telemetry
//!
//! Installs the global `tracing` subscriber: an [`EnvFilter`] built from
//! `RUST_LOG` (when set) or the configured level plus per-module overrides,
//! and a stderr `fmt` layer in compact or JSON form.

#![deny(unsafe_code)]

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use v8bridge_settings::LoggingSettings;

const FALLBACK_LEVEL: &str = "info";

/// Build the filter directive string, e.g. `info,v8bridge_core=debug`.
pub fn build_filter_directive(settings: &LoggingSettings) -> String {
    let level = settings.level.trim();
    let mut directive = if level.is_empty() {
        FALLBACK_LEVEL.to_string()
    } else {
        level.to_lowercase()
    };
    for (module, level) in &settings.modules {
        directive.push_str(&format!(",{}={}", module, level.to_lowercase()));
    }
    directive
}

/// Resolve the filter: `RUST_LOG` wins, then the configured directive, then `info`.
pub fn build_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = build_filter_directive(settings);
        EnvFilter::try_new(&directive).unwrap_or_else(|e| {
            eprintln!("v8bridge-telemetry: invalid log filter {directive:?}: {e}");
            EnvFilter::new(FALLBACK_LEVEL)
        })
    })
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_telemetry(settings: &LoggingSettings) -> bool {
    let filter = build_filter(settings);

    let result = if settings.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    result.is_ok()
}
