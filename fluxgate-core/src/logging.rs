use std::env;

use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Maps the LOGGING_LEVEL convention (DEBUG|INFO|WARNING|ERROR|CRITICAL)
/// onto a tracing directive. RUST_LOG takes precedence when set.
fn default_filter() -> EnvFilter {
    let level = env::var("LOGGING_LEVEL").unwrap_or_else(|_| "INFO".into());
    let directive = match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" => "error",
        "CRITICAL" => "error",
        _ => "info",
    };
    EnvFilter::new(directive)
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());
    tracing_subscriber::fmt::Subscriber::builder()
        .with_span_events(FmtSpan::NONE)
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_target(true)
        .with_line_number(false)
        .with_file(false)
        .with_ansi(true)
        .compact()
        .init();
}
