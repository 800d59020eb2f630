//! Logging utilities

use tracing_subscriber::EnvFilter;

/// Install the JSON subscriber. `RUST_LOG` overrides the default `info`
/// level. Calling it twice is harmless.
pub fn init_logger() {
    init_logger_with("info");
}

pub fn init_logger_with(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .try_init();
}

/// Keep the first four characters of a secret, mask the rest
pub fn sanitize_for_log(value: &str) -> String {
    if value.chars().count() <= 4 {
        return "****".to_string();
    }
    let prefix: String = value.chars().take(4).collect();
    format!("{}****", prefix)
}
