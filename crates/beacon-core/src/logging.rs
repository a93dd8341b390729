//! `tracing` subscriber setup.
//!
//! Log context (correlation ID, connection attempt) is carried on spans and
//! structured fields rather than formatted into messages.

use tracing_subscriber::EnvFilter;

/// Directives appended to every filter to quiet the WebSocket library.
const QUIET_DIRECTIVES: [&str; 2] = ["tungstenite=warn", "tokio_tungstenite=warn"];

/// Build the filter for `level`, letting `RUST_LOG` take precedence.
fn build_filter(level: &str) -> EnvFilter {
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    QUIET_DIRECTIVES.iter().fold(base, |filter, directive| {
        match directive.parse() {
            Ok(d) => filter.add_directive(d),
            Err(_) => filter,
        }
    })
}

/// Resolve the effective default level from settings.
///
/// `debug = true` always wins over the configured level.
#[must_use]
pub fn effective_level(level: &str, debug: bool) -> &str {
    if debug { "debug" } else { level }
}

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum log level when `RUST_LOG` is unset (e.g. `"info"`).
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init is a no-op if a global subscriber is already set
    let _ = subscriber.try_init();
}
