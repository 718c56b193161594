//! Structured logging with `tracing`.
//!
//! [`init_subscriber`] installs a global `fmt` subscriber on stderr. The
//! `RUST_LOG` environment variable, when set, takes precedence over the
//! configured level.

use tracing_subscriber::EnvFilter;

/// Build the env filter: `RUST_LOG` if present and valid, else `level`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at startup. Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Minimum level (or full filter directive) to display.
/// * `json` - Emit newline-delimited JSON instead of compact text.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = build_filter(level);

    if json {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json();
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact();
        // no-op if a global default is already set
        let _ = subscriber.try_init();
    }
}
