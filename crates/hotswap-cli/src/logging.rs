//! Tracing subscriber setup

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber
///
/// Honours `RUST_LOG` and falls back to `default_level`. Logs go to stderr so
/// command output on stdout stays machine-readable.
pub fn init_tracing(json: bool, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr).with_target(false);
    // A second call (tests) leaves the first subscriber in place.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}
