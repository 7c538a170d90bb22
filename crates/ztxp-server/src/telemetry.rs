//! Tracing subscriber for the `ztxp` binary.

use tracing_subscriber::EnvFilter;

/// `json` switches to one JSON object per line.
pub const LOG_FORMAT_ENV: &str = "ZTXP_LOG_FORMAT";

/// Install the global subscriber: `RUST_LOG` filter (default `info`), output on
/// stderr so command output on stdout stays machine-readable.
///
/// A second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
