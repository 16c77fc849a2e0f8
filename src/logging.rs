//! Tracing subscriber setup for the `dedup` binary.
//!
//! Logs go to stderr so that command output on stdout stays parseable.
//! `RUST_LOG` overrides the default `info` level.

use tracing_subscriber::EnvFilter;

pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    // A subscriber may already be installed when embedded in a larger binary.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
