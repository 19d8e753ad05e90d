//! Tracing setup for the `apk-mirror` binary.
//!
//! Stage transitions and outcomes log at `info`, so scheduled runs leave a
//! readable trail on stderr without extra flags. `RUST_LOG` overrides the
//! default filter. Decompiler output is not routed through here; it goes to
//! the transform log file.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `info`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=apk_mirror=debug apk-mirror sync
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
