//! Tracing setup shared by hosts and tests.

/// Install a default `fmt` subscriber filtered by `RUST_LOG` (default `info`).
/// Safe to call many times; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}
