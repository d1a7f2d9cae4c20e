//! Optional `tracing_subscriber` init helper for binaries/integration tests.
//! Library code never installs a global subscriber itself (SPEC_FULL §6);
//! this is offered for hosts and demos that want one line of setup.

use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber::fmt` subscriber driven by `RUST_LOG`
/// (defaulting to `info`). Safe to call more than once; later calls are
/// no-ops if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
