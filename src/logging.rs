//! Logging initialization.

use env_logger::Env;

/// Initializes env_logger with an `info` default filter. Safe to call more
/// than once; later calls are no-ops.
pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();
    log::info!("Logging initialized");
}
