//! Logging setup
//!
//! The crate logs through the `log` facade. Hosts that do not install their
//! own logger can call `init` once at startup.

use env_logger::Env;

/// Install `env_logger`, honouring `RUST_LOG` and defaulting to `info`
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

/// Logger for tests: captured output, `debug` by default
pub fn init_for_tests() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}
