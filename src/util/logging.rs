//! Standardized logging for vapresent
//!
//! Every component logs through `tracing` on its own target so that
//! `RUST_LOG=vapresent::sync=trace` isolates one part of the pipeline.
//! The `wlog!` macro is shorthand for a debug event on such a target.

use tracing_subscriber::EnvFilter;

#[macro_export]
macro_rules! wlog {
    ($target:expr, $($arg:tt)*) => {{
        tracing::debug!(target: $target, $($arg)*);
    }};
}

/// Standardized component targets
pub const WINDOW: &str = "vapresent::window";
pub const SYNC: &str = "vapresent::sync";
pub const FRAME: &str = "vapresent::frame";
pub const BINDER: &str = "vapresent::binder";
pub const DISPLAY: &str = "vapresent::display";
pub const SHM: &str = "vapresent::shm";

const DEFAULT_FILTER: &str = "info,vapresent=debug";

/// Install the process-wide subscriber used by the binaries.
///
/// Output follows the `YYYY-MM-DD HH:MM:SS LEVEL target: message` layout.
/// Calling this twice is harmless; the second install is ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::new(
            "%Y-%m-%d %H:%M:%S".to_string(),
        ))
        .with_ansi(false)
        .with_env_filter(filter)
        .try_init();
}
