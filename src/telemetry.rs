//! Logging setup

use tracing::Level;

/// Install a stderr `fmt` subscriber at `level`.
///
/// Unknown levels fall back to `info`. Returns false if a global
/// subscriber was already installed, which leaves that one in place.
pub fn init_logging(level: &str) -> bool {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
