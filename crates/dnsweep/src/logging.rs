//! Logging setup.

use std::path::Path;

use tracing::Level;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Maps the 1 (quietest) to 5 (loudest) CLI verbosity onto a level.
pub fn level_for_verbosity(verbosity: u8) -> Level {
    match verbosity {
        0 | 1 => Level::ERROR,
        2 => Level::WARN,
        3 => Level::INFO,
        4 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initializes tracing. Logs go to stderr, or to `log_file` when it names a
/// real path (`-` means stderr).
pub fn init_logging(verbosity: u8, log_file: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level_for_verbosity(verbosity).into())
        .from_env_lossy();

    if log_file == "-" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(log_file))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    Ok(())
}
