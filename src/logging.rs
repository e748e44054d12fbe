//! Subscriber setup for the binary.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::FmtSubscriber;

/// Log level from the command-line flags. Verbose wins over quiet.
pub fn level_for(verbose: bool, quiet: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else if quiet {
        Level::ERROR
    } else {
        Level::INFO
    }
}

/// Install the global subscriber.
///
/// With `log_file`, records are appended there with timestamps; otherwise
/// they go to stdout.
pub fn init(level: Level, log_file: Option<&Path>) -> Result<()> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Cannot open log output {:?}", path))?;

            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .with_ansi(false)
                .with_writer(BoxMakeWriter::new(Mutex::new(file)))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .with_thread_ids(false)
                .without_time()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
