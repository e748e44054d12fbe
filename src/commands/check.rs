//! Check command implementation.

use anyhow::Result;
use std::fmt::Write as _;

use crate::config::Config;

/// Print what a run with this configuration would monitor
pub fn run(config: &Config) -> Result<()> {
    config.validate()?;
    print!("{}", describe(config));
    Ok(())
}

pub fn describe(config: &Config) -> String {
    let mut out = String::new();
    let sources = config.active_sources();

    let _ = writeln!(out, "Backend:   {:?}", config.backend);
    let _ = writeln!(out, "Startup:   {:?}", config.startup);
    let _ = writeln!(out, "Whitelist: {} entries", config.whitelist.len());
    if let Some(path) = &config.log_file {
        let _ = writeln!(out, "Log file:  {:?}", path);
    }

    let _ = writeln!(out, "\nActive sources ({}):", sources.len());
    for source in &sources {
        let readable = if source.logfile.is_file() {
            ""
        } else {
            "  [not readable yet]"
        };
        let _ = writeln!(
            out,
            "  {:<12} {:?} tag '{}' threshold {}{}",
            source.set, source.logfile, source.tag, source.threshold, readable
        );
    }

    let skipped = config.sets.len() - sources.len();
    if skipped > 0 {
        let _ = writeln!(out, "  ({} incomplete set(s) skipped)", skipped);
    }

    let _ = writeln!(out, "\nConfiguration OK");
    out
}
