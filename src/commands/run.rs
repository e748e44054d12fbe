//! Run command implementation.

use anyhow::Result;
use std::fmt::Write as _;
use tracing::info;

use crate::config::{Config, StartupPolicy};
use crate::enforcer::{
    check_root, create_backend, BanOutcome, DryRunBackend, Enforcer, FirewallBackend,
};
use crate::lock::LockGuard;
use crate::monitor::MonitorReport;
use crate::orchestrator::{Orchestrator, RunMode};
use crate::signal::{self, ShutdownToken};

/// Run the monitors in the given mode until they stop
pub async fn run(config: &Config, mode: RunMode, reset: bool) -> Result<()> {
    let policy = if reset {
        StartupPolicy::Reset
    } else {
        config.startup
    };

    let sources = config.active_sources();
    let whitelist = config.whitelist()?;

    // Held for the whole run; dry runs neither need root nor the lock
    let _lock = if mode.is_dry_run() {
        None
    } else {
        check_root()?;
        Some(LockGuard::acquire()?)
    };

    let backend: Box<dyn FirewallBackend> = if mode.is_dry_run() {
        Box::new(DryRunBackend::new())
    } else {
        create_backend(config.backend)?
    };

    let enforcer = Enforcer::new(backend, whitelist);
    enforcer.prepare(policy).await?;
    info!(
        "Firewall ready ({}, startup policy {:?}, {} whitelist entries)",
        enforcer.backend_name(),
        policy,
        enforcer.whitelist().len()
    );

    let shutdown = ShutdownToken::new();
    signal::listen(shutdown.clone());

    let orchestrator = Orchestrator::new(sources, enforcer, mode);
    let reports = orchestrator.run(shutdown).await?;

    if mode != RunMode::Continuous {
        print!("{}", render_summary(&reports, mode));
    }

    Ok(())
}

/// Human-readable ban decisions of a finished one-shot or dry run
pub fn render_summary(reports: &[MonitorReport], mode: RunMode) -> String {
    let mut out = String::new();
    let decisions: Vec<_> = reports.iter().flat_map(|r| r.bans.iter()).collect();

    let _ = writeln!(out);
    if decisions.is_empty() {
        let _ = writeln!(out, "No address crossed its threshold.");
    }
    for ban in &decisions {
        let detail = match &ban.outcome {
            BanOutcome::Failed(reason) => format!(": {}", reason),
            _ => String::new(),
        };
        let _ = writeln!(
            out,
            "  [{}] {} {} ({} offenses){}",
            ban.set,
            ban.outcome.as_str(),
            ban.offender.addr,
            ban.count,
            detail
        );
    }

    let failed = decisions
        .iter()
        .filter(|b| matches!(b.outcome, BanOutcome::Failed(_)))
        .count();
    let unavailable = reports.iter().filter(|r| r.error.is_some()).count();
    let _ = writeln!(
        out,
        "\nSummary ({}): {} source(s), {} ban decision(s), {} failed, {} source(s) unavailable",
        mode.as_str(),
        reports.len(),
        decisions.len(),
        failed,
        unavailable
    );
    out
}
