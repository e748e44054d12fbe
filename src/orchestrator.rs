//! Runs one monitor per active log source over a shared ledger and enforcer.

use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::LogSource;
use crate::enforcer::Enforcer;
use crate::ledger::OffenseLedger;
use crate::monitor::{MonitorReport, SourceMonitor};
use crate::signal::ShutdownToken;
use crate::tail::ReadMode;

/// How a run treats its sources and the firewall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Follow every source until shutdown
    Continuous,
    /// Read current contents once and enforce
    OneShot,
    /// Read current contents once, enforce nothing
    DryRun,
}

impl RunMode {
    pub fn from_flags(once: bool, dry_run: bool) -> Self {
        if dry_run {
            RunMode::DryRun
        } else if once {
            RunMode::OneShot
        } else {
            RunMode::Continuous
        }
    }

    pub fn read_mode(self) -> ReadMode {
        match self {
            RunMode::Continuous => ReadMode::Follow,
            RunMode::OneShot | RunMode::DryRun => ReadMode::ToEnd,
        }
    }

    pub fn is_dry_run(self) -> bool {
        self == RunMode::DryRun
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Continuous => "continuous",
            RunMode::OneShot => "one-shot",
            RunMode::DryRun => "dry-run",
        }
    }
}

pub struct Orchestrator {
    sources: Vec<LogSource>,
    ledger: Arc<OffenseLedger>,
    enforcer: Arc<Enforcer>,
    mode: RunMode,
}

impl Orchestrator {
    pub fn new(sources: Vec<LogSource>, enforcer: Enforcer, mode: RunMode) -> Self {
        Self {
            sources,
            ledger: Arc::new(OffenseLedger::new()),
            enforcer: Arc::new(enforcer),
            mode,
        }
    }

    pub fn ledger(&self) -> &OffenseLedger {
        &self.ledger
    }

    /// Start every monitor and wait until all of them have stopped.
    ///
    /// A source that fails only ends its own monitor. Reports come back in
    /// source order.
    pub async fn run(&self, shutdown: ShutdownToken) -> Result<Vec<MonitorReport>> {
        if self.sources.is_empty() {
            warn!("No complete log source configured, nothing to monitor");
            return Ok(Vec::new());
        }

        // Build every monitor before starting any, so a bad pattern fails the run
        let mut monitors = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            monitors.push(SourceMonitor::new(
                source.clone(),
                Arc::clone(&self.ledger),
                Arc::clone(&self.enforcer),
            )?);
        }

        info!(
            "Starting {} monitor(s) in {} mode (backend: {})",
            monitors.len(),
            self.mode.as_str(),
            self.enforcer.backend_name()
        );

        let read_mode = self.mode.read_mode();
        let mut tasks = JoinSet::new();
        for (index, monitor) in monitors.into_iter().enumerate() {
            let shutdown = shutdown.clone();
            tasks.spawn(async move { (index, monitor.run(read_mode, shutdown).await) });
        }

        let mut reports: Vec<(usize, MonitorReport)> = Vec::with_capacity(self.sources.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => reports.push(entry),
                Err(e) => error!("Monitor task ended abnormally: {}", e),
            }
        }
        reports.sort_by_key(|(index, _)| *index);
        let reports: Vec<MonitorReport> = reports.into_iter().map(|(_, r)| r).collect();

        for report in &reports {
            log_summary(report);
        }
        info!(
            "{} address(es) tracked, {} banned",
            self.ledger.len(),
            self.ledger.banned_addresses().len()
        );

        Ok(reports)
    }
}

fn log_summary(report: &MonitorReport) {
    match &report.error {
        Some(reason) => warn!(
            "[{}] stopped after {} line(s): {}",
            report.set, report.lines, reason
        ),
        None => info!(
            "[{}] {} line(s), {} offense(s), {} ban decision(s)",
            report.set,
            report.lines,
            report.offenses,
            report.bans.len()
        ),
    }
}
