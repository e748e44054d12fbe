//! Firewall enforcement backends (iptables, nftables, dry-run).
//!
//! Every backend owns exactly one dedicated chain and only ever appends drop
//! rules to it. Rules are keyed by the banned address, so a ban that is
//! already present (for instance left behind by an earlier run) is detected
//! and not duplicated.

mod dry_run;
mod iptables;
mod nftables;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info};

pub use dry_run::DryRunBackend;
pub use iptables::IptablesBackend;
pub use nftables::NftablesBackend;

use crate::cmd::{run_status, CommandExecutor, RealCommandExecutor};
use crate::config::{Backend, StartupPolicy};
use crate::error::Fail2dropError;
use crate::extractor::{AddressFamily, Offender};
use crate::whitelist::Whitelist;

/// What a backend did for one ban request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanResult {
    /// A new drop rule was added
    Inserted,
    /// The chain already held a rule for this address
    AlreadyPresent,
    /// Nothing was written (dry-run)
    Simulated,
}

/// Trait for firewall backends
#[async_trait]
pub trait FirewallBackend: Send + Sync {
    /// Short name used in log records
    fn name(&self) -> &'static str;

    /// Create the dedicated chain and hook it into prerouting if missing.
    ///
    /// Safe to call repeatedly. With [`StartupPolicy::Reset`] the chain is
    /// emptied as well, lifting every earlier ban.
    async fn ensure_chain(&self, policy: StartupPolicy) -> Result<()>;

    /// Add a drop rule for `addr` unless one already exists.
    async fn ban_address(&self, addr: &str, family: AddressFamily) -> Result<BanResult>;

    /// Addresses that currently have a drop rule in the dedicated chain
    async fn banned_addresses(&self, family: AddressFamily) -> Result<Vec<String>>;
}

/// Final result of a ban decision, as logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanOutcome {
    Enforced,
    AlreadyPresent,
    WouldBan,
    /// Whitelisted: counted and marked banned, but no rule installed
    Suppressed,
    Failed(String),
}

impl BanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanOutcome::Enforced => "banned",
            BanOutcome::AlreadyPresent => "already present",
            BanOutcome::WouldBan => "would ban",
            BanOutcome::Suppressed => "suppressed (whitelisted)",
            BanOutcome::Failed(_) => "FAILED",
        }
    }
}

/// Applies ban decisions: whitelist gate, then the backend.
pub struct Enforcer {
    backend: Box<dyn FirewallBackend>,
    whitelist: Whitelist,
    // Serializes kernel writes from concurrent monitors
    write_lock: Mutex<()>,
}

impl Enforcer {
    pub fn new(backend: Box<dyn FirewallBackend>, whitelist: Whitelist) -> Self {
        Self {
            backend,
            whitelist,
            write_lock: Mutex::new(()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Prepare the dedicated chain. Any failure here is fatal.
    pub async fn prepare(&self, policy: StartupPolicy) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.backend.ensure_chain(policy).await.map_err(|e| {
            Fail2dropError::Firewall(format!("{}: {:#}", self.backend.name(), e)).into()
        })
    }

    /// Carry out a ban decision for `offender`, reported by `set`.
    ///
    /// Never fails: backend errors are logged and returned as
    /// [`BanOutcome::Failed`] so the calling monitor keeps running.
    pub async fn enforce(&self, set: &str, offender: &Offender, count: u64) -> BanOutcome {
        if self.whitelist.is_exempt(&offender.addr) {
            let outcome = BanOutcome::Suppressed;
            info!(
                "[{}] {} {} after {} offenses",
                set,
                outcome.as_str(),
                offender.addr,
                count
            );
            return outcome;
        }

        let result = {
            let _guard = self.write_lock.lock().await;
            self.backend
                .ban_address(&offender.addr, offender.family)
                .await
        };

        let outcome = match result {
            Ok(BanResult::Inserted) => BanOutcome::Enforced,
            Ok(BanResult::AlreadyPresent) => BanOutcome::AlreadyPresent,
            Ok(BanResult::Simulated) => BanOutcome::WouldBan,
            Err(e) => {
                let err = Fail2dropError::Enforcement {
                    ip: offender.addr.clone(),
                    reason: format!("{:#}", e),
                };
                error!(
                    "[{}] FAILED to ban {} ({}) after {} offenses via {}: {}",
                    set,
                    offender.addr,
                    offender.family,
                    count,
                    self.backend.name(),
                    err
                );
                return BanOutcome::Failed(err.to_string());
            }
        };

        info!(
            "[{}] {} {} ({}) after {} offenses via {}",
            set,
            outcome.as_str(),
            offender.addr,
            offender.family,
            count,
            self.backend.name()
        );
        outcome
    }
}

/// Detect available firewall backend
pub fn detect_backend() -> Result<Backend> {
    detect_backend_with(&RealCommandExecutor::new())
}

pub(crate) fn detect_backend_with<E: CommandExecutor + ?Sized>(executor: &E) -> Result<Backend> {
    // nftables first, it replaces iptables on current distributions
    if run_status(executor, nftables::NFT, &["--version"]) {
        return Ok(Backend::Nftables);
    }

    if run_status(executor, iptables::IPTABLES, &["--version"]) {
        return Ok(Backend::Iptables);
    }

    Err(Fail2dropError::BackendNotAvailable(
        "nft or iptables is required".to_string(),
    )
    .into())
}

/// Create a firewall backend based on configuration
pub fn create_backend(backend: Backend) -> Result<Box<dyn FirewallBackend>> {
    let actual_backend = match backend {
        Backend::Auto => detect_backend()?,
        other => other,
    };

    match actual_backend {
        Backend::Nftables => Ok(Box::new(NftablesBackend::new())),
        Backend::Iptables => Ok(Box::new(IptablesBackend::new())),
        Backend::Auto => unreachable!("detect_backend never returns Auto"),
    }
}

/// Check if running as root (effective UID == 0)
pub fn check_root() -> Result<()> {
    // SAFETY: geteuid() has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        return Err(Fail2dropError::Permission(format!(
            "managing the firewall requires root (effective uid is {}). \
             Run with sudo, or use `run --dry-run` to preview bans.",
            euid
        ))
        .into());
    }
    Ok(())
}
