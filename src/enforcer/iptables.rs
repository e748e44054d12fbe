//! iptables backend implementation.
//!
//! Uses a `FAIL2DROP` chain in the `mangle` table of both `iptables` and
//! `ip6tables`, jumped to from the first position of `PREROUTING` so banned
//! hosts are dropped before routing and conntrack.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{BanResult, FirewallBackend};
use crate::cmd::{run_checked, run_status, CommandExecutor, RealCommandExecutor};
use crate::config::StartupPolicy;
use crate::extractor::AddressFamily;

pub(crate) const IPTABLES: &str = "iptables";
const IP6TABLES: &str = "ip6tables";
const TABLE: &str = "mangle";
const CHAIN: &str = "FAIL2DROP";
const HOOK_CHAIN: &str = "PREROUTING";
/// Seconds to wait for the xtables lock
const LOCK_WAIT_SECS: &str = "5";

/// iptables backend
pub struct IptablesBackend<E: CommandExecutor = RealCommandExecutor> {
    executor: E,
}

impl IptablesBackend {
    pub fn new() -> Self {
        Self::with_executor(RealCommandExecutor::new())
    }
}

impl Default for IptablesBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> IptablesBackend<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    fn program(family: AddressFamily) -> &'static str {
        match family {
            AddressFamily::Ipv4 => IPTABLES,
            AddressFamily::Ipv6 => IP6TABLES,
        }
    }

    fn table_args<'a>(args: &[&'a str]) -> Vec<&'a str> {
        let mut full = vec!["-w", LOCK_WAIT_SECS, "-t", TABLE];
        full.extend_from_slice(args);
        full
    }

    /// Run against the mangle table, failing on non-zero exit
    fn run(&self, family: AddressFamily, args: &[&str]) -> Result<String> {
        run_checked(&self.executor, Self::program(family), &Self::table_args(args))
    }

    /// Run against the mangle table, reporting only success
    fn check(&self, family: AddressFamily, args: &[&str]) -> bool {
        run_status(&self.executor, Self::program(family), &Self::table_args(args))
    }

    fn chain_exists(&self, family: AddressFamily) -> bool {
        self.check(family, &["-S", CHAIN])
    }

    fn jump_exists(&self, family: AddressFamily) -> bool {
        self.check(family, &["-C", HOOK_CHAIN, "-j", CHAIN])
    }

    fn ensure_family(&self, family: AddressFamily, policy: StartupPolicy) -> Result<()> {
        let program = Self::program(family);

        if !self.chain_exists(family) {
            self.run(family, &["-N", CHAIN])?;
            info!("Created {} chain {} in table {}", program, CHAIN, TABLE);
        } else if policy == StartupPolicy::Reset {
            self.run(family, &["-F", CHAIN])?;
            info!("Flushed {} chain {} (startup reset)", program, CHAIN);
        }

        if !self.jump_exists(family) {
            self.run(family, &["-I", HOOK_CHAIN, "1", "-j", CHAIN])?;
            debug!("Linked {} {} -> {}", program, HOOK_CHAIN, CHAIN);
        }

        Ok(())
    }

    fn list_sources(&self, family: AddressFamily) -> Result<Vec<String>> {
        let output = self.run(family, &["-S", CHAIN])?;
        Ok(parse_rule_sources(&output))
    }
}

#[async_trait]
impl<E: CommandExecutor + 'static> FirewallBackend for IptablesBackend<E> {
    fn name(&self) -> &'static str {
        "iptables"
    }

    async fn ensure_chain(&self, policy: StartupPolicy) -> Result<()> {
        self.ensure_family(AddressFamily::Ipv4, policy)?;
        self.ensure_family(AddressFamily::Ipv6, policy)?;
        Ok(())
    }

    async fn ban_address(&self, addr: &str, family: AddressFamily) -> Result<BanResult> {
        // Keyed by source address: another process may have banned it already.
        if self.list_sources(family)?.iter().any(|s| s == addr) {
            debug!("{} already dropped in {}", addr, CHAIN);
            return Ok(BanResult::AlreadyPresent);
        }

        self.run(family, &["-A", CHAIN, "-s", addr, "-j", "DROP"])?;
        Ok(BanResult::Inserted)
    }

    async fn banned_addresses(&self, family: AddressFamily) -> Result<Vec<String>> {
        self.list_sources(family)
    }
}

/// Source addresses of the drop rules in `iptables -S FAIL2DROP` output.
///
/// Format: `-A FAIL2DROP -s 10.0.0.7/32 -j DROP`. Host prefixes (/32, /128)
/// are stripped so entries compare equal to extracted addresses.
fn parse_rule_sources(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.first() != Some(&"-A") || tokens.get(1) != Some(&CHAIN) {
                return None;
            }
            let is_drop = tokens.windows(2).any(|w| w == ["-j", "DROP"]);
            if !is_drop {
                return None;
            }
            let pos = tokens.iter().position(|t| *t == "-s")?;
            let source = tokens.get(pos + 1)?;
            let host = source
                .strip_suffix("/32")
                .or_else(|| source.strip_suffix("/128"))
                .unwrap_or(source);
            Some(host.to_string())
        })
        .collect()
}
