//! nftables backend implementation.
//!
//! All bans live in one `inet fail2drop` table with a single base chain
//! hooked at prerouting with mangle priority. Each rule carries the banned
//! address as its comment, which is the rule's identity when checking for
//! duplicates.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{BanResult, FirewallBackend};
use crate::cmd::{args_to_strings, run_checked, CommandExecutor, RealCommandExecutor};
use crate::config::StartupPolicy;
use crate::extractor::AddressFamily;

pub(crate) const NFT: &str = "nft";
const TABLE_FAMILY: &str = "inet";
const TABLE_NAME: &str = "fail2drop";
const CHAIN_NAME: &str = "prerouting";
/// Same slot as the iptables mangle table
const CHAIN_PRIORITY: i32 = -150;

/// Validate that an address is safe to splice into an nft script.
/// Only digits, dots, colons and hex letters can appear in an address.
fn is_safe_nft_element(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == ':' || ('a'..='f').contains(&c))
}

/// nftables backend
pub struct NftablesBackend<E: CommandExecutor = RealCommandExecutor> {
    executor: E,
}

impl NftablesBackend {
    pub fn new() -> Self {
        Self::with_executor(RealCommandExecutor::new())
    }
}

impl Default for NftablesBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> NftablesBackend<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    /// Script creating the table and chain if missing.
    ///
    /// `add` never fails on existing objects, so the script is idempotent.
    /// A reset adds `flush table`, which empties the chain but keeps it hooked.
    fn generate_ensure_script(&self, policy: StartupPolicy) -> String {
        let mut script = String::new();

        script.push_str(&format!("add table {} {}\n", TABLE_FAMILY, TABLE_NAME));
        if policy == StartupPolicy::Reset {
            script.push_str(&format!("flush table {} {}\n", TABLE_FAMILY, TABLE_NAME));
        }
        script.push_str(&format!(
            "add chain {} {} {} {{ type filter hook prerouting priority {}; policy accept; }}\n",
            TABLE_FAMILY, TABLE_NAME, CHAIN_NAME, CHAIN_PRIORITY
        ));

        script
    }

    /// Script adding one drop rule. The header predicate follows the family.
    fn generate_ban_script(&self, addr: &str, family: AddressFamily) -> Result<String> {
        if !is_safe_nft_element(addr) {
            anyhow::bail!("Refusing unsafe nftables element: {:?}", addr);
        }

        let selector = match family {
            AddressFamily::Ipv4 => "ip",
            AddressFamily::Ipv6 => "ip6",
        };

        Ok(format!(
            "add rule {} {} {} {} saddr {} counter drop comment \"{}\"\n",
            TABLE_FAMILY, TABLE_NAME, CHAIN_NAME, selector, addr, addr
        ))
    }

    /// Execute nft with stdin script
    fn exec_nft_script(&self, script: &str) -> Result<()> {
        debug!("Executing nft script:\n{}", script);
        let args = args_to_strings(&["-f", "-"]);
        self.executor
            .execute_with_stdin(NFT, &args, script)?
            .into_stdout(NFT)?;
        Ok(())
    }

    fn list_chain(&self) -> Result<String> {
        run_checked(
            &self.executor,
            NFT,
            &["list", "chain", TABLE_FAMILY, TABLE_NAME, CHAIN_NAME],
        )
    }
}

#[async_trait]
impl<E: CommandExecutor + 'static> FirewallBackend for NftablesBackend<E> {
    fn name(&self) -> &'static str {
        "nftables"
    }

    async fn ensure_chain(&self, policy: StartupPolicy) -> Result<()> {
        let script = self.generate_ensure_script(policy);
        self.exec_nft_script(&script)?;
        if policy == StartupPolicy::Reset {
            info!("Flushed nftables table {} {} (startup reset)", TABLE_FAMILY, TABLE_NAME);
        }
        info!(
            "nftables chain {} {} {} ready",
            TABLE_FAMILY, TABLE_NAME, CHAIN_NAME
        );
        Ok(())
    }

    async fn ban_address(&self, addr: &str, family: AddressFamily) -> Result<BanResult> {
        let listing = self.list_chain()?;
        if rule_ids(&listing, family).iter().any(|id| id == addr) {
            debug!("{} already dropped in {}", addr, TABLE_NAME);
            return Ok(BanResult::AlreadyPresent);
        }

        let script = self.generate_ban_script(addr, family)?;
        self.exec_nft_script(&script)?;
        Ok(BanResult::Inserted)
    }

    async fn banned_addresses(&self, family: AddressFamily) -> Result<Vec<String>> {
        let listing = self.list_chain()?;
        Ok(rule_ids(&listing, family))
    }
}

/// Banned addresses in `nft list chain` output for one family.
///
/// A rule looks like
/// `ip saddr 10.0.0.7 counter packets 0 bytes 0 drop comment "10.0.0.7"`.
/// The comment is the identity; rules without one fall back to the saddr.
fn rule_ids(output: &str, family: AddressFamily) -> Vec<String> {
    let selector = match family {
        AddressFamily::Ipv4 => "ip",
        AddressFamily::Ipv6 => "ip6",
    };

    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let saddr = tokens
                .windows(3)
                .find(|w| w[0] == selector && w[1] == "saddr")
                .map(|w| w[2])?;
            if !tokens.contains(&"drop") {
                return None;
            }
            let comment = tokens
                .iter()
                .position(|t| *t == "comment")
                .and_then(|i| tokens.get(i + 1))
                .map(|c| c.trim_matches('"'));
            Some(comment.unwrap_or(saddr).to_string())
        })
        .collect()
}
