//! Backend that decides but never touches the kernel.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

use super::{BanResult, FirewallBackend};
use crate::config::StartupPolicy;
use crate::extractor::AddressFamily;

/// Records intended bans in memory.
#[derive(Debug, Default)]
pub struct DryRunBackend {
    intended: Mutex<Vec<(String, AddressFamily)>>,
}

impl DryRunBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bans that a real run would have installed, in decision order
    pub fn intended(&self) -> Vec<(String, AddressFamily)> {
        self.intended
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FirewallBackend for DryRunBackend {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn ensure_chain(&self, policy: StartupPolicy) -> Result<()> {
        info!("Dry-run: firewall left untouched (startup policy {:?})", policy);
        Ok(())
    }

    async fn ban_address(&self, addr: &str, family: AddressFamily) -> Result<BanResult> {
        let mut intended = self
            .intended
            .lock()
            .map_err(|_| anyhow::anyhow!("dry-run ban list poisoned"))?;
        if intended.iter().any(|(a, _)| a == addr) {
            return Ok(BanResult::AlreadyPresent);
        }
        intended.push((addr.to_string(), family));
        Ok(BanResult::Simulated)
    }

    async fn banned_addresses(&self, family: AddressFamily) -> Result<Vec<String>> {
        Ok(self
            .intended()
            .into_iter()
            .filter(|(_, f)| *f == family)
            .map(|(a, _)| a)
            .collect())
    }
}
