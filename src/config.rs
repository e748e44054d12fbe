//! Configuration management for fail2drop.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::extractor::{AddressExtractor, DEFAULT_IP_PATTERN};
use crate::whitelist::Whitelist;

/// Default config location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fail2drop/config.yaml";

/// Threshold used when a set does not name one
pub const DEFAULT_THRESHOLD: u32 = 5;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Addresses or CIDR ranges that are never banned
    pub whitelist: Vec<String>,

    /// Where log records are written (stdout when unset)
    pub log_file: Option<PathBuf>,

    /// Firewall backend (auto, iptables, nftables)
    pub backend: Backend,

    /// What to do with bans left in the dedicated chain by a previous run
    pub startup: StartupPolicy,

    /// Monitored log sources, keyed by set name
    pub sets: BTreeMap<String, SetConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            whitelist: Vec::new(),
            log_file: None,
            backend: Backend::Auto,
            startup: StartupPolicy::Retain,
            sets: default_sets(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to the built-in sshd set.
    ///
    /// Runs before logging is set up, so callers report the fallback themselves.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse and validate YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        Whitelist::from_entries(&self.whitelist)?;

        for (name, set) in &self.sets {
            if set.threshold == Some(0) {
                bail!("Set '{}': threshold must be a positive integer", name);
            }
            if matches!(set.tag.as_deref(), Some(tag) if tag.is_empty()) {
                bail!("Set '{}': tag must not be empty", name);
            }
        }

        for source in self.active_sources() {
            source
                .extractor()
                .with_context(|| format!("Set '{}' has an invalid pattern", source.set))?;
        }

        Ok(())
    }

    /// Complete sets as immutable log sources. Incomplete sets are skipped.
    pub fn active_sources(&self) -> Vec<LogSource> {
        self.sets
            .iter()
            .filter_map(|(name, set)| {
                let source = set.to_source(name);
                if source.is_none() {
                    warn!(
                        "Set '{}' is missing logfile, tag, pattern or ip_pattern; skipped",
                        name
                    );
                }
                source
            })
            .collect()
    }

    pub fn whitelist(&self) -> Result<Whitelist> {
        Whitelist::from_entries(&self.whitelist)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Auto-detect backend (checks nftables first, then iptables)
    #[default]
    Auto,
    /// Use iptables/ip6tables in the mangle table
    Iptables,
    /// Use nftables inet table
    Nftables,
}

/// Cold-start handling of the dedicated chain.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartupPolicy {
    /// Keep drop rules installed by earlier runs
    #[default]
    Retain,
    /// Flush the chain on startup, lifting every earlier ban
    Reset,
}

/// One entry under `sets:` as written by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SetConfig {
    pub logfile: Option<PathBuf>,
    pub tag: Option<String>,
    pub pattern: Option<String>,
    pub ip_pattern: Option<String>,
    pub threshold: Option<u32>,
}

impl SetConfig {
    fn to_source(&self, name: &str) -> Option<LogSource> {
        Some(LogSource {
            set: name.to_string(),
            logfile: self.logfile.clone()?,
            tag: self.tag.clone()?,
            pattern: self.pattern.clone()?,
            ip_pattern: self.ip_pattern.clone()?,
            threshold: self.threshold.unwrap_or(DEFAULT_THRESHOLD),
        })
    }
}

/// A validated log source. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSource {
    pub set: String,
    pub logfile: PathBuf,
    pub tag: String,
    pub pattern: String,
    pub ip_pattern: String,
    pub threshold: u32,
}

impl LogSource {
    pub fn extractor(&self) -> Result<AddressExtractor> {
        AddressExtractor::new(&self.tag, &self.pattern, &self.ip_pattern)
    }
}

fn default_sets() -> BTreeMap<String, SetConfig> {
    let mut sets = BTreeMap::new();
    sets.insert(
        "sshd".to_string(),
        SetConfig {
            logfile: Some(PathBuf::from("/var/log/auth.log")),
            tag: Some("sshd".to_string()),
            pattern: Some("Connection closed by [1-9][^ ]*".to_string()),
            ip_pattern: Some(DEFAULT_IP_PATTERN.to_string()),
            threshold: Some(DEFAULT_THRESHOLD),
        },
    );
    sets
}
