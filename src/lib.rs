//! # fail2drop - Log-driven intrusion mitigation for Linux hosts
//!
//! Watches log files for offense lines (failed logins and the like), counts
//! offenses per source address across every watched file, and installs a
//! kernel drop rule once an address goes past its threshold.
//!
//! ## Features
//!
//! - **Shared ledger** - Offenses from every log source count towards one total per address
//! - **At-most-once bans** - An address is handed to the firewall once per run, never retried
//! - **Whitelist** - Exact addresses or CIDR ranges are counted but never banned
//! - **IPv4 and IPv6** - Both families, in one dedicated chain or table
//! - **Flexible** - nftables or iptables backends, auto-detected by default
//! - **Dry run** - Shows what would be banned without root or kernel changes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        fail2drop                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: run [--once|--dry-run|--reset], check      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml)                                        │
//! │    └── Sets: logfile, tag, pattern, ip_pattern, threshold   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Orchestrator (tokio JoinSet)                               │
//! │    └── SourceMonitor per set                                │
//! │          ├── LineStream (linemux follow / snapshot)         │
//! │          └── AddressExtractor (regex)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  OffenseLedger (dashmap)                                    │
//! │    └── Per-address count and banned flag                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Enforcer (whitelist + FirewallBackend trait)               │
//! │    ├── NftablesBackend (inet fail2drop)                     │
//! │    ├── IptablesBackend (mangle FAIL2DROP)                   │
//! │    └── DryRunBackend                                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use fail2drop::config::Config;
//! use fail2drop::enforcer::{check_root, create_backend, Enforcer};
//! use fail2drop::orchestrator::{Orchestrator, RunMode};
//! use fail2drop::signal::ShutdownToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     check_root()?;
//!
//!     let config = Config::load("/etc/fail2drop/config.yaml")?;
//!
//!     let backend = create_backend(config.backend)?;
//!     let enforcer = Enforcer::new(backend, config.whitelist()?);
//!     enforcer.prepare(config.startup).await?;
//!
//!     let orchestrator = Orchestrator::new(config.active_sources(), enforcer, RunMode::OneShot);
//!     for report in orchestrator.run(ShutdownToken::new()).await? {
//!         println!("{}: {} ban decision(s)", report.set, report.bans.len());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`cmd`] - System command execution, mockable in tests
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`enforcer`] - Firewall backends and the ban gate
//! - [`error`] - Error taxonomy
//! - [`extractor`] - Offense matching and address extraction
//! - [`ledger`] - Concurrent per-address offense counts
//! - [`lock`] - File locking so one instance drives the firewall
//! - [`logging`] - Subscriber setup
//! - [`monitor`] - Per-source monitoring loop
//! - [`orchestrator`] - Runs all monitors of a run
//! - [`signal`] - Graceful shutdown signal handling
//! - [`tail`] - Line streams over log files
//! - [`whitelist`] - Addresses that are never banned

pub mod cli;
pub mod cmd;
pub mod commands;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod extractor;
pub mod ledger;
pub mod lock;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
pub mod signal;
pub mod tail;
pub mod whitelist;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::Fail2dropError;
