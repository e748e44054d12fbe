//! Error types for fail2drop.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Fail2dropError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    /// Dedicated chain/table could not be prepared.
    #[error("Firewall error: {0}")]
    Firewall(String),

    #[error("Log source '{set}' unavailable: {reason}")]
    SourceUnavailable { set: String, reason: String },

    /// A single ban could not be installed.
    #[error("Failed to ban {ip}: {reason}")]
    Enforcement { ip: String, reason: String },
}

impl Fail2dropError {
    /// Whether this error must abort startup.
    ///
    /// Source and single-ban failures only degrade one monitor or one IP;
    /// everything else leaves the daemon unable to enforce anything.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Fail2dropError::SourceUnavailable { .. } | Fail2dropError::Enforcement { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_errors_are_fatal() {
        assert!(Fail2dropError::Config("bad".into()).is_fatal());
        assert!(Fail2dropError::Permission("uid 1000".into()).is_fatal());
        assert!(Fail2dropError::BackendNotAvailable("nft".into()).is_fatal());
        assert!(Fail2dropError::Firewall("chain".into()).is_fatal());
    }

    #[test]
    fn test_local_errors_are_recoverable() {
        let source = Fail2dropError::SourceUnavailable {
            set: "sshd".into(),
            reason: "No such file or directory".into(),
        };
        let ban = Fail2dropError::Enforcement {
            ip: "10.0.0.7".into(),
            reason: "iptables failed".into(),
        };
        assert!(!source.is_fatal());
        assert!(!ban.is_fatal());
    }

    #[test]
    fn test_display_names_the_subject() {
        let err = Fail2dropError::Enforcement {
            ip: "10.0.0.7".into(),
            reason: "timeout".into(),
        };
        assert_eq!(err.to_string(), "Failed to ban 10.0.0.7: timeout");
    }
}
