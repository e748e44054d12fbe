//! Per-address offense accounting shared by every log source.
//!
//! The ledger is the only state shared between monitors. Each record is
//! updated under its shard's write lock, so the increment, the threshold
//! comparison and the setting of the banned flag happen as one step no matter
//! how many monitors report the same address at once.
//!
//! Records are never removed and the banned flag is never cleared: counters
//! live for the lifetime of the process.

use dashmap::DashMap;

/// Offense count and ban status for one address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffenseRecord {
    pub count: u64,
    pub banned: bool,
}

/// Result of recording one offense.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Count after this offense was added
    pub count: u64,
    /// True for exactly one call per address: the one that crossed the threshold
    pub first_crossing: bool,
}

/// Concurrency-safe map from canonical address to [`OffenseRecord`].
#[derive(Debug, Default)]
pub struct OffenseLedger {
    records: DashMap<String, OffenseRecord>,
}

impl OffenseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one offense for `addr` and decide whether it triggers a ban.
    ///
    /// The ban triggers when the count becomes strictly greater than
    /// `threshold`, so `threshold + 1` offenses are needed. This matches the
    /// behaviour operators of the reference daemon already tuned against.
    pub fn record_offense(&self, addr: &str, threshold: u32) -> Verdict {
        let mut record = self.records.entry(addr.to_string()).or_default();
        record.count += 1;

        let first_crossing = record.count > u64::from(threshold) && !record.banned;
        if first_crossing {
            record.banned = true;
        }

        Verdict {
            count: record.count,
            first_crossing,
        }
    }

    pub fn get(&self, addr: &str) -> Option<OffenseRecord> {
        self.records.get(addr).map(|r| *r)
    }

    pub fn is_banned(&self, addr: &str) -> bool {
        self.get(addr).map(|r| r.banned).unwrap_or(false)
    }

    /// Number of distinct addresses seen.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All addresses marked banned, sorted.
    pub fn banned_addresses(&self) -> Vec<String> {
        let mut banned: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.banned)
            .map(|r| r.key().clone())
            .collect();
        banned.sort();
        banned
    }
}
