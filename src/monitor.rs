//! Per-source monitoring loop.
//!
//! A monitor reads its log source line by line, counts offenses in the shared
//! ledger and hands first crossings to the enforcer. A source that cannot be
//! opened or read only stops its own monitor.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::LogSource;
use crate::enforcer::{BanOutcome, Enforcer};
use crate::error::Fail2dropError;
use crate::extractor::{AddressExtractor, Offender};
use crate::ledger::OffenseLedger;
use crate::signal::ShutdownToken;
use crate::tail::{open_stream, LineStream, ReadMode};

/// Lifecycle of a monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    /// Following new data (continuous mode)
    Streaming,
    /// Consuming existing contents up to end-of-file
    Draining,
    Stopped,
}

/// A ban decision taken by a monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEvent {
    pub set: String,
    pub offender: Offender,
    pub count: u64,
    pub outcome: BanOutcome,
}

/// What a monitor did before it stopped
#[derive(Debug, Clone)]
pub struct MonitorReport {
    pub set: String,
    pub lines: u64,
    pub offenses: u64,
    pub bans: Vec<BanEvent>,
    pub state: MonitorState,
    /// Why the source stopped early, if it did
    pub error: Option<String>,
}

impl MonitorReport {
    fn new(set: &str) -> Self {
        Self {
            set: set.to_string(),
            lines: 0,
            offenses: 0,
            bans: Vec::new(),
            state: MonitorState::Idle,
            error: None,
        }
    }
}

pub struct SourceMonitor {
    source: LogSource,
    extractor: AddressExtractor,
    ledger: Arc<OffenseLedger>,
    enforcer: Arc<Enforcer>,
    report: MonitorReport,
}

impl SourceMonitor {
    pub fn new(
        source: LogSource,
        ledger: Arc<OffenseLedger>,
        enforcer: Arc<Enforcer>,
    ) -> anyhow::Result<Self> {
        let extractor = source.extractor()?;
        let report = MonitorReport::new(&source.set);
        Ok(Self {
            source,
            extractor,
            ledger,
            enforcer,
            report,
        })
    }

    pub fn state(&self) -> MonitorState {
        self.report.state
    }

    /// Open the source and consume it until it ends or `shutdown` fires.
    pub async fn run(mut self, mode: ReadMode, shutdown: ShutdownToken) -> MonitorReport {
        match open_stream(&self.source.logfile, mode).await {
            Ok(mut stream) => {
                info!(
                    "[{}] Monitoring {:?} (tag '{}', threshold {})",
                    self.source.set,
                    self.source.logfile,
                    self.source.tag,
                    self.source.threshold
                );
                self.consume(stream.as_mut(), mode, &shutdown).await;
            }
            Err(e) => {
                let err = Fail2dropError::SourceUnavailable {
                    set: self.source.set.clone(),
                    reason: format!("{:#}", e),
                };
                warn!("{}; other sources continue", err);
                self.report.error = Some(err.to_string());
                self.report.state = MonitorState::Stopped;
            }
        }
        self.report
    }

    /// Consume an already opened stream.
    pub async fn consume(
        &mut self,
        stream: &mut dyn LineStream,
        mode: ReadMode,
        shutdown: &ShutdownToken,
    ) {
        self.report.state = match mode {
            ReadMode::Follow => MonitorState::Streaming,
            ReadMode::ToEnd => MonitorState::Draining,
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("[{}] Shutdown requested", self.source.set);
                    break;
                }
                next = stream.next_line() => next,
            };

            match next {
                Ok(Some(line)) => {
                    self.process_line(&line).await;
                }
                Ok(None) => break,
                Err(e) => {
                    error!("[{}] Read error, monitor stopped: {:#}", self.source.set, e);
                    self.report.error = Some(format!("{:#}", e));
                    break;
                }
            }
        }

        self.report.state = MonitorState::Stopped;
    }

    /// Handle one line. Returns the ban decision if this line triggered one.
    pub async fn process_line(&mut self, line: &str) -> Option<BanEvent> {
        self.report.lines += 1;

        let offender = self.extractor.extract(line)?;
        self.report.offenses += 1;

        let verdict = self
            .ledger
            .record_offense(&offender.addr, self.source.threshold);
        debug!(
            "[{}] offense from {} ({}/{})",
            self.source.set, offender.addr, verdict.count, self.source.threshold
        );

        if !verdict.first_crossing {
            return None;
        }

        let outcome = self
            .enforcer
            .enforce(&self.source.set, &offender, verdict.count)
            .await;
        let event = BanEvent {
            set: self.source.set.clone(),
            offender,
            count: verdict.count,
            outcome,
        };
        self.report.bans.push(event.clone());
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcer::mock::{RecordingBackend, SharedBackend};
    use crate::extractor::DEFAULT_IP_PATTERN;
    use crate::whitelist::Whitelist;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    struct VecStream(VecDeque<Result<String>>);

    impl VecStream {
        fn lines(lines: &[&str]) -> Self {
            Self(lines.iter().map(|l| Ok(l.to_string())).collect())
        }
    }

    #[async_trait]
    impl LineStream for VecStream {
        async fn next_line(&mut self) -> Result<Option<String>> {
            self.0.pop_front().transpose()
        }
    }

    fn source(path: PathBuf, threshold: u32) -> LogSource {
        LogSource {
            set: "sshd".to_string(),
            logfile: path,
            tag: "sshd".to_string(),
            pattern: "Connection closed by [1-9][^ ]*".to_string(),
            ip_pattern: DEFAULT_IP_PATTERN.to_string(),
            threshold,
        }
    }

    fn offense(ip: &str) -> String {
        format!("host sshd[42]: Connection closed by {} port 4242 [preauth]", ip)
    }

    fn monitor(
        backend: &Arc<RecordingBackend>,
        whitelist: &[&str],
        threshold: u32,
    ) -> SourceMonitor {
        let enforcer = Enforcer::new(
            Box::new(SharedBackend(Arc::clone(backend))),
            Whitelist::from_entries(whitelist).unwrap(),
        );
        SourceMonitor::new(
            source(PathBuf::from("/var/log/auth.log"), threshold),
            Arc::new(OffenseLedger::new()),
            Arc::new(enforcer),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_ban_after_threshold_exceeded() {
        let backend = Arc::new(RecordingBackend::new());
        let mut monitor = monitor(&backend, &[], 2);

        assert!(monitor.process_line(&offense("10.0.0.7")).await.is_none());
        assert!(monitor.process_line(&offense("10.0.0.7")).await.is_none());
        let event = monitor.process_line(&offense("10.0.0.7")).await.unwrap();
        assert_eq!(event.count, 3);
        assert_eq!(event.outcome, BanOutcome::Enforced);
        assert!(monitor.process_line(&offense("10.0.0.7")).await.is_none());

        assert_eq!(backend.ban_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_offense_lines_counted_but_ignored() {
        let backend = Arc::new(RecordingBackend::new());
        let mut monitor = monitor(&backend, &[], 0);

        monitor
            .process_line("host sshd[1]: Accepted publickey for alice from 10.0.0.7")
            .await;
        monitor
            .process_line("host cron[1]: Connection closed by 10.0.0.7")
            .await;

        assert_eq!(monitor.report.lines, 2);
        assert_eq!(monitor.report.offenses, 0);
        assert!(backend.ban_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_whitelisted_marked_banned_without_rule() {
        let backend = Arc::new(RecordingBackend::new());
        let mut monitor = monitor(&backend, &["192.168.1.10"], 1);

        monitor.process_line(&offense("192.168.1.10")).await;
        let event = monitor.process_line(&offense("192.168.1.10")).await.unwrap();

        assert_eq!(event.outcome, BanOutcome::Suppressed);
        assert!(monitor.ledger.is_banned("192.168.1.10"));
        assert!(backend.ban_calls.lock().unwrap().is_empty());
        assert!(backend.rules.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_ban_stays_banned_without_retry() {
        let backend = Arc::new(RecordingBackend::new().fail_on("10.0.0.7"));
        let mut monitor = monitor(&backend, &[], 0);

        let event = monitor.process_line(&offense("10.0.0.7")).await.unwrap();
        assert!(matches!(event.outcome, BanOutcome::Failed(_)));
        assert!(monitor.ledger.is_banned("10.0.0.7"));

        for _ in 0..5 {
            assert!(monitor.process_line(&offense("10.0.0.7")).await.is_none());
        }
        assert_eq!(backend.ban_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_consume_stops_at_end() {
        let backend = Arc::new(RecordingBackend::new());
        let mut monitor = monitor(&backend, &[], 1);
        let hit = offense("10.0.0.7");
        let mut stream = VecStream::lines(&[hit.as_str(), "noise", hit.as_str()]);

        assert_eq!(monitor.state(), MonitorState::Idle);
        monitor
            .consume(&mut stream, ReadMode::ToEnd, &ShutdownToken::new())
            .await;

        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(monitor.report.lines, 3);
        assert_eq!(monitor.report.offenses, 2);
        assert_eq!(monitor.report.bans.len(), 1);
    }

    #[tokio::test]
    async fn test_read_error_stops_monitor() {
        let backend = Arc::new(RecordingBackend::new());
        let mut monitor = monitor(&backend, &[], 5);
        let mut stream = VecStream(VecDeque::from(vec![
            Ok(offense("10.0.0.7")),
            Err(anyhow::anyhow!("Input/output error")),
            Ok(offense("10.0.0.7")),
        ]));

        monitor
            .consume(&mut stream, ReadMode::Follow, &ShutdownToken::new())
            .await;

        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(monitor.report.lines, 1);
        assert!(monitor.report.error.as_deref().unwrap().contains("Input/output"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_reading() {
        let backend = Arc::new(RecordingBackend::new());
        let mut monitor = monitor(&backend, &[], 5);
        let mut stream = VecStream::lines(&["a", "b"]);
        let shutdown = ShutdownToken::new();
        shutdown.cancel();

        monitor.consume(&mut stream, ReadMode::Follow, &shutdown).await;

        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(monitor.report.lines, 0);
        assert!(monitor.report.error.is_none());
    }

    #[tokio::test]
    async fn test_run_missing_file_is_soft_failure() {
        let backend = Arc::new(RecordingBackend::new());
        let enforcer = Arc::new(Enforcer::new(
            Box::new(SharedBackend(Arc::clone(&backend))),
            Whitelist::default(),
        ));
        let monitor = SourceMonitor::new(
            source(PathBuf::from("/nonexistent/auth.log"), 5),
            Arc::new(OffenseLedger::new()),
            enforcer,
        )
        .unwrap();

        let report = monitor.run(ReadMode::ToEnd, ShutdownToken::new()).await;
        assert_eq!(report.state, MonitorState::Stopped);
        assert!(report.error.unwrap().contains("sshd"));
    }

    #[tokio::test]
    async fn test_run_one_shot_over_static_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", offense("10.0.0.7")).unwrap();
        writeln!(file, "host sshd[1]: Server listening on 0.0.0.0 port 22.").unwrap();
        writeln!(file, "{}", offense("10.0.0.8")).unwrap();

        let backend = Arc::new(RecordingBackend::new());
        let enforcer = Arc::new(Enforcer::new(
            Box::new(SharedBackend(Arc::clone(&backend))),
            Whitelist::default(),
        ));
        let monitor = SourceMonitor::new(
            source(file.path().to_path_buf(), 5),
            Arc::new(OffenseLedger::new()),
            enforcer,
        )
        .unwrap();

        let report = monitor.run(ReadMode::ToEnd, ShutdownToken::new()).await;
        assert_eq!(report.lines, 3);
        assert_eq!(report.offenses, 2);
        assert!(report.bans.is_empty());
        assert!(report.error.is_none());
        assert!(backend.ban_calls.lock().unwrap().is_empty());
    }
}
