//! Line streams over log files.
//!
//! Follow mode starts at the current end of the file and keeps waiting for
//! new lines, reopening the file after rotation or truncation. Snapshot mode
//! reads what the file holds right now and stops at end-of-file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use linemux::MuxedLines;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// How a source is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Block for new data forever
    Follow,
    /// Read existing contents, then stop
    ToEnd,
}

/// A lazy sequence of text lines.
#[async_trait]
pub trait LineStream: Send {
    /// Next line without its terminator, `None` once the stream is exhausted.
    async fn next_line(&mut self) -> Result<Option<String>>;
}

/// Open `path` in the given mode.
///
/// Missing or unreadable files are reported here rather than waited for.
pub async fn open_stream(path: &Path, mode: ReadMode) -> Result<Box<dyn LineStream>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Cannot open log file {:?}", path))?;
    if !metadata.is_file() {
        anyhow::bail!("Log path {:?} is not a regular file", path);
    }

    match mode {
        ReadMode::Follow => Ok(Box::new(FollowStream::open(path).await?)),
        ReadMode::ToEnd => Ok(Box::new(SnapshotStream::open(path).await?)),
    }
}

/// Follows a file across rotations (linemux)
pub struct FollowStream {
    lines: MuxedLines,
    skipped: u64,
}

impl FollowStream {
    pub async fn open(path: &Path) -> Result<Self> {
        // Probe readability up front; linemux would otherwise retry silently.
        File::open(path)
            .await
            .with_context(|| format!("Cannot open log file {:?}", path))?;

        let mut lines = MuxedLines::new().context("Failed to start file watcher")?;
        lines
            .add_file(path)
            .await
            .with_context(|| format!("Failed to watch {:?}", path))?;
        Ok(Self { lines, skipped: 0 })
    }
}

#[async_trait]
impl LineStream for FollowStream {
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            match self.lines.next_line().await {
                Ok(line) => return Ok(line.map(|l| l.line().to_string())),
                // The undecodable line is consumed; the stream continues after it
                Err(e) if e.kind() == ErrorKind::InvalidData => {
                    self.skipped += 1;
                    warn!("Skipped a log line that is not valid UTF-8 ({} so far)", self.skipped);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Reads a file once from the start
pub struct SnapshotStream {
    reader: BufReader<File>,
    buf: Vec<u8>,
}

impl SnapshotStream {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("Cannot open log file {:?}", path))?;
        Ok(Self {
            reader: BufReader::new(file),
            buf: Vec::new(),
        })
    }
}

#[async_trait]
impl LineStream for SnapshotStream {
    async fn next_line(&mut self) -> Result<Option<String>> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
            if self.buf.last() == Some(&b'\r') {
                self.buf.pop();
            }
        }
        // Log files are not guaranteed to be valid UTF-8
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}
