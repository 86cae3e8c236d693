#![forbid(unsafe_code)]

//! JSONL evidence for reconciliation decisions.
//!
//! Every governing-interval change produces one [`ReconcileEvidence`] record.
//! When an [`EvidenceSink`] is configured the record is written as a single
//! JSON line, in call order, so a run's re-arm history can be replayed or
//! diffed. Write failures are logged and otherwise ignored; diagnostics never
//! affect scheduling.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::interval::RefreshInterval;
use crate::reconcile::{ReconcileAction, ReconcileCause};

/// Destination for evidence JSONL output.
#[derive(Debug, Clone)]
pub enum EvidenceSinkDestination {
    /// Write to stdout.
    Stdout,
    /// Append to a file at the given path.
    File(PathBuf),
    /// Collect lines in memory (see [`EvidenceSink::lines`]).
    Memory,
}

/// Configuration for evidence logging.
#[derive(Debug, Clone)]
pub struct EvidenceSinkConfig {
    pub enabled: bool,
    pub destination: EvidenceSinkDestination,
    /// Flush after every line (recommended for tests/e2e capture).
    pub flush_on_write: bool,
}

impl Default for EvidenceSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            destination: EvidenceSinkDestination::Stdout,
            flush_on_write: true,
        }
    }
}

impl EvidenceSinkConfig {
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn enabled_stdout() -> Self {
        Self::default().with_enabled(true)
    }

    #[must_use]
    pub fn enabled_file(path: impl Into<PathBuf>) -> Self {
        Self::default()
            .with_enabled(true)
            .with_destination(EvidenceSinkDestination::File(path.into()))
    }

    #[must_use]
    pub fn enabled_memory() -> Self {
        Self::default()
            .with_enabled(true)
            .with_destination(EvidenceSinkDestination::Memory)
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: EvidenceSinkDestination) -> Self {
        self.destination = destination;
        self
    }

    #[must_use]
    pub fn with_flush_on_write(mut self, enabled: bool) -> Self {
        self.flush_on_write = enabled;
        self
    }
}

enum SinkTarget {
    Writer(BufWriter<Box<dyn Write + Send>>),
    Memory(Vec<String>),
}

struct EvidenceSinkInner {
    target: SinkTarget,
    flush_on_write: bool,
}

/// Shared, line-oriented JSONL sink.
#[derive(Clone)]
pub struct EvidenceSink {
    inner: Arc<Mutex<EvidenceSinkInner>>,
}

impl std::fmt::Debug for EvidenceSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceSink").finish_non_exhaustive()
    }
}

impl EvidenceSink {
    /// Build a sink from config. Returns `Ok(None)` when disabled.
    pub fn from_config(config: &EvidenceSinkConfig) -> io::Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let target = match &config.destination {
            EvidenceSinkDestination::Stdout => {
                SinkTarget::Writer(BufWriter::new(Box::new(io::stdout())))
            }
            EvidenceSinkDestination::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                SinkTarget::Writer(BufWriter::new(Box::new(file)))
            }
            EvidenceSinkDestination::Memory => SinkTarget::Memory(Vec::new()),
        };

        Ok(Some(Self {
            inner: Arc::new(Mutex::new(EvidenceSinkInner {
                target,
                flush_on_write: config.flush_on_write,
            })),
        }))
    }

    /// Write a single JSONL line.
    pub fn write_jsonl(&self, line: &str) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let flush = inner.flush_on_write;
        match &mut inner.target {
            SinkTarget::Writer(writer) => {
                writer.write_all(line.as_bytes())?;
                writer.write_all(b"\n")?;
                if flush {
                    writer.flush()?;
                }
            }
            SinkTarget::Memory(lines) => lines.push(line.to_owned()),
        }
        Ok(())
    }

    pub fn flush(&self) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &mut inner.target {
            SinkTarget::Writer(writer) => writer.flush(),
            SinkTarget::Memory(_) => Ok(()),
        }
    }

    /// Lines collected by a memory sink; empty for other destinations.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match &inner.target {
            SinkTarget::Memory(lines) => lines.clone(),
            SinkTarget::Writer(_) => Vec::new(),
        }
    }
}

/// One governing-interval change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileEvidence {
    /// Monotonic sequence number within the engine.
    pub seq: u64,
    pub cause: ReconcileCause,
    pub previous: Option<RefreshInterval>,
    pub next: Option<RefreshInterval>,
    pub action: ReconcileAction,
}

impl ReconcileEvidence {
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        let (period_ms, delay_ms) = match self.action {
            ReconcileAction::Armed { period } | ReconcileAction::TickNow { period } => {
                (Some(period), None)
            }
            ReconcileAction::CatchUp { period, delay } => (Some(period), Some(delay)),
            _ => (None, None),
        };
        format!(
            r#"{{"event":"timesync_reconcile","seq":{},"cause":"{}","previous":{},"next":{},"action":"{}","period_ms":{},"delay_ms":{}}}"#,
            self.seq,
            self.cause.as_str(),
            interval_json(self.previous),
            interval_json(self.next),
            self.action.as_str(),
            millis_json(period_ms),
            millis_json(delay_ms),
        )
    }
}

fn interval_json(interval: Option<RefreshInterval>) -> String {
    match interval {
        None => "null".to_owned(),
        Some(RefreshInterval::Idle) => r#""idle""#.to_owned(),
        Some(RefreshInterval::Every(ms)) => ms.to_string(),
    }
}

fn millis_json(d: Option<Duration>) -> String {
    d.map_or_else(|| "null".to_owned(), |d| d.as_millis().to_string())
}
