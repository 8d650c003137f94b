//! Transition event sink - persists emitted events
//!
//! Events are written in JSONL format (one JSON object per line) to the file
//! specified in config. The sink worker drains the emitter channel off the
//! detection path, so a slow disk never stalls sample processing.

use crate::domain::types::TransitionEvent;
use crate::infra::metrics::Metrics;
use crate::services::visit_summary::VisitLedger;
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Durable destination for transition events
#[async_trait]
pub trait EventSink: Send {
    async fn persist(&mut self, event: &TransitionEvent) -> anyhow::Result<()>;

    /// Flush buffered writes (default: nothing buffered)
    async fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Append-only JSONL event log
pub struct JsonlEventSink {
    path: PathBuf,
    file: Option<File>,
}

impl JsonlEventSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        info!(file_path = %path.display(), "event_sink_initialized");
        Self { path, file: None }
    }

    /// Open the file on first write, creating parent directories
    async fn file(&mut self) -> anyhow::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.with_context(|| {
                        format!("Failed to create event log directory {}", parent.display())
                    })?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .with_context(|| format!("Failed to open event log {}", self.path.display()))?;
            self.file = Some(file);
        }
        self.file.as_mut().context("event log not open")
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn persist(&mut self, event: &TransitionEvent) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(event).context("Failed to serialize event")?;
        line.push('\n');

        let file = self.file().await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(event_id = %event.event_id, bytes = %line.len(), "event_written");
        Ok(())
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.sync_data().await?;
        }
        Ok(())
    }
}

/// Drain the emitter channel into `sink` until every sender is dropped
///
/// Persistence failures are logged and counted; the event is not retried.
pub async fn run_sink<S: EventSink>(
    mut rx: mpsc::Receiver<TransitionEvent>,
    mut sink: S,
    metrics: Arc<Metrics>,
    ledger: Option<Arc<VisitLedger>>,
) {
    info!("event_sink_started");

    while let Some(event) = rx.recv().await {
        match sink.persist(&event).await {
            Ok(()) => {
                metrics.record_event_persisted();
                info!(
                    event_id = %event.event_id,
                    subject = %event.subject_id,
                    region = %event.region_id,
                    event_type = %event.event_type.as_str(),
                    "event_persisted"
                );
            }
            Err(e) => {
                metrics.record_persist_failure();
                error!(
                    event_id = %event.event_id,
                    subject = %event.subject_id,
                    error = %e,
                    "event_persist_failed"
                );
            }
        }

        if let Some(ledger) = ledger.as_ref() {
            ledger.record(&event);
        }
    }

    if let Err(e) = sink.flush().await {
        error!(error = %e, "event_sink_flush_failed");
    }
    info!("event_sink_stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Coordinate, RegionId, SubjectId};
    use crate::io::emitter::{create_event_channel, EventEmitter};
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::tempdir;

    fn entry() -> TransitionEvent {
        TransitionEvent::entry(
            SubjectId::new("elder-1"),
            RegionId::new("home"),
            Utc.with_ymd_and_hms(2025, 3, 14, 9, 27, 0).unwrap(),
            &Coordinate::new(40.0, -74.0),
        )
    }

    fn exit() -> TransitionEvent {
        TransitionEvent::exit(
            SubjectId::new("elder-1"),
            RegionId::new("home"),
            Utc.with_ymd_and_hms(2025, 3, 14, 9, 31, 0).unwrap(),
            &Coordinate::new(40.018, -74.0),
            4,
        )
    }

    /// Sink that always fails
    struct BrokenSink;

    #[async_trait]
    impl EventSink for BrokenSink {
        async fn persist(&mut self, _event: &TransitionEvent) -> anyhow::Result<()> {
            anyhow::bail!("disk on fire")
        }
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let mut sink = JsonlEventSink::new(&path);

        sink.persist(&entry()).await.unwrap();
        sink.persist(&exit()).await.unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(content.ends_with('\n'));

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event_type"], "entry");
        assert_eq!(first["region_id"], "home");
        let second: TransitionEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.duration_minutes, Some(4));
    }

    #[tokio::test]
    async fn test_run_sink_drains_channel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let metrics = Arc::new(Metrics::new());
        let ledger = Arc::new(VisitLedger::new());

        let (emitter, rx) = create_event_channel(8);
        emitter.emit(entry()).unwrap();
        emitter.emit(exit()).unwrap();
        drop(emitter);

        run_sink(rx, JsonlEventSink::new(&path), metrics.clone(), Some(ledger.clone())).await;

        assert_eq!(metrics.events_persisted(), 2);
        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn test_run_sink_counts_failures() {
        let metrics = Arc::new(Metrics::new());
        let (emitter, rx) = create_event_channel(8);
        emitter.emit(entry()).unwrap();
        drop(emitter);

        run_sink(rx, BrokenSink, metrics.clone(), None).await;

        assert_eq!(metrics.events_persisted(), 0);
        assert_eq!(metrics.persist_failures(), 1);
    }
}
