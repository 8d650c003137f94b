//! Shard dispatcher - routes samples to per-shard workers
//!
//! Samples are hashed by subject id onto one of N bounded queues. Each queue is
//! drained by a single tokio task, so one subject's samples are processed in
//! arrival order while different subjects proceed on other shards.

use crate::domain::types::{Coordinate, SubjectId};
use crate::infra::metrics::Metrics;
use crate::io::ingest::parse_sample_line;
use crate::io::registry::RegionRegistry;
use crate::services::detector::TransitionDetector;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A sample waiting for its shard worker
#[derive(Debug)]
pub struct SampleCmd {
    pub subject_id: SubjectId,
    pub point: Coordinate,
    /// When the sample was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

/// Single-shard worker
struct ShardWorker {
    shard: usize,
    rx: mpsc::Receiver<SampleCmd>,
    detector: Arc<TransitionDetector>,
    registry: Arc<RegionRegistry>,
}

impl ShardWorker {
    async fn run(mut self) {
        debug!(shard = %self.shard, "shard_worker_started");
        let mut processed = 0u64;

        while let Some(cmd) = self.rx.recv().await {
            let queue_delay_us = cmd.enqueued_at.elapsed().as_micros() as u64;
            if queue_delay_us > 100_000 {
                warn!(
                    shard = %self.shard,
                    subject = %cmd.subject_id,
                    queue_delay_us = %queue_delay_us,
                    "shard_queue_delay_high"
                );
            }

            let regions = self.registry.regions_for(&cmd.subject_id);
            self.detector.process_sample(&cmd.subject_id, &cmd.point, regions);
            processed += 1;
        }

        debug!(shard = %self.shard, processed = %processed, "shard_worker_stopped");
    }
}

/// Line counts from one input stream
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub lines: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Fan-out of samples across shard workers
pub struct SampleDispatcher {
    senders: Vec<mpsc::Sender<SampleCmd>>,
    handles: Vec<JoinHandle<()>>,
    metrics: Arc<Metrics>,
}

impl SampleDispatcher {
    /// Spawn `shards` workers (at least one) on the current tokio runtime
    pub fn start(
        detector: Arc<TransitionDetector>,
        registry: Arc<RegionRegistry>,
        metrics: Arc<Metrics>,
        shards: usize,
        queue_capacity: usize,
    ) -> Self {
        let shards = shards.max(1);
        let mut senders = Vec::with_capacity(shards);
        let mut handles = Vec::with_capacity(shards);

        for shard in 0..shards {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            let worker =
                ShardWorker { shard, rx, detector: detector.clone(), registry: registry.clone() };
            handles.push(tokio::spawn(worker.run()));
            senders.push(tx);
        }

        info!(shards = %shards, queue_capacity = %queue_capacity, "sample_dispatcher_started");
        Self { senders, handles, metrics }
    }

    pub fn shard_count(&self) -> usize {
        self.senders.len()
    }

    /// Shard index for a subject (stable for the dispatcher's lifetime)
    pub fn shard_for(&self, subject_id: &SubjectId) -> usize {
        let mut hasher = FxHasher::default();
        subject_id.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Enqueue a sample, waiting for room in the shard queue
    ///
    /// Returns false if the shard worker is gone.
    pub async fn dispatch(&self, subject_id: SubjectId, point: Coordinate) -> bool {
        let shard = self.shard_for(&subject_id);
        let cmd = SampleCmd { subject_id, point, enqueued_at: Instant::now() };
        match self.senders[shard].send(cmd).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(cmd)) => {
                warn!(shard = %shard, subject = %cmd.subject_id, "shard_closed_sample_dropped");
                self.metrics.record_sample_dropped();
                false
            }
        }
    }

    /// Parse JSONL samples from `reader` and dispatch them until EOF
    ///
    /// Blank lines are skipped; malformed lines are logged, counted and skipped.
    pub async fn feed<R: AsyncBufRead + Unpin>(&self, reader: R) -> std::io::Result<FeedStats> {
        let mut stats = FeedStats::default();
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            stats.lines += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match parse_sample_line(line) {
                Ok((subject_id, point)) => {
                    if self.dispatch(subject_id, point).await {
                        stats.accepted += 1;
                    }
                }
                Err(e) => {
                    stats.rejected += 1;
                    self.metrics.record_malformed_sample();
                    warn!(line_number = %stats.lines, error = %e, "sample_rejected");
                }
            }
        }

        info!(
            lines = %stats.lines,
            accepted = %stats.accepted,
            rejected = %stats.rejected,
            "sample_input_exhausted"
        );
        Ok(stats)
    }

    /// Close every queue and wait for the workers to drain them
    pub async fn shutdown(self) {
        let Self { senders, handles, .. } = self;
        drop(senders);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "shard_worker_join_failed");
            }
        }
        info!("sample_dispatcher_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Region, TransitionKind};
    use crate::io::emitter::create_event_channel;
    use crate::services::detector::DetectorConfig;
    use chrono::{Duration, TimeZone, Utc};

    fn setup(subjects: &[&str]) -> (Arc<TransitionDetector>, Arc<RegionRegistry>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let detector = Arc::new(TransitionDetector::new(DetectorConfig::default(), metrics.clone()));
        let mut registry = RegionRegistry::new();
        for subject in subjects {
            registry.insert(
                SubjectId::new(*subject),
                vec![Region::new("home", 40.0, -74.0, 100.0)],
            );
        }
        (detector, Arc::new(registry), metrics)
    }

    #[tokio::test]
    async fn test_same_subject_in_order() {
        let (_, registry, metrics) = setup(&["s1"]);
        let (emitter, mut rx) = create_event_channel(64);
        let detector = Arc::new(
            TransitionDetector::new(DetectorConfig::default(), metrics.clone())
                .with_emitter(Arc::new(emitter)),
        );

        let dispatcher = SampleDispatcher::start(detector, registry, metrics.clone(), 4, 16);
        let base = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        let subject = SubjectId::new("s1");

        // inside, outside, inside, outside
        for (i, lat) in [40.0, 40.02, 40.0, 40.02].into_iter().enumerate() {
            let point =
                Coordinate::new(lat, -74.0).with_timestamp(base + Duration::minutes(5 * i as i64));
            assert!(dispatcher.dispatch(subject.clone(), point).await);
        }
        dispatcher.shutdown().await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.event_type);
        }
        assert_eq!(
            kinds,
            vec![
                TransitionKind::Entry,
                TransitionKind::Exit,
                TransitionKind::Entry,
                TransitionKind::Exit
            ]
        );
        assert_eq!(metrics.samples_total(), 4);
    }

    #[tokio::test]
    async fn test_many_subjects_across_shards() {
        let names: Vec<String> = (0..32).map(|i| format!("s{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (detector, registry, metrics) = setup(&refs);

        let dispatcher =
            SampleDispatcher::start(detector.clone(), registry, metrics.clone(), 4, 64);
        for name in &names {
            let point = Coordinate::new(40.0, -74.0)
                .with_timestamp(Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap());
            dispatcher.dispatch(SubjectId::new(name.as_str()), point).await;
        }
        dispatcher.shutdown().await;

        assert_eq!(detector.occupied_subjects(), 32);
        assert_eq!(metrics.entries_total(), 32);
    }

    #[tokio::test]
    async fn test_shard_routing_is_stable() {
        let (detector, registry, metrics) = setup(&[]);
        let dispatcher = SampleDispatcher::start(detector, registry, metrics, 3, 4);

        assert_eq!(dispatcher.shard_count(), 3);
        let subject = SubjectId::new("elder-1");
        let shard = dispatcher.shard_for(&subject);
        assert!(shard < 3);
        assert_eq!(dispatcher.shard_for(&subject), shard);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_feed_parses_and_skips_bad_lines() {
        let (detector, registry, metrics) = setup(&["elder-1"]);
        let dispatcher =
            SampleDispatcher::start(detector.clone(), registry, metrics.clone(), 2, 8);

        let input = concat!(
            r#"{"subject_id":"elder-1","latitude":40.0,"longitude":-74.0,"timestamp":"2025-03-14T09:27:00Z"}"#,
            "\n",
            "\n",
            "garbage\n",
            r#"{"subject_id":"elder-1","latitude":95.0,"longitude":-74.0}"#,
            "\n",
        );
        let stats = dispatcher.feed(input.as_bytes()).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(stats, FeedStats { lines: 4, accepted: 1, rejected: 2 });
        assert_eq!(metrics.malformed_samples(), 2);
        assert!(detector.occupancy(&SubjectId::new("elder-1")).is_inside());
    }

    #[tokio::test]
    async fn test_zero_shards_clamped() {
        let (detector, registry, metrics) = setup(&[]);
        let dispatcher = SampleDispatcher::start(detector, registry, metrics, 0, 0);
        assert_eq!(dispatcher.shard_count(), 1);
        assert!(dispatcher.dispatch(SubjectId::new("s"), Coordinate::new(0.0, 0.0)).await);
        dispatcher.shutdown().await;
    }
}
