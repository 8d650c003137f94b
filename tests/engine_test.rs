//! End-to-end tests through the public library API

use chrono::{DateTime, TimeZone, Utc};
use geofence_engine::domain::{Coordinate, SubjectId, TransitionEvent, TransitionKind};
use geofence_engine::infra::Metrics;
use geofence_engine::io::{create_event_channel, run_sink, JsonlEventSink, RegionRegistry};
use geofence_engine::services::{
    summarize_visits, DetectorConfig, ManualClock, SampleDispatcher, TransitionDetector,
    VisitLedger,
};
use std::sync::Arc;
use tempfile::tempdir;

const REGISTRY: &str = r#"{
    "elder-1": [
        {"id": "home", "name": "Home", "latitude": 40.0, "longitude": -74.0, "radius_meters": 100},
        {"id": "pharmacy", "latitude": 40.01, "longitude": -74.0, "radius_meters": 100},
        {"id": "retired", "latitude": 40.02, "longitude": -74.0, "radius_meters": 100, "is_active": false}
    ]
}"#;

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, h, m, 0).unwrap()
}

#[test]
fn test_day_of_samples_from_registry() {
    let registry = RegionRegistry::from_json(REGISTRY, false).unwrap();
    let detector = TransitionDetector::new(DetectorConfig::default(), Arc::new(Metrics::new()));
    let subject = SubjectId::new("elder-1");
    let regions = registry.regions_for(&subject);

    let samples = [
        Coordinate::new(40.0, -74.0).with_timestamp(at(9, 27)),
        Coordinate::new(40.0, -74.0).with_timestamp(at(9, 32)),
        Coordinate::new(40.01, -74.0).with_timestamp(at(9, 37)),
        // inactive region is not loaded, so this is "outside"
        Coordinate::new(40.02, -74.0).with_timestamp(at(9, 42)),
    ];

    let events: Vec<TransitionEvent> = samples
        .iter()
        .flat_map(|sample| detector.process_sample(&subject, sample, regions))
        .collect();

    let summary: Vec<_> = events
        .iter()
        .map(|e| (e.event_type, e.region_id.as_str(), e.timestamp, e.duration_minutes))
        .collect();
    assert_eq!(
        summary,
        vec![
            (TransitionKind::Entry, "home", at(9, 27), None),
            (TransitionKind::Exit, "home", at(9, 31), Some(4)),
            (TransitionKind::Entry, "pharmacy", at(9, 37), None),
            (TransitionKind::Exit, "pharmacy", at(9, 41), Some(4)),
        ]
    );
    assert!(!detector.occupancy(&subject).is_inside());

    let places = summarize_visits(&events, None);
    assert_eq!(places.len(), 2);
    assert!(places.iter().all(|p| p.visits == 1 && p.total_minutes == 4));
}

#[test]
fn test_untimestamped_sample_uses_clock() {
    let registry = RegionRegistry::from_json(REGISTRY, false).unwrap();
    let metrics = Arc::new(Metrics::new());
    let detector = TransitionDetector::new(DetectorConfig::default(), metrics.clone())
        .with_clock(Arc::new(ManualClock::new(at(12, 0))));
    let subject = SubjectId::new("elder-1");

    let events = detector.process_sample(
        &subject,
        &Coordinate::new(40.0, -74.0),
        registry.regions_for(&subject),
    );

    assert_eq!(events[0].timestamp, at(12, 0));
    assert_eq!(metrics.clock_fallbacks(), 1);
}

#[tokio::test]
async fn test_pipeline_writes_event_log() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("events.jsonl");

    let metrics = Arc::new(Metrics::new());
    let ledger = Arc::new(VisitLedger::new());
    let (emitter, rx) = create_event_channel(64);
    let sink = tokio::spawn(run_sink(
        rx,
        JsonlEventSink::new(&log_path),
        metrics.clone(),
        Some(ledger.clone()),
    ));

    let detector = Arc::new(
        TransitionDetector::new(DetectorConfig::default(), metrics.clone())
            .with_emitter(Arc::new(emitter)),
    );
    let registry = Arc::new(RegionRegistry::from_json(REGISTRY, false).unwrap());
    let dispatcher = SampleDispatcher::start(detector.clone(), registry, metrics.clone(), 2, 16);

    let input = [
        r#"{"subject_id":"elder-1","latitude":40.0,"longitude":-74.0,"timestamp":"2025-03-14T09:27:00Z"}"#,
        r#"{"subject_id":"elder-1","latitude":40.018,"longitude":-74.0,"timestamp":"2025-03-14T09:32:00Z"}"#,
        r#"{"subject_id":"stranger","latitude":40.0,"longitude":-74.0,"timestamp":1741944420000}"#,
    ]
    .join("\n");
    let stats = dispatcher.feed(input.as_bytes()).await.unwrap();
    assert_eq!(stats.accepted, 3);

    dispatcher.shutdown().await;
    drop(detector);
    sink.await.unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    let events: Vec<TransitionEvent> =
        content.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, TransitionKind::Entry);
    assert_eq!(events[1].event_type, TransitionKind::Exit);
    assert_eq!(events[1].duration_minutes, Some(4));

    // subject with no registry entry never produces events
    assert_eq!(metrics.events_persisted(), 2);
    assert_eq!(ledger.summary_for(&SubjectId::new("elder-1"), None)[0].visits, 1);
    assert!(ledger.summary_for(&SubjectId::new("stranger"), None).is_empty());
}
