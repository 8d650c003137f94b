//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `ingest` - JSONL sample parsing and validation
//! - `registry` - Region registry snapshot loading
//! - `emitter` - Non-blocking event hand-off (bounded channel)
//! - `sink` - Transition event output to file (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod emitter;
pub mod ingest;
pub mod prometheus;
pub mod registry;
pub mod sink;

// Re-export commonly used types
pub use emitter::{create_event_channel, ChannelEmitter, EmitError, EventEmitter};
pub use ingest::{parse_sample_line, IngestError};
pub use prometheus::start_metrics_server;
pub use registry::RegionRegistry;
pub use sink::{run_sink, EventSink, JsonlEventSink};
