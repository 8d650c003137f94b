//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `detector` - Per-sample transition state machine
//! - `containment` - First-match region resolution
//! - `occupancy_store` - Per-subject occupancy records
//! - `subject_locks` - Per-subject serialization of read-modify-write
//! - `dispatcher` - Subject-sharded async sample workers
//! - `visit_summary` - Per-region visit counts and dwell
//! - `clock` - Processing-time source for untimestamped samples

pub mod clock;
pub mod containment;
pub mod detector;
pub mod dispatcher;
pub mod occupancy_store;
pub mod subject_locks;
pub mod visit_summary;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use detector::{DetectorConfig, ExitTimePolicy, TransitionDetector, Transitions};
pub use dispatcher::{FeedStats, SampleDispatcher};
pub use occupancy_store::{InMemoryOccupancyStore, OccupancyStore};
pub use visit_summary::{summarize_visits, PlaceVisitSummary, VisitLedger};
