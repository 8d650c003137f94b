//! Exit-time estimation and dwell computation
//!
//! Positions are only known at discrete sample times, so the moment a subject
//! left a region is never observed directly. Two estimates are supported:
//!
//! - `FixedInterval`: exit = entry + (sample interval - margin). With a 5 minute
//!   interval and 1 minute margin an entry at 09:27 exits at 09:31, strictly
//!   before an entry derived from the 09:32 sample.
//! - `ObservedGap`: exit = current sample time - margin, never earlier than the
//!   last in-region sample. Tracks the real cadence when the source jitters.

use crate::domain::types::{ActiveVisit, SubjectOccupancy};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Expected cadence of the positional sample source
pub const DEFAULT_SAMPLE_INTERVAL_SECS: u64 = 5 * 60;

/// Gap kept between an estimated exit and the sample that revealed it
pub const DEFAULT_EXIT_MARGIN_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitTimePolicy {
    #[default]
    FixedInterval,
    ObservedGap,
}

impl ExitTimePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitTimePolicy::FixedInterval => "fixed_interval",
            ExitTimePolicy::ObservedGap => "observed_gap",
        }
    }
}

/// Tunables for the transition detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub sample_interval: Duration,
    pub exit_margin: Duration,
    pub exit_time_policy: ExitTimePolicy,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::seconds(DEFAULT_SAMPLE_INTERVAL_SECS as i64),
            exit_margin: Duration::seconds(DEFAULT_EXIT_MARGIN_SECS as i64),
            exit_time_policy: ExitTimePolicy::FixedInterval,
        }
    }
}

impl DetectorConfig {
    pub fn with_policy(mut self, policy: ExitTimePolicy) -> Self {
        self.exit_time_policy = policy;
        self
    }

    /// Estimated time the subject left `visit`, given the sample that showed it gone
    pub fn exit_timestamp(
        &self,
        prior: &SubjectOccupancy,
        visit: &ActiveVisit,
        sample_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match self.exit_time_policy {
            ExitTimePolicy::FixedInterval => {
                let offset = self
                    .sample_interval
                    .checked_sub(&self.exit_margin)
                    .unwrap_or(Duration::zero())
                    .max(Duration::zero());
                // Past the representable range the visit closes at its entry
                visit.entry_timestamp.checked_add_signed(offset).unwrap_or(visit.entry_timestamp)
            }
            ExitTimePolicy::ObservedGap => {
                let floor = prior
                    .last_seen_timestamp
                    .unwrap_or(visit.entry_timestamp)
                    .max(visit.entry_timestamp);
                sample_at.checked_sub_signed(self.exit_margin).unwrap_or(floor).max(floor)
            }
        }
    }
}

/// Dwell in whole minutes, rounded, never below 1
pub fn dwell_minutes(entry: DateTime<Utc>, exit: DateTime<Utc>) -> i64 {
    let ms = exit.signed_duration_since(entry).num_milliseconds();
    let minutes = (ms as f64 / 60_000.0).round() as i64;
    minutes.max(1)
}
