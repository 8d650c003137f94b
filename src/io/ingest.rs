//! Sample ingestion boundary
//!
//! Parses JSON-lines positional samples into typed `(SubjectId, Coordinate)`
//! pairs. Malformed input is rejected or coerced here so the detector only
//! ever sees finite, in-range coordinates.

use crate::domain::types::{Coordinate, SubjectId};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use tracing::warn;

/// Timestamp that can be either ISO 8601 string or epoch milliseconds
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

impl TimestampValue {
    /// Convert to UTC, or None if absent or unparseable
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            TimestampValue::None => None,
            TimestampValue::IsoString(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            TimestampValue::EpochMs(ms) => {
                let ms = i64::try_from(*ms).ok()?;
                Utc.timestamp_millis_opt(ms).single()
            }
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            // Negative epochs are treated as missing
            match u64::try_from(value) {
                Ok(ms) => Ok(TimestampValue::EpochMs(ms)),
                Err(_) => Ok(TimestampValue::None),
            }
        }

        fn visit_f64<E>(self, value: f64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            if value.is_finite() && value >= 0.0 {
                Ok(TimestampValue::EpochMs(value as u64))
            } else {
                Ok(TimestampValue::None)
            }
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }

        fn visit_none<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Wire shape of one sample
#[derive(Debug, Deserialize)]
pub struct SampleRecord {
    pub subject_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: TimestampValue,
}

/// Why a sample line was rejected
#[derive(Debug)]
pub enum IngestError {
    /// Not valid JSON or missing required fields
    Malformed(serde_json::Error),
    EmptySubject,
    NonFiniteCoordinate { latitude: f64, longitude: f64 },
    LatitudeOutOfRange(f64),
    LongitudeOutOfRange(f64),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Malformed(e) => write!(f, "malformed sample: {e}"),
            IngestError::EmptySubject => f.write_str("empty subject_id"),
            IngestError::NonFiniteCoordinate { latitude, longitude } => {
                write!(f, "non-finite coordinate ({latitude}, {longitude})")
            }
            IngestError::LatitudeOutOfRange(v) => write!(f, "latitude {v} outside [-90, 90]"),
            IngestError::LongitudeOutOfRange(v) => write!(f, "longitude {v} outside [-180, 180]"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Malformed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        IngestError::Malformed(e)
    }
}

impl SampleRecord {
    /// Validate and convert into typed values
    pub fn into_sample(self) -> Result<(SubjectId, Coordinate), IngestError> {
        let subject = self.subject_id.trim();
        if subject.is_empty() {
            return Err(IngestError::EmptySubject);
        }
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err(IngestError::NonFiniteCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(IngestError::LatitudeOutOfRange(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(IngestError::LongitudeOutOfRange(self.longitude));
        }

        let timestamp = self.timestamp.to_utc();
        if timestamp.is_none() && self.timestamp != TimestampValue::None {
            warn!(subject = %subject, raw = ?self.timestamp, "sample_timestamp_unparseable");
        }

        let accuracy = self.accuracy.filter(|a| a.is_finite() && *a >= 0.0);

        Ok((
            SubjectId::new(subject),
            Coordinate { latitude: self.latitude, longitude: self.longitude, accuracy, timestamp },
        ))
    }
}

/// Parse one JSON line into a validated sample
pub fn parse_sample_line(line: &str) -> Result<(SubjectId, Coordinate), IngestError> {
    let record: SampleRecord = serde_json::from_str(line)?;
    record.into_sample()
}
