//! Shared types for the parking gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Instant;

/// Newtype wrapper for normalized plate identifiers to provide type safety
///
/// Plates arrive already cleaned by the upstream OCR layer: uppercase
/// alphanumeric plus space/dash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PlateId(pub String);

impl PlateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlateId {
    fn from(s: &str) -> Self {
        PlateId(s.to_string())
    }
}

/// Detector message structure for parsing
///
/// LPR cameras publish one message per processed frame, with zero or more
/// recognized plates.
#[derive(Debug, Deserialize)]
pub struct DetectorMessage {
    #[serde(default)]
    pub observations: Vec<WireObservation>,
}

#[derive(Debug, Deserialize)]
pub struct WireObservation {
    pub plate: String,
    /// Timestamp - can be RFC 3339 string or epoch milliseconds integer
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub ts: TimestampValue,
}

/// Timestamp that can be either RFC 3339 string or epoch milliseconds
#[derive(Debug, Clone, Default)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

impl TimestampValue {
    /// Resolve to a concrete UTC instant, falling back to `now` when the
    /// detector supplied nothing parseable.
    pub fn resolve(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimestampValue::EpochMs(ms) => {
                DateTime::<Utc>::from_timestamp_millis(*ms as i64).unwrap_or(now)
            }
            TimestampValue::IsoString(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or(now),
            TimestampValue::None => now,
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
            let epoch_ms = u64::try_from(value).unwrap_or(0);
            Ok(TimestampValue::EpochMs(epoch_ms))
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Operator command structure for parsing
///
/// Published on the commands topic by the (external) management UI.
#[derive(Debug, Deserialize)]
pub struct WireCommand {
    pub action: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub plate: Option<String>,
}

/// A single recognized-plate observation, one per detected plate per frame
#[derive(Debug, Clone)]
pub struct PlateObservation {
    pub plate: PlateId,
    pub observed_at: DateTime<Utc>,
    pub received_at: Instant,
}

/// Parsed event for internal processing
#[derive(Debug, Clone)]
pub enum InputEvent {
    /// A plate observation from the detection/OCR layer
    Observation(PlateObservation),
    /// Operator marked a session as paid
    MarkPaid { session_id: String },
    /// Operator manually closed the open session for a plate
    CloseSession { plate: PlateId, received_at: Instant },
}

impl InputEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InputEvent::Observation(_) => "observation",
            InputEvent::MarkPaid { .. } => "mark_paid",
            InputEvent::CloseSession { .. } => "close_session",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_resolve_epoch_ms() {
        let now = Utc::now();
        let ts = TimestampValue::EpochMs(1_767_630_090_048);
        let resolved = ts.resolve(now);
        assert_eq!(resolved.timestamp_millis(), 1_767_630_090_048);
    }

    #[test]
    fn test_timestamp_resolve_iso() {
        let now = Utc::now();
        let ts = TimestampValue::IsoString("2026-01-05T16:41:30.048+00:00".to_string());
        let resolved = ts.resolve(now);
        // 2026-01-05T16:41:30.048Z lands inside 2026
        assert!(resolved.timestamp_millis() > 1_767_000_000_000);
        assert!(resolved.timestamp_millis() < 1_800_000_000_000);
    }

    #[test]
    fn test_timestamp_resolve_fallback() {
        let now = Utc::now();
        assert_eq!(TimestampValue::None.resolve(now), now);
        let bad = TimestampValue::IsoString("not a timestamp".to_string());
        assert_eq!(bad.resolve(now), now);
    }

    #[test]
    fn test_plate_id_display() {
        let plate = PlateId::from("B1234XYZ");
        assert_eq!(plate.to_string(), "B1234XYZ");
        assert_eq!(plate.as_str(), "B1234XYZ");
    }
}
