//! Parking session data model and billing arithmetic

use crate::domain::types::PlateId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Round a fee to two decimal places
#[inline]
pub fn round_fee(fee: f64) -> f64 {
    (fee * 100.0).round() / 100.0
}

/// A single parked-vehicle stay, from entry observation to exit observation
///
/// At most one session per plate may be open (no exit time) at any moment.
/// Sessions are never deleted, only closed - the store is an append-mostly
/// log of these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkingSession {
    /// UUIDv7 session ID (time-sortable)
    pub id: String,
    pub plate: PlateId,
    pub entry_time: DateTime<Utc>,
    /// None while the vehicle is still parked
    pub exit_time: Option<DateTime<Utc>>,
    /// Final fee, set on close, rounded to 2 decimal places
    pub fee: f64,
    pub paid: bool,
}

impl ParkingSession {
    /// Open a new session for a plate at the given entry time.
    ///
    /// # Example
    ///
    /// ```
    /// use parking_gateway::domain::session::ParkingSession;
    /// use parking_gateway::domain::types::PlateId;
    /// use chrono::Utc;
    ///
    /// let session = ParkingSession::open(PlateId::from("B1234XYZ"), Utc::now());
    /// assert!(session.is_open());
    /// assert_eq!(session.fee, 0.0);
    /// ```
    pub fn open(plate: PlateId, entry_time: DateTime<Utc>) -> Self {
        Self {
            id: new_uuid_v7(),
            plate,
            entry_time,
            exit_time: None,
            fee: 0.0,
            paid: false,
        }
    }

    /// Whether this session has no recorded exit time
    #[inline]
    pub fn is_open(&self) -> bool {
        self.exit_time.is_none()
    }

    /// Duration of the stay in hours, up to `until`
    pub fn duration_hours(&self, until: DateTime<Utc>) -> f64 {
        let elapsed_ms = until.signed_duration_since(self.entry_time).num_milliseconds();
        elapsed_ms as f64 / 3_600_000.0
    }

    /// Close the session at `exit_time`, computing the fee from the hourly
    /// rate. Returns the billed duration in hours.
    ///
    /// The fee is clamped to be non-negative (a clock skew that produces an
    /// exit before the entry bills zero) and rounded to 2 decimal places.
    pub fn close(&mut self, exit_time: DateTime<Utc>, rate_per_hour: f64) -> f64 {
        let duration_hours = self.duration_hours(exit_time);
        self.exit_time = Some(exit_time);
        self.fee = round_fee((duration_hours * rate_per_hour).max(0.0));
        duration_hours
    }
}

/// Outcome of a single toggle call - exactly one per accepted observation
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A vehicle entered: a fresh session was opened
    Opened(ParkingSession),
    /// A vehicle left: the open session was closed and billed
    Closed {
        session: ParkingSession,
        duration_hours: f64,
        fee: f64,
    },
}

impl SessionEvent {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEvent::Opened(_) => "session_opened",
            SessionEvent::Closed { .. } => "session_closed",
        }
    }

    /// The session this event refers to
    pub fn session(&self) -> &ParkingSession {
        match self {
            SessionEvent::Opened(session) => session,
            SessionEvent::Closed { session, .. } => session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn entry_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-10T10:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_open_session() {
        let session = ParkingSession::open(PlateId::from("B1234XYZ"), entry_time());

        assert!(!session.id.is_empty());
        assert_eq!(session.id.len(), 36); // UUIDv7 with hyphens
        assert_eq!(session.plate, PlateId::from("B1234XYZ"));
        assert!(session.is_open());
        assert_eq!(session.fee, 0.0);
        assert!(!session.paid);
    }

    #[test]
    fn test_close_half_hour_at_2000() {
        let mut session = ParkingSession::open(PlateId::from("B1234XYZ"), entry_time());
        let exit = entry_time() + TimeDelta::minutes(30);

        let duration = session.close(exit, 2000.0);

        assert!(!session.is_open());
        assert_eq!(session.exit_time, Some(exit));
        assert!((duration - 0.5).abs() < 1e-9);
        assert_eq!(session.fee, 1000.0);
    }

    #[test]
    fn test_close_at_entry_time_is_free() {
        let mut session = ParkingSession::open(PlateId::from("AA11"), entry_time());

        session.close(entry_time(), 2000.0);

        assert_eq!(session.fee, 0.0);
    }

    #[test]
    fn test_close_clamps_negative_duration() {
        let mut session = ParkingSession::open(PlateId::from("AA11"), entry_time());
        let skewed_exit = entry_time() - TimeDelta::minutes(5);

        session.close(skewed_exit, 2000.0);

        assert_eq!(session.fee, 0.0);
    }

    #[test]
    fn test_fee_monotonic_in_duration() {
        let mut previous = 0.0;
        for minutes in [1i64, 15, 30, 60, 90, 240, 600] {
            let mut session = ParkingSession::open(PlateId::from("AA11"), entry_time());
            session.close(entry_time() + TimeDelta::minutes(minutes), 2000.0);
            assert!(session.fee > previous, "fee must grow with duration");
            previous = session.fee;
        }
    }

    #[test]
    fn test_fee_rounded_to_cents() {
        let mut session = ParkingSession::open(PlateId::from("AA11"), entry_time());
        // 10 minutes at 2000/hr = 333.333...
        session.close(entry_time() + TimeDelta::minutes(10), 2000.0);
        assert_eq!(session.fee, 333.33);
    }

    #[test]
    fn test_session_event_accessors() {
        let session = ParkingSession::open(PlateId::from("AA11"), entry_time());
        let opened = SessionEvent::Opened(session.clone());
        assert_eq!(opened.as_str(), "session_opened");
        assert_eq!(opened.session().plate, session.plate);

        let closed = SessionEvent::Closed { session, duration_hours: 0.5, fee: 1000.0 };
        assert_eq!(closed.as_str(), "session_closed");
    }

    #[test]
    fn test_uuid_v7_generation() {
        let a = new_uuid_v7();
        let b = new_uuid_v7();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn test_round_fee() {
        assert_eq!(round_fee(333.3333), 333.33);
        assert_eq!(round_fee(0.005), 0.01);
        assert_eq!(round_fee(1000.0), 1000.0);
    }
}
