//! Session ledger - the entry/exit state machine
//!
//! A single observation stream drives both directions: a toggle opens a
//! session when the plate has none open, and closes (and bills) the open one
//! otherwise. Deduplication is the caller's responsibility; every call here
//! is assumed to be a genuine toggle.
//!
//! All calls are serialized by the pipeline task, which is what upholds the
//! single-open-session invariant across the lookup-then-write sequence.

use crate::domain::session::{ParkingSession, SessionEvent};
use crate::domain::types::PlateId;
use crate::io::store::{SessionStore, StoreError};
use chrono::{DateTime, Utc};
use tracing::info;

/// Ledger operation failure
#[derive(Debug)]
pub enum LedgerError {
    /// A close was requested for a plate with no open session
    NoOpenSession(PlateId),
    /// A session id referenced by an operator command does not exist
    SessionNotFound(String),
    /// The store is unreachable; the caller must not assume the toggle
    /// took effect
    Store(StoreError),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::NoOpenSession(plate) => {
                write!(f, "no open session for plate {}", plate)
            }
            LedgerError::SessionNotFound(id) => write!(f, "session {} not found", id),
            LedgerError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        LedgerError::Store(e)
    }
}

/// Owns all session records; the sole mutator of `ParkingSession` state
pub struct SessionLedger {
    store: Box<dyn SessionStore>,
}

impl SessionLedger {
    pub fn new(store: Box<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Apply one accepted observation: open a session if the plate has none
    /// open, close and bill the open one otherwise.
    ///
    /// Exactly one of `Opened`/`Closed` is returned per call. The store
    /// write happens before the event is emitted, so a `Store` error means
    /// no transition took place.
    pub fn toggle(
        &mut self,
        plate: &PlateId,
        observed_at: DateTime<Utc>,
        rate_per_hour: f64,
    ) -> Result<SessionEvent, LedgerError> {
        match self.store.find_open(plate)? {
            None => {
                let session = ParkingSession::open(plate.clone(), observed_at);
                self.store.insert(&session)?;
                info!(
                    plate = %plate,
                    session_id = %session.id,
                    entry_time = %session.entry_time,
                    "session_opened"
                );
                Ok(SessionEvent::Opened(session))
            }
            Some(mut session) => {
                let duration_hours = session.close(observed_at, rate_per_hour);
                self.store.update(&session)?;
                let fee = session.fee;
                info!(
                    plate = %plate,
                    session_id = %session.id,
                    duration_hours = format!("{:.3}", duration_hours),
                    fee = %fee,
                    "session_closed"
                );
                Ok(SessionEvent::Closed { session, duration_hours, fee })
            }
        }
    }

    /// Manually close the open session for a plate (operator command).
    ///
    /// Unlike `toggle`, this never opens: a plate with no open session is a
    /// `NoOpenSession` failure.
    pub fn close(
        &mut self,
        plate: &PlateId,
        at: DateTime<Utc>,
        rate_per_hour: f64,
    ) -> Result<SessionEvent, LedgerError> {
        match self.store.find_open(plate)? {
            None => Err(LedgerError::NoOpenSession(plate.clone())),
            Some(_) => self.toggle(plate, at, rate_per_hour),
        }
    }

    /// Mark a session as paid. Missing ids are a no-op failure, never fatal.
    pub fn mark_paid(&mut self, session_id: &str) -> Result<ParkingSession, LedgerError> {
        let Some(mut session) = self.store.get(session_id)? else {
            return Err(LedgerError::SessionNotFound(session_id.to_string()));
        };
        session.paid = true;
        self.store.update(&session)?;
        info!(session_id = %session.id, plate = %session.plate, "session_marked_paid");
        Ok(session)
    }

    /// Open sessions, most recent entry first
    pub fn list_open(&self) -> Result<Vec<ParkingSession>, LedgerError> {
        Ok(self.store.list_open()?)
    }

    /// All sessions, most recent first, bounded by `limit`
    pub fn history(&self, limit: usize) -> Result<Vec<ParkingSession>, LedgerError> {
        Ok(self.store.history(limit)?)
    }

    /// Number of currently open sessions
    pub fn open_count(&self) -> usize {
        self.store.list_open().map(|open| open.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::store::MemoryStore;
    use chrono::TimeDelta;

    const RATE: f64 = 2000.0;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-10T10:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn ledger() -> SessionLedger {
        SessionLedger::new(Box::new(MemoryStore::new()))
    }

    #[test]
    fn test_first_toggle_opens() {
        let mut ledger = ledger();
        let plate = PlateId::from("B1234XYZ");

        let event = ledger.toggle(&plate, t0(), RATE).unwrap();

        match event {
            SessionEvent::Opened(session) => {
                assert_eq!(session.entry_time, t0());
                assert!(session.is_open());
            }
            SessionEvent::Closed { .. } => panic!("expected Opened"),
        }
        assert_eq!(ledger.list_open().unwrap().len(), 1);
    }

    #[test]
    fn test_second_toggle_closes_and_bills() {
        let mut ledger = ledger();
        let plate = PlateId::from("B1234XYZ");

        ledger.toggle(&plate, t0(), RATE).unwrap();
        let event = ledger.toggle(&plate, t0() + TimeDelta::minutes(30), RATE).unwrap();

        match event {
            SessionEvent::Closed { session, duration_hours, fee } => {
                assert!((duration_hours - 0.5).abs() < 1e-9);
                assert_eq!(fee, 1000.0);
                assert!(!session.is_open());
            }
            SessionEvent::Opened(_) => panic!("expected Closed"),
        }
        assert!(ledger.list_open().unwrap().is_empty());
    }

    #[test]
    fn test_toggles_strictly_alternate() {
        let mut ledger = ledger();
        let plate = PlateId::from("AA11");

        for i in 0..6 {
            let at = t0() + TimeDelta::minutes(10 * i);
            let event = ledger.toggle(&plate, at, RATE).unwrap();
            if i % 2 == 0 {
                assert!(matches!(event, SessionEvent::Opened(_)), "toggle {} should open", i);
            } else {
                assert!(matches!(event, SessionEvent::Closed { .. }), "toggle {} should close", i);
            }
            // Never more than one open session for the plate
            let open_for_plate = ledger
                .list_open()
                .unwrap()
                .iter()
                .filter(|s| s.plate == plate)
                .count();
            assert!(open_for_plate <= 1);
        }
    }

    #[test]
    fn test_plates_do_not_interfere() {
        let mut ledger = ledger();

        ledger.toggle(&PlateId::from("AA11"), t0(), RATE).unwrap();
        ledger.toggle(&PlateId::from("BB22"), t0() + TimeDelta::minutes(1), RATE).unwrap();

        // Closing AA11 leaves BB22 open
        ledger.toggle(&PlateId::from("AA11"), t0() + TimeDelta::minutes(5), RATE).unwrap();
        let open = ledger.list_open().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].plate, PlateId::from("BB22"));
    }

    #[test]
    fn test_reentry_opens_fresh_session() {
        let mut ledger = ledger();
        let plate = PlateId::from("AA11");

        ledger.toggle(&plate, t0(), RATE).unwrap();
        ledger.toggle(&plate, t0() + TimeDelta::minutes(30), RATE).unwrap();
        let event = ledger.toggle(&plate, t0() + TimeDelta::hours(2), RATE).unwrap();

        match event {
            SessionEvent::Opened(session) => {
                assert_eq!(session.entry_time, t0() + TimeDelta::hours(2));
                assert_eq!(session.fee, 0.0);
            }
            SessionEvent::Closed { .. } => panic!("expected a fresh Opened"),
        }
        assert_eq!(ledger.history(10).unwrap().len(), 2);
    }

    #[test]
    fn test_manual_close_without_open_session() {
        let mut ledger = ledger();

        let err = ledger.close(&PlateId::from("GHOST"), t0(), RATE).unwrap_err();
        assert!(matches!(err, LedgerError::NoOpenSession(_)));
    }

    #[test]
    fn test_manual_close_bills_like_toggle() {
        let mut ledger = ledger();
        let plate = PlateId::from("AA11");

        ledger.toggle(&plate, t0(), RATE).unwrap();
        let event = ledger.close(&plate, t0() + TimeDelta::hours(1), RATE).unwrap();

        match event {
            SessionEvent::Closed { fee, .. } => assert_eq!(fee, 2000.0),
            SessionEvent::Opened(_) => panic!("expected Closed"),
        }
    }

    #[test]
    fn test_mark_paid() {
        let mut ledger = ledger();
        let plate = PlateId::from("AA11");

        let opened = ledger.toggle(&plate, t0(), RATE).unwrap();
        let id = opened.session().id.clone();
        ledger.toggle(&plate, t0() + TimeDelta::minutes(30), RATE).unwrap();

        let paid = ledger.mark_paid(&id).unwrap();
        assert!(paid.paid);

        let history = ledger.history(10).unwrap();
        assert!(history[0].paid);
    }

    #[test]
    fn test_mark_paid_unknown_id_fails_without_state_change() {
        let mut ledger = ledger();
        ledger.toggle(&PlateId::from("AA11"), t0(), RATE).unwrap();

        let err = ledger.mark_paid("no-such-id").unwrap_err();
        assert!(matches!(err, LedgerError::SessionNotFound(_)));
        assert!(!ledger.history(10).unwrap()[0].paid);
    }

    #[test]
    fn test_history_most_recent_first() {
        let mut ledger = ledger();

        ledger.toggle(&PlateId::from("P1"), t0(), RATE).unwrap();
        ledger.toggle(&PlateId::from("P2"), t0() + TimeDelta::minutes(1), RATE).unwrap();
        ledger.toggle(&PlateId::from("P3"), t0() + TimeDelta::minutes(2), RATE).unwrap();

        let history = ledger.history(2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].plate, PlateId::from("P3"));
        assert_eq!(history[1].plate, PlateId::from("P2"));
    }

    /// Store stub that fails every write, for StoreUnavailable propagation
    struct DownStore;

    impl SessionStore for DownStore {
        fn insert(&mut self, _: &ParkingSession) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk gone".to_string()))
        }
        fn update(&mut self, _: &ParkingSession) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk gone".to_string()))
        }
        fn find_open(&self, _: &PlateId) -> Result<Option<ParkingSession>, StoreError> {
            Ok(None)
        }
        fn get(&self, _: &str) -> Result<Option<ParkingSession>, StoreError> {
            Ok(None)
        }
        fn list_open(&self) -> Result<Vec<ParkingSession>, StoreError> {
            Ok(Vec::new())
        }
        fn history(&self, _: usize) -> Result<Vec<ParkingSession>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_store_failure_propagates() {
        let mut ledger = SessionLedger::new(Box::new(DownStore));

        let err = ledger.toggle(&PlateId::from("AA11"), t0(), RATE).unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
        // No transition is visible after a failed write
        assert_eq!(ledger.open_count(), 0);
    }
}
