//! Observation pipeline and event orchestration
//!
//! The Pipeline is the central event processor that coordinates:
//! - Deduplication (suppressing repeated reads of a lingering plate)
//! - Session lifecycle (toggle open/close, billing, persistence)
//! - Occupancy tracking (guarded slot counter, driven in lock-step)
//! - Egress publishing (session events and occupancy snapshots)
//!
//! All events from ingest flow through this single task, which serializes
//! every per-plate decision: no two observations of the same plate are ever
//! in flight concurrently.

use crate::domain::types::{InputEvent, PlateObservation};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::EgressSender;
use crate::io::store::SessionStore;
use crate::services::deduplicator::Deduplicator;
use crate::services::ledger::{LedgerError, SessionLedger};
use crate::services::occupancy::OccupancyCounter;
use crate::domain::session::SessionEvent;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{error, warn};

/// Central event processor for session tracking and occupancy
pub struct Pipeline {
    /// Suppresses repeated plate reads within the cooldown window
    pub(crate) dedup: Deduplicator,
    /// Owns session state and billing
    pub(crate) ledger: SessionLedger,
    /// Guarded slot counter
    pub(crate) occupancy: OccupancyCounter,
    /// Application configuration
    pub(crate) config: Config,
    /// Metrics collector
    pub(crate) metrics: Arc<Metrics>,
    /// MQTT egress sender (optional)
    pub(crate) egress_sender: Option<EgressSender>,
    /// Occupancy changed since the last published snapshot
    occupancy_dirty: bool,
}

impl Pipeline {
    /// Create a new Pipeline with the given configuration and dependencies
    pub fn new(
        config: Config,
        store: Box<dyn SessionStore>,
        metrics: Arc<Metrics>,
        egress_sender: Option<EgressSender>,
    ) -> Self {
        let dedup = Deduplicator::new(config.cooldown_secs());
        let ledger = SessionLedger::new(store);
        let occupancy = OccupancyCounter::new(config.total_slots());
        Self { dedup, ledger, occupancy, config, metrics, egress_sender, occupancy_dirty: true }
    }

    /// Seed the occupancy counter from sessions left open in the store.
    ///
    /// Called once after startup replay so the counter survives restarts
    /// along with the ledger.
    pub fn restore_occupancy(&mut self) {
        let open = self.ledger.open_count() as u32;
        if open > 0 && !self.occupancy.try_enter(open) {
            warn!(
                open_sessions = %open,
                total_slots = %self.occupancy.total_slots(),
                "restored_sessions_exceed_capacity"
            );
        }
        self.metrics.set_occupied_slots(self.occupancy.occupied_slots() as u64);
        self.metrics.set_open_sessions(open as u64);
    }

    /// Start the pipeline, consuming events from the channel
    pub async fn run(&mut self, mut event_rx: mpsc::Receiver<InputEvent>) {
        // 1 second tick for occupancy snapshot publishing
        let mut tick_interval = interval(Duration::from_secs(1));
        let mut sweep_interval =
            interval(Duration::from_secs(self.config.sweep_interval_secs().max(1)));

        loop {
            tokio::select! {
                // Process incoming events
                event = event_rx.recv() => {
                    match event {
                        Some(e) => self.handle_event(e),
                        None => break, // Channel closed
                    }
                }
                // Publish occupancy when it changed
                _ = tick_interval.tick() => {
                    self.publish_occupancy_if_dirty();
                }
                // Evict stale plates from the dedup map
                _ = sweep_interval.tick() => {
                    self.dedup.sweep(Utc::now());
                    self.metrics.set_dedup_tracked_plates(self.dedup.tracked_plates() as u64);
                }
            }
        }
    }

    /// Process a single event, dispatching to the appropriate handler
    pub fn handle_event(&mut self, event: InputEvent) {
        let process_start = Instant::now();

        match event {
            InputEvent::Observation(obs) => {
                self.handle_observation(&obs);
                let latency_us = process_start.elapsed().as_micros() as u64;
                self.metrics.record_observation_processed(latency_us);
            }
            InputEvent::MarkPaid { session_id } => {
                self.handle_mark_paid(&session_id);
            }
            InputEvent::CloseSession { plate, .. } => {
                match self.ledger.close(&plate, Utc::now(), self.config.rate_per_hour()) {
                    Ok(event) => self.apply_transition(&event),
                    Err(LedgerError::NoOpenSession(plate)) => {
                        warn!(plate = %plate, "close_command_no_open_session");
                    }
                    Err(e) => self.handle_ledger_error(e),
                }
            }
        }
    }

    /// Dedup, toggle the ledger, and drive occupancy in lock-step
    fn handle_observation(&mut self, obs: &PlateObservation) {
        if !self.dedup.accept(&obs.plate, obs.observed_at) {
            self.metrics.record_observation_suppressed();
            return;
        }

        match self.ledger.toggle(&obs.plate, obs.observed_at, self.config.rate_per_hour()) {
            Ok(event) => self.apply_transition(&event),
            Err(e) => self.handle_ledger_error(e),
        }
    }

    /// Apply a session transition to occupancy, metrics, and egress.
    ///
    /// Occupancy rejections are recorded but never roll the session back;
    /// the ledger is the source of truth and the counter may drift until
    /// the lot empties.
    fn apply_transition(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Opened(_) => {
                self.metrics.record_session_opened();
                if !self.occupancy.try_enter(1) {
                    self.metrics.record_capacity_rejection();
                } else {
                    self.occupancy_dirty = true;
                }
            }
            SessionEvent::Closed { fee, .. } => {
                self.metrics.record_session_closed(*fee);
                if !self.occupancy.try_exit(1) {
                    self.metrics.record_underflow_rejection();
                } else {
                    self.occupancy_dirty = true;
                }
            }
        }

        self.metrics.set_occupied_slots(self.occupancy.occupied_slots() as u64);
        self.metrics.set_open_sessions(self.ledger.open_count() as u64);

        if let Some(ref sender) = self.egress_sender {
            if !sender.send_session_event(event) {
                self.metrics.record_egress_message_dropped();
            }
        }
    }

    fn handle_mark_paid(&mut self, session_id: &str) {
        match self.ledger.mark_paid(session_id) {
            Ok(_) => self.metrics.record_session_paid(),
            Err(LedgerError::SessionNotFound(id)) => {
                warn!(session_id = %id, "mark_paid_unknown_session");
            }
            Err(e) => self.handle_ledger_error(e),
        }
    }

    fn handle_ledger_error(&self, e: LedgerError) {
        if matches!(e, LedgerError::Store(_)) {
            self.metrics.record_store_error();
        }
        error!(error = %e, "ledger_operation_failed");
    }

    fn publish_occupancy_if_dirty(&mut self) {
        if !self.occupancy_dirty {
            return;
        }
        if let Some(ref sender) = self.egress_sender {
            if !sender.send_occupancy(self.occupancy.snapshot()) {
                self.metrics.record_egress_message_dropped();
                return; // Stay dirty, retry next tick
            }
        }
        self.occupancy_dirty = false;
    }

    /// Current number of open sessions
    pub fn open_sessions(&self) -> usize {
        self.ledger.open_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PlateId;
    use crate::io::egress_channel::{create_egress_channel, EgressMessage};
    use crate::io::store::MemoryStore;
    use chrono::{DateTime, TimeDelta};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-10T10:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn observation(plate: &str, at: DateTime<Utc>) -> InputEvent {
        InputEvent::Observation(PlateObservation {
            plate: PlateId::from(plate),
            observed_at: at,
            received_at: Instant::now(),
        })
    }

    fn pipeline(config: Config) -> Pipeline {
        Pipeline::new(config, Box::new(MemoryStore::new()), Arc::new(Metrics::new()), None)
    }

    #[test]
    fn test_observation_opens_then_closes() {
        let mut pipeline = pipeline(Config::default());

        pipeline.handle_event(observation("B1234XYZ", t0()));
        assert_eq!(pipeline.open_sessions(), 1);
        assert_eq!(pipeline.occupancy.occupied_slots(), 1);

        pipeline.handle_event(observation("B1234XYZ", t0() + TimeDelta::minutes(30)));
        assert_eq!(pipeline.open_sessions(), 0);
        assert_eq!(pipeline.occupancy.occupied_slots(), 0);
    }

    #[test]
    fn test_duplicate_burst_collapses_to_one_transition() {
        let mut pipeline = pipeline(Config::default());

        // Camera re-reads the plate every 2 seconds while the car sits in view
        for i in 0..3 {
            pipeline.handle_event(observation("B1234XYZ", t0() + TimeDelta::seconds(2 * i)));
        }

        assert_eq!(pipeline.open_sessions(), 1);
        assert_eq!(pipeline.occupancy.occupied_slots(), 1);
        assert_eq!(pipeline.metrics.observations_suppressed(), 2);
    }

    #[test]
    fn test_full_lot_session_still_opens() {
        let config = Config::default().with_total_slots(1);
        let mut pipeline = pipeline(config);

        pipeline.handle_event(observation("AA11", t0()));
        pipeline.handle_event(observation("BB22", t0() + TimeDelta::seconds(1)));

        // Second session opened even though the counter rejected the enter
        assert_eq!(pipeline.open_sessions(), 2);
        assert_eq!(pipeline.occupancy.occupied_slots(), 1);
        let summary = pipeline.metrics.report();
        assert_eq!(summary.capacity_rejections, 1);
        assert_eq!(summary.sessions_opened, 2);
    }

    #[test]
    fn test_close_command_exits_without_reopening() {
        let mut pipeline = pipeline(Config::default());

        pipeline.handle_event(observation("AA11", t0()));
        pipeline.handle_event(InputEvent::CloseSession {
            plate: PlateId::from("AA11"),
            received_at: Instant::now(),
        });

        assert_eq!(pipeline.open_sessions(), 0);
        assert_eq!(pipeline.occupancy.occupied_slots(), 0);

        // Close against an empty lot is a warning, not a new session
        pipeline.handle_event(InputEvent::CloseSession {
            plate: PlateId::from("AA11"),
            received_at: Instant::now(),
        });
        assert_eq!(pipeline.open_sessions(), 0);
    }

    #[test]
    fn test_mark_paid_command() {
        let mut pipeline = pipeline(Config::default());

        pipeline.handle_event(observation("AA11", t0()));
        pipeline.handle_event(observation("AA11", t0() + TimeDelta::minutes(30)));

        let closed = pipeline.ledger.history(1).unwrap();
        let id = closed[0].id.clone();
        pipeline.handle_event(InputEvent::MarkPaid { session_id: id.clone() });

        let paid = pipeline.ledger.history(1).unwrap();
        assert!(paid[0].paid);
        assert_eq!(pipeline.metrics.report().sessions_paid, 1);
    }

    #[test]
    fn test_mark_paid_unknown_id_is_nonfatal() {
        let mut pipeline = pipeline(Config::default());

        pipeline.handle_event(InputEvent::MarkPaid { session_id: "no-such-id".to_string() });
        assert_eq!(pipeline.metrics.report().sessions_paid, 0);
    }

    #[test]
    fn test_session_events_published_to_egress() {
        let (sender, mut rx) = create_egress_channel(8, "lot-a".to_string());
        let mut pipeline = Pipeline::new(
            Config::default(),
            Box::new(MemoryStore::new()),
            Arc::new(Metrics::new()),
            Some(sender),
        );

        pipeline.handle_event(observation("AA11", t0()));
        pipeline.handle_event(observation("AA11", t0() + TimeDelta::minutes(30)));

        match rx.try_recv().unwrap() {
            EgressMessage::Session(p) => assert_eq!(p.event, "session_opened"),
            other => panic!("unexpected message: {:?}", other),
        }
        match rx.try_recv().unwrap() {
            EgressMessage::Session(p) => {
                assert_eq!(p.event, "session_closed");
                assert_eq!(p.session.fee, 1000.0);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_occupancy_published_once_per_dirty_tick() {
        let (sender, mut rx) = create_egress_channel(8, "lot-a".to_string());
        let mut pipeline = Pipeline::new(
            Config::default(),
            Box::new(MemoryStore::new()),
            Arc::new(Metrics::new()),
            Some(sender),
        );

        pipeline.handle_event(observation("AA11", t0()));
        rx.try_recv().unwrap(); // session_opened

        pipeline.publish_occupancy_if_dirty();
        match rx.try_recv().unwrap() {
            EgressMessage::Occupancy(p) => assert_eq!(p.occupied_slots, 1),
            other => panic!("unexpected message: {:?}", other),
        }

        // Unchanged occupancy is not republished
        pipeline.publish_occupancy_if_dirty();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_restore_occupancy_from_replayed_store() {
        let mut store = MemoryStore::new();
        // Two sessions left open, as after a crash mid-day
        for plate in ["AA11", "BB22"] {
            let session =
                crate::domain::session::ParkingSession::open(PlateId::from(plate), t0());
            store.insert(&session).unwrap();
        }

        let mut pipeline = Pipeline::new(
            Config::default(),
            Box::new(store),
            Arc::new(Metrics::new()),
            None,
        );
        pipeline.restore_occupancy();

        assert_eq!(pipeline.occupancy.occupied_slots(), 2);
        assert_eq!(pipeline.open_sessions(), 2);
    }
}
