//! Typed channel for MQTT egress messages
//!
//! Provides a non-blocking way to send events to the MQTT publisher.
//! Uses bounded mpsc channels to prevent unbounded memory growth.

use crate::domain::session::{epoch_ms, ParkingSession, SessionEvent};
use crate::infra::metrics::{MetricsSummary, METRICS_NUM_BUCKETS};
use crate::services::occupancy::OccupancySnapshot;
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Session opened or closed
    Session(SessionPayload),
    /// Occupancy snapshot for live display
    Occupancy(OccupancyPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

/// Payload for session lifecycle events
#[derive(Debug, Clone, Serialize)]
pub struct SessionPayload {
    /// Lot identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Event type (session_opened, session_closed)
    pub event: String,
    /// Full session record
    pub session: ParkingSession,
    /// Billed duration in hours (on close)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_hours: Option<f64>,
}

impl SessionPayload {
    fn from_event(event: &SessionEvent) -> Self {
        let duration_hours = match event {
            SessionEvent::Opened(_) => None,
            SessionEvent::Closed { duration_hours, .. } => Some(*duration_hours),
        };
        Self {
            site: None,
            ts: epoch_ms(),
            event: event.as_str().to_string(),
            session: event.session().clone(),
            duration_hours,
        }
    }
}

/// Payload for occupancy snapshots
#[derive(Debug, Clone, Serialize)]
pub struct OccupancyPayload {
    /// Lot identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    /// Timestamp (epoch ms)
    pub ts: u64,
    pub occupied_slots: u32,
    pub total_slots: u32,
    pub free_slots: u32,
}

impl OccupancyPayload {
    fn from_snapshot(snapshot: OccupancySnapshot) -> Self {
        Self {
            site: None,
            ts: epoch_ms(),
            occupied_slots: snapshot.occupied_slots,
            total_slots: snapshot.total_slots,
            free_slots: snapshot.free_slots,
        }
    }
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    /// Lot identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Total observations processed
    pub observations_total: u64,
    /// Observations per second
    pub observations_per_sec: f64,
    /// Observations suppressed by dedup
    pub observations_suppressed: u64,
    /// Average processing latency (microseconds)
    pub avg_latency_us: u64,
    /// Max processing latency (microseconds)
    pub max_latency_us: u64,
    /// Processing latency histogram buckets (Prometheus-style exponential)
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    /// 50th percentile latency (µs)
    pub lat_p50_us: u64,
    /// 95th percentile latency (µs)
    pub lat_p95_us: u64,
    /// 99th percentile latency (µs)
    pub lat_p99_us: u64,
    /// Sessions opened
    pub sessions_opened: u64,
    /// Sessions closed
    pub sessions_closed: u64,
    /// Sessions marked paid
    pub sessions_paid: u64,
    /// Total fees billed (hundredths of the currency unit)
    pub fees_billed_cents: u64,
    /// Enters rejected at capacity
    pub capacity_rejections: u64,
    /// Exits rejected on an empty lot
    pub underflow_rejections: u64,
    /// Store write failures
    pub store_errors: u64,
    /// Ingest events dropped due to channel full
    pub ingest_events_dropped: u64,
    /// Current occupied slots
    pub occupied_slots: u64,
    /// Current open sessions
    pub open_sessions: u64,
    /// Current ingest queue depth (snapshot)
    pub event_queue_depth: u64,
}

impl MetricsPayload {
    /// Create a metrics payload from a summary with site info
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            observations_total: summary.observations_total,
            observations_per_sec: summary.observations_per_sec,
            observations_suppressed: summary.observations_suppressed,
            avg_latency_us: summary.avg_process_latency_us,
            max_latency_us: summary.max_process_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p50_us: summary.lat_p50_us,
            lat_p95_us: summary.lat_p95_us,
            lat_p99_us: summary.lat_p99_us,
            sessions_opened: summary.sessions_opened,
            sessions_closed: summary.sessions_closed,
            sessions_paid: summary.sessions_paid,
            fees_billed_cents: summary.fees_billed_cents,
            capacity_rejections: summary.capacity_rejections,
            underflow_rejections: summary.underflow_rejections,
            store_errors: summary.store_errors,
            ingest_events_dropped: summary.ingest_events_dropped,
            occupied_slots: summary.occupied_slots,
            open_sessions: summary.open_sessions,
            event_queue_depth: summary.event_queue_depth,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    /// Create a new sender from an mpsc sender
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Send a session lifecycle event for publishing.
    /// Injects site_id into the payload.
    /// Returns false if the channel was full and the message dropped.
    pub fn send_session_event(&self, event: &SessionEvent) -> bool {
        let mut payload = SessionPayload::from_event(event);
        payload.site = Some(self.site_id.clone());
        // Use try_send to avoid blocking - drop if channel full
        self.tx.try_send(EgressMessage::Session(payload)).is_ok()
    }

    /// Send an occupancy snapshot for live display.
    /// Injects site_id into the payload.
    pub fn send_occupancy(&self, snapshot: OccupancySnapshot) -> bool {
        let mut payload = OccupancyPayload::from_snapshot(snapshot);
        payload.site = Some(self.site_id.clone());
        self.tx.try_send(EgressMessage::Occupancy(payload)).is_ok()
    }

    /// Send a metrics snapshot
    pub fn send_metrics(&self, summary: MetricsSummary) -> bool {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        self.tx.try_send(EgressMessage::Metrics(payload)).is_ok()
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued.
/// site_id is stamped into every payload for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PlateId;
    use chrono::Utc;

    #[test]
    fn test_session_payload_carries_site_and_event() {
        let (sender, mut rx) = create_egress_channel(4, "lot-a".to_string());
        let session = ParkingSession::open(PlateId::from("B1234XYZ"), Utc::now());

        assert!(sender.send_session_event(&SessionEvent::Opened(session)));

        match rx.try_recv().unwrap() {
            EgressMessage::Session(payload) => {
                assert_eq!(payload.site.as_deref(), Some("lot-a"));
                assert_eq!(payload.event, "session_opened");
                assert!(payload.duration_hours.is_none());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_closed_session_payload_includes_duration() {
        let (sender, mut rx) = create_egress_channel(4, "lot-a".to_string());
        let mut session = ParkingSession::open(PlateId::from("B1"), Utc::now());
        let duration = session.close(Utc::now() + chrono::TimeDelta::minutes(30), 2000.0);

        let event = SessionEvent::Closed { fee: session.fee, session, duration_hours: duration };
        assert!(sender.send_session_event(&event));

        match rx.try_recv().unwrap() {
            EgressMessage::Session(payload) => {
                assert_eq!(payload.event, "session_closed");
                assert!((payload.duration_hours.unwrap() - 0.5).abs() < 1e-9);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sender, _rx) = create_egress_channel(1, "lot-a".to_string());
        let snapshot = OccupancySnapshot { occupied_slots: 1, total_slots: 2, free_slots: 1 };

        assert!(sender.send_occupancy(snapshot));
        assert!(!sender.send_occupancy(snapshot));
    }
}
