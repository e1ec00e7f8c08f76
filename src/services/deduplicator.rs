//! Observation deduplication
//!
//! An LPR camera re-reads the same plate on nearly every frame while the
//! vehicle sits in view. The deduplicator passes the first observation of a
//! plate and suppresses repeats until a cooldown window has elapsed, so a
//! lingering vehicle does not generate spurious enter/exit toggles.
//!
//! The decision and the `last_accepted_at` update happen in one call, so two
//! observations for the same plate can never both pass within one window.

use crate::domain::types::PlateId;
use chrono::{DateTime, TimeDelta, Utc};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Entries older than this many cooldown windows are evicted on sweep
const RETENTION_WINDOWS: i32 = 8;

/// Suppresses repeated observations of the same plate within a cooldown window
pub struct Deduplicator {
    /// Last accepted observation time per plate
    last_accepted: FxHashMap<PlateId, DateTime<Utc>>,
    cooldown: TimeDelta,
}

impl Deduplicator {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            last_accepted: FxHashMap::default(),
            cooldown: TimeDelta::seconds(cooldown_secs as i64),
        }
    }

    /// Decide whether an observation passes through.
    ///
    /// Returns `true` for the first observation of a plate, or when at least
    /// the cooldown has elapsed since the last accepted one (inclusive
    /// boundary: exactly `cooldown` apart passes). On `true` the observation
    /// time is recorded as the new `last_accepted_at`.
    pub fn accept(&mut self, plate: &PlateId, observed_at: DateTime<Utc>) -> bool {
        if let Some(&last) = self.last_accepted.get(plate) {
            let elapsed = observed_at.signed_duration_since(last);
            if elapsed < self.cooldown {
                debug!(
                    plate = %plate,
                    elapsed_ms = %elapsed.num_milliseconds(),
                    "observation_suppressed"
                );
                return false;
            }
        }
        self.last_accepted.insert(plate.clone(), observed_at);
        true
    }

    /// Evict plates not accepted for several cooldown windows.
    ///
    /// The map would otherwise grow with every plate ever seen over a run;
    /// the pipeline calls this from its periodic tick.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let horizon = self.cooldown * RETENTION_WINDOWS;
        let before = self.last_accepted.len();
        self.last_accepted
            .retain(|_, &mut last| now.signed_duration_since(last) <= horizon);
        let evicted = before - self.last_accepted.len();
        if evicted > 0 {
            debug!(evicted = %evicted, remaining = %self.last_accepted.len(), "dedup_swept");
        }
        evicted
    }

    /// Number of plates currently tracked
    pub fn tracked_plates(&self) -> usize {
        self.last_accepted.len()
    }
}
