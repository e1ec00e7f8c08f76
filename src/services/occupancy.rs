//! Lot occupancy counter
//!
//! A guarded counter of occupied slots, bounded by the configured capacity.
//! It is driven in lock-step with session transitions (one increment per
//! open, one decrement per close) but holds no plate identity itself -
//! sessions carry identity and billing, this carries the aggregate count.
//!
//! Violating transitions are rejected with state unchanged, never clamped.

use serde::Serialize;
use tracing::{debug, warn};

/// Point-in-time occupancy view for the dashboard/egress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OccupancySnapshot {
    pub occupied_slots: u32,
    pub total_slots: u32,
    pub free_slots: u32,
}

/// Tracks occupied/total slots for the lot
pub struct OccupancyCounter {
    total_slots: u32,
    occupied_slots: u32,
}

impl OccupancyCounter {
    pub fn new(total_slots: u32) -> Self {
        Self { total_slots, occupied_slots: 0 }
    }

    /// Record vehicles entering. Succeeds iff the result stays within
    /// capacity; on failure the count is unchanged.
    pub fn try_enter(&mut self, amount: u32) -> bool {
        if self.occupied_slots + amount <= self.total_slots {
            self.occupied_slots += amount;
            debug!(occupied = %self.occupied_slots, free = %self.free_slots(), "vehicle_entered");
            true
        } else {
            warn!(
                occupied = %self.occupied_slots,
                total = %self.total_slots,
                amount = %amount,
                "lot_full"
            );
            false
        }
    }

    /// Record vehicles leaving. Succeeds iff the count stays non-negative;
    /// on failure the count is unchanged.
    pub fn try_exit(&mut self, amount: u32) -> bool {
        if self.occupied_slots >= amount {
            self.occupied_slots -= amount;
            debug!(occupied = %self.occupied_slots, free = %self.free_slots(), "vehicle_exited");
            true
        } else {
            warn!(
                occupied = %self.occupied_slots,
                amount = %amount,
                "occupancy_underflow"
            );
            false
        }
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.occupied_slots >= self.total_slots
    }

    #[inline]
    pub fn free_slots(&self) -> u32 {
        self.total_slots - self.occupied_slots
    }

    #[inline]
    pub fn occupied_slots(&self) -> u32 {
        self.occupied_slots
    }

    #[inline]
    pub fn total_slots(&self) -> u32 {
        self.total_slots
    }

    pub fn snapshot(&self) -> OccupancySnapshot {
        OccupancySnapshot {
            occupied_slots: self.occupied_slots,
            total_slots: self.total_slots,
            free_slots: self.free_slots(),
        }
    }
}
