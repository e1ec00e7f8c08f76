//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `pipeline` - Central event orchestrator, serializes all plate decisions
//! - `ledger` - Session lifecycle (open/close toggle, billing, mark-paid)
//! - `deduplicator` - Suppresses repeated plate reads within a cooldown
//! - `occupancy` - Guarded slot counter for the lot

pub mod deduplicator;
pub mod ledger;
pub mod occupancy;
pub mod pipeline;

// Re-export commonly used types
pub use deduplicator::Deduplicator;
pub use ledger::{LedgerError, SessionLedger};
pub use occupancy::{OccupancyCounter, OccupancySnapshot};
pub use pipeline::Pipeline;
