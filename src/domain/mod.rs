//! Domain models - core business types for the parking gateway
//!
//! This module contains the canonical data types used throughout the system:
//! - `ParkingSession` - the primary business entity (one parked-vehicle stay)
//! - `SessionEvent` - the outcome of a toggle (session opened or closed)
//! - `PlateObservation` - a single recognized-plate observation
//! - `InputEvent` - events flowing through the pipeline channel

pub mod session;
pub mod types;
