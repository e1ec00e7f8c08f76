//! Parking Gateway - LPR-driven parking session tracking and billing
//!
//! Turns a stream of license plate observations into parking sessions:
//! the first sighting of a plate opens a session, the next closes and
//! bills it. Occupancy is tracked alongside and everything is persisted
//! to an append-only session log.
//!
//! Module structure:
//! - `domain/` - Core business types (ParkingSession, PlateId, wire formats)
//! - `io/` - External interfaces (MQTT, session store, Prometheus)
//! - `services/` - Business logic (Pipeline, SessionLedger, Deduplicator, Occupancy)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
