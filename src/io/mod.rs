//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for LPR observations and operator commands
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `store` - Durable session store (JSONL file, in-memory for tests)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress_channel;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;
pub mod store;

// Re-export commonly used types
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use mqtt_egress::MqttPublisher;
pub use store::{JsonlStore, MemoryStore, SessionStore, StoreError};
