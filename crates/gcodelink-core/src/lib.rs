//! # gcodelink Core
//!
//! Core types shared by the gcodelink crates.
//! Provides the error hierarchy, machine position data, and the event bus
//! that carries telemetry from the streaming engine to its consumers.

pub mod data;
pub mod error;
pub mod event_bus;

pub use data::{LineEnding, Position, ProtocolVariant};

pub use error::{ConnectionError, Error, FirmwareError, Result, StreamError};

// Re-export event bus for convenience
pub use event_bus::{
    event_bus, AppEvent, ConnectionEvent, EventBus, EventCategory, EventFilter,
    StreamEvent, SubscriptionId, TaskEvent, TaskKind, TelemetryEvent,
};
