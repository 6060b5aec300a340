//! # Event Bus Module
//!
//! Provides the event bus that fans telemetry out of the reader and
//! uploader threads to any number of consumers.
//!
//! ## Overview
//!
//! - Publishers emit typed events without knowing subscribers
//! - Subscribers filter and receive events of interest
//! - Handlers run synchronously on the publishing thread; a broadcast
//!   receiver is available for polling consumers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gcodelink_core::event_bus::{event_bus, AppEvent, EventCategory, EventFilter, TelemetryEvent};
//!
//! let subscription = event_bus().subscribe(
//!     EventFilter::Categories(vec![EventCategory::Telemetry]),
//!     |event| {
//!         if let AppEvent::Telemetry(TelemetryEvent::Echo(line)) = event {
//!             println!("{}", line);
//!         }
//!     },
//! );
//!
//! event_bus().unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
