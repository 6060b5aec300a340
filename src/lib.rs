//! # gcodelink
//!
//! Flow-controlled G-code streaming over a serial line to GRBL-class,
//! g2core-class, and generic firmware.
//!
//! ## Architecture
//!
//! gcodelink is organized as a workspace with multiple crates:
//!
//! 1. **gcodelink-core** - Shared data types, errors, and the event bus
//! 2. **gcodelink-communication** - Serial transport, firmware detection,
//!    flow control, reader/uploader threads, and the session
//! 3. **gcodelink-settings** - Configuration files (TOML or JSON)
//! 4. **gcodelink** - This crate: logging setup, session bootstrap, and the CLI

use std::sync::Arc;

pub use gcodelink_communication::{firmware, session, streaming};
pub use gcodelink_core::data;

pub use gcodelink_core::{
    event_bus, AppEvent, ConnectionError, ConnectionEvent, Error, EventBus, EventCategory,
    EventFilter, FirmwareError, LineEnding, Position, ProtocolVariant, Result, StreamError,
    StreamEvent, TaskEvent, TaskKind, TelemetryEvent,
};

pub use gcodelink_communication::{
    list_ports, ConnectionParams, ControllerType, FirmwareIdentity, FlowController,
    HandshakeOutcome, LineTransport, MockTransport, SerialPortInfo, SerialTransport, Session,
    SessionConfig, SessionState, SourceOptions, UploadSource,
};

pub use gcodelink_settings::{Config, SettingsError};

/// Initialize tracing
///
/// `RUST_LOG` takes precedence; otherwise INFO, or DEBUG when `verbose`.
pub fn init_logging(verbose: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))?;

    Ok(())
}

/// Open a session, rebuilding it once if the firmware speaks another variant
///
/// `transport` is called for every attempt so each session owns a fresh
/// port handle. A second mismatch is reported as
/// [`FirmwareError::FirmwareChanged`].
pub fn connect<F>(config: SessionConfig, bus: Arc<EventBus>, transport: F) -> Result<Session>
where
    F: Fn() -> Arc<dyn LineTransport>,
{
    let mut session = Session::with_bus(config.clone(), transport(), bus.clone());
    match session.open()? {
        HandshakeOutcome::Open { .. } => Ok(session),
        HandshakeOutcome::FirmwareChanged { detected, .. } => {
            tracing::info!("Reconnecting as {}", detected);
            let mut session = Session::with_bus(config.with_variant(detected), transport(), bus);
            match session.open()? {
                HandshakeOutcome::Open { .. } => Ok(session),
                HandshakeOutcome::FirmwareChanged {
                    configured,
                    detected,
                    ..
                } => Err(FirmwareError::FirmwareChanged {
                    configured,
                    detected,
                }
                .into()),
            }
        }
    }
}
