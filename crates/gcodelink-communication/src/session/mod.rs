//! Session lifecycle and handshake
//!
//! ```text
//! Init ──open ok──▶ Open ──close──▶ Closed
//!   │                                 ▲
//!   ├──open failed──▶ Error ──close───┤
//!   └──firmware changed───────────────┘
//! ```
//!
//! A session owns the transport. Opening it reads the boot signature,
//! identifies the firmware, and starts the reader; uploads run on their own
//! thread until they finish, are stopped, or the session closes.

use crate::communication::{ConnectionParams, LineTransport};
use crate::firmware::{ControllerType, DetectionConfig, FirmwareDetector, FirmwareIdentity};
use crate::streaming::{
    spawn_reader, spawn_uploader, CommandChannel, FlowController, ReaderContext, UploadSource,
    UploaderContext,
};
use gcodelink_core::{
    event_bus, ConnectionError, ConnectionEvent, Error, EventBus, ProtocolVariant, Result,
    StreamError, StreamEvent,
};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet opened
    Init,
    /// Handshake done, reader running
    Open,
    /// Opening failed; only `close` is accepted
    Error,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Open => write!(f, "open"),
            Self::Error => write!(f, "in error"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Result of [`Session::open`]
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeOutcome {
    /// The session is open
    Open {
        /// Variant in effect
        variant: ProtocolVariant,
        /// Identity from the boot signature; `None` when the transport was
        /// already open and no handshake took place
        identity: Option<FirmwareIdentity>,
    },
    /// The firmware speaks a different variant than configured. The session
    /// is closed; build a new one with `detected`.
    FirmwareChanged {
        /// Variant the session was configured with
        configured: ProtocolVariant,
        /// Variant the firmware actually speaks
        detected: ProtocolVariant,
        /// Identity from the boot signature
        identity: FirmwareIdentity,
    },
}

/// Session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Serial parameters
    pub params: ConnectionParams,
    /// Variant the caller expects the firmware to speak
    pub variant: ProtocolVariant,
    /// Receive buffer size in bytes (AckCounted)
    pub ack_buffer_size: usize,
    /// Planner slots (QueryCredit)
    pub query_slots: usize,
    /// How long to wait for the boot signature
    pub signature_timeout: Duration,
    /// Reader poll interval
    pub read_poll: Duration,
    /// Queue-report re-query interval (QueryCredit)
    pub query_interval: Duration,
    /// Signature thresholds
    pub detection: DetectionConfig,
}

impl SessionConfig {
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            variant: ProtocolVariant::Generic,
            ack_buffer_size: ControllerType::Grbl.default_capacity(),
            query_slots: ControllerType::G2Core.default_capacity(),
            signature_timeout: Duration::from_secs(2),
            read_poll: Duration::from_millis(50),
            query_interval: Duration::from_millis(250),
            detection: DetectionConfig::default(),
        }
    }

    /// Set the expected variant
    pub fn with_variant(mut self, variant: ProtocolVariant) -> Self {
        self.variant = variant;
        self
    }

    /// Set the signature timeout
    pub fn with_signature_timeout(mut self, timeout: Duration) -> Self {
        self.signature_timeout = timeout;
        self
    }

    /// Flow-control capacity for `variant`
    pub fn capacity_for(&self, variant: ProtocolVariant) -> usize {
        match variant {
            ProtocolVariant::AckCounted => self.ack_buffer_size,
            ProtocolVariant::QueryCredit => self.query_slots,
            ProtocolVariant::Generic => 0,
        }
    }
}

/// Running engine of an open session
struct Engine {
    controller: Arc<FlowController>,
    channel: Arc<CommandChannel>,
    reader: JoinHandle<()>,
}

/// One connection to one firmware
pub struct Session {
    config: SessionConfig,
    transport: Arc<dyn LineTransport>,
    bus: Arc<EventBus>,
    state: SessionState,
    last_error: Option<String>,
    identity: Option<FirmwareIdentity>,
    engine: Option<Engine>,
    uploader: Option<JoinHandle<()>>,
    closed_reported: bool,
}

impl Session {
    /// Create a session publishing to the global event bus
    pub fn new(config: SessionConfig, transport: Arc<dyn LineTransport>) -> Self {
        Self::with_bus(config, transport, event_bus())
    }

    /// Create a session publishing to `bus`
    pub fn with_bus(
        config: SessionConfig,
        transport: Arc<dyn LineTransport>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            transport,
            bus,
            state: SessionState::Init,
            last_error: None,
            identity: None,
            engine: None,
            uploader: None,
            closed_reported: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Variant in effect (the configured one until the session opens)
    pub fn variant(&self) -> ProtocolVariant {
        self.engine
            .as_ref()
            .map(|engine| engine.controller.variant())
            .unwrap_or(self.config.variant)
    }

    pub fn identity(&self) -> Option<&FirmwareIdentity> {
        self.identity.as_ref()
    }

    /// Cause of the transition to [`SessionState::Error`]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Shared flow controller, while open
    pub fn flow_controller(&self) -> Option<Arc<FlowController>> {
        self.engine.as_ref().map(|engine| Arc::clone(&engine.controller))
    }

    /// Whether the reader is still running (it stops on read failures)
    pub fn is_alive(&self) -> bool {
        self.engine
            .as_ref()
            .is_some_and(|engine| engine.controller.is_open() && !engine.reader.is_finished())
    }

    /// Whether an upload thread is running
    pub fn is_uploading(&self) -> bool {
        self.uploader
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Open the transport, identify the firmware, and start the reader
    pub fn open(&mut self) -> Result<HandshakeOutcome> {
        self.require(SessionState::Init, "open")?;

        let port = self.config.params.port.clone();
        self.bus.emit(ConnectionEvent::Connecting { port: port.clone() });

        if self.transport.is_open() {
            debug!("{} already open, skipping handshake", port);
            let variant = self.config.variant;
            self.enter_open(variant)?;
            return Ok(HandshakeOutcome::Open {
                variant,
                identity: None,
            });
        }

        info!("Opening {} at {} baud", port, self.config.params.baud_rate);
        if let Err(e) = self.transport.open(&self.config.params) {
            return Err(self.fail(e));
        }

        let signature = match self.read_signature() {
            Ok(signature) => signature,
            Err(e) => {
                let _ = self.transport.close();
                return Err(self.fail(e));
            }
        };

        let identity = FirmwareDetector::new(self.config.detection.clone())
            .detect(signature.as_deref());
        let configured = self.config.variant;
        let detected = identity.variant();

        if detected != configured {
            warn!(
                "Firmware on {} is {} ({}), session configured for {}; restart required",
                port, identity, detected, configured
            );
            self.bus.emit(ConnectionEvent::FirmwareChanged {
                configured,
                detected,
            });
            self.enter_closed();
            return Ok(HandshakeOutcome::FirmwareChanged {
                configured,
                detected,
                identity,
            });
        }

        info!("Detected {} on {} ({})", identity, port, detected);
        self.identity = Some(identity.clone());
        self.enter_open(detected)?;
        Ok(HandshakeOutcome::Open {
            variant: detected,
            identity: Some(identity),
        })
    }

    /// Stop any upload, close the transport, join the reader
    ///
    /// Closing a closed session is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        self.stop_uploader();

        let mut result = Ok(());
        if let Some(engine) = self.engine.take() {
            engine.controller.set_open(false);
            if let Err(e) = self.transport.close() {
                error!("Failed to close {}: {}", self.config.params.port, e);
                result = Err(e);
            }
            if engine.reader.join().is_err() {
                error!("Reader thread on {} panicked", self.config.params.port);
                if result.is_ok() {
                    result = Err(StreamError::Task {
                        reason: "reader thread panicked".to_string(),
                    }
                    .into());
                }
            }
        }

        self.enter_closed();
        result
    }

    /// Start streaming `source`
    pub fn start_upload(&mut self, source: UploadSource) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(StreamError::NotOpen.into());
        }
        if self.is_uploading() {
            return Err(StreamError::AlreadyStreaming.into());
        }
        // Previous upload finished on its own
        if let Some(handle) = self.uploader.take() {
            let _ = handle.join();
        }

        let engine = self.engine.as_ref().ok_or(StreamError::NotOpen)?;
        engine.controller.begin_upload()?;

        let ctx = UploaderContext {
            controller: Arc::clone(&engine.controller),
            channel: Arc::clone(&engine.channel),
            bus: Arc::clone(&self.bus),
            port: self.config.params.port.clone(),
            query_interval: self.config.query_interval,
        };
        match spawn_uploader(ctx, source) {
            Ok(handle) => {
                self.uploader = Some(handle);
                Ok(())
            }
            Err(e) => {
                engine.controller.cancel_upload();
                Err(e)
            }
        }
    }

    /// Cancel the running upload and wait for its thread to exit
    pub fn stop(&mut self) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(StreamError::NotOpen.into());
        }
        self.stop_uploader();
        Ok(())
    }

    /// Hold the upload before its next line
    pub fn pause(&mut self) -> Result<()> {
        let controller = self.running_controller()?;
        if controller.pause() {
            info!("Upload to {} paused", self.config.params.port);
            self.bus.emit(StreamEvent::Paused);
        }
        Ok(())
    }

    /// Continue a paused upload
    pub fn resume(&mut self) -> Result<()> {
        let controller = self.running_controller()?;
        if controller.resume() {
            info!("Upload to {} resumed", self.config.params.port);
            self.bus.emit(StreamEvent::Resumed);
        }
        Ok(())
    }

    /// Send an operator command through the shared write channel
    pub fn send_command(&self, command: &str) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(StreamError::NotOpen.into());
        }
        let engine = self.engine.as_ref().ok_or(StreamError::NotOpen)?;
        engine.channel.send_command(command)
    }

    /// Block until the current upload thread exits
    pub fn wait_for_upload(&mut self) -> Result<()> {
        match self.uploader.take() {
            Some(handle) => handle.join().map_err(|_| {
                StreamError::Task {
                    reason: "uploader thread panicked".to_string(),
                }
                .into()
            }),
            None => Ok(()),
        }
    }

    fn running_controller(&self) -> Result<Arc<FlowController>> {
        let controller = self.flow_controller().ok_or(StreamError::NotOpen)?;
        if !controller.is_started() {
            return Err(StreamError::NotStreaming.into());
        }
        Ok(controller)
    }

    fn require(&self, expected: SessionState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(ConnectionError::InvalidState {
                state: self.state.to_string(),
                operation: operation.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// First non-blank line within the signature timeout
    fn read_signature(&self) -> Result<Option<String>> {
        let deadline = Instant::now() + self.config.signature_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("No boot signature from {}", self.config.params.port);
                return Ok(None);
            }
            match self.transport.read_line(remaining)? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    debug!("Boot signature from {}: {}", self.config.params.port, line);
                    return Ok(Some(line));
                }
                None => return Ok(None),
            }
        }
    }

    fn enter_open(&mut self, variant: ProtocolVariant) -> Result<()> {
        let controller = Arc::new(FlowController::new(
            variant,
            self.config.capacity_for(variant),
        ));
        controller.set_open(true);

        let channel = Arc::new(CommandChannel::new(
            Arc::clone(&self.transport),
            Arc::clone(&controller),
            Arc::clone(&self.bus),
            self.config.params.line_ending,
        ));

        let reader = match spawn_reader(ReaderContext {
            transport: Arc::clone(&self.transport),
            controller: Arc::clone(&controller),
            bus: Arc::clone(&self.bus),
            poll_interval: self.config.read_poll,
        }) {
            Ok(reader) => reader,
            Err(e) => {
                controller.set_open(false);
                let _ = self.transport.close();
                return Err(self.fail(e));
            }
        };

        self.uploader = None;
        self.engine = Some(Engine {
            controller,
            channel,
            reader,
        });
        self.state = SessionState::Open;

        let firmware = self
            .identity
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "unidentified".to_string());
        info!(
            "Session open on {} ({}, {})",
            self.config.params.port, firmware, variant
        );
        self.bus.emit(ConnectionEvent::Connected {
            port: self.config.params.port.clone(),
            firmware,
            variant,
        });
        Ok(())
    }

    fn enter_closed(&mut self) {
        if self.transport.is_open() {
            if let Err(e) = self.transport.close() {
                warn!("Failed to close {}: {}", self.config.params.port, e);
            }
        }
        self.identity = None;
        self.state = SessionState::Closed;
        if !self.closed_reported {
            self.closed_reported = true;
            info!("Session on {} closed", self.config.params.port);
            self.bus.emit(ConnectionEvent::Closed {
                port: self.config.params.port.clone(),
            });
        }
    }

    fn stop_uploader(&mut self) {
        let Some(handle) = self.uploader.take() else {
            return;
        };
        if let Some(engine) = &self.engine {
            engine.controller.cancel_upload();
        }
        if handle.join().is_err() {
            error!("Uploader thread on {} panicked", self.config.params.port);
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        error!("Failed to open {}: {}", self.config.params.port, err);
        self.state = SessionState::Error;
        self.last_error = Some(err.to_string());
        self.bus.emit(ConnectionEvent::ConnectionFailed {
            port: self.config.params.port.clone(),
            error: err.to_string(),
        });
        err
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            if let Err(e) = self.close() {
                warn!("Error closing session on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::mock::MockTransport;

    fn config() -> SessionConfig {
        SessionConfig::new(ConnectionParams::new("mock0", 115_200))
            .with_signature_timeout(Duration::from_millis(100))
    }

    #[test]
    fn test_capacity_per_variant() {
        let config = config();
        assert_eq!(config.capacity_for(ProtocolVariant::AckCounted), 128);
        assert_eq!(config.capacity_for(ProtocolVariant::QueryCredit), 28);
        assert_eq!(config.capacity_for(ProtocolVariant::Generic), 0);
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let mock = Arc::new(MockTransport::new());
        let mut session = Session::with_bus(config(), mock, Arc::new(EventBus::new()));
        assert!(matches!(
            session.open().unwrap(),
            HandshakeOutcome::Open {
                variant: ProtocolVariant::Generic,
                ..
            }
        ));
        let err = session.open().unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::InvalidState { .. })
        ));
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_already_open_transport_skips_handshake() {
        let mock = Arc::new(MockTransport::new().with_boot_lines(["Grbl 1.1h"]));
        mock.force_open();
        let mut session = Session::with_bus(
            config().with_variant(ProtocolVariant::AckCounted),
            mock.clone(),
            Arc::new(EventBus::new()),
        );
        let outcome = session.open().unwrap();
        assert_eq!(
            outcome,
            HandshakeOutcome::Open {
                variant: ProtocolVariant::AckCounted,
                identity: None
            }
        );
        assert_eq!(mock.open_count(), 0);
        session.close().unwrap();
    }

    #[test]
    fn test_control_requires_open_session() {
        let mock = Arc::new(MockTransport::new());
        let mut session = Session::with_bus(config(), mock, Arc::new(EventBus::new()));
        assert!(session.send_command("$$").is_err());
        assert!(session
            .start_upload(UploadSource::from_lines(["G0 X1"]))
            .is_err());
        assert!(session.pause().is_err());
    }
}
