//! # gcodelink Communication
//!
//! Serial transport, firmware identification, and the flow-controlled
//! streaming engine for gcodelink.
//!
//! A [`Session`] opens a [`LineTransport`], sniffs the firmware's boot
//! signature, and then runs a reader thread and (on request) an uploader
//! thread that share one [`FlowController`] and one [`CommandChannel`].

pub mod communication;
pub mod firmware;
pub mod session;
pub mod streaming;

pub use communication::{
    mock::MockTransport,
    serial::{list_ports, SerialPortInfo, SerialTransport},
    ConnectionParams, LineTransport, SerialParity,
};

pub use firmware::{
    ControllerType, DetectionConfig, FirmwareDetector, FirmwareIdentity, FirmwareResponse,
};

pub use session::{HandshakeOutcome, Session, SessionConfig, SessionState};

pub use streaming::{
    Acquire, CommandChannel, FlowController, FlowSnapshot, SourceOptions, UploadSource,
};
