//! Event type definitions for the event bus.
//!
//! This module defines every event the streaming engine emits, organized by
//! category. Events are cloneable and serializable for logging/replay.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::data::{Position, ProtocolVariant};

/// Root event enum for all engine events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEvent {
    /// Session lifecycle and handshake events
    Connection(ConnectionEvent),
    /// Decoded firmware output
    Telemetry(TelemetryEvent),
    /// Upload progress and outcome
    Stream(StreamEvent),
    /// Worker thread lifecycle
    Task(TaskEvent),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Telemetry(_) => EventCategory::Telemetry,
            AppEvent::Stream(_) => EventCategory::Stream,
            AppEvent::Task(_) => EventCategory::Task,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Connection(e) => e.description(),
            AppEvent::Telemetry(e) => e.description(),
            AppEvent::Stream(e) => e.description(),
            AppEvent::Task(e) => e.description(),
        }
    }
}

impl From<ConnectionEvent> for AppEvent {
    fn from(event: ConnectionEvent) -> Self {
        AppEvent::Connection(event)
    }
}

impl From<TelemetryEvent> for AppEvent {
    fn from(event: TelemetryEvent) -> Self {
        AppEvent::Telemetry(event)
    }
}

impl From<StreamEvent> for AppEvent {
    fn from(event: StreamEvent) -> Self {
        AppEvent::Stream(event)
    }
}

impl From<TaskEvent> for AppEvent {
    fn from(event: TaskEvent) -> Self {
        AppEvent::Task(event)
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Session lifecycle events.
    Connection,
    /// Decoded firmware output.
    Telemetry,
    /// Upload progress events.
    Stream,
    /// Worker thread lifecycle events.
    Task,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Telemetry => write!(f, "Telemetry"),
            EventCategory::Stream => write!(f, "Stream"),
            EventCategory::Task => write!(f, "Task"),
        }
    }
}

/// Session lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Starting connection attempt.
    Connecting {
        /// Serial port path being connected to.
        port: String,
    },
    /// Handshake finished and the session is open.
    Connected {
        /// Serial port path that was connected.
        port: String,
        /// Firmware identification derived from the boot signature.
        firmware: String,
        /// Flow-control variant in effect.
        variant: ProtocolVariant,
    },
    /// Connection attempt failed.
    ConnectionFailed {
        /// Serial port path that failed to connect.
        port: String,
        /// Error message describing the failure.
        error: String,
    },
    /// Detected firmware differs from the configured one; restart required.
    FirmwareChanged {
        /// Variant the session was configured with.
        configured: ProtocolVariant,
        /// Variant detected from the boot signature.
        detected: ProtocolVariant,
    },
    /// Session closed. Emitted exactly once per session.
    Closed {
        /// Serial port path that was closed.
        port: String,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::Connecting { port } => format!("Connecting to {}", port),
            ConnectionEvent::Connected {
                port,
                firmware,
                variant,
            } => format!("Connected to {} ({}, {})", port, firmware, variant),
            ConnectionEvent::ConnectionFailed { port, error } => {
                format!("Connection failed to {}: {}", port, error)
            }
            ConnectionEvent::FirmwareChanged {
                configured,
                detected,
            } => format!(
                "Firmware changed ({} -> {}), restart required",
                configured, detected
            ),
            ConnectionEvent::Closed { port } => format!("Closed {}", port),
        }
    }
}

/// Decoded firmware output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    /// Command acknowledged.
    Ack,
    /// Firmware reported an error.
    Error {
        /// Raw or decoded error message.
        message: String,
    },
    /// Firmware raised an alarm.
    Alarm {
        /// Raw or decoded alarm message.
        message: String,
    },
    /// Position reported by a status line.
    Position(Position),
    /// One entry of a settings report.
    Setting {
        /// Setting key (e.g. `$110` or `xvm`).
        key: String,
        /// Setting value as reported.
        value: String,
    },
    /// The settings report that preceded this ack is complete.
    SettingsEnd,
    /// Firmware-reported free planner slots.
    FreeBuffer(usize),
    /// Any other line, echoed verbatim.
    Echo(String),
    /// Credit accounting changed.
    BufferStatus {
        /// Units currently available.
        available: usize,
        /// Configured maximum.
        total: usize,
    },
    /// A write to the port failed.
    WriteFailed {
        /// Error message describing the failure.
        error: String,
    },
}

impl TelemetryEvent {
    fn description(&self) -> String {
        match self {
            TelemetryEvent::Ack => "ok".to_string(),
            TelemetryEvent::Error { message } => format!("Error: {}", message),
            TelemetryEvent::Alarm { message } => format!("Alarm: {}", message),
            TelemetryEvent::Position(position) => format!("Position: {}", position),
            TelemetryEvent::Setting { key, value } => format!("{}={}", key, value),
            TelemetryEvent::SettingsEnd => "Settings complete".to_string(),
            TelemetryEvent::FreeBuffer(count) => format!("Free buffer: {}", count),
            TelemetryEvent::Echo(text) => text.clone(),
            TelemetryEvent::BufferStatus { available, total } => {
                format!("Buffer: {}/{}", available, total)
            }
            TelemetryEvent::WriteFailed { error } => format!("Write failed: {}", error),
        }
    }
}

/// Upload progress and outcome events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// Upload started.
    Started,
    /// A line of the upload was written (1-based).
    ProgressLine(usize),
    /// Upload paused.
    Paused,
    /// Upload resumed.
    Resumed,
    /// Upload finished and every line was acknowledged.
    Completed {
        /// Number of lines written.
        lines: usize,
        /// Total duration of the upload.
        duration: Duration,
    },
    /// Upload cancelled.
    Cancelled {
        /// Number of lines written before cancellation.
        lines: usize,
    },
    /// Upload terminated by an error.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
}

impl StreamEvent {
    fn description(&self) -> String {
        match self {
            StreamEvent::Started => "Upload started".to_string(),
            StreamEvent::ProgressLine(n) => format!("Line {}", n),
            StreamEvent::Paused => "Upload paused".to_string(),
            StreamEvent::Resumed => "Upload resumed".to_string(),
            StreamEvent::Completed { lines, duration } => {
                format!("Upload completed: {} lines in {:?}", lines, duration)
            }
            StreamEvent::Cancelled { lines } => format!("Upload cancelled after {} lines", lines),
            StreamEvent::Failed { error } => format!("Upload failed: {}", error),
        }
    }
}

/// Worker thread kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// The line reader.
    Reader,
    /// The uploader.
    Uploader,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Reader => write!(f, "reader"),
            TaskKind::Uploader => write!(f, "uploader"),
        }
    }
}

/// Worker thread lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskEvent {
    /// Thread started.
    ThreadStarted(TaskKind),
    /// Thread finished. Emitted exactly once per started thread.
    ThreadStopped {
        /// Which thread stopped.
        task: TaskKind,
        /// Failure that terminated the thread, if any.
        error: Option<String>,
    },
}

impl TaskEvent {
    fn description(&self) -> String {
        match self {
            TaskEvent::ThreadStarted(task) => format!("{} thread started", task),
            TaskEvent::ThreadStopped { task, error: None } => format!("{} thread stopped", task),
            TaskEvent::ThreadStopped {
                task,
                error: Some(error),
            } => format!("{} thread stopped: {}", task, error),
        }
    }
}
