//! Reader task: turns firmware output into events and released credit

use super::flow_control::FlowController;
use crate::communication::LineTransport;
use crate::firmware::{parse_response, FirmwareResponse};
use gcodelink_core::{
    EventBus, Position, ProtocolVariant, Result, StreamError, StreamEvent, TaskEvent, TaskKind,
    TelemetryEvent,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Everything the reader thread needs
pub struct ReaderContext {
    pub transport: Arc<dyn LineTransport>,
    pub controller: Arc<FlowController>,
    pub bus: Arc<EventBus>,
    /// How long a single `read_line` may block before `open` is rechecked
    pub poll_interval: Duration,
}

/// Start the reader thread
pub fn spawn_reader(ctx: ReaderContext) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("gcodelink-reader".to_string())
        .spawn(move || ResponseReader::new(ctx).run())
        .map_err(|e| {
            StreamError::Task {
                reason: format!("failed to spawn reader: {}", e),
            }
            .into()
        })
}

struct ResponseReader {
    ctx: ReaderContext,
    port: String,
    settings_seen: bool,
    position: Position,
}

impl ResponseReader {
    fn new(ctx: ReaderContext) -> Self {
        let port = ctx.transport.port_name();
        Self {
            ctx,
            port,
            settings_seen: false,
            position: Position::default(),
        }
    }

    fn run(mut self) {
        self.ctx.bus.emit(TaskEvent::ThreadStarted(TaskKind::Reader));
        info!("Reader started on {}", self.port);

        let mut failure = None;
        while self.ctx.controller.is_open() {
            match self.ctx.transport.read_line(self.ctx.poll_interval) {
                Ok(Some(line)) => self.handle_line(&line),
                Ok(None) => {}
                Err(e) => {
                    if !self.ctx.controller.is_open() {
                        break;
                    }
                    error!("Read from {} failed: {}", self.port, e);
                    failure = Some(e.to_string());
                    // Releases an uploader blocked on credit or pause
                    self.ctx.controller.set_open(false);
                    break;
                }
            }
        }

        info!("Reader stopped on {}", self.port);
        self.ctx.bus.emit(TaskEvent::ThreadStopped {
            task: TaskKind::Reader,
            error: failure,
        });
    }

    fn handle_line(&mut self, line: &str) {
        debug!("{} -> {}", self.port, line);
        for response in parse_response(line) {
            self.dispatch(response);
        }
    }

    fn dispatch(&mut self, response: FirmwareResponse) {
        let controller = &self.ctx.controller;
        let bus = &self.ctx.bus;

        match response {
            FirmwareResponse::Ack => {
                if controller.acknowledge().is_some() {
                    self.emit_buffer_status();
                }
                bus.emit(TelemetryEvent::Ack);
                if std::mem::take(&mut self.settings_seen) {
                    bus.emit(TelemetryEvent::SettingsEnd);
                }
            }
            FirmwareResponse::Error(message) => {
                warn!("Firmware error on {}: {}", self.port, message);
                if controller.variant() == ProtocolVariant::AckCounted {
                    if controller.acknowledge().is_some() {
                        self.emit_buffer_status();
                    }
                    if controller.pause_on_error() {
                        warn!("Upload to {} paused after firmware error", self.port);
                        bus.emit(StreamEvent::Paused);
                    }
                }
                bus.emit(TelemetryEvent::Error { message });
            }
            FirmwareResponse::Alarm(message) => {
                warn!("Firmware alarm on {}: {}", self.port, message);
                bus.emit(TelemetryEvent::Alarm { message });
            }
            FirmwareResponse::Status { x, y, z } => {
                self.position = Position::new(
                    x.unwrap_or(self.position.x),
                    y.unwrap_or(self.position.y),
                    z.unwrap_or(self.position.z),
                );
                bus.emit(TelemetryEvent::Position(self.position));
            }
            FirmwareResponse::Setting { key, value } => {
                self.settings_seen = true;
                bus.emit(TelemetryEvent::Setting { key, value });
            }
            FirmwareResponse::QueueReport(slots) => {
                if controller.variant() == ProtocolVariant::QueryCredit {
                    controller.reconcile(slots);
                    self.emit_buffer_status();
                }
                bus.emit(TelemetryEvent::FreeBuffer(slots));
            }
            FirmwareResponse::Echo(text) => {
                bus.emit(TelemetryEvent::Echo(text));
            }
        }
    }

    fn emit_buffer_status(&self) {
        self.ctx.bus.emit(TelemetryEvent::BufferStatus {
            available: self.ctx.controller.credit(),
            total: self.ctx.controller.capacity(),
        });
    }
}
