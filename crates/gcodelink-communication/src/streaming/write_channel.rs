//! Serialized write path shared by interactive commands and the uploader

use super::flow_control::{Acquire, FlowController};
use crate::communication::LineTransport;
use gcodelink_core::{
    EventBus, LineEnding, ProtocolVariant, Result, StreamError, TelemetryEvent,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error};

/// Grbl real-time bytes: acted on immediately, never answered with `ok`
const REALTIME_COMMANDS: &[&str] = &["?", "!", "~", "\u{18}"];

/// Exclusive writer for one session
///
/// Recording a line in the flow controller and putting it on the wire happen
/// under the same lock, so the order of `pending` always matches the order
/// the firmware sees.
pub struct CommandChannel {
    transport: Arc<dyn LineTransport>,
    controller: Arc<FlowController>,
    bus: Arc<EventBus>,
    line_ending: LineEnding,
    lock: Mutex<()>,
}

impl CommandChannel {
    pub fn new(
        transport: Arc<dyn LineTransport>,
        controller: Arc<FlowController>,
        bus: Arc<EventBus>,
        line_ending: LineEnding,
    ) -> Self {
        Self {
            transport,
            controller,
            bus,
            line_ending,
            lock: Mutex::new(()),
        }
    }

    /// Line ending appended by the transport
    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Write a line whose credit was already reserved
    ///
    /// Returns `Ok(false)` without writing if the upload stopped after the
    /// reservation.
    pub fn write_tracked(&self, line: &str, size: usize) -> Result<bool> {
        self.write_recorded(line, size, FlowController::record_sent)
    }

    fn write_recorded(
        &self,
        line: &str,
        size: usize,
        record: fn(&FlowController, usize) -> bool,
    ) -> Result<bool> {
        let _guard = self.lock.lock();
        if !record(&self.controller, size) {
            return Ok(false);
        }

        if let Err(e) = self.transport.write_line(line) {
            self.controller.rollback(size);
            self.report_failure(&e);
            return Err(e);
        }
        debug!("{} <- {}", self.transport.port_name(), line);

        if self.controller.variant() != ProtocolVariant::Generic {
            self.bus.emit(TelemetryEvent::BufferStatus {
                available: self.controller.credit(),
                total: self.controller.capacity(),
            });
        }
        Ok(true)
    }

    /// Write a line with no flow-control accounting
    pub fn write_raw(&self, line: &str) -> Result<()> {
        let _guard = self.lock.lock();
        self.transport.write_line(line).map_err(|e| {
            self.report_failure(&e);
            e
        })?;
        debug!("{} <- {}", self.transport.port_name(), line);
        Ok(())
    }

    /// Send an operator command
    ///
    /// Under AckCounted every command except the real-time bytes takes credit
    /// and a `pending` slot like an uploaded line, whether or not an upload is
    /// running, so its `ok` never releases another line's bytes. This may
    /// block until the firmware has room. Other variants write it as is.
    pub fn send_command(&self, command: &str) -> Result<()> {
        let command = command.trim();
        if command.is_empty() {
            return Ok(());
        }

        if self.controller.variant() != ProtocolVariant::AckCounted
            || REALTIME_COMMANDS.contains(&command)
        {
            return self.write_raw(command);
        }

        let size = self.controller.line_cost(command, self.line_ending);
        self.controller.check_fits(0, size)?;

        if self.controller.acquire_command(size, None) != Acquire::Granted
            || !self.write_recorded(command, size, FlowController::record_command)?
        {
            return Err(StreamError::NotOpen.into());
        }
        Ok(())
    }

    fn report_failure(&self, err: &gcodelink_core::Error) {
        error!(
            "Write to {} failed: {}",
            self.transport.port_name(),
            err
        );
        self.bus.emit(TelemetryEvent::WriteFailed {
            error: err.to_string(),
        });
    }
}
