//! Scripted in-memory transport for testing.
//!
//! Lines queued with [`MockTransport::push_line`] are handed to the reader in
//! order; everything written is captured in a log. An optional responder
//! turns each written line into firmware replies, which is enough to play
//! the part of an acknowledging controller.

use super::{ConnectionParams, LineTransport};
use gcodelink_core::{ConnectionError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct MockState {
    open: bool,
    port: String,
    boot_lines: Vec<String>,
    incoming: VecDeque<String>,
    written: Vec<String>,
    responder: Option<Responder>,
    open_error: Option<ConnectionError>,
    close_error: Option<ConnectionError>,
    fail_writes: bool,
    fail_reads: bool,
    open_count: usize,
}

/// Mock transport for driving the reader, uploader, and session
pub struct MockTransport {
    state: Mutex<MockState>,
    changed: Condvar,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                open: false,
                port: "mock".to_string(),
                boot_lines: Vec::new(),
                incoming: VecDeque::new(),
                written: Vec::new(),
                responder: None,
                open_error: None,
                close_error: None,
                fail_writes: false,
                fail_reads: false,
                open_count: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Lines queued every time the transport is opened (the boot signature).
    pub fn with_boot_lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().boot_lines = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Reply to every written line with the lines the closure returns.
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
        self
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_open(&self, error: ConnectionError) {
        self.state.lock().open_error = Some(error);
    }

    /// Make the next `close` report `error`. The port still ends up closed.
    pub fn fail_close(&self, error: ConnectionError) {
        self.state.lock().close_error = Some(error);
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Make the next read fail as if the device vanished.
    pub fn fail_next_read(&self) {
        self.state.lock().fail_reads = true;
        self.changed.notify_all();
    }

    /// Queue a line for the reader.
    pub fn push_line(&self, line: impl Into<String>) {
        self.state.lock().incoming.push_back(line.into());
        self.changed.notify_all();
    }

    /// All lines written so far.
    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    /// Clear captured writes.
    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }

    /// Number of times the transport was opened successfully.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Mark the transport open without going through `open`.
    pub fn force_open(&self) {
        self.state.lock().open = true;
    }

    /// Block until at least `count` lines were written or `timeout` elapses.
    pub fn wait_for_writes(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.written.len() < count {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.written.len() >= count;
            }
        }
        true
    }

    /// Block until the reader has consumed every queued line.
    pub fn wait_until_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.incoming.is_empty() {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.incoming.is_empty();
            }
        }
        true
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LineTransport for MockTransport {
    fn open(&self, params: &ConnectionParams) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.open_error.take() {
            return Err(error.into());
        }
        state.open = true;
        state.open_count += 1;
        state.port = params.port.clone();
        let boot = state.boot_lines.clone();
        state.incoming.extend(boot);
        self.changed.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn read_line(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if !state.open {
                return Err(ConnectionError::NotOpen {
                    port: state.port.clone(),
                }
                .into());
            }
            if state.fail_reads {
                state.fail_reads = false;
                return Err(ConnectionError::ReadFailed {
                    port: state.port.clone(),
                    reason: "device disconnected".to_string(),
                }
                .into());
            }
            if let Some(line) = state.incoming.pop_front() {
                self.changed.notify_all();
                return Ok(Some(line));
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return Ok(state.incoming.pop_front());
            }
        }
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(ConnectionError::NotOpen {
                port: state.port.clone(),
            }
            .into());
        }
        if state.fail_writes {
            return Err(ConnectionError::WriteFailed {
                port: state.port.clone(),
                reason: "simulated write failure".to_string(),
            }
            .into());
        }
        state.written.push(line.to_string());
        let replies = match state.responder.as_mut() {
            Some(responder) => responder(line),
            None => Vec::new(),
        };
        state.incoming.extend(replies);
        self.changed.notify_all();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.open = false;
        state.incoming.clear();
        self.changed.notify_all();
        match state.close_error.take() {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    fn port_name(&self) -> String {
        self.state.lock().port.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(mock: MockTransport) -> MockTransport {
        mock.open(&ConnectionParams::new("mock0", 115_200)).unwrap();
        mock
    }

    #[test]
    fn test_mock_boot_lines_and_queue() {
        let mock = opened(MockTransport::new().with_boot_lines(["Grbl 1.1h ['$' for help]"]));
        mock.push_line("ok");

        let first = mock.read_line(Duration::from_millis(10)).unwrap();
        assert_eq!(first.as_deref(), Some("Grbl 1.1h ['$' for help]"));
        let second = mock.read_line(Duration::from_millis(10)).unwrap();
        assert_eq!(second.as_deref(), Some("ok"));
        assert_eq!(mock.read_line(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_mock_write_capture_and_responder() {
        let mock = opened(MockTransport::new().with_responder(|_| vec!["ok".to_string()]));
        mock.write_line("G0 X1").unwrap();
        mock.write_line("G0 X2").unwrap();

        assert_eq!(mock.written(), vec!["G0 X1", "G0 X2"]);
        assert_eq!(
            mock.read_line(Duration::from_millis(10)).unwrap().as_deref(),
            Some("ok")
        );
    }

    #[test]
    fn test_mock_failures() {
        let mock = MockTransport::new();
        mock.fail_open(ConnectionError::PortInUse {
            port: "mock0".to_string(),
        });
        assert!(mock.open(&ConnectionParams::new("mock0", 115_200)).is_err());

        let mock = opened(mock);
        mock.fail_writes(true);
        assert!(mock.write_line("G0").is_err());

        mock.fail_next_read();
        assert!(mock.read_line(Duration::from_millis(10)).is_err());

        mock.close().unwrap();
        assert!(mock.read_line(Duration::from_millis(10)).is_err());
    }
}
