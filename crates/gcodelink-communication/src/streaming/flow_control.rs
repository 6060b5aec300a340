//! Flow-control accounting shared by the reader, the uploader, and the
//! write channel
//!
//! One mutex guards the credit counter, the queue of outstanding line sizes,
//! and the `open`/`start`/`pause` flags. Two condition variables hang off it:
//! `resumed` (pause cleared, or the upload/session went away) and
//! `credit_changed` (credit released, reconciled, or reset).
//!
//! Units depend on the protocol variant: bytes for [`ProtocolVariant::AckCounted`],
//! planner slots for [`ProtocolVariant::QueryCredit`], nothing for
//! [`ProtocolVariant::Generic`].

use gcodelink_core::{LineEnding, ProtocolVariant, StreamError};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of waiting for credit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// Credit was reserved
    Granted,
    /// Not enough credit before the timeout elapsed
    TimedOut,
    /// The upload was stopped while waiting
    Cancelled,
    /// The session closed while waiting
    Closed,
}

/// Point-in-time copy of the controller state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSnapshot {
    /// Available credit
    pub credit: usize,
    /// Maximum credit
    pub capacity: usize,
    /// Outstanding line sizes, oldest first
    pub pending: Vec<usize>,
    /// Session open
    pub open: bool,
    /// Upload running
    pub start: bool,
    /// Upload paused
    pub pause: bool,
}

impl FlowSnapshot {
    /// Units currently in flight
    pub fn in_flight(&self) -> usize {
        self.capacity - self.credit
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Upload,
    Command,
}

#[derive(Debug)]
struct FlowState {
    credit: usize,
    pending: VecDeque<usize>,
    open: bool,
    start: bool,
    pause: bool,
}

/// Thread-safe credit accounting
#[derive(Debug)]
pub struct FlowController {
    variant: ProtocolVariant,
    capacity: usize,
    state: Mutex<FlowState>,
    resumed: Condvar,
    credit_changed: Condvar,
}

impl FlowController {
    /// Create a closed controller with full credit
    pub fn new(variant: ProtocolVariant, capacity: usize) -> Self {
        Self {
            variant,
            capacity,
            state: Mutex::new(FlowState {
                credit: capacity,
                pending: VecDeque::new(),
                open: false,
                start: false,
                pause: false,
            }),
            resumed: Condvar::new(),
            credit_changed: Condvar::new(),
        }
    }

    /// Protocol variant this controller accounts for
    pub fn variant(&self) -> ProtocolVariant {
        self.variant
    }

    /// Maximum credit
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Credit a line costs on the wire
    pub fn line_cost(&self, line: &str, line_ending: LineEnding) -> usize {
        match self.variant {
            ProtocolVariant::AckCounted => line.len() + line_ending.len(),
            ProtocolVariant::QueryCredit => 1,
            ProtocolVariant::Generic => 0,
        }
    }

    /// Reject a line that could never fit, instead of waiting forever
    pub fn check_fits(&self, line_number: usize, size: usize) -> Result<(), StreamError> {
        if size > self.capacity {
            return Err(StreamError::LineTooLong {
                line_number,
                size,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Mark the session open or closed; closing wakes every waiter
    pub fn set_open(&self, open: bool) {
        let mut state = self.state.lock();
        state.open = open;
        if !open {
            drop(state);
            self.resumed.notify_all();
            self.credit_changed.notify_all();
        }
    }

    /// Whether the session is open
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Whether an upload is running
    pub fn is_started(&self) -> bool {
        self.state.lock().start
    }

    /// Whether the upload is paused
    pub fn is_paused(&self) -> bool {
        self.state.lock().pause
    }

    /// Available credit
    pub fn credit(&self) -> usize {
        self.state.lock().credit
    }

    /// Copy of the full state
    pub fn snapshot(&self) -> FlowSnapshot {
        let state = self.state.lock();
        FlowSnapshot {
            credit: state.credit,
            capacity: self.capacity,
            pending: state.pending.iter().copied().collect(),
            open: state.open,
            start: state.start,
            pause: state.pause,
        }
    }

    /// Mark an upload as running
    pub fn begin_upload(&self) -> Result<(), StreamError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(StreamError::NotOpen);
        }
        if state.start {
            return Err(StreamError::AlreadyStreaming);
        }
        state.start = true;
        state.pause = false;
        Ok(())
    }

    /// Upload ended normally
    ///
    /// `pending` is kept: operator commands sent after the last line are
    /// still owed an `ok`.
    pub fn finish_upload(&self) {
        let mut state = self.state.lock();
        state.start = false;
        state.pause = false;
        drop(state);
        self.resumed.notify_all();
        self.credit_changed.notify_all();
    }

    /// Stop the upload: clear pending, restore full credit, wake everyone
    pub fn cancel_upload(&self) {
        let mut state = self.state.lock();
        state.start = false;
        state.pause = false;
        state.pending.clear();
        state.credit = self.capacity;
        drop(state);
        debug!("Flow control reset to {} units", self.capacity);
        self.resumed.notify_all();
        self.credit_changed.notify_all();
    }

    /// Pause a running upload. Returns `false` if nothing changed.
    pub fn pause(&self) -> bool {
        let mut state = self.state.lock();
        if !state.start || state.pause {
            return false;
        }
        state.pause = true;
        true
    }

    /// Clear the pause flag. Returns `false` if the upload was not paused.
    pub fn resume(&self) -> bool {
        let mut state = self.state.lock();
        if !state.pause {
            return false;
        }
        state.pause = false;
        drop(state);
        self.resumed.notify_all();
        true
    }

    /// Block while paused
    ///
    /// Returns `false` when the upload was stopped or the session closed.
    pub fn wait_while_paused(&self) -> bool {
        let mut state = self.state.lock();
        while state.pause && state.start && state.open {
            self.resumed.wait(&mut state);
        }
        state.start && state.open
    }

    /// Reserve `size` units of credit for an upload line, waiting for the
    /// reader to release some
    ///
    /// `timeout` bounds the total wait; `None` waits until credit arrives or
    /// the upload goes away.
    pub fn acquire(&self, size: usize, timeout: Option<Duration>) -> Acquire {
        self.acquire_for(Claim::Upload, size, timeout)
    }

    /// Reserve credit for an operator command; only needs the session open
    pub fn acquire_command(&self, size: usize, timeout: Option<Duration>) -> Acquire {
        self.acquire_for(Claim::Command, size, timeout)
    }

    fn acquire_for(&self, claim: Claim, size: usize, timeout: Option<Duration>) -> Acquire {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if !state.open {
                return Acquire::Closed;
            }
            if claim == Claim::Upload && !state.start {
                return Acquire::Cancelled;
            }
            if self.variant == ProtocolVariant::Generic {
                return Acquire::Granted;
            }
            if state.credit >= size {
                state.credit -= size;
                return Acquire::Granted;
            }
            match deadline {
                Some(deadline) => {
                    if self.credit_changed.wait_until(&mut state, deadline).timed_out() {
                        return Acquire::TimedOut;
                    }
                }
                None => self.credit_changed.wait(&mut state),
            }
        }
    }

    /// Record a line about to be written with already reserved credit
    ///
    /// Returns `false` (and records nothing) if the upload stopped since the
    /// credit was reserved; the caller must then not write the line.
    pub fn record_sent(&self, size: usize) -> bool {
        self.record_for(Claim::Upload, size)
    }

    /// Record an operator command about to be written
    ///
    /// Returns `false` only when the session closed.
    pub fn record_command(&self, size: usize) -> bool {
        self.record_for(Claim::Command, size)
    }

    fn record_for(&self, claim: Claim, size: usize) -> bool {
        let mut state = self.state.lock();
        if !state.open || (claim == Claim::Upload && !state.start) {
            return false;
        }
        if self.variant == ProtocolVariant::AckCounted {
            state.pending.push_back(size);
        }
        true
    }

    /// Undo [`record_sent`](Self::record_sent) after a failed write
    pub fn rollback(&self, size: usize) {
        let mut state = self.state.lock();
        if self.variant == ProtocolVariant::AckCounted && state.pending.back() == Some(&size) {
            state.pending.pop_back();
        }
        if self.variant != ProtocolVariant::Generic {
            state.credit = (state.credit + size).min(self.capacity);
        }
        drop(state);
        self.credit_changed.notify_all();
    }

    /// Resolve the oldest outstanding line (AckCounted)
    ///
    /// Returns the released size, or `None` when nothing was pending.
    pub fn acknowledge(&self) -> Option<usize> {
        if self.variant != ProtocolVariant::AckCounted {
            return None;
        }
        let mut state = self.state.lock();
        let size = state.pending.pop_front()?;
        state.credit = (state.credit + size).min(self.capacity);
        drop(state);
        self.credit_changed.notify_all();
        Some(size)
    }

    /// Pause because the firmware rejected a line. Returns `true` if the
    /// upload was running and is now paused.
    pub fn pause_on_error(&self) -> bool {
        self.pause()
    }

    /// Set credit to the firmware-reported free slot count (QueryCredit)
    pub fn reconcile(&self, reported: usize) -> usize {
        let mut state = self.state.lock();
        state.credit = reported.min(self.capacity);
        let credit = state.credit;
        drop(state);
        if credit > 0 {
            self.credit_changed.notify_all();
        }
        credit
    }

    /// Wait until every outstanding line is acknowledged
    ///
    /// Returns `false` when the upload was stopped or the session closed
    /// first.
    pub fn wait_drained(&self) -> bool {
        let mut state = self.state.lock();
        while !state.pending.is_empty() && state.start && state.open {
            self.credit_changed.wait(&mut state);
        }
        state.pending.is_empty() && state.start && state.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn running(variant: ProtocolVariant, capacity: usize) -> FlowController {
        let controller = FlowController::new(variant, capacity);
        controller.set_open(true);
        controller.begin_upload().unwrap();
        controller
    }

    #[test]
    fn test_line_cost_per_variant() {
        let ack = FlowController::new(ProtocolVariant::AckCounted, 128);
        assert_eq!(ack.line_cost("G0 X1", LineEnding::Lf), 6);
        assert_eq!(ack.line_cost("G0 X1", LineEnding::CrLf), 7);

        let query = FlowController::new(ProtocolVariant::QueryCredit, 28);
        assert_eq!(query.line_cost("G0 X1", LineEnding::Lf), 1);

        let generic = FlowController::new(ProtocolVariant::Generic, 128);
        assert_eq!(generic.line_cost("G0 X1", LineEnding::Lf), 0);
    }

    #[test]
    fn test_acknowledge_is_fifo() {
        let controller = running(ProtocolVariant::AckCounted, 100);
        for size in [10, 20, 30] {
            assert_eq!(controller.acquire(size, None), Acquire::Granted);
            assert!(controller.record_sent(size));
        }
        assert_eq!(controller.credit(), 40);

        assert_eq!(controller.acknowledge(), Some(10));
        assert_eq!(controller.credit(), 50);
        assert_eq!(controller.snapshot().pending, vec![20, 30]);
        assert_eq!(controller.acknowledge(), Some(20));
        assert_eq!(controller.acknowledge(), Some(30));
        assert_eq!(controller.acknowledge(), None);
        assert_eq!(controller.credit(), 100);
    }

    #[test]
    fn test_acquire_times_out_without_credit() {
        let controller = running(ProtocolVariant::AckCounted, 5);
        assert_eq!(controller.acquire(5, None), Acquire::Granted);
        assert_eq!(
            controller.acquire(1, Some(Duration::from_millis(20))),
            Acquire::TimedOut
        );
    }

    #[test]
    fn test_cancel_unblocks_waiter_and_resets() {
        let controller = Arc::new(running(ProtocolVariant::AckCounted, 4));
        assert_eq!(controller.acquire(4, None), Acquire::Granted);
        assert!(controller.record_sent(4));

        let waiter = {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.acquire(4, None))
        };
        thread::sleep(Duration::from_millis(20));
        controller.cancel_upload();

        assert_eq!(waiter.join().unwrap(), Acquire::Cancelled);
        let snapshot = controller.snapshot();
        assert!(snapshot.pending.is_empty());
        assert_eq!(snapshot.credit, 4);
        assert!(!controller.record_sent(1));
    }

    #[test]
    fn test_pause_and_resume() {
        let controller = Arc::new(running(ProtocolVariant::Generic, 0));
        assert!(controller.pause());
        assert!(!controller.pause());

        let waiter = {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.wait_while_paused())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(controller.resume());
        assert!(waiter.join().unwrap());
        assert!(!controller.resume());
    }

    #[test]
    fn test_reconcile_clamps_to_capacity() {
        let controller = running(ProtocolVariant::QueryCredit, 28);
        assert_eq!(controller.reconcile(100), 28);
        assert_eq!(controller.reconcile(3), 3);
        assert_eq!(controller.acquire(1, None), Acquire::Granted);
        assert!(controller.record_sent(1));
        assert!(controller.snapshot().pending.is_empty());
        assert_eq!(controller.credit(), 2);
    }

    #[test]
    fn test_rollback_restores_credit() {
        let controller = running(ProtocolVariant::AckCounted, 10);
        assert_eq!(controller.acquire(6, None), Acquire::Granted);
        assert!(controller.record_sent(6));
        controller.rollback(6);
        assert_eq!(controller.credit(), 10);
        assert!(controller.snapshot().pending.is_empty());
    }

    #[test]
    fn test_line_too_long() {
        let controller = FlowController::new(ProtocolVariant::AckCounted, 8);
        assert!(controller.check_fits(1, 8).is_ok());
        assert!(matches!(
            controller.check_fits(3, 9),
            Err(StreamError::LineTooLong {
                line_number: 3,
                size: 9,
                capacity: 8
            })
        ));
    }

    #[test]
    fn test_command_credit_outlives_upload_state() {
        let controller = FlowController::new(ProtocolVariant::AckCounted, 10);
        controller.set_open(true);

        assert_eq!(controller.acquire_command(4, None), Acquire::Granted);
        assert!(controller.record_command(4));
        assert!(!controller.record_sent(1));

        controller.begin_upload().unwrap();
        assert_eq!(controller.credit(), 6);
        assert_eq!(controller.snapshot().pending, vec![4]);

        controller.finish_upload();
        assert_eq!(controller.acknowledge(), Some(4));
        assert_eq!(controller.credit(), 10);
    }

    #[test]
    fn test_close_and_stop_are_told_apart() {
        let controller = Arc::new(running(ProtocolVariant::AckCounted, 2));
        assert_eq!(controller.acquire(2, None), Acquire::Granted);

        let waiter = {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.acquire(2, None))
        };
        thread::sleep(Duration::from_millis(20));
        controller.set_open(false);

        assert_eq!(waiter.join().unwrap(), Acquire::Closed);
        assert_eq!(controller.acquire_command(1, None), Acquire::Closed);
        assert!(!controller.record_command(1));
    }

    #[test]
    fn test_closing_releases_drain_wait() {
        let controller = Arc::new(running(ProtocolVariant::AckCounted, 10));
        assert_eq!(controller.acquire(3, None), Acquire::Granted);
        assert!(controller.record_sent(3));

        let waiter = {
            let controller = Arc::clone(&controller);
            thread::spawn(move || controller.wait_drained())
        };
        thread::sleep(Duration::from_millis(20));
        controller.set_open(false);
        assert!(!waiter.join().unwrap());
    }
}
