#![allow(dead_code)]

use gcodelink_communication::{ConnectionParams, SessionConfig};
use gcodelink_core::{AppEvent, EventBus, EventFilter};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Collects every event published on a bus
pub struct Recorder {
    events: Arc<Mutex<Vec<AppEvent>>>,
}

impl Recorder {
    pub fn attach(bus: &EventBus) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe(EventFilter::All, move |event| sink.lock().push(event));
        Self { events }
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&AppEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn wait_for(&self, predicate: impl Fn(&AppEvent) -> bool) -> bool {
        wait_until(|| self.count(&predicate) > 0)
    }
}

/// Poll `condition` until it holds or [`TIMEOUT`] elapses
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn session_config() -> SessionConfig {
    SessionConfig::new(ConnectionParams::new("mock0", 115_200))
        .with_signature_timeout(Duration::from_millis(200))
}

pub fn new_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}
