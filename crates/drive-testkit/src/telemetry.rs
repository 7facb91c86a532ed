//! Recording telemetry sink

use drive_core::{TelemetryEvent, TelemetrySink};
use parking_lot::Mutex;

/// Sink capturing every event for assertions.
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events, in order.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Drop all recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
