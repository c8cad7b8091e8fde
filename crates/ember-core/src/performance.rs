//! Performance monitors published once per second by the frame driver.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::frame_stats::SecondReport;

/// Named monitor slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    TimeFps,
    TimeProcess,
    TimePhysicsProcess,
    /// Number of messages flushed by the message queue during the last second.
    MessageQueueFlushed,
    FramesDrawn,
}

/// Latest values of every monitor.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Performance {
    values: BTreeMap<Monitor, f64>,
}

impl Performance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, monitor: Monitor, value: f64) {
        self.values.insert(monitor, value);
    }

    /// Current value, zero when never published.
    pub fn get(&self, monitor: Monitor) -> f64 {
        self.values.get(&monitor).copied().unwrap_or(0.0)
    }

    /// Publish a second's worth of frame statistics.
    pub fn publish(&mut self, report: &SecondReport) {
        self.set(Monitor::TimeFps, f64::from(report.fps));
        self.set(Monitor::TimeProcess, report.idle_process_max);
        self.set(Monitor::TimePhysicsProcess, report.physics_process_max);
    }

    /// Snapshot as JSON, for the debugger and `--print-fps` tooling.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.values).unwrap_or(serde_json::Value::Null)
    }
}
