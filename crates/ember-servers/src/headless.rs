//! Headless servers.
//!
//! These do no real work. They back `--no-window` runs and the dummy
//! drivers, and they can optionally record every call into a shared
//! [`CallLog`], which is how integration tests observe the frame driver's
//! call order.

use std::sync::{Arc, Mutex, PoisonError};

use crate::servers::{
    ArVrServer, AudioServer, BootSplash, CameraServer, Color, Lifecycle, NavigationServer,
    PhysicsServer, RenderingServer,
};
use crate::ServerError;

// ---------------------------------------------------------------------------
// CallLog
// ---------------------------------------------------------------------------

/// Shared, append-only record of `"<server>.<call>"` entries.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    /// Snapshot of every entry so far.
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of entries equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.as_str() == entry)
            .count()
    }

    /// Position of the first entry equal to `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .position(|e| e == entry)
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Name plus optional log, shared by every headless server.
#[derive(Debug, Clone)]
struct Recorder {
    name: String,
    log: Option<CallLog>,
}

impl Recorder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            log: None,
        }
    }

    fn record(&self, call: &str) {
        if let Some(log) = &self.log {
            log.record(format!("{}.{call}", self.name));
        }
    }
}

macro_rules! recorded_lifecycle {
    ($ty:ty) => {
        impl $ty {
            /// Record calls into `log`.
            pub fn with_log(mut self, log: CallLog) -> Self {
                self.recorder.log = Some(log);
                self
            }
        }

        impl Lifecycle for $ty {
            fn init(&mut self) -> Result<(), ServerError> {
                self.recorder.record("init");
                Ok(())
            }

            fn finish(&mut self) {
                self.recorder.record("finish");
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Servers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HeadlessAudio {
    recorder: Recorder,
    pub bus_layout: Option<String>,
}

impl HeadlessAudio {
    pub fn new() -> Self {
        Self {
            recorder: Recorder::new("audio"),
            bus_layout: None,
        }
    }
}

impl Default for HeadlessAudio {
    fn default() -> Self {
        Self::new()
    }
}

recorded_lifecycle!(HeadlessAudio);

impl AudioServer for HeadlessAudio {
    fn update(&mut self) {
        self.recorder.record("update");
    }

    fn load_default_bus_layout(&mut self, path: Option<&str>) -> Result<(), ServerError> {
        self.recorder.record("load_default_bus_layout");
        self.bus_layout = path.map(str::to_string);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessPhysics {
    recorder: Recorder,
    active: bool,
    pub steps: u64,
}

impl HeadlessPhysics {
    /// `name` prefixes logged calls, e.g. `physics_2d.step`.
    pub fn new(name: &str) -> Self {
        Self {
            recorder: Recorder::new(name),
            active: true,
            steps: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

recorded_lifecycle!(HeadlessPhysics);

impl PhysicsServer for HeadlessPhysics {
    fn sync(&mut self) {
        self.recorder.record("sync");
    }

    fn flush_queries(&mut self) {
        self.recorder.record("flush_queries");
    }

    fn step(&mut self, _delta: f64) {
        self.steps += 1;
        self.recorder.record("step");
    }

    fn end_sync(&mut self) {
        self.recorder.record("end_sync");
    }

    fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessNavigation {
    recorder: Recorder,
}

impl HeadlessNavigation {
    pub fn new(name: &str) -> Self {
        Self {
            recorder: Recorder::new(name),
        }
    }
}

recorded_lifecycle!(HeadlessNavigation);

impl NavigationServer for HeadlessNavigation {
    fn process(&mut self, _delta: f64) {
        self.recorder.record("process");
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessCamera {
    recorder: Recorder,
}

impl HeadlessCamera {
    pub fn new() -> Self {
        Self {
            recorder: Recorder::new("camera"),
        }
    }
}

impl Default for HeadlessCamera {
    fn default() -> Self {
        Self::new()
    }
}

recorded_lifecycle!(HeadlessCamera);

impl CameraServer for HeadlessCamera {}

#[derive(Debug, Clone)]
pub struct HeadlessArVr {
    recorder: Recorder,
}

impl HeadlessArVr {
    pub fn new() -> Self {
        Self {
            recorder: Recorder::new("arvr"),
        }
    }
}

impl Default for HeadlessArVr {
    fn default() -> Self {
        Self::new()
    }
}

recorded_lifecycle!(HeadlessArVr);

impl ArVrServer for HeadlessArVr {
    fn process(&mut self) {
        self.recorder.record("process");
    }
}

/// Rendering server that only counts frames.
///
/// `has_changed` reports whatever was last set with
/// [`set_changed`](Self::set_changed); drawing clears it.
#[derive(Debug, Clone)]
pub struct HeadlessRendering {
    recorder: Recorder,
    changed: bool,
    pub frames_drawn: u64,
    pub boot_splash: Option<BootSplash>,
    pub clear_color: Option<Color>,
}

impl HeadlessRendering {
    pub fn new() -> Self {
        Self {
            recorder: Recorder::new("rendering"),
            changed: true,
            frames_drawn: 0,
            boot_splash: None,
            clear_color: None,
        }
    }

    pub fn set_changed(&mut self, changed: bool) {
        self.changed = changed;
    }
}

impl Default for HeadlessRendering {
    fn default() -> Self {
        Self::new()
    }
}

recorded_lifecycle!(HeadlessRendering);

impl RenderingServer for HeadlessRendering {
    fn sync(&mut self) {
        self.recorder.record("sync");
    }

    fn draw(&mut self, _swap_buffers: bool, _frame_step: f64) {
        self.frames_drawn += 1;
        self.changed = false;
        self.recorder.record("draw");
    }

    fn has_changed(&self) -> bool {
        self.changed
    }

    fn set_boot_image(&mut self, splash: &BootSplash) {
        self.boot_splash = Some(splash.clone());
        self.recorder.record("set_boot_image");
    }

    fn set_default_clear_color(&mut self, color: Color) {
        self.clear_color = Some(color);
    }
}
