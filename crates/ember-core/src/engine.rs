//! Engine-wide tunables and frame counters.
//!
//! [`EngineSettings`] is the first core singleton constructed in `setup`. It
//! holds the values the frame driver reads every iteration (physics rate,
//! time scale, target fps) and the counters it writes back (frames drawn,
//! physics frames, the last frame step).

use rand::SeedableRng;
use rand_pcg::Pcg32;

/// Default physics iterations per second.
pub const DEFAULT_PHYSICS_FPS: u32 = 60;

/// Default jitter-fix tolerance, as a fraction of the frame slice.
pub const DEFAULT_PHYSICS_JITTER_FIX: f64 = 0.5;

/// Tunables and counters shared by the bootstrapper and the frame driver.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    physics_fps: u32,
    physics_jitter_fix: f64,
    target_fps: u32,
    time_scale: f64,
    editor_hint: bool,

    /// Physics frames simulated since start.
    pub physics_frames: u64,
    /// Idle frames processed since start.
    pub idle_frames: u64,
    /// Frames actually drawn since start.
    pub frames_drawn: u64,
    /// Frames per second measured over the last full second.
    pub fps: u32,
    /// Idle step of the last driver iteration, in seconds.
    pub frame_step: f64,
    /// Interpolation fraction of the last driver iteration.
    pub physics_interpolation_fraction: f64,
    /// True while the driver is inside the physics phase.
    pub in_physics: bool,
    /// Tick reading at the start of the current driver iteration.
    pub frame_ticks_us: u64,

    rng: Pcg32,
}

impl EngineSettings {
    /// Create engine settings, seeding the engine RNG from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            physics_fps: DEFAULT_PHYSICS_FPS,
            physics_jitter_fix: DEFAULT_PHYSICS_JITTER_FIX,
            target_fps: 0,
            time_scale: 1.0,
            editor_hint: false,
            physics_frames: 0,
            idle_frames: 0,
            frames_drawn: 0,
            fps: 1,
            frame_step: 0.0,
            physics_interpolation_fraction: 0.0,
            in_physics: false,
            frame_ticks_us: 0,
            rng: Pcg32::seed_from_u64(seed),
        }
    }

    /// Physics iterations per second (always at least 1).
    pub fn physics_fps(&self) -> u32 {
        self.physics_fps
    }

    pub fn set_physics_fps(&mut self, fps: u32) {
        self.physics_fps = fps.max(1);
    }

    /// Seconds per physics step.
    pub fn frame_slice(&self) -> f64 {
        1.0 / f64::from(self.physics_fps)
    }

    pub fn physics_jitter_fix(&self) -> f64 {
        self.physics_jitter_fix
    }

    pub fn set_physics_jitter_fix(&mut self, jitter_fix: f64) {
        self.physics_jitter_fix = jitter_fix.max(0.0);
    }

    /// Frame limiter target; 0 means unbounded.
    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }

    pub fn set_target_fps(&mut self, fps: u32) {
        self.target_fps = fps;
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Negative scales are clamped to 0 (frozen time).
    pub fn set_time_scale(&mut self, scale: f64) {
        self.time_scale = scale.max(0.0);
    }

    /// True when running inside the editor.
    pub fn is_editor_hint(&self) -> bool {
        self.editor_hint
    }

    pub fn set_editor_hint(&mut self, hint: bool) {
        self.editor_hint = hint;
    }

    /// Engine RNG, seeded once at construction.
    pub fn rng(&mut self) -> &mut Pcg32 {
        &mut self.rng
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::new(0)
    }
}
