//! Per-second frame accounting.
//!
//! The frame driver owns a single [`FrameStats`]. Each iteration it records
//! the wall time spent and the worst physics and idle phase durations; once a
//! full second has accumulated, [`FrameStats::end_frame`] hands back a
//! [`SecondReport`] and starts the next second.

/// Frame statistics carried between driver iterations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Tick reading at the start of the previous iteration.
    pub last_ticks_us: u64,
    /// Frames completed in the current second.
    pub frames_this_second: u32,
    /// Microseconds accumulated toward the current second.
    pub frame_us_accum: u64,
    /// Worst physics phase duration seen this second.
    pub physics_process_max_us: u64,
    /// Worst idle phase duration seen this second.
    pub idle_process_max_us: u64,
    /// Deadline for the target-fps limiter. Zero until the first limited frame.
    pub target_ticks_us: u64,
}

/// Summary published when a second boundary is crossed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondReport {
    /// Frames completed during the second.
    pub fps: u32,
    /// Average milliseconds per frame.
    pub mspf: f64,
    /// Worst physics phase duration during the second, in seconds.
    pub physics_process_max: f64,
    /// Worst idle phase duration during the second, in seconds.
    pub idle_process_max: f64,
}

impl FrameStats {
    pub fn new(start_ticks_us: u64) -> Self {
        Self {
            last_ticks_us: start_ticks_us,
            ..Self::default()
        }
    }

    /// Account for the wall time since the previous iteration and return the
    /// elapsed microseconds.
    pub fn begin_frame(&mut self, ticks_us: u64) -> u64 {
        let elapsed = ticks_us.saturating_sub(self.last_ticks_us);
        self.frame_us_accum += elapsed;
        self.last_ticks_us = ticks_us;
        elapsed
    }

    pub fn record_physics_us(&mut self, us: u64) {
        self.physics_process_max_us = self.physics_process_max_us.max(us);
    }

    pub fn record_idle_us(&mut self, us: u64) {
        self.idle_process_max_us = self.idle_process_max_us.max(us);
    }

    /// Count a completed frame. Returns a report when more than a second has
    /// accumulated; the remainder carries into the next second.
    pub fn end_frame(&mut self) -> Option<SecondReport> {
        self.frames_this_second += 1;

        if self.frame_us_accum <= 1_000_000 {
            return None;
        }

        let fps = self.frames_this_second;
        let report = SecondReport {
            fps,
            mspf: 1000.0 / f64::from(fps.max(1)),
            physics_process_max: self.physics_process_max_us as f64 / 1e6,
            idle_process_max: self.idle_process_max_us as f64 / 1e6,
        };

        self.frame_us_accum %= 1_000_000;
        self.frames_this_second = 0;
        self.physics_process_max_us = 0;
        self.idle_process_max_us = 0;
        Some(report)
    }
}
