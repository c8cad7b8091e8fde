//! Reconciles the fixed-step physics clock with the variable-rate idle clock.
//!
//! Every driver iteration the [`TimerSync`] is fed the current cpu tick and
//! asked to [`advance`](TimerSync::advance). It answers with a [`FrameTime`]:
//! how many fixed physics steps to simulate, how long the idle (render) step
//! is, and how far into the next unsimulated physics step the wall clock is.
//!
//! # Jitter fix
//!
//! Naively, `physics_steps = floor(accumulated_time * physics_fps)`. At a
//! render rate close to the physics rate, sampling noise then alternates the
//! step count between 0, 1 and 2 and the simulation visibly stutters. The
//! timer keeps a short history of step counts (`CONTROL_STEPS` frames) and,
//! whenever the measured count is within `physics_jitter_fix` of a slice from
//! the typical count, snaps to the typical count instead. The idle step is
//! then clamped so that the snapped time stays consistent with the physics
//! clock, and whatever was hidden is carried into the next frame as a
//! deficit. The deficit never exceeds `physics_jitter_fix * frame_slice`, so
//! the sum of reported idle steps tracks wall time to within that window.
//!
//! # Fixed fps
//!
//! With a fixed fps override the wall clock is ignored entirely: every call
//! reports one physics step and an idle step of exactly `1 / fixed_fps`.
//!
//! # Delta smoothing
//!
//! Optionally, the measured wall-clock step is passed through an exponential
//! low-pass before it enters the jitter fix. A gap above 100 ms (a hitch or a
//! paused process) resets the filter instead of smearing the gap over the
//! following frames.

/// Upper bound on physics steps per driver iteration (spiral-of-death clamp).
pub const MAX_PHYSICS_STEPS: u32 = 8;

/// Number of frames of step history used by the jitter fix.
const CONTROL_STEPS: usize = 12;

/// Wall-clock gaps above this many seconds reset the delta smoother.
const SMOOTHING_RESET_GAP: f64 = 0.1;

/// Low-pass coefficient applied when delta smoothing is enabled.
const SMOOTHING_ALPHA: f64 = 0.1;

// ---------------------------------------------------------------------------
// FrameTime
// ---------------------------------------------------------------------------

/// Timesteps to take for one driver iteration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameTime {
    /// Seconds advanced by the idle phase.
    pub idle_step: f64,
    /// Number of fixed physics steps to simulate.
    pub physics_steps: u32,
    /// Residual of wall time inside the next unsimulated physics step, in
    /// units of the frame slice.
    pub interpolation_fraction: f64,
}

impl FrameTime {
    fn clamp_idle(&mut self, min_idle_step: f64, max_idle_step: f64) {
        if self.idle_step < min_idle_step {
            self.idle_step = min_idle_step;
        } else if self.idle_step > max_idle_step {
            self.idle_step = max_idle_step;
        }
    }

    /// Limit `physics_steps` to `max_steps`, removing the discarded simulation
    /// time from the idle step so the simulation slows down relative to the
    /// wall clock instead of falling further behind every frame.
    ///
    /// Returns the number of discarded steps.
    pub fn clamp_physics_steps(&mut self, frame_slice: f64, max_steps: u32) -> u32 {
        if self.physics_steps <= max_steps {
            return 0;
        }
        let discarded = self.physics_steps - max_steps;
        self.idle_step -= f64::from(discarded) * frame_slice;
        self.physics_steps = max_steps;
        discarded
    }
}

// ---------------------------------------------------------------------------
// DeltaSmoother
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct DeltaSmoother {
    smoothed: Option<f64>,
}

impl DeltaSmoother {
    fn smooth(&mut self, raw: f64) -> f64 {
        match self.smoothed {
            Some(prev) if raw <= SMOOTHING_RESET_GAP => {
                let next = prev + SMOOTHING_ALPHA * (raw - prev);
                self.smoothed = Some(next);
                next
            }
            Some(_) => {
                self.smoothed = None;
                raw
            }
            None => {
                self.smoothed = Some(raw);
                raw
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TimerSync
// ---------------------------------------------------------------------------

/// Converts wall-clock deltas into physics steps and an idle step.
#[derive(Debug, Clone)]
pub struct TimerSync {
    last_cpu_ticks_us: u64,
    current_cpu_ticks_us: u64,
    /// Simulated-but-unconsumed time, kept inside `[0, frame_slice]`.
    time_accum: f64,
    /// Wall time hidden by the jitter fix, re-added on the next frame.
    time_deficit: f64,
    /// Typical step count over the last `i + 1` frames.
    typical_physics_steps: [i64; CONTROL_STEPS],
    /// Actual step count over the last `i + 1` frames.
    accumulated_physics_steps: [i64; CONTROL_STEPS],
    fixed_fps: i32,
    physics_jitter_fix: f64,
    smoother: Option<DeltaSmoother>,
}

impl TimerSync {
    /// Create a timer with the given jitter-fix tolerance (fraction of a
    /// frame slice; 0 disables snapping).
    pub fn new(physics_jitter_fix: f64) -> Self {
        let mut typical = [0i64; CONTROL_STEPS];
        let mut accumulated = [0i64; CONTROL_STEPS];
        for i in 0..CONTROL_STEPS {
            typical[i] = i as i64;
            accumulated[i] = i as i64;
        }
        Self {
            last_cpu_ticks_us: 0,
            current_cpu_ticks_us: 0,
            time_accum: 0.0,
            time_deficit: 0.0,
            typical_physics_steps: typical,
            accumulated_physics_steps: accumulated,
            fixed_fps: -1,
            physics_jitter_fix: physics_jitter_fix.max(0.0),
            smoother: None,
        }
    }

    /// Start the clock. The first [`advance`](Self::advance) measures from
    /// `cpu_ticks_us`.
    pub fn init(&mut self, cpu_ticks_us: u64) {
        self.last_cpu_ticks_us = cpu_ticks_us;
        self.current_cpu_ticks_us = cpu_ticks_us;
    }

    /// Record the wall clock reading for the next `advance`.
    pub fn set_cpu_ticks_us(&mut self, cpu_ticks_us: u64) {
        self.current_cpu_ticks_us = cpu_ticks_us;
    }

    /// Set the fixed fps override; `-1` (or any value below 1) means real time.
    pub fn set_fixed_fps(&mut self, fixed_fps: i32) {
        self.fixed_fps = fixed_fps;
    }

    /// The fixed fps override if one is active.
    pub fn fixed_fps(&self) -> Option<u32> {
        (self.fixed_fps > 0).then_some(self.fixed_fps as u32)
    }

    pub fn set_physics_jitter_fix(&mut self, jitter_fix: f64) {
        self.physics_jitter_fix = jitter_fix.max(0.0);
    }

    pub fn physics_jitter_fix(&self) -> f64 {
        self.physics_jitter_fix
    }

    /// Enable or disable the low-pass filter on the measured step.
    pub fn set_delta_smoothing(&mut self, enabled: bool) {
        self.smoother = enabled.then(DeltaSmoother::default);
    }

    pub fn delta_smoothing(&self) -> bool {
        self.smoother.is_some()
    }

    /// Wall time currently hidden by the jitter fix, in seconds.
    pub fn time_deficit(&self) -> f64 {
        self.time_deficit
    }

    /// Advance one frame and return the timesteps to take.
    ///
    /// `frame_slice` is `1 / physics_fps` in seconds.
    pub fn advance(&mut self, frame_slice: f64, physics_fps: u32) -> FrameTime {
        let cpu_idle_step = self.cpu_idle_step();

        if let Some(fixed) = self.fixed_fps() {
            return FrameTime {
                idle_step: 1.0 / f64::from(fixed),
                physics_steps: 1,
                interpolation_fraction: 0.0,
            };
        }

        let idle_step = match self.smoother.as_mut() {
            Some(smoother) => smoother.smooth(cpu_idle_step),
            None => cpu_idle_step,
        };

        self.advance_checked(frame_slice, physics_fps.max(1), idle_step)
    }

    /// Wall-clock seconds since the previous call.
    fn cpu_idle_step(&mut self) -> f64 {
        let elapsed = self
            .current_cpu_ticks_us
            .saturating_sub(self.last_cpu_ticks_us);
        self.last_cpu_ticks_us = self.current_cpu_ticks_us;
        elapsed as f64 / 1_000_000.0
    }

    /// Best guess for the average number of physics steps per frame.
    ///
    /// Returns `(consistent_frames, min, max)`: over the last
    /// `consistent_frames` frames the average lies in `[min, max]`.
    fn average_physics_steps(&self) -> (usize, f64, f64) {
        let mut min = self.typical_physics_steps[0] as f64;
        let mut max = min + 1.0;

        for i in 1..CONTROL_STEPS {
            let typical_lower = self.typical_physics_steps[i] as f64;
            let current_min = typical_lower / (i + 1) as f64;
            if current_min > max {
                return (i, min, max);
            } else if current_min > min {
                min = current_min;
            }
            let current_max = (typical_lower + 1.0) / (i + 1) as f64;
            if current_max < min {
                return (i, min, max);
            } else if current_max < max {
                max = current_max;
            }
        }

        (CONTROL_STEPS, min, max)
    }

    /// Advance the physics clock by `idle_step` and pick a step count that is
    /// consistent with recent history when the jitter window allows it.
    fn advance_core(&mut self, frame_slice: f64, physics_fps: u32, idle_step: f64) -> FrameTime {
        let ips = f64::from(physics_fps);
        let jitter = self.physics_jitter_fix;

        self.time_accum += idle_step;
        let mut physics_steps = (self.time_accum * ips).floor() as i64;

        let mut min_typical_steps = self.typical_physics_steps[0];
        let mut max_typical_steps = min_typical_steps + 1;

        // Bounds for this frame's step count that keep every window of the
        // history at its typical value.
        let mut update_typical = false;
        for i in 0..CONTROL_STEPS - 1 {
            let steps_left_to_match_typical =
                self.typical_physics_steps[i + 1] - self.accumulated_physics_steps[i];
            if steps_left_to_match_typical > max_typical_steps
                || steps_left_to_match_typical + 1 < min_typical_steps
            {
                update_typical = true;
                break;
            }
            if steps_left_to_match_typical > min_typical_steps {
                min_typical_steps = steps_left_to_match_typical;
            }
            if steps_left_to_match_typical + 1 < max_typical_steps {
                max_typical_steps = steps_left_to_match_typical + 1;
            }
        }

        if physics_steps < min_typical_steps {
            let max_possible_steps = (self.time_accum * ips + jitter).floor() as i64;
            if max_possible_steps < min_typical_steps {
                physics_steps = max_possible_steps;
                update_typical = true;
            } else {
                physics_steps = min_typical_steps;
            }
        } else if physics_steps > max_typical_steps {
            // A step the clamp would keep is never rounded away.
            let min_possible_steps = if physics_steps >= i64::from(MAX_PHYSICS_STEPS) {
                physics_steps
            } else {
                (self.time_accum * ips - jitter).floor() as i64
            };
            if min_possible_steps > max_typical_steps {
                physics_steps = min_possible_steps;
                update_typical = true;
            } else {
                physics_steps = max_typical_steps;
            }
        }
        let physics_steps = physics_steps.max(0);

        self.time_accum -= physics_steps as f64 * frame_slice;

        for i in (0..CONTROL_STEPS - 1).rev() {
            self.accumulated_physics_steps[i + 1] =
                self.accumulated_physics_steps[i] + physics_steps;
        }
        self.accumulated_physics_steps[0] = physics_steps;

        if update_typical {
            for i in (0..CONTROL_STEPS).rev() {
                let accumulated = self.accumulated_physics_steps[i];
                if self.typical_physics_steps[i] > accumulated {
                    self.typical_physics_steps[i] = accumulated;
                } else if self.typical_physics_steps[i] < accumulated - 1 {
                    self.typical_physics_steps[i] = accumulated - 1;
                }
            }
        }

        FrameTime {
            idle_step,
            physics_steps: physics_steps as u32,
            interpolation_fraction: 0.0,
        }
    }

    /// Run [`advance_core`](Self::advance_core) and clamp the idle step so the
    /// accumulated deficit stays within the jitter window.
    fn advance_checked(&mut self, frame_slice: f64, physics_fps: u32, idle_step: f64) -> FrameTime {
        let idle_step = idle_step + self.time_deficit;

        let mut ret = self.advance_core(frame_slice, physics_fps, idle_step);

        // The clamps below move `ret.idle_step`; `time_accum` has to follow.
        let idle_minus_accum = ret.idle_step - self.time_accum;

        // Least important: smooth the idle step towards the typical step rate.
        let (consistent_steps, min_average, max_average) = self.average_physics_steps();
        if consistent_steps > 3 {
            ret.clamp_idle(min_average * frame_slice, max_average * frame_slice);
        }

        // Keep |time_deficit| below jitter_fix * frame_slice.
        let max_clock_deviation = self.physics_jitter_fix * frame_slice;
        ret.clamp_idle(idle_step - max_clock_deviation, idle_step + max_clock_deviation);

        // Keep time_accum inside [0, frame_slice].
        ret.clamp_idle(idle_minus_accum, idle_minus_accum + frame_slice);

        self.time_accum = ret.idle_step - idle_minus_accum;
        self.time_deficit = idle_step - ret.idle_step;

        ret.interpolation_fraction = (self.time_accum / frame_slice).clamp(0.0, 1.0);
        ret
    }
}

impl Default for TimerSync {
    /// Jitter fix of 0.5, matching the `physics/common/physics_jitter_fix`
    /// default.
    fn default() -> Self {
        Self::new(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    const SLICE_60: f64 = 1.0 / 60.0;

    fn feed(sync: &mut TimerSync, ticks: &[u64], fps: u32) -> Vec<FrameTime> {
        let slice = 1.0 / f64::from(fps);
        ticks
            .iter()
            .map(|&t| {
                sync.set_cpu_ticks_us(t);
                sync.advance(slice, fps)
            })
            .collect()
    }

    // -- 1. Steady cadence ----------------------------------------------------

    #[test]
    fn sixty_hz_clock_reports_one_step_per_frame() {
        let mut sync = TimerSync::new(0.5);
        sync.init(0);
        let frames = feed(&mut sync, &[16_667, 33_333, 50_000], 60);

        for ft in frames {
            assert_eq!(ft.physics_steps, 1);
            assert!((ft.idle_step - SLICE_60).abs() < 1e-4, "idle {}", ft.idle_step);
            assert!(ft.interpolation_fraction < 0.01, "frac {}", ft.interpolation_fraction);
        }
    }

    #[test]
    fn long_steady_run_never_deviates_from_one_step() {
        let mut sync = TimerSync::new(0.5);
        sync.init(0);
        let ticks: Vec<u64> = (1..=600).map(|i| i * 1_000_000 / 60).collect();
        for ft in feed(&mut sync, &ticks, 60) {
            assert_eq!(ft.physics_steps, 1);
        }
    }

    #[test]
    fn render_at_double_rate_alternates_steps() {
        let mut sync = TimerSync::new(0.5);
        sync.init(0);
        let ticks: Vec<u64> = (1..=240).map(|i| i * 1_000_000 / 120).collect();
        let frames = feed(&mut sync, &ticks, 60);

        let total: u32 = frames.iter().map(|f| f.physics_steps).sum();
        assert!((119..=121).contains(&total), "total steps {total}");
        assert!(frames.iter().all(|f| f.physics_steps <= 1));
    }

    // -- 2. Jitter fix --------------------------------------------------------

    #[test]
    fn sampling_noise_is_hidden_by_jitter_fix() {
        let mut rng = rand_pcg::Pcg32::seed_from_u64(7);
        let mut sync = TimerSync::new(0.5);
        sync.init(0);

        let mut now = 0u64;
        let mut wall = 0.0;
        let mut idle_sum = 0.0;
        for _ in 0..1_000 {
            let delta = 16_667i64 + rng.gen_range(-1_000i64..=1_000);
            now += delta as u64;
            wall += delta as f64 / 1e6;
            sync.set_cpu_ticks_us(now);
            let ft = sync.advance(SLICE_60, 60);
            assert_eq!(ft.physics_steps, 1, "noise leaked into the step count");
            idle_sum += ft.idle_step;
        }
        assert!((wall - idle_sum).abs() <= 0.5 * SLICE_60 + 1e-9);
    }

    #[test]
    fn zero_jitter_fix_reports_raw_floor() {
        let mut sync = TimerSync::new(0.0);
        sync.init(0);
        let ft = feed(&mut sync, &[40_000], 60)[0];
        // 40ms at 60Hz is 2.4 slices.
        assert_eq!(ft.physics_steps, 2);
    }

    // -- 3. Large jumps and the step clamp ------------------------------------

    #[test]
    fn half_second_jump_clamps_to_max_steps() {
        let mut sync = TimerSync::new(0.5);
        sync.init(0);
        let mut ft = feed(&mut sync, &[500_000], 60)[0];
        assert!(ft.physics_steps > MAX_PHYSICS_STEPS);

        let before = ft;
        let discarded = ft.clamp_physics_steps(SLICE_60, MAX_PHYSICS_STEPS);
        assert_eq!(ft.physics_steps, MAX_PHYSICS_STEPS);
        assert_eq!(discarded, before.physics_steps - MAX_PHYSICS_STEPS);
        let expected = before.idle_step - f64::from(discarded) * SLICE_60;
        assert!((ft.idle_step - expected).abs() < 1e-12);
    }

    #[test]
    fn jump_just_over_the_limit_keeps_every_step() {
        for jump_us in [138_333, 140_000] {
            for warmup in [0u64, 10] {
                let mut sync = TimerSync::new(0.5);
                sync.init(0);
                let mut ticks: Vec<u64> = (1..=warmup).map(|i| i * 16_667).collect();
                ticks.push(warmup * 16_667 + jump_us);
                let mut ft = *feed(&mut sync, &ticks, 60).last().unwrap();
                ft.clamp_physics_steps(SLICE_60, MAX_PHYSICS_STEPS);
                assert_eq!(
                    ft.physics_steps, MAX_PHYSICS_STEPS,
                    "jump {jump_us}us after {warmup} frames"
                );
            }
        }
    }

    #[test]
    fn clamp_is_noop_below_limit() {
        let mut ft = FrameTime {
            idle_step: 0.05,
            physics_steps: 3,
            interpolation_fraction: 0.2,
        };
        assert_eq!(ft.clamp_physics_steps(SLICE_60, MAX_PHYSICS_STEPS), 0);
        assert_eq!(ft.physics_steps, 3);
        assert_eq!(ft.idle_step, 0.05);
    }

    // -- 4. Fixed fps ---------------------------------------------------------

    #[test]
    fn fixed_fps_ignores_wall_clock() {
        let mut sync = TimerSync::new(0.5);
        sync.set_fixed_fps(30);
        sync.init(0);
        for ft in feed(&mut sync, &[1, 900_000, 900_001, 5_000_000], 60) {
            assert_eq!(ft.physics_steps, 1);
            assert_eq!(ft.idle_step, 1.0 / 30.0);
            assert_eq!(ft.interpolation_fraction, 0.0);
        }
    }

    #[test]
    fn negative_fixed_fps_means_real_time() {
        let mut sync = TimerSync::new(0.5);
        sync.set_fixed_fps(-1);
        assert_eq!(sync.fixed_fps(), None);
    }

    // -- 5. Delta smoothing ---------------------------------------------------

    #[test]
    fn smoothing_damps_a_single_spike() {
        let mut raw = TimerSync::new(0.0);
        let mut smooth = TimerSync::new(0.0);
        smooth.set_delta_smoothing(true);
        raw.init(0);
        smooth.init(0);

        let ticks = [16_667, 33_333, 50_000, 90_000, 106_667];
        let raw_frames = feed(&mut raw, &ticks, 60);
        let smooth_frames = feed(&mut smooth, &ticks, 60);

        assert!(smooth_frames[3].idle_step < raw_frames[3].idle_step);
    }

    #[test]
    fn smoothing_resets_after_long_gap() {
        let mut smoother = DeltaSmoother::default();
        assert_eq!(smoother.smooth(0.016), 0.016);
        let damped = smoother.smooth(0.030);
        assert!(damped < 0.030);
        assert_eq!(smoother.smooth(0.5), 0.5);
        assert_eq!(smoother.smooth(0.016), 0.016);
    }
}
