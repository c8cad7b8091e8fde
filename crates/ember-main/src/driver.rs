//! The per-iteration scheduler.
//!
//! One call to [`FrameDriver::iteration`] runs, in order:
//!
//! 1. clock sample and delta-sync reference
//! 2. [`TimerSync::advance`] and the spiral-of-death clamp
//! 3. the physics steps
//! 4. the post-physics input flush (unless input is flushed per step)
//! 5. canvas convergence
//! 6. the idle step, rendering callbacks and the render-thread rendezvous
//! 7. draw
//! 8. profiling and the per-second report
//! 9. frame delay and target-fps pacing
//!
//! Within a physics step the order is fixed: `physics_3d.flush_queries`,
//! `physics_2d.sync`, `physics_2d.flush_queries`, main loop `iteration`,
//! message flush, `physics_3d.step`, `navigation.process`,
//! `physics_2d.end_sync`, `physics_2d.step`, message flush. Messages posted
//! by the main loop are therefore delivered before the physics servers step.

use std::sync::Arc;

use ember_core::clock::Clock;
use ember_core::frame_stats::FrameStats;
use ember_core::timer_sync::{TimerSync, MAX_PHYSICS_STEPS};
use ember_servers::handle::ServerState;
use ember_servers::registry::ServerRegistry;
use ember_servers::servers::{
    ArVrServer, AudioServer, NavigationServer, PhysicsServer, RenderingCallbacks, RenderingServer,
};
use ember_servers::ServerError;

use crate::config::BootConfig;
use crate::context::EngineContext;
use crate::debugger::FrameTimes;
use crate::main_loop::MainLoop;

pub const RENDERING: &str = "rendering";
pub const AUDIO: &str = "audio";
pub const ARVR: &str = "arvr";
pub const PHYSICS_2D: &str = "physics_2d";
pub const PHYSICS_3D: &str = "physics_3d";
pub const NAVIGATION: &str = "navigation";
pub const CAMERA: &str = "camera";
pub const RENDERING_CALLBACKS: &str = "rendering_callbacks";

/// Servers the driver calls every iteration.
pub const REQUIRED_SERVERS: [&str; 7] = [
    RENDERING,
    AUDIO,
    ARVR,
    PHYSICS_2D,
    PHYSICS_3D,
    NAVIGATION,
    RENDERING_CALLBACKS,
];

/// A post-draw delta reference older than this is discarded.
const DELTA_SYNC_RECOVERY_US: u64 = 100_000;

/// Drives the main loop and the servers one iteration at a time.
pub struct FrameDriver {
    clock: Arc<dyn Clock>,
    timer: TimerSync,
    stats: FrameStats,
    post_draw_ticks: Option<u64>,
    force_redraw: bool,
    iterations: u64,
}

impl FrameDriver {
    /// Create a driver for `ctx`. Every server in [`REQUIRED_SERVERS`] must be
    /// initialized.
    pub fn new(ctx: &EngineContext) -> Result<Self, ServerError> {
        for name in REQUIRED_SERVERS {
            match ctx.registry.state(name) {
                Some(ServerState::Initialized) => {}
                Some(state) => {
                    return Err(ServerError::ContractViolation(format!(
                        "frame driver needs '{name}' initialized, found {state:?}"
                    )))
                }
                None => return Err(ServerError::NotRegistered(name.to_string())),
            }
        }

        let now = ctx.clock.now_us();
        let mut timer = TimerSync::new(ctx.engine.physics_jitter_fix());
        timer.init(now);
        timer.set_fixed_fps(ctx.config.fixed_fps);
        timer.set_delta_smoothing(ctx.config.delta_smoothing);

        tracing::debug!(
            physics_fps = ctx.engine.physics_fps(),
            fixed_fps = ctx.config.fixed_fps,
            target_fps = ctx.engine.target_fps(),
            "frame driver ready"
        );

        Ok(Self {
            clock: Arc::clone(&ctx.clock),
            timer,
            stats: FrameStats::new(now),
            post_draw_ticks: None,
            force_redraw: false,
            iterations: 0,
        })
    }

    /// Draw on the next iteration even in low-processor mode.
    pub fn force_redraw(&mut self) {
        self.force_redraw = true;
    }

    /// Completed iterations.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    /// Run one iteration. Returns `true` when the process should exit.
    pub fn iteration(&mut self, ctx: &mut EngineContext) -> bool {
        // Clock and timesteps.
        let frame_begin = self.clock.now_us();
        ctx.engine.frame_ticks_us = frame_begin;
        self.stats.begin_frame(frame_begin);

        let fixed_fps = self.timer.fixed_fps();
        let delta_ref = match self.post_draw_ticks {
            Some(cached)
                if ctx.config.delta_sync_after_draw
                    && fixed_fps.is_none()
                    && frame_begin.saturating_sub(cached) <= DELTA_SYNC_RECOVERY_US =>
            {
                cached
            }
            _ => frame_begin,
        };
        self.timer.set_cpu_ticks_us(delta_ref);

        let frame_slice = match fixed_fps {
            Some(fps) => 1.0 / f64::from(fps),
            None => ctx.engine.frame_slice(),
        };
        let mut time = self.timer.advance(frame_slice, ctx.engine.physics_fps());
        if fixed_fps.is_none() {
            let discarded = time.clamp_physics_steps(frame_slice, MAX_PHYSICS_STEPS);
            if discarded > 0 {
                tracing::debug!(discarded, "physics falling behind, steps dropped");
            }
        }
        ctx.engine.frame_step = time.idle_step;
        ctx.engine.physics_interpolation_fraction = time.interpolation_fraction;

        let time_scale = ctx.engine.time_scale();
        let physics_delta = frame_slice * time_scale;
        let buffered_input = ctx.config.use_input_buffering;
        let agile_input = ctx.config.agile_input_flushing;
        let mut exit = false;

        // Physics.
        let physics_begin = self.clock.now_us();
        ctx.engine.in_physics = true;
        for _ in 0..time.physics_steps {
            let step_begin = self.clock.now_us();
            if buffered_input && agile_input {
                ctx.platform.flush_buffered_input();
            }

            physics(&mut ctx.registry, PHYSICS_3D, |p| p.flush_queries());
            physics(&mut ctx.registry, PHYSICS_2D, |p| p.sync());
            physics(&mut ctx.registry, PHYSICS_2D, |p| p.flush_queries());

            let quit = ctx
                .main_loop
                .as_mut()
                .is_some_and(|m| m.iteration(physics_delta));
            if quit {
                physics(&mut ctx.registry, PHYSICS_2D, |p| p.end_sync());
                exit = true;
                break;
            }

            flush_messages(ctx);

            physics(&mut ctx.registry, PHYSICS_3D, |p| p.step(physics_delta));
            server::<dyn NavigationServer>(&mut ctx.registry, NAVIGATION, |n| {
                n.process(physics_delta)
            });
            physics(&mut ctx.registry, PHYSICS_2D, |p| p.end_sync());
            physics(&mut ctx.registry, PHYSICS_2D, |p| p.step(physics_delta));

            flush_messages(ctx);

            ctx.engine.physics_frames += 1;
            self.stats
                .record_physics_us(self.clock.now_us().saturating_sub(step_begin));
        }
        ctx.engine.in_physics = false;
        let physics_us = self.clock.now_us().saturating_sub(physics_begin);

        if buffered_input && !agile_input {
            ctx.platform.flush_buffered_input();
        }

        // Canvas convergence.
        if let Some(main_loop) = ctx.main_loop.as_mut() {
            while main_loop.update_pending_canvas_items() {}
        }

        // Idle.
        let idle_begin = self.clock.now_us();
        server::<dyn ArVrServer>(&mut ctx.registry, ARVR, |a| a.process());
        let idle_delta = time.idle_step * time_scale;
        if ctx.main_loop.as_mut().is_some_and(|m| m.idle(idle_delta)) {
            exit = true;
        }
        ctx.engine.idle_frames += 1;

        if let Ok(callbacks) = ctx.registry.get_mut::<RenderingCallbacks>(RENDERING_CALLBACKS) {
            callbacks.flush();
        }
        flush_messages(ctx);
        server::<dyn RenderingServer>(&mut ctx.registry, RENDERING, |r| r.sync());

        // Draw.
        if ctx.platform.can_draw() && !ctx.config.disable_render_loop {
            let low_processor = ctx.config.low_processor_mode;
            let force = self.force_redraw;
            let mut drawn = false;
            server::<dyn RenderingServer>(&mut ctx.registry, RENDERING, |r| {
                if low_processor && !force {
                    if r.has_changed() {
                        r.draw(true, idle_delta);
                        drawn = true;
                    }
                } else {
                    r.draw(true, idle_delta);
                    drawn = true;
                }
            });
            if drawn {
                ctx.engine.frames_drawn += 1;
            }
            if !low_processor || force {
                self.force_redraw = false;
            }
        }

        if ctx.config.delta_sync_after_draw {
            self.post_draw_ticks = Some(self.clock.now_us());
        }

        // Profiling.
        let now = self.clock.now_us();
        let idle_us = now.saturating_sub(idle_begin);
        self.stats.record_idle_us(idle_us);
        let frame_time_us = now.saturating_sub(frame_begin);

        ctx.scripts.frame_all();
        server::<dyn AudioServer>(&mut ctx.registry, AUDIO, |a| a.update());
        if let Some(debugger) = ctx.debugger.as_mut() {
            debugger.add_frame_times(FrameTimes {
                frame_time_us,
                idle_time_us: idle_us,
                physics_time_us: physics_us,
                physics_frame_time: frame_slice,
            });
            debugger.poll();
        }

        self.iterations += 1;
        if let Some(report) = self.stats.end_frame() {
            ctx.engine.fps = report.fps;
            if ctx.config.print_fps {
                tracing::info!("{}", fps_line(&ctx.config, report.fps, report.mspf));
            }
            ctx.performance.publish(&report);
        }

        let done = exit || ctx.config.auto_quit;
        if fixed_fps.is_some() {
            return done;
        }

        // Pacing.
        self.add_frame_delay(ctx);
        let target_fps = ctx.engine.target_fps();
        if target_fps > 0 && !ctx.engine.is_editor_hint() {
            let time_step = 1_000_000 / u64::from(target_fps);
            self.stats.target_ticks_us += time_step;
            let now = self.clock.now_us();
            if now < self.stats.target_ticks_us {
                self.clock.sleep_us(self.stats.target_ticks_us - now);
            }
            let now = self.clock.now_us();
            self.stats.target_ticks_us = self
                .stats
                .target_ticks_us
                .clamp(now.saturating_sub(time_step), now + time_step);
        }

        done
    }

    fn add_frame_delay(&self, ctx: &EngineContext) {
        if ctx.config.frame_delay_ms > 0 {
            self.clock.sleep_us(u64::from(ctx.config.frame_delay_ms) * 1000);
        }
        if ctx.config.low_processor_mode || !ctx.platform.can_draw() {
            self.clock.sleep_us(ctx.config.low_processor_sleep_us);
        }
    }
}

impl std::fmt::Debug for FrameDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDriver")
            .field("iterations", &self.iterations)
            .field("fixed_fps", &self.timer.fixed_fps())
            .field("force_redraw", &self.force_redraw)
            .finish()
    }
}

/// Run `f` on the server registered as `name`. A missing server was already
/// reported by [`FrameDriver::new`]; here it is only traced.
fn server<T: ?Sized + 'static>(
    registry: &mut ServerRegistry,
    name: &str,
    f: impl FnOnce(&mut T),
) {
    match registry.get_mut::<Box<T>>(name) {
        Ok(server) => f(server.as_mut()),
        Err(e) => tracing::trace!(server = name, error = %e, "server call skipped"),
    }
}

fn physics(
    registry: &mut ServerRegistry,
    name: &str,
    f: impl FnOnce(&mut (dyn PhysicsServer + 'static)),
) {
    server::<dyn PhysicsServer>(registry, name, f);
}

/// `Game FPS: 60 (16.7 mspf)`. The editor and project manager report as `Editor`.
fn fps_line(config: &BootConfig, fps: u32, mspf: f64) -> String {
    let role = if config.editor || config.project_manager {
        "Editor"
    } else {
        "Game"
    };
    format!("{role} FPS: {fps} ({mspf:.1} mspf)")
}

fn flush_messages(ctx: &mut EngineContext) {
    if let Some(queue) = ctx.message_queue.as_mut() {
        queue.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_line_names_the_role() {
        let mut config = BootConfig::default();
        assert_eq!(fps_line(&config, 60, 16.6667), "Game FPS: 60 (16.7 mspf)");

        config.project_manager = true;
        assert_eq!(fps_line(&config, 144, 6.94), "Editor FPS: 144 (6.9 mspf)");

        config.project_manager = false;
        config.editor = true;
        assert_eq!(fps_line(&config, 30, 33.333), "Editor FPS: 30 (33.3 mspf)");
    }
}
