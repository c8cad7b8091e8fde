//! Frame driver behaviour against a booted engine.
//!
//! Every test boots the engine headless with a recording main loop and a
//! manual clock, then drives iterations one at a time and inspects the call
//! log shared by the platform and every server.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ember_core::clock::{Clock, ManualClock};
use ember_core::message_queue::MessageSender;
use ember_main::prelude::*;
use ember_servers::headless::CallLog;
use serde_json::json;

// -- Fixtures ---------------------------------------------------------------

/// Main loop that records every physics delta, can post a message from
/// inside `iteration` and can queue canvas passes for each physics step.
struct RecordingLoop {
    log: CallLog,
    deltas: Arc<Mutex<Vec<f64>>>,
    options: LoopOptions,
    pending_canvas_passes: usize,
    messages: Option<MessageSender>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LoopOptions {
    post_messages: bool,
    canvas_passes_per_step: usize,
}

impl MainLoop for RecordingLoop {
    fn init(&mut self, messages: MessageSender) {
        self.messages = Some(messages);
    }

    fn iteration(&mut self, delta: f64) -> bool {
        self.deltas.lock().unwrap().push(delta);
        self.pending_canvas_passes += self.options.canvas_passes_per_step;
        if self.options.post_messages {
            if let Some(messages) = &self.messages {
                let log = self.log.clone();
                messages.push(move || log.record("message"));
            }
        }
        false
    }

    fn idle(&mut self, _delta: f64) -> bool {
        self.log.record("main_loop.idle");
        false
    }

    fn update_pending_canvas_items(&mut self) -> bool {
        if self.pending_canvas_passes == 0 {
            return false;
        }
        self.pending_canvas_passes -= 1;
        self.log.record("canvas.pass");
        self.pending_canvas_passes > 0
    }
}

struct Harness {
    boot: Bootstrapper,
    log: CallLog,
    deltas: Arc<Mutex<Vec<f64>>>,
    _dir: tempfile::TempDir,
}

fn harness(
    extra_args: &[&str],
    settings: serde_json::Value,
    clock: Arc<dyn Clock>,
    post_messages: bool,
) -> Harness {
    harness_with(
        CallLog::new(),
        extra_args,
        settings,
        clock,
        LoopOptions {
            post_messages,
            ..LoopOptions::default()
        },
    )
}

fn harness_with(
    log: CallLog,
    extra_args: &[&str],
    settings: serde_json::Value,
    clock: Arc<dyn Clock>,
    options: LoopOptions,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut project = json!({
        "application/run/main_scene": "res://main.tscn",
        "application/run/main_loop_type": "RecordingLoop",
    });
    for (key, value) in settings.as_object().unwrap() {
        project[key] = value.clone();
    }
    std::fs::write(dir.path().join("project.godot"), project.to_string()).unwrap();

    let deltas = Arc::new(Mutex::new(Vec::new()));
    let factory_log = log.clone();
    let factory_deltas = Arc::clone(&deltas);

    let mut argv = vec!["ember".to_string(), "--path".to_string(), path_arg(dir.path())];
    argv.extend(extra_args.iter().map(|s| s.to_string()));

    let mut boot = Bootstrapper::new(
        Box::new(
            HeadlessPlatform::new()
                .with_log(log.clone())
                .with_user_data_dir(dir.path().join("user")),
        ),
        argv,
    )
    .with_clock(clock)
    .with_servers(HeadlessServers::with_log(log.clone()))
    .with_plugin_dir(None)
    .with_class(
        "RecordingLoop",
        "MainLoop",
        Some(Arc::new(move || {
            Box::new(RecordingLoop {
                log: factory_log.clone(),
                deltas: Arc::clone(&factory_deltas),
                options,
                pending_canvas_passes: 0,
                messages: None,
            }) as Box<dyn MainLoop>
        })),
    );
    boot.setup(true).unwrap();
    assert!(boot.start(), "start failed");
    log.clear();

    Harness {
        boot,
        log,
        deltas,
        _dir: dir,
    }
}

fn path_arg(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

/// Oversleeps every sleep by up to 100 µs.
struct JitterClock {
    inner: ManualClock,
    sleeps: AtomicU64,
}

impl Clock for JitterClock {
    fn now_us(&self) -> u64 {
        self.inner.now_us()
    }

    fn sleep_us(&self, us: u64) {
        let n = self.sleeps.fetch_add(1, Ordering::Relaxed);
        self.inner.advance(us + (n * 37) % 101);
    }
}

/// Charges `draw_cost_us` for every `rendering.draw` in the log.
struct DrawClock {
    inner: ManualClock,
    log: CallLog,
    draw_cost_us: AtomicU64,
}

impl Clock for DrawClock {
    fn now_us(&self) -> u64 {
        let draws = self.log.count("rendering.draw") as u64;
        self.inner.now_us() + draws * self.draw_cost_us.load(Ordering::SeqCst)
    }

    fn sleep_us(&self, us: u64) {
        self.inner.sleep_us(us);
    }
}

/// Harness whose draws take `draw_cost_us`, with delta sync after draw on and
/// an exact (jitter-free, unsmoothed) timer.
fn draw_cost_harness(extra_args: &[&str], draw_cost_us: u64) -> (Harness, ManualClock, Arc<DrawClock>) {
    let inner = ManualClock::new(0);
    let log = CallLog::new();
    let clock = Arc::new(DrawClock {
        inner: inner.clone(),
        log: log.clone(),
        draw_cost_us: AtomicU64::new(0),
    });
    let mut args = vec!["--disable-delta-smoothing"];
    args.extend_from_slice(extra_args);
    let h = harness_with(
        log,
        &args,
        json!({
            "gui/timers/delta_sync_after_draw": true,
            "physics/common/physics_jitter_fix": 0.0,
        }),
        clock.clone(),
        LoopOptions::default(),
    );
    // The log was cleared, so no draw is charged yet.
    clock.draw_cost_us.store(draw_cost_us, Ordering::SeqCst);
    (h, inner, clock)
}

// -- 1. Fixed step ----------------------------------------------------------

#[test]
fn fixed_fps_runs_one_step_per_iteration() {
    let clock = ManualClock::new(0);
    let mut h = harness(
        &["--fixed-fps", "120"],
        json!({}),
        Arc::new(clock.clone()),
        false,
    );

    for _ in 0..5 {
        clock.advance(40_000);
        assert!(!h.boot.iteration());
        assert!((h.boot.context().engine.frame_step - 1.0 / 120.0).abs() < 1e-12);
    }
    let deltas = h.deltas.lock().unwrap().clone();
    assert_eq!(deltas.len(), 5);
    assert!(deltas.iter().all(|d| (d - 1.0 / 120.0).abs() < 1e-12));
}

#[test]
fn long_stall_is_clamped_to_eight_steps() {
    let clock = ManualClock::new(0);
    let mut h = harness(&["--disable-delta-smoothing"], json!({}), Arc::new(clock.clone()), false);

    clock.advance(500_000);
    h.boot.iteration();

    assert_eq!(h.log.count("physics_3d.step"), 8);
    assert_eq!(h.deltas.lock().unwrap().len(), 8);
    let expected_idle = 0.5 - 22.0 / 60.0;
    let idle = h.boot.context().engine.frame_step;
    assert!((idle - expected_idle).abs() < 0.02, "idle step {idle}");
}

#[test]
fn steady_sixty_hertz_clock_gives_one_step() {
    let clock = ManualClock::new(0);
    let mut h = harness(&["--disable-delta-smoothing"], json!({}), Arc::new(clock.clone()), false);

    for tick in [16_667, 33_333, 50_000] {
        h.log.clear();
        clock.set(tick);
        h.boot.iteration();
        assert_eq!(h.log.count("physics_3d.step"), 1);
        let engine = &h.boot.context().engine;
        assert!((engine.frame_step - 1.0 / 60.0).abs() < 1e-4);
        assert!(engine.physics_interpolation_fraction < 0.01);
    }
}

// -- 2. Delta sync after draw -----------------------------------------------

#[test]
fn delta_sync_follows_post_draw_deltas() {
    let (mut h, inner, clock) = draw_cost_harness(&[], 4_000);
    let gaps = [10_000u64, 14_000, 6_000, 12_000, 8_000, 11_000];

    let mut steps = Vec::new();
    let mut post_draw = Vec::new();
    for gap in gaps {
        inner.advance(gap);
        h.boot.iteration();
        steps.push(h.boot.context().engine.frame_step);
        post_draw.push(clock.now_us());
    }
    assert_eq!(h.log.count("rendering.draw"), gaps.len());

    for n in 2..gaps.len() {
        let expected = (post_draw[n - 1] - post_draw[n - 2]) as f64 / 1e6;
        assert!(
            (steps[n] - expected).abs() < 1e-9,
            "iteration {n}: step {} expected {expected}",
            steps[n]
        );
        let frame_begin_delta = (gaps[n] + 4_000) as f64 / 1e6;
        assert!((steps[n] - frame_begin_delta).abs() > 1e-3);
    }
}

#[test]
fn delta_sync_falls_back_after_a_long_gap() {
    let (mut h, inner, clock) = draw_cost_harness(&[], 4_000);

    let mut post_draw = Vec::new();
    for gap in [10_000, 6_000] {
        inner.advance(gap);
        h.boot.iteration();
        post_draw.push(clock.now_us());
    }

    // Over 100 ms since the last draw: the fresh sample is used.
    inner.advance(110_000);
    let frame_begin = clock.now_us();
    h.boot.iteration();

    let engine = &h.boot.context().engine;
    let expected = (frame_begin - post_draw[0]) as f64 / 1e6;
    assert!((engine.frame_step - expected).abs() < 1e-9, "step {}", engine.frame_step);
    assert!(engine.frame_step > 0.1);
}

#[test]
fn delta_sync_is_ignored_with_fixed_fps() {
    let (mut h, inner, _clock) = draw_cost_harness(&["--fixed-fps", "30"], 4_000);

    for gap in [10_000, 50_000, 3_000] {
        inner.advance(gap);
        h.log.clear();
        h.boot.iteration();
        assert!((h.boot.context().engine.frame_step - 1.0 / 30.0).abs() < 1e-12);
        assert_eq!(h.log.count("physics_3d.step"), 1);
    }
}

// -- 3. Canvas convergence --------------------------------------------------

#[test]
fn queued_canvas_passes_all_run_before_idle() {
    let clock = ManualClock::new(0);
    let log = CallLog::new();
    let mut h = harness_with(
        log,
        &["--disable-delta-smoothing"],
        json!({}),
        Arc::new(clock.clone()),
        LoopOptions {
            canvas_passes_per_step: 3,
            ..LoopOptions::default()
        },
    );

    clock.advance(16_667);
    h.boot.iteration();
    assert_eq!(h.log.count("physics_3d.step"), 1);
    assert_eq!(h.log.count("canvas.pass"), 3);

    let entries = h.log.entries();
    let idle = h.log.position("main_loop.idle").unwrap();
    let last_pass = entries.iter().rposition(|e| e == "canvas.pass").unwrap();
    assert!(h.log.position("physics_2d.step").unwrap() < h.log.position("canvas.pass").unwrap());
    assert!(last_pass < idle);

    // Nothing queued: no pass runs.
    h.log.clear();
    h.boot.iteration();
    assert_eq!(h.log.count("physics_3d.step"), 0);
    assert_eq!(h.log.count("canvas.pass"), 0);
    assert_eq!(h.log.count("main_loop.idle"), 1);
}

// -- 4. Ordering ------------------------------------------------------------

#[test]
fn physics_step_call_order() {
    let clock = ManualClock::new(0);
    let mut h = harness(&["--disable-delta-smoothing"], json!({}), Arc::new(clock.clone()), false);
    clock.advance(16_667);
    h.boot.iteration();

    let physics: Vec<String> = h
        .log
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("physics_") || e.starts_with("navigation."))
        .collect();
    assert_eq!(
        physics,
        vec![
            "physics_3d.flush_queries",
            "physics_2d.sync",
            "physics_2d.flush_queries",
            "physics_3d.step",
            "navigation.process",
            "physics_2d.end_sync",
            "physics_2d.step",
        ]
    );

    let arvr = h.log.position("arvr.process").unwrap();
    assert!(h.log.position("physics_2d.step").unwrap() < arvr);
    assert!(arvr < h.log.position("rendering.sync").unwrap());
    assert!(h.log.position("rendering.sync").unwrap() < h.log.position("rendering.draw").unwrap());
    assert!(h.log.position("rendering.draw").unwrap() < h.log.position("audio.update").unwrap());
}

#[test]
fn messages_arrive_before_the_physics_step() {
    let clock = ManualClock::new(0);
    let mut h = harness(&["--disable-delta-smoothing"], json!({}), Arc::new(clock.clone()), true);
    clock.advance(16_667);
    h.boot.iteration();

    let message = h.log.position("message").unwrap();
    assert!(message < h.log.position("physics_3d.step").unwrap());
}

#[test]
fn agile_flushing_drains_input_every_step() {
    let clock = ManualClock::new(0);
    let mut h = harness(
        &["--disable-delta-smoothing"],
        json!({"input_devices/buffering/agile_event_flushing": true}),
        Arc::new(clock.clone()),
        false,
    );
    clock.advance(50_000);
    h.boot.iteration();
    let steps = h.log.count("physics_3d.step");
    assert!(steps >= 2);
    assert_eq!(h.log.count("platform.flush_buffered_input"), steps);

    let clock = ManualClock::new(0);
    let mut h = harness(&["--disable-delta-smoothing"], json!({}), Arc::new(clock.clone()), false);
    clock.advance(50_000);
    h.boot.iteration();
    assert_eq!(h.log.count("platform.flush_buffered_input"), 1);
}

// -- 5. Drawing -------------------------------------------------------------

#[test]
fn low_processor_mode_draws_only_on_change() {
    let clock = ManualClock::new(0);
    let mut h = harness(
        &[],
        json!({"application/run/low_processor_mode": true}),
        Arc::new(clock.clone()),
        false,
    );

    for _ in 0..3 {
        h.boot.iteration();
    }
    assert_eq!(h.log.count("rendering.draw"), 1);
    assert_eq!(h.boot.context().engine.frames_drawn, 1);

    h.boot.driver_mut().unwrap().force_redraw();
    h.boot.iteration();
    assert_eq!(h.log.count("rendering.draw"), 2);
    assert!(clock.total_slept_us() >= 4 * 6_900);
}

#[test]
fn disabled_render_loop_never_draws() {
    let clock = ManualClock::new(0);
    let mut h = harness(&["--disable-render-loop"], json!({}), Arc::new(clock.clone()), false);
    clock.advance(16_667);
    h.boot.iteration();
    assert_eq!(h.log.count("rendering.draw"), 0);
    assert_eq!(h.log.count("rendering.sync"), 1);
}

// -- 6. Pacing --------------------------------------------------------------

#[test]
fn target_fps_bounds_iterations_over_ten_seconds() {
    let clock = Arc::new(JitterClock {
        inner: ManualClock::new(0),
        sleeps: AtomicU64::new(0),
    });
    let mut h = harness(
        &[],
        json!({"debug/settings/fps/force_fps": 60}),
        clock.clone(),
        false,
    );

    let start = clock.now_us();
    let mut iterations = 0u64;
    while clock.now_us() - start < 10_000_000 {
        h.boot.iteration();
        iterations += 1;
    }
    assert!((599..=601).contains(&iterations), "{iterations} iterations");
}

#[test]
fn frame_delay_sleeps_every_iteration() {
    let clock = ManualClock::new(0);
    let mut h = harness(&["--frame-delay", "5"], json!({}), Arc::new(clock.clone()), false);
    for _ in 0..4 {
        h.boot.iteration();
    }
    assert_eq!(clock.total_slept_us(), 4 * 5_000);
}

// -- 7. Exit and teardown ---------------------------------------------------

#[test]
fn quit_flag_exits_after_one_iteration() {
    let clock = ManualClock::new(0);
    let mut h = harness(&["--fixed-fps", "30", "--quit"], json!({}), Arc::new(clock.clone()), false);
    h.boot.run();

    assert_eq!(h.boot.driver_mut().unwrap().iterations(), 1);
    let deltas = h.deltas.lock().unwrap().clone();
    assert_eq!(deltas.len(), 1);
    assert!((deltas[0] - 1.0 / 30.0).abs() < 1e-12);

    h.boot.cleanup();
    assert_eq!(h.boot.exit_code(), 0);
}

#[test]
fn servers_finish_in_reverse_registration_order() {
    let clock = ManualClock::new(0);
    let mut h = harness(&[], json!({}), Arc::new(clock), false);
    h.boot.cleanup();

    let order = [
        "camera.finish",
        "navigation.finish",
        "physics_3d.finish",
        "physics_2d.finish",
        "arvr.finish",
        "audio.finish",
        "rendering.finish",
        "platform.finalize",
        "platform.finalize_core",
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|entry| h.log.position(entry).unwrap_or_else(|| panic!("{entry} missing")))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", h.log.entries());
}
