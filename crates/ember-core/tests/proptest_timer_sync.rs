//! Property tests for the physics/idle clock reconciliation.
//!
//! Random frame-duration traces are fed through `TimerSync` and the tracking
//! and clamping invariants are checked after every frame.

use ember_core::timer_sync::{TimerSync, MAX_PHYSICS_STEPS};
use proptest::prelude::*;

fn physics_fps_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![Just(30u32), Just(60u32), Just(120u32), 10u32..=240]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Reported idle time never strays from wall time by more than the jitter
    /// window, and the physics clock plus the interpolation residual always
    /// equals the reported idle time.
    #[test]
    fn idle_and_physics_track_wall_time(
        physics_fps in physics_fps_strategy(),
        jitter_fix in 0.0f64..=1.0,
        deltas in prop::collection::vec(1_000u64..60_000, 1..300),
    ) {
        let slice = 1.0 / f64::from(physics_fps);
        let mut sync = TimerSync::new(jitter_fix);
        sync.init(0);

        let mut now = 0u64;
        let mut idle_sum = 0.0;
        let mut steps_sum = 0u64;

        for delta in deltas {
            now += delta;
            sync.set_cpu_ticks_us(now);
            let ft = sync.advance(slice, physics_fps);

            prop_assert!((0.0..=1.0).contains(&ft.interpolation_fraction));

            idle_sum += ft.idle_step;
            steps_sum += u64::from(ft.physics_steps);

            let wall = now as f64 / 1e6;
            prop_assert!(
                (wall - idle_sum).abs() <= jitter_fix * slice + 1e-6,
                "wall {wall} idle {idle_sum}"
            );

            let simulated = steps_sum as f64 * slice + ft.interpolation_fraction * slice;
            prop_assert!((simulated - idle_sum).abs() <= 1e-6, "simulated {simulated} idle {idle_sum}");
        }
    }

    /// Any jump of more than the step limit clamps to exactly the limit.
    #[test]
    fn large_jumps_clamp_to_max_steps(
        physics_fps in physics_fps_strategy(),
        tenths in 82u64..5000,
        warmup in 0usize..20,
    ) {
        let slice = 1.0 / f64::from(physics_fps);
        let period = 1_000_000 / u64::from(physics_fps);
        let mut sync = TimerSync::default();
        sync.init(0);

        let mut now = 0;
        for _ in 0..warmup {
            now += period;
            sync.set_cpu_ticks_us(now);
            sync.advance(slice, physics_fps);
        }

        now += tenths * period / 10;
        sync.set_cpu_ticks_us(now);
        let mut ft = sync.advance(slice, physics_fps);
        let before = ft;
        ft.clamp_physics_steps(slice, MAX_PHYSICS_STEPS);

        prop_assert_eq!(ft.physics_steps, MAX_PHYSICS_STEPS);
        let discarded = f64::from(before.physics_steps.saturating_sub(MAX_PHYSICS_STEPS));
        prop_assert!((before.idle_step - ft.idle_step - discarded * slice).abs() < 1e-9);
    }

    /// Fixed fps reports one step of exactly 1/F regardless of the clock.
    #[test]
    fn fixed_fps_is_deterministic(
        fixed_fps in 1i32..=240,
        deltas in prop::collection::vec(0u64..1_000_000, 1..100),
    ) {
        let mut sync = TimerSync::default();
        sync.set_fixed_fps(fixed_fps);
        sync.init(0);
        let mut now = 0;
        for delta in deltas {
            now += delta;
            sync.set_cpu_ticks_us(now);
            let ft = sync.advance(1.0 / 60.0, 60);
            prop_assert_eq!(ft.physics_steps, 1);
            prop_assert_eq!(ft.idle_step, 1.0 / f64::from(fixed_fps));
        }
    }
}
