//! Ordered engine teardown.
//!
//! The main loop is finished first so it can still reach every server. The
//! context's teardown stack then releases everything `setup` acquired, newest
//! first: scripts, servers, the window, the message queue, the debugger and
//! finally the core singletons. A restart armed with
//! [`Platform::set_restart_on_exit`](crate::platform::Platform::set_restart_on_exit)
//! is spawned before the platform core goes away.

use crate::context::EngineContext;
use crate::main_loop::MainLoop;

/// Runs the teardown once; later calls do nothing.
#[derive(Debug, Default)]
pub struct ShutdownSequencer {
    done: bool,
    released: Vec<&'static str>,
}

impl ShutdownSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Teardown entries in the order they were released.
    pub fn released(&self) -> &[&'static str] {
        &self.released
    }

    pub fn run(&mut self, ctx: &mut EngineContext) {
        if self.done {
            return;
        }
        self.done = true;

        if let Some(mut main_loop) = ctx.main_loop.take() {
            main_loop.finish();
            if let Some(code) = main_loop.exit_code() {
                ctx.exit_code = code;
            }
            tracing::debug!(main_loop = main_loop.type_name(), "main loop finished");
        }

        self.released = ctx.unwind();

        if let Some(args) = ctx.platform.restart_on_exit().map(<[String]>::to_vec) {
            let exec = ctx.platform.executable_path();
            tracing::info!(exec = %exec.display(), ?args, "restarting");
            if let Err(e) = ctx.platform.execute(&exec, &args) {
                tracing::warn!(error = %e, "restart failed");
            }
            ctx.platform.set_restart_on_exit(None);
        }

        ctx.platform.finalize_core();
        tracing::debug!(exit_code = ctx.exit_code, "engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::main_loop::MainLoopKind;
    use crate::platform::HeadlessPlatform;
    use ember_core::clock::ManualClock;
    use ember_servers::headless::CallLog;
    use std::sync::Arc;

    struct Exits(i32);

    impl MainLoop for Exits {
        fn iteration(&mut self, _delta: f64) -> bool {
            false
        }
        fn idle(&mut self, _delta: f64) -> bool {
            true
        }
        fn exit_code(&self) -> Option<i32> {
            Some(self.0)
        }
    }

    fn context(log: &CallLog) -> EngineContext {
        EngineContext::new(
            Arc::new(ManualClock::new(0)),
            Box::new(HeadlessPlatform::new().with_log(log.clone()).record_only()),
        )
    }

    #[test]
    fn releases_in_reverse_and_finalizes_core_last() {
        let log = CallLog::new();
        let mut ctx = context(&log);
        ctx.on_teardown("engine", |_| {});
        ctx.on_teardown("platform", |ctx| ctx.platform.finalize());

        let mut shutdown = ShutdownSequencer::new();
        shutdown.run(&mut ctx);
        assert_eq!(shutdown.released(), ["platform", "engine"]);
        assert_eq!(
            log.entries(),
            vec!["platform.finalize".to_string(), "platform.finalize_core".to_string()]
        );

        shutdown.run(&mut ctx);
        assert_eq!(log.count("platform.finalize_core"), 1);
    }

    #[test]
    fn main_loop_exit_code_is_kept() {
        let log = CallLog::new();
        let mut ctx = context(&log);
        ctx.main_loop = Some(MainLoopKind::Custom {
            class_name: "Exits".to_string(),
            inner: Box::new(Exits(3)),
        });
        ShutdownSequencer::new().run(&mut ctx);
        assert_eq!(ctx.exit_code, 3);
        assert!(ctx.main_loop.is_none());
    }

    #[test]
    fn armed_restart_is_spawned() {
        let log = CallLog::new();
        let mut ctx = context(&log);
        ctx.platform
            .set_restart_on_exit(Some(vec!["--path".to_string(), "demo".to_string()]));
        ShutdownSequencer::new().run(&mut ctx);

        let execute = log.position("platform.execute").unwrap();
        assert!(execute < log.position("platform.finalize_core").unwrap());
        assert!(ctx.platform.restart_on_exit().is_none());
    }
}
