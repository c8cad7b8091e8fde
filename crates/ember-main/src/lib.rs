//! Ember Main -- bootstrap, frame pacing and shutdown.
//!
//! This crate turns a command line into a running engine and back:
//!
//! 1. [`args`] parses the command line into a [`config::BootConfig`].
//! 2. [`boot::Bootstrapper`] runs the three bootstrap phases (`setup`,
//!    `setup2`, `start`), building the [`context::EngineContext`] and
//!    registering every server in dependency order.
//! 3. [`driver::FrameDriver`] runs one iteration at a time: physics steps,
//!    idle, draw and frame pacing.
//! 4. [`shutdown::ShutdownSequencer`] releases everything in reverse order
//!    and performs an armed restart.
//!
//! The OS layer sits behind [`platform::Platform`]; scripting, resource
//! loading and plugin routing live in [`scripting`], [`resources`] and the
//! plugin host from `ember_servers`.
//!
//! # Example
//!
//! ```no_run
//! use ember_main::prelude::*;
//!
//! let argv: Vec<String> = std::env::args().collect();
//! let mut boot = Bootstrapper::new(Box::new(HeadlessPlatform::new()), argv);
//! if boot.setup(true).is_ok() && boot.start() {
//!     boot.run();
//! }
//! boot.cleanup();
//! std::process::exit(boot.exit_code());
//! ```

#![deny(unsafe_code)]

pub mod args;
pub mod boot;
pub mod config;
pub mod context;
pub mod debugger;
pub mod driver;
pub mod error;
pub mod logging;
pub mod main_loop;
pub mod platform;
pub mod reflection;
pub mod remote_fs;
pub mod resources;
pub mod scripting;
pub mod shutdown;

/// Display name used in window titles, the version banner and data paths.
pub const ENGINE_NAME: &str = "Ember";

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for embedding the engine.
pub mod prelude {
    pub use crate::args::{ArgParser, StartRequest, ToolRequest};
    pub use crate::boot::{Bootstrapper, HeadlessServers, ServerProvider, ToolRunner};
    pub use crate::config::{BootConfig, DebugMode, LogConfig, RenderThreadMode, Verbosity};
    pub use crate::context::EngineContext;
    pub use crate::debugger::{LocalDebugger, RemoteDebugger, ScriptDebugger};
    pub use crate::driver::FrameDriver;
    pub use crate::error::BootError;
    pub use crate::main_loop::{ClassRegistry, MainLoop, MainLoopKind, SceneTreeLoop};
    pub use crate::platform::{HeadlessPlatform, Platform};
    pub use crate::resources::{Module, ResourceLoader, ResourceLoaders};
    pub use crate::scripting::{Script, ScriptLanguage, ScriptServer};
    pub use crate::shutdown::ShutdownSequencer;
    pub use crate::ENGINE_NAME;
}
