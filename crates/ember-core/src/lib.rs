//! Ember Core -- timing, settings and the engine-wide singletons.
//!
//! This crate is the foundation of the Ember bootstrap. It holds everything the
//! main loop needs that does not depend on any subsystem server:
//!
//! - [`clock`]: the monotonic microsecond tick source and sleep primitives.
//! - [`timer_sync`]: converts wall-clock deltas into physics steps, an idle
//!   step and an interpolation fraction (jitter fix, fixed-fps override,
//!   delta smoothing).
//! - [`frame_stats`]: per-second frame accounting owned by the frame driver.
//! - [`engine`]: engine-wide tunables and counters (physics fps, time scale,
//!   frame counters).
//! - [`settings`]: project settings loaded from `project.godot` or a main pack.
//! - [`message_queue`]: deferred calls drained by the frame driver.
//! - [`input_map`], [`translation`], [`performance`]: the remaining core
//!   singletons constructed during setup.

#![deny(unsafe_code)]

pub mod clock;
pub mod engine;
pub mod frame_stats;
pub mod input_map;
pub mod message_queue;
pub mod packed_data;
pub mod performance;
pub mod settings;
pub mod timer_sync;
pub mod translation;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the core services.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// No project file was found at (or above) the requested path.
    #[error("couldn't load project data at path \"{path}\"")]
    ProjectNotFound {
        /// The directory that was searched.
        path: String,
    },

    /// A settings or pack file could not be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// The file that failed to parse.
        path: String,
        /// Parser diagnostic.
        message: String,
    },

    /// Settings were written after they were frozen at the end of setup.
    #[error("project settings are read-only after setup (tried to write '{0}')")]
    SettingsFrozen(String),

    /// Filesystem error.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common core usage.
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::engine::EngineSettings;
    pub use crate::frame_stats::{FrameStats, SecondReport};
    pub use crate::input_map::InputMap;
    pub use crate::message_queue::{MessageQueue, MessageSender};
    pub use crate::packed_data::PackedData;
    pub use crate::performance::Performance;
    pub use crate::settings::{AutoloadEntry, ProjectSettings, PROJECT_FILE};
    pub use crate::timer_sync::{FrameTime, TimerSync, MAX_PHYSICS_STEPS};
    pub use crate::translation::TranslationServer;
    pub use crate::CoreError;
}
