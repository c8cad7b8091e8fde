//! Ember Servers -- subsystem interfaces and their ordered lifecycle.
//!
//! Every engine subsystem (audio, physics, navigation, rendering, ...) is a
//! "server": an object with an `init`/`finish` lifecycle plus a handful of
//! per-frame entry points the frame driver calls in a fixed order. This crate
//! defines:
//!
//! 1. The server traits ([`servers`]) the frame driver is written against.
//! 2. [`ServerHandle`](handle::ServerHandle), an owning handle that tracks one
//!    server through `Uninit -> Constructed -> Initialized -> Finished ->
//!    Destroyed`.
//! 3. [`ServerRegistry`](registry::ServerRegistry), which constructs and
//!    initializes servers in registration order, rolls back on failure, and
//!    tears down in strict reverse order.
//! 4. Headless implementations ([`headless`]) used by `--no-window` runs and
//!    by tests.
//! 5. [`RenderThread`](render_thread::RenderThread), which moves a rendering
//!    server onto its own thread behind a command channel.
//! 6. The plugin host ([`plugins`]) that routes discovered plugins to the
//!    registry responsible for their capability.
//!
//! # Example
//!
//! ```
//! use ember_servers::prelude::*;
//!
//! let mut registry = ServerRegistry::new();
//! registry
//!     .register_server("physics_2d", |_view| {
//!         Ok(Box::new(HeadlessPhysics::new("physics_2d")) as Box<dyn PhysicsServer>)
//!     })
//!     .unwrap();
//! registry.init_all().unwrap();
//! assert_eq!(registry.state("physics_2d"), Some(ServerState::Initialized));
//! registry.finish_all();
//! assert_eq!(registry.state("physics_2d"), Some(ServerState::Destroyed));
//! ```

#![deny(unsafe_code)]

pub mod handle;
pub mod headless;
pub mod plugins;
pub mod registry;
pub mod render_thread;
pub mod servers;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by servers and the registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServerError {
    /// A server failed to initialize.
    #[error("{server} failed to initialize: {reason}")]
    InitFailed {
        /// Registry name of the server.
        server: String,
        /// Diagnostic from the server.
        reason: String,
    },

    /// A lookup named a server the registry does not know.
    #[error("no server named '{0}' is registered")]
    NotRegistered(String),

    /// A server was used outside the state its operation requires, or a
    /// constructor tried to observe a server registered after it.
    #[error("server contract violation: {0}")]
    ContractViolation(String),

    /// The server exists but is not of the requested type.
    #[error("server '{name}' is not a {expected}")]
    TypeMismatch {
        /// Registry name.
        name: String,
        /// Requested type name.
        expected: &'static str,
    },

    /// The render thread exited while a command was in flight.
    #[error("render thread disconnected")]
    RenderThreadDisconnected,

    /// A plugin could not be loaded or routed.
    #[error("plugin '{name}': {reason}")]
    Plugin {
        /// Plugin name (or manifest path when the name is unknown).
        name: String,
        /// What went wrong.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common server usage.
pub mod prelude {
    pub use crate::handle::{ServerHandle, ServerState};
    pub use crate::headless::{
        CallLog, HeadlessArVr, HeadlessAudio, HeadlessCamera, HeadlessNavigation,
        HeadlessPhysics, HeadlessRendering,
    };
    pub use crate::plugins::{Plugin, PluginHost, PluginKind, PluginManifest, PluginResolver};
    pub use crate::registry::{RegistryView, ServerRegistry};
    pub use crate::render_thread::RenderThread;
    pub use crate::servers::{
        ArVrServer, AudioServer, BootSplash, CameraServer, Color, Lifecycle, NavigationServer,
        PhysicsServer, RenderingCallbacks, RenderingServer,
    };
    pub use crate::ServerError;
}
