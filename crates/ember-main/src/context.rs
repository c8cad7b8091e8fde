//! The engine context: every process-wide singleton in one value.
//!
//! `setup` builds the context piece by piece and pushes a release action for
//! each piece onto the [`TeardownStack`]. Rollback after a failed phase and
//! the normal shutdown both unwind that stack, newest entry first.

use std::path::PathBuf;
use std::sync::Arc;

use ember_core::clock::Clock;
use ember_core::engine::EngineSettings;
use ember_core::input_map::InputMap;
use ember_core::message_queue::MessageQueue;
use ember_core::packed_data::PackedData;
use ember_core::performance::Performance;
use ember_core::settings::ProjectSettings;
use ember_core::translation::TranslationServer;
use ember_servers::plugins::PluginHost;
use ember_servers::registry::ServerRegistry;

use crate::config::BootConfig;
use crate::debugger::ScriptDebugger;
use crate::main_loop::{ClassRegistry, MainLoopKind};
use crate::platform::Platform;
use crate::remote_fs::RemoteFsClient;
use crate::resources::ResourceLoaders;
use crate::scripting::ScriptServer;

type Release = Box<dyn FnOnce(&mut EngineContext)>;

/// Release actions in acquisition order.
#[derive(Default)]
pub struct TeardownStack {
    entries: Vec<(&'static str, Release)>,
}

impl TeardownStack {
    pub fn push(&mut self, name: &'static str, release: impl FnOnce(&mut EngineContext) + 'static) {
        tracing::trace!(entry = name, "teardown entry pushed");
        self.entries.push((name, Box::new(release)));
    }

    /// Entry names, oldest first.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn pop(&mut self) -> Option<(&'static str, Release)> {
        self.entries.pop()
    }
}

impl std::fmt::Debug for TeardownStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Everything the bootstrapper, the frame driver and the shutdown sequencer
/// share. Lives on the main thread.
pub struct EngineContext {
    pub clock: Arc<dyn Clock>,
    pub platform: Box<dyn Platform>,
    pub config: BootConfig,

    pub engine: EngineSettings,
    pub settings: ProjectSettings,
    pub input_map: InputMap,
    pub translation: TranslationServer,
    pub performance: Performance,
    pub packed_data: PackedData,
    /// Built at the end of `setup`.
    pub message_queue: Option<MessageQueue>,

    pub registry: ServerRegistry,
    pub scripts: ScriptServer,
    pub classes: ClassRegistry,
    pub loaders: ResourceLoaders,
    pub plugins: PluginHost,
    pub debugger: Option<Box<dyn ScriptDebugger>>,
    pub remote_fs: Option<RemoteFsClient>,

    pub main_loop: Option<MainLoopKind>,
    /// Process exit code reported once the engine stops.
    pub exit_code: i32,
    /// Path of the running executable.
    pub exec_path: PathBuf,
    /// Setup finished a standalone job (such as a reflection dump) and the
    /// main loop must not run.
    pub quit_after_setup: bool,

    teardown: TeardownStack,
}

impl EngineContext {
    pub fn new(clock: Arc<dyn Clock>, platform: Box<dyn Platform>) -> Self {
        let exec_path = platform.executable_path();
        let scripts = ScriptServer::new();
        let loaders = ResourceLoaders::new(vec!["ems".to_string()]);
        Self {
            clock,
            platform,
            config: BootConfig::default(),
            engine: EngineSettings::new(0),
            settings: ProjectSettings::new(),
            input_map: InputMap::new(),
            translation: TranslationServer::new(),
            performance: Performance::new(),
            packed_data: PackedData::new(),
            message_queue: None,
            registry: ServerRegistry::new(),
            scripts,
            classes: ClassRegistry::new(),
            loaders,
            plugins: PluginHost::new(),
            debugger: None,
            remote_fs: None,
            main_loop: None,
            exit_code: 0,
            exec_path,
            quit_after_setup: false,
            teardown: TeardownStack::default(),
        }
    }

    pub fn on_teardown(
        &mut self,
        name: &'static str,
        release: impl FnOnce(&mut EngineContext) + 'static,
    ) {
        self.teardown.push(name, release);
    }

    /// Names of the pending release actions, oldest first.
    pub fn teardown_names(&self) -> Vec<&'static str> {
        self.teardown.names()
    }

    /// Run every release action, newest first. Returns the names in the
    /// order they ran.
    pub fn unwind(&mut self) -> Vec<&'static str> {
        let mut ran = Vec::with_capacity(self.teardown.len());
        // Entries pushed by a release action are unwound as well.
        while let Some((name, release)) = self.teardown.pop() {
            tracing::debug!(entry = name, "releasing");
            release(self);
            ran.push(name);
        }
        ran
    }

    /// Post `message` onto the engine message queue, if it exists yet.
    pub fn post(&self, message: impl FnOnce() + Send + 'static) -> bool {
        match &self.message_queue {
            Some(queue) => {
                queue.push(message);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("platform", &self.platform.name())
            .field("registry", &self.registry)
            .field("main_loop", &self.main_loop)
            .field("exit_code", &self.exit_code)
            .field("teardown", &self.teardown)
            .finish_non_exhaustive()
    }
}
