//! Three-phase engine bootstrap.
//!
//! ```text
//! setup(true)  ── core singletons, arguments, project, debugger, logging
//!   └─ setup2  ── plugins, window, servers, splash, translations, scripts
//! start        ── main loop selection, autoloads, main scene
//! iteration*   ── FrameDriver
//! cleanup      ── ShutdownSequencer
//! ```
//!
//! A failure in `setup` or `setup2` unwinds everything built so far and
//! returns the error; the exit code comes from [`BootError::exit_code`].
//! `start` reports failure by returning `false` and leaves the engine ready
//! for `cleanup`.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use ember_core::clock::{Clock, SystemClock};
use ember_core::engine::EngineSettings;
use ember_core::input_map::InputMap;
use ember_core::message_queue::MessageQueue;
use ember_core::packed_data::PackedData;
use ember_core::performance::Performance;
use ember_core::settings::ProjectSettings;
use ember_core::translation::TranslationServer;
use ember_core::CoreError;
use ember_servers::headless::{
    CallLog, HeadlessArVr, HeadlessAudio, HeadlessCamera, HeadlessNavigation, HeadlessPhysics,
    HeadlessRendering,
};
use ember_servers::plugins::{PluginHost, PluginManifest, PluginResolver};
use ember_servers::render_thread::RenderThread;
use ember_servers::servers::{
    ArVrServer, AudioServer, BootSplash, CameraServer, Color, NavigationServer, PhysicsServer,
    RenderingCallbacks, RenderingServer,
};
use ember_servers::ServerError;

use crate::args::{ArgParser, StartRequest, ToolRequest};
use crate::config::{DebugMode, RenderThreadMode};
use crate::context::EngineContext;
use crate::debugger::{LocalDebugger, RemoteDebugger, ScriptDebugger};
use crate::driver::{
    FrameDriver, ARVR, AUDIO, CAMERA, NAVIGATION, PHYSICS_2D, PHYSICS_3D, RENDERING,
    RENDERING_CALLBACKS,
};
use crate::error::BootError;
use crate::main_loop::{
    MainLoop, MainLoopFactory, MainLoopKind, SceneNode, SceneTreeLoop, ScriptedLoop,
    MAIN_LOOP_CLASS, SCENE_TREE_CLASS,
};
use crate::platform::{Platform, SILENCE_ROOT_WARNING_ENV};
use crate::remote_fs::RemoteFsClient;
use crate::resources::{ModuleResolver, PackSourceResolver, ResourceKind, ResourceLoaderResolver};
use crate::scripting::ScriptLanguage;
use crate::shutdown::ShutdownSequencer;

const DEFAULT_BUS_LAYOUT: &str = "res://default_bus_layout.tres";
const DEFAULT_CLEAR_COLOR: Color = Color::rgb(0.3, 0.3, 0.3);

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Builds the server instances `setup2` registers.
pub trait ServerProvider {
    fn rendering(&mut self) -> Result<Box<dyn RenderingServer>, ServerError>;
    fn audio(&mut self) -> Result<Box<dyn AudioServer>, ServerError>;
    fn arvr(&mut self) -> Result<Box<dyn ArVrServer>, ServerError>;
    /// Called with [`PHYSICS_2D`] and [`PHYSICS_3D`].
    fn physics(&mut self, name: &str) -> Result<Box<dyn PhysicsServer>, ServerError>;
    fn navigation(&mut self) -> Result<Box<dyn NavigationServer>, ServerError>;
    fn camera(&mut self) -> Result<Box<dyn CameraServer>, ServerError>;
}

/// Headless servers, optionally recording into a [`CallLog`].
#[derive(Debug, Clone, Default)]
pub struct HeadlessServers {
    log: Option<CallLog>,
}

impl HeadlessServers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: CallLog) -> Self {
        Self { log: Some(log) }
    }
}

macro_rules! logged {
    ($self:ident, $server:expr) => {
        match &$self.log {
            Some(log) => $server.with_log(log.clone()),
            None => $server,
        }
    };
}

impl ServerProvider for HeadlessServers {
    fn rendering(&mut self) -> Result<Box<dyn RenderingServer>, ServerError> {
        Ok(Box::new(logged!(self, HeadlessRendering::new())))
    }

    fn audio(&mut self) -> Result<Box<dyn AudioServer>, ServerError> {
        Ok(Box::new(logged!(self, HeadlessAudio::new())))
    }

    fn arvr(&mut self) -> Result<Box<dyn ArVrServer>, ServerError> {
        Ok(Box::new(logged!(self, HeadlessArVr::new())))
    }

    fn physics(&mut self, name: &str) -> Result<Box<dyn PhysicsServer>, ServerError> {
        Ok(Box::new(logged!(self, HeadlessPhysics::new(name))))
    }

    fn navigation(&mut self) -> Result<Box<dyn NavigationServer>, ServerError> {
        Ok(Box::new(logged!(self, HeadlessNavigation::new(NAVIGATION))))
    }

    fn camera(&mut self) -> Result<Box<dyn CameraServer>, ServerError> {
        Ok(Box::new(logged!(self, HeadlessCamera::new())))
    }
}

/// Runs standalone tools (`--doctool`, `--export`, ...) in place of the
/// main loop. Returns the process exit code.
pub trait ToolRunner {
    fn run(&mut self, tool: &ToolRequest, ctx: &mut EngineContext) -> Result<i32, BootError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Created,
    Setup,
    Ready,
    Started,
    Finished,
}

type SharedProvider = Rc<RefCell<Box<dyn ServerProvider>>>;

// ---------------------------------------------------------------------------
// Bootstrapper
// ---------------------------------------------------------------------------

/// Owns the engine context through its whole life.
pub struct Bootstrapper {
    ctx: EngineContext,
    args: Vec<String>,
    servers: SharedProvider,
    tools: Option<Box<dyn ToolRunner>>,
    plugin_dir: Option<PathBuf>,
    driver: Option<FrameDriver>,
    shutdown: ShutdownSequencer,
    phase: Phase,
}

impl Bootstrapper {
    /// `argv` is the full process argument vector, binary name first. The
    /// executable path comes from the platform.
    pub fn new(platform: Box<dyn Platform>, argv: Vec<String>) -> Self {
        let ctx = EngineContext::new(Arc::new(SystemClock::new()), platform);
        Self {
            ctx,
            args: argv.into_iter().skip(1).collect(),
            servers: Rc::new(RefCell::new(Box::new(HeadlessServers::new()))),
            tools: None,
            plugin_dir: PluginHost::default_dir(),
            driver: None,
            shutdown: ShutdownSequencer::new(),
            phase: Phase::Created,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ctx.clock = clock;
        self
    }

    pub fn with_servers(self, provider: impl ServerProvider + 'static) -> Self {
        *self.servers.borrow_mut() = Box::new(provider);
        self
    }

    pub fn with_tool_runner(mut self, runner: impl ToolRunner + 'static) -> Self {
        self.tools = Some(Box::new(runner));
        self
    }

    /// Directory scanned for `*.plugin.json`; `None` disables discovery.
    pub fn with_plugin_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.plugin_dir = dir;
        self
    }

    /// Register a class, optionally instantiable as a main loop.
    pub fn with_class(mut self, name: &str, base: &str, factory: Option<MainLoopFactory>) -> Self {
        self.ctx.classes.register(name, Some(base), factory);
        self
    }

    pub fn with_script_language(mut self, language: Box<dyn ScriptLanguage>) -> Self {
        self.ctx.scripts.register_language(language);
        self
    }

    /// Queue an in-process plugin. `capability` is a `Box<dyn PackSource>`,
    /// `Box<dyn ResourceLoader>` or `Box<dyn Module>` matching the
    /// manifest kind.
    pub fn with_plugin(
        mut self,
        manifest: PluginManifest,
        capability: Box<dyn std::any::Any + Send>,
    ) -> Self {
        self.ctx.plugins.register(manifest, capability);
        self
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut EngineContext {
        &mut self.ctx
    }

    pub fn driver_mut(&mut self) -> Option<&mut FrameDriver> {
        self.driver.as_mut()
    }

    pub fn exit_code(&self) -> i32 {
        self.ctx.exit_code
    }

    // -----------------------------------------------------------------------
    // Phase 1
    // -----------------------------------------------------------------------

    /// Build the core singletons, parse the arguments and load the project.
    /// With `run_phase_two`, continue into [`setup2`](Self::setup2) unless the
    /// platform creates its window later.
    pub fn setup(&mut self, run_phase_two: bool) -> Result<(), BootError> {
        if self.phase != Phase::Created {
            return Err(ServerError::ContractViolation("setup called twice".to_string()).into());
        }
        if let Err(e) = self.setup_inner() {
            self.rollback(&e);
            return Err(e);
        }
        self.phase = Phase::Setup;

        if run_phase_two && !self.ctx.platform.defers_window_creation() {
            return self.setup2();
        }
        Ok(())
    }

    fn setup_inner(&mut self) -> Result<(), BootError> {
        let ctx = &mut self.ctx;

        // Core services.
        ctx.platform.initialize_core();
        let seed = ctx.clock.now_us() ^ (u64::from(std::process::id()) << 32);
        ctx.engine = EngineSettings::new(seed);
        ctx.on_teardown("engine", |ctx| ctx.engine = EngineSettings::new(0));
        ctx.on_teardown("project_settings", |ctx| ctx.settings = ProjectSettings::new());
        ctx.on_teardown("input_map", |ctx| ctx.input_map = InputMap::new());
        ctx.on_teardown("translation_server", |ctx| ctx.translation = TranslationServer::new());
        ctx.on_teardown("performance", |ctx| ctx.performance = Performance::new());
        ctx.on_teardown("packed_data", |ctx| ctx.packed_data = PackedData::new());

        // Arguments.
        let parser = ArgParser::new(ctx.platform.video_drivers(), ctx.platform.audio_drivers());
        parser.parse_into(&self.args, &mut ctx.config)?;

        // Remote filesystem.
        if let Some(address) = ctx.config.remote_fs.clone() {
            let client = RemoteFsClient::connect(&address, &ctx.config.remote_fs_password)?;
            ctx.remote_fs = Some(client);
            ctx.on_teardown("remote_fs", |ctx| ctx.remote_fs = None);
        }

        // Project.
        let project_path = ctx.config.project_path.clone();
        match ctx.settings.setup(&project_path, ctx.config.main_pack.as_deref(), ctx.config.upwards) {
            Ok(()) => {}
            Err(CoreError::ProjectNotFound { path }) => {
                if ctx.config.editor || ctx.config.main_args.is_empty() {
                    tracing::info!(path = %path, "no project found, opening the project manager");
                    ctx.config.editor = false;
                    ctx.config.project_manager = true;
                } else if !ctx.config.main_args.iter().any(|a| a == "-s" || a == "--script") {
                    let message = format!(
                        "Couldn't load project data at path \"{path}\". Is the .pck file missing?"
                    );
                    ctx.platform.alert(&message, "Error");
                    return Err(BootError::MissingResource(message));
                }
                if ctx.settings.resource_path().as_os_str().is_empty() {
                    let root = std::fs::canonicalize(&project_path).unwrap_or(project_path);
                    ctx.settings.set_resource_path(root);
                }
            }
            Err(e) => return Err(e.into()),
        }

        let app_name = ctx.settings.get_string("application/config/name", "");
        let user_dir = ctx.platform.user_data_dir(&app_name);
        ctx.settings.set_user_data_dir(user_dir);

        let (video, audio) = (ctx.platform.video_drivers(), ctx.platform.audio_drivers());
        ctx.config.apply_project_settings(&mut ctx.settings, &video, &audio);

        ctx.engine.set_physics_fps(ctx.config.physics_fps);
        ctx.engine.set_physics_jitter_fix(ctx.config.physics_jitter_fix);
        ctx.engine.set_target_fps(ctx.config.target_fps);
        ctx.engine.set_time_scale(ctx.config.time_scale);
        ctx.engine.set_editor_hint(ctx.config.editor);

        if !ctx.config.is_tool() && ctx.config.main_args.is_empty() && ctx.config.main_scene.is_none() {
            let message = "Error: Can't run project: no main scene defined.".to_string();
            ctx.platform.alert(&message, "Error");
            return Err(BootError::MissingResource(message));
        }

        if ctx.config.is_tool() {
            ctx.input_map.load_default();
        } else {
            ctx.input_map.load_from_settings(&ctx.settings);
        }

        if ctx.config.editor {
            if !ctx.config.main_args.iter().any(|a| a == "--editor" || a == "-e") {
                ctx.config.main_args.push("--editor".to_string());
            }
            ctx.packed_data.set_disabled(true);
        }
        if let Some(pack) = ctx.config.main_pack.clone() {
            let files = ctx.packed_data.add_pack(&pack)?;
            tracing::debug!(pack = %pack.display(), files, "main pack mounted");
        }

        if ctx.platform.is_root() && std::env::var_os(SILENCE_ROOT_WARNING_ENV).is_none() {
            tracing::warn!(
                "Started the engine as `root`/superuser. This is a security risk. \
                 Set {SILENCE_ROOT_WARNING_ENV}=1 to silence this warning."
            );
        }

        // Debugger.
        let debugger: Option<Box<dyn ScriptDebugger>> = match &ctx.config.debug_mode {
            DebugMode::None => None,
            DebugMode::Local => Some(Box::new(LocalDebugger::new())),
            DebugMode::Remote { host, port } => match RemoteDebugger::connect(host, *port) {
                Ok(remote) => Some(Box::new(remote)),
                Err(e) => {
                    tracing::warn!(error = %e, "remote debugger disabled");
                    None
                }
            },
        };
        if let Some(mut debugger) = debugger {
            debugger.set_skip_breakpoints(ctx.config.skip_breakpoints);
            for bp in &ctx.config.breakpoints {
                debugger.insert_breakpoint(bp.line, &bp.source);
            }
            tracing::debug!(debugger = debugger.name(), "script debugger attached");
            ctx.debugger = Some(debugger);
            ctx.on_teardown("debugger", |ctx| ctx.debugger = None);
        }

        // Logging.
        let log_file = ctx
            .config
            .log
            .file_logging
            .then(|| ctx.settings.globalize_path(&ctx.config.log.log_path));
        if !crate::logging::init_logging(&ctx.config.log, log_file.as_deref())? {
            tracing::trace!("log subscriber already installed");
        }

        ctx.message_queue = Some(MessageQueue::new());
        ctx.on_teardown("message_queue", |ctx| {
            if let Some(mut queue) = ctx.message_queue.take() {
                let flushed = queue.flush();
                tracing::debug!(flushed, "message queue drained");
            }
        });

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase 2
    // -----------------------------------------------------------------------

    /// Open the window and bring up every server.
    pub fn setup2(&mut self) -> Result<(), BootError> {
        if self.phase != Phase::Setup {
            return Err(
                ServerError::ContractViolation("setup2 needs a completed setup".to_string()).into(),
            );
        }
        if let Err(e) = self.setup2_inner() {
            self.rollback(&e);
            return Err(e);
        }
        self.phase = Phase::Ready;
        Ok(())
    }

    fn setup2_inner(&mut self) -> Result<(), BootError> {
        tracing::info!(
            "{} v{} - https://github.com/ember-engine/ember",
            crate::ENGINE_NAME,
            env!("CARGO_PKG_VERSION")
        );

        self.load_plugins();
        self.register_servers()?;

        let ctx = &mut self.ctx;
        ctx.platform.initialize(&ctx.config)?;
        ctx.on_teardown("platform", |ctx| ctx.platform.finalize());

        ctx.registry.init_all()?;
        ctx.on_teardown("servers", |ctx| ctx.registry.finish_all());
        for name in [PHYSICS_2D, PHYSICS_3D] {
            if let Ok(physics) = ctx.registry.get_mut::<Box<dyn PhysicsServer>>(name) {
                physics.set_active(true);
            }
        }

        show_boot_splash(ctx);

        ctx.translation.load_from_settings(&ctx.settings);
        if let Some(locale) = ctx.config.locale.clone() {
            ctx.translation.set_locale(&locale);
        }

        if let Some(path) = ctx.config.gen_reflection.clone() {
            crate::reflection::write_reflection(ctx, &path)?;
            tracing::info!(path = %path.display(), "reflection written");
            ctx.quit_after_setup = true;
            ctx.settings.freeze();
            return Ok(());
        }

        ctx.scripts.init_all()?;
        ctx.on_teardown("scripts", |ctx| ctx.scripts.finish_all());

        let layout = ctx
            .settings
            .def("audio/default_bus_layout", DEFAULT_BUS_LAYOUT)
            .as_str()
            .unwrap_or(DEFAULT_BUS_LAYOUT)
            .to_string();
        let layout = ctx
            .loaders
            .exists(&layout, &ctx.settings, &ctx.packed_data)
            .then_some(layout);
        if let Ok(audio) = ctx.registry.get_mut::<Box<dyn AudioServer>>(AUDIO) {
            if let Err(e) = audio.load_default_bus_layout(layout.as_deref()) {
                tracing::warn!(error = %e, "couldn't load the default bus layout");
            }
        }

        if ctx.config.profiling {
            ctx.scripts.profiling_start();
            if let Some(debugger) = ctx.debugger.as_mut() {
                debugger.profiling_start();
            }
            ctx.on_teardown("profiler", |ctx| {
                ctx.scripts.profiling_stop();
                if let Some(debugger) = ctx.debugger.as_mut() {
                    debugger.profiling_stop();
                }
            });
        }

        ctx.settings.freeze();
        Ok(())
    }

    fn load_plugins(&mut self) {
        let ctx = &mut self.ctx;
        if let Some(dir) = &self.plugin_dir {
            let found = ctx.plugins.discover(dir);
            if found > 0 {
                tracing::debug!(dir = %dir.display(), found, "plugin manifests found");
            }
        }
        if ctx.plugins.pending() == 0 {
            return;
        }
        let mut packs = PackSourceResolver(&mut ctx.packed_data);
        let mut loaders = ResourceLoaderResolver(&mut ctx.loaders);
        let mut modules = ModuleResolver(&mut ctx.classes);
        let resolvers: &mut [&mut dyn PluginResolver] = &mut [&mut packs, &mut loaders, &mut modules];
        match ctx.plugins.dispatch(resolvers) {
            Ok(loaded) => tracing::debug!(loaded, "plugins loaded"),
            Err(e) => tracing::warn!(error = %e, "some plugins failed to load"),
        }
    }

    fn register_servers(&mut self) -> Result<(), BootError> {
        let registry = &mut self.ctx.registry;
        let separate = self.ctx.config.render_thread_mode == RenderThreadMode::Separate;

        let provider = Rc::clone(&self.servers);
        registry.register_server(RENDERING, move |_| {
            let server = provider.borrow_mut().rendering()?;
            if separate {
                return Ok(Box::new(RenderThread::spawn(server)?) as Box<dyn RenderingServer>);
            }
            Ok(server)
        })?;
        let provider = Rc::clone(&self.servers);
        registry.register_server(AUDIO, move |_| provider.borrow_mut().audio())?;
        let provider = Rc::clone(&self.servers);
        registry.register_server(ARVR, move |_| provider.borrow_mut().arvr())?;
        let provider = Rc::clone(&self.servers);
        registry.register_server(PHYSICS_2D, move |_| provider.borrow_mut().physics(PHYSICS_2D))?;
        let provider = Rc::clone(&self.servers);
        registry.register_server(PHYSICS_3D, move |_| provider.borrow_mut().physics(PHYSICS_3D))?;
        let provider = Rc::clone(&self.servers);
        registry.register_server(NAVIGATION, move |_| provider.borrow_mut().navigation())?;
        let provider = Rc::clone(&self.servers);
        registry.register_server(CAMERA, move |_| provider.borrow_mut().camera())?;
        registry.register_server(RENDERING_CALLBACKS, |view| {
            view.get::<Box<dyn RenderingServer>>(RENDERING)?;
            Ok(RenderingCallbacks::new())
        })?;
        Ok(())
    }

    fn rollback(&mut self, error: &BootError) {
        let released = self.ctx.unwind();
        tracing::debug!(error = %error, released = ?released, "boot aborted, rolled back");
    }

    // -----------------------------------------------------------------------
    // Phase 3
    // -----------------------------------------------------------------------

    /// Pick and prepare the main loop. Returns `false` when the main loop
    /// must not run; [`exit_code`](Self::exit_code) then holds the result.
    pub fn start(&mut self) -> bool {
        if self.phase != Phase::Ready {
            tracing::error!("start called before setup completed");
            return false;
        }
        self.phase = Phase::Started;

        if self.ctx.quit_after_setup {
            return false;
        }

        match self.start_inner() {
            Ok(started) => started,
            Err(e) => {
                tracing::error!("{e}");
                self.ctx.exit_code = e.exit_code();
                false
            }
        }
    }

    fn start_inner(&mut self) -> Result<bool, BootError> {
        let request = StartRequest::parse(&self.ctx.config.main_args)?;

        if let Some(tool) = &request.tool {
            let Some(runner) = self.tools.as_mut() else {
                return Err(BootError::Start(format!(
                    "{tool:?} was requested but this build has no tool runner."
                )));
            };
            self.ctx.exit_code = runner.run(tool, &mut self.ctx)?;
            return Ok(false);
        }
        if request.check_only && request.script.is_none() {
            return Err(BootError::Start("Checking a script requires --script.".to_string()));
        }

        let ctx = &mut self.ctx;
        let editor = ctx.config.editor || request.editor;

        let mut main_loop = match &request.script {
            Some(script_path) => {
                let path = ctx.settings.localize_path(script_path);
                let script = ctx
                    .loaders
                    .load(&path, &ctx.settings, &ctx.packed_data)
                    .and_then(|res| ctx.scripts.load(&res.text, &path))
                    .map_err(|e| {
                        tracing::debug!(error = %e, "script load failed");
                        BootError::Start(format!("Can't load script: {script_path}"))
                    })?;
                if request.check_only {
                    tracing::info!(script = %path, "script is valid");
                    ctx.exit_code = 0;
                    return Ok(false);
                }
                if !ctx.classes.is_parent_class(&script.base_type, MAIN_LOOP_CLASS) {
                    return Err(BootError::Start(format!(
                        "Can't load script '{script_path}', it does not inherit from a MainLoop type."
                    )));
                }
                let with_tree = ctx.classes.is_parent_class(&script.base_type, SCENE_TREE_CLASS);
                MainLoopKind::Script(ScriptedLoop::new(script, with_tree))
            }
            None if editor => MainLoopKind::SceneTree(SceneTreeLoop::new()),
            None => {
                let type_name = ctx
                    .settings
                    .def("application/run/main_loop_type", SCENE_TREE_CLASS)
                    .as_str()
                    .unwrap_or(SCENE_TREE_CLASS)
                    .to_string();
                if type_name.is_empty() || type_name == SCENE_TREE_CLASS {
                    MainLoopKind::SceneTree(SceneTreeLoop::new())
                } else if !ctx.classes.exists(&type_name) {
                    let message = format!("Error: MainLoop type doesn't exist: {type_name}");
                    ctx.platform.alert(&message, "Error");
                    return Err(BootError::Start(message));
                } else if let Some(inner) = ctx.classes.instantiate(&type_name) {
                    if !ctx.classes.is_parent_class(&type_name, MAIN_LOOP_CLASS) {
                        return Err(BootError::Start("Error: Invalid MainLoop type.".to_string()));
                    }
                    MainLoopKind::Custom {
                        class_name: type_name,
                        inner,
                    }
                } else if ctx.classes.is_parent_class(&type_name, SCENE_TREE_CLASS) {
                    MainLoopKind::SceneTree(SceneTreeLoop::new())
                } else {
                    return Err(BootError::Start("Error: Invalid MainLoop type.".to_string()));
                }
            }
        };
        tracing::debug!(main_loop = main_loop.type_name(), "main loop selected");

        configure_main_loop(ctx, &mut main_loop, editor);

        let is_tool = editor || ctx.config.project_manager;
        if !is_tool {
            let scene = request
                .game_path
                .clone()
                .filter(|p| crate::args::SCENE_EXTENSIONS.iter().any(|e| p.ends_with(&format!(".{e}"))))
                .or_else(|| ctx.config.main_scene.clone());
            if let Some(tree) = main_loop.scene_tree_mut() {
                load_autoloads(ctx, tree);
                if let Some(scene) = scene {
                    let path = ctx.settings.localize_path(&scene);
                    let node = load_node(ctx, &path, "Main")
                        .ok_or_else(|| BootError::Start(format!("Failed loading scene: {path}")))?;
                    tree.set_current_scene(node);
                }
            }

            let icon = ctx.settings.get_string("application/config/icon", "");
            if !icon.is_empty() && ctx.loaders.exists(&icon, &ctx.settings, &ctx.packed_data) {
                let file = ctx.settings.globalize_path(&icon);
                ctx.platform.set_icon(Some(&file));
            } else {
                ctx.platform.set_icon(None);
            }
        }

        let sender = ctx
            .message_queue
            .as_ref()
            .map(MessageQueue::sender)
            .ok_or_else(|| ServerError::ContractViolation("message queue missing".to_string()))?;
        main_loop.init(sender);
        ctx.main_loop = Some(main_loop);

        self.driver = Some(FrameDriver::new(&self.ctx)?);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Loop and shutdown
    // -----------------------------------------------------------------------

    /// One driver iteration. Returns `true` when the process should exit.
    pub fn iteration(&mut self) -> bool {
        match self.driver.as_mut() {
            Some(driver) => driver.iteration(&mut self.ctx),
            None => true,
        }
    }

    /// Iterate until the main loop or `--quit` asks to exit.
    pub fn run(&mut self) {
        while !self.iteration() {}
    }

    /// Tear everything down. Safe to call in any phase, and more than once.
    pub fn cleanup(&mut self) {
        if self.phase == Phase::Finished {
            return;
        }
        self.driver = None;
        self.shutdown.run(&mut self.ctx);
        self.phase = Phase::Finished;
    }
}

impl std::fmt::Debug for Bootstrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrapper")
            .field("phase", &self.phase)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Start helpers
// ---------------------------------------------------------------------------

fn show_boot_splash(ctx: &mut EngineContext) {
    let image = ctx
        .settings
        .def("application/boot_splash/image", "")
        .as_str()
        .unwrap_or_default()
        .to_string();
    let image = (!image.is_empty() && ctx.loaders.exists(&image, &ctx.settings, &ctx.packed_data))
        .then(|| ctx.settings.globalize_path(&image));
    let bg_color = ctx
        .settings
        .def("application/boot_splash/bg_color", "")
        .as_str()
        .and_then(Color::from_html)
        .unwrap_or(Color::BOOT_BG);
    let fullsize = ctx
        .settings
        .def("application/boot_splash/fullsize", true)
        .as_bool()
        .unwrap_or(true);
    let clear_color = ctx
        .settings
        .def("rendering/environment/default_clear_color", "")
        .as_str()
        .and_then(Color::from_html)
        .unwrap_or(DEFAULT_CLEAR_COLOR);

    if let Ok(rendering) = ctx.registry.get_mut::<Box<dyn RenderingServer>>(RENDERING) {
        rendering.set_boot_image(&BootSplash {
            image,
            bg_color,
            fullsize,
        });
        rendering.set_default_clear_color(clear_color);
    }
}

fn configure_main_loop(ctx: &mut EngineContext, main_loop: &mut MainLoopKind, editor: bool) {
    let title = if ctx.config.project_manager {
        format!("{} - Project Manager", crate::ENGINE_NAME)
    } else if editor {
        format!("{} Editor", crate::ENGINE_NAME)
    } else {
        let name = ctx.settings.get_string("application/config/name", "");
        let name = ctx.translation.translate(&name).to_string();
        if name.is_empty() {
            crate::ENGINE_NAME.to_string()
        } else {
            name
        }
    };
    ctx.platform.set_window_title(&title);

    let Some(tree) = main_loop.scene_tree_mut() else {
        return;
    };
    let settings = &ctx.settings;
    tree.debug_collisions = ctx.config.debug_collisions;
    tree.debug_navigation = ctx.config.debug_navigation;
    tree.stretch.size = (ctx.config.width, ctx.config.height);

    if editor || ctx.config.project_manager {
        return;
    }
    tree.stretch.mode = settings.get_string("display/window/stretch/mode", "disabled");
    tree.stretch.aspect = settings.get_string("display/window/stretch/aspect", "ignore");
    tree.stretch.shrink = settings.get_f64("display/window/stretch/shrink", 1.0).max(1.0);
    tree.auto_accept_quit = settings.get_bool("application/config/auto_accept_quit", true);
    tree.quit_on_go_back = settings.get_bool("application/config/quit_on_go_back", true);
    tree.use_font_oversampling =
        settings.get_bool("rendering/quality/dynamic_fonts/use_oversampling", true);
    tree.shadow_atlas_size =
        settings.get_i64("rendering/quality/shadow_atlas/size", 4096).clamp(256, 16384) as u32;
    for (i, quadrant) in tree.shadow_atlas_quadrants.iter_mut().enumerate() {
        let key = format!("rendering/quality/shadow_atlas/quadrant_{i}_subdiv");
        *quadrant = settings.get_i64(&key, i64::from(*quadrant)).clamp(0, 8) as u32;
    }
}

/// Autoloads in two passes: singletons become script globals first so every
/// autoload script can see every other one.
fn load_autoloads(ctx: &mut EngineContext, tree: &mut SceneTreeLoop) {
    let autoloads = ctx.settings.autoloads();
    for entry in autoloads.iter().filter(|e| e.singleton) {
        ctx.scripts.add_global_constant(&entry.name, &entry.path);
    }
    for entry in &autoloads {
        let path = ctx.settings.localize_path(&entry.path);
        match load_node(ctx, &path, &entry.name) {
            Some(node) => tree.add_root_child(node),
            None => tracing::error!("Can't autoload: {path}"),
        }
    }
}

/// Load a scene or a script as a node. Failures are logged.
fn load_node(ctx: &EngineContext, path: &str, name: &str) -> Option<SceneNode> {
    let resource = match ctx.loaders.load(path, &ctx.settings, &ctx.packed_data) {
        Ok(resource) => resource,
        Err(e) => {
            tracing::debug!(path, error = %e, "resource load failed");
            return None;
        }
    };
    let script = match resource.kind {
        ResourceKind::Scene => None,
        ResourceKind::Script => match ctx.scripts.load(&resource.text, path) {
            Ok(script) => Some(script),
            Err(e) => {
                tracing::error!(path, error = %e, "script failed to compile");
                return None;
            }
        },
        ResourceKind::Image | ResourceKind::Other => {
            tracing::error!(path, "not a scene or a script");
            return None;
        }
    };
    Some(SceneNode {
        name: name.to_string(),
        source: path.to_string(),
        script,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::HeadlessPlatform;
    use crate::resources::Module;
    use ember_core::clock::ManualClock;
    use std::path::Path;
    use ember_servers::handle::ServerState;
    use serde_json::json;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("ember")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    fn project(dir: &Path, settings: serde_json::Value) {
        std::fs::write(dir.join("project.godot"), settings.to_string()).unwrap();
    }

    fn boot(dir: &Path, extra: &[&str], log: &CallLog) -> Bootstrapper {
        let mut argv = vec!["--path", dir.to_str().unwrap()];
        argv.extend_from_slice(extra);
        Bootstrapper::new(
            Box::new(HeadlessPlatform::new().with_log(log.clone()).with_user_data_dir(dir.join("user"))),
            args(&argv),
        )
        .with_clock(Arc::new(ManualClock::new(0)))
        .with_servers(HeadlessServers::with_log(log.clone()))
        .with_plugin_dir(None)
    }

    // -- 1. Setup --------------------------------------------------------

    #[test]
    fn setup_registers_servers_in_order() {
        let dir = tempfile::tempdir().unwrap();
        project(dir.path(), json!({"application/run/main_scene": "res://main.tscn"}));
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &[], &log);
        boot.setup(true).unwrap();

        let ctx = boot.context();
        assert_eq!(
            ctx.registry.names(),
            vec![RENDERING, AUDIO, ARVR, PHYSICS_2D, PHYSICS_3D, NAVIGATION, CAMERA, RENDERING_CALLBACKS]
        );
        assert_eq!(ctx.registry.state(RENDERING_CALLBACKS), Some(ServerState::Initialized));
        assert!(ctx.settings.is_frozen());
        assert!(log.position("platform.initialize").unwrap() < log.position("rendering.init").unwrap());
    }

    #[test]
    fn missing_main_scene_fails_setup_and_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        project(dir.path(), json!({"application/config/name": "Demo"}));
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &[], &log);

        let err = boot.setup(true).unwrap_err();
        assert!(err.to_string().contains("no main scene defined"), "{err}");
        assert_eq!(err.exit_code(), crate::error::ERR_INVALID_PARAMETER);
        assert!(boot.context().teardown_names().is_empty());
        assert!(boot.context().registry.is_empty());
    }

    #[test]
    fn missing_project_falls_back_to_project_manager() {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &["-e"], &log);
        boot.setup(true).unwrap();
        let config = &boot.context().config;
        assert!(config.project_manager);
        assert!(!config.editor);
    }

    #[test]
    fn missing_project_with_scene_argument_fails() {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &["level.tscn"], &log);
        let err = boot.setup(true).unwrap_err();
        assert!(err.to_string().starts_with("Couldn't load project data"), "{err}");
    }

    #[test]
    fn deferred_window_stops_after_phase_one() {
        struct Mobile(HeadlessPlatform);

        impl Platform for Mobile {
            fn name(&self) -> &str {
                "Mobile"
            }
            fn video_drivers(&self) -> Vec<String> {
                self.0.video_drivers()
            }
            fn audio_drivers(&self) -> Vec<String> {
                self.0.audio_drivers()
            }
            fn initialize(&mut self, config: &crate::config::BootConfig) -> Result<(), BootError> {
                self.0.initialize(config)
            }
            fn defers_window_creation(&self) -> bool {
                true
            }
            fn set_restart_on_exit(&mut self, args: Option<Vec<String>>) {
                self.0.set_restart_on_exit(args)
            }
            fn restart_on_exit(&self) -> Option<&[String]> {
                self.0.restart_on_exit()
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut boot = Bootstrapper::new(
            Box::new(Mobile(HeadlessPlatform::new().with_user_data_dir(dir.path()))),
            args(&["--path", dir.path().to_str().unwrap(), "-p"]),
        )
        .with_plugin_dir(None);
        boot.setup(true).unwrap();
        assert!(boot.context().registry.is_empty());
        boot.setup2().unwrap();
        assert_eq!(boot.context().registry.len(), 8);
    }

    #[test]
    fn boot_splash_is_shown_after_servers_start() {
        let dir = tempfile::tempdir().unwrap();
        project(
            dir.path(),
            json!({
                "application/run/main_scene": "res://main.tscn",
                "application/boot_splash/bg_color": "#102030",
            }),
        );
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &[], &log);
        boot.setup(true).unwrap();

        let splash = log.position("rendering.set_boot_image").unwrap();
        assert!(log.position("rendering.init").unwrap() < splash);
        assert_eq!(log.count("rendering.set_boot_image"), 1);
    }

    // -- 2. Start --------------------------------------------------------

    #[test]
    fn unknown_main_loop_type_alerts() {
        let dir = tempfile::tempdir().unwrap();
        project(
            dir.path(),
            json!({
                "application/run/main_scene": "res://main.tscn",
                "application/run/main_loop_type": "Nope",
            }),
        );
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &[], &log);
        boot.setup(true).unwrap();
        assert!(!boot.start());
        assert_eq!(log.count("platform.alert"), 1);
        assert_eq!(boot.exit_code(), 1);
    }

    #[test]
    fn autoloads_and_main_scene_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        project(
            dir.path(),
            json!({
                "application/run/main_scene": "res://main.tscn",
                "autoload/Global": "*res://global.ems",
                "autoload/Broken": "res://missing.tscn",
                "autoload/Hud": "res://hud.tscn",
            }),
        );
        std::fs::write(dir.path().join("main.tscn"), "[scene]").unwrap();
        std::fs::write(dir.path().join("hud.tscn"), "[scene]").unwrap();
        std::fs::write(dir.path().join("global.ems"), "extends Node\n").unwrap();

        let log = CallLog::new();
        let mut boot = boot(dir.path(), &[], &log);
        boot.setup(true).unwrap();
        assert!(boot.start());

        let tree = boot
            .context_mut()
            .main_loop
            .as_mut()
            .and_then(MainLoopKind::scene_tree_mut)
            .unwrap();
        let names: Vec<&str> = tree.root_children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["Global", "Hud"]);
        assert_eq!(tree.current_scene.as_ref().unwrap().source, "res://main.tscn");
    }

    #[test]
    fn missing_main_scene_file_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        project(dir.path(), json!({"application/run/main_scene": "res://gone.tscn"}));
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &[], &log);
        boot.setup(true).unwrap();
        assert!(!boot.start());
        boot.cleanup();
        assert_eq!(log.count("platform.finalize_core"), 1);
    }

    #[test]
    fn custom_main_loop_is_instantiated() {
        struct Once;
        impl MainLoop for Once {
            fn iteration(&mut self, _delta: f64) -> bool {
                false
            }
            fn idle(&mut self, _delta: f64) -> bool {
                true
            }
        }

        let dir = tempfile::tempdir().unwrap();
        project(
            dir.path(),
            json!({
                "application/run/main_scene": "res://main.tscn",
                "application/run/main_loop_type": "Once",
            }),
        );
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &[], &log).with_class(
            "Once",
            MAIN_LOOP_CLASS,
            Some(Arc::new(|| Box::new(Once) as Box<dyn MainLoop>)),
        );
        boot.setup(true).unwrap();
        assert!(boot.start());
        assert!(boot.iteration());
        boot.cleanup();
        assert_eq!(boot.exit_code(), 0);
    }

    #[test]
    fn tool_requests_go_to_the_runner() {
        struct Recorder(Rc<RefCell<Vec<ToolRequest>>>);
        impl ToolRunner for Recorder {
            fn run(&mut self, tool: &ToolRequest, _ctx: &mut EngineContext) -> Result<i32, BootError> {
                self.0.borrow_mut().push(tool.clone());
                Ok(0)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        project(dir.path(), json!({}));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &["--doctool", "docs"], &log).with_tool_runner(Recorder(seen.clone()));
        boot.setup(true).unwrap();
        assert!(!boot.start());
        assert_eq!(
            seen.borrow().as_slice(),
            [ToolRequest::DocTool {
                path: "docs".into(),
                include_base: true
            }]
        );
    }

    #[test]
    fn tool_without_runner_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        project(dir.path(), json!({}));
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &["--doctool"], &log);
        boot.setup(true).unwrap();
        assert!(!boot.start());
        assert_eq!(boot.exit_code(), 1);
    }

    #[test]
    fn reflection_dump_skips_the_main_loop() {
        let dir = tempfile::tempdir().unwrap();
        project(dir.path(), json!({"application/run/main_scene": "res://main.tscn"}));
        let out = dir.path().join("reflection.json");
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &["--gen-reflection", out.to_str().unwrap()], &log);
        boot.setup(true).unwrap();
        assert!(!boot.start());
        assert_eq!(boot.exit_code(), 0);

        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert!(doc["classes"].as_array().unwrap().iter().any(|c| c["name"] == "SceneTree"));
    }

    // -- 3. Plugins ------------------------------------------------------

    #[test]
    fn module_plugins_add_main_loop_classes() {
        struct Game;
        impl Module for Game {
            fn name(&self) -> &str {
                "game"
            }
            fn register_types(&mut self, classes: &mut crate::main_loop::ClassRegistry) {
                classes.register("Arena", Some(SCENE_TREE_CLASS), None);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        project(
            dir.path(),
            json!({
                "application/run/main_scene": "res://main.tscn",
                "application/run/main_loop_type": "Arena",
            }),
        );
        std::fs::write(dir.path().join("main.tscn"), "[scene]").unwrap();
        let log = CallLog::new();
        let mut boot = boot(dir.path(), &[], &log).with_plugin(
            PluginManifest {
                name: "game".into(),
                kind: ember_servers::plugins::PluginKind::Module,
                config: serde_json::Value::Null,
            },
            Box::new(Box::new(Game) as Box<dyn Module>),
        );
        boot.setup(true).unwrap();
        assert!(boot.start());
        assert_eq!(boot.context().plugins.loaded().len(), 1);
    }
}
