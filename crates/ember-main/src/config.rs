//! Boot configuration.
//!
//! [`BootConfig`] is filled in three layers, each overriding the previous
//! one: built-in defaults ([`BootConfig::default`]), project settings
//! ([`BootConfig::apply_project_settings`]) and the command line
//! ([`ArgParser`](crate::args::ArgParser)). The command line is parsed first,
//! so every CLI-settable value remembers whether it was given explicitly and
//! the project layer only fills the gaps.
//!
//! The config is frozen once `setup` returns.

use std::path::PathBuf;

use ember_core::engine::{DEFAULT_PHYSICS_FPS, DEFAULT_PHYSICS_JITTER_FIX};
use ember_core::settings::ProjectSettings;
use serde_json::Value;

/// Default remote filesystem port.
pub const DEFAULT_REMOTE_FS_PORT: u16 = 6010;

/// Default remote debugger port.
pub const DEFAULT_REMOTE_DEBUG_PORT: u16 = 6007;

/// Default low-processor-mode sleep, roughly 144 fps.
pub const DEFAULT_LOW_PROCESSOR_SLEEP_US: u64 = 6900;

const DEFAULT_WIDTH: u32 = 1024;
const DEFAULT_HEIGHT: u32 = 600;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// How the rendering server is threaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderThreadMode {
    /// Rendering on the main thread, no locking.
    Unsafe,
    /// Rendering on the main thread behind a lock.
    #[default]
    Safe,
    /// Rendering on a dedicated thread.
    Separate,
}

impl RenderThreadMode {
    /// Parse a CLI value (`unsafe`, `safe`, `separate`).
    pub fn from_arg(value: &str) -> Option<Self> {
        match value {
            "unsafe" => Some(Self::Unsafe),
            "safe" => Some(Self::Safe),
            "separate" => Some(Self::Separate),
            _ => None,
        }
    }

    /// Map `rendering/threads/thread_model`. Out-of-range values keep the default.
    pub fn from_index(index: i64) -> Option<Self> {
        match index {
            0 => Some(Self::Unsafe),
            1 => Some(Self::Safe),
            2 => Some(Self::Separate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VsyncMode {
    Off,
    #[default]
    On,
    ViaCompositor,
}

/// Which script debugger to attach.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DebugMode {
    #[default]
    None,
    /// Interactive debugger on stdio.
    Local,
    /// Debugger connecting out to an editor.
    Remote { host: String, port: u16 },
}

/// Tri-state CLI override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Override {
    #[default]
    Unset,
    Enabled,
    Disabled,
}

impl Override {
    pub fn resolve(self, project_value: bool) -> bool {
        match self {
            Override::Unset => project_value,
            Override::Enabled => true,
            Override::Disabled => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

// ---------------------------------------------------------------------------
// Sub-structures
// ---------------------------------------------------------------------------

/// Initial window flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowMode {
    pub fullscreen: bool,
    pub maximized: bool,
    pub windowed: bool,
    pub always_on_top: bool,
    pub borderless: bool,
    pub resizable: bool,
}

impl Default for WindowMode {
    fn default() -> Self {
        Self {
            fullscreen: false,
            maximized: false,
            windowed: false,
            always_on_top: false,
            borderless: false,
            resizable: true,
        }
    }
}

/// A breakpoint requested with `--breakpoints`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub source: String,
    pub line: u32,
}

/// Logging options gathered from the CLI and the project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub verbosity: Verbosity,
    pub file_logging: bool,
    /// `res://`, `user://` or filesystem path of the current log file.
    pub log_path: String,
    /// Total log files kept, the current one included.
    pub max_log_files: u32,
    pub disable_stdout: bool,
    pub disable_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Normal,
            file_logging: false,
            log_path: "user://logs/log.txt".to_string(),
            max_log_files: 10,
            disable_stdout: false,
            disable_stderr: false,
        }
    }
}

// ---------------------------------------------------------------------------
// BootConfig
// ---------------------------------------------------------------------------

/// Everything `setup` decides before any server starts.
#[derive(Debug, Clone, PartialEq)]
pub struct BootConfig {
    /// Video driver named on the command line, already validated.
    pub video_driver: Option<String>,
    pub video_driver_idx: usize,
    /// Audio driver named on the command line, already validated.
    pub audio_driver: Option<String>,
    pub audio_driver_idx: usize,

    pub window: WindowMode,
    pub width: u32,
    pub height: u32,
    /// Resolution was forced with `--resolution`.
    pub custom_resolution: bool,
    /// Project window size applies (false in the editor and project manager).
    pub use_custom_res: bool,
    pub init_custom_pos: (i32, i32),
    pub init_use_custom_pos: bool,
    pub low_dpi: bool,
    /// Project allows high-DPI rendering. Ignored with `--low-dpi`.
    pub allow_hidpi: bool,
    pub no_window: bool,

    pub vsync: VsyncMode,
    pub vsync_via_compositor: Override,

    pub render_thread_mode: RenderThreadMode,
    /// Render thread mode was given with `--render-thread`.
    pub render_thread_forced: bool,

    pub target_fps: u32,
    /// `-1` runs in real time.
    pub fixed_fps: i32,
    pub physics_fps: u32,
    pub physics_jitter_fix: f64,
    pub frame_delay_ms: u32,
    pub time_scale: f64,
    pub delta_smoothing: bool,
    pub delta_smoothing_override: Override,
    pub delta_sync_after_draw: bool,
    pub low_processor_mode: bool,
    pub low_processor_sleep_us: u64,
    pub agile_input_flushing: bool,
    pub use_input_buffering: bool,

    pub debug_mode: DebugMode,
    pub breakpoints: Vec<Breakpoint>,
    pub skip_breakpoints: bool,
    pub profiling: bool,
    pub debug_collisions: bool,
    pub debug_navigation: bool,
    pub disable_render_loop: bool,
    pub disable_crash_handler: bool,
    pub print_fps: bool,

    /// `host[:port]` of the remote filesystem.
    pub remote_fs: Option<String>,
    pub remote_fs_password: String,
    pub main_pack: Option<PathBuf>,
    pub project_path: PathBuf,
    pub upwards: bool,
    pub locale: Option<String>,
    pub main_scene: Option<String>,
    pub log: LogConfig,

    pub editor: bool,
    pub project_manager: bool,
    pub auto_quit: bool,
    pub show_help: bool,
    pub gen_reflection: Option<PathBuf>,

    /// Arguments the bootstrapper did not consume, in order. `start` and the
    /// script layer parse these again.
    pub main_args: Vec<String>,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            video_driver: None,
            video_driver_idx: 0,
            audio_driver: None,
            audio_driver_idx: 0,
            window: WindowMode::default(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            custom_resolution: false,
            use_custom_res: true,
            init_custom_pos: (0, 0),
            init_use_custom_pos: false,
            low_dpi: false,
            allow_hidpi: false,
            no_window: false,
            vsync: VsyncMode::On,
            vsync_via_compositor: Override::Unset,
            render_thread_mode: RenderThreadMode::Safe,
            render_thread_forced: false,
            target_fps: 0,
            fixed_fps: -1,
            physics_fps: DEFAULT_PHYSICS_FPS,
            physics_jitter_fix: DEFAULT_PHYSICS_JITTER_FIX,
            frame_delay_ms: 0,
            time_scale: 1.0,
            delta_smoothing: true,
            delta_smoothing_override: Override::Unset,
            delta_sync_after_draw: false,
            low_processor_mode: false,
            low_processor_sleep_us: DEFAULT_LOW_PROCESSOR_SLEEP_US,
            agile_input_flushing: false,
            use_input_buffering: true,
            debug_mode: DebugMode::None,
            breakpoints: Vec::new(),
            skip_breakpoints: false,
            profiling: false,
            debug_collisions: false,
            debug_navigation: false,
            disable_render_loop: false,
            disable_crash_handler: false,
            print_fps: false,
            remote_fs: None,
            remote_fs_password: String::new(),
            main_pack: None,
            project_path: PathBuf::from("."),
            upwards: false,
            locale: None,
            main_scene: None,
            log: LogConfig::default(),
            editor: false,
            project_manager: false,
            auto_quit: false,
            show_help: false,
            gen_reflection: None,
            main_args: Vec::new(),
        }
    }
}

impl BootConfig {
    /// True when running the editor or the project manager.
    pub fn is_tool(&self) -> bool {
        self.editor || self.project_manager
    }

    /// Fill every value the command line left unset from the project, and
    /// record the built-in defaults in `settings` for keys the project lacks.
    pub fn apply_project_settings(
        &mut self,
        settings: &mut ProjectSettings,
        video_drivers: &[String],
        audio_drivers: &[String],
    ) {
        if self.is_tool() {
            self.use_custom_res = false;
        }

        // Display.
        let width = as_u32(&settings.def("display/window/size/width", DEFAULT_WIDTH));
        let height = as_u32(&settings.def("display/window/size/height", DEFAULT_HEIGHT));
        let test_width = as_u32(&settings.def("display/window/size/test_width", 0));
        let test_height = as_u32(&settings.def("display/window/size/test_height", 0));
        let resizable = as_bool(&settings.def("display/window/size/resizable", true));
        let borderless = as_bool(&settings.def("display/window/size/borderless", false));
        let fullscreen = as_bool(&settings.def("display/window/size/fullscreen", false));
        let always_on_top = as_bool(&settings.def("display/window/size/always_on_top", false));

        if self.use_custom_res {
            if !self.custom_resolution {
                self.width = width;
                self.height = height;
                if test_width > 0 {
                    self.width = test_width;
                }
                if test_height > 0 {
                    self.height = test_height;
                }
            }
            self.window.resizable = resizable;
            self.window.borderless = borderless;
            self.window.fullscreen |= fullscreen;
            self.window.always_on_top |= always_on_top;
        }

        if !self.low_dpi {
            self.allow_hidpi = as_bool(&settings.def("display/window/dpi/allow_hidpi", false));
        }

        let use_vsync = as_bool(&settings.def("display/window/vsync/use_vsync", true));
        let via_compositor = self.vsync_via_compositor.resolve(as_bool(
            &settings.def("display/window/vsync/vsync_via_compositor", false),
        ));
        self.vsync = match (use_vsync, via_compositor) {
            (false, _) => VsyncMode::Off,
            (true, true) => VsyncMode::ViaCompositor,
            (true, false) => VsyncMode::On,
        };

        // Threading.
        let thread_model = settings.def("rendering/threads/thread_model", 1);
        if !self.render_thread_forced {
            if let Some(mode) = thread_model.as_i64().and_then(RenderThreadMode::from_index) {
                self.render_thread_mode = mode;
            }
        }

        // Drivers.
        let default_video = video_drivers.first().cloned().unwrap_or_default();
        let configured_video = as_string(&settings.def(
            "rendering/quality/driver/driver_name",
            default_video.as_str(),
        ));
        self.video_driver_idx = resolve_driver(
            "video",
            self.video_driver.as_deref().unwrap_or(&configured_video),
            video_drivers,
        );
        let default_audio = audio_drivers.first().cloned().unwrap_or_default();
        let configured_audio = as_string(&settings.def("audio/driver", default_audio.as_str()));
        self.audio_driver_idx = resolve_driver(
            "audio",
            self.audio_driver.as_deref().unwrap_or(&configured_audio),
            audio_drivers,
        );

        // Timing.
        self.physics_fps =
            (settings.def("physics/common/physics_fps", DEFAULT_PHYSICS_FPS).as_i64())
                .map_or(DEFAULT_PHYSICS_FPS, |v| v.clamp(1, i64::from(u32::MAX)) as u32);
        self.physics_jitter_fix = settings
            .def("physics/common/physics_jitter_fix", DEFAULT_PHYSICS_JITTER_FIX)
            .as_f64()
            .unwrap_or(DEFAULT_PHYSICS_JITTER_FIX)
            .max(0.0);
        self.target_fps = as_u32(&settings.def("debug/settings/fps/force_fps", 0));
        self.print_fps |= as_bool(&settings.def("debug/settings/stdout/print_fps", false));
        if self.log.verbosity == Verbosity::Normal
            && as_bool(&settings.def("debug/settings/stdout/verbose_stdout", false))
        {
            self.log.verbosity = Verbosity::Verbose;
        }
        if self.frame_delay_ms == 0 {
            self.frame_delay_ms = as_u32(&settings.def("application/run/frame_delay_msec", 0));
        }
        self.low_processor_mode =
            as_bool(&settings.def("application/run/low_processor_mode", false));
        self.low_processor_sleep_us = settings
            .def(
                "application/run/low_processor_mode_sleep_usec",
                DEFAULT_LOW_PROCESSOR_SLEEP_US,
            )
            .as_u64()
            .unwrap_or(DEFAULT_LOW_PROCESSOR_SLEEP_US);
        self.delta_smoothing = self
            .delta_smoothing_override
            .resolve(as_bool(&settings.def("gui/timers/delta_smoothing", true)));
        self.delta_sync_after_draw =
            as_bool(&settings.def("gui/timers/delta_sync_after_draw", false));
        self.agile_input_flushing =
            as_bool(&settings.def("input_devices/buffering/agile_event_flushing", false));
        self.use_input_buffering =
            as_bool(&settings.def("input_devices/buffering/use_input_buffering", true));

        // Logging.
        self.log.file_logging =
            as_bool(&settings.def("logging/file_logging/enable_file_logging", false));
        self.log.log_path = as_string(&settings.def(
            "logging/file_logging/log_path",
            self.log.log_path.as_str(),
        ));
        self.log.max_log_files = as_u32(&settings.def("logging/file_logging/max_log_files", 10));
        if as_bool(&settings.def("application/run/disable_stdout", false)) {
            self.log.disable_stdout = true;
            self.log.verbosity = Verbosity::Quiet;
        }
        self.log.disable_stderr = as_bool(&settings.def("application/run/disable_stderr", false));

        if self.main_scene.is_none() {
            let scene = as_string(&settings.def("application/run/main_scene", ""));
            if !scene.is_empty() {
                self.main_scene = Some(scene);
            }
        }

        self.apply_tool_defaults();
    }

    /// Invariants that hold whatever layer set the values.
    pub(crate) fn apply_tool_defaults(&mut self) {
        if self.editor {
            self.render_thread_mode = RenderThreadMode::Safe;
            self.use_custom_res = false;
            if !self.window.windowed {
                self.window.maximized = true;
            }
        }
    }
}

fn resolve_driver(kind: &str, name: &str, available: &[String]) -> usize {
    match available.iter().position(|d| d == name) {
        Some(index) => index,
        None => {
            tracing::warn!(
                driver = name,
                kind,
                fallback = available.first().map(String::as_str).unwrap_or(""),
                "unknown driver in project settings, using the first available"
            );
            0
        }
    }
}

fn as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

fn as_u32(value: &Value) -> u32 {
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|f| f.max(0.0) as u64))
        .map_or(0, |v| v.min(u64::from(u32::MAX)) as u32)
}

fn as_string(value: &Value) -> String {
    value.as_str().unwrap_or_default().to_string()
}
