//! The OS layer as seen by the bootstrapper.
//!
//! A [`Platform`] publishes the available video and audio drivers, opens
//! the window, reports whether drawing is possible and owns process-level
//! concerns (alerts, restart-on-exit, the user data directory). Window
//! system integration is out of scope here; [`HeadlessPlatform`] is the
//! implementation used for `--no-window` runs, servers and tests.

use std::path::{Path, PathBuf};

use ember_servers::headless::CallLog;

use crate::config::BootConfig;
use crate::error::BootError;

/// Environment variable that silences the running-as-root warning.
pub const SILENCE_ROOT_WARNING_ENV: &str = "GODOT_SILENCE_ROOT_WARNING";

pub trait Platform {
    fn name(&self) -> &str;

    /// Video driver names, in preference order.
    fn video_drivers(&self) -> Vec<String>;

    /// Audio driver names, in preference order.
    fn audio_drivers(&self) -> Vec<String>;

    /// Early process setup, before any singleton exists.
    fn initialize_core(&mut self) {}

    /// Open the window and bring up the drivers chosen in `config`.
    fn initialize(&mut self, config: &BootConfig) -> Result<(), BootError>;

    /// Mobile platforms create their window later and stop `setup` after
    /// phase one.
    fn defers_window_creation(&self) -> bool {
        false
    }

    /// False while the window is minimised or hidden.
    fn can_draw(&self) -> bool {
        true
    }

    fn set_window_title(&mut self, _title: &str) {}

    /// `None` installs the built-in icon.
    fn set_icon(&mut self, _icon: Option<&Path>) {}

    /// Show a blocking message. Platforms without dialogs log it.
    fn alert(&mut self, message: &str, title: &str) {
        tracing::error!(title, "{message}");
    }

    /// Deliver buffered input events to the main loop.
    fn flush_buffered_input(&mut self) {}

    /// Directory backing `user://` for the project called `app_name`.
    fn user_data_dir(&self, app_name: &str) -> PathBuf {
        let base = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
            .unwrap_or_else(std::env::temp_dir);
        let app = if app_name.is_empty() {
            "__unnamed_project"
        } else {
            app_name
        };
        base.join(crate::ENGINE_NAME.to_lowercase())
            .join("app_userdata")
            .join(app)
    }

    fn executable_path(&self) -> PathBuf {
        std::env::current_exe().unwrap_or_else(|_| PathBuf::from(crate::ENGINE_NAME.to_lowercase()))
    }

    /// Arm (or with `None`, disarm) a restart with `args` after shutdown.
    fn set_restart_on_exit(&mut self, args: Option<Vec<String>>);

    fn restart_on_exit(&self) -> Option<&[String]>;

    /// Spawn `program` detached.
    fn execute(&mut self, program: &Path, args: &[String]) -> Result<(), BootError> {
        std::process::Command::new(program)
            .args(args)
            .spawn()
            .map(|_| ())
            .map_err(|e| BootError::io(program, e))
    }

    /// Whether the process runs with root privileges.
    fn is_root(&self) -> bool {
        effective_uid_is_root()
    }

    /// Close the window and release drivers.
    fn finalize(&mut self) {}

    /// Last call before the process exits.
    fn finalize_core(&mut self) {}
}

/// Reads the effective uid from procfs where available.
fn effective_uid_is_root() -> bool {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return false;
    };
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(1))
        .is_some_and(|euid| euid == "0")
}

// ---------------------------------------------------------------------------
// HeadlessPlatform
// ---------------------------------------------------------------------------

/// Platform without a window system.
///
/// Calls can be recorded into a [`CallLog`] as `platform.<call>`. With
/// [`record_only`](Self::record_only) set, `execute` logs the command line
/// instead of spawning it.
#[derive(Debug, Clone)]
pub struct HeadlessPlatform {
    video_drivers: Vec<String>,
    audio_drivers: Vec<String>,
    log: Option<CallLog>,
    can_draw: bool,
    root: bool,
    record_only: bool,
    user_data_dir: Option<PathBuf>,
    restart_args: Option<Vec<String>>,
    pub window_title: String,
    pub icon: Option<Option<PathBuf>>,
    pub alerts: Vec<String>,
    pub executed: Vec<(PathBuf, Vec<String>)>,
    pub initialized_with: Option<(usize, usize)>,
    pub input_flushes: u64,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self {
            video_drivers: vec!["GLES3".to_string(), "GLES2".to_string()],
            audio_drivers: vec!["Dummy".to_string()],
            log: None,
            can_draw: true,
            root: effective_uid_is_root(),
            record_only: false,
            user_data_dir: None,
            restart_args: None,
            window_title: String::new(),
            icon: None,
            alerts: Vec::new(),
            executed: Vec::new(),
            initialized_with: None,
            input_flushes: 0,
        }
    }

    pub fn with_drivers(mut self, video: &[&str], audio: &[&str]) -> Self {
        self.video_drivers = video.iter().map(|s| s.to_string()).collect();
        self.audio_drivers = audio.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_user_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_data_dir = Some(dir.into());
        self
    }

    pub fn with_root(mut self, root: bool) -> Self {
        self.root = root;
        self
    }

    pub fn record_only(mut self) -> Self {
        self.record_only = true;
        self
    }

    pub fn set_can_draw(&mut self, can_draw: bool) {
        self.can_draw = can_draw;
    }

    fn record(&self, call: &str) {
        if let Some(log) = &self.log {
            log.record(format!("platform.{call}"));
        }
    }
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HeadlessPlatform {
    fn name(&self) -> &str {
        "Headless"
    }

    fn video_drivers(&self) -> Vec<String> {
        self.video_drivers.clone()
    }

    fn audio_drivers(&self) -> Vec<String> {
        self.audio_drivers.clone()
    }

    fn initialize_core(&mut self) {
        self.record("initialize_core");
    }

    fn initialize(&mut self, config: &BootConfig) -> Result<(), BootError> {
        self.record("initialize");
        if self.video_drivers.is_empty() {
            return Err(BootError::Platform("no video driver available".to_string()));
        }
        self.initialized_with = Some((config.video_driver_idx, config.audio_driver_idx));
        tracing::debug!(
            video = self.video_drivers.get(config.video_driver_idx).map(String::as_str),
            audio = self.audio_drivers.get(config.audio_driver_idx).map(String::as_str),
            width = config.width,
            height = config.height,
            "headless platform initialized"
        );
        Ok(())
    }

    fn can_draw(&self) -> bool {
        self.can_draw
    }

    fn set_window_title(&mut self, title: &str) {
        self.window_title = title.to_string();
    }

    fn set_icon(&mut self, icon: Option<&Path>) {
        self.icon = Some(icon.map(Path::to_path_buf));
    }

    fn alert(&mut self, message: &str, title: &str) {
        self.record("alert");
        tracing::error!(title, "{message}");
        self.alerts.push(message.to_string());
    }

    fn flush_buffered_input(&mut self) {
        self.input_flushes += 1;
        self.record("flush_buffered_input");
    }

    fn user_data_dir(&self, app_name: &str) -> PathBuf {
        match &self.user_data_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir()
                .join(crate::ENGINE_NAME.to_lowercase())
                .join(app_name),
        }
    }

    fn set_restart_on_exit(&mut self, args: Option<Vec<String>>) {
        self.restart_args = args;
    }

    fn restart_on_exit(&self) -> Option<&[String]> {
        self.restart_args.as_deref()
    }

    fn execute(&mut self, program: &Path, args: &[String]) -> Result<(), BootError> {
        self.record("execute");
        self.executed.push((program.to_path_buf(), args.to_vec()));
        if self.record_only {
            return Ok(());
        }
        std::process::Command::new(program)
            .args(args)
            .spawn()
            .map(|_| ())
            .map_err(|e| BootError::io(program, e))
    }

    fn is_root(&self) -> bool {
        self.root
    }

    fn finalize(&mut self) {
        self.record("finalize");
    }

    fn finalize_core(&mut self) {
        self.record("finalize_core");
    }
}
