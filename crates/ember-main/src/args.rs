//! Command-line parsing.
//!
//! The flag surface is a `clap` [`Command`] built by [`ArgParser::command`].
//! Arguments are split before `clap` sees them: recognised flags (with
//! their operands) go to `clap`, everything else is passed through after
//! `--` into the trailing `main_args` capture and lands, in order, in
//! [`BootConfig::main_args`]. Standalone-tool flags are both parsed and
//! forwarded, so [`StartRequest::parse`] can pick them up again in `start`.
//!
//! Parsing is pure: the same arguments always produce the same config.

use std::error::Error as _;
use std::path::{Path, PathBuf};

use clap::parser::ValueSource;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use ember_core::settings::PROJECT_FILE;

use crate::config::{
    Breakpoint, BootConfig, DebugMode, Override, RenderThreadMode, Verbosity,
    DEFAULT_REMOTE_DEBUG_PORT,
};
use crate::error::BootError;

/// Extensions a positional argument may carry to be taken as the main scene.
pub const SCENE_EXTENSIONS: [&str; 5] = ["scn", "tscn", "escn", "res", "tres"];

const GENERAL: &str = "General options";
const RUN: &str = "Run options";
const DISPLAY: &str = "Display options";
const DEBUG: &str = "Debug options";
const TOOLS: &str = "Standalone tools";

/// Trailing capture for everything the bootstrapper does not consume.
const MAIN_ARGS: &str = "main_args";

/// Tool flags that `start` reads back out of `main_args`.
const FORWARDED: [&str; 10] = [
    "script",
    "check-only",
    "export",
    "export-debug",
    "export-pack",
    "doctool",
    "no-docbase",
    "build-solutions",
    "gdnative-generate-json-api",
    "test",
];

/// Flags that only make sense from the editor.
const EDITOR_TOOLS: [&str; 5] = [
    "export",
    "export-debug",
    "export-pack",
    "build-solutions",
    "gdnative-generate-json-api",
];

/// Validates and applies command-line arguments.
#[derive(Debug, Clone)]
pub struct ArgParser {
    video_drivers: Vec<String>,
    audio_drivers: Vec<String>,
}

impl ArgParser {
    /// `video_drivers` and `audio_drivers` are the names the platform
    /// publishes; drivers named on the command line must be among them.
    pub fn new(video_drivers: Vec<String>, audio_drivers: Vec<String>) -> Self {
        Self {
            video_drivers,
            audio_drivers,
        }
    }

    /// Parse `args` into a fresh config.
    pub fn parse(&self, args: &[String]) -> Result<BootConfig, BootError> {
        let mut config = BootConfig::default();
        self.parse_into(args, &mut config)?;
        Ok(config)
    }

    /// Parse `args` on top of `config`.
    ///
    /// On a malformed argument the error names the problem and
    /// `config.show_help` is set.
    pub fn parse_into(&self, args: &[String], config: &mut BootConfig) -> Result<(), BootError> {
        let result = self.apply(args, config);
        if let Err(BootError::Config(_) | BootError::HelpRequested) = &result {
            config.show_help = true;
        }
        result
    }

    /// Usage text listing every option and the available drivers.
    pub fn help_text(&self, binary: &str) -> String {
        self.command()
            .override_usage(format!(
                "{binary} [options] [path to scene or '{PROJECT_FILE}' file]"
            ))
            .render_help()
            .to_string()
    }

    /// The full flag surface.
    pub fn command(&self) -> Command {
        let audio = self.audio_drivers.clone();
        let video = self.video_drivers.clone();

        Command::new("ember")
            .no_binary_name(true)
            .disable_help_flag(true)
            .disable_version_flag(true)
            .args_override_self(true)
            .before_help(format!("{} v{}", crate::ENGINE_NAME, env!("CARGO_PKG_VERSION")))
            // General.
            .arg(flag("help", Some('h'), GENERAL, "Display this help message."))
            .arg(flag("version", None, GENERAL, "Display the version string."))
            .arg(flag("verbose", Some('v'), GENERAL, "Use verbose stdout mode."))
            .arg(flag(
                "quiet",
                None,
                GENERAL,
                "Quiet mode, silences stdout messages. Errors are still displayed.",
            ))
            // Run.
            .arg(flag("editor", Some('e'), RUN, "Start the editor instead of running the scene."))
            .arg(flag(
                "project-manager",
                Some('p'),
                RUN,
                "Start the project manager, even if a project is auto-detected.",
            ))
            .arg(flag("quit", Some('q'), RUN, "Quit after the first iteration."))
            .arg(
                value("language", RUN, "locale", "Use a specific locale (<locale> being a two-letter code).")
                    .short('l'),
            )
            .arg(
                value("path", RUN, "directory", "Path to a project (<directory> must contain a 'project.godot' file).")
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(flag("upwards", Some('u'), RUN, "Scan folders upwards for project.godot file."))
            .arg(
                value("main-pack", RUN, "file", "Path to a pack file to load.")
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                value("render-thread", RUN, "mode", "Render thread mode ('unsafe', 'safe', 'separate').")
                    .value_parser(parse_render_thread),
            )
            .arg(value("remote-fs", RUN, "address", "Remote filesystem (<host/IP>[:<port>] address)."))
            .arg(value("remote-fs-password", RUN, "password", "Password for remote filesystem."))
            .arg(
                value("audio-driver", RUN, "driver", "")
                    .help(format!("Audio driver ({}).", quoted(&audio)))
                    .value_parser(move |name: &str| check_driver("audio", name, &audio)),
            )
            .arg(
                value("video-driver", RUN, "driver", "")
                    .help(format!("Video driver ({}).", quoted(&video)))
                    .value_parser(move |name: &str| check_driver("video", name, &video)),
            )
            // Display.
            .arg(flag("fullscreen", Some('f'), DISPLAY, "Request fullscreen mode."))
            .arg(flag("maximized", Some('m'), DISPLAY, "Request a maximized window."))
            .arg(flag("windowed", Some('w'), DISPLAY, "Request windowed mode."))
            .arg(flag("always-on-top", Some('t'), DISPLAY, "Request an always-on-top window."))
            .arg(
                value("resolution", DISPLAY, "W>x<H", "Request window resolution.")
                    .value_parser(parse_resolution),
            )
            .arg(
                value("position", DISPLAY, "X>,<Y", "Request window position.")
                    .value_parser(parse_position),
            )
            .arg(flag("low-dpi", None, DISPLAY, "Force low-DPI mode."))
            .arg(flag(
                "no-window",
                None,
                DISPLAY,
                "Disable window creation. Useful together with --script.",
            ))
            .arg(flag(
                "enable-vsync-via-compositor",
                None,
                DISPLAY,
                "When vsync is enabled, vsync via the OS' window compositor.",
            ))
            .arg(flag(
                "disable-vsync-via-compositor",
                None,
                DISPLAY,
                "Disable vsync via the OS' window compositor.",
            ))
            .arg(flag(
                "enable-delta-smoothing",
                None,
                DISPLAY,
                "Enable delta smoothing, overriding the project setting.",
            ))
            .arg(flag(
                "disable-delta-smoothing",
                None,
                DISPLAY,
                "Disable delta smoothing, overriding the project setting.",
            ))
            // Debug.
            .arg(flag("debug", Some('d'), DEBUG, "Debug (local stdout debugger)."))
            .arg(
                value(
                    "breakpoints",
                    DEBUG,
                    "list",
                    "Breakpoint list as source:line comma-separated pairs, no spaces (use %20 instead).",
                )
                .short('b')
                .value_parser(parse_breakpoints),
            )
            .arg(flag("profiling", None, DEBUG, "Enable profiling in the script debugger."))
            .arg(
                value("remote-debug", DEBUG, "address", "Remote debug (<host/IP>:<port> address).")
                    .value_parser(parse_remote_debug),
            )
            .arg(flag(
                "debug-collisions",
                None,
                DEBUG,
                "Show collision shapes when running the scene.",
            ))
            .arg(flag(
                "debug-navigation",
                None,
                DEBUG,
                "Show navigation polygons when running the scene.",
            ))
            .arg(
                value(
                    "frame-delay",
                    DEBUG,
                    "ms",
                    "Simulate high CPU load (delay each frame by <ms> milliseconds).",
                )
                .value_parser(|text: &str| parse_number::<u32>(text, "frame delay")),
            )
            .arg(
                value(
                    "time-scale",
                    DEBUG,
                    "scale",
                    "Force time scale (higher values are faster, 1.0 is normal speed).",
                )
                .value_parser(|text: &str| parse_number::<f64>(text, "time scale")),
            )
            .arg(flag(
                "disable-render-loop",
                None,
                DEBUG,
                "Disable render loop so rendering only occurs when called explicitly from script.",
            ))
            .arg(flag(
                "disable-crash-handler",
                None,
                DEBUG,
                "Disable crash handler when supported by the platform code.",
            ))
            .arg(
                value(
                    "fixed-fps",
                    DEBUG,
                    "fps",
                    "Force a fixed number of frames per second. This setting disables real-time synchronization.",
                )
                .value_parser(|text: &str| parse_number::<i32>(text, "fixed fps")),
            )
            .arg(flag("print-fps", None, DEBUG, "Print the frames per second to the stdout."))
            .arg(flag("skip-breakpoints", None, DEBUG, "Start with breakpoints disabled."))
            // Standalone tools.
            .args(tool_args())
            .arg(
                value(
                    "gen-reflection",
                    TOOLS,
                    "path",
                    "Write a JSON description of registered classes and servers to <path>.",
                )
                .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                Arg::new(MAIN_ARGS)
                    .action(ArgAction::Append)
                    .num_args(0..)
                    .last(true)
                    .allow_hyphen_values(true)
                    .hide(true),
            )
    }

    fn apply(&self, args: &[String], config: &mut BootConfig) -> Result<(), BootError> {
        let command = self.command();
        let split = split_args(&command, args, &FORWARDED, &["help", "version"]);
        match split.stopped_at.as_deref() {
            Some("help") => return Err(BootError::HelpRequested),
            Some("version") => return Err(BootError::VersionRequested),
            _ => {}
        }
        if let Some(id) = &split.missing {
            return Err(BootError::Config(format!("Missing {}, aborting.", missing_operand(id))));
        }

        let mut forwarded = Vec::new();
        for token in split.rest {
            match token {
                Rest::Tool(token) => forwarded.push(token),
                Rest::Free(token) if token.ends_with(PROJECT_FILE) => {
                    let dir = Path::new(&token)
                        .parent()
                        .filter(|p| !p.as_os_str().is_empty())
                        .unwrap_or_else(|| Path::new("."));
                    config.project_path = dir.to_path_buf();
                    config.editor = true;
                }
                Rest::Free(token) => {
                    if !token.starts_with('-') && is_scene_path(&token) && config.main_scene.is_none() {
                        config.main_scene = Some(token.clone());
                    }
                    forwarded.push(token);
                }
            }
        }

        let mut argv = split.known;
        argv.push("--".to_string());
        argv.extend(forwarded);
        let matches = command.try_get_matches_from(argv).map_err(clap_error)?;
        apply_matches(&matches, config)?;

        if config.editor && config.render_thread_mode != RenderThreadMode::Safe {
            tracing::debug!(
                requested = ?config.render_thread_mode,
                "editor forces the safe render thread mode"
            );
        }
        config.apply_tool_defaults();
        Ok(())
    }
}

fn apply_matches(m: &ArgMatches, config: &mut BootConfig) -> Result<(), BootError> {
    match last_given(m, &["verbose", "quiet"]) {
        Some("verbose") => config.log.verbosity = Verbosity::Verbose,
        Some(_) => config.log.verbosity = Verbosity::Quiet,
        None => {}
    }

    for (id, field) in [
        ("editor", &mut config.editor),
        ("project-manager", &mut config.project_manager),
        ("quit", &mut config.auto_quit),
        ("upwards", &mut config.upwards),
        ("fullscreen", &mut config.window.fullscreen),
        ("maximized", &mut config.window.maximized),
        ("windowed", &mut config.window.windowed),
        ("always-on-top", &mut config.window.always_on_top),
        ("low-dpi", &mut config.low_dpi),
        ("no-window", &mut config.no_window),
        ("profiling", &mut config.profiling),
        ("debug-collisions", &mut config.debug_collisions),
        ("debug-navigation", &mut config.debug_navigation),
        ("disable-render-loop", &mut config.disable_render_loop),
        ("disable-crash-handler", &mut config.disable_crash_handler),
        ("print-fps", &mut config.print_fps),
        ("skip-breakpoints", &mut config.skip_breakpoints),
    ] {
        if m.get_flag(id) {
            *field = true;
        }
    }
    if EDITOR_TOOLS.iter().any(|id| given(m, id).is_some()) {
        config.editor = true;
    }

    if let Some(locale) = m.get_one::<String>("language") {
        config.locale = Some(locale.clone());
    }
    if let Some(path) = m.get_one::<PathBuf>("path") {
        config.project_path = path.clone();
    }
    if let Some(pack) = m.get_one::<PathBuf>("main-pack") {
        config.main_pack = Some(pack.clone());
    }
    if let Some(mode) = m.get_one::<RenderThreadMode>("render-thread") {
        config.render_thread_mode = *mode;
        config.render_thread_forced = true;
    }
    if let Some(address) = m.get_one::<String>("remote-fs") {
        config.remote_fs = Some(address.clone());
    }
    if let Some(password) = m.get_one::<String>("remote-fs-password") {
        config.remote_fs_password = password.clone();
    }
    if let Some(name) = m.get_one::<String>("audio-driver") {
        config.audio_driver = Some(name.clone());
    }
    if let Some(name) = m.get_one::<String>("video-driver") {
        config.video_driver = Some(name.clone());
    }

    if let Some(&(w, h)) = m.get_one::<(u32, u32)>("resolution") {
        config.width = w;
        config.height = h;
        config.custom_resolution = true;
    }
    if let Some(&position) = m.get_one::<(i32, i32)>("position") {
        config.init_custom_pos = position;
        config.init_use_custom_pos = true;
    }

    match (m.get_flag("enable-vsync-via-compositor"), m.get_flag("disable-vsync-via-compositor")) {
        (true, true) => {
            return Err(BootError::Config(
                "Can't use --enable-vsync-via-compositor and --disable-vsync-via-compositor \
                 together, aborting."
                    .to_string(),
            ))
        }
        (true, false) => config.vsync_via_compositor = Override::Enabled,
        (false, true) => config.vsync_via_compositor = Override::Disabled,
        (false, false) => {}
    }
    match last_given(m, &["enable-delta-smoothing", "disable-delta-smoothing"]) {
        Some("enable-delta-smoothing") => config.delta_smoothing_override = Override::Enabled,
        Some(_) => config.delta_smoothing_override = Override::Disabled,
        None => {}
    }

    match last_given(m, &["debug", "remote-debug"]) {
        Some("debug") => config.debug_mode = DebugMode::Local,
        Some(_) => {
            if let Some(mode) = m.get_one::<DebugMode>("remote-debug") {
                config.debug_mode = mode.clone();
            }
        }
        None => {}
    }
    if let Some(breakpoints) = m.get_one::<Vec<Breakpoint>>("breakpoints") {
        config.breakpoints = breakpoints.clone();
    }
    if let Some(&delay) = m.get_one::<u32>("frame-delay") {
        config.frame_delay_ms = delay;
    }
    if let Some(&scale) = m.get_one::<f64>("time-scale") {
        config.time_scale = scale.max(0.0);
    }
    if let Some(&fps) = m.get_one::<i32>("fixed-fps") {
        config.fixed_fps = if fps > 0 { fps } else { -1 };
    }
    if let Some(path) = m.get_one::<PathBuf>("gen-reflection") {
        config.gen_reflection = Some(path.clone());
    }

    if let Some(rest) = m.get_many::<String>(MAIN_ARGS) {
        config.main_args.extend(rest.cloned());
    }

    if config.editor && config.project_manager {
        return Err(BootError::Config(
            "Can't use --editor and --project-manager together, aborting.".to_string(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Argument definitions
// ---------------------------------------------------------------------------

fn flag(id: &'static str, short: Option<char>, heading: &'static str, help: &'static str) -> Arg {
    let arg = Arg::new(id)
        .long(id)
        .action(ArgAction::SetTrue)
        .help_heading(heading)
        .help(help);
    match short {
        Some(short) => arg.short(short),
        None => arg,
    }
}

/// A flag taking exactly one operand. Operands may start with `-`
/// (`--position -40,8`).
fn value(id: &'static str, heading: &'static str, name: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .action(ArgAction::Set)
        .num_args(1)
        .allow_hyphen_values(true)
        .value_name(name)
        .help_heading(heading)
        .help(help)
}

/// Flags shared with [`StartRequest::parse`].
fn tool_args() -> Vec<Arg> {
    vec![
        value("script", TOOLS, "script", "Run a script.").short('s'),
        flag("check-only", None, TOOLS, "Only parse for errors and quit (use with --script)."),
        value(
            "export",
            TOOLS,
            "preset",
            "Export the project using the given preset and matching release template.",
        ),
        value(
            "export-debug",
            TOOLS,
            "preset",
            "Same as --export, but using the debug template.",
        ),
        value(
            "export-pack",
            TOOLS,
            "preset",
            "Same as --export, but only export the game pack for the given preset.",
        ),
        Arg::new("doctool")
            .long("doctool")
            .action(ArgAction::Set)
            .num_args(0..=1)
            .default_missing_value(".")
            .value_name("path")
            .help_heading(TOOLS)
            .help("Dump the engine API reference to the given <path> in XML format."),
        flag("no-docbase", None, TOOLS, "Disallow dumping the base types (used with --doctool)."),
        flag(
            "build-solutions",
            None,
            TOOLS,
            "Build the scripting solutions (e.g. for C# projects).",
        ),
        flag(
            "gdnative-generate-json-api",
            None,
            TOOLS,
            "Generate JSON dump of the engine API for GDNative bindings.",
        ),
        value("test", TOOLS, "test", "Run a unit test."),
    ]
}

fn missing_operand(id: &str) -> &'static str {
    match id {
        "language" => "language argument",
        "path" => "relative or absolute path",
        "main-pack" => "path to main pack file",
        "render-thread" => "render thread mode argument",
        "remote-fs" => "remote filesystem address",
        "remote-fs-password" => "remote filesystem password",
        "audio-driver" => "audio driver argument",
        "video-driver" => "video driver argument",
        "resolution" => "resolution argument",
        "position" => "position argument",
        "breakpoints" => "list of breakpoints",
        "remote-debug" => "remote debug host address",
        "frame-delay" => "frame delay argument",
        "time-scale" => "time scale argument",
        "fixed-fps" => "fixed-fps argument",
        "gen-reflection" => "reflection output path",
        "script" => "script argument",
        "test" => "test name",
        "export" | "export-debug" | "export-pack" => "export preset name",
        _ => "argument",
    }
}

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

/// A token `clap` does not parse for the bootstrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rest {
    /// A forwarded tool flag or its operand.
    Tool(String),
    /// Anything `command` does not declare.
    Free(String),
}

#[derive(Debug, Default)]
struct Split {
    /// Declared flags with their operands, ready for `clap`.
    known: Vec<String>,
    rest: Vec<Rest>,
    /// Id of a flag whose operand is missing. Splitting stops there.
    missing: Option<String>,
    /// Id of the stop flag that ended splitting early.
    stopped_at: Option<String>,
}

/// Sort `args` into tokens `command` declares and tokens it does not.
///
/// Only exact flag spellings are recognised. Flags named in `forward` are
/// also copied to `rest`, operand included.
fn split_args(command: &Command, args: &[String], forward: &[&str], stop: &[&str]) -> Split {
    let mut split = Split::default();
    let mut tokens = args.iter().peekable();

    while let Some(token) = tokens.next() {
        let spelled = if token == "/?" { "--help" } else { token.as_str() };
        let Some(arg) = find_arg(command, spelled) else {
            split.rest.push(Rest::Free(token.clone()));
            continue;
        };
        let id = arg.get_id().as_str();
        if stop.contains(&id) {
            split.stopped_at = Some(id.to_string());
            break;
        }

        let optional = arg.get_num_args().is_some_and(|range| range.min_values() == 0);
        let operand = if optional {
            tokens.next_if(|next| !next.starts_with('-'))
        } else if arg.get_action().takes_values() {
            match tokens.next() {
                Some(operand) => Some(operand),
                None => {
                    split.missing = Some(id.to_string());
                    break;
                }
            }
        } else {
            None
        };

        split.known.push(spelled.to_string());
        split.known.extend(operand.cloned());
        if forward.contains(&id) {
            split.rest.push(Rest::Tool(token.clone()));
            split.rest.extend(operand.cloned().map(Rest::Tool));
        }
    }
    split
}

fn find_arg<'c>(command: &'c Command, token: &str) -> Option<&'c Arg> {
    if let Some(long) = token.strip_prefix("--") {
        return command.get_arguments().find(|a| a.get_long() == Some(long));
    }
    let mut chars = token.strip_prefix('-')?.chars();
    let (Some(short), None) = (chars.next(), chars.next()) else {
        return None;
    };
    command.get_arguments().find(|a| a.get_short() == Some(short))
}

/// Command-line index of `id`, if it was given.
fn given(m: &ArgMatches, id: &str) -> Option<usize> {
    if m.value_source(id) != Some(ValueSource::CommandLine) {
        return None;
    }
    m.index_of(id)
}

/// Of `ids`, the one given last on the command line.
fn last_given<'a>(m: &ArgMatches, ids: &[&'a str]) -> Option<&'a str> {
    ids.iter()
        .filter_map(|id| given(m, id).map(|index| (index, *id)))
        .max()
        .map(|(_, id)| id)
}

/// Value-parser failures carry the message to show; anything else is
/// rendered by `clap`.
fn clap_error(err: clap::Error) -> BootError {
    let message = match err.source() {
        Some(source) => source.to_string(),
        None => err.render().to_string().trim_end().to_string(),
    };
    BootError::Config(message)
}

// ---------------------------------------------------------------------------
// Value parsers
// ---------------------------------------------------------------------------

fn quoted(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("'{n}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn check_driver(kind: &str, name: &str, available: &[String]) -> Result<String, String> {
    if available.iter().any(|d| d == name) {
        return Ok(name.to_string());
    }
    Err(format!(
        "Unknown {kind} driver '{name}', aborting.\nValid options are {}.",
        enumerate(available)
    ))
}

/// `'a'`, `'a' and 'b'`, `'a', 'b' and 'c'`.
fn enumerate(names: &[String]) -> String {
    match names {
        [] => "none".to_string(),
        [only] => format!("'{only}'"),
        [init @ .., last] => format!("{} and '{last}'", quoted(init)),
    }
}

fn parse_render_thread(mode: &str) -> Result<RenderThreadMode, String> {
    RenderThreadMode::from_arg(mode).ok_or_else(|| {
        format!(
            "Invalid render thread mode '{mode}', aborting.\n\
             Valid options are 'unsafe', 'safe' and 'separate'."
        )
    })
}

fn parse_resolution(text: &str) -> Result<(u32, u32), String> {
    let malformed = || format!("Invalid resolution '{text}', it should be e.g. '1280x720'.");
    let (w, h) = text.split_once('x').ok_or_else(malformed)?;
    let w = w.trim().parse::<i64>().map_err(|_| malformed())?;
    let h = h.trim().parse::<i64>().map_err(|_| malformed())?;
    if w <= 0 || h <= 0 || w > i64::from(u32::MAX) || h > i64::from(u32::MAX) {
        return Err(format!(
            "Invalid resolution '{text}', width and height must be above 0."
        ));
    }
    Ok((w as u32, h as u32))
}

fn parse_position(text: &str) -> Result<(i32, i32), String> {
    let invalid = || format!("Invalid position '{text}', it should be e.g. '80,128'.");
    let (x, y) = text.split_once(',').ok_or_else(invalid)?;
    let x = x.trim().parse::<i32>().map_err(|_| invalid())?;
    let y = y.trim().parse::<i32>().map_err(|_| invalid())?;
    Ok((x, y))
}

fn parse_remote_debug(text: &str) -> Result<DebugMode, String> {
    let invalid =
        || "Invalid debug host address, it should be of the form <host/IP>:<port>.".to_string();
    let (host, port) = text.rsplit_once(':').ok_or_else(invalid)?;
    let port = if port.is_empty() {
        DEFAULT_REMOTE_DEBUG_PORT
    } else {
        port.parse::<u16>().map_err(|_| invalid())?
    };
    Ok(DebugMode::Remote {
        host: host.to_string(),
        port,
    })
}

/// Split `a.gd:10,b%20c.gd:3` into breakpoints. Malformed entries are logged
/// and dropped.
fn parse_breakpoints(list: &str) -> Result<Vec<Breakpoint>, String> {
    Ok(list
        .split(',')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = entry.replace("%20", " ");
            let parsed = entry
                .rsplit_once(':')
                .and_then(|(source, line)| Some((source, line.parse::<u32>().ok()?)));
            match parsed {
                Some((source, line)) if !source.is_empty() => Some(Breakpoint {
                    source: source.to_string(),
                    line,
                }),
                _ => {
                    tracing::error!("Invalid breakpoint: '{entry}', expected file:line format.");
                    None
                }
            }
        })
        .collect())
}

fn parse_number<T: std::str::FromStr>(text: &str, what: &str) -> Result<T, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("Invalid {what} '{text}', aborting."))
}

fn is_scene_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SCENE_EXTENSIONS.contains(&e))
}

// ---------------------------------------------------------------------------
// StartRequest
// ---------------------------------------------------------------------------

/// Export flavour selected by `--export*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Release,
    Debug,
    PackOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub preset: String,
    pub path: String,
    pub kind: ExportKind,
}

/// A standalone tool that runs in place of the main loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequest {
    DocTool { path: String, include_base: bool },
    Export(ExportRequest),
    BuildSolutions,
    GenerateJsonApi,
    Test(String),
}

/// What `start` reads back out of [`BootConfig::main_args`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    pub editor: bool,
    pub check_only: bool,
    pub script: Option<String>,
    /// First bare positional argument: scene to run, or export destination.
    pub game_path: Option<String>,
    pub tool: Option<ToolRequest>,
}

impl StartRequest {
    fn command() -> Command {
        Command::new("start")
            .no_binary_name(true)
            .disable_help_flag(true)
            .disable_version_flag(true)
            .args_override_self(true)
            .arg(flag("editor", Some('e'), RUN, "Editor mode."))
            .args(tool_args())
    }

    /// Flags with a missing operand are ignored; unknown flags are skipped.
    pub fn parse(main_args: &[String]) -> Result<Self, BootError> {
        let command = Self::command();
        let split = split_args(&command, main_args, &[], &[]);
        let m = command
            .try_get_matches_from(split.known)
            .map_err(|e| BootError::Start(e.render().to_string().trim_end().to_string()))?;

        let mut request = StartRequest {
            editor: m.get_flag("editor"),
            check_only: m.get_flag("check-only"),
            script: m.get_one::<String>("script").cloned(),
            game_path: split.rest.into_iter().find_map(|token| match token {
                Rest::Free(token) if !token.is_empty() && !token.starts_with('-') => Some(token),
                _ => None,
            }),
            tool: None,
        };

        let export = last_given(&m, &["export", "export-debug", "export-pack"]);
        if let Some(id) = export {
            let kind = match id {
                "export" => ExportKind::Release,
                "export-debug" => ExportKind::Debug,
                _ => ExportKind::PackOnly,
            };
            let preset = m.get_one::<String>(id).cloned().unwrap_or_default();
            request.editor = true;
            let path = request.game_path.clone().ok_or_else(|| {
                BootError::Start(
                    "Command line includes export parameter option, but no destination path was given."
                        .to_string(),
                )
            })?;
            request.tool = Some(ToolRequest::Export(ExportRequest { preset, path, kind }));
        } else if let Some(path) = m.get_one::<String>("doctool") {
            request.tool = Some(ToolRequest::DocTool {
                path: path.clone(),
                include_base: !m.get_flag("no-docbase"),
            });
        } else if let Some(name) = m.get_one::<String>("test") {
            request.tool = Some(ToolRequest::Test(name.clone()));
        } else if m.get_flag("build-solutions") {
            request.tool = Some(ToolRequest::BuildSolutions);
        } else if m.get_flag("gdnative-generate-json-api") {
            request.tool = Some(ToolRequest::GenerateJsonApi);
        }

        Ok(request)
    }
}
