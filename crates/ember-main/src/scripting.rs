//! Script languages and the script server.
//!
//! The engine ships one language, EmberScript (`.ems`), a directive format
//! used for `--script` runs and autoloads:
//!
//! ```text
//! # comment
//! extends SceneTree
//! quit_after 3
//! exit_code 0
//! ```
//!
//! Further languages are added with [`ScriptServer::register_language`].

use std::collections::BTreeMap;

use ember_core::CoreError;

use crate::error::BootError;

/// A loaded script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub path: String,
    /// Class named by `extends`.
    pub base_type: String,
    /// Request exit after this many idle frames.
    pub quit_after: Option<u64>,
    /// Exit code reported when the script ends the run.
    pub exit_code: i32,
}

pub trait ScriptLanguage {
    fn name(&self) -> &str;

    /// File extension without the dot.
    fn extension(&self) -> &str;

    fn init(&mut self) -> Result<(), BootError> {
        Ok(())
    }

    /// Expose an autoload singleton to scripts.
    fn add_global_constant(&mut self, name: &str, value: &str);

    /// Compile `source`, read from `path`.
    fn load(&self, source: &str, path: &str) -> Result<Script, BootError>;

    /// Per-frame hook, after the idle phase.
    fn frame(&mut self) {}

    fn profiling_start(&mut self) {}

    fn profiling_stop(&mut self) {}

    fn finish(&mut self) {}
}

// ---------------------------------------------------------------------------
// EmberScript
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct EmberScript {
    globals: BTreeMap<String, String>,
    frames: u64,
    profiling: bool,
}

impl EmberScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn globals(&self) -> &BTreeMap<String, String> {
        &self.globals
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling
    }
}

impl ScriptLanguage for EmberScript {
    fn name(&self) -> &str {
        "EmberScript"
    }

    fn extension(&self) -> &str {
        "ems"
    }

    fn add_global_constant(&mut self, name: &str, value: &str) {
        self.globals.insert(name.to_string(), value.to_string());
    }

    fn load(&self, source: &str, path: &str) -> Result<Script, BootError> {
        let parse_error = |line: usize, message: String| {
            BootError::Core(CoreError::Parse {
                path: path.to_string(),
                message: format!("line {}: {message}", line + 1),
            })
        };

        let mut base_type = None;
        let mut quit_after = None;
        let mut exit_code = 0;

        for (index, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (keyword, operand) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
            let operand = operand.trim();
            match keyword {
                "extends" if !operand.is_empty() => base_type = Some(operand.to_string()),
                "quit_after" => {
                    let frames = operand
                        .parse::<u64>()
                        .map_err(|_| parse_error(index, format!("invalid frame count '{operand}'")))?;
                    quit_after = Some(frames);
                }
                "exit_code" => {
                    exit_code = operand
                        .parse::<i32>()
                        .map_err(|_| parse_error(index, format!("invalid exit code '{operand}'")))?;
                }
                _ => return Err(parse_error(index, format!("unexpected '{line}'"))),
            }
        }

        Ok(Script {
            path: path.to_string(),
            base_type: base_type.unwrap_or_else(|| crate::main_loop::OBJECT_CLASS.to_string()),
            quit_after,
            exit_code,
        })
    }

    fn frame(&mut self) {
        self.frames += 1;
    }

    fn profiling_start(&mut self) {
        self.profiling = true;
    }

    fn profiling_stop(&mut self) {
        self.profiling = false;
    }
}

// ---------------------------------------------------------------------------
// ScriptServer
// ---------------------------------------------------------------------------

/// The registered script languages.
pub struct ScriptServer {
    languages: Vec<Box<dyn ScriptLanguage>>,
    initialized: bool,
}

impl ScriptServer {
    /// Server with EmberScript registered.
    pub fn new() -> Self {
        Self {
            languages: vec![Box::new(EmberScript::new())],
            initialized: false,
        }
    }

    pub fn register_language(&mut self, language: Box<dyn ScriptLanguage>) {
        tracing::debug!(language = language.name(), "script language registered");
        self.languages.push(language);
    }

    pub fn init_all(&mut self) -> Result<(), BootError> {
        for language in &mut self.languages {
            language.init()?;
        }
        self.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The language whose extension matches `path`.
    pub fn language_for(&self, path: &str) -> Option<&dyn ScriptLanguage> {
        let ext = extension(path)?;
        self.languages
            .iter()
            .find(|l| l.extension().eq_ignore_ascii_case(ext))
            .map(|l| l.as_ref())
    }

    pub fn is_script_path(&self, path: &str) -> bool {
        self.language_for(path).is_some()
    }

    /// Compile `source` with the language registered for `path`.
    pub fn load(&self, source: &str, path: &str) -> Result<Script, BootError> {
        let language = self
            .language_for(path)
            .ok_or_else(|| BootError::MissingResource(format!("No script language handles '{path}'")))?;
        language.load(source, path)
    }

    pub fn add_global_constant(&mut self, name: &str, value: &str) {
        for language in &mut self.languages {
            language.add_global_constant(name, value);
        }
    }

    pub fn frame_all(&mut self) {
        for language in &mut self.languages {
            language.frame();
        }
    }

    pub fn profiling_start(&mut self) {
        for language in &mut self.languages {
            language.profiling_start();
        }
    }

    pub fn profiling_stop(&mut self) {
        for language in &mut self.languages {
            language.profiling_stop();
        }
    }

    /// Finish every language. Repeated calls are no-ops.
    pub fn finish_all(&mut self) {
        if !self.initialized {
            return;
        }
        for language in self.languages.iter_mut().rev() {
            language.finish();
        }
        self.initialized = false;
    }

    pub fn names(&self) -> Vec<&str> {
        self.languages.iter().map(|l| l.name()).collect()
    }
}

impl Default for ScriptServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptServer")
            .field("languages", &self.names())
            .field("initialized", &self.initialized)
            .finish()
    }
}

pub(crate) fn extension(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next().unwrap_or(path);
    file.rsplit_once('.').map(|(_, ext)| ext)
}
