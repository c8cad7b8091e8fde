//! Project settings.
//!
//! Settings live in a `project.godot` file at the root of the project
//! directory: a JSON object mapping setting paths (`section/group/name`) to
//! values. Insertion order is preserved so a saved file diffs cleanly.
//!
//! Alternatively a main pack (`--main-pack`) supplies the settings: a JSON
//! document with a `settings` object and a `files` object (the latter is read
//! by [`PackedData`](crate::packed_data::PackedData)).
//!
//! Settings may only be written during `setup` and `setup2`. The bootstrapper
//! calls [`ProjectSettings::freeze`] at the end of `setup2`; later writes fail
//! with [`CoreError::SettingsFrozen`].

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::CoreError;

/// Name of the project descriptor file.
pub const PROJECT_FILE: &str = "project.godot";

const RES_PREFIX: &str = "res://";
const USER_PREFIX: &str = "user://";
const AUTOLOAD_PREFIX: &str = "autoload/";

/// One entry of the autoload list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoloadEntry {
    /// Node name (the part after `autoload/`).
    pub name: String,
    /// Resource path of the scene or script.
    pub path: String,
    /// `true` when the value was prefixed with `*`: the node is also exposed
    /// to scripts as a global constant.
    pub singleton: bool,
}

/// Key/value project configuration with a resource root.
#[derive(Debug, Clone, Default)]
pub struct ProjectSettings {
    values: Map<String, Value>,
    resource_path: PathBuf,
    user_data_dir: PathBuf,
    frozen: bool,
}

impl ProjectSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the project from `path`, or from `main_pack` when given.
    ///
    /// With `upwards`, the ancestors of `path` are searched as well and the
    /// first directory containing [`PROJECT_FILE`] becomes the resource root.
    pub fn setup(
        &mut self,
        path: &Path,
        main_pack: Option<&Path>,
        upwards: bool,
    ) -> Result<(), CoreError> {
        if let Some(pack) = main_pack {
            let doc = read_json(pack)?;
            let settings = doc
                .get("settings")
                .and_then(Value::as_object)
                .cloned()
                .ok_or_else(|| CoreError::Parse {
                    path: pack.display().to_string(),
                    message: "pack has no 'settings' object".to_string(),
                })?;
            self.merge(settings);
            self.resource_path = pack
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();
            tracing::debug!(pack = %pack.display(), "loaded settings from main pack");
            return Ok(());
        }

        let mut dir = Some(path);
        while let Some(candidate) = dir {
            let file = candidate.join(PROJECT_FILE);
            if file.is_file() {
                let doc = read_json(&file)?;
                let settings = doc.as_object().cloned().ok_or_else(|| CoreError::Parse {
                    path: file.display().to_string(),
                    message: "expected a JSON object".to_string(),
                })?;
                self.merge(settings);
                self.resource_path = candidate.to_path_buf();
                tracing::debug!(project = %candidate.display(), "loaded project settings");
                return Ok(());
            }
            if !upwards {
                break;
            }
            dir = candidate.parent();
        }

        Err(CoreError::ProjectNotFound {
            path: path.display().to_string(),
        })
    }

    fn merge(&mut self, settings: Map<String, Value>) {
        for (key, value) in settings {
            self.values.insert(key, value);
        }
    }

    /// Write the current settings to `dir/project.godot`.
    pub fn save(&self, dir: &Path) -> Result<(), CoreError> {
        let file = dir.join(PROJECT_FILE);
        let text = serde_json::to_string_pretty(&self.values).map_err(|e| CoreError::Parse {
            path: file.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(&file, text).map_err(|e| CoreError::io(&file, e))
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Return the stored value, or record and return `default`.
    ///
    /// Once frozen the default is returned without being recorded.
    pub fn def(&mut self, key: &str, default: impl Into<Value>) -> Value {
        if let Some(value) = self.values.get(key) {
            return value.clone();
        }
        let default = default.into();
        if !self.frozen {
            self.values.insert(key.to_string(), default.clone());
        }
        default
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), CoreError> {
        if self.frozen {
            return Err(CoreError::SettingsFrozen(key.to_string()));
        }
        self.values.insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    /// All settings whose key starts with `prefix`, in insertion order.
    pub fn with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a Value)> {
        self.values
            .iter()
            .filter(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Make the settings read-only.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Autoload entries in declaration order. Non-string values are skipped.
    pub fn autoloads(&self) -> Vec<AutoloadEntry> {
        self.with_prefix(AUTOLOAD_PREFIX)
            .filter_map(|(key, value)| {
                let raw = value.as_str()?;
                let name = key[AUTOLOAD_PREFIX.len()..].to_string();
                let (path, singleton) = match raw.strip_prefix('*') {
                    Some(rest) => (rest.to_string(), true),
                    None => (raw.to_string(), false),
                };
                Some(AutoloadEntry {
                    name,
                    path,
                    singleton,
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    /// Directory holding the project file (the `res://` root).
    pub fn resource_path(&self) -> &Path {
        &self.resource_path
    }

    pub fn set_resource_path(&mut self, path: impl Into<PathBuf>) {
        self.resource_path = path.into();
    }

    /// Directory backing `user://`.
    pub fn user_data_dir(&self) -> &Path {
        &self.user_data_dir
    }

    pub fn set_user_data_dir(&mut self, path: impl Into<PathBuf>) {
        self.user_data_dir = path.into();
    }

    /// Turn a filesystem path inside the resource root into a `res://` path.
    /// Paths outside the root, and already-virtual paths, are returned as-is.
    pub fn localize_path(&self, path: &str) -> String {
        if path.starts_with(RES_PREFIX) || path.starts_with(USER_PREFIX) {
            return path.to_string();
        }
        let candidate = Path::new(path);
        let absolute = if candidate.is_relative() {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(candidate),
                Err(_) => return path.to_string(),
            }
        } else {
            candidate.to_path_buf()
        };
        match absolute.strip_prefix(&self.resource_path) {
            Ok(rel) if !self.resource_path.as_os_str().is_empty() => {
                let rel = rel.to_string_lossy().replace('\\', "/");
                format!("{RES_PREFIX}{rel}")
            }
            _ => path.to_string(),
        }
    }

    /// Turn a `res://` or `user://` path into a filesystem path.
    pub fn globalize_path(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix(RES_PREFIX) {
            self.resource_path.join(rest)
        } else if let Some(rest) = path.strip_prefix(USER_PREFIX) {
            self.user_data_dir.join(rest)
        } else {
            PathBuf::from(path)
        }
    }
}

fn read_json(path: &Path) -> Result<Value, CoreError> {
    let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| CoreError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
