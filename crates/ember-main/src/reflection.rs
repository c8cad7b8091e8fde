//! `--gen-reflection`: a JSON description of what this build registered.

use std::path::Path;

use ember_servers::plugins::PluginKind;
use serde::Serialize;

use crate::context::EngineContext;
use crate::error::BootError;

#[derive(Debug, Serialize)]
pub struct ClassEntry {
    pub name: String,
    pub base: Option<String>,
    /// Has a factory and can serve as the main loop type.
    pub instantiable: bool,
}

#[derive(Debug, Serialize)]
pub struct PluginEntry {
    pub name: String,
    pub kind: PluginKind,
}

#[derive(Debug, Serialize)]
pub struct Reflection {
    pub engine: String,
    pub version: String,
    pub classes: Vec<ClassEntry>,
    /// Server names in initialization order.
    pub servers: Vec<String>,
    pub script_languages: Vec<String>,
    pub resource_loaders: Vec<String>,
    pub plugins: Vec<PluginEntry>,
}

impl Reflection {
    pub fn collect(ctx: &EngineContext) -> Self {
        Self {
            engine: crate::ENGINE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            classes: ctx
                .classes
                .classes()
                .map(|c| ClassEntry {
                    name: c.name.clone(),
                    base: c.base.clone(),
                    instantiable: c.factory.is_some(),
                })
                .collect(),
            servers: ctx.registry.names().into_iter().map(str::to_string).collect(),
            script_languages: ctx.scripts.names().into_iter().map(str::to_string).collect(),
            resource_loaders: ctx.loaders.names().into_iter().map(str::to_string).collect(),
            plugins: ctx
                .plugins
                .loaded()
                .iter()
                .map(|(name, kind)| PluginEntry {
                    name: name.clone(),
                    kind: *kind,
                })
                .collect(),
        }
    }
}

/// Write the reflection of `ctx` to `path` as pretty JSON.
pub fn write_reflection(ctx: &EngineContext, path: &Path) -> Result<(), BootError> {
    let text = serde_json::to_string_pretty(&Reflection::collect(ctx)).map_err(|e| {
        BootError::Core(ember_core::CoreError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    })?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| BootError::io(dir, e))?;
    }
    std::fs::write(path, text).map_err(|e| BootError::io(path, e))
}
