//! Resource loading and plugin resolution.
//!
//! Resources are read from the packed data first and from the project
//! directory second. Each registered [`ResourceLoader`] claims the
//! extensions it understands.
//!
//! The three plugin kinds are routed here:
//!
//! | Kind | Resolver | In-process capability | Manifest fallback |
//! |---|---|---|---|
//! | `pack_source` | [`PackSourceResolver`] | `Box<dyn PackSource>` | JSON packs with `config.extension` |
//! | `resource_loader` | [`ResourceLoaderResolver`] | `Box<dyn ResourceLoader>` | raw loader for `config.extensions` |
//! | `module` | [`ModuleResolver`] | `Box<dyn Module>` | classes listed in `config.classes` |

use std::collections::BTreeMap;
use std::path::Path;

use ember_core::packed_data::{JsonPackSource, PackSource, PackedData};
use ember_core::settings::ProjectSettings;
use ember_servers::plugins::{Plugin, PluginKind, PluginResolver};
use ember_servers::ServerError;

use crate::error::BootError;
use crate::main_loop::ClassRegistry;
use crate::scripting::extension;

/// What a resource contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Scene,
    Script,
    Image,
    Other,
}

/// A resource read into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub path: String,
    pub kind: ResourceKind,
    pub text: String,
}

pub trait ResourceLoader: Send {
    fn name(&self) -> &str;

    /// Extensions handled, lower case and without the dot.
    fn extensions(&self) -> Vec<String>;

    fn load(&self, path: &str, bytes: &[u8]) -> Result<Resource, BootError>;
}

// ---------------------------------------------------------------------------
// FileResourceLoader
// ---------------------------------------------------------------------------

const SCENE_EXTENSIONS: &[&str] = &["tscn", "scn", "escn"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "svg", "webp", "bmp"];
const DATA_EXTENSIONS: &[&str] = &["tres", "res", "json"];

/// The built-in loader for scenes, images, text resources and scripts.
#[derive(Debug, Clone)]
pub struct FileResourceLoader {
    script_extensions: Vec<String>,
}

impl FileResourceLoader {
    pub fn new(script_extensions: Vec<String>) -> Self {
        Self { script_extensions }
    }

    fn kind_of(&self, ext: &str) -> ResourceKind {
        if SCENE_EXTENSIONS.contains(&ext) {
            ResourceKind::Scene
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            ResourceKind::Image
        } else if self.script_extensions.iter().any(|e| e == ext) {
            ResourceKind::Script
        } else {
            ResourceKind::Other
        }
    }
}

impl ResourceLoader for FileResourceLoader {
    fn name(&self) -> &str {
        "file"
    }

    fn extensions(&self) -> Vec<String> {
        SCENE_EXTENSIONS
            .iter()
            .chain(IMAGE_EXTENSIONS)
            .chain(DATA_EXTENSIONS)
            .map(|e| e.to_string())
            .chain(self.script_extensions.iter().cloned())
            .collect()
    }

    fn load(&self, path: &str, bytes: &[u8]) -> Result<Resource, BootError> {
        let ext = extension(path).unwrap_or_default().to_ascii_lowercase();
        Ok(Resource {
            path: path.to_string(),
            kind: self.kind_of(&ext),
            text: String::from_utf8_lossy(bytes).into_owned(),
        })
    }
}

/// Loader declared by a plugin manifest: passes bytes through untouched.
#[derive(Debug, Clone)]
struct RawLoader {
    name: String,
    extensions: Vec<String>,
}

impl ResourceLoader for RawLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    fn load(&self, path: &str, bytes: &[u8]) -> Result<Resource, BootError> {
        Ok(Resource {
            path: path.to_string(),
            kind: ResourceKind::Other,
            text: String::from_utf8_lossy(bytes).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// ResourceLoaders
// ---------------------------------------------------------------------------

/// Ordered loader list. Loaders added later take precedence.
pub struct ResourceLoaders {
    loaders: Vec<Box<dyn ResourceLoader>>,
}

impl ResourceLoaders {
    pub fn new(script_extensions: Vec<String>) -> Self {
        Self {
            loaders: vec![Box::new(FileResourceLoader::new(script_extensions))],
        }
    }

    pub fn add(&mut self, loader: Box<dyn ResourceLoader>) {
        tracing::debug!(loader = loader.name(), "resource loader added");
        self.loaders.push(loader);
    }

    fn loader_for(&self, path: &str) -> Option<&dyn ResourceLoader> {
        let ext = extension(path)?.to_ascii_lowercase();
        self.loaders
            .iter()
            .rev()
            .find(|l| l.extensions().iter().any(|e| *e == ext))
            .map(|l| l.as_ref())
    }

    /// Whether `path` exists in the packs or on disk.
    pub fn exists(&self, path: &str, settings: &ProjectSettings, packs: &PackedData) -> bool {
        packs.file(path).is_some() || settings.globalize_path(path).is_file()
    }

    /// Read and decode `path`.
    pub fn load(
        &self,
        path: &str,
        settings: &ProjectSettings,
        packs: &PackedData,
    ) -> Result<Resource, BootError> {
        let loader = self
            .loader_for(path)
            .ok_or_else(|| BootError::MissingResource(format!("No loader recognizes '{path}'")))?;
        match packs.file(path) {
            Some(text) => loader.load(path, text.as_bytes()),
            None => {
                let file = settings.globalize_path(path);
                let bytes = std::fs::read(&file).map_err(|e| BootError::io(&file, e))?;
                loader.load(path, &bytes)
            }
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.loaders.iter().map(|l| l.name()).collect()
    }
}

impl std::fmt::Debug for ResourceLoaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

// ---------------------------------------------------------------------------
// Modules
// ---------------------------------------------------------------------------

/// A native module adding classes.
pub trait Module: Send {
    fn name(&self) -> &str;

    fn register_types(&mut self, classes: &mut ClassRegistry);
}

// ---------------------------------------------------------------------------
// Resolvers
// ---------------------------------------------------------------------------

/// JSON packs restricted to one file extension.
struct ExtensionPackSource {
    name: String,
    extension: Option<String>,
}

impl PackSource for ExtensionPackSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_open(&self, path: &Path) -> Option<BTreeMap<String, String>> {
        if let Some(wanted) = &self.extension {
            let ext = path.extension()?.to_str()?;
            if !ext.eq_ignore_ascii_case(wanted) {
                return None;
            }
        }
        JsonPackSource.try_open(path)
    }
}

pub struct PackSourceResolver<'a>(pub &'a mut PackedData);

impl PluginResolver for PackSourceResolver<'_> {
    fn kind(&self) -> PluginKind {
        PluginKind::PackSource
    }

    fn resolve(&mut self, plugin: Plugin) -> Result<(), ServerError> {
        let source: Box<dyn PackSource> = match plugin.capability {
            Some(capability) => *capability
                .downcast::<Box<dyn PackSource>>()
                .map_err(|_| plugin_error_named(&plugin.manifest.name, "capability is not a pack source"))?,
            None => Box::new(ExtensionPackSource {
                name: plugin.manifest.name.clone(),
                extension: plugin
                    .manifest
                    .config
                    .get("extension")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            }),
        };
        tracing::info!(plugin = %plugin.manifest.name, source = source.name(), "pack source plugin loaded");
        self.0.add_pack_source(source);
        Ok(())
    }
}

pub struct ResourceLoaderResolver<'a>(pub &'a mut ResourceLoaders);

impl PluginResolver for ResourceLoaderResolver<'_> {
    fn kind(&self) -> PluginKind {
        PluginKind::ResourceLoader
    }

    fn resolve(&mut self, plugin: Plugin) -> Result<(), ServerError> {
        let loader: Box<dyn ResourceLoader> = match plugin.capability {
            Some(capability) => *capability
                .downcast::<Box<dyn ResourceLoader>>()
                .map_err(|_| plugin_error_named(&plugin.manifest.name, "capability is not a resource loader"))?,
            None => {
                let extensions: Vec<String> = plugin
                    .manifest
                    .config
                    .get("extensions")
                    .and_then(|v| v.as_array())
                    .map(|list| {
                        list.iter()
                            .filter_map(|e| e.as_str())
                            .map(str::to_ascii_lowercase)
                            .collect()
                    })
                    .unwrap_or_default();
                if extensions.is_empty() {
                    return Err(plugin_error_named(&plugin.manifest.name, "no extensions configured"));
                }
                Box::new(RawLoader {
                    name: plugin.manifest.name.clone(),
                    extensions,
                })
            }
        };
        self.0.add(loader);
        Ok(())
    }
}

pub struct ModuleResolver<'a>(pub &'a mut ClassRegistry);

impl PluginResolver for ModuleResolver<'_> {
    fn kind(&self) -> PluginKind {
        PluginKind::Module
    }

    fn resolve(&mut self, plugin: Plugin) -> Result<(), ServerError> {
        if let Some(capability) = plugin.capability {
            let mut module = *capability
                .downcast::<Box<dyn Module>>()
                .map_err(|_| plugin_error_named(&plugin.manifest.name, "capability is not a module"))?;
            module.register_types(self.0);
            tracing::info!(module = module.name(), "module registered");
            return Ok(());
        }

        let name = plugin.manifest.name.as_str();
        let classes = plugin
            .manifest
            .config
            .get("classes")
            .and_then(|v| v.as_array())
            .ok_or_else(|| plugin_error_named(name, "no classes configured"))?;
        for class in classes {
            let class_name = class
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| plugin_error_named(name, "class without a name"))?;
            let base = class.get("base").and_then(|v| v.as_str());
            self.0.register(class_name, base, None);
        }
        tracing::info!(plugin = name, classes = classes.len(), "module registered");
        Ok(())
    }
}

fn plugin_error_named(name: &str, reason: &str) -> ServerError {
    ServerError::Plugin {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
