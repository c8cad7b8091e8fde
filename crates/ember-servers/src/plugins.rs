//! Plugin discovery and routing.
//!
//! A plugin advertises exactly one capability kind. The [`PluginHost`] does
//! not interpret plugins itself; it hands each one to the [`PluginResolver`]
//! supplied for its kind (pack sources to the packed-data registry,
//! resource loaders to the resource loader list, modules to the class
//! registry).
//!
//! Plugins come from two places:
//!
//! 1. Manifests in `<exe_dir>/plugins/*.plugin.json`:
//!    `{ "name": "...", "kind": "pack_source" | "resource_loader" | "module" }`.
//! 2. In-process registration with an opaque capability object, via
//!    [`PluginHost::register`].

use std::any::Any;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ServerError;

const MANIFEST_SUFFIX: &str = ".plugin.json";

/// The capability a plugin provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    PackSource,
    ResourceLoader,
    Module,
}

/// On-disk plugin description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub kind: PluginKind,
    /// Free-form settings passed to the resolver.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A discovered or registered plugin.
pub struct Plugin {
    pub manifest: PluginManifest,
    /// Manifest file, for plugins discovered on disk.
    pub source: Option<PathBuf>,
    /// Opaque capability object, for in-process plugins.
    pub capability: Option<Box<dyn Any + Send>>,
}

impl Plugin {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn kind(&self) -> PluginKind {
        self.manifest.kind
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("manifest", &self.manifest)
            .field("source", &self.source)
            .field("capability", &self.capability.is_some())
            .finish()
    }
}

/// Accepts plugins of one kind.
pub trait PluginResolver {
    fn kind(&self) -> PluginKind;

    fn resolve(&mut self, plugin: Plugin) -> Result<(), ServerError>;
}

/// Collects plugins and dispatches them to resolvers.
#[derive(Debug, Default)]
pub struct PluginHost {
    pending: Vec<Plugin>,
    loaded: Vec<(String, PluginKind)>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform plugin directory: `plugins/` next to the executable.
    pub fn default_dir() -> Option<PathBuf> {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("plugins")))
    }

    /// Queue an in-process plugin.
    pub fn register(&mut self, manifest: PluginManifest, capability: Box<dyn Any + Send>) {
        self.pending.push(Plugin {
            manifest,
            source: None,
            capability: Some(capability),
        });
    }

    /// Queue every manifest in `dir`. A missing directory yields nothing;
    /// unreadable or malformed manifests are logged and skipped. Returns the
    /// number queued.
    pub fn discover(&mut self, dir: &Path) -> usize {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut manifests: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX))
            })
            .collect();
        manifests.sort();

        let mut queued = 0;
        for path in manifests {
            match read_manifest(&path) {
                Ok(manifest) => {
                    tracing::debug!(plugin = %manifest.name, kind = ?manifest.kind, "discovered plugin");
                    self.pending.push(Plugin {
                        manifest,
                        source: Some(path),
                        capability: None,
                    });
                    queued += 1;
                }
                Err(e) => tracing::warn!(error = %e, "skipping plugin manifest"),
            }
        }
        queued
    }

    /// Hand every queued plugin to the resolver for its kind.
    ///
    /// Plugins with no resolver, or whose resolver fails, are logged and
    /// dropped; the first such error is returned after all plugins were tried.
    pub fn dispatch(
        &mut self,
        resolvers: &mut [&mut dyn PluginResolver],
    ) -> Result<usize, ServerError> {
        let mut first_error = None;
        let mut dispatched = 0;

        for plugin in std::mem::take(&mut self.pending) {
            let name = plugin.name().to_string();
            let kind = plugin.kind();
            let result = match resolvers.iter_mut().find(|r| r.kind() == kind) {
                Some(resolver) => resolver.resolve(plugin),
                None => Err(ServerError::Plugin {
                    name: name.clone(),
                    reason: format!("no resolver for {kind:?}"),
                }),
            };
            match result {
                Ok(()) => {
                    self.loaded.push((name, kind));
                    dispatched += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "plugin rejected");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(dispatched),
        }
    }

    /// Names and kinds of successfully routed plugins.
    pub fn loaded(&self) -> &[(String, PluginKind)] {
        &self.loaded
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

fn read_manifest(path: &Path) -> Result<PluginManifest, ServerError> {
    let plugin_error = |reason: String| ServerError::Plugin {
        name: path.display().to_string(),
        reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| plugin_error(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| plugin_error(e.to_string()))
}
