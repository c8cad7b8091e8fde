//! Virtual files supplied by pack sources.
//!
//! A pack is a JSON document whose `files` object maps `res://` paths to file
//! contents. Packs are registered in order; later packs shadow earlier ones.
//! Additional pack formats are contributed by plugins of kind `pack_source`
//! through the [`PackSource`] trait.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use crate::CoreError;

/// A provider of packed files.
pub trait PackSource: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Return the files in the pack at `path`, or `None` if this source does
    /// not understand the file.
    fn try_open(&self, path: &Path) -> Option<BTreeMap<String, String>>;
}

/// The built-in JSON pack format.
#[derive(Debug, Default)]
pub struct JsonPackSource;

impl PackSource for JsonPackSource {
    fn name(&self) -> &str {
        "json"
    }

    fn try_open(&self, path: &Path) -> Option<BTreeMap<String, String>> {
        let text = std::fs::read_to_string(path).ok()?;
        let doc: Value = serde_json::from_str(&text).ok()?;
        let files = doc.get("files")?.as_object()?;
        Some(
            files
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                .collect(),
        )
    }
}

/// Registry of pack sources and the files they provided.
pub struct PackedData {
    sources: Vec<Box<dyn PackSource>>,
    files: BTreeMap<String, String>,
    disabled: bool,
}

impl PackedData {
    /// Create with the built-in JSON source registered.
    pub fn new() -> Self {
        Self {
            sources: vec![Box::new(JsonPackSource)],
            files: BTreeMap::new(),
            disabled: false,
        }
    }

    pub fn add_pack_source(&mut self, source: Box<dyn PackSource>) {
        tracing::debug!(source = source.name(), "registered pack source");
        self.sources.push(source);
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Mount the pack at `path` using the first source that understands it.
    pub fn add_pack(&mut self, path: &Path) -> Result<usize, CoreError> {
        for source in self.sources.iter().rev() {
            if let Some(files) = source.try_open(path) {
                let count = files.len();
                self.files.extend(files);
                tracing::debug!(pack = %path.display(), source = source.name(), count, "mounted pack");
                return Ok(count);
            }
        }
        Err(CoreError::Parse {
            path: path.display().to_string(),
            message: "no pack source recognised the file".to_string(),
        })
    }

    /// Contents of a packed file, unless packed data is disabled.
    pub fn file(&self, res_path: &str) -> Option<&str> {
        if self.disabled {
            return None;
        }
        self.files.get(res_path).map(String::as_str)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }
}

impl Default for PackedData {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PackedData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedData")
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("files", &self.files.len())
            .field("disabled", &self.disabled)
            .finish()
    }
}
