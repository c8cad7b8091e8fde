//! Locale, translations and resource remaps.
//!
//! Translation files are JSON: `{ "locale": "fr", "messages": { "Hello": "Bonjour" } }`.
//! Lookup tries the full locale (`fr_CA`) first, then its language (`fr`).
//!
//! Resource remaps (`locale/translation_remaps`) swap a resource path for a
//! locale-specific one. Path remaps (`locale/path_remaps`) are unconditional.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::settings::ProjectSettings;
use crate::CoreError;

#[derive(Debug, Clone, Deserialize)]
struct TranslationFile {
    locale: String,
    #[serde(default)]
    messages: HashMap<String, String>,
}

/// Locale-aware message and resource lookup.
#[derive(Debug, Clone)]
pub struct TranslationServer {
    locale: String,
    translations: HashMap<String, HashMap<String, String>>,
    /// `path -> [(locale, replacement)]`
    resource_remaps: HashMap<String, Vec<(String, String)>>,
    path_remaps: HashMap<String, String>,
}

impl TranslationServer {
    pub fn new() -> Self {
        Self {
            locale: "en".to_string(),
            translations: HashMap::new(),
            resource_remaps: HashMap::new(),
            path_remaps: HashMap::new(),
        }
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn set_locale(&mut self, locale: &str) {
        self.locale = locale.replace('-', "_");
    }

    /// Load a translation file. Later files for the same locale extend earlier ones.
    pub fn load_translation(&mut self, path: &Path) -> Result<String, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::io(path, e))?;
        let file: TranslationFile = serde_json::from_str(&text).map_err(|e| CoreError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let locale = file.locale.replace('-', "_");
        self.translations
            .entry(locale.clone())
            .or_default()
            .extend(file.messages);
        Ok(locale)
    }

    pub fn add_message(&mut self, locale: &str, source: &str, translated: &str) {
        self.translations
            .entry(locale.to_string())
            .or_default()
            .insert(source.to_string(), translated.to_string());
    }

    /// Load `locale/translations`, `locale/translation_remaps` and
    /// `locale/path_remaps`. Unloadable translation files are logged and
    /// skipped.
    pub fn load_from_settings(&mut self, settings: &ProjectSettings) {
        if let Some(Value::Array(paths)) = settings.get("locale/translations") {
            for path in paths.iter().filter_map(Value::as_str) {
                let file = settings.globalize_path(path);
                if let Err(e) = self.load_translation(&file) {
                    tracing::warn!(path, error = %e, "failed to load translation");
                }
            }
        }

        if let Some(Value::Object(remaps)) = settings.get("locale/translation_remaps") {
            for (source, targets) in remaps {
                // Each target is "path:locale".
                let entries = targets
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str)
                    .filter_map(|t| {
                        let (path, locale) = t.rsplit_once(':')?;
                        Some((locale.replace('-', "_"), path.to_string()))
                    })
                    .collect();
                self.resource_remaps.insert(source.clone(), entries);
            }
        }

        if let Some(Value::Object(remaps)) = settings.get("locale/path_remaps") {
            for (from, to) in remaps {
                if let Some(to) = to.as_str() {
                    self.path_remaps.insert(from.clone(), to.to_string());
                }
            }
        }
    }

    /// Translate `message` into the current locale, or return it unchanged.
    pub fn translate<'a>(&'a self, message: &'a str) -> &'a str {
        for locale in self.locale_chain() {
            if let Some(t) = self.translations.get(locale).and_then(|m| m.get(message)) {
                return t;
            }
        }
        message
    }

    /// Apply path and locale remaps to a resource path.
    pub fn remap_path(&self, path: &str) -> String {
        let path = self.path_remaps.get(path).map(String::as_str).unwrap_or(path);
        if let Some(entries) = self.resource_remaps.get(path) {
            for locale in self.locale_chain() {
                if let Some((_, target)) = entries.iter().find(|(l, _)| l == locale) {
                    return target.clone();
                }
            }
        }
        path.to_string()
    }

    pub fn loaded_locales(&self) -> Vec<&str> {
        let mut locales: Vec<_> = self.translations.keys().map(String::as_str).collect();
        locales.sort_unstable();
        locales
    }

    fn locale_chain(&self) -> impl Iterator<Item = &str> {
        let full = self.locale.as_str();
        let lang = full.split('_').next().unwrap_or(full);
        std::iter::once(full).chain((lang != full).then_some(lang))
    }
}

impl Default for TranslationServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn translate_falls_back_to_language_then_source() {
        let mut ts = TranslationServer::new();
        ts.add_message("fr", "Hello", "Bonjour");
        ts.set_locale("fr-CA");
        assert_eq!(ts.locale(), "fr_CA");
        assert_eq!(ts.translate("Hello"), "Bonjour");
        assert_eq!(ts.translate("Bye"), "Bye");
    }

    #[test]
    fn loads_translations_and_remaps_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("de.json"),
            json!({ "locale": "de", "messages": { "Start": "Los" } }).to_string(),
        )
        .unwrap();

        let mut settings = ProjectSettings::new();
        settings.set_resource_path(dir.path());
        settings
            .set("locale/translations", json!(["res://de.json", "res://missing.json"]))
            .unwrap();
        settings
            .set(
                "locale/translation_remaps",
                json!({ "res://logo.png": ["res://logo_de.png:de"] }),
            )
            .unwrap();
        settings
            .set("locale/path_remaps", json!({ "res://old.tscn": "res://new.tscn" }))
            .unwrap();

        let mut ts = TranslationServer::new();
        ts.load_from_settings(&settings);
        ts.set_locale("de");

        assert_eq!(ts.loaded_locales(), vec!["de"]);
        assert_eq!(ts.translate("Start"), "Los");
        assert_eq!(ts.remap_path("res://logo.png"), "res://logo_de.png");
        assert_eq!(ts.remap_path("res://old.tscn"), "res://new.tscn");

        ts.set_locale("en");
        assert_eq!(ts.remap_path("res://logo.png"), "res://logo.png");
    }
}
