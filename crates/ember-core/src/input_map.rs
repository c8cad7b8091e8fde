//! Named input actions.
//!
//! The editor and project manager use the built-in `ui_*` actions
//! ([`InputMap::load_default`]); a game loads its actions from the `input/`
//! section of the project settings ([`InputMap::load_from_settings`]).

use serde::{Deserialize, Serialize};

use crate::settings::ProjectSettings;

const INPUT_PREFIX: &str = "input/";

/// One bound input event, kept opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Device kind, e.g. `key`, `mouse_button`, `joypad_button`.
    pub kind: String,
    /// Device-specific code (scancode, button index).
    pub code: i64,
}

/// An action: a dead zone and the events that trigger it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAction {
    #[serde(default = "default_deadzone")]
    pub deadzone: f64,
    #[serde(default)]
    pub events: Vec<InputEvent>,
}

fn default_deadzone() -> f64 {
    0.5
}

/// Action name to binding, in registration order.
#[derive(Debug, Clone, Default)]
pub struct InputMap {
    actions: Vec<(String, InputAction)>,
}

impl InputMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in UI actions.
    pub fn load_default(&mut self) {
        const DEFAULTS: &[(&str, i64)] = &[
            ("ui_accept", 16777221),
            ("ui_select", 32),
            ("ui_cancel", 16777217),
            ("ui_focus_next", 16777218),
            ("ui_left", 16777231),
            ("ui_right", 16777233),
            ("ui_up", 16777232),
            ("ui_down", 16777234),
            ("ui_page_up", 16777235),
            ("ui_page_down", 16777236),
            ("ui_home", 16777229),
            ("ui_end", 16777230),
        ];
        for &(name, code) in DEFAULTS {
            self.add_action(
                name,
                InputAction {
                    deadzone: default_deadzone(),
                    events: vec![InputEvent {
                        kind: "key".to_string(),
                        code,
                    }],
                },
            );
        }
    }

    /// Register every `input/<action>` setting. Malformed entries are logged
    /// and skipped.
    pub fn load_from_settings(&mut self, settings: &ProjectSettings) {
        for (key, value) in settings.with_prefix(INPUT_PREFIX) {
            let name = &key[INPUT_PREFIX.len()..];
            match serde_json::from_value::<InputAction>(value.clone()) {
                Ok(action) => self.add_action(name, action),
                Err(e) => tracing::warn!(action = name, error = %e, "ignoring malformed input action"),
            }
        }
    }

    /// Add or replace an action. Replacing keeps the original position.
    pub fn add_action(&mut self, name: &str, action: InputAction) {
        match self.actions.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = action,
            None => self.actions.push((name.to_string(), action)),
        }
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.action(name).is_some()
    }

    pub fn action(&self, name: &str) -> Option<&InputAction> {
        self.actions.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    /// Action names in registration order.
    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.iter().map(|(n, _)| n.as_str())
    }
}
