//! Main loops and the class registry they are instantiated from.
//!
//! The frame driver talks to exactly one [`MainLoop`]. Which one is decided
//! by `start`:
//!
//! - [`SceneTreeLoop`], the default: a root with autoload children and the
//!   current scene.
//! - A script whose base type derives from `MainLoop` ([`ScriptedLoop`]).
//! - A custom class registered in the [`ClassRegistry`] with a factory and
//!   named by `application/run/main_loop_type`.
//!
//! [`MainLoopKind`] is the tagged union of the three.

use std::collections::BTreeMap;
use std::sync::Arc;

use ember_core::message_queue::MessageSender;
use serde::Serialize;

use crate::scripting::Script;

/// Root of the class hierarchy.
pub const OBJECT_CLASS: &str = "Object";
pub const MAIN_LOOP_CLASS: &str = "MainLoop";
pub const SCENE_TREE_CLASS: &str = "SceneTree";
pub const NODE_CLASS: &str = "Node";

// ---------------------------------------------------------------------------
// MainLoop
// ---------------------------------------------------------------------------

/// What the frame driver calls every iteration.
pub trait MainLoop {
    /// Called once, after `start` selected the loop and before the first
    /// iteration. `messages` posts deferred calls onto the engine queue.
    fn init(&mut self, _messages: MessageSender) {}

    /// One fixed physics step. Returns `true` to request exit.
    fn iteration(&mut self, delta: f64) -> bool;

    /// One idle (render-rate) step. Returns `true` to request exit.
    fn idle(&mut self, delta: f64) -> bool;

    /// Called once when the engine shuts down.
    fn finish(&mut self) {}

    /// Run one pass of pending canvas item updates. Returns `true` while
    /// another pass is needed.
    fn update_pending_canvas_items(&mut self) -> bool {
        false
    }

    /// Process exit code requested by the loop, if any.
    fn exit_code(&self) -> Option<i32> {
        None
    }
}

// ---------------------------------------------------------------------------
// SceneTreeLoop
// ---------------------------------------------------------------------------

/// Viewport stretch settings applied to the root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StretchSettings {
    /// `disabled`, `2d` or `viewport`.
    pub mode: String,
    /// `ignore`, `keep`, `keep_width`, `keep_height` or `expand`.
    pub aspect: String,
    pub shrink: f64,
    pub size: (u32, u32),
}

impl Default for StretchSettings {
    fn default() -> Self {
        Self {
            mode: "disabled".to_string(),
            aspect: "ignore".to_string(),
            shrink: 1.0,
            size: (1024, 600),
        }
    }
}

/// A node under the scene tree root.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub name: String,
    /// Resource the node was instanced from.
    pub source: String,
    /// Script driving the node, if it was loaded from one.
    pub script: Option<Script>,
}

/// The default main loop.
#[derive(Debug, Clone)]
pub struct SceneTreeLoop {
    pub stretch: StretchSettings,
    pub auto_accept_quit: bool,
    pub quit_on_go_back: bool,
    pub shadow_atlas_size: u32,
    pub shadow_atlas_quadrants: [u32; 4],
    pub use_font_oversampling: bool,
    pub debug_collisions: bool,
    pub debug_navigation: bool,
    /// Autoloads and other root children, in insertion order.
    pub root_children: Vec<SceneNode>,
    pub current_scene: Option<SceneNode>,
    pending_canvas_passes: u32,
    idle_frames: u64,
    physics_frames: u64,
    quit_requested: bool,
    exit_code: Option<i32>,
    messages: Option<MessageSender>,
}

impl SceneTreeLoop {
    pub fn new() -> Self {
        Self {
            stretch: StretchSettings::default(),
            auto_accept_quit: true,
            quit_on_go_back: true,
            shadow_atlas_size: 4096,
            shadow_atlas_quadrants: [1, 2, 3, 4],
            use_font_oversampling: true,
            debug_collisions: false,
            debug_navigation: false,
            root_children: Vec::new(),
            current_scene: None,
            pending_canvas_passes: 0,
            idle_frames: 0,
            physics_frames: 0,
            quit_requested: false,
            exit_code: None,
            messages: None,
        }
    }

    pub fn add_root_child(&mut self, node: SceneNode) {
        tracing::debug!(node = %node.name, source = %node.source, "added to scene tree root");
        self.root_children.push(node);
        self.queue_canvas_update();
    }

    pub fn set_current_scene(&mut self, node: SceneNode) {
        tracing::debug!(scene = %node.source, "current scene set");
        self.current_scene = Some(node);
        self.queue_canvas_update();
    }

    /// Ask the tree to exit at the end of the current step.
    pub fn quit(&mut self, exit_code: Option<i32>) {
        self.quit_requested = true;
        if exit_code.is_some() {
            self.exit_code = exit_code;
        }
    }

    pub fn idle_frames(&self) -> u64 {
        self.idle_frames
    }

    pub fn physics_frames(&self) -> u64 {
        self.physics_frames
    }

    fn queue_canvas_update(&mut self) {
        self.pending_canvas_passes += 1;
    }

    fn nodes(&self) -> impl Iterator<Item = &SceneNode> {
        self.root_children.iter().chain(self.current_scene.as_ref())
    }

    /// Nodes whose scripts asked to quit after `frames` idle frames.
    fn scripted_quit(&self) -> Option<i32> {
        self.nodes()
            .filter_map(|n| n.script.as_ref())
            .find(|s| s.quit_after.is_some_and(|after| self.idle_frames >= after))
            .map(|s| s.exit_code)
    }
}

impl Default for SceneTreeLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl MainLoop for SceneTreeLoop {
    fn init(&mut self, messages: MessageSender) {
        self.messages = Some(messages);
        self.queue_canvas_update();
    }

    fn iteration(&mut self, _delta: f64) -> bool {
        self.physics_frames += 1;
        self.quit_requested
    }

    fn idle(&mut self, _delta: f64) -> bool {
        self.idle_frames += 1;
        if let Some(code) = self.scripted_quit() {
            self.quit(Some(code));
        }
        self.quit_requested
    }

    fn finish(&mut self) {
        if let Some(scene) = self.current_scene.take() {
            tracing::debug!(scene = %scene.source, "freeing current scene");
        }
        self.root_children.clear();
        self.messages = None;
    }

    fn update_pending_canvas_items(&mut self) -> bool {
        if self.pending_canvas_passes > 0 {
            self.pending_canvas_passes -= 1;
        }
        self.pending_canvas_passes > 0
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }
}

// ---------------------------------------------------------------------------
// ScriptedLoop
// ---------------------------------------------------------------------------

/// A main loop provided by a script (`--script`).
///
/// Scripts extending `SceneTree` get a full tree; plain `MainLoop` scripts
/// only count frames.
#[derive(Debug, Clone)]
pub struct ScriptedLoop {
    pub script: Script,
    pub tree: Option<SceneTreeLoop>,
    frames: u64,
}

impl ScriptedLoop {
    pub fn new(script: Script, with_tree: bool) -> Self {
        Self {
            script,
            tree: with_tree.then(SceneTreeLoop::new),
            frames: 0,
        }
    }
}

impl MainLoop for ScriptedLoop {
    fn init(&mut self, messages: MessageSender) {
        if let Some(tree) = &mut self.tree {
            tree.init(messages);
        }
    }

    fn iteration(&mut self, delta: f64) -> bool {
        self.tree.as_mut().is_some_and(|t| t.iteration(delta))
    }

    fn idle(&mut self, delta: f64) -> bool {
        self.frames += 1;
        let tree_exit = self.tree.as_mut().is_some_and(|t| t.idle(delta));
        let script_exit = self.script.quit_after.is_some_and(|after| self.frames >= after);
        tree_exit || script_exit
    }

    fn finish(&mut self) {
        if let Some(tree) = &mut self.tree {
            tree.finish();
        }
    }

    fn update_pending_canvas_items(&mut self) -> bool {
        self.tree
            .as_mut()
            .is_some_and(|t| t.update_pending_canvas_items())
    }

    fn exit_code(&self) -> Option<i32> {
        self.tree
            .as_ref()
            .and_then(|t| t.exit_code())
            .or(Some(self.script.exit_code))
    }
}

// ---------------------------------------------------------------------------
// MainLoopKind
// ---------------------------------------------------------------------------

/// The selected main loop.
pub enum MainLoopKind {
    SceneTree(SceneTreeLoop),
    Script(ScriptedLoop),
    Custom {
        class_name: String,
        inner: Box<dyn MainLoop>,
    },
}

impl MainLoopKind {
    /// The scene tree, for configuration and scene loading.
    pub fn scene_tree_mut(&mut self) -> Option<&mut SceneTreeLoop> {
        match self {
            MainLoopKind::SceneTree(tree) => Some(tree),
            MainLoopKind::Script(scripted) => scripted.tree.as_mut(),
            MainLoopKind::Custom { .. } => None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            MainLoopKind::SceneTree(_) => SCENE_TREE_CLASS,
            MainLoopKind::Script(scripted) => &scripted.script.path,
            MainLoopKind::Custom { class_name, .. } => class_name,
        }
    }

    fn as_dyn(&mut self) -> &mut dyn MainLoop {
        match self {
            MainLoopKind::SceneTree(tree) => tree,
            MainLoopKind::Script(scripted) => scripted,
            MainLoopKind::Custom { inner, .. } => inner.as_mut(),
        }
    }
}

impl MainLoop for MainLoopKind {
    fn init(&mut self, messages: MessageSender) {
        self.as_dyn().init(messages);
    }

    fn iteration(&mut self, delta: f64) -> bool {
        self.as_dyn().iteration(delta)
    }

    fn idle(&mut self, delta: f64) -> bool {
        self.as_dyn().idle(delta)
    }

    fn finish(&mut self) {
        self.as_dyn().finish();
    }

    fn update_pending_canvas_items(&mut self) -> bool {
        self.as_dyn().update_pending_canvas_items()
    }

    fn exit_code(&self) -> Option<i32> {
        match self {
            MainLoopKind::SceneTree(tree) => tree.exit_code(),
            MainLoopKind::Script(scripted) => scripted.exit_code(),
            MainLoopKind::Custom { inner, .. } => inner.exit_code(),
        }
    }
}

impl std::fmt::Debug for MainLoopKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MainLoopKind::SceneTree(_) => f.write_str("SceneTree"),
            MainLoopKind::Script(scripted) => write!(f, "Script({})", scripted.script.path),
            MainLoopKind::Custom { class_name, .. } => write!(f, "Custom({class_name})"),
        }
    }
}

// ---------------------------------------------------------------------------
// ClassRegistry
// ---------------------------------------------------------------------------

/// Builds a fresh main loop instance.
pub type MainLoopFactory = Arc<dyn Fn() -> Box<dyn MainLoop>>;

/// A registered class.
#[derive(Clone, Serialize)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<String>,
    #[serde(skip)]
    pub factory: Option<MainLoopFactory>,
}

impl std::fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassInfo")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("instantiable", &self.factory.is_some())
            .finish()
    }
}

/// Named classes with single inheritance.
#[derive(Debug, Clone)]
pub struct ClassRegistry {
    classes: BTreeMap<String, ClassInfo>,
}

impl ClassRegistry {
    /// Registry holding the core classes.
    pub fn new() -> Self {
        let mut registry = Self {
            classes: BTreeMap::new(),
        };
        registry.register(OBJECT_CLASS, None, None);
        registry.register(MAIN_LOOP_CLASS, Some(OBJECT_CLASS), None);
        registry.register(SCENE_TREE_CLASS, Some(MAIN_LOOP_CLASS), None);
        registry.register(NODE_CLASS, Some(OBJECT_CLASS), None);
        registry.register("Resource", Some(OBJECT_CLASS), None);
        registry.register("PackedScene", Some("Resource"), None);
        registry.register("Script", Some("Resource"), None);
        registry
    }

    /// Add or replace a class.
    pub fn register(&mut self, name: &str, base: Option<&str>, factory: Option<MainLoopFactory>) {
        self.classes.insert(
            name.to_string(),
            ClassInfo {
                name: name.to_string(),
                base: base.map(str::to_string),
                factory,
            },
        );
    }

    pub fn exists(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    /// True if `name` is `ancestor` or derives from it.
    pub fn is_parent_class(&self, name: &str, ancestor: &str) -> bool {
        let mut current = Some(name);
        // Bounded by the class count so a cycle cannot spin forever.
        for _ in 0..=self.classes.len() {
            match current {
                Some(class) if class == ancestor => return true,
                Some(class) => current = self.classes.get(class).and_then(|c| c.base.as_deref()),
                None => return false,
            }
        }
        false
    }

    /// Instantiate `name` as a main loop, if it has a factory.
    pub fn instantiate(&self, name: &str) -> Option<Box<dyn MainLoop>> {
        self.classes.get(name)?.factory.as_ref().map(|f| f())
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::message_queue::MessageQueue;

    struct Countdown(u32);

    impl MainLoop for Countdown {
        fn iteration(&mut self, _delta: f64) -> bool {
            false
        }

        fn idle(&mut self, _delta: f64) -> bool {
            self.0 = self.0.saturating_sub(1);
            self.0 == 0
        }
    }

    // -- 1. Class registry -------------------------------------------------

    #[test]
    fn inheritance_walks_bases() {
        let mut classes = ClassRegistry::new();
        classes.register("GameLoop", Some(SCENE_TREE_CLASS), None);
        assert!(classes.is_parent_class("GameLoop", MAIN_LOOP_CLASS));
        assert!(classes.is_parent_class("GameLoop", OBJECT_CLASS));
        assert!(!classes.is_parent_class(NODE_CLASS, MAIN_LOOP_CLASS));
        assert!(!classes.is_parent_class("Unknown", MAIN_LOOP_CLASS));
    }

    #[test]
    fn inheritance_cycles_terminate() {
        let mut classes = ClassRegistry::new();
        classes.register("A", Some("B"), None);
        classes.register("B", Some("A"), None);
        assert!(!classes.is_parent_class("A", MAIN_LOOP_CLASS));
    }

    #[test]
    fn factories_instantiate() {
        let mut classes = ClassRegistry::new();
        classes.register(
            "Countdown",
            Some(MAIN_LOOP_CLASS),
            Some(Arc::new(|| Box::new(Countdown(2)) as Box<dyn MainLoop>)),
        );
        let mut main_loop = classes.instantiate("Countdown").unwrap();
        assert!(!main_loop.idle(0.1));
        assert!(main_loop.idle(0.1));
        assert!(classes.instantiate(SCENE_TREE_CLASS).is_none());
    }

    // -- 2. Scene tree -----------------------------------------------------

    #[test]
    fn canvas_updates_converge() {
        let mut tree = SceneTreeLoop::new();
        tree.add_root_child(SceneNode {
            name: "Global".into(),
            source: "res://global.tscn".into(),
            script: None,
        });
        tree.set_current_scene(SceneNode {
            name: "Main".into(),
            source: "res://main.tscn".into(),
            script: None,
        });
        let mut passes = 1;
        while tree.update_pending_canvas_items() {
            passes += 1;
        }
        assert_eq!(passes, 2);
        assert!(!tree.update_pending_canvas_items());
    }

    #[test]
    fn quit_is_reported_from_both_steps() {
        let queue = MessageQueue::new();
        let mut tree = SceneTreeLoop::new();
        tree.init(queue.sender());
        assert!(!tree.iteration(0.016));
        tree.quit(Some(3));
        assert!(tree.iteration(0.016));
        assert!(tree.idle(0.016));
        assert_eq!(tree.exit_code(), Some(3));
    }

    #[test]
    fn kind_delegates_and_names() {
        let mut kind = MainLoopKind::Custom {
            class_name: "Countdown".into(),
            inner: Box::new(Countdown(1)),
        };
        assert!(kind.scene_tree_mut().is_none());
        assert!(kind.idle(0.1));
        assert_eq!(kind.type_name(), "Countdown");
        assert_eq!(format!("{kind:?}"), "Custom(Countdown)");
    }
}
