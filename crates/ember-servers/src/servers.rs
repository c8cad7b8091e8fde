//! Server interfaces as seen by the bootstrapper and the frame driver.
//!
//! Server internals (rendering algorithms, physics solvers, mixing) are out
//! of scope; these traits only name the entry points the engine lifecycle
//! calls. All servers are `Send` so the rendering server can be moved onto a
//! render thread.

use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender};

use crate::ServerError;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Two-phase lifecycle shared by every server.
///
/// `init` runs once after construction; `finish` runs once before drop.
pub trait Lifecycle {
    fn init(&mut self) -> Result<(), ServerError> {
        Ok(())
    }

    fn finish(&mut self) {}
}

impl<T: Lifecycle + ?Sized> Lifecycle for Box<T> {
    fn init(&mut self) -> Result<(), ServerError> {
        (**self).init()
    }

    fn finish(&mut self) {
        (**self).finish()
    }
}

// ---------------------------------------------------------------------------
// Subsystem traits
// ---------------------------------------------------------------------------

pub trait AudioServer: Lifecycle + Send {
    /// Per-frame bookkeeping on the main thread.
    fn update(&mut self);

    /// Load the bus layout at `path`, or the built-in default.
    fn load_default_bus_layout(&mut self, path: Option<&str>) -> Result<(), ServerError>;
}

/// A physics world (2D or 3D).
///
/// Within one physics iteration the driver calls, in order, `sync`,
/// `flush_queries`, the main-loop iteration, `end_sync` and `step`. Which of
/// these apply to which dimension is decided by the driver.
pub trait PhysicsServer: Lifecycle + Send {
    fn sync(&mut self);
    fn flush_queries(&mut self);
    fn step(&mut self, delta: f64);
    fn end_sync(&mut self);
    fn set_active(&mut self, active: bool);
}

pub trait NavigationServer: Lifecycle + Send {
    fn process(&mut self, delta: f64);
}

pub trait CameraServer: Lifecycle + Send {}

pub trait ArVrServer: Lifecycle + Send {
    fn process(&mut self);
}

/// The rendering server.
pub trait RenderingServer: Lifecycle + Send {
    /// Wait for the previous frame to finish.
    fn sync(&mut self);

    /// Render one frame.
    fn draw(&mut self, swap_buffers: bool, frame_step: f64);

    /// True if anything visible changed since the last draw.
    fn has_changed(&self) -> bool;

    fn set_boot_image(&mut self, splash: &BootSplash);

    fn set_default_clear_color(&mut self, color: Color);
}

// ---------------------------------------------------------------------------
// Boot splash
// ---------------------------------------------------------------------------

/// RGBA colour, components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Default boot splash background.
    pub const BOOT_BG: Color = Color::rgb(0.14, 0.14, 0.14);

    /// Parse `#rrggbb`, `rrggbb`, `#rrggbbaa` or `rrggbbaa`.
    pub fn from_html(text: &str) -> Option<Self> {
        let hex = text.strip_prefix('#').unwrap_or(text);
        if !matches!(hex.len(), 6 | 8) || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| -> Option<f32> {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .ok()
                .map(|v| f32::from(v) / 255.0)
        };
        Some(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: if hex.len() == 8 { channel(6)? } else { 1.0 },
        })
    }
}

/// What the rendering server paints while the engine boots.
#[derive(Debug, Clone, PartialEq)]
pub struct BootSplash {
    /// Image file, or `None` for the built-in splash.
    pub image: Option<PathBuf>,
    pub bg_color: Color,
    /// Scale the image to the window instead of centring it.
    pub fullsize: bool,
}

impl Default for BootSplash {
    fn default() -> Self {
        Self {
            image: None,
            bg_color: Color::BOOT_BG,
            fullsize: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RenderingCallbacks
// ---------------------------------------------------------------------------

/// A queued rendering callback.
pub type Callback = Box<dyn FnOnce() + Send>;

/// Deferred rendering callbacks, flushed by the driver after the idle phase.
pub struct RenderingCallbacks {
    tx: Sender<Callback>,
    rx: Receiver<Callback>,
}

impl RenderingCallbacks {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// A handle other threads can queue callbacks through.
    pub fn sender(&self) -> Sender<Callback> {
        self.tx.clone()
    }

    pub fn push(&self, callback: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(callback));
    }

    /// Run queued callbacks. Returns how many ran.
    pub fn flush(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.rx.try_recv() {
            callback();
            ran += 1;
        }
        ran
    }
}

impl Default for RenderingCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle for RenderingCallbacks {
    fn finish(&mut self) {
        let dropped = self.rx.try_iter().count();
        if dropped > 0 {
            tracing::debug!(dropped, "discarding rendering callbacks at shutdown");
        }
    }
}

impl std::fmt::Debug for RenderingCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderingCallbacks")
            .field("pending", &self.rx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn html_colors_parse() {
        assert_eq!(Color::from_html("#ff0000"), Some(Color::rgb(1.0, 0.0, 0.0)));
        let c = Color::from_html("00ff0080").unwrap();
        assert_eq!(c.g, 1.0);
        assert!((c.a - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(Color::from_html("#fff"), None);
        assert_eq!(Color::from_html("zzzzzz"), None);
    }

    #[test]
    fn rendering_callbacks_flush_runs_all() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut callbacks = RenderingCallbacks::new();
        for _ in 0..3 {
            let h = Arc::clone(&hits);
            callbacks.push(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(callbacks.flush(), 3);
        assert_eq!(callbacks.flush(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
