//! Rendering server on a dedicated thread.
//!
//! With `--render-thread separate` the bootstrapper wraps the rendering
//! server in a [`RenderThread`]. The worker thread owns the server; the main
//! thread talks to it only through a command channel. Draws are fire and
//! forget. `sync` is the rendezvous: it returns once every command queued
//! before it (including the previous frame's draw) has been executed.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::servers::{BootSplash, Color, Lifecycle, RenderingServer};
use crate::ServerError;

enum Command {
    Init(Sender<Result<(), ServerError>>),
    Finish(Sender<()>),
    Sync(Sender<()>),
    Draw { swap_buffers: bool, frame_step: f64 },
    HasChanged(Sender<bool>),
    SetBootImage(BootSplash),
    SetClearColor(Color),
}

/// A [`RenderingServer`] proxy that forwards to a server on another thread.
pub struct RenderThread {
    tx: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl RenderThread {
    /// Move `server` onto a new thread named `render`.
    pub fn spawn(server: Box<dyn RenderingServer>) -> Result<Self, ServerError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = std::thread::Builder::new()
            .name("render".to_string())
            .spawn(move || run(server, rx))
            .map_err(|e| ServerError::InitFailed {
                server: "render_thread".to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!("render thread started");
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    fn send(&self, command: Command) -> Result<(), ServerError> {
        self.tx
            .as_ref()
            .ok_or(ServerError::RenderThreadDisconnected)?
            .send(command)
            .map_err(|_| ServerError::RenderThreadDisconnected)
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T, ServerError> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.send(make(reply_tx))?;
        reply_rx
            .recv()
            .map_err(|_| ServerError::RenderThreadDisconnected)
    }
}

fn run(mut server: Box<dyn RenderingServer>, rx: Receiver<Command>) {
    for command in rx {
        match command {
            Command::Init(reply) => {
                let _ = reply.send(server.init());
            }
            Command::Finish(reply) => {
                server.finish();
                let _ = reply.send(());
            }
            Command::Sync(reply) => {
                server.sync();
                let _ = reply.send(());
            }
            Command::Draw {
                swap_buffers,
                frame_step,
            } => server.draw(swap_buffers, frame_step),
            Command::HasChanged(reply) => {
                let _ = reply.send(server.has_changed());
            }
            Command::SetBootImage(splash) => server.set_boot_image(&splash),
            Command::SetClearColor(color) => server.set_default_clear_color(color),
        }
    }
    tracing::debug!("render thread exiting");
}

impl Lifecycle for RenderThread {
    fn init(&mut self) -> Result<(), ServerError> {
        self.request(Command::Init)?
    }

    fn finish(&mut self) {
        if let Err(e) = self.request(Command::Finish) {
            tracing::warn!(error = %e, "render thread finish failed");
        }
    }
}

impl RenderingServer for RenderThread {
    fn sync(&mut self) {
        if let Err(e) = self.request(Command::Sync) {
            tracing::warn!(error = %e, "render thread sync failed");
        }
    }

    fn draw(&mut self, swap_buffers: bool, frame_step: f64) {
        if let Err(e) = self.send(Command::Draw {
            swap_buffers,
            frame_step,
        }) {
            tracing::warn!(error = %e, "render thread draw dropped");
        }
    }

    fn has_changed(&self) -> bool {
        self.request(Command::HasChanged).unwrap_or(true)
    }

    fn set_boot_image(&mut self, splash: &BootSplash) {
        let _ = self.send(Command::SetBootImage(splash.clone()));
    }

    fn set_default_clear_color(&mut self, color: Color) {
        let _ = self.send(Command::SetClearColor(color));
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("render thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for RenderThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderThread")
            .field("running", &self.worker.is_some())
            .finish()
    }
}
