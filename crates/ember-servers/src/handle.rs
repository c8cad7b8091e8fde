//! Owning handle over one server instance.

use crate::ServerError;

/// Lifecycle state of a [`ServerHandle`].
///
/// Transitions only move forward:
/// `Uninit -> Constructed -> Initialized -> Finished -> Destroyed`. A handle
/// that fails to initialize goes straight from `Constructed` to `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServerState {
    Uninit,
    Constructed,
    Initialized,
    Finished,
    Destroyed,
}

/// Owns one server and enforces its lifecycle.
///
/// Per-frame operations go through [`active_mut`](Self::active_mut), which
/// refuses access unless the server is `Initialized`.
#[derive(Debug)]
pub struct ServerHandle<S> {
    name: String,
    state: ServerState,
    instance: Option<S>,
}

impl<S> ServerHandle<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ServerState::Uninit,
            instance: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Take ownership of a freshly constructed server.
    pub fn construct(&mut self, instance: S) -> Result<(), ServerError> {
        self.expect_state(ServerState::Uninit, "construct")?;
        self.instance = Some(instance);
        self.state = ServerState::Constructed;
        Ok(())
    }

    /// Run `initializer` on the constructed server. On failure the handle
    /// stays `Constructed` so the caller can destroy it.
    pub fn initialize(
        &mut self,
        initializer: impl FnOnce(&mut S) -> Result<(), ServerError>,
    ) -> Result<(), ServerError> {
        self.expect_state(ServerState::Constructed, "initialize")?;
        let instance = self.instance_mut()?;
        initializer(instance)?;
        self.state = ServerState::Initialized;
        Ok(())
    }

    /// Run `finalizer` on an initialized server.
    pub fn finish(&mut self, finalizer: impl FnOnce(&mut S)) -> Result<(), ServerError> {
        self.expect_state(ServerState::Initialized, "finish")?;
        let instance = self.instance_mut()?;
        finalizer(instance);
        self.state = ServerState::Finished;
        Ok(())
    }

    /// Release the server. An `Initialized` handle must be finished first.
    pub fn destroy(&mut self) -> Result<Option<S>, ServerError> {
        match self.state {
            ServerState::Initialized => Err(ServerError::ContractViolation(format!(
                "'{}' destroyed while still initialized",
                self.name
            ))),
            ServerState::Destroyed => Ok(None),
            _ => {
                self.state = ServerState::Destroyed;
                Ok(self.instance.take())
            }
        }
    }

    /// The server, while it is initialized.
    pub fn active(&self) -> Result<&S, ServerError> {
        self.expect_state(ServerState::Initialized, "use")?;
        self.instance.as_ref().ok_or_else(|| self.missing())
    }

    /// The server, mutably, while it is initialized.
    pub fn active_mut(&mut self) -> Result<&mut S, ServerError> {
        self.expect_state(ServerState::Initialized, "use")?;
        self.instance_mut()
    }

    /// The server in any state that still owns it.
    pub fn instance(&self) -> Option<&S> {
        self.instance.as_ref()
    }

    fn instance_mut(&mut self) -> Result<&mut S, ServerError> {
        let missing = self.missing();
        self.instance.as_mut().ok_or(missing)
    }

    fn missing(&self) -> ServerError {
        ServerError::ContractViolation(format!("'{}' has no instance", self.name))
    }

    fn expect_state(&self, expected: ServerState, op: &str) -> Result<(), ServerError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ServerError::ContractViolation(format!(
                "cannot {op} '{}' in state {:?} (expected {:?})",
                self.name, self.state, expected
            )))
        }
    }
}
