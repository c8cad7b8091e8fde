//! Boot errors and their process exit codes.

use ember_core::CoreError;
use ember_servers::ServerError;

/// Exit code for any setup failure.
pub const ERR_INVALID_PARAMETER: i32 = 31;

/// Errors that abort `setup`, `setup2` or `start`.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    /// `--help` was requested. Not a failure; the caller prints the help text.
    #[error("help requested")]
    HelpRequested,

    /// `--version` was requested.
    #[error("version requested")]
    VersionRequested,

    /// Malformed or contradictory command line. The help text is shown.
    #[error("{0}")]
    Config(String),

    /// A required file or project setting is missing.
    #[error("{0}")]
    MissingResource(String),

    /// A remote endpoint could not be reached or refused the connection.
    #[error("couldn't connect to {what} at {endpoint}: {reason}")]
    RemoteConnect {
        /// Which feature was connecting (`remote filesystem`, `remote debugger`).
        what: &'static str,
        /// `host:port`.
        endpoint: String,
        /// Underlying cause.
        reason: String,
    },

    /// The platform layer failed to open the window or pick drivers.
    #[error("platform initialization failed: {0}")]
    Platform(String),

    /// A subsystem failed to initialize.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Settings or pack error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// `start` could not produce a runnable main loop.
    #[error("{0}")]
    Start(String),

    /// Filesystem error outside the settings layer.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl BootError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootError::HelpRequested | BootError::VersionRequested => 0,
            BootError::Start(_) => 1,
            _ => ERR_INVALID_PARAMETER,
        }
    }

    /// Whether the usage text should accompany the error.
    pub fn shows_help(&self) -> bool {
        matches!(self, BootError::HelpRequested | BootError::Config(_))
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        BootError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(BootError::HelpRequested.exit_code(), 0);
        assert_eq!(BootError::Config("x".into()).exit_code(), ERR_INVALID_PARAMETER);
        assert_eq!(BootError::Start("x".into()).exit_code(), 1);
        assert_eq!(
            BootError::from(ServerError::NotRegistered("audio".into())).exit_code(),
            ERR_INVALID_PARAMETER
        );
    }

    #[test]
    fn config_errors_show_help() {
        assert!(BootError::Config("Missing resolution argument, aborting.".into()).shows_help());
        assert!(!BootError::MissingResource("no project".into()).shows_help());
    }
}
