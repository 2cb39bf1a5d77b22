//! Process supervisor error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by [`super::ProcessSupervisor::start`]
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `start()` called while a process is starting, running or stopping
    #[error("world server is already running")]
    AlreadyRunning,

    /// The configured path did not resolve to an existing file
    #[error("server executable not found at {}", path.display())]
    ExecutableNotFound { path: PathBuf },

    /// The OS refused to spawn the process
    #[error("failed to spawn world server: {reason}")]
    SpawnFailed { reason: String },

    /// `eula.txt` / `server.properties` could not be rewritten
    #[error("failed to rewrite {}: {reason}", path.display())]
    PropertyFile { path: PathBuf, reason: String },

    /// The process reported an error on stderr before becoming ready
    #[error("world server reported an error during startup: {message}")]
    ProcessError { message: String },

    /// The process exited before printing the readiness marker
    #[error("world server exited before becoming ready (code: {code:?})")]
    ProcessExited { code: Option<i32> },

    /// `stop()` was called before the server became ready
    #[error("world server start was cancelled")]
    Cancelled,

    /// No readiness marker within the startup window
    #[error("world server did not become ready within {secs}s")]
    StartupTimeout { secs: u64 },
}

impl SupervisorError {
    /// Stable kind name, as reported to callers and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "AlreadyRunning",
            Self::ExecutableNotFound { .. } => "ExecutableNotFound",
            Self::SpawnFailed { .. } => "SpawnFailed",
            Self::PropertyFile { .. } => "PropertyFile",
            Self::ProcessError { .. } => "ProcessError",
            Self::ProcessExited { .. } => "ProcessExited",
            Self::Cancelled => "Cancelled",
            Self::StartupTimeout { .. } => "StartupTimeout",
        }
    }
}
