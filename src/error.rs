use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Everything that can go wrong between reading a line and reaping its jobs.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("reached the maximum line limit ({limit} characters)")]
    LineTooLong { limit: usize },

    #[error("reached the maximum jobs limit")]
    JobTableFull,

    #[error("invalid signal number")]
    InvalidSignal,

    #[error("invalid process id: {0}")]
    InvalidPid(String),

    #[error("argument contains a NUL byte: {0:?}")]
    NulInArgument(String),

    #[error("no command to run")]
    NoCommand,

    #[error("history replay nested too deeply")]
    ReplayTooDeep,

    #[error("failed to install handler for {signal}: {source}")]
    HandlerInstall {
        signal: &'static str,
        #[source]
        source: Errno,
    },

    #[error("failed to change signal mask: {0}")]
    Mask(#[source] Errno),

    #[error("fork: {0}")]
    Spawn(#[source] Errno),

    #[error("history file {path}: {source}")]
    History {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ShellError {
    /// Errors that abandon the rest of the current line rather than just one job.
    pub fn aborts_line(&self) -> bool {
        matches!(self, ShellError::Spawn(_) | ShellError::Mask(_))
    }
}

pub type Result<T> = std::result::Result<T, ShellError>;
