use std::io;

use thiserror::Error;

/// Failures while turning a parsed pipeline into running processes.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("{0}: built-in commands cannot be used in a pipeline")]
    BuiltinInPipeline(String),

    #[error("{path}: {source}")]
    Redirect {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("fork {command}: {source}")]
    Fork {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command}: {source}")]
    Exec {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("maximum number of jobs exceeded ({0})")]
    TableFull(usize),
}

impl LaunchError {
    /// Infrastructure failures the shell cannot recover from mid-launch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LaunchError::Pipe(_) | LaunchError::Fork { .. })
    }
}

/// Job-table and built-in argument errors. Reported, never fatal.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job number: [{0}]")]
    NotFound(usize),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("maximum number of jobs exceeded ({0})")]
    TableFull(usize),
}

/// Signal delivery to a job or pid that failed.
#[derive(Debug, Error)]
#[error("kill {target}: {source}")]
pub struct SignalError {
    pub target: String,
    #[source]
    pub source: io::Error,
}

/// Why a `kill` target was not signalled.
#[derive(Debug, Error)]
pub enum KillError {
    #[error(transparent)]
    Target(#[from] JobError),

    #[error(transparent)]
    Delivery(#[from] SignalError),
}
