use std::io;
use std::os::fd::RawFd;
use thiserror::Error;

/// Which part of setting up or tearing down a capture failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Configure,
    CreatePipe,
    Duplicate,
    SpawnWorker,
    Restore,
    Claim,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Configure => "setvbuf",
            Step::CreatePipe => "pipe",
            Step::Duplicate => "dup2",
            Step::SpawnWorker => "spawn drain thread",
            Step::Restore => "restore",
            Step::Claim => "claim",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum RedirectError {
    /// The buffered handle could not be switched to unbuffered mode.
    #[error("{stream}: setvbuf: {source}")]
    Configure {
        stream: String,
        #[source]
        source: io::Error,
    },

    #[error("{stream}: pipe: {source}")]
    CreatePipe {
        stream: String,
        #[source]
        source: io::Error,
    },

    /// Saving the target or pointing it at the pipe failed.
    #[error("{stream}: dup2: {source}")]
    Duplicate {
        stream: String,
        #[source]
        source: io::Error,
    },

    #[error("{stream}: spawn drain thread: {source}")]
    SpawnWorker {
        stream: String,
        #[source]
        source: io::Error,
    },

    #[error("{stream}: restore fd {fd}: {source}")]
    Restore {
        stream: String,
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    #[error("{stream}: fd {fd} is already redirected")]
    AlreadyRedirected { stream: String, fd: RawFd },
}

impl RedirectError {
    pub fn step(&self) -> Step {
        match self {
            Self::Configure { .. } => Step::Configure,
            Self::CreatePipe { .. } => Step::CreatePipe,
            Self::Duplicate { .. } => Step::Duplicate,
            Self::SpawnWorker { .. } => Step::SpawnWorker,
            Self::Restore { .. } => Step::Restore,
            Self::AlreadyRedirected { .. } => Step::Claim,
        }
    }

    /// Tag of the stream that failed.
    pub fn stream(&self) -> &str {
        match self {
            Self::Configure { stream, .. }
            | Self::CreatePipe { stream, .. }
            | Self::Duplicate { stream, .. }
            | Self::SpawnWorker { stream, .. }
            | Self::Restore { stream, .. }
            | Self::AlreadyRedirected { stream, .. } => stream,
        }
    }

    /// Underlying errno, when the failure came from the OS.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Self::Configure { source, .. }
            | Self::CreatePipe { source, .. }
            | Self::Duplicate { source, .. }
            | Self::SpawnWorker { source, .. }
            | Self::Restore { source, .. } => source.raw_os_error(),
            Self::AlreadyRedirected { .. } => None,
        }
    }
}
