use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures of a single remote fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not fetch {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("download of {url} was interrupted")]
    Interrupted { url: String },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Raised when descriptor text holds no usable `key: value` line at all.
#[derive(Debug, Error)]
#[error("no `key: value` lines found ({malformed} malformed)")]
pub struct DescriptorError {
    pub malformed: usize,
}

/// Who already owns a command name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOwner {
    Builtin,
    Application(String),
}

impl std::fmt::Display for CommandOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandOwner::Builtin => write!(f, "a built-in command"),
            CommandOwner::Application(name) => write!(f, "application '{name}'"),
        }
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("invalid URL or unknown app name: {0}")]
    Resolution(String),

    #[error(transparent)]
    Network(#[from] FetchError),

    #[error("invalid descriptor from {origin}: {reason}")]
    InvalidDescriptor { origin: String, reason: String },

    #[error("command '{command}' is already used by {owner}")]
    NameConflict { command: String, owner: CommandOwner },

    #[error("unsafe path '{0}'")]
    PathTraversal(String),

    #[error("{action} {}: {source}", path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("operation cancelled")]
    Declined,

    #[error("no installed application provides command '{0}'")]
    UnknownCommand(String),
}

impl InstallError {
    pub fn filesystem(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("invalid name '{0}': cannot be empty or contain ':', '#', or whitespace")]
    InvalidName(String),

    #[error("invalid URL '{0}': must be http or https with a host")]
    InvalidUrl(String),

    #[error("name '{0}' not found in repository")]
    NotFound(String),

    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Network(#[from] FetchError),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("no interpreter found (tried {})", tried.join(", "))]
    MissingInterpreter { tried: Vec<&'static str> },

    #[error("unsupported or non-executable file type: {}", path.display())]
    Unsupported { path: PathBuf },

    #[error("cannot enter application directory {}: {source}", path.display())]
    EnterDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}
