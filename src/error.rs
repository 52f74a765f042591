//! Error types shared by the supervisor, the worker actors and the tool wrappers.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures while reading a worker-definition file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("address of worker item {index} in {} is empty", path.display())]
    MissingAddress { path: PathBuf, index: usize },
}

/// Failures of an external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' was cancelled")]
    Cancelled(String),
}

/// Why a worker start sequence did not reach `Running`.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("start sequence cancelled")]
    Cancelled,

    #[error("pid file {} did not appear within {waited:?}", path.display())]
    PidTimeout { path: PathBuf, waited: Duration },

    #[error("pid file {} does not contain a process id: {content:?}", path.display())]
    PidParse { path: PathBuf, content: String },

    #[error("failed to read pid file {}: {source}", path.display())]
    PidRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl StartError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Tool(ToolError::Cancelled(_)))
    }
}

/// Fatal startup conditions. These are the only errors allowed to end the process.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Directory '{}' not found.", .0.display())]
    MissingDirectory(PathBuf),

    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
