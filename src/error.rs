//! Error types for the userspace CNI plugin.

use std::fmt;
use std::path::PathBuf;

use crate::constants::{
    CNI_ERR_DECODING_FAILURE, CNI_ERR_INCOMPATIBLE_VERSION, CNI_ERR_INTERNAL,
    CNI_ERR_INVALID_ENV, CNI_ERR_INVALID_NETWORK_CONFIG,
};

/// Result type alias for plugin operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Which side of the attachment an engine was selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRole {
    /// Engine configuring the host end of the interface.
    Host,
    /// Engine configuring the end visible inside the sandbox.
    Container,
}

impl fmt::Display for EngineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// Errors that can occur while running a CNI command.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Network configuration could not be decoded.
    #[error("failed to load netconf: {0}")]
    ConfigLoad(String),

    /// Engine name not recognized for the given role.
    #[error("unknown {role} engine: {name}")]
    UnknownEngine { role: EngineRole, name: String },

    /// Engine name recognized but not implemented by this plugin.
    #[error("found {role} engine '{name}' but it is not supported")]
    UnsupportedEngine { role: EngineRole, name: String },

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// The dispatched engine capability failed.
    #[error("{role} engine '{engine}' failed: {reason}")]
    Engine {
        role: EngineRole,
        engine: String,
        reason: String,
    },

    // =========================================================================
    // IPAM Errors
    // =========================================================================
    /// Allocation, release or result normalization failed.
    #[error("IPAM plugin '{plugin}' failed: {reason}")]
    Ipam { plugin: String, reason: String },

    /// IPAM succeeded but produced no usable address.
    #[error("IPAM plugin '{plugin}' returned no usable IP address")]
    NoAddress { plugin: String },

    // =========================================================================
    // Namespace Errors
    // =========================================================================
    /// Removing the sandbox link failed for a reason other than absence.
    #[error("failed to remove link '{if_name}' in {}: {reason}", netns.display())]
    NamespaceCleanup {
        netns: PathBuf,
        if_name: String,
        reason: String,
    },

    // =========================================================================
    // Invocation Errors
    // =========================================================================
    /// Required CNI environment variable is missing or empty.
    #[error("required environment variable {0} is not set")]
    MissingEnv(&'static str),

    /// `CNI_COMMAND` holds a command this plugin does not handle.
    #[error("unknown CNI_COMMAND: {0}")]
    InvalidCommand(String),

    /// Requested CNI spec version is not supported.
    #[error("incompatible CNI version {requested}, supported versions: {supported}")]
    IncompatibleVersion { requested: String, supported: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns the CNI error code reported to the runtime.
    pub fn code(&self) -> u32 {
        match self {
            Self::IncompatibleVersion { .. } => CNI_ERR_INCOMPATIBLE_VERSION,
            Self::MissingEnv(_) | Self::InvalidCommand(_) => CNI_ERR_INVALID_ENV,
            Self::ConfigLoad(_) => CNI_ERR_DECODING_FAILURE,
            Self::UnknownEngine { .. } | Self::UnsupportedEngine { .. } => {
                CNI_ERR_INVALID_NETWORK_CONFIG
            }
            _ => CNI_ERR_INTERNAL,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
