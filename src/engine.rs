//! Network engine interface and name-keyed dispatch.
//!
//! An engine performs the dataplane side of an attachment, either on the
//! host or inside the sandbox. The [`EngineRegistry`] maps the engine
//! names found in the network configuration to implementations and
//! classifies every name three ways:
//!
//! | Class | Example | Outcome |
//! |-------|---------|---------|
//! | Supported | `vpp` | dispatched |
//! | Recognized, unsupported | `ovs-dpdk` | [`Error::UnsupportedEngine`] |
//! | Unknown | `bogus` | [`Error::UnknownEngine`] |

use tracing::debug;

pub use crate::error::EngineRole;

use crate::config::{NetConf, Settings};
use crate::constants::UNSUPPORTED_ENGINES;
use crate::engines::VppEngine;
use crate::error::{Error, Result};
use crate::types::IpData;

/// Host and container attach/detach capabilities of one engine.
///
/// Implementations must tolerate detaching state that is already gone so
/// DEL can be retried.
pub trait NetworkEngine: Send + Sync {
    /// Name matched against `hostConf.engine` / `containerConf.engine`.
    fn name(&self) -> &str;

    /// Creates the host end of the interface. `ip` is always unassigned.
    fn attach_on_host(&self, conf: &NetConf, ip: &IpData, container_id: &str) -> Result<()>;

    /// Configures the sandbox end of the interface.
    fn attach_on_container(&self, conf: &NetConf, ip: &IpData, container_id: &str) -> Result<()>;

    /// Removes the host end of the interface.
    fn detach_from_host(&self, conf: &NetConf, container_id: &str) -> Result<()>;

    /// Removes the sandbox end of the interface.
    fn detach_from_container(&self, conf: &NetConf, container_id: &str) -> Result<()>;
}

/// How the registry classifies an engine name.
pub enum EngineClass<'a> {
    Supported(&'a dyn NetworkEngine),
    Unsupported,
    Unknown,
}

/// Registry of engines by name.
pub struct EngineRegistry {
    engines: Vec<Box<dyn NetworkEngine>>,
    unsupported: Vec<String>,
}

impl EngineRegistry {
    /// Creates a registry with no engines and the known-unsupported names.
    #[must_use]
    pub fn new() -> Self {
        Self {
            engines: Vec::new(),
            unsupported: UNSUPPORTED_ENGINES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Creates a registry holding the engines shipped with the plugin.
    #[must_use]
    pub fn with_defaults(settings: &Settings) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(VppEngine::new(settings)));
        registry
    }

    /// Registers an engine under its own name.
    pub fn register(&mut self, engine: Box<dyn NetworkEngine>) {
        self.engines.push(engine);
    }

    /// Lists the names of registered engines.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.engines.iter().map(|e| e.name()).collect()
    }

    /// Classifies an engine name.
    pub fn classify(&self, name: &str) -> EngineClass<'_> {
        if let Some(engine) = self.engines.iter().find(|e| e.name() == name) {
            EngineClass::Supported(engine.as_ref())
        } else if self.unsupported.iter().any(|u| u == name) {
            EngineClass::Unsupported
        } else {
            EngineClass::Unknown
        }
    }

    /// Resolves an engine for `role`, failing on unsupported or unknown names.
    pub fn resolve(&self, role: EngineRole, name: &str) -> Result<&dyn NetworkEngine> {
        match self.classify(name) {
            EngineClass::Supported(engine) => {
                debug!("{} engine resolved to {}", role, name);
                Ok(engine)
            }
            EngineClass::Unsupported => Err(Error::UnsupportedEngine {
                role,
                name: name.to_string(),
            }),
            EngineClass::Unknown => Err(Error::UnknownEngine {
                role,
                name: name.to_string(),
            }),
        }
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps an engine failure with the role and engine it came from.
pub(crate) fn engine_failure(role: EngineRole, engine: &str, err: Error) -> Error {
    match err {
        e @ Error::Engine { .. } => e,
        other => Error::Engine {
            role,
            engine: engine.to_string(),
            reason: other.to_string(),
        },
    }
}
