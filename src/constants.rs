//! # Plugin Constants
//!
//! Engine names, CNI protocol values and filesystem defaults. Anything an
//! operator may want to override at runtime is also exposed through
//! [`crate::config::Settings`].

// =============================================================================
// Engines
// =============================================================================

/// The engine this plugin implements.
pub const ENGINE_VPP: &str = "vpp";

/// Engines that are recognized but not implemented yet.
pub const UNSUPPORTED_ENGINES: &[&str] = &["ovs-dpdk"];

// =============================================================================
// CNI Protocol
// =============================================================================

/// CNI versions this plugin can speak, oldest first.
pub const SUPPORTED_CNI_VERSIONS: &[&str] = &["0.1.0", "0.2.0", "0.3.0", "0.3.1", "0.4.0"];

/// Versions whose results use the `ip4`/`ip6` layout.
pub const LEGACY_CNI_VERSIONS: &[&str] = &["0.1.0", "0.2.0"];

/// Version assumed when a config omits `cniVersion`.
pub const DEFAULT_CNI_VERSION: &str = "0.1.0";

/// Version used for `VERSION` replies and error payloads without a config.
pub const LATEST_CNI_VERSION: &str = "0.4.0";

pub const ENV_COMMAND: &str = "CNI_COMMAND";
pub const ENV_CONTAINER_ID: &str = "CNI_CONTAINERID";
pub const ENV_NETNS: &str = "CNI_NETNS";
pub const ENV_IFNAME: &str = "CNI_IFNAME";
pub const ENV_ARGS: &str = "CNI_ARGS";
pub const ENV_PATH: &str = "CNI_PATH";

// Well-known CNI error codes.
pub const CNI_ERR_INCOMPATIBLE_VERSION: u32 = 1;
pub const CNI_ERR_INVALID_ENV: u32 = 4;
pub const CNI_ERR_DECODING_FAILURE: u32 = 6;
pub const CNI_ERR_INVALID_NETWORK_CONFIG: u32 = 7;
pub const CNI_ERR_INTERNAL: u32 = 100;

// =============================================================================
// Logging
// =============================================================================

/// EnvFilter directives for the plugin's own logs.
pub const ENV_LOG: &str = "USERSPACE_CNI_LOG";

/// Optional file that receives logs instead of stderr.
pub const ENV_LOG_FILE: &str = "USERSPACE_CNI_LOG_FILE";

/// Filter used when `USERSPACE_CNI_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn";

// =============================================================================
// VPP Engine
// =============================================================================

pub const ENV_DATA_DIR: &str = "USERSPACE_CNI_DATA_DIR";
pub const ENV_SOCKET_DIR: &str = "USERSPACE_CNI_SOCKET_DIR";
pub const ENV_VPPCTL: &str = "USERSPACE_CNI_VPPCTL";

/// Where host and container attachment records are kept.
pub const DEFAULT_DATA_DIR: &str = "/var/run/vpp/cni/data";

/// Where memif sockets shared with the sandbox are created.
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/vpp/cni/shared";

/// VPP debug CLI binary.
pub const DEFAULT_VPPCTL: &str = "vppctl";

/// Container ID prefix length used in socket and record names.
pub const CONTAINER_ID_PREFIX_LEN: usize = 12;

/// Upper bound on memif socket ids handed out by the plugin.
pub const MAX_MEMIF_SOCKET_ID: u32 = 4096;
