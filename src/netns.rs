//! Network namespace entry and link removal.
//!
//! Namespace membership is a per-thread property on Linux: `setns(2)`
//! only moves the calling thread. [`with_netns`] therefore runs its closure
//! on a dedicated scoped thread that joins the namespace and exits when the
//! closure returns, so the caller's thread never changes namespace.
//! Child processes spawned from inside the closure inherit the namespace.

use std::io;
use std::path::Path;
use std::process::{Command, Output};

use tracing::debug;

/// Address family a link is removed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    fn ip_flag(self) -> &'static str {
        match self {
            Self::V4 => "-4",
            Self::V6 => "-6",
        }
    }
}

/// Link removal failure.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// The link does not exist; callers tearing down treat this as done.
    #[error("link not found")]
    NotFound,

    #[error("{0}")]
    Other(String),
}

/// Namespace boundary used by the DEL command.
pub trait NetnsOps: Send + Sync {
    /// Removes `if_name` inside the namespace at `netns`.
    fn delete_link(&self, netns: &Path, if_name: &str, family: AddressFamily)
    -> Result<(), LinkError>;
}

/// [`NetnsOps`] operating on the real system.
#[derive(Debug, Default)]
pub struct SystemNetns;

impl NetnsOps for SystemNetns {
    fn delete_link(
        &self,
        netns: &Path,
        if_name: &str,
        family: AddressFamily,
    ) -> Result<(), LinkError> {
        with_netns(netns, || delete_link_by_name(if_name, family)).map_err(|e| {
            LinkError::Other(format!("failed to enter {}: {}", netns.display(), e))
        })?
    }
}

// =============================================================================
// Namespace Entry
// =============================================================================

/// Runs `f` on a dedicated thread that has joined the namespace at `path`.
///
/// # Errors
/// Returns an error if the namespace cannot be opened or joined. Panics in
/// `f` are propagated to the caller.
pub fn with_netns<F, T>(path: &Path, f: F) -> io::Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("netns".to_string())
            .spawn_scoped(scope, || -> io::Result<T> {
                enter_netns(path)?;
                Ok(f())
            })?;

        match handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

#[cfg(target_os = "linux")]
fn enter_netns(path: &Path) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let file = std::fs::File::open(path)?;
    // SAFETY: the fd is valid for the duration of the call because `file`
    // outlives it, and setns only affects the calling thread.
    let ret = unsafe { libc::setns(file.as_raw_fd(), libc::CLONE_NEWNET) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    debug!("joined network namespace {}", path.display());
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn enter_netns(_path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "network namespaces require Linux",
    ))
}

// =============================================================================
// Link Removal
// =============================================================================

/// Maximum interface name length (IFNAMSIZ - 1).
const MAX_IFNAME_LEN: usize = 15;

fn validate_if_name(if_name: &str) -> Result<(), LinkError> {
    if if_name.is_empty()
        || if_name.len() > MAX_IFNAME_LEN
        || if_name.contains('/')
        || if_name.chars().any(char::is_whitespace)
    {
        return Err(LinkError::Other(format!(
            "invalid interface name '{if_name}'"
        )));
    }
    Ok(())
}

fn is_missing_link(output: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr);
    stderr.contains("does not exist") || stderr.contains("Cannot find device")
}

fn run_ip(args: &[&str]) -> Result<Output, LinkError> {
    Command::new("ip")
        .args(args)
        .output()
        .map_err(|e| LinkError::Other(format!("failed to run ip: {e}")))
}

fn ip_failure(args: &[&str], output: &Output) -> LinkError {
    if is_missing_link(output) {
        return LinkError::NotFound;
    }
    LinkError::Other(format!(
        "'ip {}' failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr).trim()
    ))
}

/// Deletes the link `if_name` in the current thread's namespace.
///
/// Addresses of `family` on the link are logged before removal.
pub fn delete_link_by_name(if_name: &str, family: AddressFamily) -> Result<(), LinkError> {
    validate_if_name(if_name)?;

    let show = ["link", "show", "dev", if_name];
    let output = run_ip(&show)?;
    if !output.status.success() {
        return Err(ip_failure(&show, &output));
    }

    let addrs = run_ip(&[family.ip_flag(), "-o", "addr", "show", "dev", if_name])?;
    if addrs.status.success() {
        for line in String::from_utf8_lossy(&addrs.stdout).lines() {
            debug!("removing {}: {}", if_name, line.trim());
        }
    }

    let delete = ["link", "delete", "dev", if_name];
    let output = run_ip(&delete)?;
    if !output.status.success() {
        return Err(ip_failure(&delete, &output));
    }

    Ok(())
}
