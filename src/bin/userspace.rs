//! userspace - CNI plugin binary
//!
//! Executed by the container runtime per the CNI protocol:
//!
//! ```sh
//! CNI_COMMAND=ADD CNI_CONTAINERID=<id> CNI_NETNS=/proc/<pid>/ns/net \
//!   CNI_IFNAME=eth0 CNI_PATH=/opt/cni/bin userspace < netconf.json
//! ```
//!
//! stdout carries the CNI result or error document, so logs go to stderr
//! (or `USERSPACE_CNI_LOG_FILE`), filtered by `USERSPACE_CNI_LOG`.

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use userspace_cni::config::Settings;
use userspace_cni::constants::{DEFAULT_LOG_FILTER, ENV_LOG, ENV_LOG_FILE};
use userspace_cni::plugin::Plugin;
use userspace_cni::skel::plugin_main;

fn init_logging() -> Result<(), String> {
    let filter = EnvFilter::try_from_env(ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .compact();

    let log_file = std::env::var(ENV_LOG_FILE).ok().filter(|p| !p.is_empty());
    let installed = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| format!("failed to open log file {}: {}", path, e))?;
            tracing::subscriber::set_global_default(
                builder.with_writer(Mutex::new(file)).finish(),
            )
        }
        None => tracing::subscriber::set_global_default(
            builder.with_writer(std::io::stderr).finish(),
        ),
    };

    installed.map_err(|e| format!("failed to set tracing subscriber: {}", e))
}

fn main() -> ExitCode {
    // Logging is best effort; the CNI reply on stdout is what matters.
    if let Err(e) = init_logging() {
        eprintln!("{}", e);
    }

    let settings = Settings::from_env();
    let plugin = Plugin::from_settings(&settings);
    plugin_main(&plugin)
}
