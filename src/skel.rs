//! CNI invocation protocol.
//!
//! The runtime executes the plugin with the command and sandbox in
//! `CNI_*` environment variables and the network configuration on stdin.
//! Results and errors are written to stdout as JSON; the exit status tells
//! the runtime which one it got.
//!
//! | Variable | ADD | DEL | VERSION |
//! |----------|-----|-----|---------|
//! | `CNI_COMMAND` | required | required | required |
//! | `CNI_CONTAINERID` | required | required | - |
//! | `CNI_NETNS` | required | optional | - |
//! | `CNI_IFNAME` | required | required | - |
//! | `CNI_ARGS` | optional | optional | - |
//! | `CNI_PATH` | required | required | - |

use std::env;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;

use crate::config::load_net_conf;
use crate::constants::{
    ENV_ARGS, ENV_COMMAND, ENV_CONTAINER_ID, ENV_IFNAME, ENV_NETNS, ENV_PATH, LATEST_CNI_VERSION,
    SUPPORTED_CNI_VERSIONS,
};
use crate::error::{Error, Result};
use crate::plugin::Plugin;
use crate::types::is_supported_version;

/// Commands this plugin answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniCommand {
    Add,
    Del,
    Version,
}

impl FromStr for CniCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ADD" => Ok(Self::Add),
            "DEL" => Ok(Self::Del),
            "VERSION" => Ok(Self::Version),
            other => Err(Error::InvalidCommand(other.to_string())),
        }
    }
}

/// The sandbox a command applies to, plus the raw configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CmdArgs {
    pub container_id: String,
    /// Namespace path; DEL may run after the namespace is gone.
    pub netns: Option<PathBuf>,
    pub if_name: String,
    /// Raw `CNI_ARGS` (`K=V;K2=V2`).
    pub args: String,
    /// Configuration document from stdin.
    pub stdin_data: Vec<u8>,
}

/// Reads the command and sandbox from CNI environment variables.
///
/// `stdin_data` is left empty.
pub fn parse_env<F>(lookup: F) -> Result<(CniCommand, CmdArgs)>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
    let require = |key: &'static str| get(key).ok_or(Error::MissingEnv(key));

    let command: CniCommand = require(ENV_COMMAND)?.parse()?;
    if command == CniCommand::Version {
        return Ok((command, CmdArgs::default()));
    }

    // IPAM plugins are searched via `Settings::cni_path`; the variable is
    // still mandatory for ADD and DEL.
    require(ENV_PATH)?;

    let args = CmdArgs {
        container_id: require(ENV_CONTAINER_ID)?,
        netns: match command {
            CniCommand::Add => Some(PathBuf::from(require(ENV_NETNS)?)),
            _ => get(ENV_NETNS).map(PathBuf::from),
        },
        if_name: require(ENV_IFNAME)?,
        args: get(ENV_ARGS).unwrap_or_default(),
        stdin_data: Vec::new(),
    };

    Ok((command, args))
}

/// Error document written to stdout on failure.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReply<'a> {
    cni_version: &'a str,
    code: u32,
    msg: String,
}

/// Reply to `VERSION`.
pub fn version_info() -> Value {
    json!({
        "cniVersion": LATEST_CNI_VERSION,
        "supportedVersions": SUPPORTED_CNI_VERSIONS,
    })
}

/// Runs one command against `plugin`.
///
/// Returns the document to print on success, if any, and the CNI
/// version errors should be reported in.
fn dispatch(plugin: &Plugin, command: CniCommand, args: &CmdArgs) -> (Result<Option<Value>>, String) {
    if command == CniCommand::Version {
        return (Ok(Some(version_info())), LATEST_CNI_VERSION.to_string());
    }

    let conf = match load_net_conf(&args.stdin_data) {
        Ok(conf) => conf,
        Err(e) => return (Err(e), LATEST_CNI_VERSION.to_string()),
    };

    let version = conf.cni_version().to_string();
    if !is_supported_version(&version) {
        let err = Error::IncompatibleVersion {
            requested: version,
            supported: SUPPORTED_CNI_VERSIONS.join(", "),
        };
        return (Err(err), LATEST_CNI_VERSION.to_string());
    }

    let outcome = match command {
        CniCommand::Add => plugin.cmd_add(args).map(Some),
        CniCommand::Del => plugin.cmd_del(args).map(|()| None),
        CniCommand::Version => unreachable!("handled above"),
    };
    (outcome, version)
}

/// Runs the plugin with explicit environment and streams.
pub fn run<F, R, W>(plugin: &Plugin, lookup: F, mut stdin: R, stdout: &mut W) -> ExitCode
where
    F: Fn(&str) -> Option<String>,
    R: Read,
    W: Write,
{
    let (outcome, version) = match parse_env(lookup) {
        Ok((command, mut args)) => {
            let read = if command == CniCommand::Version {
                Ok(0)
            } else {
                stdin.read_to_end(&mut args.stdin_data)
            };
            match read {
                Ok(_) => dispatch(plugin, command, &args),
                Err(e) => (Err(Error::Io(e)), LATEST_CNI_VERSION.to_string()),
            }
        }
        Err(e) => (Err(e), LATEST_CNI_VERSION.to_string()),
    };

    match outcome {
        Ok(reply) => {
            if let Some(reply) = reply
                && let Err(e) = write_json(stdout, &reply)
            {
                error!("failed to write result: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            let reply = ErrorReply {
                cni_version: &version,
                code: err.code(),
                msg: err.to_string(),
            };
            if let Err(e) = write_json(stdout, &reply) {
                error!("failed to write error: {}", e);
            }
            ExitCode::FAILURE
        }
    }
}

fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Entry point for the plugin binary: real environment, stdin and stdout.
pub fn plugin_main(plugin: &Plugin) -> ExitCode {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    run(plugin, |key| env::var(key).ok(), stdin.lock(), &mut stdout)
}
