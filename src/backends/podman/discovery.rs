//! Podman socket discovery.
//!
//! ```text
//!   podman version --format json     → client major version
//!   major >= 4:  podman machine inspect  → ConnectionInfo.PodmanSocket.Path
//!                (falls back to podman info when no machine is defined)
//!   major <  4:  podman info --format json → host.remoteSocket.path
//! ```
//!
//! The major version is returned with the socket; it also decides the
//! libpod API prefix when the daemon cannot be asked directly.
//!
//! Command output is parsed by pure functions so the format handling can be
//! tested without a podman installation.

use crate::constants::{DISCOVERY_TIMEOUT, PODMAN_BACKEND, PODMAN_MACHINE_MAJOR_VERSION};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

fn discovery_error(reason: impl Into<String>) -> Error {
    Error::Discovery {
        backend: PODMAN_BACKEND.to_string(),
        reason: reason.into(),
    }
}

#[derive(Deserialize)]
struct VersionOutput {
    #[serde(rename = "Client")]
    client: VersionInfo,
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "Version")]
    version: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MachineInspect {
    #[serde(default)]
    connection_info: Option<ConnectionInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConnectionInfo {
    #[serde(default)]
    podman_socket: Option<SocketPath>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SocketPath {
    path: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoOutput {
    host: InfoHost,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfoHost {
    #[serde(default)]
    remote_socket: Option<RemoteSocket>,
}

#[derive(Deserialize)]
struct RemoteSocket {
    #[serde(default)]
    path: String,
}

/// Extracts the client major version from `podman version --format json`.
pub fn parse_major_version(output: &[u8]) -> Result<u64> {
    let parsed: VersionOutput = serde_json::from_slice(output)
        .map_err(|e| discovery_error(format!("unreadable version output: {}", e)))?;

    let version = parsed.client.version;
    version
        .split('.')
        .next()
        .and_then(|major| major.trim_start_matches('v').parse().ok())
        .ok_or_else(|| discovery_error(format!("unparseable version '{}'", version)))
}

/// Extracts the socket of the first machine from `podman machine inspect`.
///
/// Returns `Ok(None)` when no machine is defined.
pub fn parse_machine_socket(output: &[u8]) -> Result<Option<PathBuf>> {
    let machines: Vec<MachineInspect> = serde_json::from_slice(output)
        .map_err(|e| discovery_error(format!("unreadable machine inspect output: {}", e)))?;

    Ok(machines
        .into_iter()
        .filter_map(|m| m.connection_info?.podman_socket)
        .map(|s| s.path)
        .find(|p| !p.is_empty())
        .map(PathBuf::from))
}

/// Extracts `host.remoteSocket.path` from `podman info --format json`.
pub fn parse_info_socket(output: &[u8]) -> Result<PathBuf> {
    let info: InfoOutput = serde_json::from_slice(output)
        .map_err(|e| discovery_error(format!("unreadable info output: {}", e)))?;

    let path = info
        .host
        .remote_socket
        .map(|s| s.path)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| discovery_error("podman info reports no remote socket"))?;

    Ok(strip_unix_scheme(&path))
}

/// Turns `unix:///run/podman.sock` into `/run/podman.sock`.
pub fn strip_unix_scheme(path: &str) -> PathBuf {
    PathBuf::from(path.strip_prefix("unix://").unwrap_or(path))
}

/// Runs `podman <args>` and returns stdout.
async fn run(binary: &str, args: &[&str]) -> Result<Vec<u8>> {
    debug!("Running {} {}", binary, args.join(" "));

    let output = tokio::time::timeout(DISCOVERY_TIMEOUT, Command::new(binary).args(args).output())
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("{} {}", binary, args.join(" ")),
            duration: DISCOVERY_TIMEOUT,
        })?
        .map_err(|e| discovery_error(format!("failed to run {}: {}", binary, e)))?;

    if !output.status.success() {
        return Err(discovery_error(format!(
            "{} {} exited with {}: {}",
            binary,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

/// API socket found through the CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredSocket {
    pub path: PathBuf,
    /// Major version reported by the CLI.
    pub major: u64,
}

/// Discovers the API socket through the podman CLI.
pub async fn discover_socket(binary: &str) -> Result<DiscoveredSocket> {
    let major = parse_major_version(&run(binary, &["version", "--format", "json"]).await?)?;
    debug!("Podman major version {}", major);

    if major >= PODMAN_MACHINE_MAJOR_VERSION {
        match run(binary, &["machine", "inspect"]).await {
            Ok(output) => {
                if let Some(socket) = parse_machine_socket(&output)? {
                    info!("Discovered podman machine socket {}", socket.display());
                    return Ok(DiscoveredSocket {
                        path: socket,
                        major,
                    });
                }
                debug!("No podman machine defined, using local service socket");
            }
            // Native Linux installs have no machine subcommand state.
            Err(e) => debug!("podman machine inspect unavailable: {}", e),
        }
    }

    let socket = parse_info_socket(&run(binary, &["info", "--format", "json"]).await?)?;
    info!("Discovered podman socket {}", socket.display());
    Ok(DiscoveredSocket {
        path: socket,
        major,
    })
}
