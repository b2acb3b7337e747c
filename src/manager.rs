//! ContainerManager trait - the capability contract every backend implements.
//!
//! Build steps, the multi-arch assembler and external integrations depend
//! only on this trait, never on a backend client directly.
//!
//! # Lifecycle
//!
//! ```text
//! create_container(config) → start_container(id) → [exec / copy / wait]
//!     → stop_container(id) → remove_container(id)
//! ```
//!
//! # File Transfer
//!
//! All copies go through tar archives (see [`crate::archive`]). Backends
//! implement two primitives, [`ContainerManager::upload_archive`] and
//! [`ContainerManager::download_archive`]; the copy helpers are provided
//! on top of them so both backends share the exact same entry naming.
//!
//! # Concurrency
//!
//! Implementations are `Send + Sync` and are shared behind an `Arc` by every
//! concurrently running build step. Calls on independent container IDs
//! must not interfere.

use crate::archive;
use crate::error::{Error, Result};
use crate::platform::{Platform, PlatformSpec};
use crate::probe;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Stream of output chunks from an exec session.
pub type OutputStream = BoxStream<'static, Result<Bytes>>;

// =============================================================================
// Signals
// =============================================================================

/// Signal to send to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Signal {
    /// SIGTERM (graceful shutdown).
    #[default]
    Term,
    /// SIGKILL (force kill).
    Kill,
    /// SIGHUP (hangup).
    Hup,
    /// SIGINT (interrupt).
    Int,
    /// SIGUSR1.
    Usr1,
    /// SIGUSR2.
    Usr2,
}

impl Signal {
    /// Returns the signal name as daemons expect it (e.g. `SIGTERM`).
    pub fn as_name(&self) -> &'static str {
        match self {
            Self::Term => "SIGTERM",
            Self::Kill => "SIGKILL",
            Self::Hup => "SIGHUP",
            Self::Int => "SIGINT",
            Self::Usr1 => "SIGUSR1",
            Self::Usr2 => "SIGUSR2",
        }
    }

    /// Parses from signal name (e.g., "SIGTERM", "TERM", "15").
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_uppercase();
        let s = s.strip_prefix("SIG").unwrap_or(&s);
        match s {
            "TERM" | "15" => Some(Self::Term),
            "KILL" | "9" => Some(Self::Kill),
            "HUP" | "1" => Some(Self::Hup),
            "INT" | "2" => Some(Self::Int),
            "USR1" | "10" => Some(Self::Usr1),
            "USR2" | "12" => Some(Self::Usr2),
            _ => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_name())
    }
}

// =============================================================================
// Container Configuration
// =============================================================================

/// Kind of mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    /// Host path bind mount.
    #[default]
    Bind,
    /// Named volume.
    Volume,
    /// In-memory filesystem.
    Tmpfs,
}

impl VolumeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bind => "bind",
            Self::Volume => "volume",
            Self::Tmpfs => "tmpfs",
        }
    }
}

/// One bind/volume mount. Mount order is preserved end-to-end.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Volume {
    pub kind: VolumeKind,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub options: Vec<String>,
}

impl Volume {
    /// Bind mount of a host path.
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: VolumeKind::Bind,
            source: source.into(),
            target: target.into(),
            options: Vec::new(),
        }
    }
}

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// Exposed container port, optionally published on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    #[serde(default)]
    pub host_port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortBinding {
    /// TCP port published on the same host port.
    pub fn tcp(port: u16) -> Self {
        Self {
            container_port: port,
            host_port: Some(port),
            protocol: Protocol::Tcp,
        }
    }

    /// `"<port>/<proto>"` key used by daemon APIs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol.as_str())
    }
}

/// Validates a readiness probe response (status code and body).
pub type ProbeValidator = Arc<dyn Fn(u16, &[u8]) -> bool + Send + Sync>;

/// HTTP readiness probe polled after a container starts.
#[derive(Clone)]
pub struct ReadinessProbe {
    /// `http://host:port/path` endpoint.
    pub endpoint: String,
    /// Overall deadline for the container to become ready.
    pub timeout: Duration,
    /// Custom acceptance check; defaults to any 2xx status.
    pub validator: Option<ProbeValidator>,
}

impl ReadinessProbe {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            validator: None,
        }
    }

    pub fn with_validator(
        mut self,
        validator: impl Fn(u16, &[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Applies the validator, or the 2xx default.
    pub fn accepts(&self, status: u16, body: &[u8]) -> bool {
        match &self.validator {
            Some(validator) => validator(status, body),
            None => (200..300).contains(&status),
        }
    }
}

impl std::fmt::Debug for ReadinessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessProbe")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// Declarative container specification.
///
/// Built once per container and passed by value into
/// [`ContainerManager::create_container`].
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Container name; generated when unset.
    pub name: Option<String>,
    /// Image reference.
    pub image: String,
    /// Command (arguments to the entrypoint).
    pub command: Vec<String>,
    /// Entrypoint override.
    pub entrypoint: Vec<String>,
    /// Environment as `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Working directory.
    pub working_dir: Option<String>,
    /// Memory limit in bytes.
    pub memory_bytes: Option<i64>,
    /// CPU limit in (fractional) CPUs.
    pub cpus: Option<f64>,
    /// Exposed ports.
    pub ports: Vec<PortBinding>,
    /// Mounts, in order.
    pub volumes: Vec<Volume>,
    /// Secrets injected into the environment.
    pub secrets: BTreeMap<String, String>,
    /// Readiness probe.
    pub probe: Option<ReadinessProbe>,
    /// Allocate a TTY.
    pub tty: bool,
    /// Target platform; its container platform is pulled before creation.
    pub platform: Option<Platform>,
}

impl ContainerConfig {
    /// Creates a config for `image` with everything else defaulted.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// The container platform to pull for, if any.
    pub fn target_platform(&self) -> Option<&PlatformSpec> {
        self.platform.as_ref().map(|p| p.container())
    }
}

// =============================================================================
// Results
// =============================================================================

/// Backend-assigned identity of a created container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManagedContainer {
    pub id: String,
    pub image: String,
    pub image_id: String,
    pub names: Vec<String>,
}

/// Resolved configuration of an existing container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerDetails {
    pub container: ManagedContainer,
    pub status: String,
    pub running: bool,
    pub exit_code: Option<i64>,
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    /// Platform of the image the container actually runs.
    pub platform: Option<PlatformSpec>,
}

/// Image listing entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub size: i64,
    pub created: Option<DateTime<Utc>>,
}

/// Detailed image metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageDetails {
    pub id: String,
    pub repo_tags: Vec<String>,
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
    pub size: i64,
}

impl ImageDetails {
    /// Platform of this image.
    pub fn platform(&self) -> PlatformSpec {
        let spec = PlatformSpec::new(&self.os, &self.architecture);
        match &self.variant {
            Some(v) if !v.is_empty() => spec.with_variant(v.clone()),
            _ => spec,
        }
    }
}

/// Condition to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitCondition {
    /// Container is not running (returns immediately if already stopped).
    #[default]
    NotRunning,
    /// Next exit after the call.
    NextExit,
    /// Container has been removed.
    Removed,
}

impl WaitCondition {
    /// Docker engine API spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRunning => "not-running",
            Self::NextExit => "next-exit",
            Self::Removed => "removed",
        }
    }
}

/// Options for committing a container to an image.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Target `repository:tag`.
    pub reference: String,
    pub comment: Option<String>,
    /// Dockerfile instructions applied on commit (e.g. `CMD ["app"]`).
    pub changes: Vec<String>,
}

/// Outcome of a single-platform image build.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub log: String,
    pub image_id: String,
}

/// Multi-platform build request.
#[derive(Debug, Clone, Default)]
pub struct MultiArchRequest {
    pub dockerfile: Vec<u8>,
    /// Final image reference; also the manifest list name.
    pub image_name: String,
    pub platforms: Vec<PlatformSpec>,
    /// Optional build context bundle (tar or tar.gz).
    pub context: Option<PathBuf>,
    /// base64 credential blob used for the push.
    pub registry_auth: String,
}

/// Outcome of a multi-platform build.
#[derive(Debug, Clone, Default)]
pub struct MultiArchOutput {
    pub log: String,
    /// One build ID per requested platform, in request order.
    pub image_ids: Vec<String>,
}

// =============================================================================
// ContainerManager Trait
// =============================================================================

/// Container runtime capability contract.
///
/// # Implementations
///
/// - `DockerManager`: daemon socket via a typed REST client
/// - `PodmanManager`: discovered socket via the libpod API
#[async_trait]
pub trait ContainerManager: Send + Sync {
    /// Returns the backend name.
    fn name(&self) -> &str;

    /// Checks connectivity with the daemon.
    async fn ping(&self) -> Result<()>;

    // =========================================================================
    // Containers
    // =========================================================================

    /// Creates a container and returns its ID.
    ///
    /// When `config` carries a platform, that platform's image is pulled
    /// first so the daemon never resolves a mismatched local image.
    async fn create_container(
        &self,
        config: ContainerConfig,
        registry_auth: &str,
    ) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stops a container, delivering `signal` first.
    async fn stop_container(&self, id: &str, signal: Signal) -> Result<()>;

    /// Force-removes a container and its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Runs `cmd` in a running container.
    ///
    /// With `attach_output` the returned stream yields stdout/stderr chunks
    /// until the command exits; otherwise it is empty and the command runs
    /// detached.
    async fn exec_container(
        &self,
        id: &str,
        cmd: &[String],
        attach_output: bool,
    ) -> Result<OutputStream>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails>;

    /// Blocks until `condition` holds and returns the exit code.
    async fn wait_container(&self, id: &str, condition: WaitCondition) -> Result<i64>;

    /// Commits a container's filesystem to a new image and returns its ID.
    async fn commit_container(&self, id: &str, options: CommitOptions) -> Result<String>;

    // =========================================================================
    // Archive Primitives
    // =========================================================================

    /// Extracts a tar archive inside the container at `dest_dir`.
    async fn upload_archive(&self, id: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()>;

    /// Downloads `path` as a tar archive; `Ok(None)` if it does not exist.
    async fn download_archive(&self, id: &str, path: &str) -> Result<Option<Vec<u8>>>;

    // =========================================================================
    // Images
    // =========================================================================

    async fn list_images(&self) -> Result<Vec<ImageSummary>>;

    /// Pulls `reference`, optionally for an explicit platform. Returns the
    /// pull progress log.
    async fn pull_image(
        &self,
        reference: &str,
        platform: Option<&PlatformSpec>,
        registry_auth: &str,
    ) -> Result<String>;

    async fn tag_image(&self, source: &str, target: &str) -> Result<()>;

    /// Pushes `reference`. Returns the push progress log.
    async fn push_image(&self, reference: &str, registry_auth: &str) -> Result<String>;

    async fn remove_image(&self, reference: &str, force: bool) -> Result<()>;

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails>;

    /// Builds an image from a Dockerfile.
    async fn build_image(
        &self,
        dockerfile: &[u8],
        image_name: &str,
        platform: Option<&PlatformSpec>,
    ) -> Result<BuildOutput>;

    /// Builds one image per platform and publishes them under one manifest
    /// list (see [`crate::multiarch`]).
    async fn build_multi_arch_image(&self, request: MultiArchRequest) -> Result<MultiArchOutput>;

    // =========================================================================
    // Provided Operations
    // =========================================================================

    /// Writes `content` to `dest_path` inside the container.
    async fn copy_content_to_container(
        &self,
        id: &str,
        content: &str,
        dest_path: &str,
    ) -> Result<()> {
        let (dir, name) = split_dest_path(dest_path)?;
        let archive = archive::archive_string(content, &name)?;
        self.upload_archive(id, &dir, archive).await
    }

    /// Copies one host file to `dest_path` inside the container.
    async fn copy_to_container(&self, id: &str, host_path: &Path, dest_path: &str) -> Result<()> {
        let (dir, name) = split_dest_path(dest_path)?;
        let host_path = host_path.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || archive::archive_file(&host_path, &name))
            .await
            .map_err(|e| Error::Internal(format!("archive task failed: {}", e)))??;
        self.upload_archive(id, &dir, archive).await
    }

    /// Copies a host directory tree into `dest_dir`, keeping relative paths.
    async fn copy_directory_to_container(
        &self,
        id: &str,
        host_dir: &Path,
        dest_dir: &str,
    ) -> Result<()> {
        let host_dir = host_dir.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || archive::archive_directory(&host_dir))
            .await
            .map_err(|e| Error::Internal(format!("archive task failed: {}", e)))??;
        self.upload_archive(id, dest_dir, archive).await
    }

    /// Reads one regular file out of the container.
    ///
    /// `Ok(None)` signals that the path does not exist, so callers can treat
    /// absence as a normal branch.
    async fn copy_file_from_container(&self, id: &str, path: &str) -> Result<Option<Vec<u8>>> {
        match self.download_archive(id, path).await? {
            Some(archive) => archive::read_single_file(&archive[..]).map(Some),
            None => Ok(None),
        }
    }

    /// Starts a container and waits for its readiness probe.
    async fn start_container_ready(&self, id: &str, probe: Option<&ReadinessProbe>) -> Result<()> {
        self.start_container(id).await?;
        if let Some(probe) = probe {
            probe::wait_ready(probe).await?;
        }
        Ok(())
    }
}

/// Splits a destination file path into `(parent_dir, file_name)`.
pub fn split_dest_path(dest_path: &str) -> Result<(String, String)> {
    if dest_path.ends_with('/') {
        return Err(Error::Archive(format!(
            "destination '{}' names a directory, not a file",
            dest_path
        )));
    }

    let path = Path::new(dest_path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::Archive(format!("destination '{}' has no file name", dest_path)))?;

    let dir = match path.parent().map(|p| p.to_string_lossy().to_string()) {
        Some(dir) if !dir.is_empty() => dir,
        _ => "/".to_string(),
    };

    Ok((dir, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_parsing() {
        assert_eq!(Signal::parse("SIGTERM"), Some(Signal::Term));
        assert_eq!(Signal::parse("TERM"), Some(Signal::Term));
        assert_eq!(Signal::parse("15"), Some(Signal::Term));
        assert_eq!(Signal::parse("sigkill"), Some(Signal::Kill));
        assert_eq!(Signal::parse("INVALID"), None);
    }

    #[test]
    fn test_split_dest_path() {
        assert_eq!(
            split_dest_path("/app/bin/run.sh").unwrap(),
            ("/app/bin".to_string(), "run.sh".to_string())
        );
        assert_eq!(
            split_dest_path("run.sh").unwrap(),
            ("/".to_string(), "run.sh".to_string())
        );
        assert!(split_dest_path("/app/").is_err());
    }

    #[test]
    fn test_probe_default_accepts_2xx() {
        let probe = ReadinessProbe::new("http://localhost:8080/health", Duration::from_secs(1));
        assert!(probe.accepts(204, b""));
        assert!(!probe.accepts(503, b""));

        let strict = probe.with_validator(|status, body| status == 200 && body == b"ok");
        assert!(strict.accepts(200, b"ok"));
        assert!(!strict.accepts(200, b"starting"));
    }

    #[test]
    fn test_port_key() {
        assert_eq!(PortBinding::tcp(8080).key(), "8080/tcp");
    }
}
