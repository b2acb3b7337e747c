//! Podman backend.
//!
//! Discovers the Podman API socket through the CLI (see [`discovery`]) and
//! drives the libpod REST API over it. Multi-platform builds use libpod
//! manifest lists (see [`crate::multiarch::assemble`]).

pub mod client;
pub mod discovery;
pub mod stream;

pub use self::client::LibpodClient;
pub use self::stream::{FrameDecoder, StreamKind};

use self::client::{Payload, encode, query};
use crate::archive;
use crate::backends::translate::{self, non_empty};
use crate::config::EngineConfig;
use crate::constants::{
    DOCKERFILE_NAME, LIBPOD_API_MAJOR_VERSION, PODMAN_BACKEND, PODMAN_BINARY,
    REGISTRY_AUTH_HEADER, STOP_TIMEOUT_SECS,
};
use crate::credentials::RegistryCredentials;
use crate::error::{Error, Result};
use crate::manager::{
    BuildOutput, CommitOptions, ContainerConfig, ContainerDetails, ContainerManager,
    ImageDetails, ImageSummary, ManagedContainer, MultiArchOutput, MultiArchRequest,
    OutputStream, Signal, VolumeKind, WaitCondition,
};
use crate::multiarch::{self, ManifestBuilder, PlatformBuilder};
use crate::platform::PlatformSpec;
use crate::reference::ImageReference;
use async_trait::async_trait;
use futures_util::StreamExt;
use http_body_util::BodyExt;
use hyper::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Podman backend speaking the libpod API.
pub struct PodmanManager {
    client: LibpodClient,
}

impl PodmanManager {
    /// Connects to the configured socket, discovering it when unset.
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let (socket, discovered_major) = match &config.socket {
            Some(socket) => (socket.clone(), None),
            None => {
                let discovered = discovery::discover_socket(PODMAN_BINARY).await?;
                (discovered.path, Some(discovered.major))
            }
        };

        let client = LibpodClient::new(&socket, config.request_timeout());
        let major = match client.server_major_version().await {
            Ok(major) => major,
            Err(e @ Error::Connection { .. }) => return Err(e),
            Err(e) => {
                let fallback = discovered_major.unwrap_or(LIBPOD_API_MAJOR_VERSION);
                warn!("Podman server version unknown ({}), assuming {}", e, fallback);
                fallback
            }
        };

        let manager = Self {
            client: client.with_major_version(major),
        };
        manager.ping().await?;
        info!(
            "Podman {} service reachable at {} (API {})",
            major,
            socket.display(),
            manager.client.api_version()
        );
        Ok(manager)
    }

    /// Wraps an existing client without pinging.
    pub fn from_client(client: LibpodClient) -> Self {
        Self { client }
    }

    fn auth_headers(registry_auth: &str) -> Result<Vec<(&'static str, String)>> {
        let creds = RegistryCredentials::decode(registry_auth)?;
        if creds.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![(REGISTRY_AUTH_HEADER, creds.encode()?)])
    }

    async fn image_id(&self, reference: &str) -> Result<String> {
        Ok(self.inspect_image(reference).await?.id)
    }
}

// =============================================================================
// libpod Types
// =============================================================================

#[derive(Debug, Serialize)]
struct SpecMount {
    destination: String,
    source: String,
    #[serde(rename = "type")]
    kind: String,
    options: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct NamedVolume {
    name: String,
    dest: String,
    options: Vec<String>,
}

#[derive(Debug, Serialize)]
struct PortMapping {
    container_port: u16,
    host_port: u16,
    protocol: String,
}

/// Subset of libpod's `SpecGenerator`.
#[derive(Debug, Serialize)]
pub(crate) struct SpecGenerator {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entrypoint: Option<Vec<String>>,
    env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    work_dir: Option<String>,
    terminal: bool,
    mounts: Vec<SpecMount>,
    volumes: Vec<NamedVolume>,
    portmappings: Vec<PortMapping>,
    /// Ports exposed without a host binding.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    expose: BTreeMap<u16, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_limits: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdResponse {
    id: String,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectContainer {
    id: String,
    name: String,
    image: String,
    image_name: String,
    state: InspectState,
    config: InspectConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectState {
    status: String,
    running: bool,
    exit_code: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectConfig {
    env: Vec<String>,
    working_dir: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct LibpodImageSummary {
    id: String,
    repo_tags: Option<Vec<String>>,
    size: i64,
    created: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct LibpodImage {
    id: String,
    repo_tags: Option<Vec<String>>,
    os: String,
    architecture: String,
    variant: Option<String>,
    size: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProgressLine {
    stream: Option<String>,
    status: Option<String>,
    error: Option<String>,
}

/// Collects a libpod progress stream (concatenated JSON objects) into a
/// log. The first `error` object aborts with its message.
fn progress_log(body: &[u8]) -> std::result::Result<String, String> {
    let mut log = String::new();
    for line in serde_json::Deserializer::from_slice(body).into_iter::<ProgressLine>() {
        let line = line.map_err(|e| format!("unreadable progress stream: {}", e))?;
        if let Some(error) = line.error.filter(|e| !e.is_empty()) {
            return Err(error);
        }
        if let Some(text) = line.stream.or(line.status) {
            log.push_str(&text);
            if !text.ends_with('\n') {
                log.push('\n');
            }
        }
    }
    Ok(log)
}

fn libpod_condition(condition: WaitCondition) -> &'static str {
    match condition {
        WaitCondition::NotRunning => "stopped",
        WaitCondition::NextExit => "exited",
        WaitCondition::Removed => "removing",
    }
}

fn container_error(id: &str, err: Error) -> Error {
    if err.is_not_found() {
        Error::ContainerNotFound(id.to_string())
    } else {
        err
    }
}

fn image_error(reference: &str, err: Error) -> Error {
    if err.is_not_found() {
        Error::ImageNotFound(reference.to_string())
    } else {
        err
    }
}

fn is_status(err: &Error, code: u16) -> bool {
    matches!(err, Error::Api { status, .. } if *status == code)
}

pub(crate) fn spec_generator(config: &ContainerConfig) -> Result<SpecGenerator> {
    let env = translate::environment_map(config)?;

    let mut mounts = Vec::new();
    let mut volumes = Vec::new();
    for volume in &config.volumes {
        let options = translate::mount_options(volume)?.libpod_options();
        match volume.kind {
            VolumeKind::Volume => volumes.push(NamedVolume {
                name: volume.source.clone(),
                dest: volume.target.clone(),
                options,
            }),
            VolumeKind::Bind | VolumeKind::Tmpfs => mounts.push(SpecMount {
                destination: volume.target.clone(),
                source: if volume.kind == VolumeKind::Tmpfs && volume.source.is_empty() {
                    "tmpfs".to_string()
                } else {
                    volume.source.clone()
                },
                kind: volume.kind.as_str().to_string(),
                options,
            }),
        }
    }

    let mut portmappings = Vec::new();
    let mut expose = BTreeMap::new();
    for port in &config.ports {
        match port.host_port {
            Some(host_port) => portmappings.push(PortMapping {
                container_port: port.container_port,
                host_port,
                protocol: port.protocol.as_str().to_string(),
            }),
            None => {
                expose.insert(port.container_port, port.protocol.as_str().to_string());
            }
        }
    }

    let mut limits = serde_json::Map::new();
    if let Some(memory) = config.memory_bytes {
        limits.insert("memory".into(), json!({ "limit": memory }));
    }
    if let Some(cpus) = config.cpus {
        limits.insert(
            "cpu".into(),
            json!({
                "quota": translate::cpu_quota(cpus),
                "period": crate::constants::CPU_PERIOD_MICROS,
            }),
        );
    }

    Ok(SpecGenerator {
        name: Some(translate::container_name(config)),
        image: config.image.clone(),
        command: non_empty(config.command.clone()),
        entrypoint: non_empty(config.entrypoint.clone()),
        env,
        work_dir: config.working_dir.clone(),
        terminal: config.tty,
        mounts,
        volumes,
        portmappings,
        expose,
        resource_limits: (!limits.is_empty()).then_some(serde_json::Value::Object(limits)),
    })
}

// =============================================================================
// ContainerManager
// =============================================================================

#[async_trait]
impl ContainerManager for PodmanManager {
    fn name(&self) -> &str {
        PODMAN_BACKEND
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .request(Method::GET, "/_ping", Payload::Empty, &[])
            .await
            .map_err(|e| match e {
                e @ Error::Connection { .. } => e,
                other => Error::Connection {
                    backend: PODMAN_BACKEND.to_string(),
                    endpoint: self.client.socket_path().display().to_string(),
                    reason: other.to_string(),
                },
            })?;
        Ok(())
    }

    async fn create_container(
        &self,
        config: ContainerConfig,
        registry_auth: &str,
    ) -> Result<String> {
        if let Some(platform) = config.target_platform() {
            self.pull_image(&config.image, Some(platform), registry_auth)
                .await?;
        }

        let spec = spec_generator(&config)?;
        let name = spec.name.clone().unwrap_or_default();
        let response: IdResponse = self
            .client
            .post_json("/containers/create", Payload::json(&spec)?)
            .await
            .map_err(|e| image_error(&config.image, e))?;

        for warning in response.warnings.unwrap_or_default() {
            warn!("Container {}: {}", name, warning);
        }
        info!("Created container {} ({})", name, response.id);
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        match self
            .client
            .post(&format!("/containers/{}/start", encode(id)), Payload::Empty)
            .await
        {
            Ok(()) => {}
            // Already running.
            Err(e) if is_status(&e, 304) => {}
            Err(e) => return Err(container_error(id, e)),
        }
        debug!("Started container {}", id);
        Ok(())
    }

    async fn stop_container(&self, id: &str, signal: Signal) -> Result<()> {
        let kill = format!(
            "/containers/{}/kill{}",
            encode(id),
            query(&[("signal", signal.as_name())])
        );
        match self.client.post(&kill, Payload::Empty).await {
            Ok(()) => {}
            // Not running.
            Err(e) if is_status(&e, 409) => return Ok(()),
            Err(e) => return Err(container_error(id, e)),
        }

        let timeout = STOP_TIMEOUT_SECS.to_string();
        let stop = format!(
            "/containers/{}/stop{}",
            encode(id),
            query(&[("timeout", timeout.as_str())])
        );
        match self.client.post(&stop, Payload::Empty).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) => Err(container_error(id, e)),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let path = format!(
            "/containers/{}{}",
            encode(id),
            query(&[("force", "true"), ("v", "true")])
        );
        self.client
            .delete(&path)
            .await
            .map_err(|e| container_error(id, e))?;
        debug!("Removed container {}", id);
        Ok(())
    }

    async fn exec_container(
        &self,
        id: &str,
        cmd: &[String],
        attach_output: bool,
    ) -> Result<OutputStream> {
        let exec: IdResponse = self
            .client
            .post_json(
                &format!("/containers/{}/exec", encode(id)),
                Payload::json(&json!({
                    "Cmd": cmd,
                    "AttachStdout": attach_output,
                    "AttachStderr": attach_output,
                }))?,
            )
            .await
            .map_err(|e| container_error(id, e))?;

        let start = format!("/exec/{}/start", encode(&exec.id));
        let payload = Payload::json(&json!({ "Detach": !attach_output, "Tty": false }))?;

        if !attach_output {
            self.client.post(&start, payload).await?;
            return Ok(futures_util::stream::empty().boxed());
        }

        let body = self
            .client
            .request_stream(Method::POST, &start, payload, &[])
            .await?;

        let output = futures_util::stream::unfold(
            (body, FrameDecoder::new(), false),
            |(mut body, mut decoder, mut done)| async move {
                loop {
                    if let Some((_, chunk)) = decoder.next_frame() {
                        return Some((Ok(chunk), (body, decoder, done)));
                    }
                    if done {
                        return None;
                    }
                    match body.frame().await {
                        Some(Ok(frame)) => {
                            if let Ok(data) = frame.into_data() {
                                decoder.push(&data);
                            }
                        }
                        Some(Err(e)) => {
                            let err = Error::backend(PODMAN_BACKEND, e);
                            return Some((Err(err), (body, decoder, true)));
                        }
                        None => {
                            done = true;
                            if let Some(rest) = decoder.finish() {
                                return Some((Ok(rest), (body, decoder, done)));
                            }
                        }
                    }
                }
            },
        );
        Ok(output.boxed())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        let inspect: InspectContainer = self
            .client
            .get_json(&format!("/containers/{}/json", encode(id)))
            .await
            .map_err(|e| container_error(id, e))?;

        let platform = if inspect.image.is_empty() {
            None
        } else {
            match self.inspect_image(&inspect.image).await {
                Ok(image) => Some(image.platform()),
                Err(e) => {
                    debug!("Image {} of container {} not inspectable: {}", inspect.image, id, e);
                    None
                }
            }
        };

        Ok(ContainerDetails {
            container: ManagedContainer {
                id: if inspect.id.is_empty() { id.to_string() } else { inspect.id },
                image: inspect.image_name,
                image_id: inspect.image,
                names: if inspect.name.is_empty() { Vec::new() } else { vec![inspect.name] },
            },
            status: inspect.state.status,
            running: inspect.state.running,
            exit_code: inspect.state.exit_code,
            env: inspect.config.env,
            working_dir: Some(inspect.config.working_dir).filter(|w| !w.is_empty()),
            platform,
        })
    }

    async fn wait_container(&self, id: &str, condition: WaitCondition) -> Result<i64> {
        let path = format!(
            "/containers/{}/wait{}",
            encode(id),
            query(&[("condition", libpod_condition(condition))])
        );
        let body = self
            .client
            .request(Method::POST, &path, Payload::Empty, &[])
            .await
            .map_err(|e| container_error(id, e))?;

        let text = String::from_utf8_lossy(&body);
        text.trim().parse().map_err(|_| {
            Error::backend(PODMAN_BACKEND, format!("unexpected wait response '{}'", text.trim()))
        })
    }

    async fn commit_container(&self, id: &str, options: CommitOptions) -> Result<String> {
        let reference: ImageReference = options.reference.parse()?;
        let repo = reference.name();

        let mut params = vec![
            ("container", id),
            ("repo", repo.as_str()),
            ("tag", reference.tag_or_latest()),
            ("pause", "true"),
        ];
        if let Some(comment) = &options.comment {
            params.push(("comment", comment.as_str()));
        }
        for change in &options.changes {
            params.push(("changes", change.as_str()));
        }

        let response: IdResponse = self
            .client
            .post_json(&format!("/commit{}", query(&params)), Payload::Empty)
            .await
            .map_err(|e| container_error(id, e))?;
        info!("Committed {} as {} ({})", id, reference, response.id);
        Ok(response.id)
    }

    async fn upload_archive(&self, id: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()> {
        let path = format!(
            "/containers/{}/archive{}",
            encode(id),
            query(&[("path", dest_dir)])
        );
        self.client
            .request(Method::PUT, &path, Payload::Tar(archive), &[])
            .await
            .map_err(|e| container_error(id, e))?;
        Ok(())
    }

    async fn download_archive(&self, id: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let request = format!(
            "/containers/{}/archive{}",
            encode(id),
            query(&[("path", path)])
        );
        match self
            .client
            .request(Method::GET, &request, Payload::Empty, &[])
            .await
        {
            Ok(body) => Ok(Some(body.to_vec())),
            // 404 covers both a missing path and a missing container.
            Err(e) if e.is_not_found() => {
                self.inspect_container(id).await?;
                debug!("{} not present in {}", path, id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let images: Vec<LibpodImageSummary> = self.client.get_json("/images/json").await?;
        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                repo_tags: image.repo_tags.unwrap_or_default(),
                size: image.size,
                created: chrono::DateTime::from_timestamp(image.created, 0),
            })
            .collect())
    }

    async fn pull_image(
        &self,
        reference: &str,
        platform: Option<&PlatformSpec>,
        registry_auth: &str,
    ) -> Result<String> {
        let mut params = vec![("reference", reference), ("policy", "always")];
        if let Some(platform) = platform {
            params.push(("os", platform.os()));
            params.push(("arch", platform.architecture()));
            if let Some(variant) = platform.variant() {
                params.push(("variant", variant));
            }
        }

        info!(
            "Pulling {}{}",
            reference,
            platform.map(|p| format!(" for {}", p)).unwrap_or_default()
        );

        let body = self
            .client
            .request(
                Method::POST,
                &format!("/images/pull{}", query(&params)),
                Payload::Empty,
                &Self::auth_headers(registry_auth)?,
            )
            .await
            .map_err(|e| image_error(reference, e))?;

        progress_log(&body).map_err(|reason| Error::backend(PODMAN_BACKEND, reason))
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        let target: ImageReference = target.parse()?;
        let repo = target.name();
        let path = format!(
            "/images/{}/tag{}",
            encode(source),
            query(&[("repo", repo.as_str()), ("tag", target.tag_or_latest())])
        );
        self.client
            .post(&path, Payload::Empty)
            .await
            .map_err(|e| image_error(source, e))?;
        debug!("Tagged {} as {}", source, target);
        Ok(())
    }

    async fn push_image(&self, reference: &str, registry_auth: &str) -> Result<String> {
        info!("Pushing {}", reference);
        let path = format!(
            "/images/{}/push{}",
            encode(reference),
            query(&[("destination", reference)])
        );
        let body = self
            .client
            .request(
                Method::POST,
                &path,
                Payload::Empty,
                &Self::auth_headers(registry_auth)?,
            )
            .await
            .map_err(|e| image_error(reference, e))?;

        progress_log(&body).map_err(|reason| Error::backend(PODMAN_BACKEND, reason))
    }

    async fn remove_image(&self, reference: &str, force: bool) -> Result<()> {
        let path = format!(
            "/images/{}{}",
            encode(reference),
            query(&[("force", if force { "true" } else { "false" })])
        );
        self.client
            .delete(&path)
            .await
            .map_err(|e| image_error(reference, e))?;
        debug!("Removed {}", reference);
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails> {
        let image: LibpodImage = self
            .client
            .get_json(&format!("/images/{}/json", encode(reference)))
            .await
            .map_err(|e| image_error(reference, e))?;

        Ok(ImageDetails {
            id: image.id,
            repo_tags: image.repo_tags.unwrap_or_default(),
            os: image.os,
            architecture: image.architecture,
            variant: image.variant.filter(|v| !v.is_empty()),
            size: image.size,
        })
    }

    async fn build_image(
        &self,
        dockerfile: &[u8],
        image_name: &str,
        platform: Option<&PlatformSpec>,
    ) -> Result<BuildOutput> {
        self.build_for_platform(dockerfile, None, image_name, platform)
            .await
    }

    async fn build_multi_arch_image(&self, request: MultiArchRequest) -> Result<MultiArchOutput> {
        multiarch::assemble(self, &request).await
    }
}

// =============================================================================
// Builds and Manifests
// =============================================================================

#[async_trait]
impl PlatformBuilder for PodmanManager {
    async fn build_for_platform(
        &self,
        dockerfile: &[u8],
        context_dir: Option<&Path>,
        tag: &str,
        platform: Option<&PlatformSpec>,
    ) -> Result<BuildOutput> {
        let dockerfile = dockerfile.to_vec();
        let context_dir = context_dir.map(Path::to_path_buf);
        let context = tokio::task::spawn_blocking(move || {
            archive::build_context(&dockerfile, context_dir.as_deref())
        })
        .await
        .map_err(|e| Error::Internal(format!("context archive task failed: {}", e)))??;

        let platform_str = platform.map(ToString::to_string);
        let mut params = vec![("dockerfile", DOCKERFILE_NAME), ("t", tag), ("rm", "true")];
        if let Some(platform) = &platform_str {
            params.push(("platform", platform.as_str()));
        }

        info!("Building {}", tag);
        let body = self
            .client
            .request(
                Method::POST,
                &format!("/build{}", query(&params)),
                Payload::Tar(context),
                &[],
            )
            .await
            .map_err(|e| Error::BuildFailed {
                image: tag.to_string(),
                reason: e.to_string(),
            })?;

        let log = progress_log(&body).map_err(|reason| Error::BuildFailed {
            image: tag.to_string(),
            reason,
        })?;
        let image_id = self.image_id(tag).await?;
        Ok(BuildOutput { log, image_id })
    }
}

#[async_trait]
impl ManifestBuilder for PodmanManager {
    async fn create_manifest(&self, name: &str) -> Result<String> {
        let path = format!("/manifests/{}{}", encode(name), query(&[("amend", "true")]));
        let response: IdResponse = self.client.post_json(&path, Payload::Empty).await?;
        Ok(response.id)
    }

    async fn add_to_manifest(&self, list: &str, image: &str) -> Result<()> {
        // Local images need the storage transport; bare names resolve remotely.
        let payload = Payload::json(&json!({
            "operation": "update",
            "images": [format!("containers-storage:{}", image)],
        }))?;
        self.client
            .request(
                Method::PUT,
                &format!("/manifests/{}", encode(list)),
                payload,
                &[],
            )
            .await?;
        debug!("Added {} to manifest {}", image, list);
        Ok(())
    }

    async fn push_manifest(
        &self,
        list: &str,
        destination: &str,
        registry_auth: &str,
    ) -> Result<String> {
        let path = format!(
            "/manifests/{}/registry/{}{}",
            encode(list),
            encode(destination),
            query(&[("all", "true")])
        );
        let body = self
            .client
            .request(
                Method::POST,
                &path,
                Payload::Empty,
                &Self::auth_headers(registry_auth)?,
            )
            .await?;

        // Push returns either a progress stream or the manifest digest.
        match progress_log(&body) {
            Ok(log) if !log.is_empty() => Ok(log),
            Ok(_) => Ok(format!("{}\n", String::from_utf8_lossy(&body).trim())),
            Err(reason) => Err(Error::backend(PODMAN_BACKEND, reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{PortBinding, Volume};

    #[test]
    fn test_progress_log_collects_stream() {
        let body = br#"{"stream":"STEP 1/2: FROM alpine\n"}{"stream":"STEP 2/2: RUN true"}{"aux":{"ID":"sha256:abc"}}"#;
        assert_eq!(
            progress_log(body).unwrap(),
            "STEP 1/2: FROM alpine\nSTEP 2/2: RUN true\n"
        );
    }

    #[test]
    fn test_progress_log_surfaces_error() {
        let body = br#"{"stream":"pulling\n"}{"error":"manifest unknown"}"#;
        assert_eq!(progress_log(body).unwrap_err(), "manifest unknown");
    }

    #[test]
    fn test_spec_generator() {
        let mut config = ContainerConfig::new("alpine");
        config.name = Some("job".into());
        config.env = vec!["A=1".into()];
        config.secrets.insert("TOKEN".into(), "t".into());
        config.ports = vec![PortBinding::tcp(8080)];
        config.volumes = vec![
            Volume::bind("/src", "/work"),
            Volume {
                kind: VolumeKind::Volume,
                source: "cache".into(),
                target: "/cache".into(),
                options: Vec::new(),
            },
            Volume::bind("/out", "/out"),
        ];
        config.memory_bytes = Some(512 * 1024 * 1024);
        config.cpus = Some(0.5);

        let spec = serde_json::to_value(spec_generator(&config).unwrap()).unwrap();
        assert_eq!(spec["name"], "job");
        assert_eq!(spec["env"]["TOKEN"], "t");
        assert_eq!(spec["mounts"][0]["destination"], "/work");
        assert_eq!(spec["mounts"][1]["destination"], "/out");
        assert_eq!(spec["volumes"][0]["Name"], "cache");
        assert_eq!(spec["portmappings"][0]["container_port"], 8080);
        assert_eq!(spec["resource_limits"]["cpu"]["quota"], 50_000);
        assert_eq!(spec["resource_limits"]["memory"]["limit"], 536_870_912);
    }

    #[test]
    fn test_wait_conditions() {
        assert_eq!(libpod_condition(WaitCondition::NotRunning), "stopped");
        assert_eq!(libpod_condition(WaitCondition::Removed), "removing");
    }
}
