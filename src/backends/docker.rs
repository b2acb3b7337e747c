//! Docker backend.
//!
//! Talks to the Docker daemon socket through `bollard`'s typed REST client.
//! Multi-platform builds use the daemon's native builder (`docker buildx`)
//! since the engine API cannot assemble manifest lists itself.

use crate::archive;
use crate::backends::translate::{self, Propagation, non_empty};
use crate::config::EngineConfig;
use crate::constants::{DOCKER_BACKEND, DOCKER_DEFAULT_SOCKET, DOCKERFILE_NAME, STOP_TIMEOUT_SECS};
use crate::credentials::RegistryCredentials;
use crate::error::{Error, Result};
use crate::manager::{
    BuildOutput, CommitOptions, ContainerConfig, ContainerDetails, ContainerManager,
    ImageDetails, ImageSummary, ManagedContainer, MultiArchOutput, MultiArchRequest,
    OutputStream, Signal, Volume, VolumeKind, WaitCondition,
};
use crate::multiarch::{self, NativeMultiArch, PlatformBuilder};
use crate::platform::PlatformSpec;
use crate::reference::ImageReference;
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::errors::Error as BollardError;
use bollard::exec::{StartExecOptions, StartExecResults};
use bollard::models::{
    ContainerConfig as CommitConfig, ContainerCreateBody, ExecConfig, HostConfig, Mount,
    MountBindOptions, MountBindOptionsPropagationEnum, MountTmpfsOptions, MountTypeEnum,
    MountVolumeOptions, PortBinding as DockerPortBinding,
};
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CommitContainerOptionsBuilder, CreateContainerOptionsBuilder,
    CreateImageOptionsBuilder, DownloadFromContainerOptionsBuilder, InspectContainerOptions,
    ListImagesOptionsBuilder, PushImageOptionsBuilder, RemoveContainerOptionsBuilder,
    RemoveImageOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
    TagImageOptionsBuilder, UploadToContainerOptionsBuilder, WaitContainerOptionsBuilder,
};
use bollard::{API_DEFAULT_VERSION, Docker};
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt, stream};
use std::collections::HashMap;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Docker daemon backend.
pub struct DockerManager {
    docker: Docker,
    endpoint: String,
    /// Explicit socket, forwarded to the CLI for native multi-arch builds.
    host: Option<String>,
}

impl DockerManager {
    /// Connects to the configured socket (or local defaults) and pings it.
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        let (docker, endpoint, host) = match &config.socket {
            Some(socket) => {
                let path = socket.to_string_lossy().to_string();
                let docker =
                    Docker::connect_with_socket(&path, config.request_timeout_secs, API_DEFAULT_VERSION);
                (docker, path.clone(), Some(format!("unix://{}", path)))
            }
            None => {
                let docker = Docker::connect_with_local_defaults()
                    .map(|d| d.with_timeout(config.request_timeout()));
                (docker, DOCKER_DEFAULT_SOCKET.to_string(), None)
            }
        };

        let docker = docker.map_err(|e| connection_error(&endpoint, e))?;
        let manager = Self {
            docker,
            endpoint,
            host,
        };
        manager.ping().await?;
        info!("Docker daemon reachable at {}", manager.endpoint);
        Ok(manager)
    }

    /// Wraps an already-configured client without pinging.
    pub fn from_client(docker: Docker) -> Self {
        Self {
            docker,
            endpoint: DOCKER_DEFAULT_SOCKET.to_string(),
            host: None,
        }
    }

    async fn image_id(&self, reference: &str) -> Result<String> {
        Ok(self.inspect_image(reference).await?.id)
    }
}

// =============================================================================
// Error and Type Translation
// =============================================================================

fn connection_error(endpoint: &str, err: impl std::fmt::Display) -> Error {
    Error::Connection {
        backend: DOCKER_BACKEND.to_string(),
        endpoint: endpoint.to_string(),
        reason: err.to_string(),
    }
}

fn backend_error(err: BollardError) -> Error {
    Error::backend(DOCKER_BACKEND, err)
}

fn status_of(err: &BollardError) -> Option<u16> {
    match err {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

fn container_error(id: &str, err: BollardError) -> Error {
    match status_of(&err) {
        Some(404) => Error::ContainerNotFound(id.to_string()),
        _ => backend_error(err),
    }
}

fn image_error(reference: &str, err: BollardError) -> Error {
    match status_of(&err) {
        Some(404) => Error::ImageNotFound(reference.to_string()),
        _ => backend_error(err),
    }
}

fn credentials(registry_auth: &str) -> Result<Option<DockerCredentials>> {
    let creds = RegistryCredentials::decode(registry_auth)?;
    if creds.is_empty() {
        return Ok(None);
    }
    Ok(Some(DockerCredentials {
        username: Some(creds.username),
        password: Some(creds.password),
        serveraddress: creds.serveraddress,
        ..Default::default()
    }))
}

fn propagation(mode: Propagation) -> MountBindOptionsPropagationEnum {
    match mode {
        Propagation::Private => MountBindOptionsPropagationEnum::PRIVATE,
        Propagation::RPrivate => MountBindOptionsPropagationEnum::RPRIVATE,
        Propagation::Shared => MountBindOptionsPropagationEnum::SHARED,
        Propagation::RShared => MountBindOptionsPropagationEnum::RSHARED,
        Propagation::Slave => MountBindOptionsPropagationEnum::SLAVE,
        Propagation::RSlave => MountBindOptionsPropagationEnum::RSLAVE,
    }
}

fn mount(volume: &Volume) -> Result<Mount> {
    let options = translate::mount_options(volume)?;
    let mut mount = Mount {
        target: Some(volume.target.clone()),
        source: (!volume.source.is_empty()).then(|| volume.source.clone()),
        read_only: Some(options.read_only),
        ..Default::default()
    };

    match volume.kind {
        VolumeKind::Bind => {
            mount.typ = Some(MountTypeEnum::BIND);
            mount.bind_options = options.propagation.map(|mode| MountBindOptions {
                propagation: Some(propagation(mode)),
                ..Default::default()
            });
        }
        VolumeKind::Volume => {
            mount.typ = Some(MountTypeEnum::VOLUME);
            mount.volume_options = options.no_copy.then(|| MountVolumeOptions {
                no_copy: Some(true),
                ..Default::default()
            });
        }
        VolumeKind::Tmpfs => {
            mount.typ = Some(MountTypeEnum::TMPFS);
            if options.tmpfs_size.is_some() || options.tmpfs_mode.is_some() {
                mount.tmpfs_options = Some(MountTmpfsOptions {
                    size_bytes: options.tmpfs_size,
                    mode: options.tmpfs_mode.map(i64::from),
                    ..Default::default()
                });
            }
        }
    }
    Ok(mount)
}

pub(crate) fn create_body(config: &ContainerConfig) -> Result<ContainerCreateBody> {
    let env = translate::environment(config)?;
    let mounts = config.volumes.iter().map(mount).collect::<Result<Vec<_>>>()?;

    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for port in &config.ports {
        exposed_ports.insert(port.key(), HashMap::new());
        if let Some(host_port) = port.host_port {
            port_bindings.insert(
                port.key(),
                Some(vec![DockerPortBinding {
                    host_ip: None,
                    host_port: Some(host_port.to_string()),
                }]),
            );
        }
    }

    let host_config = HostConfig {
        mounts: non_empty(mounts),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        memory: config.memory_bytes,
        nano_cpus: config.cpus.map(translate::nano_cpus),
        ..Default::default()
    };

    Ok(ContainerCreateBody {
        image: Some(config.image.clone()),
        cmd: non_empty(config.command.clone()),
        entrypoint: non_empty(config.entrypoint.clone()),
        env: non_empty(env),
        working_dir: config.working_dir.clone(),
        tty: Some(config.tty),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    })
}

// =============================================================================
// ContainerManager
// =============================================================================

#[async_trait]
impl ContainerManager for DockerManager {
    fn name(&self) -> &str {
        DOCKER_BACKEND
    }

    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| connection_error(&self.endpoint, e))?;
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

        let name = translate::container_name(&config);
        let body = create_body(&config)?;

        let mut options = CreateContainerOptionsBuilder::default().name(&name);
        if let Some(platform) = config.target_platform() {
            options = options.platform(&platform.to_string());
        }

        let response = self
            .docker
            .create_container(Some(options.build()), body)
            .await
            .map_err(|e| image_error(&config.image, e))?;

        for warning in &response.warnings {
            warn!("Container {}: {}", name, warning);
        }
        info!("Created container {} ({})", name, response.id);
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| container_error(id, e))?;
        debug!("Started container {}", id);
        Ok(())
    }

    async fn stop_container(&self, id: &str, signal: Signal) -> Result<()> {
        let options = StopContainerOptionsBuilder::default()
            .signal(signal.as_name())
            .t(STOP_TIMEOUT_SECS)
            .build();
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(e) if status_of(&e) == Some(304) => Ok(()),
            Err(e) => Err(container_error(id, e)),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptionsBuilder::default()
            .force(true)
            .v(true)
            .build();
        self.docker
            .remove_container(id, Some(options))
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
        let exec = self
            .docker
            .create_exec(
                id,
                ExecConfig {
                    cmd: Some(cmd.to_vec()),
                    attach_stdout: Some(attach_output),
                    attach_stderr: Some(attach_output),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| container_error(id, e))?;

        let started = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: !attach_output,
                    ..Default::default()
                }),
            )
            .await
            .map_err(backend_error)?;

        match started {
            StartExecResults::Attached { output, .. } => Ok(output
                .map(|chunk| chunk.map(|log| log.into_bytes()).map_err(backend_error))
                .boxed()),
            StartExecResults::Detached => Ok(stream::empty().boxed()),
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| container_error(id, e))?;

        let config = response.config.unwrap_or_default();
        let state = response.state.unwrap_or_default();
        let image_id = response.image.unwrap_or_default();

        let platform = if image_id.is_empty() {
            None
        } else {
            match self.inspect_image(&image_id).await {
                Ok(image) => Some(image.platform()),
                Err(e) => {
                    debug!("Image {} of container {} not inspectable: {}", image_id, id, e);
                    None
                }
            }
        };

        Ok(ContainerDetails {
            container: ManagedContainer {
                id: response.id.unwrap_or_else(|| id.to_string()),
                image: config.image.unwrap_or_default(),
                image_id,
                names: response
                    .name
                    .map(|n| vec![n.trim_start_matches('/').to_string()])
                    .unwrap_or_default(),
            },
            status: state.status.map(|s| s.to_string()).unwrap_or_default(),
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
            env: config.env.unwrap_or_default(),
            working_dir: config.working_dir.filter(|w| !w.is_empty()),
            platform,
        })
    }

    async fn wait_container(&self, id: &str, condition: WaitCondition) -> Result<i64> {
        let options = WaitContainerOptionsBuilder::default()
            .condition(condition.as_str())
            .build();
        let mut responses = Box::pin(self.docker.wait_container(id, Some(options)));

        match responses.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits surface as an error carrying the code.
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(container_error(id, e)),
            None => Err(Error::backend(
                DOCKER_BACKEND,
                format!("wait on {} ended without a status", id),
            )),
        }
    }

    async fn commit_container(&self, id: &str, options: CommitOptions) -> Result<String> {
        let reference: ImageReference = options.reference.parse()?;

        let mut builder = CommitContainerOptionsBuilder::default()
            .container(id)
            .repo(&reference.name())
            .tag(reference.tag_or_latest())
            .pause(true);
        if let Some(comment) = &options.comment {
            builder = builder.comment(comment);
        }
        if !options.changes.is_empty() {
            builder = builder.changes(&options.changes.join("\n"));
        }

        self.docker
            .commit_container(builder.build(), CommitConfig::default())
            .await
            .map_err(|e| container_error(id, e))?;

        let image_id = self.image_id(&reference.to_string()).await?;
        info!("Committed {} as {} ({})", id, reference, image_id);
        Ok(image_id)
    }

    async fn upload_archive(&self, id: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptionsBuilder::default()
            .path(dest_dir)
            .build();
        self.docker
            .upload_to_container(id, Some(options), bollard::body_full(Bytes::from(archive)))
            .await
            .map_err(|e| container_error(id, e))
    }

    async fn download_archive(&self, id: &str, path: &str) -> Result<Option<Vec<u8>>> {
        let options = DownloadFromContainerOptionsBuilder::default()
            .path(path)
            .build();
        let mut chunks = Box::pin(self.docker.download_from_container(id, Some(options)));

        let mut archive = Vec::new();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => archive.extend_from_slice(&bytes),
                // 404 covers both a missing path and a missing container.
                Err(e) if status_of(&e) == Some(404) => {
                    self.inspect_container(id).await?;
                    debug!("{} not present in {}", path, id);
                    return Ok(None);
                }
                Err(e) => return Err(backend_error(e)),
            }
        }
        Ok(Some(archive))
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let options = ListImagesOptionsBuilder::default().all(false).build();
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(backend_error)?;

        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                repo_tags: image.repo_tags,
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
        let parsed: ImageReference = reference.parse()?;

        let mut options = CreateImageOptionsBuilder::default()
            .from_image(&parsed.name())
            .tag(parsed.digest().unwrap_or(parsed.tag_or_latest()));
        if let Some(platform) = platform {
            options = options.platform(&platform.to_string());
        }

        info!(
            "Pulling {}{}",
            reference,
            platform.map(|p| format!(" for {}", p)).unwrap_or_default()
        );

        let progress: Vec<_> = self
            .docker
            .create_image(Some(options.build()), None, credentials(registry_auth)?)
            .try_collect()
            .await
            .map_err(|e| image_error(reference, e))?;

        let mut log = String::new();
        for info in progress {
            if let Some(status) = info.status {
                match info.id {
                    Some(id) => log.push_str(&format!("{}: {}\n", id, status)),
                    None => log.push_str(&format!("{}\n", status)),
                }
            }
        }
        Ok(log)
    }

    async fn tag_image(&self, source: &str, target: &str) -> Result<()> {
        let target: ImageReference = target.parse()?;
        let options = TagImageOptionsBuilder::default()
            .repo(&target.name())
            .tag(target.tag_or_latest())
            .build();
        self.docker
            .tag_image(source, Some(options))
            .await
            .map_err(|e| image_error(source, e))?;
        debug!("Tagged {} as {}", source, target);
        Ok(())
    }

    async fn push_image(&self, reference: &str, registry_auth: &str) -> Result<String> {
        let parsed: ImageReference = reference.parse()?;
        let options = PushImageOptionsBuilder::default()
            .tag(parsed.tag_or_latest())
            .build();

        info!("Pushing {}", reference);
        let progress: Vec<_> = self
            .docker
            .push_image(&parsed.name(), Some(options), credentials(registry_auth)?)
            .try_collect()
            .await
            .map_err(|e| image_error(reference, e))?;

        Ok(progress
            .into_iter()
            .filter_map(|info| info.status)
            .map(|status| format!("{}\n", status))
            .collect())
    }

    async fn remove_image(&self, reference: &str, force: bool) -> Result<()> {
        let options = RemoveImageOptionsBuilder::default().force(force).build();
        let deleted = self
            .docker
            .remove_image(reference, Some(options), None)
            .await
            .map_err(|e| image_error(reference, e))?;
        debug!("Removed {} ({} layers)", reference, deleted.len());
        Ok(())
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails> {
        let image = self
            .docker
            .inspect_image(reference)
            .await
            .map_err(|e| image_error(reference, e))?;

        Ok(ImageDetails {
            id: image.id.unwrap_or_default(),
            repo_tags: image.repo_tags.unwrap_or_default(),
            os: image.os.unwrap_or_default(),
            architecture: image.architecture.unwrap_or_default(),
            variant: image.variant.filter(|v| !v.is_empty()),
            size: image.size.unwrap_or_default(),
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
        multiarch::assemble_native(self, &request).await
    }
}

// =============================================================================
// Builds
// =============================================================================

#[async_trait]
impl PlatformBuilder for DockerManager {
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

        let mut options = BuildImageOptionsBuilder::default()
            .dockerfile(DOCKERFILE_NAME)
            .t(tag)
            .rm(true);
        if let Some(platform) = platform {
            options = options.platform(&platform.to_string());
        }

        info!("Building {}", tag);
        let mut progress = Box::pin(self.docker.build_image(
            options.build(),
            None,
            Some(bollard::body_full(Bytes::from(context))),
        ));

        let mut log = String::new();
        while let Some(info) = progress.next().await {
            let info = info.map_err(|e| Error::BuildFailed {
                image: tag.to_string(),
                reason: e.to_string(),
            })?;
            if let Some(line) = info.stream.or(info.status) {
                log.push_str(&line);
            }
        }

        let image_id = self.image_id(tag).await?;
        Ok(BuildOutput { log, image_id })
    }
}

#[async_trait]
impl NativeMultiArch for DockerManager {
    async fn build_and_push(
        &self,
        dockerfile: &[u8],
        context_dir: Option<&Path>,
        image_name: &str,
        platforms: &[PlatformSpec],
    ) -> Result<String> {
        let scratch = tempfile::Builder::new().prefix("buildrig-buildx-").tempdir()?;
        let dockerfile_path = scratch.path().join(DOCKERFILE_NAME);
        tokio::fs::write(&dockerfile_path, dockerfile).await?;
        let context = context_dir.unwrap_or(scratch.path());

        let mut command = Command::new("docker");
        command
            .args(["buildx", "build", "--push", "--platform"])
            .arg(multiarch::platform_list(platforms))
            .arg("--tag")
            .arg(image_name)
            .arg("--file")
            .arg(&dockerfile_path)
            .arg(context);
        if let Some(host) = &self.host {
            command.env("DOCKER_HOST", host);
        }

        debug!("Running {:?}", command.as_std());
        let output = command.output().await.map_err(|e| Error::BuildFailed {
            image: image_name.to_string(),
            reason: format!("failed to run docker buildx: {}", e),
        })?;

        // buildx writes progress to stderr.
        let log = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(Error::BuildFailed {
                image: image_name.to_string(),
                reason: log.lines().last().unwrap_or("docker buildx failed").to_string(),
            });
        }
        Ok(log)
    }

    async fn pull_platform(
        &self,
        image_name: &str,
        platform: &PlatformSpec,
        registry_auth: &str,
    ) -> Result<(String, String)> {
        let log = self
            .pull_image(image_name, Some(platform), registry_auth)
            .await?;
        let image_id = self.image_id(image_name).await?;
        Ok((log, image_id))
    }
}
