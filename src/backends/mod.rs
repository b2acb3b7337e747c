//! Container manager backends.
//!
//! Each backend implements [`ContainerManager`] against one daemon family.
//! Backends are selected by name at runtime through [`BackendRegistry`],
//! so integrators can register their own without touching this crate.

pub mod docker;
pub mod podman;
pub mod translate;

pub use self::docker::DockerManager;
pub use self::podman::PodmanManager;

use crate::config::EngineConfig;
use crate::constants::{DOCKER_BACKEND, PODMAN_BACKEND};
use crate::error::{Error, Result};
use crate::manager::ContainerManager;
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Constructs a connected backend from configuration.
pub type BackendFactory =
    Arc<dyn Fn(EngineConfig) -> BoxFuture<'static, Result<Arc<dyn ContainerManager>>> + Send + Sync>;

/// Registry of backend factories keyed by name.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in `docker` and `podman` backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DOCKER_BACKEND, |config| async move {
            let manager = DockerManager::connect(&config).await?;
            Ok(Arc::new(manager) as Arc<dyn ContainerManager>)
        });
        registry.register(PODMAN_BACKEND, |config| async move {
            let manager = PodmanManager::connect(&config).await?;
            Ok(Arc::new(manager) as Arc<dyn ContainerManager>)
        });
        registry
    }

    /// Registers (or replaces) a backend factory under `name`.
    pub fn register<F, Fut>(&mut self, name: &str, factory: F)
    where
        F: Fn(EngineConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn ContainerManager>>> + Send + 'static,
    {
        let factory: BackendFactory = Arc::new(move |config| Box::pin(factory(config)));
        self.factories.insert(name.to_string(), factory);
    }

    /// Returns registered backend names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Returns true if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Connects the backend registered under `name`.
    pub async fn connect(
        &self,
        name: &str,
        config: &EngineConfig,
    ) -> Result<Arc<dyn ContainerManager>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownBackend {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;

        let manager = factory(config.clone()).await?;
        info!("Connected to {} backend", manager.name());
        Ok(manager)
    }

    /// Connects the backend named by `config.runtime`.
    pub async fn connect_configured(&self, config: &EngineConfig) -> Result<Arc<dyn ContainerManager>> {
        self.connect(&config.runtime, config).await
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{ContainerConfig, PortBinding, Protocol, Volume, VolumeKind};
    use bollard::models::{Mount, MountBindOptionsPropagationEnum};
    use serde_json::{Value, json};

    fn config_with(volume: Volume) -> ContainerConfig {
        let mut config = ContainerConfig::new("alpine");
        config.volumes = vec![volume];
        config
    }

    fn docker_mount(config: &ContainerConfig) -> Mount {
        let body = docker::create_body(config).unwrap();
        body.host_config.unwrap().mounts.unwrap().remove(0)
    }

    fn podman_options(config: &ContainerConfig) -> Value {
        let spec = serde_json::to_value(podman::spec_generator(config).unwrap()).unwrap();
        if config.volumes[0].kind == VolumeKind::Volume {
            spec["volumes"][0]["Options"].clone()
        } else {
            spec["mounts"][0]["options"].clone()
        }
    }

    #[test]
    fn test_backends_agree_on_mounts() {
        struct Case {
            kind: VolumeKind,
            options: &'static [&'static str],
            read_only: bool,
            propagation: Option<MountBindOptionsPropagationEnum>,
            no_copy: bool,
            tmpfs: Option<(i64, i64)>,
            libpod: &'static [&'static str],
        }

        let cases = [
            Case {
                kind: VolumeKind::Bind,
                options: &[],
                read_only: false,
                propagation: None,
                no_copy: false,
                tmpfs: None,
                libpod: &[],
            },
            Case {
                kind: VolumeKind::Bind,
                options: &["readonly", "rshared"],
                read_only: true,
                propagation: Some(MountBindOptionsPropagationEnum::RSHARED),
                no_copy: false,
                tmpfs: None,
                libpod: &["ro", "rshared"],
            },
            Case {
                kind: VolumeKind::Volume,
                options: &["ro", "nocopy"],
                read_only: true,
                propagation: None,
                no_copy: true,
                tmpfs: None,
                libpod: &["ro", "nocopy"],
            },
            Case {
                kind: VolumeKind::Tmpfs,
                options: &["size=64m", "mode=1777"],
                read_only: false,
                propagation: None,
                no_copy: false,
                tmpfs: Some((64 * 1024 * 1024, 0o1777)),
                libpod: &["size=67108864", "mode=1777"],
            },
        ];

        for case in cases {
            let config = config_with(Volume {
                kind: case.kind,
                source: "data".into(),
                target: "/data".into(),
                options: case.options.iter().map(ToString::to_string).collect(),
            });

            let mount = docker_mount(&config);
            assert_eq!(mount.read_only, Some(case.read_only), "{:?}", case.options);
            assert_eq!(
                mount.bind_options.and_then(|b| b.propagation),
                case.propagation
            );
            assert_eq!(
                mount.volume_options.and_then(|v| v.no_copy).unwrap_or(false),
                case.no_copy
            );
            assert_eq!(
                mount
                    .tmpfs_options
                    .map(|t| (t.size_bytes.unwrap_or(0), t.mode.unwrap_or(0))),
                case.tmpfs
            );
            assert_eq!(podman_options(&config), json!(case.libpod));
        }
    }

    #[test]
    fn test_backends_reject_same_mount_options() {
        let rejected = [
            (VolumeKind::Bind, "z"),
            (VolumeKind::Bind, "size=1g"),
            (VolumeKind::Volume, "rshared"),
            (VolumeKind::Tmpfs, "nocopy"),
            (VolumeKind::Tmpfs, "mode=999"),
        ];

        for (kind, option) in rejected {
            let config = config_with(Volume {
                kind,
                source: String::new(),
                target: "/data".into(),
                options: vec![option.to_string()],
            });
            assert!(
                matches!(docker::create_body(&config), Err(Error::InvalidMount { .. })),
                "docker accepted {}",
                option
            );
            assert!(
                matches!(podman::spec_generator(&config), Err(Error::InvalidMount { .. })),
                "podman accepted {}",
                option
            );
        }
    }

    #[test]
    fn test_backends_publish_only_bound_ports() {
        let mut config = ContainerConfig::new("alpine");
        config.ports = vec![
            PortBinding::tcp(8080),
            PortBinding {
                container_port: 9090,
                host_port: None,
                protocol: Protocol::Udp,
            },
        ];

        let body = docker::create_body(&config).unwrap();
        let exposed = body.exposed_ports.unwrap();
        assert!(exposed.contains_key("8080/tcp"));
        assert!(exposed.contains_key("9090/udp"));
        let bindings = body.host_config.unwrap().port_bindings.unwrap();
        assert_eq!(bindings.keys().collect::<Vec<_>>(), vec!["8080/tcp"]);

        let spec = serde_json::to_value(podman::spec_generator(&config).unwrap()).unwrap();
        assert_eq!(
            spec["portmappings"],
            json!([{"container_port": 8080, "host_port": 8080, "protocol": "tcp"}])
        );
        assert_eq!(spec["expose"], json!({"9090": "udp"}));
    }

    #[test]
    fn test_defaults_registered() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["docker", "podman"]);
    }

    #[tokio::test]
    async fn test_unknown_backend_lists_available() {
        let registry = BackendRegistry::with_defaults();
        let err = match registry.connect("lxc", &EngineConfig::default()).await {
            Err(e) => e,
            Ok(_) => panic!("lxc should not be registered"),
        };
        match err {
            Error::UnknownBackend { name, available } => {
                assert_eq!(name, "lxc");
                assert_eq!(available, "docker, podman");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
