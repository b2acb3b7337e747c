//! # buildrig
//!
//! **Container Build Engine**
//!
//! Runs build pipelines by executing commands inside ephemeral containers
//! across interchangeable container runtimes, and assembles
//! multi-architecture images from per-platform builds.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            buildrig                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                     StepScheduler                           │    │
//! │  │   sync steps inline │ async steps on a JoinSet │ images()   │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │                              │                                      │
//! │  ┌───────────────────────────┼───────────────────────────────┐      │
//! │  │                 ContainerManager Trait                    │      │
//! │  │  create → start → exec / copy / wait → stop → remove      │      │
//! │  │  images: list │ pull │ tag │ push │ build │ multi-arch    │      │
//! │  └───────────────────────────┼───────────────────────────────┘      │
//! │                              │                                      │
//! │  ┌──────────────┐  ┌─────────┴─────────┐  ┌──────────────────┐      │
//! │  │  TarCodec    │  │ MultiArchAssembler│  │ PlatformResolver │      │
//! │  │ copy in/out  │  │ manifest lists    │  │ host → container │      │
//! │  └──────────────┘  └───────────────────┘  └──────────────────┘      │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                   Backends (BackendRegistry)                        │
//! │  ┌──────────────────────┐        ┌───────────────────────────┐      │
//! │  │    DockerManager     │        │      PodmanManager        │      │
//! │  │  daemon socket REST  │        │ discovered socket, libpod │      │
//! │  │  buildx multi-arch   │        │ manifest-list multi-arch  │      │
//! │  └──────────────────────┘        └───────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Platforms
//!
//! Desktop hosts that run Linux containers inside a VM (macOS, Windows)
//! always target `linux/amd64` containers. Builds on those hosts produce a
//! second artifact for the host's own architecture (see
//! [`platform::resolve_build_platforms`]).
//!
//! # Error Handling
//!
//! Every operation returns [`Result`]. Nothing in the library terminates the
//! process. A missing file inside a container is `Ok(None)`, not an error,
//! and a failed build step is reported with its name and the step's own
//! error text.
//!
//! # Example
//!
//! ```rust,ignore
//! use buildrig::{BackendRegistry, ContainerConfig, ContainerManager, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> buildrig::Result<()> {
//!     let config = EngineConfig::load()?;
//!     let manager = BackendRegistry::with_defaults()
//!         .connect_configured(&config)
//!         .await?;
//!
//!     let mut spec = ContainerConfig::new("alpine:3.19");
//!     spec.command = vec!["sleep".into(), "300".into()];
//!     let id = manager.create_container(spec, &config.registry_auth).await?;
//!     manager.start_container(&id).await?;
//!     manager.copy_content_to_container(&id, "echo hi", "/work/run.sh").await?;
//!     if let Some(log) = manager.copy_file_from_container(&id, "/work/out.log").await? {
//!         println!("{}", String::from_utf8_lossy(&log));
//!     }
//!     manager.remove_container(&id).await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod backends;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod manager;
pub mod multiarch;
pub mod platform;
pub mod probe;
pub mod reference;
pub mod scheduler;

// Re-exports
pub use backends::{BackendRegistry, DockerManager, PodmanManager};
pub use config::EngineConfig;
pub use credentials::RegistryCredentials;
pub use error::{BoxError, Error, Result};
pub use manager::{
    BuildOutput, CommitOptions, ContainerConfig, ContainerDetails, ContainerManager,
    ImageDetails, ImageSummary, ManagedContainer, MultiArchOutput, MultiArchRequest,
    OutputStream, PortBinding, Protocol, ReadinessProbe, Signal, Volume, VolumeKind,
    WaitCondition,
};
pub use multiarch::{ManifestBuilder, NativeMultiArch, PlatformBuilder};
pub use platform::{Arch, Os, Platform, PlatformSpec, canonical_arch};
pub use reference::ImageReference;
pub use scheduler::{BuildStep, StepMode, StepOutcome, StepScheduler, StepStatus};
