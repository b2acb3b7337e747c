//! # Multi-Architecture Image Assembly
//!
//! Builds one image per target platform and publishes them under a single
//! manifest list named after the final image reference.
//!
//! ## Manifest Flow
//!
//! Backends whose daemon manages manifest lists (libpod) go through
//! [`assemble`]:
//!
//! ```text
//!   for each platform:  build → <name>-<arch>:<tag>
//!   create manifest list <name:tag>      (amend if it exists)
//!   add each per-platform image
//!   push list (all=true) → registry
//! ```
//!
//! The per-platform images get the architecture in their repository name.
//! Reusing a single name across sequential builds would leave only the last
//! build tagged and the manifest would reference one image N times.
//!
//! ## Native Flow
//!
//! Daemons with a native multi-platform builder go through
//! [`assemble_native`]: one build invocation covering every platform that
//! pushes directly, followed by a per-platform pull to surface logs and the
//! resulting image IDs.
//!
//! ## Failure Semantics
//!
//! Any platform failing aborts the whole assembly with
//! [`Error::MultiArchBuild`] before a manifest is created or pushed. A
//! request with zero or one platform is a plain single-platform build.

use crate::archive;
use crate::error::{Error, Result};
use crate::manager::{BuildOutput, MultiArchOutput, MultiArchRequest};
use crate::platform::PlatformSpec;
use crate::reference::ImageReference;
use async_trait::async_trait;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info};

/// Single-platform build used by both assembly flows.
#[async_trait]
pub trait PlatformBuilder: Send + Sync {
    /// Builds `dockerfile` (with an optional extracted context) as `tag`.
    async fn build_for_platform(
        &self,
        dockerfile: &[u8],
        context_dir: Option<&Path>,
        tag: &str,
        platform: Option<&PlatformSpec>,
    ) -> Result<BuildOutput>;
}

/// Daemon-side manifest list management.
#[async_trait]
pub trait ManifestBuilder: PlatformBuilder {
    /// Creates the list `name`, amending an existing one. Returns its ID.
    async fn create_manifest(&self, name: &str) -> Result<String>;

    /// Adds the local image `image` to the list.
    async fn add_to_manifest(&self, list: &str, image: &str) -> Result<()>;

    /// Pushes the list and every referenced image to `destination`.
    async fn push_manifest(&self, list: &str, destination: &str, registry_auth: &str)
    -> Result<String>;
}

/// Native multi-platform builder that pushes a manifest list itself.
#[async_trait]
pub trait NativeMultiArch: PlatformBuilder {
    /// Builds every platform in one invocation and pushes `image_name`.
    async fn build_and_push(
        &self,
        dockerfile: &[u8],
        context_dir: Option<&Path>,
        image_name: &str,
        platforms: &[PlatformSpec],
    ) -> Result<String>;

    /// Pulls one platform of the pushed image. Returns `(log, image_id)`.
    async fn pull_platform(
        &self,
        image_name: &str,
        platform: &PlatformSpec,
        registry_auth: &str,
    ) -> Result<(String, String)>;
}

/// Comma-separated platform list (`linux/amd64,linux/arm64`).
pub fn platform_list(platforms: &[PlatformSpec]) -> String {
    platforms
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Extracts the context bundle, if any, into a temporary directory.
async fn prepare_context(bundle: Option<&Path>) -> Result<Option<TempDir>> {
    let Some(bundle) = bundle else {
        return Ok(None);
    };

    let bundle = bundle.to_path_buf();
    let dir = tokio::task::spawn_blocking(move || -> Result<TempDir> {
        let dir = tempfile::Builder::new().prefix("buildrig-ctx-").tempdir()?;
        let file = std::fs::File::open(&bundle)?;
        archive::extract_archive(file, dir.path())?;
        Ok(dir)
    })
    .await
    .map_err(|e| Error::Internal(format!("context extraction task failed: {}", e)))??;

    debug!("Extracted build context into {}", dir.path().display());
    Ok(Some(dir))
}

async fn build_single<B: PlatformBuilder + ?Sized>(
    builder: &B,
    request: &MultiArchRequest,
    context_dir: Option<&Path>,
) -> Result<MultiArchOutput> {
    let output = builder
        .build_for_platform(
            &request.dockerfile,
            context_dir,
            &request.image_name,
            request.platforms.first(),
        )
        .await?;
    Ok(MultiArchOutput {
        log: output.log,
        image_ids: vec![output.image_id],
    })
}

fn platform_failure(platform: &PlatformSpec, err: Error) -> Error {
    Error::MultiArchBuild {
        platform: platform.to_string(),
        reason: err.to_string(),
    }
}

/// Builds each platform then assembles and pushes a manifest list.
pub async fn assemble<B: ManifestBuilder + ?Sized>(
    builder: &B,
    request: &MultiArchRequest,
) -> Result<MultiArchOutput> {
    let reference: ImageReference = request.image_name.parse()?;
    let context = prepare_context(request.context.as_deref()).await?;
    let context_dir = context.as_ref().map(TempDir::path);

    if request.platforms.len() <= 1 {
        return build_single(builder, request, context_dir).await;
    }

    let mut log = String::new();
    let mut image_ids = Vec::with_capacity(request.platforms.len());
    let mut tags = Vec::with_capacity(request.platforms.len());

    for platform in &request.platforms {
        let tag = reference.for_platform(platform).to_string();
        info!("Building {} for {}", tag, platform);

        let output = builder
            .build_for_platform(&request.dockerfile, context_dir, &tag, Some(platform))
            .await
            .map_err(|e| platform_failure(platform, e))?;

        log.push_str(&output.log);
        image_ids.push(output.image_id);
        tags.push(tag);
    }

    let list = &request.image_name;
    let manifest_id = builder.create_manifest(list).await?;
    debug!("Manifest list {} ({})", list, manifest_id);

    for tag in &tags {
        builder.add_to_manifest(list, tag).await?;
    }

    info!("Pushing manifest list {} ({} images)", list, tags.len());
    let push_log = builder
        .push_manifest(list, list, &request.registry_auth)
        .await?;
    log.push_str(&push_log);

    Ok(MultiArchOutput { log, image_ids })
}

/// Multi-platform build through a native builder.
pub async fn assemble_native<B: NativeMultiArch + ?Sized>(
    builder: &B,
    request: &MultiArchRequest,
) -> Result<MultiArchOutput> {
    request.image_name.parse::<ImageReference>()?;
    let context = prepare_context(request.context.as_deref()).await?;
    let context_dir = context.as_ref().map(TempDir::path);

    if request.platforms.len() <= 1 {
        return build_single(builder, request, context_dir).await;
    }

    let platforms = platform_list(&request.platforms);
    info!("Building {} for {}", request.image_name, platforms);

    let mut log = builder
        .build_and_push(
            &request.dockerfile,
            context_dir,
            &request.image_name,
            &request.platforms,
        )
        .await
        .map_err(|e| Error::MultiArchBuild {
            platform: platforms.clone(),
            reason: e.to_string(),
        })?;

    let mut image_ids = Vec::with_capacity(request.platforms.len());
    for platform in &request.platforms {
        let (pull_log, image_id) = builder
            .pull_platform(&request.image_name, platform, &request.registry_auth)
            .await
            .map_err(|e| platform_failure(platform, e))?;
        log.push_str(&pull_log);
        image_ids.push(image_id);
    }

    Ok(MultiArchOutput { log, image_ids })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_list() {
        let platforms = vec![
            "linux/amd64".parse().unwrap(),
            "linux/arm/v7".parse().unwrap(),
        ];
        assert_eq!(platform_list(&platforms), "linux/amd64,linux/arm/v7");
    }
}
