//! Tests for the provided `ContainerManager` operations.
//!
//! A fake backend stores uploaded archives in memory and serves downloads
//! from a prepared file map, which is enough to exercise the copy helpers
//! end to end.

use async_trait::async_trait;
use buildrig::archive::{archive_string, extract_archive, read_single_file};
use buildrig::manager::split_dest_path;
use buildrig::{
    BuildOutput, CommitOptions, ContainerConfig, ContainerDetails, ContainerManager, Error,
    ImageDetails, ImageSummary, MultiArchOutput, MultiArchRequest, OutputStream, PlatformSpec,
    Result, Signal, WaitCondition,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tempfile::TempDir;

#[derive(Default)]
struct FakeManager {
    uploads: Mutex<Vec<(String, String, Vec<u8>)>>,
    files: HashMap<String, Vec<u8>>,
    started: Mutex<Vec<String>>,
}

impl FakeManager {
    fn with_file(path: &str, content: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        let mut files = HashMap::new();
        files.insert(path.to_string(), archive_string(content, name).unwrap());
        Self {
            files,
            ..Default::default()
        }
    }

    fn only_upload(&self) -> (String, String, Vec<u8>) {
        let uploads = self.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        uploads[0].clone()
    }
}

fn unsupported<T>(op: &str) -> Result<T> {
    Err(Error::NotSupported(op.to_string()))
}

#[async_trait]
impl ContainerManager for FakeManager {
    fn name(&self) -> &str {
        "fake"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_container(&self, _config: ContainerConfig, _auth: &str) -> Result<String> {
        unsupported("create")
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.started.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn stop_container(&self, _id: &str, _signal: Signal) -> Result<()> {
        unsupported("stop")
    }

    async fn remove_container(&self, _id: &str) -> Result<()> {
        unsupported("remove")
    }

    async fn exec_container(
        &self,
        _id: &str,
        _cmd: &[String],
        _attach_output: bool,
    ) -> Result<OutputStream> {
        unsupported("exec")
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        Err(Error::ContainerNotFound(id.to_string()))
    }

    async fn wait_container(&self, _id: &str, _condition: WaitCondition) -> Result<i64> {
        unsupported("wait")
    }

    async fn commit_container(&self, _id: &str, _options: CommitOptions) -> Result<String> {
        unsupported("commit")
    }

    async fn upload_archive(&self, id: &str, dest_dir: &str, archive: Vec<u8>) -> Result<()> {
        self.uploads
            .lock()
            .unwrap()
            .push((id.to_string(), dest_dir.to_string(), archive));
        Ok(())
    }

    async fn download_archive(&self, _id: &str, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files.get(path).cloned())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        Ok(Vec::new())
    }

    async fn pull_image(
        &self,
        _reference: &str,
        _platform: Option<&PlatformSpec>,
        _auth: &str,
    ) -> Result<String> {
        unsupported("pull")
    }

    async fn tag_image(&self, _source: &str, _target: &str) -> Result<()> {
        unsupported("tag")
    }

    async fn push_image(&self, _reference: &str, _auth: &str) -> Result<String> {
        unsupported("push")
    }

    async fn remove_image(&self, _reference: &str, _force: bool) -> Result<()> {
        unsupported("rmi")
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageDetails> {
        Err(Error::ImageNotFound(reference.to_string()))
    }

    async fn build_image(
        &self,
        _dockerfile: &[u8],
        _image_name: &str,
        _platform: Option<&PlatformSpec>,
    ) -> Result<BuildOutput> {
        unsupported("build")
    }

    async fn build_multi_arch_image(&self, _request: MultiArchRequest) -> Result<MultiArchOutput> {
        unsupported("multi-arch build")
    }
}

// =============================================================================
// Copy In
// =============================================================================

#[tokio::test]
async fn test_copy_content_uploads_single_entry() {
    let manager = FakeManager::default();
    manager
        .copy_content_to_container("c1", "echo hi\n", "/work/run.sh")
        .await
        .unwrap();

    let (id, dest_dir, archive) = manager.only_upload();
    assert_eq!(id, "c1");
    assert_eq!(dest_dir, "/work");

    let mut tar = tar::Archive::new(&archive[..]);
    let entry = tar.entries().unwrap().next().unwrap().unwrap();
    assert_eq!(entry.path().unwrap().to_str(), Some("run.sh"));
    assert_eq!(entry.header().mode().unwrap(), 0o755);
    assert_eq!(read_single_file(&archive[..]).unwrap(), b"echo hi\n");
}

#[tokio::test]
async fn test_copy_content_to_root() {
    let manager = FakeManager::default();
    manager
        .copy_content_to_container("c1", "x", "/marker")
        .await
        .unwrap();
    assert_eq!(manager.only_upload().1, "/");
}

#[tokio::test]
async fn test_copy_content_rejects_directory_destination() {
    let manager = FakeManager::default();
    let err = manager
        .copy_content_to_container("c1", "x", "/work/")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Archive(_)));
    assert!(manager.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_copy_host_file() {
    let dir = TempDir::new().unwrap();
    let host = dir.path().join("settings.xml");
    std::fs::write(&host, "<settings/>").unwrap();

    let manager = FakeManager::default();
    manager
        .copy_to_container("c2", &host, "/root/.m2/settings.xml")
        .await
        .unwrap();

    let (_, dest_dir, archive) = manager.only_upload();
    assert_eq!(dest_dir, "/root/.m2");
    assert_eq!(read_single_file(&archive[..]).unwrap(), b"<settings/>");
}

#[tokio::test]
async fn test_copy_missing_host_file_fails() {
    let manager = FakeManager::default();
    let err = manager
        .copy_to_container("c2", Path::new("/nonexistent/file"), "/tmp/file")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[tokio::test]
async fn test_copy_directory_keeps_relative_paths() {
    let src = TempDir::new().unwrap();
    std::fs::create_dir_all(src.path().join("src/bin")).unwrap();
    std::fs::write(src.path().join("Cargo.toml"), "[package]").unwrap();
    std::fs::write(src.path().join("src/bin/main.rs"), "fn main() {}").unwrap();

    let manager = FakeManager::default();
    manager
        .copy_directory_to_container("c3", src.path(), "/workspace")
        .await
        .unwrap();

    let (_, dest_dir, archive) = manager.only_upload();
    assert_eq!(dest_dir, "/workspace");

    let out = TempDir::new().unwrap();
    extract_archive(&archive[..], out.path()).unwrap();
    assert_eq!(
        std::fs::read_to_string(out.path().join("src/bin/main.rs")).unwrap(),
        "fn main() {}"
    );
    assert!(out.path().join("Cargo.toml").is_file());
}

// =============================================================================
// Copy Out
// =============================================================================

#[tokio::test]
async fn test_copy_file_from_container() {
    let manager = FakeManager::with_file("/out/report.txt", "3 passed");
    let content = manager
        .copy_file_from_container("c1", "/out/report.txt")
        .await
        .unwrap();
    assert_eq!(content.as_deref(), Some(&b"3 passed"[..]));
}

#[tokio::test]
async fn test_missing_file_is_none() {
    let manager = FakeManager::default();
    let content = manager
        .copy_file_from_container("c1", "/out/missing.txt")
        .await
        .unwrap();
    assert!(content.is_none());
}

// =============================================================================
// Lifecycle Helpers
// =============================================================================

#[tokio::test]
async fn test_start_without_probe() {
    let manager = FakeManager::default();
    manager.start_container_ready("c9", None).await.unwrap();
    assert_eq!(*manager.started.lock().unwrap(), vec!["c9"]);
}

#[test]
fn test_split_dest_path() {
    assert_eq!(
        split_dest_path("/a/b/c.txt").unwrap(),
        ("/a/b".to_string(), "c.txt".to_string())
    );
    assert_eq!(
        split_dest_path("c.txt").unwrap(),
        ("/".to_string(), "c.txt".to_string())
    );
    assert!(split_dest_path("/").is_err());
}

#[test]
fn test_container_config_defaults() {
    let config = ContainerConfig::new("alpine:3.19");
    assert_eq!(config.image, "alpine:3.19");
    assert!(config.name.is_none());
    assert!(config.env.is_empty());
    assert!(config.target_platform().is_none());
}
