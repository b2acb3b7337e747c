//! # Tar Codec
//!
//! Tar streams are the only transport for moving bytes into or out of a
//! container. Both backends upload an archive that the daemon extracts at a
//! destination directory, and download an archive when reading files back.
//!
//! ## Entry Naming
//!
//! - Single-file archives carry one regular entry named by the caller,
//!   independent of the source file name, with mode `0755`.
//! - Directory archives strip the directory's own prefix so entry names
//!   start at its children. `"."` and `"./"` walk the current directory
//!   without leaking a leading dot segment.
//!
//! ## Extraction Safety
//!
//! [`extract_archive`] rejects absolute paths and `..` components, the same
//! check applied to image layers before they touch the host filesystem.
//! Gzip-compressed input is detected by its magic bytes and decompressed
//! transparently.

use crate::constants::{ARCHIVE_FILE_MODE, DOCKERFILE_NAME, MAX_COPY_OUT_SIZE};
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn archive_err(e: impl std::fmt::Display) -> Error {
    Error::Archive(e.to_string())
}

fn file_header(size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_mode(ARCHIVE_FILE_MODE);
    header.set_size(size);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header
}

/// Wraps `content` as a single regular-file entry named `dest_name`.
pub fn archive_string(content: &str, dest_name: &str) -> Result<Vec<u8>> {
    archive_bytes(content.as_bytes(), dest_name)
}

/// Wraps raw bytes as a single regular-file entry named `dest_name`.
pub fn archive_bytes(content: &[u8], dest_name: &str) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    let mut header = file_header(content.len() as u64);
    builder
        .append_data(&mut header, dest_name, content)
        .map_err(archive_err)?;
    builder.into_inner().map_err(archive_err)
}

/// Streams a host file into a single-entry archive named `dest_name`.
pub fn archive_file(host_path: &Path, dest_name: &str) -> Result<Vec<u8>> {
    let file = File::open(host_path)?;
    let size = file.metadata()?.len();

    let mut builder = Builder::new(Vec::new());
    let mut header = file_header(size);
    builder
        .append_data(&mut header, dest_name, file)
        .map_err(archive_err)?;
    builder.into_inner().map_err(archive_err)
}

/// Archives a directory tree with entry names relative to `host_dir`.
pub fn archive_directory(host_dir: &Path) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);
    append_tree(&mut builder, host_dir, |_| true)?;
    builder.into_inner().map_err(archive_err)
}

/// Builds an image build context: the tree under `context_dir` (if any)
/// plus `dockerfile` at the archive root under [`DOCKERFILE_NAME`].
///
/// A `Dockerfile` already present in the context is replaced.
pub fn build_context(dockerfile: &[u8], context_dir: Option<&Path>) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);

    if let Some(dir) = context_dir {
        append_tree(&mut builder, dir, |name| name != Path::new(DOCKERFILE_NAME))?;
    }

    let mut header = file_header(dockerfile.len() as u64);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, DOCKERFILE_NAME, dockerfile)
        .map_err(archive_err)?;
    builder.into_inner().map_err(archive_err)
}

fn append_tree<W, F>(builder: &mut Builder<W>, host_dir: &Path, keep: F) -> Result<()>
where
    W: std::io::Write,
    F: Fn(&Path) -> bool,
{
    let root = normalize_root(host_dir);

    for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(archive_err)?;
        let name = entry_name(&root, entry.path())?;
        if !keep(&name) {
            continue;
        }

        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path()).map_err(archive_err)?;
        } else {
            builder
                .append_path_with_name(entry.path(), &name)
                .map_err(archive_err)?;
        }
    }
    Ok(())
}

/// Treats `"."` and `"./"` as the current directory with an empty prefix.
fn normalize_root(host_dir: &Path) -> PathBuf {
    let raw = host_dir.to_string_lossy();
    if raw.is_empty() || raw == "." || raw == "./" {
        PathBuf::from(".")
    } else {
        host_dir.to_path_buf()
    }
}

fn entry_name(root: &Path, path: &Path) -> Result<PathBuf> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| Error::Archive(format!("{} escapes {}", path.display(), root.display())))?;

    let name: PathBuf = rel
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    Ok(name)
}

fn maybe_gunzip<'a, R: Read + 'a>(reader: R) -> Result<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::new(reader);
    let is_gzip = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
    if is_gzip {
        Ok(Box::new(GzDecoder::new(buffered)))
    } else {
        Ok(Box::new(buffered))
    }
}

fn check_traversal(path: &Path) -> Result<()> {
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    if escapes {
        return Err(Error::PathTraversal {
            path: path.to_string_lossy().to_string(),
        });
    }
    Ok(())
}

/// Extracts a (optionally gzip-compressed) tar stream into `dest_dir`.
pub fn extract_archive<R: Read>(reader: R, dest_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dest_dir)?;

    let mut archive = Archive::new(maybe_gunzip(reader)?);
    archive.set_preserve_permissions(true);

    let mut count = 0usize;
    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let path = entry.path().map_err(archive_err)?.into_owned();
        check_traversal(&path)?;

        entry.unpack_in(dest_dir).map_err(archive_err)?;
        count += 1;
    }

    debug!("Extracted {} entries into {}", count, dest_dir.display());
    Ok(())
}

/// Reads the content of the first entry, which must be a regular file.
pub fn read_single_file<R: Read>(reader: R) -> Result<Vec<u8>> {
    let mut archive = Archive::new(reader);
    let mut entries = archive.entries().map_err(archive_err)?;

    let mut entry = match entries.next() {
        Some(entry) => entry.map_err(archive_err)?,
        None => return Err(Error::Archive("archive is empty".to_string())),
    };

    let path = entry
        .path()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    if !matches!(
        entry.header().entry_type(),
        EntryType::Regular | EntryType::Continuous
    ) {
        return Err(Error::NotRegularFile { path });
    }

    let size = entry.size();
    if size > MAX_COPY_OUT_SIZE {
        return Err(Error::Archive(format!(
            "{} is {} bytes, limit is {}",
            path, size, MAX_COPY_OUT_SIZE
        )));
    }

    let mut content = Vec::with_capacity(size as usize);
    entry.read_to_end(&mut content)?;
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_string_header() {
        let data = archive_string("echo hi", "run.sh").unwrap();
        let mut archive = Archive::new(&data[..]);
        let entry = archive.entries().unwrap().next().unwrap().unwrap();

        assert_eq!(entry.path().unwrap().to_str(), Some("run.sh"));
        assert_eq!(entry.header().mode().unwrap(), 0o755);
        assert_eq!(entry.size(), 7);
    }

    #[test]
    fn test_normalize_root() {
        assert_eq!(normalize_root(Path::new("./")), PathBuf::from("."));
        assert_eq!(normalize_root(Path::new("")), PathBuf::from("."));
        assert_eq!(normalize_root(Path::new("src")), PathBuf::from("src"));
    }

    #[test]
    fn test_entry_name_strips_dot() {
        let name = entry_name(Path::new("."), Path::new("./a/b.txt")).unwrap();
        assert_eq!(name, PathBuf::from("a/b.txt"));
    }

    #[test]
    fn test_build_context_without_dir() {
        let data = build_context(b"FROM scratch\n", None).unwrap();
        let mut archive = Archive::new(&data[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["Dockerfile"]);
    }

    #[test]
    fn test_traversal_rejected() {
        assert!(check_traversal(Path::new("../etc/passwd")).is_err());
        assert!(check_traversal(Path::new("ok/file")).is_ok());
    }
}
