//! Content packaging for job payloads.
//!
//! A directory is archived as a gzipped tar with ownership forced to the
//! job container's user, so the injected files are usable inside the
//! container regardless of who owns them on the submitting host. A regular
//! file is taken to be a pre-built `.tar.gz` and passed through untouched.
//!
//! Either way the archive travels as `targz,<base64>` so the job service can
//! tell it apart from a plain string payload.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use flate2::{write::GzEncoder, Compression};
use walkdir::WalkDir;

/// Prefix marking an inline gzipped tar payload.
pub const ARCHIVE_TAG: &str = "targz,";

/// Numeric uid/gid of the job container's user.
pub const CONTENT_OWNER_ID: u64 = 2001;

/// User and group name of the job container's user.
pub const CONTENT_OWNER_NAME: &str = "gostint";

/// Package `source` into a content payload string.
///
/// `""` is returned unchanged; `"."` is the current working directory.
pub fn package(source: &str) -> Result<String, PackageError> {
    if source.is_empty() {
        return Ok(String::new());
    }

    let path = resolve_source(source)?;
    tracing::debug!(path = %path.display(), "Packaging job content");

    let bytes = archive_bytes(&path)?;
    tracing::debug!(archive_bytes = bytes.len(), "Job content packaged");

    Ok(format!(
        "{}{}",
        ARCHIVE_TAG,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

/// Resolve the current-directory marker to an absolute path.
pub fn resolve_source(source: &str) -> Result<PathBuf, PackageError> {
    if source == "." {
        std::env::current_dir().map_err(PackageError::CurrentDir)
    } else {
        Ok(PathBuf::from(source))
    }
}

/// Archive a directory, or read a regular file as an already-built archive.
pub fn archive_bytes(path: &Path) -> Result<Vec<u8>, PackageError> {
    let metadata = fs::metadata(path).map_err(|source| PackageError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if metadata.is_dir() {
        archive_directory(path)
    } else if metadata.is_file() {
        fs::read(path).map_err(|source| PackageError::Read {
            path: path.to_path_buf(),
            source,
        })
    } else {
        Err(PackageError::UnsupportedContentKind {
            path: path.to_path_buf(),
        })
    }
}

fn archive_directory(root: &Path) -> Result<Vec<u8>, PackageError> {
    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(gz);

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            PackageError::Read {
                path,
                source: io::Error::from(err),
            }
        })?;

        // The root maps to an empty relative name.
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let name = path.strip_prefix(root).unwrap_or(path);
        let metadata = entry.metadata().map_err(|err| PackageError::Read {
            path: path.to_path_buf(),
            source: io::Error::from(err),
        })?;

        let mut header = tar::Header::new_gnu();
        header.set_metadata_in_mode(&metadata, tar::HeaderMode::Complete);
        header.set_uid(CONTENT_OWNER_ID);
        header.set_gid(CONTENT_OWNER_ID);
        header
            .set_username(CONTENT_OWNER_NAME)
            .map_err(PackageError::WriteArchive)?;
        header
            .set_groupname(CONTENT_OWNER_NAME)
            .map_err(PackageError::WriteArchive)?;

        let file_type = entry.file_type();
        if file_type.is_file() {
            let file = File::open(path).map_err(|source| PackageError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            tar.append_data(&mut header, name, file)
                .map_err(PackageError::WriteArchive)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|source| PackageError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            header.set_size(0);
            tar.append_link(&mut header, name, target)
                .map_err(PackageError::WriteArchive)?;
        } else {
            header.set_size(0);
            tar.append_data(&mut header, name, io::empty())
                .map_err(PackageError::WriteArchive)?;
        }
    }

    let gz = tar.into_inner().map_err(PackageError::WriteArchive)?;
    gz.finish().map_err(PackageError::FinalizeArchive)
}

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("Unsupported content kind at '{}': expected a directory or a .tar.gz file", path.display())]
    UnsupportedContentKind { path: PathBuf },

    #[error("Failed to read content '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to resolve current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("Failed to write content archive: {0}")]
    WriteArchive(#[source] io::Error),

    #[error("Failed to finalize content archive: {0}")]
    FinalizeArchive(#[source] io::Error),
}
