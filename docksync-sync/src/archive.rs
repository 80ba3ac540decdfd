//! Tar transfer into a container filesystem.
//!
//! A local file becomes one entry named `<destination>/<file name>`; a local
//! directory becomes one entry per file and directory under it, named
//! `<destination>/<path relative to the directory>`. Directory entries are
//! written even when empty so the tree shape survives extraction.
//!
//! Entry names are always built with `/`, never the host separator, and carry
//! no leading `/`: the archive is extracted at the container root, and tar
//! readers strip leading slashes anyway.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};

use tar::{Builder, EntryType, Header, HeaderMode};

use docksync_core::{ControlPlane, CopyOptions};

use crate::error::{archive_err, TransferError};

/// A built archive and the names of its entries, in archive order.
#[derive(Debug)]
pub struct Payload {
    pub entries: Vec<String>,
    pub bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// copy
// ---------------------------------------------------------------------------

/// Archive `local` rooted at `destination` and extract it into `container`.
///
/// Extraction may replace a directory with a file and vice versa, since a
/// synced path can change type between two runs.
pub fn copy(
    plane: &dyn ControlPlane,
    local: &Path,
    destination: &str,
    container: &str,
) -> Result<Payload, TransferError> {
    let payload = build(local, destination)?;
    plane
        .copy_archive(container, "/", &payload.bytes, CopyOptions::default())
        .map_err(|source| TransferError::Transport {
            container: container.to_string(),
            source,
        })?;
    tracing::debug!(
        path = %local.display(),
        container,
        entries = payload.entries.len(),
        bytes = payload.bytes.len(),
        "archive delivered",
    );
    Ok(payload)
}

/// Build the archive for `local` without sending it anywhere.
pub fn build(local: &Path, destination: &str) -> Result<Payload, TransferError> {
    let local = absolute(local)?;
    let meta = fs::symlink_metadata(&local).map_err(|source| TransferError::Stat {
        path: local.clone(),
        source,
    })?;

    let mut archive = ArchiveWriter::new(destination);
    if meta.is_dir() {
        archive.append(&local, &meta, Path::new(""))?;
        archive.walk(&local, Path::new(""))?;
    } else {
        let name = local.file_name().map(PathBuf::from).ok_or_else(|| {
            TransferError::Stat {
                path: local.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            }
        })?;
        archive.append(&local, &meta, &name)?;
    }
    archive.finish(&local)
}

/// Container directory a changed local path belongs in.
///
/// Files land in the destination joined with their parent directory relative
/// to `source_root`; a directory maps onto its own relative path. Paths
/// outside `source_root` fall back to the destination itself.
pub fn remote_dir(source_root: &Path, destination: &str, local: &Path, is_dir: bool) -> String {
    let anchor = if is_dir { Some(local) } else { local.parent() };
    let relative = anchor
        .and_then(|dir| dir.strip_prefix(source_root).ok())
        .unwrap_or_else(|| Path::new(""));
    let joined = entry_name(destination, relative);
    format!("/{joined}")
}

// ---------------------------------------------------------------------------
// Archive construction
// ---------------------------------------------------------------------------

struct ArchiveWriter {
    root: String,
    builder: Builder<Vec<u8>>,
    entries: Vec<String>,
}

impl ArchiveWriter {
    fn new(destination: &str) -> Self {
        Self {
            root: destination.to_string(),
            builder: Builder::new(Vec::new()),
            entries: Vec::new(),
        }
    }

    /// Append every entry below `dir`, parents before children, in name order.
    fn walk(&mut self, dir: &Path, relative: &Path) -> Result<(), TransferError> {
        let mut children = fs::read_dir(dir)
            .map_err(|e| archive_err(dir, e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| archive_err(dir, e))?;
        children.sort();

        for child in children {
            let meta = fs::symlink_metadata(&child).map_err(|e| archive_err(&child, e))?;
            let Some(file_name) = child.file_name() else {
                continue;
            };
            let child_relative = relative.join(file_name);
            self.append(&child, &meta, &child_relative)?;
            if meta.is_dir() {
                self.walk(&child, &child_relative)?;
            }
        }
        Ok(())
    }

    fn append(&mut self, path: &Path, meta: &Metadata, relative: &Path) -> Result<(), TransferError> {
        let name = entry_name(&self.root, relative);
        if name.is_empty() {
            // Destination `/` itself: nothing to create.
            return Ok(());
        }

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(meta, HeaderMode::Complete);

        let file_type = meta.file_type();
        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            self.builder
                .append_data(&mut header, &name, io::empty())
                .map_err(|e| archive_err(path, e))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(path).map_err(|e| archive_err(path, e))?;
            header.set_size(0);
            self.builder
                .append_link(&mut header, &name, &link)
                .map_err(|e| archive_err(path, e))?;
        } else {
            // Read up front so the header size matches the bytes even if the
            // file is still being written.
            let content = fs::read(path).map_err(|e| archive_err(path, e))?;
            header.set_size(content.len() as u64);
            self.builder
                .append_data(&mut header, &name, content.as_slice())
                .map_err(|e| archive_err(path, e))?;
        }

        self.entries.push(name);
        Ok(())
    }

    fn finish(self, local: &Path) -> Result<Payload, TransferError> {
        let bytes = self.builder.into_inner().map_err(|e| archive_err(local, e))?;
        Ok(Payload {
            entries: self.entries,
            bytes,
        })
    }
}

/// `root` joined with `relative`, `/`-separated, without leading or trailing `/`.
fn entry_name(root: &str, relative: &Path) -> String {
    let mut parts: Vec<String> = root
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .map(str::to_string)
        .collect();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_string_lossy().into_owned());
        }
    }
    parts.join("/")
}

fn absolute(path: &Path) -> Result<PathBuf, TransferError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|source| TransferError::Resolve {
            path: path.to_path_buf(),
            source,
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
