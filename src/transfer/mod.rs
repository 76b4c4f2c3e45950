//! Transfer directories.
//!
//! A transfer directory is a named filesystem root with an access mode. They
//! are declared in configuration, checked once at startup and collected into
//! an immutable [`TransferRegistry`] that is shared by every composition.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::config::TransferDirectoryConfig;
use crate::errors::{CommsError, CommsErrorKind, CommsResult};

/// Access mode of a transfer directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferMode {
    /// Files may be read.
    ReadOnly,
    /// Files may be read and written.
    ReadWrite,
    /// Files may be written.
    WriteOnly,
    /// Files may be read, and are deleted after one successful read.
    ReadAuto,
}

impl TransferMode {
    /// True unless the mode is write-only.
    pub fn is_readable(&self) -> bool {
        !matches!(self, TransferMode::WriteOnly)
    }

    /// True for read-write and write-only modes.
    pub fn is_writable(&self) -> bool {
        matches!(self, TransferMode::ReadWrite | TransferMode::WriteOnly)
    }

    /// True for READ_AUTO.
    pub fn is_auto_delete(&self) -> bool {
        matches!(self, TransferMode::ReadAuto)
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::ReadOnly => write!(f, "READ_ONLY"),
            TransferMode::ReadWrite => write!(f, "READ_WRITE"),
            TransferMode::WriteOnly => write!(f, "WRITE_ONLY"),
            TransferMode::ReadAuto => write!(f, "READ_AUTO"),
        }
    }
}

/// A named, access-controlled filesystem root.
#[derive(Debug, Clone)]
pub struct TransferDirectory {
    name: String,
    root: PathBuf,
    mode: TransferMode,
}

impl TransferDirectory {
    /// Creates a transfer directory after checking the path.
    ///
    /// The path must exist, be a traversable directory, be readable unless
    /// the mode is WRITE_ONLY and be writable unless the mode is READ_ONLY.
    /// Relative paths are resolved against the working directory.
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>, mode: TransferMode) -> CommsResult<Self> {
        let name = name.into();
        let path = path.as_ref();

        let invalid = |message: String| {
            CommsError::new(CommsErrorKind::TransferDirectoryInvalid, message)
                .with_fragment(path.display().to_string())
        };

        if name.is_empty() {
            return Err(invalid("Transfer directory name is missing".to_string()));
        }

        let metadata = std::fs::metadata(path).map_err(|e| {
            invalid(format!("Transfer directory {} does not exist", name)).with_cause(e)
        })?;
        if !metadata.is_dir() {
            return Err(invalid(format!("Transfer directory {} is not a directory", name)));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if metadata.permissions().mode() & 0o111 == 0 {
                return Err(invalid(format!("Transfer directory {} is not traversable", name)));
            }
        }

        if mode != TransferMode::WriteOnly && std::fs::read_dir(path).is_err() {
            return Err(invalid(format!("Transfer directory {} is not readable", name)));
        }

        if mode != TransferMode::ReadOnly && !can_create_files(path) {
            return Err(invalid(format!("Transfer directory {} is not writable", name)));
        }

        let root = path.canonicalize().map_err(|e| {
            invalid(format!("Transfer directory {} cannot be resolved", name)).with_cause(e)
        })?;

        Ok(Self { name, root, mode })
    }

    /// Returns the directory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the canonical root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the access mode.
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// True unless the directory is write-only.
    pub fn is_readable(&self) -> bool {
        self.mode.is_readable()
    }

    /// True if files may be written.
    pub fn is_writable(&self) -> bool {
        self.mode.is_writable()
    }

    /// True if files are deleted after being read.
    pub fn is_auto_delete(&self) -> bool {
        self.mode.is_auto_delete()
    }

    /// Maps a relative path to a location under the root.
    ///
    /// `..` segments are folded lexically and may not climb above the root.
    /// Absolute paths fail. The deepest existing part of the target is
    /// canonicalized and must still be under the root, so symlinks cannot
    /// lead outside it even for files that do not exist yet.
    pub fn resolve_path(&self, relative: &str) -> CommsResult<PathBuf> {
        let escapes = || {
            CommsError::resolution(
                CommsErrorKind::PathEscapesRoot,
                format!("Path escapes transfer directory {}", self.name),
                relative,
            )
        };

        let mut normalized = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(escapes());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(escapes()),
            }
        }

        let target = self.root.join(&normalized);
        let mut existing = target.as_path();
        let mut missing = Vec::new();

        loop {
            if let Ok(canonical) = existing.canonicalize() {
                if !canonical.starts_with(&self.root) {
                    return Err(escapes());
                }
                return Ok(missing.iter().rev().fold(canonical, |path, part| path.join(part)));
            }

            // Present but unresolvable: a dangling symlink could point anywhere.
            if existing.symlink_metadata().is_ok() {
                return Err(escapes());
            }

            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(part)) => {
                    missing.push(part);
                    existing = parent;
                }
                _ => return Err(escapes()),
            }
        }
    }

    /// Writes a file under the root, creating parent directories as needed.
    pub async fn write_file(&self, relative: &str, contents: &[u8]) -> CommsResult<PathBuf> {
        if !self.is_writable() {
            return Err(CommsError::resolution(
                CommsErrorKind::DirectoryNotWritable,
                format!("Transfer directory {} is not writable", self.name),
                relative,
            ));
        }

        let target = self.resolve_path(relative)?;
        if target == self.root {
            return Err(CommsError::resolution(
                CommsErrorKind::ResourceIo,
                "Cannot write to the transfer directory root",
                relative,
            ));
        }

        let io_error = |e: std::io::Error| {
            CommsError::resolution(
                CommsErrorKind::ResourceIo,
                format!("Failed to write {}", target.display()),
                relative,
            )
            .with_cause(e)
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
            let parent = tokio::fs::canonicalize(parent).await.map_err(io_error)?;
            if !parent.starts_with(&self.root) {
                return Err(CommsError::resolution(
                    CommsErrorKind::PathEscapesRoot,
                    format!("Path escapes transfer directory {}", self.name),
                    relative,
                ));
            }
        }
        tokio::fs::write(&target, contents).await.map_err(io_error)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(directory = %self.name, path = %target.display(), bytes = contents.len(), "Wrote transfer file");

        Ok(target)
    }
}

/// Checks that this process can create files in `dir` by creating one.
fn can_create_files(dir: &Path) -> bool {
    let check = dir.join(format!(".write-check-{}", uuid::Uuid::new_v4().simple()));
    match std::fs::OpenOptions::new().write(true).create_new(true).open(&check) {
        Ok(file) => {
            drop(file);
            let _ = std::fs::remove_file(&check);
            true
        }
        Err(_) => false,
    }
}

/// Name to transfer directory lookup.
///
/// Built once from configuration and never mutated, so it can be shared
/// behind an `Arc` without locking.
#[derive(Debug, Clone, Default)]
pub struct TransferRegistry {
    directories: HashMap<String, TransferDirectory>,
}

impl TransferRegistry {
    /// Builds a registry from already-checked directories.
    pub fn new(directories: impl IntoIterator<Item = TransferDirectory>) -> CommsResult<Self> {
        let mut map = HashMap::new();
        for directory in directories {
            let name = directory.name.clone();
            if map.insert(name.clone(), directory).is_some() {
                return Err(CommsError::configuration(format!(
                    "Transfer directory name is a duplicate: {}",
                    name
                )));
            }
        }
        Ok(Self { directories: map })
    }

    /// Checks and registers every declared directory.
    pub fn from_config(declarations: &[TransferDirectoryConfig]) -> CommsResult<Self> {
        let directories = declarations
            .iter()
            .map(|d| TransferDirectory::new(&d.name, &d.path, d.mode))
            .collect::<CommsResult<Vec<_>>>()?;

        #[cfg(feature = "tracing")]
        for d in &directories {
            tracing::debug!(name = %d.name, root = %d.root.display(), mode = %d.mode, "Registered transfer directory");
        }

        Self::new(directories)
    }

    /// Looks up a directory by name.
    pub fn get(&self, name: &str) -> Option<&TransferDirectory> {
        self.directories.get(name)
    }

    /// Returns the number of directories.
    pub fn len(&self) -> usize {
        self.directories.len()
    }

    /// True if no directories are registered.
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty()
    }
}
