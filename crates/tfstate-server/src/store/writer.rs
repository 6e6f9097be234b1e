//! Durable state persistence under a single storage root.
//!
//! Each logical key maps to exactly one file,
//! `<root>/<key>/terraform.tfstate`, overwritten in place via an atomic
//! temp-file-and-rename so readers never observe a partial write.
//! Key containment is lexical: traversal components are rejected up
//! front. Symlinks planted beneath the root are followed as-is.

use std::fs;
use std::io::Write as _;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use super::crypto::{self, EncryptionKey};

/// Fixed filename appended under every key's directory.
pub const STATE_FILE: &str = "terraform.tfstate";

/// Errors surfaced by [`StateWriter`] operations.
///
/// The HTTP boundary collapses all of these (except `InvalidKey`) into a
/// generic internal failure; the distinction exists for logging.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("invalid state key {key:?}: escapes the storage root")]
    InvalidKey { key: String },

    #[error("failed to create state directory {path}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encrypt state payload")]
    Encryption(#[source] anyhow::Error),

    #[error("failed to decrypt state file {path}")]
    Decryption {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read state file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write state file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether a write landed on a fresh key or replaced existing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
}

impl WriteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteOutcome::Created => "created",
            WriteOutcome::Updated => "updated",
        }
    }
}

/// Thread-safe handle performing all state reads and writes.
///
/// The encryption key, when configured, is process-wide and immutable;
/// clones share it. No per-key locking is done: concurrent writers to
/// the same key race at the rename and the last one wins, each write
/// remaining individually all-or-nothing.
#[derive(Clone)]
pub struct StateWriter {
    root: Arc<PathBuf>,
    key: Option<Arc<EncryptionKey>>,
}

impl StateWriter {
    pub fn new(root: PathBuf, key: Option<EncryptionKey>) -> Self {
        Self {
            root: Arc::new(root),
            key: key.map(Arc::new),
        }
    }

    /// Whether payloads are encrypted before hitting disk.
    pub fn encrypts(&self) -> bool {
        self.key.is_some()
    }

    /// Store `payload` for `key`, replacing any previous content.
    ///
    /// Succeeds only once the temp file has been persisted over the
    /// target; on any failure the previous content (or absence) is left
    /// untouched.
    pub fn write(&self, key: &str, payload: &[u8]) -> Result<WriteOutcome, WriteError> {
        let dir = self.root.join(sanitize_key(key)?);
        let file = dir.join(STATE_FILE);

        create_dirs(&dir).map_err(|source| WriteError::Directory {
            path: dir.clone(),
            source,
        })?;

        let content = match &self.key {
            Some(k) => crypto::seal(k, payload).map_err(WriteError::Encryption)?,
            None => payload.to_vec(),
        };

        // Informational only: both branches perform the same overwrite.
        let outcome = if file.is_file() {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Created
        };

        self.persist(&file, &dir, &content)?;

        debug!(file = %file.display(), outcome = outcome.as_str(), "stored state");
        Ok(outcome)
    }

    /// Fetch the stored (decrypted) payload for `key`, or `None` if no
    /// state has been written for it.
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>, WriteError> {
        let file = self.root.join(sanitize_key(key)?).join(STATE_FILE);

        let raw = match fs::read(&file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(WriteError::Read { path: file, source }),
        };

        match &self.key {
            Some(k) => crypto::open(k, &raw)
                .map(Some)
                .map_err(|source| WriteError::Decryption { path: file, source }),
            None => Ok(Some(raw)),
        }
    }

    // Write to a temp file in the target's own directory, fsync, fix
    // permissions, then rename over the target. Rename is atomic within
    // one filesystem, which colocation in `dir` guarantees.
    fn persist(&self, file: &Path, dir: &Path, content: &[u8]) -> Result<(), WriteError> {
        let map_err = |source: std::io::Error| WriteError::Write {
            path: file.to_path_buf(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(map_err)?;
        tmp.write_all(content).map_err(map_err)?;
        tmp.as_file().sync_all().map_err(map_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))
                .map_err(map_err)?;
        }

        tmp.persist(file).map_err(|e| WriteError::Write {
            path: file.to_path_buf(),
            source: e.error,
        })?;
        Ok(())
    }
}

/// Reduce a caller-supplied key to a relative path strictly below the
/// storage root. Traversal (`..`), absolute paths, and empty keys are
/// rejected rather than stripped, so the joined path is contained by
/// construction.
fn sanitize_key(key: &str) -> Result<PathBuf, WriteError> {
    let mut rel = PathBuf::new();
    for component in Path::new(key).components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WriteError::InvalidKey {
                    key: key.to_owned(),
                })
            }
        }
    }
    if rel.as_os_str().is_empty() {
        return Err(WriteError::InvalidKey {
            key: key.to_owned(),
        });
    }
    Ok(rel)
}

#[cfg(unix)]
fn create_dirs(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)
}

#[cfg(not(unix))]
fn create_dirs(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}
