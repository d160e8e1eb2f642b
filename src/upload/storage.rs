//! The flat directory all uploads live in, and the containment check guarding it.

use crate::error::AppError;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    /// Creates the directory if needed and pins its canonical absolute form.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        Ok(StorageRoot {
            root: path.canonicalize()?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolves `path` (relative to the root, or absolute) and verifies that the
    /// canonical result lies strictly inside the root.
    ///
    /// Paths that don't exist yet are resolved through their parent directory,
    /// which must exist.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, AppError> {
        let joined = self.root.join(path);

        let resolved = match joined.canonicalize() {
            Ok(resolved) => resolved,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let (Some(parent), Some(name)) = (joined.parent(), joined.file_name()) else {
                    return Err(AppError::UnsafePath);
                };
                match parent.canonicalize() {
                    Ok(parent) => parent.join(name),
                    Err(e) if !self.root.is_dir() => {
                        tracing::error!(root = %self.root.display(), "storage root is missing: {e}");
                        return Err(AppError::StorageIo(e));
                    }
                    Err(_) => return Err(AppError::UnsafePath),
                }
            }
            Err(e) => return Err(e.into()),
        };

        if resolved != self.root && resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            tracing::warn!(
                requested = %path.display(),
                resolved = %resolved.display(),
                root = %self.root.display(),
                "path escapes storage root"
            );
            Err(AppError::UnsafePath)
        }
    }
}

/// Writes `data` to a file that must not exist yet. A partially written file is
/// removed before the error is returned.
pub async fn write_new(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;

    let written = async {
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await;

    if let Err(e) = written {
        drop(file);
        discard(path).await;
        return Err(e);
    }
    Ok(())
}

pub async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "discarded rejected upload"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::error!(path = %path.display(), "failed to discard rejected upload: {e}"),
    }
}
