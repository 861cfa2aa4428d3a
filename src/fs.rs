//! File-system access behind a trait, so reconciliation cycles can run
//! against an in-memory double in tests.

use std::io::{self, Write};
use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;
use tempfile::NamedTempFile;

/// The file operations a reconciliation cycle needs.
///
/// Methods return plain `io::Result`; the engine attaches the operation
/// and path when it surfaces a failure.
#[async_trait]
pub trait HostsFs: Send + Sync {
    /// Timestamp that moves whenever the file's content changes. Compared
    /// for equality only, never ordered.
    async fn change_time(&self, path: &Path) -> io::Result<SystemTime>;

    async fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// In-place write, truncating the destination.
    async fn write(&self, path: &Path, contents: &str) -> io::Result<()>;

    /// Durable write: the destination holds either the old or the new
    /// content at every instant, never a partial body.
    async fn write_atomic(&self, path: &Path, contents: &str) -> io::Result<()>;
}

/// Production implementation on the real file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

#[async_trait]
impl HostsFs for RealFs {
    async fn change_time(&self, path: &Path) -> io::Result<SystemTime> {
        tokio::fs::metadata(path).await?.modified()
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> io::Result<()> {
        let path = path.to_path_buf();
        let contents = contents.to_string();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            // Temp file in the destination directory, so the final rename
            // stays on one file system.
            let parent = path.parent().unwrap_or(Path::new("."));
            let mut tmp = NamedTempFile::new_in(parent)?;

            // A fresh temp file is 0600; carry over the destination's
            // permissions so a world-readable hosts file stays readable.
            if let Ok(meta) = std::fs::metadata(&path) {
                tmp.as_file().set_permissions(meta.permissions())?;
            }

            tmp.write_all(contents.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)?;
            Ok(())
        })
        .await
        .map_err(io::Error::other)?
    }
}
