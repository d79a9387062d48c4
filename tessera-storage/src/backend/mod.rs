//! Minimal storage trait + in-memory implementation returning `Bytes` blobs.
//!
//! Returning `bytes::Bytes` lets readers slice tile ranges out of a file
//! image without copying.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tessera_result::Result;

pub mod fs;
pub use fs::*;

pub mod instrumented;
pub use instrumented::*;

pub mod mem;
pub use mem::*;

/// Durable storage surface used by the write path.
///
/// Implementations must be safe to share across the writer's worker pool;
/// all methods take `&self`.
pub trait StorageBackend: Send + Sync + 'static {
    /// Create a directory, including missing parents. Idempotent.
    fn create_dir(&self, path: &Path) -> Result<()>;

    /// Append `data` to the file at `path`, creating it if absent. The
    /// parent directory must already exist.
    fn append(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Read the full contents of a file.
    fn read(&self, path: &Path) -> Result<Bytes>;

    /// Current size of a file in bytes.
    fn size(&self, path: &Path) -> Result<u64>;

    /// Flush the file at `path` to durable storage.
    fn sync(&self, path: &Path) -> Result<()>;

    /// Remove a directory tree. Errors if `path` does not exist.
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Whether a file exists at `path`.
    fn is_file(&self, path: &Path) -> bool;

    /// Whether a directory exists at `path`.
    fn is_dir(&self, path: &Path) -> bool;

    /// Immediate children (files and directories) of `path`.
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}
