use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use tessera_result::{Error, Result};

use super::StorageBackend;

/// In-memory backend used for tests/benchmarks.
///
/// Mirrors filesystem semantics closely enough for the commit-protocol
/// tests: appends require an existing parent directory, sync requires an
/// existing file, and `remove_dir_all` reclaims the whole subtree.
pub struct MemBackend {
    files: RwLock<FxHashMap<PathBuf, Vec<u8>>>,
    dirs: RwLock<FxHashSet<PathBuf>>,
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBackend {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(FxHashMap::default()),
            dirs: RwLock::new(FxHashSet::default()),
        }
    }

    fn not_found(path: &Path) -> Error {
        Error::Storage(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no such path: {}", path.display()),
        ))
    }
}

impl StorageBackend for MemBackend {
    fn create_dir(&self, path: &Path) -> Result<()> {
        let mut dirs = self.dirs.write().expect("MemBackend dirs lock poisoned");
        let mut cur = PathBuf::new();
        for part in path.components() {
            cur.push(part);
            dirs.insert(cur.clone());
        }
        Ok(())
    }

    fn append(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !self.is_dir(parent) {
                return Err(Self::not_found(parent));
            }
        }
        let mut files = self.files.write().expect("MemBackend files lock poisoned");
        files.entry(path.to_path_buf()).or_default().extend_from_slice(data);
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Bytes> {
        let files = self.files.read().expect("MemBackend files lock poisoned");
        files
            .get(path)
            .map(|v| Bytes::from(v.clone()))
            .ok_or_else(|| Self::not_found(path))
    }

    fn size(&self, path: &Path) -> Result<u64> {
        let files = self.files.read().expect("MemBackend files lock poisoned");
        files
            .get(path)
            .map(|v| v.len() as u64)
            .ok_or_else(|| Self::not_found(path))
    }

    fn sync(&self, path: &Path) -> Result<()> {
        if self.is_file(path) {
            Ok(())
        } else {
            Err(Self::not_found(path))
        }
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut dirs = self.dirs.write().expect("MemBackend dirs lock poisoned");
        if !dirs.contains(path) {
            return Err(Self::not_found(path));
        }
        dirs.retain(|d| !d.starts_with(path));
        let mut files = self.files.write().expect("MemBackend files lock poisoned");
        files.retain(|f, _| !f.starts_with(path));
        Ok(())
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files
            .read()
            .expect("MemBackend files lock poisoned")
            .contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs
            .read()
            .expect("MemBackend dirs lock poisoned")
            .contains(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if !self.is_dir(path) {
            return Err(Self::not_found(path));
        }
        let mut out: Vec<PathBuf> = Vec::new();
        {
            let dirs = self.dirs.read().expect("MemBackend dirs lock poisoned");
            out.extend(
                dirs.iter()
                    .filter(|d| d.parent() == Some(path))
                    .cloned(),
            );
        }
        {
            let files = self.files.read().expect("MemBackend files lock poisoned");
            out.extend(
                files
                    .keys()
                    .filter(|f| f.parent() == Some(path))
                    .cloned(),
            );
        }
        out.sort();
        Ok(out)
    }
}
