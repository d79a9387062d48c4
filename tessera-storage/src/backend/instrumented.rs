use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tessera_result::{Error, Result};

use super::StorageBackend;

/// A thread-safe container for backend I/O statistics, plus a write
/// failpoint used by the crash-atomicity tests.
#[derive(Debug)]
pub struct IoStats {
    pub dir_creates: AtomicU64,
    pub appends: AtomicU64,
    pub append_bytes: AtomicU64,
    pub reads: AtomicU64,
    pub syncs: AtomicU64,
    pub removes: AtomicU64,

    /// Remaining write-class operations (append, sync) before injected
    /// failure. Negative means the failpoint is disarmed.
    fail_after_write_ops: AtomicI64,
}

impl Default for IoStats {
    fn default() -> Self {
        Self {
            dir_creates: AtomicU64::new(0),
            appends: AtomicU64::new(0),
            append_bytes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            syncs: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            fail_after_write_ops: AtomicI64::new(-1),
        }
    }
}

impl IoStats {
    /// Arm the failpoint: the next `n` write-class operations (appends and
    /// syncs) succeed, every one after that fails with an injected
    /// `Storage` error until [`IoStats::disarm`] is called.
    pub fn fail_write_ops_after(&self, n: u64) {
        self.fail_after_write_ops.store(n as i64, Ordering::SeqCst);
    }

    /// Disarm the failpoint.
    pub fn disarm(&self) {
        self.fail_after_write_ops.store(-1, Ordering::SeqCst);
    }

    fn consume_write_op(&self) -> Result<()> {
        if self.fail_after_write_ops.load(Ordering::SeqCst) < 0 {
            return Ok(());
        }
        let prev = self.fail_after_write_ops.fetch_sub(1, Ordering::SeqCst);
        if prev <= 0 {
            // Keep the counter pinned at zero so every later op also fails.
            self.fail_after_write_ops.store(0, Ordering::SeqCst);
            return Err(Error::Storage(io::Error::new(
                io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        Ok(())
    }
}

/// A wrapper around any [`StorageBackend`] that counts operations and can
/// inject write failures.
pub struct InstrumentedBackend<B> {
    inner: B,
    stats: Arc<IoStats>,
}

impl<B: StorageBackend> InstrumentedBackend<B> {
    /// Wraps a backend and returns the instrumented version along with a
    /// handle to its statistics and failpoint.
    pub fn new(inner: B) -> (Self, Arc<IoStats>) {
        let stats = Arc::new(IoStats::default());
        (
            Self {
                inner,
                stats: Arc::clone(&stats),
            },
            stats,
        )
    }
}

impl<B: StorageBackend> StorageBackend for InstrumentedBackend<B> {
    fn create_dir(&self, path: &Path) -> Result<()> {
        self.stats.dir_creates.fetch_add(1, Ordering::Relaxed);
        self.inner.create_dir(path)
    }

    fn append(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.stats.consume_write_op()?;
        self.stats.appends.fetch_add(1, Ordering::Relaxed);
        self.stats
            .append_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.inner.append(path, data)
    }

    fn read(&self, path: &Path) -> Result<Bytes> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.inner.read(path)
    }

    fn size(&self, path: &Path) -> Result<u64> {
        self.inner.size(path)
    }

    fn sync(&self, path: &Path) -> Result<()> {
        self.stats.consume_write_op()?;
        self.stats.syncs.fetch_add(1, Ordering::Relaxed);
        self.inner.sync(path)
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        self.stats.removes.fetch_add(1, Ordering::Relaxed);
        self.inner.remove_dir_all(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        self.inner.is_file(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        self.inner.list_dir(path)
    }
}
