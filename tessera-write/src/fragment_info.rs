//! Committed-fragment listing for an array.
//!
//! Readers (and the vacuum path) recognise a fragment only when its commit
//! marker is present; directories without one are surfaced separately as
//! reclamation candidates.

use std::path::{Path, PathBuf};

use tessera_result::Result;
use tessera_storage::StorageBackend;

use crate::fragment::{
    commit_marker_file, fragments_dir, metadata_file, parse_fragment_name,
    FragmentMetadata,
};
use crate::types::{FormatVersion, TimestampMs};

/// Summary of one committed fragment.
#[derive(Debug, Clone)]
pub struct SingleFragmentInfo {
    pub name: String,
    pub uri: PathBuf,
    pub version: FormatVersion,
    pub timestamp_range: (TimestampMs, TimestampMs),
    pub dense: bool,
    pub cell_num: u64,
    /// Total on-disk size of the fragment directory in bytes.
    pub size_bytes: u64,
    pub non_empty_domain: Vec<(Vec<u8>, Vec<u8>)>,
}

/// All fragments of one array, committed and not.
#[derive(Debug, Clone, Default)]
pub struct FragmentInfo {
    /// Committed fragments, ordered by (start timestamp, name).
    pub fragments: Vec<SingleFragmentInfo>,
    /// Fragment directories without a commit marker; safe to remove.
    pub uncommitted: Vec<PathBuf>,
}

impl FragmentInfo {
    pub fn load(
        backend: &dyn StorageBackend,
        array_uri: &Path,
    ) -> Result<Self> {
        let dir = fragments_dir(array_uri);
        if !backend.is_dir(&dir) {
            return Ok(Self::default());
        }

        let mut info = Self::default();
        for entry in backend.list_dir(&dir)? {
            if !backend.is_dir(&entry) {
                continue;
            }
            let Some(name) = entry.file_name().and_then(|n| n.to_str())
            else {
                continue;
            };
            let Some(parsed) = parse_fragment_name(name) else {
                continue;
            };
            if !backend.is_file(&commit_marker_file(&entry)) {
                info.uncommitted.push(entry);
                continue;
            }

            let meta_bytes = backend.read(&metadata_file(&entry))?;
            let meta = FragmentMetadata::deserialize(&meta_bytes)?;

            let mut size_bytes = 0;
            for file in backend.list_dir(&entry)? {
                if backend.is_file(&file) {
                    size_bytes += backend.size(&file)?;
                }
            }

            info.fragments.push(SingleFragmentInfo {
                name: name.to_string(),
                uri: entry,
                version: parsed.version,
                timestamp_range: meta.timestamp_range,
                dense: meta.dense,
                cell_num: meta.cell_num,
                size_bytes,
                non_empty_domain: meta.non_empty_domain,
            });
        }
        info.fragments.sort_by(|a, b| {
            (a.timestamp_range.0, &a.name).cmp(&(b.timestamp_range.0, &b.name))
        });
        Ok(info)
    }

    pub fn fragment_num(&self) -> usize {
        self.fragments.len()
    }

    /// Whether a committed fragment by this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.fragments.iter().any(|f| f.name == name)
    }
}
