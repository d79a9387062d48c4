//! Fragment naming and metadata.
//!
//! A fragment is the atomic persistence unit: one directory under the
//! array's `__fragments/` holding per-field tile files, a serialized
//! metadata blob, and a zero-length commit marker whose presence defines
//! fragment existence.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tessera_result::{Error, Result};

use crate::constants::{
    COMMIT_MARKER_FILE, FIELD_FILE_EXT, FRAGMENTS_DIR, FRAGMENT_METADATA_FILE,
    VALIDITY_FILE_SUFFIX, VAR_FILE_SUFFIX,
};
use crate::schema::ArraySchema;
use crate::types::{FormatVersion, TimestampMs};

/// Current UTC epoch milliseconds.
pub fn current_time_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a fragment name `__<t>_<t>_<uuid>_<v>`: the timestamp twice, a
/// freshly generated 128-bit value as 32 lowercase hex digits, and the
/// format version in decimal.
pub fn new_fragment_name(
    timestamp: TimestampMs,
    format_version: FormatVersion,
) -> String {
    let timestamp = if timestamp == 0 {
        current_time_ms()
    } else {
        timestamp
    };
    let uuid: u128 = rand::random();
    format!("__{timestamp}_{timestamp}_{uuid:032x}_{format_version}")
}

/// Components parsed back out of a fragment name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFragmentName {
    pub timestamp_start: TimestampMs,
    pub timestamp_end: TimestampMs,
    pub uuid: String,
    pub version: FormatVersion,
}

/// Parse a fragment name; `None` if the grammar does not match.
pub fn parse_fragment_name(name: &str) -> Option<ParsedFragmentName> {
    let rest = name.strip_prefix("__")?;
    let parts: Vec<&str> = rest.split('_').collect();
    if parts.len() != 4 {
        return None;
    }
    let uuid = parts[2];
    if uuid.len() != 32
        || !uuid.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase())
    {
        return None;
    }
    Some(ParsedFragmentName {
        timestamp_start: parts[0].parse().ok()?,
        timestamp_end: parts[1].parse().ok()?,
        uuid: uuid.to_string(),
        version: parts[3].parse().ok()?,
    })
}

/// Directory holding all fragments of an array.
pub fn fragments_dir(array_uri: &Path) -> PathBuf {
    array_uri.join(FRAGMENTS_DIR)
}

/// Directory of one fragment.
pub fn fragment_dir(array_uri: &Path, name: &str) -> PathBuf {
    fragments_dir(array_uri).join(name)
}

/// Tile data file of a field inside a fragment directory. For var-sized
/// fields this file holds the per-tile offset runs.
pub fn field_file(frag_dir: &Path, field: &str) -> PathBuf {
    frag_dir.join(format!("{field}.{FIELD_FILE_EXT}"))
}

/// Values file of a var-sized field.
pub fn field_var_file(frag_dir: &Path, field: &str) -> PathBuf {
    frag_dir.join(format!("{field}{VAR_FILE_SUFFIX}.{FIELD_FILE_EXT}"))
}

/// Validity stream of a nullable field.
pub fn field_validity_file(frag_dir: &Path, field: &str) -> PathBuf {
    frag_dir.join(format!("{field}{VALIDITY_FILE_SUFFIX}.{FIELD_FILE_EXT}"))
}

pub fn metadata_file(frag_dir: &Path) -> PathBuf {
    frag_dir.join(FRAGMENT_METADATA_FILE)
}

pub fn commit_marker_file(frag_dir: &Path) -> PathBuf {
    frag_dir.join(COMMIT_MARKER_FILE)
}

/// Byte placement and sizes of one tile stream (filtered size on disk,
/// unfiltered logical size).
#[derive(Debug, Clone, Default, PartialEq, Eq, bitcode::Encode, bitcode::Decode)]
pub struct TileExtents {
    pub offsets: Vec<u64>,
    /// `(filtered, unfiltered)` byte sizes, aligned with `offsets`.
    pub sizes: Vec<(u64, u64)>,
}

impl TileExtents {
    pub fn push(&mut self, offset: u64, filtered: u64, unfiltered: u64) {
        self.offsets.push(offset);
        self.sizes.push((filtered, unfiltered));
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Per-tile min/max/sum of an eligible attribute (fixed-width, one value
/// per cell, non-nullable, numeric).
#[derive(Debug, Clone, PartialEq, bitcode::Encode, bitcode::Decode)]
pub struct TileStats {
    pub min: Vec<u8>,
    pub max: Vec<u8>,
    pub sum: f64,
}

/// Metadata of one field within a fragment.
#[derive(Debug, Clone, Default, PartialEq, bitcode::Encode, bitcode::Decode)]
pub struct FieldMeta {
    pub name: String,
    pub tiles: TileExtents,
    pub var_tiles: TileExtents,
    pub validity_tiles: TileExtents,
    pub tile_cell_counts: Vec<u64>,
    pub tile_stats: Vec<Option<TileStats>>,
}

/// Serialized fragment metadata: everything a reader needs to locate and
/// prune tiles.
#[derive(Debug, Clone, PartialEq, bitcode::Encode, bitcode::Decode)]
pub struct FragmentMetadata {
    pub version: FormatVersion,
    pub dense: bool,
    pub timestamp_range: (TimestampMs, TimestampMs),
    pub cell_num: u64,
    pub fields: Vec<FieldMeta>,
    /// Per-tile minimum bounding rectangles, one `(min, max)` pair per
    /// dimension. Sparse fragments only.
    pub mbrs: Vec<Vec<(Vec<u8>, Vec<u8>)>>,
    /// Inclusive `(min, max)` per dimension in native encoding.
    pub non_empty_domain: Vec<(Vec<u8>, Vec<u8>)>,
    pub footer_consolidated: bool,
}

impl FragmentMetadata {
    /// Fresh metadata with one empty [`FieldMeta`] per schema field, in
    /// schema order (dimensions first, for sparse fragments).
    pub fn new(
        schema: &ArraySchema,
        dense: bool,
        timestamp: TimestampMs,
    ) -> Self {
        let fields = schema
            .field_names()
            .iter()
            .filter(|name| !dense || !schema.is_dim(name))
            .map(|name| FieldMeta {
                name: name.to_string(),
                ..FieldMeta::default()
            })
            .collect();
        Self {
            version: crate::constants::FORMAT_VERSION,
            dense,
            timestamp_range: (timestamp, timestamp),
            cell_num: 0,
            fields,
            mbrs: Vec::new(),
            non_empty_domain: Vec::new(),
            footer_consolidated: false,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Result<&mut FieldMeta> {
        self.fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "fragment metadata has no field '{name}'"
                ))
            })
    }

    pub fn serialize(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        bitcode::decode(bytes).map_err(|e| {
            Error::Internal(format!(
                "cannot decode fragment metadata: {e}"
            ))
        })
    }
}
