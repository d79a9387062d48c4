use crate::types::{ByteLen, FormatVersion};

/// Directory under the array URI holding all fragments.
pub const FRAGMENTS_DIR: &str = "__fragments";

/// Serialized fragment metadata file, inside the fragment directory.
pub const FRAGMENT_METADATA_FILE: &str = "__fragment_metadata.tdb";

/// Zero-length commit marker; its presence defines fragment existence.
pub const COMMIT_MARKER_FILE: &str = "__commit";

/// Extension of per-field tile data files.
pub const FIELD_FILE_EXT: &str = "tdb";

/// Suffix of the values file of a var-sized field.
pub const VAR_FILE_SUFFIX: &str = "_var";

/// Suffix of the validity file of a nullable field.
pub const VALIDITY_FILE_SUFFIX: &str = "_validity";

/// Width of one in-tile cell offset (var-sized fields store u64 offsets).
pub const CELL_OFFSET_SIZE: ByteLen = 8;

/// Current fragment format version.
pub const FORMAT_VERSION: FormatVersion = 1;
