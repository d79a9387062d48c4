use std::io;
use thiserror::Error;

/// Unified error type for all Tessera write-path operations.
///
/// The first seven variants are user-recoverable: they are raised before any
/// durable effect, so the caller can fix the input and retry. `Storage` and
/// `Internal` are fatal for the current writer; any in-progress fragment is
/// rolled back before they surface.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid writer configuration or an inconsistent set of query
    /// parameters (unknown config key, missing buffer binding, malformed
    /// subarray, and similar).
    #[error("configuration error: {0}")]
    Config(String),

    /// A user buffer binding whose sizes violate the shape rules of its
    /// field (fixed-size divisibility, offset monotonicity, validity
    /// length).
    #[error("invalid buffer shape for field '{field}': {reason}")]
    InvalidBufferShape { field: String, reason: String },

    /// Two cells carry bit-wise identical coordinate tuples while
    /// deduplication is disabled and the duplicate check is enabled.
    #[error(
        "duplicate coordinates {coords} at positions {first} and {second}"
    )]
    CoordinateDuplicate {
        coords: String,
        first: u64,
        second: u64,
    },

    /// A coordinate lies outside the inclusive domain of its dimension.
    #[error(
        "coordinates {coords} at position {pos} are out of bounds on \
         dimension '{dim}'"
    )]
    CoordinateOutOfBounds {
        dim: String,
        coords: String,
        pos: u64,
    },

    /// A global-order write submitted cells that decrease in the array's
    /// global order.
    #[error("coordinates {coords} at position {pos} violate the global order")]
    CoordinateOutOfOrder { coords: String, pos: u64 },

    /// The per-field cell counts diverged across the buffers of one
    /// submission or across global-order submissions.
    #[error(
        "cell count mismatch: field '{field}' has {actual} cells, \
         expected {expected}"
    )]
    FieldCellCountMismatch {
        field: String,
        expected: u64,
        actual: u64,
    },

    /// The (array type, layout) combination is not a supported write path.
    #[error("unsupported layout '{layout}' for {array_type} write")]
    UnsupportedLayout {
        layout: String,
        array_type: String,
    },

    /// Failure reported by the storage backend.
    #[error("storage error: {0}")]
    Storage(#[from] io::Error),

    /// A broken internal invariant; indicates a bug, not bad input.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error arose before any durable effect and the caller can
    /// fix its input and retry on a fresh writer.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Storage(_) | Error::Internal(_))
    }
}
