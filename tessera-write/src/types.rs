//! Core type definitions for the write engine.

/// Position of a cell in the user buffers of one submission.
pub type CellIdx = u64;

/// Position of a tile within a fragment, per field.
pub type TileIdx = u64;

/// A byte length or byte offset.
pub type ByteLen = u64;

/// Milliseconds since 1970-01-01 00:00:00 UTC.
pub type TimestampMs = u64;

/// On-disk fragment format version.
pub type FormatVersion = u32;
