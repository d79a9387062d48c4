use crate::error::Error;

/// Result type alias used throughout Tessera.
pub type Result<T> = std::result::Result<T, Error>;
