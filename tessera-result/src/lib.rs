//! Error types and result definitions for the Tessera array storage engine.
//!
//! All crates in the workspace share the single [`Error`] enum and the
//! [`Result<T>`] alias. Operations that can fail return `Result<T>` and
//! propagate errors upward with the `?` operator; entry points surface the
//! error kind plus a message naming the offending field and cell index where
//! one applies.

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;
