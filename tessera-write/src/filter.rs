//! Filter-pipeline seam.
//!
//! Tile buffers pass through a per-field pipeline before they are persisted.
//! Pipelines must be content-preserving end-to-end: `run_reverse` applied to
//! the output of `run_forward` reconstructs the input byte image. The write
//! path only depends on this contract; compression and encryption filters
//! plug in behind the [`TileFilter`] trait.

use std::fmt;
use std::sync::Arc;

use tessera_result::{Error, Result};

/// One content-preserving tile transform.
pub trait TileFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Transform a tile byte image on the write path.
    fn filter(&self, input: Vec<u8>) -> Result<Vec<u8>>;

    /// Invert [`TileFilter::filter`].
    fn unfilter(&self, input: Vec<u8>) -> Result<Vec<u8>>;
}

/// Ordered filter chain attached to a field by the schema. The default
/// pipeline is empty and leaves tile bytes untouched.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    filters: Vec<Arc<dyn TileFilter>>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, filter: Arc<dyn TileFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Apply all filters in order.
    pub fn run_forward(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        let mut data = data;
        for f in &self.filters {
            data = f.filter(data)?;
        }
        Ok(data)
    }

    /// Undo all filters in reverse order.
    pub fn run_reverse(&self, data: Vec<u8>) -> Result<Vec<u8>> {
        let mut data = data;
        for f in self.filters.iter().rev() {
            data = f.unfilter(data)?;
        }
        Ok(data)
    }
}

impl fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.filters.iter().map(|x| x.name()))
            .finish()
    }
}

/// Prepends an 8-byte additive checksum over the payload; the reverse pass
/// verifies and strips it. Mostly useful to exercise pipeline plumbing and
/// to catch torn tile reads in tests.
#[derive(Debug, Default)]
pub struct ChecksumFilter;

impl ChecksumFilter {
    fn sum(data: &[u8]) -> u64 {
        data.iter().fold(0u64, |acc, &b| acc.wrapping_add(b as u64))
    }
}

impl TileFilter for ChecksumFilter {
    fn name(&self) -> &'static str {
        "checksum"
    }

    fn filter(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8 + input.len());
        out.extend_from_slice(&Self::sum(&input).to_le_bytes());
        out.extend_from_slice(&input);
        Ok(out)
    }

    fn unfilter(&self, input: Vec<u8>) -> Result<Vec<u8>> {
        if input.len() < 8 {
            return Err(Error::Internal(
                "checksum filter: truncated tile".to_string(),
            ));
        }
        let expected = u64::from_le_bytes(input[..8].try_into().unwrap());
        let payload = input[8..].to_vec();
        if Self::sum(&payload) != expected {
            return Err(Error::Internal(
                "checksum filter: tile checksum mismatch".to_string(),
            ));
        }
        Ok(payload)
    }
}
