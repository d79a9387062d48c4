//! Write core of the Tessera multi-dimensional array storage engine.
//!
//! Ingests user-provided cells for the attributes and dimensions of a typed
//! array schema, transforms them into tile-structured fragments, and
//! durably commits those fragments with their metadata (bounding regions,
//! tile placement, validity). Three write layouts share the validation,
//! tiling, filtering, and commit phases: dense ordered, global-order
//! streaming (with carry-over across submissions), and unordered sparse.

pub mod buffers;
pub mod config;
pub mod constants;
pub mod coords;
pub mod dense;
pub mod filter;
pub mod frag_writer;
pub mod fragment;
pub mod fragment_info;
pub mod hilbert;
pub mod orderkey;
pub mod parallel;
pub mod schema;
pub mod state;
pub mod tile;
pub mod types;
pub mod writer;

pub use buffers::{BufferView, RawBuffer};
pub use config::{OffsetsBitsize, OffsetsMode, WriteConfig};
pub use dense::Subarray;
pub use frag_writer::WrittenFragment;
pub use fragment_info::FragmentInfo;
pub use schema::{
    ArraySchema, ArrayType, Attribute, CellOrder, Datatype, Dimension,
    Layout, TileOrder,
};
pub use writer::{Writer, WriterState};
