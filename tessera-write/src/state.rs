//! State carried across submissions of one global-order query.

use rustc_hash::FxHashMap;

use crate::frag_writer::FragmentWriter;
use crate::schema::ArraySchema;
use crate::tile::{TileBuilder, TileSet};
use crate::types::CellIdx;

/// Created on the first global-layout submission; destroyed by finalize or
/// rollback. Owned by the writer; the in-progress fragment metadata lives
/// inside the fragment writer.
pub struct GlobalWriteState {
    pub frag: FragmentWriter,
    /// Last, possibly partial, tile triple per field.
    pub last_tiles: FxHashMap<String, TileSet>,
    /// Cells accepted per field across all submissions.
    pub cells_written: FxHashMap<String, CellIdx>,
}

impl GlobalWriteState {
    /// Fresh state with one empty full-capacity tile triple per written
    /// field.
    pub fn new(
        frag: FragmentWriter,
        schema: &ArraySchema,
        field_names: &[String],
        cells_per_tile: u64,
    ) -> Self {
        let mut last_tiles = FxHashMap::default();
        let mut cells_written = FxHashMap::default();
        for name in field_names {
            let field = schema
                .field(name)
                .expect("state fields come from the schema");
            last_tiles.insert(
                name.clone(),
                TileBuilder::empty_tileset(field, cells_per_tile),
            );
            cells_written.insert(name.clone(), 0);
        }
        Self {
            frag,
            last_tiles,
            cells_written,
        }
    }

    /// Whether no submission has contributed any cell.
    pub fn is_empty(&self) -> bool {
        self.cells_written.values().all(|&n| n == 0)
    }

    /// Whether every buffered last tile is empty.
    pub fn all_last_tiles_empty(&self) -> bool {
        self.last_tiles.values().all(|t| t.is_empty())
    }
}
