//! In-memory tiles and the per-field tile builder.
//!
//! A [`Tile`] is a fixed-capacity cell buffer, the unit of filtering and
//! on-disk storage. Var-sized fields carry a pair (offsets tile, values
//! tile); nullable fields add a byte-per-cell validity tile. The
//! [`TileBuilder`] accumulates cells for one field, splitting across tile
//! boundaries and rewriting var offsets to be tile-local.

use rustc_hash::FxHashSet;

use crate::buffers::BufferView;
use crate::constants::CELL_OFFSET_SIZE;
use crate::schema::FieldRef;
use crate::types::{ByteLen, CellIdx};

/// One in-memory tile buffer.
#[derive(Debug, Default)]
pub struct Tile {
    data: Vec<u8>,
    cell_num: u64,
    filtered: bool,
    unfiltered_size: u64,
}

impl Tile {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            data: Vec::with_capacity(bytes),
            cell_num: 0,
            filtered: false,
            unfiltered_size: 0,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        debug_assert!(!self.filtered);
        self.data.extend_from_slice(bytes);
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Logical byte size of the tile contents.
    pub fn size(&self) -> ByteLen {
        self.data.len() as u64
    }

    pub fn cell_num(&self) -> u64 {
        self.cell_num
    }

    pub fn is_empty(&self) -> bool {
        self.cell_num == 0
    }

    pub fn filtered(&self) -> bool {
        self.filtered
    }

    /// Take the unfiltered byte image, leaving the tile empty.
    pub fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Install the filter-pipeline output, remembering the pre-filter
    /// logical size for the fragment metadata.
    pub fn set_filtered(&mut self, data: Vec<u8>, unfiltered_size: ByteLen) {
        self.data = data;
        self.filtered = true;
        self.unfiltered_size = unfiltered_size;
    }

    /// Logical byte size before filtering.
    pub fn unfiltered_size(&self) -> ByteLen {
        if self.filtered {
            self.unfiltered_size
        } else {
            self.size()
        }
    }

    fn bump_cells(&mut self, n: u64) {
        self.cell_num += n;
    }
}

/// The tile triple of one field: fixed data (or var offsets), var values,
/// validity.
#[derive(Debug, Default)]
pub struct TileSet {
    pub primary: Tile,
    pub var: Option<Tile>,
    pub validity: Option<Tile>,
}

impl TileSet {
    pub fn cell_num(&self) -> u64 {
        self.primary.cell_num()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }
}

#[derive(Debug, Clone)]
struct FieldShape {
    var_sized: bool,
    nullable: bool,
    /// Per-cell byte size of fixed fields; unused for var.
    cell_size: ByteLen,
    datatype_size: ByteLen,
    /// Empty-cell pattern, `cell_size` bytes (fixed fields).
    fill: Vec<u8>,
}

impl FieldShape {
    fn of(field: FieldRef<'_>) -> Self {
        let cell_size = field.cell_size().unwrap_or(0);
        let fill = field
            .fill_value()
            .map(|f| f.to_vec())
            .unwrap_or_else(|| vec![0u8; cell_size as usize]);
        Self {
            var_sized: field.var_sized(),
            nullable: field.nullable(),
            cell_size,
            datatype_size: field.datatype().size(),
            fill,
        }
    }
}

/// Accumulates cells of one field into a sequence of capacity-bounded
/// tiles.
pub struct TileBuilder {
    shape: FieldShape,
    cells_per_tile: u64,
    tiles: Vec<TileSet>,
    current: TileSet,
}

impl TileBuilder {
    pub fn new(field: FieldRef<'_>, cells_per_tile: u64) -> Self {
        let shape = FieldShape::of(field);
        let current = Self::alloc_tileset(&shape, cells_per_tile);
        Self {
            shape,
            cells_per_tile,
            tiles: Vec::new(),
            current,
        }
    }

    /// Resume from a partially filled tile carried across global-order
    /// submissions.
    pub fn with_seed(
        field: FieldRef<'_>,
        cells_per_tile: u64,
        seed: TileSet,
    ) -> Self {
        let mut builder = Self::new(field, cells_per_tile);
        builder.current = seed;
        builder
    }

    /// Fresh tile triple with full capacity for this field shape.
    pub fn empty_tileset(field: FieldRef<'_>, cells_per_tile: u64) -> TileSet {
        Self::alloc_tileset(&FieldShape::of(field), cells_per_tile)
    }

    fn alloc_tileset(shape: &FieldShape, cells_per_tile: u64) -> TileSet {
        let primary_bytes = if shape.var_sized {
            cells_per_tile * CELL_OFFSET_SIZE
        } else {
            cells_per_tile * shape.cell_size
        };
        TileSet {
            primary: Tile::with_capacity(primary_bytes as usize),
            var: shape.var_sized.then(|| {
                Tile::with_capacity(
                    (cells_per_tile * shape.datatype_size) as usize,
                )
            }),
            validity: shape
                .nullable
                .then(|| Tile::with_capacity(cells_per_tile as usize)),
        }
    }

    fn roll_if_full(&mut self) {
        if self.current.cell_num() == self.cells_per_tile {
            let fresh = Self::alloc_tileset(&self.shape, self.cells_per_tile);
            self.tiles.push(std::mem::replace(&mut self.current, fresh));
        }
    }

    /// Copy one cell from a buffer view.
    pub fn append_cell(&mut self, view: &BufferView<'_>, i: CellIdx) {
        self.roll_if_full();
        let cur = &mut self.current;
        if self.shape.var_sized {
            let var = cur.var.as_mut().expect("var tile missing");
            let local_offset = var.size();
            cur.primary.write(&local_offset.to_le_bytes());
            let bytes = view.cell(i);
            var.write(bytes);
            var.bump_cells(1);
        } else {
            cur.primary.write(view.cell(i));
        }
        if let Some(validity) = cur.validity.as_mut() {
            validity.write(&[view.validity(i)]);
            validity.bump_cells(1);
        }
        cur.primary.bump_cells(1);
    }

    /// Copy cells `[start, end)` in order, skipping original indices in
    /// `skip`.
    pub fn append_range(
        &mut self,
        view: &BufferView<'_>,
        start: CellIdx,
        end: CellIdx,
        skip: Option<&FxHashSet<CellIdx>>,
    ) {
        for i in start..end {
            if skip.is_some_and(|s| s.contains(&i)) {
                continue;
            }
            self.append_cell(view, i);
        }
    }

    /// Copy cells in the order of `positions`, skipping entries whose
    /// original index is in `skip`.
    pub fn append_permuted(
        &mut self,
        view: &BufferView<'_>,
        positions: &[CellIdx],
        skip: Option<&FxHashSet<CellIdx>>,
    ) {
        for &pos in positions {
            if skip.is_some_and(|s| s.contains(&pos)) {
                continue;
            }
            self.append_cell(view, pos);
        }
    }

    /// Write `n` empty cells: the fill pattern for fixed fields, a
    /// zero-length value for var fields, validity 0 for nullable fields.
    pub fn append_empty(&mut self, n: u64) {
        for _ in 0..n {
            self.roll_if_full();
            let cur = &mut self.current;
            if self.shape.var_sized {
                let var = cur.var.as_mut().expect("var tile missing");
                let local_offset = var.size();
                cur.primary.write(&local_offset.to_le_bytes());
                var.bump_cells(1);
            } else {
                cur.primary.write(&self.shape.fill);
            }
            if let Some(validity) = cur.validity.as_mut() {
                validity.write(&[0]);
                validity.bump_cells(1);
            }
            cur.primary.bump_cells(1);
        }
    }

    /// All tiles, the trailing one possibly partial.
    pub fn finish(mut self) -> Vec<TileSet> {
        if !self.current.is_empty() {
            self.tiles.push(self.current);
        }
        self.tiles
    }

    /// Full tiles plus the trailing partial (possibly empty) tile, for
    /// global-order carry-over.
    pub fn finish_keep_last(mut self) -> (Vec<TileSet>, TileSet) {
        if self.current.cell_num() == self.cells_per_tile {
            let fresh = Self::alloc_tileset(&self.shape, self.cells_per_tile);
            self.tiles.push(std::mem::replace(&mut self.current, fresh));
        }
        (self.tiles, self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::RawBuffer;
    use crate::config::WriteConfig;
    use crate::schema::{Attribute, Datatype};

    fn i32_values(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn offsets64(values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn fixed_cells_split_across_tiles() {
        let attr = Attribute::new("a", Datatype::Int32);
        let values = i32_values(&[10, 11, 12, 13, 14]);
        let view = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::fixed(&values),
            &WriteConfig::default(),
        )
        .unwrap();

        let mut builder = TileBuilder::new(FieldRef::Attr(&attr), 2);
        builder.append_range(&view, 0, 5, None);
        let tiles = builder.finish();
        assert_eq!(tiles.len(), 3);
        assert_eq!(tiles[0].cell_num(), 2);
        assert_eq!(tiles[0].primary.data(), i32_values(&[10, 11]));
        assert_eq!(tiles[1].primary.data(), i32_values(&[12, 13]));
        assert_eq!(tiles[2].cell_num(), 1);
        assert_eq!(tiles[2].primary.data(), i32_values(&[14]));
    }

    #[test]
    fn var_offsets_restart_per_tile() {
        let attr = Attribute::var("a", Datatype::StringAscii);
        let values = b"abccddd";
        let offsets = offsets64(&[0, 2, 3, 4]);
        let view = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::var(&offsets, values),
            &WriteConfig::default(),
        )
        .unwrap();

        let mut builder = TileBuilder::new(FieldRef::Attr(&attr), 2);
        builder.append_range(&view, 0, 4, None);
        let tiles = builder.finish();
        assert_eq!(tiles.len(), 2);

        // Tile 0: "ab", "c" with local offsets 0, 2.
        assert_eq!(tiles[0].primary.data(), offsets64(&[0, 2]));
        assert_eq!(tiles[0].var.as_ref().unwrap().data(), b"abc");
        // Tile 1: "c", "ddd" with offsets restarting at 0.
        assert_eq!(tiles[1].primary.data(), offsets64(&[0, 1]));
        assert_eq!(tiles[1].var.as_ref().unwrap().data(), b"cddd");
    }

    #[test]
    fn skip_set_drops_cells() {
        let attr = Attribute::new("a", Datatype::Int32);
        let values = i32_values(&[1, 2, 3, 4]);
        let view = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::fixed(&values),
            &WriteConfig::default(),
        )
        .unwrap();

        let skip: FxHashSet<u64> = [1u64, 3].into_iter().collect();
        let mut builder = TileBuilder::new(FieldRef::Attr(&attr), 10);
        builder.append_range(&view, 0, 4, Some(&skip));
        let tiles = builder.finish();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].primary.data(), i32_values(&[1, 3]));
    }

    #[test]
    fn empty_cells_use_fill_and_zero_validity() {
        let attr = Attribute::new("a", Datatype::Int32)
            .nullable()
            .with_fill((-1i32).to_le_bytes().to_vec());
        let mut builder = TileBuilder::new(FieldRef::Attr(&attr), 4);
        builder.append_empty(2);
        let tiles = builder.finish();
        assert_eq!(tiles[0].primary.data(), i32_values(&[-1, -1]));
        assert_eq!(tiles[0].validity.as_ref().unwrap().data(), &[0, 0]);
    }

    #[test]
    fn seeded_builder_completes_partial_tile() {
        let attr = Attribute::new("a", Datatype::Int32);
        let first = i32_values(&[1, 2, 3]);
        let view = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::fixed(&first),
            &WriteConfig::default(),
        )
        .unwrap();

        let mut builder = TileBuilder::new(FieldRef::Attr(&attr), 4);
        builder.append_range(&view, 0, 3, None);
        let (full, last) = builder.finish_keep_last();
        assert!(full.is_empty());
        assert_eq!(last.cell_num(), 3);

        let second = i32_values(&[4, 5, 6, 7, 8]);
        let view2 = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::fixed(&second),
            &WriteConfig::default(),
        )
        .unwrap();
        let mut builder =
            TileBuilder::with_seed(FieldRef::Attr(&attr), 4, last);
        builder.append_range(&view2, 0, 5, None);
        let (full, last) = builder.finish_keep_last();
        assert_eq!(full.len(), 2);
        assert_eq!(full[0].primary.data(), i32_values(&[1, 2, 3, 4]));
        assert_eq!(full[1].primary.data(), i32_values(&[5, 6, 7, 8]));
        assert!(last.is_empty());
    }
}
