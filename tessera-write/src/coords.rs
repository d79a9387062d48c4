//! Coordinate validation, ordering, and deduplication for sparse writes.
//!
//! The engine operates on one [`BufferView`] per dimension (after zipped
//! coordinates are split) and produces the sort permutation plus the set of
//! duplicate positions to discard. Fixed-size coordinates compare through
//! their order keys; var-sized coordinates compare as raw bytes,
//! lexicographically. Duplicate detection is bit-wise equality of the whole
//! coordinate tuple.

use std::cmp::Ordering;

use rustc_hash::FxHashSet;
use tessera_result::{Error, Result};

use crate::buffers::BufferView;
use crate::hilbert::Hilbert;
use crate::orderkey::order_key;
use crate::schema::{ArraySchema, CellOrder};
use crate::types::CellIdx;

/// Split a zipped coordinates buffer into one owned buffer per dimension
/// (strided copy). All dimensions must be fixed-size.
pub fn split_zipped(
    schema: &ArraySchema,
    zipped: &[u8],
) -> Result<Vec<Vec<u8>>> {
    let tuple_size = schema.coords_cell_size()? as usize;
    if tuple_size == 0 || zipped.len() % tuple_size != 0 {
        return Err(Error::InvalidBufferShape {
            field: "__coords".to_string(),
            reason: format!(
                "zipped coordinates size {} is not a multiple of the \
                 coordinate tuple size {tuple_size}",
                zipped.len()
            ),
        });
    }
    let cell_num = zipped.len() / tuple_size;

    let mut out: Vec<Vec<u8>> = schema
        .dimensions
        .iter()
        .map(|d| Vec::with_capacity(cell_num * d.datatype.size() as usize))
        .collect();
    for cell in zipped.chunks_exact(tuple_size) {
        let mut at = 0usize;
        for (d, dim) in schema.dimensions.iter().enumerate() {
            let size = dim.datatype.size() as usize;
            out[d].extend_from_slice(&cell[at..at + size]);
            at += size;
        }
    }
    Ok(out)
}

/// Validates and orders the coordinates of one submission.
#[derive(Debug)]
pub struct CoordinateEngine<'a> {
    schema: &'a ArraySchema,
    views: &'a [BufferView<'a>],
    cell_num: u64,
}

impl<'a> CoordinateEngine<'a> {
    /// `views` holds one view per dimension, in schema order. All views
    /// must agree on the cell count.
    pub fn new(
        schema: &'a ArraySchema,
        views: &'a [BufferView<'a>],
    ) -> Result<Self> {
        debug_assert_eq!(views.len(), schema.dim_num());
        let cell_num = views.first().map(|v| v.cell_num()).unwrap_or(0);
        for (dim, view) in schema.dimensions.iter().zip(views) {
            if view.cell_num() != cell_num {
                return Err(Error::FieldCellCountMismatch {
                    field: dim.name.clone(),
                    expected: cell_num,
                    actual: view.cell_num(),
                });
            }
        }
        Ok(Self {
            schema,
            views,
            cell_num,
        })
    }

    pub fn cell_num(&self) -> u64 {
        self.cell_num
    }

    fn dim_cmp(&self, d: usize, a: CellIdx, b: CellIdx) -> Ordering {
        let dim = &self.schema.dimensions[d];
        let (va, vb) = (self.views[d].cell(a), self.views[d].cell(b));
        if dim.var_sized {
            va.cmp(vb)
        } else {
            order_key(va, dim.datatype).cmp(&order_key(vb, dim.datatype))
        }
    }

    /// Row-major tuple comparison (also the tie-break order).
    fn cmp_row(&self, a: CellIdx, b: CellIdx) -> Ordering {
        for d in 0..self.schema.dim_num() {
            match self.dim_cmp(d, a, b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    fn cmp_col(&self, a: CellIdx, b: CellIdx) -> Ordering {
        for d in (0..self.schema.dim_num()).rev() {
            match self.dim_cmp(d, a, b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Bit-wise equality of the full coordinate tuple.
    fn tuples_equal(&self, a: CellIdx, b: CellIdx) -> bool {
        self.views.iter().all(|v| v.cell(a) == v.cell(b))
    }

    /// Hilbert value per cell, quantised against the dimension domains.
    pub fn hilbert_values(&self) -> Vec<u64> {
        let bits = self.schema.hilbert_bits();
        let hilbert = Hilbert::new(self.schema.dim_num(), bits);
        let buckets = (1u128 << bits) - 1;

        let mut point = vec![0u64; self.schema.dim_num()];
        let mut out = Vec::with_capacity(self.cell_num as usize);
        for i in 0..self.cell_num {
            for (d, dim) in self.schema.dimensions.iter().enumerate() {
                let cell = self.views[d].cell(i);
                point[d] = match (&dim.domain, dim.var_sized) {
                    (Some((lo, hi)), false) => {
                        let klo = order_key(lo, dim.datatype);
                        let khi = order_key(hi, dim.datatype);
                        let k = order_key(cell, dim.datatype)
                            .clamp(klo, khi);
                        if khi > klo {
                            ((k - klo) as u128 * buckets
                                / (khi - klo) as u128)
                                as u64
                        } else {
                            0
                        }
                    }
                    // Unbounded (var-sized) dimensions quantise on the
                    // first eight bytes, big-endian.
                    _ => {
                        let mut prefix = [0u8; 8];
                        let take = cell.len().min(8);
                        prefix[..take].copy_from_slice(&cell[..take]);
                        u64::from_be_bytes(prefix) >> (64 - bits)
                    }
                };
            }
            out.push(hilbert.value(&point));
        }
        out
    }

    /// Stable sort permutation in the schema's global cell order. Ties keep
    /// submission order.
    pub fn sort_positions(&self) -> Vec<CellIdx> {
        let mut pos: Vec<CellIdx> = (0..self.cell_num).collect();
        match self.schema.cell_order {
            CellOrder::RowMajor => {
                pos.sort_by(|&a, &b| self.cmp_row(a, b));
            }
            CellOrder::ColMajor => {
                pos.sort_by(|&a, &b| self.cmp_col(a, b));
            }
            CellOrder::Hilbert => {
                let values = self.hilbert_values();
                // Key on (hilbert value, raw tuple); stability alone is not
                // relied upon for reproducibility across equal values.
                pos.sort_by(|&a, &b| {
                    values[a as usize]
                        .cmp(&values[b as usize])
                        .then_with(|| self.cmp_row(a, b))
                });
            }
        }
        pos
    }

    /// Positions (second and later of each run) of duplicate tuples in a
    /// sorted permutation.
    pub fn find_duplicates(
        &self,
        cell_pos: &[CellIdx],
    ) -> FxHashSet<CellIdx> {
        let mut dups = FxHashSet::default();
        for w in cell_pos.windows(2) {
            if self.tuples_equal(w[0], w[1]) {
                dups.insert(w[1]);
            }
        }
        dups
    }

    /// Error on the first duplicate pair in a sorted permutation.
    pub fn check_duplicates(&self, cell_pos: &[CellIdx]) -> Result<()> {
        for w in cell_pos.windows(2) {
            if self.tuples_equal(w[0], w[1]) {
                return Err(Error::CoordinateDuplicate {
                    coords: self.coords_to_str(w[1]),
                    first: w[0],
                    second: w[1],
                });
            }
        }
        Ok(())
    }

    /// Duplicates of cells already laid out in the global order
    /// (global-layout submissions): duplicate runs are adjacent in
    /// submission order.
    pub fn find_duplicates_sorted(&self) -> FxHashSet<CellIdx> {
        let mut dups = FxHashSet::default();
        for i in 1..self.cell_num {
            if self.tuples_equal(i - 1, i) {
                dups.insert(i);
            }
        }
        dups
    }

    pub fn check_duplicates_sorted(&self) -> Result<()> {
        for i in 1..self.cell_num {
            if self.tuples_equal(i - 1, i) {
                return Err(Error::CoordinateDuplicate {
                    coords: self.coords_to_str(i),
                    first: i - 1,
                    second: i,
                });
            }
        }
        Ok(())
    }

    /// Every coordinate must lie inside the inclusive dimension domain.
    pub fn check_out_of_bounds(&self) -> Result<()> {
        for (d, dim) in self.schema.dimensions.iter().enumerate() {
            let Some((lo, hi)) = &dim.domain else {
                continue;
            };
            for i in 0..self.cell_num {
                let cell = self.views[d].cell(i);
                let inside = if dim.var_sized {
                    cell >= lo.as_slice() && cell <= hi.as_slice()
                } else {
                    let k = order_key(cell, dim.datatype);
                    k >= order_key(lo, dim.datatype)
                        && k <= order_key(hi, dim.datatype)
                };
                if !inside {
                    return Err(Error::CoordinateOutOfBounds {
                        dim: dim.name.clone(),
                        coords: self.coords_to_str(i),
                        pos: i,
                    });
                }
            }
        }
        Ok(())
    }

    /// Verify the submission order is non-decreasing in the global order.
    /// Equal tuples are left to the duplicate machinery.
    pub fn check_global_order(&self) -> Result<()> {
        if self.cell_num < 2 {
            return Ok(());
        }
        let hilbert = matches!(self.schema.cell_order, CellOrder::Hilbert)
            .then(|| self.hilbert_values());
        for i in 1..self.cell_num {
            let ord = match (&hilbert, self.schema.cell_order) {
                (Some(values), _) => values[(i - 1) as usize]
                    .cmp(&values[i as usize])
                    .then_with(|| self.cmp_row(i - 1, i)),
                (None, CellOrder::ColMajor) => self.cmp_col(i - 1, i),
                (None, _) => self.cmp_row(i - 1, i),
            };
            if ord == Ordering::Greater {
                return Err(Error::CoordinateOutOfOrder {
                    coords: self.coords_to_str(i),
                    pos: i,
                });
            }
        }
        Ok(())
    }

    /// Stringified coordinate tuple for error messages.
    pub fn coords_to_str(&self, i: CellIdx) -> String {
        let parts: Vec<String> = self
            .schema
            .dimensions
            .iter()
            .enumerate()
            .map(|(d, dim)| {
                dim.datatype.value_to_string(self.views[d].cell(i))
            })
            .collect();
        format!("({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::RawBuffer;
    use crate::config::WriteConfig;
    use crate::schema::{
        ArraySchema, ArrayType, Attribute, Datatype, Dimension, FieldRef,
    };

    fn i32_bytes(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn schema_2d(cell_order: CellOrder) -> ArraySchema {
        ArraySchema::new(ArrayType::Sparse)
            .with_dimension(Dimension::int32("x", (0, 15), None))
            .with_dimension(Dimension::int32("y", (0, 15), None))
            .with_attribute(Attribute::new("a", Datatype::Int32))
            .with_cell_order(cell_order)
    }

    fn views<'a>(
        schema: &'a ArraySchema,
        bufs: &'a [Vec<u8>],
    ) -> Vec<BufferView<'a>> {
        schema
            .dimensions
            .iter()
            .zip(bufs)
            .map(|(d, b)| {
                BufferView::new(
                    FieldRef::Dim(d),
                    RawBuffer::fixed(b),
                    &WriteConfig::default(),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn row_major_sort_is_stable() {
        let schema = schema_2d(CellOrder::RowMajor);
        let bufs = vec![i32_bytes(&[3, 1, 3, 1]), i32_bytes(&[0, 2, 0, 1])];
        let v = views(&schema, &bufs);
        let engine = CoordinateEngine::new(&schema, &v).unwrap();
        // (1,1) < (1,2) < (3,0) == (3,0); the tie keeps submission order.
        assert_eq!(engine.sort_positions(), vec![3, 1, 0, 2]);
    }

    #[test]
    fn col_major_reverses_dimension_significance() {
        let schema = schema_2d(CellOrder::ColMajor);
        let bufs = vec![i32_bytes(&[0, 1, 2]), i32_bytes(&[2, 1, 0])];
        let v = views(&schema, &bufs);
        let engine = CoordinateEngine::new(&schema, &v).unwrap();
        assert_eq!(engine.sort_positions(), vec![2, 1, 0]);
    }

    #[test]
    fn duplicates_are_second_and_later() {
        let schema = schema_2d(CellOrder::RowMajor);
        let bufs = vec![i32_bytes(&[5, 2, 5, 5]), i32_bytes(&[1, 1, 1, 1])];
        let v = views(&schema, &bufs);
        let engine = CoordinateEngine::new(&schema, &v).unwrap();
        let pos = engine.sort_positions();
        let dups = engine.find_duplicates(&pos);
        // Three copies of (5,1): positions 2 and 3 are the extras.
        assert_eq!(dups.len(), 2);
        assert!(dups.contains(&2) && dups.contains(&3));

        let err = engine.check_duplicates(&pos).unwrap_err();
        match err {
            Error::CoordinateDuplicate { first, second, .. } => {
                assert_eq!((first, second), (0, 2));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn out_of_bounds_reports_dimension_and_position() {
        let schema = schema_2d(CellOrder::RowMajor);
        let bufs = vec![i32_bytes(&[3, 99]), i32_bytes(&[3, 4])];
        let v = views(&schema, &bufs);
        let engine = CoordinateEngine::new(&schema, &v).unwrap();
        match engine.check_out_of_bounds().unwrap_err() {
            Error::CoordinateOutOfBounds { dim, pos, coords } => {
                assert_eq!(dim, "x");
                assert_eq!(pos, 1);
                assert!(coords.contains("99"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn global_order_check_flags_decrease_only() {
        let schema = schema_2d(CellOrder::RowMajor);
        let ordered = vec![i32_bytes(&[1, 2, 2]), i32_bytes(&[5, 0, 0])];
        let v = views(&schema, &ordered);
        let engine = CoordinateEngine::new(&schema, &v).unwrap();
        engine.check_global_order().unwrap();

        let unordered = vec![i32_bytes(&[2, 1]), i32_bytes(&[0, 5])];
        let v = views(&schema, &unordered);
        let engine = CoordinateEngine::new(&schema, &v).unwrap();
        match engine.check_global_order().unwrap_err() {
            Error::CoordinateOutOfOrder { pos, .. } => assert_eq!(pos, 1),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn hilbert_sort_breaks_ties_on_raw_tuple() {
        let schema = schema_2d(CellOrder::Hilbert);
        let bufs = vec![i32_bytes(&[4, 0, 4]), i32_bytes(&[4, 0, 4])];
        let v = views(&schema, &bufs);
        let engine = CoordinateEngine::new(&schema, &v).unwrap();
        let pos = engine.sort_positions();
        // (0,0) sorts first; the two (4,4) duplicates keep submission
        // order.
        assert_eq!(pos, vec![1, 0, 2]);
    }

    #[test]
    fn mismatched_dim_counts_rejected() {
        let schema = schema_2d(CellOrder::RowMajor);
        let bufs = vec![i32_bytes(&[1, 2]), i32_bytes(&[1, 2, 3])];
        let v = views(&schema, &bufs);
        let err = CoordinateEngine::new(&schema, &v).unwrap_err();
        assert!(matches!(err, Error::FieldCellCountMismatch { .. }));
    }

    #[test]
    fn split_zipped_coordinates() {
        let schema = schema_2d(CellOrder::RowMajor);
        // Tuples (1,2), (3,4).
        let zipped = i32_bytes(&[1, 2, 3, 4]);
        let split = split_zipped(&schema, &zipped).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split[0], i32_bytes(&[1, 3]));
        assert_eq!(split[1], i32_bytes(&[2, 4]));

        let ragged = i32_bytes(&[1, 2, 3]);
        assert!(split_zipped(&schema, &ragged).is_err());
    }
}
