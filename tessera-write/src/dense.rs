//! Dense subarray tiling.
//!
//! Maps a contiguous multi-dimensional region to the ordered sequence of
//! tile indices that intersect it and, per tile, to the source cell index
//! in the user buffer for every cell slot (or `None` for slots outside the
//! subarray, which the tile builder fills with empty cells). Tiles are
//! enumerated in the schema's tile order and cells within a tile in the
//! schema's cell order, so the on-disk output is independent of the user's
//! cell layout.

use tessera_result::{Error, Result};

use crate::schema::{ArraySchema, CellOrder, Layout, TileOrder};
use crate::types::{CellIdx, TileIdx};

/// One inclusive range per dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subarray {
    pub ranges: Vec<(i64, i64)>,
}

impl Subarray {
    pub fn new(ranges: Vec<(i64, i64)>) -> Self {
        Self { ranges }
    }

    /// Number of cells covered.
    pub fn cell_num(&self) -> u64 {
        self.ranges
            .iter()
            .map(|&(lo, hi)| (hi - lo + 1) as u64)
            .product()
    }

    /// Well-formedness against a dense schema: one range per dimension,
    /// non-empty, inside the domain.
    pub fn check(&self, schema: &ArraySchema) -> Result<()> {
        if self.ranges.len() != schema.dim_num() {
            return Err(Error::Config(format!(
                "subarray has {} ranges, schema has {} dimensions",
                self.ranges.len(),
                schema.dim_num()
            )));
        }
        for (dim, &(lo, hi)) in schema.dimensions.iter().zip(&self.ranges) {
            let (dom_lo, dom_hi) = dim.domain_i64()?;
            if lo > hi || lo < dom_lo || hi > dom_hi {
                return Err(Error::Config(format!(
                    "subarray range [{lo}, {hi}] is invalid for dimension \
                     '{}' with domain [{dom_lo}, {dom_hi}]",
                    dim.name
                )));
            }
        }
        Ok(())
    }
}

/// Decompose `idx` into per-dimension offsets over `dims`.
fn unrank(mut idx: u64, dims: &[i64], row_major: bool) -> Vec<i64> {
    let n = dims.len();
    let mut out = vec![0i64; n];
    if row_major {
        for d in (0..n).rev() {
            out[d] = (idx % dims[d] as u64) as i64;
            idx /= dims[d] as u64;
        }
    } else {
        for d in 0..n {
            out[d] = (idx % dims[d] as u64) as i64;
            idx /= dims[d] as u64;
        }
    }
    out
}

/// Linearize per-dimension offsets over `dims`.
fn rank(offsets: &[i64], dims: &[i64], row_major: bool) -> u64 {
    let mut idx = 0u64;
    if row_major {
        for (off, dim) in offsets.iter().zip(dims) {
            idx = idx * *dim as u64 + *off as u64;
        }
    } else {
        for (off, dim) in offsets.iter().zip(dims).rev() {
            idx = idx * *dim as u64 + *off as u64;
        }
    }
    idx
}

pub struct DenseTiler<'a> {
    subarray: &'a Subarray,
    /// User cell layout of the input buffer over the subarray.
    user_row_major: bool,
    cell_row_major: bool,
    tile_row_major: bool,
    dom_lo: Vec<i64>,
    extents: Vec<i64>,
    /// First intersecting tile per dimension, in grid coordinates.
    tile_lo: Vec<i64>,
    /// Intersecting tiles per dimension.
    tile_counts: Vec<i64>,
    sub_extents: Vec<i64>,
}

impl<'a> DenseTiler<'a> {
    pub fn new(
        schema: &'a ArraySchema,
        subarray: &'a Subarray,
        user_layout: Layout,
    ) -> Result<Self> {
        let user_row_major = match user_layout {
            Layout::RowMajor => true,
            Layout::ColMajor => false,
            other => {
                return Err(Error::Internal(format!(
                    "dense tiler invoked with layout {}",
                    other.as_str()
                )))
            }
        };
        if schema.cell_order == CellOrder::Hilbert {
            return Err(Error::Config(
                "dense arrays do not support the hilbert cell order"
                    .to_string(),
            ));
        }
        subarray.check(schema)?;

        let mut dom_lo = Vec::new();
        let mut extents = Vec::new();
        let mut tile_lo = Vec::new();
        let mut tile_counts = Vec::new();
        let mut sub_extents = Vec::new();
        for (dim, &(lo, hi)) in schema.dimensions.iter().zip(&subarray.ranges)
        {
            let (dlo, _) = dim.domain_i64()?;
            let extent = dim.extent_i64()?;
            let t_lo = (lo - dlo) / extent;
            let t_hi = (hi - dlo) / extent;
            dom_lo.push(dlo);
            extents.push(extent);
            tile_lo.push(t_lo);
            tile_counts.push(t_hi - t_lo + 1);
            sub_extents.push(hi - lo + 1);
        }

        Ok(Self {
            subarray,
            user_row_major,
            cell_row_major: schema.cell_order == CellOrder::RowMajor,
            tile_row_major: schema.tile_order == TileOrder::RowMajor,
            dom_lo,
            extents,
            tile_lo,
            tile_counts,
            sub_extents,
        })
    }

    /// Number of tiles intersecting the subarray.
    pub fn tile_num(&self) -> u64 {
        self.tile_counts.iter().map(|&c| c as u64).product()
    }

    pub fn cells_per_tile(&self) -> u64 {
        self.extents.iter().map(|&e| e as u64).product()
    }

    /// Source mapping of the `t`-th intersecting tile: one entry per cell
    /// slot in the schema cell order, holding the user-buffer cell index or
    /// `None` for slots outside the subarray.
    pub fn tile_cell_map(&self, t: TileIdx) -> Vec<Option<CellIdx>> {
        let n = self.dom_lo.len();
        let tile_rel = unrank(t, &self.tile_counts, self.tile_row_major);

        // Low cell coordinate of this tile, per dimension.
        let tile_start: Vec<i64> = (0..n)
            .map(|d| {
                self.dom_lo[d]
                    + (self.tile_lo[d] + tile_rel[d]) * self.extents[d]
            })
            .collect();

        let cells = self.cells_per_tile();
        let mut map = Vec::with_capacity(cells as usize);
        let mut sub_off = vec![0i64; n];
        'slots: for s in 0..cells {
            let off = unrank(s, &self.extents, self.cell_row_major);
            for d in 0..n {
                let g = tile_start[d] + off[d];
                let (lo, hi) = self.subarray.ranges[d];
                if g < lo || g > hi {
                    map.push(None);
                    continue 'slots;
                }
                sub_off[d] = g - lo;
            }
            map.push(Some(rank(
                &sub_off,
                &self.sub_extents,
                self.user_row_major,
            )));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArrayType, Attribute, Datatype, Dimension};

    fn schema_1d() -> ArraySchema {
        ArraySchema::new(ArrayType::Dense)
            .with_dimension(Dimension::int32("d", (0, 7), Some(4)))
            .with_attribute(Attribute::new("a", Datatype::Int32))
    }

    #[test]
    fn full_domain_1d_maps_identity() {
        let schema = schema_1d();
        let subarray = Subarray::new(vec![(0, 7)]);
        let tiler =
            DenseTiler::new(&schema, &subarray, Layout::RowMajor).unwrap();
        assert_eq!(tiler.tile_num(), 2);
        assert_eq!(tiler.cells_per_tile(), 4);
        assert_eq!(
            tiler.tile_cell_map(0),
            vec![Some(0), Some(1), Some(2), Some(3)]
        );
        assert_eq!(
            tiler.tile_cell_map(1),
            vec![Some(4), Some(5), Some(6), Some(7)]
        );
    }

    #[test]
    fn boundary_cells_are_empty() {
        let schema = schema_1d();
        let subarray = Subarray::new(vec![(1, 6)]);
        let tiler =
            DenseTiler::new(&schema, &subarray, Layout::RowMajor).unwrap();
        assert_eq!(
            tiler.tile_cell_map(0),
            vec![None, Some(0), Some(1), Some(2)]
        );
        assert_eq!(
            tiler.tile_cell_map(1),
            vec![Some(3), Some(4), Some(5), None]
        );
    }

    #[test]
    fn two_dims_row_major() {
        let schema = ArraySchema::new(ArrayType::Dense)
            .with_dimension(Dimension::int32("x", (0, 3), Some(2)))
            .with_dimension(Dimension::int32("y", (0, 3), Some(2)))
            .with_attribute(Attribute::new("a", Datatype::Int32));
        let subarray = Subarray::new(vec![(0, 3), (0, 3)]);
        let tiler =
            DenseTiler::new(&schema, &subarray, Layout::RowMajor).unwrap();
        assert_eq!(tiler.tile_num(), 4);
        // Tile 0 covers x in [0,1], y in [0,1]; the 4x4 user buffer is
        // row-major.
        assert_eq!(
            tiler.tile_cell_map(0),
            vec![Some(0), Some(1), Some(4), Some(5)]
        );
        // Tile 1 covers x in [0,1], y in [2,3].
        assert_eq!(
            tiler.tile_cell_map(1),
            vec![Some(2), Some(3), Some(6), Some(7)]
        );
    }

    #[test]
    fn col_major_user_buffer_changes_sources_only() {
        let schema = ArraySchema::new(ArrayType::Dense)
            .with_dimension(Dimension::int32("x", (0, 3), Some(2)))
            .with_dimension(Dimension::int32("y", (0, 3), Some(2)))
            .with_attribute(Attribute::new("a", Datatype::Int32));
        let subarray = Subarray::new(vec![(0, 3), (0, 3)]);
        let tiler =
            DenseTiler::new(&schema, &subarray, Layout::ColMajor).unwrap();
        // Same slots, but sources index a column-major user buffer.
        assert_eq!(
            tiler.tile_cell_map(0),
            vec![Some(0), Some(4), Some(1), Some(5)]
        );
    }

    #[test]
    fn subarray_validation() {
        let schema = schema_1d();
        assert!(Subarray::new(vec![(0, 8)]).check(&schema).is_err());
        assert!(Subarray::new(vec![(5, 3)]).check(&schema).is_err());
        assert!(Subarray::new(vec![(0, 3), (0, 3)]).check(&schema).is_err());
        Subarray::new(vec![(2, 5)]).check(&schema).unwrap();
    }
}
