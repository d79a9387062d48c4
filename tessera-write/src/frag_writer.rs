//! Fragment writer: filters tile buffers, appends them to per-field files,
//! accumulates metadata (tile placement, MBRs, per-tile stats), and drives
//! the three-step durable commit.
//!
//! Commit order: tile data files are flushed first, then the serialized
//! metadata, then the zero-length commit marker. The marker flush is the
//! linearisation point; a fragment directory without it is invisible to
//! readers and eligible for reclamation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tessera_result::{Error, Result};
use tessera_storage::StorageBackend;
use tracing::debug;

use crate::constants::{CELL_OFFSET_SIZE, FORMAT_VERSION};
use crate::filter::FilterPipeline;
use crate::fragment::{
    commit_marker_file, current_time_ms, field_file, field_validity_file,
    field_var_file, fragment_dir, metadata_file, new_fragment_name,
    FragmentMetadata, TileStats,
};
use crate::orderkey::order_key;
use crate::parallel::with_thread_pool;
use crate::schema::{ArraySchema, Attribute, Dimension, FieldRef};
use crate::tile::{Tile, TileSet};
use crate::types::{ByteLen, TimestampMs};

/// Record of one durably committed fragment.
#[derive(Debug, Clone)]
pub struct WrittenFragment {
    pub name: String,
    pub uri: PathBuf,
    pub timestamp_range: (TimestampMs, TimestampMs),
}

#[derive(Debug, Default, Clone, Copy)]
struct FileCursors {
    primary: ByteLen,
    var: ByteLen,
    validity: ByteLen,
}

pub struct FragmentWriter {
    backend: Arc<dyn StorageBackend>,
    dir: PathBuf,
    name: String,
    meta: FragmentMetadata,
    cursors: FxHashMap<String, FileCursors>,
    thread_num: usize,
}

impl FragmentWriter {
    /// Allocate a fragment URI and create its directory.
    pub fn create(
        backend: Arc<dyn StorageBackend>,
        array_uri: &Path,
        schema: &ArraySchema,
        dense: bool,
        timestamp: TimestampMs,
        thread_num: usize,
    ) -> Result<Self> {
        let timestamp = if timestamp == 0 {
            current_time_ms()
        } else {
            timestamp
        };
        let name = new_fragment_name(timestamp, FORMAT_VERSION);
        let dir = fragment_dir(array_uri, &name);
        backend.create_dir(&dir)?;
        debug!(fragment = %name, "created fragment directory");
        Ok(Self {
            backend,
            dir,
            name,
            meta: FragmentMetadata::new(schema, dense, timestamp),
            cursors: FxHashMap::default(),
            thread_num,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn timestamp_start(&self) -> TimestampMs {
        self.meta.timestamp_range.0
    }

    pub fn set_non_empty_domain(
        &mut self,
        domain: Vec<(Vec<u8>, Vec<u8>)>,
    ) {
        self.meta.non_empty_domain = domain;
    }

    /// Filter and persist one batch of tiles across fields.
    ///
    /// `tiles` holds `(field name, tile sets)` pairs in schema field order;
    /// every field carries the same number of tiles, aligned by tile index.
    /// For sparse fragments the dimension fields must be present so MBRs
    /// can be derived before filtering.
    pub fn write_all_tiles(
        &mut self,
        schema: &ArraySchema,
        mut tiles: Vec<(String, Vec<TileSet>)>,
    ) -> Result<()> {
        if tiles.is_empty() || tiles[0].1.is_empty() {
            return Ok(());
        }

        // Cell accounting from the first field; all fields align.
        let batch_cells: u64 =
            tiles[0].1.iter().map(|t| t.cell_num()).sum();
        self.meta.cell_num += batch_cells;

        if !self.meta.dense {
            self.record_mbrs(schema, &tiles)?;
        }
        self.record_stats(schema, &tiles)?;

        // Filter phase: fields in parallel and, per field, tiles in
        // parallel. Tile buffers are disjoint, so workers share nothing.
        with_thread_pool(self.thread_num, || {
            tiles.par_iter_mut().try_for_each(|(name, sets)| {
                let pipeline = schema.field_filters(name);
                sets.par_iter_mut()
                    .try_for_each(|set| filter_tileset(pipeline, set))
            })
        })?;

        // Append phase: strictly in field order then tile-index order, so
        // the observable output is independent of the worker count.
        for (name, sets) in &tiles {
            self.append_field_tiles(name, sets)?;
        }
        Ok(())
    }

    fn record_mbrs(
        &mut self,
        schema: &ArraySchema,
        tiles: &[(String, Vec<TileSet>)],
    ) -> Result<()> {
        let tile_num = tiles[0].1.len();
        let dim_sets: Vec<(&Dimension, &Vec<TileSet>)> = schema
            .dimensions
            .iter()
            .map(|d| {
                tiles
                    .iter()
                    .find(|(name, _)| *name == d.name)
                    .map(|(_, sets)| (d, sets))
                    .ok_or_else(|| {
                        Error::Internal(format!(
                            "sparse tile batch lacks dimension '{}'",
                            d.name
                        ))
                    })
            })
            .collect::<Result<_>>()?;

        for t in 0..tile_num {
            let mut mbr = Vec::with_capacity(dim_sets.len());
            for (dim, sets) in &dim_sets {
                mbr.push(tile_mbr(dim, &sets[t])?);
            }
            // Fold the tile MBR into the fragment's non-empty domain.
            if self.meta.non_empty_domain.is_empty() {
                self.meta.non_empty_domain = mbr.clone();
            } else {
                for (d, (lo, hi)) in mbr.iter().enumerate() {
                    let dim = &schema.dimensions[d];
                    let ned = &mut self.meta.non_empty_domain[d];
                    if dim_lt(dim, lo, &ned.0) {
                        ned.0 = lo.clone();
                    }
                    if dim_lt(dim, &ned.1, hi) {
                        ned.1 = hi.clone();
                    }
                }
            }
            self.meta.mbrs.push(mbr);
        }
        Ok(())
    }

    fn record_stats(
        &mut self,
        schema: &ArraySchema,
        tiles: &[(String, Vec<TileSet>)],
    ) -> Result<()> {
        for (name, sets) in tiles {
            let attr = match schema.field(name) {
                Some(FieldRef::Attr(a)) if stats_eligible(a) => Some(a),
                _ => None,
            };
            let field_meta = self.meta.field_mut(name)?;
            for set in sets {
                field_meta.tile_cell_counts.push(set.cell_num());
                field_meta.tile_stats.push(match attr {
                    Some(a) => Some(tile_stats(a, &set.primary)?),
                    None => None,
                });
            }
        }
        Ok(())
    }

    fn append_field_tiles(
        &mut self,
        name: &str,
        sets: &[TileSet],
    ) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let dir = self.dir.clone();
        let cursors = self.cursors.entry(name.to_string()).or_default();
        let field_meta = self.meta.field_mut(name)?;

        for set in sets {
            let filtered = set.primary.size();
            backend.append(&field_file(&dir, name), set.primary.data())?;
            field_meta.tiles.push(
                cursors.primary,
                filtered,
                set.primary.unfiltered_size(),
            );
            cursors.primary += filtered;

            if let Some(var) = &set.var {
                let filtered = var.size();
                backend.append(&field_var_file(&dir, name), var.data())?;
                field_meta.var_tiles.push(
                    cursors.var,
                    filtered,
                    var.unfiltered_size(),
                );
                cursors.var += filtered;
            }
            if let Some(validity) = &set.validity {
                let filtered = validity.size();
                backend
                    .append(&field_validity_file(&dir, name), validity.data())?;
                field_meta.validity_tiles.push(
                    cursors.validity,
                    filtered,
                    validity.unfiltered_size(),
                );
                cursors.validity += filtered;
            }
        }
        Ok(())
    }

    /// Flush tile data, persist metadata, then the commit marker.
    pub fn commit(
        &mut self,
        timestamp_end: TimestampMs,
    ) -> Result<WrittenFragment> {
        // (a) tile data files
        for entry in self.backend.list_dir(&self.dir)? {
            if self.backend.is_file(&entry) {
                self.backend.sync(&entry)?;
            }
        }

        // (b) fragment metadata
        self.meta.timestamp_range.1 =
            timestamp_end.max(self.meta.timestamp_range.0);
        let meta_path = metadata_file(&self.dir);
        self.backend.append(&meta_path, &self.meta.serialize())?;
        self.backend.sync(&meta_path)?;

        // (c) commit marker: the linearisation point
        let marker = commit_marker_file(&self.dir);
        self.backend.append(&marker, &[])?;
        self.backend.sync(&marker)?;

        debug!(fragment = %self.name, cells = self.meta.cell_num, "committed fragment");
        Ok(WrittenFragment {
            name: self.name.clone(),
            uri: self.dir.clone(),
            timestamp_range: self.meta.timestamp_range,
        })
    }

    /// Best-effort removal of the in-progress fragment directory.
    pub fn abort(self) {
        debug!(fragment = %self.name, "rolling back fragment");
        let _ = self.backend.remove_dir_all(&self.dir);
    }
}

fn filter_tileset(pipeline: &FilterPipeline, set: &mut TileSet) -> Result<()> {
    filter_tile(pipeline, &mut set.primary)?;
    if let Some(var) = set.var.as_mut() {
        filter_tile(pipeline, var)?;
    }
    if let Some(validity) = set.validity.as_mut() {
        filter_tile(pipeline, validity)?;
    }
    Ok(())
}

fn filter_tile(pipeline: &FilterPipeline, tile: &mut Tile) -> Result<()> {
    let unfiltered = tile.size();
    let out = pipeline.run_forward(tile.take_data())?;
    tile.set_filtered(out, unfiltered);
    Ok(())
}

fn stats_eligible(attr: &Attribute) -> bool {
    attr.cell_val_num == 1
        && !attr.nullable
        && attr.datatype != crate::schema::Datatype::StringAscii
}

fn tile_stats(attr: &Attribute, tile: &Tile) -> Result<TileStats> {
    let cell_size = attr.datatype.size() as usize;
    let mut cells = tile.data().chunks_exact(cell_size);
    let first = cells.next().ok_or_else(|| {
        Error::Internal("cannot compute stats of an empty tile".to_string())
    })?;

    let mut min = first;
    let mut max = first;
    let mut sum = attr.datatype.decode_f64(first)?;
    for cell in cells {
        if order_key(cell, attr.datatype) < order_key(min, attr.datatype) {
            min = cell;
        }
        if order_key(cell, attr.datatype) > order_key(max, attr.datatype) {
            max = cell;
        }
        sum += attr.datatype.decode_f64(cell)?;
    }
    Ok(TileStats {
        min: min.to_vec(),
        max: max.to_vec(),
        sum,
    })
}

/// Minimum bounding range of one dimension over one (unfiltered) tile.
fn tile_mbr(dim: &Dimension, set: &TileSet) -> Result<(Vec<u8>, Vec<u8>)> {
    if set.is_empty() {
        return Err(Error::Internal(
            "cannot compute the MBR of an empty tile".to_string(),
        ));
    }
    if dim.var_sized {
        let var = set.var.as_ref().ok_or_else(|| {
            Error::Internal(format!(
                "var-sized dimension '{}' lacks a values tile",
                dim.name
            ))
        })?;
        let offsets: Vec<u64> = set
            .primary
            .data()
            .chunks_exact(CELL_OFFSET_SIZE as usize)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        let data = var.data();
        let mut min: &[u8] = &[];
        let mut max: &[u8] = &[];
        for (i, &start) in offsets.iter().enumerate() {
            let end = offsets
                .get(i + 1)
                .copied()
                .unwrap_or(data.len() as u64);
            let cell = &data[start as usize..end as usize];
            if i == 0 || cell < min {
                min = cell;
            }
            if i == 0 || cell > max {
                max = cell;
            }
        }
        Ok((min.to_vec(), max.to_vec()))
    } else {
        let cell_size = dim.datatype.size() as usize;
        let mut cells = set.primary.data().chunks_exact(cell_size);
        let first = cells.next().ok_or_else(|| {
            Error::Internal("empty coordinate tile".to_string())
        })?;
        let mut min = first;
        let mut max = first;
        for cell in cells {
            if order_key(cell, dim.datatype) < order_key(min, dim.datatype) {
                min = cell;
            }
            if order_key(cell, dim.datatype) > order_key(max, dim.datatype) {
                max = cell;
            }
        }
        Ok((min.to_vec(), max.to_vec()))
    }
}

/// `a < b` in the dimension's order.
fn dim_lt(dim: &Dimension, a: &[u8], b: &[u8]) -> bool {
    if dim.var_sized {
        a < b
    } else {
        order_key(a, dim.datatype) < order_key(b, dim.datatype)
    }
}
