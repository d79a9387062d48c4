//! The write orchestrator.
//!
//! One [`Writer`] instance drives one write query: bind parameters and
//! buffers, `init`, then one or more `write` submissions, then `finalize`.
//! Dispatch on (array type, layout) selects the ordered, unordered, or
//! global path; every error before commit rolls the in-progress fragment
//! back, and the writer refuses further submissions afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tessera_result::{Error, Result};
use tessera_storage::StorageBackend;
use tracing::debug;

use crate::buffers::{BufferView, RawBuffer};
use crate::config::WriteConfig;
use crate::coords::{split_zipped, CoordinateEngine};
use crate::dense::{DenseTiler, Subarray};
use crate::frag_writer::{FragmentWriter, WrittenFragment};
use crate::fragment::current_time_ms;
use crate::parallel::default_thread_count;
use crate::schema::{
    ArraySchema, ArrayType, CellOrder, FieldRef, Layout,
};
use crate::state::GlobalWriteState;
use crate::tile::{TileBuilder, TileSet};
use crate::types::CellIdx;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Uninit,
    Init,
    /// Global-order query with buffered state, awaiting more submissions
    /// or finalize.
    Waiting,
    Finalized,
    /// A fatal error rolled the in-progress fragment back.
    Cleaned,
}

/// Processes write queries against one array.
pub struct Writer<'a> {
    backend: Arc<dyn StorageBackend>,
    array_uri: PathBuf,
    schema: Option<Arc<ArraySchema>>,
    config: WriteConfig,
    layout: Layout,
    thread_num: usize,
    buffers: FxHashMap<String, RawBuffer<'a>>,
    coords_zipped: Option<&'a [u8]>,
    subarray: Option<Subarray>,
    state: WriterState,
    error: Option<String>,
    global_state: Option<GlobalWriteState>,
    written: Vec<WrittenFragment>,
}

impl<'a> Writer<'a> {
    pub fn new(backend: Arc<dyn StorageBackend>, array_uri: &Path) -> Self {
        Self {
            backend,
            array_uri: array_uri.to_path_buf(),
            schema: None,
            config: WriteConfig::default(),
            layout: Layout::RowMajor,
            thread_num: default_thread_count(),
            buffers: FxHashMap::default(),
            coords_zipped: None,
            subarray: None,
            state: WriterState::Uninit,
            error: None,
            global_state: None,
            written: Vec::new(),
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn config(&self) -> &WriteConfig {
        &self.config
    }

    /// Fragments committed by this writer, in commit order. A record
    /// appears iff the commit marker is durable.
    pub fn written_fragments(&self) -> &[WrittenFragment] {
        &self.written
    }

    fn require_uninit(&self, what: &str) -> Result<()> {
        if self.state != WriterState::Uninit {
            return Err(Error::Config(format!(
                "{what} is only valid before init()"
            )));
        }
        Ok(())
    }

    /// Attach the array schema. Arrays flagged global-order-only default
    /// the layout to global.
    pub fn set_array_schema(
        &mut self,
        schema: Arc<ArraySchema>,
    ) -> Result<()> {
        self.require_uninit("set_array_schema")?;
        if schema.global_order_only {
            self.layout = Layout::GlobalOrder;
        }
        self.schema = Some(schema);
        Ok(())
    }

    pub fn set_layout(&mut self, layout: Layout) -> Result<()> {
        self.require_uninit("set_layout")?;
        if let Some(schema) = &self.schema {
            if schema.global_order_only && layout != Layout::GlobalOrder {
                return Err(Error::UnsupportedLayout {
                    layout: layout.as_str().to_string(),
                    array_type: "append-only".to_string(),
                });
            }
        }
        self.layout = layout;
        Ok(())
    }

    pub fn set_subarray(&mut self, subarray: Subarray) -> Result<()> {
        self.require_uninit("set_subarray")?;
        self.subarray = Some(subarray);
        Ok(())
    }

    pub fn set_config(&mut self, config: WriteConfig) -> Result<()> {
        self.require_uninit("set_config")?;
        self.config = config;
        Ok(())
    }

    /// Apply one query-scoped configuration pair.
    pub fn set_config_option(&mut self, key: &str, value: &str) -> Result<()> {
        self.require_uninit("set_config")?;
        self.config.set(key, value)
    }

    /// Skip the global-order verification for global-layout writes. This
    /// and the `check_global_order` config key assign the same flag;
    /// whichever runs last wins.
    pub fn disable_check_global_order(&mut self) {
        self.config.check_global_order = false;
    }

    pub fn set_thread_num(&mut self, threads: usize) {
        self.thread_num = threads.max(1);
    }

    fn bindable(&self, what: &str) -> Result<()> {
        // Buffers may be rebound between global-order submissions.
        match self.state {
            WriterState::Uninit | WriterState::Waiting => Ok(()),
            _ => Err(Error::Config(format!(
                "{what} is only valid before init() or between \
                 global-order submissions"
            ))),
        }
    }

    /// Bind a fixed-size field buffer.
    pub fn set_buffer(&mut self, name: &str, values: &'a [u8]) -> Result<()> {
        self.bindable("set_buffer")?;
        self.buffers
            .insert(name.to_string(), RawBuffer::fixed(values));
        Ok(())
    }

    /// Bind a var-sized field (offsets + values).
    pub fn set_buffer_var(
        &mut self,
        name: &str,
        offsets: &'a [u8],
        values: &'a [u8],
    ) -> Result<()> {
        self.bindable("set_buffer")?;
        self.buffers
            .insert(name.to_string(), RawBuffer::var(offsets, values));
        Ok(())
    }

    /// Bind a fixed-size nullable attribute.
    pub fn set_buffer_nullable(
        &mut self,
        name: &str,
        values: &'a [u8],
        validity: &'a [u8],
    ) -> Result<()> {
        self.bindable("set_buffer")?;
        self.buffers.insert(
            name.to_string(),
            RawBuffer::fixed(values).with_validity(validity),
        );
        Ok(())
    }

    /// Bind a var-sized nullable attribute.
    pub fn set_buffer_var_nullable(
        &mut self,
        name: &str,
        offsets: &'a [u8],
        values: &'a [u8],
        validity: &'a [u8],
    ) -> Result<()> {
        self.bindable("set_buffer")?;
        self.buffers.insert(
            name.to_string(),
            RawBuffer::var(offsets, values).with_validity(validity),
        );
        Ok(())
    }

    /// Bind zipped coordinates (one interleaved tuple per cell).
    pub fn set_coords_buffer(&mut self, zipped: &'a [u8]) -> Result<()> {
        self.bindable("set_coords_buffer")?;
        self.coords_zipped = Some(zipped);
        Ok(())
    }

    /// The binding of a field, if any.
    pub fn buffer(&self, name: &str) -> Option<RawBuffer<'a>> {
        self.buffers.get(name).copied()
    }

    /// Validate the query and freeze the parameters.
    pub fn init(&mut self) -> Result<()> {
        self.require_uninit("init")?;
        let schema = self
            .schema
            .clone()
            .ok_or_else(|| Error::Config("no array schema set".to_string()))?;
        schema.check()?;

        self.optimize_layout_for_1d(&schema);
        let layout = self.layout;

        // Explicit (array type, layout) dispatch matrix.
        let supported = match (schema.array_type, layout) {
            (ArrayType::Dense, Layout::RowMajor | Layout::ColMajor) => true,
            (_, Layout::GlobalOrder) => true,
            (
                ArrayType::Sparse,
                Layout::RowMajor | Layout::ColMajor | Layout::Unordered,
            ) => true,
            (ArrayType::Dense, Layout::Unordered) => false,
        };
        if !supported {
            return Err(Error::UnsupportedLayout {
                layout: layout.as_str().to_string(),
                array_type: schema.array_type.as_str().to_string(),
            });
        }

        self.check_buffer_bindings(&schema)?;

        match schema.array_type {
            ArrayType::Dense => {
                if layout == Layout::GlobalOrder {
                    if self.subarray.is_some() {
                        return Err(Error::Config(
                            "dense global-order writes cover the full \
                             domain and take no subarray"
                                .to_string(),
                        ));
                    }
                } else {
                    // Ordered writes default to the full domain.
                    if self.subarray.is_none() {
                        self.subarray = Some(full_domain(&schema)?);
                    }
                    self.subarray
                        .as_ref()
                        .expect("just defaulted")
                        .check(&schema)?;
                }
            }
            ArrayType::Sparse => {
                if self.subarray.is_some() {
                    return Err(Error::Config(
                        "sparse writes do not take a subarray".to_string(),
                    ));
                }
            }
        }

        self.state = WriterState::Init;
        Ok(())
    }

    /// 1-D arrays served in row- or col-major order can use the array's
    /// cell order directly; the orders coincide, which skips a sort.
    fn optimize_layout_for_1d(&mut self, schema: &ArraySchema) {
        if schema.dim_num() != 1 {
            return;
        }
        if matches!(self.layout, Layout::RowMajor | Layout::ColMajor) {
            self.layout = match schema.cell_order {
                CellOrder::RowMajor => Layout::RowMajor,
                CellOrder::ColMajor => Layout::ColMajor,
                CellOrder::Hilbert => self.layout,
            };
        }
    }

    fn needs_coords(&self, schema: &ArraySchema) -> bool {
        schema.array_type == ArrayType::Sparse
    }

    fn check_buffer_bindings(&self, schema: &ArraySchema) -> Result<()> {
        for (name, raw) in &self.buffers {
            let field = schema.field(name).ok_or_else(|| {
                Error::Config(format!(
                    "'{name}' is not an attribute or dimension of the \
                     array schema"
                ))
            })?;
            // Shape validation per field; also catches incomplete
            // var/nullable bindings.
            BufferView::new(field, *raw, &self.config)?;
        }

        for attr in &schema.attributes {
            if !self.buffers.contains_key(&attr.name) {
                return Err(Error::Config(format!(
                    "attribute '{}' has no buffer set",
                    attr.name
                )));
            }
        }

        let dims_bound = schema
            .dimensions
            .iter()
            .filter(|d| self.buffers.contains_key(&d.name))
            .count();
        if self.needs_coords(schema) {
            if self.coords_zipped.is_some() {
                if dims_bound > 0 {
                    return Err(Error::Config(
                        "zipped and per-dimension coordinate buffers \
                         cannot be mixed"
                            .to_string(),
                    ));
                }
                schema.coords_cell_size()?;
            } else if dims_bound != schema.dim_num() {
                return Err(Error::Config(format!(
                    "sparse writes need coordinates: {dims_bound} of {} \
                     dimension buffers set",
                    schema.dim_num()
                )));
            }
        } else if dims_bound > 0 || self.coords_zipped.is_some() {
            return Err(Error::Config(
                "dense writes take no coordinate buffers".to_string(),
            ));
        }
        Ok(())
    }

    /// Perform one write submission.
    pub fn write(&mut self) -> Result<()> {
        match self.state {
            WriterState::Init | WriterState::Waiting => {}
            WriterState::Uninit => {
                return Err(Error::Config(
                    "init() has not been called".to_string(),
                ))
            }
            WriterState::Finalized => {
                return Err(Error::Config(
                    "the query has been finalized".to_string(),
                ))
            }
            WriterState::Cleaned => {
                return Err(self.prior_error());
            }
        }

        let schema = self.schema.clone().expect("schema checked at init");
        let result = match (schema.array_type, self.layout) {
            (ArrayType::Dense, Layout::RowMajor | Layout::ColMajor) => {
                self.ordered_write(&schema)
            }
            (_, Layout::GlobalOrder) => self.global_write(&schema),
            (ArrayType::Sparse, _) => self.unordered_write(&schema),
            (ArrayType::Dense, Layout::Unordered) => {
                Err(Error::UnsupportedLayout {
                    layout: self.layout.as_str().to_string(),
                    array_type: schema.array_type.as_str().to_string(),
                })
            }
        };
        if let Err(err) = &result {
            self.clean_up(err);
        }
        result
    }

    /// Flush the buffered global-order state and commit. A no-op for
    /// non-global layouts.
    pub fn finalize(&mut self) -> Result<()> {
        match self.state {
            WriterState::Cleaned => return Err(self.prior_error()),
            WriterState::Finalized => return Ok(()),
            WriterState::Uninit => {
                return Err(Error::Config(
                    "init() has not been called".to_string(),
                ))
            }
            WriterState::Init | WriterState::Waiting => {}
        }
        let schema = self.schema.clone().expect("schema checked at init");
        let result = self.finalize_inner(&schema);
        match result {
            Ok(()) => {
                self.state = WriterState::Finalized;
                Ok(())
            }
            Err(err) => {
                self.clean_up(&err);
                Err(err)
            }
        }
    }

    fn prior_error(&self) -> Error {
        Error::Config(format!(
            "the writer failed previously and was cleaned up: {}",
            self.error.as_deref().unwrap_or("unknown error")
        ))
    }

    /// Remove the in-progress fragment (if any), drop the global state,
    /// and refuse further submissions.
    fn clean_up(&mut self, err: &Error) {
        debug!(error = %err, "write failed; rolling back");
        if let Some(state) = self.global_state.take() {
            state.frag.abort();
        }
        self.error = Some(err.to_string());
        self.state = WriterState::Cleaned;
    }

    // ---- ordered (dense row-/col-major) ---------------------------------

    fn ordered_write(&mut self, schema: &Arc<ArraySchema>) -> Result<()> {
        let subarray =
            self.subarray.clone().expect("subarray defaulted at init");
        let expected = subarray.cell_num();
        let tiler = DenseTiler::new(schema, &subarray, self.layout)?;

        let views = self.attr_views(schema, expected)?;
        let cells_per_tile = schema.cells_per_tile()?;

        let mut batch: Vec<(String, Vec<TileSet>)> = Vec::new();
        for (attr, view) in schema.attributes.iter().zip(&views) {
            let mut builder =
                TileBuilder::new(FieldRef::Attr(attr), cells_per_tile);
            for t in 0..tiler.tile_num() {
                for src in tiler.tile_cell_map(t) {
                    match src {
                        Some(i) => builder.append_cell(view, i),
                        None => builder.append_empty(1),
                    }
                }
            }
            batch.push((attr.name.clone(), builder.finish()));
        }

        let mut frag = FragmentWriter::create(
            Arc::clone(&self.backend),
            &self.array_uri,
            schema,
            true,
            0,
            self.thread_num,
        )?;
        let persist = (|| {
            frag.write_all_tiles(schema, batch)?;
            frag.set_non_empty_domain(encode_ranges(schema, &subarray.ranges)?);
            let t_end = frag.timestamp_start();
            frag.commit(t_end)
        })();
        match persist {
            Ok(written) => {
                self.written.push(written);
                Ok(())
            }
            Err(err) => {
                frag.abort();
                Err(err)
            }
        }
    }

    // ---- unordered (sparse) ---------------------------------------------

    fn unordered_write(&mut self, schema: &Arc<ArraySchema>) -> Result<()> {
        let split = self.split_coords(schema)?;
        let dim_views = self.dim_views(schema, &split)?;
        let engine = CoordinateEngine::new(schema, &dim_views)?;
        let cell_num = engine.cell_num();

        let attr_views = self.attr_views(schema, cell_num)?;
        if cell_num == 0 {
            return Ok(());
        }

        if self.config.check_coord_oob {
            engine.check_out_of_bounds()?;
        }
        let cell_pos = engine.sort_positions();
        let skip = if self.config.dedup_coords {
            Some(engine.find_duplicates(&cell_pos))
        } else {
            if self.config.check_coord_dups {
                engine.check_duplicates(&cell_pos)?;
            }
            None
        };

        let cells_per_tile = schema.cells_per_tile()?;
        let mut batch: Vec<(String, Vec<TileSet>)> = Vec::new();
        for (dim, view) in schema.dimensions.iter().zip(&dim_views) {
            let mut builder =
                TileBuilder::new(FieldRef::Dim(dim), cells_per_tile);
            builder.append_permuted(view, &cell_pos, skip.as_ref());
            batch.push((dim.name.clone(), builder.finish()));
        }
        for (attr, view) in schema.attributes.iter().zip(&attr_views) {
            let mut builder =
                TileBuilder::new(FieldRef::Attr(attr), cells_per_tile);
            builder.append_permuted(view, &cell_pos, skip.as_ref());
            batch.push((attr.name.clone(), builder.finish()));
        }

        let mut frag = FragmentWriter::create(
            Arc::clone(&self.backend),
            &self.array_uri,
            schema,
            false,
            0,
            self.thread_num,
        )?;
        let persist = (|| {
            frag.write_all_tiles(schema, batch)?;
            let t_end = frag.timestamp_start();
            frag.commit(t_end)
        })();
        match persist {
            Ok(written) => {
                self.written.push(written);
                Ok(())
            }
            Err(err) => {
                frag.abort();
                Err(err)
            }
        }
    }

    // ---- global order ---------------------------------------------------

    fn global_write(&mut self, schema: &Arc<ArraySchema>) -> Result<()> {
        let sparse = schema.array_type == ArrayType::Sparse;
        let split = if sparse {
            self.split_coords(schema)?
        } else {
            Vec::new()
        };
        let dim_views = if sparse {
            self.dim_views(schema, &split)?
        } else {
            Vec::new()
        };

        // Dense global submissions take their cell count from the first
        // attribute buffer; sparse ones from the coordinates.
        let cell_num = if sparse {
            CoordinateEngine::new(schema, &dim_views)?.cell_num()
        } else {
            let attr = &schema.attributes[0];
            let raw = *self.buffers.get(&attr.name).ok_or_else(|| {
                Error::Config(format!(
                    "attribute '{}' has no buffer set",
                    attr.name
                ))
            })?;
            BufferView::new(FieldRef::Attr(attr), raw, &self.config)?
                .cell_num()
        };

        let attr_views = self.attr_views(schema, cell_num)?;
        if cell_num == 0 {
            return Ok(());
        }

        let mut skip: Option<FxHashSet<CellIdx>> = None;
        if sparse {
            let engine = CoordinateEngine::new(schema, &dim_views)?;
            if self.config.check_coord_oob {
                engine.check_out_of_bounds()?;
            }
            if self.config.check_global_order {
                engine.check_global_order()?;
            }
            if self.config.dedup_coords {
                skip = Some(engine.find_duplicates_sorted());
            } else if self.config.check_coord_dups {
                engine.check_duplicates_sorted()?;
            }
        }
        let kept = cell_num - skip.as_ref().map_or(0, |s| s.len() as u64);

        let cells_per_tile = schema.cells_per_tile()?;
        if self.global_state.is_none() {
            let frag = FragmentWriter::create(
                Arc::clone(&self.backend),
                &self.array_uri,
                schema,
                !sparse,
                0,
                self.thread_num,
            )?;
            let field_names: Vec<String> = if sparse {
                schema.field_names().iter().map(|s| s.to_string()).collect()
            } else {
                schema.attributes.iter().map(|a| a.name.clone()).collect()
            };
            self.global_state = Some(GlobalWriteState::new(
                frag,
                schema,
                &field_names,
                cells_per_tile,
            ));
        }

        // Drain cells: complete the carried partial tile, emit full tiles,
        // keep the remainder.
        let mut batch: Vec<(String, Vec<TileSet>)> = Vec::new();
        let state = self.global_state.as_mut().expect("state created above");
        if sparse {
            for (dim, view) in schema.dimensions.iter().zip(&dim_views) {
                drain_field(
                    state,
                    &mut batch,
                    FieldRef::Dim(dim),
                    view,
                    cells_per_tile,
                    cell_num,
                    skip.as_ref(),
                    kept,
                )?;
            }
        }
        for (attr, view) in schema.attributes.iter().zip(&attr_views) {
            drain_field(
                state,
                &mut batch,
                FieldRef::Attr(attr),
                view,
                cells_per_tile,
                cell_num,
                skip.as_ref(),
                kept,
            )?;
        }
        if !batch.is_empty() && !batch[0].1.is_empty() {
            state.frag.write_all_tiles(schema, batch)?;
        }
        self.state = WriterState::Waiting;
        Ok(())
    }

    fn finalize_inner(&mut self, schema: &Arc<ArraySchema>) -> Result<()> {
        if self.layout != Layout::GlobalOrder {
            return Ok(());
        }
        let Some(mut state) = self.global_state.take() else {
            return Ok(());
        };

        // Every field must have accepted the same number of cells.
        let mut counts: Vec<(&String, u64)> =
            state.cells_written.iter().map(|(k, &v)| (k, v)).collect();
        counts.sort();
        let expected = counts.first().map(|&(_, n)| n).unwrap_or(0);
        for &(name, actual) in &counts {
            if actual != expected {
                state.frag.abort();
                return Err(Error::FieldCellCountMismatch {
                    field: name.clone(),
                    expected,
                    actual,
                });
            }
        }

        if state.is_empty() {
            // Nothing was ever written; leave no fragment behind.
            state.frag.abort();
            return Ok(());
        }

        if schema.array_type == ArrayType::Dense {
            // A dense global write must cover the whole domain.
            let domain = full_domain(schema)?;
            let domain_cells = domain.cell_num();
            if expected != domain_cells {
                state.frag.abort();
                return Err(Error::FieldCellCountMismatch {
                    field: schema.attributes[0].name.clone(),
                    expected: domain_cells,
                    actual: expected,
                });
            }
            state
                .frag
                .set_non_empty_domain(encode_ranges(schema, &domain.ranges)?);
        }

        let persist = (|| {
            if !state.all_last_tiles_empty() {
                let mut batch: Vec<(String, Vec<TileSet>)> = Vec::new();
                let field_order: Vec<String> = schema
                    .field_names()
                    .iter()
                    .filter(|n| state.last_tiles.contains_key(&***n))
                    .map(|n| n.to_string())
                    .collect();
                for name in field_order {
                    let last = state
                        .last_tiles
                        .remove(&name)
                        .expect("field order comes from the state");
                    batch.push((name, vec![last]));
                }
                state.frag.write_all_tiles(schema, batch)?;
            }
            state.frag.commit(current_time_ms())
        })();
        match persist {
            Ok(written) => {
                self.written.push(written);
                Ok(())
            }
            Err(err) => {
                state.frag.abort();
                Err(err)
            }
        }
    }

    // ---- view helpers ---------------------------------------------------

    /// Owned per-dimension buffers split out of a zipped coordinates
    /// binding; empty when coordinates came pre-split.
    fn split_coords(&self, schema: &ArraySchema) -> Result<Vec<Vec<u8>>> {
        match self.coords_zipped {
            Some(zipped) => split_zipped(schema, zipped),
            None => Ok(Vec::new()),
        }
    }

    fn dim_views<'b>(
        &self,
        schema: &'b ArraySchema,
        split: &'b [Vec<u8>],
    ) -> Result<Vec<BufferView<'b>>>
    where
        'a: 'b,
    {
        schema
            .dimensions
            .iter()
            .enumerate()
            .map(|(d, dim)| {
                let raw = if split.is_empty() {
                    *self.buffers.get(&dim.name).ok_or_else(|| {
                        Error::Config(format!(
                            "dimension '{}' has no buffer set",
                            dim.name
                        ))
                    })?
                } else {
                    RawBuffer::fixed(&split[d])
                };
                BufferView::new(FieldRef::Dim(dim), raw, &self.config)
            })
            .collect()
    }

    /// Attribute views, each checked against the expected cell count.
    fn attr_views(
        &self,
        schema: &ArraySchema,
        expected_cells: u64,
    ) -> Result<Vec<BufferView<'a>>> {
        schema
            .attributes
            .iter()
            .map(|attr| {
                let raw = *self.buffers.get(&attr.name).ok_or_else(|| {
                    Error::Config(format!(
                        "attribute '{}' has no buffer set",
                        attr.name
                    ))
                })?;
                let view =
                    BufferView::new(FieldRef::Attr(attr), raw, &self.config)?;
                if view.cell_num() != expected_cells {
                    return Err(Error::FieldCellCountMismatch {
                        field: attr.name.clone(),
                        expected: expected_cells,
                        actual: view.cell_num(),
                    });
                }
                Ok(view)
            })
            .collect()
    }
}

/// Complete the carried partial tile of one field from this submission's
/// cells, handing full tiles to `batch` and stashing the remainder back in
/// the global state.
#[allow(clippy::too_many_arguments)]
fn drain_field(
    state: &mut GlobalWriteState,
    batch: &mut Vec<(String, Vec<TileSet>)>,
    field: FieldRef<'_>,
    view: &BufferView<'_>,
    cells_per_tile: u64,
    cell_num: u64,
    skip: Option<&FxHashSet<CellIdx>>,
    kept: u64,
) -> Result<()> {
    let name = field.name().to_string();
    let seed = state.last_tiles.remove(&name).ok_or_else(|| {
        Error::Internal(format!("global state lacks field '{name}'"))
    })?;
    let mut builder = TileBuilder::with_seed(field, cells_per_tile, seed);
    builder.append_range(view, 0, cell_num, skip);
    let (full, last) = builder.finish_keep_last();
    state.last_tiles.insert(name.clone(), last);
    *state
        .cells_written
        .get_mut(&name)
        .expect("counter exists for every state field") += kept;
    batch.push((name, full));
    Ok(())
}

/// Subarray covering the whole dense domain.
fn full_domain(schema: &ArraySchema) -> Result<Subarray> {
    let ranges = schema
        .dimensions
        .iter()
        .map(|d| d.domain_i64())
        .collect::<Result<Vec<_>>>()?;
    Ok(Subarray::new(ranges))
}

/// Encode inclusive i64 ranges into per-dimension native bytes.
fn encode_ranges(
    schema: &ArraySchema,
    ranges: &[(i64, i64)],
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    schema
        .dimensions
        .iter()
        .zip(ranges)
        .map(|(dim, &(lo, hi))| {
            Ok((dim.datatype.encode_i64(lo)?, dim.datatype.encode_i64(hi)?))
        })
        .collect()
}
