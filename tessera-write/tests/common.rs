#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tessera_storage::StorageBackend;
use tessera_write::constants::CELL_OFFSET_SIZE;
use tessera_write::fragment::{
    field_file, field_validity_file, field_var_file, fragment_dir,
    metadata_file, FragmentMetadata,
};
use tessera_write::schema::ArraySchema;
use tessera_write::FragmentInfo;

pub fn i32_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn u64_bytes(values: &[u64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn as_i32_cells(cells: &[Vec<u8>]) -> Vec<i32> {
    cells
        .iter()
        .map(|c| i32::from_le_bytes(c.as_slice().try_into().unwrap()))
        .collect()
}

pub fn as_f32_cells(cells: &[Vec<u8>]) -> Vec<f32> {
    cells
        .iter()
        .map(|c| f32::from_le_bytes(c.as_slice().try_into().unwrap()))
        .collect()
}

/// Decoded cells of one field, concatenated across tiles in tile order.
pub struct FieldCells {
    pub values: Vec<Vec<u8>>,
    pub validity: Option<Vec<u8>>,
}

/// Names of committed fragments of an array, in timestamp order.
pub fn committed_fragments(
    backend: &dyn StorageBackend,
    array_uri: &Path,
) -> Vec<String> {
    FragmentInfo::load(backend, array_uri)
        .expect("fragment listing")
        .fragments
        .into_iter()
        .map(|f| f.name)
        .collect()
}

pub fn frag_dir(array_uri: &Path, name: &str) -> PathBuf {
    fragment_dir(array_uri, name)
}

pub fn load_metadata(
    backend: &dyn StorageBackend,
    array_uri: &Path,
    name: &str,
) -> FragmentMetadata {
    let bytes = backend
        .read(&metadata_file(&fragment_dir(array_uri, name)))
        .expect("metadata file");
    FragmentMetadata::deserialize(&bytes).expect("metadata decodes")
}

/// Read every field of a committed fragment back into per-cell byte
/// vectors, undoing the filter pipelines.
pub fn read_fragment(
    backend: &dyn StorageBackend,
    array_uri: &Path,
    name: &str,
    schema: &ArraySchema,
) -> HashMap<String, FieldCells> {
    let dir = fragment_dir(array_uri, name);
    let meta = load_metadata(backend, array_uri, name);

    let mut out = HashMap::new();
    for fm in &meta.fields {
        let field = schema.field(&fm.name).expect("schema field");
        let pipeline = schema.field_filters(&fm.name);

        let primary_all = backend
            .read(&field_file(&dir, &fm.name))
            .expect("field data file");
        let var_all = field
            .var_sized()
            .then(|| backend.read(&field_var_file(&dir, &fm.name)).unwrap());
        let validity_all = field.nullable().then(|| {
            backend
                .read(&field_validity_file(&dir, &fm.name))
                .unwrap()
        });

        let mut values: Vec<Vec<u8>> = Vec::new();
        let mut validity: Vec<u8> = Vec::new();
        for t in 0..fm.tiles.len() {
            let off = fm.tiles.offsets[t] as usize;
            let (filtered, unfiltered) = fm.tiles.sizes[t];
            let tile = pipeline
                .run_reverse(
                    primary_all[off..off + filtered as usize].to_vec(),
                )
                .expect("primary tile unfilters");
            assert_eq!(tile.len() as u64, unfiltered);

            if field.var_sized() {
                let var_all = var_all.as_ref().unwrap();
                let voff = fm.var_tiles.offsets[t] as usize;
                let (vfiltered, vunfiltered) = fm.var_tiles.sizes[t];
                let var_tile = pipeline
                    .run_reverse(
                        var_all[voff..voff + vfiltered as usize].to_vec(),
                    )
                    .expect("var tile unfilters");
                assert_eq!(var_tile.len() as u64, vunfiltered);

                let offsets: Vec<u64> = tile
                    .chunks_exact(CELL_OFFSET_SIZE as usize)
                    .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                    .collect();
                for (i, &start) in offsets.iter().enumerate() {
                    let end = offsets
                        .get(i + 1)
                        .copied()
                        .unwrap_or(var_tile.len() as u64);
                    values.push(
                        var_tile[start as usize..end as usize].to_vec(),
                    );
                }
            } else {
                let cell_size = field.cell_size().unwrap() as usize;
                for cell in tile.chunks_exact(cell_size) {
                    values.push(cell.to_vec());
                }
            }

            if field.nullable() {
                let validity_all = validity_all.as_ref().unwrap();
                let voff = fm.validity_tiles.offsets[t] as usize;
                let (vfiltered, _) = fm.validity_tiles.sizes[t];
                let vtile = pipeline
                    .run_reverse(
                        validity_all[voff..voff + vfiltered as usize]
                            .to_vec(),
                    )
                    .expect("validity tile unfilters");
                validity.extend_from_slice(&vtile);
            }
        }

        out.insert(
            fm.name.clone(),
            FieldCells {
                values,
                validity: field.nullable().then_some(validity),
            },
        );
    }
    out
}

/// Concatenated raw bytes of one field's tile data file; useful for
/// bit-identical fragment comparisons.
pub fn field_file_bytes(
    backend: &dyn StorageBackend,
    array_uri: &Path,
    name: &str,
    field: &str,
) -> Vec<u8> {
    backend
        .read(&field_file(&fragment_dir(array_uri, name), field))
        .expect("field data file")
        .to_vec()
}
