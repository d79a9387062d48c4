mod common;

use std::sync::Arc;

use common::*;
use std::path::Path;
use tessera_storage::{MemBackend, StorageBackend};
use tessera_write::{
    ArraySchema, ArrayType, Attribute, Datatype, Dimension, Layout,
    Subarray, Writer,
};

fn dense_1d_schema() -> Arc<ArraySchema> {
    Arc::new(
        ArraySchema::new(ArrayType::Dense)
            .with_dimension(Dimension::int32("d", (0, 7), Some(4)))
            .with_attribute(Attribute::new("a", Datatype::Int32)),
    )
}

#[test]
fn full_domain_row_major_write() {
    tessera_test_utils::init_tracing_for_tests();
    let backend = Arc::new(MemBackend::new());
    let array = Path::new("array");
    backend.create_dir(array).unwrap();

    let values = i32_bytes(&[10, 11, 12, 13, 14, 15, 16, 17]);
    let mut writer = Writer::new(backend.clone(), array);
    writer.set_array_schema(dense_1d_schema()).unwrap();
    writer.set_layout(Layout::RowMajor).unwrap();
    writer.set_subarray(Subarray::new(vec![(0, 7)])).unwrap();
    writer.set_buffer("a", &values).unwrap();
    writer.init().unwrap();
    writer.write().unwrap();

    let written = writer.written_fragments();
    assert_eq!(written.len(), 1);
    let name = written[0].name.clone();
    assert_eq!(committed_fragments(backend.as_ref(), array), vec![name.clone()]);

    let meta = load_metadata(backend.as_ref(), array, &name);
    assert!(meta.dense);
    assert_eq!(meta.cell_num, 8);
    assert_eq!(
        meta.non_empty_domain,
        vec![(0i32.to_le_bytes().to_vec(), 7i32.to_le_bytes().to_vec())]
    );

    // Two tiles of four cells, bit-exact.
    let field = meta.field("a").unwrap();
    assert_eq!(field.tiles.len(), 2);
    assert_eq!(field.tile_cell_counts, vec![4, 4]);
    let bytes = field_file_bytes(backend.as_ref(), array, &name, "a");
    assert_eq!(&bytes[..16], i32_bytes(&[10, 11, 12, 13]));
    assert_eq!(&bytes[16..], i32_bytes(&[14, 15, 16, 17]));

    // Per-tile stats for an eligible int attribute.
    let stats = field.tile_stats[0].as_ref().unwrap();
    assert_eq!(stats.min, 10i32.to_le_bytes());
    assert_eq!(stats.max, 13i32.to_le_bytes());
    assert_eq!(stats.sum, 46.0);
}

#[test]
fn boundary_tiles_pad_with_fill() {
    let backend = Arc::new(MemBackend::new());
    let array = Path::new("array");
    backend.create_dir(array).unwrap();

    let schema = Arc::new(
        ArraySchema::new(ArrayType::Dense)
            .with_dimension(Dimension::int32("d", (0, 7), Some(4)))
            .with_attribute(
                Attribute::new("a", Datatype::Int32)
                    .with_fill((-1i32).to_le_bytes().to_vec()),
            ),
    );

    let values = i32_bytes(&[1, 2, 3, 4, 5, 6]);
    let mut writer = Writer::new(backend.clone(), array);
    writer.set_array_schema(schema.clone()).unwrap();
    writer.set_subarray(Subarray::new(vec![(1, 6)])).unwrap();
    writer.set_buffer("a", &values).unwrap();
    writer.init().unwrap();
    writer.write().unwrap();

    let name = writer.written_fragments()[0].name.clone();
    let bytes = field_file_bytes(backend.as_ref(), array, &name, "a");
    assert_eq!(&bytes[..16], i32_bytes(&[-1, 1, 2, 3]));
    assert_eq!(&bytes[16..], i32_bytes(&[4, 5, 6, -1]));
}

#[test]
fn unspecified_fill_defaults_to_zero_bytes() {
    let backend = Arc::new(MemBackend::new());
    let array = Path::new("array");
    backend.create_dir(array).unwrap();

    let values = i32_bytes(&[9]);
    let mut writer = Writer::new(backend.clone(), array);
    writer.set_array_schema(dense_1d_schema()).unwrap();
    writer.set_subarray(Subarray::new(vec![(2, 2)])).unwrap();
    writer.set_buffer("a", &values).unwrap();
    writer.init().unwrap();
    writer.write().unwrap();

    let name = writer.written_fragments()[0].name.clone();
    let bytes = field_file_bytes(backend.as_ref(), array, &name, "a");
    assert_eq!(bytes, i32_bytes(&[0, 0, 9, 0]));
}

/// Row-major and column-major submissions of the same logical content must
/// produce bit-identical tile data.
#[test]
fn layout_equivalence_2d() {
    let schema = Arc::new(
        ArraySchema::new(ArrayType::Dense)
            .with_dimension(Dimension::int32("x", (0, 3), Some(2)))
            .with_dimension(Dimension::int32("y", (0, 3), Some(2)))
            .with_attribute(Attribute::new("a", Datatype::Int32)),
    );

    // Logical content: a[x][y] = 10*x + y over the full 4x4 domain.
    let mut row_major = Vec::new();
    for x in 0..4 {
        for y in 0..4 {
            row_major.push(10 * x + y);
        }
    }
    let mut col_major = Vec::new();
    for y in 0..4 {
        for x in 0..4 {
            col_major.push(10 * x + y);
        }
    }
    let row_buf = i32_bytes(&row_major);
    let col_buf = i32_bytes(&col_major);

    let write = |layout: Layout, buf: &[u8]| {
        let backend = Arc::new(MemBackend::new());
        let array = Path::new("array");
        backend.create_dir(array).unwrap();
        let mut writer = Writer::new(backend.clone(), array);
        writer.set_array_schema(schema.clone()).unwrap();
        writer.set_layout(layout).unwrap();
        writer.set_buffer("a", buf).unwrap();
        writer.init().unwrap();
        writer.write().unwrap();
        let name = writer.written_fragments()[0].name.clone();
        field_file_bytes(backend.as_ref(), array, &name, "a")
    };

    let from_row = write(Layout::RowMajor, &row_buf);
    let from_col = write(Layout::ColMajor, &col_buf);
    assert_eq!(from_row, from_col);
}

#[test]
fn nullable_attribute_roundtrip() {
    let backend = Arc::new(MemBackend::new());
    let array = Path::new("array");
    backend.create_dir(array).unwrap();

    let schema = Arc::new(
        ArraySchema::new(ArrayType::Dense)
            .with_dimension(Dimension::int32("d", (0, 3), Some(4)))
            .with_attribute(
                Attribute::new("a", Datatype::Int32).nullable(),
            ),
    );

    let values = i32_bytes(&[1, 2, 3, 4]);
    let validity = [1u8, 0, 1, 0];
    let mut writer = Writer::new(backend.clone(), array);
    writer.set_array_schema(schema.clone()).unwrap();
    writer.set_buffer_nullable("a", &values, &validity).unwrap();
    writer.init().unwrap();
    writer.write().unwrap();

    let name = writer.written_fragments()[0].name.clone();
    let cells = read_fragment(backend.as_ref(), array, &name, &schema);
    let a = &cells["a"];
    assert_eq!(as_i32_cells(&a.values), vec![1, 2, 3, 4]);
    assert_eq!(a.validity.as_deref(), Some(&[1u8, 0, 1, 0][..]));
}

#[test]
fn cell_count_mismatch_is_rejected() {
    let backend = Arc::new(MemBackend::new());
    let array = Path::new("array");
    backend.create_dir(array).unwrap();

    // Subarray covers 8 cells, buffer has 5.
    let values = i32_bytes(&[1, 2, 3, 4, 5]);
    let mut writer = Writer::new(backend.clone(), array);
    writer.set_array_schema(dense_1d_schema()).unwrap();
    writer.set_subarray(Subarray::new(vec![(0, 7)])).unwrap();
    writer.set_buffer("a", &values).unwrap();
    writer.init().unwrap();
    let err = writer.write().unwrap_err();
    assert!(matches!(
        err,
        tessera_result::Error::FieldCellCountMismatch { .. }
    ));
    assert!(committed_fragments(backend.as_ref(), array).is_empty());
}
