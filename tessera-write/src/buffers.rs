//! Typed, immutable views over user-supplied cell buffers.
//!
//! A [`RawBuffer`] is the untyped binding the caller hands to the writer; a
//! [`BufferView`] is the validated, shape-checked view the rest of the write
//! path reads cells through. Offsets are decoded to absolute byte positions
//! once, up front, as a pure function of the three offsets-representation
//! options plus the datatype size.

use tessera_result::{Error, Result};

use crate::config::{OffsetsBitsize, OffsetsMode, WriteConfig};
use crate::schema::FieldRef;
use crate::types::{ByteLen, CellIdx};

/// Borrowed user buffers for one field. The writer never mutates user
/// memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBuffer<'a> {
    pub values: &'a [u8],
    pub offsets: Option<&'a [u8]>,
    pub validity: Option<&'a [u8]>,
}

impl<'a> RawBuffer<'a> {
    pub fn fixed(values: &'a [u8]) -> Self {
        Self {
            values,
            offsets: None,
            validity: None,
        }
    }

    pub fn var(offsets: &'a [u8], values: &'a [u8]) -> Self {
        Self {
            values,
            offsets: Some(offsets),
            validity: None,
        }
    }

    pub fn with_validity(mut self, validity: &'a [u8]) -> Self {
        self.validity = Some(validity);
        self
    }
}

/// Validated view over one field's buffers.
#[derive(Debug)]
pub struct BufferView<'a> {
    field: String,
    values: &'a [u8],
    validity: Option<&'a [u8]>,
    var_sized: bool,
    cell_size: ByteLen,
    cell_num: u64,
    /// Absolute byte offsets into `values`, `cell_num + 1` entries.
    /// Var-sized fields only.
    offsets: Vec<u64>,
}

impl<'a> BufferView<'a> {
    pub fn new(
        field: FieldRef<'_>,
        raw: RawBuffer<'a>,
        config: &WriteConfig,
    ) -> Result<Self> {
        let name = field.name().to_string();
        let shape_err = |reason: String| Error::InvalidBufferShape {
            field: name.clone(),
            reason,
        };

        let (cell_num, cell_size, offsets) = if field.var_sized() {
            let offsets_buf = raw.offsets.ok_or_else(|| {
                shape_err("var-sized field bound without offsets".to_string())
            })?;
            let offsets = decode_offsets(
                offsets_buf,
                raw.values.len() as u64,
                field.datatype().size(),
                config,
            )
            .map_err(|reason| shape_err(reason))?;
            (offsets.len() as u64 - 1, 0, offsets)
        } else {
            if raw.offsets.is_some() {
                return Err(shape_err(
                    "fixed-size field bound with an offsets buffer"
                        .to_string(),
                ));
            }
            let cell_size = field.cell_size().ok_or_else(|| {
                Error::Internal(format!("field '{name}' has no cell size"))
            })?;
            let values_size = raw.values.len() as u64;
            if values_size % cell_size != 0 {
                return Err(shape_err(format!(
                    "values size {values_size} is not a multiple of the \
                     cell size {cell_size}"
                )));
            }
            (values_size / cell_size, cell_size, Vec::new())
        };

        if field.nullable() {
            let validity = raw.validity.ok_or_else(|| {
                shape_err(
                    "nullable field bound without a validity vector"
                        .to_string(),
                )
            })?;
            if validity.len() as u64 != cell_num {
                return Err(shape_err(format!(
                    "validity size {} differs from cell count {cell_num}",
                    validity.len()
                )));
            }
        } else if raw.validity.is_some() {
            return Err(shape_err(
                "non-nullable field bound with a validity vector".to_string(),
            ));
        }

        Ok(Self {
            field: name,
            values: raw.values,
            validity: raw.validity,
            var_sized: field.var_sized(),
            cell_size,
            cell_num,
            offsets,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn cell_num(&self) -> u64 {
        self.cell_num
    }

    pub fn var_sized(&self) -> bool {
        self.var_sized
    }

    /// The bytes of cell `i`.
    pub fn cell(&self, i: CellIdx) -> &'a [u8] {
        if self.var_sized {
            let start = self.offsets[i as usize] as usize;
            let end = self.offsets[i as usize + 1] as usize;
            &self.values[start..end]
        } else {
            let start = (i * self.cell_size) as usize;
            &self.values[start..start + self.cell_size as usize]
        }
    }

    pub fn cell_size_at(&self, i: CellIdx) -> ByteLen {
        if self.var_sized {
            self.offsets[i as usize + 1] - self.offsets[i as usize]
        } else {
            self.cell_size
        }
    }

    /// Validity byte of cell `i`, normalized to 0/1. Non-nullable fields
    /// report 1.
    pub fn validity(&self, i: CellIdx) -> u8 {
        match self.validity {
            Some(v) => (v[i as usize] != 0) as u8,
            None => 1,
        }
    }
}

/// Decode a raw offsets buffer into absolute byte positions within the
/// values buffer, with an appended terminal offset. Returns a reason string
/// on shape violations (the caller attaches the field name).
fn decode_offsets(
    offsets_buf: &[u8],
    values_size: u64,
    datatype_size: u64,
    config: &WriteConfig,
) -> std::result::Result<Vec<u64>, String> {
    let width = config.offsets_bitsize.width() as usize;
    if offsets_buf.is_empty() || offsets_buf.len() % width != 0 {
        return Err(format!(
            "offsets size {} is not a positive multiple of the offset \
             width {width}",
            offsets_buf.len()
        ));
    }
    let raw_num = offsets_buf.len() / width;
    if config.offsets_extra_element && raw_num < 1 {
        return Err("offsets buffer lacks the extra element".to_string());
    }

    let mut decoded = Vec::with_capacity(raw_num + 1);
    for i in 0..raw_num {
        let chunk = &offsets_buf[i * width..(i + 1) * width];
        let raw = match config.offsets_bitsize {
            OffsetsBitsize::Bits32 => {
                u32::from_le_bytes(chunk.try_into().unwrap()) as u64
            }
            OffsetsBitsize::Bits64 => {
                u64::from_le_bytes(chunk.try_into().unwrap())
            }
        };
        let abs = match config.offsets_mode {
            OffsetsMode::Elements => raw * datatype_size,
            OffsetsMode::Bytes => raw,
        };
        decoded.push(abs);
    }

    if config.offsets_extra_element {
        let last = *decoded.last().unwrap();
        if last != values_size {
            return Err(format!(
                "extra offsets element {last} does not equal the values \
                 size {values_size}"
            ));
        }
    } else {
        decoded.push(values_size);
    }

    for w in decoded.windows(2) {
        if w[0] > w[1] {
            return Err(format!(
                "offsets are not non-decreasing ({} then {})",
                w[0], w[1]
            ));
        }
    }
    if let Some(&last) = decoded.last() {
        if last > values_size {
            return Err(format!(
                "offset {last} exceeds the values size {values_size}"
            ));
        }
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Datatype, FieldRef};

    fn offsets64(values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn fixed_view() {
        let attr = Attribute::new("a", Datatype::Int32);
        let values: Vec<u8> =
            [10i32, 11, 12].iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::fixed(&values),
            &WriteConfig::default(),
        )
        .unwrap();
        assert_eq!(view.cell_num(), 3);
        assert_eq!(view.cell(1), 11i32.to_le_bytes());
        assert_eq!(view.validity(2), 1);
    }

    #[test]
    fn fixed_view_rejects_ragged_values() {
        let attr = Attribute::new("a", Datatype::Int32);
        let values = [0u8; 6];
        let err = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::fixed(&values),
            &WriteConfig::default(),
        );
        assert!(matches!(err, Err(Error::InvalidBufferShape { .. })));
    }

    #[test]
    fn var_nullable_view_with_extra_element() {
        let attr = Attribute::var("a", Datatype::StringAscii).nullable();
        let values = b"foobarbaz";
        let offsets = offsets64(&[0, 3, 6, 6, 9]);
        let validity = [1u8, 1, 0, 1];
        let mut cfg = WriteConfig::default();
        cfg.offsets_extra_element = true;

        let view = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::var(&offsets, values).with_validity(&validity),
            &cfg,
        )
        .unwrap();
        assert_eq!(view.cell_num(), 4);
        assert_eq!(view.cell(0), b"foo");
        assert_eq!(view.cell(2), b"");
        assert_eq!(view.cell(3), b"baz");
        assert_eq!(view.validity(2), 0);
        assert_eq!(view.validity(3), 1);
    }

    #[test]
    fn var_view_element_mode_32bit() {
        let attr = Attribute::var("a", Datatype::Int32);
        let values: Vec<u8> =
            [1i32, 2, 3].iter().flat_map(|v| v.to_le_bytes()).collect();
        // Element offsets [0, 1]: cells of 1 and 2 ints.
        let offsets: Vec<u8> =
            [0u32, 1].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut cfg = WriteConfig::default();
        cfg.offsets_mode = OffsetsMode::Elements;
        cfg.offsets_bitsize = OffsetsBitsize::Bits32;

        let view = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::var(&offsets, &values),
            &cfg,
        )
        .unwrap();
        assert_eq!(view.cell_num(), 2);
        assert_eq!(view.cell_size_at(0), 4);
        assert_eq!(view.cell_size_at(1), 8);
    }

    #[test]
    fn var_view_rejects_decreasing_offsets() {
        let attr = Attribute::var("a", Datatype::UInt8);
        let values = [0u8; 8];
        let offsets = offsets64(&[0, 5, 3]);
        let err = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::var(&offsets, &values),
            &WriteConfig::default(),
        );
        assert!(matches!(err, Err(Error::InvalidBufferShape { .. })));
    }

    #[test]
    fn var_view_rejects_bad_extra_element() {
        let attr = Attribute::var("a", Datatype::UInt8);
        let values = [0u8; 8];
        let offsets = offsets64(&[0, 4, 7]); // should end at 8
        let mut cfg = WriteConfig::default();
        cfg.offsets_extra_element = true;
        let err = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::var(&offsets, &values),
            &cfg,
        );
        assert!(matches!(err, Err(Error::InvalidBufferShape { .. })));
    }

    #[test]
    fn nullable_requires_matching_validity() {
        let attr = Attribute::new("a", Datatype::Int32).nullable();
        let values = [0u8; 8];
        let validity = [1u8; 3];
        let err = BufferView::new(
            FieldRef::Attr(&attr),
            RawBuffer::fixed(&values).with_validity(&validity),
            &WriteConfig::default(),
        );
        assert!(matches!(err, Err(Error::InvalidBufferShape { .. })));
    }
}
