//! Array schema model: datatypes, dimensions, attributes, orders.
//!
//! The schema registry itself is external; the write path receives a
//! validated [`ArraySchema`] and reads it through [`FieldRef`] so tile and
//! buffer code can treat attributes and dimensions uniformly.

use tessera_result::{Error, Result};

use crate::filter::FilterPipeline;
use crate::types::ByteLen;

/// `cell_val_num` sentinel marking a var-sized field.
pub const VAR_NUM: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    StringAscii,
}

impl Datatype {
    /// Size of one value in bytes.
    pub fn size(self) -> ByteLen {
        match self {
            Datatype::Int8 | Datatype::UInt8 | Datatype::StringAscii => 1,
            Datatype::Int16 | Datatype::UInt16 => 2,
            Datatype::Int32 | Datatype::UInt32 | Datatype::Float32 => 4,
            Datatype::Int64 | Datatype::UInt64 | Datatype::Float64 => 8,
        }
    }

    pub fn is_integral(self) -> bool {
        !matches!(
            self,
            Datatype::Float32 | Datatype::Float64 | Datatype::StringAscii
        )
    }

    /// Decode one little-endian value into an `i64`. Integral types only.
    pub fn decode_i64(self, bytes: &[u8]) -> Result<i64> {
        let fail = || {
            Error::Internal(format!(
                "cannot decode {self:?} value of {} bytes as i64",
                bytes.len()
            ))
        };
        Ok(match self {
            Datatype::Int8 => bytes[0] as i8 as i64,
            Datatype::UInt8 => bytes[0] as i64,
            Datatype::Int16 => {
                i16::from_le_bytes(bytes.try_into().map_err(|_| fail())?) as i64
            }
            Datatype::UInt16 => {
                u16::from_le_bytes(bytes.try_into().map_err(|_| fail())?) as i64
            }
            Datatype::Int32 => {
                i32::from_le_bytes(bytes.try_into().map_err(|_| fail())?) as i64
            }
            Datatype::UInt32 => {
                u32::from_le_bytes(bytes.try_into().map_err(|_| fail())?) as i64
            }
            Datatype::Int64 => {
                i64::from_le_bytes(bytes.try_into().map_err(|_| fail())?)
            }
            Datatype::UInt64 => {
                let v =
                    u64::from_le_bytes(bytes.try_into().map_err(|_| fail())?);
                i64::try_from(v).map_err(|_| fail())?
            }
            _ => return Err(fail()),
        })
    }

    /// Encode an `i64` into the native little-endian representation.
    /// Integral types only; the value must fit.
    pub fn encode_i64(self, v: i64) -> Result<Vec<u8>> {
        let fail =
            || Error::Internal(format!("{v} does not fit in {self:?}"));
        Ok(match self {
            Datatype::Int8 => {
                vec![i8::try_from(v).map_err(|_| fail())? as u8]
            }
            Datatype::UInt8 => vec![u8::try_from(v).map_err(|_| fail())?],
            Datatype::Int16 => i16::try_from(v)
                .map_err(|_| fail())?
                .to_le_bytes()
                .to_vec(),
            Datatype::UInt16 => u16::try_from(v)
                .map_err(|_| fail())?
                .to_le_bytes()
                .to_vec(),
            Datatype::Int32 => i32::try_from(v)
                .map_err(|_| fail())?
                .to_le_bytes()
                .to_vec(),
            Datatype::UInt32 => u32::try_from(v)
                .map_err(|_| fail())?
                .to_le_bytes()
                .to_vec(),
            Datatype::Int64 => v.to_le_bytes().to_vec(),
            Datatype::UInt64 => u64::try_from(v)
                .map_err(|_| fail())?
                .to_le_bytes()
                .to_vec(),
            _ => return Err(fail()),
        })
    }

    /// Decode one little-endian value into an `f64` for summation.
    /// Numeric types only.
    pub fn decode_f64(self, bytes: &[u8]) -> Result<f64> {
        match self {
            Datatype::Float32 => Ok(f32::from_le_bytes(
                bytes
                    .try_into()
                    .map_err(|_| Error::Internal("bad f32 width".into()))?,
            ) as f64),
            Datatype::Float64 => Ok(f64::from_le_bytes(
                bytes
                    .try_into()
                    .map_err(|_| Error::Internal("bad f64 width".into()))?,
            )),
            Datatype::UInt64 => {
                let v = u64::from_le_bytes(bytes.try_into().map_err(|_| {
                    Error::Internal("bad u64 width".into())
                })?);
                Ok(v as f64)
            }
            Datatype::StringAscii => Err(Error::Internal(
                "cannot sum string values".to_string(),
            )),
            _ => Ok(self.decode_i64(bytes)? as f64),
        }
    }

    /// Render one little-endian value for error messages.
    pub fn value_to_string(self, bytes: &[u8]) -> String {
        match self {
            Datatype::Float32 => bytes
                .try_into()
                .map(|b| f32::from_le_bytes(b).to_string())
                .unwrap_or_else(|_| "?".to_string()),
            Datatype::Float64 => bytes
                .try_into()
                .map(|b| f64::from_le_bytes(b).to_string())
                .unwrap_or_else(|_| "?".to_string()),
            Datatype::StringAscii => {
                String::from_utf8_lossy(bytes).into_owned()
            }
            _ => self
                .decode_i64(bytes)
                .map(|v| v.to_string())
                .unwrap_or_else(|_| "?".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayType {
    Dense,
    Sparse,
}

impl ArrayType {
    pub fn as_str(self) -> &'static str {
        match self {
            ArrayType::Dense => "dense",
            ArrayType::Sparse => "sparse",
        }
    }
}

/// Cell layout of a write query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    RowMajor,
    ColMajor,
    GlobalOrder,
    Unordered,
}

impl Layout {
    pub fn as_str(self) -> &'static str {
        match self {
            Layout::RowMajor => "row-major",
            Layout::ColMajor => "col-major",
            Layout::GlobalOrder => "global-order",
            Layout::Unordered => "unordered",
        }
    }
}

/// Order of cells within a tile, and the sparse global order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOrder {
    RowMajor,
    ColMajor,
    Hilbert,
}

/// Order of tiles within a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOrder {
    RowMajor,
    ColMajor,
}

/// One array dimension. Domain and tile extent are stored in the native
/// little-endian encoding of the datatype; var-sized dimensions have
/// neither.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub datatype: Datatype,
    /// Inclusive `[min, max]`.
    pub domain: Option<(Vec<u8>, Vec<u8>)>,
    pub tile_extent: Option<Vec<u8>>,
    pub var_sized: bool,
}

impl Dimension {
    pub fn int32(name: &str, domain: (i32, i32), extent: Option<i32>) -> Self {
        Self {
            name: name.to_string(),
            datatype: Datatype::Int32,
            domain: Some((
                domain.0.to_le_bytes().to_vec(),
                domain.1.to_le_bytes().to_vec(),
            )),
            tile_extent: extent.map(|e| e.to_le_bytes().to_vec()),
            var_sized: false,
        }
    }

    pub fn int64(name: &str, domain: (i64, i64), extent: Option<i64>) -> Self {
        Self {
            name: name.to_string(),
            datatype: Datatype::Int64,
            domain: Some((
                domain.0.to_le_bytes().to_vec(),
                domain.1.to_le_bytes().to_vec(),
            )),
            tile_extent: extent.map(|e| e.to_le_bytes().to_vec()),
            var_sized: false,
        }
    }

    pub fn float64(name: &str, domain: (f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            datatype: Datatype::Float64,
            domain: Some((
                domain.0.to_le_bytes().to_vec(),
                domain.1.to_le_bytes().to_vec(),
            )),
            tile_extent: None,
            var_sized: false,
        }
    }

    /// Var-sized string dimension (sparse arrays only; unbounded domain).
    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            datatype: Datatype::StringAscii,
            domain: None,
            tile_extent: None,
            var_sized: true,
        }
    }

    /// Size of one coordinate in bytes; `None` for var-sized dimensions.
    pub fn cell_size(&self) -> Option<ByteLen> {
        (!self.var_sized).then(|| self.datatype.size())
    }

    pub fn domain_i64(&self) -> Result<(i64, i64)> {
        let (lo, hi) = self.domain.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "dimension '{}' has no domain",
                self.name
            ))
        })?;
        Ok((
            self.datatype.decode_i64(lo)?,
            self.datatype.decode_i64(hi)?,
        ))
    }

    pub fn extent_i64(&self) -> Result<i64> {
        let extent = self.tile_extent.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "dimension '{}' has no tile extent",
                self.name
            ))
        })?;
        self.datatype.decode_i64(extent)
    }
}

/// One array attribute.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub datatype: Datatype,
    /// Values per cell; [`VAR_NUM`] marks a var-sized attribute.
    pub cell_val_num: u32,
    pub nullable: bool,
    /// Per-cell fill pattern for empty dense cells; zero bytes when unset.
    pub fill: Option<Vec<u8>>,
    pub filters: FilterPipeline,
}

impl Attribute {
    pub fn new(name: &str, datatype: Datatype) -> Self {
        Self {
            name: name.to_string(),
            datatype,
            cell_val_num: 1,
            nullable: false,
            fill: None,
            filters: FilterPipeline::new(),
        }
    }

    pub fn var(name: &str, datatype: Datatype) -> Self {
        let mut a = Self::new(name, datatype);
        a.cell_val_num = VAR_NUM;
        a
    }

    pub fn fixed(name: &str, datatype: Datatype, cell_val_num: u32) -> Self {
        let mut a = Self::new(name, datatype);
        a.cell_val_num = cell_val_num;
        a
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_fill(mut self, fill: Vec<u8>) -> Self {
        self.fill = Some(fill);
        self
    }

    pub fn with_filters(mut self, filters: FilterPipeline) -> Self {
        self.filters = filters;
        self
    }

    pub fn var_sized(&self) -> bool {
        self.cell_val_num == VAR_NUM
    }

    /// Fixed per-cell byte size; `None` for var-sized attributes.
    pub fn cell_size(&self) -> Option<ByteLen> {
        (!self.var_sized())
            .then(|| self.datatype.size() * self.cell_val_num as u64)
    }
}

/// Uniform read access to an attribute or dimension.
#[derive(Clone, Copy)]
pub enum FieldRef<'a> {
    Dim(&'a Dimension),
    Attr(&'a Attribute),
}

impl<'a> FieldRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            FieldRef::Dim(d) => &d.name,
            FieldRef::Attr(a) => &a.name,
        }
    }

    pub fn datatype(&self) -> Datatype {
        match self {
            FieldRef::Dim(d) => d.datatype,
            FieldRef::Attr(a) => a.datatype,
        }
    }

    pub fn var_sized(&self) -> bool {
        match self {
            FieldRef::Dim(d) => d.var_sized,
            FieldRef::Attr(a) => a.var_sized(),
        }
    }

    pub fn nullable(&self) -> bool {
        match self {
            FieldRef::Dim(_) => false,
            FieldRef::Attr(a) => a.nullable,
        }
    }

    pub fn cell_size(&self) -> Option<ByteLen> {
        match self {
            FieldRef::Dim(d) => d.cell_size(),
            FieldRef::Attr(a) => a.cell_size(),
        }
    }

    pub fn fill_value(&self) -> Option<&'a [u8]> {
        match self {
            FieldRef::Dim(_) => None,
            FieldRef::Attr(a) => a.fill.as_deref(),
        }
    }
}

/// The array schema, as handed to the writer by the (external) registry.
#[derive(Debug, Clone)]
pub struct ArraySchema {
    pub array_type: ArrayType,
    pub dimensions: Vec<Dimension>,
    pub attributes: Vec<Attribute>,
    /// Cells per tile for sparse arrays.
    pub capacity: u64,
    pub cell_order: CellOrder,
    pub tile_order: TileOrder,
    /// Filter pipeline applied to coordinate tiles.
    pub coords_filters: FilterPipeline,
    /// Schema-driven policy: the array accepts only global-order writes
    /// (append-only stores set this).
    pub global_order_only: bool,
}

impl ArraySchema {
    pub fn new(array_type: ArrayType) -> Self {
        Self {
            array_type,
            dimensions: Vec::new(),
            attributes: Vec::new(),
            capacity: 10_000,
            cell_order: CellOrder::RowMajor,
            tile_order: TileOrder::RowMajor,
            coords_filters: FilterPipeline::new(),
            global_order_only: false,
        }
    }

    pub fn with_dimension(mut self, dim: Dimension) -> Self {
        self.dimensions.push(dim);
        self
    }

    pub fn with_attribute(mut self, attr: Attribute) -> Self {
        self.attributes.push(attr);
        self
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_cell_order(mut self, order: CellOrder) -> Self {
        self.cell_order = order;
        self
    }

    pub fn with_tile_order(mut self, order: TileOrder) -> Self {
        self.tile_order = order;
        self
    }

    pub fn with_coords_filters(mut self, filters: FilterPipeline) -> Self {
        self.coords_filters = filters;
        self
    }

    pub fn global_order_only(mut self) -> Self {
        self.global_order_only = true;
        self
    }

    /// Structural validation; the writer calls this once at init.
    pub fn check(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(Error::Config(
                "schema has no dimensions".to_string(),
            ));
        }
        if self.attributes.is_empty() {
            return Err(Error::Config(
                "schema has no attributes".to_string(),
            ));
        }
        let mut names: Vec<&str> = self.field_names();
        names.sort_unstable();
        for w in names.windows(2) {
            if w[0] == w[1] {
                return Err(Error::Config(format!(
                    "duplicate field name '{}'",
                    w[0]
                )));
            }
        }
        for a in &self.attributes {
            if a.cell_val_num == 0 {
                return Err(Error::Config(format!(
                    "attribute '{}' has zero cell_val_num",
                    a.name
                )));
            }
            if let (Some(fill), Some(cell_size)) = (&a.fill, a.cell_size()) {
                if fill.len() as u64 != cell_size {
                    return Err(Error::Config(format!(
                        "attribute '{}' fill is {} bytes, cell size is {}",
                        a.name,
                        fill.len(),
                        cell_size
                    )));
                }
            }
        }
        match self.array_type {
            ArrayType::Dense => {
                for d in &self.dimensions {
                    if d.var_sized || !d.datatype.is_integral() {
                        return Err(Error::Config(format!(
                            "dense arrays need integral fixed-size \
                             dimensions; '{}' is not",
                            d.name
                        )));
                    }
                    let (lo, hi) = d.domain_i64()?;
                    let extent = d.extent_i64()?;
                    if lo > hi || extent <= 0 {
                        return Err(Error::Config(format!(
                            "dimension '{}' has an empty domain or \
                             non-positive tile extent",
                            d.name
                        )));
                    }
                }
            }
            ArrayType::Sparse => {
                if self.capacity == 0 {
                    return Err(Error::Config(
                        "sparse schema capacity must be positive".to_string(),
                    ));
                }
                for d in &self.dimensions {
                    if let Some((lo, hi)) = &d.domain {
                        if d.datatype.is_integral()
                            && d.datatype.decode_i64(lo)?
                                > d.datatype.decode_i64(hi)?
                        {
                            return Err(Error::Config(format!(
                                "dimension '{}' has an empty domain",
                                d.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn dim_num(&self) -> usize {
        self.dimensions.len()
    }

    /// Dimension names then attribute names, in schema order.
    pub fn field_names(&self) -> Vec<&str> {
        self.dimensions
            .iter()
            .map(|d| d.name.as_str())
            .chain(self.attributes.iter().map(|a| a.name.as_str()))
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<FieldRef<'_>> {
        if let Some(d) = self.dimensions.iter().find(|d| d.name == name) {
            return Some(FieldRef::Dim(d));
        }
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(FieldRef::Attr)
    }

    pub fn is_dim(&self, name: &str) -> bool {
        self.dimensions.iter().any(|d| d.name == name)
    }

    pub fn field_filters(&self, name: &str) -> &FilterPipeline {
        if self.is_dim(name) {
            &self.coords_filters
        } else {
            self.attributes
                .iter()
                .find(|a| a.name == name)
                .map(|a| &a.filters)
                .unwrap_or(&self.coords_filters)
        }
    }

    /// Cells per tile: the dense tile volume, or the sparse capacity.
    pub fn cells_per_tile(&self) -> Result<u64> {
        match self.array_type {
            ArrayType::Sparse => Ok(self.capacity),
            ArrayType::Dense => {
                let mut n: u64 = 1;
                for d in &self.dimensions {
                    let extent = d.extent_i64()? as u64;
                    n = n.checked_mul(extent).ok_or_else(|| {
                        Error::Config(
                            "tile volume overflows u64".to_string(),
                        )
                    })?;
                }
                Ok(n)
            }
        }
    }

    /// Bits per dimension for Hilbert-order values.
    pub fn hilbert_bits(&self) -> u32 {
        64 / self.dim_num() as u32
    }

    /// Byte size of one zipped coordinate tuple. Errors if any dimension is
    /// var-sized (zipped coordinates require fixed-size dimensions).
    pub fn coords_cell_size(&self) -> Result<ByteLen> {
        let mut size = 0;
        for d in &self.dimensions {
            size += d.cell_size().ok_or_else(|| {
                Error::Config(format!(
                    "zipped coordinates are not supported with var-sized \
                     dimension '{}'",
                    d.name
                ))
            })?;
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dense_1d() -> ArraySchema {
        ArraySchema::new(ArrayType::Dense)
            .with_dimension(Dimension::int32("d", (0, 7), Some(4)))
            .with_attribute(Attribute::new("a", Datatype::Int32))
    }

    #[test]
    fn dense_schema_checks() {
        let schema = dense_1d();
        schema.check().unwrap();
        assert_eq!(schema.cells_per_tile().unwrap(), 4);
        assert_eq!(schema.hilbert_bits(), 64);
        assert!(schema.is_dim("d"));
        assert!(!schema.is_dim("a"));
    }

    #[test]
    fn duplicate_names_rejected() {
        let schema = dense_1d()
            .with_attribute(Attribute::new("d", Datatype::Float32));
        assert!(schema.check().is_err());
    }

    #[test]
    fn dense_rejects_var_dims() {
        let schema = ArraySchema::new(ArrayType::Dense)
            .with_dimension(Dimension::string("s"))
            .with_attribute(Attribute::new("a", Datatype::Int32));
        assert!(schema.check().is_err());
    }

    #[test]
    fn fill_must_match_cell_size() {
        let schema = ArraySchema::new(ArrayType::Dense)
            .with_dimension(Dimension::int32("d", (0, 7), Some(4)))
            .with_attribute(
                Attribute::new("a", Datatype::Int32).with_fill(vec![0u8; 3]),
            );
        assert!(schema.check().is_err());
    }

    #[test]
    fn zipped_coords_cell_size() {
        let schema = ArraySchema::new(ArrayType::Sparse)
            .with_dimension(Dimension::int32("x", (0, 9), None))
            .with_dimension(Dimension::int64("y", (0, 9), None))
            .with_attribute(Attribute::new("a", Datatype::Float32));
        assert_eq!(schema.coords_cell_size().unwrap(), 12);
        assert_eq!(schema.hilbert_bits(), 32);
    }
}
