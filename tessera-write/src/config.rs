//! Query-scoped writer configuration.

use tessera_result::{Error, Result};

use crate::types::ByteLen;

/// Whether a raw offset in a var-sized offsets buffer counts elements of the
/// field datatype or bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetsMode {
    Elements,
    Bytes,
}

/// Integer width of each entry in a var-sized offsets buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetsBitsize {
    Bits32,
    Bits64,
}

impl OffsetsBitsize {
    /// Width of one offset entry in bytes.
    pub fn width(self) -> ByteLen {
        match self {
            OffsetsBitsize::Bits32 => 4,
            OffsetsBitsize::Bits64 => 8,
        }
    }
}

/// Run-time configuration of one write query (no hidden constants).
#[derive(Debug, Clone)]
pub struct WriteConfig {
    /// Fail on duplicate coordinates (sparse; meaningful only when
    /// `dedup_coords` is off).
    pub check_coord_dups: bool,
    /// Fail on coordinates outside the dimension domains (sparse).
    pub check_coord_oob: bool,
    /// Silently drop duplicate coordinates instead of erroring.
    pub dedup_coords: bool,
    /// Verify global-layout submissions obey the global order.
    pub check_global_order: bool,
    /// How raw offsets are counted.
    pub offsets_mode: OffsetsMode,
    /// Whether offsets buffers carry a trailing sentinel equal to the
    /// values-buffer size.
    pub offsets_extra_element: bool,
    /// Width of each raw offset.
    pub offsets_bitsize: OffsetsBitsize,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            check_coord_dups: true,
            check_coord_oob: true,
            dedup_coords: false,
            check_global_order: true,
            offsets_mode: OffsetsMode::Bytes,
            offsets_extra_element: false,
            offsets_bitsize: OffsetsBitsize::Bits64,
        }
    }
}

impl WriteConfig {
    /// Apply one `key = value` pair. Unknown keys and unparsable values are
    /// configuration errors.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "check_coord_dups" => self.check_coord_dups = parse_bool(key, value)?,
            "check_coord_oob" => self.check_coord_oob = parse_bool(key, value)?,
            "dedup_coords" => self.dedup_coords = parse_bool(key, value)?,
            "check_global_order" => {
                self.check_global_order = parse_bool(key, value)?
            }
            "offsets_mode" => {
                self.offsets_mode = match value {
                    "elements" => OffsetsMode::Elements,
                    "bytes" => OffsetsMode::Bytes,
                    other => {
                        return Err(Error::Config(format!(
                            "invalid offsets_mode '{other}'; expected \
                             'elements' or 'bytes'"
                        )))
                    }
                }
            }
            "offsets_extra_element" => {
                self.offsets_extra_element = parse_bool(key, value)?
            }
            "offsets_bitsize" => {
                self.offsets_bitsize = match value {
                    "32" => OffsetsBitsize::Bits32,
                    "64" => OffsetsBitsize::Bits64,
                    other => {
                        return Err(Error::Config(format!(
                            "invalid offsets_bitsize '{other}'; expected 32 \
                             or 64"
                        )))
                    }
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "unrecognized config key '{other}'"
                )))
            }
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::Config(format!(
            "invalid value '{other}' for '{key}'; expected 'true' or 'false'"
        ))),
    }
}
