//! Binary encoding of a finished regional analysis.
//!
//! Layout (all integers little-endian `i32`):
//!
//! ```text
//! "ACCESSGR"                         8-byte magic
//! version                            currently 0
//! zoom, west, north, width, height   grid geometry
//! values_per_origin
//! values ...                         width * height * values_per_origin
//! ```
//!
//! Origins are stored row by row (`y` outer, `x` inner). Within an origin
//! each value is written as the difference from the previous value, the
//! first one relative to zero.

use crate::error::CoreError;

/// File magic.
pub const MAGIC: &[u8; 8] = b"ACCESSGR";

/// Current format version.
pub const VERSION: i32 = 0;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = MAGIC.len() + 7 * 4;

/// Geometry of an output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridHeader {
    pub zoom: i32,
    pub west: i32,
    pub north: i32,
    pub width: i32,
    pub height: i32,
}

impl GridHeader {
    pub fn cell_count(&self) -> usize {
        self.width.max(0) as usize * self.height.max(0) as usize
    }

    /// Row-major index of the cell at `(x, y)`, or `None` when outside.
    pub fn cell_index(&self, x: i32, y: i32) -> Option<usize> {
        if (0..self.width).contains(&x) && (0..self.height).contains(&y) {
            Some(y as usize * self.width as usize + x as usize)
        } else {
            None
        }
    }
}

/// Encode a complete grid.
///
/// `values` holds `values_per_origin` entries per cell in row-major cell
/// order.
pub fn encode(
    header: &GridHeader,
    values_per_origin: usize,
    values: &[i32],
) -> Result<Vec<u8>, CoreError> {
    let expected = header.cell_count() * values_per_origin;
    if values.len() != expected {
        return Err(CoreError::Internal(format!(
            "Output grid expects {expected} values, got {}",
            values.len()
        )));
    }
    let per_origin = i32::try_from(values_per_origin).map_err(|_| {
        CoreError::Internal(format!("{values_per_origin} values per origin is too many"))
    })?;

    let mut out = Vec::with_capacity(HEADER_LEN + values.len() * 4);
    out.extend_from_slice(MAGIC);
    for field in [
        VERSION,
        header.zoom,
        header.west,
        header.north,
        header.width,
        header.height,
        per_origin,
    ] {
        out.extend_from_slice(&field.to_le_bytes());
    }

    if values_per_origin > 0 {
        for origin in values.chunks(values_per_origin) {
            let mut previous = 0i32;
            for &value in origin {
                out.extend_from_slice(&value.wrapping_sub(previous).to_le_bytes());
                previous = value;
            }
        }
    }

    Ok(out)
}
