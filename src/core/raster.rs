use crate::core::geo_reference::GeoReference;
use crate::types::{CleanupError, CleanupResult, Pixel};
use ndarray::Array2;

/// Single-band raster held in memory (row x column) together with its
/// geo-reference and optional no-data sentinel
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub data: Array2<Pixel>,
    pub geo: GeoReference,
    pub no_data: Option<Pixel>,
}

impl Raster {
    pub fn new(data: Array2<Pixel>, geo: GeoReference, no_data: Option<Pixel>) -> Self {
        Self { data, geo, no_data }
    }

    /// (height, width)
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_no_data(&self, value: Pixel) -> bool {
        self.no_data == Some(value)
    }

    /// New raster sharing this one's geo-reference and no-data value
    pub fn with_data(&self, data: Array2<Pixel>) -> CleanupResult<Self> {
        if data.dim() != self.dim() {
            return Err(CleanupError::ShapeMismatch {
                expected: self.dim(),
                found: data.dim(),
            });
        }

        Ok(Self {
            data,
            geo: self.geo,
            no_data: self.no_data,
        })
    }

    /// Fail unless `other` has the same (height, width)
    pub fn ensure_same_shape(&self, other: &Raster) -> CleanupResult<()> {
        if self.dim() != other.dim() {
            return Err(CleanupError::ShapeMismatch {
                expected: self.dim(),
                found: other.dim(),
            });
        }
        Ok(())
    }
}
