use crate::core::geo_reference::GeoReference;
use crate::core::raster::Raster;
use crate::types::{BoundingBox, Pixel};
use ndarray::{s, Array2, ArrayView2};

/// Pixel sub-window of a raster, in grid offsets and sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub row_offset: usize,
    pub col_offset: usize,
    pub rows: usize,
    pub cols: usize,
}

impl PixelWindow {
    /// View of `data` restricted to this window
    pub fn view<'a>(&self, data: &'a Array2<Pixel>) -> ArrayView2<'a, Pixel> {
        data.slice(s![
            self.row_offset..self.row_offset + self.rows,
            self.col_offset..self.col_offset + self.cols
        ])
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes the pixel window covering a geographic box on one raster grid.
///
/// Edges that fall inside a pixel round outward: any pixel partially inside
/// the box belongs to the window, so coverage is never undercounted. The far
/// (south/east) edge is inclusive, which also takes in a pixel the box only
/// touches.
#[derive(Debug, Clone, Copy)]
pub struct WindowExtractor {
    geo: GeoReference,
    width: usize,
    height: usize,
}

impl WindowExtractor {
    pub fn new(geo: GeoReference, width: usize, height: usize) -> Self {
        Self { geo, width, height }
    }

    pub fn for_raster(raster: &Raster) -> Self {
        Self::new(raster.geo, raster.width(), raster.height())
    }

    /// Window for `bbox`, or `None` when the box does not overlap the grid
    pub fn window(&self, bbox: &BoundingBox) -> Option<PixelWindow> {
        if self.width == 0 || self.height == 0 {
            return None;
        }

        let row_north = self.geo.lat_to_row(bbox.max_lat);
        let row_south = self.geo.lat_to_row(bbox.min_lat);
        let col_west = self.geo.lon_to_col(bbox.min_lon);
        let col_east = self.geo.lon_to_col(bbox.max_lon);

        // north-up grids have the north edge on the smaller row; accept either
        let (row_first, row_last) = ordered(row_north, row_south);
        let (col_first, col_last) = ordered(col_west, col_east);

        if !(row_first.is_finite() && row_last.is_finite() && col_first.is_finite() && col_last.is_finite()) {
            return None;
        }

        let (height, width) = (self.height as f64, self.width as f64);
        // an edge lying exactly on the top or left border still touches row or column 0
        if row_last < 0.0 || col_last < 0.0 || row_first >= height || col_first >= width {
            return None;
        }

        let first_row = row_first.floor().max(0.0) as usize;
        let first_col = col_first.floor().max(0.0) as usize;
        let last_row = (row_last.ceil() as usize).min(self.height - 1);
        let last_col = (col_last.ceil() as usize).min(self.width - 1);

        if last_row < first_row || last_col < first_col {
            return None;
        }

        Some(PixelWindow {
            row_offset: first_row,
            col_offset: first_col,
            rows: last_row - first_row + 1,
            cols: last_col - first_col + 1,
        })
    }

    /// Pixel data of `raster` inside `bbox`, or `None` outside the raster
    pub fn extract<'a>(&self, raster: &'a Raster, bbox: &BoundingBox) -> Option<ArrayView2<'a, Pixel>> {
        self.window(bbox).map(|window| window.view(&raster.data))
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
