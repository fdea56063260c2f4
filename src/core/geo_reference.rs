use crate::types::{BoundingBox, CleanupError, CleanupResult, GeoTransform};
use std::fmt;

/// Affine mapping between pixel grid positions and geographic coordinates.
///
/// Rotation terms are assumed to be zero; only origin and per-axis step are
/// kept. Steps are validated at construction so the transforms below never
/// divide by zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoReference {
    x_origin: f64,
    x_step: f64,
    y_origin: f64,
    y_step: f64,
}

impl GeoReference {
    /// Create a geo-reference from origin and per-axis step
    pub fn new(x_origin: f64, x_step: f64, y_origin: f64, y_step: f64) -> CleanupResult<Self> {
        if !x_origin.is_finite() || !y_origin.is_finite() {
            return Err(CleanupError::InvalidGeoReference(format!(
                "origin ({}, {}) is not finite",
                x_origin, y_origin
            )));
        }

        if x_step == 0.0 || y_step == 0.0 || !x_step.is_finite() || !y_step.is_finite() {
            return Err(CleanupError::InvalidGeoReference(format!(
                "pixel steps must be finite and non-zero (x = {}, y = {})",
                x_step, y_step
            )));
        }

        Ok(Self {
            x_origin,
            x_step,
            y_origin,
            y_step,
        })
    }

    /// Create a geo-reference from a GDAL geotransform, ignoring rotation
    pub fn from_transform(transform: &GeoTransform) -> CleanupResult<Self> {
        if transform.rotation_x != 0.0 || transform.rotation_y != 0.0 {
            log::warn!(
                "Ignoring non-zero rotation terms ({}, {}) in geotransform",
                transform.rotation_x,
                transform.rotation_y
            );
        }

        Self::new(
            transform.top_left_x,
            transform.pixel_width,
            transform.top_left_y,
            transform.pixel_height,
        )
    }

    /// Back to a GDAL geotransform (rotation terms zero)
    pub fn to_transform(&self) -> GeoTransform {
        GeoTransform {
            top_left_x: self.x_origin,
            pixel_width: self.x_step,
            rotation_x: 0.0,
            top_left_y: self.y_origin,
            rotation_y: 0.0,
            pixel_height: self.y_step,
        }
    }

    pub fn x_origin(&self) -> f64 {
        self.x_origin
    }

    pub fn x_step(&self) -> f64 {
        self.x_step
    }

    pub fn y_origin(&self) -> f64 {
        self.y_origin
    }

    pub fn y_step(&self) -> f64 {
        self.y_step
    }

    /// Area of one pixel, in the units of the transform
    pub fn pixel_area(&self) -> f64 {
        (self.x_step * self.y_step).abs()
    }

    /// Convert (latitude, longitude) to fractional (column, row)
    pub fn to_pixel(&self, latitude: f64, longitude: f64) -> (f64, f64) {
        (self.lon_to_col(longitude), self.lat_to_row(latitude))
    }

    /// Convert (column, row) to (latitude, longitude)
    pub fn to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (self.row_to_lat(row), self.col_to_lon(col))
    }

    pub fn lat_to_row(&self, latitude: f64) -> f64 {
        (latitude - self.y_origin) / self.y_step
    }

    pub fn lon_to_col(&self, longitude: f64) -> f64 {
        (longitude - self.x_origin) / self.x_step
    }

    pub fn row_to_lat(&self, row: f64) -> f64 {
        self.y_origin + self.y_step * row
    }

    pub fn col_to_lon(&self, col: f64) -> f64 {
        self.x_origin + self.x_step * col
    }

    /// Geographic extent of a grid of `width` x `height` pixels
    pub fn extent(&self, width: usize, height: usize) -> BoundingBox {
        let x_end = self.col_to_lon(width as f64);
        let y_end = self.row_to_lat(height as f64);

        BoundingBox {
            min_lon: self.x_origin.min(x_end),
            max_lon: self.x_origin.max(x_end),
            min_lat: self.y_origin.min(y_end),
            max_lat: self.y_origin.max(y_end),
        }
    }
}

impl fmt::Display for GeoReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X :: {:+13.8}/{:+13.10}; Y :: {:+13.8}/{:+13.10}",
            self.x_origin, self.x_step, self.y_origin, self.y_step
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn albers_like() -> GeoReference {
        GeoReference::new(-2_356_095.0, 30.0, 3_172_605.0, -30.0).unwrap()
    }

    #[test]
    fn test_zero_step_rejected() {
        assert!(GeoReference::new(0.0, 0.0, 0.0, -1.0).is_err());
        assert!(GeoReference::new(0.0, 1.0, 0.0, 0.0).is_err());
        assert!(GeoReference::new(0.0, f64::NAN, 0.0, -1.0).is_err());
    }

    #[test]
    fn test_pixel_area_non_negative() {
        assert_relative_eq!(albers_like().pixel_area(), 900.0);

        let north_up = GeoReference::new(10.0, 0.5, 20.0, 0.25).unwrap();
        assert_relative_eq!(north_up.pixel_area(), 0.125);
    }

    #[test]
    fn test_round_trip_pixel_geo() {
        let geo = albers_like();

        for &(col, row) in &[(0.0, 0.0), (12.0, 7.0), (3.5, 1024.25), (99_999.0, 42.0)] {
            let (lat, lon) = geo.to_geo(col, row);
            let (c, r) = geo.to_pixel(lat, lon);
            assert_relative_eq!(c, col, epsilon = 1e-6);
            assert_relative_eq!(r, row, epsilon = 1e-6);
        }

        let (lat, lon) = (3_100_000.0, -2_300_000.0);
        let (c, r) = geo.to_pixel(lat, lon);
        let (lat2, lon2) = geo.to_geo(c, r);
        assert_relative_eq!(lat2, lat, epsilon = 1e-6);
        assert_relative_eq!(lon2, lon, epsilon = 1e-6);
    }

    #[test]
    fn test_grid_aligned_exact() {
        let geo = GeoReference::new(-100.0, 0.25, 45.0, -0.25).unwrap();
        assert_eq!(geo.lat_to_row(44.0), 4.0);
        assert_eq!(geo.lon_to_col(-99.0), 4.0);
        assert_eq!(geo.row_to_lat(4.0), 44.0);
    }

    #[test]
    fn test_extent() {
        let geo = GeoReference::new(-100.0, 0.5, 45.0, -0.5).unwrap();
        let bbox = geo.extent(4, 2);
        assert_relative_eq!(bbox.min_lon, -100.0);
        assert_relative_eq!(bbox.max_lon, -98.0);
        assert_relative_eq!(bbox.min_lat, 44.0);
        assert_relative_eq!(bbox.max_lat, 45.0);
    }

    #[test]
    fn test_transform_round_trip() {
        let gt = GeoTransform::from([500.0, 10.0, 0.0, 900.0, 0.0, -10.0]);
        let geo = GeoReference::from_transform(&gt).unwrap();
        assert_eq!(geo.to_transform(), gt);
    }
}
