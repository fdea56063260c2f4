use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Pixel value type shared by classification and parcel-identity rasters.
///
/// Crop codes are small non-negative integers and ParcelIDs are positive
/// integers, so a single unsigned cell type covers both.
pub type Pixel = u32;

/// Geospatial bounding box (south = `min_lat`, north = `max_lat`,
/// west = `min_lon`, east = `max_lon`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Build a box from its four edges, in the south/west/north/east order
    pub fn from_edges(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            min_lon: west,
            max_lon: east,
            min_lat: south,
            max_lat: north,
        }
    }
}

/// Raw six-coefficient affine transform, as stored by GDAL
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl From<[f64; 6]> for GeoTransform {
    fn from(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }
}

impl From<GeoTransform> for [f64; 6] {
    fn from(gt: GeoTransform) -> Self {
        [
            gt.top_left_x,
            gt.pixel_width,
            gt.rotation_x,
            gt.top_left_y,
            gt.rotation_y,
            gt.pixel_height,
        ]
    }
}

/// Error types for map cleanup
#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Required input does not exist: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Invalid geo-reference: {0}")]
    InvalidGeoReference(String),

    #[error("Raster shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("External tool `{tool}` failed with exit status {status}")]
    ExternalTool { tool: String, status: i32 },

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Region {region} cancelled before entering {state}")]
    Cancelled { region: String, state: String },

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for cleanup operations
pub type CleanupResult<T> = Result<T, CleanupError>;
