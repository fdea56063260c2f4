//! Core raster cleanup modules

pub mod geo_reference;
pub mod raster;
pub mod window;
pub mod zonal;
pub mod cluster_filter;
pub mod compositor;
pub mod cleanup;
pub mod area;

// Re-export main types
pub use geo_reference::GeoReference;
pub use raster::Raster;
pub use window::{WindowExtractor, PixelWindow};
pub use zonal::{ZonalAggregator, ZonalResult, ZonalRecord, ParcelFootprint, FootprintGeometry, GeometryKind, majority_value};
pub use cluster_filter::{ClusterFilter, ClusterFilterParams, Grouping, ComponentLabels, label_components};
pub use compositor::PriorityCompositor;
pub use cleanup::{FilterStrategy, FilterKind, fill_small_holes, majority_filter};
pub use area::{CropCatalog, class_areas, named_class_areas};
