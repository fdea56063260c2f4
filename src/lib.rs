//! cropsweep: parcel-aware cleanup of crop classification rasters
//!
//! Converts noisy per-pixel crop classification maps into spatially consistent
//! products. Parcel (CLU) boundaries are used to compute per-parcel majority
//! classes, small pixel clusters are swept away, and the vector-derived and
//! pixel-derived layers are composited before reprojection to the final grid.

pub mod types;
pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;

// Re-export main types for easier access
pub use types::{BoundingBox, CleanupError, CleanupResult, GeoTransform, Pixel};
pub use config::PipelineConfig;

pub use core::{
    ClusterFilter, CropCatalog, FilterKind, FilterStrategy, GeoReference, PriorityCompositor, Raster,
    WindowExtractor, ZonalAggregator, ZonalResult,
};
pub use io::{CommandRunner, ParcelIdentifier, ParcelLayer, RasterStore, SystemCommandRunner};
pub use pipeline::{CancelToken, RegionCleanup, RegionDriver, RegionPipeline, RegionState};
