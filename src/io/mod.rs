//! I/O modules for rasters, parcel vectors, and external geospatial tools

pub mod raster_io;
pub mod vector_io;
pub mod external;

pub use raster_io::RasterStore;
pub use vector_io::{ParcelLayer, ParcelIdentifier, ID_FIELD, MAJORITY_CROP_FIELD, COVERAGE_FIELD};
pub use external::{CommandRunner, SystemCommandRunner, ToolInvocation, Rasterizer, ProductFinalizer, run_checked};
