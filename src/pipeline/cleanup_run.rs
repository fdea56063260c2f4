use crate::config::PipelineConfig;
use crate::core::FilterStrategy;
use crate::io::{CommandRunner, ProductFinalizer, RasterStore};
use crate::pipeline::workspace::ScratchSpace;
use crate::types::CleanupResult;
use std::fs;
use std::path::Path;

/// Pixel-only cleanup of one map: filter, finalize, replace no-data.
///
/// No parcel data is involved; the configured filter strategy alone decides
/// what is removed.
pub struct RegionCleanup<'a> {
    config: &'a PipelineConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> RegionCleanup<'a> {
    pub fn new(config: &'a PipelineConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    pub fn run(&self, input: &Path, cleaned: &Path, product: &Path) -> CleanupResult<()> {
        let strategy = self.config.filter_strategy();
        log::info!("Cleaning up {} with {:?} filter", input.display(), strategy.kind());

        if strategy == FilterStrategy::Passthrough {
            fs::copy(input, cleaned)?;
        } else {
            let raster = RasterStore::read(input)?;
            let filtered = strategy.apply(&raster)?;
            RasterStore::write_like(input, cleaned, &filtered)?;
        }

        let scratch = ScratchSpace::new("cleanup")?;
        let finalizer = ProductFinalizer::new(
            self.config.product_x_resolution,
            self.config.product_y_resolution,
            self.config.product_projection.clone(),
        );
        finalizer.finalize(self.runner, cleaned, &scratch.new_path("product", "tif"), product)?;

        let replaced = RasterStore::undeclare_no_data(product, self.config.no_value_replacement)?;
        log::debug!("{}: {} no-data pixels replaced", product.display(), replaced);
        Ok(())
    }
}
