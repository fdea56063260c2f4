use crate::config::PipelineConfig;
use crate::core::{class_areas, PriorityCompositor, ZonalAggregator};
use crate::core::FilterStrategy;
use crate::io::{CommandRunner, ParcelIdentifier, ParcelLayer, ProductFinalizer, RasterStore, Rasterizer, ID_FIELD, MAJORITY_CROP_FIELD};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::workspace::{RegionWorkspace, ScratchSpace, MAP_STAGES, PRODUCT_STAGE};
use crate::types::{CleanupError, CleanupResult, Pixel};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Region pipeline states, in processing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegionState {
    Init,
    ParcelsIdentified,
    ParcelsRasterized,
    ZonalComputed,
    ZonalRasterized,
    Decluttered,
    Merged,
    Adjusted,
    Finalized,
    NoDataReplaced,
}

impl RegionState {
    /// Whether `next` may directly follow `self`
    pub fn can_advance_to(self, next: RegionState) -> bool {
        use RegionState::*;
        matches!(
            (self, next),
            (Init, ParcelsIdentified)
                | (Init, Decluttered)
                | (ParcelsIdentified, ParcelsRasterized)
                | (ParcelsRasterized, ZonalComputed)
                | (ZonalComputed, ZonalRasterized)
                | (ZonalRasterized, Decluttered)
                | (Decluttered, Merged)
                | (Merged, Adjusted)
                | (Adjusted, Finalized)
                | (Finalized, NoDataReplaced)
        )
    }
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegionState::Init => "INIT",
            RegionState::ParcelsIdentified => "PARCELS_IDENTIFIED",
            RegionState::ParcelsRasterized => "PARCELS_RASTERIZED",
            RegionState::ZonalComputed => "ZONAL_COMPUTED",
            RegionState::ZonalRasterized => "ZONAL_RASTERIZED",
            RegionState::Decluttered => "DECLUTTERED",
            RegionState::Merged => "MERGED",
            RegionState::Adjusted => "ADJUSTED",
            RegionState::Finalized => "FINALIZED",
            RegionState::NoDataReplaced => "NO_DATA_REPLACED",
        };
        write!(f, "{}", name)
    }
}

/// Parcel statistics from the zonal stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZonalSummary {
    pub parcels: usize,
    pub covered: usize,
    pub duplicate_ids: usize,
    pub skipped_features: usize,
    pub features_written: usize,
}

/// What a completed region run produced
#[derive(Debug, Clone)]
pub struct RegionOutcome {
    pub region: String,
    pub product: PathBuf,
    pub states: Vec<RegionState>,
    pub zonal: Option<ZonalSummary>,
    /// Area per class in acres, for every map stage the run materialized
    pub stage_areas: BTreeMap<&'static str, BTreeMap<Pixel, f64>>,
}

impl RegionOutcome {
    /// Area per class of the final product, in acres
    pub fn product_areas(&self) -> BTreeMap<Pixel, f64> {
        self.stage_areas.get(PRODUCT_STAGE).cloned().unwrap_or_default()
    }

    /// Per-class area change from stage `from` to stage `to`, in acres.
    /// Classes present in only one of the stages count as zero in the other.
    pub fn area_shift(&self, from: &str, to: &str) -> BTreeMap<Pixel, f64> {
        let empty = BTreeMap::new();
        let before = self.stage_areas.get(from).unwrap_or(&empty);
        let after = self.stage_areas.get(to).unwrap_or(&empty);

        before
            .keys()
            .chain(after.keys())
            .map(|&class| {
                let shift = after.get(&class).copied().unwrap_or(0.0) - before.get(&class).copied().unwrap_or(0.0);
                (class, shift)
            })
            .collect()
    }
}

/// Input locations for one region
#[derive(Debug, Clone)]
pub struct RegionInputs {
    pub map_file: PathBuf,
    pub parcel_file: PathBuf,
}

impl RegionInputs {
    /// Inputs named by the configured file formats
    pub fn locate<P: AsRef<Path>, Q: AsRef<Path>>(region: &str, map_dir: P, parcel_dir: Q, config: &PipelineConfig) -> Self {
        Self {
            map_file: map_dir.as_ref().join(config.map_file_name(region)),
            parcel_file: parcel_dir.as_ref().join(config.parcel_file_name(region)),
        }
    }
}

/// Processes one region: parcel identification, zonal statistics, cleanup,
/// compositing and product finalization.
///
/// Each state fully materializes its artifact in the workspace before the
/// next one starts. Any failure aborts the region.
pub struct RegionPipeline<'a> {
    region: String,
    inputs: RegionInputs,
    config: &'a PipelineConfig,
    runner: &'a dyn CommandRunner,
    cancel: CancelToken,
    workspace: RegionWorkspace,
    scratch: ScratchSpace,
    states: Vec<RegionState>,
    no_data: Option<f64>,
}

impl<'a> RegionPipeline<'a> {
    /// Set up the pipeline; resets the workspace under `work_root`
    pub fn new<P: AsRef<Path>>(
        region: &str,
        inputs: RegionInputs,
        work_root: P,
        config: &'a PipelineConfig,
        runner: &'a dyn CommandRunner,
        cancel: CancelToken,
    ) -> CleanupResult<Self> {
        config.validate()?;
        if !inputs.map_file.exists() {
            return Err(CleanupError::MissingInput(inputs.map_file.clone()));
        }

        let workspace = RegionWorkspace::create(work_root, region, config)?;
        let scratch = ScratchSpace::new(region)?;

        Ok(Self {
            region: region.to_uppercase(),
            inputs,
            config,
            runner,
            cancel,
            workspace,
            scratch,
            states: vec![RegionState::Init],
            no_data: None,
        })
    }

    pub fn workspace(&self) -> &RegionWorkspace {
        &self.workspace
    }

    pub fn state(&self) -> RegionState {
        self.states.last().copied().unwrap_or(RegionState::Init)
    }

    pub fn has_parcels(&self) -> bool {
        self.inputs.parcel_file.exists()
    }

    /// Run every state through to the final product
    pub fn run(mut self) -> CleanupResult<RegionOutcome> {
        log::info!(" -> Processing {} ...", self.region);
        self.initialize()?;

        let mut zonal = None;
        let has_parcels = self.has_parcels();

        if has_parcels {
            self.enter(RegionState::ParcelsIdentified)?;
            self.identify_parcels()?;

            self.enter(RegionState::ParcelsRasterized)?;
            self.rasterize_parcels()?;

            self.enter(RegionState::ZonalComputed)?;
            zonal = Some(self.compute_zonal()?);

            self.enter(RegionState::ZonalRasterized)?;
            self.rasterize_zonal()?;
        } else {
            log::info!("No parcel file for {}, running pixel-only cleanup", self.region);
        }

        self.enter(RegionState::Decluttered)?;
        self.declutter()?;

        self.enter(RegionState::Merged)?;
        if has_parcels {
            self.merge()?;
        } else {
            fs::copy(self.workspace.swept_map(), self.workspace.merged_map())?;
        }

        self.enter(RegionState::Adjusted)?;
        self.adjust()?;

        self.enter(RegionState::Finalized)?;
        self.finalize()?;

        self.enter(RegionState::NoDataReplaced)?;
        RasterStore::undeclare_no_data(self.workspace.product_map(), self.config.no_value_replacement)?;

        let stage_areas = self.tally_stage_areas()?;
        log::info!("{} completed through {}", self.region, self.state());

        Ok(RegionOutcome {
            region: self.region.clone(),
            product: self.workspace.product_map(),
            states: self.states.clone(),
            zonal,
            stage_areas,
        })
    }

    /// Class areas of every map stage artifact, to show how far each
    /// cleanup step moved the class totals
    fn tally_stage_areas(&self) -> CleanupResult<BTreeMap<&'static str, BTreeMap<Pixel, f64>>> {
        let mut areas = BTreeMap::new();
        for stage in MAP_STAGES {
            let path = self.workspace.artifact_in(stage);
            if path.exists() {
                areas.insert(stage, class_areas(&RasterStore::read(&path)?));
            }
        }
        log::debug!("{}: tallied class areas for {} stages", self.region, areas.len());
        Ok(areas)
    }

    fn enter(&mut self, next: RegionState) -> CleanupResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CleanupError::Cancelled {
                region: self.region.clone(),
                state: next.to_string(),
            });
        }

        let current = self.state();
        if !current.can_advance_to(next) {
            return Err(CleanupError::Processing(format!(
                "invalid state transition {} -> {}",
                current, next
            )));
        }

        log::info!("{}: {} -> {}", self.region, current, next);
        self.states.push(next);
        Ok(())
    }

    fn initialize(&mut self) -> CleanupResult<()> {
        fs::copy(&self.inputs.map_file, self.workspace.raw_map())?;
        self.no_data = RasterStore::no_data_value(self.workspace.raw_map())?;
        log::debug!("{} raw map no-data value: {:?}", self.region, self.no_data);
        Ok(())
    }

    fn identify_parcels(&mut self) -> CleanupResult<()> {
        let parcels = ParcelLayer::duplicate(&self.inputs.parcel_file, self.workspace.parcels())?;
        let identified = ParcelIdentifier::new().with_overwrite(true).run(&[parcels])?;
        log::info!("{}: identified {} parcels", self.region, identified);
        Ok(())
    }

    fn rasterize_parcels(&mut self) -> CleanupResult<()> {
        self.rasterize_onto_raw_grid(&self.workspace.parcels(), ID_FIELD, &self.workspace.parcel_raster())
    }

    fn compute_zonal(&mut self) -> CleanupResult<ZonalSummary> {
        let footprints = ParcelLayer::read_footprints(self.workspace.parcels())?;
        let parcels = RasterStore::read(self.workspace.parcel_raster())?;
        let classes = RasterStore::read(self.workspace.raw_map())?;

        let result = ZonalAggregator::new()
            .with_limit(self.config.zonal_limit)
            .with_label(self.region.clone())
            .aggregate(&footprints, &parcels, &classes);

        let vector = ParcelLayer::duplicate(self.workspace.parcels(), self.workspace.zonal_vector())?;
        let written = ParcelLayer::write_zonal_results(&vector, &result)?;

        Ok(ZonalSummary {
            parcels: result.records.len(),
            covered: result.covered_parcels(),
            duplicate_ids: result.duplicate_ids.len(),
            skipped_features: result.skipped_features,
            features_written: written,
        })
    }

    fn rasterize_zonal(&mut self) -> CleanupResult<()> {
        let clean = self.workspace.clean_map();
        self.rasterize_onto_raw_grid(&self.workspace.zonal_vector(), MAJORITY_CROP_FIELD, &clean)?;

        if let Some(no_data) = self.no_data {
            RasterStore::declare_no_data(&clean, Some(no_data))?;
        }
        Ok(())
    }

    fn rasterize_onto_raw_grid(&self, vector: &Path, attribute: &str, output: &Path) -> CleanupResult<()> {
        let (geo, size) = RasterStore::grid(self.workspace.raw_map())?;
        let layer = ParcelLayer::layer_name(vector)?;
        Rasterizer::default().rasterize(self.runner, vector, &layer, attribute, &geo, size, output)
    }

    fn declutter(&mut self) -> CleanupResult<()> {
        let strategy = self.config.filter_strategy();
        let (raw, swept) = (self.workspace.raw_map(), self.workspace.swept_map());

        if strategy == FilterStrategy::Passthrough {
            fs::copy(&raw, &swept)?;
            return Ok(());
        }

        let input = RasterStore::read(&raw)?;
        let output = strategy.apply(&input)?;
        RasterStore::write_like(&raw, &swept, &output)
    }

    fn merge(&mut self) -> CleanupResult<()> {
        let clean = RasterStore::read(self.workspace.clean_map())?;
        let base = RasterStore::read(self.workspace.swept_map())?;

        let parcel_raster = self.workspace.parcel_raster();
        let mask = if parcel_raster.exists() {
            PriorityCompositor::mask_from(&RasterStore::read(&parcel_raster)?)
        } else {
            PriorityCompositor::empty_mask(base.dim())
        };

        let merged = PriorityCompositor::mask_merge(&clean, &base, &mask)?;
        RasterStore::write_like(self.workspace.swept_map(), self.workspace.merged_map(), &merged)
    }

    fn adjust(&mut self) -> CleanupResult<()> {
        let merged = RasterStore::read(self.workspace.merged_map())?;
        let raw = RasterStore::read(self.workspace.raw_map())?;

        let adjusted = PriorityCompositor::value_merge(&merged, &raw, self.config.priority_value)?;
        RasterStore::write_like(self.workspace.merged_map(), self.workspace.adjusted_map(), &adjusted)
    }

    fn finalize(&mut self) -> CleanupResult<()> {
        let finalizer = ProductFinalizer::new(
            self.config.product_x_resolution,
            self.config.product_y_resolution,
            self.config.product_projection.clone(),
        );
        let scratch = self.scratch.new_path("product", "tif");
        finalizer.finalize(self.runner, &self.workspace.adjusted_map(), &scratch, &self.workspace.product_map())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use RegionState::*;
        assert!(Init.can_advance_to(ParcelsIdentified));
        assert!(Init.can_advance_to(Decluttered));
        assert!(ZonalRasterized.can_advance_to(Decluttered));
        assert!(!Init.can_advance_to(Merged));
        assert!(!Merged.can_advance_to(Decluttered));
        assert!(!NoDataReplaced.can_advance_to(Init));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RegionState::NoDataReplaced.to_string(), "NO_DATA_REPLACED");
        assert_eq!(RegionState::ZonalComputed.to_string(), "ZONAL_COMPUTED");
    }
}
