use crate::config::PipelineConfig;
use crate::core::CropCatalog;
use crate::io::{CommandRunner, SystemCommandRunner};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::region::{RegionInputs, RegionOutcome, RegionPipeline};
use crate::pipeline::workspace::{PRODUCT_STAGE, RAW_STAGE};
use crate::types::{CleanupError, CleanupResult};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of one region's run
#[derive(Debug)]
pub struct RegionReport {
    pub region: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub result: CleanupResult<RegionOutcome>,
}

impl RegionReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn elapsed_secs(&self) -> f64 {
        (self.finished - self.started).num_milliseconds() as f64 / 1000.0
    }
}

/// Per-region reports of a multi-region run, in region order
#[derive(Debug, Default)]
pub struct DriverReport {
    pub regions: Vec<RegionReport>,
}

impl DriverReport {
    pub fn succeeded(&self) -> Vec<&str> {
        self.regions
            .iter()
            .filter(|r| r.succeeded())
            .map(|r| r.region.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<(&str, &CleanupError)> {
        self.regions
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (r.region.as_str(), e)))
            .collect()
    }

    pub fn get(&self, region: &str) -> Option<&RegionReport> {
        self.regions.iter().find(|r| r.region.eq_ignore_ascii_case(region))
    }

    /// Log the end-of-run summary, naming classes through `catalog`
    pub fn log_summary(&self, catalog: &CropCatalog) {
        log::info!(
            "Processed {} regions: {} succeeded, {} failed",
            self.regions.len(),
            self.succeeded().len(),
            self.failed().len()
        );
        for report in &self.regions {
            match &report.result {
                Ok(outcome) => {
                    let acres: f64 = outcome.product_areas().values().sum();
                    log::info!("  {} ok in {:.1}s, {:.0} acres classified", report.region, report.elapsed_secs(), acres);
                    for (class, shift) in outcome.area_shift(RAW_STAGE, PRODUCT_STAGE) {
                        log::info!("    {:<10} {:>+14.1} acres", catalog.name(class), shift);
                    }
                }
                Err(e) => log::error!("  {} FAILED after {:.1}s: {}", report.region, report.elapsed_secs(), e),
            }
        }
    }
}

/// Runs the region pipeline over many regions.
///
/// Each region gets its own workspace `<work_root>/<REGION>`, so regions can
/// run concurrently. A failed region is logged and recorded; the remaining
/// regions still run.
pub struct RegionDriver {
    config: PipelineConfig,
    runner: Arc<dyn CommandRunner>,
    map_dir: PathBuf,
    parcel_dir: PathBuf,
    work_root: PathBuf,
    skip: BTreeSet<String>,
    catalog: CropCatalog,
}

impl RegionDriver {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
        config: PipelineConfig,
        runner: Arc<dyn CommandRunner>,
        map_dir: P,
        parcel_dir: Q,
        work_root: R,
    ) -> Self {
        Self {
            config,
            runner,
            map_dir: map_dir.as_ref().to_path_buf(),
            parcel_dir: parcel_dir.as_ref().to_path_buf(),
            work_root: work_root.as_ref().to_path_buf(),
            skip: BTreeSet::new(),
            catalog: CropCatalog::default(),
        }
    }

    /// Driver running the GDAL tools as child processes, with the
    /// configured retry count and backoff
    pub fn from_config<P: AsRef<Path>, Q: AsRef<Path>, R: AsRef<Path>>(
        config: PipelineConfig,
        map_dir: P,
        parcel_dir: Q,
        work_root: R,
    ) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::from_config(&config));
        Self::new(config, runner, map_dir, parcel_dir, work_root)
    }

    /// Crop names used in the end-of-run summary
    pub fn with_catalog(mut self, catalog: CropCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Regions never processed, case-insensitive
    pub fn with_skip<I, S>(mut self, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.skip = regions.into_iter().map(|r| r.as_ref().to_uppercase()).collect();
        self
    }

    pub fn workspace_root(&self, region: &str) -> PathBuf {
        self.work_root.join(region.to_uppercase())
    }

    /// Region codes whose raw map is present in the map directory, sorted
    pub fn discover_regions(&self) -> CleanupResult<Vec<String>> {
        let pattern = map_name_pattern(&self.config.map_format)?;
        let mut regions = BTreeSet::new();

        for entry in fs::read_dir(&self.map_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(captures) = pattern.captures(&name) {
                regions.insert(captures[1].to_uppercase());
            }
        }

        log::info!("Discovered {} regions in {}", regions.len(), self.map_dir.display());
        Ok(regions.into_iter().collect())
    }

    /// Discover and process every region
    pub fn run_all(&self) -> CleanupResult<DriverReport> {
        let regions = self.discover_regions()?;
        Ok(self.run(&regions))
    }

    /// Process `regions` once each, skipping those on the skip list.
    ///
    /// Codes are compared case-insensitively; repeats are dropped so no two
    /// pipelines share a workspace.
    pub fn run<S: AsRef<str> + Sync>(&self, regions: &[S]) -> DriverReport {
        let mut seen = BTreeSet::new();
        let selected: Vec<String> = regions
            .iter()
            .map(|r| r.as_ref().to_uppercase())
            .filter(|r| {
                if !seen.insert(r.clone()) {
                    log::warn!("Region {} listed more than once, running it once", r);
                    return false;
                }
                let skipped = self.skip.contains(r);
                if skipped {
                    log::info!("Skipping {}", r);
                }
                !skipped
            })
            .collect();

        #[cfg(feature = "parallel")]
        let reports: Vec<RegionReport> = {
            use rayon::prelude::*;
            selected.par_iter().map(|region| self.run_region(region)).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let reports: Vec<RegionReport> = selected.iter().map(|region| self.run_region(region)).collect();

        let report = DriverReport { regions: reports };
        report.log_summary(&self.catalog);
        report
    }

    /// Process one region, capturing any failure in the report
    pub fn run_region(&self, region: &str) -> RegionReport {
        let started = Utc::now();
        let cancel = CancelToken::with_timeout(self.config.region_timeout());
        let inputs = RegionInputs::locate(region, &self.map_dir, &self.parcel_dir, &self.config);

        let result = RegionPipeline::new(
            region,
            inputs,
            self.workspace_root(region),
            &self.config,
            &*self.runner,
            cancel,
        )
        .and_then(|pipeline| pipeline.run());

        if let Err(e) = &result {
            log::error!("Region {} failed: {}", region, e);
        }

        RegionReport {
            region: region.to_uppercase(),
            started,
            finished: Utc::now(),
            result,
        }
    }
}

/// Regex matching raw-map file names, capturing the two-letter region code
fn map_name_pattern(map_format: &str) -> CleanupResult<Regex> {
    let placeholder = regex::escape("{region}");
    let escaped = regex::escape(map_format);
    if !escaped.contains(&placeholder) {
        return Err(CleanupError::Config(format!("map_format has no region placeholder: {:?}", map_format)));
    }

    let pattern = format!("^{}$", escaped.replacen(&placeholder, "([A-Za-z]{2})", 1));
    Regex::new(&pattern).map_err(|e| CleanupError::Config(format!("Invalid map_format {:?}: {}", map_format, e)))
}
