use crate::config::PipelineConfig;
use crate::types::{CleanupError, CleanupResult};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Stage directories created under every region root
pub const STAGE_DIRS: [&str; 8] = [
    "raw", "workdir", "results", "clean", "swept", "merged", "adjusted", "product",
];

pub const RAW_STAGE: &str = "raw";
pub const SWEPT_STAGE: &str = "swept";
pub const MERGED_STAGE: &str = "merged";
pub const ADJUSTED_STAGE: &str = "adjusted";
pub const PRODUCT_STAGE: &str = "product";

/// Stages holding a full classification map, in processing order
pub const MAP_STAGES: [&str; 5] = [RAW_STAGE, SWEPT_STAGE, MERGED_STAGE, ADJUSTED_STAGE, PRODUCT_STAGE];

/// Directory tree owned by one region's pipeline.
///
/// Creating a workspace wipes and recreates the tree, so two pipelines must
/// never share a root. Every stage writes `<root>/<stage>/<artifact>`, and a
/// stage's declared output path is the next stage's declared input path.
#[derive(Debug, Clone)]
pub struct RegionWorkspace {
    root: PathBuf,
    artifact: String,
    parcel_name: String,
}

impl RegionWorkspace {
    pub fn create<P: AsRef<Path>>(root: P, region: &str, config: &PipelineConfig) -> CleanupResult<Self> {
        let root = root.as_ref().to_path_buf();
        if region.trim().is_empty() {
            return Err(CleanupError::Config("region code is empty".to_string()));
        }

        log::debug!("Resetting workspace {}", root.display());
        for dir in STAGE_DIRS.iter() {
            let path = root.join(dir);
            if path.exists() {
                fs::remove_dir_all(&path)?;
            }
            fs::create_dir_all(&path)?;
        }

        Ok(Self {
            root,
            artifact: config.artifact_name(region),
            parcel_name: config.parcel_file_name(region),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, stage: &str) -> PathBuf {
        self.root.join(stage)
    }

    /// Map artifact of `stage` (one of `MAP_STAGES`, or `clean`)
    pub fn artifact_in(&self, stage: &str) -> PathBuf {
        self.stage_dir(stage).join(&self.artifact)
    }

    /// Working copy of the raw classification map
    pub fn raw_map(&self) -> PathBuf {
        self.artifact_in(RAW_STAGE)
    }

    /// Identified working copy of the parcel shapefile
    pub fn parcels(&self) -> PathBuf {
        self.stage_dir("workdir").join(&self.parcel_name)
    }

    /// Parcel-identity raster (ParcelID burned per pixel)
    pub fn parcel_raster(&self) -> PathBuf {
        let stem = Path::new(&self.artifact)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.stage_dir("workdir").join(format!("{}-clu.tif", stem))
    }

    /// Parcel shapefile enriched with zonal results
    pub fn zonal_vector(&self) -> PathBuf {
        self.stage_dir("results").join(&self.parcel_name)
    }

    /// Rasterized majority classes (vector-derived clean map)
    pub fn clean_map(&self) -> PathBuf {
        self.artifact_in("clean")
    }

    pub fn swept_map(&self) -> PathBuf {
        self.artifact_in(SWEPT_STAGE)
    }

    pub fn merged_map(&self) -> PathBuf {
        self.artifact_in(MERGED_STAGE)
    }

    pub fn adjusted_map(&self) -> PathBuf {
        self.artifact_in(ADJUSTED_STAGE)
    }

    pub fn product_map(&self) -> PathBuf {
        self.artifact_in(PRODUCT_STAGE)
    }
}

/// Scratch directory for one pipeline run, removed when dropped
#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
    counter: Cell<usize>,
}

impl ScratchSpace {
    pub fn new(label: &str) -> CleanupResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("cropsweep-{}-", label.to_lowercase()))
            .tempdir()?;
        Ok(Self {
            dir,
            counter: Cell::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Fresh, not yet existing path inside the scratch directory
    pub fn new_path(&self, stem: &str, extension: &str) -> PathBuf {
        let n = self.counter.get();
        self.counter.set(n + 1);
        self.dir.path().join(format!("{}-{:04}.{}", stem, n, extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_and_reset() {
        let root = TempDir::new().unwrap();
        let config = PipelineConfig::default();

        let workspace = RegionWorkspace::create(root.path(), "OH", &config).unwrap();
        for dir in STAGE_DIRS.iter() {
            assert!(root.path().join(dir).is_dir());
        }
        assert_eq!(workspace.swept_map(), root.path().join("swept").join("oh.tif"));
        assert_eq!(workspace.parcel_raster(), root.path().join("workdir").join("oh-clu.tif"));
        assert_eq!(workspace.zonal_vector(), root.path().join("results").join("oh.shp"));

        fs::write(workspace.merged_map(), b"stale").unwrap();
        let again = RegionWorkspace::create(root.path(), "OH", &config).unwrap();
        assert!(!again.merged_map().exists());
    }

    #[test]
    fn test_scratch_removed_on_drop() {
        let scratch = ScratchSpace::new("OH").unwrap();
        let first = scratch.new_path("product", "tif");
        let second = scratch.new_path("product", "tif");
        assert_ne!(first, second);

        fs::write(&first, b"x").unwrap();
        let dir = scratch.path().to_path_buf();
        drop(scratch);
        assert!(!dir.exists());
    }
}
