use crate::core::{FilterKind, FilterStrategy};
use crate::types::{CleanupError, CleanupResult, Pixel};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// CONUS Albers equal-area projection used for final products
pub const PRODUCT_PROJ4: &str = "+proj=aea +lat_1=29.5 +lat_2=45.5 +lat_0=23 +lon_0=-96 +x_0=0 +y_0=0 +ellps=GRS80 +datum=NAD83 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs";

const REGION_PLACEHOLDER: &str = "{region}";

/// Region pipeline parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cleanup filter for the raw map
    pub filter: FilterKind,
    /// Smallest pixel cluster that survives decluttering
    pub min_cluster_size: usize,
    pub majority_kernel_size: usize,
    pub fill_holes: bool,
    pub product_x_resolution: f64,
    pub product_y_resolution: f64,
    pub product_projection: String,
    /// Value written over no-data pixels of the final product
    pub no_value_replacement: Option<f64>,
    /// Class forced wherever the raw map has it (uncultivated)
    pub priority_value: Pixel,
    /// Raw map file name, region upper-case
    pub map_format: String,
    /// Parcel shapefile name, region lower-case
    pub parcel_format: String,
    /// Stage artifact name, region lower-case
    pub region_format: String,
    pub zonal_limit: Option<usize>,
    pub tool_retries: u32,
    pub tool_backoff_ms: u64,
    pub region_timeout_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filter: FilterKind::Mcq,
            min_cluster_size: 7,
            majority_kernel_size: 5,
            fill_holes: false,
            product_x_resolution: 30.0,
            product_y_resolution: 30.0,
            product_projection: PRODUCT_PROJ4.to_string(),
            no_value_replacement: Some(0.0),
            priority_value: 0,
            map_format: "{region}2021.tif".to_string(),
            parcel_format: "{region}.shp".to_string(),
            region_format: "{region}.tif".to_string(),
            zonal_limit: None,
            tool_retries: 0,
            tool_backoff_ms: 500,
            region_timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Parse an XML configuration document; absent fields keep their defaults
    pub fn from_xml_str(xml: &str) -> CleanupResult<Self> {
        let config: Self = quick_xml::de::from_str(xml)
            .map_err(|e| CleanupError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_xml_file<P: AsRef<Path>>(path: P) -> CleanupResult<Self> {
        let path = path.as_ref();
        log::info!("Loading configuration from {}", path.display());
        let xml = std::fs::read_to_string(path)?;
        Self::from_xml_str(&xml)
    }

    pub fn validate(&self) -> CleanupResult<()> {
        if self.min_cluster_size == 0 {
            return Err(CleanupError::Config("min_cluster_size must be positive".to_string()));
        }

        if self.product_x_resolution <= 0.0 || self.product_y_resolution <= 0.0 {
            return Err(CleanupError::Config(format!(
                "product resolution must be positive, got {} x {}",
                self.product_x_resolution, self.product_y_resolution
            )));
        }

        let projection = self.product_projection.trim();
        if !projection.starts_with('+') && !projection.contains(':') {
            return Err(CleanupError::Config(format!(
                "product projection is not a PROJ or authority string: {:?}",
                self.product_projection
            )));
        }

        for (name, format) in [
            ("map_format", &self.map_format),
            ("parcel_format", &self.parcel_format),
            ("region_format", &self.region_format),
        ] {
            if !format.contains(REGION_PLACEHOLDER) {
                return Err(CleanupError::Config(format!(
                    "{} must contain {}: {:?}",
                    name, REGION_PLACEHOLDER, format
                )));
            }
        }

        Ok(())
    }

    /// Filter strategy selected by `filter` and its parameters
    pub fn filter_strategy(&self) -> FilterStrategy {
        match self.filter {
            FilterKind::Mcq => FilterStrategy::Sweep {
                min_size: self.min_cluster_size,
                ignore_no_data: true,
            },
            FilterKind::Denoise => FilterStrategy::Denoise {
                remove_threshold: self.min_cluster_size,
                fill_holes: self.fill_holes,
            },
            FilterKind::Majority => FilterStrategy::Majority {
                kernel_size: self.majority_kernel_size,
            },
            FilterKind::None => FilterStrategy::Passthrough,
        }
    }

    pub fn map_file_name(&self, region: &str) -> String {
        self.map_format.replace(REGION_PLACEHOLDER, &region.to_uppercase())
    }

    pub fn parcel_file_name(&self, region: &str) -> String {
        self.parcel_format.replace(REGION_PLACEHOLDER, &region.to_lowercase())
    }

    pub fn artifact_name(&self, region: &str) -> String {
        self.region_format.replace(REGION_PLACEHOLDER, &region.to_lowercase())
    }

    pub fn region_timeout(&self) -> Option<Duration> {
        self.region_timeout_secs.map(Duration::from_secs)
    }

    pub fn tool_backoff(&self) -> Duration {
        Duration::from_millis(self.tool_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.filter_strategy(),
            FilterStrategy::Sweep { min_size: 7, ignore_no_data: true }
        );
        assert_eq!(config.map_file_name("oh"), "OH2021.tif");
        assert_eq!(config.parcel_file_name("OH"), "oh.shp");
        assert_eq!(config.artifact_name("OH"), "oh.tif");
    }

    #[test]
    fn test_xml_overrides() {
        let xml = r#"<config>
            <min_cluster_size>9</min_cluster_size>
            <product_x_resolution>10</product_x_resolution>
            <product_y_resolution>10</product_y_resolution>
            <map_format>{region}_crops.tif</map_format>
            <tool_retries>2</tool_retries>
        </config>"#;

        let config = PipelineConfig::from_xml_str(xml).unwrap();
        assert_eq!(config.min_cluster_size, 9);
        assert_eq!(config.product_x_resolution, 10.0);
        assert_eq!(config.tool_retries, 2);
        assert_eq!(config.map_file_name("ks"), "KS_crops.tif");
        assert_eq!(config.parcel_format, "{region}.shp");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = PipelineConfig::default();
        config.min_cluster_size = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.region_format = "fixed.tif".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.product_projection = "albers".to_string();
        assert!(config.validate().is_err());
        config.product_projection = "EPSG:5070".to_string();
        assert!(config.validate().is_ok());

        assert!(PipelineConfig::from_xml_str("<config><min_cluster_size>x</min_cluster_size></config>").is_err());
    }
}
