use crate::core::cluster_filter::{ClusterFilter, ClusterFilterParams, Grouping};
use crate::core::raster::Raster;
use crate::core::zonal::majority_value;
use crate::types::{CleanupError, CleanupResult, Pixel};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// Names of the available cleanup filters, as used in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Multi-class sweep: same-value cluster removal
    Mcq,
    /// Value-agnostic blob removal with optional hole filling
    Denoise,
    /// Square-kernel majority vote
    Majority,
    /// No filtering, copy the input
    None,
}

/// Pixel-noise filters for raw classification rasters
#[derive(Debug, Clone, PartialEq)]
pub enum FilterStrategy {
    /// Remove same-value 8-connected clusters smaller than `min_size`
    Sweep { min_size: usize, ignore_no_data: bool },
    /// Remove foreground blobs smaller than `remove_threshold`, then fill holes
    Denoise { remove_threshold: usize, fill_holes: bool },
    /// Replace every pixel by the mode of its `kernel_size` square neighbourhood
    Majority { kernel_size: usize },
    Passthrough,
}

impl Default for FilterStrategy {
    fn default() -> Self {
        FilterStrategy::Sweep {
            min_size: 7,
            ignore_no_data: true,
        }
    }
}

impl FilterStrategy {
    pub fn kind(&self) -> FilterKind {
        match self {
            FilterStrategy::Sweep { .. } => FilterKind::Mcq,
            FilterStrategy::Denoise { .. } => FilterKind::Denoise,
            FilterStrategy::Majority { .. } => FilterKind::Majority,
            FilterStrategy::Passthrough => FilterKind::None,
        }
    }

    /// Apply the filter, producing a new raster
    pub fn apply(&self, raster: &Raster) -> CleanupResult<Raster> {
        log::info!("Applying {:?} cleanup filter", self);

        match *self {
            FilterStrategy::Sweep { min_size, ignore_no_data } => {
                ClusterFilter::with_params(ClusterFilterParams {
                    min_size,
                    grouping: Grouping::SameValue,
                    ignore_no_data,
                })
                .apply(raster)
            }
            FilterStrategy::Denoise { remove_threshold, fill_holes } => {
                let decluttered = ClusterFilter::with_params(ClusterFilterParams {
                    min_size: remove_threshold,
                    grouping: Grouping::Foreground,
                    ignore_no_data: true,
                })
                .apply(raster)?;

                if fill_holes {
                    fill_small_holes(&decluttered)
                } else {
                    Ok(decluttered)
                }
            }
            FilterStrategy::Majority { kernel_size } => majority_filter(raster, kernel_size),
            FilterStrategy::Passthrough => Ok(raster.clone()),
        }
    }
}

/// Hole filling (closing small no-data gaps inside classified areas).
///
/// No fill algorithm is defined for this product, so invoking it fails
/// instead of returning the input unchanged.
pub fn fill_small_holes(_raster: &Raster) -> CleanupResult<Raster> {
    Err(CleanupError::Unsupported(
        "hole filling is not implemented".to_string(),
    ))
}

/// Majority filter over a square `kernel_size` neighbourhood.
///
/// No-data pixels neither vote nor change; ties go to the lowest class.
pub fn majority_filter(raster: &Raster, kernel_size: usize) -> CleanupResult<Raster> {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(CleanupError::Config(format!(
            "majority kernel size must be odd and positive, got {}",
            kernel_size
        )));
    }

    let (height, width) = raster.dim();
    let half = kernel_size / 2;
    let data = &raster.data;
    let no_data = raster.no_data;

    let vote = |(row, col): (usize, usize), value: &mut Pixel| {
        let center = data[[row, col]];
        if no_data == Some(center) {
            *value = center;
            return;
        }

        let rows = row.saturating_sub(half)..(row + half + 1).min(height);
        let cols = col.saturating_sub(half)..(col + half + 1).min(width);
        let neighbourhood = rows.flat_map(|r| cols.clone().map(move |c| data[[r, c]]));

        *value = majority_value(neighbourhood.filter(|&v| no_data != Some(v))).unwrap_or(center);
    };

    let mut filtered = Array2::<Pixel>::zeros((height, width));

    #[cfg(feature = "parallel")]
    Zip::indexed(&mut filtered).par_for_each(vote);

    #[cfg(not(feature = "parallel"))]
    Zip::indexed(&mut filtered).for_each(vote);

    raster.with_data(filtered)
}
