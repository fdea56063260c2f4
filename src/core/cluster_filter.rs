use crate::core::raster::Raster;
use crate::types::{CleanupResult, Pixel};
use ndarray::Array2;

/// Label reserved for background pixels (zero, and no-data when ignored)
pub const BACKGROUND_LABEL: u32 = 0;

const NEIGHBORS_8: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Which neighbouring pixels may join the same component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// Neighbours must hold the same value
    SameValue,
    /// Any non-background neighbour joins, regardless of value
    Foreground,
}

/// Connected-component labelling of a raster (8-directional adjacency)
#[derive(Debug, Clone)]
pub struct ComponentLabels {
    /// Component ID per pixel, `BACKGROUND_LABEL` for background
    pub labels: Array2<u32>,
    /// Pixel count per component, indexed by component ID (index 0 unused)
    pub sizes: Vec<usize>,
}

impl ComponentLabels {
    pub fn component_count(&self) -> usize {
        self.sizes.len().saturating_sub(1)
    }

    pub fn size_of(&self, label: u32) -> usize {
        self.sizes.get(label as usize).copied().unwrap_or(0)
    }
}

/// Label connected components of `data`; pixels for which `is_background`
/// holds are never labelled
pub fn label_components<F>(data: &Array2<Pixel>, grouping: Grouping, is_background: F) -> ComponentLabels
where
    F: Fn(Pixel) -> bool,
{
    let (height, width) = data.dim();
    let mut labels = Array2::<u32>::zeros((height, width));
    let mut sizes = vec![0usize];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for row in 0..height {
        for col in 0..width {
            let seed = data[[row, col]];
            if labels[[row, col]] != BACKGROUND_LABEL || is_background(seed) {
                continue;
            }

            let label = sizes.len() as u32;
            let mut size = 0usize;
            labels[[row, col]] = label;
            stack.push((row, col));

            while let Some((r, c)) = stack.pop() {
                size += 1;
                for &(dr, dc) in &NEIGHBORS_8 {
                    let nr = r as isize + dr;
                    let nc = c as isize + dc;
                    if nr < 0 || nc < 0 || nr >= height as isize || nc >= width as isize {
                        continue;
                    }
                    let (nr, nc) = (nr as usize, nc as usize);
                    if labels[[nr, nc]] != BACKGROUND_LABEL {
                        continue;
                    }

                    let value = data[[nr, nc]];
                    let joins = match grouping {
                        Grouping::SameValue => value == seed,
                        Grouping::Foreground => !is_background(value),
                    };
                    if joins {
                        labels[[nr, nc]] = label;
                        stack.push((nr, nc));
                    }
                }
            }

            sizes.push(size);
        }
    }

    ComponentLabels { labels, sizes }
}

/// Cluster filter parameters
#[derive(Debug, Clone)]
pub struct ClusterFilterParams {
    /// Smallest component that survives (inclusive)
    pub min_size: usize,
    pub grouping: Grouping,
    /// Treat the raster's no-data value as background instead of a class
    pub ignore_no_data: bool,
}

impl Default for ClusterFilterParams {
    fn default() -> Self {
        Self {
            min_size: 7,
            grouping: Grouping::SameValue,
            ignore_no_data: true,
        }
    }
}

/// Removes classification noise: connected groups of pixels smaller than the
/// minimum size are set to zero
#[derive(Debug, Clone, Default)]
pub struct ClusterFilter {
    params: ClusterFilterParams,
}

impl ClusterFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: ClusterFilterParams) -> Self {
        Self { params }
    }

    pub fn with_min_size(min_size: usize) -> Self {
        Self::with_params(ClusterFilterParams {
            min_size,
            ..ClusterFilterParams::default()
        })
    }

    pub fn params(&self) -> &ClusterFilterParams {
        &self.params
    }

    /// Label the raster's components under this filter's background rules
    pub fn label(&self, raster: &Raster) -> ComponentLabels {
        let no_data = if self.params.ignore_no_data { raster.no_data } else { None };
        label_components(&raster.data, self.params.grouping, |v| {
            v == 0 || Some(v) == no_data
        })
    }

    /// True for pixels that keep their value: background or members of a
    /// component at least `min_size` pixels large
    pub fn keep_mask(&self, raster: &Raster) -> Array2<bool> {
        let components = self.label(raster);
        let survivors: Vec<bool> = components
            .sizes
            .iter()
            .enumerate()
            .map(|(label, &size)| label == BACKGROUND_LABEL as usize || size >= self.params.min_size)
            .collect();

        log::debug!(
            "{} components, {} survive at minimum size {}",
            components.component_count(),
            survivors.iter().skip(1).filter(|&&s| s).count(),
            self.params.min_size
        );

        components.labels.mapv(|label| survivors[label as usize])
    }

    /// Filtered copy of `raster`; the input is left untouched
    pub fn apply(&self, raster: &Raster) -> CleanupResult<Raster> {
        log::info!(
            "Removing pixel clusters smaller than {} ({:?})",
            self.params.min_size,
            self.params.grouping
        );

        let mask = self.keep_mask(raster);
        let mut removed = 0usize;
        let mut data = raster.data.clone();
        ndarray::Zip::from(&mut data).and(&mask).for_each(|value, &keep| {
            if !keep {
                *value = 0;
                removed += 1;
            }
        });

        log::info!(
            "Removed {} pixels ({:.2}%)",
            removed,
            removed as f64 / data.len().max(1) as f64 * 100.0
        );

        raster.with_data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo_reference::GeoReference;
    use ndarray::array;

    fn raster(data: Array2<Pixel>, no_data: Option<Pixel>) -> Raster {
        let geo = GeoReference::new(0.0, 1.0, 0.0, -1.0).unwrap();
        Raster::new(data, geo, no_data)
    }

    fn diagonal_chain() -> Raster {
        raster(
            array![
                [5, 0, 0, 0, 0],
                [0, 5, 0, 0, 0],
                [0, 0, 5, 0, 0],
                [0, 0, 0, 0, 0],
            ],
            None,
        )
    }

    #[test]
    fn test_diagonal_chain_is_one_component() {
        let filter = ClusterFilter::new();
        let components = filter.label(&diagonal_chain());
        assert_eq!(components.component_count(), 1);
        assert_eq!(components.size_of(1), 3);
    }

    #[test]
    fn test_diagonal_chain_removed_at_default_threshold() {
        let filtered = ClusterFilter::with_min_size(7).apply(&diagonal_chain()).unwrap();
        assert!(filtered.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_diagonal_chain_kept_at_threshold_three() {
        let input = diagonal_chain();
        let filtered = ClusterFilter::with_min_size(3).apply(&input).unwrap();
        assert_eq!(filtered.data, input.data);
    }

    #[test]
    fn test_isolated_pixel_in_no_data() {
        let mut data = Array2::from_elem((5, 5), 255);
        data[[2, 2]] = 4;
        let input = raster(data, Some(255));

        let filtered = ClusterFilter::new().apply(&input).unwrap();
        assert_eq!(filtered.data[[2, 2]], 0);
        // no-data stays as declared
        assert_eq!(filtered.data[[0, 0]], 255);
        assert_eq!(filtered.no_data, Some(255));
    }

    #[test]
    fn test_same_value_splits_touching_classes() {
        // two 4-pixel blocks of different classes touching each other
        let input = raster(
            array![[1, 1, 2, 2], [1, 1, 2, 2]],
            None,
        );

        let same_value = ClusterFilter::with_min_size(5).apply(&input).unwrap();
        assert!(same_value.data.iter().all(|&v| v == 0));

        let foreground = ClusterFilter::with_params(ClusterFilterParams {
            min_size: 5,
            grouping: Grouping::Foreground,
            ignore_no_data: true,
        })
        .apply(&input)
        .unwrap();
        assert_eq!(foreground.data, input.data);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut data = Array2::zeros((4, 4));
        for col in 0..4 {
            data[[0, col]] = 3;
            data[[1, col]] = 3;
        }
        data[[3, 3]] = 9;
        let input = raster(data, None);

        let filtered = ClusterFilter::with_min_size(8).apply(&input).unwrap();
        assert_eq!(filtered.data[[0, 0]], 3);
        assert_eq!(filtered.data[[1, 3]], 3);
        assert_eq!(filtered.data[[3, 3]], 0);
    }

    #[test]
    fn test_no_data_as_class_when_not_ignored() {
        let mut data = Array2::from_elem((3, 3), 2);
        data[[1, 1]] = 255;
        let input = raster(data, Some(255));

        let params = ClusterFilterParams {
            min_size: 2,
            grouping: Grouping::SameValue,
            ignore_no_data: false,
        };
        let filtered = ClusterFilter::with_params(params).apply(&input).unwrap();
        assert_eq!(filtered.data[[1, 1]], 0);
        assert_eq!(filtered.data[[0, 0]], 2);
    }
}
