use crate::core::raster::Raster;
use crate::core::window::WindowExtractor;
use crate::types::{BoundingBox, Pixel};
use ndarray::ArrayView2;
use std::collections::BTreeMap;

/// Geometry classes relevant to zonal statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Polygon,
    MultiPolygon,
    Other,
}

/// Geometry summary of one parcel feature: its type and bounding envelope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FootprintGeometry {
    pub kind: GeometryKind,
    pub envelope: BoundingBox,
}

/// One parcel feature as seen by the aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelFootprint {
    /// ParcelID, absent when the feature was never identified
    pub parcel_id: Option<Pixel>,
    pub geometry: Option<FootprintGeometry>,
}

/// Majority class and coverage of one parcel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZonalRecord {
    pub majority_class: Pixel,
    /// Percentage of the parcel's pixels carrying a valid classification (0..=100)
    pub coverage: f64,
}

impl ZonalRecord {
    pub const NO_CROP: Pixel = 0;
    pub const NO_COVERAGE: f64 = 0.0;

    /// Sentinel recorded for parcels without any valid underlying pixel
    pub fn no_coverage() -> Self {
        Self {
            majority_class: Self::NO_CROP,
            coverage: Self::NO_COVERAGE,
        }
    }

    pub fn is_covered(&self) -> bool {
        self.coverage > Self::NO_COVERAGE
    }
}

/// Zonal statistics keyed by ParcelID
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZonalResult {
    pub records: BTreeMap<Pixel, ZonalRecord>,
    /// ParcelIDs seen on more than one feature; the later feature's record wins
    pub duplicate_ids: Vec<Pixel>,
    /// Features skipped for missing geometry, unsupported geometry type or missing ID
    pub skipped_features: usize,
    /// Features examined (bounded by the processing limit)
    pub processed_features: usize,
}

impl ZonalResult {
    pub fn get(&self, parcel_id: Pixel) -> Option<&ZonalRecord> {
        self.records.get(&parcel_id)
    }

    pub fn covered_parcels(&self) -> usize {
        self.records.values().filter(|r| r.is_covered()).count()
    }
}

/// Statistical mode of `values`; ties go to the lowest value
pub fn majority_value<I>(values: I) -> Option<Pixel>
where
    I: IntoIterator<Item = Pixel>,
{
    let mut counts: BTreeMap<Pixel, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    mode_of_counts(&counts)
}

fn mode_of_counts(counts: &BTreeMap<Pixel, usize>) -> Option<Pixel> {
    let mut best: Option<(Pixel, usize)> = None;
    // ascending key order, strict comparison keeps the lowest value on ties
    for (&value, &count) in counts {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((value, count)),
        }
    }
    best.map(|(value, _)| value)
}

/// Per-parcel majority classification and coverage.
///
/// The parcel-identity raster (one value per ParcelID) narrows each parcel's
/// bounding window to its exact footprint; the classification raster is read
/// through its own window for the same envelope. The two rasters may have
/// different geo-references as long as they are spatially consistent.
#[derive(Debug, Clone)]
pub struct ZonalAggregator {
    limit: Option<usize>,
    progress_interval: usize,
    label: String,
}

impl Default for ZonalAggregator {
    fn default() -> Self {
        Self {
            limit: None,
            progress_interval: 1000,
            label: String::new(),
        }
    }
}

impl ZonalAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop after `limit` features (partial or test runs)
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Label used in progress messages, typically the region code
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn aggregate(
        &self,
        footprints: &[ParcelFootprint],
        parcels: &Raster,
        classes: &Raster,
    ) -> ZonalResult {
        log::info!(
            "Computing zonal statistics for {} parcel features {}",
            footprints.len(),
            self.label
        );

        let parcel_extractor = WindowExtractor::for_raster(parcels);
        let class_extractor = WindowExtractor::for_raster(classes);
        let mut result = ZonalResult::default();

        for (index, footprint) in footprints.iter().enumerate() {
            let position = index + 1;
            if self.progress_interval > 0 && position % self.progress_interval == 0 {
                log::info!(
                    "{} -> {:>8} of {:>8}",
                    self.label,
                    position,
                    footprints.len()
                );
            }

            if let Some(limit) = self.limit {
                if position > limit {
                    log::debug!("Feature limit {} reached", limit);
                    break;
                }
            }
            result.processed_features += 1;

            let geometry = match footprint.geometry {
                Some(g) if g.kind != GeometryKind::Other => g,
                _ => {
                    result.skipped_features += 1;
                    continue;
                }
            };

            let parcel_id = match footprint.parcel_id {
                Some(id) if id != 0 => id,
                _ => {
                    log::debug!("Feature {} has no ParcelID, skipping", position);
                    result.skipped_features += 1;
                    continue;
                }
            };

            let parcel_window = parcel_extractor.extract(parcels, &geometry.envelope);
            let class_window = class_extractor.extract(classes, &geometry.envelope);

            let record = match (parcel_window, class_window) {
                (Some(p), Some(c)) => summarize(parcel_id, p, c, classes.no_data),
                _ => ZonalRecord::no_coverage(),
            };

            if result.records.insert(parcel_id, record).is_some() {
                result.duplicate_ids.push(parcel_id);
            }
        }

        if !result.duplicate_ids.is_empty() {
            log::warn!(
                "{} duplicate ParcelIDs {}; later features overwrote earlier results",
                result.duplicate_ids.len(),
                self.label
            );
        }

        log::info!(
            "Zonal statistics done: {} parcels, {} covered, {} features skipped",
            result.records.len(),
            result.covered_parcels(),
            result.skipped_features
        );

        result
    }
}

fn summarize(
    parcel_id: Pixel,
    parcel_window: ArrayView2<Pixel>,
    class_window: ArrayView2<Pixel>,
    no_data: Option<Pixel>,
) -> ZonalRecord {
    let mut parcel_pixels = 0usize;
    let mut valid_pixels = 0usize;
    let mut counts: BTreeMap<Pixel, usize> = BTreeMap::new();

    for ((row, col), &id) in parcel_window.indexed_iter() {
        if id != parcel_id {
            continue;
        }
        parcel_pixels += 1;

        if let Some(&class) = class_window.get((row, col)) {
            if no_data != Some(class) {
                valid_pixels += 1;
                *counts.entry(class).or_insert(0) += 1;
            }
        }
    }

    if parcel_pixels == 0 || valid_pixels == 0 {
        return ZonalRecord::no_coverage();
    }

    match mode_of_counts(&counts) {
        Some(majority_class) => ZonalRecord {
            majority_class,
            coverage: valid_pixels as f64 / parcel_pixels as f64 * 100.0,
        },
        None => ZonalRecord::no_coverage(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo_reference::GeoReference;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn unit_geo() -> GeoReference {
        GeoReference::new(0.0, 1.0, 4.0, -1.0).unwrap()
    }

    fn polygon(south: f64, west: f64, north: f64, east: f64, id: Pixel) -> ParcelFootprint {
        ParcelFootprint {
            parcel_id: Some(id),
            geometry: Some(FootprintGeometry {
                kind: GeometryKind::Polygon,
                envelope: BoundingBox::from_edges(south, west, north, east),
            }),
        }
    }

    #[test]
    fn test_majority_ties_to_lowest() {
        assert_eq!(majority_value(vec![3, 2, 3, 2]), Some(2));
        assert_eq!(majority_value(vec![5, 1, 5]), Some(5));
        assert_eq!(majority_value(Vec::new()), None);
    }

    #[test]
    fn test_triangular_parcel() {
        // three-pixel triangle in the upper-left corner, classes {1, 1, 2}
        let parcels = Raster::new(
            array![[7, 7, 0, 0], [7, 0, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]],
            unit_geo(),
            None,
        );
        let classes = Raster::new(
            array![[1, 2, 3, 3], [1, 3, 3, 3], [3, 3, 3, 3], [3, 3, 3, 3]],
            unit_geo(),
            Some(255),
        );

        let result = ZonalAggregator::new().aggregate(&[polygon(2.0, 0.0, 4.0, 2.0, 7)], &parcels, &classes);

        let record = result.get(7).unwrap();
        assert_eq!(record.majority_class, 1);
        assert_relative_eq!(record.coverage, 100.0);
    }

    #[test]
    fn test_no_data_reduces_coverage() {
        let parcels = Raster::new(Array2::from_elem((4, 4), 3), unit_geo(), None);
        let mut class_data = Array2::from_elem((4, 4), 2);
        class_data[[0, 0]] = 255;
        class_data[[3, 3]] = 255;
        let classes = Raster::new(class_data, unit_geo(), Some(255));

        let result = ZonalAggregator::new().aggregate(&[polygon(0.0, 0.0, 4.0, 4.0, 3)], &parcels, &classes);
        let record = result.get(3).unwrap();
        assert_eq!(record.majority_class, 2);
        assert_relative_eq!(record.coverage, 87.5);
    }

    #[test]
    fn test_zero_coverage_sentinel() {
        let parcels = Raster::new(Array2::zeros((4, 4)), unit_geo(), None);
        let classes = Raster::new(Array2::from_elem((4, 4), 4), unit_geo(), None);

        // envelope inside the raster, but no pixel carries the ID
        let inside = polygon(1.0, 1.0, 3.0, 3.0, 9);
        // envelope far outside both rasters
        let outside = polygon(100.0, 100.0, 101.0, 101.0, 10);

        let result = ZonalAggregator::new().aggregate(&[inside, outside], &parcels, &classes);
        assert_eq!(result.get(9), Some(&ZonalRecord::no_coverage()));
        assert_eq!(result.get(10), Some(&ZonalRecord::no_coverage()));
        assert_eq!(result.covered_parcels(), 0);
    }

    #[test]
    fn test_all_no_data_is_sentinel() {
        let parcels = Raster::new(Array2::from_elem((2, 2), 1), unit_geo(), None);
        let classes = Raster::new(Array2::from_elem((2, 2), 255), unit_geo(), Some(255));

        let result = ZonalAggregator::new().aggregate(&[polygon(2.0, 0.0, 4.0, 2.0, 1)], &parcels, &classes);
        assert_eq!(result.get(1), Some(&ZonalRecord::no_coverage()));
    }

    #[test]
    fn test_independent_geo_references() {
        // the classification raster is shifted one pixel east and one south
        let parcels = Raster::new(
            array![[0, 0, 0, 0], [0, 5, 5, 0], [0, 5, 5, 0], [0, 0, 0, 0]],
            unit_geo(),
            None,
        );
        let shifted = GeoReference::new(1.0, 1.0, 3.0, -1.0).unwrap();
        let classes = Raster::new(array![[4, 4, 6], [4, 6, 6], [6, 6, 6]], shifted, None);

        let result = ZonalAggregator::new().aggregate(&[polygon(1.0, 1.0, 3.0, 3.0, 5)], &parcels, &classes);
        let record = result.get(5).unwrap();
        assert_eq!(record.majority_class, 4);
        assert_relative_eq!(record.coverage, 100.0);
    }

    #[test]
    fn test_skips_and_duplicates() {
        let parcels = Raster::new(Array2::from_elem((4, 4), 1), unit_geo(), None);
        let classes = Raster::new(Array2::from_elem((4, 4), 2), unit_geo(), None);

        let no_geometry = ParcelFootprint { parcel_id: Some(1), geometry: None };
        let line = ParcelFootprint {
            parcel_id: Some(1),
            geometry: Some(FootprintGeometry {
                kind: GeometryKind::Other,
                envelope: BoundingBox::from_edges(0.0, 0.0, 4.0, 4.0),
            }),
        };
        let features = vec![
            no_geometry,
            line,
            polygon(0.0, 0.0, 4.0, 4.0, 1),
            polygon(0.0, 0.0, 1.0, 1.0, 1),
        ];

        let result = ZonalAggregator::new().aggregate(&features, &parcels, &classes);
        assert_eq!(result.skipped_features, 2);
        assert_eq!(result.duplicate_ids, vec![1]);
        assert_eq!(result.records.len(), 1);
    }

    #[test]
    fn test_limit_and_determinism() {
        let parcels = Raster::new(array![[1, 1], [2, 2]], GeoReference::new(0.0, 1.0, 2.0, -1.0).unwrap(), None);
        let classes = Raster::new(array![[8, 9], [3, 3]], parcels.geo, None);
        let features = vec![polygon(1.0, 0.0, 2.0, 2.0, 1), polygon(0.0, 0.0, 1.0, 2.0, 2)];

        let first = ZonalAggregator::new().aggregate(&features, &parcels, &classes);
        let second = ZonalAggregator::new().aggregate(&features, &parcels, &classes);
        assert_eq!(first, second);
        assert_eq!(first.get(1).unwrap().majority_class, 8);

        let limited = ZonalAggregator::new().with_limit(Some(1)).aggregate(&features, &parcels, &classes);
        assert_eq!(limited.processed_features, 1);
        assert!(limited.get(2).is_none());
    }
}
