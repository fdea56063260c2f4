use crate::core::raster::Raster;
use crate::types::Pixel;
use std::collections::BTreeMap;

/// Square metres per acre
pub const SQUARE_METRES_PER_ACRE: f64 = 4046.856_422_4;

/// Crop code to crop name table
#[derive(Debug, Clone, PartialEq)]
pub struct CropCatalog {
    names: BTreeMap<Pixel, String>,
}

impl Default for CropCatalog {
    fn default() -> Self {
        let names = [
            (0, "UCULTIV"),
            (1, "WHEAT"),
            (2, "CORN"),
            (3, "SOYBEAN"),
            (4, "UCOTTON"),
            (5, "OTHER"),
            (6, "PREVENT"),
            (7, "SORGHUM"),
            (8, "RICE"),
        ];
        Self::new(names.iter().map(|&(code, name)| (code, name.to_string())))
    }
}

impl CropCatalog {
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator<Item = (Pixel, String)>,
    {
        Self {
            names: names.into_iter().collect(),
        }
    }

    /// Name for `code`, or the code itself when unknown
    pub fn name(&self, code: Pixel) -> String {
        self.names
            .get(&code)
            .cloned()
            .unwrap_or_else(|| format!("CODE{}", code))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Area per class in acres, assuming the raster's units are metres.
/// No-data pixels are not counted.
pub fn class_areas(raster: &Raster) -> BTreeMap<Pixel, f64> {
    let mut counts: BTreeMap<Pixel, usize> = BTreeMap::new();
    for &value in raster.data.iter() {
        if !raster.is_no_data(value) {
            *counts.entry(value).or_insert(0) += 1;
        }
    }

    let pixel_acres = raster.geo.pixel_area() / SQUARE_METRES_PER_ACRE;
    counts
        .into_iter()
        .map(|(class, count)| (class, count as f64 * pixel_acres))
        .collect()
}

/// Class areas keyed by crop name
pub fn named_class_areas(raster: &Raster, catalog: &CropCatalog) -> BTreeMap<String, f64> {
    class_areas(raster)
        .into_iter()
        .map(|(class, acres)| (catalog.name(class), acres))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo_reference::GeoReference;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_class_areas_exclude_no_data() {
        let geo = GeoReference::new(0.0, 30.0, 0.0, -30.0).unwrap();
        let raster = Raster::new(array![[1, 1, 2], [255, 2, 2]], geo, Some(255));

        let areas = class_areas(&raster);
        assert_eq!(areas.len(), 2);
        assert_relative_eq!(areas[&1], 2.0 * 900.0 / SQUARE_METRES_PER_ACRE);
        assert_relative_eq!(areas[&2], 3.0 * 900.0 / SQUARE_METRES_PER_ACRE);
        assert!(!areas.contains_key(&255));
    }

    #[test]
    fn test_catalog_names() {
        let catalog = CropCatalog::default();
        assert_eq!(catalog.name(2), "CORN");
        assert_eq!(catalog.name(42), "CODE42");

        let geo = GeoReference::new(0.0, 30.0, 0.0, -30.0).unwrap();
        let raster = Raster::new(array![[3, 3]], geo, None);
        let named = named_class_areas(&raster, &catalog);
        assert!(named.contains_key("SOYBEAN"));
    }
}
