use crate::core::{GeoReference, Raster};
use crate::types::{CleanupError, CleanupResult, GeoTransform, Pixel};
use gdal::raster::Buffer;
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags};
use ndarray::Array2;
use std::fs;
use std::path::Path;

/// Band every stage reads and writes
pub const DEFAULT_BAND: isize = 1;

/// GDAL-backed raster reading and writing
pub struct RasterStore;

impl RasterStore {
    /// Read band 1 of a raster with its geo-reference and no-data value
    pub fn read<P: AsRef<Path>>(path: P) -> CleanupResult<Raster> {
        let path = path.as_ref();
        log::debug!("Reading raster {}", path.display());

        if !path.exists() {
            return Err(CleanupError::MissingInput(path.to_path_buf()));
        }

        let dataset = Dataset::open(path)?;
        let geo = GeoReference::from_transform(&GeoTransform::from(dataset.geo_transform()?))?;
        let (width, height) = dataset.raster_size();

        let rasterband = dataset.rasterband(DEFAULT_BAND)?;
        let no_data = rasterband.no_data_value().and_then(pixel_from_no_data);
        let band_data = rasterband.read_as::<Pixel>((0, 0), (width, height), (width, height), None)?;

        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| CleanupError::Processing(format!("Failed to reshape raster data: {}", e)))?;

        log::debug!("Raster size: {}x{}, geo-reference {}, no-data {:?}", width, height, geo, no_data);
        Ok(Raster::new(data, geo, no_data))
    }

    /// Geo-reference and (width, height) without reading pixel data
    pub fn grid<P: AsRef<Path>>(path: P) -> CleanupResult<(GeoReference, (usize, usize))> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CleanupError::MissingInput(path.to_path_buf()));
        }

        let dataset = Dataset::open(path)?;
        let geo = GeoReference::from_transform(&GeoTransform::from(dataset.geo_transform()?))?;
        Ok((geo, dataset.raster_size()))
    }

    /// Declared no-data value of band 1, if any
    pub fn no_data_value<P: AsRef<Path>>(path: P) -> CleanupResult<Option<f64>> {
        let dataset = Dataset::open(path.as_ref())?;
        let rasterband = dataset.rasterband(DEFAULT_BAND)?;
        Ok(rasterband.no_data_value())
    }

    /// Write `raster` to `output` as a clone of `template`.
    ///
    /// The template file is copied first, so geotransform, projection, band
    /// type and no-data declarations are preserved; band 1 is then
    /// overwritten with the raster's values.
    pub fn write_like<P: AsRef<Path>, Q: AsRef<Path>>(template: P, output: Q, raster: &Raster) -> CleanupResult<()> {
        let (template, output) = (template.as_ref(), output.as_ref());
        log::debug!("Writing {} (template {})", output.display(), template.display());

        fs::copy(template, output)?;

        let dataset = open_for_update(output)?;
        let (width, height) = dataset.raster_size();
        if (height, width) != raster.dim() {
            return Err(CleanupError::ShapeMismatch {
                expected: (height, width),
                found: raster.dim(),
            });
        }

        let mut rasterband = dataset.rasterband(DEFAULT_BAND)?;
        let flat_data: Vec<Pixel> = raster.data.iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        Ok(())
    }

    /// Create a new single-band GeoTIFF from scratch
    pub fn save_geotiff<P: AsRef<Path>>(raster: &Raster, output: P, projection: Option<&str>) -> CleanupResult<()> {
        let output = output.as_ref();
        log::debug!("Saving raster as GeoTIFF: {}", output.display());

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = raster.dim();

        let mut dataset = driver.create_with_band_type::<Pixel, _>(output, width as isize, height as isize, 1)?;

        let transform: [f64; 6] = raster.geo.to_transform().into();
        dataset.set_geo_transform(&transform)?;

        if let Some(wkt) = projection {
            dataset.set_projection(wkt)?;
        }

        let mut rasterband = dataset.rasterband(DEFAULT_BAND)?;
        let flat_data: Vec<Pixel> = raster.data.iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;

        if let Some(no_data) = raster.no_data {
            rasterband.set_no_data_value(Some(no_data as f64))?;
        }

        Ok(())
    }

    /// Declare `value` as no-data on every band (or remove the declaration for `None`)
    pub fn declare_no_data<P: AsRef<Path>>(path: P, value: Option<f64>) -> CleanupResult<()> {
        let dataset = open_for_update(path.as_ref())?;

        for index in 1..=dataset.raster_count() {
            let mut rasterband = dataset.rasterband(index)?;
            rasterband.set_no_data_value(value)?;
        }

        Ok(())
    }

    /// Remove the no-data declaration from every band, optionally rewriting
    /// the former no-data pixels with `replacement`
    pub fn undeclare_no_data<P: AsRef<Path>>(path: P, replacement: Option<f64>) -> CleanupResult<usize> {
        let path = path.as_ref();
        log::info!("Finalizing {} ...", path.display());

        let dataset = open_for_update(path)?;
        let (width, height) = dataset.raster_size();
        let mut replaced = 0usize;

        for index in 1..=dataset.raster_count() {
            let mut rasterband = dataset.rasterband(index)?;
            let no_data = match rasterband.no_data_value() {
                Some(value) => value,
                None => continue,
            };
            rasterband.set_no_data_value(None)?;

            if let Some(replacement) = replacement {
                let mut buffer = rasterband.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
                for value in buffer.data.iter_mut() {
                    if *value == no_data || (no_data.is_nan() && value.is_nan()) {
                        *value = replacement;
                        replaced += 1;
                    }
                }
                rasterband.write((0, 0), (width, height), &buffer)?;
            }
        }

        log::debug!("Replaced {} no-data pixels in {}", replaced, path.display());
        Ok(replaced)
    }
}

fn open_for_update(path: &Path) -> CleanupResult<Dataset> {
    if !path.exists() {
        return Err(CleanupError::MissingInput(path.to_path_buf()));
    }

    let options = DatasetOptions {
        open_flags: GdalOpenFlags::GDAL_OF_UPDATE | GdalOpenFlags::GDAL_OF_RASTER,
        ..DatasetOptions::default()
    };
    Ok(Dataset::open_ex(path, options)?)
}

/// No-data values that cannot be represented as a pixel value are ignored
fn pixel_from_no_data(value: f64) -> Option<Pixel> {
    if value.fract() == 0.0 && value >= 0.0 && value <= Pixel::MAX as f64 {
        Some(value as Pixel)
    } else {
        log::warn!("No-data value {} is not a valid class code, ignoring it", value);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    fn sample() -> Raster {
        let geo = GeoReference::new(-90.0, 0.5, 40.0, -0.5).unwrap();
        Raster::new(array![[1, 2, 3], [255, 5, 255]], geo, Some(255))
    }

    #[test]
    fn test_save_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.tif");
        RasterStore::save_geotiff(&sample(), &path, None).unwrap();

        let read = RasterStore::read(&path).unwrap();
        assert_eq!(read, sample());
        assert_eq!(RasterStore::no_data_value(&path).unwrap(), Some(255.0));
    }

    #[test]
    fn test_write_like_preserves_metadata() {
        let dir = TempDir::new().unwrap();
        let template = dir.path().join("template.tif");
        let output = dir.path().join("output.tif");
        RasterStore::save_geotiff(&sample(), &template, None).unwrap();

        let updated = sample().with_data(array![[7, 7, 7], [7, 7, 7]]).unwrap();
        RasterStore::write_like(&template, &output, &updated).unwrap();

        let read = RasterStore::read(&output).unwrap();
        assert_eq!(read.data, updated.data);
        assert_eq!(read.geo, sample().geo);
        assert_eq!(read.no_data, Some(255));
    }

    #[test]
    fn test_undeclare_replaces_no_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("product.tif");
        RasterStore::save_geotiff(&sample(), &path, None).unwrap();

        let replaced = RasterStore::undeclare_no_data(&path, Some(0.0)).unwrap();
        assert_eq!(replaced, 2);

        let read = RasterStore::read(&path).unwrap();
        assert_eq!(read.no_data, None);
        assert_eq!(read.data, array![[1, 2, 3], [0, 5, 0]]);
    }

    #[test]
    fn test_missing_input() {
        match RasterStore::read("/nonexistent/raster.tif") {
            Err(CleanupError::MissingInput(_)) => {}
            other => panic!("expected MissingInput, got {:?}", other),
        }
    }
}
