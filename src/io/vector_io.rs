use crate::core::{FootprintGeometry, GeometryKind, ParcelFootprint, ZonalResult};
use crate::types::{BoundingBox, CleanupError, CleanupResult, Pixel};
use gdal::vector::{Geometry, LayerAccess, OGRFieldType, OGRwkbGeometryType};
use gdal::{Dataset, DatasetOptions, GdalOpenFlags};
use std::fs;
use std::path::{Path, PathBuf};

/// Attribute holding the ParcelID
pub const ID_FIELD: &str = "ID";
/// Attribute receiving the majority class
pub const MAJORITY_CROP_FIELD: &str = "MajorCrop";
/// Attribute receiving the coverage percentage
pub const COVERAGE_FIELD: &str = "Coverage";

const REQUIRED_COMPONENTS: [&str; 3] = ["shp", "shx", "dbf"];
const OPTIONAL_COMPONENTS: [&str; 2] = ["prj", "cpg"];

/// Parcel (CLU) vector layer access through GDAL/OGR
pub struct ParcelLayer;

impl ParcelLayer {
    /// Name of the first layer of a vector dataset
    pub fn layer_name<P: AsRef<Path>>(path: P) -> CleanupResult<String> {
        let dataset = open_vector(path.as_ref(), false)?;
        let layer = dataset.layer(0)?;
        Ok(layer.name())
    }

    /// Whether the first layer already has a field called `field`
    pub fn has_field<P: AsRef<Path>>(path: P, field: &str) -> CleanupResult<bool> {
        let dataset = open_vector(path.as_ref(), false)?;
        let layer = dataset.layer(0)?;
        let found = layer.defn().fields().any(|f| f.name() == field);
        Ok(found)
    }

    /// Geometry summary and ParcelID of every feature, in layer order
    pub fn read_footprints<P: AsRef<Path>>(path: P) -> CleanupResult<Vec<ParcelFootprint>> {
        let path = path.as_ref();
        log::info!("Reading parcel footprints from {}", path.display());

        let dataset = open_vector(path, false)?;
        let mut layer = dataset.layer(0)?;
        let mut footprints = Vec::with_capacity(layer.feature_count() as usize);

        if !layer.defn().fields().any(|f| f.name() == ID_FIELD) {
            return Err(CleanupError::Processing(format!(
                "{} has no {} field; identify the parcels first",
                path.display(),
                ID_FIELD
            )));
        }

        for feature in layer.features() {
            // null or non-positive IDs mark features that were never identified
            let parcel_id = match feature.field_as_integer_by_name(ID_FIELD)? {
                Some(id) if id > 0 => Some(id as Pixel),
                _ => None,
            };

            let geometry = feature.geometry().map(summarize_geometry);
            footprints.push(ParcelFootprint { parcel_id, geometry });
        }

        log::debug!("Read {} parcel features", footprints.len());
        Ok(footprints)
    }

    /// Copy a shapefile with all its component files under a new name.
    ///
    /// `destination` names the new `.shp`; the other components follow its
    /// base name.
    pub fn duplicate<P: AsRef<Path>, Q: AsRef<Path>>(source: P, destination: Q) -> CleanupResult<PathBuf> {
        let (source, destination) = (source.as_ref(), destination.as_ref());
        log::debug!("Duplicating {} -> {}", source.display(), destination.display());

        for component in REQUIRED_COMPONENTS.iter() {
            let from = source.with_extension(component);
            if !from.exists() {
                return Err(CleanupError::MissingInput(from));
            }
            fs::copy(&from, destination.with_extension(component))?;
        }

        for component in OPTIONAL_COMPONENTS.iter() {
            let from = source.with_extension(component);
            if from.exists() {
                fs::copy(&from, destination.with_extension(component))?;
            }
        }

        Ok(destination.with_extension("shp"))
    }

    /// Find-or-create the majority and coverage fields and fill them from
    /// `results`; returns the number of features updated
    pub fn write_zonal_results<P: AsRef<Path>>(path: P, results: &ZonalResult) -> CleanupResult<usize> {
        let path = path.as_ref();
        log::info!("Writing zonal results to {}", path.display());

        let dataset = open_vector(path, true)?;
        let mut layer = dataset.layer(0)?;

        ensure_field(&layer, MAJORITY_CROP_FIELD, OGRFieldType::OFTInteger)?;
        ensure_field(&layer, COVERAGE_FIELD, OGRFieldType::OFTReal)?;

        let fids: Vec<u64> = layer.features().filter_map(|f| f.fid()).collect();
        let mut updated = 0usize;

        for fid in fids {
            let mut feature = match layer.feature(fid) {
                Some(feature) => feature,
                None => continue,
            };

            let parcel_id = match feature.field_as_integer_by_name(ID_FIELD)? {
                Some(id) if id > 0 => id as Pixel,
                _ => continue,
            };

            if let Some(record) = results.get(parcel_id) {
                feature.set_field_integer(MAJORITY_CROP_FIELD, record.majority_class as i32)?;
                feature.set_field_double(COVERAGE_FIELD, record.coverage)?;
                layer.set_feature(feature)?;
                updated += 1;
            }
        }

        log::info!("Updated {} features", updated);
        Ok(updated)
    }
}

/// Assigns unique integer ParcelIDs to parcel features.
///
/// IDs start at 1 and keep increasing across every file handled by the same
/// identifier, so they stay unique within one identification run.
#[derive(Debug, Clone)]
pub struct ParcelIdentifier {
    next_id: Pixel,
    overwrite: bool,
}

impl Default for ParcelIdentifier {
    fn default() -> Self {
        Self {
            next_id: 1,
            overwrite: false,
        }
    }
}

impl ParcelIdentifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-identify files that already carry an ID field
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Next ID that will be handed out
    pub fn next_id(&self) -> Pixel {
        self.next_id
    }

    /// Identify every file in `files`; returns how many features were identified
    pub fn run<P: AsRef<Path>>(&mut self, files: &[P]) -> CleanupResult<usize> {
        let mut total = 0usize;

        for file in files {
            let file = file.as_ref();
            if !file.exists() {
                log::warn!("Parcel file does not exist: {}", file.display());
                continue;
            }

            if !self.overwrite && ParcelLayer::has_field(file, ID_FIELD)? {
                log::info!("{} is already identified, skipping", file.display());
                continue;
            }

            log::info!("Identifying {} (IDs from {:>10})", file.display(), self.next_id);
            total += self.identify(file)?;
        }

        Ok(total)
    }

    /// Assign IDs to all features of one file, overwriting existing values
    pub fn identify(&mut self, file: &Path) -> CleanupResult<usize> {
        let dataset = open_vector(file, true)?;
        let mut layer = dataset.layer(0)?;

        ensure_field(&layer, ID_FIELD, OGRFieldType::OFTInteger)?;

        let fids: Vec<u64> = layer.features().filter_map(|f| f.fid()).collect();
        let mut identified = 0usize;

        for fid in fids {
            if let Some(mut feature) = layer.feature(fid) {
                let id = i32::try_from(self.next_id).map_err(|_| {
                    CleanupError::Processing(format!("ParcelID {} exceeds field range", self.next_id))
                })?;
                feature.set_field_integer(ID_FIELD, id)?;
                layer.set_feature(feature)?;
                self.next_id += 1;
                identified += 1;
            }
        }

        log::debug!("Identified {} features in {}", identified, file.display());
        Ok(identified)
    }
}

fn open_vector(path: &Path, update: bool) -> CleanupResult<Dataset> {
    if !path.exists() {
        return Err(CleanupError::MissingInput(path.to_path_buf()));
    }

    let mut open_flags = GdalOpenFlags::GDAL_OF_VECTOR;
    if update {
        open_flags |= GdalOpenFlags::GDAL_OF_UPDATE;
    }

    let options = DatasetOptions {
        open_flags,
        ..DatasetOptions::default()
    };
    Ok(Dataset::open_ex(path, options)?)
}

fn ensure_field<L: LayerAccess>(layer: &L, name: &str, field_type: OGRFieldType::Type) -> CleanupResult<()> {
    if !layer.defn().fields().any(|f| f.name() == name) {
        log::debug!("Creating field {}", name);
        layer.create_defn_fields(&[(name, field_type)])?;
    }
    Ok(())
}

fn summarize_geometry(geometry: &Geometry) -> FootprintGeometry {
    let kind = match geometry.geometry_type() {
        OGRwkbGeometryType::wkbPolygon => GeometryKind::Polygon,
        OGRwkbGeometryType::wkbMultiPolygon => GeometryKind::MultiPolygon,
        _ => GeometryKind::Other,
    };

    let envelope = geometry.envelope();
    FootprintGeometry {
        kind,
        envelope: BoundingBox {
            min_lon: envelope.MinX,
            max_lon: envelope.MaxX,
            min_lat: envelope.MinY,
            max_lat: envelope.MaxY,
        },
    }
}
