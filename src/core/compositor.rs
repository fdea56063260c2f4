use crate::core::raster::Raster;
use crate::types::{CleanupError, CleanupResult, Pixel};
use ndarray::{Array2, Zip};

/// Pixel-wise merging of equally shaped rasters.
///
/// Outputs always carry the base raster's shape, geo-reference and no-data
/// value.
pub struct PriorityCompositor;

impl PriorityCompositor {
    /// Mask that is true wherever `source` is non-zero ("data known here")
    pub fn mask_from(source: &Raster) -> Array2<bool> {
        source.data.mapv(|v| v != 0)
    }

    /// All-false mask of the given (height, width): base wins everywhere
    pub fn empty_mask(dim: (usize, usize)) -> Array2<bool> {
        Array2::from_elem(dim, false)
    }

    /// `mask ? clean : base`, pixel by pixel
    pub fn mask_merge(clean: &Raster, base: &Raster, mask: &Array2<bool>) -> CleanupResult<Raster> {
        base.ensure_same_shape(clean)?;
        if mask.dim() != base.dim() {
            return Err(CleanupError::ShapeMismatch {
                expected: base.dim(),
                found: mask.dim(),
            });
        }

        let mut merged = base.data.clone();
        Zip::from(&mut merged)
            .and(&clean.data)
            .and(mask)
            .for_each(|out, &clean_value, &use_clean| {
                if use_clean {
                    *out = clean_value;
                }
            });

        let from_clean = mask.iter().filter(|&&m| m).count();
        log::info!(
            "Merged {} of {} pixels from the clean layer",
            from_clean,
            mask.len()
        );

        base.with_data(merged)
    }

    /// Force `preferred` wherever `preference` holds `preferred`; all other
    /// pixels keep the value from `raster`
    pub fn value_merge(raster: &Raster, preference: &Raster, preferred: Pixel) -> CleanupResult<Raster> {
        raster.ensure_same_shape(preference)?;

        let mut forced = 0usize;
        let mut output = raster.data.clone();
        Zip::from(&mut output)
            .and(&preference.data)
            .for_each(|out, &pref| {
                if pref == preferred {
                    if *out != preferred {
                        forced += 1;
                    }
                    *out = preferred;
                }
            });

        log::info!("Forced {} pixels to preferred value {}", forced, preferred);
        raster.with_data(output)
    }
}
