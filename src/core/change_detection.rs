use crate::config::ChangeParams;
use crate::types::{FloodResult, Mask, Raster};

/// Per-pixel change statistic and flood candidate thresholding
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    params: ChangeParams,
}

/// Quotient of filtered dB values; undefined pixels are NaN
pub fn change_ratio(after_db: f32, before_db: f32) -> f32 {
    if !after_db.is_finite() || !before_db.is_finite() || before_db == 0.0 {
        return f32::NAN;
    }
    let ratio = after_db / before_db;
    if ratio.is_finite() {
        ratio
    } else {
        f32::NAN
    }
}

impl ChangeDetector {
    pub fn new(params: ChangeParams) -> Self {
        Self { params }
    }

    /// Difference raster `after / before`, both in filtered dB.
    ///
    /// This divides log-scale values directly; it is neither a log-ratio
    /// (dB subtraction) nor a linear intensity ratio.
    pub fn difference(&self, before: &Raster, after: &Raster) -> FloodResult<Raster> {
        before.grid.ensure_matches(&after.grid, "after backscatter")?;
        let data = super::zip_map(&after.data, &before.data, |&a, &b| change_ratio(a, b));
        before.with_data(data)
    }

    /// Flood candidate mask `difference > diff_threshold`; no-data never passes
    pub fn threshold(&self, difference: &Raster) -> FloodResult<Mask> {
        let threshold = self.params.diff_threshold;
        let data = difference.data.mapv(|d| d.is_finite() && d > threshold);
        Mask::new(data, difference.grid)
    }

    /// Difference and threshold in one step
    pub fn detect(&self, before: &Raster, after: &Raster) -> FloodResult<(Raster, Mask)> {
        log::info!("Detecting backscatter change (threshold {})", self.params.diff_threshold);
        let difference = self.difference(before, after)?;
        let candidates = self.threshold(&difference)?;
        log::debug!(
            "{} of {} pixels exceed the change threshold",
            candidates.count(),
            difference.grid.pixel_count()
        );
        Ok((difference, candidates))
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(ChangeParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FloodError, GeoTransform};
    use ndarray::arr2;

    fn raster(values: ndarray::Array2<f32>) -> Raster {
        Raster::new(values, GeoTransform::north_up(77.0, 13.0, 0.005, 0.005))
    }

    #[test]
    fn test_quotient_of_db_values() {
        // Water after flooding is darker: -24 dB over -16 dB gives 1.5
        let before = raster(arr2(&[[-16.0, -16.0], [-16.0, -16.0]]));
        let after = raster(arr2(&[[-24.0, -16.0], [-20.0, -21.6]]));

        let (difference, mask) = ChangeDetector::default().detect(&before, &after).unwrap();
        assert!((difference.data[[0, 0]] - 1.5).abs() < 1e-6);
        assert_eq!(mask.data, arr2(&[[true, false], [false, false]]));
    }

    #[test]
    fn test_threshold_is_strict() {
        let detector = ChangeDetector::new(ChangeParams { diff_threshold: 1.5 });
        let difference = raster(arr2(&[[1.5, 1.5001]]));
        let mask = detector.threshold(&difference).unwrap();
        assert_eq!(mask.data, arr2(&[[false, true]]));
    }

    #[test]
    fn test_no_data_is_excluded() {
        let before = raster(arr2(&[[f32::NAN, 0.0, -10.0]]));
        let after = raster(arr2(&[[-30.0, -30.0, f32::NAN]]));
        let (difference, mask) = ChangeDetector::default().detect(&before, &after).unwrap();
        assert!(difference.data.iter().all(|v| v.is_nan()));
        assert_eq!(mask.count(), 0);
    }

    #[test]
    fn test_grid_mismatch_is_fatal() {
        let before = raster(arr2(&[[-10.0, -10.0]]));
        let after = Raster::new(arr2(&[[-10.0, -10.0]]), GeoTransform::north_up(78.0, 13.0, 0.005, 0.005));
        assert!(matches!(
            ChangeDetector::default().detect(&before, &after),
            Err(FloodError::GridMismatch(_))
        ));
    }
}
