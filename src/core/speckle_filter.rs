use crate::types::{FloodError, FloodResult, Raster};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Speckle filtering parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeckleFilterParams {
    /// Neighbourhood radius in pixels (window is 2r+1 square)
    pub radius: usize,
    /// Nominal number of looks of the input product
    pub num_looks: f32,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self {
            radius: 3,      // 7x7 window
            num_looks: 5.0, // Sentinel-1 IW GRD
        }
    }
}

impl SpeckleFilterParams {
    pub fn window_size(&self) -> usize {
        2 * self.radius + 1
    }
}

/// Gamma-MAP speckle filter operating on dB backscatter
#[derive(Debug, Clone)]
pub struct SpeckleFilter {
    params: SpeckleFilterParams,
}

/// Convert a dB sample to linear intensity
pub fn db_to_intensity(db: f32) -> f64 {
    10f64.powf(db as f64 / 10.0)
}

/// Convert linear intensity back to dB; non-positive input is no-data
pub fn intensity_to_db(intensity: f64) -> f32 {
    if intensity > 0.0 && intensity.is_finite() {
        (10.0 * intensity.log10()) as f32
    } else {
        f32::NAN
    }
}

/// Gamma-MAP estimate for one pixel.
///
/// `cu` is the speckle coefficient of variation and `cmax` the heterogeneity
/// limit. Returns `None` when the estimate is undefined (zero mean, zero
/// denominator or a negative discriminant).
pub fn gamma_map_estimate(intensity: f64, mean: f64, variance: f64, cu: f64, cmax: f64) -> Option<f64> {
    if !intensity.is_finite() || !variance.is_finite() || !(mean > 0.0) || !mean.is_finite() {
        return None;
    }

    let ci = variance.max(0.0).sqrt() / mean;

    if ci < cu {
        // Homogeneous area - fully smoothed
        return Some(mean);
    }
    if ci > cmax {
        // Strong scatterer or edge - preserve original
        return Some(intensity);
    }

    let cu2 = cu * cu;
    let denominator = ci * ci - cu2;
    if denominator <= 0.0 {
        return None;
    }
    let alpha = (1.0 + cu2) / denominator;

    let discriminant = (alpha - 1.0).powi(2) * mean * mean + 4.0 * alpha * intensity * mean;
    if discriminant < 0.0 {
        return None;
    }

    let estimate = ((alpha - 1.0) * mean + discriminant.sqrt()) / (2.0 * alpha);
    if estimate.is_finite() {
        Some(estimate)
    } else {
        None
    }
}

impl SpeckleFilter {
    /// Create a new speckle filter with default parameters
    pub fn new() -> Self {
        Self {
            params: SpeckleFilterParams::default(),
        }
    }

    /// Create a speckle filter with custom parameters
    pub fn with_params(params: SpeckleFilterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SpeckleFilterParams {
        &self.params
    }

    /// Speckle coefficient of variation `cu` and heterogeneity limit `cmax`
    pub fn coefficients(&self) -> (f64, f64) {
        let cu = 1.0 / (self.params.num_looks as f64).sqrt();
        (cu, std::f64::consts::SQRT_2 * cu)
    }

    /// Apply Gamma-MAP filtering to a dB raster, returning a dB raster on the same grid
    pub fn apply_filter(&self, image: &Raster) -> FloodResult<Raster> {
        log::info!("Applying Gamma MAP speckle filter");
        log::debug!("Filter parameters: {:?}", self.params);

        if self.params.radius == 0 {
            return Err(FloodError::Processing("Filter radius must be positive".to_string()));
        }
        if !(self.params.num_looks > 0.0) {
            return Err(FloodError::Processing("Number of looks must be positive".to_string()));
        }

        let intensity = image.data.mapv(|db| {
            if db.is_finite() {
                db_to_intensity(db)
            } else {
                f64::NAN
            }
        });

        let filtered = self.filter_intensity(&intensity);
        let db = filtered.mapv(intensity_to_db);

        let valid_in = image.valid_count();
        let result = image.with_data(db)?;
        let valid_out = result.valid_count();
        if valid_out < valid_in {
            log::debug!(
                "{} pixels became no-data during speckle filtering",
                valid_in - valid_out
            );
        }

        log::info!("Speckle filtering completed successfully");
        Ok(result)
    }

    /// Gamma-MAP filter in linear intensity; NaN marks no-data on input and output
    pub fn filter_intensity(&self, intensity: &Array2<f64>) -> Array2<f64> {
        let (cu, cmax) = self.coefficients();

        super::map_indexed(intensity, |(i, j), &center_value| {
            if !center_value.is_finite() || center_value <= 0.0 {
                return f64::NAN;
            }
            match self.local_statistics(intensity, i, j) {
                Some((mean, variance)) => {
                    gamma_map_estimate(center_value, mean, variance, cu, cmax).unwrap_or(f64::NAN)
                }
                None => f64::NAN,
            }
        })
    }

    /// Mean and population variance of valid pixels in the window around (i, j)
    pub fn local_statistics(&self, image: &Array2<f64>, center_i: usize, center_j: usize) -> Option<(f64, f64)> {
        let (height, width) = image.dim();
        let half_window = self.params.radius;

        let i_start = center_i.saturating_sub(half_window);
        let i_end = (center_i + half_window + 1).min(height);
        let j_start = center_j.saturating_sub(half_window);
        let j_end = (center_j + half_window + 1).min(width);

        let window = image.slice(ndarray::s![i_start..i_end, j_start..j_end]);

        let mut sum = 0.0;
        let mut count = 0usize;
        for &pixel_val in window.iter() {
            if pixel_val.is_finite() && pixel_val > 0.0 {
                sum += pixel_val;
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }

        let mean = sum / count as f64;
        let variance = window
            .iter()
            .filter(|v| v.is_finite() && **v > 0.0)
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / count as f64;

        Some((mean, variance))
    }
}

impl Default for SpeckleFilter {
    fn default() -> Self {
        Self::new()
    }
}
