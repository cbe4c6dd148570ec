//! Run configuration threaded through the flood pipeline.
//!
//! Every parameter has a default matching the operational Karnataka setup, so a
//! JSON configuration only needs to name the values it overrides.

use crate::core::speckle_filter::SpeckleFilterParams;
use crate::io::catalog::AcquisitionFilter;
use crate::types::{FloodError, FloodResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output shape of the enrichment stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Tabular centroid rows, geometry discarded
    #[default]
    Centroid,
    /// Full polygon geometry with properties
    Polygon,
}

impl OutputMode {
    /// Minimum retained area (km²) when the configuration leaves it unset
    pub fn default_min_area_sqkm(&self) -> f64 {
        match self {
            OutputMode::Centroid => 0.05,
            OutputMode::Polygon => 1.0,
        }
    }
}

/// Change detection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeParams {
    /// Quotient of after/before filtered dB above which a pixel is a flood candidate
    pub diff_threshold: f32,
}

impl Default for ChangeParams {
    fn default() -> Self {
        Self { diff_threshold: 1.35 }
    }
}

/// Exclusion mask parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingParams {
    /// Water occurrence (percent) at or above which a pixel is permanent water
    pub water_occurrence_threshold: f32,
    /// Terrain slope (degrees) above which a pixel is excluded
    pub max_slope_deg: f32,
}

impl Default for MaskingParams {
    fn default() -> Self {
        Self {
            water_occurrence_threshold: 5.0,
            max_slope_deg: 5.0,
        }
    }
}

/// Noise cluster removal parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityParams {
    /// Minimum (capped) 8-connected cluster size for a pixel to survive
    pub connected_pixels: usize,
    /// Cap at which the cluster scan stops counting
    pub max_cluster_scan: usize,
}

impl Default for ConnectivityParams {
    fn default() -> Self {
        Self {
            connected_pixels: 17,
            max_cluster_scan: 25,
        }
    }
}

/// Raster to polygon conversion parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizeParams {
    /// Output pixel size in metres
    pub scale_m: f64,
    /// Maximum number of output-grid pixels processed
    pub max_pixels: u64,
    /// Coarsen instead of failing when the budget is exceeded
    pub best_effort: bool,
    /// Upper bound on scale doublings tried by the best-effort degrade
    pub max_degrade_steps: u32,
}

impl Default for VectorizeParams {
    fn default() -> Self {
        Self {
            scale_m: 500.0,
            max_pixels: 10_000_000_000_000,
            best_effort: true,
            max_degrade_steps: 16,
        }
    }
}

/// Area filter and enrichment parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentParams {
    /// Distance error tolerance (metres) for geodesic area and centroid
    pub max_error_m: f64,
    /// Minimum area (km²); `None` selects the output mode default
    pub min_area_sqkm: Option<f64>,
}

impl Default for EnrichmentParams {
    fn default() -> Self {
        Self {
            max_error_m: 10.0,
            min_area_sqkm: None,
        }
    }
}

/// Complete flood mapping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    /// End of the "after" window
    pub reference_date: NaiveDate,
    /// Length of each compositing window in days
    pub window_days: u32,
    /// Offset between the "after" and "before" windows in days
    pub seasonal_offset_days: u32,
    /// Acquisition consistency filter
    pub acquisition: AcquisitionFilter,
    /// Upper bound on acquisitions composited per window
    pub max_acquisitions: usize,
    pub speckle: SpeckleFilterParams,
    pub change: ChangeParams,
    pub masking: MaskingParams,
    pub connectivity: ConnectivityParams,
    pub vectorize: VectorizeParams,
    pub enrichment: EnrichmentParams,
    pub output_mode: OutputMode,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            reference_date: NaiveDate::from_ymd_opt(2019, 8, 15).unwrap_or_default(),
            window_days: 15,
            seasonal_offset_days: 365,
            acquisition: AcquisitionFilter::default(),
            max_acquisitions: 64,
            speckle: SpeckleFilterParams::default(),
            change: ChangeParams::default(),
            masking: MaskingParams::default(),
            connectivity: ConnectivityParams::default(),
            vectorize: VectorizeParams::default(),
            enrichment: EnrichmentParams::default(),
            output_mode: OutputMode::default(),
        }
    }
}

impl FloodConfig {
    /// Configuration for a given reference date and output mode, defaults elsewhere
    pub fn for_date(reference_date: NaiveDate, output_mode: OutputMode) -> Self {
        Self {
            reference_date,
            output_mode,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> FloodResult<Self> {
        let config: FloodConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> FloodResult<Self> {
        log::info!("Reading configuration from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Minimum retained area in km² for the configured output mode
    pub fn min_area_sqkm(&self) -> f64 {
        self.enrichment
            .min_area_sqkm
            .unwrap_or_else(|| self.output_mode.default_min_area_sqkm())
    }

    /// Reject parameter combinations the pipeline cannot run with
    pub fn validate(&self) -> FloodResult<()> {
        if self.window_days == 0 {
            return Err(FloodError::Config("window_days must be positive".to_string()));
        }
        if self.max_acquisitions == 0 {
            return Err(FloodError::Config("max_acquisitions must be positive".to_string()));
        }
        if self.speckle.radius == 0 {
            return Err(FloodError::Config("speckle radius must be positive".to_string()));
        }
        if !(self.speckle.num_looks > 0.0) {
            return Err(FloodError::Config("look count must be positive".to_string()));
        }
        if !self.change.diff_threshold.is_finite() {
            return Err(FloodError::Config("diff_threshold must be finite".to_string()));
        }
        if self.connectivity.max_cluster_scan == 0 {
            return Err(FloodError::Config("max_cluster_scan must be positive".to_string()));
        }
        if self.connectivity.connected_pixels > self.connectivity.max_cluster_scan {
            log::warn!(
                "connected_pixels ({}) exceeds the cluster scan cap ({}); every pixel will be removed",
                self.connectivity.connected_pixels,
                self.connectivity.max_cluster_scan
            );
        }
        if !(self.vectorize.scale_m > 0.0) {
            return Err(FloodError::Config("vectorization scale must be positive".to_string()));
        }
        if !(self.enrichment.max_error_m >= 0.0) {
            return Err(FloodError::Config("max_error_m must be non-negative".to_string()));
        }
        if !(self.min_area_sqkm() >= 0.0) {
            return Err(FloodError::Config("min_area_sqkm must be non-negative".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_operational_setup() {
        let config = FloodConfig::default();
        assert_eq!(config.window_days, 15);
        assert_eq!(config.change.diff_threshold, 1.35);
        assert_eq!(config.connectivity.connected_pixels, 17);
        assert_eq!(config.connectivity.max_cluster_scan, 25);
        assert_eq!(config.speckle.radius, 3);
        assert_eq!(config.speckle.num_looks, 5.0);
        assert_eq!(config.vectorize.scale_m, 500.0);
        assert_eq!(config.enrichment.max_error_m, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_min_area_follows_output_mode() {
        let mut config = FloodConfig::default();
        assert_eq!(config.min_area_sqkm(), 0.05);
        config.output_mode = OutputMode::Polygon;
        assert_eq!(config.min_area_sqkm(), 1.0);
        config.enrichment.min_area_sqkm = Some(0.2);
        assert_eq!(config.min_area_sqkm(), 0.2);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{
            "reference_date": "2024-07-30",
            "output_mode": "polygon",
            "change": { "diff_threshold": 1.5 }
        }"#;
        let config = FloodConfig::from_json_str(json).unwrap();
        assert_eq!(config.reference_date, NaiveDate::from_ymd_opt(2024, 7, 30).unwrap());
        assert_eq!(config.output_mode, OutputMode::Polygon);
        assert_eq!(config.change.diff_threshold, 1.5);
        assert_eq!(config.connectivity.connected_pixels, 17);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let json = r#"{ "vectorize": { "scale_m": 0.0 } }"#;
        assert!(matches!(
            FloodConfig::from_json_str(json),
            Err(FloodError::Config(_))
        ));
    }
}
