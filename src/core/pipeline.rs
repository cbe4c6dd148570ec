//! Eager chain of flood mapping stages driven by one configuration value.

use crate::config::FloodConfig;
use crate::core::change_detection::ChangeDetector;
use crate::core::connectivity::ClusterFilter;
use crate::core::enrichment::{AreaFilter, FloodFeature, FloodOutput};
use crate::core::masking::{MaskStack, TerrainLayer};
use crate::core::speckle_filter::SpeckleFilter;
use crate::core::vectorize::{VectorizeResult, Vectorizer};
use crate::io::catalog::{composite_window, AcquisitionSource, AreaOfInterest, SourceRasters, TimeWindow};
use crate::types::{FloodResult, GridSpec, Mask, Raster};

/// Per-stage pixel and feature counts for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    /// Pixels where both filtered mosaics hold data
    pub valid_pixels: usize,
    pub change_candidates: usize,
    pub after_water_mask: usize,
    pub after_slope_mask: usize,
    pub after_cluster_filter: usize,
    pub regions: usize,
    pub dropped_small: usize,
    pub dropped_degenerate: usize,
    pub retained: usize,
    /// Effective vectorization scale in metres
    pub scale_m: f64,
    pub degrade_steps: u32,
}

/// Scenes that went into one composited window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSummary {
    pub window: TimeWindow,
    pub acquisition_ids: Vec<String>,
    pub truncated: bool,
}

/// Intermediate rasters and masks of the pixel stages
#[derive(Debug, Clone)]
pub struct FloodMaskStages {
    pub before_filtered: Raster,
    pub after_filtered: Raster,
    pub difference: Raster,
    pub candidates: Mask,
    pub after_water: Mask,
    pub after_slope: Mask,
    /// Final flood mask after cluster removal
    pub cleaned: Mask,
}

/// Result of a pipeline run
#[derive(Debug, Clone)]
pub struct FloodReport {
    pub features: Vec<FloodFeature>,
    pub output: FloodOutput,
    pub stats: PipelineStats,
    /// Before and after windows; empty for array-level runs
    pub windows: Vec<WindowSummary>,
}

/// Flood change detection pipeline
pub struct FloodPipeline {
    config: FloodConfig,
    speckle: SpeckleFilter,
    change: ChangeDetector,
    masks: MaskStack,
    clusters: ClusterFilter,
    vectorizer: Vectorizer,
    area_filter: AreaFilter,
}

impl FloodPipeline {
    pub fn new(config: FloodConfig) -> FloodResult<Self> {
        config.validate()?;
        Ok(Self {
            speckle: SpeckleFilter::with_params(config.speckle.clone()),
            change: ChangeDetector::new(config.change.clone()),
            masks: MaskStack::new(config.masking.clone()),
            clusters: ClusterFilter::new(config.connectivity.clone()),
            vectorizer: Vectorizer::new(config.vectorize.clone()),
            area_filter: AreaFilter::new(config.enrichment.clone(), config.output_mode),
            config,
        })
    }

    pub fn config(&self) -> &FloodConfig {
        &self.config
    }

    /// Speckle filter, change detection, exclusion masks and cluster filter
    pub fn flood_mask(&self, rasters: &SourceRasters) -> FloodResult<FloodMaskStages> {
        let grid = rasters.validate_grids()?;
        self.mask_stages(rasters, &grid)
    }

    /// Pixel stages on rasters already checked to share `grid`
    fn mask_stages(&self, rasters: &SourceRasters, grid: &GridSpec) -> FloodResult<FloodMaskStages> {
        log::debug!("Pixel stages on {}x{} grid", grid.rows, grid.cols);
        let before_filtered = self.speckle.apply_filter(&rasters.before)?;
        let after_filtered = self.speckle.apply_filter(&rasters.after)?;

        let (difference, candidates) = self.change.detect(&before_filtered, &after_filtered)?;
        let stack = self
            .masks
            .apply(&candidates, &rasters.water_occurrence, &rasters.terrain)?;
        let cleaned = self.clusters.apply(&stack.after_slope)?;

        Ok(FloodMaskStages {
            before_filtered,
            after_filtered,
            difference,
            candidates,
            after_water: stack.after_water,
            after_slope: stack.after_slope,
            cleaned,
        })
    }

    /// Run every stage on already composited rasters
    pub fn process_rasters(&self, rasters: &SourceRasters) -> FloodResult<FloodReport> {
        let grid = rasters.validate_grids()?;
        log::info!(
            "Processing {}x{} grid for {}",
            grid.rows,
            grid.cols,
            self.config.reference_date
        );

        let stages = self.mask_stages(rasters, &grid)?;
        let vectors: VectorizeResult = self.vectorizer.vectorize(&stages.cleaned)?;
        let (features, enrichment) = self
            .area_filter
            .apply(&vectors.regions, self.config.reference_date);

        let valid_pixels = stages
            .before_filtered
            .data
            .iter()
            .zip(stages.after_filtered.data.iter())
            .filter(|(b, a)| b.is_finite() && a.is_finite())
            .count();

        let stats = PipelineStats {
            valid_pixels,
            change_candidates: stages.candidates.count(),
            after_water_mask: stages.after_water.count(),
            after_slope_mask: stages.after_slope.count(),
            after_cluster_filter: stages.cleaned.count(),
            regions: vectors.regions.len(),
            dropped_small: enrichment.dropped_small,
            dropped_degenerate: enrichment.dropped_degenerate,
            retained: features.len(),
            scale_m: vectors.plan.scale_m,
            degrade_steps: vectors.plan.degrade_steps,
        };
        log::info!("Run complete: {:?}", stats);

        let output = FloodOutput::from_features(self.config.output_mode, &features);
        Ok(FloodReport {
            features,
            output,
            stats,
            windows: Vec::new(),
        })
    }

    /// Composite both windows from the source, then run every stage
    pub fn run(
        &self,
        source: &dyn AcquisitionSource,
        aoi: &AreaOfInterest,
        water_occurrence: Raster,
        terrain: TerrainLayer,
    ) -> FloodResult<FloodReport> {
        // Auxiliary layers must already sit on the AOI grid
        aoi.grid.ensure_matches(&water_occurrence.grid, "water occurrence")?;
        aoi.grid.ensure_matches(&terrain.raster().grid, "terrain")?;

        let config = &self.config;
        let after_window = TimeWindow::after(config.reference_date, config.window_days);
        let before_window = TimeWindow::before(
            config.reference_date,
            config.window_days,
            config.seasonal_offset_days,
        );

        let before = composite_window(
            source,
            &config.acquisition,
            &before_window,
            aoi,
            config.max_acquisitions,
        )?;
        let after = composite_window(
            source,
            &config.acquisition,
            &after_window,
            aoi,
            config.max_acquisitions,
        )?;

        let windows: Vec<WindowSummary> = [&before, &after]
            .iter()
            .map(|c| WindowSummary {
                window: c.window,
                acquisition_ids: c.acquisition_ids.clone(),
                truncated: c.truncated,
            })
            .collect();

        let rasters = SourceRasters {
            before: before.raster,
            after: after.raster,
            water_occurrence,
            terrain,
        };
        let mut report = self.process_rasters(&rasters)?;
        report.windows = windows;
        Ok(report)
    }
}
