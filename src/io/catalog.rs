//! Raster source adapter.
//!
//! Selects acquisitions of a consistent mode for a time window, composites
//! them onto the run grid with a last-value-wins rule and clips the result to
//! the area of interest.

use crate::core::masking::TerrainLayer;
use crate::types::{
    AcquisitionMode, BoundingBox, FloodError, FloodResult, GridSpec, PassDirection, Polarization, Raster,
};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use geo::{BoundingRect, Intersects, Point, Polygon};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Consistent acquisition mode required of every composited scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionFilter {
    pub mode: AcquisitionMode,
    /// Polarization the scene must carry
    pub polarization: Polarization,
    pub pass: PassDirection,
    /// Nominal resolution in metres; `None` accepts any
    pub resolution_m: Option<f64>,
}

impl Default for AcquisitionFilter {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::IW,
            polarization: Polarization::VH,
            pass: PassDirection::Descending,
            resolution_m: Some(10.0),
        }
    }
}

impl AcquisitionFilter {
    pub fn matches(&self, acquisition: &Acquisition) -> bool {
        let resolution_ok = match self.resolution_m {
            Some(res) => (acquisition.resolution_m - res).abs() < 1e-6,
            None => true,
        };
        acquisition.mode == self.mode
            && acquisition.polarizations.contains(&self.polarization)
            && acquisition.pass == self.pass
            && resolution_ok
    }
}

/// One backscatter scene (dB) already resampled onto the run grid
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub id: String,
    pub acquired: DateTime<Utc>,
    pub mode: AcquisitionMode,
    pub polarizations: Vec<Polarization>,
    pub pass: PassDirection,
    pub resolution_m: f64,
    pub footprint: BoundingBox,
    pub raster: Raster,
}

/// Half-open time interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window of `days` ending at the reference date
    pub fn after(reference_date: NaiveDate, days: u32) -> Self {
        let end = midnight(reference_date);
        Self::new(end - Duration::days(days as i64), end)
    }

    /// The "after" window shifted back by `offset_days`
    pub fn before(reference_date: NaiveDate, days: u32, offset_days: u32) -> Self {
        let after = Self::after(reference_date, days);
        let shift = Duration::days(offset_days as i64);
        Self::new(after.start - shift, after.end - shift)
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        *time >= self.start && *time < self.end
    }
}

/// AOI boundary together with the grid every layer is delivered on
#[derive(Debug, Clone)]
pub struct AreaOfInterest {
    pub boundary: Polygon<f64>,
    pub grid: GridSpec,
}

impl AreaOfInterest {
    pub fn new(boundary: Polygon<f64>, grid: GridSpec) -> Self {
        Self { boundary, grid }
    }

    /// AOI covering the whole grid extent
    pub fn from_grid(grid: GridSpec) -> Self {
        Self {
            boundary: grid.bounds().to_polygon(),
            grid,
        }
    }

    pub fn bounding_box(&self) -> FloodResult<BoundingBox> {
        let rect = self
            .boundary
            .bounding_rect()
            .ok_or_else(|| FloodError::InvalidInput("AOI boundary is empty".to_string()))?;
        Ok(BoundingBox {
            min_lon: rect.min().x,
            max_lon: rect.max().x,
            min_lat: rect.min().y,
            max_lat: rect.max().y,
        })
    }

    /// Set pixels whose centre falls outside the boundary to no-data
    pub fn clip(&self, raster: &Raster) -> FloodResult<Raster> {
        self.grid.ensure_matches(&raster.grid, "clip input")?;
        let transform = raster.grid.transform;
        let data = crate::core::map_indexed(&raster.data, |(i, j), &v| {
            let (lon, lat) = transform.pixel_center(i, j);
            if self.boundary.intersects(&Point::new(lon, lat)) {
                v
            } else {
                f32::NAN
            }
        });
        raster.with_data(data)
    }
}

/// Catalog of acquisitions queried per window
pub trait AcquisitionSource {
    /// Acquisitions acquired inside `window` whose footprint touches `bbox`
    fn query(&self, window: &TimeWindow, bbox: &BoundingBox) -> FloodResult<Vec<Acquisition>>;
}

/// Acquisition catalog held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    acquisitions: Vec<Acquisition>,
}

impl InMemoryCatalog {
    pub fn new(acquisitions: Vec<Acquisition>) -> Self {
        Self { acquisitions }
    }

    pub fn push(&mut self, acquisition: Acquisition) {
        self.acquisitions.push(acquisition);
    }

    pub fn len(&self) -> usize {
        self.acquisitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acquisitions.is_empty()
    }
}

impl AcquisitionSource for InMemoryCatalog {
    fn query(&self, window: &TimeWindow, bbox: &BoundingBox) -> FloodResult<Vec<Acquisition>> {
        Ok(self
            .acquisitions
            .iter()
            .filter(|a| window.contains(&a.acquired) && a.footprint.intersects(bbox))
            .cloned()
            .collect())
    }
}

/// Composited window mosaic and the scenes it was built from
#[derive(Debug, Clone)]
pub struct Composite {
    pub window: TimeWindow,
    pub raster: Raster,
    /// Scene ids in compositing order (oldest first)
    pub acquisition_ids: Vec<String>,
    /// Whether scenes were dropped to respect the acquisition bound
    pub truncated: bool,
}

/// Build the last-value-wins mosaic for one window
pub fn composite_window(
    source: &dyn AcquisitionSource,
    filter: &AcquisitionFilter,
    window: &TimeWindow,
    aoi: &AreaOfInterest,
    max_acquisitions: usize,
) -> FloodResult<Composite> {
    let bbox = aoi.bounding_box()?;
    log::info!("Compositing acquisitions from {} to {}", window.start, window.end);

    let mut scenes: Vec<Acquisition> = source
        .query(window, &bbox)?
        .into_iter()
        .filter(|a| filter.matches(a) && window.contains(&a.acquired) && a.footprint.intersects(&bbox))
        .collect();

    // Most recent first so truncation keeps the newest scenes
    scenes.sort_by(|a, b| b.acquired.cmp(&a.acquired).then_with(|| b.id.cmp(&a.id)));
    let truncated = scenes.len() > max_acquisitions;
    if truncated {
        log::warn!(
            "{} acquisitions in window, keeping the {} most recent",
            scenes.len(),
            max_acquisitions
        );
        scenes.truncate(max_acquisitions);
    }
    scenes.reverse();

    for scene in &scenes {
        aoi.grid.ensure_matches(&scene.raster.grid, &format!("acquisition {}", scene.id))?;
    }

    let mut mosaic = Raster::no_data(aoi.grid);
    for scene in &scenes {
        let overwrite = |out: &mut f32, &v: &f32| {
            if v.is_finite() {
                *out = v;
            }
        };
        #[cfg(feature = "parallel")]
        Zip::from(&mut mosaic.data).and(&scene.raster.data).par_for_each(overwrite);
        #[cfg(not(feature = "parallel"))]
        Zip::from(&mut mosaic.data).and(&scene.raster.data).for_each(overwrite);
    }

    if scenes.is_empty() {
        log::warn!("No acquisitions match the window; mosaic is entirely no-data");
    }

    let raster = aoi.clip(&mosaic)?;
    log::debug!(
        "Composited {} scenes, {} valid pixels",
        scenes.len(),
        raster.valid_count()
    );

    Ok(Composite {
        window: *window,
        raster,
        acquisition_ids: scenes.into_iter().map(|s| s.id).collect(),
        truncated,
    })
}

/// Every layer the detection stages consume, on one grid
#[derive(Debug, Clone)]
pub struct SourceRasters {
    /// Backscatter (dB) composited over the "before" window
    pub before: Raster,
    /// Backscatter (dB) composited over the "after" window
    pub after: Raster,
    /// Water occurrence in percent
    pub water_occurrence: Raster,
    pub terrain: TerrainLayer,
}

impl SourceRasters {
    /// Shared grid of all layers, or `GridMismatch` naming the first offender
    pub fn validate_grids(&self) -> FloodResult<GridSpec> {
        let grid = self.before.grid;
        grid.ensure_matches(&self.after.grid, "after backscatter")?;
        grid.ensure_matches(&self.water_occurrence.grid, "water occurrence")?;
        grid.ensure_matches(&self.terrain.raster().grid, "terrain")?;
        Ok(grid)
    }
}
