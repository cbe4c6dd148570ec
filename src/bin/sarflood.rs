//! Job runner: reads a JSON job description, loads GeoTIFF layers, runs the
//! flood pipeline and writes CSV or GeoJSON output.

use anyhow::{bail, Context, Result};
use sarflood::core::masking::TerrainLayer;
use sarflood::io::{write_features, AreaOfInterest, GeoTiffReader, SourceRasters};
use sarflood::{BoundingBox, FloodConfig, FloodPipeline};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct Job {
    /// Composited "before" backscatter (dB)
    before: PathBuf,
    /// Composited "after" backscatter (dB)
    after: PathBuf,
    water_occurrence: PathBuf,
    #[serde(default)]
    elevation: Option<PathBuf>,
    #[serde(default)]
    slope: Option<PathBuf>,
    /// Optional clip box in geographic coordinates
    #[serde(default)]
    aoi: Option<BoundingBox>,
    output: PathBuf,
    #[serde(default)]
    config: FloodConfig,
}

fn load_job(path: &Path) -> Result<Job> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading job file {}", path.display()))?;
    let job: Job = serde_json::from_str(&text)
        .with_context(|| format!("parsing job file {}", path.display()))?;
    job.config.validate().context("invalid configuration")?;
    Ok(job)
}

fn read(path: &Path) -> Result<sarflood::Raster> {
    GeoTiffReader::read_raster(path).with_context(|| format!("reading raster {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let job_path = match std::env::args().nth(1) {
        Some(p) => PathBuf::from(p),
        None => bail!("usage: sarflood <job.json>"),
    };
    let job = load_job(&job_path)?;

    let terrain = match (&job.slope, &job.elevation) {
        (Some(slope), _) => TerrainLayer::Slope(read(slope)?),
        (None, Some(dem)) => TerrainLayer::Elevation(read(dem)?),
        (None, None) => bail!("job must name either a slope or an elevation raster"),
    };

    let mut rasters = SourceRasters {
        before: read(&job.before)?,
        after: read(&job.after)?,
        water_occurrence: read(&job.water_occurrence)?,
        terrain,
    };
    let grid = rasters.validate_grids().context("input layers do not share a grid")?;

    if let Some(bbox) = job.aoi {
        let aoi = AreaOfInterest::new(bbox.to_polygon(), grid);
        rasters.before = aoi.clip(&rasters.before)?;
        rasters.after = aoi.clip(&rasters.after)?;
    }

    let pipeline = FloodPipeline::new(job.config)?;
    let report = pipeline.process_rasters(&rasters)?;
    write_features(&job.output, &report.output)
        .with_context(|| format!("writing {}", job.output.display()))?;

    log::info!(
        "{} flood features written to {} (scale {} m)",
        report.stats.retained,
        job.output.display(),
        report.stats.scale_m
    );
    Ok(())
}
