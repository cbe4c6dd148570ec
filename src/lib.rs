//! sarflood: Sentinel-1 backscatter change detection for flood mapping
//!
//! Two seasonally matched backscatter mosaics are despeckled with a Gamma-MAP
//! filter, compared, masked against permanent water and steep terrain, cleaned
//! of small clusters and vectorized into flood polygons with geodesic area.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, FloodError, FloodResult, GeoTransform, GridSpec, Mask, Raster,
    Polarization, AcquisitionMode, PassDirection,
};
pub use config::{FloodConfig, OutputMode};
pub use crate::core::{FloodFeature, FloodOutput, FloodPipeline, FloodReport, PipelineStats};
pub use crate::io::{AcquisitionSource, AreaOfInterest, InMemoryCatalog, SourceRasters};

#[cfg(feature = "python")]
mod python {
    use crate::config::{FloodConfig, OutputMode};
    use crate::core::change_detection::ChangeDetector;
    use crate::core::masking::TerrainLayer;
    use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterParams};
    use crate::core::FloodPipeline;
    use crate::io::SourceRasters;
    use crate::types::{FloodError, GeoTransform, Raster};
    use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
    use pyo3::prelude::*;

    type PyGeoTransform = (f64, f64, f64, f64, f64, f64);

    fn to_py_err(e: FloodError) -> PyErr {
        match e {
            FloodError::InvalidInput(_) | FloodError::GridMismatch(_) | FloodError::Config(_) => {
                PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("{}", e))
            }
            _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e)),
        }
    }

    fn transform_from(gt: PyGeoTransform) -> GeoTransform {
        GeoTransform {
            top_left_x: gt.0,
            pixel_width: gt.1,
            rotation_x: gt.2,
            top_left_y: gt.3,
            rotation_y: gt.4,
            pixel_height: gt.5,
        }
    }

    fn raster_from(array: PyReadonlyArray2<f32>, gt: PyGeoTransform) -> Raster {
        Raster::new(array.as_array().to_owned(), transform_from(gt))
    }

    /// Gamma-MAP filter a dB array, returning dB
    #[pyfunction]
    #[pyo3(signature = (image_db, geotransform, radius = 3, num_looks = 5.0))]
    fn gamma_map_filter<'py>(
        py: Python<'py>,
        image_db: PyReadonlyArray2<'py, f32>,
        geotransform: PyGeoTransform,
        radius: usize,
        num_looks: f32,
    ) -> PyResult<&'py PyArray2<f32>> {
        let raster = raster_from(image_db, geotransform);
        let filter = SpeckleFilter::with_params(SpeckleFilterParams { radius, num_looks });
        let filtered = py.allow_threads(|| filter.apply_filter(&raster)).map_err(to_py_err)?;
        Ok(filtered.data.into_pyarray(py))
    }

    /// Pixelwise after/before quotient of filtered dB arrays
    #[pyfunction]
    fn change_difference<'py>(
        py: Python<'py>,
        before_db: PyReadonlyArray2<'py, f32>,
        after_db: PyReadonlyArray2<'py, f32>,
        geotransform: PyGeoTransform,
    ) -> PyResult<&'py PyArray2<f32>> {
        let before = raster_from(before_db, geotransform);
        let after = raster_from(after_db, geotransform);
        let difference = ChangeDetector::default()
            .difference(&before, &after)
            .map_err(to_py_err)?;
        Ok(difference.data.into_pyarray(py))
    }

    /// Full detection on co-registered arrays; returns centroid rows
    /// `(polygon_id, longitude, latitude, area_sqkm, date)`.
    /// Polygon output mode is rejected with `ValueError`.
    #[pyfunction]
    #[pyo3(signature = (before_db, after_db, water_occurrence, slope_deg, geotransform, config_json = None))]
    fn detect_floods<'py>(
        py: Python<'py>,
        before_db: PyReadonlyArray2<'py, f32>,
        after_db: PyReadonlyArray2<'py, f32>,
        water_occurrence: PyReadonlyArray2<'py, f32>,
        slope_deg: PyReadonlyArray2<'py, f32>,
        geotransform: PyGeoTransform,
        config_json: Option<&str>,
    ) -> PyResult<Vec<(String, f64, f64, f64, String)>> {
        let config = match config_json {
            Some(json) => FloodConfig::from_json_str(json).map_err(to_py_err)?,
            None => FloodConfig::default(),
        };
        if config.output_mode != OutputMode::Centroid {
            return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(
                "detect_floods returns centroid rows; output_mode must be \"centroid\"",
            ));
        }
        let rasters = SourceRasters {
            before: raster_from(before_db, geotransform),
            after: raster_from(after_db, geotransform),
            water_occurrence: raster_from(water_occurrence, geotransform),
            terrain: TerrainLayer::Slope(raster_from(slope_deg, geotransform)),
        };

        let report = py
            .allow_threads(|| FloodPipeline::new(config)?.process_rasters(&rasters))
            .map_err(to_py_err)?;

        let rows = report.output.centroid_rows().map_err(to_py_err)?;
        Ok(rows
            .iter()
            .map(|r| (r.polygon_id.clone(), r.longitude, r.latitude, r.area_sqkm, r.date.to_string()))
            .collect())
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(gamma_map_filter, m)?)?;
        m.add_function(wrap_pyfunction!(change_difference, m)?)?;
        m.add_function(wrap_pyfunction!(detect_floods, m)?)?;
        Ok(())
    }
}
