use crate::types::{FloodError, FloodResult, GeoTransform, Raster};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// Single-band GeoTIFF reader
pub struct GeoTiffReader;

impl GeoTiffReader {
    /// Read the first band as f32; the band's no-data value becomes NaN
    pub fn read_raster<P: AsRef<Path>>(path: P) -> FloodResult<Raster> {
        log::info!("Reading raster from: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        log::debug!("Raster size: {}x{}", width, height);
        log::debug!("Raster geotransform: {:?}", geo_transform);

        let rasterband = dataset.rasterband(1)?;
        let no_data = rasterband.no_data_value();
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let mut data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| FloodError::Processing(format!("Failed to reshape raster data: {}", e)))?;
        if let Some(nd) = no_data {
            let nd = nd as f32;
            data.mapv_inplace(|v| if v == nd { f32::NAN } else { v });
        }

        let transform = GeoTransform {
            top_left_x: geo_transform[0],
            pixel_width: geo_transform[1],
            rotation_x: geo_transform[2],
            top_left_y: geo_transform[3],
            rotation_y: geo_transform[4],
            pixel_height: geo_transform[5],
        };

        Ok(Raster::new(data, transform))
    }
}
