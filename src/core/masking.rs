use crate::config::MaskingParams;
use crate::types::{FloodResult, Mask, Raster, METERS_PER_DEGREE_LAT, METERS_PER_DEGREE_LON};
use ndarray::Array2;

/// Terrain input for the steep-slope exclusion
#[derive(Debug, Clone)]
pub enum TerrainLayer {
    /// Elevation in metres; slope is derived
    Elevation(Raster),
    /// Precomputed slope in degrees
    Slope(Raster),
}

impl TerrainLayer {
    pub fn raster(&self) -> &Raster {
        match self {
            TerrainLayer::Elevation(r) | TerrainLayer::Slope(r) => r,
        }
    }
}

/// Intermediate masks kept for inspection
#[derive(Debug, Clone)]
pub struct MaskStackResult {
    /// Change candidates with permanent water removed
    pub after_water: Mask,
    /// Change candidates with permanent water and steep terrain removed
    pub after_slope: Mask,
    /// Permanent water layer (true = water)
    pub permanent_water: Mask,
    /// Steep or unknown terrain layer (true = excluded)
    pub steep_terrain: Mask,
}

/// Permanent water and steep terrain exclusion
#[derive(Debug, Clone)]
pub struct MaskStack {
    params: MaskingParams,
}

impl MaskStack {
    pub fn new(params: MaskingParams) -> Self {
        Self { params }
    }

    /// Permanent water where occurrence ≥ threshold; missing occurrence is not water
    pub fn permanent_water(&self, occurrence: &Raster) -> FloodResult<Mask> {
        let threshold = self.params.water_occurrence_threshold;
        let data = occurrence.data.mapv(|v| v.is_finite() && v >= threshold);
        Mask::new(data, occurrence.grid)
    }

    /// Steep terrain where slope > limit; unknown slope is excluded as well
    pub fn steep_terrain(&self, slope_deg: &Raster) -> FloodResult<Mask> {
        let limit = self.params.max_slope_deg;
        let data = slope_deg.data.mapv(|s| !s.is_finite() || s > limit);
        Mask::new(data, slope_deg.grid)
    }

    /// Slope layer in degrees for either terrain input
    pub fn slope_degrees(&self, terrain: &TerrainLayer) -> FloodResult<Raster> {
        match terrain {
            TerrainLayer::Slope(slope) => Ok(slope.clone()),
            TerrainLayer::Elevation(dem) => calculate_slope(dem),
        }
    }

    /// AND the inverse of both exclusion layers onto the candidates, water first
    pub fn apply(&self, candidates: &Mask, occurrence: &Raster, terrain: &TerrainLayer) -> FloodResult<MaskStackResult> {
        candidates.grid.ensure_matches(&occurrence.grid, "water occurrence")?;
        candidates.grid.ensure_matches(&terrain.raster().grid, "terrain")?;

        let permanent_water = self.permanent_water(occurrence)?;
        let after_water = candidates.and_not(&permanent_water)?;
        log::debug!(
            "Permanent water mask removed {} candidate pixels",
            candidates.count() - after_water.count()
        );

        let slope = self.slope_degrees(terrain)?;
        let steep_terrain = self.steep_terrain(&slope)?;
        let after_slope = after_water.and_not(&steep_terrain)?;
        log::debug!(
            "Slope mask removed {} candidate pixels",
            after_water.count() - after_slope.count()
        );

        Ok(MaskStackResult {
            after_water,
            after_slope,
            permanent_water,
            steep_terrain,
        })
    }
}

impl Default for MaskStack {
    fn default() -> Self {
        Self::new(MaskingParams::default())
    }
}

/// Slope in degrees from an elevation raster using central differences.
///
/// Pixel spacing in metres follows the geographic transform row by row. Edge
/// pixels copy their nearest interior neighbour; rasters smaller than 3x3 are flat.
pub fn calculate_slope(dem: &Raster) -> FloodResult<Raster> {
    log::debug!("Calculating slope from elevation");

    let (height, width) = dem.dim();
    if height < 3 || width < 3 {
        log::warn!("Elevation raster {}x{} too small for slope; treating as flat", height, width);
        return dem.with_data(Array2::zeros((height, width)));
    }

    let transform = &dem.grid.transform;
    let data = &dem.data;
    let mut slope = super::map_indexed(data, |(i, j), _| {
        if i == 0 || j == 0 || i == height - 1 || j == width - 1 {
            return f32::NAN;
        }
        let latitude = transform.pixel_center(i, j).1;
        let dx = transform.pixel_width.abs() * METERS_PER_DEGREE_LON * latitude.to_radians().cos();
        let dy = transform.pixel_height.abs() * METERS_PER_DEGREE_LAT;
        if !(dx > 0.0) || !(dy > 0.0) {
            return f32::NAN;
        }

        let dz_dx = (data[[i, j + 1]] - data[[i, j - 1]]) as f64 / (2.0 * dx);
        let dz_dy = (data[[i + 1, j]] - data[[i - 1, j]]) as f64 / (2.0 * dy);

        (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan().to_degrees() as f32
    });

    fill_edge_values(&mut slope);
    dem.with_data(slope)
}

/// Fill edge values by copying from nearest interior pixels
fn fill_edge_values(array: &mut Array2<f32>) {
    let (height, width) = array.dim();

    for j in 0..width {
        array[[0, j]] = array[[1, j]];
        array[[height - 1, j]] = array[[height - 2, j]];
    }

    for i in 0..height {
        array[[i, 0]] = array[[i, 1]];
        array[[i, width - 1]] = array[[i, width - 2]];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::arr2;

    fn transform() -> GeoTransform {
        // Roughly 100 m pixels near the equator
        GeoTransform::north_up(75.0, 0.01, 100.0 / METERS_PER_DEGREE_LON, 100.0 / METERS_PER_DEGREE_LAT)
    }

    #[test]
    fn test_missing_water_data_is_not_water() {
        let occurrence = Raster::new(arr2(&[[f32::NAN, 4.9, 5.0, 80.0]]), transform());
        let water = MaskStack::default().permanent_water(&occurrence).unwrap();
        assert_eq!(water.data, arr2(&[[false, false, true, true]]));
    }

    #[test]
    fn test_steep_and_unknown_slope_excluded() {
        let slope = Raster::new(arr2(&[[0.0, 5.0, 5.1, f32::NAN]]), transform());
        let steep = MaskStack::default().steep_terrain(&slope).unwrap();
        assert_eq!(steep.data, arr2(&[[false, false, true, true]]));
    }

    #[test]
    fn test_slope_of_flat_and_tilted_terrain() {
        let flat = Raster::new(Array2::from_elem((5, 5), 120.0f32), transform());
        let slope = calculate_slope(&flat).unwrap();
        assert!(slope.data.iter().all(|&s| s == 0.0));

        // 10 m rise per 100 m pixel eastwards: atan(0.1) ≈ 5.71°
        let tilted = Raster::new(
            Array2::from_shape_fn((5, 5), |(_, j)| 10.0 * j as f32),
            transform(),
        );
        let slope = calculate_slope(&tilted).unwrap();
        for &s in slope.data.iter() {
            assert!((s - 5.71).abs() < 0.05, "slope {}", s);
        }
    }

    #[test]
    fn test_mask_stack_applies_both_exclusions() {
        let grid_t = transform();
        let candidates = Mask::new(Array2::from_elem((3, 3), true), Raster::new(Array2::zeros((3, 3)), grid_t).grid).unwrap();
        let mut occ = Array2::from_elem((3, 3), f32::NAN);
        occ[[0, 0]] = 50.0;
        let occurrence = Raster::new(occ, grid_t);
        let mut slope = Array2::from_elem((3, 3), 1.0f32);
        slope[[2, 2]] = 20.0;
        let terrain = TerrainLayer::Slope(Raster::new(slope, grid_t));

        let result = MaskStack::default().apply(&candidates, &occurrence, &terrain).unwrap();
        assert_eq!(result.after_water.count(), 8);
        assert_eq!(result.after_slope.count(), 7);
        assert!(!result.after_slope.data[[0, 0]]);
        assert!(!result.after_slope.data[[2, 2]]);
    }
}
