//! Raster to polygon conversion.
//!
//! The cleaned flood mask is resampled to the output scale, split into
//! 4-connected zones and each zone's pixel boundary is traced into a polygon
//! in geographic coordinates. Zone labels follow raster scan order of each
//! zone's first pixel, so the output is deterministic for a given mask.

use crate::config::VectorizeParams;
use crate::types::{FloodError, FloodResult, GridSpec, Mask};
use geo::orient::{Direction, Orient};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use ndarray::Array2;
use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Output resolution decided for a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalePlan {
    /// Input pixels per output pixel along each axis
    pub factor: usize,
    /// Effective output pixel size in metres
    pub scale_m: f64,
    /// Number of scale doublings applied to meet the pixel budget
    pub degrade_steps: u32,
    /// Output grid
    pub grid: GridSpec,
}

impl ScalePlan {
    pub fn degraded(&self) -> bool {
        self.degrade_steps > 0
    }
}

/// A 4-connected zone of flooded output pixels
#[derive(Debug, Clone)]
pub struct Region {
    /// Unique zone label, starting at 1
    pub label: u32,
    /// Number of output pixels in the zone
    pub pixel_count: usize,
    /// Zone boundary in geographic coordinates
    pub geometry: MultiPolygon<f64>,
}

/// Result of vectorization
#[derive(Debug, Clone)]
pub struct VectorizeResult {
    pub plan: ScalePlan,
    /// Zone label per output pixel, 0 for background
    pub labels: Array2<u32>,
    pub regions: Vec<Region>,
}

/// Boundary edge direction in pixel-corner space (rows grow downwards)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    East,
    South,
    West,
    North,
}

impl Dir {
    fn left(self) -> Dir {
        match self {
            Dir::East => Dir::North,
            Dir::North => Dir::West,
            Dir::West => Dir::South,
            Dir::South => Dir::East,
        }
    }

    fn right(self) -> Dir {
        match self {
            Dir::East => Dir::South,
            Dir::South => Dir::West,
            Dir::West => Dir::North,
            Dir::North => Dir::East,
        }
    }

    fn step(self, (x, y): (usize, usize)) -> (usize, usize) {
        match self {
            Dir::East => (x + 1, y),
            Dir::South => (x, y + 1),
            Dir::West => (x - 1, y),
            Dir::North => (x, y - 1),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: (usize, usize),
    dir: Dir,
}

impl Edge {
    fn to(&self) -> (usize, usize) {
        self.dir.step(self.from)
    }
}

/// Converts a boolean flood mask into polygon regions
#[derive(Debug, Clone)]
pub struct Vectorizer {
    params: VectorizeParams,
}

impl Vectorizer {
    pub fn new(params: VectorizeParams) -> Self {
        Self { params }
    }

    /// Choose the output grid, coarsening when the pixel budget is exceeded
    pub fn plan_scale(&self, grid: &GridSpec) -> FloodResult<ScalePlan> {
        let native_m = grid.nominal_pixel_size_m();
        if !(native_m > 0.0) || !native_m.is_finite() {
            return Err(FloodError::InvalidInput(format!(
                "Grid has no usable pixel size ({} m)",
                native_m
            )));
        }

        let base_factor = ((self.params.scale_m / native_m).round() as usize).max(1);
        let budget = self.params.max_pixels;
        let mut factor = base_factor;
        let mut steps = 0u32;

        loop {
            let output = grid.coarsened(factor);
            if output.pixel_count() <= budget {
                let plan = ScalePlan {
                    factor,
                    scale_m: self.params.scale_m * 2f64.powi(steps as i32),
                    degrade_steps: steps,
                    grid: output,
                };
                if plan.degraded() {
                    log::warn!(
                        "Pixel budget {} exceeded at {} m; degraded to {} m ({} output pixels)",
                        budget,
                        self.params.scale_m,
                        plan.scale_m,
                        output.pixel_count()
                    );
                }
                return Ok(plan);
            }

            if !self.params.best_effort {
                return Err(FloodError::ResourceExhausted(format!(
                    "{} output pixels exceed the budget of {} and best effort is disabled",
                    output.pixel_count(),
                    budget
                )));
            }

            let exhausted = steps >= self.params.max_degrade_steps
                || (output.rows <= 1 && output.cols <= 1);
            if exhausted {
                return Err(FloodError::ResourceExhausted(format!(
                    "cannot fit {} output pixels into a budget of {} after {} degrade steps",
                    output.pixel_count(),
                    budget,
                    steps
                )));
            }

            factor *= 2;
            steps += 1;
        }
    }

    /// Convert the mask into labelled polygon regions
    pub fn vectorize(&self, mask: &Mask) -> FloodResult<VectorizeResult> {
        let plan = self.plan_scale(&mask.grid)?;
        log::info!(
            "Converting to vectors (scale {} m, factor {}, {}x{} output pixels)",
            plan.scale_m,
            plan.factor,
            plan.grid.rows,
            plan.grid.cols
        );

        let coarse = coarsen(mask, plan.factor);
        let (labels, zones) = label_zones(&coarse);
        log::debug!("Found {} 4-connected zones", zones.len());

        let transform = plan.grid.transform;
        let trace = |(index, pixels): (usize, &Vec<(usize, usize)>)| -> Option<Region> {
            let label = index as u32 + 1;
            match trace_zone(&labels, label, pixels) {
                Some(rings) => {
                    let geometry = rings_to_geometry(rings, |x, y| {
                        let (lon, lat) = transform.pixel_to_geo(x as f64, y as f64);
                        Coord { x: lon, y: lat }
                    });
                    Some(Region {
                        label,
                        pixel_count: pixels.len(),
                        geometry,
                    })
                }
                None => {
                    log::warn!("Zone {} has an open boundary; skipping", label);
                    None
                }
            }
        };

        #[cfg(feature = "parallel")]
        let traced: Vec<Option<Region>> = zones.par_iter().enumerate().map(trace).collect();
        #[cfg(not(feature = "parallel"))]
        let traced: Vec<Option<Region>> = zones.iter().enumerate().map(trace).collect();

        let regions: Vec<Region> = traced.into_iter().flatten().collect();

        Ok(VectorizeResult {
            plan,
            labels,
            regions,
        })
    }
}

impl Default for Vectorizer {
    fn default() -> Self {
        Self::new(VectorizeParams::default())
    }
}

/// Aggregate `factor` x `factor` blocks; a block is set when at least half its pixels are
pub fn coarsen(mask: &Mask, factor: usize) -> Mask {
    if factor <= 1 {
        return mask.clone();
    }

    let grid = mask.grid.coarsened(factor);
    let (height, width) = mask.dim();
    let data = Array2::from_shape_fn(grid.dim(), |(bi, bj)| {
        let i_start = bi * factor;
        let j_start = bj * factor;
        let i_end = (i_start + factor).min(height);
        let j_end = (j_start + factor).min(width);
        let block = mask.data.slice(ndarray::s![i_start..i_end, j_start..j_end]);
        let set = block.iter().filter(|&&v| v).count();
        2 * set >= block.len() && set > 0
    });

    Mask { data, grid }
}

/// Label 4-connected zones in raster scan order.
///
/// Returns the label array (0 = background) and the pixel list of every zone;
/// zone `k` carries label `k + 1`.
pub fn label_zones(mask: &Mask) -> (Array2<u32>, Vec<Vec<(usize, usize)>>) {
    let (height, width) = mask.dim();
    let mut labels = Array2::<u32>::zeros((height, width));
    let mut zones: Vec<Vec<(usize, usize)>> = Vec::new();

    for i in 0..height {
        for j in 0..width {
            if !mask.data[[i, j]] || labels[[i, j]] != 0 {
                continue;
            }

            let label = zones.len() as u32 + 1;
            let mut pixels = Vec::new();
            let mut stack = vec![(i, j)];
            labels[[i, j]] = label;

            while let Some((ci, cj)) = stack.pop() {
                pixels.push((ci, cj));
                let neighbors = [
                    (ci.wrapping_sub(1), cj),
                    (ci + 1, cj),
                    (ci, cj.wrapping_sub(1)),
                    (ci, cj + 1),
                ];
                for (ni, nj) in neighbors {
                    if ni < height && nj < width && mask.data[[ni, nj]] && labels[[ni, nj]] == 0 {
                        labels[[ni, nj]] = label;
                        stack.push((ni, nj));
                    }
                }
            }

            pixels.sort_unstable();
            zones.push(pixels);
        }
    }

    (labels, zones)
}

/// Trace the boundary rings of one zone in pixel-corner coordinates (x = col, y = row).
///
/// Rings keep the zone on their right-hand side, so exteriors have positive
/// shoelace area in this frame and holes negative. Where two zone pixels touch
/// only at a corner the walk turns left, joining them at that vertex.
fn trace_zone(labels: &Array2<u32>, label: u32, pixels: &[(usize, usize)]) -> Option<Vec<Vec<(usize, usize)>>> {
    let (height, width) = labels.dim();
    let inside = |i: isize, j: isize| -> bool {
        i >= 0 && j >= 0 && (i as usize) < height && (j as usize) < width && labels[[i as usize, j as usize]] == label
    };

    let mut edges: Vec<Edge> = Vec::with_capacity(pixels.len() * 2);
    for &(r, c) in pixels {
        let (ri, ci) = (r as isize, c as isize);
        if !inside(ri - 1, ci) {
            edges.push(Edge { from: (c, r), dir: Dir::East });
        }
        if !inside(ri, ci + 1) {
            edges.push(Edge { from: (c + 1, r), dir: Dir::South });
        }
        if !inside(ri + 1, ci) {
            edges.push(Edge { from: (c + 1, r + 1), dir: Dir::West });
        }
        if !inside(ri, ci - 1) {
            edges.push(Edge { from: (c, r + 1), dir: Dir::North });
        }
    }

    let mut outgoing: HashMap<(usize, usize), Vec<usize>> = HashMap::with_capacity(edges.len());
    for (index, edge) in edges.iter().enumerate() {
        outgoing.entry(edge.from).or_default().push(index);
    }

    let next_edge = |current: usize| -> Option<usize> {
        let edge = edges[current];
        let candidates = outgoing.get(&edge.to())?;
        if candidates.len() == 1 {
            return Some(candidates[0]);
        }
        for preferred in [edge.dir.left(), edge.dir, edge.dir.right()] {
            if let Some(&found) = candidates.iter().find(|&&k| edges[k].dir == preferred) {
                return Some(found);
            }
        }
        None
    };

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }

        let mut ring = Vec::new();
        let mut current = start;
        let mut steps = 0usize;
        loop {
            used[current] = true;
            let next = next_edge(current)?;
            if edges[next].dir != edges[current].dir {
                ring.push(edges[current].to());
            }
            if next == start {
                break;
            }
            steps += 1;
            if steps > edges.len() || used[next] {
                return None;
            }
            current = next;
        }
        rings.push(ring);
    }

    Some(rings)
}

/// Twice the signed shoelace area of a closed ring in pixel-corner space
fn doubled_area(ring: &[(usize, usize)]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|k| {
            let (x0, y0) = ring[k];
            let (x1, y1) = ring[(k + 1) % n];
            x0 as i64 * y1 as i64 - x1 as i64 * y0 as i64
        })
        .sum()
}

fn ring_bounds(ring: &[(usize, usize)]) -> (usize, usize, usize, usize) {
    ring.iter().fold(
        (usize::MAX, usize::MAX, 0, 0),
        |(min_x, min_y, max_x, max_y), &(x, y)| (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)),
    )
}

/// Assemble traced rings into oriented polygons, assigning each hole to the
/// smallest exterior whose bounds contain it
fn rings_to_geometry<F>(rings: Vec<Vec<(usize, usize)>>, to_geo: F) -> MultiPolygon<f64>
where
    F: Fn(usize, usize) -> Coord<f64>,
{
    let mut exteriors: Vec<(Vec<(usize, usize)>, i64)> = Vec::new();
    let mut holes: Vec<Vec<(usize, usize)>> = Vec::new();
    for ring in rings {
        let area = doubled_area(&ring);
        if area > 0 {
            exteriors.push((ring, area));
        } else if area < 0 {
            holes.push(ring);
        }
    }

    let mut interiors: Vec<Vec<Vec<(usize, usize)>>> = vec![Vec::new(); exteriors.len()];
    for hole in holes {
        let (hx0, hy0, hx1, hy1) = ring_bounds(&hole);
        let owner = exteriors
            .iter()
            .enumerate()
            .filter(|(_, (ext, _))| {
                let (ex0, ey0, ex1, ey1) = ring_bounds(ext);
                ex0 <= hx0 && ey0 <= hy0 && ex1 >= hx1 && ey1 >= hy1
            })
            .min_by_key(|(_, (_, area))| *area)
            .map(|(k, _)| k);
        if let Some(k) = owner {
            interiors[k].push(hole);
        }
    }

    let to_line = |ring: &[(usize, usize)]| -> LineString<f64> {
        LineString::from(ring.iter().map(|&(x, y)| to_geo(x, y)).collect::<Vec<_>>())
    };

    let polygons: Vec<Polygon<f64>> = exteriors
        .iter()
        .zip(interiors.iter())
        .map(|((ext, _), holes)| {
            Polygon::new(to_line(ext), holes.iter().map(|h| to_line(h)).collect()).orient(Direction::Default)
        })
        .collect();

    MultiPolygon::new(polygons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, METERS_PER_DEGREE_LAT, METERS_PER_DEGREE_LON};
    use geo::Area;

    fn grid_500m(rows: usize, cols: usize) -> GridSpec {
        GridSpec::new(
            rows,
            cols,
            GeoTransform::north_up(0.0, 0.0, 500.0 / METERS_PER_DEGREE_LON, 500.0 / METERS_PER_DEGREE_LAT),
        )
    }

    fn mask_from(rows: &[&str]) -> Mask {
        let h = rows.len();
        let w = rows[0].len();
        let data = Array2::from_shape_fn((h, w), |(i, j)| rows[i].as_bytes()[j] == b'#');
        Mask::new(data, grid_500m(h, w)).unwrap()
    }

    fn pixel_area(region: &Region, grid: &GridSpec) -> f64 {
        let cell = (grid.transform.pixel_width * grid.transform.pixel_height).abs();
        region.geometry.unsigned_area() / cell
    }

    #[test]
    fn test_four_connectivity_splits_diagonals() {
        let mask = mask_from(&["#.", ".#"]);
        let result = Vectorizer::default().vectorize(&mask).unwrap();
        assert_eq!(result.regions.len(), 2);
        assert_eq!(result.labels[[0, 0]], 1);
        assert_eq!(result.labels[[1, 1]], 2);
    }

    #[test]
    fn test_polygon_area_matches_pixels() {
        let mask = mask_from(&[".....", ".###.", ".#.#.", ".###.", "....."]);
        let result = Vectorizer::default().vectorize(&mask).unwrap();
        assert_eq!(result.regions.len(), 1);

        let region = &result.regions[0];
        assert_eq!(region.pixel_count, 8);
        assert_eq!(region.geometry.0.len(), 1);
        assert_eq!(region.geometry.0[0].interiors().len(), 1);
        assert!((pixel_area(region, &result.plan.grid) - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_pinched_zone_stays_single_polygon() {
        // The hole touches the outer boundary diagonally at one vertex
        let mask = mask_from(&["###.", "#.#.", "##.#", "...#"]);
        let (labels, zones) = label_zones(&mask);
        assert_eq!(zones.len(), 2);
        assert_eq!(labels[[3, 3]], 2);

        let result = Vectorizer::default().vectorize(&mask).unwrap();
        let first = &result.regions[0];
        assert_eq!(first.pixel_count, 7);
        assert!((pixel_area(first, &result.plan.grid) - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_collinear_vertices_removed() {
        let mask = mask_from(&["####", "####"]);
        let result = Vectorizer::default().vectorize(&mask).unwrap();
        let exterior = result.regions[0].geometry.0[0].exterior();
        // Four corners plus the closing point
        assert_eq!(exterior.0.len(), 5);
    }

    #[test]
    fn test_coarsen_majority() {
        let mask = mask_from(&["##..", "#...", "....", "...#"]);
        let coarse = coarsen(&mask, 2);
        assert_eq!(coarse.dim(), (2, 2));
        assert_eq!(coarse.data, ndarray::arr2(&[[true, false], [false, false]]));
    }

    #[test]
    fn test_best_effort_degrade_is_deterministic() {
        let grid = grid_500m(100, 100);
        let vectorizer = Vectorizer::new(VectorizeParams {
            max_pixels: 700,
            ..VectorizeParams::default()
        });
        let plan = vectorizer.plan_scale(&grid).unwrap();
        assert_eq!(plan.factor, 4);
        assert_eq!(plan.degrade_steps, 2);
        assert_eq!(plan.grid.dim(), (25, 25));
        assert!((plan.scale_m - 2000.0).abs() < 1e-9);
        assert_eq!(vectorizer.plan_scale(&grid).unwrap(), plan);
    }

    #[test]
    fn test_budget_failures() {
        let grid = grid_500m(100, 100);
        let strict = Vectorizer::new(VectorizeParams {
            max_pixels: 700,
            best_effort: false,
            ..VectorizeParams::default()
        });
        assert!(matches!(strict.plan_scale(&grid), Err(FloodError::ResourceExhausted(_))));

        let impossible = Vectorizer::new(VectorizeParams {
            max_pixels: 0,
            ..VectorizeParams::default()
        });
        assert!(matches!(impossible.plan_scale(&grid), Err(FloodError::ResourceExhausted(_))));
    }

    #[test]
    fn test_native_resolution_factor() {
        let grid = GridSpec::new(
            50,
            50,
            GeoTransform::north_up(0.0, 0.0, 100.0 / METERS_PER_DEGREE_LON, 100.0 / METERS_PER_DEGREE_LAT),
        );
        let plan = Vectorizer::default().plan_scale(&grid).unwrap();
        assert_eq!(plan.factor, 5);
        assert_eq!(plan.grid.dim(), (10, 10));
        assert!(!plan.degraded());
    }
}
