use crate::config::{EnrichmentParams, OutputMode};
use crate::core::vectorize::Region;
use crate::types::{FloodError, FloodResult, METERS_PER_DEGREE_LAT};
use chrono::NaiveDate;
use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{Centroid, GeodesicArea, Line, LineString, MultiPolygon, Polygon, Simplify};
use serde::Serialize;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A flooded region with geodesic measurements and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct FloodFeature {
    /// Stable identifier derived from the acquisition date and zone label
    pub polygon_id: String,
    /// Zone label assigned during vectorization
    pub zone: u32,
    pub longitude: f64,
    pub latitude: f64,
    pub area_sqkm: f64,
    /// End of the "after" window
    pub date: NaiveDate,
    /// Output pixels in the zone
    pub pixel_count: usize,
    /// Boundary geometry; discarded in centroid mode
    pub geometry: Option<MultiPolygon<f64>>,
}

/// Tabular centroid row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CentroidRecord {
    pub polygon_id: String,
    pub longitude: f64,
    pub latitude: f64,
    pub area_sqkm: f64,
    pub date: NaiveDate,
}

/// Properties attached to a polygon feature
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolygonProperties {
    pub area_sqkm: f64,
    pub date: NaiveDate,
    pub polygon_id: String,
    pub zone: u32,
}

/// Polygon geometry with its properties
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFeature {
    pub geometry: MultiPolygon<f64>,
    pub properties: PolygonProperties,
}

/// Stage output in the configured shape
#[derive(Debug, Clone, PartialEq)]
pub enum FloodOutput {
    Centroids(Vec<CentroidRecord>),
    Polygons(Vec<PolygonFeature>),
}

impl FloodOutput {
    /// Shape enriched features for the given output mode
    pub fn from_features(mode: OutputMode, features: &[FloodFeature]) -> Self {
        match mode {
            OutputMode::Centroid => FloodOutput::Centroids(
                features
                    .iter()
                    .map(|f| CentroidRecord {
                        polygon_id: f.polygon_id.clone(),
                        longitude: f.longitude,
                        latitude: f.latitude,
                        area_sqkm: f.area_sqkm,
                        date: f.date,
                    })
                    .collect(),
            ),
            OutputMode::Polygon => FloodOutput::Polygons(
                features
                    .iter()
                    .filter_map(|f| {
                        f.geometry.as_ref().map(|geometry| PolygonFeature {
                            geometry: geometry.clone(),
                            properties: PolygonProperties {
                                area_sqkm: f.area_sqkm,
                                date: f.date,
                                polygon_id: f.polygon_id.clone(),
                                zone: f.zone,
                            },
                        })
                    })
                    .collect(),
            ),
        }
    }

    /// Centroid rows, or `InvalidInput` when the output holds polygons
    pub fn centroid_rows(&self) -> FloodResult<&[CentroidRecord]> {
        match self {
            FloodOutput::Centroids(rows) => Ok(rows),
            FloodOutput::Polygons(_) => Err(FloodError::InvalidInput(
                "output holds polygon features; set output_mode to \"centroid\" for centroid rows".to_string(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FloodOutput::Centroids(rows) => rows.len(),
            FloodOutput::Polygons(features) => features.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counts of regions removed by the area filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentStats {
    pub dropped_small: usize,
    pub dropped_degenerate: usize,
}

enum Outcome {
    Kept(FloodFeature),
    Small,
    Degenerate,
}

/// Geodesic area filter and metadata enrichment
#[derive(Debug, Clone)]
pub struct AreaFilter {
    params: EnrichmentParams,
    output_mode: OutputMode,
    min_area_sqkm: f64,
}

impl AreaFilter {
    pub fn new(params: EnrichmentParams, output_mode: OutputMode) -> Self {
        let min_area_sqkm = params
            .min_area_sqkm
            .unwrap_or_else(|| output_mode.default_min_area_sqkm());
        Self {
            params,
            output_mode,
            min_area_sqkm,
        }
    }

    pub fn min_area_sqkm(&self) -> f64 {
        self.min_area_sqkm
    }

    /// Geodesic area (m²) and centroid (lon, lat) within the distance tolerance.
    ///
    /// When simplification folds a ring over itself the traced boundary is
    /// measured instead. Returns `None` for empty, zero-area or
    /// self-intersecting geometry.
    pub fn measure(&self, geometry: &MultiPolygon<f64>) -> Option<(f64, (f64, f64))> {
        let epsilon = self.params.max_error_m / METERS_PER_DEGREE_LAT;
        let simplified = if epsilon > 0.0 {
            geometry.simplify(&epsilon)
        } else {
            geometry.clone()
        };

        let shape = if is_simple_shape(&simplified) {
            simplified
        } else if is_simple_shape(geometry) {
            log::debug!("Simplified boundary self-intersects; measuring traced boundary");
            geometry.clone()
        } else {
            return None;
        };

        let area_m2 = shape.geodesic_area_unsigned();
        let centroid = shape.centroid()?;
        if !(area_m2 > 0.0) || !area_m2.is_finite() || !centroid.x().is_finite() || !centroid.y().is_finite() {
            return None;
        }

        Some((area_m2, (centroid.x(), centroid.y())))
    }

    fn enrich_region(&self, region: &Region, date: NaiveDate) -> Outcome {
        let Some((area_m2, (longitude, latitude))) = self.measure(&region.geometry) else {
            return Outcome::Degenerate;
        };

        let area_sqkm = area_m2 / 1e6;
        if area_sqkm <= self.min_area_sqkm {
            return Outcome::Small;
        }

        let geometry = match self.output_mode {
            OutputMode::Polygon => Some(region.geometry.clone()),
            OutputMode::Centroid => None,
        };

        Outcome::Kept(FloodFeature {
            polygon_id: format!("{}-{}", date.format("%Y%m%d"), region.label),
            zone: region.label,
            longitude,
            latitude,
            area_sqkm,
            date,
            pixel_count: region.pixel_count,
            geometry,
        })
    }

    /// Measure every region, drop those at or below the minimum area, attach metadata
    pub fn apply(&self, regions: &[Region], date: NaiveDate) -> (Vec<FloodFeature>, EnrichmentStats) {
        log::info!(
            "Filtering {} regions smaller than {} sqkm",
            regions.len(),
            self.min_area_sqkm
        );

        #[cfg(feature = "parallel")]
        let outcomes: Vec<Outcome> = regions.par_iter().map(|r| self.enrich_region(r, date)).collect();
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<Outcome> = regions.iter().map(|r| self.enrich_region(r, date)).collect();

        let mut stats = EnrichmentStats::default();
        let mut features = Vec::with_capacity(outcomes.len());
        for (region, outcome) in regions.iter().zip(outcomes) {
            match outcome {
                Outcome::Kept(feature) => features.push(feature),
                Outcome::Small => stats.dropped_small += 1,
                Outcome::Degenerate => {
                    log::warn!("Dropping degenerate geometry for zone {}", region.label);
                    stats.dropped_degenerate += 1;
                }
            }
        }

        log::info!(
            "Retained {} features ({} too small, {} degenerate)",
            features.len(),
            stats.dropped_small,
            stats.dropped_degenerate
        );
        (features, stats)
    }
}

/// Non-empty polygons with closed rings that neither cross themselves nor each other
fn is_simple_shape(geometry: &MultiPolygon<f64>) -> bool {
    !geometry.0.is_empty() && geometry.0.iter().all(is_simple_polygon)
}

fn is_simple_polygon(polygon: &Polygon<f64>) -> bool {
    let rings: Vec<Vec<Line<f64>>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring_segments)
        .collect();

    if rings[0].len() < 3 || rings.iter().any(|r| !ring_is_simple(r)) {
        return false;
    }

    // Rings may touch at a vertex but never cross
    for (i, a) in rings.iter().enumerate() {
        for b in &rings[i + 1..] {
            let crosses = a.iter().any(|p| {
                b.iter().any(|q| match line_intersection(*p, *q) {
                    Some(LineIntersection::SinglePoint { is_proper, .. }) => is_proper,
                    Some(LineIntersection::Collinear { .. }) => true,
                    None => false,
                })
            });
            if crosses {
                return false;
            }
        }
    }
    true
}

/// Segments of a ring with repeated vertices skipped
fn ring_segments(ring: &LineString<f64>) -> Vec<Line<f64>> {
    ring.lines().filter(|l| l.start != l.end).collect()
}

fn ring_is_simple(segments: &[Line<f64>]) -> bool {
    let n = segments.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(segments[i], segments[j]) {
                None => {}
                // Neighbours share exactly one vertex
                Some(LineIntersection::SinglePoint { is_proper: false, .. }) if adjacent => {}
                Some(_) => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::METERS_PER_DEGREE_LON;

    /// Axis-aligned square of `side_m` metres with its south-west corner at (lon, lat)
    fn square_region(label: u32, lon: f64, lat: f64, side_m: f64) -> Region {
        let dlon = side_m / METERS_PER_DEGREE_LON;
        let dlat = side_m / METERS_PER_DEGREE_LAT;
        let ring = LineString::from(vec![
            (lon, lat),
            (lon + dlon, lat),
            (lon + dlon, lat + dlat),
            (lon, lat + dlat),
            (lon, lat),
        ]);
        Region {
            label,
            pixel_count: 1,
            geometry: MultiPolygon::new(vec![Polygon::new(ring, vec![])]),
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 8, 15).unwrap()
    }

    #[test]
    fn test_geodesic_area_of_square() {
        let filter = AreaFilter::new(EnrichmentParams::default(), OutputMode::Centroid);
        let region = square_region(1, 0.0, 0.0, 1000.0);
        let (area, (lon, lat)) = filter.measure(&region.geometry).unwrap();
        assert!((area / 1e6 - 1.0).abs() < 0.01, "area {}", area);
        assert!((lon - 500.0 / METERS_PER_DEGREE_LON).abs() < 1e-9);
        assert!((lat - 500.0 / METERS_PER_DEGREE_LAT).abs() < 1e-9);
    }

    #[test]
    fn test_area_threshold_is_strict() {
        let region = square_region(3, 76.0, 0.0, 1000.0);
        let reference = AreaFilter::new(EnrichmentParams::default(), OutputMode::Centroid);
        let (area, _) = reference.measure(&region.geometry).unwrap();
        let exact = area / 1e6;

        let at_threshold = AreaFilter::new(
            EnrichmentParams {
                min_area_sqkm: Some(exact),
                ..EnrichmentParams::default()
            },
            OutputMode::Centroid,
        );
        let (kept, stats) = at_threshold.apply(&[region.clone()], date());
        assert!(kept.is_empty());
        assert_eq!(stats.dropped_small, 1);

        let below = AreaFilter::new(
            EnrichmentParams {
                min_area_sqkm: Some(exact * 0.999),
                ..EnrichmentParams::default()
            },
            OutputMode::Centroid,
        );
        let (kept, _) = below.apply(&[region], date());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].polygon_id, "20190815-3");
        assert!(kept[0].geometry.is_none());
    }

    #[test]
    fn test_mode_defaults_and_output_shape() {
        // 0.5 km² survives centroid mode (0.05) but not polygon mode (1.0)
        let regions = vec![square_region(1, 75.0, 12.0, 707.0), square_region(2, 75.1, 12.0, 2000.0)];

        let centroid = AreaFilter::new(EnrichmentParams::default(), OutputMode::Centroid);
        let (features, _) = centroid.apply(&regions, date());
        assert_eq!(features.len(), 2);
        match FloodOutput::from_features(OutputMode::Centroid, &features) {
            FloodOutput::Centroids(rows) => assert_eq!(rows[1].polygon_id, "20190815-2"),
            other => panic!("unexpected output {:?}", other),
        }

        let polygon = AreaFilter::new(EnrichmentParams::default(), OutputMode::Polygon);
        let (features, stats) = polygon.apply(&regions, date());
        assert_eq!(features.len(), 1);
        assert_eq!(stats.dropped_small, 1);
        match FloodOutput::from_features(OutputMode::Polygon, &features) {
            FloodOutput::Polygons(polys) => {
                assert_eq!(polys[0].properties.zone, 2);
                assert_eq!(polys[0].properties.date, date());
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_centroid_rows_only_for_centroid_output() {
        let regions = vec![square_region(7, 75.0, 12.0, 2000.0)];
        let (features, _) = AreaFilter::new(EnrichmentParams::default(), OutputMode::Polygon).apply(&regions, date());

        let centroids = FloodOutput::from_features(OutputMode::Centroid, &features);
        let rows = centroids.centroid_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].polygon_id, "20190815-7");

        let polygons = FloodOutput::from_features(OutputMode::Polygon, &features);
        assert!(matches!(polygons.centroid_rows(), Err(FloodError::InvalidInput(_))));
    }

    #[test]
    fn test_degenerate_geometry_dropped() {
        let flat = Region {
            label: 9,
            pixel_count: 0,
            geometry: MultiPolygon::new(vec![Polygon::new(
                LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)]),
                vec![],
            )]),
        };
        let filter = AreaFilter::new(EnrichmentParams::default(), OutputMode::Polygon);
        let (features, stats) = filter.apply(&[flat], date());
        assert!(features.is_empty());
        assert_eq!(stats.dropped_degenerate, 1);
    }

    #[test]
    fn test_self_intersecting_geometry_dropped() {
        let bowtie = Region {
            label: 4,
            pixel_count: 16,
            geometry: MultiPolygon::new(vec![Polygon::new(
                LineString::from(vec![(0.0, 0.0), (0.02, 0.02), (0.02, 0.0), (0.0, 0.01), (0.0, 0.0)]),
                vec![],
            )]),
        };
        let filter = AreaFilter::new(EnrichmentParams::default(), OutputMode::Polygon);
        assert!(filter.measure(&bowtie.geometry).is_none());

        let (features, stats) = filter.apply(&[bowtie, square_region(5, 1.0, 0.0, 2000.0)], date());
        assert_eq!(stats.dropped_degenerate, 1);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].zone, 5);
    }

    #[test]
    fn test_ring_with_hole_touching_at_vertex_is_simple() {
        let exterior = LineString::from(vec![(0.0, 0.0), (3.0, 0.0), (3.0, 3.0), (0.0, 3.0), (0.0, 0.0)]);
        let touching = LineString::from(vec![(1.0, 1.0), (3.0, 1.5), (1.0, 2.0), (1.0, 1.0)]);
        assert!(is_simple_shape(&MultiPolygon::new(vec![Polygon::new(exterior.clone(), vec![touching])])));

        // Collinear vertices along a straight edge
        assert!(is_simple_shape(&MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (2.0, 1.0), (0.0, 0.0)]),
            vec![],
        )])));

        let escaping = LineString::from(vec![(2.0, 1.0), (4.0, 1.0), (4.0, 2.0), (2.0, 2.0), (2.0, 1.0)]);
        assert!(!is_simple_shape(&MultiPolygon::new(vec![Polygon::new(exterior, vec![escaping])])));
    }
}
