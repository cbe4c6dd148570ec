use approx::assert_relative_eq;
use ndarray::Array2;
use sarflood::config::{ConnectivityParams, FloodConfig, OutputMode};
use sarflood::core::masking::TerrainLayer;
use sarflood::core::FloodOutput;
use sarflood::io::SourceRasters;
use sarflood::types::{GeoTransform, GridSpec, Raster, METERS_PER_DEGREE_LAT, METERS_PER_DEGREE_LON};
use sarflood::FloodPipeline;

const SIZE: usize = 30;
const BLOB: std::ops::Range<usize> = 10..20;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 500 m geographic pixels just north of the equator
fn transform() -> GeoTransform {
    GeoTransform::north_up(
        76.0,
        0.07,
        500.0 / METERS_PER_DEGREE_LON,
        500.0 / METERS_PER_DEGREE_LAT,
    )
}

/// A 10x10 pixel blob darkening from -10 dB to -40 dB between windows
fn blob_inputs() -> SourceRasters {
    let before = Array2::from_elem((SIZE, SIZE), -10.0f32);
    let after = Array2::from_shape_fn((SIZE, SIZE), |(i, j)| {
        if BLOB.contains(&i) && BLOB.contains(&j) {
            -40.0
        } else {
            -10.0
        }
    });
    SourceRasters {
        before: Raster::new(before, transform()),
        after: Raster::new(after, transform()),
        water_occurrence: Raster::no_data(GridSpec::new(SIZE, SIZE, transform())),
        terrain: TerrainLayer::Slope(Raster::filled(GridSpec::new(SIZE, SIZE, transform()), 0.0)),
    }
}

#[test]
fn test_blob_yields_single_feature() {
    init_logging();

    let pipeline = FloodPipeline::new(FloodConfig::default()).expect("Failed to build pipeline");
    let report = pipeline.process_rasters(&blob_inputs()).expect("Pipeline run failed");

    assert_eq!(report.stats.change_candidates, 100);
    assert_eq!(report.stats.after_cluster_filter, 100);
    assert_eq!(report.stats.regions, 1);
    assert_eq!(report.features.len(), 1);

    let feature = &report.features[0];
    assert_relative_eq!(feature.area_sqkm, 25.0, max_relative = 0.005);
    assert_eq!(feature.pixel_count, 100);

    // Geometric centre of the blob
    let (lon, lat) = transform().pixel_to_geo(15.0, 15.0);
    assert_relative_eq!(feature.longitude, lon, epsilon = 1e-9);
    assert_relative_eq!(feature.latitude, lat, epsilon = 1e-9);
    assert_eq!(feature.date, FloodConfig::default().reference_date);

    match &report.output {
        FloodOutput::Centroids(rows) => assert_eq!(rows[0].polygon_id, feature.polygon_id),
        other => panic!("expected centroid rows, got {:?}", other),
    }
}

#[test]
fn test_polygon_mode_keeps_geometry() {
    init_logging();

    let config = FloodConfig {
        output_mode: OutputMode::Polygon,
        ..FloodConfig::default()
    };
    let report = FloodPipeline::new(config)
        .expect("Failed to build pipeline")
        .process_rasters(&blob_inputs())
        .expect("Pipeline run failed");

    match &report.output {
        FloodOutput::Polygons(features) => {
            assert_eq!(features.len(), 1);
            assert_eq!(features[0].properties.zone, 1);
            assert_eq!(features[0].geometry.0.len(), 1);
        }
        other => panic!("expected polygons, got {:?}", other),
    }
}

#[test]
fn test_area_threshold_excludes_blob() {
    init_logging();

    let mut config = FloodConfig::default();
    config.enrichment.min_area_sqkm = Some(30.0);
    let report = FloodPipeline::new(config)
        .expect("Failed to build pipeline")
        .process_rasters(&blob_inputs())
        .expect("Pipeline run failed");

    assert!(report.features.is_empty());
    assert_eq!(report.stats.dropped_small, 1);
}

#[test]
fn test_runs_are_bit_identical() {
    init_logging();

    let pipeline = FloodPipeline::new(FloodConfig::default()).expect("Failed to build pipeline");
    let mut inputs = blob_inputs();
    // A second, L-shaped region
    for i in 22..28 {
        for j in 2..6 {
            inputs.after.data[[i, j]] = -40.0;
        }
    }
    for j in 6..12 {
        for i in 25..28 {
            inputs.after.data[[i, j]] = -40.0;
        }
    }

    let first = pipeline.process_rasters(&inputs).expect("First run failed");
    let second = pipeline.process_rasters(&inputs).expect("Second run failed");
    assert!(first.features.len() >= 2);
    assert_eq!(first.features, second.features);
    assert_eq!(first.stats, second.stats);
}

#[test]
fn test_raising_connected_pixels_never_grows_mask() {
    init_logging();

    let mut inputs = blob_inputs();
    // Scattered small flooded patches of varying sizes
    let mut state: u64 = 7;
    for _ in 0..120 {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let i = (state >> 33) as usize % SIZE;
        let j = (state >> 17) as usize % SIZE;
        inputs.after.data[[i, j]] = -40.0;
    }

    let mut previous = usize::MAX;
    for connected_pixels in [1, 5, 10, 17, 20, 25, 26] {
        let config = FloodConfig {
            connectivity: ConnectivityParams {
                connected_pixels,
                max_cluster_scan: 25,
            },
            ..FloodConfig::default()
        };
        let pipeline = FloodPipeline::new(config).expect("Failed to build pipeline");
        let stages = pipeline.flood_mask(&inputs).expect("Mask stages failed");
        let kept = stages.cleaned.count();
        assert!(kept <= previous, "{} pixels kept at {}", kept, connected_pixels);
        previous = kept;
    }
    assert_eq!(previous, 0);
}

#[test]
fn test_degrade_keeps_run_alive() {
    init_logging();

    let mut config = FloodConfig::default();
    config.vectorize.max_pixels = 300;
    let report = FloodPipeline::new(config)
        .expect("Failed to build pipeline")
        .process_rasters(&blob_inputs())
        .expect("Degraded run failed");

    assert_eq!(report.stats.degrade_steps, 1);
    assert_relative_eq!(report.stats.scale_m, 1000.0);
    assert_eq!(report.features.len(), 1);
    assert_relative_eq!(report.features[0].area_sqkm, 25.0, max_relative = 0.005);
}
