//! CSV and GeoJSON sinks for enriched flood features

use crate::core::enrichment::{CentroidRecord, FloodOutput, PolygonFeature};
use crate::types::FloodResult;
use geo::{LineString, MultiPolygon};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write centroid rows with header `polygon_id,longitude,latitude,area_sqkm,date`
pub fn write_centroids_csv<W: Write>(writer: W, rows: &[CentroidRecord]) -> FloodResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    if rows.is_empty() {
        wtr.write_record(["polygon_id", "longitude", "latitude", "area_sqkm", "date"])?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn ring_coordinates(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

/// GeoJSON `MultiPolygon` geometry object
pub fn multipolygon_to_geojson(geometry: &MultiPolygon<f64>) -> Value {
    let polygons: Vec<Value> = geometry
        .iter()
        .map(|polygon| {
            let mut rings = vec![ring_coordinates(polygon.exterior())];
            rings.extend(polygon.interiors().iter().map(ring_coordinates));
            Value::Array(rings)
        })
        .collect();
    json!({
        "type": "MultiPolygon",
        "coordinates": polygons,
    })
}

/// RFC 7946 FeatureCollection for polygon features
pub fn feature_collection(features: &[PolygonFeature]) -> FloodResult<Value> {
    let features = features
        .iter()
        .map(|f| {
            Ok(json!({
                "type": "Feature",
                "id": f.properties.polygon_id,
                "geometry": multipolygon_to_geojson(&f.geometry),
                "properties": serde_json::to_value(&f.properties)?,
            }))
        })
        .collect::<FloodResult<Vec<Value>>>()?;
    Ok(json!({
        "type": "FeatureCollection",
        "features": features,
    }))
}

pub fn write_polygons_geojson<W: Write>(mut writer: W, features: &[PolygonFeature]) -> FloodResult<()> {
    let collection = feature_collection(features)?;
    serde_json::to_writer(&mut writer, &collection)?;
    writer.flush()?;
    Ok(())
}

/// Write the payload to `path` as CSV (centroids) or GeoJSON (polygons)
pub fn write_features<P: AsRef<Path>>(path: P, output: &FloodOutput) -> FloodResult<()> {
    log::info!("Writing {} features to: {}", output.len(), path.as_ref().display());
    let writer = BufWriter::new(File::create(path.as_ref())?);
    match output {
        FloodOutput::Centroids(rows) => write_centroids_csv(writer, rows),
        FloodOutput::Polygons(features) => write_polygons_geojson(writer, features),
    }
}
