//! Collaborator adapters: acquisition sources, raster reading and feature sinks

pub mod catalog;
pub mod export;
#[cfg(feature = "gdal")]
pub mod geotiff;

pub use catalog::{
    composite_window, Acquisition, AcquisitionFilter, AcquisitionSource, AreaOfInterest, Composite,
    InMemoryCatalog, SourceRasters, TimeWindow,
};
pub use export::{write_centroids_csv, write_features, write_polygons_geojson};
#[cfg(feature = "gdal")]
pub use geotiff::GeoTiffReader;
