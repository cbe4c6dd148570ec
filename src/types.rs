use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued backscatter or auxiliary raster sample
pub type FloodReal = f32;

/// 2D real raster array (rows x cols); NaN marks no-data
pub type RasterData = Array2<FloodReal>;

/// 2D boolean mask array (rows x cols)
pub type MaskData = Array2<bool>;

/// Mean metres per degree of latitude on the WGS84 ellipsoid
pub const METERS_PER_DEGREE_LAT: f64 = 110_574.0;

/// Metres per degree of longitude at the equator on the WGS84 ellipsoid
pub const METERS_PER_DEGREE_LON: f64 = 111_320.0;

/// Tolerance used when comparing grid transforms for identity
const GRID_EPSILON: f64 = 1e-9;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl std::str::FromStr for Polarization {
    type Err = FloodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(FloodError::InvalidInput(format!("Invalid polarization: {}", s))),
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

/// Orbit pass direction of an acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PassDirection {
    Ascending,
    Descending,
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// True when the two boxes share any area or edge
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    pub fn center(&self) -> (f64, f64) {
        (
            0.5 * (self.min_lon + self.max_lon),
            0.5 * (self.min_lat + self.max_lat),
        )
    }

    /// Closed rectangular polygon covering the box
    pub fn to_polygon(&self) -> geo::Polygon<f64> {
        geo::Rect::new(
            geo::coord! { x: self.min_lon, y: self.min_lat },
            geo::coord! { x: self.max_lon, y: self.max_lat },
        )
        .to_polygon()
    }
}

/// Affine pixel-to-geographic transformation (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// Geographic coordinate (lon, lat) of a fractional pixel position
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Geographic coordinate of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.pixel_to_geo(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Transform of the same origin with pixels `factor` times larger
    pub fn scaled(&self, factor: usize) -> Self {
        let f = factor as f64;
        Self {
            top_left_x: self.top_left_x,
            pixel_width: self.pixel_width * f,
            rotation_x: self.rotation_x * f,
            top_left_y: self.top_left_y,
            rotation_y: self.rotation_y * f,
            pixel_height: self.pixel_height * f,
        }
    }

    /// Ground pixel size in metres (x, y) at the given latitude
    pub fn pixel_size_m(&self, latitude: f64) -> (f64, f64) {
        let dx = self.pixel_width.hypot(self.rotation_y) * METERS_PER_DEGREE_LON * latitude.to_radians().cos();
        let dy = self.pixel_height.hypot(self.rotation_x) * METERS_PER_DEGREE_LAT;
        (dx.abs(), dy.abs())
    }

    fn approx_eq(&self, other: &GeoTransform) -> bool {
        let pairs = [
            (self.top_left_x, other.top_left_x),
            (self.pixel_width, other.pixel_width),
            (self.rotation_x, other.rotation_x),
            (self.top_left_y, other.top_left_y),
            (self.rotation_y, other.rotation_y),
            (self.pixel_height, other.pixel_height),
        ];
        pairs.iter().all(|(a, b)| (a - b).abs() <= GRID_EPSILON)
    }
}

/// Shape and georeferencing shared by every raster and mask of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub transform: GeoTransform,
}

impl GridSpec {
    pub fn new(rows: usize, cols: usize, transform: GeoTransform) -> Self {
        Self { rows, cols, transform }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn pixel_count(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }

    /// Geographic extent of the grid (pixel edges)
    pub fn bounds(&self) -> BoundingBox {
        let corners = [
            self.transform.pixel_to_geo(0.0, 0.0),
            self.transform.pixel_to_geo(self.cols as f64, 0.0),
            self.transform.pixel_to_geo(0.0, self.rows as f64),
            self.transform.pixel_to_geo(self.cols as f64, self.rows as f64),
        ];
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            min_lat: f64::INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for (x, y) in corners {
            bbox.min_lon = bbox.min_lon.min(x);
            bbox.max_lon = bbox.max_lon.max(x);
            bbox.min_lat = bbox.min_lat.min(y);
            bbox.max_lat = bbox.max_lat.max(y);
        }
        bbox
    }

    /// Latitude of the grid centre
    pub fn center_latitude(&self) -> f64 {
        self.transform
            .pixel_to_geo(self.cols as f64 / 2.0, self.rows as f64 / 2.0)
            .1
    }

    /// Nominal ground pixel size in metres (geometric mean of x and y)
    pub fn nominal_pixel_size_m(&self) -> f64 {
        let (dx, dy) = self.transform.pixel_size_m(self.center_latitude());
        (dx * dy).sqrt()
    }

    /// Grid covering the same extent with `factor`-times coarser pixels
    pub fn coarsened(&self, factor: usize) -> GridSpec {
        let factor = factor.max(1);
        GridSpec {
            rows: (self.rows + factor - 1) / factor,
            cols: (self.cols + factor - 1) / factor,
            transform: self.transform.scaled(factor),
        }
    }

    /// Fails with `GridMismatch` unless both grids are identical
    pub fn ensure_matches(&self, other: &GridSpec, what: &str) -> FloodResult<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(FloodError::GridMismatch(format!(
                "{}: shape {}x{} differs from reference {}x{}",
                what, other.rows, other.cols, self.rows, self.cols
            )));
        }
        if !self.transform.approx_eq(&other.transform) {
            return Err(FloodError::GridMismatch(format!(
                "{}: transform {:?} differs from reference {:?}",
                what, other.transform, self.transform
            )));
        }
        Ok(())
    }
}

/// Single-band raster bound to its grid
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub data: RasterData,
    pub grid: GridSpec,
}

impl Raster {
    /// Wrap an array with its transform; the grid shape is taken from the array
    pub fn new(data: RasterData, transform: GeoTransform) -> Self {
        let (rows, cols) = data.dim();
        Self {
            data,
            grid: GridSpec::new(rows, cols, transform),
        }
    }

    /// Raster on `grid` with every pixel set to `value`
    pub fn filled(grid: GridSpec, value: FloodReal) -> Self {
        Self {
            data: Array2::from_elem(grid.dim(), value),
            grid,
        }
    }

    /// Raster on `grid` with every pixel no-data
    pub fn no_data(grid: GridSpec) -> Self {
        Self::filled(grid, FloodReal::NAN)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| v.is_finite()).count()
    }

    /// Raster on the same grid holding different values
    pub fn with_data(&self, data: RasterData) -> FloodResult<Raster> {
        if data.dim() != self.grid.dim() {
            return Err(FloodError::GridMismatch(format!(
                "derived array {:?} does not match grid {:?}",
                data.dim(),
                self.grid.dim()
            )));
        }
        Ok(Raster { data, grid: self.grid })
    }
}

/// Boolean raster bound to its grid; `true` marks a candidate pixel
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub data: MaskData,
    pub grid: GridSpec,
}

impl Mask {
    pub fn new(data: MaskData, grid: GridSpec) -> FloodResult<Self> {
        if data.dim() != grid.dim() {
            return Err(FloodError::GridMismatch(format!(
                "mask array {:?} does not match grid {:?}",
                data.dim(),
                grid.dim()
            )));
        }
        Ok(Self { data, grid })
    }

    pub fn empty(grid: GridSpec) -> Self {
        Self {
            data: Array2::from_elem(grid.dim(), false),
            grid,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Number of `true` pixels
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Pixelwise `self AND NOT other`
    pub fn and_not(&self, other: &Mask) -> FloodResult<Mask> {
        self.grid.ensure_matches(&other.grid, "exclusion mask")?;
        let data = crate::core::zip_map(&self.data, &other.data, |&a, &b| a && !b);
        Ok(Mask { data, grid: self.grid })
    }
}

/// Error types for flood mapping
#[derive(Debug, thiserror::Error)]
pub enum FloodError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for flood mapping operations
pub type FloodResult<T> = Result<T, FloodError>;
