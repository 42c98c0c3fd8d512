//! Error type shared by the georeferencing pipeline.
//!
//! An empty detection set is not represented here: the georeferencer returns an
//! empty `Vec` for it, so callers can tell "no trees" apart from a failure.

use thiserror::Error;

/// Errors raised by the core transforms and their I/O helpers.
#[derive(Error, Debug)]
pub enum GeoError {
    /// The raster's affine matrix cannot be inverted.
    #[error("degenerate affine transform (determinant {determinant})")]
    DegenerateTransform { determinant: f64 },

    /// Area normalization hit its iteration cap before reaching the target area.
    #[error(
        "geometry expansion did not reach {target_m2:.1} m² after {iterations} iterations (last area {area_m2:.1} m²)"
    )]
    GeometryExpansion {
        iterations: usize,
        area_m2: f64,
        target_m2: f64,
    },

    /// Two tables (or two rows of one table) disagree on their column set.
    #[error("schema mismatch: expected {expected:?}, found {found:?}")]
    SchemaMismatch { expected: Vec<String>, found: Vec<String> },

    /// Reprojection to or from a CRS the registry cannot resolve, or a CRS used
    /// for something it cannot do (area in degrees).
    #[error("unsupported CRS EPSG:{epsg}: {reason}")]
    UnsupportedCrs { epsg: u32, reason: String },

    /// A supported CRS pair failed to transform a coordinate.
    #[error("projection failed: {0}")]
    Projection(String),

    /// Geometry rejected at ingestion (open ring, fewer than 4 vertices, empty).
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// A tuning parameter is out of its valid range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The raster carries no usable georeferencing tags.
    #[error("raster has no georeference: {0}")]
    MissingGeoreference(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),
}

pub type Result<T> = std::result::Result<T, GeoError>;
