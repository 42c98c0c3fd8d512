//! # treecrowns: georeferencing for tree-crown annotation
//!
//! Turns a drawn region of interest into annotated, georeferenced tree crowns
//! for a satellite raster.
//!
//! This crate provides:
//! - **Frames & geometry**: [`AffineFrame`] (pixel ↔ map), [`Geometry`] (CRS-tagged
//!   polygons), [`Crs`] / [`crs::Reprojector`]
//! - **Region preparation**: [`AreaNormalizer`] grows an ROI to a minimum area
//! - **Detections**: [`georeference`] turns tile-relative detector output into
//!   map-space [`Detection`]s, [`rasterize`] turns user shapes into pixel boxes
//! - **Annotations**: [`merge`] unions model and user rows into one
//!   [`AnnotationTable`] with provenance
//! - **I/O helpers**: GeoTIFF headers ([`raster`]), GeoJSON ([`roi`]), tile
//!   windows ([`tiles`]), settings ([`config`]) and artifact storage ([`storage`])

pub mod annotations;
pub mod config;
pub mod crs;
pub mod detection;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod georeference;
pub mod normalize;
pub mod raster;
pub mod rasterize;
pub mod roi;
pub mod storage;
pub mod tiles;

pub use annotations::{merge, AnnotationTable, DetectionTable};
pub use config::PipelineConfig;
pub use crs::Crs;
pub use detection::{Detection, Provenance};
pub use error::{GeoError, Result};
pub use frame::{AffineFrame, PixelBBox, RasterSize};
pub use geometry::Geometry;
pub use georeference::{
    georeference, georeference_user_boxes, GeoreferenceParams, PixelShape, RawDetection, TileDetections,
};
pub use normalize::{AreaNormalizer, NormalizeParams};
pub use raster::{load_raster_info, RasterInfo};
pub use rasterize::rasterize;
