//! Pixel ↔ map affine frame of a georeferenced raster.
//!
//! Pixel coordinates are corner based: `(col, row) = (0, 0)` is the outer
//! top-left corner of the first pixel, `(width, height)` the bottom-right
//! corner of the last one. The forward transform is
//!
//!   x = a·col + b·row + c
//!   y = d·col + e·row + f
//!
//! For the usual north-up raster `e` is negative, so row grows while map y
//! shrinks. Rectangle conversions therefore never pair pixel corners with map
//! corners directly; they transform every corner and take min/max per axis.

use geo::{AffineTransform, Coord};

use crate::crs::Crs;
use crate::error::{GeoError, Result};
use crate::geometry::Geometry;

/// Integer pixel bounding box, clipped to a raster extent.
///
/// Only produced by [`AffineFrame::rect_map_to_pixel`], so `xmin <= xmax`,
/// `ymin <= ymax` and all values lie in `[0, width-1] × [0, height-1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelBBox {
    xmin: u32,
    ymin: u32,
    xmax: u32,
    ymax: u32,
}

impl PixelBBox {
    pub fn xmin(&self) -> u32 {
        self.xmin
    }
    pub fn ymin(&self) -> u32 {
        self.ymin
    }
    pub fn xmax(&self) -> u32 {
        self.xmax
    }
    pub fn ymax(&self) -> u32 {
        self.ymax
    }

    /// `[xmin, ymin, xmax, ymax]`
    pub fn to_array(&self) -> [u32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    /// Zero extent on at least one axis.
    pub fn is_degenerate(&self) -> bool {
        self.xmin == self.xmax || self.ymin == self.ymax
    }
}

/// Raster dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSize {
    pub width: u32,
    pub height: u32,
}

/// Affine transform of one raster plus the CRS of its map coordinates.
#[derive(Debug, Clone)]
pub struct AffineFrame {
    coeffs: [f64; 6],
    forward: AffineTransform<f64>,
    inverse: AffineTransform<f64>,
    crs: Crs,
}

impl AffineFrame {
    /// Coefficients in `(a, b, c, d, e, f)` order, see the module docs.
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64, crs: Crs) -> Result<Self> {
        let determinant = a * e - b * d;
        let finite = [a, b, c, d, e, f].iter().all(|v| v.is_finite());
        if !finite || !determinant.is_finite() || determinant == 0.0 {
            return Err(GeoError::DegenerateTransform { determinant });
        }
        let forward = AffineTransform::new(a, b, c, d, e, f);
        let inverse = forward
            .inverse()
            .ok_or(GeoError::DegenerateTransform { determinant })?;
        Ok(Self {
            coeffs: [a, b, c, d, e, f],
            forward,
            inverse,
            crs,
        })
    }

    /// GDAL geotransform order: `[c, a, b, f, d, e]`.
    pub fn from_gdal(gt: [f64; 6], crs: Crs) -> Result<Self> {
        Self::new(gt[1], gt[2], gt[0], gt[4], gt[5], gt[3], crs)
    }

    /// GeoTIFF `ModelPixelScale` + one `ModelTiepoint` (pixel `(i, j)` at map
    /// `(x, y)`). Scale values are positive; y is flipped for north-up.
    pub fn from_scale_and_tiepoint(
        scale: (f64, f64),
        tie_pixel: (f64, f64),
        tie_map: (f64, f64),
        crs: Crs,
    ) -> Result<Self> {
        let (sx, sy) = scale;
        let c = tie_map.0 - tie_pixel.0 * sx;
        let f = tie_map.1 + tie_pixel.1 * sy;
        Self::new(sx, 0.0, c, 0.0, -sy, f, crs)
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    /// `[a, b, c, d, e, f]`
    pub fn coefficients(&self) -> [f64; 6] {
        self.coeffs
    }

    /// Forward transform. No bounds check: pixels outside the raster map to
    /// points outside its footprint.
    pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
        let c = self.forward.apply(Coord { x: col, y: row });
        (c.x, c.y)
    }

    /// Inverse transform with real-valued (unrounded) pixel coordinates.
    pub fn map_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let c = self.inverse.apply(Coord { x, y });
        (c.x, c.y)
    }

    /// Pixel rectangle to an axis-aligned map rectangle in the frame CRS.
    ///
    /// All four corners are transformed and x/y min/max taken independently,
    /// so the result has non-negative extent whatever the axis orientation.
    pub fn rect_pixel_to_map(&self, xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Geometry> {
        let corners = [
            self.pixel_to_map(xmin, ymin),
            self.pixel_to_map(xmax, ymax),
            self.pixel_to_map(xmin, ymax),
            self.pixel_to_map(xmax, ymin),
        ];
        let (x0, y0, x1, y1) = min_max(&corners);
        Geometry::rectangle(x0, y0, x1, y1, self.crs)
    }

    /// Bounding box of `geometry` (in the frame CRS) to a clipped pixel box.
    ///
    /// Pixel values are rounded to the nearest integer, then clipped into
    /// `[0, clip_width-1] × [0, clip_height-1]`. A box that collapses to zero
    /// extent after clipping is returned as is.
    pub fn rect_map_to_pixel(&self, geometry: &Geometry, clip_width: u32, clip_height: u32) -> Result<PixelBBox> {
        if geometry.crs() != self.crs {
            return Err(GeoError::Projection(format!(
                "geometry is in {}, raster frame is in {}",
                geometry.crs(),
                self.crs
            )));
        }
        let b = geometry.bounds();
        let (min, max) = (b.min(), b.max());
        let corners = [
            self.map_to_pixel(min.x, min.y),
            self.map_to_pixel(min.x, max.y),
            self.map_to_pixel(max.x, min.y),
            self.map_to_pixel(max.x, max.y),
        ];
        let (c0, r0, c1, r1) = min_max(&corners);
        let max_col = clip_width.saturating_sub(1);
        let max_row = clip_height.saturating_sub(1);
        Ok(PixelBBox {
            xmin: clip(c0, max_col),
            ymin: clip(r0, max_row),
            xmax: clip(c1, max_col),
            ymax: clip(r1, max_row),
        })
    }

    /// Map-space outline of a raster of the given size.
    pub fn footprint(&self, size: RasterSize) -> Result<Geometry> {
        self.rect_pixel_to_map(0.0, 0.0, size.width as f64, size.height as f64)
    }
}

fn min_max(points: &[(f64, f64)]) -> (f64, f64, f64, f64) {
    points.iter().fold(
        (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
    )
}

fn clip(v: f64, max: u32) -> u32 {
    if v.is_nan() {
        return 0;
    }
    v.round().clamp(0.0, max as f64) as u32
}
