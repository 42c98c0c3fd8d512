//! Tiling of a raster into overlapping detector windows.
//!
//! The detector runs tile by tile; every tile's output is in tile-local pixel
//! coordinates and needs the tile's [`TileOffset`] to get back to the full
//! raster frame.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{GeoError, Result};
use crate::frame::RasterSize;

/// Pixel displacement of a tile inside its parent raster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileOffset {
    pub x: u32,
    pub y: u32,
}

/// One detector window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileWindow {
    pub x_offset: u32,
    pub y_offset: u32,
    pub width: u32,
    pub height: u32,
}

impl TileWindow {
    pub fn offset(&self) -> TileOffset {
        TileOffset {
            x: self.x_offset,
            y: self.y_offset,
        }
    }
}

/// Row-major windows of `patch_size` pixels with fractional `overlap`.
///
/// The stride is `patch_size * (1 - overlap)`; the last row and column are
/// snapped to the raster edge so every pixel is covered and no window hangs
/// over the border. A raster smaller than a patch gets one window covering it.
pub fn tile_windows(size: RasterSize, patch_size: u32, overlap: f64) -> Result<Vec<TileWindow>> {
    if patch_size == 0 {
        return Err(GeoError::InvalidParameter("patch_size must be positive".into()));
    }
    if !(0.0..1.0).contains(&overlap) {
        return Err(GeoError::InvalidParameter(format!("overlap must be in [0, 1), got {overlap}")));
    }
    if size.width == 0 || size.height == 0 {
        return Ok(Vec::new());
    }
    let stride = ((patch_size as f64 * (1.0 - overlap)).round() as u32).max(1);
    let xs = starts(size.width, patch_size, stride);
    let ys = starts(size.height, patch_size, stride);

    let mut windows = Vec::with_capacity(xs.len() * ys.len());
    for &y in &ys {
        for &x in &xs {
            windows.push(TileWindow {
                x_offset: x,
                y_offset: y,
                width: patch_size.min(size.width - x),
                height: patch_size.min(size.height - y),
            });
        }
    }
    Ok(windows)
}

fn starts(extent: u32, patch: u32, stride: u32) -> Vec<u32> {
    if extent <= patch {
        return vec![0];
    }
    let last = extent - patch;
    let mut out: Vec<u32> = (0..last).step_by(stride as usize).collect();
    out.push(last);
    out
}

/// Write windows as CSV (`x_offset,y_offset,width,height`).
pub fn write_tile_windows<W: Write>(writer: W, windows: &[TileWindow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for w in windows {
        wtr.serialize(w)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(width: u32, height: u32) -> RasterSize {
        RasterSize { width, height }
    }

    #[test]
    fn small_raster_single_window() {
        let w = tile_windows(size(300, 200), 400, 0.1).unwrap();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0], TileWindow { x_offset: 0, y_offset: 0, width: 300, height: 200 });
    }

    #[test]
    fn windows_cover_raster_with_edge_snap() {
        let w = tile_windows(size(1000, 500), 400, 0.1).unwrap();
        // stride 360: x starts 0, 360, then snapped 600; y starts 0, then snapped 100.
        let xs: Vec<u32> = w.iter().filter(|t| t.y_offset == 0).map(|t| t.x_offset).collect();
        assert_eq!(xs, vec![0, 360, 600]);
        let ys: Vec<u32> = w.iter().filter(|t| t.x_offset == 0).map(|t| t.y_offset).collect();
        assert_eq!(ys, vec![0, 100]);
        assert!(w.iter().all(|t| t.x_offset + t.width <= 1000 && t.y_offset + t.height <= 500));
        assert!(w.iter().all(|t| t.width == 400 && t.height == 400));
    }

    #[test]
    fn exact_fit_has_no_duplicate_start() {
        let w = tile_windows(size(800, 400), 400, 0.0).unwrap();
        let xs: Vec<u32> = w.iter().map(|t| t.x_offset).collect();
        assert_eq!(xs, vec![0, 400]);
    }

    #[test]
    fn bad_parameters() {
        assert!(tile_windows(size(10, 10), 0, 0.1).is_err());
        assert!(tile_windows(size(10, 10), 4, 1.0).is_err());
        assert!(tile_windows(size(10, 10), 4, -0.1).is_err());
    }

    #[test]
    fn csv_output_has_header() {
        let mut buf = Vec::new();
        write_tile_windows(&mut buf, &tile_windows(size(10, 10), 4, 0.0).unwrap()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("x_offset,y_offset,width,height\n0,0,4,4\n"));
    }
}
