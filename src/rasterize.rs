//! User geometries to clipped pixel boxes on a raster.

use log::debug;

use crate::crs::Reprojector;
use crate::error::Result;
use crate::frame::{AffineFrame, PixelBBox};
use crate::geometry::Geometry;

/// Pixel box of each geometry's bounding rectangle, in input order.
///
/// Only the bounding box of a shape is used: user annotations are treated as
/// rectangles. The box is reprojected into the raster CRS and clipped to
/// `[0, width-1] × [0, height-1]`. Boxes falling completely outside the raster
/// come back degenerate rather than being dropped.
pub fn rasterize(
    user_geometries: &[Geometry],
    frame: &AffineFrame,
    raster_width: u32,
    raster_height: u32,
) -> Result<Vec<PixelBBox>> {
    let mut reprojector: Option<Reprojector> = None;
    let mut out = Vec::with_capacity(user_geometries.len());
    for geometry in user_geometries {
        let envelope = geometry.envelope();
        let native = if envelope.crs() == frame.crs() {
            envelope
        } else {
            let r = match reprojector.take() {
                Some(r) if r.from_crs() == envelope.crs() => r,
                _ => Reprojector::new(envelope.crs(), frame.crs())?,
            };
            let native = envelope.reproject_with(&r)?;
            reprojector = Some(r);
            native
        };
        let bbox = frame.rect_map_to_pixel(&native, raster_width, raster_height)?;
        if bbox.is_degenerate() {
            debug!("user geometry rasterized to degenerate box {:?}", bbox.to_array());
        }
        out.push(bbox);
    }
    Ok(out)
}
