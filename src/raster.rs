//! GeoTIFF header reading: raster size, affine frame and CRS.
//!
//! Pixel data is never decoded; the pipeline only needs the georeferencing.
//! The transform comes from `ModelTransformationTag` when present, otherwise
//! from `ModelPixelScaleTag` + `ModelTiepointTag`. The CRS comes from the
//! GeoKey directory (`ProjectedCSTypeGeoKey` / `GeographicTypeGeoKey`), or the
//! caller's fallback when the file does not declare one.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use log::{debug, warn};
use tiff::decoder::Decoder;
use tiff::tags::Tag;

use crate::crs::Crs;
use crate::error::{GeoError, Result};
use crate::frame::{AffineFrame, RasterSize};

const GEOGRAPHIC_TYPE_GEO_KEY: u32 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u32 = 3072;
/// GeoTIFF "user-defined" code.
const USER_DEFINED: u32 = 32767;

/// What the core needs to know about one raster.
#[derive(Debug, Clone)]
pub struct RasterInfo {
    pub size: RasterSize,
    pub frame: AffineFrame,
}

/// Open a GeoTIFF on disk and read its georeferencing.
pub fn load_raster_info(path: &Path, fallback_crs: Crs) -> Result<RasterInfo> {
    let file = File::open(path)?;
    read_raster_info(BufReader::new(file), fallback_crs)
}

pub fn read_raster_info<R: Read + Seek>(reader: R, fallback_crs: Crs) -> Result<RasterInfo> {
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;
    let crs = match geokey_crs(&mut decoder) {
        Some(crs) => crs,
        None => {
            warn!("GeoTIFF declares no EPSG code, assuming {fallback_crs}");
            fallback_crs
        }
    };
    let frame = frame_from_tags(&mut decoder, crs)?;
    debug!(
        "raster {width}×{height} px, {crs}, coefficients {:?}",
        frame.coefficients()
    );
    Ok(RasterInfo {
        size: RasterSize { width, height },
        frame,
    })
}

fn f64_tag<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Result<Option<Vec<f64>>> {
    match decoder.find_tag(tag)? {
        Some(value) => Ok(Some(value.into_f64_vec()?)),
        None => Ok(None),
    }
}

fn frame_from_tags<R: Read + Seek>(decoder: &mut Decoder<R>, crs: Crs) -> Result<AffineFrame> {
    // 4×4 row-major model transformation; only the 2D affine part is used.
    if let Some(m) = f64_tag(decoder, Tag::ModelTransformationTag)? {
        if m.len() >= 8 {
            return AffineFrame::new(m[0], m[1], m[3], m[4], m[5], m[7], crs);
        }
        return Err(GeoError::MissingGeoreference(format!(
            "ModelTransformationTag has {} values, expected 16",
            m.len()
        )));
    }

    let scale = f64_tag(decoder, Tag::ModelPixelScaleTag)?;
    let tiepoint = f64_tag(decoder, Tag::ModelTiepointTag)?;
    match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
            AffineFrame::from_scale_and_tiepoint((s[0], s[1]), (t[0], t[1]), (t[3], t[4]), crs)
        }
        (None, _) => Err(GeoError::MissingGeoreference("no ModelPixelScaleTag (33550)".into())),
        (_, None) => Err(GeoError::MissingGeoreference("no ModelTiepointTag (33922)".into())),
        _ => Err(GeoError::MissingGeoreference(
            "ModelPixelScaleTag or ModelTiepointTag too short".into(),
        )),
    }
}

/// EPSG code from the GeoKey directory, if one is stored inline.
fn geokey_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<Crs> {
    let keys = decoder
        .find_tag(Tag::GeoKeyDirectoryTag)
        .ok()
        .flatten()?
        .into_u32_vec()
        .ok()?;
    // Header: version, revision, minor revision, key count; then 4 values per key.
    let count = *keys.get(3)? as usize;
    let mut geographic = None;
    let mut projected = None;
    for entry in keys.get(4..)?.chunks_exact(4).take(count) {
        let (id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == 0 || value == USER_DEFINED {
            continue;
        }
        match id {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(Crs::from_epsg(value)),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(Crs::from_epsg(value)),
            _ => {}
        }
    }
    projected.or(geographic)
}
