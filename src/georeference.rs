//! Pixel-space detector output to georeferenced detection records.
//!
//! Steps for every raw detection:
//! 1. shift tile-local vertices by the tile offset (full-raster pixels),
//! 2. map every vertex through the raster [`AffineFrame`] (native CRS),
//! 3. derive the clipped [`PixelBBox`] from that native geometry,
//! 4. reproject to the display CRS for the stored geometry,
//! 5. reproject to the projected CRS to measure area in m².
//!
//! User boxes coming out of the rasterizer reuse steps 2–5 through
//! [`georeference_user_boxes`].

use std::collections::HashMap;
use std::io::Read;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::crs::{Crs, Reprojector};
use crate::detection::{Detection, TREE_LABEL};
use crate::error::{GeoError, Result};
use crate::frame::{AffineFrame, PixelBBox, RasterSize};
use crate::geometry::Geometry;
use crate::tiles::TileOffset;

/// Detector-native shape in tile-local pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelShape {
    BBox { xmin: f64, ymin: f64, xmax: f64, ymax: f64 },
    /// Outline vertices; closed automatically if the last vertex differs from the first.
    Polygon(Vec<[f64; 2]>),
}

/// One detector output row. The detector is single-class, so no label is
/// carried; every record comes out as [`TREE_LABEL`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub shape: PixelShape,
    pub score: f64,
}

/// Detections of one tile together with the tile's offset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TileDetections {
    pub offset: TileOffset,
    pub detections: Vec<RawDetection>,
}

/// CRSs and filters for [`georeference`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoreferenceParams {
    /// CRS of the stored record geometry (usually WGS84).
    pub display_crs: Crs,
    /// Projected CRS used for the area column.
    pub projected_crs: Crs,
    /// Detections scoring below this are dropped.
    pub score_threshold: f64,
    /// Detections larger than this (m²) are dropped.
    pub max_area_m2: f64,
}

impl GeoreferenceParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(GeoError::InvalidParameter(format!(
                "score_threshold must lie in [0, 1], got {}",
                self.score_threshold
            )));
        }
        // Infinity is allowed and disables the area filter.
        if self.max_area_m2.is_nan() || self.max_area_m2 <= 0.0 {
            return Err(GeoError::InvalidParameter(format!(
                "max_area_m2 must be positive, got {}",
                self.max_area_m2
            )));
        }
        Ok(())
    }
}

/// Convert raw detector output to model [`Detection`]s.
///
/// Returns an empty list when there is nothing to convert. Records failing
/// the score or area filter are left out; anything else that goes wrong
/// (bad polygon, failed projection) is an error, never a silent drop.
pub fn georeference(
    raw: &[TileDetections],
    frame: &AffineFrame,
    size: RasterSize,
    params: &GeoreferenceParams,
) -> Result<Vec<Detection>> {
    let total: usize = raw.iter().map(|t| t.detections.len()).sum();
    if total == 0 {
        debug!("no raw detections to georeference");
        return Ok(Vec::new());
    }
    let steps = GeometrySteps::new(frame, size, params)?;

    let mut out = Vec::new();
    let mut low_score = 0usize;
    let mut too_large = 0usize;
    for tile in raw {
        debug!(
            "tile at ({}, {}): {} raw detection(s)",
            tile.offset.x,
            tile.offset.y,
            tile.detections.len()
        );
        for det in &tile.detections {
            if !(det.score.is_finite() && (0.0..=1.0).contains(&det.score)) {
                return Err(GeoError::InvalidParameter(format!(
                    "detection score {} outside [0, 1]",
                    det.score
                )));
            }
            if det.score < params.score_threshold {
                low_score += 1;
                continue;
            }
            let native = shape_to_map(frame, &det.shape, tile.offset)?;
            let (bbox, display, area_m2) = steps.apply(&native)?;
            if area_m2 > params.max_area_m2 {
                too_large += 1;
                continue;
            }
            out.push(Detection::model(bbox, TREE_LABEL, det.score, display, area_m2));
        }
    }
    info!(
        "georeferenced {} of {total} detection(s) ({low_score} below score {}, {too_large} above {} m²)",
        out.len(),
        params.score_threshold,
        params.max_area_m2
    );
    Ok(out)
}

/// Turn rasterized user boxes into user [`Detection`]s.
///
/// Same geometry steps as [`georeference`], without score or area filtering.
pub fn georeference_user_boxes(
    boxes: &[PixelBBox],
    frame: &AffineFrame,
    size: RasterSize,
    params: &GeoreferenceParams,
) -> Result<Vec<Detection>> {
    if boxes.is_empty() {
        return Ok(Vec::new());
    }
    let steps = GeometrySteps::new(frame, size, params)?;
    boxes
        .iter()
        .map(|b| {
            let native = frame.rect_pixel_to_map(b.xmin() as f64, b.ymin() as f64, b.xmax() as f64, b.ymax() as f64)?;
            let (bbox, display, area_m2) = steps.apply(&native)?;
            Ok(Detection::user(bbox, TREE_LABEL, display, area_m2))
        })
        .collect()
}

/// Prebuilt reprojections shared by every record of one raster.
struct GeometrySteps<'a> {
    frame: &'a AffineFrame,
    size: RasterSize,
    to_display: Reprojector,
    to_projected: Reprojector,
}

impl<'a> GeometrySteps<'a> {
    fn new(frame: &'a AffineFrame, size: RasterSize, params: &GeoreferenceParams) -> Result<Self> {
        params.validate()?;
        params.projected_crs.require_projected("detection area")?;
        Ok(Self {
            frame,
            size,
            to_display: Reprojector::new(frame.crs(), params.display_crs)?,
            to_projected: Reprojector::new(frame.crs(), params.projected_crs)?,
        })
    }

    fn apply(&self, native: &Geometry) -> Result<(PixelBBox, Geometry, f64)> {
        let bbox = self.frame.rect_map_to_pixel(native, self.size.width, self.size.height)?;
        let display = native.reproject_with(&self.to_display)?;
        let area_m2 = native.reproject_with(&self.to_projected)?.area_m2()?;
        Ok((bbox, display, area_m2))
    }
}

fn shape_to_map(frame: &AffineFrame, shape: &PixelShape, offset: TileOffset) -> Result<Geometry> {
    let (ox, oy) = (offset.x as f64, offset.y as f64);
    match shape {
        PixelShape::BBox { xmin, ymin, xmax, ymax } => {
            frame.rect_pixel_to_map(xmin + ox, ymin + oy, xmax + ox, ymax + oy)
        }
        PixelShape::Polygon(vertices) => {
            let mut ring: Vec<[f64; 2]> = vertices
                .iter()
                .map(|v| {
                    let (x, y) = frame.pixel_to_map(v[0] + ox, v[1] + oy);
                    [x, y]
                })
                .collect();
            if ring.len() >= 3 && ring.first() != ring.last() {
                ring.push(ring[0]);
            }
            Geometry::from_rings(&[vec![ring]], frame.crs())
        }
    }
}

#[derive(Debug, Deserialize)]
struct DetectorRow {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
    score: f64,
    #[serde(default)]
    x_offset: u32,
    #[serde(default)]
    y_offset: u32,
}

/// Read detector output CSV.
///
/// Required columns: `xmin,ymin,xmax,ymax,score`. Optional:
/// `x_offset`, `y_offset` (tile offset, 0 when absent). Other columns,
/// `label` included, are ignored. Rows are grouped by tile offset in first-seen order.
pub fn read_detections_csv<R: Read>(reader: R) -> Result<Vec<TileDetections>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut tiles: Vec<TileDetections> = Vec::new();
    let mut index: HashMap<TileOffset, usize> = HashMap::new();
    for row in rdr.deserialize() {
        let row: DetectorRow = row?;
        let offset = TileOffset {
            x: row.x_offset,
            y: row.y_offset,
        };
        let slot = *index.entry(offset).or_insert_with(|| {
            tiles.push(TileDetections {
                offset,
                detections: Vec::new(),
            });
            tiles.len() - 1
        });
        tiles[slot].detections.push(RawDetection {
            shape: PixelShape::BBox {
                xmin: row.xmin,
                ymin: row.ymin,
                xmax: row.xmax,
                ymax: row.ymax,
            },
            score: row.score,
        });
    }
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Provenance;

    fn degree_frame() -> AffineFrame {
        AffineFrame::new(0.01, 0.0, -100.0, 0.0, -0.01, 50.0, Crs::WGS84).unwrap()
    }

    fn mercator_frame() -> AffineFrame {
        // 0.5 m pixels somewhere over central India.
        AffineFrame::new(0.5, 0.0, 8_700_000.0, 0.0, -0.5, 2_000_000.0, Crs::WEB_MERCATOR).unwrap()
    }

    fn params(display: Crs, projected: Crs) -> GeoreferenceParams {
        GeoreferenceParams {
            display_crs: display,
            projected_crs: projected,
            score_threshold: 0.15,
            max_area_m2: f64::INFINITY,
        }
    }

    fn bbox_det(xmin: f64, ymin: f64, xmax: f64, ymax: f64, score: f64) -> RawDetection {
        RawDetection {
            shape: PixelShape::BBox { xmin, ymin, xmax, ymax },
            score,
        }
    }

    #[test]
    fn empty_input_is_empty_output() {
        let f = degree_frame();
        let size = RasterSize { width: 100, height: 100 };
        let p = params(Crs::WGS84, Crs::WEB_MERCATOR);
        assert!(georeference(&[], &f, size, &p).unwrap().is_empty());
        let empty_tile = TileDetections::default();
        assert!(georeference(&[empty_tile], &f, size, &p).unwrap().is_empty());
    }

    #[test]
    fn bbox_lands_on_expected_degrees() {
        let f = degree_frame();
        let raw = vec![TileDetections {
            offset: TileOffset::default(),
            detections: vec![bbox_det(10.0, 10.0, 20.0, 20.0, 0.9)],
        }];
        let out = georeference(
            &raw,
            &f,
            RasterSize { width: 100, height: 100 },
            &params(Crs::WGS84, Crs::WEB_MERCATOR),
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        let r = out[0].geometry().bounds();
        assert!((r.min().x + 99.9).abs() < 1e-9);
        assert!((r.max().x + 99.8).abs() < 1e-9);
        assert!((r.min().y - 49.8).abs() < 1e-9);
        assert!((r.max().y - 49.9).abs() < 1e-9);
        assert_eq!(out[0].bbox().to_array(), [10, 10, 20, 20]);
        assert_eq!(out[0].provenance(), Provenance::Model);
    }

    #[test]
    fn tile_offset_is_applied() {
        let f = mercator_frame();
        let size = RasterSize { width: 1000, height: 1000 };
        let p = params(Crs::WEB_MERCATOR, Crs::WEB_MERCATOR);
        let raw = vec![TileDetections {
            offset: TileOffset { x: 400, y: 360 },
            detections: vec![bbox_det(0.0, 0.0, 10.0, 8.0, 0.5)],
        }];
        let out = georeference(&raw, &f, size, &p).unwrap();
        assert_eq!(out[0].bbox().to_array(), [400, 360, 410, 368]);
        let r = out[0].geometry().bounds();
        assert!((r.min().x - 8_700_200.0).abs() < 1e-6);
        assert!((r.max().y - 1_999_820.0).abs() < 1e-6);
        assert!((out[0].area_m2() - 20.0).abs() < 1e-6);
    }

    #[test]
    fn score_and_area_filters() {
        let f = mercator_frame();
        let size = RasterSize { width: 1000, height: 1000 };
        let mut p = params(Crs::WGS84, Crs::WEB_MERCATOR);
        p.max_area_m2 = 60.0;
        let raw = vec![TileDetections {
            offset: TileOffset::default(),
            detections: vec![
                bbox_det(0.0, 0.0, 10.0, 10.0, 0.10),  // low score
                bbox_det(0.0, 0.0, 10.0, 10.0, 0.15),  // 25 m², kept (threshold inclusive)
                bbox_det(0.0, 0.0, 40.0, 40.0, 0.90),  // 400 m², too large
            ],
        }];
        let out = georeference(&raw, &f, size, &p).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score(), Some(0.15));
        assert_eq!(out[0].geometry().crs(), Crs::WGS84);
    }

    #[test]
    fn polygon_is_closed_and_mapped() {
        let f = mercator_frame();
        let raw = vec![TileDetections {
            offset: TileOffset { x: 10, y: 0 },
            detections: vec![RawDetection {
                shape: PixelShape::Polygon(vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]]),
                score: 0.7,
            }],
        }];
        let out = georeference(
            &raw,
            &f,
            RasterSize { width: 100, height: 100 },
            &params(Crs::WEB_MERCATOR, Crs::WEB_MERCATOR),
        )
        .unwrap();
        assert_eq!(out[0].bbox().to_array(), [10, 0, 14, 4]);
        assert!((out[0].area_m2() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_polygon_is_an_error() {
        let raw = vec![TileDetections {
            offset: TileOffset::default(),
            detections: vec![RawDetection {
                shape: PixelShape::Polygon(vec![[0.0, 0.0], [4.0, 0.0]]),
                score: 0.7,
            }],
        }];
        let err = georeference(
            &raw,
            &mercator_frame(),
            RasterSize { width: 100, height: 100 },
            &params(Crs::WEB_MERCATOR, Crs::WEB_MERCATOR),
        )
        .unwrap_err();
        assert!(matches!(err, GeoError::InvalidGeometry(_)));
    }

    #[test]
    fn geographic_projected_crs_is_rejected() {
        let raw = vec![TileDetections {
            offset: TileOffset::default(),
            detections: vec![bbox_det(0.0, 0.0, 1.0, 1.0, 0.9)],
        }];
        let err = georeference(
            &raw,
            &degree_frame(),
            RasterSize { width: 100, height: 100 },
            &params(Crs::WGS84, Crs::WGS84),
        )
        .unwrap_err();
        assert!(matches!(err, GeoError::UnsupportedCrs { epsg: 4326, .. }));
    }

    #[test]
    fn user_boxes_have_no_score() {
        let f = mercator_frame();
        let size = RasterSize { width: 100, height: 100 };
        let model = georeference(
            &[TileDetections {
                offset: TileOffset::default(),
                detections: vec![bbox_det(2.0, 2.0, 8.0, 6.0, 0.9)],
            }],
            &f,
            size,
            &params(Crs::WEB_MERCATOR, Crs::WEB_MERCATOR),
        )
        .unwrap();
        let users = georeference_user_boxes(&[model[0].bbox()], &f, size, &params(Crs::WEB_MERCATOR, Crs::WEB_MERCATOR)).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].score(), None);
        assert_eq!(users[0].provenance(), Provenance::User);
        assert_eq!(users[0].bbox(), model[0].bbox());
        assert_eq!(users[0].geometry(), model[0].geometry());
    }

    #[test]
    fn csv_rows_grouped_by_offset() {
        let text = "image_path,xmin,ymin,xmax,ymax,label,score,x_offset,y_offset\n\
                    a.tif,1,2,3,4,Tree,0.5,0,0\n\
                    a.tif,5,6,7,8,Tree,0.6,360,0\n\
                    a.tif,9,9,12,12,Tree,0.7,0,0\n";
        let tiles = read_detections_csv(text.as_bytes()).unwrap();
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].offset, TileOffset { x: 0, y: 0 });
        assert_eq!(tiles[0].detections.len(), 2);
        assert_eq!(tiles[1].offset, TileOffset { x: 360, y: 0 });
        assert_eq!(tiles[1].detections[0].score, 0.6);
    }

    #[test]
    fn nan_filters_are_rejected() {
        let f = mercator_frame();
        let size = RasterSize { width: 1000, height: 1000 };
        let raw = vec![TileDetections {
            offset: TileOffset::default(),
            detections: vec![bbox_det(0.0, 0.0, 400.0, 400.0, 0.01)],
        }];
        let mut p = params(Crs::WGS84, Crs::WEB_MERCATOR);
        p.score_threshold = f64::NAN;
        assert!(matches!(georeference(&raw, &f, size, &p), Err(GeoError::InvalidParameter(_))));

        let mut p = params(Crs::WGS84, Crs::WEB_MERCATOR);
        p.max_area_m2 = f64::NAN;
        assert!(matches!(georeference(&raw, &f, size, &p), Err(GeoError::InvalidParameter(_))));
        assert!(georeference_user_boxes(&[], &f, size, &p).unwrap().is_empty());
    }

    #[test]
    fn detector_label_column_is_ignored() {
        let text = "xmin,ymin,xmax,ymax,score,label\n1,2,5,6,0.9,Palm\n";
        let tiles = read_detections_csv(text.as_bytes()).unwrap();
        let out = georeference(
            &tiles,
            &mercator_frame(),
            RasterSize { width: 100, height: 100 },
            &params(Crs::WEB_MERCATOR, Crs::WEB_MERCATOR),
        )
        .unwrap();
        assert_eq!(out[0].label(), TREE_LABEL);
    }

    #[test]
    fn csv_without_optional_columns() {
        let text = "xmin,ymin,xmax,ymax,score\n1,2,3,4,0.9\n";
        let tiles = read_detections_csv(text.as_bytes()).unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].offset, TileOffset::default());
        assert_eq!(tiles[0].detections[0].score, 0.9);
    }
}
