//! CRS-tagged polygon geometry.
//!
//! [`Geometry`] wraps a `geo::MultiPolygon<f64>` together with the CRS its
//! coordinates are expressed in. It is validated once at construction and never
//! mutated afterwards: reprojection and buffering return new values.

use std::fmt::Write as _;

use geo::{Area, BoundingRect, Buffer, Coord, LineString, MapCoords, MultiPolygon, Polygon, Rect};

use crate::crs::{Crs, Reprojector};
use crate::error::{GeoError, Result};

/// Polygon or multipolygon in an explicit CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    shape: MultiPolygon<f64>,
    crs: Crs,
}

impl Geometry {
    /// Validate and wrap a multipolygon.
    ///
    /// Every ring must be closed and have at least 4 vertices, and all
    /// coordinates must be finite.
    pub fn new(shape: MultiPolygon<f64>, crs: Crs) -> Result<Self> {
        if shape.0.is_empty() {
            return Err(GeoError::InvalidGeometry("no polygons".into()));
        }
        for (pi, polygon) in shape.0.iter().enumerate() {
            check_ring(polygon.exterior(), pi, "exterior")?;
            for ring in polygon.interiors() {
                check_ring(ring, pi, "interior")?;
            }
        }
        Ok(Self { shape, crs })
    }

    pub fn from_polygon(polygon: Polygon<f64>, crs: Crs) -> Result<Self> {
        Self::new(MultiPolygon(vec![polygon]), crs)
    }

    /// Build from raw coordinate rings: `polygons[i][0]` is the exterior ring of
    /// polygon `i`, the remaining rings are holes.
    ///
    /// Rings are checked before `geo` gets a chance to auto-close them, so an
    /// open ring in the input is rejected rather than silently repaired.
    pub fn from_rings(polygons: &[Vec<Vec<[f64; 2]>>], crs: Crs) -> Result<Self> {
        let mut out = Vec::with_capacity(polygons.len());
        for (pi, rings) in polygons.iter().enumerate() {
            let Some((exterior, holes)) = rings.split_first() else {
                return Err(GeoError::InvalidGeometry(format!("polygon {pi} has no rings")));
            };
            for ring in rings {
                if ring.len() < 4 {
                    return Err(GeoError::InvalidGeometry(format!(
                        "polygon {pi}: ring has {} vertices, need at least 4",
                        ring.len()
                    )));
                }
                if ring.first() != ring.last() {
                    return Err(GeoError::InvalidGeometry(format!("polygon {pi}: ring is not closed")));
                }
            }
            let to_ls = |ring: &Vec<[f64; 2]>| LineString::from(ring.iter().map(|p| (p[0], p[1])).collect::<Vec<_>>());
            out.push(Polygon::new(to_ls(exterior), holes.iter().map(to_ls).collect()));
        }
        Self::new(MultiPolygon(out), crs)
    }

    /// Axis-aligned rectangle. Corner order does not matter.
    pub fn rectangle(x0: f64, y0: f64, x1: f64, y1: f64, crs: Crs) -> Result<Self> {
        let rect = Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 });
        Self::from_polygon(rect.to_polygon(), crs)
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    /// Same shape in another CRS. Returns a clone when `to` is the current CRS.
    pub fn reproject(&self, to: Crs) -> Result<Geometry> {
        if to == self.crs {
            return Ok(self.clone());
        }
        let reprojector = Reprojector::new(self.crs, to)?;
        self.reproject_with(&reprojector)
    }

    /// Reproject with a prebuilt transform whose source must be this CRS.
    pub fn reproject_with(&self, reprojector: &Reprojector) -> Result<Geometry> {
        if reprojector.from_crs() != self.crs {
            return Err(GeoError::Projection(format!(
                "geometry is in {}, reprojector expects {}",
                self.crs,
                reprojector.from_crs()
            )));
        }
        let shape = self.shape.try_map_coords(|c| {
            reprojector
                .transform(c.x, c.y)
                .map(|(x, y)| Coord { x, y })
        })?;
        Geometry::new(shape, reprojector.to_crs())
    }

    /// Planar area in square metres. The CRS must be projected.
    pub fn area_m2(&self) -> Result<f64> {
        self.crs.require_projected("area measurement")?;
        Ok(self.shape.unsigned_area())
    }

    /// Axis-aligned bounding box in this geometry's CRS.
    pub fn bounds(&self) -> Rect<f64> {
        // Non-empty by construction, so the fallback is unreachable.
        self.shape
            .bounding_rect()
            .unwrap_or_else(|| Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }))
    }

    /// Bounding box as a rectangle geometry in the same CRS.
    pub fn envelope(&self) -> Geometry {
        Geometry {
            shape: MultiPolygon(vec![self.bounds().to_polygon()]),
            crs: self.crs,
        }
    }

    /// Centre of the bounding box.
    pub fn center(&self) -> (f64, f64) {
        let c = self.bounds().center();
        (c.x, c.y)
    }

    /// Outward buffer by `distance` CRS units.
    pub(crate) fn buffered(&self, distance: f64) -> Result<Geometry> {
        let grown = self.shape.buffer(distance);
        Geometry::new(grown, self.crs)
    }

    /// WKT rendering (`POLYGON` for one part, `MULTIPOLYGON` otherwise).
    pub fn to_wkt(&self) -> String {
        self.wkt_with(None)
    }

    /// Stable textual key for de-duplication: CRS plus fixed-precision WKT.
    pub fn canonical_key(&self) -> String {
        format!("{};{}", self.crs, self.wkt_with(Some(9)))
    }

    fn wkt_with(&self, precision: Option<usize>) -> String {
        let mut wkt = String::new();
        if self.shape.0.len() == 1 {
            wkt.push_str("POLYGON ");
            push_polygon(&mut wkt, &self.shape.0[0], precision);
        } else {
            wkt.push_str("MULTIPOLYGON (");
            for (i, polygon) in self.shape.0.iter().enumerate() {
                if i > 0 {
                    wkt.push_str(", ");
                }
                push_polygon(&mut wkt, polygon, precision);
            }
            wkt.push(')');
        }
        wkt
    }
}

fn check_ring(ring: &LineString<f64>, polygon: usize, kind: &str) -> Result<()> {
    if ring.0.len() < 4 {
        return Err(GeoError::InvalidGeometry(format!(
            "polygon {polygon}: {kind} ring has {} vertices, need at least 4",
            ring.0.len()
        )));
    }
    if !ring.is_closed() {
        return Err(GeoError::InvalidGeometry(format!("polygon {polygon}: {kind} ring is not closed")));
    }
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(GeoError::InvalidGeometry(format!(
            "polygon {polygon}: {kind} ring has non-finite coordinates"
        )));
    }
    Ok(())
}

fn push_polygon(wkt: &mut String, polygon: &Polygon<f64>, precision: Option<usize>) {
    wkt.push('(');
    push_ring(wkt, polygon.exterior(), precision);
    for ring in polygon.interiors() {
        wkt.push_str(", ");
        push_ring(wkt, ring, precision);
    }
    wkt.push(')');
}

fn push_ring(wkt: &mut String, ring: &LineString<f64>, precision: Option<usize>) {
    wkt.push('(');
    for (i, c) in ring.0.iter().enumerate() {
        if i > 0 {
            wkt.push_str(", ");
        }
        // Writing into a String cannot fail.
        let _ = match precision {
            Some(p) => write!(wkt, "{:.p$} {:.p$}", c.x, c.y),
            None => write!(wkt, "{} {}", c.x, c.y),
        };
    }
    wkt.push(')');
}
