//! Regions of interest and user shapes as GeoJSON.
//!
//! Reads `FeatureCollection`, `Feature` or bare `Polygon` / `MultiPolygon`
//! documents. The CRS is never guessed from the file: callers pass it in
//! (RFC 7946 GeoJSON is always WGS84).

use std::collections::HashSet;
use std::io::{Read, Write};

use geo::{LineString, Polygon};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::crs::Crs;
use crate::error::{GeoError, Result};
use crate::geometry::Geometry;

type Position = Vec<f64>;
type Ring = Vec<Position>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Document {
    FeatureCollection { features: Vec<Feature> },
    Feature(Feature),
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct Feature {
    geometry: Option<FeatureGeometry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum FeatureGeometry {
    Polygon { coordinates: Vec<Ring> },
    MultiPolygon { coordinates: Vec<Vec<Ring>> },
    #[serde(other)]
    Unsupported,
}

/// Parse every polygonal geometry in a GeoJSON document, tagging it `crs`.
///
/// Non-polygonal geometries and features without geometry are errors.
pub fn read_geometries<R: Read>(reader: R, crs: Crs) -> Result<Vec<Geometry>> {
    let doc: Document = serde_json::from_reader(reader)?;
    match doc {
        Document::FeatureCollection { features } => features
            .into_iter()
            .enumerate()
            .map(|(i, f)| feature_geometry(f, i, crs))
            .collect(),
        Document::Feature(f) => Ok(vec![feature_geometry(f, 0, crs)?]),
        Document::Polygon { coordinates } => Ok(vec![polygons_to_geometry(&[coordinates], crs)?]),
        Document::MultiPolygon { coordinates } => Ok(vec![polygons_to_geometry(&coordinates, crs)?]),
        Document::Unsupported => Err(GeoError::InvalidGeometry(
            "GeoJSON document is not a Feature, FeatureCollection, Polygon or MultiPolygon".into(),
        )),
    }
}

fn feature_geometry(feature: Feature, index: usize, crs: Crs) -> Result<Geometry> {
    match feature.geometry {
        Some(FeatureGeometry::Polygon { coordinates }) => polygons_to_geometry(&[coordinates], crs),
        Some(FeatureGeometry::MultiPolygon { coordinates }) => polygons_to_geometry(&coordinates, crs),
        Some(FeatureGeometry::Unsupported) => Err(GeoError::InvalidGeometry(format!(
            "feature {index}: only Polygon and MultiPolygon geometries can be used as boxes"
        ))),
        None => Err(GeoError::InvalidGeometry(format!("feature {index} has no geometry"))),
    }
}

fn polygons_to_geometry(polygons: &[Vec<Ring>], crs: Crs) -> Result<Geometry> {
    let mut rings_2d = Vec::with_capacity(polygons.len());
    for rings in polygons {
        let mut poly = Vec::with_capacity(rings.len());
        for ring in rings {
            let mut out = Vec::with_capacity(ring.len());
            for pos in ring {
                match pos.as_slice() {
                    [x, y, ..] => out.push([*x, *y]),
                    _ => {
                        return Err(GeoError::InvalidGeometry(format!(
                            "position with {} ordinate(s)",
                            pos.len()
                        )))
                    }
                }
            }
            poly.push(out);
        }
        rings_2d.push(poly);
    }
    Geometry::from_rings(&rings_2d, crs)
}

/// Write geometries as a WGS84 `FeatureCollection`.
pub fn write_geometries<W: Write>(writer: W, geometries: &[Geometry]) -> Result<()> {
    let mut features = Vec::with_capacity(geometries.len());
    for g in geometries {
        let wgs84 = g.reproject(Crs::WGS84)?;
        let polygons: Vec<Value> = wgs84.shape().0.iter().map(polygon_coordinates).collect();
        let geometry = if polygons.len() == 1 {
            json!({ "type": "Polygon", "coordinates": polygons[0] })
        } else {
            json!({ "type": "MultiPolygon", "coordinates": polygons })
        };
        features.push(json!({ "type": "Feature", "properties": {}, "geometry": geometry }));
    }
    let doc = json!({ "type": "FeatureCollection", "features": features });
    serde_json::to_writer_pretty(writer, &doc)?;
    Ok(())
}

fn polygon_coordinates(polygon: &Polygon<f64>) -> Value {
    let ring = |ls: &LineString<f64>| -> Value { ls.0.iter().map(|c| json!([c.x, c.y])).collect() };
    std::iter::once(ring(polygon.exterior()))
        .chain(polygon.interiors().iter().map(ring))
        .collect()
}

/// Ordered set of drawn shapes, de-duplicated by canonical key.
///
/// Owned by whoever accumulates drawings across interactions; the core only
/// ever sees the plain list from [`DrawnBoxes::geometries`].
#[derive(Debug, Clone, Default)]
pub struct DrawnBoxes {
    geometries: Vec<Geometry>,
    keys: HashSet<String>,
}

impl DrawnBoxes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `geometry` unless an identical one is already present.
    /// Returns whether it was added.
    pub fn insert(&mut self, geometry: Geometry) -> bool {
        if !self.keys.insert(geometry.canonical_key()) {
            return false;
        }
        self.geometries.push(geometry);
        true
    }

    pub fn geometries(&self) -> &[Geometry] {
        &self.geometries
    }

    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Geometry> {
        self.geometries
    }
}

impl Extend<Geometry> for DrawnBoxes {
    fn extend<T: IntoIterator<Item = Geometry>>(&mut self, iter: T) {
        for g in iter {
            self.insert(g);
        }
    }
}
