//! Georeferenced detection records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::frame::PixelBBox;
use crate::geometry::Geometry;

/// Label written for every record; the detector is single-class.
pub const TREE_LABEL: &str = "Tree";

/// Who produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Model,
    User,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Provenance::Model => "model",
            Provenance::User => "user",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tree crown, from the detector or drawn by a user.
///
/// User records never carry a score: [`Detection::user`] takes none, and
/// re-tagging a record as user clears it.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    bbox: PixelBBox,
    label: String,
    score: Option<f64>,
    geometry: Geometry,
    area_m2: f64,
    provenance: Provenance,
    /// Extra string columns, keyed by column name.
    attributes: BTreeMap<String, String>,
}

impl Detection {
    pub fn model(bbox: PixelBBox, label: impl Into<String>, score: f64, geometry: Geometry, area_m2: f64) -> Self {
        Self {
            bbox,
            label: label.into(),
            score: Some(score),
            geometry,
            area_m2,
            provenance: Provenance::Model,
            attributes: BTreeMap::new(),
        }
    }

    pub fn user(bbox: PixelBBox, label: impl Into<String>, geometry: Geometry, area_m2: f64) -> Self {
        Self {
            bbox,
            label: label.into(),
            score: None,
            geometry,
            area_m2,
            provenance: Provenance::User,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn bbox(&self) -> PixelBBox {
        self.bbox
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn score(&self) -> Option<f64> {
        self.score
    }

    /// Geometry in the display CRS.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Area measured in a projected CRS.
    pub fn area_m2(&self) -> f64 {
        self.area_m2
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub(crate) fn tagged(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        if provenance == Provenance::User {
            self.score = None;
        }
        self
    }
}
