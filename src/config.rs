//! Pipeline settings, loadable from JSON.
//!
//! Every field has a default, so a config file only needs the keys it changes.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{GeoError, Result};
use crate::georeference::GeoreferenceParams;
use crate::normalize::NormalizeParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum ROI area (m²) before imagery is requested.
    pub min_area_m2: f64,
    /// Projected CRS the ROI area is measured and grown in.
    pub measurement_crs: Crs,
    /// CRS of the normalized ROI handed to the imagery provider.
    pub output_crs: Crs,
    /// Assumed raster CRS when the GeoTIFF declares none.
    pub native_crs: Crs,
    /// CRS of the stored detection geometry.
    pub display_crs: Crs,
    /// CRS for the area column; `None` picks the UTM zone of the raster centre.
    pub projected_crs: Option<Crs>,
    pub score_threshold: f64,
    pub max_area_m2: f64,
    pub patch_size: u32,
    pub overlap: f64,
    /// Imagery zoom level, passed through to the provider.
    pub zoom: u8,
    pub normalize: NormalizeParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_area_m2: 9500.0,
            measurement_crs: Crs::from_epsg(32644),
            output_crs: Crs::WGS84,
            native_crs: Crs::WEB_MERCATOR,
            display_crs: Crs::WGS84,
            projected_crs: None,
            score_threshold: 0.15,
            max_area_m2: 60.0,
            patch_size: 400,
            overlap: 0.1,
            zoom: 19,
            normalize: NormalizeParams::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_area_m2.is_finite() && self.min_area_m2 >= 0.0) {
            return Err(GeoError::InvalidParameter(format!(
                "min_area_m2 must be non-negative, got {}",
                self.min_area_m2
            )));
        }
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(GeoError::InvalidParameter(format!(
                "score_threshold must lie in [0, 1], got {}",
                self.score_threshold
            )));
        }
        if !(self.max_area_m2.is_finite() && self.max_area_m2 > 0.0) {
            return Err(GeoError::InvalidParameter(format!(
                "max_area_m2 must be positive, got {}",
                self.max_area_m2
            )));
        }
        self.measurement_crs.require_projected("area measurement")?;
        if let Some(crs) = self.projected_crs {
            crs.require_projected("area column")?;
        }
        self.normalize.validate()
    }

    /// Georeferencing parameters once the projected CRS is settled.
    pub fn georeference_params(&self, projected_crs: Crs) -> GeoreferenceParams {
        GeoreferenceParams {
            display_crs: self.display_crs,
            projected_crs,
            score_threshold: self.score_threshold,
            max_area_m2: self.max_area_m2,
        }
    }
}
