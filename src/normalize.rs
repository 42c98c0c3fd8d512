//! Minimum-area normalization of a region of interest.
//!
//! A region that is too small yields too few imagery pixels for the detector.
//! [`AreaNormalizer`] grows such a region with outward buffers, measured in a
//! caller-chosen projected CRS, until it reaches the requested area.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{GeoError, Result};
use crate::geometry::Geometry;

/// Growth schedule of the buffer loop.
///
/// The first buffer distance is `initial_scale * sqrt(deficit_m2)`, every
/// following one is the previous times `growth_factor`. Buffers accumulate on
/// the already grown shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    pub initial_scale: f64,
    pub growth_factor: f64,
    pub max_iterations: usize,
}

impl Default for NormalizeParams {
    fn default() -> Self {
        Self {
            // A point buffered by sqrt(A/π) covers exactly A.
            initial_scale: 1.0 / std::f64::consts::PI.sqrt(),
            growth_factor: 1.1,
            max_iterations: 64,
        }
    }
}

impl NormalizeParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_scale.is_finite() && self.initial_scale > 0.0) {
            return Err(GeoError::InvalidParameter(format!(
                "initial_scale must be positive, got {}",
                self.initial_scale
            )));
        }
        if !(self.growth_factor.is_finite() && self.growth_factor > 1.0) {
            return Err(GeoError::InvalidParameter(format!(
                "growth_factor must exceed 1, got {}",
                self.growth_factor
            )));
        }
        if self.max_iterations == 0 {
            return Err(GeoError::InvalidParameter("max_iterations must be at least 1".into()));
        }
        Ok(())
    }
}

/// Result of a normalization run, for callers that want to report it.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub geometry: Geometry,
    /// Area in the measurement CRS after growing.
    pub area_m2: f64,
    /// Buffer passes applied (0 when the input was already large enough).
    pub iterations: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AreaNormalizer {
    params: NormalizeParams,
}

impl AreaNormalizer {
    pub fn new(params: NormalizeParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &NormalizeParams {
        &self.params
    }

    /// Grow `geometry` until its area in `measurement_crs` is at least
    /// `min_area_m2`, then return it in `output_crs`.
    pub fn normalize(
        &self,
        geometry: &Geometry,
        min_area_m2: f64,
        measurement_crs: Crs,
        output_crs: Crs,
    ) -> Result<Geometry> {
        Ok(self
            .normalize_detailed(geometry, min_area_m2, measurement_crs, output_crs)?
            .geometry)
    }

    /// [`normalize`](Self::normalize) plus the final area and iteration count.
    pub fn normalize_detailed(
        &self,
        geometry: &Geometry,
        min_area_m2: f64,
        measurement_crs: Crs,
        output_crs: Crs,
    ) -> Result<Normalized> {
        measurement_crs.require_projected("area normalization")?;
        if !(min_area_m2.is_finite() && min_area_m2 >= 0.0) {
            return Err(GeoError::InvalidParameter(format!(
                "min_area_m2 must be a non-negative number, got {min_area_m2}"
            )));
        }

        let measured = geometry.reproject(measurement_crs)?;
        let start_area = measured.area_m2()?;
        if start_area >= min_area_m2 {
            debug!("ROI area {start_area:.1} m² already meets {min_area_m2:.1} m²");
            // Reproject the untouched input so an unchanged CRS stays bit-identical.
            return Ok(Normalized {
                geometry: geometry.reproject(output_crs)?,
                area_m2: start_area,
                iterations: 0,
            });
        }

        let mut current = measured;
        let mut area = start_area;
        let mut distance = self.params.initial_scale * (min_area_m2 - start_area).sqrt();
        let mut iterations = 0;
        while area < min_area_m2 {
            if iterations == self.params.max_iterations {
                return Err(GeoError::GeometryExpansion {
                    iterations,
                    area_m2: area,
                    target_m2: min_area_m2,
                });
            }
            current = current.buffered(distance)?;
            area = current.area_m2()?;
            iterations += 1;
            debug!("buffer pass {iterations}: d = {distance:.2} m, area = {area:.1} m²");
            distance *= self.params.growth_factor;
        }

        info!(
            "ROI grown from {start_area:.1} m² to {area:.1} m² in {iterations} buffer pass(es) ({measurement_crs})"
        );
        Ok(Normalized {
            geometry: current.reproject(output_crs)?,
            area_m2: area,
            iterations,
        })
    }
}
