//! Coordinate reference systems and point reprojection.
//!
//! CRSs are identified by EPSG code. Only codes with a known PROJ.4 definition
//! can be reprojected; anything else fails with [`GeoError::UnsupportedCrs`].
//! Transforms go through `proj4rs`, which works in radians for geographic
//! systems, so degree conversion happens at this boundary.

use std::fmt;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use serde::{Deserialize, Serialize};

use crate::error::{GeoError, Result};

/// EPSG-coded coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs(u32);

impl Crs {
    /// WGS84 longitude/latitude in degrees.
    pub const WGS84: Crs = Crs(4326);
    /// Spherical web mercator, the usual tile-server raster CRS.
    pub const WEB_MERCATOR: Crs = Crs(3857);

    pub const fn from_epsg(epsg: u32) -> Self {
        Crs(epsg)
    }

    pub const fn epsg(self) -> u32 {
        self.0
    }

    /// WGS84 / UTM zone containing `(lon, lat)`.
    ///
    /// Plain 6° zones; the Norway/Svalbard exceptions are not applied.
    pub fn utm_for(lon: f64, lat: f64) -> Self {
        let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u32;
        if lat >= 0.0 {
            Crs(32600 + zone)
        } else {
            Crs(32700 + zone)
        }
    }

    /// Coordinates are angular (degrees) rather than linear.
    ///
    /// Unregistered codes are not geographic here; [`Crs::require_projected`]
    /// rejects them separately.
    pub fn is_geographic(self) -> bool {
        self.proj_string()
            .is_some_and(|def| def.contains("+proj=longlat"))
    }

    /// PROJ.4 definition string, if the registry knows this code.
    pub fn proj_string(self) -> Option<String> {
        let def = match self.0 {
            4326 => "+proj=longlat +datum=WGS84 +no_defs".to_string(),
            4258 => "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs".to_string(),
            4269 => "+proj=longlat +datum=NAD83 +no_defs".to_string(),
            3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
                .to_string(),
            2154 => "+proj=lcc +lat_0=46.5 +lon_0=3 +lat_1=49 +lat_2=44 +x_0=700000 +y_0=6600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"
                .to_string(),
            3035 => "+proj=laea +lat_0=52 +lon_0=10 +x_0=4321000 +y_0=3210000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"
                .to_string(),
            code @ 32601..=32660 => {
                format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs", code - 32600)
            }
            code @ 32701..=32760 => {
                format!("+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs", code - 32700)
            }
            _ => return None,
        };
        Some(def)
    }

    fn proj(self) -> Result<Proj> {
        let def = self.proj_string().ok_or(GeoError::UnsupportedCrs {
            epsg: self.0,
            reason: "no projection definition registered".into(),
        })?;
        Proj::from_proj_string(&def).map_err(|e| GeoError::UnsupportedCrs {
            epsg: self.0,
            reason: format!("invalid definition: {e:?}"),
        })
    }

    /// Fails unless this CRS is registered and has linear (metre) units.
    pub fn require_projected(self, purpose: &str) -> Result<()> {
        let Some(def) = self.proj_string() else {
            return Err(GeoError::UnsupportedCrs {
                epsg: self.0,
                reason: format!("unregistered CRS cannot be used for {purpose}"),
            });
        };
        if def.contains("+proj=longlat") {
            return Err(GeoError::UnsupportedCrs {
                epsg: self.0,
                reason: format!("geographic CRS cannot be used for {purpose}"),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// Reusable point transform between two CRSs.
pub struct Reprojector {
    from: Crs,
    to: Crs,
    /// `None` when source and target are the same CRS.
    projs: Option<(Proj, Proj)>,
}

impl fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reprojector")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

impl Reprojector {
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        let projs = if from == to {
            if from.proj_string().is_none() {
                return Err(GeoError::UnsupportedCrs {
                    epsg: from.0,
                    reason: "no projection definition registered".into(),
                });
            }
            None
        } else {
            Some((from.proj()?, to.proj()?))
        };
        Ok(Self { from, to, projs })
    }

    pub fn from_crs(&self) -> Crs {
        self.from
    }

    pub fn to_crs(&self) -> Crs {
        self.to
    }

    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transform one coordinate. Geographic input/output is in degrees.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((src, dst)) = &self.projs else {
            return Ok((x, y));
        };
        let mut point = if self.from.is_geographic() {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(src, dst, &mut point).map_err(|e| {
            GeoError::Projection(format!("({x}, {y}) {} -> {}: {e:?}", self.from, self.to))
        })?;
        let (out_x, out_y) = if self.to.is_geographic() {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if !out_x.is_finite() || !out_y.is_finite() {
            return Err(GeoError::Projection(format!(
                "({x}, {y}) {} -> {} produced a non-finite coordinate",
                self.from, self.to
            )));
        }
        Ok((out_x, out_y))
    }
}
