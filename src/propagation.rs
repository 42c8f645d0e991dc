use std::sync::Arc;

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use sgp4::{Constants, Elements, MinutesSinceEpoch};
use thiserror::Error;

use crate::geometry::{normalize_longitude, GeoPoint, LonLat};

#[derive(Debug, Error)]
pub enum TleError {
    #[error("TLE for {name} is malformed: {source}")]
    Parse {
        name: String,
        #[source]
        source: sgp4::TleError,
    },
    #[error("TLE for {name} has unusable elements: {source}")]
    Elements {
        name: String,
        #[source]
        source: sgp4::ElementsError,
    },
}

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("SGP4 propagation failed for {name}: {source}")]
    Sgp4 {
        name: String,
        #[source]
        source: sgp4::Error,
    },
    #[error("propagation produced a non-finite position for {0}")]
    NonFinite(String),
}

/// A validated two-line element set.
#[derive(Clone)]
pub struct Tle {
    pub name: String,
    pub line1: String,
    pub line2: String,
    elements: Elements,
    constants: Arc<Constants>,
}

impl std::fmt::Debug for Tle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tle")
            .field("name", &self.name)
            .field("line1", &self.line1)
            .field("line2", &self.line2)
            .finish()
    }
}

impl Tle {
    pub fn parse(name: &str, line1: &str, line2: &str) -> Result<Self, TleError> {
        let name = name.trim().to_string();
        let elements = Elements::from_tle(
            Some(name.clone()),
            line1.trim_end().as_bytes(),
            line2.trim_end().as_bytes(),
        )
        .map_err(|source| TleError::Parse {
            name: name.clone(),
            source,
        })?;
        let constants =
            Constants::from_elements(&elements).map_err(|source| TleError::Elements {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            line1: line1.trim_end().to_string(),
            line2: line2.trim_end().to_string(),
            elements,
            constants: Arc::new(constants),
        })
    }

    /// NORAD catalog number, the digits following the line number on line 1.
    pub fn catalog_number(&self) -> Option<&str> {
        let rest = self.line1.strip_prefix('1')?.trim_start();
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        (end > 0).then(|| &rest[..end])
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.elements.datetime.and_utc()
    }

    fn minutes_since_epoch(&self, time: DateTime<Utc>) -> f64 {
        let duration = time.signed_duration_since(self.epoch());
        duration.num_milliseconds() as f64 / 60000.0
    }
}

/// Turns a TLE and a timestamp into the sub-satellite point.
pub trait Propagator {
    fn position(&self, tle: &Tle, time: DateTime<Utc>) -> Result<LonLat, PropagationError>;

    fn height_km(&self, tle: &Tle, time: DateTime<Utc>) -> Result<f64, PropagationError>;

    fn geo_point(&self, tle: &Tle, time: DateTime<Utc>) -> Result<GeoPoint, PropagationError> {
        let position = self.position(tle, time)?;
        let height = self.height_km(tle, time)?;
        Ok(GeoPoint::new(position.lat, position.lon, height))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Sgp4Propagator;

impl Sgp4Propagator {
    fn geodetic(&self, tle: &Tle, time: DateTime<Utc>) -> Result<GeoPoint, PropagationError> {
        let prediction = tle
            .constants
            .propagate(MinutesSinceEpoch(tle.minutes_since_epoch(time)))
            .map_err(|source| PropagationError::Sgp4 {
                name: tle.name.clone(),
                source,
            })?;

        // Position in TEME (km)
        let sat_pos_km = Vector3::new(
            prediction.position[0],
            prediction.position[1],
            prediction.position[2],
        );

        let (lat, lon, alt_km) = eci_to_geodetic(&sat_pos_km, calculate_gmst(time));
        if !(lat.is_finite() && lon.is_finite() && alt_km.is_finite()) {
            return Err(PropagationError::NonFinite(tle.name.clone()));
        }
        Ok(GeoPoint::new(lat, lon, alt_km))
    }
}

impl Propagator for Sgp4Propagator {
    fn position(&self, tle: &Tle, time: DateTime<Utc>) -> Result<LonLat, PropagationError> {
        self.geodetic(tle, time).map(|p| p.lon_lat())
    }

    fn height_km(&self, tle: &Tle, time: DateTime<Utc>) -> Result<f64, PropagationError> {
        self.geodetic(tle, time).map(|p| p.altitude_km)
    }

    fn geo_point(&self, tle: &Tle, time: DateTime<Utc>) -> Result<GeoPoint, PropagationError> {
        self.geodetic(tle, time)
    }
}

/// Greenwich mean sidereal time in radians.
pub fn calculate_gmst(time: DateTime<Utc>) -> f64 {
    let j2000 = DateTime::<Utc>::from_timestamp(946_728_000, 0).unwrap_or_default();

    let jd_epoch = time.signed_duration_since(j2000).num_milliseconds() as f64 / 86400000.0;

    let gmst_hours = (18.697374558 + 24.06570982441908 * jd_epoch).rem_euclid(24.0);

    (gmst_hours * 15.0).to_radians()
}

fn eci_to_geodetic(eci: &Vector3<f64>, gmst: f64) -> (f64, f64, f64) {
    // Rotate into the Earth-fixed frame
    let cos_gmst = gmst.cos();
    let sin_gmst = gmst.sin();

    let x = eci.x * cos_gmst + eci.y * sin_gmst;
    let y = -eci.x * sin_gmst + eci.y * cos_gmst;
    let z = eci.z;

    // WGS84 parameters
    const A: f64 = 6378.137; // km
    const F: f64 = 1.0 / 298.257223563;
    const E2: f64 = F * (2.0 - F);

    let lon = y.atan2(x);

    // Iteratively calculate latitude
    let p = (x * x + y * y).sqrt();
    let mut lat = z.atan2(p);

    for _ in 0..5 {
        let sin_lat = lat.sin();
        let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
        let h = p / lat.cos() - n;
        lat = (z / p / (1.0 - E2 * n / (n + h))).atan();
    }

    let sin_lat = lat.sin();
    let n = A / (1.0 - E2 * sin_lat * sin_lat).sqrt();
    let alt = p / lat.cos() - n;

    (lat.to_degrees(), normalize_longitude(lon.to_degrees()), alt)
}
