//! Spherical geometry for the tracker: horizons, visibility, sight-lines and
//! look angles. Everything here is pure; Earth is a sphere of radius
//! [`EARTH_RADIUS_KM`].

use nalgebra::Vector3;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// How far the sight-line control point is pushed out from the Earth's centre.
const CURVE_HEIGHT_FACTOR: f64 = 1.2;

pub const DEFAULT_CURVE_POINTS: usize = 50;
pub const DEFAULT_HORIZON_POINTS: usize = 50;

/// A (longitude, latitude) pair in degrees, in the order map layers expect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    #[cfg(test)]
    pub fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite()
    }
}

/// Sub-satellite point plus altitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,    // degrees
    pub longitude: f64,   // degrees, (-180, 180]
    pub altitude_km: f64, // kilometers
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64, altitude_km: f64) -> Self {
        Self {
            latitude,
            longitude: normalize_longitude(longitude),
            altitude_km,
        }
    }

    pub fn lon_lat(&self) -> LonLat {
        LonLat::new(self.longitude, self.latitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookAngles {
    pub range_km: f64,  // slant range
    pub elevation: f64, // degrees, positive above the local horizon
    pub azimuth: f64,   // degrees, [0, 360)
}

impl LookAngles {
    pub fn label(&self) -> String {
        format!(
            "{:.0}km | {:.1}° | {:.1}°",
            self.range_km, self.elevation, self.azimuth
        )
    }
}

/// Wraps a longitude into (-180, 180].
pub fn normalize_longitude(lon: f64) -> f64 {
    if !lon.is_finite() {
        return lon;
    }
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

fn clamped_acos(x: f64) -> f64 {
    x.clamp(-1.0, 1.0).acos()
}

/// Haversine central angle in radians between two points given in degrees.
pub fn central_angle(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let d_lat = lat2 - lat1;
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let a = a.clamp(0.0, 1.0);
    2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Distance to the visible horizon for an eye `height_m` metres above the
/// ground. Negative heights give NaN.
pub fn horizon_distance_km(height_m: f64) -> f64 {
    3.57 * height_m.sqrt()
}

/// True when the satellite is above the geometric horizon of the observer.
///
/// A satellite at or below the observer's altitude is never visible.
pub fn is_visible(
    observer_lat: f64,
    observer_lon: f64,
    observer_alt_m: f64,
    sat_lat: f64,
    sat_lon: f64,
    sat_alt_km: f64,
) -> bool {
    let h1 = observer_alt_m / 1000.0;
    let h2 = sat_alt_km;
    if !(h2 > h1) {
        return false;
    }

    let c = central_angle(observer_lat, observer_lon, sat_lat, sat_lon);
    let alpha = clamped_acos((EARTH_RADIUS_KM + h1) / (EARTH_RADIUS_KM + h2));
    let beta = clamped_acos(EARTH_RADIUS_KM / (EARTH_RADIUS_KM + h1));

    c < alpha + beta
}

fn to_cartesian(point: LonLat, radius: f64) -> Vector3<f64> {
    let lon = point.lon.to_radians();
    let lat = point.lat.to_radians();
    Vector3::new(
        radius * lat.cos() * lon.cos(),
        radius * lat.cos() * lon.sin(),
        radius * lat.sin(),
    )
}

fn to_lon_lat(v: &Vector3<f64>) -> LonLat {
    let lon = v.y.atan2(v.x);
    let lat = v.z.atan2((v.x * v.x + v.y * v.y).sqrt());
    LonLat::new(lon.to_degrees(), lat.to_degrees())
}

/// Sight-line from `start` to `end` bowed away from the Earth: a quadratic
/// Bézier through Earth-centred space whose control point sits above the
/// midpoint. Returns `num_points + 1` points including both ends.
pub fn curved_line(start: LonLat, end: LonLat, num_points: usize) -> Vec<LonLat> {
    if num_points == 0 {
        return vec![start];
    }

    let p0 = to_cartesian(start, EARTH_RADIUS_KM);
    let p2 = to_cartesian(end, EARTH_RADIUS_KM);

    let mid = (p0 + p2) / 2.0;
    // Antipodal endpoints have no unique midpoint direction; bow over any
    // direction perpendicular to the start.
    let direction = if mid.norm() > 1e-9 {
        mid.normalize()
    } else {
        let axis = if p0.z.abs() < EARTH_RADIUS_KM * 0.9 {
            Vector3::z()
        } else {
            Vector3::x()
        };
        p0.cross(&axis).normalize()
    };
    let control = direction * EARTH_RADIUS_KM * CURVE_HEIGHT_FACTOR;

    (0..=num_points)
        .map(|i| {
            let t = i as f64 / num_points as f64;
            let u = 1.0 - t;
            let p = p0 * (u * u) + control * (2.0 * u * t) + p2 * (t * t);
            to_lon_lat(&p)
        })
        .collect()
}

/// Range, elevation and azimuth from the observer to the satellite.
pub fn look_angles(
    observer_lat: f64,
    observer_lon: f64,
    observer_alt_m: f64,
    sat_lat: f64,
    sat_lon: f64,
    sat_alt_km: f64,
) -> LookAngles {
    let c = central_angle(observer_lat, observer_lon, sat_lat, sat_lon);

    let r1 = EARTH_RADIUS_KM + observer_alt_m / 1000.0;
    let r2 = EARTH_RADIUS_KM + sat_alt_km;

    let range_km = (r2 * r2 + r1 * r1 - 2.0 * r2 * r1 * c.cos()).max(0.0).sqrt();

    // Angle at the observer between the Earth's centre and the satellite.
    // It is 90° on the horizon and 180° at the zenith.
    let elevation = if range_km > 1e-9 {
        let zenith_angle = clamped_acos((range_km * range_km + r1 * r1 - r2 * r2) / (2.0 * range_km * r1));
        -(90.0 - zenith_angle.to_degrees())
    } else {
        90.0
    };

    let lat1 = observer_lat.to_radians();
    let lat2 = sat_lat.to_radians();
    let d_lon = (sat_lon - observer_lon).to_radians();
    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    let azimuth = (y.atan2(x).to_degrees() + 360.0) % 360.0;

    LookAngles {
        range_km,
        elevation,
        azimuth,
    }
}

/// Ring of points where the satellite sits exactly on the horizon. The
/// first point is repeated at the end, so the ring has `num_points + 1`
/// entries. Longitudes are left unwrapped so the ring stays contiguous
/// across the antimeridian.
pub fn satellite_horizon_polygon(
    sat_lat: f64,
    sat_lon: f64,
    sat_alt_km: f64,
    num_points: usize,
) -> Vec<LonLat> {
    let angular_distance = clamped_acos(EARTH_RADIUS_KM / (EARTH_RADIUS_KM + sat_alt_km));
    let lat1 = sat_lat.to_radians();
    let lon1 = sat_lon.to_radians();

    let mut ring: Vec<LonLat> = (0..num_points)
        .map(|i| {
            let bearing = 2.0 * std::f64::consts::PI * i as f64 / num_points as f64;
            let lat2 = (lat1.sin() * angular_distance.cos()
                + lat1.cos() * angular_distance.sin() * bearing.cos())
            .clamp(-1.0, 1.0)
            .asin();
            let lon2 = lon1
                + (bearing.sin() * angular_distance.sin() * lat1.cos())
                    .atan2(angular_distance.cos() - lat1.sin() * lat2.sin());
            LonLat::new(lon2.to_degrees(), lat2.to_degrees())
        })
        .collect();

    let first = ring.first().copied().unwrap_or(LonLat::new(sat_lon, sat_lat));
    ring.push(first);
    ring
}
