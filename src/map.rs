//! Drawable shapes for the map view.
//!
//! Shapes live on one of three layers, drawn bottom-up in the order
//! [`Layer::ALL`]. Whoever adds a shape gets back a [`ShapeId`] and is the
//! only one expected to change or remove it.

use std::collections::BTreeMap;

use ratatui::style::Color;

use crate::geometry::{normalize_longitude, LonLat};

/// Sphere radius used by Web Mercator (EPSG:3857).
pub const MERCATOR_RADIUS_M: f64 = 6378137.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;
const CIRCLE_SEGMENTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    Horizon,
    Line,
    Vector,
}

impl Layer {
    pub const ALL: [Layer; 3] = [Layer::Horizon, Layer::Line, Layer::Vector];
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Point(LonLat),
    /// Closed ring, first point repeated at the end.
    Polygon(Vec<LonLat>),
    LineString(Vec<LonLat>),
    /// Circle with a radius in projected metres.
    Circle { center: LonLat, radius_m: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShapeStyle {
    pub color: Color,
    pub label: Option<String>,
    pub dashed: bool,
    pub symbol: Option<char>,
}

impl ShapeStyle {
    pub fn new(color: Color) -> Self {
        Self {
            color,
            label: None,
            dashed: false,
            symbol: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn dashed(mut self) -> Self {
        self.dashed = true;
        self
    }

    pub fn with_symbol(mut self, symbol: char) -> Self {
        self.symbol = Some(symbol);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub layer: Layer,
    pub shape: Shape,
    pub style: ShapeStyle,
}

#[derive(Debug, Default)]
pub struct MapLayers {
    next_id: u64,
    features: BTreeMap<ShapeId, Feature>,
}

impl MapLayers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, layer: Layer, shape: Shape, style: ShapeStyle) -> ShapeId {
        self.next_id += 1;
        let id = ShapeId(self.next_id);
        self.features.insert(
            id,
            Feature {
                layer,
                shape,
                style,
            },
        );
        id
    }

    /// Replaces the geometry of an existing shape. Returns false if the id is
    /// not on the map.
    pub fn set_geometry(&mut self, id: ShapeId, shape: Shape) -> bool {
        match self.features.get_mut(&id) {
            Some(feature) => {
                feature.shape = shape;
                true
            }
            None => false,
        }
    }

    pub fn set_label(&mut self, id: ShapeId, label: Option<String>) -> bool {
        match self.features.get_mut(&id) {
            Some(feature) => {
                feature.style.label = label;
                true
            }
            None => false,
        }
    }

    /// Removing an id that is not on the map is a no-op.
    pub fn remove(&mut self, id: ShapeId) -> bool {
        self.features.remove(&id).is_some()
    }

    #[cfg(test)]
    pub fn get(&self, id: ShapeId) -> Option<&Feature> {
        self.features.get(&id)
    }

    pub fn contains(&self, id: ShapeId) -> bool {
        self.features.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Shapes on `layer` in insertion order.
    pub fn iter_layer(&self, layer: Layer) -> impl Iterator<Item = (ShapeId, &Feature)> {
        self.features
            .iter()
            .filter(move |(_, f)| f.layer == layer)
            .map(|(id, f)| (*id, f))
    }

    /// Finds the point shape nearest to `at` within `tolerance_deg`,
    /// preferring upper layers and, within a layer, the latest added.
    pub fn hit_test(&self, at: LonLat, tolerance_deg: f64) -> Option<ShapeId> {
        Layer::ALL.iter().rev().find_map(|layer| {
            self.iter_layer(*layer)
                .filter_map(|(id, feature)| match feature.shape {
                    Shape::Point(p) => {
                        let d_lon = normalize_longitude(p.lon - at.lon);
                        let distance = d_lon.hypot(p.lat - at.lat);
                        (distance <= tolerance_deg).then_some((id, distance))
                    }
                    _ => None,
                })
                .min_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(id, _)| id)
        })
    }
}

/// Geographic to Web Mercator metres.
pub fn from_lon_lat(p: LonLat) -> (f64, f64) {
    let lat = p.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let x = MERCATOR_RADIUS_M * p.lon.to_radians();
    let y = MERCATOR_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln();
    (x, y)
}

/// Web Mercator metres back to geographic.
pub fn to_lon_lat(x: f64, y: f64) -> LonLat {
    let lon = (x / MERCATOR_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / MERCATOR_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    LonLat::new(lon, lat)
}

/// Samples a circle drawn in projected space, so it has a constant radius
/// on the Mercator plane rather than on the ground.
pub fn circle_ring(center: LonLat, radius_m: f64) -> Vec<LonLat> {
    let (cx, cy) = from_lon_lat(center);
    (0..=CIRCLE_SEGMENTS)
        .map(|i| {
            let angle = std::f64::consts::TAU * i as f64 / CIRCLE_SEGMENTS as f64;
            to_lon_lat(cx + radius_m * angle.cos(), cy + radius_m * angle.sin())
        })
        .collect()
}
