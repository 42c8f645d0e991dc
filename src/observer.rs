use ratatui::style::Color;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::{horizon_distance_km, LonLat};
use crate::map::{Layer, MapLayers, Shape, ShapeId, ShapeStyle};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObserverLocation {
    pub latitude: f64,  // degrees
    pub longitude: f64, // degrees
}

impl ObserverLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn lon_lat(&self) -> LonLat {
        LonLat::new(self.longitude, self.latitude)
    }
}

/// Where line-of-sight calculations are made from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observer {
    pub location: ObserverLocation,
    pub height_m: f64, // meters above ground
}

impl Observer {
    pub fn new(location: ObserverLocation, height_m: f64) -> Self {
        Self { location, height_m }
    }
}

/// The home marker and its horizon circle.
#[derive(Debug, Default)]
pub struct HomeLocation {
    location: Option<ObserverLocation>,
    marker: Option<ShapeId>,
    horizon: Option<ShapeId>,
}

impl HomeLocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the home marker. A horizon drawn for the previous location is
    /// retracted; call [`HomeLocation::update_horizon`] to draw a new one.
    pub fn set_location(&mut self, layers: &mut MapLayers, location: ObserverLocation) {
        let point = Shape::Point(location.lon_lat());
        match self.marker {
            Some(id) if layers.set_geometry(id, point.clone()) => {}
            _ => {
                let style = ShapeStyle::new(Color::Green).with_symbol('⌂');
                self.marker = Some(layers.add(Layer::Vector, point, style));
            }
        }

        if self.location != Some(location) {
            if let Some(id) = self.horizon.take() {
                layers.remove(id);
            }
        }
        self.location = Some(location);
    }

    /// Replaces the horizon circle using the current location. Does nothing
    /// until a location has been set.
    pub fn update_horizon(&mut self, layers: &mut MapLayers, height_m: f64) {
        if let Some(id) = self.horizon.take() {
            layers.remove(id);
        }

        let Some(location) = self.location else {
            return;
        };

        let radius_m = horizon_distance_km(height_m.max(0.0)) * 1000.0;
        let circle = Shape::Circle {
            center: location.lon_lat(),
            radius_m,
        };
        self.horizon = Some(layers.add(Layer::Horizon, circle, ShapeStyle::new(Color::Blue)));
        debug!(height_m, radius_m, "home horizon updated");
    }

    pub fn coordinates(&self) -> Option<ObserverLocation> {
        self.location
    }

    pub fn observer(&self, height_m: f64) -> Option<Observer> {
        self.location.map(|location| Observer::new(location, height_m))
    }

    pub fn remove(&mut self, layers: &mut MapLayers) {
        for id in [self.marker.take(), self.horizon.take()].into_iter().flatten() {
            layers.remove(id);
        }
        self.location = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_horizon_requires_location() {
        let mut layers = MapLayers::new();
        let mut home = HomeLocation::new();

        home.update_horizon(&mut layers, 100.0);
        assert!(layers.is_empty());
        assert_eq!(home.coordinates(), None);
        assert_eq!(home.observer(10.0), None);
    }

    #[test]
    fn test_update_horizon_replaces_previous() {
        let mut layers = MapLayers::new();
        let mut home = HomeLocation::new();
        let london = ObserverLocation::new(51.5, -0.12);

        home.set_location(&mut layers, london);
        home.update_horizon(&mut layers, 100.0);
        home.update_horizon(&mut layers, 400.0);
        assert_eq!(layers.len(), 2);

        let horizons: Vec<_> = layers.iter_layer(Layer::Horizon).collect();
        assert_eq!(horizons.len(), 1);
        match &horizons[0].1.shape {
            Shape::Circle { center, radius_m } => {
                assert_eq!(*center, london.lon_lat());
                assert!((radius_m - 71_400.0).abs() < 1.0);
            }
            other => panic!("unexpected shape {other:?}"),
        }
        assert_eq!(home.coordinates(), Some(london));
    }

    #[test]
    fn test_relocation_retracts_stale_horizon() {
        let mut layers = MapLayers::new();
        let mut home = HomeLocation::new();

        home.set_location(&mut layers, ObserverLocation::new(10.0, 10.0));
        home.update_horizon(&mut layers, 50.0);
        home.set_location(&mut layers, ObserverLocation::new(20.0, 20.0));
        assert_eq!(layers.len(), 1);
        assert_eq!(layers.iter_layer(Layer::Horizon).count(), 0);

        home.update_horizon(&mut layers, 50.0);
        assert_eq!(layers.len(), 2);

        // Same location again keeps the horizon.
        home.set_location(&mut layers, ObserverLocation::new(20.0, 20.0));
        assert_eq!(layers.len(), 2);
    }

    #[test]
    fn test_remove_retracts_everything() {
        let mut layers = MapLayers::new();
        let mut home = HomeLocation::new();
        home.set_location(&mut layers, ObserverLocation::new(0.0, 0.0));
        home.update_horizon(&mut layers, 10.0);

        home.remove(&mut layers);
        assert!(layers.is_empty());
        assert_eq!(home.coordinates(), None);
    }
}
