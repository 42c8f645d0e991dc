use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use ratatui::style::Color;
use tracing::{debug, warn};

use crate::geometry::{look_angles, LonLat};
use crate::map::{Layer, MapLayers, Shape, ShapeId, ShapeStyle};
use crate::observer::Observer;
use crate::propagation::{Propagator, Tle};
use crate::scheduler::{Scheduler, TimerId};

pub const MAX_NEAREST: usize = 5;

#[derive(Debug, Clone)]
pub struct NearestSatellite {
    pub name: String,
    pub tle: Tle,
    pub distance_km: Option<f64>,
}

impl NearestSatellite {
    pub fn label(&self) -> String {
        match self.distance_km {
            Some(distance) => format!("{} ({:.0}km)", self.name, distance),
            None => self.name.clone(),
        }
    }
}

/// Orders the catalog by slant range from the observer, closest first.
/// Entries that fail to propagate are left out.
pub fn rank_by_distance(
    catalog: &[Tle],
    observer: &Observer,
    propagator: &dyn Propagator,
    now: DateTime<Utc>,
) -> Vec<NearestSatellite> {
    let mut ranked: Vec<NearestSatellite> = catalog
        .iter()
        .filter_map(|tle| match propagator.geo_point(tle, now) {
            Ok(point) => {
                let angles = look_angles(
                    observer.location.latitude,
                    observer.location.longitude,
                    observer.height_m,
                    point.latitude,
                    point.longitude,
                    point.altitude_km,
                );
                Some(NearestSatellite {
                    name: tle.name.clone(),
                    tle: tle.clone(),
                    distance_km: Some(angles.range_km),
                })
            }
            Err(err) => {
                debug!(satellite = %tle.name, error = %err, "skipped while ranking");
                None
            }
        })
        .collect();

    ranked.sort_by(|a, b| {
        let a = a.distance_km.unwrap_or(f64::INFINITY);
        let b = b.distance_km.unwrap_or(f64::INFINITY);
        a.total_cmp(&b)
    });
    ranked
}

#[derive(Debug)]
struct Marker {
    id: ShapeId,
    name: String,
    position: LonLat,
}

type ClickHandler = Box<dyn FnMut(&str)>;

/// Lightweight markers for the satellites closest to the observer.
pub struct NearestSatellites {
    propagator: Rc<dyn Propagator>,
    capacity: usize,
    interval: Duration,
    satellites: Vec<NearestSatellite>,
    markers: Vec<Marker>,
    timer: Option<TimerId>,
    on_click: Option<ClickHandler>,
}

impl NearestSatellites {
    pub fn new(propagator: Rc<dyn Propagator>, capacity: usize, interval: Duration) -> Self {
        Self {
            propagator,
            capacity,
            interval,
            satellites: Vec::new(),
            markers: Vec::new(),
            timer: None,
            on_click: None,
        }
    }

    pub fn set_click_handler(&mut self, handler: impl FnMut(&str) + 'static) {
        self.on_click = Some(Box::new(handler));
    }

    pub fn satellites(&self) -> &[NearestSatellite] {
        &self.satellites
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Keeps the first entries up to capacity and redraws all markers.
    pub fn update_satellites(
        &mut self,
        mut satellites: Vec<NearestSatellite>,
        layers: &mut MapLayers,
        now: DateTime<Utc>,
    ) {
        satellites.truncate(self.capacity);
        self.satellites = satellites;
        self.refresh(layers, now);
    }

    /// Replaces every marker with a fresh one at the position for `now`. A
    /// satellite that fails to propagate keeps its previous position.
    pub fn refresh(&mut self, layers: &mut MapLayers, now: DateTime<Utc>) {
        let previous: Vec<Marker> = self.markers.drain(..).collect();
        for marker in &previous {
            layers.remove(marker.id);
        }

        for satellite in &self.satellites {
            let position = match self.propagator.position(&satellite.tle, now) {
                Ok(position) => position,
                Err(err) => {
                    let last = previous
                        .iter()
                        .find(|m| m.name == satellite.name)
                        .map(|m| m.position);
                    warn!(satellite = %satellite.name, error = %err, "marker update failed");
                    match last {
                        Some(position) => position,
                        None => continue,
                    }
                }
            };

            let style = ShapeStyle::new(Color::Gray)
                .with_symbol('✧')
                .with_label(satellite.label());
            let id = layers.add(Layer::Vector, Shape::Point(position), style);
            self.markers.push(Marker {
                id,
                name: satellite.name.clone(),
                position,
            });
        }
    }

    pub fn start(&mut self, layers: &mut MapLayers, scheduler: &mut Scheduler, now: DateTime<Utc>) {
        self.refresh(layers, now);
        if self.timer.is_none() {
            self.timer = Some(scheduler.every(self.interval, now));
        }
    }

    pub fn on_timer(&mut self, id: TimerId, layers: &mut MapLayers, now: DateTime<Utc>) -> bool {
        if self.timer == Some(id) {
            self.refresh(layers, now);
            true
        } else {
            false
        }
    }

    pub fn stop(&mut self, layers: &mut MapLayers, scheduler: &mut Scheduler) {
        if let Some(id) = self.timer.take() {
            scheduler.cancel(id);
        }
        self.remove(layers);
    }

    pub fn remove(&mut self, layers: &mut MapLayers) {
        for marker in self.markers.drain(..) {
            layers.remove(marker.id);
        }
    }

    /// Resolves a hit-test result to one of our markers and hands its name to
    /// the click handler. Hits on shapes we do not own are ignored.
    pub fn on_click(&mut self, hit: Option<ShapeId>) -> Option<String> {
        let hit = hit?;
        let name = self.markers.iter().find(|m| m.id == hit)?.name.clone();
        if let Some(handler) = self.on_click.as_mut() {
            handler(&name);
        }
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::ObserverLocation;
    use crate::propagation::tests::{iss, FakePropagator};
    use chrono::TimeZone;
    use std::cell::RefCell;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn named(name: &str, distance_km: Option<f64>) -> NearestSatellite {
        let mut tle = iss();
        tle.name = name.to_string();
        NearestSatellite {
            name: name.to_string(),
            tle,
            distance_km,
        }
    }

    fn aggregator(propagator: Rc<FakePropagator>) -> NearestSatellites {
        NearestSatellites::new(propagator, MAX_NEAREST, Duration::seconds(1))
    }

    #[test]
    fn test_truncates_and_replaces_markers() {
        let mut layers = MapLayers::new();
        let mut nearest = aggregator(Rc::new(FakePropagator::new(t0(), LonLat::new(0.0, 0.0))));

        let many: Vec<_> = (0..8).map(|i| named(&format!("SAT-{i}"), Some(i as f64))).collect();
        nearest.update_satellites(many, &mut layers, t0());
        assert_eq!(nearest.satellites().len(), MAX_NEAREST);
        assert_eq!(layers.len(), MAX_NEAREST);

        nearest.update_satellites(vec![named("ONLY", None)], &mut layers, t0());
        assert_eq!(layers.len(), 1);
        let (_, feature) = layers.iter_layer(Layer::Vector).next().unwrap();
        assert_eq!(feature.style.label.as_deref(), Some("ONLY"));
    }

    #[test]
    fn test_label_includes_distance() {
        assert_eq!(named("AO-91", Some(1234.4)).label(), "AO-91 (1234km)");
        assert_eq!(named("AO-91", None).label(), "AO-91");
    }

    #[test]
    fn test_periodic_refresh_moves_markers() {
        let mut layers = MapLayers::new();
        let mut scheduler = Scheduler::new();
        let mut nearest = aggregator(Rc::new(FakePropagator::new(t0(), LonLat::new(0.0, 0.0))));
        nearest.update_satellites(vec![named("A", Some(1.0))], &mut layers, t0());
        nearest.start(&mut layers, &mut scheduler, t0());
        assert!(nearest.is_running());

        let now = t0() + Duration::seconds(30);
        for id in scheduler.due(now) {
            assert!(nearest.on_timer(id, &mut layers, now));
        }
        let (_, feature) = layers.iter_layer(Layer::Vector).next().unwrap();
        assert_eq!(feature.shape, Shape::Point(LonLat::new(2.0, 0.0)));
        assert_eq!(layers.len(), 1);

        nearest.stop(&mut layers, &mut scheduler);
        assert!(layers.is_empty());
        assert!(scheduler.is_empty());
        assert!(!nearest.is_running());
    }

    #[test]
    fn test_failed_refresh_keeps_last_position() {
        let propagator = Rc::new(FakePropagator::new(t0(), LonLat::new(0.0, 0.0)));
        let mut layers = MapLayers::new();
        let mut nearest = aggregator(propagator.clone());
        nearest.update_satellites(vec![named("A", Some(1.0))], &mut layers, t0());

        propagator.failing.set(true);
        nearest.refresh(&mut layers, t0() + Duration::minutes(1));
        assert_eq!(layers.len(), 1);
        let (_, feature) = layers.iter_layer(Layer::Vector).next().unwrap();
        assert_eq!(feature.shape, Shape::Point(LonLat::new(0.0, 0.0)));
    }

    #[test]
    fn test_click_resolves_own_markers_once() {
        let mut layers = MapLayers::new();
        let mut nearest = aggregator(Rc::new(FakePropagator::new(t0(), LonLat::new(30.0, 10.0))));
        let clicks = Rc::new(RefCell::new(Vec::new()));
        let sink = clicks.clone();
        nearest.set_click_handler(move |name| sink.borrow_mut().push(name.to_string()));

        nearest.update_satellites(vec![named("FO-29", Some(900.0))], &mut layers, t0());
        let foreign = layers.add(
            Layer::Vector,
            Shape::Point(LonLat::new(-60.0, 0.0)),
            ShapeStyle::new(Color::Red),
        );

        let hit = layers.hit_test(LonLat::new(30.2, 10.1), 1.0);
        assert_eq!(nearest.on_click(hit), Some("FO-29".to_string()));
        assert_eq!(nearest.on_click(Some(foreign)), None);
        assert_eq!(nearest.on_click(None), None);
        assert_eq!(*clicks.borrow(), vec!["FO-29".to_string()]);
    }

    #[test]
    fn test_rank_by_distance() {
        let propagator = FakePropagator::new(t0(), LonLat::new(0.0, 0.0));
        let catalog: Vec<Tle> = ["AO-7", "SO-50"]
            .iter()
            .map(|name| {
                let mut tle = iss();
                tle.name = name.to_string();
                tle
            })
            .collect();
        let observer = Observer::new(ObserverLocation::new(0.0, 0.0), 0.0);

        let ranked = rank_by_distance(&catalog, &observer, &propagator, t0());
        assert_eq!(ranked.len(), 2);
        assert!((ranked[0].distance_km.unwrap() - 500.0).abs() < 1e-6);

        propagator.failing.set(true);
        assert!(rank_by_distance(&catalog, &observer, &propagator, t0()).is_empty());
    }
}
