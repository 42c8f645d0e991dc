use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use ratatui::style::Color;
use tracing::{debug, info, warn};

use crate::geometry::{
    curved_line, look_angles, satellite_horizon_polygon, GeoPoint, LookAngles,
    DEFAULT_CURVE_POINTS, DEFAULT_HORIZON_POINTS,
};
use crate::ground_track::{self, GroundTrack};
use crate::map::{Layer, MapLayers, Shape, ShapeId, ShapeStyle};
use crate::observer::Observer;
use crate::propagation::{Propagator, Tle, TleError};
use crate::scheduler::{Scheduler, TimerId};

#[derive(Debug, Clone)]
pub struct TrackOptions {
    pub position_interval: Duration,
    pub path_interval: Duration,
    pub path_steps: usize,
    pub path_step: Duration,
    pub marker_stride: usize,
}

impl Default for TrackOptions {
    fn default() -> Self {
        Self {
            position_interval: Duration::seconds(1),
            path_interval: Duration::seconds(60),
            path_steps: 100,
            path_step: Duration::minutes(1),
            marker_stride: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Idle,
    Tracking { path: bool },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Tracking,
    Stopped,
}

/// Every shape a track has put on the map.
#[derive(Debug, Default)]
struct TrackShapes {
    position: Option<ShapeId>,
    horizon: Option<ShapeId>,
    line_of_sight: Option<ShapeId>,
    connector: Option<ShapeId>,
    path: Vec<ShapeId>,
}

impl TrackShapes {
    fn ids(&self) -> Vec<ShapeId> {
        [self.position, self.horizon, self.line_of_sight, self.connector]
            .into_iter()
            .flatten()
            .chain(self.path.iter().copied())
            .collect()
    }
}

/// Adds the shape the first time, moves it afterwards.
fn upsert(
    layers: &mut MapLayers,
    slot: &mut Option<ShapeId>,
    layer: Layer,
    shape: Shape,
    style: impl FnOnce() -> ShapeStyle,
) -> ShapeId {
    match *slot {
        Some(id) if layers.contains(id) => {
            layers.set_geometry(id, shape);
            id
        }
        _ => {
            let id = layers.add(layer, shape, style());
            *slot = Some(id);
            id
        }
    }
}

fn retract(layers: &mut MapLayers, slot: &mut Option<ShapeId>) {
    if let Some(id) = slot.take() {
        layers.remove(id);
    }
}

/// A satellite selected for tracking: its position, horizon, sight-line to
/// the observer and, optionally, its predicted ground track.
///
/// A track is started once and stopped once. After [`SatelliteTrack::stop`]
/// it owns nothing on the map and ignores further calls; tracking the
/// satellite again takes a new instance.
pub struct SatelliteTrack {
    tle: Tle,
    propagator: Rc<dyn Propagator>,
    options: TrackOptions,
    phase: Phase,
    show_path: bool,
    observer: Option<Observer>,
    position: Option<GeoPoint>,
    look_angles: Option<LookAngles>,
    ground_track: Option<GroundTrack>,
    shapes: TrackShapes,
    position_timer: Option<TimerId>,
    path_timer: Option<TimerId>,
}

impl SatelliteTrack {
    pub fn new(tle: Tle, propagator: Rc<dyn Propagator>, options: TrackOptions) -> Self {
        Self {
            tle,
            propagator,
            options,
            phase: Phase::Idle,
            show_path: false,
            observer: None,
            position: None,
            look_angles: None,
            ground_track: None,
            shapes: TrackShapes::default(),
            position_timer: None,
            path_timer: None,
        }
    }

    pub fn from_lines(
        name: &str,
        line1: &str,
        line2: &str,
        propagator: Rc<dyn Propagator>,
        options: TrackOptions,
    ) -> Result<Self, TleError> {
        Ok(Self::new(Tle::parse(name, line1, line2)?, propagator, options))
    }

    pub fn name(&self) -> &str {
        &self.tle.name
    }

    pub fn tle(&self) -> &Tle {
        &self.tle
    }

    pub fn state(&self) -> TrackState {
        match self.phase {
            Phase::Idle => TrackState::Idle,
            Phase::Tracking => TrackState::Tracking {
                path: self.show_path,
            },
            Phase::Stopped => TrackState::Stopped,
        }
    }

    pub fn position(&self) -> Option<GeoPoint> {
        self.position
    }

    pub fn look_angles(&self) -> Option<LookAngles> {
        self.look_angles
    }

    pub fn ground_track(&self) -> Option<&GroundTrack> {
        self.ground_track.as_ref()
    }

    /// Computes the first position right away, then keeps it fresh on the
    /// position timer. The ground track, if enabled, refreshes on its own
    /// slower timer.
    pub fn start(
        &mut self,
        layers: &mut MapLayers,
        scheduler: &mut Scheduler,
        observer: Option<Observer>,
        now: DateTime<Utc>,
    ) -> Option<LookAngles> {
        if self.phase != Phase::Idle {
            warn!(satellite = %self.tle.name, state = ?self.state(), "start ignored");
            return self.look_angles;
        }

        self.phase = Phase::Tracking;
        self.observer = observer;
        info!(satellite = %self.tle.name, observer = observer.is_some(), "tracking started");

        let angles = self.tick(layers, now);
        self.position_timer = Some(scheduler.every(self.options.position_interval, now));

        if self.show_path {
            self.update_path(layers, now);
            self.path_timer = Some(scheduler.every(self.options.path_interval, now));
        }
        angles
    }

    /// Re-derives the position at `now` and redraws the position, horizon and
    /// sight-line. When propagation fails the previous shapes stay as they
    /// are and the previous look angles are returned.
    pub fn tick(&mut self, layers: &mut MapLayers, now: DateTime<Utc>) -> Option<LookAngles> {
        if self.phase != Phase::Tracking {
            return self.look_angles;
        }

        let point = match self.propagator.geo_point(&self.tle, now) {
            Ok(point) => point,
            Err(err) => {
                warn!(satellite = %self.tle.name, error = %err, "position update failed");
                return self.look_angles;
            }
        };
        self.position = Some(point);
        let here = point.lon_lat();

        let name = self.tle.name.clone();
        upsert(
            layers,
            &mut self.shapes.position,
            Layer::Vector,
            Shape::Point(here),
            || ShapeStyle::new(Color::LightGreen).with_symbol('✦').with_label(name),
        );

        let ring = satellite_horizon_polygon(
            point.latitude,
            point.longitude,
            point.altitude_km,
            DEFAULT_HORIZON_POINTS,
        );
        upsert(
            layers,
            &mut self.shapes.horizon,
            Layer::Horizon,
            Shape::Polygon(ring),
            || ShapeStyle::new(Color::Yellow),
        );

        if let Some(observer) = self.observer {
            let curve = curved_line(observer.location.lon_lat(), here, DEFAULT_CURVE_POINTS);
            let angles = look_angles(
                observer.location.latitude,
                observer.location.longitude,
                observer.height_m,
                point.latitude,
                point.longitude,
                point.altitude_km,
            );
            let id = upsert(
                layers,
                &mut self.shapes.line_of_sight,
                Layer::Line,
                Shape::LineString(curve),
                || ShapeStyle::new(Color::Green).dashed(),
            );
            layers.set_label(id, Some(angles.label()));
            self.look_angles = Some(angles);
        }

        self.update_connector(layers);
        self.look_angles
    }

    /// Predicts the ground track from `now` and redraws it. Nothing happens
    /// unless the path is shown on a running track.
    pub fn update_path(&mut self, layers: &mut MapLayers, now: DateTime<Utc>) {
        if !self.show_path || self.phase != Phase::Tracking {
            return;
        }

        let mut samples = Vec::with_capacity(self.options.path_steps);
        for i in 0..self.options.path_steps {
            let time = now + self.options.path_step * i as i32;
            match self.propagator.position(&self.tle, time) {
                Ok(point) => samples.push(point),
                Err(err) => {
                    warn!(satellite = %self.tle.name, error = %err, "ground track prediction failed");
                    return;
                }
            }
        }

        self.clear_path(layers);
        let track = ground_track::segment(&samples, self.options.marker_stride);

        for segment in &track.segments {
            let id = layers.add(
                Layer::Line,
                Shape::LineString(segment.clone()),
                ShapeStyle::new(Color::Gray).dashed(),
            );
            self.shapes.path.push(id);
        }

        let step_minutes = self.options.path_step.num_minutes();
        for marker in &track.markers {
            let style = ShapeStyle::new(Color::Green)
                .with_symbol('·')
                .with_label(format!("+{}m", marker.index as i64 * step_minutes));
            let id = layers.add(Layer::Line, Shape::Point(marker.position), style);
            self.shapes.path.push(id);
        }

        debug!(
            satellite = %self.tle.name,
            segments = track.segments.len(),
            markers = track.markers.len(),
            "ground track updated"
        );
        self.ground_track = Some(track);
        self.update_connector(layers);
    }

    pub fn set_show_path(
        &mut self,
        show: bool,
        layers: &mut MapLayers,
        scheduler: &mut Scheduler,
        now: DateTime<Utc>,
    ) {
        if self.phase == Phase::Stopped {
            return;
        }
        self.show_path = show;

        if show {
            if self.phase == Phase::Tracking {
                self.update_path(layers, now);
                if self.path_timer.is_none() {
                    self.path_timer = Some(scheduler.every(self.options.path_interval, now));
                }
            }
        } else {
            if let Some(id) = self.path_timer.take() {
                scheduler.cancel(id);
            }
            self.clear_path(layers);
        }
    }

    /// Switches the observer used for the sight-line from the next tick on.
    pub fn relocate(&mut self, layers: &mut MapLayers, observer: Option<Observer>) {
        self.observer = observer;
        if observer.is_none() {
            retract(layers, &mut self.shapes.line_of_sight);
            self.look_angles = None;
        }
    }

    /// Runs the work for one of this track's timers. Returns false for ids
    /// the track does not own, including timers it has already cancelled.
    pub fn on_timer(&mut self, id: TimerId, layers: &mut MapLayers, now: DateTime<Utc>) -> bool {
        if self.position_timer == Some(id) {
            self.tick(layers, now);
            true
        } else if self.path_timer == Some(id) {
            self.update_path(layers, now);
            true
        } else {
            false
        }
    }

    /// Cancels both timers and takes every shape this track drew off the
    /// map. Safe to call in any state, any number of times.
    pub fn stop(&mut self, layers: &mut MapLayers, scheduler: &mut Scheduler) {
        for id in [self.position_timer.take(), self.path_timer.take()]
            .into_iter()
            .flatten()
        {
            scheduler.cancel(id);
        }

        for id in self.shapes.ids() {
            layers.remove(id);
        }
        self.shapes = TrackShapes::default();
        self.ground_track = None;

        if self.phase != Phase::Stopped {
            info!(satellite = %self.tle.name, "tracking stopped");
        }
        self.phase = Phase::Stopped;
    }

    fn update_connector(&mut self, layers: &mut MapLayers) {
        let first = self.ground_track.as_ref().and_then(GroundTrack::first_point);
        match (self.show_path, self.position, first) {
            (true, Some(position), Some(first)) => {
                upsert(
                    layers,
                    &mut self.shapes.connector,
                    Layer::Vector,
                    Shape::LineString(vec![position.lon_lat(), first]),
                    || ShapeStyle::new(Color::DarkGray),
                );
            }
            _ => retract(layers, &mut self.shapes.connector),
        }
    }

    fn clear_path(&mut self, layers: &mut MapLayers) {
        for id in self.shapes.path.drain(..) {
            layers.remove(id);
        }
        retract(layers, &mut self.shapes.connector);
        self.ground_track = None;
    }

    #[cfg(test)]
    fn owned_shapes(&self) -> Vec<ShapeId> {
        self.shapes.ids()
    }
}

/// Holds the one satellite being tracked. Tracking another stops the
/// previous one first, so two started tracks never coexist.
#[derive(Default)]
pub struct ActiveTrack {
    current: Option<SatelliteTrack>,
}

impl ActiveTrack {
    pub fn replace(
        &mut self,
        mut track: SatelliteTrack,
        layers: &mut MapLayers,
        scheduler: &mut Scheduler,
        observer: Option<Observer>,
        now: DateTime<Utc>,
    ) -> Option<LookAngles> {
        self.clear(layers, scheduler);
        let angles = track.start(layers, scheduler, observer, now);
        self.current = Some(track);
        angles
    }

    pub fn clear(&mut self, layers: &mut MapLayers, scheduler: &mut Scheduler) {
        if let Some(mut track) = self.current.take() {
            track.stop(layers, scheduler);
        }
    }

    pub fn get(&self) -> Option<&SatelliteTrack> {
        self.current.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut SatelliteTrack> {
        self.current.as_mut()
    }

    pub fn on_timer(&mut self, id: TimerId, layers: &mut MapLayers, now: DateTime<Utc>) -> bool {
        self.current
            .as_mut()
            .is_some_and(|track| track.on_timer(id, layers, now))
    }
}
