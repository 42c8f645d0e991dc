mod catalog;
mod config;
mod database;
mod geometry;
mod ground_track;
mod logging;
mod map;
mod nearest;
mod observer;
mod propagation;
mod satellite;
mod scheduler;
mod settings;
mod ui;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
        MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, layout::Rect, Terminal};
use serde::Serialize;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver};
use tracing::{info, warn};

use config::{data_dir, Config};
use database::Database;
use map::MapLayers;
use nearest::{rank_by_distance, NearestSatellite, NearestSatellites};
use observer::{HomeLocation, Observer, ObserverLocation};
use propagation::{Propagator, Sgp4Propagator, Tle};
use satellite::{ActiveTrack, SatelliteTrack};
use scheduler::{Scheduler, TimerId};
use settings::SettingsStore;

const SETTING_HOME: &str = "home_location";
const SETTING_HEIGHT: &str = "observer_height";
const SETTING_TRACKED: &str = "tracked_satellite";
const SETTING_SHOW_PATH: &str = "show_path";

const HEIGHT_STEP_M: f64 = 10.0;
const NEAREST_REFRESH_SECS: i64 = 1;

#[derive(Parser)]
#[command(name = "satgazer", version, about = "Real-time amateur satellite tracker")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Keep settings in memory instead of the settings database
    #[arg(long)]
    no_persist: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Download a TLE catalog into the configured tle_file
    Fetch {
        #[arg(long, default_value = catalog::AMATEUR_TLE_URL)]
        url: String,
    },
}

pub struct AppState {
    config: Config,
    catalog: Vec<Tle>,
    propagator: Rc<dyn Propagator>,
    layers: MapLayers,
    scheduler: Scheduler,
    home: HomeLocation,
    observer_height_m: f64,
    track: ActiveTrack,
    nearest: NearestSatellites,
    rank_timer: Option<TimerId>,
    clicks: Receiver<String>,
    selected: usize,
    show_path: bool,
    settings: SettingsStore,
    status: String,
}

impl AppState {
    fn new(
        config: Config,
        catalog: Vec<Tle>,
        settings: SettingsStore,
        propagator: Rc<dyn Propagator>,
        now: DateTime<Utc>,
    ) -> Self {
        let (click_tx, clicks) = mpsc::channel();
        let mut nearest = NearestSatellites::new(
            propagator.clone(),
            config.satellites.max_nearest,
            Duration::seconds(NEAREST_REFRESH_SECS),
        );
        nearest.set_click_handler(move |name| {
            let _ = click_tx.send(name.to_string());
        });

        let home_location = settings.load(SETTING_HOME, config.observer.location());
        let observer_height_m = settings.load(SETTING_HEIGHT, config.observer.height_m);
        let show_path = settings.load(SETTING_SHOW_PATH, config.tracking.show_path);
        let tracked: Option<String> = settings.load(SETTING_TRACKED, config.satellites.track.clone());

        let mut app = AppState {
            config,
            catalog,
            propagator,
            layers: MapLayers::new(),
            scheduler: Scheduler::new(),
            home: HomeLocation::new(),
            observer_height_m,
            track: ActiveTrack::default(),
            nearest,
            rank_timer: None,
            clicks,
            selected: 0,
            show_path,
            settings,
            status: String::new(),
        };

        app.home.set_location(&mut app.layers, home_location);
        app.home.update_horizon(&mut app.layers, app.observer_height_m);

        app.rerank(now);
        app.nearest.start(&mut app.layers, &mut app.scheduler, now);
        let rank_interval = Duration::seconds(app.config.tracking.rank_interval_secs as i64);
        app.rank_timer = Some(app.scheduler.every(rank_interval, now));

        if let Some(name) = tracked {
            app.track_satellite(&name, now);
        }
        app
    }

    fn observer(&self) -> Option<Observer> {
        self.home.observer(self.observer_height_m)
    }

    fn save_setting<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        if let Err(e) = self.settings.save(key, value) {
            warn!(key, error = %e, "could not save setting");
        }
    }

    fn rerank(&mut self, now: DateTime<Utc>) {
        let ranked = match self.observer() {
            Some(observer) => rank_by_distance(&self.catalog, &observer, self.propagator.as_ref(), now),
            None => self
                .catalog
                .iter()
                .map(|tle| NearestSatellite {
                    name: tle.name.clone(),
                    tle: tle.clone(),
                    distance_km: None,
                })
                .collect(),
        };
        self.nearest.update_satellites(ranked, &mut self.layers, now);
        self.selected = self
            .selected
            .min(self.nearest.satellites().len().saturating_sub(1));
    }

    /// Starts tracking `name`, stopping whatever was tracked before.
    fn track_satellite(&mut self, name: &str, now: DateTime<Utc>) {
        if self.track.get().is_some_and(|t| t.name() == name) {
            return;
        }
        let Some(tle) = self.catalog.iter().find(|t| t.name == name) else {
            self.status = format!("{name} is not in the catalog");
            return;
        };

        let mut track = match SatelliteTrack::from_lines(
            &tle.name,
            &tle.line1,
            &tle.line2,
            self.propagator.clone(),
            self.config.tracking.track_options(),
        ) {
            Ok(track) => track,
            Err(e) => {
                warn!(satellite = name, error = %e, "cannot track satellite");
                self.status = e.to_string();
                return;
            }
        };
        track.set_show_path(self.show_path, &mut self.layers, &mut self.scheduler, now);

        let observer = self.observer();
        self.track
            .replace(track, &mut self.layers, &mut self.scheduler, observer, now);
        self.save_setting(SETTING_TRACKED, &Some(name));
        self.status = format!("Tracking {name}");
    }

    fn stop_tracking(&mut self) {
        self.track.clear(&mut self.layers, &mut self.scheduler);
        self.save_setting(SETTING_TRACKED, &None::<String>);
        self.status = "Tracking stopped".to_string();
    }

    fn toggle_path(&mut self, now: DateTime<Utc>) {
        self.show_path = !self.show_path;
        if let Some(track) = self.track.get_mut() {
            track.set_show_path(self.show_path, &mut self.layers, &mut self.scheduler, now);
        }
        let show = self.show_path;
        self.save_setting(SETTING_SHOW_PATH, &show);
    }

    fn change_height(&mut self, delta_m: f64) {
        self.observer_height_m = (self.observer_height_m + delta_m).max(0.0);
        self.home.update_horizon(&mut self.layers, self.observer_height_m);
        let observer = self.observer();
        if let Some(track) = self.track.get_mut() {
            track.relocate(&mut self.layers, observer);
        }
        let height = self.observer_height_m;
        self.save_setting(SETTING_HEIGHT, &height);
    }

    fn set_home(&mut self, location: ObserverLocation, now: DateTime<Utc>) {
        self.home.set_location(&mut self.layers, location);
        self.home.update_horizon(&mut self.layers, self.observer_height_m);
        let observer = self.observer();
        if let Some(track) = self.track.get_mut() {
            track.relocate(&mut self.layers, observer);
            track.tick(&mut self.layers, now);
        }
        self.rerank(now);
        self.save_setting(SETTING_HOME, &location);
        info!(latitude = location.latitude, longitude = location.longitude, "home moved");
        self.status = format!("Home set to {:.2}°, {:.2}°", location.latitude, location.longitude);
    }

    /// Left click selects a nearest-satellite marker, right click moves home.
    fn handle_click(&mut self, button: MouseButton, column: u16, row: u16, frame: Rect, now: DateTime<Utc>) {
        let map = ui::map_inner(frame);
        let Some(at) = ui::cell_to_lon_lat(map, column, row) else {
            return;
        };

        match button {
            MouseButton::Left => {
                let hit = self.layers.hit_test(at, ui::cell_tolerance_deg(map));
                self.nearest.on_click(hit);
                self.drain_clicks(now);
            }
            MouseButton::Right => self.set_home(ObserverLocation::new(at.lat, at.lon), now),
            MouseButton::Middle => {}
        }
    }

    fn drain_clicks(&mut self, now: DateTime<Utc>) {
        while let Ok(name) = self.clicks.try_recv() {
            self.track_satellite(&name, now);
        }
    }

    fn fire_timers(&mut self, now: DateTime<Utc>) {
        for id in self.scheduler.due(now) {
            if !self.scheduler.is_active(id) {
                continue;
            }
            if self.rank_timer == Some(id) {
                self.rerank(now);
            } else if !self.nearest.on_timer(id, &mut self.layers, now)
                && !self.track.on_timer(id, &mut self.layers, now)
            {
                warn!(?id, "timer fired with no owner");
                self.scheduler.cancel(id);
            }
        }
    }

    fn select_next(&mut self) {
        if self.selected + 1 < self.nearest.satellites().len() {
            self.selected += 1;
        }
    }

    fn select_previous(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    fn track_selected(&mut self, now: DateTime<Utc>) {
        if let Some(name) = self.nearest.satellites().get(self.selected).map(|s| s.name.clone()) {
            self.track_satellite(&name, now);
        }
    }

    fn shutdown(&mut self) {
        self.track.clear(&mut self.layers, &mut self.scheduler);
        self.nearest.stop(&mut self.layers, &mut self.scheduler);
        if let Some(id) = self.rank_timer.take() {
            self.scheduler.cancel(id);
        }
        self.home.remove(&mut self.layers);
    }
}

fn open_settings(config: &Config, no_persist: bool) -> Result<SettingsStore> {
    if no_persist {
        return Ok(SettingsStore::in_memory());
    }
    let path = config
        .settings
        .database
        .clone()
        .unwrap_or_else(|| data_dir().join("settings.duckdb"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SettingsStore::new(Box::new(Database::open(&path)?)))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;
    let log_path = logging::init_logging(&config.logging)?;

    if let Some(Command::Fetch { url }) = &cli.command {
        let count = catalog::download_catalog(url, &config.satellites.tle_file)?;
        println!(
            "Saved {} satellites to {}",
            count,
            config.satellites.tle_file.display()
        );
        return Ok(());
    }

    let catalog = catalog::load_catalog(&config.satellites.tle_file)?;
    let settings = open_settings(&config, cli.no_persist)?;
    info!(log = %log_path.display(), satellites = catalog.len(), "starting");

    let mut app_state = AppState::new(
        config,
        catalog,
        settings,
        Rc::new(Sgp4Propagator),
        Utc::now(),
    );

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run TUI
    let res = run_app(&mut terminal, &mut app_state);
    app_state.shutdown();

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app_state: &mut AppState,
) -> Result<()> {
    let refresh = std::time::Duration::from_millis(app_state.config.display.refresh_rate);

    loop {
        terminal.draw(|f| {
            ui::draw_ui(f, app_state);
        })?;

        // Wait for input, but no longer than the next timer
        let now = Utc::now();
        let timeout = app_state
            .scheduler
            .next_deadline()
            .map(|deadline| (deadline - now).to_std().unwrap_or_default())
            .map_or(refresh, |wait| wait.min(refresh));

        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => {
                        return Ok(());
                    }
                    KeyCode::Up | KeyCode::Char('k') => app_state.select_previous(),
                    KeyCode::Down | KeyCode::Char('j') => app_state.select_next(),
                    KeyCode::Enter => app_state.track_selected(Utc::now()),
                    KeyCode::Char('p') => app_state.toggle_path(Utc::now()),
                    KeyCode::Char('s') => app_state.stop_tracking(),
                    KeyCode::Char('+') => app_state.change_height(HEIGHT_STEP_M),
                    KeyCode::Char('-') => app_state.change_height(-HEIGHT_STEP_M),
                    _ => {}
                },
                Event::Mouse(mouse) => {
                    if let MouseEventKind::Down(button) = mouse.kind {
                        let size = terminal.size()?;
                        let frame = Rect::new(0, 0, size.width, size.height);
                        app_state.handle_click(button, mouse.column, mouse.row, frame, Utc::now());
                    }
                }
                _ => {}
            }
        }

        app_state.fire_timers(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LonLat;
    use crate::propagation::tests::{iss, FakePropagator};
    use crate::satellite::TrackState;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn test_config(track: Option<&str>) -> Config {
        let track = track
            .map(|name| format!("track = \"{name}\""))
            .unwrap_or_default();
        toml::from_str(&format!(
            r#"
            [observer]
            name = "Test"
            latitude = 0.0
            longitude = 0.0
            height_m = 100.0

            [satellites]
            tle_file = "unused.tle"
            {track}
            "#
        ))
        .unwrap()
    }

    fn catalog() -> Vec<Tle> {
        ["AO-7", "FO-29", "SO-50"]
            .iter()
            .map(|name| {
                let mut tle = iss();
                tle.name = name.to_string();
                tle
            })
            .collect()
    }

    fn app(track: Option<&str>) -> AppState {
        let propagator = Rc::new(FakePropagator::new(t0(), LonLat::new(20.0, 10.0)));
        AppState::new(
            test_config(track),
            catalog(),
            SettingsStore::in_memory(),
            propagator,
            t0(),
        )
    }

    #[test]
    fn test_startup_draws_home_and_nearest() {
        let app = app(None);
        assert_eq!(app.nearest.satellites().len(), 3);
        // home marker + home horizon + three markers
        assert_eq!(app.layers.len(), 5);
        assert!(app.track.get().is_none());
    }

    #[test]
    fn test_configured_satellite_is_tracked() {
        let app = app(Some("FO-29"));
        let track = app.track.get().unwrap();
        assert_eq!(track.name(), "FO-29");
        assert_eq!(track.state(), TrackState::Tracking { path: false });
        assert!(track.look_angles().is_some());
    }

    #[test]
    fn test_selecting_replaces_track_and_persists() {
        let mut app = app(Some("AO-7"));
        let shapes = app.layers.len();

        app.track_satellite("SO-50", t0());
        assert_eq!(app.track.get().unwrap().name(), "SO-50");
        assert_eq!(app.layers.len(), shapes);
        let tracked: Option<String> = app.settings.load(SETTING_TRACKED, None);
        assert_eq!(tracked.as_deref(), Some("SO-50"));

        app.track_satellite("NOT IN CATALOG", t0());
        assert_eq!(app.track.get().unwrap().name(), "SO-50");
    }

    #[test]
    fn test_marker_click_starts_tracking() {
        let mut app = app(None);
        let hit = app.layers.hit_test(LonLat::new(20.0, 10.0), 0.5);
        assert!(app.nearest.on_click(hit).is_some());
        app.drain_clicks(t0());
        assert!(app.track.get().is_some());
    }

    #[test]
    fn test_path_toggle_and_stop() {
        let mut app = app(Some("AO-7"));
        let base = app.layers.len();

        app.toggle_path(t0());
        assert!(app.layers.len() > base);
        assert!(app.settings.load(SETTING_SHOW_PATH, false));

        app.stop_tracking();
        // home marker + horizon + three markers
        assert_eq!(app.layers.len(), 5);

        app.shutdown();
        assert!(app.layers.is_empty());
        assert!(app.scheduler.is_empty());
    }

    #[test]
    fn test_timers_refresh_track_and_markers() {
        let mut app = app(Some("AO-7"));
        let before = app.track.get().unwrap().position().unwrap();

        app.fire_timers(t0() + Duration::seconds(30));
        let after = app.track.get().unwrap().position().unwrap();
        assert!((after.longitude - before.longitude - 2.0).abs() < 1e-9);
        assert_eq!(app.layers.len(), 5 + 3);
    }

    #[test]
    fn test_height_change_updates_horizon() {
        let mut app = app(Some("AO-7"));
        app.change_height(-1000.0);
        assert_eq!(app.observer_height_m, 0.0);
        assert_eq!(app.settings.load(SETTING_HEIGHT, 1.0), 0.0);

        app.set_home(ObserverLocation::new(-33.9, 18.4), t0());
        assert_eq!(app.home.coordinates(), Some(ObserverLocation::new(-33.9, 18.4)));
        let saved = app.settings.load(SETTING_HOME, ObserverLocation::new(0.0, 0.0));
        assert_eq!(saved, ObserverLocation::new(-33.9, 18.4));
    }
}
