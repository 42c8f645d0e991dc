use chrono::{Local, Utc};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Context, Line as CanvasLine, Map, MapResolution},
        Block, Borders, Cell, Paragraph, Row, Table,
    },
    Frame,
};

use crate::geometry::{horizon_distance_km, is_visible, LonLat};
use crate::map::{circle_ring, Feature, Layer, Shape};
use crate::satellite::TrackState;
use crate::AppState;

/// Splits the screen into map, side panel and footer.
fn screen_layout(area: Rect) -> (Rect, Rect, Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(10),   // Map and side panel
            Constraint::Length(3), // Footer
        ])
        .split(area);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(72), // World map
            Constraint::Percentage(28), // Details
        ])
        .split(rows[0]);

    (columns[0], columns[1], rows[1])
}

fn map_block() -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .title("Satgazer")
        .style(Style::default().fg(Color::White))
}

/// The cells the world map is painted into, inside its border.
pub fn map_inner(area: Rect) -> Rect {
    let (map, _, _) = screen_layout(area);
    map_block().inner(map)
}

/// Geographic position under a terminal cell of the map, if the cell is on
/// the map at all.
pub fn cell_to_lon_lat(map: Rect, column: u16, row: u16) -> Option<LonLat> {
    if map.width == 0
        || map.height == 0
        || column < map.x
        || row < map.y
        || column >= map.x + map.width
        || row >= map.y + map.height
    {
        return None;
    }
    let x = (f64::from(column - map.x) + 0.5) / f64::from(map.width);
    let y = (f64::from(row - map.y) + 0.5) / f64::from(map.height);
    Some(LonLat::new(-180.0 + x * 360.0, 90.0 - y * 180.0))
}

/// How far, in degrees, a click may land from a marker and still hit it.
pub fn cell_tolerance_deg(map: Rect) -> f64 {
    let width = f64::from(map.width.max(1));
    let height = f64::from(map.height.max(1));
    (360.0 / width).max(180.0 / height)
}

pub fn draw_ui(f: &mut Frame, app_state: &AppState) {
    let (map_area, side_area, footer_area) = screen_layout(f.area());

    draw_map(f, map_area, app_state);

    let side_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(6),  // Observer
            Constraint::Length(10), // Tracked satellite
            Constraint::Min(5),     // Nearest
        ])
        .split(side_area);

    draw_header(f, side_chunks[0], app_state);
    draw_tracking(f, side_chunks[1], app_state);
    draw_nearest(f, side_chunks[2], app_state);
    draw_footer(f, footer_area, app_state);
}

fn draw_map(f: &mut Frame, area: Rect, app_state: &AppState) {
    let canvas = Canvas::default()
        .block(map_block())
        .x_bounds([-180.0, 180.0])
        .y_bounds([-90.0, 90.0])
        .marker(symbols::Marker::Braille)
        .paint(|ctx| {
            ctx.draw(&Map {
                color: Color::DarkGray,
                resolution: MapResolution::High,
            });

            for layer in Layer::ALL {
                ctx.layer();
                for (_, feature) in app_state.layers.iter_layer(layer) {
                    draw_feature(ctx, feature);
                }
            }
        });

    f.render_widget(canvas, area);
}

fn draw_feature(ctx: &mut Context, feature: &Feature) {
    let style = &feature.style;
    match &feature.shape {
        Shape::Point(p) => {
            let symbol = style.symbol.unwrap_or('•').to_string();
            ctx.print(p.lon, p.lat, Span::styled(symbol, Style::default().fg(style.color)));
            if let Some(label) = &style.label {
                ctx.print(
                    p.lon + 3.0,
                    p.lat,
                    Span::styled(label.clone(), Style::default().fg(style.color)),
                );
            }
        }
        Shape::Polygon(points) | Shape::LineString(points) => {
            draw_wrapped(ctx, points, style.color, style.dashed);
            if let (Some(label), Some(mid)) = (&style.label, points.get(points.len() / 2)) {
                ctx.print(
                    mid.lon,
                    mid.lat,
                    Span::styled(label.clone(), Style::default().fg(style.color)),
                );
            }
        }
        Shape::Circle { center, radius_m } => {
            draw_wrapped(ctx, &circle_ring(*center, *radius_m), style.color, style.dashed);
        }
    }
}

/// Horizontal shifts that bring every part of a shape onto the map. Rings
/// around a point near the antimeridian run past ±180° and get a second copy
/// on the other edge.
fn wrap_offsets(points: &[LonLat]) -> Vec<f64> {
    let mut offsets = vec![0.0];
    if points.iter().any(|p| p.lon > 180.0) {
        offsets.push(-360.0);
    }
    if points.iter().any(|p| p.lon < -180.0) {
        offsets.push(360.0);
    }
    offsets
}

fn draw_wrapped(ctx: &mut Context, points: &[LonLat], color: Color, dashed: bool) {
    for offset in wrap_offsets(points) {
        draw_polyline(ctx, points, offset, color, dashed);
    }
}

/// Segments jumping more than 180° are left out rather than drawn across
/// the whole map. Dashed lines skip every other segment.
fn draw_polyline(ctx: &mut Context, points: &[LonLat], offset: f64, color: Color, dashed: bool) {
    for (i, pair) in points.windows(2).enumerate() {
        if dashed && i % 2 == 1 {
            continue;
        }
        let (a, b) = (pair[0], pair[1]);
        if (b.lon - a.lon).abs() > 180.0 {
            continue;
        }
        ctx.draw(&CanvasLine {
            x1: a.lon + offset,
            y1: a.lat,
            x2: b.lon + offset,
            y2: b.lat,
            color,
        });
    }
}

fn draw_header(f: &mut Frame, area: Rect, app_state: &AppState) {
    let location = match app_state.home.coordinates() {
        Some(home) => format!("{:.4}°N, {:.4}°E", home.latitude, home.longitude),
        None => "not set".to_string(),
    };

    let header_text = vec![
        Line::from(vec![
            Span::styled("Observer: ", Style::default().fg(Color::Cyan)),
            Span::raw(app_state.config.observer.name.clone()),
        ]),
        Line::from(vec![
            Span::styled("Home: ", Style::default().fg(Color::Cyan)),
            Span::raw(location),
        ]),
        Line::from(vec![
            Span::styled("Height: ", Style::default().fg(Color::Cyan)),
            Span::raw(format!(
                "{:.0}m (horizon {:.0}km)",
                app_state.observer_height_m,
                horizon_distance_km(app_state.observer_height_m)
            )),
        ]),
        Line::from(vec![
            Span::styled("Time: ", Style::default().fg(Color::Cyan)),
            Span::raw(Local::now().format("%Y-%m-%d %H:%M:%S %Z").to_string()),
        ]),
    ];

    let header = Paragraph::new(header_text).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Observer")
            .style(Style::default().fg(Color::White)),
    );

    f.render_widget(header, area);
}

fn draw_tracking(f: &mut Frame, area: Rect, app_state: &AppState) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Tracking")
        .style(Style::default().fg(Color::White));

    let Some(track) = app_state.track.get() else {
        let idle = Paragraph::new("No satellite selected")
            .style(Style::default().fg(Color::Gray))
            .block(block);
        f.render_widget(idle, area);
        return;
    };

    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Cyan));

    let state = match track.state() {
        TrackState::Idle => "idle",
        TrackState::Tracking { path: true } => "tracking with path",
        TrackState::Tracking { path: false } => "tracking",
        TrackState::Stopped => "stopped",
    };

    let tle = track.tle();
    let epoch_age = Utc::now().signed_duration_since(tle.epoch()).num_days();

    let mut lines = vec![
        Line::from(vec![
            Span::styled(
                track.name().to_string(),
                Style::default()
                    .fg(Color::LightGreen)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(format!(" #{}", tle.catalog_number().unwrap_or("?"))),
        ]),
        Line::from(vec![label("State: "), Span::raw(state)]),
        Line::from(vec![label("TLE age: "), Span::raw(format!("{epoch_age} days"))]),
    ];

    if let Some(pos) = track.position() {
        lines.push(Line::from(vec![
            label("Position: "),
            Span::raw(format!("{:.2}°, {:.2}°", pos.latitude, pos.longitude)),
        ]));
        lines.push(Line::from(vec![
            label("Altitude: "),
            Span::raw(format!("{:.0} km", pos.altitude_km)),
        ]));
    }

    if let (Some(angles), Some(observer), Some(pos)) = (
        track.look_angles(),
        app_state.observer(),
        track.position(),
    ) {
        let visible = is_visible(
            observer.location.latitude,
            observer.location.longitude,
            observer.height_m,
            pos.latitude,
            pos.longitude,
            pos.altitude_km,
        );
        let status = if visible {
            ("VISIBLE", Color::Green)
        } else {
            ("BELOW HORIZON", Color::Gray)
        };
        lines.push(Line::from(vec![
            label("Az/El: "),
            Span::raw(format!(
                "{:.1}° {} / {:.1}°",
                angles.azimuth,
                azimuth_to_cardinal(angles.azimuth),
                angles.elevation
            )),
        ]));
        lines.push(Line::from(vec![
            label("Range: "),
            Span::raw(format!("{:.0} km ", angles.range_km)),
            Span::styled(status.0, Style::default().fg(status.1)),
        ]));
    }

    if let Some(path) = track.ground_track() {
        lines.push(Line::from(vec![
            label("Path: "),
            Span::raw(format!(
                "{} segments, {} markers",
                path.segments.len(),
                path.markers.len()
            )),
        ]));
    }

    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_nearest(f: &mut Frame, area: Rect, app_state: &AppState) {
    let header_cells = ["Satellite", "Range"].iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });
    let header = Row::new(header_cells).height(1).bottom_margin(1);

    let tracked = app_state.track.get().map(|t| t.name());
    let rows = app_state
        .nearest
        .satellites()
        .iter()
        .enumerate()
        .map(|(idx, sat)| {
            let style = if idx == app_state.selected {
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD)
            } else if tracked == Some(sat.name.as_str()) {
                Style::default().fg(Color::LightGreen)
            } else {
                Style::default()
            };
            let range = sat
                .distance_km
                .map_or_else(|| "-".to_string(), |d| format!("{d:.0} km"));
            Row::new(vec![
                Cell::from(truncate_string(&sat.name, 18)),
                Cell::from(range),
            ])
            .height(1)
            .style(style)
        });

    let table = Table::new(rows, [Constraint::Min(12), Constraint::Length(9)])
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Nearest satellites")
                .style(Style::default().fg(Color::White)),
        );

    f.render_widget(table, area);
}

fn azimuth_to_cardinal(azimuth: f64) -> &'static str {
    let az = azimuth.rem_euclid(360.0);
    match az {
        a if !(22.5..337.5).contains(&a) => "N",
        a if a < 67.5 => "NE",
        a if a < 112.5 => "E",
        a if a < 157.5 => "SE",
        a if a < 202.5 => "S",
        a if a < 247.5 => "SW",
        a if a < 292.5 => "W",
        _ => "NW",
    }
}

fn draw_footer(f: &mut Frame, area: Rect, app_state: &AppState) {
    let mut text = String::from(
        "↑/↓: Select | Enter/click: Track | p: Path | s: Stop | +/-: Height | right click: Home | q/ESC: Quit",
    );
    if !app_state.status.is_empty() {
        text = format!("{} | {}", app_state.status, text);
    }
    let title = format!(
        "{} shapes, {} timers",
        app_state.layers.len(),
        app_state.scheduler.len()
    );

    let footer = Paragraph::new(text)
        .style(Style::default().fg(Color::Gray))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title(title));

    f.render_widget(footer, area);
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::satellite_horizon_polygon;
    use crate::map::ShapeStyle;
    use ratatui::{backend::TestBackend, Terminal};

    /// Columns of a 360-cell wide map that hold any `color`.
    fn painted_columns(feature: &Feature, color: Color) -> Vec<u16> {
        let mut terminal = Terminal::new(TestBackend::new(360, 90)).unwrap();
        terminal
            .draw(|f| {
                let canvas = Canvas::default()
                    .x_bounds([-180.0, 180.0])
                    .y_bounds([-90.0, 90.0])
                    .marker(symbols::Marker::Braille)
                    .paint(|ctx| draw_feature(ctx, feature));
                f.render_widget(canvas, f.area());
            })
            .unwrap();

        let buffer = terminal.backend().buffer();
        (0..360u16)
            .filter(|&x| (0..90u16).any(|y| buffer[(x, y)].fg == color))
            .collect()
    }

    fn footprint(lon: f64) -> Feature {
        Feature {
            layer: Layer::Horizon,
            shape: Shape::Polygon(satellite_horizon_polygon(0.0, lon, 800.0, 50)),
            style: ShapeStyle::new(Color::Yellow),
        }
    }

    #[test]
    fn test_footprint_wraps_across_antimeridian() {
        let columns = painted_columns(&footprint(175.0), Color::Yellow);
        // The eastern part ends at the right edge, the rest continues on the left.
        assert!(columns.iter().any(|&x| x >= 350));
        assert!(columns.iter().any(|&x| x < 10));
        assert!(!columns.iter().any(|&x| (40..300).contains(&x)));

        let centred = painted_columns(&footprint(0.0), Color::Yellow);
        assert!(!centred.iter().any(|&x| x < 100 || x > 260));
    }

    #[test]
    fn test_wrap_offsets() {
        let inside = [LonLat::new(-170.0, 0.0), LonLat::new(170.0, 0.0)];
        assert_eq!(wrap_offsets(&inside), vec![0.0]);
        let east = [LonLat::new(170.0, 0.0), LonLat::new(190.0, 0.0)];
        assert_eq!(wrap_offsets(&east), vec![0.0, -360.0]);
        let west = [LonLat::new(-190.0, 0.0), LonLat::new(-170.0, 0.0)];
        assert_eq!(wrap_offsets(&west), vec![0.0, 360.0]);
    }

    #[test]
    fn test_azimuth_to_cardinal() {
        assert_eq!(azimuth_to_cardinal(0.0), "N");
        assert_eq!(azimuth_to_cardinal(350.0), "N");
        assert_eq!(azimuth_to_cardinal(45.0), "NE");
        assert_eq!(azimuth_to_cardinal(180.0), "S");
        assert_eq!(azimuth_to_cardinal(300.0), "NW");
        assert_eq!(azimuth_to_cardinal(-90.0), "W");
    }

    #[test]
    fn test_cell_to_lon_lat() {
        let map = Rect::new(1, 1, 360, 180);
        let center = cell_to_lon_lat(map, 181, 91).unwrap();
        assert!((center.lon - 0.5).abs() < 1e-9);
        assert!((center.lat + 0.5).abs() < 1e-9);

        let corner = cell_to_lon_lat(map, 1, 1).unwrap();
        assert!((corner.lon + 179.5).abs() < 1e-9);
        assert!((corner.lat - 89.5).abs() < 1e-9);

        assert!(cell_to_lon_lat(map, 0, 10).is_none());
        assert!(cell_to_lon_lat(map, 361, 10).is_none());
        assert!(cell_to_lon_lat(Rect::new(0, 0, 0, 0), 0, 0).is_none());
    }

    #[test]
    fn test_map_sits_inside_frame() {
        let frame = Rect::new(0, 0, 120, 40);
        let map = map_inner(frame);
        assert_eq!((map.x, map.y), (1, 1));
        assert!(map.width < 120 && map.height < 40);
        assert!(cell_tolerance_deg(map) >= 360.0 / f64::from(map.width));
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("AO-7", 18), "AO-7");
        assert_eq!(truncate_string("ISS (ZARYA) EXTRA LONG", 10), "ISS (ZA...");
    }
}
