//! Overview and detail charts
//!
//! Both charts plot every visible series. The overview always spans the whole
//! retention window and carries the brush; the detail chart spans whatever
//! the brush selects and follows it on every pointer move.

use chrono::{DateTime, Local, Utc};
use ratatui::{
    prelude::*,
    symbols,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, LegendPosition},
};

use crate::dashboard::Dashboard;
use crate::viewport::Viewport;

const BRUSH_BG: Color = Color::Rgb(0x33, 0x41, 0x55);
const BRUSH_EDGE: Color = Color::White;

/// Plot-ready points for one series, x in seconds from the range start
struct Plot {
    name: String,
    color: Color,
    points: Vec<(f64, f64)>,
}

fn collect_plots(dashboard: &Dashboard, range: Viewport) -> Vec<Plot> {
    dashboard
        .registry()
        .visible()
        .map(|d| Plot {
            name: d.display_name(),
            color: d.color,
            points: d
                .series()
                .range(range.min, range.max)
                .map(|p| (seconds_since(range.min, p.timestamp), p.value))
                .collect(),
        })
        .collect()
}

fn seconds_since(origin: DateTime<Utc>, t: DateTime<Utc>) -> f64 {
    (t - origin).num_milliseconds() as f64 / 1000.0
}

/// Y range covering every plotted value with a little headroom
fn y_bounds(plots: &[Plot]) -> [f64; 2] {
    let mut values = plots.iter().flat_map(|p| p.points.iter().map(|(_, y)| *y));
    let Some(first) = values.next() else {
        return [0.0, 1.0];
    };
    let (min, max) = values.fold((first, first), |(lo, hi), y| (lo.min(y), hi.max(y)));
    if (max - min).abs() < f64::EPSILON {
        return [min - 1.0, max + 1.0];
    }
    let pad = (max - min) * 0.05;
    [min - pad, max + pad]
}

fn time_label(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%m-%d %H:%M").to_string()
}

fn datasets(plots: &[Plot], marker: symbols::Marker, named: bool) -> Vec<Dataset<'_>> {
    plots
        .iter()
        .map(|p| {
            let dataset = Dataset::default()
                .marker(marker)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(p.color))
                .data(&p.points);
            if named {
                dataset.name(p.name.clone())
            } else {
                dataset
            }
        })
        .collect()
}

/// The zoomed chart for the brushed range
pub struct DetailChartWidget<'a> {
    dashboard: &'a Dashboard,
}

impl<'a> DetailChartWidget<'a> {
    pub fn new(dashboard: &'a Dashboard) -> Self {
        Self { dashboard }
    }
}

impl<'a> Widget for DetailChartWidget<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let range = self.dashboard.viewport().current_viewport();
        let plots = collect_plots(self.dashboard, range);
        let span = seconds_since(range.min, range.max).max(1.0);
        let [y_min, y_max] = y_bounds(&plots);

        let mid = range.min + (range.max - range.min) / 2;
        let x_labels = vec![
            Span::raw(time_label(range.min)),
            Span::raw(time_label(mid)),
            Span::raw(time_label(range.max)),
        ];
        let y_labels = vec![
            Span::raw(format!("{y_min:.1}")),
            Span::raw(format!("{:.1}", (y_min + y_max) / 2.0)),
            Span::raw(format!("{y_max:.1}")),
        ];

        let title = format!("Detail {} - {}", time_label(range.min), time_label(range.max));
        let chart = Chart::new(datasets(&plots, symbols::Marker::Braille, true))
            .block(Block::default().title(title).borders(Borders::ALL))
            .x_axis(
                Axis::default()
                    .style(Style::default().fg(Color::Gray))
                    .labels(x_labels)
                    .bounds([0.0, span]),
            )
            .y_axis(
                Axis::default()
                    .style(Style::default().fg(Color::Gray))
                    .labels(y_labels)
                    .bounds([y_min, y_max]),
            )
            .hidden_legend_constraints((Constraint::Percentage(50), Constraint::Percentage(50)));

        chart.render(area, buf);
    }
}

/// The full-window chart with the brush drawn over it
pub struct OverviewWidget<'a> {
    dashboard: &'a Dashboard,
}

impl<'a> OverviewWidget<'a> {
    pub fn new(dashboard: &'a Dashboard) -> Self {
        Self { dashboard }
    }

    /// Render and return the track the brush lives on
    pub fn render(&self, area: Rect, buf: &mut Buffer) -> Rect {
        let window = self.dashboard.viewport().window();
        let block = Block::default()
            .title("Overview (drag to zoom, edges to resize)")
            .borders(Borders::ALL);
        let track = block.inner(area);

        let plots = collect_plots(self.dashboard, window);
        let span = seconds_since(window.min, window.max).max(1.0);
        let chart = Chart::new(datasets(&plots, symbols::Marker::Braille, false))
            .block(block)
            .x_axis(Axis::default().bounds([0.0, span]))
            .y_axis(Axis::default().bounds(y_bounds(&plots)))
            .legend_position(None::<LegendPosition>);
        chart.render(area, buf);

        self.render_brush(track, buf);
        track
    }

    fn render_brush(&self, track: Rect, buf: &mut Buffer) {
        if track.width == 0 || track.height == 0 {
            return;
        }
        let brush = self.dashboard.viewport().brush();
        let first = (brush.offset.floor().max(0.0) as u16).min(track.width - 1);
        let last = ((brush.right().ceil() as u16).min(track.width)).max(first + 1) - 1;

        for col in first..=last {
            for row in track.top()..track.bottom() {
                if let Some(cell) = buf.cell_mut((track.x + col, row)) {
                    cell.set_bg(BRUSH_BG);
                    if col == first || col == last {
                        cell.set_symbol("│").set_fg(BRUSH_EDGE);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plot(points: Vec<(f64, f64)>) -> Plot {
        Plot {
            name: "A".into(),
            color: Color::Red,
            points,
        }
    }

    #[test]
    fn test_y_bounds() {
        assert_eq!(y_bounds(&[]), [0.0, 1.0]);
        assert_eq!(y_bounds(&[plot(vec![(0.0, 5.0)])]), [4.0, 6.0]);

        let [lo, hi] = y_bounds(&[plot(vec![(0.0, 0.0)]), plot(vec![(1.0, 100.0)])]);
        assert_eq!(lo, -5.0);
        assert_eq!(hi, 105.0);
    }
}
