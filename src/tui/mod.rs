//! TUI components for the water-quality dashboard
//!
//! Each section of the screen is its own widget; [`draw`] lays them out and
//! reports where the overview track ended up so pointer events can be mapped
//! onto the brush.

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph},
};

pub mod charts;
pub mod confirm;
pub mod stats;
pub mod status;
pub mod table;

use charts::{DetailChartWidget, OverviewWidget};
use confirm::{ConfirmState, ConfirmWidget};
use stats::StatsWidget;
use status::{HeaderWidget, HelpWidget, NoticesWidget};
use table::HistoryTableWidget;

use crate::dashboard::Dashboard;

const HEADER_HEIGHT: u16 = 3;
const OVERVIEW_HEIGHT: u16 = 6;
const STATS_HEIGHT: u16 = 4;
const HELP_HEIGHT: u16 = 1;
const MIN_DETAIL_HEIGHT: u16 = 8;
const MIN_TABLE_HEIGHT: u16 = 6;
const MIN_WIDTH: u16 = 60;

/// Screen positions the event loop needs after a draw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    /// Inside of the overview chart; the brush track
    pub overview_track: Option<Rect>,
}

impl Geometry {
    /// Map a terminal column to a track coordinate (the column's centre)
    pub fn track_x(&self, column: u16) -> Option<f64> {
        let track = self.overview_track?;
        Some(column as f64 - track.x as f64 + 0.5)
    }

    pub fn in_track(&self, column: u16, row: u16) -> bool {
        self.overview_track
            .map(|t| t.contains(ratatui::layout::Position::new(column, row)))
            .unwrap_or(false)
    }
}

/// The main UI function that renders all components
pub fn draw(f: &mut Frame, dashboard: &Dashboard, confirm: &ConfirmState) -> Geometry {
    let area = f.area();
    let fixed = HEADER_HEIGHT + OVERVIEW_HEIGHT + STATS_HEIGHT + HELP_HEIGHT;
    let needed = fixed + MIN_DETAIL_HEIGHT + MIN_TABLE_HEIGHT;

    if area.height < needed || area.width < MIN_WIDTH {
        let error_msg = format!(
            "Terminal too small! Need at least {MIN_WIDTH}x{needed}, have {}x{}",
            area.width, area.height
        );
        Paragraph::new(error_msg)
            .block(Block::default().title("Error").borders(Borders::ALL))
            .style(Style::default().fg(Color::Red))
            .render(area, f.buffer_mut());
        return Geometry::default();
    }

    // Detail chart and table share what is left
    let remaining = area.height - fixed;
    let detail_height = (remaining / 2).max(MIN_DETAIL_HEIGHT);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(HEADER_HEIGHT),
            Constraint::Length(detail_height),
            Constraint::Length(OVERVIEW_HEIGHT),
            Constraint::Length(STATS_HEIGHT),
            Constraint::Min(MIN_TABLE_HEIGHT),
            Constraint::Length(HELP_HEIGHT),
        ])
        .split(area);

    f.render_widget(HeaderWidget::new(dashboard), chunks[0]);
    f.render_widget(DetailChartWidget::new(dashboard), chunks[1]);
    let track = OverviewWidget::new(dashboard).render(chunks[2], f.buffer_mut());
    f.render_widget(StatsWidget::new(&dashboard.cache().cards), chunks[3]);

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(chunks[4]);
    f.render_widget(HistoryTableWidget::new(&dashboard.cache().table), bottom[0]);
    f.render_widget(NoticesWidget::new(dashboard), bottom[1]);

    f.render_widget(HelpWidget::new(dashboard), chunks[5]);
    f.render_widget(ConfirmWidget::new(confirm), area);

    Geometry {
        overview_track: Some(track),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::HistoryStore;
    use chrono::Utc;
    use ratatui::backend::TestBackend;

    fn dashboard(dir: &std::path::Path) -> Dashboard {
        let store = HistoryStore::open(dir.join("data")).unwrap();
        Dashboard::new(Config::default(), None, store, dir.to_path_buf(), Utc::now())
    }

    #[test]
    fn test_draw_reports_track() {
        let dir = tempfile::tempdir().unwrap();
        let dashboard = dashboard(dir.path());
        let mut terminal = Terminal::new(TestBackend::new(100, 40)).unwrap();

        let mut geometry = Geometry::default();
        terminal
            .draw(|f| geometry = draw(f, &dashboard, &ConfirmState::default()))
            .unwrap();

        let track = geometry.overview_track.unwrap();
        assert_eq!(track.width, 98);
        assert!(geometry.in_track(track.x, track.y));
        assert_eq!(geometry.track_x(track.x), Some(0.5));
    }

    #[test]
    fn test_small_terminal_has_no_track() {
        let dir = tempfile::tempdir().unwrap();
        let dashboard = dashboard(dir.path());
        let mut terminal = Terminal::new(TestBackend::new(40, 10)).unwrap();

        let mut geometry = Geometry::default();
        terminal
            .draw(|f| geometry = draw(f, &dashboard, &ConfirmState::default()))
            .unwrap();
        assert_eq!(geometry.overview_track, None);
    }
}
