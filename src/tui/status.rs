//! Header, notices and key help

use byte_unit::{Byte, UnitType};
use chrono::{DateTime, Local, Utc};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, Paragraph},
};

use crate::dashboard::{Dashboard, NoticeLevel};

fn clock(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Feed health, sample counts and history size
pub struct HeaderWidget<'a> {
    dashboard: &'a Dashboard,
}

impl<'a> HeaderWidget<'a> {
    pub fn new(dashboard: &'a Dashboard) -> Self {
        Self { dashboard }
    }
}

impl<'a> Widget for HeaderWidget<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let feed = self.dashboard.feed_status();
        let feed_span = match (&feed.last_error, feed.last_reading) {
            _ if feed.is_failing() => Span::styled(
                format!(
                    "feed failing since {}",
                    feed.last_error.as_ref().map(|(t, _)| clock(*t)).unwrap_or_default()
                ),
                Style::default().fg(Color::Red),
            ),
            (_, Some(t)) => Span::styled(
                format!("last reading {}", clock(t)),
                Style::default().fg(Color::Green),
            ),
            _ => Span::styled("waiting for first reading", Style::default().fg(Color::Yellow)),
        };

        let size = match self.dashboard.disk_usage() {
            Some(bytes) => {
                let unit = Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary);
                format!("{:.1} {}", unit.get_value(), unit.get_unit())
            }
            None => "unknown".to_string(),
        };

        let config = self.dashboard.config();
        let line = Line::from(vec![
            feed_span,
            Span::raw(format!(
                "  |  {} points  |  retention {}h  |  every {}s  |  history {}",
                self.dashboard.registry().total_points(),
                config.retention_hours,
                config.interval_secs,
                size
            )),
        ]);

        Paragraph::new(line)
            .block(Block::default().title("Water Quality Monitor").borders(Borders::ALL))
            .render(area, buf);
    }
}

/// Recent notices, newest first
pub struct NoticesWidget<'a> {
    dashboard: &'a Dashboard,
}

impl<'a> NoticesWidget<'a> {
    pub fn new(dashboard: &'a Dashboard) -> Self {
        Self { dashboard }
    }
}

impl<'a> Widget for NoticesWidget<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let items: Vec<ListItem> = self
            .dashboard
            .notices()
            .iter()
            .rev()
            .map(|n| {
                let color = match n.level {
                    NoticeLevel::Info => Color::Gray,
                    NoticeLevel::Warn => Color::Yellow,
                    NoticeLevel::Error => Color::Red,
                };
                ListItem::new(format!("[{}] {}", clock(n.at), n.text)).style(Style::default().fg(color))
            })
            .collect();

        let list = List::new(items).block(Block::default().title("Notices").borders(Borders::ALL));
        Widget::render(list, area, buf);
    }
}

/// One-line key reference, with the series toggles numbered
pub struct HelpWidget<'a> {
    dashboard: &'a Dashboard,
}

impl<'a> HelpWidget<'a> {
    pub fn new(dashboard: &'a Dashboard) -> Self {
        Self { dashboard }
    }
}

impl<'a> Widget for HelpWidget<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let mut spans = vec![Span::styled(
            "q quit  r reset  e export  p poll  C clear  ←/→ pan  +/- zoom  ",
            Style::default().fg(Color::Gray),
        )];
        for (i, dataset) in self.dashboard.registry().datasets().iter().enumerate().take(9) {
            let style = if dataset.hidden {
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::CROSSED_OUT)
            } else {
                Style::default().fg(dataset.color)
            };
            spans.push(Span::styled(format!("{} {}", i + 1, dataset.label), style));
            spans.push(Span::raw("  "));
        }
        Paragraph::new(Line::from(spans)).render(area, buf);
    }
}
