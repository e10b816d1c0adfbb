//! Per-series statistics cards

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph},
};

use crate::render::{NO_DATA_LABEL, SeriesStats, StatCard, format_value};

pub struct StatsWidget<'a> {
    cards: &'a [StatCard],
}

impl<'a> StatsWidget<'a> {
    pub fn new(cards: &'a [StatCard]) -> Self {
        Self { cards }
    }
}

fn card_lines(stats: &SeriesStats) -> Vec<Line<'static>> {
    match stats {
        SeriesStats::NoData => vec![Line::from(Span::styled(
            NO_DATA_LABEL,
            Style::default().fg(Color::Gray),
        ))],
        SeriesStats::Summary {
            min,
            max,
            avg,
            count,
        } => vec![
            Line::from(format!(
                "MIN {}  MAX {}  AVG {}",
                format_value(*min),
                format_value(*max),
                format_value(*avg)
            )),
            Line::from(Span::styled(
                format!("{count} samples"),
                Style::default().fg(Color::Gray),
            )),
        ],
    }
}

impl<'a> Widget for StatsWidget<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if self.cards.is_empty() {
            Paragraph::new("All series hidden")
                .block(Block::default().title("Statistics").borders(Borders::ALL))
                .render(area, buf);
            return;
        }

        let constraints = vec![Constraint::Ratio(1, self.cards.len() as u32); self.cards.len()];
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(constraints)
            .split(area);

        for (card, chunk) in self.cards.iter().zip(chunks.iter()) {
            let title = Span::styled(
                card.label.clone(),
                Style::default().fg(card.color).add_modifier(Modifier::BOLD),
            );
            Paragraph::new(card_lines(&card.stats))
                .block(Block::default().title(title).borders(Borders::ALL))
                .render(*chunk, buf);
        }
    }
}
