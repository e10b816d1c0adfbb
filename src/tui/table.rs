//! History table for the visible window

use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, Row, Table},
};

use crate::render::{HistoryTable, MISSING_CELL, format_timestamp, format_value};

pub struct HistoryTableWidget<'a> {
    table: &'a HistoryTable,
}

impl<'a> HistoryTableWidget<'a> {
    pub fn new(table: &'a HistoryTable) -> Self {
        Self { table }
    }

    fn title(&self) -> String {
        if self.table.omitted > 0 {
            format!(
                "History ({} newest, {} older not shown)",
                self.table.rows.len(),
                self.table.omitted
            )
        } else {
            format!("History ({} rows)", self.table.rows.len())
        }
    }
}

impl<'a> Widget for HistoryTableWidget<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let mut header = vec![Cell::from("Timestamp")];
        header.extend(self.table.columns.iter().map(|c| {
            Cell::from(c.label.clone()).style(Style::default().fg(c.color).add_modifier(Modifier::BOLD))
        }));

        // Rows past the bottom of the widget are clipped anyway
        let visible_rows = area.height.saturating_sub(3) as usize;
        let rows = self.table.rows.iter().take(visible_rows).map(|row| {
            let mut cells = vec![Cell::from(format_timestamp(row.timestamp))];
            cells.extend(row.cells.iter().map(|cell| match cell {
                Some(v) => Cell::from(Text::from(format_value(*v)).alignment(Alignment::Right)),
                None => Cell::from(Text::from(MISSING_CELL).alignment(Alignment::Right))
                    .style(Style::default().fg(Color::DarkGray)),
            }));
            Row::new(cells)
        });

        let mut widths = vec![Constraint::Length(19)];
        widths.extend(self.table.columns.iter().map(|_| Constraint::Min(10)));

        let table = Table::new(rows, widths)
            .header(Row::new(header).bottom_margin(0))
            .block(Block::default().title(self.title()).borders(Borders::ALL))
            .column_spacing(2);

        Widget::render(table, area, buf);
    }
}
