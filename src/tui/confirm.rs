use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

/// A yes/no prompt shown over the dashboard
#[derive(Clone, Debug, Default)]
pub struct ConfirmState {
    pub visible: bool,
    pub message: String,
}

impl ConfirmState {
    pub fn show(&mut self, message: impl Into<String>) {
        self.visible = true;
        self.message = message.into();
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.message.clear();
    }
}

pub struct ConfirmWidget<'a> {
    state: &'a ConfirmState,
}

impl<'a> ConfirmWidget<'a> {
    pub fn new(state: &'a ConfirmState) -> Self {
        Self { state }
    }
}

impl<'a> Widget for ConfirmWidget<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        if !self.state.visible {
            return;
        }

        let width = 54.min(area.width);
        let height = 7.min(area.height);
        let modal = Rect {
            x: area.x + area.width.saturating_sub(width) / 2,
            y: area.y + area.height.saturating_sub(height) / 2,
            width,
            height,
        };
        Clear.render(modal, buf);

        let block = Block::default()
            .title("Confirm")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red));
        let inner = block.inner(modal);
        block.render(modal, buf);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(inner);

        Paragraph::new(self.state.message.as_str())
            .wrap(Wrap { trim: true })
            .render(chunks[0], buf);
        Paragraph::new("y: Yes | n/Esc: No")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Gray))
            .render(chunks[1], buf);
    }
}
