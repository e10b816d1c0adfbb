use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, Utc};
use crossterm::{
    ExecutableCommand,
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
    },
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::prelude::*;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio::time;

use crate::dashboard::Dashboard;
use crate::events::{Message, SequenceGate};
use crate::feed::CompositeFeed;
use crate::ingest::{IngestReport, Ingestor, numeric_value};
use crate::poller::Poller;
use crate::registry::DatasetRegistry;
use crate::tui::{self, Geometry, confirm::ConfirmState};
use crate::viewport::Nudge;

const FRAME_INTERVAL: Duration = Duration::from_millis(50);

/// What the loop should do after a key press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
    RebuildFeed,
}

pub struct DashboardUi {
    terminal: Terminal<CrosstermBackend<std::io::Stdout>>,
    rx: mpsc::Receiver<Message>,
    geometry: Geometry,
    confirm: ConfirmState,
}

impl DashboardUi {
    pub fn new(rx: mpsc::Receiver<Message>) -> Result<Self> {
        enable_raw_mode()?;
        let mut stdout = stdout();
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        Ok(Self {
            terminal,
            rx,
            geometry: Geometry::default(),
            confirm: ConfirmState::default(),
        })
    }

    pub async fn run(&mut self, dashboard: &mut Dashboard, mut poller: Poller) -> Result<()> {
        let mut interval = time::interval(FRAME_INTERVAL);
        let mut running = poller.spawn();

        loop {
            // Drain input without blocking the frame
            while event::poll(Duration::ZERO)? {
                let flow = match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        self.handle_key(key, dashboard, &poller)
                    }
                    Event::Mouse(mouse) => {
                        self.handle_mouse(mouse, dashboard);
                        Flow::Continue
                    }
                    _ => Flow::Continue,
                };

                match flow {
                    Flow::Continue => {}
                    Flow::Quit => {
                        running.abort();
                        return Ok(());
                    }
                    Flow::RebuildFeed => {
                        running.abort();
                        (poller, running) = rebuild_poller(&poller, dashboard);
                    }
                }
            }

            drain_messages(&mut self.rx, dashboard);

            let mut geometry = self.geometry;
            self.terminal.draw(|f| {
                geometry = tui::draw(f, dashboard, &self.confirm);
            })?;
            self.geometry = geometry;
            if let Some(track) = geometry.overview_track {
                dashboard.set_track_width(track.width as f64);
            }

            interval.tick().await;
        }
    }

    fn handle_key(&mut self, key: KeyEvent, dashboard: &mut Dashboard, poller: &Poller) -> Flow {
        if self.confirm.visible {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => {
                    self.confirm.hide();
                    // Failures are already posted as notices
                    let _ = dashboard.clear_history(Utc::now(), poller.issued());
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => self.confirm.hide(),
                _ => {}
            }
            return Flow::Continue;
        }

        let step = self
            .geometry
            .overview_track
            .map(|t| (t.width as f64 / 20.0).max(1.0))
            .unwrap_or(1.0);

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Flow::Quit,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Flow::Quit;
            }
            KeyCode::Char('r') => {
                if dashboard.reset_view(Utc::now(), poller.issued()).config_changed {
                    return Flow::RebuildFeed;
                }
            }
            KeyCode::Char('e') => {
                let _ = dashboard.export_visible(Utc::now());
            }
            KeyCode::Char('C') => self
                .confirm
                .show("Delete ALL stored history? This cannot be undone."),
            KeyCode::Char('p') => {
                poller.trigger();
            }
            KeyCode::Char(c @ '1'..='9') => {
                let index = c as usize - '1' as usize;
                dashboard.toggle_series(index);
            }
            KeyCode::Left => {
                dashboard.nudge(Nudge::PanLeft, step);
            }
            KeyCode::Right => {
                dashboard.nudge(Nudge::PanRight, step);
            }
            KeyCode::Char('+') | KeyCode::Char('=') => {
                dashboard.nudge(Nudge::Grow, step);
            }
            KeyCode::Char('-') => {
                dashboard.nudge(Nudge::Shrink, step);
            }
            _ => {}
        }
        Flow::Continue
    }

    fn handle_mouse(&mut self, mouse: MouseEvent, dashboard: &mut Dashboard) {
        if self.confirm.visible {
            return;
        }
        let Some(x) = self.geometry.track_x(mouse.column) else {
            return;
        };
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if self.geometry.in_track(mouse.column, mouse.row) {
                    dashboard.pointer_down(x);
                }
            }
            // Drags keep tracking outside the overview, like a captured pointer
            MouseEventKind::Drag(MouseButton::Left) => dashboard.pointer_drag(x),
            MouseEventKind::Up(MouseButton::Left) => {
                dashboard.pointer_up();
            }
            _ => {}
        }
    }
}

/// Apply every queued poller message, returning how many were accepted.
///
/// Ingest appends under a blocking file lock, so this needs the
/// multi-threaded runtime.
fn drain_messages(rx: &mut mpsc::Receiver<Message>, dashboard: &mut Dashboard) -> usize {
    let mut applied = 0;
    while let Ok(message) = rx.try_recv() {
        if task::block_in_place(|| dashboard.handle_message(message, Utc::now())) {
            applied += 1;
        }
    }
    applied
}

fn rebuild_poller(poller: &Poller, dashboard: &mut Dashboard) -> (Poller, JoinHandle<()>) {
    let config = dashboard.config();
    let interval = Duration::from_secs(config.interval_secs);
    let replacement = match CompositeFeed::from_config(config) {
        Ok(feed) => poller.restarted(Arc::new(feed), interval),
        Err(e) => {
            tracing::error!(error = %e, "could not rebuild feed");
            dashboard.notify(
                crate::dashboard::NoticeLevel::Error,
                format!("could not rebuild feed: {e}"),
                Utc::now(),
            );
            poller.clone()
        }
    };
    let handle = replacement.spawn();
    (replacement, handle)
}

impl Drop for DashboardUi {
    fn drop(&mut self) {
        // Cleanup terminal
        let _ = disable_raw_mode();
        let _ = self.terminal.backend_mut().execute(DisableMouseCapture);
        let _ = self.terminal.backend_mut().execute(LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Polls and persists without a terminal UI, printing each reading
pub struct HeadlessRecorder {
    rx: mpsc::Receiver<Message>,
    ingestor: Ingestor,
    registry: Option<DatasetRegistry>,
    gate: SequenceGate,
    readings: usize,
    saved: usize,
    failed_saves: usize,
    fetch_errors: usize,
}

impl HeadlessRecorder {
    pub fn new(rx: mpsc::Receiver<Message>, ingestor: Ingestor, registry: DatasetRegistry) -> Self {
        Self {
            rx,
            ingestor,
            registry: Some(registry),
            gate: SequenceGate::new(),
            readings: 0,
            saved: 0,
            failed_saves: 0,
            fetch_errors: 0,
        }
    }

    /// Record until Ctrl-C, or until `limit` readings have been taken
    pub async fn run(&mut self, poller: Poller, limit: Option<usize>) -> Result<()> {
        let running = poller.spawn();
        println!("Recording to {} (Ctrl-C to stop)...", self.ingestor.store().dir().display());

        loop {
            tokio::select! {
                message = self.rx.recv() => {
                    match message {
                        Some(msg) => self.process_message(msg).await?,
                        None => break, // Channel closed
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }

            if limit.is_some_and(|n| self.readings >= n) {
                break;
            }
        }

        running.abort();
        Ok(())
    }

    async fn process_message(&mut self, message: Message) -> Result<()> {
        if !self.gate.accept(message.seq()) {
            return Ok(());
        }

        match message {
            Message::Reading { values, .. } => {
                let now = Utc::now();
                let Some(mut registry) = self.registry.take() else {
                    return Ok(());
                };
                let ingestor = self.ingestor.clone();
                let printable = values.clone();

                // Appends block on file locks
                let (registry, report) = task::spawn_blocking(move || {
                    let report = ingestor.ingest(&values, now, &mut registry);
                    (registry, report)
                })
                .await?;

                self.print_reading(&registry, &printable, &report, now);
                self.registry = Some(registry);
                self.readings += 1;
                self.saved += report.appended;
                self.failed_saves += report.failed;
            }
            Message::FeedFailed { at, error, .. } => {
                self.fetch_errors += 1;
                eprintln!(
                    "{}  fetch failed: {}",
                    at.with_timezone(&Local).format("%H:%M:%S"),
                    error
                );
            }
        }
        Ok(())
    }

    fn print_reading(
        &self,
        registry: &DatasetRegistry,
        values: &crate::feed::FeedValues,
        report: &IngestReport,
        now: chrono::DateTime<Utc>,
    ) {
        let fields = registry
            .datasets()
            .iter()
            .map(|d| match values.get(&d.key).and_then(numeric_value) {
                Some(v) => format!("{}={:.2}", d.key, v),
                None => format!("{}=N/A", d.key),
            })
            .collect::<Vec<_>>()
            .join(" ");

        let mut line = format!("{}  {}", now.with_timezone(&Local).format("%H:%M:%S"), fields);
        if report.failed > 0 {
            line.push_str(&format!("  ({} not saved)", report.failed));
        }
        println!("{line}");
    }

    pub fn print_final_stats(&self) {
        println!("\n=== Recording stopped ===");
        println!("Readings: {}", self.readings);
        println!("Samples saved: {}", self.saved);
        if self.failed_saves > 0 {
            println!("Samples not saved: {}", self.failed_saves);
        }
        if self.fetch_errors > 0 {
            println!("Fetch errors: {}", self.fetch_errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::feed::FeedValues;
    use crate::store::HistoryStore;

    fn reading(seq: u64, value: f64) -> Message {
        let mut values = FeedValues::new();
        values.insert("ai1".into(), serde_json::json!(value));
        Message::Reading {
            seq,
            at: Utc::now(),
            values,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drain_persists_and_drops_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path().join("data")).unwrap();
        let mut dashboard = Dashboard::new(
            Config::default(),
            None,
            store.clone(),
            dir.path().to_path_buf(),
            Utc::now(),
        );

        let (tx, mut rx) = mpsc::channel(8);
        tx.send(reading(2, 1.0)).await.unwrap();
        tx.send(reading(1, 2.0)).await.unwrap();
        tx.send(reading(3, 3.0)).await.unwrap();

        assert_eq!(drain_messages(&mut rx, &mut dashboard), 2);
        assert_eq!(drain_messages(&mut rx, &mut dashboard), 0);
        assert_eq!(dashboard.registry().get("ai1").unwrap().series().len(), 2);
        assert!(store.disk_usage().unwrap() > 0);
    }
}
