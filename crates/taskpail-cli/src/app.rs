//! The live status view: draws the newest snapshot until the user quits.

use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::layout::{Constraint, Layout};
use ratatui::DefaultTerminal;
use taskpail_core::Utilization;
use taskpail_status::StatusModel;
use taskpail_tui_components::{build_status_view, StatusWidget, Theme, UtilizationWidget};
use tokio::sync::mpsc;

/// Status UI state and its channel handles.
pub struct StatusApp {
    snapshots: mpsc::Receiver<Arc<StatusModel>>,
    utilization: Option<mpsc::Receiver<Utilization>>,

    model: Option<Arc<StatusModel>>,
    sample: Option<Utilization>,
    summary: bool,
    show_utilization: bool,
    theme: Theme,
}

impl StatusApp {
    pub fn new(snapshots: mpsc::Receiver<Arc<StatusModel>>, summary: bool) -> Self {
        Self {
            snapshots,
            utilization: None,
            model: None,
            sample: None,
            summary,
            show_utilization: false,
            theme: Theme::default(),
        }
    }

    /// Attach a utilization stream, toggled with `u`.
    pub fn with_utilization(mut self, rx: mpsc::Receiver<Utilization>) -> Self {
        self.utilization = Some(rx);
        self
    }

    /// Run the event loop on the calling thread.
    ///
    /// Returns when the user quits or the snapshot stream closes.
    pub fn run(&mut self, mut terminal: DefaultTerminal) -> std::io::Result<()> {
        loop {
            if !self.drain_snapshots() {
                break;
            }
            self.drain_utilization();

            terminal.draw(|frame| self.draw(frame))?;

            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press && self.handle_key(key.code) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Keep only the newest snapshot. Returns false once the stream closed.
    fn drain_snapshots(&mut self) -> bool {
        loop {
            match self.snapshots.try_recv() {
                Ok(model) => self.model = Some(model),
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn drain_utilization(&mut self) {
        let Some(rx) = self.utilization.as_mut() else {
            return;
        };
        while let Ok(sample) = rx.try_recv() {
            self.sample = Some(sample);
        }
    }

    fn draw(&self, frame: &mut ratatui::Frame) {
        let Some(model) = &self.model else {
            return;
        };

        let area = frame.area();
        let (status_area, util_area) = match (&self.sample, self.show_utilization) {
            (Some(sample), true) => {
                let rows = sample.workers.len() as u16 + 2;
                let [top, bottom] =
                    Layout::vertical([Constraint::Min(0), Constraint::Length(rows)]).areas(area);
                (top, Some((bottom, sample)))
            }
            _ => (area, None),
        };

        let view = build_status_view(
            model,
            status_area.width as usize,
            status_area.height as usize,
            self.summary,
        );
        StatusWidget::new(&view)
            .theme(self.theme.clone())
            .render(frame, status_area);

        if let Some((area, sample)) = util_area {
            UtilizationWidget::new(sample)
                .theme(self.theme.clone())
                .render(frame, area);
        }
    }

    /// Returns true if the app should quit.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('s') => self.summary = !self.summary,
            KeyCode::Char('u') => self.show_utilization = !self.show_utilization,
            _ => {}
        }
        false
    }
}
