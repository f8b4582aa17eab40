//! Theme and style definitions.

use ratatui::style::{Color, Modifier, Style};
use taskpail_core::WorkerStatus;

use crate::widgets::status::BarKind;

/// Glyph drawn for one task in a queue bar.
pub const BAR_CELL: char = '■';

/// Colors for taskpail views.
#[derive(Debug, Clone)]
pub struct Theme {
    /// Labels of the top-level rows
    pub accent: Color,
    /// Timestamps, tree guides
    pub muted: Color,
    /// Author of a footer message
    pub who: Color,
    pub inbox: Color,
    pub processing: Color,
    pub success: Color,
    pub failure: Color,
    /// Instances still coming up
    pub pending: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            accent: Color::Cyan,
            muted: Color::DarkGray,
            who: Color::Yellow,
            inbox: Color::Blue,
            processing: Color::Yellow,
            success: Color::Green,
            failure: Color::Red,
            pending: Color::Magenta,
        }
    }
}

impl Theme {
    pub fn bold(&self) -> Style {
        Style::default().add_modifier(Modifier::BOLD)
    }

    pub fn accent_style(&self) -> Style {
        Style::default().fg(self.accent).add_modifier(Modifier::BOLD)
    }

    pub fn muted_style(&self) -> Style {
        Style::default().fg(self.muted)
    }

    pub fn who_style(&self) -> Style {
        Style::default().fg(self.who)
    }

    /// Style of the cells of one queue bar.
    pub fn bar_style(&self, kind: BarKind) -> Style {
        let color = match kind {
            BarKind::Unassigned => self.muted,
            BarKind::Inbox => self.inbox,
            BarKind::Processing => self.processing,
            BarKind::Success => self.success,
            BarKind::Failure => self.failure,
        };
        Style::default().fg(color)
    }

    /// Style of the glyph for one instance.
    pub fn status_style(&self, status: WorkerStatus) -> Style {
        let color = match status {
            WorkerStatus::Running => self.success,
            WorkerStatus::Succeeded => self.inbox,
            WorkerStatus::Failed => self.failure,
            WorkerStatus::Pending | WorkerStatus::Booting => self.pending,
            WorkerStatus::Terminating | WorkerStatus::Unknown => self.muted,
        };
        Style::default().fg(color)
    }
}

/// Glyph drawn for one instance in a component row.
pub fn status_glyph(status: WorkerStatus) -> char {
    match status {
        WorkerStatus::Running => '●',
        WorkerStatus::Booting => '◐',
        WorkerStatus::Pending => '○',
        WorkerStatus::Succeeded => '✓',
        WorkerStatus::Failed => '✗',
        WorkerStatus::Terminating => '◌',
        WorkerStatus::Unknown => '?',
    }
}
