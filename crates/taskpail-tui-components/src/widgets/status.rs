//! The status tree of one run.
//!
//! [`build_status_view`] lays the model out as labelled rows;
//! [`StatusWidget`] draws them.

use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Paragraph, Row, Table};
use ratatui::Frame;
use taskpail_core::WorkerStatus;
use taskpail_status::{StatusModel, Worker};

use crate::theme::{status_glyph, Theme, BAR_CELL};
use crate::utils::{pad_right, truncate};

/// Width of the label column.
pub const COL1_WIDTH: usize = 22;

/// Room taken by the column gap and borders next to a bar.
const BAR_PADDING: usize = 4;

/// Which queue bucket a bar counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    Unassigned,
    Inbox,
    Processing,
    Success,
    Failure,
}

/// The value column of a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// A name or a number.
    Text(String),
    /// Running/total instances and one glyph per instance.
    Instances {
        running: usize,
        total: usize,
        statuses: Vec<WorkerStatus>,
    },
    /// A task count followed by up to `cells` bar glyphs.
    Bar {
        count: String,
        cells: usize,
        kind: BarKind,
    },
}

impl Cell {
    fn instances(workers: &[Worker]) -> Self {
        let (running, total) = StatusModel::split(workers);
        Cell::Instances {
            running,
            total,
            statuses: workers.iter().map(|w| w.status).collect(),
        }
    }

    /// `count` padded to the width of `largest`, with `min(count, max_cells)`
    /// bar cells.
    fn bar(count: usize, largest: usize, max_cells: usize, kind: BarKind) -> Self {
        let width = largest.max(count).to_string().len();
        Cell::Bar {
            count: pad_right(&count.to_string(), width),
            cells: count.min(max_cells),
            kind,
        }
    }

    /// The cell as plain text.
    pub fn text(&self) -> String {
        match self {
            Cell::Text(s) => s.clone(),
            Cell::Instances {
                running,
                total,
                statuses,
            } => {
                let glyphs: String = statuses.iter().map(|s| status_glyph(*s)).collect();
                format!("{}/{} {}", running, total, glyphs)
            }
            Cell::Bar { count, cells, .. } => {
                format!("{} {}", count, BAR_CELL.to_string().repeat(*cells))
            }
        }
    }
}

/// One line of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    /// Tree guides and the row name.
    pub label: String,
    pub cell: Cell,
    /// Name of the pool a `Pool <i>` row stands for.
    pub pool: Option<String>,
}

impl StatusRow {
    fn new(label: impl Into<String>, cell: Cell) -> Self {
        Self {
            label: label.into(),
            cell,
            pool: None,
        }
    }
}

/// A footer line: the timestamp, or a message and its author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FooterLine {
    pub who: Option<String>,
    pub text: String,
}

/// Everything the status screen shows, before styling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub rows: Vec<StatusRow>,
    pub col1_width: usize,
    pub footer: Vec<FooterLine>,
}

/// Lay out `model` for a `width` x `height` terminal.
///
/// In `summary` mode the per-queue breakdowns are left out.
pub fn build_status_view(model: &StatusModel, width: usize, height: usize, summary: bool) -> StatusView {
    let max_cells = model
        .max_count()
        .min(width.saturating_sub(COL1_WIDTH + BAR_PADDING));

    let mut runtime = model.runtime.clone();
    runtime.extend(model.workstealer.iter().cloned());

    let mut rows = vec![
        StatusRow::new("App", Cell::Text(model.app_name.clone())),
        StatusRow::new("Run", Cell::Text(model.run_name.clone())),
        StatusRow::new("├─ Runtime", Cell::instances(&runtime)),
        StatusRow::new("├─ Dispatcher", Cell::instances(&model.dispatcher)),
        StatusRow::new("├─ Queue", Cell::instances(&model.queue)),
    ];

    let num_pools = model.num_pools();
    let (queue_running, _) = StatusModel::split(&model.queue);
    if !summary && queue_running > 0 {
        let q = &model.qstat;
        let counts = [
            (BarKind::Unassigned, q.unassigned),
            (BarKind::Inbox, model.all_inbox()),
            (BarKind::Processing, q.processing()),
            (BarKind::Success, q.success()),
            (BarKind::Failure, q.failure()),
        ];
        let largest = counts.iter().map(|(_, n)| *n).max().unwrap_or(0);

        let elbow = if num_pools > 1 { "├─ " } else { "└─ " };
        rows.push(StatusRow::new(
            format!("│  {}Unassigned", elbow),
            Cell::bar(q.unassigned, largest, max_cells, BarKind::Unassigned),
        ));

        if num_pools > 1 {
            let labels = ["├─ Assigned", "├─ Processing", "├─ Success", "└─ Failures"];
            for (label, (kind, n)) in labels.iter().zip(counts.iter().skip(1)) {
                rows.push(StatusRow::new(
                    format!("│  {}", label),
                    Cell::bar(*n, largest, max_cells, *kind),
                ));
            }
        }
    }

    rows.push(StatusRow::new("└─ Pools", Cell::Text(num_pools.to_string())));

    for (idx, pool) in model.pools.iter().enumerate() {
        let last = idx + 1 == num_pools;
        let (elbow, guide) = if last { ("└─ ", "      ") } else { ("├─ ", "   │  ") };

        let mut row = StatusRow::new(
            format!("   {}Pool {}", elbow, idx + 1),
            Cell::instances(&pool.workers),
        );
        row.pool = Some(pool.name.clone());
        rows.push(row);

        if !summary {
            let stats = model.qstat.pool(&pool.name);
            let counts = [
                ("├─ Inbox", BarKind::Inbox, stats.inbox),
                ("├─ Processing", BarKind::Processing, stats.processing),
                ("├─ Success", BarKind::Success, stats.success),
                ("└─ Failures", BarKind::Failure, stats.failure),
            ];
            let largest = counts.iter().map(|(_, _, n)| *n).max().unwrap_or(0);
            for (label, kind, n) in counts {
                rows.push(StatusRow::new(
                    format!("{}{}", guide, label),
                    Cell::bar(n, largest, max_cells, kind),
                ));
            }
        }
    }

    // One line for the timestamp and one blank line above the footer.
    let room = height.saturating_sub(rows.len() + 2);
    let mut footer = vec![FooterLine {
        who: None,
        text: model
            .last_event
            .format("%A, %d-%b-%y %H:%M:%S UTC")
            .to_string(),
    }];
    footer.extend(model.messages(room).into_iter().map(|m| FooterLine {
        who: Some(m.who.clone()),
        text: m.message.clone(),
    }));

    StatusView {
        rows,
        col1_width: COL1_WIDTH,
        footer,
    }
}

/// Draws a [`StatusView`].
#[derive(Debug, Clone)]
pub struct StatusWidget<'a> {
    view: &'a StatusView,
    theme: Theme,
}

impl<'a> StatusWidget<'a> {
    pub fn new(view: &'a StatusView) -> Self {
        Self {
            view,
            theme: Theme::default(),
        }
    }

    /// Set the theme.
    pub fn theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    fn cell_line(&self, row: &StatusRow) -> Line<'static> {
        match &row.cell {
            Cell::Text(s) => Line::from(Span::styled(s.clone(), self.theme.accent_style())),
            Cell::Instances {
                running,
                total,
                statuses,
            } => {
                let mut spans = vec![Span::raw(format!("{}/{} ", running, total))];
                spans.extend(statuses.iter().map(|s| {
                    Span::styled(status_glyph(*s).to_string(), self.theme.status_style(*s))
                }));
                Line::from(spans)
            }
            Cell::Bar { count, cells, kind } => Line::from(vec![
                Span::raw(format!("{} ", count)),
                Span::styled(
                    BAR_CELL.to_string().repeat(*cells),
                    self.theme.bar_style(*kind),
                ),
            ]),
        }
    }

    fn label_line(&self, row: &StatusRow) -> Line<'static> {
        // Guides are muted, names bold.
        let split = row
            .label
            .char_indices()
            .find(|(_, c)| c.is_alphanumeric())
            .map(|(i, _)| i)
            .unwrap_or(0);
        let (guide, name) = row.label.split_at(split);
        Line::from(vec![
            Span::styled(guide.to_string(), self.theme.muted_style()),
            Span::styled(name.to_string(), self.theme.bold()),
        ])
    }

    fn footer_line(&self, line: &FooterLine, width: usize) -> Line<'static> {
        match &line.who {
            None => Line::from(Span::styled(line.text.clone(), self.theme.muted_style())),
            Some(who) => {
                let room = width.saturating_sub(who.len() + 1);
                Line::from(vec![
                    Span::styled(who.clone(), self.theme.who_style()),
                    Span::raw(" "),
                    Span::styled(truncate(&line.text, room), self.theme.muted_style()),
                ])
            }
        }
    }

    /// Render the view.
    pub fn render(self, frame: &mut Frame, area: Rect) {
        let [tree_area, _, footer_area] = Layout::vertical([
            Constraint::Length(self.view.rows.len() as u16),
            Constraint::Min(0),
            Constraint::Length(self.view.footer.len() as u16),
        ])
        .areas(area);

        let rows: Vec<Row> = self
            .view
            .rows
            .iter()
            .map(|row| Row::new(vec![self.label_line(row), self.cell_line(row)]))
            .collect();
        let table = Table::new(
            rows,
            [
                Constraint::Length(self.view.col1_width as u16),
                Constraint::Min(0),
            ],
        );
        frame.render_widget(table, tree_area);

        let width = footer_area.width as usize;
        let lines: Vec<Line> = self
            .view
            .footer
            .iter()
            .map(|l| self.footer_line(l, width))
            .collect();
        frame.render_widget(Paragraph::new(lines), footer_area);
    }
}
