//! CPU and memory per instance.

use ratatui::layout::{Constraint, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::widgets::{Block, Borders, Row, Table};
use ratatui::Frame;
use taskpail_core::Utilization;

use crate::theme::Theme;
use crate::utils::{format_bytes, format_millicores, pad_right};

/// One line per instance, ordered by component then name, then a total.
pub fn utilization_lines(sample: &Utilization) -> Vec<String> {
    let workers = sample.sorted();
    let width = workers.iter().map(|w| w.instance.len()).max().unwrap_or(0).max(5);

    let mut lines: Vec<String> = workers
        .iter()
        .map(|w| {
            format!(
                "{} {:<11} cpu {:>6}  mem {:>9}",
                pad_right(&w.instance, width),
                w.component.as_str(),
                format_millicores(w.cpu_millis),
                format_bytes(w.memory_bytes),
            )
        })
        .collect();
    lines.push(format!(
        "{} {:<11} cpu {:>6}  mem {:>9}",
        pad_right("total", width),
        "",
        format_millicores(sample.total_cpu_millis()),
        format_bytes(sample.total_memory_bytes()),
    ));
    lines
}

/// Table of the latest utilization sample.
#[derive(Debug, Clone)]
pub struct UtilizationWidget<'a> {
    sample: &'a Utilization,
    theme: Theme,
}

impl<'a> UtilizationWidget<'a> {
    pub fn new(sample: &'a Utilization) -> Self {
        Self {
            sample,
            theme: Theme::default(),
        }
    }

    pub fn theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    pub fn render(self, frame: &mut Frame, area: Rect) {
        let header = Row::new(vec!["INSTANCE", "COMPONENT", "CPU", "MEMORY"])
            .style(Style::default().add_modifier(Modifier::BOLD));
        let rows: Vec<Row> = self
            .sample
            .sorted()
            .into_iter()
            .map(|w| {
                Row::new(vec![
                    w.instance.clone(),
                    w.component.as_str().to_string(),
                    format_millicores(w.cpu_millis),
                    format_bytes(w.memory_bytes),
                ])
            })
            .collect();

        let title = format!(
            " cpu {} / mem {} ",
            format_millicores(self.sample.total_cpu_millis()),
            format_bytes(self.sample.total_memory_bytes())
        );
        let table = Table::new(
            rows,
            [
                Constraint::Min(20),
                Constraint::Length(12),
                Constraint::Length(8),
                Constraint::Length(10),
            ],
        )
        .header(header)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(self.theme.muted_style()),
        );
        frame.render_widget(table, area);
    }
}
