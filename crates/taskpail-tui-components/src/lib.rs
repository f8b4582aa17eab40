//! Terminal views for taskpail runs.
//!
//! The crate is organized into:
//! - `widgets` - the status tree and the utilization table
//! - `theme` - Colors and styles
//! - `utils` - Padding, truncation and unit formatting
//!
//! Every widget is split into a pure builder producing plain rows and a
//! ratatui renderer, so the layout logic can be tested without a terminal.

pub mod theme;
pub mod utils;
pub mod widgets;

pub use theme::Theme;
pub use utils::{format_bytes, format_millicores, pad_right, truncate};
pub use widgets::status::{
    build_status_view, BarKind, Cell, FooterLine, StatusRow, StatusView, StatusWidget, COL1_WIDTH,
};
pub use widgets::utilization::{utilization_lines, UtilizationWidget};
