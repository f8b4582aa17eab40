//! Run widgets.

pub mod status;
pub mod utilization;
