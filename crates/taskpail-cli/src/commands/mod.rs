//! Subcommand implementations.

pub mod compile;
pub mod needs;
pub mod observe;
pub mod queue;
pub mod worker;
pub mod workstealer;
