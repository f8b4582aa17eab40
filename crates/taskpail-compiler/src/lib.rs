//! taskpail compiler.
//!
//! Turns a stream of declarative YAML documents into a deployable topology:
//!
//! ```text
//! yaml ──parse──▶ Hlir ──lower──▶ Llir ──▶ deployment backend
//! ```
//!
//! Parsing is best-effort: bad documents become [`Diagnostic`]s and the
//! valid remainder is still compiled. Lowering is all-or-nothing.

pub mod error;
pub mod lower;
pub mod options;
pub mod parser;
pub mod profile;

pub use error::CompileError;
pub use lower::lower;
pub use options::CompileOptions;
pub use parser::{parse, parse_file, Diagnostic, ParseResult};
pub use profile::{QueueProfile, QueueProfiles};
