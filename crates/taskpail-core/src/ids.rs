//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of one execution of a compiled application.
///
/// Run names end up in object-store keys and platform resource names, so
/// generated names are short, lowercase and DNS-label safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunName(String);

impl RunName {
    /// Create a new RunName from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Generate a new random RunName derived from an application name.
    pub fn generate(app_name: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", app_name, &suffix[..8]))
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for RunName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RunName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
