//! Compile options.

use crate::profile::QueueProfiles;

/// Largest worker count a single worker component carries by default.
pub const DEFAULT_MAX_WORKERS_PER_COMPONENT: u32 = 16;

/// Options passed explicitly to every lowering step.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Emit verbose flags into generated commands and log lowering decisions.
    pub verbose: bool,

    /// Platform cap on workers per component; larger pools are split.
    pub max_workers_per_component: u32,

    /// Override the worker count of every application component.
    pub workers: Option<u32>,

    /// Image used by components whose application does not name one.
    pub default_image: Option<String>,

    /// Remote queue-access profiles referenced by datasets and dispatchers.
    pub profiles: QueueProfiles,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            max_workers_per_component: DEFAULT_MAX_WORKERS_PER_COMPONENT,
            workers: None,
            default_image: None,
            profiles: QueueProfiles::default(),
        }
    }
}

impl CompileOptions {
    /// Builder method to set the profiles.
    pub fn with_profiles(mut self, profiles: QueueProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    /// Builder method to set the per-component worker cap.
    pub fn with_max_workers_per_component(mut self, max: u32) -> Self {
        self.max_workers_per_component = max.max(1);
        self
    }
}
