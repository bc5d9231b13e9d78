use serde::Deserialize;

/// Engine-wide settings shared by every backend.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineOptions {
    /// Name given to the worker thread, visible in debuggers and panic messages.
    pub worker_name: String,
}

impl EngineOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_worker_name(mut self, worker_name: impl Into<String>) -> Self {
        self.worker_name = worker_name.into();
        self
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            worker_name: "sql-dispatch-worker".to_string(),
        }
    }
}
