use serde::{Deserialize, Serialize};

/// Per-device outlier bookkeeping for the current run: cumulative count
/// plus a de-duplicated set of failure-type labels. Reset exactly when the
/// run ends; failures never carry across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureTracker {
    pub count: u64,
    pub failures: Vec<String>,
}

impl FailureTracker {
    /// Count every occurrence, record each label once.
    pub fn record(&mut self, failure_type: &str) {
        self.count += 1;
        if !self.failures.iter().any(|f| f == failure_type) {
            self.failures.push(failure_type.to_string());
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.failures.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0 && self.failures.is_empty()
    }
}

/// Persisted per-device warning configuration and tracker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningSettings {
    #[serde(default = "default_enabled")]
    pub warnings_enabled: bool,
    #[serde(default)]
    pub failure_tracker: FailureTracker,
}

fn default_enabled() -> bool {
    true
}

impl Default for WarningSettings {
    fn default() -> Self {
        Self {
            warnings_enabled: true,
            failure_tracker: FailureTracker::default(),
        }
    }
}
