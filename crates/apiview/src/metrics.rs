use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counters collected over one extraction run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorMetrics {
    /// Translation units attempted
    pub files_attempted: usize,

    /// Translation units that produced a tree
    pub files_succeeded: usize,

    /// Translation units that failed in the front end
    pub files_failed: usize,

    /// Library headers parsed as part of a translation unit
    pub headers_parsed: usize,

    /// Total time spent in the front end
    #[serde(with = "duration_serde")]
    pub total_parse_time: Duration,

    /// Nodes present in the final database
    pub nodes_recorded: usize,

    /// Declarations folded into an existing node
    pub nodes_merged: usize,

    pub merge_conflicts: usize,

    /// Declarations recorded with a placeholder signature
    pub extraction_failures: usize,

    /// Declarations rejected by the filter
    pub declarations_excluded: usize,
}

// Helper module for serializing Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: u64 = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for ProcessorMetrics {
    fn default() -> Self {
        Self {
            files_attempted: 0,
            files_succeeded: 0,
            files_failed: 0,
            headers_parsed: 0,
            total_parse_time: Duration::ZERO,
            nodes_recorded: 0,
            nodes_merged: 0,
            merge_conflicts: 0,
            extraction_failures: 0,
            declarations_excluded: 0,
        }
    }
}

impl ProcessorMetrics {
    /// Success rate (0.0 to 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.files_attempted == 0 {
            0.0
        } else {
            self.files_succeeded as f64 / self.files_attempted as f64
        }
    }

    /// Average front-end time per successful translation unit
    pub fn avg_parse_time(&self) -> Duration {
        if self.files_succeeded == 0 {
            Duration::ZERO
        } else {
            self.total_parse_time / self.files_succeeded as u32
        }
    }

    /// Merge another metrics object into this one.
    ///
    /// `nodes_recorded` is a property of the final database and is left untouched.
    pub fn merge(&mut self, other: &ProcessorMetrics) {
        self.files_attempted += other.files_attempted;
        self.files_succeeded += other.files_succeeded;
        self.files_failed += other.files_failed;
        self.headers_parsed += other.headers_parsed;
        self.total_parse_time += other.total_parse_time;
        self.nodes_merged += other.nodes_merged;
        self.merge_conflicts += other.merge_conflicts;
        self.extraction_failures += other.extraction_failures;
        self.declarations_excluded += other.declarations_excluded;
    }
}
