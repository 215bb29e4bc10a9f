use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::filter::FilterConfig;

/// Default implementation-detail namespace convention
pub const DEFAULT_DETAIL_PATTERN: &str = "^_?(detail|internal)$";

/// Names identifying the review a run feeds, for the serializer downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewMetadata {
    pub review_name: Option<String>,
    pub service_name: Option<String>,
    pub package_name: Option<String>,
}

/// Configuration of an extraction run.
///
/// Field names serialize in camelCase so that an API-review settings document can be
/// loaded directly with [`ProcessorOptions::from_settings_json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessorOptions {
    /// Library root: a directory, or a compile_commands.json file
    pub source_root: Option<PathBuf>,

    /// Files to process; empty means every file in the compilation database
    pub source_files_to_process: Vec<PathBuf>,

    /// Files never processed, even when listed in the compilation database
    pub source_files_to_skip: Vec<PathBuf>,

    pub additional_include_directories: Vec<PathBuf>,
    pub additional_compiler_switches: Vec<String>,

    /// Record declarations inside implementation-detail namespaces
    pub include_detail: bool,

    /// Record private (and protected) members
    pub include_private: bool,

    /// Record protected members
    pub include_protected: bool,

    /// Regular expressions matched against each namespace segment
    pub detail_namespace_patterns: Vec<String>,

    /// Only record declarations inside these namespaces (empty = everything)
    #[serde(deserialize_with = "string_or_list")]
    pub filter_namespace: Vec<String>,

    /// Identification of the review; copied to [`ProcessingResult::review`](crate::ProcessingResult::review)
    pub review_name: Option<String>,
    pub service_name: Option<String>,
    pub package_name: Option<String>,

    /// Macros whose uses are blanked before parsing
    pub neutralized_macros: Vec<String>,

    /// Parse headers resolved outside the source root (their declarations are still
    /// filtered out; they only contribute type aliases)
    pub parse_external_headers: bool,

    /// Accept trees that contain syntax errors (with a warning)
    pub tolerant_parsing: bool,

    /// Maximum file size to parse (in bytes)
    pub max_file_size: usize,

    /// Timeout per file (None = no timeout)
    #[serde(with = "duration_option")]
    pub timeout_per_file: Option<Duration>,

    /// Process translation units in parallel
    pub parallel: bool,

    /// Number of parallel workers (None = rayon default)
    pub parallel_workers: Option<usize>,
}

// Helper module for serializing Duration
mod duration_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => d.as_secs().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

/// `"filterNamespace": "Azure::Core"` and `["Azure::Core", "Azure::Storage"]` are both
/// accepted.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Nothing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
        OneOrMany::Nothing(()) => Vec::new(),
    })
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            source_root: None,
            source_files_to_process: Vec::new(),
            source_files_to_skip: Vec::new(),
            additional_include_directories: Vec::new(),
            additional_compiler_switches: Vec::new(),
            include_detail: false,
            include_private: false,
            include_protected: false,
            detail_namespace_patterns: vec![DEFAULT_DETAIL_PATTERN.to_string()],
            filter_namespace: Vec::new(),
            review_name: None,
            service_name: None,
            package_name: None,
            neutralized_macros: Vec::new(),
            parse_external_headers: false,
            tolerant_parsing: true,
            max_file_size: 10 * 1024 * 1024, // 10 MB
            timeout_per_file: Some(Duration::from_secs(30)),
            parallel: false,
            parallel_workers: None,
        }
    }
}

impl ProcessorOptions {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: Some(source_root.into()),
            ..Default::default()
        }
    }

    /// Load options from an API-review settings document.
    pub fn from_settings_json(settings: &str) -> Result<Self, ConfigurationError> {
        let options: Self = serde_json::from_str(settings)?;
        options.validate()?;
        Ok(options)
    }

    /// Reject values the processor cannot honour.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_file_size == 0 {
            return Err(ConfigurationError::InvalidOption(
                "maxFileSize must be greater than zero".to_string(),
            ));
        }
        if self.parallel_workers == Some(0) {
            return Err(ConfigurationError::InvalidOption(
                "parallelWorkers must be greater than zero".to_string(),
            ));
        }
        if self.timeout_per_file == Some(Duration::ZERO) {
            return Err(ConfigurationError::InvalidOption(
                "timeoutPerFile must be greater than zero".to_string(),
            ));
        }
        if self.filter_namespace.iter().any(|ns| ns.trim().is_empty()) {
            return Err(ConfigurationError::InvalidOption(
                "filterNamespace entries must not be empty".to_string(),
            ));
        }
        self.compile_detail_patterns()?;
        Ok(())
    }

    /// Filter configuration derived from these options.
    pub fn review_metadata(&self) -> ReviewMetadata {
        ReviewMetadata {
            review_name: self.review_name.clone(),
            service_name: self.service_name.clone(),
            package_name: self.package_name.clone(),
        }
    }

    pub fn filter_config(&self) -> Result<FilterConfig, ConfigurationError> {
        Ok(FilterConfig {
            include_private: self.include_private,
            include_protected: self.include_protected,
            include_detail: self.include_detail,
            detail_patterns: self.compile_detail_patterns()?,
            filter_namespaces: self
                .filter_namespace
                .iter()
                .map(|ns| ns.trim_start_matches("::").to_string())
                .collect(),
        })
    }

    fn compile_detail_patterns(&self) -> Result<Vec<Regex>, ConfigurationError> {
        self.detail_namespace_patterns
            .iter()
            .map(|p| Regex::new(p).map_err(ConfigurationError::from))
            .collect()
    }

    /// Enable parallel processing
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = Some(workers);
        self
    }

    /// Set maximum file size
    pub fn with_max_file_size(mut self, size: usize) -> Self {
        self.max_file_size = size;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_per_file = timeout;
        self
    }

    pub fn with_tolerant_parsing(mut self, tolerant: bool) -> Self {
        self.tolerant_parsing = tolerant;
        self
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.source_files_to_process = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_include_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.additional_include_directories.push(dir.into());
        self
    }

    pub fn with_compiler_switch(mut self, switch: impl Into<String>) -> Self {
        self.additional_compiler_switches.push(switch.into());
        self
    }

    pub fn with_protected(mut self, include: bool) -> Self {
        self.include_protected = include;
        self
    }

    pub fn with_private(mut self, include: bool) -> Self {
        self.include_private = include;
        self
    }

    pub fn with_detail(mut self, include: bool) -> Self {
        self.include_detail = include;
        self
    }

    pub fn with_filter_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.filter_namespace.push(namespace.into());
        self
    }

    pub fn with_neutralized_macro(mut self, name: impl Into<String>) -> Self {
        self.neutralized_macros.push(name.into());
        self
    }
}
