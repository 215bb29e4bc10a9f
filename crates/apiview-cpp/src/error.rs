use std::path::PathBuf;
use thiserror::Error;

/// Problems with the inputs of a run, detected before any file is parsed.
///
/// These are fatal: the run stops and no database is produced.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// No source root was given
    #[error("No source root was specified")]
    MissingRoot,

    /// Source root does not exist or cannot be read
    #[error("Cannot read source root {0}: {1}")]
    UnreadableRoot(PathBuf, #[source] std::io::Error),

    /// No explicit file list and no compilation database to derive one from
    #[error("No files to process and no compile_commands.json found under {0}")]
    MissingCompilationDatabase(PathBuf),

    /// Compilation database exists but is not valid
    #[error("Malformed compilation database {0}: {1}")]
    MalformedCompilationDatabase(PathBuf, #[source] serde_json::Error),

    /// Compiler argument that cannot be honoured
    #[error("Invalid compiler argument '{argument}': {reason}")]
    MalformedArgument { argument: String, reason: String },

    /// Option value out of range
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Detail-namespace pattern that is not a valid regular expression
    #[error("Invalid namespace pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Settings document that does not deserialize
    #[error("Invalid settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),
}

/// Failure to turn one file into a syntax tree.
///
/// Recorded as a diagnostic; the run continues with the next translation unit.
#[derive(Error, Debug)]
pub enum FrontendError {
    /// Failed to read file
    #[error("IO error reading {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    /// File too large
    #[error("File {0} exceeds maximum size ({1} bytes)")]
    FileTooLarge(PathBuf, usize),

    /// Parsing timeout
    #[error("Parsing {0} exceeded timeout")]
    Timeout(PathBuf),

    /// Tree contains error nodes
    #[error("Syntax error in {path}:{line}:{column} ({errors} error node(s))")]
    Syntax {
        path: PathBuf,
        line: usize,
        column: usize,
        errors: usize,
    },

    /// Generic parsing error
    #[error("Parse error in {0}: {1}")]
    ParseFailed(PathBuf, String),

    /// The grammar could not be loaded
    #[error("Cannot load C++ grammar: {0}")]
    Language(String),
}

impl FrontendError {
    /// File the error refers to, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            FrontendError::Io(path, _)
            | FrontendError::FileTooLarge(path, _)
            | FrontendError::Timeout(path)
            | FrontendError::ParseFailed(path, _)
            | FrontendError::Syntax { path, .. } => Some(path),
            FrontendError::Language(_) => None,
        }
    }

    /// Line the error refers to, if known.
    pub fn line(&self) -> Option<usize> {
        match self {
            FrontendError::Syntax { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Fatal outcome of [`ApiViewProcessor::process`](crate::ApiViewProcessor::process).
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The front end could not be started at all
    #[error("Compiler front end failed to start: {0}")]
    FrontendStartup(String),

    /// Worker pool for parallel processing could not be created
    #[error("Failed to create thread pool: {0}")]
    ThreadPool(String),

    /// Cancelled between translation units
    #[error("Processing was cancelled")]
    Cancelled,
}

/// Result type for processor operations
pub type ProcessorResult<T> = Result<T, ProcessorError>;
