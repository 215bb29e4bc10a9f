//! Extraction driver
//!
//! Plans the translation units of a run, loads and walks each one, and merges the
//! per-unit results into the run's [`ClassesDatabase`].

use apiview::{
    diagnostics, ClassesDatabase, DatabaseBuilder, Diagnostic, DiagnosticKind, ProcessorMetrics, Severity,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::arguments::CompilerArguments;
use crate::compile_db::{normalize_path, CompilationDatabase};
use crate::error::{ConfigurationError, FrontendError, ProcessorError, ProcessorResult};
use crate::filter::FilterConfig;
use crate::frontend::{load_unit, Frontend, TreeSitterFrontend, UnitSettings};
use crate::options::{ProcessorOptions, ReviewMetadata};
use crate::walker::{walk_unit, WalkOutput};

/// Cooperative cancellation, checked between translation units.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Serialize)]
pub struct ProcessingResult {
    pub review: ReviewMetadata,

    pub database: ClassesDatabase,

    /// Per-file, per-declaration and merge problems, deduplicated
    pub diagnostics: Vec<Diagnostic>,

    pub metrics: ProcessorMetrics,
}

impl ProcessingResult {
    /// True when any translation unit failed outright.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// True when the run produced no diagnostics at all.
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// A translation unit to process, with its effective compiler arguments.
#[derive(Debug, Clone)]
struct PlannedUnit {
    path: PathBuf,
    arguments: CompilerArguments,
}

/// Result of one translation unit, ready to be merged.
struct UnitReport {
    file: PathBuf,
    parse_time: Duration,
    outcome: Result<UnitExtraction, FrontendError>,
}

struct UnitExtraction {
    walk: WalkOutput,
    headers: usize,
    warnings: Vec<FrontendError>,
}

/// Extracts the public API surface of a C++ library.
pub struct ApiViewProcessor {
    options: ProcessorOptions,
    frontend: Arc<dyn Frontend>,
    cancellation: CancellationToken,
}

impl ApiViewProcessor {
    pub fn new(options: ProcessorOptions) -> Self {
        Self::with_frontend(options, Arc::new(TreeSitterFrontend::new()))
    }

    pub fn with_frontend(options: ProcessorOptions, frontend: Arc<dyn Frontend>) -> Self {
        Self {
            options,
            frontend,
            cancellation: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Run with the root, file list and compiler switches of the options.
    pub fn process(&self) -> ProcessorResult<ProcessingResult> {
        let root = self
            .options
            .source_root
            .clone()
            .ok_or(ConfigurationError::MissingRoot)?;
        let files = self.options.source_files_to_process.clone();
        self.process_with(&root, &self.options.additional_compiler_switches, &files)
    }

    /// Run over `root` (a directory or a compilation database) with extra compiler
    /// arguments. An empty `files` processes every file of the compilation database.
    pub fn process_with<S: AsRef<str>>(
        &self,
        root: impl AsRef<Path>,
        args: &[S],
        files: &[PathBuf],
    ) -> ProcessorResult<ProcessingResult> {
        let root = root.as_ref();
        self.options.validate()?;
        let config = self.options.filter_config()?;
        self.frontend
            .check()
            .map_err(|e| ProcessorError::FrontendStartup(format!("{}: {}", self.frontend.name(), e)))?;

        std::fs::metadata(root).map_err(|e| ConfigurationError::UnreadableRoot(root.to_path_buf(), e))?;
        let database = match CompilationDatabase::locate(root) {
            Some(path) => Some(CompilationDatabase::load(&path)?),
            None => None,
        };
        let library_root = library_root(root, database.as_ref());

        let mut base = CompilerArguments::parse_relative(args, &library_root)?;
        for dir in &self.options.additional_include_directories {
            let dir = if dir.is_relative() {
                library_root.join(dir)
            } else {
                dir.clone()
            };
            if !base.include_dirs.contains(&dir) {
                base.include_dirs.push(dir);
            }
        }

        let units = self.plan(root, &library_root, database.as_ref(), &base, files)?;
        info!(
            "Processing {} translation unit(s) under {}",
            units.len(),
            library_root.display()
        );

        let settings = UnitSettings {
            root: library_root,
            max_file_size: self.options.max_file_size,
            timeout: self.options.timeout_per_file,
            tolerant: self.options.tolerant_parsing,
            parse_external_headers: self.options.parse_external_headers,
            neutralized_macros: self.options.neutralized_macros.clone(),
        };

        let reports = if self.options.parallel && units.len() > 1 {
            self.run_parallel(&settings, &config, &units)?
        } else {
            units
                .iter()
                .map(|unit| self.run_unit(&settings, &config, unit))
                .collect()
        };

        self.merge(&settings, units.len(), reports)
    }

    /// Translation units in input order, skip list applied.
    fn plan(
        &self,
        root: &Path,
        library_root: &Path,
        database: Option<&CompilationDatabase>,
        base: &CompilerArguments,
        files: &[PathBuf],
    ) -> ProcessorResult<Vec<PlannedUnit>> {
        let resolve = |path: &Path| {
            if path.is_relative() {
                normalize_path(&library_root.join(path))
            } else {
                normalize_path(path)
            }
        };
        let skipped: Vec<PathBuf> = self
            .options
            .source_files_to_skip
            .iter()
            .map(|p| resolve(p))
            .collect();

        let candidates: Vec<PathBuf> = if files.is_empty() {
            let database = database.ok_or_else(|| ConfigurationError::MissingCompilationDatabase(root.to_path_buf()))?;
            database.files().map(Path::to_path_buf).collect()
        } else {
            files.iter().map(|f| resolve(f)).collect()
        };

        let mut units = Vec::with_capacity(candidates.len());
        for path in candidates {
            if skipped.contains(&path) {
                debug!("Skipping {}", path.display());
                continue;
            }
            let arguments = match database.and_then(|db| db.command_for(&path)) {
                Some(command) => {
                    let mut own = CompilerArguments::parse_relative(&command.arguments, &command.directory)?;
                    own.merge(base);
                    own
                }
                None => base.clone(),
            };
            units.push(PlannedUnit { path, arguments });
        }
        Ok(units)
    }

    /// Load and walk one unit; `None` when cancelled before it started.
    fn run_unit(&self, settings: &UnitSettings, config: &FilterConfig, unit: &PlannedUnit) -> Option<UnitReport> {
        if self.cancellation.is_cancelled() {
            return None;
        }

        let loaded = load_unit(self.frontend.as_ref(), settings, &unit.arguments, &unit.path);
        let outcome = loaded.outcome.map(|tu| {
            let walk = walk_unit(&tu, config);
            debug!(
                "{}: {} recorded, {} merged, {} excluded",
                unit.path.display(),
                walk.stats.recorded,
                walk.stats.merged,
                walk.stats.excluded
            );
            UnitExtraction {
                walk,
                headers: tu.files.len().saturating_sub(1),
                warnings: tu.warnings,
            }
        });

        Some(UnitReport {
            file: loaded.file,
            parse_time: loaded.parse_time,
            outcome,
        })
    }

    fn run_parallel(
        &self,
        settings: &UnitSettings,
        config: &FilterConfig,
        units: &[PlannedUnit],
    ) -> ProcessorResult<Vec<Option<UnitReport>>> {
        use rayon::prelude::*;

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(num_threads) = self.options.parallel_workers {
            builder = builder.num_threads(num_threads);
        }
        let pool = builder
            .build()
            .map_err(|e| ProcessorError::ThreadPool(e.to_string()))?;

        Ok(pool.install(|| {
            units
                .par_iter()
                .map(|unit| self.run_unit(settings, config, unit))
                .collect()
        }))
    }

    /// Absorb the unit results in input order.
    fn merge(
        &self,
        settings: &UnitSettings,
        attempted: usize,
        reports: Vec<Option<UnitReport>>,
    ) -> ProcessorResult<ProcessingResult> {
        let mut builder = DatabaseBuilder::new();
        let mut found = Vec::new();
        let mut metrics = ProcessorMetrics {
            files_attempted: attempted,
            ..Default::default()
        };

        for report in reports {
            if self.cancellation.is_cancelled() {
                info!("Processing cancelled");
                return Err(ProcessorError::Cancelled);
            }
            let Some(report) = report else {
                return Err(ProcessorError::Cancelled);
            };
            metrics.total_parse_time += report.parse_time;

            let extraction = match report.outcome {
                Ok(extraction) => extraction,
                Err(e) => {
                    warn!("Skipping {}: {}", report.file.display(), e);
                    metrics.files_failed += 1;
                    found.push(frontend_diagnostic(settings, &report.file, &e, Severity::Error));
                    continue;
                }
            };

            for warning in &extraction.warnings {
                found.push(frontend_diagnostic(settings, &report.file, warning, Severity::Warning));
            }

            // Conflicts inside a unit are detected again, and reported, when it is absorbed
            let walk = extraction.walk;
            found.extend(
                walk.diagnostics
                    .into_iter()
                    .filter(|d| d.kind != DiagnosticKind::MergeConflict),
            );
            let mut unit = ProcessorMetrics {
                files_succeeded: 1,
                headers_parsed: extraction.headers,
                nodes_merged: walk.stats.merged,
                extraction_failures: walk.stats.failures,
                declarations_excluded: walk.stats.excluded,
                ..Default::default()
            };

            let absorbed = match builder.absorb(walk.builder) {
                Ok(absorbed) => absorbed,
                Err(e) => {
                    warn!("Failed to merge {}: {}", report.file.display(), e);
                    found.push(Diagnostic::frontend(
                        Severity::Error,
                        settings.display_path(&report.file),
                        format!("merge failed: {e}"),
                    ));
                    metrics.merge(&unit);
                    continue;
                }
            };
            unit.nodes_merged += absorbed.merged;
            unit.merge_conflicts = absorbed.conflicts.len();
            metrics.merge(&unit);
            for (existing, inserted) in absorbed.conflicts {
                let (Some(earlier), Some(later)) = (builder.node(existing), builder.node(inserted)) else {
                    continue;
                };
                found.push(Diagnostic::merge_conflict(
                    &later.location,
                    &later.qualified_name,
                    format!(
                        "conflicts with earlier declaration `{}` at {}",
                        earlier.signature, earlier.location
                    ),
                ));
            }
        }

        let database = builder.finish();
        metrics.nodes_recorded = database.len();
        let diagnostics = diagnostics::dedup(found);
        info!(
            "Extracted {} node(s) from {}/{} translation unit(s), {} diagnostic(s)",
            database.len(),
            metrics.files_succeeded,
            metrics.files_attempted,
            diagnostics.len()
        );

        Ok(ProcessingResult {
            review: self.options.review_metadata(),
            database,
            diagnostics,
            metrics,
        })
    }
}

/// Directory that separates library headers from external ones.
fn library_root(root: &Path, database: Option<&CompilationDatabase>) -> PathBuf {
    if root.is_dir() {
        return normalize_path(root);
    }
    database
        .and_then(CompilationDatabase::common_root)
        .or_else(|| root.parent().map(Path::to_path_buf))
        .map(|p| normalize_path(&p))
        .unwrap_or_default()
}

fn frontend_diagnostic(settings: &UnitSettings, unit: &Path, error: &FrontendError, severity: Severity) -> Diagnostic {
    let file = error.path().map_or(unit, PathBuf::as_path);
    let diagnostic = Diagnostic::frontend(severity, settings.display_path(file), error.to_string());
    match error.line() {
        Some(line) => diagnostic.with_line(line),
        None => diagnostic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn library(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_process_explicit_files() {
        let dir = library(&[("a.hpp", "namespace N { void f(int); }\n")]);
        let processor = ApiViewProcessor::new(ProcessorOptions::new(dir.path()).with_files(["a.hpp"]));
        let result = processor.process().unwrap();

        assert!(result.is_clean());
        assert_eq!(result.metrics.files_attempted, 1);
        assert_eq!(result.metrics.files_succeeded, 1);
        assert_eq!(result.metrics.nodes_recorded, 2);
        assert_eq!(result.database.get("N::f").unwrap().location.file, "a.hpp");
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let processor = ApiViewProcessor::new(ProcessorOptions::default());
        assert!(matches!(
            processor.process(),
            Err(ProcessorError::Configuration(ConfigurationError::MissingRoot))
        ));

        let processor = ApiViewProcessor::new(ProcessorOptions::new("/definitely/not/here"));
        assert!(matches!(
            processor.process(),
            Err(ProcessorError::Configuration(ConfigurationError::UnreadableRoot(..)))
        ));
    }

    #[test]
    fn test_no_files_and_no_database_is_fatal() {
        let dir = library(&[("a.hpp", "int x;\n")]);
        let processor = ApiViewProcessor::new(ProcessorOptions::new(dir.path()));
        assert!(matches!(
            processor.process(),
            Err(ProcessorError::Configuration(ConfigurationError::MissingCompilationDatabase(_)))
        ));
    }

    #[test]
    fn test_invalid_options_rejected_before_parsing() {
        let dir = library(&[("a.hpp", "int x;\n")]);
        let options = ProcessorOptions::new(dir.path())
            .with_files(["a.hpp"])
            .with_parallel_workers(0);
        assert!(matches!(
            ApiViewProcessor::new(options).process(),
            Err(ProcessorError::Configuration(ConfigurationError::InvalidOption(_)))
        ));
    }

    #[test]
    fn test_skip_list() {
        let dir = library(&[("a.hpp", "void a();\n"), ("b.hpp", "void b();\n")]);
        let mut options = ProcessorOptions::new(dir.path()).with_files(["a.hpp", "b.hpp"]);
        options.source_files_to_skip = vec![PathBuf::from("b.hpp")];
        let result = ApiViewProcessor::new(options).process().unwrap();
        assert_eq!(result.metrics.files_attempted, 1);
        assert!(result.database.get("a").is_some());
        assert!(result.database.get("b").is_none());
    }

    #[test]
    fn test_pre_cancelled_run() {
        let dir = library(&[("a.hpp", "void a();\n")]);
        let token = CancellationToken::new();
        token.cancel();
        let processor = ApiViewProcessor::new(ProcessorOptions::new(dir.path()).with_files(["a.hpp"]))
            .with_cancellation(token);
        assert!(matches!(processor.process(), Err(ProcessorError::Cancelled)));
    }

    #[test]
    fn test_conflict_counted_once() {
        let dir = library(&[("a.hpp", "class A {};\nstruct A {};\n")]);
        let processor = ApiViewProcessor::new(ProcessorOptions::new(dir.path()).with_files(["a.hpp"]));
        let result = processor.process().unwrap();

        let conflicts = result
            .diagnostics
            .iter()
            .filter(|d| d.kind == DiagnosticKind::MergeConflict)
            .count();
        assert_eq!(conflicts, 1);
        assert_eq!(result.metrics.merge_conflicts, conflicts);
        assert_eq!(result.database.get_all("A").len(), 2);
    }

    #[test]
    fn test_merges_across_units_counted() {
        let dir = library(&[
            ("shared.hpp", "#pragma once\nnamespace N { class C {}; }\n"),
            ("a.cpp", "#include \"shared.hpp\"\n"),
            ("b.cpp", "#include \"shared.hpp\"\n"),
        ]);
        let processor =
            ApiViewProcessor::new(ProcessorOptions::new(dir.path()).with_files(["a.cpp", "b.cpp"]));
        let result = processor.process().unwrap();

        assert_eq!(result.metrics.files_succeeded, 2);
        assert_eq!(result.metrics.nodes_recorded, 2);
        assert_eq!(result.metrics.nodes_merged, 2);
        assert_eq!(result.metrics.merge_conflicts, 0);
    }

    #[test]
    fn test_review_metadata_carried_to_result() {
        let dir = library(&[("a.hpp", "void a();\n")]);
        let mut options = ProcessorOptions::new(dir.path()).with_files(["a.hpp"]);
        options.review_name = Some("Widgets".to_string());
        options.package_name = Some("widgets-cpp".to_string());
        let result = ApiViewProcessor::new(options).process().unwrap();

        assert_eq!(result.review.review_name.as_deref(), Some("Widgets"));
        assert_eq!(result.review.package_name.as_deref(), Some("widgets-cpp"));
        assert_eq!(result.review.service_name, None);
    }
}
