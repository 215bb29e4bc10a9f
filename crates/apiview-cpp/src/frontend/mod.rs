//! Compiler front end adapter
//!
//! Turns one input file into a [`TranslationUnit`]: the file itself plus every library
//! header it includes, each preprocessed and parsed into its own syntax tree.

pub mod preprocess;

use log::{debug, trace};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tree_sitter::{Node, Parser, Point, Tree};

use crate::arguments::CompilerArguments;
use crate::compile_db::normalize_path;
use crate::error::FrontendError;
use preprocess::{preprocess, IncludeDirective, MacroTable};

/// A C++ parser producing syntax trees.
pub trait Frontend: Send + Sync {
    fn name(&self) -> &str;

    /// Verify the front end is usable before any file is processed.
    fn check(&self) -> Result<(), FrontendError> {
        Ok(())
    }

    /// Parse already-preprocessed source text.
    fn parse(&self, source: &str, path: &Path, timeout: Option<Duration>) -> Result<Tree, FrontendError>;
}

/// tree-sitter based front end.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSitterFrontend;

impl TreeSitterFrontend {
    pub fn new() -> Self {
        Self
    }

    fn parser(&self) -> Result<Parser, FrontendError> {
        let mut parser = Parser::new();
        let language = tree_sitter_cpp::language();
        parser
            .set_language(&language)
            .map_err(|e| FrontendError::Language(e.to_string()))?;
        Ok(parser)
    }
}

impl Frontend for TreeSitterFrontend {
    fn name(&self) -> &str {
        "tree-sitter-cpp"
    }

    fn check(&self) -> Result<(), FrontendError> {
        self.parser().map(|_| ())
    }

    fn parse(&self, source: &str, path: &Path, timeout: Option<Duration>) -> Result<Tree, FrontendError> {
        let mut parser = self.parser()?;
        if let Some(timeout) = timeout {
            parser.set_timeout_micros(timeout.as_micros().min(u64::MAX as u128) as u64);
        }
        parser.parse(source, None).ok_or_else(|| {
            if timeout.is_some() {
                FrontendError::Timeout(path.to_path_buf())
            } else {
                FrontendError::ParseFailed(path.to_path_buf(), "Failed to parse".to_string())
            }
        })
    }
}

/// Where a parsed file sits relative to the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    /// A file the run was asked to process
    Primary,
    /// A header below the source root, reached through an include
    LibraryHeader,
    /// A header outside the source root (system or third party)
    External,
}

/// One preprocessed and parsed file of a translation unit.
#[derive(Debug)]
pub struct ParsedFile {
    pub path: PathBuf,

    /// Path relative to the source root with `/` separators, or the full path for
    /// files outside it
    pub display_path: String,

    pub role: FileRole,

    /// Preprocessed text the tree was built from
    pub source: String,

    pub tree: Tree,
    pub syntax_errors: usize,
}

/// A primary file plus the headers it pulls in, in include post-order.
#[derive(Debug)]
pub struct TranslationUnit {
    pub primary: PathBuf,
    pub files: Vec<ParsedFile>,

    /// Non-fatal problems: syntax errors accepted in tolerant mode, headers that could
    /// not be read
    pub warnings: Vec<FrontendError>,
}

/// Outcome of processing one input file.
#[derive(Debug)]
pub struct TranslationUnitResult {
    pub file: PathBuf,
    pub outcome: Result<TranslationUnit, FrontendError>,
    pub parse_time: Duration,
}

impl TranslationUnitResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// How translation units are loaded.
#[derive(Debug, Clone)]
pub struct UnitSettings {
    /// Library root; headers below it are library headers
    pub root: PathBuf,
    pub max_file_size: usize,
    pub timeout: Option<Duration>,
    pub tolerant: bool,
    pub parse_external_headers: bool,
    pub neutralized_macros: Vec<String>,
}

impl UnitSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_size: 10 * 1024 * 1024,
            timeout: None,
            tolerant: true,
            parse_external_headers: false,
            neutralized_macros: Vec::new(),
        }
    }

    /// Path used in locations and diagnostics.
    pub fn display_path(&self, path: &Path) -> String {
        let path = normalize_path(path);
        let root = normalize_path(&self.root);
        let shown = path.strip_prefix(&root).unwrap_or(&path);
        shown
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
            .replace("//", "/")
    }

    fn is_library_path(&self, path: &Path) -> bool {
        normalize_path(path).starts_with(normalize_path(&self.root))
    }
}

/// Load the translation unit rooted at `path`, reading it from disk.
pub fn load_unit(
    frontend: &dyn Frontend,
    settings: &UnitSettings,
    arguments: &CompilerArguments,
    path: &Path,
) -> TranslationUnitResult {
    load(frontend, settings, arguments, path, None)
}

/// Load a translation unit whose primary file content is given in memory. Includes are
/// still resolved on disk.
pub fn load_source(
    frontend: &dyn Frontend,
    settings: &UnitSettings,
    arguments: &CompilerArguments,
    path: &Path,
    source: &str,
) -> TranslationUnitResult {
    load(frontend, settings, arguments, path, Some(source.to_string()))
}

fn load(
    frontend: &dyn Frontend,
    settings: &UnitSettings,
    arguments: &CompilerArguments,
    path: &Path,
    source: Option<String>,
) -> TranslationUnitResult {
    let mut macros = MacroTable::with_predefined(&arguments.predefined_macros());
    for name in &settings.neutralized_macros {
        macros.neutralize(name.clone());
    }

    let mut loader = UnitLoader {
        frontend,
        settings,
        arguments,
        entered: HashSet::new(),
        files: Vec::new(),
        warnings: Vec::new(),
        parse_time: Duration::ZERO,
    };

    let outcome = loader.enter(path, FileRole::Primary, source, &mut macros);
    let parse_time = loader.parse_time;
    let outcome = outcome.map(|()| {
        debug!(
            "Loaded {} with {} file(s), {} warning(s)",
            path.display(),
            loader.files.len(),
            loader.warnings.len()
        );
        TranslationUnit {
            primary: path.to_path_buf(),
            files: loader.files,
            warnings: loader.warnings,
        }
    });

    TranslationUnitResult {
        file: path.to_path_buf(),
        outcome,
        parse_time,
    }
}

struct UnitLoader<'a> {
    frontend: &'a dyn Frontend,
    settings: &'a UnitSettings,
    arguments: &'a CompilerArguments,

    /// Files already entered; a header is entered at most once per unit
    entered: HashSet<PathBuf>,

    files: Vec<ParsedFile>,
    warnings: Vec<FrontendError>,
    parse_time: Duration,
}

impl UnitLoader<'_> {
    fn enter(
        &mut self,
        path: &Path,
        role: FileRole,
        source: Option<String>,
        macros: &mut MacroTable,
    ) -> Result<(), FrontendError> {
        if !self.entered.insert(normalize_path(path)) {
            return Ok(());
        }

        let text = match source {
            Some(text) => text,
            None => self.read(path)?,
        };
        if text.len() > self.settings.max_file_size {
            return Err(FrontendError::FileTooLarge(
                path.to_path_buf(),
                self.settings.max_file_size,
            ));
        }

        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let preprocessed = preprocess(&text, macros, &mut |include, macros| {
            self.include(include, &directory, macros);
        });

        let start = Instant::now();
        let parsed = self
            .frontend
            .parse(&preprocessed.text, path, self.settings.timeout);
        self.parse_time += start.elapsed();
        let tree = parsed?;

        let (errors, first) = count_errors(tree.root_node());
        if errors > 0 {
            let (line, column) = first.map_or((1, 1), |p| (p.row + 1, p.column + 1));
            let error = FrontendError::Syntax {
                path: path.to_path_buf(),
                line,
                column,
                errors,
            };
            if role == FileRole::Primary && !self.settings.tolerant {
                return Err(error);
            }
            debug!("Accepting {} despite syntax errors", path.display());
            self.warnings.push(error);
        }

        trace!(
            "Parsed {} ({:?}, {} disabled line(s))",
            path.display(),
            role,
            preprocessed.disabled_lines
        );
        self.files.push(ParsedFile {
            path: path.to_path_buf(),
            display_path: self.settings.display_path(path),
            role,
            source: preprocessed.text,
            tree,
            syntax_errors: errors,
        });
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<String, FrontendError> {
        let metadata = std::fs::metadata(path).map_err(|e| FrontendError::Io(path.to_path_buf(), e))?;
        if metadata.len() as usize > self.settings.max_file_size {
            return Err(FrontendError::FileTooLarge(
                path.to_path_buf(),
                self.settings.max_file_size,
            ));
        }
        let bytes = std::fs::read(path).map_err(|e| FrontendError::Io(path.to_path_buf(), e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn include(&mut self, include: &IncludeDirective, directory: &Path, macros: &mut MacroTable) {
        let Some((path, role)) = self.resolve(include, directory) else {
            trace!("Unresolved include {} (line {})", include.path, include.line);
            return;
        };
        if role == FileRole::External && !self.settings.parse_external_headers {
            trace!("Skipping external header {}", path.display());
            return;
        }
        if let Err(e) = self.enter(&path, role, None, macros) {
            debug!("Header {} skipped: {}", path.display(), e);
            self.warnings.push(e);
        }
    }

    /// Quoted includes search the including directory first, then `-I` directories;
    /// angle includes search `-I` directories only. System directories come last.
    fn resolve(&self, include: &IncludeDirective, directory: &Path) -> Option<(PathBuf, FileRole)> {
        let relative = Path::new(&include.path);
        if relative.is_absolute() {
            return relative
                .is_file()
                .then(|| (relative.to_path_buf(), self.role_of(relative)));
        }

        let local = (!include.angled).then(|| directory.to_path_buf());
        let user = local
            .into_iter()
            .chain(self.arguments.include_dirs.iter().cloned())
            .map(|dir| normalize_path(&dir.join(relative)))
            .find(|candidate| candidate.is_file());
        if let Some(found) = user {
            let role = self.role_of(&found);
            return Some((found, role));
        }

        self.arguments
            .system_include_dirs
            .iter()
            .map(|dir| normalize_path(&dir.join(relative)))
            .find(|candidate| candidate.is_file())
            .map(|found| (found, FileRole::External))
    }

    fn role_of(&self, path: &Path) -> FileRole {
        if self.settings.is_library_path(path) {
            FileRole::LibraryHeader
        } else {
            FileRole::External
        }
    }
}

/// Number of error and missing nodes, and the position of the first one.
pub fn count_errors(node: Node) -> (usize, Option<Point>) {
    let mut count = 0;
    let mut first = None;

    if node.is_error() || node.is_missing() {
        count += 1;
        first = Some(node.start_position());
    }

    if node.has_error() {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            let (n, position) = count_errors(child);
            count += n;
            if first.is_none() {
                first = position;
            }
        }
    }

    (count, first)
}
