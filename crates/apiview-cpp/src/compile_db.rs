//! `compile_commands.json` support.

use log::debug;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::arguments::split_command_line;
use crate::error::ConfigurationError;

const DATABASE_NAME: &str = "compile_commands.json";

/// One entry of a compilation database, arguments excluding the compiler itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileCommand {
    /// Absolute (or root-relative, when `directory` is) path of the source file
    pub file: PathBuf,
    pub directory: PathBuf,
    pub arguments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    directory: PathBuf,
    file: PathBuf,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    command: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CompilationDatabase {
    pub path: PathBuf,
    pub commands: Vec<CompileCommand>,
}

impl CompilationDatabase {
    /// Find the compilation database for a source root.
    ///
    /// A `.json` root is the database itself; a directory is searched for
    /// `compile_commands.json`, then `build/compile_commands.json`.
    pub fn locate(root: &Path) -> Option<PathBuf> {
        if root.is_file() {
            return (root.extension().and_then(|e| e.to_str()) == Some("json"))
                .then(|| root.to_path_buf());
        }
        [root.join(DATABASE_NAME), root.join("build").join(DATABASE_NAME)]
            .into_iter()
            .find(|candidate| candidate.is_file())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::UnreadableRoot(path.to_path_buf(), e))?;
        Self::from_json(path, &text)
    }

    /// Parse database text; `path` is used for messages and relative directories.
    pub fn from_json(path: &Path, text: &str) -> Result<Self, ConfigurationError> {
        let raw: Vec<RawCommand> = serde_json::from_str(text)
            .map_err(|e| ConfigurationError::MalformedCompilationDatabase(path.to_path_buf(), e))?;
        let base = path.parent().unwrap_or(Path::new("."));

        let mut seen = HashSet::new();
        let mut commands = Vec::with_capacity(raw.len());
        for entry in raw {
            let directory = if entry.directory.is_relative() {
                normalize_path(&base.join(&entry.directory))
            } else {
                normalize_path(&entry.directory)
            };
            let file = if entry.file.is_relative() {
                normalize_path(&directory.join(&entry.file))
            } else {
                normalize_path(&entry.file)
            };

            if !seen.insert(file.clone()) {
                debug!("Ignoring duplicate compile command for {}", file.display());
                continue;
            }

            let mut arguments = match (entry.arguments, entry.command) {
                (Some(arguments), _) => arguments,
                (None, Some(command)) => split_command_line(&command),
                (None, None) => Vec::new(),
            };
            // Compiler executable
            if !arguments.is_empty() {
                arguments.remove(0);
            }
            arguments.retain(|a| !is_output_or_input(a, &directory, &file));
            strip_output_pairs(&mut arguments);

            commands.push(CompileCommand {
                file,
                directory,
                arguments,
            });
        }

        debug!("Loaded {} compile commands from {}", commands.len(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
            commands,
        })
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.commands.iter().map(|c| c.file.as_path())
    }

    pub fn command_for(&self, file: &Path) -> Option<&CompileCommand> {
        let file = normalize_path(file);
        self.commands.iter().find(|c| c.file == file)
    }

    /// Deepest directory containing every source file in the database.
    pub fn common_root(&self) -> Option<PathBuf> {
        let mut files = self.files();
        let mut root = files.next()?.parent()?.to_path_buf();
        for file in files {
            while !file.starts_with(&root) {
                root = root.parent()?.to_path_buf();
            }
        }
        Some(root)
    }
}

fn is_output_or_input(arg: &str, directory: &Path, file: &Path) -> bool {
    arg == "-c"
        || (arg.starts_with("-o") && arg.len() > 2)
        || (!arg.starts_with('-') && normalize_path(&directory.join(arg)) == file)
}

/// Drop `-o <file>` pairs.
fn strip_output_pairs(arguments: &mut Vec<String>) {
    let mut i = 0;
    while i < arguments.len() {
        if arguments[i] == "-o" {
            let end = (i + 2).min(arguments.len());
            arguments.drain(i..end);
        } else {
            i += 1;
        }
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
