//! C++ API surface extractor
//!
//! Parses the headers of a C++ library and records every declaration that belongs to
//! its public contract in an [`apiview::ClassesDatabase`]: namespaces, classes,
//! enums, functions, fields, type aliases and template parameters, each with a
//! normalized signature suitable for textual diffing between releases.
//!
//! Declarations are filtered by access, by implementation-detail namespace conventions
//! and by where they were declared; type spellings are normalized so that
//! `const std::string&` and `std::string const&` compare equal.
//!
//! # Example
//!
//! ```rust,no_run
//! use apiview_cpp::{ApiViewProcessor, ProcessorOptions};
//!
//! let options = ProcessorOptions::new("/src/mylib").with_files(["include/mylib/widget.hpp"]);
//! let result = ApiViewProcessor::new(options).process().unwrap();
//!
//! for (depth, node) in result.database.walk() {
//!     println!("{}{}", "  ".repeat(depth), node.signature);
//! }
//! for diagnostic in &result.diagnostics {
//!     eprintln!("{diagnostic}");
//! }
//! ```

pub mod arguments;
pub mod compile_db;
pub mod error;
pub mod filter;
pub mod frontend;
pub mod normalize;
pub mod options;
pub mod processor;
mod syntax;
pub mod walker;

pub use arguments::CompilerArguments;
pub use compile_db::{CompilationDatabase, CompileCommand};
pub use error::{ConfigurationError, FrontendError, ProcessorError, ProcessorResult};
pub use filter::{Decision, ExcludeReason, FilterConfig};
pub use frontend::{FileRole, Frontend, TranslationUnit, TreeSitterFrontend};
pub use options::{ProcessorOptions, ReviewMetadata};
pub use processor::{ApiViewProcessor, CancellationToken, ProcessingResult};
pub use walker::{walk_unit, WalkOutput, WalkStats};
